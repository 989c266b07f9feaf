//! The layered variable scope the evaluator walks while rendering.
//!
//! A [`Context`] is a chain of scopes: the innermost (`locals`) holds
//! bindings made by `{% set %}`/`{% for %}`/macro arguments in the current
//! block, each scope links to its parent, and the chain bottoms out at the
//! environment's globals. Lookups walk innermost-first; writes always land
//! in the innermost scope unless explicitly told to reuse a parent one
//! (`{% set %}` at template top level writes through to the root scope so
//! later blocks see it, matching Jinja2's "set is function scoped" rule).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::template::Template;
use crate::value::{Object, Value};

#[derive(Debug, Default)]
struct Scope {
    locals: HashMap<String, Value>,
}

/// A chain of variable scopes plus the render-global `loop` stack.
#[derive(Debug)]
pub struct Context {
    scopes: Vec<Scope>,
    globals: Arc<HashMap<String, Value>>,
}

impl Context {
    pub fn new(globals: Arc<HashMap<String, Value>>) -> Context {
        Context {
            scopes: vec![Scope::default()],
            globals,
        }
    }

    /// Pushes a new, empty innermost scope. Returns a token whose matching
    /// [`pop`](Self::pop) restores the prior depth — callers never pop more
    /// than they pushed.
    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pops the innermost scope. Panics if this would remove the root scope,
    /// which indicates a push/pop mismatch in the evaluator.
    pub fn pop(&mut self) {
        if self.scopes.len() <= 1 {
            panic!("context scope underflow");
        }
        self.scopes.pop();
    }

    /// Looks up a name, walking from the innermost scope outward and
    /// finally falling back to the environment's globals.
    pub fn get(&self, name: &str) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.locals.get(name) {
                return Some(value.clone());
            }
        }
        self.globals.get(name).cloned()
    }

    /// Binds `name` in the innermost scope, shadowing anything outer.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.scopes
            .last_mut()
            .expect("context always has a root scope")
            .locals
            .insert(name.into(), value);
    }

    /// Binds `name` in the outermost (template root) scope. Used for
    /// `{% set %}` at the top level of a template so that later `{% block %}`
    /// bodies — which push their own scope — can still see it.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.scopes[0].locals.insert(name.into(), value);
    }

    /// A snapshot of every binding currently visible, outermost first, used
    /// to build a macro's closure over its defining scope.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let mut out: HashMap<String, Value> = (*self.globals).clone();
        for scope in &self.scopes {
            out.extend(scope.locals.clone());
        }
        out
    }
}

/// A frozen copy of a [`Context`] captured at macro-definition time, used so
/// the macro body can resolve free variables against the scope it closed
/// over rather than whatever happens to be in scope at the call site.
#[derive(Debug, Clone)]
pub struct Closure(Arc<HashMap<String, Value>>);

impl Closure {
    pub fn capture(ctx: &Context) -> Closure {
        Closure(Arc::new(ctx.snapshot()))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }

    /// Iterates every binding captured in the closure, used to seed a fresh
    /// scope for a macro call or a `{% call %}` body.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// A `{% macro %}` bound as a first-class value.
///
/// Holds just enough to find the macro's body again when called: the
/// template it was defined in (by name, re-fetched by [`as_macro`] callers
/// via `crate::eval`'s block/macro lookup helpers) and the closure it was
/// defined under. The body itself is never cloned out of the AST — looked up
/// by name each call, the same way block overrides are.
#[derive(Clone)]
pub(crate) struct Macro {
    pub(crate) template: Arc<Template>,
    pub(crate) name: Arc<str>,
    pub(crate) closure: Closure,
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macro").field("name", &self.name).finish()
    }
}

impl Object for Macro {
    fn type_name(&self) -> &'static str {
        "macro"
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn as_macro(&self) -> Option<&Macro> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing() {
        let mut ctx = Context::new(Arc::new(HashMap::new()));
        ctx.set("x", Value::from(1));
        ctx.push();
        ctx.set("x", Value::from(2));
        assert_eq!(ctx.get("x"), Some(Value::from(2)));
        ctx.pop();
        assert_eq!(ctx.get("x"), Some(Value::from(1)));
    }

    #[test]
    fn test_globals_fallback() {
        let mut globals = HashMap::new();
        globals.insert("site".to_string(), Value::from("demo"));
        let ctx = Context::new(Arc::new(globals));
        assert_eq!(ctx.get("site"), Some(Value::from("demo")));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn test_set_global_visible_in_nested_scope() {
        let mut ctx = Context::new(Arc::new(HashMap::new()));
        ctx.push();
        ctx.set_global("base", Value::from(true));
        ctx.pop();
        assert_eq!(ctx.get("base"), Some(Value::from(true)));
    }
}
