//! Per-render execution state threaded through the evaluator and handed to
//! filters, tests, and global functions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::context::Context;
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::inherit::BlockChain;
use crate::output::Output;
use crate::template::Template;
use crate::utils::{AutoEscape, UndefinedBehavior};
use crate::value::Value;

/// Read/write handle threaded through a single template render.
///
/// A new `State` is created for every top-level
/// [`Environment::render`](crate::environment::Environment::render) call,
/// and reused (with a fresh [`Context`] scope) for the `{% include %}`s and
/// macro calls it makes along the way.
pub struct State<'env> {
    pub(crate) env: &'env Environment,
    name: Arc<str>,
    pub(crate) ctx: Context,
    pub(crate) auto_escape: AutoEscape,
    undefined_behavior: UndefinedBehavior,
    /// Name of the block currently executing, exposed as `self.block_name()`
    /// isn't a thing in Jinja — this backs `self._block_name` style
    /// introspection used internally when dispatching `self.other_block()`.
    pub(crate) current_block: Option<Arc<str>>,
    pub(crate) blocks: Arc<HashMap<String, BlockChain>>,
    /// The block override currently rendering, consulted by `{{ super() }}`
    /// to find the next link in the chain.
    pub(crate) super_frame: Option<SuperFrame>,
    /// Which physical template textually contains the code currently
    /// executing. `None` for a bare expression evaluation with no template
    /// at all (see [`for_env`](Self::for_env)); otherwise switched whenever
    /// evaluation steps into a block override or an `{% include %}`, and
    /// restored on the way back out, so a `{% macro %}` picks up the right
    /// defining template regardless of which link of an inheritance chain
    /// or include it's declared in.
    pub(crate) current_template: Option<Arc<Template>>,
    temps: Mutex<HashMap<String, Value>>,
    /// One entry per macro call currently on the stack, innermost last;
    /// `Some` when that call came from a `{% call %}` block, `None`
    /// otherwise so a macro invoked directly from inside one doesn't
    /// inherit its caller. Holds the call site's template + span
    /// (re-resolved to the AST node on demand, the same way block
    /// overrides are looked up by name) rather than a borrowed AST
    /// reference, since a `State` only carries the environment's
    /// lifetime, not the template's.
    pub(crate) caller_frames: Mutex<Vec<Option<CallerFrame>>>,
}

/// See [`State::caller_frames`].
#[derive(Clone)]
pub(crate) struct CallerFrame {
    pub(crate) template: Arc<Template>,
    pub(crate) span: crate::tokens::Span,
    pub(crate) closure: crate::context::Closure,
}

/// Which block override is currently rendering, so `{{ super() }}` knows
/// where in its [`BlockChain`] to resume.
#[derive(Clone)]
pub(crate) struct SuperFrame {
    pub(crate) name: String,
    pub(crate) chain: BlockChain,
    pub(crate) index: usize,
}

impl fmt::Debug for State<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("auto_escape", &self.auto_escape)
            .field("current_block", &self.current_block)
            .finish()
    }
}

impl<'env> State<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        name: Arc<str>,
        ctx: Context,
        auto_escape: AutoEscape,
        blocks: Arc<HashMap<String, BlockChain>>,
        current_template: Arc<Template>,
    ) -> State<'env> {
        State {
            undefined_behavior: env.undefined_behavior(),
            env,
            name,
            ctx,
            auto_escape,
            current_block: None,
            blocks,
            super_frame: None,
            current_template: Some(current_template),
            temps: Mutex::new(HashMap::new()),
            caller_frames: Mutex::new(Vec::new()),
        }
    }

    /// A bare state for a standalone expression evaluation (no template, no
    /// inheritance chain), used by `Environment::eval_expr`.
    pub(crate) fn for_env(env: &'env Environment, ctx: Context) -> State<'env> {
        State {
            undefined_behavior: env.undefined_behavior(),
            env,
            name: Arc::from("<expression>"),
            ctx,
            auto_escape: AutoEscape::None,
            current_block: None,
            blocks: Arc::new(HashMap::new()),
            super_frame: None,
            current_template: None,
            temps: Mutex::new(HashMap::new()),
            caller_frames: Mutex::new(Vec::new()),
        }
    }

    /// Returns a reference to the environment this state was created from.
    pub fn env(&self) -> &'env Environment {
        self.env
    }

    /// The name of the template currently rendering.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auto_escape(&self) -> AutoEscape {
        self.auto_escape
    }

    pub fn undefined_behavior(&self) -> UndefinedBehavior {
        self.undefined_behavior
    }

    pub fn current_block(&self) -> Option<&str> {
        self.current_block.as_deref()
    }

    /// Looks up a variable by name in the active scope chain.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.ctx.get(name)
    }

    /// Invokes a registered filter with the given arguments.
    pub fn apply_filter(&self, name: &str, value: Value, args: &[Value]) -> Result<Value, Error> {
        match self.env.get_filter(name) {
            Some(f) => f(self, value, args),
            None => Err(Error::new(
                ErrorKind::FilterError,
                format!("no filter named '{name}'"),
            )),
        }
    }

    /// Invokes a registered test with the given arguments.
    pub fn perform_test(&self, name: &str, value: &Value, args: &[Value]) -> Result<bool, Error> {
        match self.env.get_test(name) {
            Some(t) => t(self, value, args).map(|v| v.is_true()),
            None => Err(Error::new(
                ErrorKind::TestError,
                format!("no test named '{name}'"),
            )),
        }
    }

    /// Looks up a named temp value. Temps back stateful helpers like
    /// `cycler()`/`joiner()` that need to keep state across calls within one
    /// render without becoming context variables.
    pub fn get_temp(&self, name: &str) -> Option<Value> {
        self.temps.lock().unwrap().get(name).cloned()
    }

    pub fn set_temp(&self, name: &str, value: Value) {
        self.temps.lock().unwrap().insert(name.to_string(), value);
    }

    /// Renders a value to a string the way `{{ value }}` would, honoring the
    /// current auto-escaping mode.
    pub fn format(&self, value: &Value) -> Result<String, Error> {
        let mut rv = String::new();
        let mut out = Output::with_string(&mut rv, self.auto_escape);
        crate::utils::write_escaped(&mut out, self.auto_escape, value)?;
        Ok(rv)
    }
}
