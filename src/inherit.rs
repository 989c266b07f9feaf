//! Deferred template inheritance: resolves a `{% extends %}` chain into a
//! per-block-name override chain the evaluator consults for `{% block %}`
//! and `{{ super() }}`, without ever rebuilding a merged AST.
//!
//! Grounded in the teacher's description of inheritance as a render-time
//! concern (`vm/state.rs`'s `BlockStack`) rather than a parse-time one, but
//! reshaped around this engine's tree-walking evaluator: instead of flat
//! per-block bytecode blobs, a [`BlockChain`] is a list of the templates
//! that define a block, most-derived first, and the evaluator re-borrows
//! each template's own AST to find the body by name when it needs it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::ast;
use crate::context::Context;
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::state::State;
use crate::template::Template;
use crate::utils::AutoEscape;
use crate::value::Value;

/// The chain of templates that define a given `{% block %}` name, ordered
/// from the most derived (closest to the template actually rendered) down
/// to the root of the `{% extends %}` chain. `{{ super() }}` advances one
/// step further into this list instead of re-walking the chain.
#[derive(Clone, Default)]
pub(crate) struct BlockChain {
    pub(crate) templates: Vec<Arc<Template>>,
}

/// The result of resolving a template's inheritance chain: which template's
/// own top-level structure actually drives rendering (the base template, if
/// any `{% extends %}` was followed), plus the block override table.
pub(crate) struct Resolved {
    pub(crate) root: Arc<Template>,
    pub(crate) blocks: Arc<HashMap<String, BlockChain>>,
}

/// Builds the block-override table for an already-walked `{% extends %}`
/// chain (most-derived template first, root last).
///
/// Split from [`resolve_chain`] so [`Environment::resolve_blocks`] only pays
/// for walking every block in every template on an actual cache miss — the
/// chain itself (the part a dynamic `{% extends %}` target can change) is
/// resolved first and used as the cache key.
pub(crate) fn build_resolved(chain: Vec<Arc<Template>>) -> Result<Resolved, Error> {
    let root = chain.last().unwrap().clone();
    let mut blocks: HashMap<String, BlockChain> = HashMap::new();
    for t in &chain {
        let mut seen_in_template = HashSet::new();
        for name in collect_block_names(t.ast().children.as_slice()) {
            if !seen_in_template.insert(name.clone()) {
                return Err(Error::new(
                    ErrorKind::InheritanceError,
                    format!("block {name:?} defined twice in template {:?}", t.name()),
                ));
            }
            blocks
                .entry(name)
                .or_insert_with(BlockChain::default)
                .templates
                .push(t.clone());
        }
    }

    Ok(Resolved {
        root,
        blocks: Arc::new(blocks),
    })
}

/// Walks `tmpl`'s `{% extends %}` chain, most-derived first, evaluating each
/// step's target expression along the way.
///
/// The `{% extends %}` target is a full expression evaluated against the
/// render's globals/initial context (a name, a ternary picking between two
/// template names, string concatenation, ...), not just a string literal —
/// `{% extends %}` must be the first tag in a template, so no `{% set %}`
/// has run yet and the globals passed in are everything the expression can
/// legally see.
pub(crate) fn resolve_chain(
    env: &Environment,
    tmpl: &Arc<Template>,
    globals: &Arc<HashMap<String, Value>>,
) -> Result<Vec<Arc<Template>>, Error> {
    let mut chain = vec![tmpl.clone()];
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(tmpl.name().to_string());

    loop {
        let current = chain.last().unwrap().clone();
        match find_extends(env, &current, globals)? {
            None => break,
            Some(parent_name) => {
                if !visited.insert(parent_name.clone()) {
                    return Err(Error::new(
                        ErrorKind::InheritanceError,
                        format!("circular extends involving {parent_name:?}"),
                    ));
                }
                let parent = env.get_template(&parent_name).map_err(|err| {
                    Error::new(
                        ErrorKind::InheritanceError,
                        format!("could not load parent template {parent_name:?}: {err}"),
                    )
                })?;
                chain.push(parent);
            }
        }
    }

    Ok(chain)
}

/// The single `{% extends %}` target name, if any. Errors if more than one
/// is present, matching the one-`extends`-per-template rule.
fn find_extends(
    env: &Environment,
    tmpl: &Template,
    globals: &Arc<HashMap<String, Value>>,
) -> Result<Option<String>, Error> {
    let mut found = None;
    for stmt in &tmpl.ast().children {
        if let ast::Stmt::Extends(extends) = stmt {
            if found.is_some() {
                return Err(Error::new(
                    ErrorKind::InheritanceError,
                    "a template may only have one {% extends %} tag",
                ));
            }
            found = Some(extends_target(&extends.name, env, tmpl, globals)?);
        }
    }
    Ok(found)
}

/// Evaluates the `{% extends %}` target expression against the render's
/// globals. Uses a scratch [`State`] over an empty block table, since
/// resolving the parent name happens before the real block chain (the thing
/// that scratch state would otherwise need) even exists.
fn extends_target(
    expr: &ast::Expr<'_>,
    env: &Environment,
    tmpl: &Template,
    globals: &Arc<HashMap<String, Value>>,
) -> Result<String, Error> {
    let ctx = Context::new(globals.clone());
    let mut state = State::new(
        env,
        Arc::from(tmpl.name()),
        ctx,
        AutoEscape::None,
        Arc::new(HashMap::new()),
        Arc::new(tmpl.clone()),
    );
    let value = crate::eval::eval_expr(expr, &mut state, None)?;
    match value.as_str() {
        Some(s) => Ok(s.to_string()),
        None => Err(Error::new(
            ErrorKind::InheritanceError,
            format!("{% extends %} target must be a string, got {}", value.type_name()),
        )),
    }
}

fn collect_block_names(stmts: &[ast::Stmt<'_>]) -> Vec<String> {
    let mut out = Vec::new();
    for stmt in stmts {
        collect_block_names_stmt(stmt, &mut out);
    }
    out
}

fn collect_block_names_stmt(stmt: &ast::Stmt<'_>, out: &mut Vec<String>) {
    match stmt {
        ast::Stmt::Block(b) => {
            out.push(b.name.to_string());
            for s in &b.body {
                collect_block_names_stmt(s, out);
            }
        }
        ast::Stmt::IfCond(c) => {
            for (_, body) in &c.branches {
                for s in body {
                    collect_block_names_stmt(s, out);
                }
            }
            for s in &c.else_body {
                collect_block_names_stmt(s, out);
            }
        }
        ast::Stmt::ForLoop(f) => {
            for s in &f.body {
                collect_block_names_stmt(s, out);
            }
            for s in &f.else_body {
                collect_block_names_stmt(s, out);
            }
        }
        ast::Stmt::WithBlock(w) => {
            for s in &w.body {
                collect_block_names_stmt(s, out);
            }
        }
        ast::Stmt::AutoEscape(a) => {
            for s in &a.body {
                collect_block_names_stmt(s, out);
            }
        }
        ast::Stmt::FilterBlock(f) => {
            for s in &f.body {
                collect_block_names_stmt(s, out);
            }
        }
        _ => {}
    }
}

/// Finds the `{% block name %}` node in `stmts` by name, searching nested
/// control flow the same way [`collect_block_names`] enumerates them.
pub(crate) fn find_block<'t>(stmts: &'t [ast::Stmt<'t>], name: &str) -> Option<&'t ast::Block<'t>> {
    for stmt in stmts {
        if let Some(found) = find_block_in_stmt(stmt, name) {
            return Some(found);
        }
    }
    None
}

fn find_block_in_stmt<'t>(stmt: &'t ast::Stmt<'t>, name: &str) -> Option<&'t ast::Block<'t>> {
    match stmt {
        ast::Stmt::Block(b) => {
            if b.name == name {
                return Some(&**b);
            }
            find_block(&b.body, name)
        }
        ast::Stmt::IfCond(c) => {
            for (_, body) in &c.branches {
                if let Some(found) = find_block(body, name) {
                    return Some(found);
                }
            }
            find_block(&c.else_body, name)
        }
        ast::Stmt::ForLoop(f) => find_block(&f.body, name).or_else(|| find_block(&f.else_body, name)),
        ast::Stmt::WithBlock(w) => find_block(&w.body, name),
        ast::Stmt::AutoEscape(a) => find_block(&a.body, name),
        ast::Stmt::FilterBlock(f) => find_block(&f.body, name),
        _ => None,
    }
}

/// Finds a `{% macro %}` declaration by name among a template's top-level
/// statements (macros are not looked up through nested control flow; they
/// are meant to be declared at template scope).
pub(crate) fn find_macro<'t>(stmts: &'t [ast::Stmt<'t>], name: &str) -> Option<&'t ast::Macro<'t>> {
    stmts.iter().find_map(|stmt| match stmt {
        ast::Stmt::Macro(m) if m.name == name => Some(&**m),
        _ => None,
    })
}
