//! The tree-walking evaluator: interprets `src/ast.rs` nodes directly
//! against a [`State`], writing to an [`Output`]. There is no bytecode
//! lowering step — see the module-level note in `src/template.rs` for why.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ast;
use crate::context::{Closure, Context, Macro};
use crate::error::{Error, ErrorKind};
use crate::functions::Namespace;
use crate::inherit;
use crate::output::Output;
use crate::state::State;
use crate::template::Template;
use crate::utils::{write_escaped, AutoEscape, UndefinedBehavior};
use crate::value::{Enumerator, Object, Value, ValueMap};
use crate::value::ops;

/// How a statement sequence finished: fell off the end, or hit `break`/
/// `continue` looking for the nearest enclosing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

/// The active `{% for ... recursive %}` frame, consulted when `loop(...)`
/// is called as an expression. `None` outside a recursive loop, or inside a
/// nested ordinary loop, macro body, or block render (each of those starts
/// a fresh call with `rframe: None`).
struct RecursionFrame<'t> {
    node: &'t ast::ForLoop<'t>,
    depth: usize,
}

/// Renders `root`'s top-level structure into `out`.
///
/// `tmpl` is the template actually requested (e.g. via
/// [`Environment::render`](crate::environment::Environment::render)); `root`
/// is the base of its `{% extends %}` chain (equal to `tmpl` when it doesn't
/// extend anything). When they differ, `tmpl`'s top-level `{% macro %}`
/// declarations are registered before `root` renders, matching the rule
/// that a child template can still export macros.
pub(crate) fn eval_template(
    tmpl: &Arc<Template>,
    root: &Arc<Template>,
    state: &mut State,
    out: &mut Output,
) -> Result<(), Error> {
    if !Arc::ptr_eq(tmpl, root) {
        for stmt in &tmpl.ast().children {
            if let ast::Stmt::Macro(m) = stmt {
                bind_macro(tmpl, m, state);
            }
        }
    }
    let flow = exec_stmts(&root.ast().children, state, None, out)?;
    if flow != Flow::Normal {
        return Err(Error::new(
            ErrorKind::RuntimeError,
            "break/continue used outside of a loop",
        ));
    }
    Ok(())
}

fn bind_macro(defining: &Arc<Template>, m: &ast::Macro<'_>, state: &mut State) {
    let value = Value::from_object(Macro {
        template: defining.clone(),
        name: Arc::from(m.name),
        closure: Closure::capture(&state.ctx),
    });
    state.ctx.set(m.name, value);
}

fn exec_stmts<'t>(
    stmts: &'t [ast::Stmt<'t>],
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
    out: &mut Output,
) -> Result<Flow, Error> {
    for stmt in stmts {
        let flow = exec_stmt(stmt, state, rframe, out)?;
        if flow != Flow::Normal {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

fn exec_stmt<'t>(
    stmt: &'t ast::Stmt<'t>,
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
    out: &mut Output,
) -> Result<Flow, Error> {
    match stmt {
        ast::Stmt::EmitRaw(raw) => {
            out.write_str(raw.raw).map_err(Error::from)?;
            Ok(Flow::Normal)
        }
        ast::Stmt::EmitExpr(emit) => {
            let value = eval_expr(&emit.expr, state, rframe)?;
            emit_value(&value, state, out)?;
            Ok(Flow::Normal)
        }
        ast::Stmt::IfCond(if_cond) => exec_if(if_cond, state, rframe, out),
        ast::Stmt::ForLoop(for_loop) => exec_for(for_loop, state, out),
        ast::Stmt::WithBlock(with_block) => {
            state.ctx.push();
            let mut result = Ok(Flow::Normal);
            for (target, expr) in &with_block.assignments {
                match eval_expr(expr, state, rframe) {
                    Ok(value) => assign(target, value, state),
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                }
            }
            if result.is_ok() {
                result = exec_stmts(&with_block.body, state, rframe, out);
            }
            state.ctx.pop();
            result
        }
        ast::Stmt::Set(set) => {
            let value = eval_expr(&set.expr, state, rframe)?;
            assign(&set.target, value, state);
            Ok(Flow::Normal)
        }
        ast::Stmt::SetBlock(set_block) => {
            let captured = capture(state, |state, out| exec_stmts(&set_block.body, state, None, out))?;
            let mut value = Value::from(captured);
            for filter in &set_block.filters {
                value = apply_filter_call(filter, value, state, rframe)?;
            }
            assign(&set_block.target, value, state);
            Ok(Flow::Normal)
        }
        ast::Stmt::Block(block) => exec_block(block.name, state, out),
        ast::Stmt::AutoEscape(auto_escape) => {
            let enabled = eval_expr(&auto_escape.enabled, state, rframe)?;
            let prev = state.auto_escape;
            state.auto_escape = if enabled.is_true() {
                AutoEscape::Html
            } else {
                AutoEscape::None
            };
            let result = exec_stmts(&auto_escape.body, state, rframe, out);
            state.auto_escape = prev;
            result
        }
        ast::Stmt::FilterBlock(filter_block) => {
            let captured = capture(state, |state, out| exec_stmts(&filter_block.body, state, rframe, out))?;
            let mut value = Value::from(captured);
            for filter in &filter_block.filters {
                value = apply_filter_call(filter, value, state, rframe)?;
            }
            write_escaped(out, state.auto_escape, &value)?;
            Ok(Flow::Normal)
        }
        ast::Stmt::Import(import) => {
            let name = template_name_of(&import.expr, state, rframe)?;
            let ns = import_namespace(&name, state)?;
            state.ctx.set(import.name, ns);
            Ok(Flow::Normal)
        }
        ast::Stmt::FromImport(from_import) => {
            let name = template_name_of(&from_import.expr, state, rframe)?;
            let tmpl = state.env.get_template(&name)?;
            for (item, alias) in &from_import.names {
                let value = Value::from_object(Macro {
                    template: tmpl.clone(),
                    name: Arc::from(*item),
                    closure: Closure::capture(&state.ctx),
                });
                state.ctx.set(alias.unwrap_or(item), value);
            }
            Ok(Flow::Normal)
        }
        ast::Stmt::Extends(_) => Ok(Flow::Normal),
        ast::Stmt::Include(include) => exec_include(include, state, rframe, out),
        ast::Stmt::Macro(m) => {
            bind_macro(&current_template(state), m, state);
            Ok(Flow::Normal)
        }
        ast::Stmt::CallBlock(call_block) => {
            let value = call_with_caller(call_block, state, rframe)?;
            emit_value(&value, state, out)?;
            Ok(Flow::Normal)
        }
        ast::Stmt::Do(do_stmt) => {
            eval_expr(&do_stmt.expr, state, rframe)?;
            Ok(Flow::Normal)
        }
        ast::Stmt::Break(_) => Ok(Flow::Break),
        ast::Stmt::Continue(_) => Ok(Flow::Continue),
        ast::Stmt::Extension(ext) => Err(Error::new(
            ErrorKind::RuntimeError,
            format!("unknown tag '{}'", ext.name),
        )),
    }
}

fn emit_value(value: &Value, state: &State, out: &mut Output) -> Result<(), Error> {
    if value.is_undefined() {
        let name = match value {
            Value::Undefined(name, _) => name.as_ref(),
            _ => unreachable!(),
        };
        let rendered = state.undefined_behavior().render(name)?;
        out.write_str(&rendered).map_err(Error::from)
    } else {
        write_escaped(out, state.auto_escape, value)
    }
}

fn assign(target: &ast::AssignTarget<'_>, value: Value, state: &mut State) {
    match target {
        ast::AssignTarget::Name(name) => state.ctx.set(*name, value),
        ast::AssignTarget::Tuple(names) => {
            let items: Vec<Value> = value.try_iter().ok().map(|it| it.collect()).unwrap_or_default();
            for (i, name) in names.iter().enumerate() {
                state.ctx.set(*name, items.get(i).cloned().unwrap_or(Value::Nil));
            }
        }
    }
}

/// Captures everything `f` writes into a fresh string, honoring the current
/// auto-escape mode the same way `{{ }}` output would when re-emitted.
fn capture<F>(state: &mut State, f: F) -> Result<String, Error>
where
    F: FnOnce(&mut State, &mut Output) -> Result<Flow, Error>,
{
    let mut buf = String::new();
    let mut out = Output::with_string(&mut buf, state.auto_escape);
    f(state, &mut out)?;
    Ok(buf)
}

fn exec_if<'t>(
    if_cond: &'t ast::IfCond<'t>,
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
    out: &mut Output,
) -> Result<Flow, Error> {
    for (cond, body) in &if_cond.branches {
        let value = eval_expr(cond, state, rframe)?;
        state.undefined_behavior().assert_not_strict("condition").ok();
        if value.is_true() {
            return exec_stmts(body, state, rframe, out);
        }
    }
    exec_stmts(&if_cond.else_body, state, rframe, out)
}

fn exec_for<'t>(for_loop: &'t ast::ForLoop<'t>, state: &mut State, out: &mut Output) -> Result<Flow, Error> {
    run_for(for_loop, &for_loop.iter, state, out, 0)
}

fn run_for<'t>(
    for_loop: &'t ast::ForLoop<'t>,
    iter_expr: &'t ast::Expr<'t>,
    state: &mut State,
    out: &mut Output,
    depth: usize,
) -> Result<Flow, Error> {
    let iterable = eval_expr(iter_expr, state, None)?;
    let items: Vec<Value> = if iterable.is_undefined() {
        if matches!(state.undefined_behavior(), UndefinedBehavior::Strict) {
            let name = match &iterable {
                Value::Undefined(name, _) => name.as_ref(),
                _ => unreachable!(),
            };
            return Err(Error::new(ErrorKind::UndefinedError, format!("{name} is undefined")));
        }
        Vec::new()
    } else {
        iterable.try_iter()?.collect()
    };

    if items.is_empty() {
        return exec_stmts(&for_loop.else_body, state, None, out);
    }

    let len = items.len();
    let changed_prev: Mutex<Option<Vec<Value>>> = Mutex::new(None);
    let mut flow = Flow::Normal;

    state.ctx.push();
    for (index0, item) in items.iter().enumerate() {
        let loop_obj = LoopObject {
            index0,
            len,
            depth0: depth,
            previtem: if index0 > 0 { items.get(index0 - 1).cloned() } else { None },
            nextitem: items.get(index0 + 1).cloned(),
            changed: Mutex::new(changed_prev.lock().unwrap().clone()),
        };
        bind_for_target(&for_loop.target, item.clone(), state);
        state.ctx.set("loop", Value::from_object(loop_obj));

        let frame = RecursionFrame { node: for_loop, depth };
        let rframe = if for_loop.recursive { Some(&frame) } else { None };
        flow = exec_stmts(&for_loop.body, state, rframe, out)?;
        if let Some(Value::Object(obj)) = state.ctx.get("loop") {
            if let Some(changed) = obj.get_attr("__changed__") {
                if let Value::List(items) = changed {
                    *changed_prev.lock().unwrap() = Some((*items).clone());
                }
            }
        }
        if flow == Flow::Break {
            break;
        }
    }
    state.ctx.pop();

    Ok(if flow == Flow::Break { Flow::Normal } else { Flow::Normal })
}

fn bind_for_target(target: &ast::AssignTarget<'_>, item: Value, state: &mut State) {
    match target {
        ast::AssignTarget::Name(name) => state.ctx.set(*name, item),
        ast::AssignTarget::Tuple(names) => {
            let items: Vec<Value> = item.try_iter().ok().map(|it| it.collect()).unwrap_or_default();
            for (i, name) in names.iter().enumerate() {
                state.ctx.set(*name, items.get(i).cloned().unwrap_or(Value::Nil));
            }
        }
    }
}

/// Render-time state for the `loop` context variable.
#[derive(Debug)]
struct LoopObject {
    index0: usize,
    len: usize,
    depth0: usize,
    previtem: Option<Value>,
    nextitem: Option<Value>,
    changed: Mutex<Option<Vec<Value>>>,
}

impl Object for LoopObject {
    fn type_name(&self) -> &'static str {
        "loop"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "index" => Some(Value::from(self.index0 + 1)),
            "index0" => Some(Value::from(self.index0)),
            "revindex" => Some(Value::from(self.len - self.index0)),
            "revindex0" => Some(Value::from(self.len - self.index0 - 1)),
            "first" => Some(Value::from(self.index0 == 0)),
            "last" => Some(Value::from(self.index0 + 1 == self.len)),
            "length" => Some(Value::from(self.len)),
            "depth" => Some(Value::from(self.depth0 + 1)),
            "depth0" => Some(Value::from(self.depth0)),
            "previtem" => self.previtem.clone().or(Some(Value::Nil)),
            "nextitem" => self.nextitem.clone().or(Some(Value::Nil)),
            "__changed__" => self
                .changed
                .lock()
                .unwrap()
                .clone()
                .map(Value::from_vec),
            _ => None,
        }
    }

    fn call_method(self: &Arc<Self>, name: &str, args: &[Value]) -> Result<Value, Error> {
        match name {
            "cycle" => {
                if args.is_empty() {
                    return Err(Error::new(ErrorKind::RuntimeError, "loop.cycle requires arguments"));
                }
                Ok(args[self.index0 % args.len()].clone())
            }
            "changed" => {
                let mut changed = self.changed.lock().unwrap();
                let is_changed = changed.as_deref() != Some(args);
                *changed = Some(args.to_vec());
                Ok(Value::from(is_changed))
            }
            other => Err(Error::new(
                ErrorKind::RuntimeError,
                format!("loop has no method named {other}"),
            )),
        }
    }
}

fn exec_block(name: &str, state: &mut State, out: &mut Output) -> Result<Flow, Error> {
    let chain = state.blocks.get(name).cloned().unwrap_or_default();
    if chain.templates.is_empty() {
        return Ok(Flow::Normal);
    }
    render_block_chain(name, &chain, 0, state, out)
}

fn render_block_chain(
    name: &str,
    chain: &inherit::BlockChain,
    index: usize,
    state: &mut State,
    out: &mut Output,
) -> Result<Flow, Error> {
    let tmpl = chain.templates.get(index).ok_or_else(|| {
        Error::new(ErrorKind::InheritanceError, format!("no more parent blocks named {name:?} for super()"))
    })?;
    let block = inherit::find_block(&tmpl.ast().children, name).ok_or_else(|| {
        Error::new(ErrorKind::InheritanceError, format!("block {name:?} vanished from {:?}", tmpl.name()))
    })?;

    let prev_block = state.current_block.take();
    state.current_block = Some(Arc::from(name));
    let prev_super = state.super_frame.take();
    state.super_frame = Some(SuperFrame {
        name: name.to_string(),
        chain: chain.clone(),
        index,
    });
    let prev_template = state.current_template.replace(tmpl.clone());

    let result = exec_stmts(&block.body, state, None, out);

    state.current_template = prev_template;
    state.super_frame = prev_super;
    state.current_block = prev_block;
    result
}

/// Evaluates `{{ super() }}`: renders the next-outermost definition of the
/// block currently executing.
fn eval_super(state: &mut State) -> Result<Value, Error> {
    let frame = state.super_frame.clone().ok_or_else(|| {
        Error::new(ErrorKind::InheritanceError, "super() called outside of a block override")
    })?;
    let captured = capture(state, |state, out| {
        render_block_chain(&frame.name, &frame.chain, frame.index + 1, state, out)
    })?;
    Ok(Value::from_safe_string(captured))
}

fn current_template(state: &State) -> Arc<Template> {
    state
        .current_template
        .clone()
        .unwrap_or_else(|| panic!("macro declared outside of any template context"))
}

fn template_name_of<'t>(
    expr: &ast::Expr<'t>,
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
) -> Result<String, Error> {
    let value = eval_expr(expr, state, rframe)?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::new(ErrorKind::TypeError, "template name must be a string"))
}

fn exec_include<'t>(
    include: &'t ast::Include<'t>,
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
    out: &mut Output,
) -> Result<Flow, Error> {
    let name = template_name_of(&include.name, state, rframe)?;
    let tmpl = match state.env.get_template(&name) {
        Ok(tmpl) => tmpl,
        Err(err) if include.ignore_missing && err.kind() == ErrorKind::TemplateError => {
            return Ok(Flow::Normal)
        }
        Err(err) => return Err(err.push_frame("include", name)),
    };

    let prev_template = state.current_template.replace(tmpl.clone());
    let result = if include.with_context {
        exec_stmts(&tmpl.ast().children, state, None, out).map_err(|e| e.push_frame("include", name))
    } else {
        state.ctx.push();
        let result = exec_stmts(&tmpl.ast().children, state, None, out);
        state.ctx.pop();
        result.map_err(|e| e.push_frame("include", name))
    };
    state.current_template = prev_template;
    result
}

fn import_namespace(name: &str, state: &mut State) -> Result<Value, Error> {
    let tmpl = state.env.get_template(name)?;
    let ns = Namespace::default();
    for stmt in &tmpl.ast().children {
        if let ast::Stmt::Macro(m) = stmt {
            let value = Value::from_object(Macro {
                template: tmpl.clone(),
                name: Arc::from(m.name),
                closure: Closure::capture(&state.ctx),
            });
            ns.set_attr(m.name, value);
        }
    }
    Ok(Value::from_object(ns))
}

/// Call-expression state threaded so `{% call %}...{% endcall %}` can make
/// its body available to the macro it invokes as `caller()`.
struct SuperFrame {
    name: String,
    chain: inherit::BlockChain,
    index: usize,
}
impl Clone for SuperFrame {
    fn clone(&self) -> Self {
        SuperFrame {
            name: self.name.clone(),
            chain: self.chain.clone(),
            index: self.index,
        }
    }
}

pub(crate) fn eval_expr<'t>(
    expr: &ast::Expr<'t>,
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
) -> Result<Value, Error> {
    match expr {
        ast::Expr::Var(var) => Ok(resolve_name(var.id, state)),
        ast::Expr::Const(c) => Ok(c.value.clone()),
        ast::Expr::Slice(slice) => eval_slice(slice, state, rframe),
        ast::Expr::UnaryOp(op) => {
            let value = eval_expr(&op.expr, state, rframe)?;
            match op.op {
                ast::UnaryOpKind::Not => Ok(Value::from(!value.is_true())),
                ast::UnaryOpKind::Neg => ops::neg(&value),
                ast::UnaryOpKind::Pos => Ok(value),
            }
        }
        ast::Expr::BinOp(bin) => eval_binop(bin, state, rframe),
        ast::Expr::IfExpr(if_expr) => {
            let cond = eval_expr(&if_expr.test_expr, state, rframe)?;
            if cond.is_true() {
                eval_expr(&if_expr.true_expr, state, rframe)
            } else if let Some(false_expr) = &if_expr.false_expr {
                eval_expr(false_expr, state, rframe)
            } else {
                Ok(Value::default())
            }
        }
        ast::Expr::Filter(filter) => {
            let value = eval_expr(&filter.expr, state, rframe)?;
            let args = eval_args(&filter.args, &filter.kwargs, state, rframe)?;
            state.apply_filter(filter.name, value, &args)
        }
        ast::Expr::Test(test) => {
            let value = eval_expr(&test.expr, state, rframe)?;
            let args = eval_args(&test.args, &[], state, rframe)?;
            let result = state.perform_test(test.name, &value, &args)?;
            Ok(Value::from(if test.negated { !result } else { result }))
        }
        ast::Expr::GetAttr(attr) => {
            if let ast::Expr::Var(var) = &attr.expr {
                if var.id == "loop" && attr.name == "__rframe_marker__" {
                    // unreachable marker kept out of real templates
                }
            }
            let base = eval_expr(&attr.expr, state, rframe)?;
            Ok(match base {
                Value::Undefined(name, _) => {
                    Value::undefined(format!("{name}.{}", attr.name), crate::value::UndefinedKind::ChainedAttr)
                }
                other => other.get_attr(attr.name),
            })
        }
        ast::Expr::GetItem(get_item) => {
            let base = eval_expr(&get_item.expr, state, rframe)?;
            let key = eval_expr(&get_item.subscript, state, rframe)?;
            base.get_item(&key)
        }
        ast::Expr::Call(call) => eval_call(call, state, rframe),
        ast::Expr::List(list) => {
            let items = list
                .items
                .iter()
                .map(|e| eval_expr(e, state, rframe))
                .collect::<Result<_, _>>()?;
            Ok(Value::from_vec(items))
        }
        ast::Expr::Tuple(tuple) => {
            let items = tuple
                .items
                .iter()
                .map(|e| eval_expr(e, state, rframe))
                .collect::<Result<_, _>>()?;
            Ok(Value::from_tuple(items))
        }
        ast::Expr::Map(map) => {
            let mut out = ValueMap::new();
            for (k, v) in map.keys.iter().zip(map.values.iter()) {
                let key = eval_expr(k, state, rframe)?;
                let value = eval_expr(v, state, rframe)?;
                let key = key
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::new(ErrorKind::TypeError, "map keys must be strings"))?;
                out.insert(key, value);
            }
            Ok(Value::from_map(out))
        }
        ast::Expr::SetLit(set_lit) => {
            let mut items = Vec::new();
            for e in &set_lit.items {
                let v = eval_expr(e, state, rframe)?;
                if !items.contains(&v) {
                    items.push(v);
                }
            }
            Ok(Value::from_vec(items))
        }
        ast::Expr::Comprehension(comp) => eval_comprehension(comp, state, rframe),
        ast::Expr::Super(_) => eval_super(state),
    }
}

fn resolve_name(name: &str, state: &State) -> Value {
    state
        .lookup(name)
        .unwrap_or_else(|| Value::undefined(name.to_string(), crate::value::UndefinedKind::Missing))
}

fn eval_slice<'t>(slice: &ast::Slice<'t>, state: &mut State, rframe: Option<&RecursionFrame<'t>>) -> Result<Value, Error> {
    let base = eval_expr(&slice.expr, state, rframe)?;
    let items: Vec<Value> = match &base {
        Value::List(v) | Value::Tuple(v) => (**v).clone(),
        Value::String(s) | Value::Safe(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
        other => {
            return Err(Error::new(
                ErrorKind::TypeError,
                format!("{} is not sliceable", other.type_name()),
            ))
        }
    };
    let len = items.len() as i64;
    let step = match &slice.step {
        Some(e) => eval_expr(e, state, rframe)?.as_i64().unwrap_or(1),
        None => 1,
    };
    if step == 0 {
        return Err(Error::new(ErrorKind::RuntimeError, "slice step cannot be zero"));
    }
    let normalize = |raw: i64| -> i64 { if raw < 0 { (raw + len).max(0) } else { raw.min(len) } };
    let (mut start, stop) = if step > 0 {
        let start = match &slice.start {
            Some(e) => normalize(eval_expr(e, state, rframe)?.as_i64().unwrap_or(0)),
            None => 0,
        };
        let stop = match &slice.stop {
            Some(e) => normalize(eval_expr(e, state, rframe)?.as_i64().unwrap_or(len)),
            None => len,
        };
        (start, stop)
    } else {
        let start = match &slice.start {
            Some(e) => normalize(eval_expr(e, state, rframe)?.as_i64().unwrap_or(len - 1)),
            None => len - 1,
        };
        let stop = match &slice.stop {
            Some(e) => normalize(eval_expr(e, state, rframe)?.as_i64().unwrap_or(-1)),
            None => -1,
        };
        (start, stop)
    };
    let mut out = Vec::new();
    if step > 0 {
        while start < stop {
            out.push(items[start as usize].clone());
            start += step;
        }
    } else {
        while start > stop {
            if start < len {
                out.push(items[start as usize].clone());
            }
            start += step;
        }
    }
    Ok(match base {
        Value::Tuple(_) => Value::from_tuple(out),
        _ => Value::from_vec(out),
    })
}

fn eval_binop<'t>(bin: &ast::BinOp<'t>, state: &mut State, rframe: Option<&RecursionFrame<'t>>) -> Result<Value, Error> {
    use ast::BinOpKind::*;
    if bin.op == ScAnd {
        let left = eval_expr(&bin.left, state, rframe)?;
        return if left.is_true() { eval_expr(&bin.right, state, rframe) } else { Ok(left) };
    }
    if bin.op == ScOr {
        let left = eval_expr(&bin.left, state, rframe)?;
        return if left.is_true() { Ok(left) } else { eval_expr(&bin.right, state, rframe) };
    }
    let left = eval_expr(&bin.left, state, rframe)?;
    let right = eval_expr(&bin.right, state, rframe)?;
    match bin.op {
        Eq => Ok(Value::from(left == right)),
        Ne => Ok(Value::from(left != right)),
        Lt => cmp(&left, &right, std::cmp::Ordering::Less, false),
        Lte => cmp_le_ge(&left, &right, true),
        Gt => cmp(&left, &right, std::cmp::Ordering::Greater, false),
        Gte => cmp_le_ge(&left, &right, false),
        Add => ops::add(&left, &right),
        Sub => ops::sub(&left, &right),
        Mul => ops::mul(&left, &right),
        Div => ops::div(&left, &right),
        FloorDiv => ops::int_div(&left, &right),
        Rem => ops::rem(&left, &right),
        Pow => ops::pow(&left, &right),
        Concat => Ok(ops::string_concat(&left, &right)),
        In => Ok(Value::from(ops::contains(&right, &left)?)),
        NotIn => Ok(Value::from(!ops::contains(&right, &left)?)),
        ScAnd | ScOr => unreachable!("handled above"),
    }
}

fn cmp(left: &Value, right: &Value, want: std::cmp::Ordering, _unused: bool) -> Result<Value, Error> {
    let ord = left.partial_cmp(right).ok_or_else(|| {
        Error::new(
            ErrorKind::TypeError,
            format!("cannot compare {} and {}", left.type_name(), right.type_name()),
        )
    })?;
    Ok(Value::from(ord == want))
}

fn cmp_le_ge(left: &Value, right: &Value, le: bool) -> Result<Value, Error> {
    let ord = left.partial_cmp(right).ok_or_else(|| {
        Error::new(
            ErrorKind::TypeError,
            format!("cannot compare {} and {}", left.type_name(), right.type_name()),
        )
    })?;
    Ok(Value::from(if le {
        ord != std::cmp::Ordering::Greater
    } else {
        ord != std::cmp::Ordering::Less
    }))
}

fn eval_args<'t>(
    args: &[ast::Expr<'t>],
    kwargs: &[(&'t str, ast::Expr<'t>)],
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
) -> Result<Vec<Value>, Error> {
    let mut out = Vec::with_capacity(args.len() + kwargs.len());
    for a in args {
        out.push(eval_expr(a, state, rframe)?);
    }
    if !kwargs.is_empty() {
        let mut map = ValueMap::new();
        for (k, v) in kwargs {
            map.insert(k.to_string(), eval_expr(v, state, rframe)?);
        }
        out.push(crate::value::Kwargs::wrap(map));
    }
    Ok(out)
}

fn apply_filter_call<'t>(
    filter: &ast::FilterCall<'t>,
    value: Value,
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
) -> Result<Value, Error> {
    let args = eval_args(&filter.args, &filter.kwargs, state, rframe)?;
    state.apply_filter(filter.name, value, &args)
}

fn eval_comprehension<'t>(comp: &ast::Comprehension<'t>, state: &mut State, rframe: Option<&RecursionFrame<'t>>) -> Result<Value, Error> {
    let iterable = eval_expr(&comp.iter, state, rframe)?;
    let items: Vec<Value> = iterable.try_iter()?.collect();
    state.ctx.push();
    let mut list_out = Vec::new();
    let mut map_out = ValueMap::new();
    let mut set_seen = Vec::new();
    for item in items {
        bind_for_target(&comp.target, item, state);
        if let Some(filter) = &comp.filter {
            if !eval_expr(filter, state, rframe)?.is_true() {
                continue;
            }
        }
        match comp.kind {
            ast::ComprehensionKind::List => list_out.push(eval_expr(&comp.element, state, rframe)?),
            ast::ComprehensionKind::Set => {
                let v = eval_expr(&comp.element, state, rframe)?;
                if !set_seen.contains(&v) {
                    set_seen.push(v);
                }
            }
            ast::ComprehensionKind::Dict => {
                let key = comp
                    .key
                    .as_ref()
                    .ok_or_else(|| Error::new(ErrorKind::RuntimeError, "dict comprehension missing key expression"))?;
                let key = eval_expr(key, state, rframe)?;
                let key = key
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::new(ErrorKind::TypeError, "dict comprehension keys must be strings"))?;
                let value = eval_expr(&comp.element, state, rframe)?;
                map_out.insert(key, value);
            }
        }
    }
    state.ctx.pop();
    Ok(match comp.kind {
        ast::ComprehensionKind::List => Value::from_vec(list_out),
        ast::ComprehensionKind::Set => Value::from_vec(set_seen),
        ast::ComprehensionKind::Dict => Value::from_map(map_out),
    })
}

fn eval_call<'t>(call: &ast::Call<'t>, state: &mut State, rframe: Option<&RecursionFrame<'t>>) -> Result<Value, Error> {
    match call.identify_call() {
        ast::CallType::Function(name) => {
            if name == "loop" {
                if let Some(frame) = rframe {
                    if call.args.len() != 1 {
                        return Err(Error::new(ErrorKind::RuntimeError, "loop() takes exactly one argument"));
                    }
                    return eval_recursive_reentry(frame, &call.args[0], state, rframe);
                }
            }
            if name == "caller" {
                let args = eval_args(&call.args, &call.kwargs, state, rframe)?;
                return eval_caller(state, &args);
            }
            let callee = resolve_name(name, state);
            let args = eval_args(&call.args, &call.kwargs, state, rframe)?;
            invoke(&callee, args, state)
        }
        ast::CallType::Block(name) => {
            let captured = capture(state, |state, out| exec_block(name, state, out))?;
            Ok(Value::from_safe_string(captured))
        }
        ast::CallType::Method(obj_expr, name) => {
            let obj = eval_expr(obj_expr, state, rframe)?;
            let args = eval_args(&call.args, &call.kwargs, state, rframe)?;
            match obj {
                Value::Object(obj) => obj.call_method(name, &args),
                other => Err(Error::new(
                    ErrorKind::RuntimeError,
                    format!("{} has no method named {name}", other.type_name()),
                )),
            }
        }
        ast::CallType::Object(expr) => {
            let callee = eval_expr(expr, state, rframe)?;
            let args = eval_args(&call.args, &call.kwargs, state, rframe)?;
            invoke(&callee, args, state)
        }
    }
}

fn eval_recursive_reentry<'t>(
    frame: &RecursionFrame<'t>,
    sub_expr: &ast::Expr<'t>,
    state: &mut State,
    _rframe: Option<&RecursionFrame<'t>>,
) -> Result<Value, Error> {
    if frame.depth + 1 > state.env.recursion_limit() {
        return Err(crate::environment::recursion_error());
    }
    let captured = capture(state, |state, out| {
        run_for(frame.node, sub_expr, state, out, frame.depth + 1)
    })?;
    Ok(Value::from_safe_string(captured))
}

fn invoke(callee: &Value, args: Vec<Value>, state: &mut State) -> Result<Value, Error> {
    match callee {
        Value::Object(obj) => {
            if let Some(m) = obj.as_macro() {
                return call_macro(m, &args, None, state);
            }
            if !obj.is_callable() {
                return Err(Error::new(
                    ErrorKind::RuntimeError,
                    format!("{} is not callable", obj.type_name()),
                ));
            }
            obj.call(&args)
        }
        Value::Undefined(name, _) => Err(Error::new(ErrorKind::UndefinedError, format!("{name} is undefined"))),
        other => Err(Error::new(
            ErrorKind::RuntimeError,
            format!("{} is not callable", other.type_name()),
        )),
    }
}

fn call_with_caller<'t>(
    call_block: &'t ast::Spanned<ast::CallBlock<'t>>,
    state: &mut State,
    rframe: Option<&RecursionFrame<'t>>,
) -> Result<Value, Error> {
    let call = &call_block.call;
    let callee = match call.identify_call() {
        ast::CallType::Function(name) => resolve_name(name, state),
        ast::CallType::Object(expr) => eval_expr(expr, state, rframe)?,
        _ => return Err(Error::new(ErrorKind::RuntimeError, "{% call %} target must be a macro")),
    };
    let args = eval_args(&call.args, &call.kwargs, state, rframe)?;
    let m = match &callee {
        Value::Object(obj) => obj.as_macro().cloned(),
        _ => None,
    }
    .ok_or_else(|| Error::new(ErrorKind::MacroError, "{% call %} target is not a macro"))?;

    let frame = crate::state::CallerFrame {
        template: current_template(state),
        span: call_block.span(),
        closure: Closure::capture(&state.ctx),
    };
    call_macro(&m, &args, Some(frame), state)
}

/// Invokes a macro body with a fresh scope seeded from its closure and
/// these arguments, matching positional args to parameters left-to-right
/// and falling back to each parameter's default expression (evaluated in
/// the macro's own defining scope).
fn call_macro(
    m: &Macro,
    args: &[Value],
    caller: Option<crate::state::CallerFrame>,
    state: &mut State,
) -> Result<Value, Error> {
    let tmpl = m.template.clone();
    let macro_decl = inherit::find_macro(&tmpl.ast().children, &m.name)
        .ok_or_else(|| Error::new(ErrorKind::MacroError, format!("macro {:?} not found", m.name)))?;

    let (positional, kwargs) = match args.last().and_then(|v| match v {
        Value::Object(obj) => obj.as_kwargs().cloned(),
        _ => None,
    }) {
        Some(map) => (&args[..args.len() - 1], Some(map)),
        None => (args, None),
    };

    if positional.len() > macro_decl.args.len() {
        return Err(Error::new(ErrorKind::MacroError, format!("macro {:?} takes at most {} arguments", m.name, macro_decl.args.len())));
    }

    let saved_ctx = std::mem::replace(&mut state.ctx, Context::new(Arc::new(HashMap::new())));
    let mut fresh = Context::new(Arc::new(HashMap::new()));
    // Seed with the macro's closure so free variables resolve lexically.
    for (k, v) in m.closure.iter() {
        fresh.set(k.clone(), v.clone());
    }
    for (i, param) in macro_decl.args.iter().enumerate() {
        let value = if let Some(v) = positional.get(i) {
            v.clone()
        } else if let Some(map) = &kwargs {
            map.get(*param).cloned().unwrap_or(Value::Nil)
        } else {
            Value::Nil
        };
        let value = if value.is_none() {
            match macro_decl.defaults.get(i) {
                Some(Some(_default_expr)) => {
                    // Defaults are evaluated against the fresh scope built so far.
                    state.ctx = fresh;
                    let v = eval_expr(macro_decl.defaults[i].as_ref().unwrap(), state, None)?;
                    fresh = std::mem::replace(&mut state.ctx, Context::new(Arc::new(HashMap::new())));
                    v
                }
                _ => {
                    if positional.get(i).is_none() && kwargs.as_ref().and_then(|m| m.get(*param)).is_none() {
                        state.ctx = saved_ctx;
                        return Err(Error::new(
                            ErrorKind::MacroError,
                            format!("macro {:?} missing required argument {param:?}", m.name),
                        ));
                    }
                    value
                }
            }
        } else {
            value
        };
        fresh.set(*param, value);
    }

    state.ctx = fresh;
    // `caller()` sees only the stack's top entry, so a macro invoked without
    // a `{% call %}` block (even from inside one that has one) correctly
    // reports no caller rather than inheriting an enclosing one.
    state.caller_frames.lock().unwrap().push(caller);
    let result = capture(state, |state, out| exec_stmts(&macro_decl.body, state, None, out));
    state.caller_frames.lock().unwrap().pop();
    state.ctx = saved_ctx;
    result.map(Value::from_safe_string)
}

/// Runs the body of the `{% call %}` block the currently-executing macro was
/// invoked from, seeded with its own call-site closure and `{% call(x) %}`
/// parameters bound to `args`. Mirrors [`call_macro`]'s "look the body up
/// again by a stable key" approach: the block is re-found by span rather
/// than carried as a borrowed AST reference, since [`State`] only carries
/// the environment's lifetime.
fn eval_caller(state: &mut State, args: &[Value]) -> Result<Value, Error> {
    let frame = match state.caller_frames.lock().unwrap().last() {
        Some(Some(frame)) => frame.clone(),
        _ => return Err(Error::new(ErrorKind::MacroError, "caller() called outside of a {% call %} block")),
    };
    let call_block = find_call_block_by_span(&frame.template.ast().children, frame.span)
        .ok_or_else(|| Error::new(ErrorKind::MacroError, "call block vanished from its template"))?;

    let saved_ctx = std::mem::replace(&mut state.ctx, Context::new(Arc::new(HashMap::new())));
    let mut fresh = Context::new(Arc::new(HashMap::new()));
    for (k, v) in frame.closure.iter() {
        fresh.set(k.clone(), v.clone());
    }
    for (i, param) in call_block.params.iter().enumerate() {
        fresh.set(*param, args.get(i).cloned().unwrap_or(Value::Nil));
    }
    state.ctx = fresh;
    state.caller_frames.lock().unwrap().push(None);
    let result = capture(state, |state, out| exec_stmts(&call_block.body, state, None, out));
    state.caller_frames.lock().unwrap().pop();
    state.ctx = saved_ctx;
    result.map(Value::from_safe_string)
}

fn find_call_block_by_span<'t>(stmts: &'t [ast::Stmt<'t>], span: crate::tokens::Span) -> Option<&'t ast::CallBlock<'t>> {
    for stmt in stmts {
        if let Some(found) = find_call_block_in_stmt(stmt, span) {
            return Some(found);
        }
    }
    None
}

fn find_call_block_in_stmt<'t>(stmt: &'t ast::Stmt<'t>, span: crate::tokens::Span) -> Option<&'t ast::CallBlock<'t>> {
    match stmt {
        ast::Stmt::CallBlock(c) => {
            if c.span() == span {
                return Some(&**c);
            }
            find_call_block_by_span(&c.body, span)
        }
        ast::Stmt::Block(b) => find_call_block_by_span(&b.body, span),
        ast::Stmt::IfCond(c) => {
            for (_, body) in &c.branches {
                if let Some(found) = find_call_block_by_span(body, span) {
                    return Some(found);
                }
            }
            find_call_block_by_span(&c.else_body, span)
        }
        ast::Stmt::ForLoop(f) => find_call_block_by_span(&f.body, span).or_else(|| find_call_block_by_span(&f.else_body, span)),
        ast::Stmt::WithBlock(w) => find_call_block_by_span(&w.body, span),
        ast::Stmt::AutoEscape(a) => find_call_block_by_span(&a.body, span),
        ast::Stmt::FilterBlock(f) => find_call_block_by_span(&f.body, span),
        ast::Stmt::Macro(m) => find_call_block_by_span(&m.body, span),
        _ => None,
    }
}
