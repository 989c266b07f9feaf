//! The engine's configuration object: registries, templates, and rendering
//! entry points.
//!
//! Unlike the teacher crate's `Environment<'source>`, which borrows template
//! source for its whole lifetime and is therefore owned exclusively by one
//! thread while being built, this `Environment` has no lifetime parameter —
//! [`Template`](crate::template::Template) owns its own source — and every
//! registry is behind a [`RwLock`] so one `Environment` can be shared with
//! [`Arc`] across threads that render concurrently while occasionally adding
//! a filter or template.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::inherit;
use crate::lexer::LexerConfig;
use crate::output::Output;
use crate::state::State;
use crate::template::Template;
use crate::utils::{AutoEscape, UndefinedBehavior};
use crate::value::Value;
use crate::{eval, filters, functions, tests};

const MAX_RECURSION: usize = 500;

pub(crate) type FilterFunc = dyn Fn(&State, Value, &[Value]) -> Result<Value, Error> + Send + Sync;
pub(crate) type TestFunc = dyn Fn(&State, &Value, &[Value]) -> Result<Value, Error> + Send + Sync;
pub(crate) type GlobalFunc = dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync;
type AutoEscapeFunc = dyn Fn(&str) -> AutoEscape + Send + Sync;
type LoaderFunc = dyn Fn(&str) -> Result<Option<String>, Error> + Send + Sync;

/// The default auto-escape policy: HTML for `.html`/`.htm`/`.xml`, JSON for
/// `.json`/`.js`/`.yml`/`.yaml` when the `json` feature is enabled, nothing
/// otherwise.
pub fn default_auto_escape_callback(name: &str) -> AutoEscape {
    match name.rsplit('.').next() {
        Some("html" | "htm" | "xml") => AutoEscape::Html,
        #[cfg(feature = "json")]
        Some("json" | "js" | "yaml" | "yml") => AutoEscape::Json,
        _ => AutoEscape::None,
    }
}

fn no_auto_escape(_: &str) -> AutoEscape {
    AutoEscape::None
}

struct Settings {
    lexer_cfg: LexerConfig,
    undefined_behavior: UndefinedBehavior,
    recursion_limit: usize,
    auto_escape_callback: Arc<AutoEscapeFunc>,
}

/// Holds templates, registries, and rendering configuration.
///
/// Two constructors are available: [`Environment::new`] preloads the
/// representative filter/test/function set described in the engine's
/// documentation, [`Environment::empty`] starts with nothing registered.
pub struct Environment {
    settings: RwLock<Settings>,
    templates: RwLock<HashMap<String, Arc<Template>>>,
    /// Inheritance resolver memo: the ordered chain of template names that
    /// `{% extends %}` actually walked -> resolved base + block chains.
    /// Keyed by the resolved chain rather than just the starting template's
    /// name since a dynamic `{% extends %}` target can send two renders of
    /// the same template down different chains. Read-through with
    /// double-checked locking so two concurrent misses for the same key
    /// resolve the chain at most twice.
    resolved: RwLock<HashMap<Vec<String>, Arc<inherit::Resolved>>>,
    loader: RwLock<Option<Arc<LoaderFunc>>>,
    filters: RwLock<HashMap<String, Arc<FilterFunc>>>,
    tests: RwLock<HashMap<String, Arc<TestFunc>>>,
    globals: RwLock<HashMap<String, Value>>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("templates", &self.templates.read().unwrap().keys().collect::<Vec<_>>())
            .field("filters", &self.filters.read().unwrap().keys().collect::<Vec<_>>())
            .field("tests", &self.tests.read().unwrap().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl Environment {
    /// Creates an environment with the built-in filters, tests, and global
    /// functions registered.
    pub fn new() -> Environment {
        let mut env = Environment::empty();
        filters::register_builtins(&mut env);
        tests::register_builtins(&mut env);
        functions::register_builtins(&mut env);
        env.set_auto_escape_callback(default_auto_escape_callback);
        env
    }

    /// Creates a completely blank environment: no filters, tests, globals, or
    /// auto-escape policy.
    pub fn empty() -> Environment {
        Environment {
            settings: RwLock::new(Settings {
                lexer_cfg: LexerConfig::default(),
                undefined_behavior: UndefinedBehavior::default(),
                recursion_limit: MAX_RECURSION,
                auto_escape_callback: Arc::new(no_auto_escape),
            }),
            templates: RwLock::new(HashMap::new()),
            resolved: RwLock::new(HashMap::new()),
            loader: RwLock::new(None),
            filters: RwLock::new(HashMap::new()),
            tests: RwLock::new(HashMap::new()),
            globals: RwLock::new(HashMap::new()),
        }
    }

    fn auto_escape_for(&self, name: &str) -> AutoEscape {
        (self.settings.read().unwrap().auto_escape_callback)(name)
    }

    /// Loads a template from a string into the environment under `name`.
    pub fn add_template(&self, name: impl Into<String>, source: impl Into<String>) -> Result<(), Error> {
        let name = name.into();
        let cfg = self.settings.read().unwrap().lexer_cfg.clone();
        let tmpl = Template::new(name.clone(), source, &cfg)?;
        self.templates.write().unwrap().insert(name.clone(), Arc::new(tmpl));
        self.resolved.write().unwrap().remove(&name);
        Ok(())
    }

    /// Removes a template by name, along with any cached inheritance
    /// resolution for it.
    pub fn remove_template(&self, name: &str) {
        self.templates.write().unwrap().remove(name);
        self.resolved.write().unwrap().remove(name);
    }

    /// Removes every loaded template and invalidates the inheritance cache.
    pub fn clear_templates(&self) {
        self.templates.write().unwrap().clear();
        self.resolved.write().unwrap().clear();
    }

    /// Registers a dynamic loader, invoked for names not already loaded via
    /// [`add_template`](Self::add_template). The loader is only invoked once
    /// per name; its result is cached like any other template.
    ///
    /// See [`path_loader`](crate::loader::path_loader) for loading templates
    /// from a directory on disk.
    #[cfg(feature = "loader")]
    pub fn set_loader<F>(&self, f: F)
    where
        F: Fn(&str) -> Result<Option<String>, Error> + Send + Sync + 'static,
    {
        *self.loader.write().unwrap() = Some(Arc::new(f));
    }

    /// Fetches a template by name, consulting the loader if it isn't already
    /// loaded. Returns a `TemplateError` ("template not found") if neither
    /// source produces one.
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>, Error> {
        if let Some(tmpl) = self.templates.read().unwrap().get(name) {
            return Ok(tmpl.clone());
        }

        let loader = self.loader.read().unwrap().clone();
        let source = match loader {
            Some(loader) => loader(name)?,
            None => None,
        };
        let source = source.ok_or_else(|| Error::new_not_found(name))?;

        let cfg = self.settings.read().unwrap().lexer_cfg.clone();
        let tmpl = Arc::new(Template::new(name, source, &cfg)?);
        self.templates
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| tmpl.clone());
        Ok(self.templates.read().unwrap().get(name).unwrap().clone())
    }

    /// Parses a one-off template from a string, named `<string>`.
    pub fn template_from_str(&self, source: &str) -> Result<Template, Error> {
        self.template_from_named_str("<string>", source)
    }

    /// Parses a one-off template from a string with an explicit name.
    pub fn template_from_named_str(&self, name: &str, source: &str) -> Result<Template, Error> {
        let cfg = self.settings.read().unwrap().lexer_cfg.clone();
        Template::new(name, source.to_string(), &cfg)
    }

    /// Renders a loaded template by name.
    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, Error> {
        let tmpl = self.get_template(name)?;
        self.render_template(&tmpl, Value::from_serializable(&ctx))
    }

    /// Parses and renders a template from a string in one go, named
    /// `<string>`.
    pub fn render_str<S: Serialize>(&self, source: &str, ctx: S) -> Result<String, Error> {
        self.render_named_str("<string>", source, ctx)
    }

    /// Parses and renders a template from a string in one go, with an
    /// explicit name (used in error messages and for `{% extends %}`
    /// resolution if the string references other loaded templates).
    pub fn render_named_str<S: Serialize>(
        &self,
        name: &str,
        source: &str,
        ctx: S,
    ) -> Result<String, Error> {
        let tmpl = Arc::new(self.template_from_named_str(name, source)?);
        self.render_template(&tmpl, Value::from_serializable(&ctx))
    }

    pub(crate) fn render_template(&self, tmpl: &Arc<Template>, root: Value) -> Result<String, Error> {
        let auto_escape = self.auto_escape_for(tmpl.name());

        let mut globals = HashMap::new();
        if let Value::Map(map) = &root {
            for (k, v) in map.iter() {
                globals.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in self.globals.read().unwrap().iter() {
            globals.entry(k.clone()).or_insert_with(|| v.clone());
        }
        let globals = Arc::new(globals);

        let resolved = self.resolve_blocks(tmpl, &globals)?;

        let ctx = Context::new(globals);
        let mut state = State::new(
            self,
            Arc::from(tmpl.name()),
            ctx,
            auto_escape,
            resolved.blocks.clone(),
            resolved.root.clone(),
        );

        let mut rv = String::new();
        let mut out = Output::with_string(&mut rv, auto_escape);
        eval::eval_template(tmpl, &resolved.root, &mut state, &mut out)?;
        Ok(rv)
    }

    /// Resolves (and caches) the `{% extends %}` chain for a template,
    /// returning the base template plus the per-block-name override chain
    /// the evaluator consults for `{% block %}`/`{{ super() }}`.
    ///
    /// `{% extends %}`'s target is evaluated against `globals` (see
    /// [`inherit::resolve_chain`]), so the chain is only cheaply known once
    /// that expression has run; the cache is therefore keyed by the
    /// resulting chain of template names rather than `tmpl`'s name alone.
    pub(crate) fn resolve_blocks(
        &self,
        tmpl: &Arc<Template>,
        globals: &Arc<HashMap<String, Value>>,
    ) -> Result<Arc<inherit::Resolved>, Error> {
        let chain = inherit::resolve_chain(self, tmpl, globals)?;
        let key: Vec<String> = chain.iter().map(|t| t.name().to_string()).collect();

        if let Some(cached) = self.resolved.read().unwrap().get(&key) {
            return Ok(cached.clone());
        }
        let resolved = Arc::new(inherit::build_resolved(chain)?);
        self.resolved
            .write()
            .unwrap()
            .entry(key)
            .or_insert_with(|| resolved.clone());
        Ok(resolved)
    }

    /// Preserve the trailing newline when rendering templates. Default
    /// `false`. Affects templates loaded after this call.
    pub fn set_keep_trailing_newline(&self, yes: bool) {
        self.settings.write().unwrap().lexer_cfg.keep_trailing_newline = yes;
    }

    pub fn keep_trailing_newline(&self) -> bool {
        self.settings.read().unwrap().lexer_cfg.keep_trailing_newline
    }

    /// Strips the first newline after a `{% block %}` tag (not a `{{ }}`
    /// variable tag). Default `false`.
    pub fn set_trim_blocks(&self, yes: bool) {
        self.settings.write().unwrap().lexer_cfg.trim_blocks = yes;
    }

    pub fn trim_blocks(&self) -> bool {
        self.settings.read().unwrap().lexer_cfg.trim_blocks
    }

    /// Strips leading whitespace up to a `{% block %}` tag on its own line.
    /// Default `false`.
    pub fn set_lstrip_blocks(&self, yes: bool) {
        self.settings.write().unwrap().lexer_cfg.lstrip_blocks = yes;
    }

    pub fn lstrip_blocks(&self) -> bool {
        self.settings.read().unwrap().lexer_cfg.lstrip_blocks
    }

    /// Reconfigures the block/variable/comment delimiters used to lex
    /// templates added after this call (see [`syntax::SyntaxConfig`](crate::syntax::SyntaxConfig)).
    pub fn set_syntax(&self, syntax: crate::syntax::SyntaxConfig) {
        syntax.apply(&mut self.settings.write().unwrap().lexer_cfg);
    }

    /// Sets the policy for how a missing name or attribute renders and
    /// behaves under truthiness checks. Default [`UndefinedBehavior::Silent`].
    pub fn set_undefined_behavior(&self, behavior: UndefinedBehavior) {
        self.settings.write().unwrap().undefined_behavior = behavior;
    }

    pub fn undefined_behavior(&self) -> UndefinedBehavior {
        self.settings.read().unwrap().undefined_behavior
    }

    /// Sets the callback used to pick a template's initial auto-escape mode
    /// from its name. Default [`default_auto_escape_callback`].
    pub fn set_auto_escape_callback<F>(&self, f: F)
    where
        F: Fn(&str) -> AutoEscape + Send + Sync + 'static,
    {
        self.settings.write().unwrap().auto_escape_callback = Arc::new(f);
    }

    /// Sets the maximum nesting depth for `{% include %}`, `{% extends %}`,
    /// and macro calls before a `RuntimeError` ("recursion limit exceeded")
    /// is raised. Default 500.
    pub fn set_recursion_limit(&self, level: usize) {
        self.settings.write().unwrap().recursion_limit = level;
    }

    pub fn recursion_limit(&self) -> usize {
        self.settings.read().unwrap().recursion_limit
    }

    /// Registers a filter under `name`, overwriting any existing filter with
    /// that name.
    pub fn add_filter<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&State, Value, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.filters.write().unwrap().insert(name.into(), Arc::new(f));
    }

    pub fn remove_filter(&self, name: &str) {
        self.filters.write().unwrap().remove(name);
    }

    pub(crate) fn get_filter(&self, name: &str) -> Option<Arc<FilterFunc>> {
        self.filters.read().unwrap().get(name).cloned()
    }

    /// Registers a test under `name`, overwriting any existing test with
    /// that name.
    pub fn add_test<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&State, &Value, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.tests.write().unwrap().insert(name.into(), Arc::new(f));
    }

    pub fn remove_test(&self, name: &str) {
        self.tests.write().unwrap().remove(name);
    }

    pub(crate) fn get_test(&self, name: &str) -> Option<Arc<TestFunc>> {
        self.tests.read().unwrap().get(name).cloned()
    }

    /// Registers a global function, callable from any template.
    pub fn add_function<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.globals
            .write()
            .unwrap()
            .insert(name.into(), Value::from_object(functions::Global::new(f)));
    }

    /// Registers a global variable, visible to every template unless shadowed
    /// by the render context or a local binding.
    pub fn add_global(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.write().unwrap().insert(name.into(), value.into());
    }

    pub fn remove_global(&self, name: &str) {
        self.globals.write().unwrap().remove(name);
    }

    pub(crate) fn globals_snapshot(&self) -> HashMap<String, Value> {
        self.globals.read().unwrap().clone()
    }
}

pub(crate) fn recursion_error() -> Error {
    Error::new(ErrorKind::RuntimeError, "recursion limit exceeded")
}
