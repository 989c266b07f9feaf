//! A parsed template: a name plus the AST the evaluator walks.
//!
//! The AST borrows from the template's own source text, so the two are
//! bundled together with [`self_cell`] rather than threading a source
//! lifetime through [`Environment`](crate::environment::Environment) the
//! way the bytecode VM this engine descends from does.

use std::fmt;
use std::sync::Arc;

use self_cell::self_cell;

use crate::ast;
use crate::error::Error;
use crate::lexer::LexerConfig;
use crate::parser;
use crate::whitespace;

self_cell! {
    struct Inner {
        owner: String,
        #[covariant]
        dependent: ast::Template,
    }
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.borrow_dependent(), f)
    }
}

/// A named template: its source text and the AST parsed from it.
///
/// Cheap to clone (an `Arc` around the source+AST pair), so an
/// [`Environment`](crate::environment::Environment) can cache one copy and
/// hand out clones to every caller and every `{% extends %}`/`{% include %}`
/// that references it.
#[derive(Clone)]
pub struct Template {
    name: Arc<str>,
    inner: Arc<Inner>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("ast", &self.inner)
            .finish()
    }
}

impl Template {
    /// Parses `source` into a template named `name`.
    ///
    /// `trim_blocks`/`lstrip_blocks` are applied as a source rewrite before
    /// lexing; `{%- -%}` markers are handled by the lexer itself regardless.
    pub fn new(
        name: impl Into<Arc<str>>,
        source: impl Into<String>,
        cfg: &LexerConfig,
    ) -> Result<Template, Error> {
        let name = name.into();
        let mut source = source.into();
        if !cfg.keep_trailing_newline {
            source = whitespace::strip_trailing_newline(&source).to_string();
        }
        let source = if cfg.trim_blocks || cfg.lstrip_blocks {
            whitespace::preprocess(&source, cfg)
        } else {
            source
        };

        let inner = Inner::try_new(source, |source| {
            parser::parse(source, cfg).map_err(|mut err| {
                err.set_template_name(&name);
                err
            })
        })?;

        Ok(Template {
            name,
            inner: Arc::new(inner),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw template source, after `trim_blocks`/`lstrip_blocks` rewrites.
    pub fn source(&self) -> &str {
        self.inner.borrow_owner()
    }

    pub fn ast(&self) -> &ast::Template<'_> {
        self.inner.borrow_dependent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_and_keeps_source() {
        let tmpl = Template::new("hello", "Hello {{ name }}!", &LexerConfig::default()).unwrap();
        assert_eq!(tmpl.name(), "hello");
        assert_eq!(tmpl.source(), "Hello {{ name }}!");
        assert_eq!(tmpl.ast().children.len(), 2);
    }

    #[test]
    fn test_syntax_error_carries_template_name() {
        let err = Template::new("broken", "{% if x %}", &LexerConfig::default()).unwrap_err();
        assert_eq!(err.name(), Some("broken"));
    }
}
