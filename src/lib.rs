//! <div align=center>
//!   <img src="https://github.com/mitsuhiko/minijinja/raw/main/artwork/logo.png" alt="" width=320>
//!   <p><strong>A Jinja2-compatible template engine for Rust</strong></p>
//! </div>
//!
//! This crate implements a template engine compatible with the syntax and
//! behavior of the [Jinja2](https://jinja.palletsprojects.com/) template
//! engine for Python.  It's built on top of [`serde`].  Templates are lexed,
//! parsed into an AST, and rendered by walking that AST directly rather than
//! compiling to an intermediate bytecode.
//!
//! ```jinja
//! {% for user in users %}
//!   <li>{{ user.name }}</li>
//! {% endfor %}
//! ```
//!
//! # Template Usage
//!
//! To use this crate, create an [`Environment`] and populate it with
//! templates.  Afterwards templates can be loaded and rendered.  To pass data
//! one can pass any serde serializable value.  The [`context!`] macro can be
//! used to quickly construct a template context:
//!
//! ```
//! use jinja_engine::{Environment, context};
//!
//! let mut env = Environment::new();
//! env.add_template("hello", "Hello {{ name }}!").unwrap();
//! let tmpl = env.get_template("hello").unwrap();
//! println!("{}", tmpl.render(context!(name => "John")).unwrap());
//! ```
//!
//! ```plain
//! Hello John!
//! ```
//!
//! # Custom Filters
//!
//! Functions can be registered as filters (see [`filters`]) with the engine.
//! These can then be invoked directly from the template:
//!
//! ```
//! use jinja_engine::{Environment, context};
//!
//! let mut env = Environment::new();
//! env.add_filter("repeat", str::repeat);
//! env.add_template("hello", "{{ 'Na '|repeat(3) }} {{ name }}!").unwrap();
//! let tmpl = env.get_template("hello").unwrap();
//! println!("{}", tmpl.render(context!(name => "Batman")).unwrap());
//! ```
//!
//! ```plain
//! Na Na Na Batman!
//! ```
//!
//! # Learn more
//!
//! - [`Environment`]: the main API entry point.  Teaches you how to configure the environment.
//! - [`Template`]: the template object API.  Shows you how templates can be rendered.
//! - [`syntax`]: provides documentation of the template engine syntax.
//! - [`filters`]: teaches you how to write custom filters and lists the built-in filters.
//! - [`tests`]: teaches you how to write custom test functions and lists the built-in tests.
//! - [`functions`]: teaches how to write custom functions and lists the built-in functions.
//!
//! # Error Handling
//!
//! This crate tries to give good errors out of the box.  If you use includes,
//! imports, or template inheritance, [`Error::display_debug`] renders a
//! chained, human oriented view of where the error originated.
//!
//! # Optional Features
//!
//! - `json`: enables the `tojson` filter and JSON auto-escaping.
//! - `urlencode`: enables the `urlencode` filter.
//! - `loader`: enables [`path_loader`] for loading templates from disk.
//!
//! All three are enabled by default. Serde (de)serialization of
//! [`value::Value`], `{% extends %}`/`{% include %}`/`{% import %}`/`{% from %}`,
//! and `Value` conversions for the standard collections are always available
//! and not gated behind a feature.
#![deny(missing_docs)]

#[macro_use]
mod macros;

mod ast;
mod context;
mod environment;
mod error;
mod eval;
mod inherit;
mod lexer;
mod output;
mod parser;
mod state;
mod template;
mod tokens;
mod utils;
mod whitespace;

pub mod filters;
pub mod functions;
pub mod syntax;
pub mod testutils;
pub mod tests;
pub mod value;

#[cfg(feature = "loader")]
mod loader;

pub use self::environment::{default_auto_escape_callback, Environment};
pub use self::error::{Error, ErrorKind};
pub use self::output::Output;
pub use self::template::Template;
pub use self::utils::{AutoEscape, HtmlEscape, UndefinedBehavior};

#[cfg(feature = "loader")]
pub use self::loader::{path_loader, safe_join};

pub use self::macros::__context;
pub use self::state::State;
