use std::borrow::Cow;
use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A single frame in an error's include/import/extends/macro call stack.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: &'static str,
    pub name: String,
}

/// Represents template errors.
///
/// Errors are returned, never thrown: every evaluator operation that can
/// fail returns a [`Result`].
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<Cow<'static, str>>,
    name: Option<String>,
    line: usize,
    column: usize,
    stack: Vec<Frame>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Error {}

/// An enum describing the error kind, matching the engine's error taxonomy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Lexer or parser failure.
    SyntaxError,
    /// An unresolvable name under `Strict` undefined behavior.
    UndefinedError,
    /// Operand/type mismatch.
    TypeError,
    /// Unknown filter name, or a filter's own failure.
    FilterError,
    /// Unknown test name, or a test's own failure.
    TestError,
    /// Generic evaluation failure (division by zero, bad index, ...).
    RuntimeError,
    /// Loader miss or template-resolution failure.
    TemplateError,
    /// Inheritance cycle, missing parent/block, `super()` misuse.
    InheritanceError,
    /// Macro argument mismatch or missing required argument.
    MacroError,
    /// A value could not be serialized.
    BadSerialization,
    /// Rendering was cancelled via a cancellation handle.
    Cancelled,
}

impl ErrorKind {
    fn description(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::UndefinedError => "undefined value",
            ErrorKind::TypeError => "type error",
            ErrorKind::FilterError => "filter error",
            ErrorKind::TestError => "test error",
            ErrorKind::RuntimeError => "runtime error",
            ErrorKind::TemplateError => "template error",
            ErrorKind::InheritanceError => "inheritance error",
            ErrorKind::MacroError => "macro error",
            ErrorKind::BadSerialization => "could not serialize to internal format",
            ErrorKind::Cancelled => "rendering cancelled",
        }
    }

    /// Substring-keyed suggestion used by the long-form renderer (spec §7).
    fn suggestion(self, detail: &str) -> Option<&'static str> {
        match self {
            ErrorKind::SyntaxError if detail.contains("unknown filter") => {
                Some("check the filter name for typos or register it with add_filter")
            }
            ErrorKind::SyntaxError if detail.contains("expected endif") => {
                Some("every {% if %} needs a matching {% endif %}")
            }
            ErrorKind::FilterError => Some("is the filter registered on this Environment?"),
            ErrorKind::TestError => Some("is the test registered on this Environment?"),
            ErrorKind::UndefinedError => Some("did you mean to use `default` or check `is defined`?"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref detail) = self.detail {
            write!(f, "{}: {}", self.kind, detail)?;
        } else {
            write!(f, "{}", self.kind)?;
        }
        if let Some(ref filename) = self.name {
            write!(f, " (in {}:{})", filename, self.line)?;
        }
        Ok(())
    }
}

impl Error {
    /// Creates a new error with kind and detail.
    pub fn new<D: Into<Cow<'static, str>>>(kind: ErrorKind, detail: D) -> Error {
        Error {
            kind,
            detail: Some(detail.into()),
            name: None,
            line: 0,
            column: 0,
            stack: Vec::new(),
            source: None,
        }
    }

    /// Shorthand for the error a loader/environment produces when a
    /// template name has no matching source.
    pub(crate) fn new_not_found(name: &str) -> Error {
        Error::new(ErrorKind::TemplateError, format!("template {name:?} not found"))
    }

    pub(crate) fn set_location(&mut self, filename: &str, line: usize, column: usize) {
        if self.name.is_none() {
            self.name = Some(filename.into());
            self.line = line;
            self.column = column;
        }
    }

    /// Overwrites the template name regardless of whether one was already
    /// recorded, used to replace the lexer's placeholder name with the real
    /// one once a template has been given an identity.
    pub(crate) fn set_template_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    /// Pushes a stack frame (include/import/extends/macro) recording where
    /// this error was re-wrapped while propagating outward.
    pub(crate) fn push_frame(mut self, kind: &'static str, name: impl Into<String>) -> Self {
        self.stack.push(Frame {
            kind,
            name: name.into(),
        });
        self
    }

    /// Attaches another error as source to this error.
    #[allow(unused)]
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the template name the error occurred in, if known.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the 1-based line, if known.
    pub fn line(&self) -> Option<usize> {
        self.name.as_ref().map(|_| self.line)
    }

    /// Returns the detail message without the kind prefix.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// The include/import/extends/macro frames collected while this error
    /// propagated outward, innermost first.
    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    /// Renders a multi-line, human oriented representation of the error:
    /// the message, an optional source excerpt with a caret, the call
    /// stack, and a suggestion when one applies.
    ///
    /// This is the crate's entire "enhanced error" surface; the rest of
    /// that subsystem (a debugger UI, template validators) is out of scope.
    pub fn display_debug(&self, source: Option<&str>) -> String {
        let mut out = String::new();
        out.push_str(&self.to_string());
        out.push('\n');
        if let (Some(source), Some(name)) = (source, &self.name) {
            if let Some(line_text) = source.lines().nth(self.line.saturating_sub(1)) {
                out.push_str(&format!("  --> {name}:{}:{}\n", self.line, self.column));
                out.push_str(&format!("   | {line_text}\n"));
                out.push_str(&format!("   | {}^\n", " ".repeat(self.column.saturating_sub(1))));
            }
        }
        for frame in self.stack.iter().rev() {
            out.push_str(&format!("  in {} {}\n", frame.kind, frame.name));
        }
        if let Some(detail) = &self.detail {
            if let Some(suggestion) = self.kind.suggestion(detail) {
                out.push_str(&format!("note: {suggestion}\n"));
            }
        }
        out
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|err| err.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            detail: None,
            name: None,
            line: 0,
            column: 0,
            stack: Vec::new(),
            source: None,
        }
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::new(ErrorKind::RuntimeError, "formatting failed")
    }
}

impl serde::ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Error::new(ErrorKind::BadSerialization, msg.to_string())
    }
}
