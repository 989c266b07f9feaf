//! Small helpers shared across the evaluator: auto-escaping, the
//! undefined-value policy, and HTML escaping.

use std::fmt;

use crate::error::Error;
use crate::output::Output;
use crate::value::Value;

/// Controls how `{{ ... }}` output gets escaped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AutoEscape {
    /// No escaping at all.
    None,
    /// HTML escaping: `< > & " ' /`.
    Html,
    /// Serializes the value as JSON, useful for embedding data into
    /// `<script>` tags.
    #[cfg(feature = "json")]
    Json,
    /// A custom format name handed to a user-registered formatter.
    Custom(&'static str),
}

/// Controls what happens when a name fails to resolve.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UndefinedBehavior {
    /// Printing and truthiness checks succeed silently; any other
    /// operation (attribute access, arithmetic, iteration) is an error.
    #[default]
    Silent,
    /// Every use of an undefined value, including printing and
    /// truthiness checks, is an error.
    Strict,
    /// Like [`Silent`](Self::Silent), but printing renders a visible
    /// `<<undefined:name>>` placeholder instead of an empty string, to make
    /// missing data obvious while developing a template.
    Debug,
}

impl UndefinedBehavior {
    /// What `{{ undefined_value }}` should render as.
    pub(crate) fn render(self, name: &str) -> Result<String, Error> {
        match self {
            UndefinedBehavior::Silent => Ok(String::new()),
            UndefinedBehavior::Debug => Ok(format!("<<undefined:{name}>>")),
            UndefinedBehavior::Strict => Err(Error::new(
                crate::error::ErrorKind::UndefinedError,
                format!("{name} is undefined"),
            )),
        }
    }

    /// Whether `is_true`/`{% if %}` should error rather than treat the
    /// value as falsy.
    pub(crate) fn assert_not_strict(self, name: &str) -> Result<(), Error> {
        if matches!(self, UndefinedBehavior::Strict) {
            Err(Error::new(
                crate::error::ErrorKind::UndefinedError,
                format!("{name} is undefined"),
            ))
        } else {
            Ok(())
        }
    }
}

pub(crate) fn write_escaped(
    out: &mut Output<'_>,
    auto_escape: AutoEscape,
    value: &Value,
) -> Result<(), Error> {
    if value.is_safe() {
        return write!(out, "{value}").map_err(Error::from);
    }
    match auto_escape {
        AutoEscape::None => write!(out, "{value}").map_err(Error::from),
        AutoEscape::Html => write!(out, "{}", HtmlEscape(&value.to_string())).map_err(Error::from),
        #[cfg(feature = "json")]
        AutoEscape::Json => {
            let rendered = serde_json::to_string(value).map_err(|err| {
                Error::new(
                    crate::error::ErrorKind::BadSerialization,
                    "unable to format to JSON",
                )
                .with_source(err)
            })?;
            write!(out, "{rendered}").map_err(Error::from)
        }
        AutoEscape::Custom(name) => Err(Error::new(
            crate::error::ErrorKind::RuntimeError,
            format!("no formatter registered for custom auto escape format '{name}'"),
        )),
    }
}

/// HTML-escapes a string the way `|escape`/auto-escaping does.
///
/// Lifted near verbatim from askama-escape: scans for the handful of bytes
/// that need a replacement and only allocates when it finds one.
pub struct HtmlEscape<'a>(pub &'a str);

impl fmt::Display for HtmlEscape<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        let mut start = 0;
        for (i, b) in bytes.iter().enumerate() {
            let quote = match *b {
                b'<' => "&lt;",
                b'>' => "&gt;",
                b'&' => "&amp;",
                b'"' => "&quot;",
                b'\'' => "&#x27;",
                _ => continue,
            };
            if start < i {
                f.write_str(unsafe { std::str::from_utf8_unchecked(&bytes[start..i]) })?;
            }
            f.write_str(quote)?;
            start = i + 1;
        }
        if start < bytes.len() {
            f.write_str(unsafe { std::str::from_utf8_unchecked(&bytes[start..]) })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(HtmlEscape("<a href=\"x\">&'/").to_string(), "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;/");
    }
}
