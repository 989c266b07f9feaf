//! Template-level whitespace preprocessing for `trim_blocks`/`lstrip_blocks`.
//!
//! These two options are applied to the raw source text *before* lexing,
//! deliberately kept as a separate, independently switchable pass from the
//! `{%- -%}` whitespace-control markers the lexer itself understands (see
//! [`crate::lexer`]). A block tag can opt out of either pass by using `+`
//! immediately after its opening delimiter, matching Jinja2.

use crate::lexer::LexerConfig;

/// Strips a single trailing `\n` (or `\r\n`) from `source`, matching
/// Jinja2's default of dropping the last newline of a template file unless
/// [`keep_trailing_newline`](LexerConfig::keep_trailing_newline) is set.
pub fn strip_trailing_newline(source: &str) -> &str {
    source
        .strip_suffix("\r\n")
        .or_else(|| source.strip_suffix('\n'))
        .unwrap_or(source)
}

/// Preprocesses `source` according to `cfg.lstrip_blocks`/`cfg.trim_blocks`.
pub fn preprocess(source: &str, cfg: &LexerConfig) -> String {
    if !cfg.lstrip_blocks && !cfg.trim_blocks {
        return source.to_string();
    }

    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    loop {
        let Some(idx) = rest.find(cfg.block_start.as_str()) else {
            out.push_str(rest);
            break;
        };
        let (before, after_marker_incl) = rest.split_at(idx);
        let after_start = &after_marker_incl[cfg.block_start.len()..];
        let disabled = after_start.starts_with('+');
        let is_trim_marker = after_start.starts_with('-');

        let mut before_out = before;
        if cfg.lstrip_blocks && !disabled {
            if let Some(line_start) = before.rfind('\n') {
                let tail = &before[line_start + 1..];
                if tail.chars().all(|c| c == ' ' || c == '\t') {
                    before_out = &before[..line_start + 1];
                }
            } else if before.chars().all(|c| c == ' ' || c == '\t') {
                before_out = "";
            }
        }
        out.push_str(before_out);
        out.push_str(cfg.block_start.as_str());

        // find the matching block_end for *this* tag so trim_blocks only
        // consumes the newline right after this tag's close, not some
        // unrelated later one.
        let body_start = cfg.block_start.len();
        let Some(end_rel) = after_marker_incl[body_start..].find(cfg.block_end.as_str()) else {
            out.push_str(&after_marker_incl[body_start..]);
            break;
        };
        let end_idx = body_start + end_rel + cfg.block_end.len();
        let tag_disabled_end = after_marker_incl[..end_idx].ends_with(&format!("+{}", cfg.block_end));
        out.push_str(&after_marker_incl[body_start..end_idx]);
        rest = &after_marker_incl[end_idx..];

        if cfg.trim_blocks && !tag_disabled_end {
            if let Some(stripped) = rest.strip_prefix('\n') {
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix("\r\n") {
                rest = stripped;
            }
        }
        let _ = is_trim_marker;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(trim_blocks: bool, lstrip_blocks: bool) -> LexerConfig {
        LexerConfig {
            trim_blocks,
            lstrip_blocks,
            ..LexerConfig::default()
        }
    }

    #[test]
    fn test_trim_blocks() {
        let src = "{% if true %}\nhi\n{% endif %}";
        let out = preprocess(src, &cfg(true, false));
        assert_eq!(out, "{% if true %}hi\n{% endif %}");
    }

    #[test]
    fn test_lstrip_blocks() {
        let src = "    {% if true %}\nhi\n    {% endif %}";
        let out = preprocess(src, &cfg(false, true));
        assert_eq!(out, "{% if true %}\nhi\n{% endif %}");
    }

    #[test]
    fn test_noop_without_flags() {
        let src = "    {% if true %}\nhi\n    {% endif %}";
        assert_eq!(preprocess(src, &cfg(false, false)), src);
    }

    #[test]
    fn test_strip_trailing_newline() {
        assert_eq!(strip_trailing_newline("hi\n"), "hi");
        assert_eq!(strip_trailing_newline("hi\r\n"), "hi");
        assert_eq!(strip_trailing_newline("hi\n\n"), "hi\n");
        assert_eq!(strip_trailing_newline("hi"), "hi");
    }
}
