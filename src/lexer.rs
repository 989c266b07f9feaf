use crate::error::{Error, ErrorKind};
use crate::tokens::{Span, Token};

/// Delimiter and whitespace-control configuration for the [`lex`] function.
#[derive(Debug, Clone)]
pub struct LexerConfig {
    pub var_start: String,
    pub var_end: String,
    pub block_start: String,
    pub block_end: String,
    pub comment_start: String,
    pub comment_end: String,
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
    /// Whether a single trailing newline in the source should be kept as-is
    /// (Jinja2 strips it by default).
    pub keep_trailing_newline: bool,
}

impl Default for LexerConfig {
    fn default() -> Self {
        LexerConfig {
            var_start: "{{".into(),
            var_end: "}}".into(),
            block_start: "{%".into(),
            block_end: "%}".into(),
            comment_start: "{#".into(),
            comment_end: "#}".into(),
            trim_blocks: false,
            lstrip_blocks: false,
            keep_trailing_newline: false,
        }
    }
}

enum Mode {
    Text,
    Variable,
    Block,
}

struct Lexer<'s> {
    rest: &'s str,
    line: u32,
    col: u32,
    cfg: &'s LexerConfig,
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

impl<'s> Lexer<'s> {
    fn advance(&mut self, bytes: usize) -> &'s str {
        let (skipped, new_rest) = self.rest.split_at(bytes);
        for c in skipped.chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
        self.rest = new_rest;
        skipped
    }

    fn loc(&self) -> (u32, u32) {
        (self.line, self.col)
    }

    fn span(&self, start: (u32, u32)) -> Span {
        Span {
            start_line: start.0,
            start_col: start.1,
            end_line: self.line,
            end_col: self.col,
        }
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        let mut e = Error::new(ErrorKind::SyntaxError, msg.into());
        e.set_location("<template>", self.line as usize, self.col as usize);
        e
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest.as_bytes().get(..s.len()) == Some(s.as_bytes())
    }

    fn skip_ws(&mut self) {
        let n = self
            .rest
            .char_indices()
            .find(|&(_, c)| !c.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        if n > 0 {
            self.advance(n);
        }
    }

    fn eat_identifier(&mut self) -> Result<(Token<'s>, Span), Error> {
        let start = self.loc();
        let mut n = 0;
        for (i, c) in self.rest.char_indices() {
            let ok = if i == 0 {
                is_ident_start(c)
            } else {
                is_ident_continue(c)
            };
            if !ok {
                break;
            }
            n = i + c.len_utf8();
        }
        if n == 0 {
            return Err(self.err("unexpected character"));
        }
        let ident = self.advance(n);
        Ok((Token::Ident(ident), self.span(start)))
    }

    fn eat_number(&mut self) -> Result<(Token<'s>, Span), Error> {
        let start = self.loc();
        let bytes = self.rest.as_bytes();
        let mut n = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
        let mut is_float = false;
        if bytes.get(n) == Some(&b'.') && bytes.get(n + 1).is_some_and(u8::is_ascii_digit) {
            is_float = true;
            n += 1;
            n += bytes[n..].iter().take_while(|b| b.is_ascii_digit()).count();
        }
        if matches!(bytes.get(n), Some(b'e') | Some(b'E')) {
            let mut m = n + 1;
            if matches!(bytes.get(m), Some(b'+') | Some(b'-')) {
                m += 1;
            }
            let exp_digits = bytes[m..].iter().take_while(|b| b.is_ascii_digit()).count();
            if exp_digits > 0 {
                is_float = true;
                n = m + exp_digits;
            }
        }
        let text = self.advance(n);
        if is_float {
            text.parse::<f64>()
                .map(|v| (Token::Float(v), self.span(start)))
                .map_err(|_| self.err("invalid float literal"))
        } else {
            text.parse::<i64>()
                .map(|v| (Token::Int(v), self.span(start)))
                .map_err(|_| self.err("invalid integer literal"))
        }
    }

    fn eat_string(&mut self, quote: u8) -> Result<(Token<'s>, Span), Error> {
        let start = self.loc();
        let bytes = self.rest.as_bytes();
        let mut i = 1;
        let mut has_escape = false;
        loop {
            match bytes.get(i) {
                None => return Err(self.err("unterminated string")),
                Some(b'\\') => {
                    has_escape = true;
                    i += 2;
                }
                Some(&c) if c == quote => {
                    i += 1;
                    break;
                }
                Some(_) => i += 1,
            }
        }
        let raw = self.advance(i);
        let inner = &raw[1..raw.len() - 1];
        let value = if has_escape {
            std::borrow::Cow::Owned(unescape(inner).map_err(|_| self.err("bad string escape"))?)
        } else {
            std::borrow::Cow::Borrowed(inner)
        };
        Ok((Token::Str(value), self.span(start)))
    }
}

fn unescape(s: &str) -> Result<String, ()> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next().ok_or(())? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'u' => {
                let hex: String = (0..4).map(|_| chars.next().ok_or(())).collect::<Result<_, _>>()?;
                let cp = u32::from_str_radix(&hex, 16).map_err(|_| ())?;
                out.push(char::from_u32(cp).ok_or(())?);
            }
            'x' => {
                let hex: String = (0..2).map(|_| chars.next().ok_or(())).collect::<Result<_, _>>()?;
                let cp = u32::from_str_radix(&hex, 16).map_err(|_| ())?;
                out.push(char::from_u32(cp).ok_or(())?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Tokenizes `source` under `cfg`, returning a token stream that always ends
/// in an implicit EOF (the returned vector simply stops; callers treat
/// exhaustion as EOF per the parser's contract).
///
/// `{%- X -%}` whitespace-control markers are resolved here against the
/// adjacent `TemplateData` tokens. `trim_blocks`/`lstrip_blocks` are applied
/// as an independent pass (see [`crate::whitespace`]) before this function
/// ever sees the source, keeping the two whitespace mechanisms switchable
/// in isolation as required by the spec.
pub fn lex<'s>(source: &'s str, cfg: &LexerConfig) -> Result<Vec<(Token<'s>, Span)>, Error> {
    let mut lx = Lexer {
        rest: source,
        line: 1,
        col: 0,
        cfg,
    };
    let mut mode = Mode::Text;
    let mut out = Vec::new();
    let mut pending_rstrip = false;

    loop {
        if lx.rest.is_empty() {
            break;
        }
        match mode {
            Mode::Text => {
                if lx.starts_with(&lx.cfg.comment_start.clone()) {
                    let start_trim = lx.rest.as_bytes().get(lx.cfg.comment_start.len()) == Some(&b'-');
                    let search_from = lx.cfg.comment_start.len() + usize::from(start_trim);
                    let end = lx.rest[search_from..]
                        .find(&lx.cfg.comment_end)
                        .ok_or_else(|| lx.err("unterminated comment"))?;
                    let end_trim = lx.rest.as_bytes().get(search_from + end - 1) == Some(&b'-');
                    lx.advance(search_from + end + lx.cfg.comment_end.len());
                    pending_rstrip = end_trim;
                    continue;
                }
                if lx.starts_with(&lx.cfg.block_start.clone()) {
                    if let Some((content, after)) = try_raw_block(&lx) {
                        let start = lx.loc();
                        lx.advance(after);
                        out.push((Token::TemplateData(content), lx.span(start)));
                        continue;
                    }
                }
                let (marker, is_var, is_block) = {
                    let is_var = lx.starts_with(&lx.cfg.var_start.clone());
                    let is_block = lx.starts_with(&lx.cfg.block_start.clone());
                    (is_var || is_block, is_var, is_block)
                };
                if marker {
                    let delim_len = if is_var {
                        lx.cfg.var_start.len()
                    } else {
                        lx.cfg.block_start.len()
                    };
                    let lstrip = lx.rest.as_bytes().get(delim_len) == Some(&b'-');
                    let start = lx.loc();
                    lx.advance(delim_len + usize::from(lstrip));
                    out.push((
                        if is_block {
                            Token::BlockStart
                        } else {
                            Token::VariableStart
                        },
                        lx.span(start),
                    ));
                    mode = if is_block { Mode::Block } else { Mode::Variable };
                    let _ = lstrip;
                    continue;
                }
                // plain text run until the next marker
                let start = lx.loc();
                let mut text_end = lx.rest.len();
                let mut found_marker_at = None;
                for starter in [&lx.cfg.var_start, &lx.cfg.block_start, &lx.cfg.comment_start] {
                    if let Some(idx) = lx.rest.find(starter.as_str()) {
                        let better = match found_marker_at {
                            Some(m) => idx < m,
                            None => true,
                        };
                        if better {
                            found_marker_at = Some(idx);
                        }
                    }
                }
                if let Some(idx) = found_marker_at {
                    text_end = idx;
                }
                let mut text = lx.advance(text_end);
                if pending_rstrip {
                    pending_rstrip = false;
                    text = text.trim_start();
                }
                // look ahead: is the next marker a lstrip (`-`) marker?
                let next_is_lstrip = {
                    let b = lx.rest.as_bytes();
                    (lx.starts_with(&lx.cfg.var_start.clone())
                        && b.get(lx.cfg.var_start.len()) == Some(&b'-'))
                        || (lx.starts_with(&lx.cfg.block_start.clone())
                            && b.get(lx.cfg.block_start.len()) == Some(&b'-'))
                        || (lx.starts_with(&lx.cfg.comment_start.clone())
                            && b.get(lx.cfg.comment_start.len()) == Some(&b'-'))
                };
                let text = if next_is_lstrip { text.trim_end() } else { text };
                if !text.is_empty() {
                    out.push((Token::TemplateData(text), lx.span(start)));
                }
            }
            Mode::Variable | Mode::Block => {
                lx.skip_ws();
                if lx.rest.is_empty() {
                    return Err(lx.err("unexpected end of template, expected end of block"));
                }
                let end_delim = if matches!(mode, Mode::Block) {
                    lx.cfg.block_end.clone()
                } else {
                    lx.cfg.var_end.clone()
                };
                let rstrip = lx.rest.as_bytes().get(0) == Some(&b'-')
                    && lx.rest.as_bytes().get(1..1 + end_delim.len()) == Some(end_delim.as_bytes());
                if rstrip || lx.starts_with(&end_delim) {
                    let start = lx.loc();
                    lx.advance(end_delim.len() + usize::from(rstrip));
                    out.push((
                        if matches!(mode, Mode::Block) {
                            Token::BlockEnd
                        } else {
                            Token::VariableEnd
                        },
                        lx.span(start),
                    ));
                    pending_rstrip = rstrip;
                    mode = Mode::Text;
                    continue;
                }

                let two = lx.rest.as_bytes().get(..2);
                let op2 = match two {
                    Some(b"==") => Some(Token::Eq),
                    Some(b"!=") => Some(Token::Ne),
                    Some(b">=") => Some(Token::Gte),
                    Some(b"<=") => Some(Token::Lte),
                    Some(b"//") => Some(Token::FloorDiv),
                    Some(b"**") => Some(Token::Pow),
                    _ => None,
                };
                if let Some(tok) = op2 {
                    let start = lx.loc();
                    lx.advance(2);
                    out.push((tok, lx.span(start)));
                    continue;
                }

                let c = lx.rest.as_bytes()[0];
                let op1 = match c {
                    b'+' => Some(Token::Plus),
                    b'-' => Some(Token::Minus),
                    b'*' => Some(Token::Mul),
                    b'/' => Some(Token::Div),
                    b'%' => Some(Token::Mod),
                    b'.' => Some(Token::Dot),
                    b',' => Some(Token::Comma),
                    b':' => Some(Token::Colon),
                    b'~' => Some(Token::Tilde),
                    b'|' => Some(Token::Pipe),
                    b'=' => Some(Token::Assign),
                    b'>' => Some(Token::Gt),
                    b'<' => Some(Token::Lt),
                    b'(' => Some(Token::ParenOpen),
                    b')' => Some(Token::ParenClose),
                    b'[' => Some(Token::BracketOpen),
                    b']' => Some(Token::BracketClose),
                    b'{' => Some(Token::BraceOpen),
                    b'}' => Some(Token::BraceClose),
                    _ => None,
                };
                if let Some(tok) = op1 {
                    let start = lx.loc();
                    lx.advance(1);
                    out.push((tok, lx.span(start)));
                    continue;
                }
                if c == b'\'' || c == b'"' {
                    out.push(lx.eat_string(c)?);
                    continue;
                }
                if c.is_ascii_digit() {
                    out.push(lx.eat_number()?);
                    continue;
                }
                out.push(lx.eat_identifier()?);
            }
        }
    }
    Ok(out)
}

/// Returns the literal body and the byte offset to advance past, if `{%
/// raw %}`...`{% endraw %}` begins at the current position.
fn try_raw_block<'s>(lx: &Lexer<'s>) -> Option<(&'s str, usize)> {
    let after_start = skip_tag(lx.rest, &lx.cfg.block_start, "raw", &lx.cfg.block_end)?;
    let body_start = after_start;
    let tail = &lx.rest[body_start..];
    let mut search = 0;
    loop {
        let rel = tail[search..].find(lx.cfg.block_start.as_str())?;
        let at = search + rel;
        if let Some(end) = skip_tag(&tail[at..], &lx.cfg.block_start, "endraw", &lx.cfg.block_end) {
            let body = &tail[..at];
            return Some((body, body_start + at + end));
        }
        search = at + lx.cfg.block_start.len();
    }
}

/// If `s` begins with `block_start [ '-' ] ws* name ws* [ '-' ] block_end`,
/// returns the byte length consumed.
fn skip_tag(s: &str, block_start: &str, name: &str, block_end: &str) -> Option<usize> {
    let mut rest = s.strip_prefix(block_start)?;
    rest = rest.strip_prefix('-').unwrap_or(rest);
    rest = rest.trim_start();
    rest = rest.strip_prefix(name)?;
    rest = rest.trim_start();
    rest = rest.strip_prefix('-').unwrap_or(rest);
    rest = rest.strip_prefix(block_end)?;
    Some(s.len() - rest.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token<'_>> {
        lex(src, &LexerConfig::default())
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(toks("hello world"), vec![Token::TemplateData("hello world")]);
    }

    #[test]
    fn test_variable() {
        assert_eq!(
            toks("{{ x }}"),
            vec![Token::VariableStart, Token::Ident("x"), Token::VariableEnd]
        );
    }

    #[test]
    fn test_whitespace_trim_markers() {
        assert_eq!(
            toks("a {%- if x -%} b {%- endif -%} c"),
            vec![
                Token::TemplateData("a"),
                Token::BlockStart,
                Token::Ident("if"),
                Token::Ident("x"),
                Token::BlockEnd,
                Token::TemplateData("b"),
                Token::BlockStart,
                Token::Ident("endif"),
                Token::BlockEnd,
                Token::TemplateData("c"),
            ]
        );
    }

    #[test]
    fn test_raw_block() {
        assert_eq!(
            toks("{% raw %}{{ not evaluated }}{% endraw %}"),
            vec![Token::TemplateData("{{ not evaluated }}")]
        );
    }

    #[test]
    fn test_string_escape() {
        assert_eq!(toks(r#"{{ "a\nb" }}"#), vec![
            Token::VariableStart,
            Token::Str("a\nb".into()),
            Token::VariableEnd,
        ]);
    }

    #[test]
    fn test_unterminated_string_errors() {
        assert!(lex("{{ 'abc }}", &LexerConfig::default()).is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("{{ 42 }}"), vec![Token::VariableStart, Token::Int(42), Token::VariableEnd]);
        assert_eq!(
            toks("{{ 4.5e1 }}"),
            vec![Token::VariableStart, Token::Float(45.0), Token::VariableEnd]
        );
    }
}
