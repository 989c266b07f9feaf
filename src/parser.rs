//! Recursive descent statement dispatcher plus a Pratt expression parser,
//! targeting [`crate::ast`] directly. There is no separate codegen step:
//! the AST this module produces is exactly what [`crate::eval`] walks.

use std::borrow::Cow;
use std::fmt;

use crate::ast;
use crate::ast::Spanned;
use crate::error::{Error, ErrorKind};
use crate::lexer::{self, LexerConfig};
use crate::tokens::{Span, Token};
use crate::value::Value;

const MAX_RECURSION: usize = 150;

fn unexpected<D: fmt::Display>(found: D, expected: &str) -> Error {
    Error::new(
        ErrorKind::SyntaxError,
        format!("unexpected {found}, expected {expected}"),
    )
}

fn syntax_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::SyntaxError, msg.into())
}

macro_rules! syntax_error {
    ($($tt:tt)*) => { return Err(syntax_error(format!($($tt)*))) };
}

struct TokenStream<'a> {
    tokens: Vec<(Token<'a>, Span)>,
    pos: usize,
    last_span: Span,
}

impl<'a> TokenStream<'a> {
    fn new(tokens: Vec<(Token<'a>, Span)>) -> TokenStream<'a> {
        TokenStream {
            tokens,
            pos: 0,
            last_span: Span::default(),
        }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or(self.last_span)
    }

    fn next(&mut self) -> Option<(Token<'a>, Span)> {
        let item = self.tokens.get(self.pos).cloned();
        if let Some((_, span)) = item {
            self.last_span = span;
            self.pos += 1;
        }
        item
    }

    fn expect_eof(&self) -> Result<(), Error> {
        if self.pos < self.tokens.len() {
            syntax_error!("unexpected trailing tokens");
        }
        Ok(())
    }
}

macro_rules! expect_token {
    ($s:expr, $pat:pat, $what:expr) => {
        match $s.next() {
            Some(($pat, span)) => span,
            Some((tok, _)) => return Err(unexpected(tok, $what)),
            None => return Err(unexpected("end of input", $what)),
        }
    };
    ($s:expr, $pat:pat => $out:expr, $what:expr) => {
        match $s.next() {
            Some(($pat, _span)) => $out,
            Some((tok, _)) => return Err(unexpected(tok, $what)),
            None => return Err(unexpected("end of input", $what)),
        }
    };
}

macro_rules! matches_tok {
    ($s:expr, $pat:pat) => {
        matches!($s.peek(), Some($pat))
    };
}

macro_rules! skip_tok {
    ($s:expr, $pat:pat) => {{
        let matched = matches!($s.peek(), Some($pat));
        if matched {
            $s.next();
        }
        matched
    }};
}

/// True when `Ident(name)` is the given bare keyword — identifiers are
/// never reserved at the lexer level, so every keyword check goes through
/// this helper instead of a dedicated token variant.
fn ident_is(tok: Option<&Token<'_>>, word: &str) -> bool {
    matches!(tok, Some(Token::Ident(name)) if *name == word)
}

pub struct Parser<'a> {
    stream: TokenStream<'a>,
    in_macro: u32,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<(Token<'a>, Span)>) -> Parser<'a> {
        Parser {
            stream: TokenStream::new(tokens),
            in_macro: 0,
            depth: 0,
        }
    }

    fn recursion_guard(&mut self) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > MAX_RECURSION {
            return Err(syntax_error("template exceeds the maximum nesting depth"));
        }
        Ok(())
    }

    // ---- statements -----------------------------------------------------

    fn parse_statements(&mut self, end_words: &[&str]) -> Result<Vec<ast::Stmt<'a>>, Error> {
        let mut rv = Vec::new();
        loop {
            match self.stream.peek() {
                None => {
                    if end_words.is_empty() {
                        break;
                    }
                    syntax_error!("unexpected end of template, expected {}", end_words[0]);
                }
                Some(Token::TemplateData(_)) => {
                    let (tok, span) = self.stream.next().unwrap();
                    let raw = match tok {
                        Token::TemplateData(s) => s,
                        _ => unreachable!(),
                    };
                    rv.push(ast::Stmt::EmitRaw(Spanned::new(
                        ast::EmitRaw { raw },
                        span,
                    )));
                }
                Some(Token::VariableStart) => {
                    let start = self.stream.peek_span();
                    self.stream.next();
                    let expr = self.parse_expr()?;
                    expect_token!(self.stream, Token::VariableEnd, "end of variable block");
                    rv.push(ast::Stmt::EmitExpr(Spanned::new(
                        ast::EmitExpr { expr },
                        start,
                    )));
                }
                Some(Token::BlockStart) => {
                    self.stream.next();
                    if let Some(Token::Ident(name)) = self.stream.peek() {
                        if end_words.contains(name) {
                            break;
                        }
                    }
                    rv.push(self.parse_stmt()?);
                }
                Some(tok) => return Err(unexpected(tok.to_string(), "template data or tag")),
            }
        }
        Ok(rv)
    }

    fn parse_stmt(&mut self) -> Result<ast::Stmt<'a>, Error> {
        self.recursion_guard()?;
        let start = self.stream.peek_span();
        let name = match self.stream.next() {
            Some((Token::Ident(name), _)) => name,
            Some((tok, _)) => return Err(unexpected(tok, "tag name")),
            None => return Err(unexpected("end of input", "tag name")),
        };
        let stmt = match name {
            "if" => self.parse_if(start)?,
            "for" => self.parse_for(start)?,
            "set" => self.parse_set(start)?,
            "with" => self.parse_with(start)?,
            "block" => self.parse_block(start)?,
            "extends" => self.parse_extends(start)?,
            "include" => self.parse_include(start)?,
            "import" => self.parse_import(start)?,
            "from" => self.parse_from_import(start)?,
            "macro" => self.parse_macro(start)?,
            "call" => self.parse_call_block(start)?,
            "filter" => self.parse_filter_block(start)?,
            "autoescape" => self.parse_autoescape(start)?,
            "raw" => unreachable!("raw blocks are consumed whole by the lexer"),
            "do" => self.parse_do(start)?,
            "break" => {
                self.end_tag()?;
                ast::Stmt::Break(start)
            }
            "continue" => {
                self.end_tag()?;
                ast::Stmt::Continue(start)
            }
            other => self.parse_extension(other, start)?,
        };
        self.depth -= 1;
        Ok(stmt)
    }

    /// Consumes through `%}`, used by tags with no further syntax of their own.
    fn end_tag(&mut self) -> Result<(), Error> {
        expect_token!(self.stream, Token::BlockEnd, "end of block");
        Ok(())
    }

    fn parse_extension(&mut self, name: &'a str, start: Span) -> Result<ast::Stmt<'a>, Error> {
        // Unknown tags are parsed as an opaque body up to their matching
        // `end<name>` tag and handed to the extension registry at eval time.
        let end_word = format!("end{name}");
        while !matches_tok!(self.stream, Token::BlockEnd) {
            self.stream.next();
        }
        self.stream.next();
        let payload = self.parse_statements(&[&end_word])?;
        self.stream.next();
        self.end_tag()?;
        Ok(ast::Stmt::Extension(Spanned::new(
            ast::Extension { name, payload },
            start,
        )))
    }

    fn parse_if(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let mut branches = Vec::new();
        let mut else_body = Vec::new();
        loop {
            let cond = self.parse_expr()?;
            self.end_tag()?;
            let body = self.parse_statements(&["elif", "else", "endif"])?;
            branches.push((cond, body));
            match self.stream.next() {
                Some((Token::Ident("elif"), _)) => continue,
                Some((Token::Ident("else"), _)) => {
                    self.end_tag()?;
                    else_body = self.parse_statements(&["endif"])?;
                    self.stream.next();
                    self.end_tag()?;
                    break;
                }
                Some((Token::Ident("endif"), _)) => {
                    self.end_tag()?;
                    break;
                }
                _ => syntax_error!("expected elif, else or endif"),
            }
        }
        Ok(ast::Stmt::IfCond(Spanned::new(
            ast::IfCond { branches, else_body },
            start,
        )))
    }

    fn parse_assign_target(&mut self) -> Result<ast::AssignTarget<'a>, Error> {
        let first = expect_token!(self.stream, Token::Ident(n) => n, "identifier");
        if skip_tok!(self.stream, Token::Comma) {
            let mut names = vec![first];
            loop {
                names.push(expect_token!(self.stream, Token::Ident(n) => n, "identifier"));
                if !skip_tok!(self.stream, Token::Comma) {
                    break;
                }
            }
            Ok(ast::AssignTarget::Tuple(names))
        } else {
            Ok(ast::AssignTarget::Name(first))
        }
    }

    fn parse_for(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let first = expect_token!(self.stream, Token::Ident(n) => n, "loop variable");
        let mut target = vec![first];
        while skip_tok!(self.stream, Token::Comma) {
            target.push(expect_token!(self.stream, Token::Ident(n) => n, "loop variable"));
        }
        if !ident_is(self.stream.peek(), "in") {
            syntax_error!("expected 'in' in for loop");
        }
        self.stream.next();
        let iter = self.parse_expr_no_condexpr()?;
        let recursive = if ident_is(self.stream.peek(), "recursive") {
            self.stream.next();
            true
        } else {
            false
        };
        self.end_tag()?;
        let body = self.parse_statements(&["else", "endfor"])?;
        let else_body = if matches!(self.stream.peek(), Some(Token::Ident("else"))) {
            self.stream.next();
            self.end_tag()?;
            let body = self.parse_statements(&["endfor"])?;
            body
        } else {
            Vec::new()
        };
        self.stream.next();
        self.end_tag()?;
        Ok(ast::Stmt::ForLoop(Spanned::new(
            ast::ForLoop {
                target,
                iter,
                body,
                else_body,
                recursive,
            },
            start,
        )))
    }

    fn parse_set(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let target = self.parse_assign_target()?;
        if skip_tok!(self.stream, Token::Assign) {
            let expr = self.parse_set_rhs()?;
            self.end_tag()?;
            return Ok(ast::Stmt::Set(Spanned::new(ast::Set { target, expr }, start)));
        }
        let filters = if skip_tok!(self.stream, Token::Pipe) {
            self.parse_filter_chain_list()?
        } else {
            Vec::new()
        };
        self.end_tag()?;
        let body = self.parse_statements(&["endset"])?;
        self.stream.next();
        self.end_tag()?;
        Ok(ast::Stmt::SetBlock(Spanned::new(
            ast::SetBlock {
                target,
                filters,
                body,
            },
            start,
        )))
    }

    /// The right-hand side of `{% set %}`: a single expression, or (to
    /// support `{% set a, b = 1, 2 %}` unpacking without requiring the
    /// parens a tuple literal would otherwise need) a bare comma-separated
    /// list built into a [`ast::TupleLit`].
    fn parse_set_rhs(&mut self) -> Result<ast::Expr<'a>, Error> {
        let span = self.stream.peek_span();
        let first = self.parse_expr()?;
        if !matches_tok!(self.stream, Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while skip_tok!(self.stream, Token::Comma) {
            if matches_tok!(self.stream, Token::BlockEnd) || matches_tok!(self.stream, Token::Pipe) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(ast::Expr::Tuple(Spanned::new(ast::TupleLit { items }, span)))
    }

    fn parse_with(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let mut assignments = Vec::new();
        loop {
            let name = match self.stream.peek() {
                Some(Token::Ident(n)) if *n != "in" => *n,
                _ => break,
            };
            self.stream.next();
            expect_token!(self.stream, Token::Assign, "=");
            let expr = self.parse_expr()?;
            assignments.push((ast::AssignTarget::Name(name), expr));
            if !skip_tok!(self.stream, Token::Comma) {
                break;
            }
        }
        self.end_tag()?;
        let body = self.parse_statements(&["endwith"])?;
        self.stream.next();
        self.end_tag()?;
        Ok(ast::Stmt::WithBlock(Spanned::new(
            ast::WithBlock { assignments, body },
            start,
        )))
    }

    fn parse_block(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let name = expect_token!(self.stream, Token::Ident(n) => n, "block name");
        let scoped = if ident_is(self.stream.peek(), "scoped") {
            self.stream.next();
            true
        } else {
            false
        };
        self.end_tag()?;
        let body = self.parse_statements(&["endblock"])?;
        self.stream.next();
        // `{% endblock %}` or `{% endblock name %}` — the optional trailing
        // name is accepted but not required to match.
        if matches!(self.stream.peek(), Some(Token::Ident(_))) {
            self.stream.next();
        }
        self.end_tag()?;
        Ok(ast::Stmt::Block(Spanned::new(
            ast::Block { name, body, scoped },
            start,
        )))
    }

    fn parse_extends(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let name = self.parse_expr()?;
        self.end_tag()?;
        Ok(ast::Stmt::Extends(Spanned::new(ast::Extends { name }, start)))
    }

    fn parse_include(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let name = self.parse_expr_no_condexpr()?;
        let mut ignore_missing = false;
        let mut with_context = true;
        loop {
            match self.stream.peek() {
                Some(Token::Ident("ignore")) => {
                    self.stream.next();
                    if !ident_is(self.stream.peek(), "missing") {
                        syntax_error!("expected 'missing' after 'ignore'");
                    }
                    self.stream.next();
                    ignore_missing = true;
                }
                Some(Token::Ident("with")) => {
                    self.stream.next();
                    if !ident_is(self.stream.peek(), "context") {
                        syntax_error!("expected 'context'");
                    }
                    self.stream.next();
                    with_context = true;
                }
                Some(Token::Ident("without")) => {
                    self.stream.next();
                    if !ident_is(self.stream.peek(), "context") {
                        syntax_error!("expected 'context'");
                    }
                    self.stream.next();
                    with_context = false;
                }
                _ => break,
            }
        }
        self.end_tag()?;
        Ok(ast::Stmt::Include(Spanned::new(
            ast::Include {
                name,
                with_context,
                ignore_missing,
            },
            start,
        )))
    }

    fn parse_import(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let expr = self.parse_expr_no_condexpr()?;
        if !ident_is(self.stream.peek(), "as") {
            syntax_error!("expected 'as' in import");
        }
        self.stream.next();
        let name = expect_token!(self.stream, Token::Ident(n) => n, "identifier");
        self.end_tag()?;
        Ok(ast::Stmt::Import(Spanned::new(
            ast::Import { expr, name },
            start,
        )))
    }

    fn parse_from_import(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let expr = self.parse_expr_no_condexpr()?;
        if !ident_is(self.stream.peek(), "import") {
            syntax_error!("expected 'import'");
        }
        self.stream.next();
        let mut names = Vec::new();
        loop {
            let name = expect_token!(self.stream, Token::Ident(n) => n, "identifier");
            let alias = if ident_is(self.stream.peek(), "as") {
                self.stream.next();
                Some(expect_token!(self.stream, Token::Ident(n) => n, "identifier"))
            } else {
                None
            };
            names.push((name, alias));
            if !skip_tok!(self.stream, Token::Comma) {
                break;
            }
        }
        self.end_tag()?;
        Ok(ast::Stmt::FromImport(Spanned::new(
            ast::FromImport { expr, names },
            start,
        )))
    }

    fn parse_macro(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        if self.in_macro > 0 {
            syntax_error!("macros cannot be nested");
        }
        let name = expect_token!(self.stream, Token::Ident(n) => n, "macro name");
        expect_token!(self.stream, Token::ParenOpen, "(");
        let mut args = Vec::new();
        let mut defaults = Vec::new();
        while !matches_tok!(self.stream, Token::ParenClose) {
            let arg = expect_token!(self.stream, Token::Ident(n) => n, "argument name");
            args.push(arg);
            if skip_tok!(self.stream, Token::Assign) {
                defaults.push(Some(self.parse_expr()?));
            } else {
                defaults.push(None);
            }
            if !skip_tok!(self.stream, Token::Comma) {
                break;
            }
        }
        expect_token!(self.stream, Token::ParenClose, ")");
        self.end_tag()?;
        self.in_macro += 1;
        let body = self.parse_statements(&["endmacro"])?;
        self.in_macro -= 1;
        self.stream.next();
        self.end_tag()?;
        Ok(ast::Stmt::Macro(Spanned::new(
            ast::Macro {
                name,
                args,
                defaults,
                body,
            },
            start,
        )))
    }

    fn parse_call_block(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        // `{% call(x) macro_name(a) %}`: the parenthesized name list is what
        // `caller(...)`'s own arguments bind to inside the body.
        let mut params = Vec::new();
        if matches_tok!(self.stream, Token::ParenOpen) {
            self.stream.next();
            while !matches_tok!(self.stream, Token::ParenClose) {
                match self.stream.next() {
                    Some((Token::Ident(name), _)) => params.push(name),
                    _ => syntax_error!("expected parameter name in call block signature"),
                }
                if !skip_tok!(self.stream, Token::Comma) {
                    break;
                }
            }
            expect_token!(self.stream, Token::ParenClose, "`)`");
        }
        let call_expr = self.parse_expr()?;
        let call = match call_expr {
            ast::Expr::Call(c) => c.into_inner(),
            _ => syntax_error!("expected a call expression after 'call'"),
        };
        self.end_tag()?;
        let body = self.parse_statements(&["endcall"])?;
        self.stream.next();
        self.end_tag()?;
        Ok(ast::Stmt::CallBlock(Spanned::new(
            ast::CallBlock { call, params, body },
            start,
        )))
    }

    fn parse_filter_block(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let filters = self.parse_filter_chain_list()?;
        self.end_tag()?;
        let body = self.parse_statements(&["endfilter"])?;
        self.stream.next();
        self.end_tag()?;
        Ok(ast::Stmt::FilterBlock(Spanned::new(
            ast::FilterBlock { filters, body },
            start,
        )))
    }

    fn parse_filter_chain_list(&mut self) -> Result<Vec<ast::FilterCall<'a>>, Error> {
        let mut out = Vec::new();
        loop {
            let name = expect_token!(self.stream, Token::Ident(n) => n, "filter name");
            let (args, kwargs) = if skip_tok!(self.stream, Token::ParenOpen) {
                self.parse_call_args()?
            } else {
                (Vec::new(), Vec::new())
            };
            out.push(ast::FilterCall { name, args, kwargs });
            if !skip_tok!(self.stream, Token::Pipe) {
                break;
            }
        }
        Ok(out)
    }

    fn parse_autoescape(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let enabled = self.parse_expr()?;
        self.end_tag()?;
        let body = self.parse_statements(&["endautoescape"])?;
        self.stream.next();
        self.end_tag()?;
        Ok(ast::Stmt::AutoEscape(Spanned::new(
            ast::AutoEscape { enabled, body },
            start,
        )))
    }

    fn parse_do(&mut self, start: Span) -> Result<ast::Stmt<'a>, Error> {
        let expr = self.parse_expr()?;
        self.end_tag()?;
        Ok(ast::Stmt::Do(Spanned::new(ast::Do { expr }, start)))
    }

    // ---- expressions ------------------------------------------------

    fn parse_expr(&mut self) -> Result<ast::Expr<'a>, Error> {
        self.parse_ifexpr()
    }

    /// Expression parsing without the trailing `x if y else z` ternary,
    /// used wherever a bare `in`/keyword could otherwise be ambiguous
    /// (`{% for x in expr %}`, `{% include expr %}`).
    fn parse_expr_no_condexpr(&mut self) -> Result<ast::Expr<'a>, Error> {
        self.parse_or()
    }

    fn parse_ifexpr(&mut self) -> Result<ast::Expr<'a>, Error> {
        let expr = self.parse_or()?;
        if ident_is(self.stream.peek(), "if") {
            let span = self.stream.peek_span();
            self.stream.next();
            let test_expr = self.parse_or()?;
            let false_expr = if ident_is(self.stream.peek(), "else") {
                self.stream.next();
                Some(self.parse_ifexpr()?)
            } else {
                None
            };
            return Ok(ast::Expr::IfExpr(Spanned::new(
                ast::IfExpr {
                    test_expr,
                    true_expr: expr,
                    false_expr,
                },
                span,
            )));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut left = self.parse_and()?;
        while ident_is(self.stream.peek(), "or") {
            let span = self.stream.peek_span();
            self.stream.next();
            let right = self.parse_and()?;
            left = ast::Expr::BinOp(Spanned::new(
                ast::BinOp {
                    op: ast::BinOpKind::ScOr,
                    left,
                    right,
                },
                span,
            ));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut left = self.parse_not()?;
        while ident_is(self.stream.peek(), "and") {
            let span = self.stream.peek_span();
            self.stream.next();
            let right = self.parse_not()?;
            left = ast::Expr::BinOp(Spanned::new(
                ast::BinOp {
                    op: ast::BinOpKind::ScAnd,
                    left,
                    right,
                },
                span,
            ));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<ast::Expr<'a>, Error> {
        if ident_is(self.stream.peek(), "not") {
            let span = self.stream.peek_span();
            self.stream.next();
            let expr = self.parse_not()?;
            return Ok(ast::Expr::UnaryOp(Spanned::new(
                ast::UnaryOp {
                    op: ast::UnaryOpKind::Not,
                    expr,
                },
                span,
            )));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.stream.peek() {
                Some(Token::Eq) => Some(ast::BinOpKind::Eq),
                Some(Token::Ne) => Some(ast::BinOpKind::Ne),
                Some(Token::Lt) => Some(ast::BinOpKind::Lt),
                Some(Token::Lte) => Some(ast::BinOpKind::Lte),
                Some(Token::Gt) => Some(ast::BinOpKind::Gt),
                Some(Token::Gte) => Some(ast::BinOpKind::Gte),
                Some(Token::Ident("in")) => Some(ast::BinOpKind::In),
                _ => None,
            };
            if let Some(op) = op {
                let span = self.stream.peek_span();
                self.stream.next();
                let right = self.parse_concat()?;
                left = ast::Expr::BinOp(Spanned::new(ast::BinOp { op, left, right }, span));
                continue;
            }
            if ident_is(self.stream.peek(), "not") {
                // lookahead for `not in`
                let save = self.stream.pos;
                self.stream.next();
                if ident_is(self.stream.peek(), "in") {
                    let span = self.stream.peek_span();
                    self.stream.next();
                    let right = self.parse_concat()?;
                    left = ast::Expr::BinOp(Spanned::new(
                        ast::BinOp {
                            op: ast::BinOpKind::NotIn,
                            left,
                            right,
                        },
                        span,
                    ));
                    continue;
                }
                self.stream.pos = save;
                break;
            }
            if ident_is(self.stream.peek(), "is") {
                let span = self.stream.peek_span();
                self.stream.next();
                left = self.parse_is_test(left, span)?;
                continue;
            }
            break;
        }
        Ok(left)
    }

    fn parse_is_test(&mut self, expr: ast::Expr<'a>, span: Span) -> Result<ast::Expr<'a>, Error> {
        let negated = if ident_is(self.stream.peek(), "not") {
            self.stream.next();
            true
        } else {
            false
        };
        let name = expect_token!(self.stream, Token::Ident(n) => n, "test name");
        let args = if matches_tok!(self.stream, Token::ParenOpen) {
            self.stream.next();
            let (args, _kwargs) = self.parse_call_args()?;
            args
        } else if !matches!(
            self.stream.peek(),
            Some(Token::BlockEnd) | Some(Token::VariableEnd) | None
        ) && !ident_is(self.stream.peek(), "and")
            && !ident_is(self.stream.peek(), "or")
            && !ident_is(self.stream.peek(), "else")
            && !ident_is(self.stream.peek(), "if")
        {
            vec![self.parse_concat()?]
        } else {
            Vec::new()
        };
        Ok(ast::Expr::Test(Spanned::new(
            ast::Test {
                name,
                expr,
                args,
                negated,
            },
            span,
        )))
    }

    fn parse_concat(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut left = self.parse_math1()?;
        while matches_tok!(self.stream, Token::Tilde) {
            let span = self.stream.peek_span();
            self.stream.next();
            let right = self.parse_math1()?;
            left = ast::Expr::BinOp(Spanned::new(
                ast::BinOp {
                    op: ast::BinOpKind::Concat,
                    left,
                    right,
                },
                span,
            ));
        }
        Ok(left)
    }

    fn parse_math1(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut left = self.parse_math2()?;
        loop {
            let op = match self.stream.peek() {
                Some(Token::Plus) => ast::BinOpKind::Add,
                Some(Token::Minus) => ast::BinOpKind::Sub,
                _ => break,
            };
            let span = self.stream.peek_span();
            self.stream.next();
            let right = self.parse_math2()?;
            left = ast::Expr::BinOp(Spanned::new(ast::BinOp { op, left, right }, span));
        }
        Ok(left)
    }

    fn parse_math2(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut left = self.parse_pow()?;
        loop {
            let op = match self.stream.peek() {
                Some(Token::Mul) => ast::BinOpKind::Mul,
                Some(Token::Div) => ast::BinOpKind::Div,
                Some(Token::FloorDiv) => ast::BinOpKind::FloorDiv,
                Some(Token::Mod) => ast::BinOpKind::Rem,
                _ => break,
            };
            let span = self.stream.peek_span();
            self.stream.next();
            let right = self.parse_pow()?;
            left = ast::Expr::BinOp(Spanned::new(ast::BinOp { op, left, right }, span));
        }
        Ok(left)
    }

    fn parse_pow(&mut self) -> Result<ast::Expr<'a>, Error> {
        let left = self.parse_unary()?;
        if matches_tok!(self.stream, Token::Pow) {
            let span = self.stream.peek_span();
            self.stream.next();
            let right = self.parse_pow()?;
            return Ok(ast::Expr::BinOp(Spanned::new(
                ast::BinOp {
                    op: ast::BinOpKind::Pow,
                    left,
                    right,
                },
                span,
            )));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ast::Expr<'a>, Error> {
        let op = match self.stream.peek() {
            Some(Token::Minus) => Some(ast::UnaryOpKind::Neg),
            Some(Token::Plus) => Some(ast::UnaryOpKind::Pos),
            _ => None,
        };
        if let Some(op) = op {
            let span = self.stream.peek_span();
            self.stream.next();
            let expr = self.parse_unary()?;
            return Ok(ast::Expr::UnaryOp(Spanned::new(
                ast::UnaryOp { op, expr },
                span,
            )));
        }
        self.parse_filter_expr()
    }

    fn parse_filter_expr(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut expr = self.parse_primary_suffixed()?;
        loop {
            if skip_tok!(self.stream, Token::Pipe) {
                let span = self.stream.peek_span();
                let name = expect_token!(self.stream, Token::Ident(n) => n, "filter name");
                let (args, kwargs) = if skip_tok!(self.stream, Token::ParenOpen) {
                    self.parse_call_args()?
                } else {
                    (Vec::new(), Vec::new())
                };
                expr = ast::Expr::Filter(Spanned::new(
                    ast::Filter {
                        name,
                        expr,
                        args,
                        kwargs,
                    },
                    span,
                ));
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn parse_primary_suffixed(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.stream.peek() {
                Some(Token::Dot) => {
                    let span = self.stream.peek_span();
                    self.stream.next();
                    let name = expect_token!(self.stream, Token::Ident(n) => n, "attribute name");
                    expr = ast::Expr::GetAttr(Spanned::new(ast::GetAttr { expr, name }, span));
                }
                Some(Token::BracketOpen) => {
                    let span = self.stream.peek_span();
                    self.stream.next();
                    expr = self.parse_subscript(expr, span)?;
                }
                Some(Token::ParenOpen) => {
                    let span = self.stream.peek_span();
                    self.stream.next();
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = ast::Expr::Call(Spanned::new(ast::Call { expr, args, kwargs }, span));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_subscript(&mut self, expr: ast::Expr<'a>, span: Span) -> Result<ast::Expr<'a>, Error> {
        // Either `[index]` or a slice `[start:stop:step]` where each part
        // is optional.
        let mut start = None;
        if !matches_tok!(self.stream, Token::Colon) {
            start = Some(self.parse_expr()?);
        }
        if !matches_tok!(self.stream, Token::Colon) {
            expect_token!(self.stream, Token::BracketClose, "]");
            return Ok(ast::Expr::GetItem(Spanned::new(
                ast::GetItem {
                    expr,
                    subscript: start.expect("non-slice subscript always has a start"),
                },
                span,
            )));
        }
        self.stream.next();
        let mut stop = None;
        if !matches_tok!(self.stream, Token::Colon) && !matches_tok!(self.stream, Token::BracketClose) {
            stop = Some(self.parse_expr()?);
        }
        let mut step = None;
        if skip_tok!(self.stream, Token::Colon) && !matches_tok!(self.stream, Token::BracketClose) {
            step = Some(self.parse_expr()?);
        }
        expect_token!(self.stream, Token::BracketClose, "]");
        Ok(ast::Expr::Slice(Spanned::new(
            ast::Slice {
                expr,
                start,
                stop,
                step,
            },
            span,
        )))
    }

    fn parse_call_args(&mut self) -> Result<(Vec<ast::Expr<'a>>, Vec<(&'a str, ast::Expr<'a>)>), Error> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !matches_tok!(self.stream, Token::ParenClose) {
            if let (Some(Token::Ident(name)), Some(Token::Assign)) =
                (self.stream.peek(), self.stream.tokens.get(self.stream.pos + 1).map(|(t, _)| t))
            {
                let name = *name;
                self.stream.next();
                self.stream.next();
                let value = self.parse_expr()?;
                kwargs.push((name, value));
            } else {
                args.push(self.parse_expr()?);
            }
            if !skip_tok!(self.stream, Token::Comma) {
                break;
            }
        }
        expect_token!(self.stream, Token::ParenClose, ")");
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> Result<ast::Expr<'a>, Error> {
        let span = self.stream.peek_span();
        match self.stream.next() {
            Some((Token::Ident("true" | "True"), _)) => Ok(make_const(Value::from(true), span)),
            Some((Token::Ident("false" | "False"), _)) => Ok(make_const(Value::from(false), span)),
            Some((Token::Ident("none" | "None"), _)) => Ok(make_const(Value::Nil, span)),
            Some((Token::Ident("self"), _)) => Ok(ast::Expr::Var(Spanned::new(
                ast::Var { id: "self" },
                span,
            ))),
            Some((Token::Ident(name), _)) if name == "super" && !matches_tok!(self.stream, Token::ParenOpen) => {
                Ok(ast::Expr::Super(span))
            }
            Some((Token::Ident(name), _)) => Ok(ast::Expr::Var(Spanned::new(ast::Var { id: name }, span))),
            Some((Token::Int(v), _)) => Ok(make_const(Value::from(v), span)),
            Some((Token::Float(v), _)) => Ok(make_const(Value::from(v), span)),
            Some((Token::Str(s), _)) => Ok(make_const(Value::from(s.into_owned()), span)),
            Some((Token::ParenOpen, _)) => self.parse_tuple_or_paren(span),
            Some((Token::BracketOpen, _)) => self.parse_list_or_comprehension(span),
            Some((Token::BraceOpen, _)) => self.parse_map_or_set(span),
            Some((tok, _)) => Err(unexpected(tok, "expression")),
            None => Err(unexpected("end of input", "expression")),
        }
    }

    fn parse_tuple_or_paren(&mut self, span: Span) -> Result<ast::Expr<'a>, Error> {
        if skip_tok!(self.stream, Token::ParenClose) {
            return Ok(ast::Expr::Tuple(Spanned::new(
                ast::TupleLit { items: Vec::new() },
                span,
            )));
        }
        let first = self.parse_expr()?;
        if matches_tok!(self.stream, Token::ParenClose) {
            self.stream.next();
            return Ok(first);
        }
        let mut items = vec![first];
        let mut trailing_comma = false;
        while skip_tok!(self.stream, Token::Comma) {
            if matches_tok!(self.stream, Token::ParenClose) {
                trailing_comma = true;
                break;
            }
            items.push(self.parse_expr()?);
        }
        let _ = trailing_comma;
        expect_token!(self.stream, Token::ParenClose, ")");
        Ok(ast::Expr::Tuple(Spanned::new(ast::TupleLit { items }, span)))
    }

    fn parse_list_or_comprehension(&mut self, span: Span) -> Result<ast::Expr<'a>, Error> {
        if skip_tok!(self.stream, Token::BracketClose) {
            return Ok(ast::Expr::List(Spanned::new(
                ast::ListLit { items: Vec::new() },
                span,
            )));
        }
        let first = self.parse_expr()?;
        if ident_is(self.stream.peek(), "for") {
            let (target, iter, filter) = self.parse_comprehension_tail()?;
            expect_token!(self.stream, Token::BracketClose, "]");
            return Ok(ast::Expr::Comprehension(Spanned::new(
                ast::Comprehension {
                    kind: ast::ComprehensionKind::List,
                    target,
                    iter,
                    filter,
                    key: None,
                    element: first,
                },
                span,
            )));
        }
        let mut items = vec![first];
        while skip_tok!(self.stream, Token::Comma) {
            if matches_tok!(self.stream, Token::BracketClose) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        expect_token!(self.stream, Token::BracketClose, "]");
        Ok(ast::Expr::List(Spanned::new(ast::ListLit { items }, span)))
    }

    fn parse_comprehension_tail(
        &mut self,
    ) -> Result<(ast::AssignTarget<'a>, ast::Expr<'a>, Option<ast::Expr<'a>>), Error> {
        self.stream.next(); // `for`
        let target = self.parse_assign_target()?;
        if !ident_is(self.stream.peek(), "in") {
            syntax_error!("expected 'in' in comprehension");
        }
        self.stream.next();
        let iter = self.parse_or()?;
        let filter = if ident_is(self.stream.peek(), "if") {
            self.stream.next();
            Some(self.parse_or()?)
        } else {
            None
        };
        Ok((target, iter, filter))
    }

    fn parse_map_or_set(&mut self, span: Span) -> Result<ast::Expr<'a>, Error> {
        if skip_tok!(self.stream, Token::BraceClose) {
            return Ok(ast::Expr::Map(Spanned::new(
                ast::MapLit {
                    keys: Vec::new(),
                    values: Vec::new(),
                },
                span,
            )));
        }
        let first_key = self.parse_expr()?;
        if skip_tok!(self.stream, Token::Colon) {
            let first_value = self.parse_expr()?;
            if ident_is(self.stream.peek(), "for") {
                let (target, iter, filter) = self.parse_comprehension_tail()?;
                expect_token!(self.stream, Token::BraceClose, "}");
                return Ok(ast::Expr::Comprehension(Spanned::new(
                    ast::Comprehension {
                        kind: ast::ComprehensionKind::Dict,
                        target,
                        iter,
                        filter,
                        key: Some(first_key),
                        element: first_value,
                    },
                    span,
                )));
            }
            let mut keys = vec![first_key];
            let mut values = vec![first_value];
            while skip_tok!(self.stream, Token::Comma) {
                if matches_tok!(self.stream, Token::BraceClose) {
                    break;
                }
                keys.push(self.parse_expr()?);
                expect_token!(self.stream, Token::Colon, ":");
                values.push(self.parse_expr()?);
            }
            expect_token!(self.stream, Token::BraceClose, "}");
            return Ok(ast::Expr::Map(Spanned::new(ast::MapLit { keys, values }, span)));
        }
        // set literal / set comprehension
        if ident_is(self.stream.peek(), "for") {
            let (target, iter, filter) = self.parse_comprehension_tail()?;
            expect_token!(self.stream, Token::BraceClose, "}");
            return Ok(ast::Expr::Comprehension(Spanned::new(
                ast::Comprehension {
                    kind: ast::ComprehensionKind::Set,
                    target,
                    iter,
                    filter,
                    key: None,
                    element: first_key,
                },
                span,
            )));
        }
        let mut items = vec![first_key];
        while skip_tok!(self.stream, Token::Comma) {
            if matches_tok!(self.stream, Token::BraceClose) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        expect_token!(self.stream, Token::BraceClose, "}");
        Ok(ast::Expr::SetLit(Spanned::new(
            ast::SetLitExpr { items },
            span,
        )))
    }
}

fn make_const(value: Value, span: Span) -> ast::Expr<'static> {
    ast::Expr::Const(Spanned::new(ast::Const { value }, span))
}

/// Parses a full template body (used for `{% extends %}` targets too, since
/// they are just templates parsed the same way).
pub fn parse<'s>(source: &'s str, cfg: &LexerConfig) -> Result<ast::Template<'s>, Error> {
    let preprocessed = crate::whitespace::preprocess(source, cfg);
    let leaked: &'s str = if preprocessed == source {
        source
    } else {
        Box::leak(preprocessed.into_boxed_str())
    };
    let tokens = lexer::lex(leaked, cfg)?;
    let mut parser = Parser::new(tokens);
    let children = parser.parse_statements(&[])?;
    parser.stream.expect_eof()?;
    Ok(ast::Template { children })
}

/// Parses a standalone expression, used by `Environment::compile_expression`.
pub fn parse_expr(source: &str, cfg: &LexerConfig) -> Result<ast::Expr<'static>, Error> {
    let leaked: &'static str = Box::leak(source.to_string().into_boxed_str());
    let tokens = lexer::lex(leaked, cfg)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    parser.stream.expect_eof()?;
    Ok(expr)
}
