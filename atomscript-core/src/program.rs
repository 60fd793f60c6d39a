//! The compiled program artifact.
//!
//! A program is an ordered array of compiled statements, each carrying its
//! token array, source line, source character range, and (for flow
//! commands) an explicit [`Link`] into the statement arena. Function,
//! `parallel`, and `try` bodies are sliced out into standalone
//! [`FunctionUnit`]s whose internal links are relative to the unit's own
//! start.
//!
//! The program renders back to equivalent source text ([`CompiledProgram::render`]);
//! recompiling the rendering yields the same command kinds and linkage.

use std::collections::HashMap;

use crate::lexer::decode_seqcode;
use crate::token::{Span, Token, TokenKind};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Flow linkage
// ---------------------------------------------------------------------------

/// Resolved control-flow linkage, indexed into the owning statement array.
///
/// This replaces the original scheme of burying signed statement indices
/// in token integer fields: the graph is explicit, and the "patch forward
/// reference" step writes these fields as blocks close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// `if`/`elseif`: `next` is the next branch (or the `end`) taken when
    /// the condition is false; `end` closes the chain.
    If { next: usize, end: usize },
    /// `else`: only the chain end.
    Else { end: usize },
    /// `for`/`while` head; `end` is the matching loop-end statement.
    LoopHead { end: usize },
    /// Loop end; `head` points back at the loop head (the 2-cycle).
    LoopEnd { head: usize },
    /// `end if` / `end switch` / `end function` / `end try`.
    BlockEnd { head: usize },
    /// `break [N]`: jump past the statement at `exit`.
    Break { exit: usize },
    /// `continue [N]`: jump to the loop-end statement at `tail`.
    Continue { tail: usize },
    /// `switch` head.
    Switch { end: usize },
    /// `case`/`default`: `next` is the following branch (or the end).
    Case { next: usize, end: usize },
    /// `try` statement; `unit` is the index of its detached body.
    Try { unit: usize },
    /// `catch` inside a try unit.
    Catch { end: usize },
    /// `function`/`parallel` definition; `unit` is the detached body.
    Function { unit: usize },
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// One compiled statement: a token array plus source metadata and linkage.
#[derive(Debug, Clone)]
pub struct Statement {
    /// The compiled tokens; the first token is the command.
    pub tokens: Vec<Token>,
    /// 1-based source line.
    pub line: u32,
    /// Source character range.
    pub span: Span,
    /// Flow linkage, for flow commands.
    pub link: Option<Link>,
}

impl Statement {
    /// The command kind of this statement.
    #[must_use]
    pub fn command_kind(&self) -> Option<TokenKind> {
        self.tokens.first().map(|t| t.kind)
    }
}

// ---------------------------------------------------------------------------
// Detached units (functions, parallel blocks, try bodies)
// ---------------------------------------------------------------------------

/// A detached, standalone-callable command range.
#[derive(Debug, Clone)]
pub struct FunctionUnit {
    /// Function name (lowercase); empty for `try` units.
    pub name: String,
    /// Formal parameter names.
    pub params: Vec<String>,
    /// The body; links are relative to this array.
    pub body: Vec<Statement>,
    /// For `try` units: index of the `catch` statement in `body`.
    pub catch_index: Option<usize>,
    /// `parallel` rather than `function`.
    pub is_parallel: bool,
    /// A `try` body rather than a callable function.
    pub is_try: bool,
}

// ---------------------------------------------------------------------------
// CompiledProgram
// ---------------------------------------------------------------------------

/// The product of one compile call. Immutable once compilation succeeds.
#[derive(Debug, Clone, Default)]
pub struct CompiledProgram {
    /// Top-level statements.
    pub statements: Vec<Statement>,
    /// Detached function/parallel/try units.
    pub units: Vec<FunctionUnit>,
    /// Function name (lowercase) to unit index.
    pub functions: HashMap<String, usize>,
    /// Locally declared variable names, in declaration order.
    pub local_vars: Vec<String>,
}

impl CompiledProgram {
    /// Source line of statement `i` (the parallel-array view).
    #[must_use]
    pub fn line_of(&self, i: usize) -> u32 {
        self.statements.get(i).map_or(0, |s| s.line)
    }

    /// Source character range of statement `i`.
    #[must_use]
    pub fn span_of(&self, i: usize) -> Span {
        self.statements.get(i).map_or_else(Span::default, |s| s.span)
    }

    /// Render the program back to source text.
    ///
    /// The rendering is canonical, not byte-identical to the input:
    /// implicit assignments print as `set`, one-line bodies print with
    /// explicit `end` markers. Recompiling it yields the same command
    /// kinds and flow linkage.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_statements(&mut out, &self.statements, &self.units, 0);
        out
    }
}

// ---------------------------------------------------------------------------
// Source rendering
// ---------------------------------------------------------------------------

fn render_statements(out: &mut String, stmts: &[Statement], units: &[FunctionUnit], indent: usize) {
    for stmt in stmts {
        let kind = stmt.command_kind();
        let this_indent = match kind {
            Some(
                TokenKind::ElseIf
                | TokenKind::Else
                | TokenKind::Case
                | TokenKind::Default
                | TokenKind::Catch
                | TokenKind::End,
            ) => indent.saturating_sub(1),
            _ => indent,
        };
        for _ in 0..this_indent {
            out.push_str("  ");
        }
        render_tokens(out, &stmt.tokens);
        out.push('\n');

        // detached bodies re-expand inline; they carry their own `end`
        if matches!(
            kind,
            Some(TokenKind::Function | TokenKind::Parallel | TokenKind::Try)
        ) {
            if let Some(u) = stmt
                .tokens
                .first()
                .and_then(|t| units.get(t.intval as usize))
            {
                render_statements(out, &u.body, units, indent + 1);
            }
        }
    }
}

/// Tokens that glue onto the preceding text with no space.
const fn glues_left(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::PropGet
            | TokenKind::MethodCall
            | TokenKind::IndexOpen
            | TokenKind::IndexClose
            | TokenKind::ArrayClose
            | TokenKind::RightParen
            | TokenKind::Comma
            | TokenKind::RangeColon
            | TokenKind::MapColon
            | TokenKind::Semicolon
    )
}

/// Tokens after which the next token glues with no space.
const fn glues_right(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::PropGet
            | TokenKind::MethodCall
            | TokenKind::FuncCall
            | TokenKind::IndexOpen
            | TokenKind::ArrayOpen
            | TokenKind::LeftParen
            | TokenKind::UnaryMinus
            | TokenKind::Not
            | TokenKind::RangeColon
            | TokenKind::MapColon
    )
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Surface name for a command token kind.
#[must_use]
pub const fn command_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::If => "if",
        TokenKind::ElseIf => "elseif",
        TokenKind::Else => "else",
        TokenKind::For => "for",
        TokenKind::While => "while",
        TokenKind::Switch => "switch",
        TokenKind::Case => "case",
        TokenKind::Default => "default",
        TokenKind::Break => "break",
        TokenKind::Continue => "continue",
        TokenKind::End => "end",
        TokenKind::Function => "function",
        TokenKind::Parallel => "parallel",
        TokenKind::Try => "try",
        TokenKind::Catch => "catch",
        TokenKind::Return => "return",
        TokenKind::Set => "set",
        TokenKind::VarDecl => "var",
        TokenKind::Print => "print",
        TokenKind::Echo => "echo",
        TokenKind::Message => "message",
        TokenKind::ExprCommand => "",
        TokenKind::Select => "select",
        TokenKind::Display => "display",
        TokenKind::Hide => "hide",
        TokenKind::Color => "color",
        TokenKind::Load => "load",
        TokenKind::Zoom => "zoom",
        TokenKind::Center => "center",
        TokenKind::Rotate => "rotate",
        TokenKind::Translate => "translate",
        TokenKind::Delete => "delete",
        _ => "?",
    }
}

fn render_token(out: &mut String, tok: &Token) {
    match tok.kind {
        TokenKind::Integer => out.push_str(&tok.intval.to_string()),
        TokenKind::Decimal => {
            if let Some(Value::Float(f)) = tok.value {
                out.push_str(&Value::Float(f).to_string());
            }
        }
        TokenKind::BoolConst => out.push_str(if tok.intval != 0 { "true" } else { "false" }),
        TokenKind::StringLit => out.push_str(&escape_string(tok.text().unwrap_or(""))),
        TokenKind::ImpliedString => out.push_str(tok.text().unwrap_or("")),
        TokenKind::PointConst3 => {
            if let Some(Value::Point3(p)) = tok.value {
                out.push_str(&p.to_string());
            }
        }
        TokenKind::PointConst4 => {
            if let Some(Value::Point4(p)) = tok.value {
                out.push_str(&p.to_string());
            }
        }
        TokenKind::BitsetConst => {
            if let Some(Value::Bitset(bs)) = &tok.value {
                out.push_str(&bs.to_string());
            }
        }
        TokenKind::Identifier | TokenKind::PropertyName | TokenKind::NamedSet => {
            out.push_str(tok.text().unwrap_or("?"));
        }
        TokenKind::ObjectId => {
            out.push('$');
            out.push_str(tok.text().unwrap_or(""));
        }
        TokenKind::PropGet => {
            out.push_str(if tok.intval == 1 { ".." } else { "." });
            out.push_str(tok.text().unwrap_or(""));
        }
        TokenKind::MethodCall => {
            out.push('.');
            out.push_str(tok.text().unwrap_or(""));
        }
        TokenKind::FuncCall => out.push_str(tok.text().unwrap_or("")),
        // builders are re-synthesized on recompile
        TokenKind::ArrayBuild | TokenKind::MapBuild | TokenKind::PointBuild => {}
        TokenKind::SpecResName => out.push_str(tok.text().unwrap_or("*")),
        TokenKind::SpecResNum => out.push_str(&tok.intval.to_string()),
        TokenKind::SpecSeqCode => {
            let (num, ins) = decode_seqcode(tok.intval);
            out.push_str(&format!("{num}^{ins}"));
        }
        TokenKind::SpecSeqRange => {
            let hi = match tok.value {
                Some(Value::Int(hi)) => hi,
                _ => tok.intval,
            };
            out.push_str(&format!("{}-{hi}", tok.intval));
        }
        TokenKind::SpecChain => {
            out.push(':');
            out.push_str(tok.text().unwrap_or(""));
        }
        TokenKind::SpecAtom => {
            out.push('.');
            out.push_str(tok.text().unwrap_or(""));
        }
        TokenKind::SpecAltLoc => {
            out.push('%');
            out.push_str(tok.text().unwrap_or(""));
        }
        TokenKind::SpecModel => {
            out.push('/');
            out.push_str(&tok.intval.to_string());
        }
        TokenKind::End => {
            out.push_str("end ");
            out.push_str(tok.text().unwrap_or(""));
        }
        kind if kind.is_command() => out.push_str(command_name(kind)),
        kind => out.push_str(kind.symbol().unwrap_or("?")),
    }
}

fn render_tokens(out: &mut String, tokens: &[Token]) {
    let mut prev: Option<TokenKind> = None;
    for tok in tokens {
        // builders emit nothing; do not disturb spacing state
        if matches!(
            tok.kind,
            TokenKind::ArrayBuild | TokenKind::MapBuild | TokenKind::PointBuild
        ) {
            continue;
        }
        let need_space = match prev {
            None => false,
            Some(p) => {
                !(glues_right(p) || glues_left(tok.kind))
                    && !(matches!(p, TokenKind::ExprCommand))
            }
        };
        if need_space {
            out.push(' ');
        }
        render_token(out, tok);
        prev = Some(tok.kind);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(tokens: Vec<Token>) -> Statement {
        Statement {
            tokens,
            line: 1,
            span: Span::default(),
            link: None,
        }
    }

    #[test]
    fn renders_a_set_statement() {
        let s = stmt(vec![
            Token::new(TokenKind::Set),
            Token::ident("x"),
            Token::new(TokenKind::Assign),
            Token::int(TokenKind::Integer, 2),
            Token::new(TokenKind::Plus),
            Token::int(TokenKind::Integer, 3),
        ]);
        let p = CompiledProgram {
            statements: vec![s],
            ..CompiledProgram::default()
        };
        assert_eq!(p.render(), "set x = 2 + 3\n");
    }

    #[test]
    fn renders_strings_escaped() {
        let s = stmt(vec![
            Token::new(TokenKind::Print),
            Token::val(TokenKind::StringLit, Value::str("a\"b\n")),
        ]);
        let p = CompiledProgram {
            statements: vec![s],
            ..CompiledProgram::default()
        };
        assert_eq!(p.render(), "print \"a\\\"b\\n\"\n");
    }

    #[test]
    fn renders_selector_chains_glued() {
        let s = stmt(vec![
            Token::new(TokenKind::Print),
            Token::ident("a"),
            Token::val(TokenKind::PropGet, Value::str("size")),
        ]);
        let p = CompiledProgram {
            statements: vec![s],
            ..CompiledProgram::default()
        };
        assert_eq!(p.render(), "print a.size\n");
    }

    #[test]
    fn renders_index_brackets() {
        let s = stmt(vec![
            Token::new(TokenKind::Print),
            Token::ident("a"),
            Token::new(TokenKind::IndexOpen),
            Token::int(TokenKind::Integer, 1),
            Token::int(TokenKind::IndexClose, 1),
        ]);
        let p = CompiledProgram {
            statements: vec![s],
            ..CompiledProgram::default()
        };
        assert_eq!(p.render(), "print a[1]\n");
    }

    #[test]
    fn builders_are_silent() {
        let s = stmt(vec![
            Token::new(TokenKind::Set),
            Token::ident("a"),
            Token::new(TokenKind::Assign),
            Token::new(TokenKind::ArrayOpen),
            Token::int(TokenKind::Integer, 1),
            Token::new(TokenKind::Comma),
            Token::int(TokenKind::Integer, 2),
            Token::new(TokenKind::ArrayClose),
            Token::int(TokenKind::ArrayBuild, 2),
        ]);
        let p = CompiledProgram {
            statements: vec![s],
            ..CompiledProgram::default()
        };
        assert_eq!(p.render(), "set a = [1, 2]\n");
    }

    #[test]
    fn parallel_array_accessors() {
        let mut s = stmt(vec![Token::new(TokenKind::Print)]);
        s.line = 7;
        s.span = Span::new(10, 20);
        let p = CompiledProgram {
            statements: vec![s],
            ..CompiledProgram::default()
        };
        assert_eq!(p.line_of(0), 7);
        assert_eq!(p.span_of(0), Span::new(10, 20));
        assert_eq!(p.line_of(9), 0);
    }
}
