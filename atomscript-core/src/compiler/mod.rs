//! The flow-aware statement compiler.
//!
//! Pulls lexemes one statement at a time, classifies the command keyword,
//! rewrites implicit assignments into canonical `set` statements, runs the
//! expression compiler over math-bearing tails, and maintains the stack of
//! open control-flow constructs: patching each construct's [`Link`]s into
//! the statement arena as it closes.
//!
//! Statement boundaries: newline (unless brackets are open or an operator
//! dangles at end of line), an unescaped `;`, or the closing `}` of a
//! brace block. A flow command not followed by `{` takes exactly one body
//! statement; the implicit `end` is synthesized after it unless the next
//! statement continues the chain (`elseif`/`else`/`catch`) or is an
//! explicit `end`. Comments never terminate a body.

pub mod expr;
pub mod flow;

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::{CompileError, CompileErrorKind, DiagnosticsSink};
use crate::keywords::{self, attr, Keyword};
use crate::lexer::{encode_seqcode, ImpliedMode, LexError, LexKind, Lexeme, Lexer};
use crate::program::{CompiledProgram, FunctionUnit, Link, Statement};
use crate::token::{Span, Token, TokenKind};
use crate::value::Value;

use expr::{ExprError, RawTok};
use flow::{FlowContext, FlowKind};

/// Sequence-number value representing the `*^X` wildcard form.
pub const SEQ_WILDCARD: i32 = i32::MIN;

// ---------------------------------------------------------------------------
// Options and entry points
// ---------------------------------------------------------------------------

/// Options for one compile call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Tolerate unterminated strings; do not report to the sink.
    pub silent: bool,
    /// This compile is part of the predefined-variables bootstrap.
    pub predefining: bool,
    /// Emit per-statement trace events.
    pub debug_trace: bool,
    /// Syntax-only: the caller promises not to execute the result.
    pub check_only: bool,
}

/// Compile a script.
pub fn compile(source: &str, options: &CompileOptions) -> Result<CompiledProgram, CompileError> {
    compile_with_sink(source, options, None)
}

/// Compile a script, reporting any failure to `sink` (unless silent).
pub fn compile_with_sink(
    source: &str,
    options: &CompileOptions,
    mut sink: Option<&mut dyn DiagnosticsSink>,
) -> Result<CompiledProgram, CompileError> {
    let mut c = Compiler::new(source, options);
    match c.run() {
        Ok(()) => Ok(c.into_program()),
        Err(f) => {
            let err = CompileError {
                kind: f.kind,
                message: f.message,
                line: f.line,
                span: f.span,
                partial: Box::new(c.into_program()),
            };
            if !options.silent {
                if let Some(sink) = sink.as_deref_mut() {
                    sink.report(&err.diagnostic());
                }
            }
            Err(err)
        }
    }
}

/// Internal failure carrier; becomes a [`CompileError`] with the partial
/// program attached.
struct Failure {
    kind: CompileErrorKind,
    message: String,
    line: u32,
    span: Span,
}

impl Failure {
    fn new(kind: CompileErrorKind, message: impl Into<String>, line: u32, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
            span,
        }
    }
}

impl From<LexError> for Failure {
    fn from(e: LexError) -> Self {
        Self::new(e.kind, e.message, e.line, e.span)
    }
}

type CResult<T> = Result<T, Failure>;

// ---------------------------------------------------------------------------
// Compiler state
// ---------------------------------------------------------------------------

/// A statement output buffer: the main program, or one open detached unit.
struct Buffer {
    statements: Vec<Statement>,
    /// Unit metadata for function/parallel/try buffers.
    unit: Option<PendingUnit>,
}

struct PendingUnit {
    name: String,
    params: Vec<String>,
    is_parallel: bool,
    is_try: bool,
}

struct Compiler<'a> {
    lexer: Lexer,
    options: &'a CompileOptions,
    pushback: Vec<Lexeme>,
    buffers: Vec<Buffer>,
    flow: Vec<FlowContext>,
    units: Vec<FunctionUnit>,
    functions: HashMap<String, usize>,
    local_vars: Vec<String>,
    locals: HashSet<String>,
}

impl<'a> Compiler<'a> {
    fn new(source: &str, options: &'a CompileOptions) -> Self {
        Self {
            lexer: Lexer::new(source, options.silent),
            options,
            pushback: Vec::new(),
            buffers: vec![Buffer {
                statements: Vec::new(),
                unit: None,
            }],
            flow: Vec::new(),
            units: Vec::new(),
            functions: HashMap::new(),
            local_vars: Vec::new(),
            locals: HashSet::new(),
        }
    }

    fn into_program(mut self) -> CompiledProgram {
        // A failed compile may leave unit buffers open; fold them back so
        // the partial program still shows their statements.
        while self.buffers.len() > 1 {
            let buf = self.buffers.pop().expect("buffer stack");
            self.buffers[0].statements.extend(buf.statements);
        }
        let main = self.buffers.pop().expect("main buffer");
        CompiledProgram {
            statements: main.statements,
            units: self.units,
            functions: self.functions,
            local_vars: self.local_vars,
        }
    }

    // -- lexeme stream --

    fn next_lexeme(&mut self) -> CResult<Lexeme> {
        if let Some(lx) = self.pushback.pop() {
            return Ok(lx);
        }
        Ok(self.lexer.next()?)
    }

    fn push_back(&mut self, lx: Lexeme) {
        self.pushback.push(lx);
    }

    fn peek(&mut self) -> CResult<Lexeme> {
        let lx = self.next_lexeme()?;
        self.push_back(lx.clone());
        Ok(lx)
    }

    /// Peek at the next lexeme that is not a newline. The skipped
    /// newlines are discarded (only used at block boundaries).
    fn peek_past_newlines(&mut self) -> CResult<Lexeme> {
        loop {
            let lx = self.next_lexeme()?;
            if lx.kind == LexKind::Newline {
                continue;
            }
            self.push_back(lx.clone());
            return Ok(lx);
        }
    }

    // -- buffers and statements --

    fn buffer(&mut self) -> &mut Vec<Statement> {
        &mut self.buffers.last_mut().expect("buffer stack").statements
    }

    fn append(&mut self, tokens: Vec<Token>, line: u32, span: Span, link: Option<Link>) -> usize {
        let buf = self.buffer();
        let index = buf.len();
        if self.options.debug_trace {
            debug!(line, index, kind = ?tokens.first().map(|t| t.kind), "statement compiled");
        } else {
            trace!(line, index, "statement compiled");
        }
        self.buffers
            .last_mut()
            .expect("buffer stack")
            .statements
            .push(Statement {
                tokens,
                line,
                span,
                link,
            });
        index
    }

    fn set_link(&mut self, index: usize, link: Link) {
        if let Some(stmt) = self.buffer().get_mut(index) {
            stmt.link = Some(link);
        }
    }

    // -- main loop --

    fn run(&mut self) -> CResult<()> {
        loop {
            let lx = self.peek()?;
            match &lx.kind {
                LexKind::Eof => break,
                LexKind::Newline => {
                    self.next_lexeme()?;
                }
                LexKind::Symbolic(s) if s == ";" => {
                    self.next_lexeme()?;
                }
                LexKind::Symbolic(s) if s == "}" => {
                    self.next_lexeme()?;
                    self.close_brace(lx.line, lx.span)?;
                    self.auto_close_one_liners()?;
                }
                _ => {
                    self.statement()?;
                    self.auto_close_one_liners()?;
                }
            }
        }
        if let Some(ctx) = self.flow.last() {
            return Err(Failure::new(
                CompileErrorKind::MissingEnd,
                format!(
                    "missing end for `{}` opened at line {}",
                    ctx.kind.close_word(),
                    ctx.line
                ),
                ctx.line,
                Span::at(self.lexer.pos()),
            ));
        }
        Ok(())
    }

    // -- statement dispatch --

    fn statement(&mut self) -> CResult<()> {
        let first = self.next_lexeme()?;
        let line = first.line;

        if let LexKind::Symbolic(name) = &first.kind {
            let shadowed = self.locals.contains(&name.to_ascii_lowercase());
            if !shadowed {
                if let Some(kw) = keywords::lookup(name) {
                    if kw.kind.is_command() {
                        return self.command_statement(kw, &first);
                    }
                }
            }
        }

        // no recognized command keyword: implicit assignment or a
        // function-call statement
        self.push_back(first);
        let (raw, span) = self.collect_raw(false)?;
        self.implicit_statement(raw, line, span)
    }

    /// `name = expr`, `name += expr`, `name++`, `a[i] = expr`,
    /// `{sel}.prop = expr`, or a bare call `f(…)`.
    fn implicit_statement(&mut self, raw: Vec<RawTok>, line: u32, span: Span) -> CResult<()> {
        if raw.is_empty() {
            return Ok(());
        }
        if let Some(tokens) = self.build_assignment(TokenKind::Set, &raw, line)? {
            self.append(tokens, line, span, None);
            return Ok(());
        }
        // function-call statement
        if raw.len() >= 2
            && matches!(
                raw[0].0.kind,
                TokenKind::Identifier | TokenKind::PropertyName
            )
            && raw[1].0.kind == TokenKind::LeftParen
        {
            let mut tokens = vec![Token::new(TokenKind::ExprCommand)];
            tokens.extend(self.compile_math(&raw, line)?);
            self.append(tokens, line, span, None);
            return Ok(());
        }
        Err(Failure::new(
            CompileErrorKind::UnexpectedToken,
            "not a command, assignment, or call",
            line,
            raw[0].1,
        ))
    }

    /// Try to interpret `raw` as an assignment; returns the compiled
    /// statement tokens if a top-level assignment operator is present.
    fn build_assignment(
        &mut self,
        head: TokenKind,
        raw: &[RawTok],
        line: u32,
    ) -> CResult<Option<Vec<Token>>> {
        let mut depth = 0i32;
        let mut split = None;
        for (i, (tok, _)) in raw.iter().enumerate() {
            match tok.kind {
                TokenKind::LeftParen | TokenKind::LeftSquare | TokenKind::LeftBrace => depth += 1,
                TokenKind::RightParen | TokenKind::RightSquare | TokenKind::RightBrace => {
                    depth -= 1;
                }
                TokenKind::Assign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::TimesAssign
                | TokenKind::DivideAssign
                | TokenKind::PlusPlus
                | TokenKind::MinusMinus
                    if depth == 0 =>
                {
                    split = Some((i, tok.kind));
                    break;
                }
                _ => {}
            }
        }
        let Some((at, op)) = split else {
            return Ok(None);
        };

        let target_raw = &raw[..at];
        let target = self
            .compile_target_raw(target_raw, line)?;

        // compound assignments expand to `target = target <op> ( rhs )`
        let rhs: Vec<Token> = match op {
            TokenKind::Assign => {
                let rhs_raw = &raw[at + 1..];
                if rhs_raw.is_empty() {
                    return Err(Failure::new(
                        CompileErrorKind::InvalidExpression,
                        "missing value after `=`",
                        line,
                        raw[at].1,
                    ));
                }
                self.compile_math(rhs_raw, line)?
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                if at + 1 != raw.len() {
                    return Err(Failure::new(
                        CompileErrorKind::UnexpectedToken,
                        "tokens after `++`/`--`",
                        line,
                        raw[at].1,
                    ));
                }
                let mut synth: Vec<RawTok> = target_raw.to_vec();
                synth.push((
                    Token::new(if op == TokenKind::PlusPlus {
                        TokenKind::Plus
                    } else {
                        TokenKind::Minus
                    }),
                    raw[at].1,
                ));
                synth.push((Token::int(TokenKind::Integer, 1), raw[at].1));
                self.compile_math(&synth, line)?
            }
            _ => {
                let bin = match op {
                    TokenKind::PlusAssign => TokenKind::Plus,
                    TokenKind::MinusAssign => TokenKind::Minus,
                    TokenKind::TimesAssign => TokenKind::Times,
                    _ => TokenKind::Divide,
                };
                let mut synth: Vec<RawTok> = target_raw.to_vec();
                synth.push((Token::new(bin), raw[at].1));
                synth.push((Token::new(TokenKind::LeftParen), raw[at].1));
                synth.extend_from_slice(&raw[at + 1..]);
                synth.push((Token::new(TokenKind::RightParen), raw[at].1));
                self.compile_math(&synth, line)?
            }
        };

        let mut tokens = vec![Token::new(head)];
        tokens.extend(target);
        tokens.push(Token::new(TokenKind::Assign));
        tokens.extend(rhs);
        Ok(Some(tokens))
    }

    // -- command statements --

    fn command_statement(&mut self, kw: &'static Keyword, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        if kw.kind.is_flow_command() {
            return self.flow_statement(kw.kind, first);
        }

        if kw.has(attr::IMPLIED) {
            return self.implied_statement(kw.kind, first);
        }

        // settable keyword at statement head: `zoom = 200`
        if kw.has(attr::SETTABLE) {
            let nxt = self.peek()?;
            if nxt.is_sym("=") {
                self.next_lexeme()?;
                let (rhs_raw, span) = self.collect_raw(false)?;
                let rhs = self.compile_math(&rhs_raw, line)?;
                if rhs.is_empty() {
                    return Err(Failure::new(
                        CompileErrorKind::InvalidExpression,
                        "missing value after `=`",
                        line,
                        nxt.span,
                    ));
                }
                let mut tokens = vec![
                    Token::new(TokenKind::Set),
                    Token::val(TokenKind::Identifier, Value::str(kw.name)),
                    Token::new(TokenKind::Assign),
                ];
                tokens.extend(rhs);
                self.append(tokens, line, first.span.union(span), None);
                return Ok(());
            }
        }

        match kw.kind {
            TokenKind::Set => {
                let (raw, span) = self.collect_raw(false)?;
                match self.build_assignment(TokenKind::Set, &raw, line)? {
                    Some(tokens) => {
                        self.append(tokens, line, first.span.union(span), None);
                        Ok(())
                    }
                    None => Err(Failure::new(
                        CompileErrorKind::BadArgument,
                        "set needs `target = value`",
                        line,
                        first.span,
                    )),
                }
            }
            TokenKind::VarDecl => self.var_statement(first),
            kind => {
                let (raw, span) = self.collect_raw(false)?;
                let compiled = if kw.has(attr::MATH) {
                    if matches!(
                        kind,
                        TokenKind::Select
                            | TokenKind::Display
                            | TokenKind::Hide
                            | TokenKind::Delete
                    ) {
                        self.compile_selection(&raw, line)?
                    } else {
                        self.compile_math(&raw, line)?
                    }
                } else {
                    Vec::new()
                };
                let mut tokens = vec![Token::new(kind)];
                tokens.extend(compiled);
                self.append(tokens, line, first.span.union(span), None);
                Ok(())
            }
        }
    }

    /// `var name [= expr]`: declares a local; the name shadows keywords
    /// from here on.
    fn var_statement(&mut self, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        let (raw, span) = self.collect_raw(false)?;
        let Some((name_tok, name_span)) = raw.first() else {
            return Err(Failure::new(
                CompileErrorKind::InvalidDeclaration,
                "var needs a name",
                line,
                first.span,
            ));
        };
        let Some(name) = name_tok.text().map(str::to_owned) else {
            return Err(Failure::new(
                CompileErrorKind::InvalidDeclaration,
                "var needs a simple name",
                line,
                *name_span,
            ));
        };
        if !matches!(
            name_tok.kind,
            TokenKind::Identifier | TokenKind::PropertyName | TokenKind::NamedSet
        ) {
            return Err(Failure::new(
                CompileErrorKind::InvalidDeclaration,
                format!("`{name}` cannot be declared"),
                line,
                *name_span,
            ));
        }
        self.declare_local(&name);

        let tokens = if raw.len() == 1 {
            vec![
                Token::new(TokenKind::VarDecl),
                Token::val(TokenKind::Identifier, Value::str(&name)),
            ]
        } else {
            match self.build_assignment(TokenKind::VarDecl, &raw, line)? {
                Some(tokens) => tokens,
                None => {
                    return Err(Failure::new(
                        CompileErrorKind::InvalidDeclaration,
                        "var needs `name = value`",
                        line,
                        *name_span,
                    ))
                }
            }
        };
        self.append(tokens, line, first.span.union(span), None);
        Ok(())
    }

    fn declare_local(&mut self, name: &str) {
        let lower = name.to_ascii_lowercase();
        if self.locals.insert(lower.clone()) {
            self.local_vars.push(lower);
        }
    }

    /// Commands with free-text arguments (`echo`, `message`, `load`,
    /// `color`).
    fn implied_statement(&mut self, kind: TokenKind, first: &Lexeme) -> CResult<()> {
        let mode = match kind {
            TokenKind::Echo | TokenKind::Message => ImpliedMode::Line,
            _ => ImpliedMode::Word,
        };
        let mut tokens = vec![Token::new(kind)];
        let mut span = first.span;
        loop {
            // statements interrupted at a block boundary keep the `}` for
            // the main loop
            if let Some(lx) = self.pushback.last() {
                if lx.is_sym("}") {
                    break;
                }
            }
            let lx = if self.pushback.is_empty() {
                self.lexer.next_implied(mode)?
            } else {
                self.next_lexeme()?
            };
            match lx.kind {
                LexKind::Eof | LexKind::Newline => break,
                LexKind::Symbolic(ref s) if s == ";" => break,
                LexKind::Symbolic(ref s) if s == "}" => {
                    self.push_back(lx.clone());
                    break;
                }
                LexKind::Str(ref s) => {
                    span = span.union(lx.span);
                    tokens.push(Token::val(TokenKind::StringLit, Value::str(s)));
                }
                LexKind::ImpliedString(ref s) if s.is_empty() => break,
                LexKind::ImpliedString(ref s) => {
                    span = span.union(lx.span);
                    tokens.push(Token::val(TokenKind::ImpliedString, Value::str(s)));
                }
                _ => {
                    span = span.union(lx.span);
                    let raw = self.lex_to_raw(lx);
                    tokens.push(raw.0);
                }
            }
        }
        self.append(tokens, first.line, span, None);
        Ok(())
    }

    // -- flow statements --

    fn flow_statement(&mut self, kind: TokenKind, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        match kind {
            TokenKind::If | TokenKind::While | TokenKind::Switch => {
                let (cond_raw, span) = self.paren_group(line)?;
                let cond = self.compile_math(&cond_raw, line)?;
                if cond.is_empty() {
                    return Err(Failure::new(
                        CompileErrorKind::InvalidExpression,
                        "missing condition",
                        line,
                        first.span,
                    ));
                }
                let mut tokens = vec![Token::new(kind), Token::new(TokenKind::LeftParen)];
                tokens.extend(cond);
                tokens.push(Token::new(TokenKind::RightParen));
                let idx = self.append(tokens, line, first.span.union(span), None);
                let flow_kind = match kind {
                    TokenKind::If => FlowKind::If,
                    TokenKind::While => FlowKind::While,
                    _ => FlowKind::Switch,
                };
                self.flow.push(FlowContext::new(flow_kind, idx, line));
                self.detect_body_style()?;
                Ok(())
            }
            TokenKind::ElseIf => {
                self.expect_chain(FlowKind::If, "elseif without if", line, first.span)?;
                let (cond_raw, span) = self.paren_group(line)?;
                let cond = self.compile_math(&cond_raw, line)?;
                let mut tokens = vec![Token::new(TokenKind::ElseIf), Token::new(TokenKind::LeftParen)];
                tokens.extend(cond);
                tokens.push(Token::new(TokenKind::RightParen));
                let idx = self.append(tokens, line, first.span.union(span), None);
                let ctx = self.flow.last_mut().expect("flow context");
                ctx.branches.push(idx);
                ctx.brace = false;
                ctx.one_line = false;
                self.detect_body_style()?;
                Ok(())
            }
            TokenKind::Else => {
                self.expect_chain(FlowKind::If, "else without if", line, first.span)?;
                let idx = self.append(vec![Token::new(TokenKind::Else)], line, first.span, None);
                let ctx = self.flow.last_mut().expect("flow context");
                ctx.branches.push(idx);
                ctx.final_branch_seen = true;
                ctx.brace = false;
                ctx.one_line = false;
                self.detect_body_style()?;
                Ok(())
            }
            TokenKind::For => self.for_statement(first),
            TokenKind::Case | TokenKind::Default => self.case_statement(kind, first),
            TokenKind::Break | TokenKind::Continue => self.break_statement(kind, first),
            TokenKind::Function | TokenKind::Parallel => self.function_statement(kind, first),
            TokenKind::Try => {
                let idx = self.append(vec![Token::new(TokenKind::Try)], line, first.span, None);
                self.flow.push(FlowContext::new(FlowKind::Try, idx, line));
                self.buffers.push(Buffer {
                    statements: Vec::new(),
                    unit: Some(PendingUnit {
                        name: String::new(),
                        params: Vec::new(),
                        is_parallel: false,
                        is_try: true,
                    }),
                });
                self.detect_body_style()?;
                Ok(())
            }
            TokenKind::Catch => self.catch_statement(first),
            TokenKind::Return => {
                let (raw, span) = self.collect_raw(false)?;
                let mut tokens = vec![Token::new(TokenKind::Return)];
                tokens.extend(self.compile_math(&raw, line)?);
                self.append(tokens, line, first.span.union(span), None);
                Ok(())
            }
            TokenKind::End => self.end_statement(first),
            other => Err(Failure::new(
                CompileErrorKind::UnexpectedToken,
                format!("unexpected flow keyword {other:?}"),
                line,
                first.span,
            )),
        }
    }

    /// The innermost context must match `kind` for a chain continuation.
    fn expect_chain(
        &mut self,
        kind: FlowKind,
        msg: &str,
        line: u32,
        span: Span,
    ) -> CResult<()> {
        match self.flow.last() {
            Some(ctx) if ctx.kind == kind && !ctx.final_branch_seen => Ok(()),
            _ => Err(Failure::new(CompileErrorKind::UnmatchedEnd, msg, line, span)),
        }
    }

    /// `for (init; cond; incr)`.
    fn for_statement(&mut self, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        let (raw, span) = self.paren_group(line)?;

        // split into three clauses on top-level `;`
        let mut clauses: Vec<Vec<RawTok>> = vec![Vec::new()];
        let mut depth = 0i32;
        for rt in raw {
            match rt.0.kind {
                TokenKind::LeftParen | TokenKind::LeftSquare | TokenKind::LeftBrace => depth += 1,
                TokenKind::RightParen | TokenKind::RightSquare | TokenKind::RightBrace => {
                    depth -= 1;
                }
                TokenKind::Semicolon if depth == 0 => {
                    clauses.push(Vec::new());
                    continue;
                }
                _ => {}
            }
            clauses.last_mut().expect("clause").push(rt);
        }
        if clauses.len() != 3 {
            return Err(Failure::new(
                CompileErrorKind::BadArgument,
                "for needs `(init; condition; increment)`",
                line,
                first.span,
            ));
        }
        let incr_raw = clauses.pop().expect("incr");
        let cond_raw = clauses.pop().expect("cond");
        let init_raw = clauses.pop().expect("init");

        let init = self.for_clause(&init_raw, line)?;
        let cond = self.compile_math(&cond_raw, line)?;
        let incr = self.for_clause(&incr_raw, line)?;

        let mut tokens = vec![Token::new(TokenKind::For), Token::new(TokenKind::LeftParen)];
        tokens.extend(init);
        tokens.push(Token::new(TokenKind::Semicolon));
        tokens.extend(cond);
        tokens.push(Token::new(TokenKind::Semicolon));
        tokens.extend(incr);
        tokens.push(Token::new(TokenKind::RightParen));

        let idx = self.append(tokens, line, first.span.union(span), None);
        self.flow.push(FlowContext::new(FlowKind::For, idx, line));
        self.detect_body_style()?;
        Ok(())
    }

    /// A `for` init/increment clause: empty, or `[var] name = expr`.
    fn for_clause(&mut self, raw: &[RawTok], line: u32) -> CResult<Vec<Token>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let mut raw = raw;
        let mut out = Vec::new();
        if let Some((t, _)) = raw.first() {
            if t.kind == TokenKind::VarDecl
                || (t.kind == TokenKind::Identifier && t.text() == Some("var"))
            {
                // `var` was converted to Identifier if shadowed; accept both
                out.push(Token::new(TokenKind::VarDecl));
                raw = &raw[1..];
                if let Some((name_tok, _)) = raw.first() {
                    if let Some(name) = name_tok.text() {
                        let name = name.to_owned();
                        self.declare_local(&name);
                    }
                }
            }
        }
        match self.build_assignment(TokenKind::Set, raw, line)? {
            Some(tokens) => {
                // drop the Set head; the clause keeps `target = expr`
                out.extend(tokens.into_iter().skip(1));
                Ok(out)
            }
            None => Err(Failure::new(
                CompileErrorKind::BadArgument,
                "for clause needs `name = value`",
                line,
                raw.first().map_or_else(Span::default, |(_, s)| *s),
            )),
        }
    }

    /// `case expr:` / `case (expr)` / `default:`.
    fn case_statement(&mut self, kind: TokenKind, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        match self.flow.last() {
            Some(ctx) if ctx.kind == FlowKind::Switch && !ctx.final_branch_seen => {}
            _ => {
                return Err(Failure::new(
                    CompileErrorKind::UnmatchedEnd,
                    "case outside switch",
                    line,
                    first.span,
                ))
            }
        }
        let (mut raw, span) = self.collect_raw(true)?;
        // a trailing label colon is decoration
        if raw.last().is_some_and(|(t, _)| t.kind == TokenKind::Colon) {
            raw.pop();
        }
        let mut tokens = vec![Token::new(kind)];
        if kind == TokenKind::Case {
            let value = self.compile_math(&raw, line)?;
            if value.is_empty() {
                return Err(Failure::new(
                    CompileErrorKind::BadArgument,
                    "case needs a value",
                    line,
                    first.span,
                ));
            }
            tokens.extend(value);
        } else if !raw.is_empty() {
            return Err(Failure::new(
                CompileErrorKind::BadArgument,
                "default takes no value",
                line,
                raw[0].1,
            ));
        }
        let idx = self.append(tokens, line, first.span.union(span), None);
        let ctx = self.flow.last_mut().expect("flow context");
        ctx.branches.push(idx);
        if kind == TokenKind::Default {
            ctx.final_branch_seen = true;
        }
        Ok(())
    }

    /// `break [N]` / `continue [N]`: resolve the Nth enclosing breakable
    /// construct; patched with the real exit index when that construct
    /// closes.
    fn break_statement(&mut self, kind: TokenKind, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        let mut levels = 1i64;
        let nxt = self.peek()?;
        if let LexKind::Integer(n) = nxt.kind {
            self.next_lexeme()?;
            levels = n.max(1);
        }

        let mut tokens = vec![Token::new(kind)];
        if levels > 1 {
            tokens.push(Token::int(TokenKind::Integer, levels));
        }
        let idx = self.append(tokens, line, first.span, None);

        let mut remaining = levels;
        let mut target = None;
        for ci in (0..self.flow.len()).rev() {
            let fk = self.flow[ci].kind;
            if fk.detaches_body() {
                break;
            }
            let eligible = if kind == TokenKind::Break {
                fk.breakable()
            } else {
                fk.continuable()
            };
            if eligible {
                remaining -= 1;
                if remaining == 0 {
                    target = Some(ci);
                    break;
                }
            }
        }
        let Some(ci) = target else {
            return Err(Failure::new(
                CompileErrorKind::BadBreakTarget,
                format!(
                    "{} outside any enclosing {}",
                    if kind == TokenKind::Break { "break" } else { "continue" },
                    if kind == TokenKind::Break { "loop or switch" } else { "loop" },
                ),
                line,
                first.span,
            ));
        };
        if kind == TokenKind::Break {
            self.flow[ci].breaks.push(idx);
        } else {
            self.flow[ci].continues.push(idx);
        }
        Ok(())
    }

    /// `function name(p1, p2)` / `parallel name(…)`: opens a detached
    /// body buffer.
    fn function_statement(&mut self, kind: TokenKind, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        let name_lx = self.next_lexeme()?;
        let LexKind::Symbolic(name) = &name_lx.kind else {
            return Err(Failure::new(
                CompileErrorKind::InvalidDeclaration,
                "function needs a name",
                line,
                name_lx.span,
            ));
        };
        let name = name.to_ascii_lowercase();

        let mut params = Vec::new();
        let mut tokens = vec![
            Token::new(kind),
            Token::val(TokenKind::Identifier, Value::str(&name)),
            Token::new(TokenKind::LeftParen),
        ];
        if self.peek()?.is_sym("(") {
            self.next_lexeme()?;
            loop {
                let lx = self.next_lexeme()?;
                match &lx.kind {
                    LexKind::Symbolic(s) if s == ")" => break,
                    LexKind::Symbolic(s) if s == "," => continue,
                    LexKind::Symbolic(p) => {
                        let p = p.to_ascii_lowercase();
                        if params.contains(&p) {
                            return Err(Failure::new(
                                CompileErrorKind::InvalidDeclaration,
                                format!("duplicate parameter `{p}`"),
                                line,
                                lx.span,
                            ));
                        }
                        if !params.is_empty() {
                            tokens.push(Token::new(TokenKind::Comma));
                        }
                        tokens.push(Token::val(TokenKind::Identifier, Value::str(&p)));
                        self.declare_local(&p);
                        params.push(p);
                    }
                    _ => {
                        return Err(Failure::new(
                            CompileErrorKind::InvalidDeclaration,
                            "bad parameter name",
                            line,
                            lx.span,
                        ))
                    }
                }
            }
        }
        tokens.push(Token::new(TokenKind::RightParen));

        let idx = self.append(tokens, line, first.span, None);
        let flow_kind = if kind == TokenKind::Parallel {
            FlowKind::Parallel
        } else {
            FlowKind::Function
        };
        self.flow.push(FlowContext::new(flow_kind, idx, line));
        self.buffers.push(Buffer {
            statements: Vec::new(),
            unit: Some(PendingUnit {
                name,
                params,
                is_parallel: kind == TokenKind::Parallel,
                is_try: false,
            }),
        });
        self.detect_body_style()?;
        Ok(())
    }

    /// `catch (name)` inside a try body.
    fn catch_statement(&mut self, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        match self.flow.last() {
            Some(ctx) if ctx.kind == FlowKind::Try && ctx.catch_index.is_none() => {}
            _ => {
                return Err(Failure::new(
                    CompileErrorKind::UnmatchedEnd,
                    "catch without try",
                    line,
                    first.span,
                ))
            }
        }
        let mut tokens = vec![Token::new(TokenKind::Catch)];
        if self.peek()?.is_sym("(") {
            self.next_lexeme()?;
            let lx = self.next_lexeme()?;
            let LexKind::Symbolic(name) = &lx.kind else {
                return Err(Failure::new(
                    CompileErrorKind::InvalidDeclaration,
                    "catch needs a variable name",
                    line,
                    lx.span,
                ));
            };
            let name = name.to_ascii_lowercase();
            self.declare_local(&name);
            tokens.push(Token::new(TokenKind::LeftParen));
            tokens.push(Token::val(TokenKind::Identifier, Value::str(&name)));
            tokens.push(Token::new(TokenKind::RightParen));
            let close = self.next_lexeme()?;
            if !close.is_sym(")") {
                return Err(Failure::new(
                    CompileErrorKind::UnbalancedDelimiter,
                    "missing `)` after catch variable",
                    line,
                    close.span,
                ));
            }
        }
        let idx = self.append(tokens, line, first.span, None);
        let ctx = self.flow.last_mut().expect("flow context");
        ctx.catch_index = Some(idx);
        ctx.brace = false;
        ctx.one_line = false;
        self.detect_body_style()?;
        Ok(())
    }

    /// `end <word>`.
    fn end_statement(&mut self, first: &Lexeme) -> CResult<()> {
        let line = first.line;
        let word_lx = self.next_lexeme()?;
        let LexKind::Symbolic(word) = &word_lx.kind else {
            return Err(Failure::new(
                CompileErrorKind::BadArgument,
                "end needs a construct name (end if, end for, …)",
                line,
                word_lx.span,
            ));
        };
        let word = word.to_ascii_lowercase();
        self.synthesize_end(&word, line, word_lx.span)
    }

    /// Append an `end <word>` statement and close the innermost context.
    fn synthesize_end(&mut self, word: &str, line: u32, span: Span) -> CResult<()> {
        let idx = self.append(
            vec![Token::val(TokenKind::End, Value::str(word))],
            line,
            span,
            None,
        );
        self.close_context(word, idx, line, span)
    }

    // -- body-style detection and block closing --

    /// After a flow header: `{` opens a brace block; anything else on the
    /// same line is a one-statement body; a newline means the explicit-end
    /// form.
    fn detect_body_style(&mut self) -> CResult<()> {
        let nxt = self.peek()?;
        if nxt.is_sym("{") {
            self.next_lexeme()?;
            self.flow.last_mut().expect("flow context").brace = true;
            return Ok(());
        }
        let one_line = !matches!(nxt.kind, LexKind::Newline | LexKind::Eof) && !nxt.is_sym(";");
        if one_line {
            self.flow.last_mut().expect("flow context").one_line = true;
        }
        Ok(())
    }

    /// A bare `}`: close the innermost brace block, unless the chain
    /// continues with `else`/`elseif`/`catch`.
    fn close_brace(&mut self, line: u32, span: Span) -> CResult<()> {
        let (kind, final_branch_seen, has_catch) = match self.flow.last() {
            Some(ctx) if ctx.brace => (ctx.kind, ctx.final_branch_seen, ctx.catch_index.is_some()),
            _ => {
                return Err(Failure::new(
                    CompileErrorKind::UnmatchedEnd,
                    "unexpected `}`",
                    line,
                    span,
                ));
            }
        };
        let nxt = self.peek_past_newlines()?;
        if let LexKind::Symbolic(s) = &nxt.kind {
            let s = s.to_ascii_lowercase();
            if kind == FlowKind::If && (s == "else" || s == "elseif") && !final_branch_seen {
                return Ok(());
            }
            if kind == FlowKind::Try && s == "catch" && !has_catch {
                return Ok(());
            }
        }
        self.synthesize_end(kind.close_word(), line, span)
    }

    /// After every completed statement: close any armed one-statement
    /// bodies, cascading outward. `else`/`elseif`/`catch` keep their chain
    /// open; an explicit `end` is left for the `end` statement to process.
    fn auto_close_one_liners(&mut self) -> CResult<()> {
        loop {
            let Some(ctx) = self.flow.last() else {
                return Ok(());
            };
            if !ctx.one_line || ctx.brace {
                return Ok(());
            }
            let last_branch = *ctx.branches.last().expect("branch");
            let armed = self.buffers.last().expect("buffer").statements.len() > last_branch + 1;
            if !armed {
                return Ok(());
            }
            let kind = ctx.kind;
            let nxt = self.peek_past_newlines()?;
            if let LexKind::Symbolic(s) = &nxt.kind {
                let s = s.to_ascii_lowercase();
                if s == "end" {
                    return Ok(());
                }
                if kind == FlowKind::If && (s == "else" || s == "elseif") {
                    return Ok(());
                }
                if kind == FlowKind::Try && s == "catch" {
                    return Ok(());
                }
            }
            self.synthesize_end(kind.close_word(), nxt.line, nxt.span)?;
        }
    }

    /// Verify and pop the innermost context, patching all linkage.
    fn close_context(&mut self, word: &str, end_idx: usize, line: u32, span: Span) -> CResult<()> {
        let Some(ctx) = self.flow.pop() else {
            return Err(Failure::new(
                CompileErrorKind::UnmatchedEnd,
                format!("end {word} with nothing open"),
                line,
                span,
            ));
        };
        if ctx.kind.close_word() != word {
            return Err(Failure::new(
                CompileErrorKind::MismatchedEnd,
                format!(
                    "end {word} does not close the `{}` opened at line {}",
                    ctx.kind.close_word(),
                    ctx.line
                ),
                line,
                span,
            ));
        }
        if self.options.debug_trace {
            debug!(kind = ?ctx.kind, open = ctx.open_index, end = end_idx, "flow closed");
        }

        match ctx.kind {
            FlowKind::If => {
                for (i, &b) in ctx.branches.iter().enumerate() {
                    let next = ctx.branches.get(i + 1).copied().unwrap_or(end_idx);
                    let branch_kind = self.buffer()[b].command_kind();
                    let link = if branch_kind == Some(TokenKind::Else) {
                        Link::Else { end: end_idx }
                    } else {
                        Link::If { next, end: end_idx }
                    };
                    self.set_link(b, link);
                }
                self.set_link(end_idx, Link::BlockEnd { head: ctx.open_index });
            }
            FlowKind::Switch => {
                self.set_link(ctx.open_index, Link::Switch { end: end_idx });
                let cases = &ctx.branches[1..];
                for (i, &b) in cases.iter().enumerate() {
                    let next = cases.get(i + 1).copied().unwrap_or(end_idx);
                    self.set_link(b, Link::Case { next, end: end_idx });
                }
                for b in &ctx.breaks {
                    self.set_link(*b, Link::Break { exit: end_idx });
                }
                self.set_link(end_idx, Link::BlockEnd { head: ctx.open_index });
            }
            FlowKind::For | FlowKind::While => {
                self.set_link(ctx.open_index, Link::LoopHead { end: end_idx });
                self.set_link(end_idx, Link::LoopEnd { head: ctx.open_index });
                for b in &ctx.breaks {
                    self.set_link(*b, Link::Break { exit: end_idx });
                }
                for c in &ctx.continues {
                    self.set_link(*c, Link::Continue { tail: end_idx });
                }
            }
            FlowKind::Function | FlowKind::Parallel | FlowKind::Try => {
                self.set_link(end_idx, Link::BlockEnd { head: 0 });
                let buf = self.buffers.pop().expect("unit buffer");
                let meta = buf.unit.expect("unit metadata");
                let unit_idx = self.units.len();
                let mut unit = FunctionUnit {
                    name: meta.name.clone(),
                    params: meta.params,
                    body: buf.statements,
                    catch_index: ctx.catch_index,
                    is_parallel: meta.is_parallel,
                    is_try: meta.is_try,
                };
                if let Some(ci) = ctx.catch_index {
                    if let Some(stmt) = unit.body.get_mut(ci) {
                        stmt.link = Some(Link::Catch {
                            end: end_idx,
                        });
                    }
                }
                self.units.push(unit);
                if ctx.kind == FlowKind::Try {
                    self.set_link(ctx.open_index, Link::Try { unit: unit_idx });
                } else {
                    self.functions.insert(meta.name, unit_idx);
                    self.set_link(ctx.open_index, Link::Function { unit: unit_idx });
                }
                if let Some(stmt) = self.buffer().get_mut(ctx.open_index) {
                    stmt.tokens[0].intval = unit_idx as i64;
                }
            }
        }
        Ok(())
    }

    // -- raw collection --

    /// Collect one statement's raw tokens up to its boundary.
    fn collect_raw(&mut self, stop_at_colon: bool) -> CResult<(Vec<RawTok>, Span)> {
        let mut raw: Vec<RawTok> = Vec::new();
        let mut depth = 0i32;
        let mut span = Span::default();
        let mut first = true;

        loop {
            let lx = self.next_lexeme()?;
            match &lx.kind {
                LexKind::Eof => break,
                LexKind::Newline => {
                    let continuing = depth > 0
                        || raw
                            .last()
                            .is_some_and(|(t, _)| continuation_kind(t.kind));
                    if continuing {
                        continue;
                    }
                    break;
                }
                LexKind::Symbolic(s) if s == ";" && depth == 0 => break,
                LexKind::Symbolic(s) if s == "}" && depth == 0 => {
                    self.push_back(lx);
                    break;
                }
                LexKind::Symbolic(s) if s == ":" && depth == 0 && stop_at_colon => {
                    let rt = self.lex_to_raw(lx);
                    raw.push(rt);
                    break;
                }
                _ => {
                    if first {
                        span = lx.span;
                        first = false;
                    } else {
                        span = span.union(lx.span);
                    }
                    let rt = self.lex_to_raw(lx);
                    match rt.0.kind {
                        TokenKind::LeftParen | TokenKind::LeftSquare | TokenKind::LeftBrace => {
                            depth += 1;
                        }
                        TokenKind::RightParen
                        | TokenKind::RightSquare
                        | TokenKind::RightBrace => depth -= 1,
                        _ => {}
                    }
                    raw.push(rt);
                }
            }
        }
        Ok((raw, span))
    }

    /// Collect a parenthesized group (flow-condition syntax); the parens
    /// are consumed and not included.
    fn paren_group(&mut self, line: u32) -> CResult<(Vec<RawTok>, Span)> {
        let open = self.next_lexeme()?;
        if !open.is_sym("(") {
            return Err(Failure::new(
                CompileErrorKind::BadArgument,
                "expected `(`",
                line,
                open.span,
            ));
        }
        let mut raw: Vec<RawTok> = Vec::new();
        let mut depth = 1i32;
        let mut span = open.span;
        loop {
            let lx = self.next_lexeme()?;
            match &lx.kind {
                LexKind::Eof => {
                    return Err(Failure::new(
                        CompileErrorKind::UnbalancedDelimiter,
                        "missing `)`",
                        line,
                        lx.span,
                    ))
                }
                LexKind::Newline => continue,
                _ => {
                    span = span.union(lx.span);
                    let rt = self.lex_to_raw(lx);
                    match rt.0.kind {
                        TokenKind::LeftParen | TokenKind::LeftSquare | TokenKind::LeftBrace => {
                            depth += 1;
                        }
                        TokenKind::RightParen => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        TokenKind::RightSquare | TokenKind::RightBrace => depth -= 1,
                        _ => {}
                    }
                    raw.push(rt);
                }
            }
        }
        Ok((raw, span))
    }

    /// Convert one lexeme to a raw token. Meaning comes from the keyword
    /// table; declared locals shadow same-named keywords; command keywords
    /// are plain identifiers outside statement-head position.
    fn lex_to_raw(&self, lx: Lexeme) -> RawTok {
        let span = lx.span;
        let tok = match lx.kind {
            LexKind::Integer(i) => Token::int(TokenKind::Integer, i),
            LexKind::Decimal(f) => Token::val(TokenKind::Decimal, Value::Float(f)),
            LexKind::Str(s) => Token::val(TokenKind::StringLit, Value::str(s)),
            LexKind::SeqCode { seqnum, inscode } => Token::int(
                TokenKind::SpecSeqCode,
                encode_seqcode(seqnum.unwrap_or(SEQ_WILDCARD), inscode),
            ),
            LexKind::BitsetLit(bs) => Token::val(TokenKind::BitsetConst, Value::Bitset(bs)),
            LexKind::ObjectId(name) => Token::val(TokenKind::ObjectId, Value::str(name)),
            LexKind::ImpliedString(s) => Token::val(TokenKind::ImpliedString, Value::str(s)),
            LexKind::Newline | LexKind::Eof => Token::new(TokenKind::Semicolon),
            LexKind::Symbolic(s) => {
                if let Some(kind) = keywords::symbol_kind(&s) {
                    Token::new(kind)
                } else if self.locals.contains(&s.to_ascii_lowercase()) {
                    Token::val(TokenKind::Identifier, Value::str(s))
                } else if let Some(kw) = keywords::lookup(&s) {
                    match kw.kind {
                        TokenKind::BoolConst => Token::int(
                            TokenKind::BoolConst,
                            i64::from(s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("on")),
                        ),
                        TokenKind::PropertyName | TokenKind::NamedSet => {
                            Token::val(kw.kind, Value::str(kw.name))
                        }
                        TokenKind::And
                        | TokenKind::Or
                        | TokenKind::Xor
                        | TokenKind::ToggleOp
                        | TokenKind::Not
                        | TokenKind::Cross => Token::new(kw.kind),
                        TokenKind::VarDecl => Token::new(TokenKind::VarDecl),
                        // command keywords act as plain names mid-statement
                        _ => Token::val(TokenKind::Identifier, Value::str(s)),
                    }
                } else {
                    Token::val(TokenKind::Identifier, Value::str(s))
                }
            }
        };
        (tok, span)
    }

    // -- expression compilation adapters --

    fn compile_math(&self, raw: &[RawTok], line: u32) -> CResult<Vec<Token>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        expr::compile_expression(raw).map_err(|e| self.expr_failure(e, line))
    }

    fn compile_selection(&self, raw: &[RawTok], line: u32) -> CResult<Vec<Token>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        expr::compile_selection_expression(raw).map_err(|e| self.expr_failure(e, line))
    }

    fn compile_target_raw(&self, raw: &[RawTok], line: u32) -> CResult<Vec<Token>> {
        expr::compile_target(raw).map_err(|e| self.expr_failure(e, line))
    }

    fn expr_failure(&self, e: ExprError, line: u32) -> Failure {
        Failure::new(e.kind, e.message, line, e.span)
    }
}

/// Token kinds after which a newline does not end the statement.
const fn continuation_kind(kind: TokenKind) -> bool {
    kind.precedence().is_some()
        || matches!(
            kind,
            TokenKind::Comma
                | TokenKind::Assign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::TimesAssign
                | TokenKind::DivideAssign
                | TokenKind::Dot
                | TokenKind::DotDot
                | TokenKind::Colon
        )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(src: &str) -> CompiledProgram {
        compile(src, &CompileOptions::default()).expect("compile failed")
    }

    fn compile_err(src: &str) -> CompileError {
        compile(src, &CompileOptions::default()).expect_err("compile unexpectedly succeeded")
    }

    fn kinds(p: &CompiledProgram) -> Vec<TokenKind> {
        p.statements
            .iter()
            .filter_map(Statement::command_kind)
            .collect()
    }

    // -- statement boundaries --

    #[test]
    fn statements_split_on_newline_and_semicolon() {
        let p = compile_ok("print 1\nprint 2; print 3");
        assert_eq!(
            kinds(&p),
            vec![TokenKind::Print, TokenKind::Print, TokenKind::Print]
        );
    }

    #[test]
    fn dangling_operator_continues_line() {
        let p = compile_ok("x = 1 +\n2");
        assert_eq!(kinds(&p), vec![TokenKind::Set]);
    }

    #[test]
    fn open_bracket_continues_line() {
        let p = compile_ok("x = [1,\n2,\n3]");
        assert_eq!(kinds(&p), vec![TokenKind::Set]);
    }

    // -- implicit assignment rewriting --

    #[test]
    fn bare_assignment_becomes_set() {
        let p = compile_ok("x = 5");
        assert_eq!(p.statements[0].command_kind(), Some(TokenKind::Set));
        let t = &p.statements[0].tokens;
        assert_eq!(t[1].kind, TokenKind::Identifier);
        assert_eq!(t[2].kind, TokenKind::Assign);
        assert_eq!(t[3].kind, TokenKind::Integer);
    }

    #[test]
    fn compound_assignment_expands() {
        let p = compile_ok("x += 2");
        let t = &p.statements[0].tokens;
        // set x = x + ( 2 )
        let ks: Vec<TokenKind> = t.iter().map(|t| t.kind).collect();
        assert_eq!(
            ks,
            vec![
                TokenKind::Set,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::LeftParen,
                TokenKind::Integer,
                TokenKind::RightParen
            ]
        );
    }

    #[test]
    fn increment_expands() {
        let p = compile_ok("x++");
        let ks: Vec<TokenKind> = p.statements[0].tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            ks,
            vec![
                TokenKind::Set,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Integer
            ]
        );
    }

    #[test]
    fn indexed_assignment_target() {
        let p = compile_ok("a[2] = 9");
        let ks: Vec<TokenKind> = p.statements[0].tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            ks,
            vec![
                TokenKind::Set,
                TokenKind::Identifier,
                TokenKind::IndexOpen,
                TokenKind::Integer,
                TokenKind::IndexClose,
                TokenKind::Assign,
                TokenKind::Integer
            ]
        );
    }

    #[test]
    fn settable_keyword_assignment() {
        let p = compile_ok("zoom = 200");
        assert_eq!(p.statements[0].command_kind(), Some(TokenKind::Set));
        assert_eq!(p.statements[0].tokens[1].text(), Some("zoom"));
    }

    #[test]
    fn local_declaration_shadows_keywords() {
        // `zoom` declared as a var is a plain variable afterwards
        let p = compile_ok("var zoom = 1\nprint zoom + 1");
        assert_eq!(p.local_vars, vec!["zoom".to_owned()]);
        assert_eq!(p.statements[1].tokens[1].kind, TokenKind::Identifier);
    }

    // -- flow linkage --

    #[test]
    fn if_else_chain_links() {
        let p = compile_ok("if (1)\nprint 1\nelseif (2)\nprint 2\nelse\nprint 3\nend if");
        assert_eq!(
            kinds(&p),
            vec![
                TokenKind::If,
                TokenKind::Print,
                TokenKind::ElseIf,
                TokenKind::Print,
                TokenKind::Else,
                TokenKind::Print,
                TokenKind::End
            ]
        );
        assert_eq!(p.statements[0].link, Some(Link::If { next: 2, end: 6 }));
        assert_eq!(p.statements[2].link, Some(Link::If { next: 4, end: 6 }));
        assert_eq!(p.statements[4].link, Some(Link::Else { end: 6 }));
        assert_eq!(p.statements[6].link, Some(Link::BlockEnd { head: 0 }));
    }

    #[test]
    fn brace_if_else_chain() {
        let p = compile_ok("if (1) { print 1 } else { print 2 }");
        assert_eq!(
            kinds(&p),
            vec![
                TokenKind::If,
                TokenKind::Print,
                TokenKind::Else,
                TokenKind::Print,
                TokenKind::End
            ]
        );
        assert_eq!(p.statements[0].link, Some(Link::If { next: 2, end: 4 }));
    }

    #[test]
    fn loop_head_tail_two_cycle() {
        let p = compile_ok("while (1) { print 1 }");
        assert_eq!(p.statements[0].link, Some(Link::LoopHead { end: 2 }));
        assert_eq!(p.statements[2].link, Some(Link::LoopEnd { head: 0 }));
    }

    #[test]
    fn for_loop_compiles_with_clauses() {
        let p = compile_ok("for (var i = 1; i <= 3; i = i + 1) { x = x + i }");
        assert_eq!(p.statements[0].link, Some(Link::LoopHead { end: 2 }));
        assert_eq!(p.statements[2].link, Some(Link::LoopEnd { head: 0 }));
        // exactly one loop-end statement pointing back at the head
        let loop_ends = p
            .statements
            .iter()
            .filter(|s| matches!(s.link, Some(Link::LoopEnd { head: 0 })))
            .count();
        assert_eq!(loop_ends, 1);
        let semis = p.statements[0]
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Semicolon)
            .count();
        assert_eq!(semis, 2);
    }

    #[test]
    fn one_line_body_gets_synthetic_end() {
        let p = compile_ok("if (1) print 1\nprint 2");
        assert_eq!(
            kinds(&p),
            vec![TokenKind::If, TokenKind::Print, TokenKind::End, TokenKind::Print]
        );
        assert_eq!(p.statements[0].link, Some(Link::If { next: 2, end: 2 }));
    }

    #[test]
    fn one_line_else_chain() {
        let p = compile_ok("if (1) print 1\nelse print 2\nprint 3");
        assert_eq!(
            kinds(&p),
            vec![
                TokenKind::If,
                TokenKind::Print,
                TokenKind::Else,
                TokenKind::Print,
                TokenKind::End,
                TokenKind::Print
            ]
        );
    }

    #[test]
    fn nested_one_liners_cascade() {
        let p = compile_ok("if (1) if (2) print 1\nprint 9");
        assert_eq!(
            kinds(&p),
            vec![
                TokenKind::If,
                TokenKind::If,
                TokenKind::Print,
                TokenKind::End,
                TokenKind::End,
                TokenKind::Print
            ]
        );
    }

    #[test]
    fn break_and_continue_link_to_loop_end() {
        let p = compile_ok("while (1) {\nbreak\ncontinue\n}");
        assert_eq!(p.statements[1].link, Some(Link::Break { exit: 3 }));
        assert_eq!(p.statements[2].link, Some(Link::Continue { tail: 3 }));
    }

    #[test]
    fn break_levels_reach_outer_loop() {
        let p = compile_ok("while (1) {\nwhile (2) {\nbreak 2\n}\n}");
        // statements: while, while, break, end (inner), end (outer)
        assert_eq!(p.statements[2].link, Some(Link::Break { exit: 4 }));
    }

    #[test]
    fn switch_case_links() {
        let p = compile_ok("switch (x)\ncase 1:\nprint 1\ncase 2:\nprint 2\ndefault:\nprint 3\nend switch");
        assert_eq!(p.statements[0].link, Some(Link::Switch { end: 7 }));
        assert_eq!(p.statements[1].link, Some(Link::Case { next: 3, end: 7 }));
        assert_eq!(p.statements[3].link, Some(Link::Case { next: 5, end: 7 }));
        assert_eq!(p.statements[5].link, Some(Link::Case { next: 7, end: 7 }));
    }

    // -- functions and try --

    #[test]
    fn function_body_is_detached() {
        let p = compile_ok("function f(a, b)\nreturn a + b\nend function\nprint 1");
        assert_eq!(kinds(&p), vec![TokenKind::Function, TokenKind::Print]);
        assert_eq!(p.units.len(), 1);
        let u = &p.units[0];
        assert_eq!(u.name, "f");
        assert_eq!(u.params, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(u.body.len(), 2); // return + end
        assert_eq!(p.functions.get("f"), Some(&0));
        assert_eq!(p.statements[0].link, Some(Link::Function { unit: 0 }));
    }

    #[test]
    fn unit_links_are_relative() {
        let p = compile_ok("function f()\nwhile (1) {\nbreak\n}\nend function");
        let u = &p.units[0];
        // the while head is unit-body statement 0
        assert_eq!(u.body[0].link, Some(Link::LoopHead { end: 2 }));
        assert_eq!(u.body[1].link, Some(Link::Break { exit: 2 }));
    }

    #[test]
    fn try_catch_is_detached() {
        let p = compile_ok("try {\nprint 1\n} catch (e) {\nprint e\n}");
        assert_eq!(kinds(&p), vec![TokenKind::Try]);
        let u = &p.units[0];
        assert!(u.is_try);
        assert_eq!(u.catch_index, Some(1));
        assert_eq!(u.body[1].command_kind(), Some(TokenKind::Catch));
    }

    // -- errors --

    #[test]
    fn missing_end_is_reported_with_if_line() {
        // compiling "if (x > 0) { print 1" must fail referencing the if line
        let err = compile_err("if (x > 0) { print 1");
        assert_eq!(err.kind, CompileErrorKind::MissingEnd);
        assert!(err.message.contains("if"), "message: {}", err.message);
        assert_eq!(err.line, 1);
        // best-effort partial program still present
        assert!(!err.partial.statements.is_empty());
    }

    #[test]
    fn mismatched_end_fails() {
        let err = compile_err("while (1)\nprint 1\nend if");
        assert_eq!(err.kind, CompileErrorKind::MismatchedEnd);
    }

    #[test]
    fn unmatched_close_fails() {
        let err = compile_err("print 1\n}");
        assert_eq!(err.kind, CompileErrorKind::UnmatchedEnd);
    }

    #[test]
    fn break_outside_loop_fails() {
        let err = compile_err("break");
        assert_eq!(err.kind, CompileErrorKind::BadBreakTarget);
    }

    #[test]
    fn continue_cannot_target_switch() {
        let err = compile_err("switch (1)\ncase 1:\ncontinue\nend switch");
        assert_eq!(err.kind, CompileErrorKind::BadBreakTarget);
    }

    #[test]
    fn break_cannot_escape_a_function() {
        let err = compile_err("while (1) {\nfunction f()\nbreak\nend function\n}");
        assert_eq!(err.kind, CompileErrorKind::BadBreakTarget);
    }

    #[test]
    fn duplicate_parameter_fails() {
        let err = compile_err("function f(a, a)\nend function");
        assert_eq!(err.kind, CompileErrorKind::InvalidDeclaration);
    }

    #[test]
    fn else_without_if_fails() {
        let err = compile_err("else\nprint 1");
        assert_eq!(err.kind, CompileErrorKind::UnmatchedEnd);
    }

    #[test]
    fn unterminated_string_is_lexical_error() {
        let err = compile_err("print \"oops\nprint 2");
        assert_eq!(err.kind, CompileErrorKind::UnterminatedString);
        assert!(err.kind.is_lexical());
    }

    #[test]
    fn silent_mode_tolerates_unterminated_string() {
        let opts = CompileOptions {
            silent: true,
            ..CompileOptions::default()
        };
        assert!(compile("print \"oops\nprint 2", &opts).is_ok());
    }

    // -- implied strings --

    #[test]
    fn echo_takes_rest_of_line() {
        let p = compile_ok("echo hello brave world\nprint 1");
        let t = &p.statements[0].tokens;
        assert_eq!(t[1].kind, TokenKind::ImpliedString);
        assert_eq!(t[1].text(), Some("hello brave world"));
    }

    #[test]
    fn load_takes_words() {
        let p = compile_ok("load model.pdb first");
        let t = &p.statements[0].tokens;
        assert_eq!(t[1].text(), Some("model.pdb"));
        assert_eq!(t[2].text(), Some("first"));
    }

    #[test]
    fn echo_quoted_string() {
        let p = compile_ok("echo \"two words\"");
        assert_eq!(p.statements[0].tokens[1].kind, TokenKind::StringLit);
    }

    // -- round-trip (render → recompile) --

    #[test]
    fn render_recompiles_to_same_shape() {
        let src = "x = 0\nfor (var i = 1; i <= 3; i = i + 1) {\nx = x + i\n}\nprint x";
        let p1 = compile_ok(src);
        let rendered = p1.render();
        let p2 = compile_ok(&rendered);
        assert_eq!(kinds(&p1), kinds(&p2));
        let links1: Vec<Option<Link>> = p1.statements.iter().map(|s| s.link).collect();
        let links2: Vec<Option<Link>> = p2.statements.iter().map(|s| s.link).collect();
        assert_eq!(links1, links2);
    }
}
