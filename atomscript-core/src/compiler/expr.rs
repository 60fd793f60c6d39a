//! Expression compiler.
//!
//! Rewrites a statement's raw expression tokens into the flat, RPN-ready
//! stream the evaluator executes: selector chains become explicit
//! get/call/index operations, brace constructs are disambiguated (point
//! literal vs. hash literal vs. atom selection), and the residue-specifier
//! mini-grammar expands into specifier tokens joined by `and`. Binary
//! operators stay at their infix positions: the runtime machine applies
//! the same precedence table, which is what makes short-circuit `and`/`or`
//! and ternary skip possible at all.

use crate::error::CompileErrorKind;
use crate::token::{Span, Token, TokenKind};
use crate::value::Value;

use atomscript_math::{Point3, Point4};

/// A raw statement token with its source span (adjacency matters for
/// wildcard patterns like `ala*`).
pub type RawTok = (Token, Span);

/// An expression-compilation failure.
#[derive(Debug)]
pub struct ExprError {
    /// Machine-readable kind.
    pub kind: CompileErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Offending source span.
    pub span: Span,
}

impl ExprError {
    fn new(kind: CompileErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }

    fn invalid(message: impl Into<String>, span: Span) -> Self {
        Self::new(CompileErrorKind::InvalidExpression, message, span)
    }
}

type ExprResult<T> = Result<T, ExprError>;

/// Compile a math/boolean expression region (command tails, `if`
/// conditions, assignment right-hand sides).
pub fn compile_expression(raw: &[RawTok]) -> ExprResult<Vec<Token>> {
    let mut c = ExprCompiler::new(raw);
    c.compile_region(Ctx::Math, &[])?;
    c.finish()
}

/// Compile a bare selection expression (tails of `select`, `display`,
/// `hide`, `delete`: no braces required).
pub fn compile_selection_expression(raw: &[RawTok]) -> ExprResult<Vec<Token>> {
    let mut c = ExprCompiler::new(raw);
    c.compile_region(Ctx::Selection, &[])?;
    c.finish()
}

/// Compile an assignment target: `name`, `name[expr]…`, `name.key…`, or
/// `{selection}.property`.
pub fn compile_target(raw: &[RawTok]) -> ExprResult<Vec<Token>> {
    let mut c = ExprCompiler::new(raw);
    c.compile_target()?;
    if c.pos < c.raw.len() {
        return Err(ExprError::invalid(
            "unexpected tokens after assignment target",
            c.raw[c.pos].1,
        ));
    }
    Ok(c.out)
}

// ---------------------------------------------------------------------------
// Compiler core
// ---------------------------------------------------------------------------

/// Which sub-grammar is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    /// Ordinary math/boolean expression.
    Math,
    /// Atom-selection expression (residue specifiers live here).
    Selection,
}

struct ExprCompiler<'a> {
    raw: &'a [RawTok],
    pos: usize,
    out: Vec<Token>,
}

impl<'a> ExprCompiler<'a> {
    fn new(raw: &'a [RawTok]) -> Self {
        Self {
            raw,
            pos: 0,
            out: Vec::with_capacity(raw.len() + 4),
        }
    }

    fn finish(self) -> ExprResult<Vec<Token>> {
        Ok(self.out)
    }

    // -- raw-stream helpers --

    fn peek_kind(&self) -> Option<TokenKind> {
        self.raw.get(self.pos).map(|(t, _)| t.kind)
    }

    fn peek_kind_at(&self, off: usize) -> Option<TokenKind> {
        self.raw.get(self.pos + off).map(|(t, _)| t.kind)
    }

    fn here(&self) -> Span {
        self.raw
            .get(self.pos)
            .or_else(|| self.raw.last())
            .map_or_else(Span::default, |(_, s)| *s)
    }

    fn bump(&mut self) -> &RawTok {
        let t = &self.raw[self.pos];
        self.pos += 1;
        t
    }

    /// Is the token at `pos + off` glued to the one before it?
    fn adjacent_at(&self, off: usize) -> bool {
        let i = self.pos + off;
        i > 0
            && i < self.raw.len()
            && self.raw[i - 1].1.end == self.raw[i].1.start
    }

    fn last_out(&self) -> Option<TokenKind> {
        self.out.last().map(|t| t.kind)
    }

    fn is_spec_kind(kind: TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::SpecResName
                | TokenKind::SpecResNum
                | TokenKind::SpecSeqCode
                | TokenKind::SpecSeqRange
                | TokenKind::SpecChain
                | TokenKind::SpecAtom
                | TokenKind::SpecAltLoc
                | TokenKind::SpecModel
                | TokenKind::SpecAll
        )
    }

    // -- region compilation --

    /// Compile until end of input or a raw token in `stops` (left
    /// unconsumed). Returns whether the region produced anything.
    fn compile_region(&mut self, ctx: Ctx, stops: &[TokenKind]) -> ExprResult<bool> {
        let out_start = self.out.len();
        // true when the previous emission completed an operand
        let mut have_operand = false;
        // true at positions where a residue specifier may begin
        let mut spec_pos = true;
        let mut ternary_depth = 0usize;

        while let Some(kind) = self.peek_kind() {
            if stops.contains(&kind) {
                break;
            }
            let span = self.here();

            match kind {
                // -- simple operands --
                TokenKind::Integer if ctx == Ctx::Selection && spec_pos && !have_operand => {
                    self.spec_resnum()?;
                    have_operand = true;
                    spec_pos = false;
                }
                TokenKind::Integer
                | TokenKind::Decimal
                | TokenKind::StringLit
                | TokenKind::BoolConst
                | TokenKind::BitsetConst
                | TokenKind::ObjectId => {
                    self.require_no_operand(have_operand, span)?;
                    let tok = self.bump().0.clone();
                    self.out.push(tok);
                    have_operand = true;
                    spec_pos = false;
                }
                TokenKind::SpecSeqCode => {
                    if ctx != Ctx::Selection {
                        return Err(ExprError::invalid(
                            "sequence code outside a selection",
                            span,
                        ));
                    }
                    self.spec_join(have_operand, span)?;
                    let tok = self.bump().0.clone();
                    self.out.push(tok);
                    have_operand = true;
                    spec_pos = false;
                }

                // -- names --
                TokenKind::Identifier | TokenKind::PropertyName | TokenKind::NamedSet => {
                    self.name_operand(ctx, spec_pos, have_operand)?;
                    have_operand = true;
                    spec_pos = false;
                }

                // -- selector chains --
                TokenKind::Dot | TokenKind::DotDot => {
                    self.selector(ctx, have_operand, spec_pos)?;
                    have_operand = true;
                    spec_pos = false;
                }

                // -- grouping --
                TokenKind::LeftParen => {
                    self.require_no_operand(have_operand, span)?;
                    self.bump();
                    self.out.push(Token::new(TokenKind::LeftParen));
                    self.compile_region(ctx, &[TokenKind::RightParen])?;
                    self.expect(TokenKind::RightParen, "missing `)`")?;
                    self.out.push(Token::new(TokenKind::RightParen));
                    have_operand = true;
                    spec_pos = false;
                }
                TokenKind::RightParen => {
                    return Err(ExprError::new(
                        CompileErrorKind::UnbalancedDelimiter,
                        "unmatched `)`",
                        span,
                    ));
                }

                // -- brackets: index or array literal --
                TokenKind::LeftSquare => {
                    if have_operand {
                        self.index_suffix()?;
                    } else {
                        self.array_literal(ctx)?;
                    }
                    have_operand = true;
                    spec_pos = false;
                }
                TokenKind::RightSquare => {
                    return Err(ExprError::new(
                        CompileErrorKind::UnbalancedDelimiter,
                        "unmatched `]`",
                        span,
                    ));
                }

                // -- braces: point, hash, or selection --
                TokenKind::LeftBrace => {
                    self.require_no_operand(have_operand, span)?;
                    self.brace_construct(ctx)?;
                    have_operand = true;
                    spec_pos = false;
                }
                TokenKind::RightBrace => {
                    return Err(ExprError::new(
                        CompileErrorKind::UnbalancedDelimiter,
                        "unmatched `}`",
                        span,
                    ));
                }

                // -- selection-only punctuation --
                TokenKind::Colon if ctx == Ctx::Selection => {
                    self.spec_suffix(TokenKind::SpecChain, have_operand)?;
                    have_operand = true;
                    spec_pos = false;
                }
                TokenKind::Percent if ctx == Ctx::Selection => {
                    self.spec_suffix(TokenKind::SpecAltLoc, have_operand)?;
                    have_operand = true;
                    spec_pos = false;
                }
                TokenKind::Divide
                    if ctx == Ctx::Selection
                        && (!have_operand
                            || self.last_out().is_some_and(Self::is_spec_kind)) =>
                {
                    self.spec_model(have_operand)?;
                    have_operand = true;
                    spec_pos = false;
                }
                TokenKind::Times if ctx == Ctx::Selection && spec_pos && !have_operand => {
                    // `*`: whole-model wildcard, or the head of a pattern
                    if self.adjacent_at(1)
                        && matches!(
                            self.peek_kind_at(1),
                            Some(TokenKind::Identifier | TokenKind::Integer)
                        )
                    {
                        self.spec_pattern()?;
                    } else {
                        self.bump();
                        self.out.push(Token::new(TokenKind::SpecAll));
                    }
                    have_operand = true;
                    spec_pos = false;
                }

                // -- ternary --
                TokenKind::Question => {
                    self.require_operand(have_operand, span, "`?` needs a condition")?;
                    self.bump();
                    self.out.push(Token::new(TokenKind::Question));
                    ternary_depth += 1;
                    have_operand = false;
                    spec_pos = false;
                }
                TokenKind::Colon => {
                    if ternary_depth == 0 {
                        return Err(ExprError::invalid("unexpected `:`", span));
                    }
                    self.require_operand(have_operand, span, "`:` needs a value before it")?;
                    self.bump();
                    self.out.push(Token::new(TokenKind::TernaryColon));
                    ternary_depth -= 1;
                    have_operand = false;
                }

                // -- assignment --
                TokenKind::Assign => {
                    if ctx == Ctx::Selection {
                        // `=` means equality inside selections
                        self.require_operand(have_operand, span, "`=` needs an operand")?;
                        self.bump();
                        self.out.push(Token::new(TokenKind::EqEq));
                        have_operand = false;
                    } else {
                        return Err(ExprError::invalid(
                            "assignment is not allowed inside an expression",
                            span,
                        ));
                    }
                }

                // -- prefix operators --
                TokenKind::Not => {
                    self.require_no_operand(have_operand, span)?;
                    self.bump();
                    self.out.push(Token::new(TokenKind::Not));
                    spec_pos = true;
                }
                TokenKind::Minus if !have_operand => {
                    self.bump();
                    if ctx == Ctx::Selection
                        && spec_pos
                        && self.peek_kind() == Some(TokenKind::Integer)
                    {
                        // negative residue number
                        let n = self.bump().0.intval;
                        self.out.push(Token::int(TokenKind::SpecResNum, -n));
                        have_operand = true;
                    } else {
                        self.out.push(Token::new(TokenKind::UnaryMinus));
                    }
                    spec_pos = false;
                }
                TokenKind::Plus if !have_operand => {
                    // unary plus is a no-op
                    self.bump();
                }

                // -- binary operators --
                kind if kind.precedence().is_some() => {
                    self.require_operand(have_operand, span, "operator needs a left operand")?;
                    self.bump();
                    self.out.push(Token::new(kind));
                    have_operand = false;
                    // logical operators reopen specifier position
                    spec_pos = matches!(
                        kind,
                        TokenKind::And | TokenKind::Or | TokenKind::Xor | TokenKind::ToggleOp
                    );
                }

                other => {
                    return Err(ExprError::invalid(
                        format!("unexpected token in expression: {other:?}"),
                        span,
                    ));
                }
            }
        }

        if ternary_depth > 0 {
            return Err(ExprError::invalid("missing `:` in conditional", self.here()));
        }
        let produced = self.out.len() > out_start;
        if produced && !have_operand {
            return Err(ExprError::invalid("expression ends with an operator", self.here()));
        }
        Ok(produced)
    }

    fn require_no_operand(&self, have_operand: bool, span: Span) -> ExprResult<()> {
        if have_operand {
            Err(ExprError::invalid(
                "two operands with no operator between them",
                span,
            ))
        } else {
            Ok(())
        }
    }

    fn require_operand(&self, have_operand: bool, span: Span, msg: &str) -> ExprResult<()> {
        if have_operand {
            Ok(())
        } else {
            Err(ExprError::invalid(msg.to_owned(), span))
        }
    }

    fn expect(&mut self, kind: TokenKind, msg: &str) -> ExprResult<()> {
        if self.peek_kind() == Some(kind) {
            self.bump();
            Ok(())
        } else {
            Err(ExprError::new(
                CompileErrorKind::UnbalancedDelimiter,
                msg.to_owned(),
                self.here(),
            ))
        }
    }

    // -- names, calls, selectors --

    /// Identifier / property / named-set operand, with call detection.
    fn name_operand(&mut self, ctx: Ctx, spec_pos: bool, have_operand: bool) -> ExprResult<()> {
        let span = self.here();
        let (tok, _) = self.bump().clone();
        let name = tok.text().unwrap_or("").to_owned();

        // name( … ): a function call, in any context
        if self.peek_kind() == Some(TokenKind::LeftParen) && tok.kind != TokenKind::NamedSet {
            self.require_no_operand(have_operand, span)?;
            let call_at = self.out.len();
            self.out.push(Token::val(TokenKind::FuncCall, Value::str(&name)));
            let argc = self.call_args(Ctx::Math)?;
            self.out[call_at].intval = argc;
            return Ok(());
        }

        match ctx {
            Ctx::Math => {
                self.require_no_operand(have_operand, span)?;
                match tok.kind {
                    // property keywords are plain variables outside selections
                    TokenKind::PropertyName => {
                        self.out.push(Token::val(TokenKind::Identifier, Value::str(&name)));
                    }
                    _ => self.out.push(tok),
                }
            }
            Ctx::Selection => {
                let followed_by_cmp = matches!(
                    self.peek_kind(),
                    Some(k) if k.is_comparison() || k == TokenKind::Assign
                );
                if followed_by_cmp {
                    self.require_no_operand(have_operand, span)?;
                    // string-valued properties only take (in)equality
                    let cmp = self.peek_kind().expect("comparator");
                    if crate::keywords::is_string_property(&name)
                        && !matches!(
                            cmp,
                            TokenKind::EqEq | TokenKind::NotEq | TokenKind::Assign
                        )
                    {
                        return Err(ExprError::invalid(
                            format!("`{name}` is a text property; use == or !="),
                            span,
                        ));
                    }
                    // comparison left side is a property reference
                    self.out
                        .push(Token::val(TokenKind::PropertyName, Value::str(&name)));
                } else if self.last_out().is_some_and(TokenKind::is_comparison) {
                    // bare word on a comparison's right side is a string
                    self.out.push(Token::val(TokenKind::StringLit, Value::str(&name)));
                } else if tok.kind == TokenKind::NamedSet {
                    self.require_no_operand(have_operand, span)?;
                    self.out.push(tok);
                } else if spec_pos && !have_operand {
                    // residue-name pattern, possibly with glued wildcards
                    self.pos -= 1;
                    self.spec_pattern()?;
                } else {
                    return Err(ExprError::invalid(
                        format!("unexpected name `{name}` in selection"),
                        span,
                    ));
                }
            }
        }
        Ok(())
    }

    /// `.name`, `..name`, `.name(…)` after an operand; `.CA` specifiers
    /// inside selections.
    fn selector(&mut self, ctx: Ctx, have_operand: bool, spec_pos: bool) -> ExprResult<()> {
        let span = self.here();
        let all_elements = self.peek_kind() == Some(TokenKind::DotDot);

        // selection atom-name specifier: at specifier position, or
        // suffixed onto a preceding specifier
        if ctx == Ctx::Selection
            && !all_elements
            && (spec_pos && !have_operand || self.last_out().is_some_and(Self::is_spec_kind))
        {
            self.spec_suffix(TokenKind::SpecAtom, have_operand)?;
            return Ok(());
        }

        self.require_operand(have_operand, span, "`.` needs a value before it")?;
        self.bump();
        let name = match self.peek_kind() {
            Some(TokenKind::Identifier | TokenKind::PropertyName | TokenKind::NamedSet) => {
                self.bump().0.text().unwrap_or("").to_owned()
            }
            _ => {
                return Err(ExprError::invalid("`.` needs a property name", span));
            }
        };

        if self.peek_kind() == Some(TokenKind::LeftParen) {
            let call_at = self.out.len();
            self.out
                .push(Token::val(TokenKind::MethodCall, Value::str(&name)));
            let argc = self.call_args(Ctx::Math)?;
            self.out[call_at].intval = argc;
        } else {
            let iv = i64::from(all_elements);
            self.out
                .push(Token::int_val(TokenKind::PropGet, iv, Value::str(&name)));
        }
        Ok(())
    }

    /// `( arg, arg, … )`: emits the delimiters and returns the count.
    fn call_args(&mut self, ctx: Ctx) -> ExprResult<i64> {
        self.expect(TokenKind::LeftParen, "missing `(`")?;
        self.out.push(Token::new(TokenKind::LeftParen));
        let mut argc = 0i64;
        if self.peek_kind() != Some(TokenKind::RightParen) {
            loop {
                let produced =
                    self.compile_region(ctx, &[TokenKind::Comma, TokenKind::RightParen])?;
                if !produced {
                    return Err(ExprError::invalid("empty argument", self.here()));
                }
                argc += 1;
                if self.peek_kind() == Some(TokenKind::Comma) {
                    self.bump();
                    self.out.push(Token::new(TokenKind::Comma));
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "missing `)` in call")?;
        self.out.push(Token::new(TokenKind::RightParen));
        Ok(argc)
    }

    // -- brackets --

    /// `x[ … ]` index application (single or `lo:hi` range).
    fn index_suffix(&mut self) -> ExprResult<()> {
        self.bump(); // `[`
        self.out.push(Token::new(TokenKind::IndexOpen));
        let produced =
            self.compile_region(Ctx::Math, &[TokenKind::RightSquare, TokenKind::Colon])?;
        if !produced {
            return Err(ExprError::invalid("empty index", self.here()));
        }
        let mut parts = 1i64;
        if self.peek_kind() == Some(TokenKind::Colon) {
            self.bump();
            self.out.push(Token::new(TokenKind::RangeColon));
            let produced = self.compile_region(Ctx::Math, &[TokenKind::RightSquare])?;
            if !produced {
                return Err(ExprError::invalid("empty range bound", self.here()));
            }
            parts = 2;
        }
        self.expect(TokenKind::RightSquare, "missing `]`")?;
        self.out.push(Token::int(TokenKind::IndexClose, parts));
        Ok(())
    }

    /// `[ a, b, … ]` array literal.
    fn array_literal(&mut self, ctx: Ctx) -> ExprResult<()> {
        self.bump(); // `[`
        self.out.push(Token::new(TokenKind::ArrayOpen));
        let mut count = 0i64;
        if self.peek_kind() != Some(TokenKind::RightSquare) {
            loop {
                let produced = self.compile_region(
                    // element expressions are plain math even in selections
                    if ctx == Ctx::Selection { Ctx::Math } else { ctx },
                    &[TokenKind::Comma, TokenKind::RightSquare],
                )?;
                if !produced {
                    return Err(ExprError::invalid("empty array element", self.here()));
                }
                count += 1;
                if self.peek_kind() == Some(TokenKind::Comma) {
                    self.bump();
                    self.out.push(Token::new(TokenKind::Comma));
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightSquare, "missing `]`")?;
        self.out.push(Token::new(TokenKind::ArrayClose));
        self.out.push(Token::int(TokenKind::ArrayBuild, count));
        Ok(())
    }

    // -- braces --

    /// Disambiguate a leading `{`: hash literal, point literal/constructor,
    /// or atom-selection expression.
    fn brace_construct(&mut self, _outer: Ctx) -> ExprResult<()> {
        let open_span = self.here();
        // balanced scan for the matching `}`
        let mut depth = 0usize;
        let mut end = None;
        let mut top_commas = 0usize;
        for i in self.pos..self.raw.len() {
            match self.raw[i].0.kind {
                TokenKind::LeftBrace | TokenKind::LeftParen | TokenKind::LeftSquare => depth += 1,
                TokenKind::RightParen | TokenKind::RightSquare => depth = depth.saturating_sub(1),
                TokenKind::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                TokenKind::Comma if depth == 1 => top_commas += 1,
                _ => {}
            }
        }
        let Some(end) = end else {
            return Err(ExprError::new(
                CompileErrorKind::UnbalancedDelimiter,
                "missing `}`",
                open_span,
            ));
        };

        let body = &self.raw[self.pos + 1..end];

        // hash literal: `{ "key" : … }` or the empty `{}`
        let is_map = body.is_empty()
            || (body[0].0.kind == TokenKind::StringLit
                && body.get(1).map(|(t, _)| t.kind) == Some(TokenKind::Colon));
        if is_map {
            return self.map_literal(end);
        }

        // point literal: all components constant. Without commas a point
        // needs 3 or 4 components: `{2-5}` stays a residue range.
        if let Some(components) = constant_point_components(body, top_commas > 0) {
            self.pos = end + 1;
            let tok = match components.len() {
                3 => Token::val(
                    TokenKind::PointConst3,
                    Value::Point3(Point3::new(components[0], components[1], components[2])),
                ),
                4 => Token::val(
                    TokenKind::PointConst4,
                    Value::Point4(Point4::new(
                        components[0],
                        components[1],
                        components[2],
                        components[3],
                    )),
                ),
                2 => Token::val(
                    TokenKind::PointConst3,
                    Value::Point3(Point3::new(components[0], components[1], 0.0)),
                ),
                _ => {
                    return Err(ExprError::invalid(
                        "a point takes 2 to 4 components",
                        open_span,
                    ))
                }
            };
            self.out.push(tok);
            return Ok(());
        }

        // top-level commas: a point constructor with computed components
        if top_commas > 0 {
            if !(1..=3).contains(&top_commas) {
                return Err(ExprError::invalid(
                    "a point takes 2 to 4 components",
                    open_span,
                ));
            }
            self.bump(); // `{`
            self.out.push(Token::new(TokenKind::PointOpen));
            let mut count = 0i64;
            loop {
                let produced =
                    self.compile_region(Ctx::Math, &[TokenKind::Comma, TokenKind::RightBrace])?;
                if !produced {
                    return Err(ExprError::invalid("empty point component", self.here()));
                }
                count += 1;
                if self.peek_kind() == Some(TokenKind::Comma) {
                    self.bump();
                    self.out.push(Token::new(TokenKind::Comma));
                } else {
                    break;
                }
            }
            self.expect(TokenKind::RightBrace, "missing `}`")?;
            self.out.push(Token::new(TokenKind::PointClose));
            self.out.push(Token::int(TokenKind::PointBuild, count));
            return Ok(());
        }

        // otherwise: an atom-selection expression
        self.bump(); // `{`
        self.out.push(Token::new(TokenKind::SelectOpen));
        self.compile_region(Ctx::Selection, &[TokenKind::RightBrace])?;
        self.expect(TokenKind::RightBrace, "missing `}`")?;
        self.out.push(Token::new(TokenKind::SelectClose));
        Ok(())
    }

    /// `{ "k" : v, … }` hash literal. `end` is the index of the `}`.
    fn map_literal(&mut self, end: usize) -> ExprResult<()> {
        self.bump(); // `{`
        self.out.push(Token::new(TokenKind::MapOpen));
        let mut pairs = 0i64;
        while self.pos < end {
            let span = self.here();
            let key = self.bump().0.clone();
            if key.kind != TokenKind::StringLit {
                return Err(ExprError::invalid("hash keys must be quoted strings", span));
            }
            self.out.push(key);
            if self.peek_kind() != Some(TokenKind::Colon) {
                return Err(ExprError::invalid("missing `:` after hash key", self.here()));
            }
            self.bump();
            self.out.push(Token::new(TokenKind::MapColon));
            let produced =
                self.compile_region(Ctx::Math, &[TokenKind::Comma, TokenKind::RightBrace])?;
            if !produced {
                return Err(ExprError::invalid("empty hash value", self.here()));
            }
            pairs += 1;
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.bump();
                self.out.push(Token::new(TokenKind::Comma));
            } else {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "missing `}`")?;
        self.out.push(Token::new(TokenKind::MapClose));
        self.out.push(Token::int(TokenKind::MapBuild, pairs));
        Ok(())
    }

    // -- selection specifiers --

    /// Insert the implicit `and` that joins chained specifiers.
    fn spec_join(&mut self, have_operand: bool, span: Span) -> ExprResult<()> {
        if have_operand {
            if self.last_out().is_some_and(Self::is_spec_kind) {
                self.out.push(Token::new(TokenKind::And));
                Ok(())
            } else {
                self.require_no_operand(true, span)
            }
        } else {
            Ok(())
        }
    }

    /// Residue number, possibly a `lo-hi` range.
    fn spec_resnum(&mut self) -> ExprResult<()> {
        let lo = self.bump().0.intval;
        if self.peek_kind() == Some(TokenKind::Minus)
            && self.peek_kind_at(1) == Some(TokenKind::Integer)
        {
            self.bump();
            let hi = self.bump().0.intval;
            self.out
                .push(Token::int_val(TokenKind::SpecSeqRange, lo, Value::Int(hi)));
        } else {
            self.out.push(Token::int(TokenKind::SpecResNum, lo));
        }
        Ok(())
    }

    /// Residue-name pattern: adjacent identifier/number/wildcard runs
    /// (`ala`, `ala*`, `a?a`, `ala10`).
    fn spec_pattern(&mut self) -> ExprResult<()> {
        let mut pattern = String::new();
        let mut first = true;
        while let Some(kind) = self.peek_kind() {
            if !first && !self.adjacent_at(0) {
                break;
            }
            match kind {
                TokenKind::Identifier | TokenKind::PropertyName | TokenKind::NamedSet => {
                    pattern.push_str(self.bump().0.text().unwrap_or(""));
                }
                TokenKind::Integer => {
                    let n = self.bump().0.intval;
                    pattern.push_str(&n.to_string());
                }
                TokenKind::Times => {
                    self.bump();
                    pattern.push('*');
                }
                TokenKind::Question => {
                    self.bump();
                    pattern.push('?');
                }
                _ => break,
            }
            first = false;
        }

        // `ala10` is residue name `ala` and residue number 10
        let digits_at = pattern
            .rfind(|c: char| !c.is_ascii_digit())
            .map_or(0, |i| i + 1);
        if digits_at > 0 && digits_at < pattern.len() {
            let (name, digits) = pattern.split_at(digits_at);
            self.out
                .push(Token::val(TokenKind::SpecResName, Value::str(name)));
            self.out.push(Token::new(TokenKind::And));
            self.out.push(Token::int(
                TokenKind::SpecResNum,
                digits.parse::<i64>().unwrap_or(0),
            ));
        } else {
            self.out
                .push(Token::val(TokenKind::SpecResName, Value::str(&pattern)));
        }
        Ok(())
    }

    /// `:chain`, `%altloc`, `.atom`: a punctuation-introduced specifier.
    fn spec_suffix(&mut self, kind: TokenKind, have_operand: bool) -> ExprResult<()> {
        let span = self.here();
        self.spec_join(have_operand, span)?;
        self.bump(); // the punctuation
        let mut text = String::new();
        match self.peek_kind() {
            Some(TokenKind::Identifier | TokenKind::PropertyName | TokenKind::NamedSet) => {
                text.push_str(self.bump().0.text().unwrap_or(""));
            }
            Some(TokenKind::Integer) => {
                let n = self.bump().0.intval;
                text.push_str(&n.to_string());
            }
            Some(TokenKind::Times) => {
                self.bump();
                text.push('*');
            }
            _ => {
                return Err(ExprError::invalid("missing specifier value", span));
            }
        }
        // glued wildcard tails (`.C?`, `:A*`)
        while self.adjacent_at(0) {
            match self.peek_kind() {
                Some(TokenKind::Times) => {
                    self.bump();
                    text.push('*');
                }
                Some(TokenKind::Question) => {
                    self.bump();
                    text.push('?');
                }
                Some(TokenKind::Integer) => {
                    let n = self.bump().0.intval;
                    text.push_str(&n.to_string());
                }
                Some(TokenKind::Identifier) => {
                    text.push_str(self.bump().0.text().unwrap_or(""));
                }
                _ => break,
            }
        }
        self.out.push(Token::val(kind, Value::str(&text)));
        Ok(())
    }

    /// `/model` specifier.
    fn spec_model(&mut self, have_operand: bool) -> ExprResult<()> {
        let span = self.here();
        self.spec_join(have_operand, span)?;
        self.bump(); // `/`
        let Some(TokenKind::Integer) = self.peek_kind() else {
            return Err(ExprError::invalid("missing model number after `/`", span));
        };
        let n = self.bump().0.intval;
        self.out.push(Token::int(TokenKind::SpecModel, n));
        Ok(())
    }

    // -- assignment targets --

    /// `name`, `name[i]…`, `name.key…`, `{sel}.prop`.
    fn compile_target(&mut self) -> ExprResult<()> {
        match self.peek_kind() {
            Some(TokenKind::Identifier | TokenKind::PropertyName | TokenKind::NamedSet) => {
                let name = self.bump().0.text().unwrap_or("").to_owned();
                self.out.push(Token::val(TokenKind::Identifier, Value::str(&name)));
            }
            Some(TokenKind::LeftBrace) => {
                self.brace_construct(Ctx::Math)?;
            }
            _ => {
                return Err(ExprError::invalid(
                    "assignment target must be a name or selection",
                    self.here(),
                ));
            }
        }
        loop {
            match self.peek_kind() {
                Some(TokenKind::LeftSquare) => self.index_suffix()?,
                Some(TokenKind::Dot) => {
                    self.bump();
                    match self.peek_kind() {
                        Some(
                            TokenKind::Identifier
                            | TokenKind::PropertyName
                            | TokenKind::NamedSet,
                        ) => {
                            let name = self.bump().0.text().unwrap_or("").to_owned();
                            self.out
                                .push(Token::val(TokenKind::PropGet, Value::str(&name)));
                        }
                        _ => {
                            return Err(ExprError::invalid(
                                "missing name after `.`",
                                self.here(),
                            ))
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }
}

/// If every brace component is a (possibly negated) numeric literal,
/// return the component values. Components separate on commas or simple
/// juxtaposition; the comma-less form requires 3–4 components so ranges
/// like `{2-5}` keep their selection meaning.
fn constant_point_components(body: &[RawTok], has_commas: bool) -> Option<Vec<f64>> {
    let mut components = Vec::new();
    let mut i = 0;
    while i < body.len() {
        let mut neg = false;
        if body[i].0.kind == TokenKind::Minus {
            neg = true;
            i += 1;
        }
        let v = match body.get(i)?.0 {
            Token {
                kind: TokenKind::Integer,
                intval,
                ..
            } => intval as f64,
            Token {
                kind: TokenKind::Decimal,
                value: Some(Value::Float(f)),
                ..
            } => f,
            _ => return None,
        };
        components.push(if neg { -v } else { v });
        i += 1;
        if body.get(i).map(|(t, _)| t.kind) == Some(TokenKind::Comma) {
            i += 1;
        }
    }
    let allowed = if has_commas { 2..=4 } else { 3..=4 };
    if allowed.contains(&components.len()) {
        Some(components)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Raw-token builder with synthetic adjacency-aware spans.
    fn raw(tokens: Vec<Token>) -> Vec<RawTok> {
        // default: one byte of space between tokens (non-adjacent)
        tokens
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, Span::new(i * 10, i * 10 + 5)))
            .collect()
    }

    fn kinds(out: &[Token]) -> Vec<TokenKind> {
        out.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn plain_arithmetic_stays_infix() {
        let out = compile_expression(&raw(vec![
            Token::int(TokenKind::Integer, 2),
            Token::new(TokenKind::Plus),
            Token::int(TokenKind::Integer, 3),
            Token::new(TokenKind::Times),
            Token::int(TokenKind::Integer, 4),
        ]))
        .unwrap();
        assert_eq!(
            kinds(&out),
            vec![
                TokenKind::Integer,
                TokenKind::Plus,
                TokenKind::Integer,
                TokenKind::Times,
                TokenKind::Integer
            ]
        );
    }

    #[test]
    fn unary_minus_is_classified() {
        let out = compile_expression(&raw(vec![
            Token::new(TokenKind::Minus),
            Token::int(TokenKind::Integer, 1),
            Token::new(TokenKind::Plus),
            Token::int(TokenKind::Integer, 2),
        ]))
        .unwrap();
        assert_eq!(out[0].kind, TokenKind::UnaryMinus);
        assert_eq!(out[2].kind, TokenKind::Plus);
    }

    #[test]
    fn property_get_and_method_call() {
        // a.size → PropGet; a.find("x") → MethodCall(argc 1)
        let out = compile_expression(&raw(vec![
            Token::ident("a"),
            Token::new(TokenKind::Dot),
            Token::ident("size"),
        ]))
        .unwrap();
        assert_eq!(
            kinds(&out),
            vec![TokenKind::Identifier, TokenKind::PropGet]
        );

        let out = compile_expression(&raw(vec![
            Token::ident("a"),
            Token::new(TokenKind::Dot),
            Token::ident("find"),
            Token::new(TokenKind::LeftParen),
            Token::val(TokenKind::StringLit, Value::str("x")),
            Token::new(TokenKind::RightParen),
        ]))
        .unwrap();
        assert_eq!(out[1].kind, TokenKind::MethodCall);
        assert_eq!(out[1].intval, 1);
    }

    #[test]
    fn index_vs_array_literal() {
        // a[1]: index
        let out = compile_expression(&raw(vec![
            Token::ident("a"),
            Token::new(TokenKind::LeftSquare),
            Token::int(TokenKind::Integer, 1),
            Token::new(TokenKind::RightSquare),
        ]))
        .unwrap();
        assert_eq!(
            kinds(&out),
            vec![
                TokenKind::Identifier,
                TokenKind::IndexOpen,
                TokenKind::Integer,
                TokenKind::IndexClose
            ]
        );

        // [1, 2]: literal
        let out = compile_expression(&raw(vec![
            Token::new(TokenKind::LeftSquare),
            Token::int(TokenKind::Integer, 1),
            Token::new(TokenKind::Comma),
            Token::int(TokenKind::Integer, 2),
            Token::new(TokenKind::RightSquare),
        ]))
        .unwrap();
        assert_eq!(out.last().unwrap().kind, TokenKind::ArrayBuild);
        assert_eq!(out.last().unwrap().intval, 2);
    }

    #[test]
    fn range_index() {
        let out = compile_expression(&raw(vec![
            Token::ident("a"),
            Token::new(TokenKind::LeftSquare),
            Token::int(TokenKind::Integer, 2),
            Token::new(TokenKind::Colon),
            Token::int(TokenKind::Integer, 4),
            Token::new(TokenKind::RightSquare),
        ]))
        .unwrap();
        let close = out.iter().find(|t| t.kind == TokenKind::IndexClose).unwrap();
        assert_eq!(close.intval, 2);
    }

    #[test]
    fn constant_point_literal() {
        let out = compile_expression(&raw(vec![
            Token::new(TokenKind::LeftBrace),
            Token::int(TokenKind::Integer, 1),
            Token::int(TokenKind::Integer, 2),
            Token::int(TokenKind::Integer, 3),
            Token::new(TokenKind::RightBrace),
        ]))
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, TokenKind::PointConst3);
    }

    #[test]
    fn computed_point_constructor() {
        // {x, 2, 3}
        let out = compile_expression(&raw(vec![
            Token::new(TokenKind::LeftBrace),
            Token::ident("x"),
            Token::new(TokenKind::Comma),
            Token::int(TokenKind::Integer, 2),
            Token::new(TokenKind::Comma),
            Token::int(TokenKind::Integer, 3),
            Token::new(TokenKind::RightBrace),
        ]))
        .unwrap();
        assert_eq!(out[0].kind, TokenKind::PointOpen);
        assert_eq!(out.last().unwrap().kind, TokenKind::PointBuild);
        assert_eq!(out.last().unwrap().intval, 3);
    }

    #[test]
    fn map_literal() {
        let out = compile_expression(&raw(vec![
            Token::new(TokenKind::LeftBrace),
            Token::val(TokenKind::StringLit, Value::str("k")),
            Token::new(TokenKind::Colon),
            Token::int(TokenKind::Integer, 1),
            Token::new(TokenKind::RightBrace),
        ]))
        .unwrap();
        assert_eq!(out[0].kind, TokenKind::MapOpen);
        assert_eq!(out.last().unwrap().kind, TokenKind::MapBuild);
        assert_eq!(out.last().unwrap().intval, 1);
    }

    #[test]
    fn brace_selection_with_specifiers() {
        // {ala and :A}
        let out = compile_expression(&raw(vec![
            Token::new(TokenKind::LeftBrace),
            Token::ident("ala"),
            Token::new(TokenKind::And),
            Token::new(TokenKind::Colon),
            Token::ident("A"),
            Token::new(TokenKind::RightBrace),
        ]))
        .unwrap();
        assert_eq!(
            kinds(&out),
            vec![
                TokenKind::SelectOpen,
                TokenKind::SpecResName,
                TokenKind::And,
                TokenKind::SpecChain,
                TokenKind::SelectClose
            ]
        );
    }

    #[test]
    fn chained_specifiers_join_with_and() {
        // {10:A}: residue 10, chain A
        let out = compile_expression(&raw(vec![
            Token::new(TokenKind::LeftBrace),
            Token::int(TokenKind::Integer, 10),
            Token::new(TokenKind::Colon),
            Token::ident("A"),
            Token::new(TokenKind::RightBrace),
        ]))
        .unwrap();
        assert_eq!(
            kinds(&out),
            vec![
                TokenKind::SelectOpen,
                TokenKind::SpecResNum,
                TokenKind::And,
                TokenKind::SpecChain,
                TokenKind::SelectClose
            ]
        );
    }

    #[test]
    fn residue_range() {
        let out = compile_selection_expression(&raw(vec![
            Token::int(TokenKind::Integer, 10),
            Token::new(TokenKind::Minus),
            Token::int(TokenKind::Integer, 20),
        ]))
        .unwrap();
        assert_eq!(out[0].kind, TokenKind::SpecSeqRange);
        assert_eq!(out[0].intval, 10);
        assert!(matches!(out[0].value, Some(Value::Int(20))));
    }

    #[test]
    fn name_with_trailing_digits_splits() {
        // ala10 → resname ala AND resno 10
        let out = compile_selection_expression(&raw(vec![Token::ident("ala10")])).unwrap();
        assert_eq!(
            kinds(&out),
            vec![TokenKind::SpecResName, TokenKind::And, TokenKind::SpecResNum]
        );
        assert_eq!(out[2].intval, 10);
    }

    #[test]
    fn property_comparison_in_selection() {
        // occupancy > 0.5 (as a bare selection expression)
        let out = compile_selection_expression(&raw(vec![
            Token::val(TokenKind::PropertyName, Value::str("occupancy")),
            Token::new(TokenKind::Gt),
            Token::val(TokenKind::Decimal, Value::Float(0.5)),
        ]))
        .unwrap();
        assert_eq!(
            kinds(&out),
            vec![TokenKind::PropertyName, TokenKind::Gt, TokenKind::Decimal]
        );
    }

    #[test]
    fn equals_means_equality_in_selection() {
        let out = compile_selection_expression(&raw(vec![
            Token::val(TokenKind::PropertyName, Value::str("chain")),
            Token::new(TokenKind::Assign),
            Token::ident("A"),
        ]))
        .unwrap();
        assert_eq!(out[1].kind, TokenKind::EqEq);
        // bare word on the right becomes a string
        assert_eq!(out[2].kind, TokenKind::StringLit);
    }

    #[test]
    fn property_name_is_variable_outside_selection() {
        let out = compile_expression(&raw(vec![Token::val(
            TokenKind::PropertyName,
            Value::str("x"),
        )]))
        .unwrap();
        assert_eq!(out[0].kind, TokenKind::Identifier);
    }

    #[test]
    fn assignment_target_paths() {
        let out = compile_target(&raw(vec![
            Token::ident("a"),
            Token::new(TokenKind::LeftSquare),
            Token::int(TokenKind::Integer, 1),
            Token::new(TokenKind::RightSquare),
            Token::new(TokenKind::Dot),
            Token::ident("k"),
        ]))
        .unwrap();
        assert_eq!(
            kinds(&out),
            vec![
                TokenKind::Identifier,
                TokenKind::IndexOpen,
                TokenKind::Integer,
                TokenKind::IndexClose,
                TokenKind::PropGet
            ]
        );
    }

    // -- errors --

    #[test]
    fn consecutive_operands_fail() {
        let err = compile_expression(&raw(vec![
            Token::int(TokenKind::Integer, 1),
            Token::int(TokenKind::Integer, 2),
        ]))
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidExpression);
    }

    #[test]
    fn dangling_operator_fails() {
        let err = compile_expression(&raw(vec![
            Token::int(TokenKind::Integer, 1),
            Token::new(TokenKind::Plus),
        ]))
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidExpression);
    }

    #[test]
    fn unbalanced_brackets_fail() {
        let err = compile_expression(&raw(vec![
            Token::new(TokenKind::LeftParen),
            Token::int(TokenKind::Integer, 1),
        ]))
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnbalancedDelimiter);
    }

    #[test]
    fn assignment_inside_expression_fails() {
        let err = compile_expression(&raw(vec![
            Token::ident("a"),
            Token::new(TokenKind::Assign),
            Token::int(TokenKind::Integer, 1),
        ]))
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidExpression);
    }

    #[test]
    fn ordering_comparator_on_string_property_fails() {
        let err = compile_selection_expression(&raw(vec![
            Token::val(TokenKind::PropertyName, Value::str("resname")),
            Token::new(TokenKind::Gt),
            Token::ident("ala"),
        ]))
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidExpression);
    }

    #[test]
    fn missing_ternary_colon_fails() {
        let err = compile_expression(&raw(vec![
            Token::int(TokenKind::BoolConst, 1),
            Token::new(TokenKind::Question),
            Token::int(TokenKind::Integer, 1),
        ]))
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidExpression);
    }
}
