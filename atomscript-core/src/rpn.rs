//! The stack-based expression evaluator.
//!
//! Executes a compiled token stream with an operand stack of [`Var`]s and
//! an operator stack of [`Token`]s: operands push; an incoming operator
//! first reduces every stacked operator of higher (or equal, for
//! left-associative) precedence, then pushes. Left delimiters stop
//! reduction; their matching closers reduce back to them.
//!
//! Short-circuit `and`/`or` and the ternary `?:` are *skips*, not
//! no-ops: while skipping, tokens are consumed without any evaluation
//! side effects: function calls and selection-set computation in the
//! untaken branch never execute. A side-stack of `'T'`/`'F'`/`'X'`
//! markers tracks ternary branch state.

use tracing::trace;

use atomscript_math::{math, Point3, Point4, Quaternion};

use crate::bitset::Bitset;
use crate::context::{ComparisonOp, EvalContext};
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::lexer::decode_seqcode;
use crate::ops;
use crate::token::{Token, TokenKind};
use crate::value::{Index, Value, Var};

/// Evaluate a compiled expression stream.
pub fn evaluate(tokens: &[Token], ctx: &mut dyn EvalContext) -> EvalResult<Var> {
    RpnEvaluator::new(ctx).run(tokens)
}

// ---------------------------------------------------------------------------
// Skip state
// ---------------------------------------------------------------------------

/// Active skip mode. `base` is the delimiter depth where the skip began;
/// `cur` tracks depth inside the skipped region.
#[derive(Debug, Clone, Copy)]
enum Skip {
    /// Short-circuited `and`/`or`: skip the right operand, ending at an
    /// operator of precedence `prec` or lower (same depth) or the close
    /// of the enclosing group.
    AndOr { base: usize, cur: usize, prec: u8 },
    /// False ternary condition: skip to the matching `:`.
    ToColon { base: usize, cur: usize, nested: u32 },
    /// True branch consumed: skip the alternate branch to the end of the
    /// ternary's scope.
    ToEnd { base: usize, cur: usize, nested: u32 },
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// One expression evaluation's state. Not reentrant; nested evaluations
/// use fresh instances.
pub struct RpnEvaluator<'a> {
    ctx: &'a mut dyn EvalContext,
    o_stack: Vec<Var>,
    op_stack: Vec<Token>,
    /// Ternary branch markers with the depth they were opened at.
    tf_stack: Vec<(char, usize)>,
    depth: usize,
    skip: Option<Skip>,
}

const fn is_open_delim(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::LeftParen
            | TokenKind::ArrayOpen
            | TokenKind::IndexOpen
            | TokenKind::SelectOpen
            | TokenKind::MapOpen
            | TokenKind::PointOpen
    )
}

const fn is_close_delim(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::RightParen
            | TokenKind::ArrayClose
            | TokenKind::IndexClose
            | TokenKind::SelectClose
            | TokenKind::MapClose
            | TokenKind::PointClose
    )
}

impl<'a> RpnEvaluator<'a> {
    /// Create an evaluator over a context.
    pub fn new(ctx: &'a mut dyn EvalContext) -> Self {
        Self {
            ctx,
            o_stack: Vec::with_capacity(16),
            op_stack: Vec::with_capacity(16),
            tf_stack: Vec::new(),
            depth: 0,
            skip: None,
        }
    }

    /// Execute a token stream and return the single result value.
    pub fn run(&mut self, tokens: &[Token]) -> EvalResult<Var> {
        for tok in tokens {
            if self.skip.is_some() && self.skip_token(tok) {
                continue;
            }
            self.process(tok)?;
        }
        // a ternary tail may legitimately reach end-of-input while
        // skipping; any other leftover skip state means the same thing
        self.skip = None;
        self.tf_stack.clear();

        while let Some(op) = self.op_stack.pop() {
            if is_open_delim(op.kind) {
                return Err(EvalError::new(
                    EvalErrorKind::Internal,
                    "unbalanced delimiter in compiled expression",
                ));
            }
            self.apply(&op)?;
        }
        match self.o_stack.len() {
            1 => Ok(self.o_stack.pop().expect("result")),
            0 => Err(EvalError::underflow("expression result")),
            _ => Err(EvalError::new(
                EvalErrorKind::Internal,
                "operands left on stack",
            )),
        }
    }

    // -- skip handling --

    /// Consume one token in skip mode. Returns `false` when the token
    /// terminates the skip and must be processed normally.
    fn skip_token(&mut self, tok: &Token) -> bool {
        let Some(skip) = self.skip else {
            return false;
        };
        let kind = tok.kind;
        match skip {
            Skip::AndOr { base, mut cur, prec } => {
                if is_open_delim(kind) {
                    cur += 1;
                } else if is_close_delim(kind) {
                    if cur == base {
                        self.skip = None;
                        return false;
                    }
                    cur -= 1;
                } else if cur == base {
                    if let Some(p) = kind.precedence() {
                        if !kind.is_prefix() && p <= prec {
                            self.skip = None;
                            return false;
                        }
                    }
                }
                self.skip = Some(Skip::AndOr { base, cur, prec });
                true
            }
            Skip::ToColon {
                base,
                mut cur,
                mut nested,
            } => {
                if is_open_delim(kind) {
                    cur += 1;
                } else if is_close_delim(kind) {
                    if cur == base {
                        // malformed ternary; let the closer resolve things
                        self.skip = None;
                        return false;
                    }
                    cur -= 1;
                } else if cur == base {
                    match kind {
                        TokenKind::Question => nested += 1,
                        TokenKind::TernaryColon if nested > 0 => nested -= 1,
                        TokenKind::TernaryColon => {
                            // found our `:`: consume it, evaluate branch b
                            if let Some(top) = self.tf_stack.last_mut() {
                                top.0 = 'X';
                            }
                            self.skip = None;
                            return true;
                        }
                        _ => {}
                    }
                }
                self.skip = Some(Skip::ToColon { base, cur, nested });
                true
            }
            Skip::ToEnd {
                base,
                mut cur,
                mut nested,
            } => {
                if is_open_delim(kind) {
                    cur += 1;
                } else if is_close_delim(kind) {
                    if cur == base {
                        self.skip = None;
                        return false;
                    }
                    cur -= 1;
                } else if cur == base {
                    match kind {
                        TokenKind::Comma | TokenKind::MapColon | TokenKind::RangeColon => {
                            self.skip = None;
                            return false;
                        }
                        TokenKind::Question => nested += 1,
                        TokenKind::TernaryColon if nested > 0 => nested -= 1,
                        _ => {}
                    }
                }
                self.skip = Some(Skip::ToEnd { base, cur, nested });
                true
            }
        }
    }

    // -- token processing --

    fn process(&mut self, tok: &Token) -> EvalResult<()> {
        trace!(kind = ?tok.kind, "rpn token");
        let kind = tok.kind;

        if is_open_delim(kind) {
            self.op_stack.push(tok.clone());
            self.depth += 1;
            return Ok(());
        }
        if is_close_delim(kind) {
            return self.close_group(tok);
        }

        match kind {
            TokenKind::Comma | TokenKind::MapColon | TokenKind::RangeColon => {
                self.reduce_to_delim()?;
                self.pop_markers(self.depth);
                Ok(())
            }

            // builders
            TokenKind::ArrayBuild => {
                let items = self.pop_n(tok.intval as usize, "array literal")?;
                self.o_stack.push(Var::new(Value::array(items)));
                Ok(())
            }
            TokenKind::MapBuild => {
                let flat = self.pop_n(tok.intval as usize * 2, "hash literal")?;
                let mut map = indexmap::IndexMap::new();
                let mut it = flat.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    map.insert(k.to_string(), v);
                }
                self.o_stack.push(Var::new(Value::map(map)));
                Ok(())
            }
            TokenKind::PointBuild => {
                let parts = self.pop_n(tok.intval as usize, "point constructor")?;
                let c: Vec<f64> = parts.iter().map(Var::to_float).collect();
                let v = match c.len() {
                    2 => Value::Point3(Point3::new(c[0], c[1], 0.0)),
                    3 => Value::Point3(Point3::new(c[0], c[1], c[2])),
                    4 => Value::Point4(Point4::new(c[0], c[1], c[2], c[3])),
                    n => {
                        return Err(EvalError::new(
                            EvalErrorKind::BadArgument,
                            format!("a point takes 2 to 4 components, got {n}"),
                        ))
                    }
                };
                self.o_stack.push(Var::new(v));
                Ok(())
            }

            // calls wait for their argument list to close
            TokenKind::FuncCall | TokenKind::MethodCall => {
                self.op_stack.push(tok.clone());
                Ok(())
            }

            TokenKind::PropGet => self.apply_propget(tok),

            // ternary
            TokenKind::Question => {
                self.reduce_while(2, true)?;
                let cond = self.pop("ternary condition")?;
                let taken = cond.truthy();
                self.tf_stack
                    .push((if taken { 'T' } else { 'F' }, self.depth));
                if !taken {
                    self.skip = Some(Skip::ToColon {
                        base: self.depth,
                        cur: self.depth,
                        nested: 0,
                    });
                }
                Ok(())
            }
            TokenKind::TernaryColon => {
                // the true branch just finished evaluating
                self.reduce_while(2, true)?;
                if let Some(top) = self.tf_stack.last_mut() {
                    top.0 = 'X';
                }
                self.skip = Some(Skip::ToEnd {
                    base: self.depth,
                    cur: self.depth,
                    nested: 0,
                });
                Ok(())
            }

            // short-circuiting logical operators
            TokenKind::And | TokenKind::Or => {
                let p = kind.precedence().expect("and/or precedence");
                self.reduce_while(p, true)?;
                let short = matches!(
                    self.o_stack.last().map(|v| &v.value),
                    Some(Value::Bool(b))
                        if (kind == TokenKind::And && !*b) || (kind == TokenKind::Or && *b)
                );
                if short {
                    // the left operand IS the result; skip the right side
                    self.skip = Some(Skip::AndOr {
                        base: self.depth,
                        cur: self.depth,
                        prec: p,
                    });
                } else {
                    self.op_stack.push(tok.clone());
                }
                Ok(())
            }

            k if k.precedence().is_some() => {
                if !k.is_prefix() {
                    let p = k.precedence().expect("operator precedence");
                    self.reduce_while(p, !k.is_right_assoc())?;
                }
                self.op_stack.push(tok.clone());
                Ok(())
            }

            // operands
            _ => {
                let v = self.operand(tok)?;
                self.o_stack.push(v);
                Ok(())
            }
        }
    }

    /// Process a close delimiter: reduce to the opener, pop it, then run
    /// the close-specific behavior.
    fn close_group(&mut self, tok: &Token) -> EvalResult<()> {
        self.reduce_to_delim()?;
        let Some(open) = self.op_stack.pop() else {
            return Err(EvalError::underflow("close delimiter"));
        };
        if !is_open_delim(open.kind) {
            return Err(EvalError::new(
                EvalErrorKind::Internal,
                "mismatched delimiter in compiled expression",
            ));
        }
        self.pop_markers(self.depth);
        self.depth = self.depth.saturating_sub(1);

        match tok.kind {
            TokenKind::RightParen => {
                // a pending call owns this argument list
                if matches!(
                    self.op_stack.last().map(|t| t.kind),
                    Some(TokenKind::FuncCall | TokenKind::MethodCall)
                ) {
                    let call = self.op_stack.pop().expect("call token");
                    return self.apply_call(&call);
                }
                Ok(())
            }
            TokenKind::IndexClose => self.apply_index(tok.intval),
            TokenKind::SelectClose => self.coerce_selection(),
            _ => Ok(()),
        }
    }

    // -- stack plumbing --

    fn pop(&mut self, what: &str) -> EvalResult<Var> {
        self.o_stack
            .pop()
            .ok_or_else(|| EvalError::underflow(what))
    }

    fn pop_n(&mut self, n: usize, what: &str) -> EvalResult<Vec<Var>> {
        if self.o_stack.len() < n {
            return Err(EvalError::underflow(what));
        }
        Ok(self.o_stack.split_off(self.o_stack.len() - n))
    }

    fn pop_markers(&mut self, depth: usize) {
        while self
            .tf_stack
            .last()
            .is_some_and(|(_, d)| *d >= depth)
        {
            self.tf_stack.pop();
        }
    }

    /// Reduce stacked operators that bind at least as tightly as an
    /// incoming operator of precedence `p`.
    fn reduce_while(&mut self, p: u8, allow_equal: bool) -> EvalResult<()> {
        loop {
            let Some(top) = self.op_stack.last() else {
                return Ok(());
            };
            if is_open_delim(top.kind)
                || matches!(top.kind, TokenKind::FuncCall | TokenKind::MethodCall)
            {
                return Ok(());
            }
            let Some(tp) = top.kind.precedence() else {
                return Ok(());
            };
            if tp > p || (allow_equal && tp == p) {
                let op = self.op_stack.pop().expect("operator");
                self.apply(&op)?;
            } else {
                return Ok(());
            }
        }
    }

    fn reduce_to_delim(&mut self) -> EvalResult<()> {
        while let Some(top) = self.op_stack.last() {
            if is_open_delim(top.kind) {
                return Ok(());
            }
            let op = self.op_stack.pop().expect("operator");
            self.apply(&op)?;
        }
        Err(EvalError::new(
            EvalErrorKind::Internal,
            "close with no matching open delimiter",
        ))
    }

    /// Apply one popped operator to the operand stack.
    fn apply(&mut self, op: &Token) -> EvalResult<()> {
        let kind = op.kind;
        let universe = self.ctx.model().entity_count();

        if matches!(kind, TokenKind::Not | TokenKind::UnaryMinus) {
            let v = self.pop("unary operand")?;
            self.o_stack.push(ops::unary(kind, &v, universe)?);
            return Ok(());
        }
        if matches!(kind, TokenKind::FuncCall | TokenKind::MethodCall) {
            return Err(EvalError::new(
                EvalErrorKind::Internal,
                "call token reduced without its argument list",
            ));
        }

        let right = self.pop("right operand")?;
        let left = self.pop("left operand")?;

        // property comparisons route through the model accessor
        if kind.is_comparison() {
            if let Value::Property(name) = &left.value {
                let result = self.property_compare(&name.clone(), kind, false, &right)?;
                self.o_stack.push(result);
                return Ok(());
            }
            if let Value::Property(name) = &right.value {
                let result = self.property_compare(&name.clone(), kind, true, &left)?;
                self.o_stack.push(result);
                return Ok(());
            }
        }
        if matches!(left.value, Value::Property(_)) || matches!(right.value, Value::Property(_)) {
            return Err(EvalError::type_mismatch(
                "a property reference needs a comparison operator",
            ));
        }

        self.o_stack.push(ops::binary(kind, &left, &right, universe)?);
        Ok(())
    }

    fn property_compare(
        &mut self,
        property: &str,
        kind: TokenKind,
        flipped: bool,
        value: &Var,
    ) -> EvalResult<Var> {
        let Some(mut op) = ComparisonOp::from_token(kind) else {
            return Err(EvalError::type_mismatch(
                "a property reference needs a comparison operator",
            ));
        };
        if flipped {
            op = op.flipped();
        }
        let model = self.ctx.model();
        let bs = match &value.value {
            Value::Int(i) => model.compare_int(property, op, *i)?,
            Value::Bool(b) => model.compare_int(property, op, i64::from(*b))?,
            Value::Float(f) => model.compare_float(property, op, *f)?,
            Value::Str(s) => model.compare_string(property, op, s)?,
            other => {
                return Err(EvalError::type_mismatch(format!(
                    "cannot compare property `{property}` with {}",
                    other.kind_name()
                )))
            }
        };
        Ok(Var::new(Value::Bitset(bs)))
    }

    // -- operand resolution --

    fn operand(&mut self, tok: &Token) -> EvalResult<Var> {
        Ok(match tok.kind {
            TokenKind::Integer => Var::int(tok.intval),
            TokenKind::BoolConst => Var::bool(tok.intval != 0),
            TokenKind::Decimal
            | TokenKind::StringLit
            | TokenKind::ImpliedString
            | TokenKind::PointConst3
            | TokenKind::PointConst4
            | TokenKind::BitsetConst => Var::new(tok.value.clone().unwrap_or_else(Value::empty)),
            TokenKind::Identifier => {
                let name = tok.text().unwrap_or("");
                // undefined variables read as the empty value
                self.ctx
                    .variables()
                    .get(name)
                    .unwrap_or_else(Var::empty)
                    .named(name)
            }
            TokenKind::PropertyName => Var::new(Value::Property(std::sync::Arc::from(
                tok.text().unwrap_or(""),
            ))),
            TokenKind::NamedSet => {
                let name = tok.text().unwrap_or("");
                let bs = self.resolve_named_set(name)?;
                Var::new(Value::Bitset(bs))
            }
            TokenKind::ObjectId => {
                let name = tok.text().unwrap_or("");
                let bs = self.ctx.model().object_set(name).ok_or_else(|| {
                    EvalError::new(
                        EvalErrorKind::UnknownSet,
                        format!("no object named ${name}"),
                    )
                })?;
                Var::new(Value::Bitset(bs))
            }
            TokenKind::SpecAll => {
                Var::new(Value::Bitset(Bitset::all(self.ctx.model().entity_count())))
            }
            TokenKind::SpecResName => {
                let pattern = tok.text().unwrap_or("*");
                let bs = self
                    .ctx
                    .model()
                    .compare_string("resname", ComparisonOp::Eq, pattern)?;
                Var::new(Value::Bitset(bs))
            }
            TokenKind::SpecResNum => {
                let bs = self
                    .ctx
                    .model()
                    .compare_int("resno", ComparisonOp::Eq, tok.intval)?;
                Var::new(Value::Bitset(bs))
            }
            TokenKind::SpecSeqRange => {
                let lo = tok.intval;
                let hi = match tok.value {
                    Some(Value::Int(hi)) => hi,
                    _ => lo,
                };
                let model = self.ctx.model();
                let ge = model.compare_int("resno", ComparisonOp::Ge, lo)?;
                let le = model.compare_int("resno", ComparisonOp::Le, hi)?;
                Var::new(Value::Bitset(ge.and(&le)))
            }
            TokenKind::SpecSeqCode => {
                let (num, ins) = decode_seqcode(tok.intval);
                let model = self.ctx.model();
                let ins_match =
                    model.compare_string("inscode", ComparisonOp::Eq, &ins.to_string())?;
                if num == crate::compiler::SEQ_WILDCARD {
                    Var::new(Value::Bitset(ins_match))
                } else {
                    let num_match =
                        model.compare_int("resno", ComparisonOp::Eq, i64::from(num))?;
                    Var::new(Value::Bitset(num_match.and(&ins_match)))
                }
            }
            TokenKind::SpecChain => {
                let bs = self.ctx.model().compare_string(
                    "chain",
                    ComparisonOp::Eq,
                    tok.text().unwrap_or("*"),
                )?;
                Var::new(Value::Bitset(bs))
            }
            TokenKind::SpecAtom => {
                let bs = self.ctx.model().compare_string(
                    "atomname",
                    ComparisonOp::Eq,
                    tok.text().unwrap_or("*"),
                )?;
                Var::new(Value::Bitset(bs))
            }
            TokenKind::SpecAltLoc => {
                let bs = self.ctx.model().compare_string(
                    "altloc",
                    ComparisonOp::Eq,
                    tok.text().unwrap_or("*"),
                )?;
                Var::new(Value::Bitset(bs))
            }
            TokenKind::SpecModel => {
                let bs = self
                    .ctx
                    .model()
                    .compare_int("model", ComparisonOp::Eq, tok.intval)?;
                Var::new(Value::Bitset(bs))
            }
            other => {
                return Err(EvalError::new(
                    EvalErrorKind::Internal,
                    format!("unexpected token in evaluation: {other:?}"),
                ))
            }
        })
    }

    fn resolve_named_set(&mut self, name: &str) -> EvalResult<Bitset> {
        let model = self.ctx.model();
        match name {
            "all" => Ok(Bitset::all(model.entity_count())),
            "none" => Ok(Bitset::new()),
            "selected" => Ok(model.current_selection()),
            other => model.named_set(other).ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::UnknownSet,
                    format!("the model defines no set `{other}`"),
                )
            }),
        }
    }

    // -- indexing and selection coercion --

    fn apply_index(&mut self, parts: i64) -> EvalResult<()> {
        let index = if parts == 2 {
            let hi = self.pop("range upper bound")?;
            let lo = self.pop("range lower bound")?;
            Index::Range(lo.to_int(), hi.to_int())
        } else {
            let idx = self.pop("index")?;
            match &idx.value {
                Value::Str(s) => Index::Key(s.to_string()),
                _ => Index::Single(idx.to_int()),
            }
        };
        let target = self.pop("index target")?;
        self.o_stack.push(target.select_item(&index));
        Ok(())
    }

    /// The result of a `{…}` selection must be a set; booleans promote.
    fn coerce_selection(&mut self) -> EvalResult<()> {
        let v = self.pop("selection result")?;
        let bs = match v.value {
            Value::Bitset(bs) => bs,
            Value::Bool(true) => Bitset::all(self.ctx.model().entity_count()),
            Value::Bool(false) => Bitset::new(),
            other => {
                return Err(EvalError::type_mismatch(format!(
                    "selection produced {}, not a set",
                    other.kind_name()
                )))
            }
        };
        self.o_stack.push(Var::new(Value::Bitset(bs)));
        Ok(())
    }

    // -- property get --

    fn apply_propget(&mut self, tok: &Token) -> EvalResult<()> {
        let name = tok.text().unwrap_or("").to_owned();
        let target = self.pop("property target")?;
        let result = if tok.intval == 1 {
            // `..name` maps over array elements
            let Value::Array(items) = &target.value else {
                return Err(EvalError::type_mismatch(
                    "`..` needs an array on the left",
                ));
            };
            let items = items.borrow().clone();
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(self.member(&item, &name)?);
            }
            Var::new(Value::array(out))
        } else {
            self.member(&target, &name)?
        };
        self.o_stack.push(result);
        Ok(())
    }

    fn member(&mut self, target: &Var, name: &str) -> EvalResult<Var> {
        // universal members match case-insensitively; hash keys keep case
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "size" | "count" | "length" => {
                return Ok(Var::int(target.value.item_count() as i64));
            }
            "type" => return Ok(Var::str(target.value.kind_name())),
            _ => {}
        }
        match (&target.value, lower.as_str()) {
            (Value::Point3(p), "x") => Ok(Var::float(p.x)),
            (Value::Point3(p), "y") => Ok(Var::float(p.y)),
            (Value::Point3(p), "z") => Ok(Var::float(p.z)),
            (Value::Point4(p), "x") => Ok(Var::float(p.x)),
            (Value::Point4(p), "y") => Ok(Var::float(p.y)),
            (Value::Point4(p), "z") => Ok(Var::float(p.z)),
            (Value::Point4(p), "w") => Ok(Var::float(p.w)),
            (Value::Bitset(bs), prop) => {
                // per-entity property values; a single entity collapses
                let values = self.ctx.model().property_values(bs, prop)?;
                if values.len() == 1 {
                    Ok(values.into_iter().next().expect("single value"))
                } else {
                    Ok(Var::new(Value::array(values)))
                }
            }
            (Value::Array(_), "min" | "max" | "sum" | "average" | "stddev") => {
                numeric_reduce(target, name)
            }
            (Value::Map(m), "keys") => {
                let keys = m.borrow().keys().map(Var::str).collect();
                Ok(Var::new(Value::array(keys)))
            }
            (Value::Map(_) | Value::Context(_), _) => {
                Ok(target.select_item(&Index::Key(name.to_owned())))
            }
            (other, prop) => Err(EvalError::type_mismatch(format!(
                "{} has no property `{prop}`",
                other.kind_name()
            ))),
        }
    }

    // -- calls --

    fn apply_call(&mut self, call: &Token) -> EvalResult<()> {
        let name = call.text().unwrap_or("").to_ascii_lowercase();
        let argc = call.intval as usize;
        let args = self.pop_n(argc, "call arguments")?;
        let target = if call.kind == TokenKind::MethodCall {
            Some(self.pop("method target")?)
        } else {
            None
        };
        let result = self.call(&name, target, args)?;
        self.o_stack.push(result);
        Ok(())
    }

    fn call(&mut self, name: &str, target: Option<Var>, args: Vec<Var>) -> EvalResult<Var> {
        if let Some(target) = target {
            return method_call(name, &target, &args);
        }
        if let Some(v) = builtin_function(name, &args)? {
            return Ok(v);
        }
        if let Some(v) = self.ctx.call_function(name, args)? {
            return Ok(v);
        }
        Err(EvalError::new(
            EvalErrorKind::UnknownFunction,
            format!("unknown function `{name}`"),
        ))
    }
}

// ---------------------------------------------------------------------------
// Built-in functions
// ---------------------------------------------------------------------------

fn arg(args: &[Var], i: usize, name: &str) -> EvalResult<Var> {
    args.get(i).cloned().ok_or_else(|| {
        EvalError::new(
            EvalErrorKind::BadArgument,
            format!("missing argument {} to {name}", i + 1),
        )
    })
}

fn point_arg(args: &[Var], i: usize, name: &str) -> EvalResult<Point3> {
    match arg(args, i, name)?.value {
        Value::Point3(p) => Ok(p),
        other => Err(EvalError::new(
            EvalErrorKind::BadArgument,
            format!("{name} needs a point, got {}", other.kind_name()),
        )),
    }
}

/// A cheap xorshift generator for `random()`; seeded per call from the
/// clock.
fn pseudo_random() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let mut x = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0x9e37_79b9)
        | 1;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    (x >> 11) as f64 / (1u64 << 53) as f64
}

/// Dispatch a free function; `Ok(None)` when unknown.
fn builtin_function(name: &str, args: &[Var]) -> EvalResult<Option<Var>> {
    let unary_float = |f: fn(f64) -> f64| -> EvalResult<Var> {
        Ok(Var::float(f(arg(args, 0, name)?.to_float())))
    };
    Ok(Some(match name {
        "abs" => match arg(args, 0, name)?.value {
            Value::Int(i) => Var::int(i.abs()),
            v => Var::float(v.to_float().abs()),
        },
        "sqrt" => unary_float(math::sqrt_clamped)?,
        "sin" => unary_float(math::sind)?,
        "cos" => unary_float(math::cosd)?,
        "tan" => unary_float(math::tand)?,
        "acos" => unary_float(math::acosd)?,
        "floor" => Var::int(arg(args, 0, name)?.to_float().floor() as i64),
        "random" => Var::float(pseudo_random()),
        "distance" => {
            let p = point_arg(args, 0, name)?;
            let q = point_arg(args, 1, name)?;
            Var::float(p.distance(q))
        }
        "cross" => {
            let p = point_arg(args, 0, name)?;
            let q = point_arg(args, 1, name)?;
            Var::new(Value::Point3(p.cross(q)))
        }
        "dot" => {
            let p = point_arg(args, 0, name)?;
            let q = point_arg(args, 1, name)?;
            Var::float(p.dot(q))
        }
        "quaternion" => {
            // axis-angle {x y z deg} → unit quaternion components
            let q = match arg(args, 0, name)?.value {
                Value::Point4(p) => Quaternion::from_point4(p),
                Value::Point3(p) => Quaternion::from_axis_angle(p, 0.0),
                other => {
                    return Err(EvalError::new(
                        EvalErrorKind::BadArgument,
                        format!("quaternion needs an axis-angle point, got {}", other.kind_name()),
                    ))
                }
            };
            Var::new(Value::Point4(Point4::new(q.x, q.y, q.z, q.w)))
        }
        "qmatrix" => {
            let Value::Point4(p) = arg(args, 0, name)?.value else {
                return Err(EvalError::new(
                    EvalErrorKind::BadArgument,
                    "qmatrix needs a quaternion point4",
                ));
            };
            let q = Quaternion::new(p.x, p.y, p.z, p.w);
            Var::new(Value::Matrix3(q.to_matrix()))
        }
        "qrotate" => {
            let Value::Point4(p) = arg(args, 0, name)?.value else {
                return Err(EvalError::new(
                    EvalErrorKind::BadArgument,
                    "qrotate needs a quaternion point4",
                ));
            };
            let v = point_arg(args, 1, name)?;
            let q = Quaternion::new(p.x, p.y, p.z, p.w);
            Var::new(Value::Point3(q.transform(v)))
        }
        "array" => Var::new(Value::array(args.to_vec())),
        "str" => Var::str(arg(args, 0, name)?.to_string()),
        "format" => {
            let fmt = arg(args, 0, name)?.to_string();
            let mut out = String::new();
            let mut next = 1;
            let mut chars = fmt.chars().peekable();
            while let Some(c) = chars.next() {
                if c != '%' {
                    out.push(c);
                    continue;
                }
                match chars.next() {
                    Some('%') => out.push('%'),
                    Some('s') => {
                        out.push_str(&arg(args, next, name)?.to_string());
                        next += 1;
                    }
                    Some('d') => {
                        out.push_str(&arg(args, next, name)?.to_int().to_string());
                        next += 1;
                    }
                    Some('f') => {
                        out.push_str(&Value::Float(arg(args, next, name)?.to_float()).to_string());
                        next += 1;
                    }
                    other => {
                        out.push('%');
                        if let Some(o) = other {
                            out.push(o);
                        }
                    }
                }
            }
            Var::str(out)
        }
        _ => return Ok(None),
    }))
}

/// Dispatch a method call on a target value.
fn method_call(name: &str, target: &Var, args: &[Var]) -> EvalResult<Var> {
    match (name, &target.value) {
        ("find", Value::Str(s)) => {
            let sub = arg(args, 0, name)?.to_string();
            let pos = s
                .to_ascii_lowercase()
                .find(&sub.to_ascii_lowercase())
                .map_or(0, |b| s[..b].chars().count() + 1);
            Ok(Var::int(pos as i64))
        }
        ("replace", Value::Str(s)) => {
            let from = arg(args, 0, name)?.to_string();
            let to = arg(args, 1, name)?.to_string();
            Ok(Var::str(s.replace(&from, &to)))
        }
        ("split", Value::Str(s)) => {
            let sep = arg(args, 0, name)?.to_string();
            let parts: Vec<Var> = if sep.is_empty() {
                s.split_whitespace().map(Var::str).collect()
            } else {
                s.split(sep.as_str()).map(Var::str).collect()
            };
            Ok(Var::new(Value::array(parts)))
        }
        ("trim", Value::Str(s)) => Ok(Var::str(s.trim())),
        ("join", Value::Array(items)) => {
            let sep = args.first().map_or_else(String::new, |v| v.to_string());
            let joined = items
                .borrow()
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(&sep);
            Ok(Var::str(joined))
        }
        ("push", Value::Array(items)) => {
            // mutates the shared array and returns it
            items.borrow_mut().push(arg(args, 0, name)?);
            Ok(target.clone())
        }
        ("pop", Value::Array(items)) => {
            let v = items.borrow_mut().pop().unwrap_or_else(Var::empty);
            Ok(v)
        }
        ("deepcopy", _) => Ok(target.deep_copy()),
        ("min" | "max" | "sum" | "average" | "stddev", Value::Array(_)) => {
            numeric_reduce(target, name)
        }
        (other, v) => Err(EvalError::new(
            EvalErrorKind::UnknownFunction,
            format!("{} has no method `{other}`", v.kind_name()),
        )),
    }
}

/// Aggregate reductions over an array of numbers.
fn numeric_reduce(target: &Var, name: &str) -> EvalResult<Var> {
    let Value::Array(items) = &target.value else {
        return Err(EvalError::type_mismatch(format!(
            "`{name}` needs an array, got {}",
            target.value.kind_name()
        )));
    };
    let values: Vec<f64> = items.borrow().iter().map(Var::to_float).collect();
    if values.is_empty() {
        return Ok(Var::int(0));
    }
    let sum: f64 = values.iter().sum();
    Ok(match name {
        "min" => Var::float(values.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Var::float(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        "sum" => Var::float(sum),
        "average" => Var::float(sum / values.len() as f64),
        _ => Var::float(math::stddev(&values)),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
