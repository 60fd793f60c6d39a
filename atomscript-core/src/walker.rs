//! Reference walker for compiled programs.
//!
//! Executes a [`CompiledProgram`] by following statement linkage: branch
//! jumps along `if`/`elseif` chains, the loop head/tail 2-cycle,
//! `break`/`continue` exits, switch dispatch, detached function/try
//! units, and `set`-statement assignment paths. Expressions are handed to
//! the RPN evaluator; rendering/model side effects go to the
//! [`CommandSink`] collaborator untouched.
//!
//! This walker is intentionally minimal: it exists so compiled flow
//! linkage can be exercised end-to-end (and to back the command-line
//! `run` mode). It is not the application's full statement executor.

use tracing::trace;

use crate::bitset::Bitset;
use crate::context::{CommandSink, EvalContext, PropertyAccessor, VariableStore};
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::ops;
use crate::program::{command_name, CompiledProgram, FunctionUnit, Link, Statement};
use crate::rpn;
use crate::token::{Token, TokenKind};
use crate::value::{store_in_value, Index, Value, Var};

/// Function-call recursion limit.
const MAX_CALL_DEPTH: usize = 100;

/// How a statement block finished.
enum Outcome {
    /// Ran to the end.
    Done,
    /// A `return` fired.
    Returned(Var),
}

/// Walks one compiled program against the collaborator traits.
pub struct Walker<'a> {
    program: &'a CompiledProgram,
    vars: &'a mut dyn VariableStore,
    model: &'a mut dyn PropertyAccessor,
    sink: &'a mut dyn CommandSink,
    call_depth: usize,
}

impl EvalContext for Walker<'_> {
    fn variables(&mut self) -> &mut dyn VariableStore {
        &mut *self.vars
    }

    fn model(&mut self) -> &mut dyn PropertyAccessor {
        &mut *self.model
    }

    fn call_function(&mut self, name: &str, args: Vec<Var>) -> EvalResult<Option<Var>> {
        let program = self.program;
        let Some(&ui) = program.functions.get(&name.to_ascii_lowercase()) else {
            return Ok(None);
        };
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(EvalError::new(
                EvalErrorKind::Internal,
                format!("call depth limit reached in `{name}`"),
            ));
        }
        let unit = &program.units[ui];
        self.vars.push_scope();
        for (i, p) in unit.params.iter().enumerate() {
            self.vars
                .declare(p, args.get(i).cloned().unwrap_or_else(Var::empty));
        }
        self.call_depth += 1;
        let outcome = self.exec_statements(&unit.body, None);
        self.call_depth -= 1;
        self.vars.pop_scope();
        match outcome? {
            Outcome::Returned(v) => Ok(Some(v)),
            Outcome::Done => Ok(Some(Var::empty())),
        }
    }
}

impl<'a> Walker<'a> {
    /// Create a walker over a program and its collaborators.
    pub fn new(
        program: &'a CompiledProgram,
        vars: &'a mut dyn VariableStore,
        model: &'a mut dyn PropertyAccessor,
        sink: &'a mut dyn CommandSink,
    ) -> Self {
        Self {
            program,
            vars,
            model,
            sink,
            call_depth: 0,
        }
    }

    /// Execute the whole program.
    pub fn run(&mut self) -> EvalResult<()> {
        let program = self.program;
        self.exec_statements(&program.statements, None)?;
        Ok(())
    }

    fn eval(&mut self, tokens: &[Token], line: u32) -> EvalResult<Var> {
        rpn::evaluate(tokens, self).map_err(|e| e.at_line(line))
    }

    // -- the statement loop --

    #[allow(clippy::too_many_lines)]
    fn exec_statements(
        &mut self,
        stmts: &'a [Statement],
        unit: Option<&'a FunctionUnit>,
    ) -> EvalResult<Outcome> {
        let mut pc = 0usize;
        let mut branch_jumped = false;
        let mut loop_back = false;
        // (end index, switch value, matched)
        let mut switches: Vec<(usize, Var, bool)> = Vec::new();
        let mut catch_at = unit.and_then(|u| u.catch_index);

        while pc < stmts.len() {
            while switches.last().is_some_and(|(end, _, _)| *end < pc) {
                switches.pop();
            }
            let stmt = &stmts[pc];
            let line = stmt.line;
            trace!(pc, line, kind = ?stmt.command_kind(), "walk");
            let jumped = std::mem::take(&mut branch_jumped);
            let from_loop = std::mem::take(&mut loop_back);

            let step = self.exec_one(
                stmt,
                pc,
                jumped,
                from_loop,
                &mut switches,
                &mut branch_jumped,
                &mut loop_back,
            );
            match step {
                Ok(Step::Goto(next)) => pc = next,
                Ok(Step::Return(v)) => return Ok(Outcome::Returned(v)),
                Err(e) => {
                    // a try body diverts recoverable errors to its catch
                    if let (Some(ci), false) = (catch_at, e.kind.is_fatal()) {
                        let catch_stmt = &stmts[ci];
                        let catch_var = catch_stmt
                            .tokens
                            .iter()
                            .find(|t| t.kind == TokenKind::Identifier)
                            .and_then(Token::text);
                        if let Some(name) = catch_var {
                            self.vars.declare(name, Var::str(e.message.clone()));
                        }
                        catch_at = None;
                        pc = ci + 1;
                        continue;
                    }
                    return Err(e.at_line(line));
                }
            }
        }
        Ok(Outcome::Done)
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_one(
        &mut self,
        stmt: &'a Statement,
        pc: usize,
        jumped: bool,
        from_loop: bool,
        switches: &mut Vec<(usize, Var, bool)>,
        branch_jumped: &mut bool,
        loop_back: &mut bool,
    ) -> EvalResult<Step> {
        let line = stmt.line;
        let tokens = &stmt.tokens;
        let kind = stmt
            .command_kind()
            .ok_or_else(|| EvalError::new(EvalErrorKind::Internal, "empty statement"))?;

        Ok(match kind {
            TokenKind::Set | TokenKind::VarDecl => {
                self.exec_assignment(kind, tokens, line)?;
                Step::Goto(pc + 1)
            }
            TokenKind::Print => {
                let text = if tokens.len() > 1 {
                    self.eval(&tokens[1..], line)?.to_string()
                } else {
                    String::new()
                };
                self.sink.echo(&text);
                Step::Goto(pc + 1)
            }
            TokenKind::Echo | TokenKind::Message => {
                let text = tokens[1..]
                    .iter()
                    .filter_map(Token::text)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.sink.echo(&text);
                Step::Goto(pc + 1)
            }
            TokenKind::ExprCommand => {
                self.eval(&tokens[1..], line)?;
                Step::Goto(pc + 1)
            }
            TokenKind::Return => {
                let v = if tokens.len() > 1 {
                    self.eval(&tokens[1..], line)?
                } else {
                    Var::empty()
                };
                Step::Return(v)
            }

            // -- branches --
            TokenKind::If => {
                let Some(Link::If { next, .. }) = stmt.link else {
                    return Err(link_error("if"));
                };
                if self.eval(&tokens[1..], line)?.truthy() {
                    Step::Goto(pc + 1)
                } else {
                    *branch_jumped = true;
                    Step::Goto(next)
                }
            }
            TokenKind::ElseIf => {
                let Some(Link::If { next, end }) = stmt.link else {
                    return Err(link_error("elseif"));
                };
                if jumped {
                    if self.eval(&tokens[1..], line)?.truthy() {
                        Step::Goto(pc + 1)
                    } else {
                        *branch_jumped = true;
                        Step::Goto(next)
                    }
                } else {
                    Step::Goto(end)
                }
            }
            TokenKind::Else => {
                let Some(Link::Else { end }) = stmt.link else {
                    return Err(link_error("else"));
                };
                if jumped {
                    Step::Goto(pc + 1)
                } else {
                    Step::Goto(end)
                }
            }

            // -- loops --
            TokenKind::While => {
                let Some(Link::LoopHead { end }) = stmt.link else {
                    return Err(link_error("while"));
                };
                if self.eval(&tokens[1..], line)?.truthy() {
                    Step::Goto(pc + 1)
                } else {
                    Step::Goto(end + 1)
                }
            }
            TokenKind::For => {
                let Some(Link::LoopHead { end }) = stmt.link else {
                    return Err(link_error("for"));
                };
                let (init, cond, incr) = split_for_clauses(tokens)?;
                if from_loop {
                    self.exec_for_clause(incr, line)?;
                } else {
                    self.exec_for_clause(init, line)?;
                }
                let go = cond.is_empty() || self.eval(cond, line)?.truthy();
                if go {
                    Step::Goto(pc + 1)
                } else {
                    Step::Goto(end + 1)
                }
            }
            TokenKind::End => match stmt.link {
                Some(Link::LoopEnd { head }) => {
                    *loop_back = true;
                    Step::Goto(head)
                }
                _ => Step::Goto(pc + 1),
            },
            TokenKind::Break => {
                let Some(Link::Break { exit }) = stmt.link else {
                    return Err(link_error("break"));
                };
                Step::Goto(exit + 1)
            }
            TokenKind::Continue => {
                let Some(Link::Continue { tail }) = stmt.link else {
                    return Err(link_error("continue"));
                };
                Step::Goto(tail)
            }

            // -- switch --
            TokenKind::Switch => {
                let Some(Link::Switch { end }) = stmt.link else {
                    return Err(link_error("switch"));
                };
                let value = self.eval(&tokens[1..], line)?;
                switches.push((end, value, false));
                Step::Goto(pc + 1)
            }
            TokenKind::Case => {
                let Some(Link::Case { next, .. }) = stmt.link else {
                    return Err(link_error("case"));
                };
                let Some((_, value, matched)) = switches.last() else {
                    return Err(EvalError::new(
                        EvalErrorKind::Internal,
                        "case with no active switch",
                    ));
                };
                if *matched {
                    Step::Goto(pc + 1)
                } else {
                    let value = value.clone();
                    let case_val = self.eval(&tokens[1..], line)?;
                    let universe = self.model.entity_count();
                    let eq =
                        ops::binary(TokenKind::EqEq, &value, &case_val, universe)?.truthy();
                    if eq {
                        if let Some(frame) = switches.last_mut() {
                            frame.2 = true;
                        }
                        Step::Goto(pc + 1)
                    } else {
                        Step::Goto(next)
                    }
                }
            }
            TokenKind::Default => {
                if let Some(frame) = switches.last_mut() {
                    frame.2 = true;
                }
                Step::Goto(pc + 1)
            }

            // -- detached units --
            TokenKind::Function | TokenKind::Parallel => Step::Goto(pc + 1),
            TokenKind::Try => {
                let Some(Link::Try { unit }) = stmt.link else {
                    return Err(link_error("try"));
                };
                let program = self.program;
                let u = &program.units[unit];
                match self.exec_statements(&u.body, Some(u))? {
                    Outcome::Returned(v) => Step::Return(v),
                    Outcome::Done => Step::Goto(pc + 1),
                }
            }
            TokenKind::Catch => {
                // reached linearly: the body succeeded, skip the handler
                match stmt.link {
                    Some(Link::Catch { end }) => Step::Goto(end),
                    _ => Step::Goto(pc + 1),
                }
            }

            // -- domain commands --
            TokenKind::Select => {
                let bs = if tokens.len() > 1 {
                    let v = self.eval(&tokens[1..], line)?;
                    coerce_set(v, self.model.entity_count())?
                } else {
                    Bitset::all(self.model.entity_count())
                };
                self.model.set_selection(&bs);
                self.sink
                    .command("select", &[Var::new(Value::Bitset(bs))])?;
                Step::Goto(pc + 1)
            }
            TokenKind::Display
            | TokenKind::Hide
            | TokenKind::Delete
            | TokenKind::Zoom
            | TokenKind::Center
            | TokenKind::Rotate
            | TokenKind::Translate => {
                let args = if tokens.len() > 1 {
                    vec![self.eval(&tokens[1..], line)?]
                } else {
                    Vec::new()
                };
                self.sink.command(command_name(kind), &args)?;
                Step::Goto(pc + 1)
            }
            TokenKind::Color | TokenKind::Load => {
                let args: Vec<Var> = tokens[1..]
                    .iter()
                    .filter_map(Token::text)
                    .map(Var::str)
                    .collect();
                self.sink.command(command_name(kind), &args)?;
                Step::Goto(pc + 1)
            }

            other => Err(EvalError::new(
                EvalErrorKind::Internal,
                format!("walker cannot execute {other:?}"),
            ))?,
        })
    }

    // -- assignment --

    fn exec_assignment(&mut self, head: TokenKind, tokens: &[Token], line: u32) -> EvalResult<()> {
        let Some(assign_at) = find_top_level_assign(tokens) else {
            // `var x` with no initializer declares the empty value
            if head == TokenKind::VarDecl {
                if let Some(name) = tokens.get(1).and_then(Token::text) {
                    self.vars.declare(name, Var::empty());
                    return Ok(());
                }
            }
            return Err(EvalError::new(
                EvalErrorKind::Internal,
                "set statement without `=`",
            ));
        };
        let target = &tokens[1..assign_at];
        let value = self.eval(&tokens[assign_at + 1..], line)?;

        // `{selection}.property = value`
        if target.first().map(|t| t.kind) == Some(TokenKind::SelectOpen) {
            let close = find_matching(target, 0)?;
            let sel = self.eval(&target[..=close], line)?;
            let bs = coerce_set(sel, self.model.entity_count())?;
            let Some(prop_tok) = target.get(close + 1) else {
                return Err(EvalError::new(
                    EvalErrorKind::InvalidAssignment,
                    "selection assignment needs `.property`",
                ));
            };
            if prop_tok.kind != TokenKind::PropGet {
                return Err(EvalError::new(
                    EvalErrorKind::InvalidAssignment,
                    "selection assignment needs `.property`",
                ));
            }
            let prop = prop_tok.text().unwrap_or("");
            return self.model.set_property(&bs, prop, &value);
        }

        let Some(name) = target.first().and_then(Token::text).map(str::to_owned) else {
            return Err(EvalError::new(
                EvalErrorKind::InvalidAssignment,
                "assignment needs a variable name",
            ));
        };

        // index/key path segments after the name
        let mut segs: Vec<Index> = Vec::new();
        let mut i = 1;
        while i < target.len() {
            match target[i].kind {
                TokenKind::IndexOpen => {
                    let j = find_matching(target, i)?;
                    if target[j].intval == 2 {
                        return Err(EvalError::new(
                            EvalErrorKind::InvalidAssignment,
                            "cannot assign to a range",
                        ));
                    }
                    let idx = self.eval(&target[i + 1..j], line)?;
                    segs.push(match &idx.value {
                        Value::Str(s) => Index::Key(s.to_string()),
                        _ => Index::Single(idx.to_int()),
                    });
                    i = j + 1;
                }
                TokenKind::PropGet => {
                    segs.push(Index::Key(target[i].text().unwrap_or("").to_owned()));
                    i += 1;
                }
                other => {
                    return Err(EvalError::new(
                        EvalErrorKind::InvalidAssignment,
                        format!("bad assignment target element: {other:?}"),
                    ))
                }
            }
        }

        if segs.is_empty() {
            if head == TokenKind::VarDecl {
                self.vars.declare(&name, value);
            } else {
                self.vars.set(&name, value);
            }
            return Ok(());
        }

        let root = self.vars.get(&name).unwrap_or_else(Var::empty);
        match &root.value {
            Value::Array(_) | Value::Map(_) | Value::Context(_) => {
                // containers mutate in place through the shared reference
                assign_into(&root, &segs, value)
            }
            by_value => {
                let rebuilt = store_in_value(by_value, &segs, &value)?;
                self.vars.set(&name, Var::new(rebuilt));
                Ok(())
            }
        }
    }

    fn exec_for_clause(&mut self, clause: &[Token], line: u32) -> EvalResult<()> {
        if clause.is_empty() {
            return Ok(());
        }
        // [var] name = expr
        let (declare, rest) = if clause[0].kind == TokenKind::VarDecl {
            (true, &clause[1..])
        } else {
            (false, clause)
        };
        let Some(name) = rest.first().and_then(Token::text).map(str::to_owned) else {
            return Err(EvalError::new(
                EvalErrorKind::Internal,
                "malformed for clause",
            ));
        };
        if rest.get(1).map(|t| t.kind) != Some(TokenKind::Assign) {
            return Err(EvalError::new(
                EvalErrorKind::Internal,
                "malformed for clause",
            ));
        }
        let value = self.eval(&rest[2..], line)?;
        if declare {
            self.vars.declare(&name, value);
        } else {
            self.vars.set(&name, value);
        }
        Ok(())
    }
}

/// Walker goto result.
enum Step {
    Goto(usize),
    Return(Var),
}

fn link_error(what: &str) -> EvalError {
    EvalError::new(
        EvalErrorKind::Internal,
        format!("missing flow linkage on `{what}`"),
    )
}

/// Descend a container path and store at the last segment. A by-value
/// element (string, point, matrix) on the way is rebuilt and written back
/// into its parent container.
fn assign_into(container: &Var, segs: &[Index], value: Var) -> EvalResult<()> {
    if segs.len() == 1 {
        return container.set_item(&segs[0], value);
    }
    let child = container.select_item(&segs[0]);
    match &child.value {
        Value::Array(_) | Value::Map(_) | Value::Context(_) => {
            assign_into(&child, &segs[1..], value)
        }
        by_value => {
            let rebuilt = store_in_value(by_value, &segs[1..], &value)?;
            container.set_item(&segs[0], Var::new(rebuilt))
        }
    }
}

fn coerce_set(v: Var, universe: usize) -> EvalResult<Bitset> {
    match v.value {
        Value::Bitset(bs) => Ok(bs),
        Value::Bool(true) => Ok(Bitset::all(universe)),
        Value::Bool(false) => Ok(Bitset::new()),
        other => Err(EvalError::type_mismatch(format!(
            "expected a selection, got {}",
            other.kind_name()
        ))),
    }
}

/// Find the top-level `=` in a `set` statement's tokens.
fn find_top_level_assign(tokens: &[Token]) -> Option<usize> {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate() {
        match t.kind {
            TokenKind::LeftParen
            | TokenKind::ArrayOpen
            | TokenKind::IndexOpen
            | TokenKind::SelectOpen
            | TokenKind::MapOpen
            | TokenKind::PointOpen => depth += 1,
            TokenKind::RightParen
            | TokenKind::ArrayClose
            | TokenKind::IndexClose
            | TokenKind::SelectClose
            | TokenKind::MapClose
            | TokenKind::PointClose => depth -= 1,
            TokenKind::Assign if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Find the index of the closer matching the opener at `start`.
fn find_matching(tokens: &[Token], start: usize) -> EvalResult<usize> {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate().skip(start) {
        match t.kind {
            TokenKind::LeftParen
            | TokenKind::ArrayOpen
            | TokenKind::IndexOpen
            | TokenKind::SelectOpen
            | TokenKind::MapOpen
            | TokenKind::PointOpen => depth += 1,
            TokenKind::RightParen
            | TokenKind::ArrayClose
            | TokenKind::IndexClose
            | TokenKind::SelectClose
            | TokenKind::MapClose
            | TokenKind::PointClose => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(EvalError::new(
        EvalErrorKind::Internal,
        "unbalanced assignment target",
    ))
}

/// Split a compiled `for` header into its three clauses.
fn split_for_clauses(tokens: &[Token]) -> EvalResult<(&[Token], &[Token], &[Token])> {
    // tokens: For ( init ; cond ; incr )
    let inner = &tokens[2..tokens.len() - 1];
    let mut splits = Vec::with_capacity(2);
    for (i, t) in inner.iter().enumerate() {
        if t.kind == TokenKind::Semicolon {
            splits.push(i);
        }
    }
    if splits.len() != 2 {
        return Err(EvalError::new(
            EvalErrorKind::Internal,
            "malformed for header",
        ));
    }
    Ok((
        &inner[..splits[0]],
        &inner[splits[0] + 1..splits[1]],
        &inner[splits[1] + 1..],
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use crate::context::{CollectingCommandSink, MemoryStore, TableModel};

    struct Run {
        store: MemoryStore,
        #[allow(dead_code)]
        model: TableModel,
        sink: CollectingCommandSink,
    }

    fn run_with(src: &str, model: TableModel) -> Run {
        let program =
            compile(src, &CompileOptions::default()).unwrap_or_else(|e| panic!("compile: {e}"));
        let mut store = MemoryStore::new();
        let mut model = model;
        let mut sink = CollectingCommandSink::default();
        Walker::new(&program, &mut store, &mut model, &mut sink)
            .run()
            .unwrap_or_else(|e| panic!("run: {e}"));
        Run { store, model, sink }
    }

    fn run_src(src: &str) -> Run {
        run_with(src, TableModel::new())
    }

    fn var_text(r: &Run, name: &str) -> String {
        r.store.get(name).map_or_else(String::new, |v| v.to_string())
    }

    // -- flow linkage end to end: the for loop sums to 6 --

    #[test]
    fn for_loop_sums() {
        let r = run_src("x = 0\nfor (var i = 1; i <= 3; i = i + 1) { x = x + i }");
        assert_eq!(var_text(&r, "x"), "6");
    }

    #[test]
    fn while_loop_with_break_continue() {
        let r = run_src(
            "x = 0\ni = 0\nwhile (true) {\ni = i + 1\nif (i > 10) { break }\nif (i %% 2 == 1) { continue }\nx = x + i\n}",
        );
        // sum of even numbers 2..10
        assert_eq!(var_text(&r, "x"), "30");
    }

    #[test]
    fn nested_loop_break_levels() {
        let r = run_src(
            "hits = 0\nfor (var i = 1; i <= 3; i = i + 1) {\nfor (var j = 1; j <= 3; j = j + 1) {\nhits = hits + 1\nif (j == 2) { break 2 }\n}\n}",
        );
        // inner breaks out of both loops on the second pass
        assert_eq!(var_text(&r, "hits"), "2");
    }

    #[test]
    fn if_elseif_else_branching() {
        let src = "if (n == 1)\nr = \"one\"\nelseif (n == 2)\nr = \"two\"\nelse\nr = \"many\"\nend if";
        for (n, expect) in [(1, "one"), (2, "two"), (5, "many")] {
            let r = run_src(&format!("n = {n}\n{src}"));
            assert_eq!(var_text(&r, "r"), expect, "n = {n}");
        }
    }

    #[test]
    fn one_line_if_runs() {
        let r = run_src("x = 0\nif (true) x = 1\nif (false) x = 2");
        assert_eq!(var_text(&r, "x"), "1");
    }

    #[test]
    fn switch_matches_and_falls_through() {
        let src = "r = \"\"\nswitch (n)\ncase 1:\nr = r + \"a\"\ncase 2:\nr = r + \"b\"\nbreak\ndefault:\nr = r + \"z\"\nend switch";
        let r = run_src(&format!("n = 1\n{src}"));
        // case 1 matches, falls through into case 2, breaks before default
        assert_eq!(var_text(&r, "r"), "ab");
        let r = run_src(&format!("n = 9\n{src}"));
        assert_eq!(var_text(&r, "r"), "z");
    }

    #[test]
    fn print_goes_to_sink() {
        let r = run_src("print 2 + 3 * 4");
        assert_eq!(r.sink.output, vec!["14".to_owned()]);
    }

    #[test]
    fn echo_is_free_text() {
        let r = run_src("echo hello brave world");
        assert_eq!(r.sink.output, vec!["hello brave world".to_owned()]);
    }

    // -- functions --

    #[test]
    fn function_call_returns() {
        let r = run_src("function add(a, b)\nreturn a + b\nend function\nx = add(2, 40)");
        assert_eq!(var_text(&r, "x"), "42");
    }

    #[test]
    fn recursive_function() {
        let r = run_src(
            "function fact(n)\nif (n <= 1) { return 1 }\nreturn n * fact(n - 1)\nend function\nx = fact(5)",
        );
        assert_eq!(var_text(&r, "x"), "120");
    }

    #[test]
    fn function_locals_are_scoped() {
        let r = run_src(
            "t = 1\nfunction f(t)\nt = t + 1\nreturn t\nend function\nx = f(10)",
        );
        assert_eq!(var_text(&r, "x"), "11");
        assert_eq!(var_text(&r, "t"), "1");
    }

    #[test]
    fn call_statement_form() {
        let r = run_src("function bump()\ncount = count + 1\nreturn 0\nend function\ncount = 0\nbump()\nbump()");
        assert_eq!(var_text(&r, "count"), "2");
    }

    // -- try/catch --

    #[test]
    fn try_catch_recovers() {
        let r = run_src(
            "r = \"ok\"\ntry {\nx = {\"k\":1} cross 3\nr = \"not reached\"\n} catch (e) {\nr = e\n}\ndone = 1",
        );
        assert!(var_text(&r, "r").contains("cross"), "caught: {}", var_text(&r, "r"));
        assert_eq!(var_text(&r, "done"), "1");
    }

    #[test]
    fn try_without_error_skips_catch() {
        let r = run_src("try {\nr = 1\n} catch (e) {\nr = 2\n}");
        assert_eq!(var_text(&r, "r"), "1");
    }

    // -- assignments --

    #[test]
    fn indexed_and_keyed_assignment() {
        let r = run_src("a = [1, 2, 3]\na[2] = 99\nh = {\"k\":1}\nh.k = 5\nh[\"j\"] = 6");
        assert_eq!(var_text(&r, "a"), "[1, 99, 3]");
        assert_eq!(var_text(&r, "h"), "{ \"k\":5, \"j\":6 }");
    }

    #[test]
    fn matrix_element_assignment() {
        let r = run_src("m = qmatrix(quaternion({0 0 1 0}))\nm[1][3] = 7\nx = m[1][3]");
        assert_eq!(var_text(&r, "x"), "7.0");
    }

    #[test]
    fn bare_var_declares_empty() {
        let r = run_src("var x\ny = x + \"!\"");
        assert_eq!(var_text(&r, "y"), "!");
    }

    #[test]
    fn compound_assignment_runs() {
        let r = run_src("x = 10\nx += 5\nx *= 2\nx++");
        assert_eq!(var_text(&r, "x"), "31");
    }

    #[test]
    fn nested_container_assignment() {
        let r = run_src("a = [[1, 2], [3, 4]]\na[2][1] = 9");
        assert_eq!(var_text(&r, "a"), "[[1, 2], [9, 4]]");
    }

    // -- model-facing commands --

    fn demo_model() -> TableModel {
        let mut m = TableModel::new();
        for (resno, resname, occ) in [(1, "ALA", 1.0), (2, "GLY", 0.5), (3, "HOH", 0.9)] {
            m.add_entity(&[
                ("resno", Var::int(resno)),
                ("resname", Var::str(resname)),
                ("occupancy", Var::float(occ)),
            ]);
        }
        m
    }

    #[test]
    fn select_updates_model_and_sink() {
        let r = run_with("select {occupancy < 0.95}", demo_model());
        assert_eq!(r.sink.commands.len(), 1);
        assert_eq!(r.sink.commands[0].0, "select");
        assert_eq!(r.sink.commands[0].1[0], "({1:2})");
        assert_eq!(r.model.current_selection(), [1, 2].into_iter().collect());
    }

    #[test]
    fn selected_named_set_reflects_selection() {
        let r = run_with("select {resno == 2}\nx = {selected}.resname", demo_model());
        assert_eq!(var_text(&r, "x"), "GLY");
    }

    #[test]
    fn property_assignment_through_selection() {
        let r = run_with("set {resname = ALA}.occupancy = 0.1\nx = {1}.occupancy", demo_model());
        assert_eq!(var_text(&r, "x"), "0.1");
    }

    #[test]
    fn domain_commands_forward_to_sink() {
        let r = run_src("zoom 200\ncolor red\nload model.pdb");
        let names: Vec<&str> = r.sink.commands.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zoom", "color", "load"]);
        assert_eq!(r.sink.commands[1].1, vec!["red".to_owned()]);
    }

    // -- aliasing semantics --

    #[test]
    fn plain_assignment_aliases() {
        let r = run_src("a = [1]\nb = a\nb[1] = 9");
        assert_eq!(var_text(&r, "a"), "[9]");
    }

    #[test]
    fn deep_copy_detaches() {
        let r = run_src("a = [1]\nb = a.deepCopy()\nb[1] = 9");
        assert_eq!(var_text(&r, "a"), "[1]");
        assert_eq!(var_text(&r, "b"), "[9]");
    }

    #[test]
    fn self_assignment_cycle_then_deep_copy() {
        let r = run_src("a = [1]\na[2] = a\nb = a.deepCopy()\nx = b[2].size");
        // the cycle point deep-copies to an empty array
        assert_eq!(var_text(&r, "x"), "0");
    }
}
