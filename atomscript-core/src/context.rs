//! External collaborator interfaces.
//!
//! The core never touches the application's model or presentation
//! directly: selection comparisons, per-entity property reads, variable
//! scoping, and command side effects all go through these traits. The
//! in-memory implementations here back the test suite and the
//! command-line tool's demo model.

use std::collections::HashMap;

use crate::bitset::Bitset;
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::token::TokenKind;
use crate::value::{Value, Var};

// ---------------------------------------------------------------------------
// Comparison operators
// ---------------------------------------------------------------------------

/// A property comparison operator, as passed to the accessor callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl ComparisonOp {
    /// Convert from a comparison token kind.
    #[must_use]
    pub const fn from_token(kind: TokenKind) -> Option<Self> {
        Some(match kind {
            TokenKind::EqEq => Self::Eq,
            TokenKind::NotEq => Self::Ne,
            TokenKind::Gt => Self::Gt,
            TokenKind::Lt => Self::Lt,
            TokenKind::GtEq => Self::Ge,
            TokenKind::LtEq => Self::Le,
            _ => return None,
        })
    }

    /// Mirror the operator (for `value < property` forms).
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Lt => Self::Gt,
            Self::Ge => Self::Le,
            Self::Le => Self::Ge,
            other => other,
        }
    }

    /// Apply to an ordering.
    #[must_use]
    pub const fn matches(self, ord: std::cmp::Ordering) -> bool {
        match self {
            Self::Eq => ord.is_eq(),
            Self::Ne => ord.is_ne(),
            Self::Gt => ord.is_gt(),
            Self::Lt => ord.is_lt(),
            Self::Ge => ord.is_ge(),
            Self::Le => ord.is_le(),
        }
    }
}

/// Case-insensitive wildcard match: `*` spans any run, `?` one character.
#[must_use]
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            (Some(b'?'), Some(_)) => rec(&p[1..], &t[1..]),
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b) && rec(&p[1..], &t[1..]),
            _ => false,
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}

// ---------------------------------------------------------------------------
// Property accessor
// ---------------------------------------------------------------------------

/// Access to the application's entity model, keyed by property
/// comparisons.
///
/// For `Eq`/`Ne` string comparisons, `*` and `?` wildcards in the value
/// must be honored.
pub trait PropertyAccessor {
    /// Total number of entities (the selection universe).
    fn entity_count(&self) -> usize;

    /// Entities whose integer `property` satisfies the comparison.
    fn compare_int(&self, property: &str, op: ComparisonOp, value: i64) -> EvalResult<Bitset>;

    /// Entities whose float `property` satisfies the comparison.
    fn compare_float(&self, property: &str, op: ComparisonOp, value: f64) -> EvalResult<Bitset>;

    /// Entities whose string `property` satisfies the comparison.
    fn compare_string(&self, property: &str, op: ComparisonOp, value: &str) -> EvalResult<Bitset>;

    /// Per-entity values of `property` over `entities`, in index order.
    fn property_values(&self, entities: &Bitset, property: &str) -> EvalResult<Vec<Var>>;

    /// Assign `property` over `entities`.
    fn set_property(&mut self, entities: &Bitset, property: &str, value: &Var) -> EvalResult<()>;

    /// A predefined named set (`protein`, `water`, …), if the model
    /// defines it.
    fn named_set(&self, name: &str) -> Option<Bitset>;

    /// Entities associated with a drawn object `$name`.
    fn object_set(&self, name: &str) -> Option<Bitset>;

    /// The current selection (for `selected` and relative indexing).
    fn current_selection(&self) -> Bitset;

    /// Replace the current selection (the `select` command's effect).
    fn set_selection(&mut self, _selection: &Bitset) {}
}

// ---------------------------------------------------------------------------
// Variable store
// ---------------------------------------------------------------------------

/// Nested-scope variable storage (global → function → block).
pub trait VariableStore {
    /// Read a variable, innermost scope first.
    fn get(&self, name: &str) -> Option<Var>;

    /// Write a variable: updates the innermost scope that has it, else
    /// defines it globally.
    fn set(&mut self, name: &str, value: Var);

    /// Define a variable in the current (innermost) scope.
    fn declare(&mut self, name: &str, value: Var);

    /// Enter a nested scope.
    fn push_scope(&mut self);

    /// Leave the innermost scope.
    fn pop_scope(&mut self);
}

/// Receiver for executed domain commands and console output.
pub trait CommandSink {
    /// A compiled domain command with its evaluated arguments.
    fn command(&mut self, name: &str, args: &[Var]) -> EvalResult<()>;

    /// Console output (`print`, `echo`).
    fn echo(&mut self, text: &str);
}

// ---------------------------------------------------------------------------
// Evaluator context
// ---------------------------------------------------------------------------

/// Everything one expression evaluation may reach.
pub trait EvalContext {
    /// The variable store.
    fn variables(&mut self) -> &mut dyn VariableStore;

    /// The entity model.
    fn model(&mut self) -> &mut dyn PropertyAccessor;

    /// Invoke a user-defined function; `Ok(None)` when the name is
    /// unknown (the evaluator then reports an unknown-function error).
    fn call_function(&mut self, _name: &str, _args: Vec<Var>) -> EvalResult<Option<Var>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// In-memory variable store
// ---------------------------------------------------------------------------

/// A stack-of-hashmaps variable store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    scopes: Vec<HashMap<String, Var>>,
}

impl MemoryStore {
    /// Create a store with just the global scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }
}

impl VariableStore for MemoryStore {
    fn get(&self, name: &str) -> Option<Var> {
        let key = name.to_ascii_lowercase();
        self.scopes.iter().rev().find_map(|s| s.get(&key).cloned())
    }

    fn set(&mut self, name: &str, value: Var) {
        let key = name.to_ascii_lowercase();
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(&key) {
                *slot = value;
                return;
            }
        }
        self.scopes[0].insert(key, value);
    }

    fn declare(&mut self, name: &str, value: Var) {
        let key = name.to_ascii_lowercase();
        self.scopes
            .last_mut()
            .expect("global scope")
            .insert(key, value);
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory entity model
// ---------------------------------------------------------------------------

/// A table-backed entity model: one property map per entity.
#[derive(Debug, Default)]
pub struct TableModel {
    rows: Vec<HashMap<String, Var>>,
    named_sets: HashMap<String, Bitset>,
    objects: HashMap<String, Bitset>,
    selection: Bitset,
}

impl TableModel {
    /// An empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entity with the given properties; returns its index.
    pub fn add_entity(&mut self, props: &[(&str, Var)]) -> usize {
        let mut row = HashMap::with_capacity(props.len());
        for (k, v) in props {
            row.insert((*k).to_ascii_lowercase(), v.clone());
        }
        self.rows.push(row);
        self.rows.len() - 1
    }

    /// Define a named set.
    pub fn define_set(&mut self, name: &str, set: Bitset) {
        self.named_sets.insert(name.to_ascii_lowercase(), set);
    }

    /// Define a drawn object's entity set.
    pub fn define_object(&mut self, name: &str, set: Bitset) {
        self.objects.insert(name.to_ascii_lowercase(), set);
    }

    /// Replace the current selection.
    pub fn select(&mut self, set: Bitset) {
        self.selection = set;
    }

    fn row_value(&self, i: usize, property: &str) -> Option<&Var> {
        self.rows.get(i).and_then(|r| r.get(property))
    }

    fn compare_with(
        &self,
        property: &str,
        mut test: impl FnMut(&Var) -> bool,
    ) -> EvalResult<Bitset> {
        let property = property.to_ascii_lowercase();
        if !self.rows.iter().any(|r| r.contains_key(&property)) {
            return Err(EvalError::new(
                EvalErrorKind::UnknownProperty,
                format!("unknown property `{property}`"),
            ));
        }
        let mut out = Bitset::new();
        for i in 0..self.rows.len() {
            if self.row_value(i, &property).is_some_and(&mut test) {
                out.set(i);
            }
        }
        Ok(out)
    }
}

impl PropertyAccessor for TableModel {
    fn entity_count(&self) -> usize {
        self.rows.len()
    }

    fn compare_int(&self, property: &str, op: ComparisonOp, value: i64) -> EvalResult<Bitset> {
        self.compare_with(property, |v| op.matches(v.to_int().cmp(&value)))
    }

    fn compare_float(&self, property: &str, op: ComparisonOp, value: f64) -> EvalResult<Bitset> {
        self.compare_with(property, |v| {
            v.to_float()
                .partial_cmp(&value)
                .is_some_and(|ord| op.matches(ord))
        })
    }

    fn compare_string(&self, property: &str, op: ComparisonOp, value: &str) -> EvalResult<Bitset> {
        self.compare_with(property, |v| {
            let text = v.to_string();
            match op {
                ComparisonOp::Eq => wildcard_match(value, &text),
                ComparisonOp::Ne => !wildcard_match(value, &text),
                other => other.matches(text.to_ascii_lowercase().cmp(&value.to_ascii_lowercase())),
            }
        })
    }

    fn property_values(&self, entities: &Bitset, property: &str) -> EvalResult<Vec<Var>> {
        let property = property.to_ascii_lowercase();
        let mut out = Vec::with_capacity(entities.cardinality());
        for i in entities.iter() {
            if i >= self.rows.len() {
                break;
            }
            out.push(
                self.row_value(i, &property)
                    .cloned()
                    .unwrap_or_else(Var::empty),
            );
        }
        Ok(out)
    }

    fn set_property(&mut self, entities: &Bitset, property: &str, value: &Var) -> EvalResult<()> {
        let property = property.to_ascii_lowercase();
        for i in entities.iter() {
            if let Some(row) = self.rows.get_mut(i) {
                row.insert(property.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn named_set(&self, name: &str) -> Option<Bitset> {
        self.named_sets.get(&name.to_ascii_lowercase()).cloned()
    }

    fn object_set(&self, name: &str) -> Option<Bitset> {
        let name = name.to_ascii_lowercase();
        if name.contains('*') || name.contains('?') {
            let mut out = Bitset::new();
            for (k, set) in &self.objects {
                if wildcard_match(&name, k) {
                    out = out.or(set);
                }
            }
            return Some(out);
        }
        self.objects.get(&name).cloned()
    }

    fn current_selection(&self) -> Bitset {
        self.selection.clone()
    }

    fn set_selection(&mut self, selection: &Bitset) {
        self.selection = selection.clone();
    }
}

// ---------------------------------------------------------------------------
// Basic context (store + model, no user functions)
// ---------------------------------------------------------------------------

/// The simplest complete context: a memory store and a table model.
#[derive(Debug, Default)]
pub struct BasicContext {
    /// Variables.
    pub store: MemoryStore,
    /// Entity model.
    pub model: TableModel,
}

impl BasicContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            model: TableModel::new(),
        }
    }

    /// Shorthand: set a global variable.
    pub fn set_global(&mut self, name: &str, value: Var) {
        self.store.set(name, value);
    }

    /// Shorthand: read a variable rendered as text.
    #[must_use]
    pub fn get_text(&self, name: &str) -> String {
        self.store
            .get(name)
            .map_or_else(String::new, |v| v.to_string())
    }
}

impl EvalContext for BasicContext {
    fn variables(&mut self) -> &mut dyn VariableStore {
        &mut self.store
    }

    fn model(&mut self) -> &mut dyn PropertyAccessor {
        &mut self.model
    }
}

/// A collecting command sink for tests and the CLI.
#[derive(Debug, Default)]
pub struct CollectingCommandSink {
    /// `(command, rendered arguments)` in execution order.
    pub commands: Vec<(String, Vec<String>)>,
    /// Console lines.
    pub output: Vec<String>,
}

impl CommandSink for CollectingCommandSink {
    fn command(&mut self, name: &str, args: &[Var]) -> EvalResult<()> {
        self.commands.push((
            name.to_owned(),
            args.iter().map(std::string::ToString::to_string).collect(),
        ));
        Ok(())
    }

    fn echo(&mut self, text: &str) {
        self.output.push(text.to_owned());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn demo_model() -> TableModel {
        let mut m = TableModel::new();
        for (resno, resname, chain, atomname, occ) in [
            (1, "ALA", "A", "N", 1.0),
            (1, "ALA", "A", "CA", 1.0),
            (2, "GLY", "A", "CA", 0.5),
            (3, "HOH", "B", "O", 0.9),
        ] {
            m.add_entity(&[
                ("resno", Var::int(resno)),
                ("resname", Var::str(resname)),
                ("chain", Var::str(chain)),
                ("atomname", Var::str(atomname)),
                ("occupancy", Var::float(occ)),
            ]);
        }
        m
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("ala", "ALA"));
        assert!(wildcard_match("a*", "ALA"));
        assert!(wildcard_match("?a", "CA"));
        assert!(wildcard_match("*", ""));
        assert!(!wildcard_match("?a", "CCA"));
    }

    #[test]
    fn compare_int_ops() {
        let m = demo_model();
        let bs = m.compare_int("resno", ComparisonOp::Ge, 2).unwrap();
        assert_eq!(format!("{bs}"), "({2:3})");
    }

    #[test]
    fn compare_string_wildcards() {
        let m = demo_model();
        let bs = m
            .compare_string("atomname", ComparisonOp::Eq, "C*")
            .unwrap();
        assert_eq!(format!("{bs}"), "({1:2})");
    }

    #[test]
    fn compare_float() {
        let m = demo_model();
        let bs = m
            .compare_float("occupancy", ComparisonOp::Lt, 0.95)
            .unwrap();
        assert_eq!(format!("{bs}"), "({2:3})");
    }

    #[test]
    fn unknown_property_errors() {
        let m = demo_model();
        let err = m.compare_int("bogus", ComparisonOp::Eq, 1).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UnknownProperty);
    }

    #[test]
    fn property_values_follow_index_order() {
        let m = demo_model();
        let bs: Bitset = [1, 2].into_iter().collect();
        let vals = m.property_values(&bs, "atomname").unwrap();
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[0].to_string(), "CA");
    }

    #[test]
    fn set_property_round_trips() {
        let mut m = demo_model();
        let bs: Bitset = [0].into_iter().collect();
        m.set_property(&bs, "occupancy", &Var::float(0.25)).unwrap();
        let vals = m.property_values(&bs, "occupancy").unwrap();
        assert_eq!(vals[0].to_float(), 0.25);
    }

    #[test]
    fn store_scoping() {
        let mut s = MemoryStore::new();
        s.set("x", Var::int(1));
        s.push_scope();
        s.declare("x", Var::int(2));
        assert_eq!(s.get("x").unwrap().to_int(), 2);
        // writes update the shadowing local
        s.set("x", Var::int(3));
        s.pop_scope();
        assert_eq!(s.get("x").unwrap().to_int(), 1);
        // undeclared writes land in the global scope
        s.push_scope();
        s.set("y", Var::int(9));
        s.pop_scope();
        assert_eq!(s.get("y").unwrap().to_int(), 9);
    }

    #[test]
    fn store_is_case_insensitive() {
        let mut s = MemoryStore::new();
        s.set("Foo", Var::int(1));
        assert_eq!(s.get("FOO").unwrap().to_int(), 1);
    }

    #[test]
    fn object_wildcards() {
        let mut m = TableModel::new();
        m.define_object("axis1", [0].into_iter().collect());
        m.define_object("axis2", [1].into_iter().collect());
        let bs = m.object_set("axis*").unwrap();
        assert_eq!(bs.cardinality(), 2);
    }

    #[test]
    fn value_kind_sanity() {
        // context vars hold full values
        let mut s = MemoryStore::new();
        s.set("p", Var::new(Value::Point3(atomscript_math::Point3::ZERO)));
        assert_eq!(s.get("p").unwrap().value.kind_name(), "point3");
    }
}
