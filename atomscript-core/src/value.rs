//! The tagged-value data model shared by the compiler and the runtime.
//!
//! Every script value is a [`Value`] variant wrapped in a [`Var`], which
//! adds the binding name and the pending selection index used by the
//! indexing operators. Containers (arrays, hashes, scope contexts) are
//! reference-shared on assignment; [`Var::deep_copy`] makes an explicit
//! structural copy and breaks self-reference cycles.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use atomscript_math::{Matrix3, Matrix4, Point3, Point4};

use crate::bitset::Bitset;
use crate::error::{EvalError, EvalErrorKind, EvalResult};

/// Shared, mutable array storage.
pub type ArrayRef = Rc<RefCell<Vec<Var>>>;
/// Shared, mutable hash storage. Insertion order is preserved.
pub type MapRef = Rc<RefCell<IndexMap<String, Var>>>;
/// Shared, mutable nested-scope storage.
pub type ContextRef = Rc<RefCell<ScopeContext>>;

/// A captured variable scope, exposed to scripts as a value.
#[derive(Debug, Default)]
pub struct ScopeContext {
    /// Display name of the scope (function name or empty).
    pub name: String,
    /// The scope's variables, in declaration order.
    pub vars: IndexMap<String, Var>,
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A script value. Exactly one variant is active.
#[derive(Debug, Clone)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// String. The empty string doubles as the undefined/empty value.
    Str(Arc<str>),
    /// A 3-component point or vector.
    Point3(Point3),
    /// A 4-component point (axis-angle, plane).
    Point4(Point4),
    /// A 3×3 matrix.
    Matrix3(Matrix3),
    /// A 4×4 matrix.
    Matrix4(Matrix4),
    /// Raw bytes (file contents, images).
    Bytes(Arc<[u8]>),
    /// An ordered array. Shared on assignment.
    Array(ArrayRef),
    /// A string-keyed hash. Shared on assignment; insertion-ordered.
    Map(MapRef),
    /// A captured variable scope. Shared on assignment.
    Context(ContextRef),
    /// An entity selection set.
    Bitset(Bitset),
    /// Compiler-internal: a model property reference inside a selection
    /// expression. Never produced by user code directly.
    Property(Arc<str>),
}

impl Value {
    /// The empty value (empty string).
    #[must_use]
    pub fn empty() -> Self {
        Self::Str(Arc::from(""))
    }

    /// Build a string value.
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Arc::from(s.as_ref()))
    }

    /// Build an array value from elements.
    #[must_use]
    pub fn array(items: Vec<Var>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    /// Build a hash value from pairs.
    #[must_use]
    pub fn map(pairs: IndexMap<String, Var>) -> Self {
        Self::Map(Rc::new(RefCell::new(pairs)))
    }

    /// User-facing name of the active variant.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "decimal",
            Self::Str(_) => "string",
            Self::Point3(_) => "point3",
            Self::Point4(_) => "point4",
            Self::Matrix3(_) => "matrix3",
            Self::Matrix4(_) => "matrix4",
            Self::Bytes(_) => "bytearray",
            Self::Array(_) => "array",
            Self::Map(_) => "hash",
            Self::Context(_) => "context",
            Self::Bitset(_) => "bitset",
            Self::Property(_) => "property",
        }
    }

    /// Truth value under script semantics.
    ///
    /// Empty strings, `"false"`, `"off"`, and `"0"` are false; zero numbers
    /// are false; empty containers and empty bitsets are false.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => {
                let t = s.trim();
                !(t.is_empty() || t.eq_ignore_ascii_case("false") || t.eq_ignore_ascii_case("off") || t == "0")
            }
            Self::Bitset(bs) => !bs.is_empty(),
            Self::Array(a) => !a.borrow().is_empty(),
            Self::Map(m) => !m.borrow().is_empty(),
            Self::Context(c) => !c.borrow().vars.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            _ => true,
        }
    }

    /// Integer coercion: truncating for floats, parsed for strings,
    /// cardinality for bitsets, length for containers; 0 otherwise.
    #[must_use]
    pub fn to_int(&self) -> i64 {
        match self {
            Self::Bool(b) => i64::from(*b),
            Self::Int(i) => *i,
            Self::Float(f) => *f as i64,
            Self::Str(s) => s.trim().parse::<i64>().unwrap_or_else(|_| {
                s.trim().parse::<f64>().map_or(0, |f| f as i64)
            }),
            Self::Bitset(bs) => bs.cardinality() as i64,
            Self::Array(a) => a.borrow().len() as i64,
            Self::Map(m) => m.borrow().len() as i64,
            Self::Bytes(b) => b.len() as i64,
            _ => 0,
        }
    }

    /// Float coercion. Strings parse; unparsable strings yield 0.
    #[must_use]
    pub fn to_float(&self) -> f64 {
        match self {
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
            Self::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            other => other.to_int() as f64,
        }
    }

    /// Whether this is the empty string (the permissive "no value").
    #[must_use]
    pub fn is_empty_str(&self) -> bool {
        matches!(self, Self::Str(s) if s.is_empty())
    }

    /// Element count for indexing: characters for strings, elements for
    /// arrays, entries for hashes, set members for bitsets, bytes for
    /// byte-arrays; 0 for scalars.
    #[must_use]
    pub fn item_count(&self) -> usize {
        match self {
            Self::Str(s) => s.chars().count(),
            Self::Array(a) => a.borrow().len(),
            Self::Map(m) => m.borrow().len(),
            Self::Bitset(bs) => bs.cardinality(),
            Self::Bytes(b) => b.len(),
            Self::Point3(_) | Self::Matrix3(_) => 3,
            Self::Point4(_) | Self::Matrix4(_) => 4,
            _ => 0,
        }
    }
}

fn fmt_quoted(v: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match v {
        Value::Str(s) => write!(f, "\"{s}\""),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => {
                if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::Str(s) => write!(f, "{s}"),
            Self::Point3(p) => write!(f, "{p}"),
            Self::Point4(p) => write!(f, "{p}"),
            Self::Matrix3(m) => write!(f, "{m}"),
            Self::Matrix4(m) => write!(f, "{m}"),
            Self::Bytes(b) => write!(f, "[{} bytes]", b.len()),
            Self::Array(a) => {
                write!(f, "[")?;
                for (i, item) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_quoted(&item.value, f)?;
                }
                write!(f, "]")
            }
            Self::Map(m) => {
                write!(f, "{{ ")?;
                for (i, (k, v)) in m.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{k}\":")?;
                    fmt_quoted(&v.value, f)?;
                }
                write!(f, " }}")
            }
            Self::Context(c) => write!(f, "[context {}]", c.borrow().name),
            Self::Bitset(bs) => write!(f, "{bs}"),
            Self::Property(p) => write!(f, "{p}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Var: a value plus binding identity and pending selection index
// ---------------------------------------------------------------------------

/// Pending-subscript sentinel: the whole container is selected.
pub const WHOLE: i32 = i32::MAX;

/// A [`Value`] with binding identity and pending selection state.
#[derive(Debug, Clone)]
pub struct Var {
    /// The value itself.
    pub value: Value,
    /// Binding name, when this value came from (or targets) a variable.
    pub name: Option<Arc<str>>,
    /// 1-based pending subscript; [`WHOLE`] means "the whole container".
    pub index: i32,
}

impl Var {
    /// Wrap a value with no name and no pending subscript.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self {
            value,
            name: None,
            index: WHOLE,
        }
    }

    /// The empty value.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Value::empty())
    }

    /// Integer shorthand.
    #[must_use]
    pub const fn int(i: i64) -> Self {
        Self::new(Value::Int(i))
    }

    /// Float shorthand.
    #[must_use]
    pub const fn float(f: f64) -> Self {
        Self::new(Value::Float(f))
    }

    /// Boolean shorthand.
    #[must_use]
    pub const fn bool(b: bool) -> Self {
        Self::new(Value::Bool(b))
    }

    /// String shorthand.
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::new(Value::str(s))
    }

    /// Attach a binding name.
    #[must_use]
    pub fn named(mut self, name: impl AsRef<str>) -> Self {
        self.name = Some(Arc::from(name.as_ref()));
        self
    }

    /// Truthiness of the underlying value.
    #[must_use]
    pub fn truthy(&self) -> bool {
        self.value.truthy()
    }

    /// Integer coercion of the underlying value.
    #[must_use]
    pub fn to_int(&self) -> i64 {
        self.value.to_int()
    }

    /// Float coercion of the underlying value.
    #[must_use]
    pub fn to_float(&self) -> f64 {
        self.value.to_float()
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

// ---------------------------------------------------------------------------
// Indexing (select_item)
// ---------------------------------------------------------------------------

/// An index applied by `[...]`.
#[derive(Debug, Clone)]
pub enum Index {
    /// Single 1-based index; 0 and negatives count from the end.
    Single(i64),
    /// Inclusive range `[lo:hi]`.
    Range(i64, i64),
    /// String key (hashes only).
    Key(String),
}

/// Convert a script index into a 1-based effective position.
///
/// `0` means the last item; negative `n` means `len + n` (so `-1` is the
/// second-from-last item).
const fn effective(i: i64, len: usize) -> i64 {
    if i > 0 {
        i
    } else {
        len as i64 + i
    }
}

impl Var {
    /// Apply an index in read mode, collapsing to the selected item.
    ///
    /// Out-of-range single indexing yields the empty value rather than an
    /// error; range indexing clamps.
    #[must_use]
    pub fn select_item(&self, idx: &Index) -> Self {
        match idx {
            Index::Single(i) => self.select_single(*i),
            Index::Range(lo, hi) => self.select_range(*lo, *hi),
            Index::Key(k) => match &self.value {
                Value::Map(m) => m
                    .borrow()
                    .get(k)
                    .cloned()
                    .unwrap_or_else(Self::empty),
                Value::Context(c) => c
                    .borrow()
                    .vars
                    .get(k)
                    .cloned()
                    .unwrap_or_else(Self::empty),
                _ => Self::empty(),
            },
        }
    }

    fn select_single(&self, i: i64) -> Self {
        let len = self.value.item_count();
        let pos = effective(i, len);
        match &self.value {
            Value::Str(s) => {
                if pos < 1 || pos > len as i64 {
                    return Self::empty();
                }
                let ch = s.chars().nth(pos as usize - 1);
                ch.map_or_else(Self::empty, |c| Self::str(c.to_string()))
            }
            Value::Array(a) => {
                if pos < 1 || pos > len as i64 {
                    return Self::empty();
                }
                a.borrow()[pos as usize - 1].clone()
            }
            Value::Map(m) => {
                if pos < 1 || pos > len as i64 {
                    return Self::empty();
                }
                m.borrow()
                    .get_index(pos as usize - 1)
                    .map_or_else(Self::empty, |(_, v)| v.clone())
            }
            Value::Bitset(bs) => {
                let mut out = Bitset::new();
                if pos >= 1 {
                    if let Some(member) = bs.nth_set(pos as usize) {
                        out.set(member);
                    }
                }
                Self::new(Value::Bitset(out))
            }
            Value::Bytes(b) => {
                if pos < 1 || pos > len as i64 {
                    return Self::empty();
                }
                Self::int(i64::from(b[pos as usize - 1]))
            }
            Value::Point3(p) => {
                if pos < 1 {
                    return Self::empty();
                }
                p.component(pos as usize - 1)
                    .map_or_else(Self::empty, Self::float)
            }
            Value::Point4(p) => {
                if pos < 1 {
                    return Self::empty();
                }
                p.component(pos as usize - 1)
                    .map_or_else(Self::empty, Self::float)
            }
            Value::Matrix3(m) => {
                if (1..=3).contains(&pos) {
                    Self::new(Value::Point3(m.row(pos as usize - 1)))
                } else {
                    Self::empty()
                }
            }
            Value::Matrix4(m) => {
                if (1..=4).contains(&pos) {
                    let r = pos as usize - 1;
                    Self::new(Value::Point4(Point4::new(
                        m.get(r, 0),
                        m.get(r, 1),
                        m.get(r, 2),
                        m.get(r, 3),
                    )))
                } else {
                    Self::empty()
                }
            }
            _ => Self::empty(),
        }
    }

    fn select_range(&self, lo: i64, hi: i64) -> Self {
        let len = self.value.item_count();
        // lo is raised to 1, hi clamps to the length
        let lo = effective(lo, len).max(1);
        let hi = effective(hi, len).min(len as i64);
        match &self.value {
            Value::Str(s) => {
                if lo > hi {
                    return Self::empty();
                }
                let sub: String = s
                    .chars()
                    .skip(lo as usize - 1)
                    .take((hi - lo + 1) as usize)
                    .collect();
                Self::str(sub)
            }
            Value::Array(a) => {
                if lo > hi {
                    return Self::new(Value::array(Vec::new()));
                }
                let items = a.borrow()[lo as usize - 1..hi as usize].to_vec();
                Self::new(Value::array(items))
            }
            Value::Bitset(bs) => {
                let mut out = Bitset::new();
                for n in lo..=hi {
                    if n >= 1 {
                        if let Some(member) = bs.nth_set(n as usize) {
                            out.set(member);
                        }
                    }
                }
                Self::new(Value::Bitset(out))
            }
            Value::Bytes(b) => {
                if lo > hi {
                    return Self::new(Value::Bytes(Arc::from(&[][..])));
                }
                Self::new(Value::Bytes(Arc::from(&b[lo as usize - 1..hi as usize])))
            }
            _ => Self::empty(),
        }
    }

    /// Apply an index in assignment mode: mutate the selected slot of a
    /// shared container in place.
    ///
    /// Arrays pad with empty values when the index is past the end; hashes
    /// insert. Scalars cannot be stored into through this path: the
    /// caller rebuilds them with [`store_in_value`].
    pub fn set_item(&self, idx: &Index, val: Self) -> EvalResult<()> {
        match (&self.value, idx) {
            (Value::Array(a), Index::Single(i)) => {
                let mut items = a.borrow_mut();
                let pos = effective(*i, items.len());
                if pos < 1 {
                    return Err(EvalError::new(
                        EvalErrorKind::BadIndex,
                        format!("array index {i} out of range"),
                    ));
                }
                let pos = pos as usize;
                while items.len() < pos {
                    items.push(Self::empty());
                }
                items[pos - 1] = val;
                Ok(())
            }
            (Value::Map(m), Index::Key(k)) => {
                m.borrow_mut().insert(k.clone(), val);
                Ok(())
            }
            (Value::Map(m), Index::Single(i)) => {
                let mut map = m.borrow_mut();
                let pos = effective(*i, map.len());
                if pos < 1 || pos > map.len() as i64 {
                    return Err(EvalError::new(
                        EvalErrorKind::BadIndex,
                        format!("hash index {i} out of range"),
                    ));
                }
                if let Some((_, slot)) = map.get_index_mut(pos as usize - 1) {
                    *slot = val;
                }
                Ok(())
            }
            (Value::Context(c), Index::Key(k)) => {
                c.borrow_mut().vars.insert(k.clone(), val);
                Ok(())
            }
            _ => Err(EvalError::new(
                EvalErrorKind::InvalidAssignment,
                format!("cannot store into {} by index", self.value.kind_name()),
            )),
        }
    }
}

/// Store into a by-value type (string, point, matrix), rebuilding it.
///
/// `path` is the remaining index chain: one level for strings and points,
/// up to two (`[row][col]`) for matrices.
pub fn store_in_value(value: &Value, path: &[Index], val: &Var) -> EvalResult<Value> {
    let fail = |what: &str| {
        Err(EvalError::new(
            EvalErrorKind::InvalidAssignment,
            format!("cannot store into {what}"),
        ))
    };
    match (value, path) {
        (Value::Str(s), [Index::Single(i)]) => {
            let mut chars: Vec<char> = s.chars().collect();
            let pos = effective(*i, chars.len());
            if pos < 1 {
                return fail("string position");
            }
            let pos = pos as usize;
            while chars.len() < pos {
                chars.push(' ');
            }
            let rep = val.to_string();
            let mut rep_chars = rep.chars();
            chars[pos - 1] = rep_chars.next().unwrap_or(' ');
            Ok(Value::str(chars.into_iter().collect::<String>()))
        }
        (Value::Point3(p), [Index::Single(i)]) => {
            let mut p = *p;
            match effective(*i, 3) {
                1 => p.x = val.to_float(),
                2 => p.y = val.to_float(),
                3 => p.z = val.to_float(),
                _ => return fail("point component"),
            }
            Ok(Value::Point3(p))
        }
        (Value::Point4(p), [Index::Single(i)]) => {
            let mut p = *p;
            match effective(*i, 4) {
                1 => p.x = val.to_float(),
                2 => p.y = val.to_float(),
                3 => p.z = val.to_float(),
                4 => p.w = val.to_float(),
                _ => return fail("point component"),
            }
            Ok(Value::Point4(p))
        }
        (Value::Matrix3(m), [Index::Single(r), Index::Single(c)]) => {
            let (r, c) = (effective(*r, 3), effective(*c, 3));
            if !(1..=3).contains(&r) || !(1..=3).contains(&c) {
                return fail("matrix element");
            }
            let mut m = *m;
            m.set(r as usize - 1, c as usize - 1, val.to_float());
            Ok(Value::Matrix3(m))
        }
        (Value::Matrix4(m), [Index::Single(r), Index::Single(c)]) => {
            let (r, c) = (effective(*r, 4), effective(*c, 4));
            if !(1..=4).contains(&r) || !(1..=4).contains(&c) {
                return fail("matrix element");
            }
            let mut m = *m;
            m.set(r as usize - 1, c as usize - 1, val.to_float());
            Ok(Value::Matrix4(m))
        }
        (v, _) => fail(v.kind_name()),
    }
}

// ---------------------------------------------------------------------------
// Deep copy with cycle breaking
// ---------------------------------------------------------------------------

impl Var {
    /// Structural copy.
    ///
    /// Containers are copied element by element. A container reached again
    /// while it is still being copied (a cycle: the script assigned a
    /// container into itself) is replaced by an empty container of the
    /// same kind at the point of the cycle.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let mut in_progress: Vec<*const ()> = Vec::new();
        Self::new(deep_copy_value(&self.value, &mut in_progress))
    }
}

fn deep_copy_value(value: &Value, in_progress: &mut Vec<*const ()>) -> Value {
    match value {
        Value::Array(a) => {
            let ptr = Rc::as_ptr(a).cast::<()>();
            if in_progress.contains(&ptr) {
                return Value::array(Vec::new());
            }
            in_progress.push(ptr);
            let items = a
                .borrow()
                .iter()
                .map(|v| Var::new(deep_copy_value(&v.value, in_progress)))
                .collect();
            in_progress.pop();
            Value::array(items)
        }
        Value::Map(m) => {
            let ptr = Rc::as_ptr(m).cast::<()>();
            if in_progress.contains(&ptr) {
                return Value::map(IndexMap::new());
            }
            in_progress.push(ptr);
            let pairs = m
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), Var::new(deep_copy_value(&v.value, in_progress))))
                .collect();
            in_progress.pop();
            Value::map(pairs)
        }
        Value::Context(c) => {
            let ptr = Rc::as_ptr(c).cast::<()>();
            if in_progress.contains(&ptr) {
                return Value::Context(Rc::new(RefCell::new(ScopeContext::default())));
            }
            in_progress.push(ptr);
            let src = c.borrow();
            let vars = src
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), Var::new(deep_copy_value(&v.value, in_progress))))
                .collect();
            let copied = ScopeContext {
                name: src.name.clone(),
                vars,
            };
            in_progress.pop();
            Value::Context(Rc::new(RefCell::new(copied)))
        }
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(vals: &[i64]) -> Var {
        Var::new(Value::array(vals.iter().map(|v| Var::int(*v)).collect()))
    }

    // -- truthiness and coercion --

    #[test]
    fn truthiness() {
        assert!(Value::Bool(true).truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::str("").truthy());
        assert!(!Value::str("false").truthy());
        assert!(!Value::str("OFF").truthy());
        assert!(Value::str("yes").truthy());
        assert!(!Value::Bitset(Bitset::new()).truthy());
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::str("42").to_int(), 42);
        assert_eq!(Value::str(" 3.9 ").to_int(), 3);
        assert_eq!(Value::str("x").to_int(), 0);
        assert_eq!(Value::Float(2.7).to_int(), 2);
        assert_eq!(Value::str("2.5").to_float(), 2.5);
        assert_eq!(Value::Bool(true).to_int(), 1);
    }

    #[test]
    fn float_display_keeps_decimal_point() {
        assert_eq!(format!("{}", Value::Float(7.0)), "7.0");
        assert_eq!(format!("{}", Value::Float(2.5)), "2.5");
        assert_eq!(format!("{}", Value::Int(7)), "7");
    }

    // -- indexing: a=[10,20,30] gives a[1]=10, a[0]=30, a[-1]=20 --

    #[test]
    fn array_indexing_is_one_based() {
        let a = arr(&[10, 20, 30]);
        assert_eq!(a.select_item(&Index::Single(1)).to_int(), 10);
        assert_eq!(a.select_item(&Index::Single(3)).to_int(), 30);
    }

    #[test]
    fn index_zero_means_last() {
        let a = arr(&[10, 20, 30]);
        assert_eq!(a.select_item(&Index::Single(0)).to_int(), 30);
    }

    #[test]
    fn negative_index_counts_from_end() {
        let a = arr(&[10, 20, 30]);
        assert_eq!(a.select_item(&Index::Single(-1)).to_int(), 20);
        assert_eq!(a.select_item(&Index::Single(-2)).to_int(), 10);
    }

    #[test]
    fn out_of_range_yields_empty() {
        let a = arr(&[10, 20, 30]);
        assert!(a.select_item(&Index::Single(9)).value.is_empty_str());
        assert!(a.select_item(&Index::Single(-7)).value.is_empty_str());
    }

    #[test]
    fn range_clamps() {
        let a = arr(&[10, 20, 30]);
        let sub = a.select_item(&Index::Range(2, 99));
        assert_eq!(format!("{sub}"), "[20, 30]");
        let sub = a.select_item(&Index::Range(-5, 1));
        assert_eq!(format!("{sub}"), "[10]");
    }

    #[test]
    fn string_indexing() {
        let s = Var::str("hello");
        assert_eq!(format!("{}", s.select_item(&Index::Single(1))), "h");
        assert_eq!(format!("{}", s.select_item(&Index::Single(0))), "o");
        assert_eq!(format!("{}", s.select_item(&Index::Range(2, 4))), "ell");
        assert!(s.select_item(&Index::Single(42)).value.is_empty_str());
    }

    #[test]
    fn bitset_indexing_selects_nth_member() {
        let bs: Bitset = [5, 9, 12].into_iter().collect();
        let v = Var::new(Value::Bitset(bs));
        let first = v.select_item(&Index::Single(1));
        assert_eq!(format!("{first}"), "({5})");
        let last = v.select_item(&Index::Single(0));
        assert_eq!(format!("{last}"), "({12})");
    }

    #[test]
    fn matrix_row_then_component() {
        let m = Var::new(Value::Matrix3(Matrix3::IDENTITY));
        let row2 = m.select_item(&Index::Single(2));
        assert_eq!(row2.select_item(&Index::Single(2)).to_float(), 1.0);
        assert_eq!(row2.select_item(&Index::Single(1)).to_float(), 0.0);
    }

    #[test]
    fn map_key_and_position() {
        let mut pairs = IndexMap::new();
        pairs.insert("a".to_owned(), Var::int(1));
        pairs.insert("b".to_owned(), Var::int(2));
        let m = Var::new(Value::map(pairs));
        assert_eq!(m.select_item(&Index::Key("b".into())).to_int(), 2);
        assert_eq!(m.select_item(&Index::Single(1)).to_int(), 1);
        assert!(m
            .select_item(&Index::Key("zz".into()))
            .value
            .is_empty_str());
    }

    // -- assignment mode --

    #[test]
    fn array_store_pads() {
        let a = arr(&[1]);
        a.set_item(&Index::Single(3), Var::int(9)).unwrap();
        assert_eq!(format!("{a}"), "[1, \"\", 9]");
    }

    #[test]
    fn map_store_inserts() {
        let m = Var::new(Value::map(IndexMap::new()));
        m.set_item(&Index::Key("k".into()), Var::int(7)).unwrap();
        assert_eq!(m.select_item(&Index::Key("k".into())).to_int(), 7);
    }

    #[test]
    fn scalar_store_is_rejected() {
        let v = Var::int(5);
        assert!(v.set_item(&Index::Single(1), Var::int(1)).is_err());
    }

    #[test]
    fn matrix_element_store_rebuilds() {
        let m = Value::Matrix3(Matrix3::IDENTITY);
        let m2 = store_in_value(&m, &[Index::Single(1), Index::Single(3)], &Var::float(9.0))
            .unwrap();
        match m2 {
            Value::Matrix3(m2) => assert_eq!(m2.get(0, 2), 9.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn string_char_store() {
        let s = Value::str("abc");
        let s2 = store_in_value(&s, &[Index::Single(2)], &Var::str("X")).unwrap();
        assert_eq!(format!("{s2}"), "aXc");
    }

    // -- aliasing and deep copy --

    #[test]
    fn assignment_aliases_containers() {
        let a = arr(&[1, 2]);
        let b = a.clone();
        b.set_item(&Index::Single(1), Var::int(99)).unwrap();
        assert_eq!(a.select_item(&Index::Single(1)).to_int(), 99);
    }

    #[test]
    fn deep_copy_detaches() {
        let a = arr(&[1, 2]);
        let b = a.deep_copy();
        b.set_item(&Index::Single(1), Var::int(99)).unwrap();
        assert_eq!(a.select_item(&Index::Single(1)).to_int(), 1);
    }

    #[test]
    fn deep_copy_breaks_self_reference() {
        let a = arr(&[1]);
        // a[2] = a: the array now contains itself
        a.set_item(&Index::Single(2), a.clone()).unwrap();
        let copy = a.deep_copy();
        let inner = copy.select_item(&Index::Single(2));
        // the cycle point becomes an empty array
        assert_eq!(format!("{inner}"), "[]");
        // the original is untouched
        assert_eq!(a.select_item(&Index::Single(1)).to_int(), 1);
    }
}
