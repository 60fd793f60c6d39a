//! Operator semantics for tagged values.
//!
//! One canonical function per operator family; the RPN machine calls these
//! and nothing else, so coercion rules live in exactly one place. Binary
//! dispatch keys on the *left* operand's variant first, then falls back to
//! numeric coercion.
//!
//! Documented quirk, preserved for script compatibility: integer division
//! and modulo by zero yield `0` rather than trapping.

use std::sync::Arc;

use indexmap::IndexMap;

use atomscript_math::types::NEAR_ZERO;

use crate::bitset::Bitset;
use crate::error::{EvalError, EvalResult};
use crate::token::TokenKind;
use crate::value::{Value, Var};

// ---------------------------------------------------------------------------
// Numeric promotion
// ---------------------------------------------------------------------------

/// A pair of operands after arithmetic promotion.
enum NumPair {
    Ints(i64, i64),
    Floats(f64, f64),
}

/// Whether a value is integer-like (no fractional information).
fn int_like(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Str(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Whether a value participates in numeric promotion at all.
fn is_numeric_like(v: &Value) -> bool {
    matches!(
        v,
        Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_)
    )
}

fn promote(a: &Value, b: &Value) -> NumPair {
    match (int_like(a), int_like(b)) {
        (Some(x), Some(y)) => NumPair::Ints(x, y),
        _ => NumPair::Floats(a.to_float(), b.to_float()),
    }
}

fn type_err(op: TokenKind, a: &Value, b: &Value) -> EvalError {
    EvalError::type_mismatch(format!(
        "cannot apply {} to {} and {}",
        op.symbol().unwrap_or("operator"),
        a.kind_name(),
        b.kind_name()
    ))
}

// ---------------------------------------------------------------------------
// Binary operators
// ---------------------------------------------------------------------------

/// Apply a binary operator. `universe` is the model entity count, used to
/// promote booleans to bitsets in set algebra.
pub fn binary(op: TokenKind, left: &Var, right: &Var, universe: usize) -> EvalResult<Var> {
    let (a, b) = (&left.value, &right.value);
    match op {
        TokenKind::Plus => add(a, b),
        TokenKind::Minus => subtract(a, b),
        TokenKind::Times => multiply(a, b),
        TokenKind::Divide => divide(a, b),
        TokenKind::Modulo => modulo(a, b),
        TokenKind::Power => power(a, b),
        TokenKind::Cross => cross(a, b),
        TokenKind::EqEq
        | TokenKind::NotEq
        | TokenKind::Gt
        | TokenKind::Lt
        | TokenKind::GtEq
        | TokenKind::LtEq => compare(op, a, b),
        TokenKind::And | TokenKind::Or | TokenKind::Xor | TokenKind::ToggleOp => {
            set_logic(op, a, b, universe)
        }
        other => Err(EvalError::type_mismatch(format!(
            "not a binary operator: {other:?}"
        ))),
    }
}

fn add(a: &Value, b: &Value) -> EvalResult<Var> {
    Ok(match (a, b) {
        // String on the left concatenates
        (Value::Str(s), other) => Var::str(format!("{s}{other}")),
        (Value::Point3(p), Value::Point3(q)) => Var::new(Value::Point3(p.add(*q))),
        (Value::Point3(p), other) if is_numeric_like(other) => {
            let s = other.to_float();
            Var::new(Value::Point3(atomscript_math::Point3::new(
                p.x + s,
                p.y + s,
                p.z + s,
            )))
        }
        (Value::Point4(p), Value::Point4(q)) => Var::new(Value::Point4(p.add(*q))),
        (Value::Matrix3(m), Value::Matrix3(n)) => Var::new(Value::Matrix3(m.add(n))),
        (Value::Matrix4(m), Value::Matrix4(n)) => Var::new(Value::Matrix4(m.add(n))),
        (Value::Array(items), Value::Array(other)) => {
            let mut out = items.borrow().clone();
            out.extend(other.borrow().iter().cloned());
            Var::new(Value::array(out))
        }
        (Value::Array(items), other) => {
            let mut out = items.borrow().clone();
            out.push(Var::new(other.clone()));
            Var::new(Value::array(out))
        }
        (Value::Map(m), Value::Map(n)) => {
            // merge; right-hand entries win
            let mut out: IndexMap<String, Var> = m.borrow().clone();
            for (k, v) in n.borrow().iter() {
                out.insert(k.clone(), v.clone());
            }
            Var::new(Value::map(out))
        }
        (Value::Bitset(x), Value::Bitset(y)) => Var::new(Value::Bitset(x.or(y))),
        (a, b) if is_numeric_like(a) && is_numeric_like(b) => match promote(a, b) {
            NumPair::Ints(x, y) => Var::int(x.wrapping_add(y)),
            NumPair::Floats(x, y) => Var::float(x + y),
        },
        (a, b) => return Err(type_err(TokenKind::Plus, a, b)),
    })
}

fn subtract(a: &Value, b: &Value) -> EvalResult<Var> {
    Ok(match (a, b) {
        (Value::Point3(p), Value::Point3(q)) => Var::new(Value::Point3(p.sub(*q))),
        (Value::Point4(p), Value::Point4(q)) => Var::new(Value::Point4(p.sub(*q))),
        (Value::Matrix3(m), Value::Matrix3(n)) => Var::new(Value::Matrix3(m.sub(n))),
        (Value::Matrix4(m), Value::Matrix4(n)) => Var::new(Value::Matrix4(m.sub(n))),
        (Value::Map(m), Value::Str(key)) => {
            // key removal
            let mut out: IndexMap<String, Var> = m.borrow().clone();
            out.shift_remove(key.as_ref());
            Var::new(Value::map(out))
        }
        (Value::Bitset(x), Value::Bitset(y)) => Var::new(Value::Bitset(x.and_not(y))),
        // Strings subtract numerically: "3" - "4" is -1
        (a, b) if is_numeric_like(a) && is_numeric_like(b) => match promote(a, b) {
            NumPair::Ints(x, y) => Var::int(x.wrapping_sub(y)),
            NumPair::Floats(x, y) => Var::float(x - y),
        },
        (a, b) => return Err(type_err(TokenKind::Minus, a, b)),
    })
}

fn multiply(a: &Value, b: &Value) -> EvalResult<Var> {
    Ok(match (a, b) {
        // point·point is the dot product
        (Value::Point3(p), Value::Point3(q)) => Var::float(p.dot(*q)),
        (Value::Point3(p), s) if is_numeric_like(s) => {
            Var::new(Value::Point3(p.scale(s.to_float())))
        }
        (s, Value::Point3(p)) if is_numeric_like(s) => {
            Var::new(Value::Point3(p.scale(s.to_float())))
        }
        (Value::Matrix3(m), Value::Point3(p)) => Var::new(Value::Point3(m.transform(*p))),
        (Value::Matrix3(m), Value::Matrix3(n)) => Var::new(Value::Matrix3(m.mul(n))),
        (Value::Matrix3(m), s) if is_numeric_like(s) => {
            Var::new(Value::Matrix3(m.scale(s.to_float())))
        }
        (Value::Matrix4(m), Value::Point3(p)) => Var::new(Value::Point3(m.transform(*p))),
        (Value::Matrix4(m), Value::Point4(p)) => Var::new(Value::Point4(m.transform4(*p))),
        (Value::Matrix4(m), Value::Matrix4(n)) => Var::new(Value::Matrix4(m.mul(n))),
        (Value::Bitset(x), Value::Bitset(y)) => Var::new(Value::Bitset(x.and(y))),
        (a, b) if is_numeric_like(a) && is_numeric_like(b) => match promote(a, b) {
            NumPair::Ints(x, y) => Var::int(x.wrapping_mul(y)),
            NumPair::Floats(x, y) => Var::float(x * y),
        },
        (a, b) => return Err(type_err(TokenKind::Times, a, b)),
    })
}

fn divide(a: &Value, b: &Value) -> EvalResult<Var> {
    Ok(match (a, b) {
        (Value::Point3(p), s) if is_numeric_like(s) => {
            Var::new(Value::Point3(p.scale(1.0 / s.to_float())))
        }
        (a, b) if is_numeric_like(a) && is_numeric_like(b) => match promote(a, b) {
            // integer division by zero saturates to 0 (compatibility rule)
            NumPair::Ints(_, 0) => Var::int(0),
            NumPair::Ints(x, y) => Var::int(x / y),
            NumPair::Floats(x, y) => Var::float(x / y),
        },
        (a, b) => return Err(type_err(TokenKind::Divide, a, b)),
    })
}

fn modulo(a: &Value, b: &Value) -> EvalResult<Var> {
    Ok(match (a, b) {
        (a, b) if is_numeric_like(a) && is_numeric_like(b) => match promote(a, b) {
            // modulo by zero saturates to 0 (compatibility rule)
            NumPair::Ints(_, 0) => Var::int(0),
            NumPair::Ints(x, y) => Var::int(x % y),
            NumPair::Floats(x, y) => Var::float(x % y),
        },
        (a, b) => return Err(type_err(TokenKind::Modulo, a, b)),
    })
}

fn power(a: &Value, b: &Value) -> EvalResult<Var> {
    Ok(match (a, b) {
        (a, b) if is_numeric_like(a) && is_numeric_like(b) => match promote(a, b) {
            NumPair::Ints(x, y) if (0..=62).contains(&y) => {
                u32::try_from(y).ok().and_then(|y| x.checked_pow(y)).map_or_else(
                    || Var::float((x as f64).powf(y as f64)),
                    Var::int,
                )
            }
            NumPair::Ints(x, y) => Var::float((x as f64).powf(y as f64)),
            NumPair::Floats(x, y) => Var::float(x.powf(y)),
        },
        (a, b) => return Err(type_err(TokenKind::Power, a, b)),
    })
}

fn cross(a: &Value, b: &Value) -> EvalResult<Var> {
    match (a, b) {
        (Value::Point3(p), Value::Point3(q)) => Ok(Var::new(Value::Point3(p.cross(*q)))),
        (a, b) => Err(type_err(TokenKind::Cross, a, b)),
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

fn numeric_compare(op: TokenKind, x: f64, y: f64) -> bool {
    match op {
        TokenKind::EqEq => (x - y).abs() < NEAR_ZERO,
        TokenKind::NotEq => (x - y).abs() >= NEAR_ZERO,
        TokenKind::Gt => x > y,
        TokenKind::Lt => x < y,
        TokenKind::GtEq => x >= y,
        TokenKind::LtEq => x <= y,
        _ => false,
    }
}

/// String value that does not parse as a number.
fn non_numeric_str(v: &Value) -> Option<&str> {
    match v {
        Value::Str(s) if s.trim().parse::<f64>().is_err() => Some(s),
        _ => None,
    }
}

fn compare(op: TokenKind, a: &Value, b: &Value) -> EvalResult<Var> {
    // Pure string comparison is case-insensitive
    if let (Some(x), Some(y)) = (non_numeric_str(a), non_numeric_str(b)) {
        let (x, y) = (x.to_ascii_lowercase(), y.to_ascii_lowercase());
        let ord = x.cmp(&y);
        let result = match op {
            TokenKind::EqEq => ord.is_eq(),
            TokenKind::NotEq => ord.is_ne(),
            TokenKind::Gt => ord.is_gt(),
            TokenKind::Lt => ord.is_lt(),
            TokenKind::GtEq => ord.is_ge(),
            TokenKind::LtEq => ord.is_le(),
            _ => false,
        };
        return Ok(Var::bool(result));
    }

    match (a, b) {
        (Value::Point3(p), Value::Point3(q)) => match op {
            TokenKind::EqEq => Ok(Var::bool(p.approx_eq(*q))),
            TokenKind::NotEq => Ok(Var::bool(!p.approx_eq(*q))),
            _ => Err(type_err(op, a, b)),
        },
        (Value::Bitset(x), Value::Bitset(y)) => match op {
            TokenKind::EqEq => Ok(Var::bool(x == y)),
            TokenKind::NotEq => Ok(Var::bool(x != y)),
            _ => Err(type_err(op, a, b)),
        },
        (Value::Array(_) | Value::Map(_), _) | (_, Value::Array(_) | Value::Map(_)) => match op {
            TokenKind::EqEq => Ok(Var::bool(a.to_string() == b.to_string())),
            TokenKind::NotEq => Ok(Var::bool(a.to_string() != b.to_string())),
            _ => Err(type_err(op, a, b)),
        },
        (a, b) if is_numeric_like(a) && is_numeric_like(b) => {
            Ok(Var::bool(numeric_compare(op, a.to_float(), b.to_float())))
        }
        (a, b) => Err(type_err(op, a, b)),
    }
}

// ---------------------------------------------------------------------------
// Boolean / set logic
// ---------------------------------------------------------------------------

/// Promote a boolean to a bitset over the universe when paired with one.
fn as_bitset(v: &Value, universe: usize) -> Option<Bitset> {
    match v {
        Value::Bitset(bs) => Some(bs.clone()),
        Value::Bool(b) => Some(if *b {
            Bitset::all(universe)
        } else {
            Bitset::new()
        }),
        _ => None,
    }
}

fn set_logic(op: TokenKind, a: &Value, b: &Value, universe: usize) -> EvalResult<Var> {
    // If either side is a bitset, this is set algebra
    if matches!(a, Value::Bitset(_)) || matches!(b, Value::Bitset(_)) {
        let (Some(x), Some(y)) = (as_bitset(a, universe), as_bitset(b, universe)) else {
            return Err(type_err(op, a, b));
        };
        let out = match op {
            TokenKind::And => x.and(&y),
            TokenKind::Or => x.or(&y),
            TokenKind::Xor => x.xor(&y),
            // toggle: remove if fully present, otherwise add
            TokenKind::ToggleOp => {
                if y.is_subset_of(&x) {
                    x.and_not(&y)
                } else {
                    x.or(&y)
                }
            }
            _ => return Err(type_err(op, a, b)),
        };
        return Ok(Var::new(Value::Bitset(out)));
    }

    let (x, y) = (a.truthy(), b.truthy());
    Ok(Var::bool(match op {
        TokenKind::And => x && y,
        TokenKind::Or => x || y,
        TokenKind::Xor | TokenKind::ToggleOp => x != y,
        _ => return Err(type_err(op, a, b)),
    }))
}

// ---------------------------------------------------------------------------
// Unary operators
// ---------------------------------------------------------------------------

/// Apply a unary operator.
pub fn unary(op: TokenKind, operand: &Var, universe: usize) -> EvalResult<Var> {
    let v = &operand.value;
    match op {
        TokenKind::Not => Ok(match v {
            Value::Bitset(bs) => Var::new(Value::Bitset(bs.complement(universe))),
            other => Var::bool(!other.truthy()),
        }),
        TokenKind::UnaryMinus => Ok(match v {
            Value::Int(i) => Var::int(-i),
            Value::Float(f) => Var::float(-f),
            Value::Bool(b) => Var::int(-i64::from(*b)),
            Value::Point3(p) => Var::new(Value::Point3(p.scale(-1.0))),
            Value::Point4(p) => Var::new(Value::Point4(p.scale(-1.0))),
            Value::Matrix3(m) => Var::new(Value::Matrix3(m.scale(-1.0))),
            Value::Matrix4(m) => Var::new(Value::Matrix4(m.scale(-1.0))),
            Value::Str(s) => {
                if let Ok(i) = s.trim().parse::<i64>() {
                    Var::int(-i)
                } else {
                    Var::float(-v.to_float())
                }
            }
            other => {
                return Err(EvalError::type_mismatch(format!(
                    "cannot negate {}",
                    other.kind_name()
                )))
            }
        }),
        other => Err(EvalError::type_mismatch(format!(
            "not a unary operator: {other:?}"
        ))),
    }
}

/// Concatenation helper used by string formatting paths.
#[must_use]
pub fn concat_str(a: &Value, b: &Value) -> Value {
    Value::Str(Arc::from(format!("{a}{b}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use atomscript_math::{Matrix3, Point3};

    fn b(op: TokenKind, a: Var, c: Var) -> Var {
        binary(op, &a, &c, 0).unwrap()
    }

    // -- coercion: "3"+"4" is "34", "3"-"4" is -1, 3+4.0 is 7.0 --

    #[test]
    fn string_plus_string_concatenates() {
        let r = b(TokenKind::Plus, Var::str("3"), Var::str("4"));
        assert_eq!(format!("{r}"), "34");
    }

    #[test]
    fn string_minus_string_is_numeric() {
        let r = b(TokenKind::Minus, Var::str("3"), Var::str("4"));
        assert!(matches!(r.value, Value::Int(-1)));
    }

    #[test]
    fn int_plus_float_promotes() {
        let r = b(TokenKind::Plus, Var::int(3), Var::float(4.0));
        assert!(matches!(r.value, Value::Float(f) if f == 7.0));
        assert_eq!(format!("{r}"), "7.0");
    }

    #[test]
    fn int_arithmetic_stays_integer() {
        let r = b(TokenKind::Plus, Var::int(3), Var::int(4));
        assert!(matches!(r.value, Value::Int(7)));
        let r = b(TokenKind::Divide, Var::int(7), Var::int(2));
        assert!(matches!(r.value, Value::Int(3)));
    }

    // -- the division-by-zero compatibility rule --

    #[test]
    fn integer_division_by_zero_yields_zero() {
        // intentional saturating-to-zero rule, not an error path
        let r = b(TokenKind::Divide, Var::int(5), Var::int(0));
        assert!(matches!(r.value, Value::Int(0)));
        let r = b(TokenKind::Modulo, Var::int(5), Var::int(0));
        assert!(matches!(r.value, Value::Int(0)));
    }

    #[test]
    fn float_division_by_zero_is_ieee() {
        let r = b(TokenKind::Divide, Var::float(1.0), Var::float(0.0));
        assert!(matches!(r.value, Value::Float(f) if f.is_infinite()));
    }

    // -- geometry --

    #[test]
    fn point_arithmetic() {
        let p = Var::new(Value::Point3(Point3::new(1.0, 2.0, 3.0)));
        let q = Var::new(Value::Point3(Point3::new(4.0, 5.0, 6.0)));
        let sum = b(TokenKind::Plus, p.clone(), q.clone());
        assert_eq!(format!("{sum}"), "{5 7 9}");
        let dot = b(TokenKind::Times, p.clone(), q.clone());
        assert!(matches!(dot.value, Value::Float(f) if f == 32.0));
        let scaled = b(TokenKind::Times, p.clone(), Var::int(2));
        assert_eq!(format!("{scaled}"), "{2 4 6}");
        let x = b(TokenKind::Cross, p, q);
        assert_eq!(format!("{x}"), "{-3 6 -3}");
    }

    #[test]
    fn matrix_times_point_transforms() {
        let m = Var::new(Value::Matrix3(Matrix3::IDENTITY));
        let p = Var::new(Value::Point3(Point3::new(1.0, 2.0, 3.0)));
        let r = b(TokenKind::Times, m, p);
        assert_eq!(format!("{r}"), "{1 2 3}");
    }

    // -- containers --

    #[test]
    fn array_plus_concatenates() {
        let a = Var::new(Value::array(vec![Var::int(1)]));
        let c = Var::new(Value::array(vec![Var::int(2), Var::int(3)]));
        let r = b(TokenKind::Plus, a, c);
        assert_eq!(format!("{r}"), "[1, 2, 3]");
    }

    #[test]
    fn map_merge_right_wins() {
        let mut p1 = IndexMap::new();
        p1.insert("a".to_owned(), Var::int(1));
        p1.insert("b".to_owned(), Var::int(2));
        let mut p2 = IndexMap::new();
        p2.insert("b".to_owned(), Var::int(9));
        let r = b(
            TokenKind::Plus,
            Var::new(Value::map(p1)),
            Var::new(Value::map(p2)),
        );
        assert_eq!(format!("{r}"), "{ \"a\":1, \"b\":9 }");
    }

    #[test]
    fn map_minus_removes_key() {
        let mut p = IndexMap::new();
        p.insert("a".to_owned(), Var::int(1));
        p.insert("b".to_owned(), Var::int(2));
        let r = b(TokenKind::Minus, Var::new(Value::map(p)), Var::str("a"));
        assert_eq!(format!("{r}"), "{ \"b\":2 }");
    }

    // -- comparisons --

    #[test]
    fn string_equality_is_case_insensitive() {
        let r = b(TokenKind::EqEq, Var::str("Ala"), Var::str("ALA"));
        assert!(r.truthy());
        let r = b(TokenKind::NotEq, Var::str("Ala"), Var::str("Gly"));
        assert!(r.truthy());
    }

    #[test]
    fn numeric_strings_compare_numerically() {
        let r = b(TokenKind::Lt, Var::str("9"), Var::str("10"));
        assert!(r.truthy());
    }

    #[test]
    fn point_ordering_is_a_type_error() {
        let p = Var::new(Value::Point3(Point3::ZERO));
        let q = Var::new(Value::Point3(Point3::ZERO));
        assert!(binary(TokenKind::Gt, &p, &q, 0).is_err());
        assert!(binary(TokenKind::EqEq, &p, &q, 0).unwrap().truthy());
    }

    // -- set logic --

    #[test]
    fn bitset_algebra() {
        let x = Var::new(Value::Bitset([1, 2].into_iter().collect()));
        let y = Var::new(Value::Bitset([2, 3].into_iter().collect()));
        assert_eq!(format!("{}", b(TokenKind::And, x.clone(), y.clone())), "({2})");
        assert_eq!(format!("{}", b(TokenKind::Or, x.clone(), y.clone())), "({1:3})");
        assert_eq!(format!("{}", b(TokenKind::Xor, x, y)), "({1 3})");
    }

    #[test]
    fn bool_promotes_to_bitset_universe() {
        let x = Var::new(Value::Bitset([1].into_iter().collect()));
        let r = binary(TokenKind::Or, &Var::bool(true), &x, 4).unwrap();
        assert_eq!(format!("{r}"), "({0:3})");
    }

    #[test]
    fn toggle_adds_or_removes() {
        let x = Var::new(Value::Bitset([1, 2, 3].into_iter().collect()));
        let sub = Var::new(Value::Bitset([2].into_iter().collect()));
        let r = b(TokenKind::ToggleOp, x.clone(), sub.clone());
        assert_eq!(format!("{r}"), "({1 3})");
        let out = Var::new(Value::Bitset([9].into_iter().collect()));
        let r = b(TokenKind::ToggleOp, x, out);
        assert_eq!(format!("{r}"), "({1:3 9})");
    }

    // -- unary --

    #[test]
    fn unary_negate_and_not() {
        assert!(matches!(
            unary(TokenKind::UnaryMinus, &Var::int(5), 0).unwrap().value,
            Value::Int(-5)
        ));
        assert!(unary(TokenKind::Not, &Var::bool(false), 0).unwrap().truthy());
        let bs = Var::new(Value::Bitset([0].into_iter().collect()));
        let r = unary(TokenKind::Not, &bs, 3).unwrap();
        assert_eq!(format!("{r}"), "({1:2})");
    }

    #[test]
    fn power_operator() {
        let r = b(TokenKind::Power, Var::int(2), Var::int(10));
        assert!(matches!(r.value, Value::Int(1024)));
        let r = b(TokenKind::Power, Var::int(2), Var::int(-1));
        assert!(matches!(r.value, Value::Float(f) if f == 0.5));
    }
}
