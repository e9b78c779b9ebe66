//! Operator semantics on runtime values.
//!
//! Binary arithmetic runs in `i64` when both operands are integral and in
//! `f64` otherwise; integer overflow is reported instead of wrapped.
//! Division always produces a float.

use std::cmp::Ordering;

use crate::error::{Error, EvalResult};
use crate::value::Value;

fn overflow() -> Error {
    Error::calculation("integer overflow")
}

fn both_integral(a: &Value, b: &Value) -> bool {
    a.is_integral() && b.is_integral()
}

pub fn neg(v: Value) -> EvalResult<Value> {
    match v {
        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        Value::UInt(n) => {
            let n = i64::try_from(n).map_err(|_| overflow())?;
            n.checked_neg().map(Value::Int).ok_or_else(overflow)
        }
        Value::Float(f) | Value::UFloat(f) => Ok(Value::Float(-f)),
        other => Err(Error::calculation(format!(
            "cannot negate {}",
            other.kind_name()
        ))),
    }
}

pub fn pos(v: Value) -> EvalResult<Value> {
    if v.is_numeric() {
        Ok(v)
    } else {
        Err(Error::calculation(format!(
            "unary `+` expects a number, found {}",
            v.kind_name()
        )))
    }
}

pub fn not(v: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(!v.as_bool()?))
}

pub fn add(lhs: Value, rhs: Value) -> EvalResult<Value> {
    use Value::*;
    match (lhs, rhs) {
        (Str(a), Str(b)) => Ok(Str(a + &b)),
        (Array(mut a), Array(b)) | (Array(mut a), Tuple(b)) | (Tuple(mut a), Array(b))
        | (Tuple(mut a), Tuple(b)) => {
            a.extend(b);
            Ok(Array(a))
        }
        (a, b) if both_integral(&a, &b) => a
            .as_i64()?
            .checked_add(b.as_i64()?)
            .map(Int)
            .ok_or_else(overflow),
        (a, b) if a.is_numeric() && b.is_numeric() => Ok(Float(a.as_f64()? + b.as_f64()?)),
        (a, b) => Err(Error::calculation(format!(
            "cannot add {} and {}",
            a.kind_name(),
            b.kind_name()
        ))),
    }
}

pub fn sub(lhs: Value, rhs: Value) -> EvalResult<Value> {
    if both_integral(&lhs, &rhs) {
        lhs.as_i64()?
            .checked_sub(rhs.as_i64()?)
            .map(Value::Int)
            .ok_or_else(overflow)
    } else if lhs.is_numeric() && rhs.is_numeric() {
        Ok(Value::Float(lhs.as_f64()? - rhs.as_f64()?))
    } else {
        Err(Error::calculation(format!(
            "cannot subtract {} from {}",
            rhs.kind_name(),
            lhs.kind_name()
        )))
    }
}

pub fn mul(lhs: Value, rhs: Value) -> EvalResult<Value> {
    if both_integral(&lhs, &rhs) {
        lhs.as_i64()?
            .checked_mul(rhs.as_i64()?)
            .map(Value::Int)
            .ok_or_else(overflow)
    } else if lhs.is_numeric() && rhs.is_numeric() {
        Ok(Value::Float(lhs.as_f64()? * rhs.as_f64()?))
    } else {
        Err(Error::calculation(format!(
            "cannot multiply {} and {}",
            lhs.kind_name(),
            rhs.kind_name()
        )))
    }
}

/// Division always runs in floating point.
pub fn div(lhs: Value, rhs: Value) -> EvalResult<Value> {
    let b = rhs.as_f64()?;
    if b == 0.0 {
        return Err(Error::calculation("division by zero"));
    }
    Ok(Value::Float(lhs.as_f64()? / b))
}

pub fn rem(lhs: Value, rhs: Value) -> EvalResult<Value> {
    if both_integral(&lhs, &rhs) {
        let b = rhs.as_i64()?;
        if b == 0 {
            return Err(Error::calculation("division by zero"));
        }
        lhs.as_i64()?
            .checked_rem(b)
            .map(Value::Int)
            .ok_or_else(overflow)
    } else {
        let b = rhs.as_f64()?;
        if b == 0.0 {
            return Err(Error::calculation("division by zero"));
        }
        Ok(Value::Float(lhs.as_f64()? % b))
    }
}

pub fn pow(lhs: Value, rhs: Value) -> EvalResult<Value> {
    if both_integral(&lhs, &rhs) {
        let exp = rhs.as_i64()?;
        if exp < 0 {
            return Err(Error::calculation(
                "negative integer exponent; use a float base",
            ));
        }
        let exp = u32::try_from(exp).map_err(|_| overflow())?;
        lhs.as_i64()?
            .checked_pow(exp)
            .map(Value::Int)
            .ok_or_else(overflow)
    } else if lhs.is_numeric() && rhs.is_numeric() {
        Ok(Value::Float(lhs.as_f64()?.powf(rhs.as_f64()?)))
    } else {
        Err(Error::calculation(format!(
            "cannot raise {} to {}",
            lhs.kind_name(),
            rhs.kind_name()
        )))
    }
}

/// Equality across representation widths: `1`, `1u` and `1.0` are equal,
/// and an enum symbol equals its string form.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    use Value::*;
    match (lhs, rhs) {
        (Empty, Empty) => true,
        (Bool(a), Bool(b)) => a == b,
        (Str(a), Str(b)) | (Enum(a), Enum(b)) | (Str(a), Enum(b)) | (Enum(a), Str(b)) => a == b,
        (Color(a), Color(b)) => a == b,
        (Array(a), Array(b)) | (Tuple(a), Tuple(b)) | (Array(a), Tuple(b))
        | (Tuple(a), Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_f64(), b.as_f64()) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        _ => false,
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`: numbers compare numerically,
/// strings lexicographically.
pub fn compare(lhs: &Value, rhs: &Value) -> EvalResult<Ordering> {
    use Value::*;
    match (lhs, rhs) {
        (Str(a), Str(b)) | (Enum(a), Enum(b)) | (Str(a), Enum(b)) | (Enum(a), Str(b)) => {
            Ok(a.cmp(b))
        }
        (a, b) if a.is_numeric() && b.is_numeric() => a
            .as_f64()?
            .partial_cmp(&b.as_f64()?)
            .ok_or_else(|| Error::calculation("values are not comparable")),
        (a, b) => Err(Error::calculation(format!(
            "cannot order {} and {}",
            a.kind_name(),
            b.kind_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert_eq!(
            add(Value::UInt(1), Value::UInt(2)).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            sub(Value::UInt(1), Value::UInt(2)).unwrap(),
            Value::Int(-1)
        );
        assert_eq!(mul(Value::Int(4), Value::UInt(3)).unwrap(), Value::Int(12));
    }

    #[test]
    fn test_mixed_arithmetic_floats() {
        assert_eq!(
            add(Value::Int(1), Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            mul(Value::UFloat(2.0), Value::UInt(3)).unwrap(),
            Value::Float(6.0)
        );
    }

    #[test]
    fn test_division_is_float() {
        assert_eq!(div(Value::Int(1), Value::Int(2)).unwrap(), Value::Float(0.5));
        assert!(div(Value::Int(1), Value::UInt(0)).is_err());
    }

    #[test]
    fn test_overflow_reported() {
        assert!(add(Value::Int(i64::MAX), Value::Int(1)).is_err());
        assert!(neg(Value::UInt(u64::MAX)).is_err());
        assert!(pow(Value::Int(10), Value::Int(40)).is_err());
    }

    #[test]
    fn test_pow() {
        assert_eq!(pow(Value::UInt(2), Value::UInt(10)).unwrap(), Value::Int(1024));
        assert_eq!(
            pow(Value::Float(4.0), Value::Float(0.5)).unwrap(),
            Value::Float(2.0)
        );
        assert!(pow(Value::Int(2), Value::Int(-1)).is_err());
    }

    #[test]
    fn test_string_and_array_concat() {
        assert_eq!(
            add(Value::Str("ab".into()), Value::Str("cd".into())).unwrap(),
            Value::Str("abcd".into())
        );
        assert_eq!(
            add(
                Value::Array(vec![Value::Int(1)]),
                Value::Array(vec![Value::Int(2)])
            )
            .unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_equality_across_widths() {
        assert!(values_equal(&Value::UInt(1), &Value::Int(1)));
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(values_equal(
            &Value::Enum("left".into()),
            &Value::Str("left".into())
        ));
        assert!(!values_equal(&Value::Bool(true), &Value::Int(1)));
    }

    #[test]
    fn test_compare() {
        assert_eq!(
            compare(&Value::UInt(1), &Value::Float(1.5)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Str("b".into()), &Value::Str("a".into())).unwrap(),
            Ordering::Greater
        );
        assert!(compare(&Value::Bool(true), &Value::Bool(false)).is_err());
    }

    #[test]
    fn test_remainder() {
        assert_eq!(rem(Value::Int(7), Value::Int(3)).unwrap(), Value::Int(1));
        assert_eq!(
            rem(Value::Float(7.5), Value::Float(2.0)).unwrap(),
            Value::Float(1.5)
        );
        assert!(rem(Value::Int(1), Value::Int(0)).is_err());
    }
}
