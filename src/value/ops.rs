//! Arithmetic, comparison, and containment helpers for [`Value`].
//!
//! Mirrors the shape of the upstream `value::ops` module (free functions
//! per operator, numeric coercion before falling back to an error) but
//! without the lossy-float/128-bit-integer overflow ladder the upstream
//! engine uses — this engine's numeric tower is just `i64`/`f64`.

use std::cmp::Ordering;

use crate::error::{Error, ErrorKind};
use crate::value::Value;

fn type_error(op: &str, a: &Value, b: &Value) -> Error {
    Error::new(
        ErrorKind::TypeError,
        format!(
            "unsupported operand types for {op}: {} and {}",
            a.type_name(),
            b.type_name()
        ),
    )
}

/// Best-effort ordering used for both `==`/`!=` and `<`/`<=`/`>`/`>=`.
///
/// Numbers compare across int/float, strings/safe-strings compare by their
/// text, sequences compare element-wise, everything else only compares
/// equal to its own identical shape.
pub fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Nil, Value::Nil) => Some(Ordering::Equal),
        (Value::Undefined(..), Value::Undefined(..)) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.partial_cmp(y),
        (Value::String(x) | Value::Safe(x), Value::String(y) | Value::Safe(y)) => {
            x.as_ref().partial_cmp(y.as_ref())
        }
        (Value::List(x) | Value::Tuple(x), Value::List(y) | Value::Tuple(y)) => {
            x.iter().partial_cmp(y.iter())
        }
        (Value::Map(x), Value::Map(y)) => {
            if x.len() != y.len() {
                return Some(if x.len() < y.len() {
                    Ordering::Less
                } else {
                    Ordering::Greater
                });
            }
            for (k, v) in x.iter() {
                match y.get(k) {
                    Some(ov) if v == ov => continue,
                    _ => return None,
                }
            }
            Some(Ordering::Equal)
        }
        (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
            a.as_f64().partial_cmp(&b.as_f64())
        }
        _ => None,
    }
}

pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
            Ok(Value::Float(a.as_f64().unwrap() + b.as_f64().unwrap()))
        }
        (Value::String(a) | Value::Safe(a), Value::String(b) | Value::Safe(b)) => {
            Ok(Value::from(format!("{a}{b}")))
        }
        (Value::List(a), Value::List(b)) => {
            let mut out = (**a).clone();
            out.extend(b.iter().cloned());
            Ok(Value::from_vec(out))
        }
        _ => Err(type_error("+", lhs, rhs)),
    }
}

pub fn sub(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
        (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
            Ok(Value::Float(a.as_f64().unwrap() - b.as_f64().unwrap()))
        }
        _ => Err(type_error("-", lhs, rhs)),
    }
}

pub fn mul(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
        (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
            Ok(Value::Float(a.as_f64().unwrap() * b.as_f64().unwrap()))
        }
        (Value::String(s) | Value::Safe(s), Value::Int(n))
        | (Value::Int(n), Value::String(s) | Value::Safe(s)) => {
            Ok(Value::from(s.repeat((*n).max(0) as usize)))
        }
        _ => Err(type_error("*", lhs, rhs)),
    }
}

pub fn div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    let (a, b) = (
        lhs.as_f64().ok_or_else(|| type_error("/", lhs, rhs))?,
        rhs.as_f64().ok_or_else(|| type_error("/", lhs, rhs))?,
    );
    if b == 0.0 {
        return Err(Error::new(ErrorKind::RuntimeError, "division by zero"));
    }
    Ok(Value::Float(a / b))
}

pub fn int_div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(Error::new(ErrorKind::RuntimeError, "division by zero"));
            }
            Ok(Value::Int(a.div_euclid(*b)))
        }
        (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
            Ok(Value::Float((a.as_f64().unwrap() / b.as_f64().unwrap()).floor()))
        }
        _ => Err(type_error("//", lhs, rhs)),
    }
}

pub fn rem(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(Error::new(ErrorKind::RuntimeError, "division by zero"));
            }
            Ok(Value::Int(a.rem_euclid(*b)))
        }
        (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
            Ok(Value::Float(a.as_f64().unwrap() % b.as_f64().unwrap()))
        }
        _ => Err(type_error("%", lhs, rhs)),
    }
}

pub fn pow(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) if *b >= 0 => Ok(Value::Int(a.pow(*b as u32))),
        (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
            Ok(Value::Float(a.as_f64().unwrap().powf(b.as_f64().unwrap())))
        }
        _ => Err(type_error("**", lhs, rhs)),
    }
}

pub fn neg(val: &Value) -> Result<Value, Error> {
    match val {
        Value::Int(v) => Ok(Value::Int(-v)),
        Value::Float(v) => Ok(Value::Float(-v)),
        _ => Err(Error::new(
            ErrorKind::TypeError,
            format!("cannot negate {}", val.type_name()),
        )),
    }
}

pub fn string_concat(left: &Value, right: &Value) -> Value {
    Value::from(format!("{left}{right}"))
}

/// `x in y`.
pub fn contains(container: &Value, value: &Value) -> Result<bool, Error> {
    match container {
        Value::List(v) | Value::Tuple(v) => Ok(v.iter().any(|item| item == value)),
        Value::Map(m) => Ok(value.as_str().is_some_and(|k| m.contains_key(k))),
        Value::String(s) | Value::Safe(s) => Ok(value
            .as_str()
            .map(|needle| s.contains(needle))
            .unwrap_or(false)),
        Value::Object(obj) => Ok(obj.try_iter()?.any(|item| &item == value)),
        _ => Err(Error::new(
            ErrorKind::TypeError,
            format!(
                "cannot perform containment check on {}",
                container.type_name()
            ),
        )),
    }
}
