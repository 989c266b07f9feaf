//! The representative test set described in the engine's documentation.
//!
//! A test is `Fn(&State, &Value, &[Value]) -> Result<Value, Error>`,
//! registered with [`Environment::add_test`](crate::environment::Environment::add_test).
//! `{% if value is name(arg) %}` looks up `name`, calls it with `value` and
//! `[arg]`, and treats the result's truthiness as the verdict; `is not name`
//! negates it.

use crate::environment::Environment;
use crate::error::Error;
use crate::state::State;
use crate::value::Value;

pub(crate) fn register_builtins(env: &mut Environment) {
    env.add_test("defined", defined);
    env.add_test("undefined", undefined);
    env.add_test("none", none);
    env.add_test("boolean", boolean);
    env.add_test("odd", odd);
    env.add_test("even", even);
    env.add_test("number", number);
    env.add_test("string", string);
    env.add_test("mapping", mapping);
    env.add_test("sequence", sequence);
    env.add_test("iterable", iterable);
    env.add_test("callable", callable);
    env.add_test("sameas", sameas);
    env.add_test("eq", eq);
    env.add_test("equalto", eq);
    env.add_test("ne", ne);
    env.add_test("lt", lt);
    env.add_test("le", le);
    env.add_test("gt", gt);
    env.add_test("ge", ge);
    env.add_test("in", contains);
    env.add_test("true", is_true);
    env.add_test("false", is_false);
    env.add_test("lower", lower);
    env.add_test("upper", upper);
}

fn defined(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(!value.is_undefined()))
}

fn undefined(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.is_undefined()))
}

fn none(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.is_none()))
}

fn boolean(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(matches!(value, Value::Bool(_))))
}

fn odd(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.as_i64().map(|i| i % 2 != 0).unwrap_or(false)))
}

fn even(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.as_i64().map(|i| i % 2 == 0).unwrap_or(false)))
}

fn number(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(matches!(value, Value::Int(_) | Value::Float(_))))
}

fn string(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.as_str().is_some()))
}

fn mapping(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(matches!(value, Value::Map(_))))
}

fn sequence(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(matches!(value, Value::List(_) | Value::Tuple(_))))
}

fn iterable(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.try_iter().is_ok()))
}

fn callable(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(matches!(value, Value::Object(obj) if obj.is_callable())))
}

fn sameas(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let other = args.first().ok_or_else(|| {
        Error::new(crate::error::ErrorKind::TestError, "sameas requires one argument")
    })?;
    Ok(Value::from(match (value, other) {
        (Value::Object(a), Value::Object(b)) => std::sync::Arc::ptr_eq(a, b),
        _ => value == other,
    }))
}

fn eq(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(args.first().map(|o| value == o).unwrap_or(false)))
}

fn ne(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(args.first().map(|o| value != o).unwrap_or(true)))
}

fn lt(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(args.first().and_then(|o| value.partial_cmp(o)) == Some(std::cmp::Ordering::Less)))
}

fn le(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(!matches!(
        args.first().and_then(|o| value.partial_cmp(o)),
        Some(std::cmp::Ordering::Greater) | None
    )))
}

fn gt(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(args.first().and_then(|o| value.partial_cmp(o)) == Some(std::cmp::Ordering::Greater)))
}

fn ge(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(!matches!(
        args.first().and_then(|o| value.partial_cmp(o)),
        Some(std::cmp::Ordering::Less) | None
    )))
}

fn contains(_state: &State, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let haystack = args
        .first()
        .ok_or_else(|| Error::new(crate::error::ErrorKind::TestError, "in requires a container argument"))?;
    Ok(Value::from(crate::value::ops::contains(haystack, value)?))
}

fn is_true(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(matches!(value, Value::Bool(true))))
}

fn is_false(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(matches!(value, Value::Bool(false))))
}

fn lower(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let s = value.as_str().unwrap_or_default();
    Ok(Value::from(s.chars().all(|c| !c.is_uppercase())))
}

fn upper(_state: &State, value: &Value, _args: &[Value]) -> Result<Value, Error> {
    let s = value.as_str().unwrap_or_default();
    Ok(Value::from(s.chars().all(|c| !c.is_lowercase())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn state(env: &Environment) -> State<'_> {
        State::for_env(env, Context::new(Arc::new(HashMap::new())))
    }

    #[test]
    fn test_odd_even() {
        let env = Environment::empty();
        let st = state(&env);
        assert!(odd(&st, &Value::from(3), &[]).unwrap().is_true());
        assert!(even(&st, &Value::from(4), &[]).unwrap().is_true());
    }

    #[test]
    fn test_defined() {
        let env = Environment::empty();
        let st = state(&env);
        assert!(!defined(&st, &Value::default(), &[]).unwrap().is_true());
        assert!(defined(&st, &Value::from(1), &[]).unwrap().is_true());
    }
}
