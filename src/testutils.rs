//! Utilities for unit testing filters, tests and global functions in
//! isolation, without having to render a full template through them.
//!
//! ```
//! use jinja_engine::Environment;
//! use jinja_engine::testutils::apply_filter;
//!
//! let mut env = Environment::new();
//! env.add_filter("shout", |s: String| format!("{}!", s.to_uppercase()));
//! let rv = apply_filter(&env, "shout", "hello".into(), &[]).unwrap();
//! assert_eq!(rv.as_str(), Some("HELLO!"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Context;
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::state::State;
use crate::value::Value;

fn dummy_state(env: &Environment) -> State<'_> {
    State::for_env(env, Context::new(Arc::new(HashMap::new())))
}

/// Invokes a filter registered on `env` directly.
pub fn apply_filter(env: &Environment, name: &str, value: Value, args: &[Value]) -> Result<Value, Error> {
    let state = dummy_state(env);
    match env.get_filter(name) {
        Some(f) => f(&state, value, args),
        None => Err(Error::new(ErrorKind::FilterError, format!("no filter named '{name}'"))),
    }
}

/// Invokes a test registered on `env` directly.
pub fn perform_test(env: &Environment, name: &str, value: &Value, args: &[Value]) -> Result<bool, Error> {
    let state = dummy_state(env);
    state.perform_test(name, value, args)
}

/// Invokes a global function registered on `env` directly.
pub fn invoke_global(env: &Environment, name: &str, args: &[Value]) -> Result<Value, Error> {
    match env.globals_snapshot().get(name) {
        Some(Value::Object(obj)) => obj.call(args),
        Some(_) => Err(Error::new(ErrorKind::RuntimeError, format!("'{name}' is not callable"))),
        None => Err(Error::new(ErrorKind::RuntimeError, format!("no global named '{name}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_filter() {
        let mut env = Environment::empty();
        env.add_filter("shout", |s: String| format!("{}!", s.to_uppercase()));
        let rv = apply_filter(&env, "shout", Value::from("hello"), &[]).unwrap();
        assert_eq!(rv.as_str(), Some("HELLO!"));
    }

    #[test]
    fn test_perform_test() {
        let env = Environment::empty();
        assert!(perform_test(&env, "odd", &Value::from(3), &[]).unwrap());
    }
}
