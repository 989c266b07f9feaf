use jinja_engine::value::Value;
use jinja_engine::{Environment, State};

#[test]
fn test_state_lookup_global() {
    let env = Environment::new();
    env.add_filter("lookup_global", |state: &State, _value: Value, _args: &[Value]| {
        Ok(state.lookup("the_global").unwrap_or_default())
    });
    env.add_global("the_global", true);
    let rv = env.render_str("[{{ 0|lookup_global }}]", ()).unwrap();
    assert_eq!(rv, "[true]");
}

#[test]
fn test_state_lookup_missing() {
    let env = Environment::new();
    env.add_filter("lookup_missing", |state: &State, _value: Value, _args: &[Value]| {
        Ok(state.lookup("nope").unwrap_or_default())
    });
    let rv = env.render_str("[{{ 0|lookup_missing }}]", ()).unwrap();
    assert_eq!(rv, "[]");
}
