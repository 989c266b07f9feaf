use jinja_engine::testutils::apply_filter;
use jinja_engine::value::Value;
use jinja_engine::Environment;

#[test]
fn test_default_filter_replaces_undefined() {
    let env = Environment::new();
    let rv = apply_filter(&env, "default", Value::default(), &[Value::from("fallback")]).unwrap();
    assert_eq!(rv, Value::from("fallback"));

    let rv = apply_filter(&env, "default", Value::from("present"), &[Value::from("fallback")]).unwrap();
    assert_eq!(rv, Value::from("present"));
}

#[test]
fn test_default_filter_for_falsy() {
    let env = Environment::new();
    let rv = apply_filter(
        &env,
        "default",
        Value::from(""),
        &[Value::from("fallback"), Value::from(true)],
    )
    .unwrap();
    assert_eq!(rv, Value::from("fallback"));
}

#[test]
fn test_abs() {
    let env = Environment::new();
    assert_eq!(apply_filter(&env, "abs", Value::from(-5), &[]).unwrap(), Value::from(5));
    assert_eq!(
        apply_filter(&env, "abs", Value::from(-1.5), &[]).unwrap(),
        Value::from(1.5)
    );
}

#[test]
fn test_abs_overflow() {
    let env = Environment::new();
    let err = apply_filter(&env, "abs", Value::from(i64::MIN), &[]).unwrap_err();
    assert_eq!(err.to_string(), "runtime error: overflow on abs");
}

#[test]
fn test_join() {
    let env = Environment::new();
    let seq = Value::from(vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    let rv = apply_filter(&env, "join", seq, &[Value::from(", ")]).unwrap();
    assert_eq!(rv, Value::from("a, b, c"));
}

#[test]
fn test_title_and_capitalize() {
    let env = Environment::new();
    assert_eq!(
        apply_filter(&env, "title", Value::from("hello world"), &[]).unwrap(),
        Value::from("Hello World")
    );
    assert_eq!(
        apply_filter(&env, "capitalize", Value::from("hello world"), &[]).unwrap(),
        Value::from("Hello world")
    );
}

#[test]
fn test_filters_through_template() {
    let env = Environment::new();
    assert_eq!(
        env.render_str("{{ ['b', 'a', 'c']|sort|join(',') }}", ()).unwrap(),
        "a,b,c"
    );
    assert_eq!(env.render_str("{{ 'hello'|upper }}", ()).unwrap(), "HELLO");
}
