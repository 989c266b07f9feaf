use jinja_engine::testutils::perform_test;
use jinja_engine::value::Value;
use jinja_engine::Environment;

#[test]
fn test_custom_test() {
    fn is_answer(_state: &jinja_engine::State, value: &Value, _args: &[Value]) -> Result<Value, jinja_engine::Error> {
        Ok(Value::from(value.as_i64() == Some(42)))
    }

    let env = Environment::new();
    env.add_test("answer", is_answer);
    assert!(perform_test(&env, "answer", &Value::from(42), &[]).unwrap());
    assert!(!perform_test(&env, "answer", &Value::from(1), &[]).unwrap());
}

#[test]
fn test_builtin_even_odd() {
    let env = Environment::new();
    assert!(perform_test(&env, "even", &Value::from(4), &[]).unwrap());
    assert!(!perform_test(&env, "even", &Value::from(3), &[]).unwrap());
    assert!(perform_test(&env, "odd", &Value::from(3), &[]).unwrap());
}

#[test]
fn test_builtin_defined() {
    let env = Environment::new();
    assert!(!perform_test(&env, "defined", &Value::default(), &[]).unwrap());
    assert!(perform_test(&env, "defined", &Value::from(1), &[]).unwrap());
}

#[test]
fn test_through_template() {
    let env = Environment::new();
    assert_eq!(
        env.render_str("{% if 4 is even %}yes{% else %}no{% endif %}", ())
            .unwrap(),
        "yes"
    );
}
