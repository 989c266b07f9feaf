use std::cmp::Ordering;

use jinja_engine::value::Value;

#[test]
fn test_sort() {
    let mut v = vec![
        Value::from(100i64),
        Value::from(80i64),
        Value::from(30i64),
        Value::from(true),
        Value::from(false),
        Value::from(99i64),
        Value::from(1000f64),
    ];
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    assert_eq!(
        v.iter().map(Value::to_string).collect::<Vec<_>>(),
        vec!["false", "true", "30", "80", "99", "100", "1000.0"]
    );
}

#[test]
fn test_safe_string_roundtrip() {
    let v = Value::from_safe_string("<b>HTML</b>".into());
    assert!(v.is_safe());
    assert_eq!(v.to_string(), "<b>HTML</b>");
}

#[test]
fn test_undefined() {
    let v = Value::default();
    assert!(v.is_undefined());
    assert!(!v.is_true());
    assert_eq!(v.to_string(), "");
}

#[test]
fn test_float_to_string() {
    assert_eq!(Value::from(42.4242f64).to_string(), "42.4242");
    assert_eq!(Value::from(42.0f64).to_string(), "42.0");
}

#[test]
fn test_get_item_by_index() {
    let val = Value::from(vec![Value::from(1), Value::from(2), Value::from(3)]);
    assert_eq!(val.get_item(&Value::from(0)).unwrap(), Value::from(1));
    assert_eq!(val.get_item(&Value::from(4)).unwrap(), Value::Nil);
}

#[test]
fn test_get_item_not_indexable() {
    let err = Value::from("foo").get_item(&Value::from(0)).unwrap_err();
    assert_eq!(err.kind(), jinja_engine::ErrorKind::TypeError);
}
