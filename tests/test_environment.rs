use std::collections::BTreeMap;

use jinja_engine::value::Value;
use jinja_engine::Environment;

#[test]
fn test_basic() {
    let env = Environment::new();
    env.add_template("test", "{% for x in seq %}[{{ x }}]{% endfor %}")
        .unwrap();
    let mut ctx = BTreeMap::new();
    ctx.insert("seq", Value::from((0..3).collect::<Vec<_>>()));
    assert_eq!(env.render("test", ctx).unwrap(), "[0][1][2]");
}

#[test]
fn test_globals() {
    let env = Environment::new();
    env.add_global("a", Value::from(42));
    env.add_template("test", "{{ a }}").unwrap();
    assert_eq!(env.render("test", ()).unwrap(), "42");

    env.remove_global("a");
    let err = env.render("test", ()).unwrap_err();
    assert_eq!(err.kind(), jinja_engine::ErrorKind::UndefinedError);
}

#[test]
fn test_template_removal() {
    let env = Environment::new();
    env.add_template("test", "{{ a }}").unwrap();
    env.remove_template("test");
    assert!(env.get_template("test").is_err());
}

#[test]
fn test_clear_templates() {
    let env = Environment::new();
    env.add_template("a", "1").unwrap();
    env.add_template("b", "2").unwrap();
    env.clear_templates();
    assert!(env.get_template("a").is_err());
    assert!(env.get_template("b").is_err());
}

#[test]
fn test_keep_trailing_newlines() {
    let env = Environment::new();
    env.add_template("foo.txt", "blub\r\n").unwrap();
    assert_eq!(env.render_str("blub\r\n", ()).unwrap(), "blub");

    env.set_keep_trailing_newline(true);
    env.add_template("foo_keep.txt", "blub\r\n").unwrap();
    assert_eq!(env.render("foo.txt", ()).unwrap(), "blub");
    assert_eq!(env.render("foo_keep.txt", ()).unwrap(), "blub\r\n");
    assert_eq!(env.render_str("blub\r\n", ()).unwrap(), "blub\r\n");
}

#[test]
fn test_template_replace() {
    let env = Environment::new();
    env.add_template("test", "a").unwrap();
    assert_eq!(env.render("test", ()).unwrap(), "a");
    env.add_template("test", "b").unwrap();
    assert_eq!(env.render("test", ()).unwrap(), "b");
}

#[test]
fn test_multiple_templates_render_independently() {
    let env = Environment::new();
    env.add_template("hello", "Hello {{ name }}!").unwrap();
    env.add_template("goodbye", "Goodbye {{ name }}!").unwrap();

    let mut ctx = BTreeMap::new();
    ctx.insert("name", Value::from("World"));
    assert_eq!(env.render("hello", &ctx).unwrap(), "Hello World!");
    assert_eq!(env.render("goodbye", &ctx).unwrap(), "Goodbye World!");
}
