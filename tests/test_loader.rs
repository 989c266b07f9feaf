#![cfg(feature = "loader")]

use jinja_engine::Environment;

fn create_env() -> Environment {
    let env = Environment::new();
    env.add_template("hello", "Hello World!").unwrap();
    env
}

#[test]
fn test_basic() {
    let env = create_env();
    assert_eq!(env.render("hello", ()).unwrap(), "Hello World!");
}

#[test]
fn test_dynamic() {
    let env = Environment::new();
    env.add_template("hello2", "Hello World 2!").unwrap();
    env.set_loader(|name| match name {
        "hello" => Ok(Some("Hello World!".into())),
        _ => Ok(None),
    });
    assert_eq!(env.render("hello", ()).unwrap(), "Hello World!");
    assert_eq!(env.render("hello2", ()).unwrap(), "Hello World 2!");
    let err = env.get_template("missing").unwrap_err();
    assert_eq!(err.to_string(), "template error: template \"missing\" not found");
}

#[test]
fn test_source_replace_static() {
    let env = Environment::new();
    env.add_template("a", "1").unwrap();
    env.add_template("a", "2").unwrap();
    assert_eq!(env.render("a", ()).unwrap(), "2");
}

#[test]
fn test_source_replace_dynamic() {
    let env = Environment::new();
    env.add_template("a", "1").unwrap();
    env.add_template("a", "2").unwrap();
    env.set_loader(|_| Ok(None));
    assert_eq!(env.render("a", ()).unwrap(), "2");
}
