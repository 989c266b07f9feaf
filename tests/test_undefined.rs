use std::collections::HashMap;

use jinja_engine::{context, Environment, ErrorKind, UndefinedBehavior};

#[test]
fn test_silent_undefined() {
    let env = Environment::new();
    assert_eq!(env.undefined_behavior(), UndefinedBehavior::Silent);

    assert_eq!(env.render_str("<{{ undefined }}>", ()).unwrap(), "<>");
    assert_eq!(env.render_str("{{ undefined is undefined }}", ()).unwrap(), "true");
    assert_eq!(
        env.render_str(
            "{{ x.foo is undefined }}",
            context! { x => HashMap::<String, String>::new() }
        )
        .unwrap(),
        "true"
    );
    assert_eq!(env.render_str("{{ undefined|list }}", ()).unwrap(), "[]");
}

#[test]
fn test_silent_undefined_attribute_access_still_errors() {
    let env = Environment::new();
    let err = env
        .render_str("{{ undefined.missing_attribute }}", ())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);
}

#[test]
fn test_strict_undefined() {
    let env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    assert_eq!(
        env.render_str("<{{ undefined }}>", ()).unwrap_err().kind(),
        ErrorKind::UndefinedError
    );
    assert_eq!(
        env.render_str("{{ undefined.missing_attribute }}", ())
            .unwrap_err()
            .kind(),
        ErrorKind::UndefinedError
    );
    assert_eq!(
        env.render_str("<{% for x in undefined %}...{% endfor %}>", ())
            .unwrap_err()
            .kind(),
        ErrorKind::UndefinedError
    );

    // `is undefined` and `is defined` remain truthiness checks, not a use of
    // the value, so they never error even in strict mode.
    assert_eq!(env.render_str("{{ undefined is undefined }}", ()).unwrap(), "true");
    assert_eq!(
        env.render_str(
            "{{ x.foo is undefined }}",
            context! { x => HashMap::<String, String>::new() }
        )
        .unwrap(),
        "true"
    );
}

#[test]
fn test_debug_undefined_renders_placeholder() {
    let env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Debug);
    assert_eq!(
        env.render_str("<{{ missing }}>", ()).unwrap(),
        "<<<undefined:missing>>>"
    );
}
