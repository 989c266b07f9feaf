use jinja_engine::Environment;

#[test]
fn test_hex_escape_sequences() {
    let env = Environment::new();

    assert_eq!(env.render_str(r#"{{ "\x41\x42\x43" }}"#, ()).unwrap(), "ABC");
    assert_eq!(env.render_str(r#"{{ "\x00" }}"#, ()).unwrap(), "\0");
    assert_eq!(env.render_str(r#"{{ "\x20" }}"#, ()).unwrap(), " ");
    assert_eq!(env.render_str(r#"{{ "\xff" }}"#, ()).unwrap(), "\u{ff}");
    assert_eq!(env.render_str(r#"{{ "\xFF" }}"#, ()).unwrap(), "\u{FF}");
    assert_eq!(
        env.render_str(r#"{{ "Hello\x20\x57\x6f\x72\x6c\x64\x21" }}"#, ())
            .unwrap(),
        "Hello World!"
    );
    assert_eq!(
        env.render_str(r#"{{ "Line1\nLine2\x20\x2d\x20Tab:\t\x41" }}"#, ())
            .unwrap(),
        "Line1\nLine2 - Tab:\tA"
    );
}

#[test]
fn test_hex_escape_errors() {
    let env = Environment::new();

    assert!(env.render_str(r#"{{ "\x" }}"#, ()).is_err());
    assert!(env.render_str(r#"{{ "\x1" }}"#, ()).is_err());
    assert!(env.render_str(r#"{{ "\xGG" }}"#, ()).is_err());
    assert!(env.render_str(r#"{{ "\xZ1" }}"#, ()).is_err());
}

#[test]
fn test_hex_escape_in_expressions() {
    let env = Environment::new();

    assert_eq!(env.render_str(r#"{{ "A" ~ "\x42" ~ "C" }}"#, ()).unwrap(), "ABC");
    assert_eq!(
        env.render_str(r#"{% if "\x41" == "A" %}Match{% endif %}"#, ())
            .unwrap(),
        "Match"
    );
}
