use jinja_engine::value::Value;
use jinja_engine::{context, Environment};

#[test]
fn test_single_expression() {
    let env = Environment::new();
    let rv = env.render_str("{{ 1 + 2 }}", ()).unwrap();
    assert_eq!(rv, "3");
}

#[test]
fn test_values_scientific_notation() {
    let env = Environment::new();
    let rv = env.render_str("{{ 1e10 }}", ()).unwrap();
    assert_eq!(rv, "10000000000.0");
    let rv = env.render_str("{{ 1.5e3 }}", ()).unwrap();
    assert_eq!(rv, "1500.0");
}

#[test]
fn test_context_macro() {
    let env = Environment::new();
    let ctx = context! { name => "Peter", age => 42 };
    let rv = env.render_str("{{ name }} is {{ age }}", ctx).unwrap();
    assert_eq!(rv, "Peter is 42");
}

#[test]
fn test_auto_escaping_html() {
    let env = Environment::new();
    env.add_template("hello.html", "{{ name }}").unwrap();
    let rv = env.render("hello.html", context! { name => "<script>" }).unwrap();
    assert_eq!(rv, "&lt;script&gt;");
}

#[test]
fn test_auto_escaping_txt_untouched() {
    let env = Environment::new();
    env.add_template("hello.txt", "{{ name }}").unwrap();
    let rv = env.render("hello.txt", context! { name => "<script>" }).unwrap();
    assert_eq!(rv, "<script>");
}

#[test]
fn test_safe_filter_bypasses_escaping() {
    let env = Environment::new();
    env.add_template("hello.html", "{{ name|safe }}").unwrap();
    let rv = env.render("hello.html", context! { name => "<b>ok</b>" }).unwrap();
    assert_eq!(rv, "<b>ok</b>");
}

#[test]
fn test_custom_filter() {
    let env = Environment::new();
    env.add_filter("shout", |_state: &jinja_engine::State, value: Value, _args: &[Value]| {
        Ok(Value::from(format!("{}!", value)))
    });
    let rv = env.render_str("{{ 'hi'|shout }}", ()).unwrap();
    assert_eq!(rv, "hi!");
}

#[test]
fn test_custom_global_function() {
    let env = Environment::new();
    env.add_function("double", |args: &[Value]| {
        let n = args.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(Value::from(n * 2))
    });
    let rv = env.render_str("{{ double(21) }}", ()).unwrap();
    assert_eq!(rv, "42");
}

#[test]
fn test_custom_syntax() {
    let env = Environment::new();
    let syntax = jinja_engine::syntax::SyntaxConfig::builder()
        .block_delimiters("<%", "%>")
        .variable_delimiters("<$", "$>")
        .build()
        .unwrap();
    env.set_syntax(syntax);
    let rv = env.render_str("<% if true %>yes<$ 1 + 1 $><% endif %>", ()).unwrap();
    assert_eq!(rv, "yes2");
}

#[test]
fn test_extends_and_block_override() {
    let env = Environment::new();
    env.add_template(
        "base.html",
        "<title>{% block title %}default{% endblock %}</title>{% block body %}{% endblock %}",
    )
    .unwrap();
    env.add_template(
        "child.html",
        "{% extends 'base.html' %}{% block title %}hi{% endblock %}{% block body %}content{% endblock %}",
    )
    .unwrap();
    let rv = env.render("child.html", ()).unwrap();
    assert_eq!(rv, "<title>hi</title>content");
}

#[test]
fn test_dynamic_extends() {
    let env = Environment::new();
    env.add_template("mobile.html", "mobile: {% block body %}{% endblock %}").unwrap();
    env.add_template("desktop.html", "desktop: {% block body %}{% endblock %}").unwrap();
    env.add_template(
        "child.html",
        "{% extends variant ~ '.html' %}{% block body %}hi{% endblock %}",
    )
    .unwrap();
    let rv = env.render("child.html", context! { variant => "mobile" }).unwrap();
    assert_eq!(rv, "mobile: hi");
    let rv = env.render("child.html", context! { variant => "desktop" }).unwrap();
    assert_eq!(rv, "desktop: hi");
}

#[test]
fn test_super_call_in_block() {
    let env = Environment::new();
    env.add_template("base.html", "{% block body %}base content{% endblock %}").unwrap();
    env.add_template(
        "child.html",
        "{% extends 'base.html' %}{% block body %}{{ super() }}, more{% endblock %}",
    )
    .unwrap();
    let rv = env.render("child.html", ()).unwrap();
    assert_eq!(rv, "base content, more");
}

#[test]
fn test_include() {
    let env = Environment::new();
    env.add_template("partial.html", "included").unwrap();
    env.add_template("outer.html", "before {% include 'partial.html' %} after").unwrap();
    let rv = env.render("outer.html", ()).unwrap();
    assert_eq!(rv, "before included after");
}

#[test]
fn test_import_macro() {
    let env = Environment::new();
    env.add_template("macros.html", "{% macro greet(name) %}hi {{ name }}{% endmacro %}").unwrap();
    env.add_template("page.html", "{% import 'macros.html' as m %}{{ m.greet('Peter') }}").unwrap();
    let rv = env.render("page.html", ()).unwrap();
    assert_eq!(rv, "hi Peter");
}

#[test]
fn test_from_import() {
    let env = Environment::new();
    env.add_template("macros.html", "{% macro greet(name) %}hi {{ name }}{% endmacro %}").unwrap();
    env.add_template("page.html", "{% from 'macros.html' import greet %}{{ greet('Peter') }}").unwrap();
    let rv = env.render("page.html", ()).unwrap();
    assert_eq!(rv, "hi Peter");
}

#[test]
fn test_items_and_dictsort() {
    let env = Environment::new();
    let ctx = context! { data => context! { b => 1, a => 2 } };
    let rv = env.render_str("{% for k, v in data|dictsort %}{{ k }}={{ v }} {% endfor %}", ctx).unwrap();
    assert_eq!(rv, "a=2 b=1 ");
}

#[cfg(feature = "urlencode")]
#[test]
fn test_urlencode_filter() {
    let env = Environment::new();
    let rv = env.render_str("{{ 'a b'|urlencode }}", ()).unwrap();
    assert_eq!(rv, "a%20b");
}

#[cfg(feature = "json")]
#[test]
fn test_tojson_filter() {
    let env = Environment::new();
    let ctx = context! { items => vec![1, 2, 3] };
    let rv = env.render_str("{{ items|tojson }}", ctx).unwrap();
    assert_eq!(rv, "[1,2,3]");
}
