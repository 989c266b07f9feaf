use jinja_engine::value::Value;
use jinja_engine::{context, Environment};

#[test]
fn test_context_merge() {
    let one = context! { a => 1 };
    let two = context! { b => 2, a => 42 };
    assert_eq!(one.get_attr("a").unwrap(), Value::from(1));
    assert_eq!(two.get_attr("b").unwrap(), Value::from(2));
}

#[test]
fn test_macro_basic() {
    let env = Environment::new();
    let rv = env
        .render_str("{% macro m(a) %}{{ a }}{% endmacro %}{{ m(42) }}", ())
        .unwrap();
    assert_eq!(rv, "42");
}

#[test]
fn test_macro_default_argument() {
    let env = Environment::new();
    let rv = env
        .render_str(
            "{% set a = 42 %}{% macro m1(var) -%}{{ var }}{%- endmacro %}\
             {% macro m2(x=a) -%}{{ m1(x) }}{%- endmacro %}{{ m2() }}",
            (),
        )
        .unwrap();
    assert_eq!(rv, "42");
}

#[test]
fn test_macro_keyword_argument_by_name() {
    let env = Environment::new();
    let rv = env
        .render_str(
            "{% macro g(n, greet='Hi') %}{{ greet }} {{ n }}{% endmacro %}{{ g('Ada', greet='Yo') }}",
            (),
        )
        .unwrap();
    assert_eq!(rv, "Yo Ada");
}

#[test]
fn test_macro_all_keyword_arguments_out_of_order() {
    let env = Environment::new();
    let rv = env
        .render_str(
            "{% macro g(n, greet='Hi') %}{{ greet }} {{ n }}{% endmacro %}{{ g(greet='Yo', n='Ada') }}",
            (),
        )
        .unwrap();
    assert_eq!(rv, "Yo Ada");
}

#[test]
fn test_call_block() {
    let env = Environment::new();
    let rv = env
        .render_str(
            "{% set a = 42 %}{% set b = 23 %}\
             {% macro m1(var) -%}{{ caller(var) }}{%- endmacro %}\
             {% macro m2(x=a) -%}{% call(var) m1(x) %}{{ var }}|{{ b }}{% endcall %}{%- endmacro %}\
             {{ m2() }}",
            (),
        )
        .unwrap();
    assert_eq!(rv, "42|23");
}

#[test]
fn test_call_block_closes_over_its_call_site() {
    // The call block's body runs with whatever was in scope where `{% call %}`
    // appears, not the macro it calls into -- globals, the initial render
    // context, and any locals set before the call are all visible.
    let env = Environment::new();
    env.add_global("ctx_global", "ctx global");
    let rv = env
        .render_str(
            "{%- set template_local = 'template local' %}\
             {%- macro wrapper() %}{{ caller() }}{% endmacro %}\
             {%- call wrapper() %}\
                {{- ctx_global }}|\
                {{- render_global }}|\
                {{- template_local }}\
             {%- endcall -%}",
            context! { render_global => "render global" },
        )
        .unwrap();
    assert_eq!(rv, "ctx global|render global|template local");
}

#[test]
fn test_import_macro_from_other_template() {
    let env = Environment::new();
    env.add_template("x.html", "{% macro meh() %}hi{% endmacro %}").unwrap();
    let rv = env
        .render_str("{%- from 'x.html' import meh %}{{- meh() }}", ())
        .unwrap();
    assert_eq!(rv, "hi");
}
