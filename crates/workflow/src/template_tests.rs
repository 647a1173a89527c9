use super::*;
use serde_json::json;

fn context() -> Value {
    json!({
        "steps": {
            "A": { "out": { "ok": true, "count": 3, "name": "alpha" } }
        }
    })
}

#[test]
fn a_whole_string_placeholder_preserves_the_referenced_type() {
    let rendered = render(&json!("${steps.A.out.ok}"), &context());
    assert_eq!(rendered, json!(true));

    let rendered = render(&json!("${steps.A.out.count}"), &context());
    assert_eq!(rendered, json!(3));
}

#[test]
fn an_embedded_placeholder_is_stringified_in_place() {
    let rendered = render(&json!("hello ${steps.A.out.name}!"), &context());
    assert_eq!(rendered, json!("hello alpha!"));
}

#[test]
fn multiple_placeholders_in_one_string_all_resolve() {
    let rendered = render(&json!("${steps.A.out.name}-${steps.A.out.count}"), &context());
    assert_eq!(rendered, json!("alpha-3"));
}

#[test]
fn an_unresolvable_whole_placeholder_renders_as_null() {
    let rendered = render(&json!("${steps.missing.out}"), &context());
    assert_eq!(rendered, Value::Null);
}

#[test]
fn nested_objects_and_arrays_render_every_leaf() {
    let template = json!({ "a": "${steps.A.out.name}", "b": ["${steps.A.out.count}", "literal"] });
    let rendered = render(&template, &context());
    assert_eq!(rendered, json!({ "a": "alpha", "b": [3, "literal"] }));
}

#[test]
fn non_string_non_container_leaves_pass_through_unchanged() {
    let rendered = render(&json!(42), &context());
    assert_eq!(rendered, json!(42));
}
