//! Integration tests for the A2UI content-generator adapter
//!
//! These tests verify that different modules work together correctly:
//! schema conversion feeding tool validation, config builders producing
//! a usable `Config`, and the message model round-tripping through the
//! public API surface.

use a2ui_adapter::{
    generate_tool_instructions, to_vendor_tools, validate_tool_input, A2uiMessage,
    A2uiToolSchema, BaseConfig, Config, PathExpr,
};
use serde_json::json;

fn begin_rendering_schema() -> A2uiToolSchema {
    A2uiToolSchema {
        name: "begin_rendering".to_string(),
        description: "Start a new A2UI surface".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "surfaceId": {"type": "string"},
                "root": {"type": "string"}
            },
            "required": ["surfaceId"]
        }),
        required_fields: Some(vec!["surfaceId".to_string()]),
    }
}

#[test]
fn schema_conversion_feeds_validation_end_to_end() {
    let schemas = vec![begin_rendering_schema()];

    let vendor = to_vendor_tools(&schemas).expect("schema is well-formed");
    assert_eq!(vendor.len(), 1);
    assert_eq!(vendor[0].name, "begin_rendering");

    let instructions = generate_tool_instructions(&schemas);
    assert!(instructions.contains("begin_rendering"));
    assert!(instructions.contains("Required fields: surfaceId"));

    let ok = validate_tool_input("begin_rendering", &json!({"surfaceId": "main"}), &schemas);
    assert!(ok.is_valid);

    let missing = validate_tool_input("begin_rendering", &json!({}), &schemas);
    assert!(!missing.is_valid);
    assert_eq!(missing.errors[0].code, "required");
}

#[test]
fn config_builder_produces_a_usable_config() {
    let config = Config::builder()
        .with_base(
            BaseConfig::builder()
                .with_base_url("https://api.example.com")
                .with_model("claude-x")
                .with_max_tokens(2048),
        )
        .build()
        .expect("valid configuration");

    assert_eq!(config.base.model, "claude-x");
    assert_eq!(config.base.max_tokens, 2048);
    // Presets not overridden still come through with their documented
    // defaults, wired through the same builder path.
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
}

#[test]
fn path_expr_resolves_the_target_of_a_widget_binding() {
    // The kind of path a `dataBinding: "form.items[0].name"` shorthand
    // resolves to, as consumed by the binding engine.
    let path = PathExpr::from_dot_notation("form.items[0].name");
    assert_eq!(path.leaf(), Some("name"));
    assert_eq!(path.to_slash_notation(), "form/items/0/name");

    let parent = path.parent().unwrap();
    assert_eq!(parent.to_dot_notation(), "form.items[0]");
}

#[test]
fn a2ui_message_serializes_and_round_trips_through_json() {
    let message = A2uiMessage::DataModelUpdate {
        updates: [("count".to_string(), json!(3))].into_iter().collect(),
        scope: "global".to_string(),
    };
    let encoded = serde_json::to_value(&message).unwrap();
    let decoded: A2uiMessage = serde_json::from_value(encoded).unwrap();
    assert_eq!(message, decoded);
}
