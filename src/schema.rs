//! Schema Mapper and Tool Converter (§4.1): converts A2UI tool schemas to
//! the vendor tool-schema shape, validates tool-call arguments, and
//! synthesizes system-prompt instructions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// An A2UI tool schema as described in §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2uiToolSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(rename = "requiredFields", default, skip_serializing_if = "Option::is_none")]
    pub required_fields: Option<Vec<String>>,
}

/// The vendor's tool-schema shape: `{ name, description, input_schema }`,
/// the form consumed by the LLM's tool-use API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A single validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub code: String,
}

/// The result of `validate_tool_input`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn ok() -> Self {
        ValidationResult {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn failing(errors: Vec<ValidationError>) -> Self {
        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// An internally inconsistent schema (e.g. non-object root) failed
/// conversion. Carries the offending tool name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("tool conversion failed for '{tool_name}': {reason}")]
pub struct ToolConversionException {
    pub tool_name: String,
    pub reason: String,
}

/// Convert a sequence of A2uiToolSchema into the vendor tool-schema shape.
/// Pure, deterministic, preserves input order.
pub fn to_vendor_tools(
    schemas: &[A2uiToolSchema],
) -> std::result::Result<Vec<VendorTool>, ToolConversionException> {
    schemas
        .iter()
        .map(|schema| {
            let mut converted = convert_schema(&schema.input_schema, &schema.name)?;
            // "Render a <name> widget" is a tool-level fallback description
            // (§4.1); nested property/items/anyOf schemas never get it, only
            // the schema root the caller passed in.
            if let Some(obj) = converted.as_object_mut() {
                if !obj.contains_key("description") {
                    obj.insert(
                        "description".to_string(),
                        Value::String(format!("Render a {} widget", schema.name)),
                    );
                }
            }
            Ok(VendorTool {
                name: schema.name.clone(),
                description: schema.description.clone(),
                input_schema: converted,
            })
        })
        .collect()
}

/// Recursively convert one A2UI JSON-Schema-like description to the
/// vendor shape, per the conversion rules in §4.1.
fn convert_schema(
    schema: &Value,
    tool_name: &str,
) -> std::result::Result<Value, ToolConversionException> {
    let obj = schema.as_object().ok_or_else(|| ToolConversionException {
        tool_name: tool_name.to_string(),
        reason: format!("schema root is not an object: {schema}"),
    })?;

    let mut out = Map::new();

    for (key, value) in obj {
        match key.as_str() {
            "properties" => {
                let props = value.as_object().ok_or_else(|| ToolConversionException {
                    tool_name: tool_name.to_string(),
                    reason: "'properties' is not an object".to_string(),
                })?;
                let mut converted_props = Map::new();
                for (prop_name, prop_schema) in props {
                    converted_props.insert(
                        prop_name.clone(),
                        convert_schema(prop_schema, tool_name)?,
                    );
                }
                out.insert("properties".to_string(), Value::Object(converted_props));
            }
            "items" => {
                out.insert("items".to_string(), convert_schema(value, tool_name)?);
            }
            "required" => {
                if let Some(arr) = value.as_array() {
                    if !arr.is_empty() {
                        out.insert("required".to_string(), value.clone());
                    }
                    // empty required list is dropped
                } else {
                    out.insert("required".to_string(), value.clone());
                }
            }
            "anyOf" | "oneOf" => {
                let branches = value.as_array().ok_or_else(|| ToolConversionException {
                    tool_name: tool_name.to_string(),
                    reason: format!("'{key}' is not an array"),
                })?;
                let converted = branches
                    .iter()
                    .map(|b| convert_schema(b, tool_name))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                out.insert(key.clone(), Value::Array(converted));
            }
            // Primitives, unknown keywords, and everything else pass
            // through unchanged.
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(Value::Object(out))
}

/// Emit a human-readable listing: one paragraph per schema with name,
/// description, and required-field summary.
pub fn generate_tool_instructions(schemas: &[A2uiToolSchema]) -> String {
    if schemas.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    for schema in schemas {
        out.push_str(&format!("## {}\n\n{}\n", schema.name, schema.description));
        match &schema.required_fields {
            Some(fields) if !fields.is_empty() => {
                out.push_str(&format!("Required fields: {}\n", fields.join(", ")));
            }
            _ => {}
        }
        out.push('\n');
    }
    out
}

/// Validate candidate tool-call arguments against the declared schemas.
pub fn validate_tool_input(
    tool_name: &str,
    input: &Value,
    schemas: &[A2uiToolSchema],
) -> ValidationResult {
    let Some(schema) = schemas.iter().find(|s| s.name == tool_name) else {
        return ValidationResult::failing(vec![ValidationError {
            field: String::new(),
            message: format!("unknown tool '{tool_name}'"),
            code: "unknown_tool".to_string(),
        }]);
    };

    let Some(required) = &schema.required_fields else {
        return ValidationResult::ok();
    };

    let input_obj = input.as_object();
    let mut errors = Vec::new();
    for field in required {
        let present = input_obj.is_some_and(|o| o.contains_key(field));
        if !present {
            errors.push(ValidationError {
                field: field.clone(),
                message: format!("missing required field '{field}'"),
                code: "required".to_string(),
            });
        }
    }

    ValidationResult::failing(errors)
}

/// Returns `Result` rather than panicking on inconsistent schemas;
/// thin wrapper so callers can use `?` against the crate's `Error` type.
pub fn to_vendor_tools_checked(schemas: &[A2uiToolSchema]) -> Result<Vec<VendorTool>> {
    to_vendor_tools(schemas).map_err(|e| Error::config(e.to_string()))
}
