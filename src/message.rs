//! The A2UI message model (§3) and the tool-call-to-message parser (§4.2).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Maximum widget-tree recursion depth the parser will accept before
/// failing with `MessageParseException` (spec.md §4.2 recommends 256).
pub const MAX_WIDGET_DEPTH: usize = 256;

/// Per-property data-binding configuration: a path plus an explicit mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub path: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "oneWay".to_string()
}

/// The `dataBinding` field of a WidgetNode: either a bare path string
/// (shorthand for a single oneWay binding on property "value"), a map of
/// property name to path string, or a map of property name to full
/// `{path, mode}` configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataBinding {
    Path(String),
    PerProperty(HashMap<String, DataBindingEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataBindingEntry {
    Path(String),
    Spec(BindingSpec),
}

/// Recursive widget tree node, constructed by the parser from tool-call
/// arguments and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetNode {
    #[serde(rename = "type")]
    pub widget_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<WidgetNode>>,
    #[serde(rename = "dataBinding", default, skip_serializing_if = "Option::is_none")]
    pub data_binding: Option<DataBinding>,
}

/// The tagged union of the four A2UI message variants (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum A2uiMessage {
    BeginRendering {
        #[serde(rename = "surfaceId")]
        surface_id: String,
        #[serde(rename = "parentSurfaceId", default, skip_serializing_if = "Option::is_none")]
        parent_surface_id: Option<String>,
        #[serde(default = "default_root")]
        root: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, Value>>,
    },
    SurfaceUpdate {
        #[serde(rename = "surfaceId")]
        surface_id: String,
        widgets: Vec<WidgetNode>,
        #[serde(default)]
        append: bool,
    },
    DataModelUpdate {
        updates: HashMap<String, Value>,
        #[serde(default = "default_scope")]
        scope: String,
    },
    DeleteSurface {
        #[serde(rename = "surfaceId")]
        surface_id: String,
        #[serde(default = "default_cascade")]
        cascade: bool,
    },
}

fn default_root() -> String {
    "root".to_string()
}

fn default_scope() -> String {
    "global".to_string()
}

fn default_cascade() -> bool {
    true
}

/// Parse a single tool-use payload `{ name, input }` into an A2UI message
/// per the dispatch table in §4.2. Returns `Ok(None)` for unrecognized
/// tool names (not an error).
pub fn parse_tool_call(name: &str, input: &Value) -> Result<Option<A2uiMessage>> {
    match name {
        "begin_rendering" => Ok(Some(parse_begin_rendering(input)?)),
        "surface_update" => Ok(Some(parse_surface_update(input)?)),
        "data_model_update" => Ok(Some(parse_data_model_update(input)?)),
        "delete_surface" => Ok(Some(parse_delete_surface(input)?)),
        _ => Ok(None),
    }
}

fn require_object<'a>(input: &'a Value, tool: &str) -> Result<&'a serde_json::Map<String, Value>> {
    input
        .as_object()
        .ok_or_else(|| Error::stream(format!("{tool}: expected object input, got {input}")))
}

fn require_string(obj: &serde_json::Map<String, Value>, field: &str, tool: &str) -> Result<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::stream(format!("{tool}: missing or non-string field '{field}'")))
}

fn parse_begin_rendering(input: &Value) -> Result<A2uiMessage> {
    let obj = require_object(input, "begin_rendering")?;
    let surface_id = require_string(obj, "surfaceId", "begin_rendering")?;
    if surface_id.is_empty() {
        return Err(Error::stream("begin_rendering: surfaceId must be non-empty"));
    }
    let parent_surface_id = obj.get("parentSurfaceId").and_then(Value::as_str).map(String::from);
    let root = obj
        .get("root")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(default_root);
    let metadata = obj.get("metadata").and_then(Value::as_object).map(|m| {
        m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    });

    Ok(A2uiMessage::BeginRendering {
        surface_id,
        parent_surface_id,
        root,
        metadata,
    })
}

fn parse_surface_update(input: &Value) -> Result<A2uiMessage> {
    let obj = require_object(input, "surface_update")?;
    let surface_id = require_string(obj, "surfaceId", "surface_update")?;
    let widgets_value = obj
        .get("widgets")
        .ok_or_else(|| Error::stream("surface_update: missing field 'widgets'"))?;
    let widgets_array = widgets_value
        .as_array()
        .ok_or_else(|| Error::stream("surface_update: 'widgets' must be an array"))?;

    let widgets = widgets_array
        .iter()
        .map(|w| parse_widget_node(w, 0))
        .collect::<Result<Vec<_>>>()?;

    let append = obj.get("append").and_then(Value::as_bool).unwrap_or(false);

    Ok(A2uiMessage::SurfaceUpdate {
        surface_id,
        widgets,
        append,
    })
}

fn parse_widget_node(value: &Value, depth: usize) -> Result<WidgetNode> {
    if depth > MAX_WIDGET_DEPTH {
        return Err(Error::stream(format!(
            "widget tree exceeds max depth {MAX_WIDGET_DEPTH}"
        )));
    }

    let obj = value
        .as_object()
        .ok_or_else(|| Error::stream("widget node must be an object"))?;

    let widget_type = require_string(obj, "type", "widget_node")?;
    let id = obj.get("id").and_then(Value::as_str).map(String::from);

    let properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let children = match obj.get("children") {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|c| parse_widget_node(c, depth + 1))
                .collect::<Result<Vec<_>>>()?,
        ),
        _ => None,
    };

    let data_binding = match obj.get("dataBinding") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            serde_json::from_value::<DataBinding>(v.clone())
                .map_err(|e| Error::stream(format!("invalid dataBinding: {e}")))?,
        ),
    };

    Ok(WidgetNode {
        widget_type,
        id,
        properties,
        children,
        data_binding,
    })
}

fn parse_data_model_update(input: &Value) -> Result<A2uiMessage> {
    let obj = require_object(input, "data_model_update")?;
    let updates_value = obj
        .get("updates")
        .ok_or_else(|| Error::stream("data_model_update: missing field 'updates'"))?;
    let updates_obj = updates_value
        .as_object()
        .ok_or_else(|| Error::stream("data_model_update: 'updates' must be an object"))?;
    let updates = updates_obj
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let scope = obj
        .get("scope")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(default_scope);

    Ok(A2uiMessage::DataModelUpdate { updates, scope })
}

fn parse_delete_surface(input: &Value) -> Result<A2uiMessage> {
    let obj = require_object(input, "delete_surface")?;
    let surface_id = require_string(obj, "surfaceId", "delete_surface")?;
    let cascade = obj.get("cascade").and_then(Value::as_bool).unwrap_or(true);

    Ok(A2uiMessage::DeleteSurface { surface_id, cascade })
}
