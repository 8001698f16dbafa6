// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! JSON-Schema-ish → typed parameter schema conversion (§4.2 ToolAdapter).
//!
//! MCP tool servers advertise parameters as a JSON Schema subset. This
//! module converts that wire shape into [`ParamSchema`], resolving `$ref`
//! against a `$defs`/`definitions` map and reducing `anyOf` to a union of
//! its branches. `oneOf`, `allOf`, and anything else unrecognized become
//! [`ParamSchema::Unknown`] rather than failing conversion — a tool whose
//! schema we can't fully type should still be callable.

use std::collections::BTreeMap;

use serde_json::Value;

/// A typed parameter schema, reduced from a JSON-Schema-shaped `Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSchema {
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<ParamSchema>),
    Object(BTreeMap<String, ParamField>),
    Enum(Vec<Value>),
    Union(Vec<ParamSchema>),
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamField {
    pub schema: ParamSchema,
    pub required: bool,
}

/// Convert one JSON-Schema node into a [`ParamSchema`], resolving `$ref`
/// against `defs` (the schema's own `$defs`/`definitions` object, or an
/// empty object if it has none).
pub fn from_json_schema(node: &Value, defs: &Value) -> ParamSchema {
    if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
        return resolve_ref(reference, defs)
            .map(|resolved| from_json_schema(resolved, defs))
            .unwrap_or(ParamSchema::Unknown);
    }

    if let Some(variants) = node.get("anyOf").and_then(Value::as_array) {
        return ParamSchema::Union(
            variants.iter().map(|v| from_json_schema(v, defs)).collect(),
        );
    }

    if node.get("oneOf").is_some() || node.get("allOf").is_some() {
        return ParamSchema::Unknown;
    }

    if let Some(variants) = node.get("enum").and_then(Value::as_array) {
        return ParamSchema::Enum(variants.clone());
    }

    match node.get("type").and_then(Value::as_str) {
        Some("string") => ParamSchema::String,
        Some("number") => ParamSchema::Number,
        Some("integer") => ParamSchema::Integer,
        Some("boolean") => ParamSchema::Boolean,
        Some("array") => {
            let item_schema = node
                .get("items")
                .map(|items| from_json_schema(items, defs))
                .unwrap_or(ParamSchema::Unknown);
            ParamSchema::Array(Box::new(item_schema))
        }
        Some("object") => ParamSchema::Object(object_fields(node, defs)),
        _ => ParamSchema::Unknown,
    }
}

fn object_fields(node: &Value, defs: &Value) -> BTreeMap<String, ParamField> {
    let required: Vec<&str> = node
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    node.get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop_schema)| {
                    (
                        name.clone(),
                        ParamField {
                            schema: from_json_schema(prop_schema, defs),
                            required: required.contains(&name.as_str()),
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Resolve a local `#/$defs/Name` or `#/definitions/Name` pointer against
/// the schema's own defs object. Any other ref shape (external, absolute
/// URL) is left unresolved.
fn resolve_ref<'a>(reference: &str, defs: &'a Value) -> Option<&'a Value> {
    let name = reference
        .strip_prefix("#/$defs/")
        .or_else(|| reference.strip_prefix("#/definitions/"))?;
    defs.get(name)
}
