// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Template-variable substitution for stage prompts (§4.1 `substituteVariables`).
//!
//! Prompts reference prior stage outputs and skill inputs with `{name}`
//! placeholders. Values are looked up in a flat context map and stringified:
//! strings pass through unchanged, arrays are joined with `", "`, and
//! everything else falls back to its JSON representation.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::errors::SkillGraphError;

fn placeholder_re() -> Regex {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex is valid")
}

/// Render `template`, replacing every `{name}` placeholder with its
/// stringified value from `context`. A placeholder with no entry in
/// `context` is an error — callers are expected to have pre-validated
/// that every reference resolves to a declared input or an earlier stage.
pub fn substitute_variables(
    template: &str,
    context: &HashMap<String, Value>,
) -> Result<String, SkillGraphError> {
    let re = placeholder_re();
    let mut result = String::with_capacity(template.len());
    let mut last_end = 0;

    for caps in re.captures_iter(template) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];
        let value = context
            .get(name)
            .ok_or_else(|| SkillGraphError::MissingRequiredInput { name: name.into() })?;

        result.push_str(&template[last_end..whole.start()]);
        result.push_str(&stringify(value));
        last_end = whole.end();
    }
    result.push_str(&template[last_end..]);
    Ok(result)
}

/// Every `{name}` placeholder referenced by a template, in first-occurrence
/// order, for dependency/reference validation ahead of substitution.
pub fn referenced_names(template: &str) -> Vec<String> {
    let re = placeholder_re();
    let mut seen = Vec::new();
    for caps in re.captures_iter(template) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(stringify)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn substitutes_string_value() {
        let context = ctx(&[("ticker", json!("NVDA"))]);
        let out = substitute_variables("Gather data on {ticker}", &context).unwrap();
        assert_eq!(out, "Gather data on NVDA");
    }

    #[test]
    fn substitutes_multiple_placeholders() {
        let context = ctx(&[("a", json!("1")), ("b", json!("2"))]);
        let out = substitute_variables("{a}-{b}-{a}", &context).unwrap();
        assert_eq!(out, "1-2-1");
    }

    #[test]
    fn joins_array_values_with_comma_space() {
        let context = ctx(&[("tags", json!(["alpha", "beta", "gamma"]))]);
        let out = substitute_variables("Tags: {tags}", &context).unwrap();
        assert_eq!(out, "Tags: alpha, beta, gamma");
    }

    #[test]
    fn stringifies_number_and_bool() {
        let context = ctx(&[("n", json!(42)), ("flag", json!(true))]);
        let out = substitute_variables("{n}/{flag}", &context).unwrap();
        assert_eq!(out, "42/true");
    }

    #[test]
    fn missing_variable_errors() {
        let context = ctx(&[]);
        let err = substitute_variables("{ghost}", &context).unwrap_err();
        assert!(matches!(err, SkillGraphError::MissingRequiredInput { .. }));
    }

    #[test]
    fn referenced_names_dedupes_in_order() {
        let names = referenced_names("{b} then {a} then {b} again");
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn plain_text_without_placeholders_passes_through() {
        let context = ctx(&[]);
        let out = substitute_variables("no placeholders here", &context).unwrap();
        assert_eq!(out, "no placeholders here");
    }
}
