//! Shape rules for composite types whose validity is more than the sum of
//! their fields.

use serde_json::{Map, Value as JsonValue};

use crate::validation::references::ReferenceKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeIssue {
    pub code: &'static str,
    pub message: String,
    /// Field of the composite the issue points at; the composite itself when
    /// `None`.
    pub field: Option<String>,
}

/// An extension carries a `url` and exactly one of `value[x]` or nested
/// `extension`.
pub fn check_extension(extension: &Map<String, JsonValue>) -> Vec<ShapeIssue> {
    let mut issues = Vec::new();

    if !extension.get("url").is_some_and(JsonValue::is_string) {
        issues.push(ShapeIssue {
            code: "EXTENSION_URL_MISSING",
            message: "Extension must carry a 'url'".to_string(),
            field: None,
        });
    }

    let value_keys: Vec<&String> = extension.keys().filter(|k| is_value_key(k)).collect();
    let has_nested = extension
        .get("extension")
        .and_then(JsonValue::as_array)
        .is_some_and(|nested| !nested.is_empty());

    match (value_keys.first(), has_nested) {
        (Some(key), true) => issues.push(ShapeIssue {
            code: "EXTENSION_VALUE_CONFLICT",
            message: format!("Extension has both '{key}' and nested extensions"),
            field: Some((*key).clone()),
        }),
        (None, false) => issues.push(ShapeIssue {
            code: "EXTENSION_VALUE_MISSING",
            message: "Extension must have either a value[x] or nested extensions".to_string(),
            field: None,
        }),
        _ => {}
    }
    issues
}

/// `valueString`, `valueCodeableConcept`, ...
fn is_value_key(key: &str) -> bool {
    key.strip_prefix("value")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// A reference must say something, and its `reference` string must be a
/// local, URN, relative or absolute reference.
pub fn check_reference(reference: &Map<String, JsonValue>) -> Vec<ShapeIssue> {
    let has_content = ["reference", "identifier", "display", "extension"]
        .iter()
        .any(|key| reference.contains_key(*key));
    if !has_content {
        return vec![ShapeIssue {
            code: "REFERENCE_EMPTY",
            message: "Reference has none of 'reference', 'identifier' or 'display'".to_string(),
            field: None,
        }];
    }

    match reference.get("reference").and_then(JsonValue::as_str) {
        Some(text) if !text.trim().is_empty() && ReferenceKind::parse(text).is_none() => {
            vec![ShapeIssue {
                code: "INVALID_REFERENCE_FORMAT",
                message: format!("'{text}' is not a local, URN, relative or absolute reference"),
                field: Some("reference".to_string()),
            }]
        }
        _ => Vec::new(),
    }
}
