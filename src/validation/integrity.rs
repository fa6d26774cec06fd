//! Terminology and reference integrity passes over the raw input.

use serde_json::{Map, Value as JsonValue};

use crate::core::CancellationToken;
use crate::error::Result;
use crate::terminology::CodeCatalog;
use crate::types::{ErrorSource, Finding, Severity, ValidationClass, ValidationError};
use crate::validation::model::{ModelResource, RawBundle, TypedBundle};
use crate::validation::pointer::{push_field, push_index, resource_base};
use crate::validation::references::{BundleIndex, ReferenceKind, contained_resources};

/// Codings whose `system` is a catalog system must use one of its codes.
pub fn check_terminology(
    input: &JsonValue,
    catalog: &CodeCatalog,
    cancel: &CancellationToken,
) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    if catalog.is_empty() {
        return Ok(findings);
    }

    for resource in RawBundle::new(input).resources() {
        let (Some(json), entry) = (resource_json(input, &resource), resource.entry_index) else {
            continue;
        };
        walk(
            json,
            &resource.resource_type,
            &resource_base(entry),
            cancel,
            &mut |object, path, pointer| {
                let (Some(system), Some(code)) = (
                    object.get("system").and_then(JsonValue::as_str),
                    object.get("code").and_then(JsonValue::as_str),
                ) else {
                    return;
                };
                if catalog.contains_code(system, code) == Some(false) {
                    let error = ValidationError::new(
                        ErrorSource::Terminology,
                        Severity::Error,
                        ValidationClass::Structural,
                        "TERMINOLOGY_CODE_UNKNOWN",
                        format!("{path}.code"),
                        format!("code '{code}' is not defined in code system {system}"),
                    )
                    .with_entry(entry)
                    .with_detail("system", system)
                    .with_detail("code", code);
                    findings.push(Finding::new(error).at_pointer(push_field(pointer, "code")));
                }
            },
        )?;
    }

    tracing::debug!(findings = findings.len(), "terminology integrity checked");
    Ok(findings)
}

/// `#local` and `urn:` references must resolve inside the bundle; relative
/// `Type/id` references outside a bundle's entries are reported as advisory.
pub fn check_references(input: &JsonValue, cancel: &CancellationToken) -> Result<Vec<Finding>> {
    let raw = RawBundle::new(input);
    let resources = raw.resources();
    let index = BundleIndex::from_resources(&resources);
    let in_bundle = resources
        .first()
        .is_some_and(|root| root.resource_type == "Bundle");
    let mut findings = Vec::new();

    for resource in &resources {
        let (Some(json), entry) = (resource_json(input, resource), resource.entry_index) else {
            continue;
        };
        let contained_ids: Vec<String> = contained_resources(resource.resource)
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        walk(
            json,
            &resource.resource_type,
            &resource_base(entry),
            cancel,
            &mut |object, path, pointer| {
                let Some(text) = object.get("reference").and_then(JsonValue::as_str) else {
                    return;
                };
                let Some(kind) = ReferenceKind::parse(text) else {
                    // Malformed references are a grammar finding.
                    return;
                };

                let issue = match &kind {
                    ReferenceKind::Local(id) if id.is_empty() || contained_ids.contains(id) => None,
                    ReferenceKind::Local(_) => Some((
                        "REFERENCE_UNRESOLVED",
                        Severity::Error,
                        ValidationClass::Structural,
                        format!("local reference '{text}' does not match a contained resource"),
                    )),
                    ReferenceKind::Urn(_) if index.resolve(&kind).is_none() => Some((
                        "REFERENCE_UNRESOLVED",
                        Severity::Error,
                        ValidationClass::Structural,
                        format!("'{text}' does not match the fullUrl of any bundle entry"),
                    )),
                    ReferenceKind::Relative { .. }
                        if in_bundle && index.resolve(&kind).is_none() =>
                    {
                        Some((
                            "REFERENCE_NOT_IN_BUNDLE",
                            Severity::Warning,
                            ValidationClass::Advisory,
                            format!("'{text}' is not an entry of this bundle"),
                        ))
                    }
                    _ => None,
                };

                if let Some((code, severity, class, message)) = issue {
                    let error = ValidationError::new(
                        ErrorSource::Reference,
                        severity,
                        class,
                        code,
                        format!("{path}.reference"),
                        message,
                    )
                    .with_entry(entry)
                    .with_detail("reference", text);
                    findings.push(Finding::new(error).at_pointer(push_field(pointer, "reference")));
                }
            },
        )?;
    }

    tracing::debug!(findings = findings.len(), "reference integrity checked");
    Ok(findings)
}

/// The JSON of a resource as located in the literal input.
fn resource_json<'i>(input: &'i JsonValue, resource: &ModelResource<'_>) -> Option<&'i JsonValue> {
    match resource.entry_index {
        None => Some(input),
        Some(index) => input.pointer(&format!("/entry/{index}/resource")),
    }
}

/// Visits every object below `value`. A bundle root's `entry` array is
/// skipped; entry resources are walked on their own.
fn walk(
    value: &JsonValue,
    path: &str,
    pointer: &str,
    cancel: &CancellationToken,
    visit: &mut dyn FnMut(&Map<String, JsonValue>, &str, &str),
) -> Result<()> {
    let is_bundle_root = pointer.is_empty()
        && value.get("resourceType").and_then(JsonValue::as_str) == Some("Bundle");
    walk_value(value, path, pointer, is_bundle_root, cancel, visit)
}

fn walk_value(
    value: &JsonValue,
    path: &str,
    pointer: &str,
    skip_entries: bool,
    cancel: &CancellationToken,
    visit: &mut dyn FnMut(&Map<String, JsonValue>, &str, &str),
) -> Result<()> {
    let JsonValue::Object(object) = value else {
        return Ok(());
    };
    cancel.check()?;
    visit(object, path, pointer);

    for (key, child) in object {
        if skip_entries && key == "entry" {
            continue;
        }
        let child_pointer = push_field(pointer, key);
        match child {
            JsonValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    walk_value(
                        item,
                        &format!("{path}.{key}[{i}]"),
                        &push_index(&child_pointer, i),
                        false,
                        cancel,
                        visit,
                    )?;
                }
            }
            JsonValue::Object(_) => {
                walk_value(child, &format!("{path}.{key}"), &child_pointer, false, cancel, visit)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codes(findings: &[Finding]) -> Vec<(&str, Option<&str>)> {
        findings
            .iter()
            .map(|f| (f.error.error_code.as_str(), f.pointer.as_deref()))
            .collect()
    }

    #[test]
    fn test_terminology_pass() {
        let catalog = CodeCatalog::default().with_system("http://loinc.org", &["8867-4"]);
        let input = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {
                "resourceType": "Observation",
                "code": {"coding": [
                    {"system": "http://loinc.org", "code": "8867-4"},
                    {"system": "http://loinc.org", "code": "9999-9"},
                    {"system": "http://snomed.info/sct", "code": "123"}
                ]}
            }}]
        });
        let findings = check_terminology(&input, &catalog, &CancellationToken::new()).unwrap();
        assert_eq!(
            codes(&findings),
            [("TERMINOLOGY_CODE_UNKNOWN", Some("/entry/0/resource/code/coding/1/code"))]
        );
        assert_eq!(findings[0].error.path, "Observation.code.coding[1].code");
        assert_eq!(findings[0].error.entry_index, Some(0));

        let empty =
            check_terminology(&input, &CodeCatalog::default(), &CancellationToken::new()).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_reference_pass() {
        let input = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"fullUrl": "urn:uuid:0c3151bd-1cbf-4d64-b04d-cd9187a4c6e0",
                 "resource": {"resourceType": "Patient", "id": "p1"}},
                {"resource": {
                    "resourceType": "Observation",
                    "contained": [{"resourceType": "Practitioner", "id": "dr"}],
                    "subject": {"reference": "urn:uuid:0c3151bd-1cbf-4d64-b04d-cd9187a4c6e0"},
                    "performer": [
                        {"reference": "#dr"},
                        {"reference": "#nobody"},
                        {"reference": "urn:uuid:9f1c8e55-0000-4000-8000-000000000000"},
                        {"reference": "Practitioner/elsewhere"},
                        {"reference": "https://example.org/fhir/Practitioner/x"}
                    ]
                }}
            ]
        });
        let findings = check_references(&input, &CancellationToken::new()).unwrap();
        assert_eq!(
            codes(&findings),
            [
                ("REFERENCE_UNRESOLVED", Some("/entry/1/resource/performer/1/reference")),
                ("REFERENCE_UNRESOLVED", Some("/entry/1/resource/performer/2/reference")),
                ("REFERENCE_NOT_IN_BUNDLE", Some("/entry/1/resource/performer/3/reference")),
            ]
        );
        assert_eq!(findings[2].error.severity, Severity::Warning);
        assert_eq!(findings[2].error.validation_class, ValidationClass::Advisory);
    }

    #[test]
    fn test_relative_references_outside_bundles_are_not_reported() {
        let input = json!({"resourceType": "Observation", "subject": {"reference": "Patient/1"}});
        assert!(check_references(&input, &CancellationToken::new()).unwrap().is_empty());
    }
}
