//! Structural grammar validation over the raw JSON tree.
//!
//! The walker never deserializes into a resource model. It follows the
//! input object by object, looking up each key in the schema tree, and
//! reports every violation it meets with a pointer built from the keys and
//! indices it actually walked through. All findings are `Structure` /
//! `Structural`.

pub mod composite;
pub mod primitive;

use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::{CancellationToken, GrammarConfig};
use crate::error::Result;
use crate::provider::SchemaProvider;
use crate::terminology::EnumIndex;
use crate::types::{Finding, Severity, SchemaNode, ValidationError, is_primitive_type};
use crate::validation::pointer;
use crate::validation::severity::severity_for_binding;

use primitive::{TextPolicy, check_primitive};

pub struct GrammarValidator<'a> {
    provider: &'a dyn SchemaProvider,
    enums: &'a EnumIndex,
    config: &'a GrammarConfig,
    cancel: &'a CancellationToken,
    resource_types: HashSet<String>,
}

impl<'a> GrammarValidator<'a> {
    pub fn new(
        provider: &'a dyn SchemaProvider,
        enums: &'a EnumIndex,
        config: &'a GrammarConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            provider,
            enums,
            config,
            cancel,
            resource_types: provider.resource_types().into_iter().collect(),
        }
    }

    fn is_resource_type(&self, name: &str) -> bool {
        self.resource_types.contains(name)
    }

    /// Validates a root resource (a `Bundle` or any single resource).
    pub fn validate(&self, root: &JsonValue) -> Result<Vec<Finding>> {
        let mut walk = Walk {
            validator: self,
            findings: Vec::new(),
        };
        walk.resource(root, &Cursor::default(), None, true)?;
        tracing::debug!("Grammar validation produced {} findings", walk.findings.len());
        Ok(walk.findings)
    }
}

/// The resource a finding belongs to.
struct Frame {
    entry_index: Option<usize>,
    resource_type: String,
    /// Only the root bundle's entries become `entryIndex` scopes.
    bundle_root: bool,
}

#[derive(Debug, Clone, Default)]
struct Cursor {
    pointer: String,
    /// Index-qualified display path, `Patient.identifier[1].system`.
    path: String,
    /// Resource-relative path without indices; the enum index key.
    element_path: String,
    /// Set below `Bundle.entry[i]` of the root bundle.
    entry_slot: Option<usize>,
}

impl Cursor {
    fn field(&self, key: &str, element_name: &str) -> Cursor {
        Cursor {
            pointer: pointer::push_field(&self.pointer, key),
            path: join(&self.path, key),
            element_path: join(&self.element_path, element_name),
            entry_slot: self.entry_slot,
        }
    }

    fn index(&self, index: usize) -> Cursor {
        Cursor {
            pointer: pointer::push_index(&self.pointer, index),
            path: format!("{}[{index}]", self.path),
            element_path: self.element_path.clone(),
            entry_slot: self.entry_slot,
        }
    }

    /// Same location, reported under a child's path.
    fn naming(&self, name: &str) -> Cursor {
        Cursor {
            path: join(&self.path, name),
            ..self.clone()
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

struct Walk<'v, 'a> {
    validator: &'v GrammarValidator<'a>,
    findings: Vec<Finding>,
}

impl Walk<'_, '_> {
    fn push(
        &mut self,
        frame: Option<&Frame>,
        at: &Cursor,
        severity: Severity,
        code: &str,
        message: String,
    ) -> &mut ValidationError {
        let error = ValidationError::structural(severity, code, at.path.clone(), message)
            .with_entry(frame.and_then(|f| f.entry_index));
        self.findings
            .push(Finding::new(error).at_pointer(at.pointer.clone()));
        let last = self.findings.len() - 1;
        &mut self.findings[last].error
    }

    fn resource(
        &mut self,
        value: &JsonValue,
        at: &Cursor,
        outer: Option<&Frame>,
        is_root: bool,
    ) -> Result<()> {
        self.validator.cancel.check()?;
        let provider = self.validator.provider;

        let Some(obj) = value.as_object() else {
            self.push(
                outer,
                at,
                Severity::Error,
                "EXPECTED_OBJECT",
                "A resource must be a JSON object".to_string(),
            );
            return Ok(());
        };
        let Some(resource_type) = obj.get("resourceType").and_then(JsonValue::as_str) else {
            self.push(
                outer,
                at,
                Severity::Error,
                "MISSING_RESOURCE_TYPE",
                "Resource has no 'resourceType'".to_string(),
            );
            return Ok(());
        };

        let entry_index = match at.entry_slot {
            Some(slot) if outer.is_some_and(|f| f.bundle_root) => Some(slot),
            _ => outer.and_then(|f| f.entry_index),
        };
        let frame = Frame {
            entry_index,
            resource_type: resource_type.to_string(),
            bundle_root: is_root && resource_type == "Bundle",
        };
        // Entry and root resources are addressed by type; contained ones by
        // their position in the container.
        let starts_path = is_root || entry_index != outer.and_then(|f| f.entry_index);
        let cursor = Cursor {
            pointer: at.pointer.clone(),
            path: if starts_path {
                resource_type.to_string()
            } else {
                at.path.clone()
            },
            element_path: String::new(),
            entry_slot: None,
        };

        let definition = provider
            .definition(resource_type)
            .filter(|_| self.validator.is_resource_type(resource_type));
        let Some(definition) = definition else {
            self.push(
                Some(&frame),
                &cursor,
                Severity::Info,
                "RESOURCE_SCHEMA_UNAVAILABLE",
                format!("No schema is available for resource type '{resource_type}'"),
            )
            .details
            .insert("resourceType".into(), resource_type.into());
            return Ok(());
        };

        self.object(obj, &definition, &cursor, &frame, true)
    }

    fn object(
        &mut self,
        obj: &Map<String, JsonValue>,
        node: &SchemaNode,
        at: &Cursor,
        frame: &Frame,
        is_resource: bool,
    ) -> Result<()> {
        let provider = self.validator.provider;
        let children = provider.all_children(node);
        let by_name: HashMap<&str, &Arc<SchemaNode>> =
            children.iter().map(|c| (c.name.as_str(), c)).collect();
        let mut choice_hits: Vec<(String, Vec<String>)> = Vec::new();

        for (key, value) in obj {
            self.validator.cancel.check()?;
            if is_resource && key == "resourceType" {
                continue;
            }

            if let Some(base) = key.strip_prefix('_') {
                self.primitive_extension(key, base, value, node, &by_name, at, frame)?;
                continue;
            }

            let nulls_allowed = obj.contains_key(&format!("_{key}"));
            if let Some(child) = by_name.get(key.as_str()) {
                let cursor = at.field(key, &child.name);
                self.element(value, child, &child.type_name, &cursor, frame, nulls_allowed)?;
                continue;
            }

            if let Some((choice, type_code)) = provider.choice_child_of(node, key) {
                match choice_hits.iter_mut().find(|(name, _)| *name == choice.name) {
                    Some((_, keys)) => keys.push(key.clone()),
                    None => choice_hits.push((choice.name.clone(), vec![key.clone()])),
                }
                let cursor = at.field(key, &choice.name);
                if !choice.choices.contains(&type_code) {
                    self.push(
                        Some(frame),
                        &cursor,
                        Severity::Error,
                        "CHOICE_INVALID_TYPE",
                        format!("'{type_code}' is not an allowed type for {}", choice.name),
                    )
                    .details
                    .insert("allowedTypes".into(), choice.choices.clone().into());
                    continue;
                }
                self.element(value, &choice, &type_code, &cursor, frame, nulls_allowed)?;
                continue;
            }

            if self.validator.config.report_unknown_elements {
                self.push(
                    Some(frame),
                    &at.field(key, key),
                    Severity::Error,
                    "UNKNOWN_ELEMENT",
                    format!("'{key}' is not a known element of {}", node.type_name),
                );
            }
        }

        for (choice_name, keys) in &choice_hits {
            for key in keys.iter().skip(1) {
                self.push(
                    Some(frame),
                    &at.field(key, choice_name),
                    Severity::Error,
                    "CHOICE_MULTIPLE_VALUES",
                    format!(
                        "Only one variant of {choice_name} may be present, found {}",
                        keys.join(", ")
                    ),
                )
                .details
                .insert("variants".into(), keys.clone().into());
            }
        }

        for child in children.iter().filter(|c| c.cardinality.is_required()) {
            // Reported by the extension shape check.
            if child.path == "Extension.url" {
                continue;
            }
            let present = if child.is_choice() {
                choice_hits.iter().any(|(name, _)| *name == child.name)
            } else {
                obj.contains_key(&child.name) || obj.contains_key(&format!("_{}", child.name))
            };
            if !present {
                self.push(
                    Some(frame),
                    &at.naming(&child.name),
                    Severity::Error,
                    "CARDINALITY_MIN",
                    format!(
                        "{} requires at least {} occurrence(s) of '{}'",
                        at.path, child.cardinality.min, child.name
                    ),
                )
                .details
                .insert("cardinality".into(), child.cardinality.to_string().into());
            }
        }
        Ok(())
    }

    fn element(
        &mut self,
        value: &JsonValue,
        node: &SchemaNode,
        type_code: &str,
        at: &Cursor,
        frame: &Frame,
        nulls_allowed: bool,
    ) -> Result<()> {
        let repeating = node.cardinality.is_repeating();
        let JsonValue::Array(items) = value else {
            if repeating {
                self.push(
                    Some(frame),
                    at,
                    Severity::Error,
                    "EXPECTED_ARRAY",
                    format!(
                        "'{}' repeats ({}) and must be a JSON array",
                        node.name, node.cardinality
                    ),
                );
            }
            return self.value(value, node, type_code, at, frame);
        };

        if !repeating {
            self.push(
                Some(frame),
                at,
                Severity::Error,
                "UNEXPECTED_ARRAY",
                format!(
                    "'{}' does not repeat ({}) and must not be an array",
                    node.name, node.cardinality
                ),
            );
            return Ok(());
        }
        if items.is_empty() {
            self.push(
                Some(frame),
                at,
                Severity::Error,
                "EMPTY_VALUE",
                format!("'{}' must not be an empty array", node.name),
            );
            return Ok(());
        }
        if let Some(max) = node.cardinality.max
            && items.len() > max as usize
        {
            self.push(
                Some(frame),
                at,
                Severity::Error,
                "CARDINALITY_MAX",
                format!(
                    "'{}' allows at most {max} occurrence(s), found {}",
                    node.name,
                    items.len()
                ),
            )
            .details
            .insert("cardinality".into(), node.cardinality.to_string().into());
        }

        let starts_entries = frame.bundle_root && node.path == "Bundle.entry";
        for (index, item) in items.iter().enumerate() {
            self.validator.cancel.check()?;
            if item.is_null() && nulls_allowed {
                continue;
            }
            let mut cursor = at.index(index);
            if starts_entries {
                cursor.entry_slot = Some(index);
            }
            self.value(item, node, type_code, &cursor, frame)?;
        }
        Ok(())
    }

    fn value(
        &mut self,
        value: &JsonValue,
        node: &SchemaNode,
        type_code: &str,
        at: &Cursor,
        frame: &Frame,
    ) -> Result<()> {
        let provider = self.validator.provider;

        if value.is_null() {
            self.push(
                Some(frame),
                at,
                Severity::Error,
                "NULL_VALUE",
                format!("'{}' must not be null", node.name),
            );
            return Ok(());
        }

        if type_code == "Resource" || self.validator.is_resource_type(type_code) {
            return self.resource(value, at, Some(frame), false);
        }

        if is_primitive_type(type_code) {
            self.primitive(value, node, type_code, at, frame);
            return Ok(());
        }

        let Some(obj) = value.as_object() else {
            self.push(
                Some(frame),
                at,
                Severity::Error,
                "EXPECTED_OBJECT",
                format!("'{}' is of type {type_code} and must be a JSON object", node.name),
            );
            return Ok(());
        };
        if obj.is_empty() {
            self.push(
                Some(frame),
                at,
                Severity::Error,
                "EMPTY_VALUE",
                format!("'{}' must not be an empty object", node.name),
            );
            return Ok(());
        }

        let shape_issues = match type_code {
            "Extension" => composite::check_extension(obj),
            "Reference" => composite::check_reference(obj),
            _ => Vec::new(),
        };
        for issue in shape_issues {
            let cursor = match &issue.field {
                Some(field) => at.field(field, field),
                None => at.clone(),
            };
            self.push(Some(frame), &cursor, Severity::Error, issue.code, issue.message);
        }

        if type_code == node.type_name {
            return self.object(obj, node, at, frame, false);
        }
        match provider.definition(type_code) {
            Some(schema) => self.object(obj, &schema, at, frame, false),
            None => {
                tracing::debug!("No definition for datatype {} at {}", type_code, at.path);
                Ok(())
            }
        }
    }

    fn primitive(
        &mut self,
        value: &JsonValue,
        node: &SchemaNode,
        type_code: &str,
        at: &Cursor,
        frame: &Frame,
    ) {
        let policy = TextPolicy {
            long_text: node.long_text,
            flag_line_breaks: self.validator.config.flag_string_line_breaks,
        };
        let issues = check_primitive(type_code, value, policy);
        let lexically_valid = issues.iter().all(|i| i.severity != Severity::Error);
        for issue in issues {
            self.push(Some(frame), at, issue.severity, issue.code, issue.message);
        }

        if type_code != "code" || !lexically_valid {
            return;
        }
        let Some(code) = value.as_str() else {
            return;
        };
        let enums = self.validator.enums;
        let Some(binding) = enums.lookup(&frame.resource_type, &at.element_path) else {
            return;
        };
        if binding.allows(code) {
            return;
        }

        let error = self.push(
            Some(frame),
            at,
            severity_for_binding(binding.strength),
            "INVALID_ENUM_VALUE",
            format!(
                "Value '{code}' is not allowed for {} ({} binding: {})",
                at.path,
                binding.strength.as_str(),
                binding.allowed.join(", ")
            ),
        );
        error.details.insert("value".into(), code.into());
        error
            .details
            .insert("allowedValues".into(), binding.allowed.clone().into());
        error
            .details
            .insert("bindingStrength".into(), binding.strength.as_str().into());
        if let Some(value_set) = &binding.value_set {
            error.details.insert("valueSet".into(), value_set.clone().into());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn primitive_extension(
        &mut self,
        key: &str,
        base: &str,
        value: &JsonValue,
        node: &SchemaNode,
        by_name: &HashMap<&str, &Arc<SchemaNode>>,
        at: &Cursor,
        frame: &Frame,
    ) -> Result<()> {
        let provider = self.validator.provider;
        let target = match by_name.get(base) {
            Some(child) => Some(((*child).clone(), child.type_name.clone())),
            None => provider.choice_child_of(node, base),
        };
        let cursor = at.field(key, key);

        let Some((target, type_code)) = target.filter(|(_, t)| is_primitive_type(t)) else {
            if self.validator.config.report_unknown_elements {
                self.push(
                    Some(frame),
                    &cursor,
                    Severity::Error,
                    "UNKNOWN_ELEMENT",
                    format!("'{key}' does not extend a primitive element of {}", node.type_name),
                );
            }
            return Ok(());
        };
        tracing::trace!("Primitive extension {} for {} ({})", key, target.name, type_code);

        let Some(shell) = provider.definition("Element") else {
            return Ok(());
        };
        match value {
            JsonValue::Array(items) if target.cardinality.is_repeating() => {
                for (index, item) in items.iter().enumerate() {
                    self.validator.cancel.check()?;
                    if !item.is_null() {
                        self.element_shell(item, &shell, &cursor.index(index), frame)?;
                    }
                }
                Ok(())
            }
            JsonValue::Array(_) => {
                self.push(
                    Some(frame),
                    &cursor,
                    Severity::Error,
                    "UNEXPECTED_ARRAY",
                    format!("'{key}' does not repeat and must not be an array"),
                );
                Ok(())
            }
            other => self.element_shell(other, &shell, &cursor, frame),
        }
    }

    /// `id` and `extension` only.
    fn element_shell(
        &mut self,
        value: &JsonValue,
        shell: &SchemaNode,
        at: &Cursor,
        frame: &Frame,
    ) -> Result<()> {
        match value {
            JsonValue::Object(obj) if obj.is_empty() => {
                self.push(
                    Some(frame),
                    at,
                    Severity::Error,
                    "EMPTY_VALUE",
                    "Primitive extension must not be an empty object".to_string(),
                );
                Ok(())
            }
            JsonValue::Object(obj) => self.object(obj, shell, at, frame, false),
            JsonValue::Null => {
                self.push(
                    Some(frame),
                    at,
                    Severity::Error,
                    "NULL_VALUE",
                    "Primitive extension must not be null".to_string(),
                );
                Ok(())
            }
            _ => {
                self.push(
                    Some(frame),
                    at,
                    Severity::Error,
                    "EXPECTED_OBJECT",
                    "Primitive extension must be a JSON object".to_string(),
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FhirVersion;
    use crate::provider::EmbeddedSchemaProvider;
    use crate::types::{ErrorSource, ValidationClass};
    use serde_json::json;

    fn run(input: &JsonValue) -> Vec<Finding> {
        run_with(input, &GrammarConfig::default())
    }

    fn run_with(input: &JsonValue, config: &GrammarConfig) -> Vec<Finding> {
        let provider = EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap();
        let enums = EnumIndex::build(&provider);
        let cancel = CancellationToken::new();
        GrammarValidator::new(&provider, &enums, config, &cancel)
            .validate(input)
            .unwrap()
    }

    fn codes(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.error.error_code.as_str()).collect()
    }

    fn bundle_of(resource: JsonValue) -> JsonValue {
        json!({"resourceType": "Bundle", "type": "collection", "entry": [{"resource": resource}]})
    }

    #[test]
    fn test_valid_patient_has_no_findings() {
        let input = bundle_of(json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"lastUpdated": "2024-01-01T00:00:00Z"},
            "identifier": [{"system": "http://example.org/mrn", "value": "123"}],
            "name": [{"family": "Doe", "given": ["Jane"]}],
            "gender": "female",
            "birthDate": "1980-02-29",
            "deceasedBoolean": false,
            "telecom": [{"system": "phone", "value": "555"}]
        }));
        let findings = run(&input);
        assert!(findings.is_empty(), "{:?}", codes(&findings));
    }

    #[test]
    fn test_invalid_enum_in_entry() {
        let input = bundle_of(json!({"resourceType": "Patient", "gender": "malex"}));
        let findings = run(&input);

        assert_eq!(codes(&findings), ["INVALID_ENUM_VALUE"]);
        let finding = &findings[0];
        assert_eq!(finding.error.path, "Patient.gender");
        assert_eq!(finding.error.entry_index, Some(0));
        assert_eq!(finding.error.severity, Severity::Error);
        assert_eq!(finding.error.source, ErrorSource::Structure);
        assert_eq!(finding.error.validation_class, ValidationClass::Structural);
        assert_eq!(finding.pointer.as_deref(), Some("/entry/0/resource/gender"));
        assert_eq!(input.pointer("/entry/0/resource/gender"), Some(&json!("malex")));
    }

    #[test]
    fn test_nested_enum_paths() {
        let input = bundle_of(json!({
            "resourceType": "Patient",
            "telecom": [{"system": "phone"}, {"system": "pigeon"}],
            "contact": [{"gender": "robot"}]
        }));
        let findings = run(&input);
        let paths: Vec<&str> = findings.iter().map(|f| f.error.path.as_str()).collect();
        assert_eq!(paths, ["Patient.telecom[1].system", "Patient.contact[0].gender"]);
        assert_eq!(
            findings[0].pointer.as_deref(),
            Some("/entry/0/resource/telecom/1/system")
        );
    }

    #[test]
    fn test_shape_and_cardinality() {
        let input = json!({
            "resourceType": "Observation",
            "status": ["final"],
            "identifier": {"value": "x"},
            "performer": [],
            "shoeSize": 42
        });
        let findings = run(&input);
        let codes = codes(&findings);
        assert!(codes.contains(&"UNEXPECTED_ARRAY"));
        assert!(codes.contains(&"EXPECTED_ARRAY"));
        assert!(codes.contains(&"EMPTY_VALUE"));
        assert!(codes.contains(&"UNKNOWN_ELEMENT"));
        // `code` is 1..1 and absent; the pointer is the resource itself.
        let missing = findings
            .iter()
            .find(|f| f.error.error_code == "CARDINALITY_MIN")
            .unwrap();
        assert_eq!(missing.error.path, "Observation.code");
        assert_eq!(missing.pointer.as_deref(), Some(""));
        assert_eq!(missing.error.entry_index, None);
    }

    #[test]
    fn test_unknown_elements_can_be_ignored() {
        let config = GrammarConfig {
            report_unknown_elements: false,
            ..GrammarConfig::default()
        };
        let input = json!({"resourceType": "Patient", "shoeSize": 42});
        assert!(run_with(&input, &config).is_empty());
    }

    #[test]
    fn test_choice_rules() {
        let input = json!({
            "resourceType": "Observation",
            "status": "final",
            "code": {"text": "x"},
            "valueString": "a",
            "valueQuantity": {"value": 1},
            "effectiveAge": {"value": 3}
        });
        let findings = run(&input);
        let codes = codes(&findings);
        assert_eq!(codes, ["CHOICE_INVALID_TYPE", "CHOICE_MULTIPLE_VALUES"]);
        assert_eq!(findings[1].pointer.as_deref(), Some("/valueQuantity"));
    }

    #[test]
    fn test_extension_and_primitive_extension() {
        let input = json!({
            "resourceType": "Patient",
            "extension": [
                {"url": "http://example.org/a", "valueString": "ok"},
                {"valueString": "no url"},
                {"url": "http://example.org/c", "valueCode": "x", "extension": [{"url": "d", "valueBoolean": true}]}
            ],
            "birthDate": "1970-01-01",
            "_birthDate": {"extension": [{"url": "http://example.org/time", "valueTime": "10:00:00"}]},
            "_gender": {"colour": "blue"}
        });
        let findings = run(&input);
        let pairs: Vec<(&str, &str)> = findings
            .iter()
            .map(|f| (f.error.error_code.as_str(), f.pointer.as_deref().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            [
                ("EXTENSION_URL_MISSING", "/extension/1"),
                ("EXTENSION_VALUE_CONFLICT", "/extension/2/valueCode"),
                ("UNKNOWN_ELEMENT", "/_gender/colour"),
            ]
        );
    }

    #[test]
    fn test_primitive_grammar_in_context() {
        let input = json!({
            "resourceType": "Patient",
            "id": "bad id",
            "birthDate": "1980-02-30",
            "name": [{"family": "Doe\nSmith"}],
            "managingOrganization": {"reference": "not a ref"},
            "active": null
        });
        let findings = run(&input);
        let mut pairs: Vec<(&str, Severity)> = findings
            .iter()
            .map(|f| (f.error.error_code.as_str(), f.error.severity))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            [
                ("INVALID_DATE_TIME", Severity::Error),
                ("INVALID_ID", Severity::Error),
                ("INVALID_LINE_BREAK", Severity::Warning),
                ("INVALID_REFERENCE_FORMAT", Severity::Error),
                ("NULL_VALUE", Severity::Error),
            ]
        );
    }

    #[test]
    fn test_contained_resources_use_container_path() {
        let input = bundle_of(json!({
            "resourceType": "Patient",
            "contained": [{"resourceType": "Practitioner", "id": "dr", "gender": "droid"}]
        }));
        let findings = run(&input);
        assert_eq!(codes(&findings), ["INVALID_ENUM_VALUE"]);
        assert_eq!(findings[0].error.path, "Patient.contained[0].gender");
        assert_eq!(findings[0].error.entry_index, Some(0));
        assert_eq!(
            findings[0].pointer.as_deref(),
            Some("/entry/0/resource/contained/0/gender")
        );
    }

    #[test]
    fn test_unknown_and_missing_resource_types() {
        let input = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "Spaceship", "id": "x"}},
                {"resource": {"id": "y"}}
            ]
        });
        let findings = run(&input);
        assert_eq!(codes(&findings), ["RESOURCE_SCHEMA_UNAVAILABLE", "MISSING_RESOURCE_TYPE"]);
        assert_eq!(findings[0].error.severity, Severity::Info);
        assert_eq!(findings[0].error.entry_index, Some(0));
        assert_eq!(findings[1].error.path, "Bundle.entry[1].resource");
        assert_eq!(findings[1].error.entry_index, None);
    }

    #[test]
    fn test_all_violations_reported_in_one_pass() {
        let input = json!({
            "resourceType": "Patient",
            "gender": "x",
            "birthDate": "never",
            "telecom": [{"system": "a"}, {"system": "b"}, {"system": "phone"}]
        });
        let findings = run(&input);
        assert_eq!(findings.len(), 4);
    }

    #[test]
    fn test_cancellation_aborts_walk() {
        let provider = EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap();
        let enums = EnumIndex::build(&provider);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = GrammarConfig::default();
        let result = GrammarValidator::new(&provider, &enums, &config, &cancel)
            .validate(&json!({"resourceType": "Patient"}));
        assert!(result.unwrap_err().is_cancelled());
    }

    #[derive(Debug)]
    struct CountingProvider {
        inner: EmbeddedSchemaProvider,
        listings: std::sync::atomic::AtomicUsize,
    }

    impl SchemaProvider for CountingProvider {
        fn version(&self) -> FhirVersion {
            self.inner.version()
        }

        fn definition(&self, type_name: &str) -> Option<Arc<SchemaNode>> {
            self.inner.definition(type_name)
        }

        fn resource_types(&self) -> Vec<String> {
            self.listings.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.resource_types()
        }
    }

    #[test]
    fn test_resource_types_listed_once_per_validator() {
        let provider = CountingProvider {
            inner: EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap(),
            listings: Default::default(),
        };
        let enums = EnumIndex::new();
        let cancel = CancellationToken::new();
        let config = GrammarConfig::default();
        let validator = GrammarValidator::new(&provider, &enums, &config, &cancel);

        let input = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "Patient", "contained": [{"resourceType": "Organization"}]}},
                {"resource": {"resourceType": "Observation", "status": "final", "code": {"text": "x"}}}
            ]
        });
        validator.validate(&input).unwrap();
        validator.validate(&input).unwrap();
        assert_eq!(provider.listings.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
