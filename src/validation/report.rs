//! The unified error model builder.
//!
//! Collects findings from every stage, attaches JSON pointers, removes
//! duplicates and produces the ordered response.
//!
//! Pointer precedence: a pointer computed by the emitting layer is trusted
//! as long as it resolves in the literal input. Only findings without one
//! are located from their path, falling back to the nearest existing
//! ancestor; if not even the resource can be found the pointer stays null.
//!
//! Duplicates are findings with the same entry, path, error code and
//! origin. The origin is the rule id for rule findings and the message for
//! compliance findings, so distinct rules and distinct collaborator facts on
//! one field are all reported. Among duplicates the finding from the
//! highest-ranked source wins, ranks following [`ErrorSource`] order:
//! structure, compliance, rule, terminology, reference, advisory. Equal
//! ranks keep the more severe finding.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

type DedupKey = (Option<usize>, String, String, Option<String>);

use crate::types::{ErrorSource, Finding, ValidationError, ValidationResponse};
use crate::validation::pointer::{locate, resolves, resource_base};
use crate::validation::severity;

#[derive(Debug)]
pub struct ReportBuilder<'i> {
    input: &'i JsonValue,
    max_errors: Option<usize>,
    findings: Vec<Finding>,
}

impl<'i> ReportBuilder<'i> {
    pub fn new(input: &'i JsonValue) -> Self {
        Self {
            input,
            max_errors: None,
            findings: Vec::new(),
        }
    }

    pub fn with_max_errors(mut self, max_errors: Option<usize>) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.findings.extend(findings);
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn build(mut self) -> ValidationResponse {
        let findings = std::mem::take(&mut self.findings);
        let received = findings.len();
        let mut kept: Vec<ValidationError> = Vec::with_capacity(received);
        let mut seen: HashMap<DedupKey, usize> = HashMap::new();

        for finding in findings {
            let error = self.finalize(finding);
            let key = dedup_key(&error);
            match seen.get(&key) {
                Some(&position) => {
                    let current = &kept[position];
                    if (error.source, error.severity) < (current.source, current.severity) {
                        kept[position] = error;
                    }
                }
                None => {
                    seen.insert(key, kept.len());
                    kept.push(error);
                }
            }
        }

        // Stable: emission order is preserved within an entry and source.
        kept.sort_by_key(|e| (e.entry_index, e.source));

        let mut truncated = false;
        if let Some(limit) = self.max_errors
            && kept.len() > limit
        {
            kept.truncate(limit);
            truncated = true;
        }

        tracing::debug!(
            received,
            reported = kept.len(),
            truncated,
            "validation report built"
        );
        let mut response = ValidationResponse::from_errors(kept);
        response.truncated = truncated;
        response
    }

    fn finalize(&self, finding: Finding) -> ValidationError {
        let Finding { mut error, pointer } = finding;

        if error.source == ErrorSource::Advisory {
            severity::apply(&mut error, false, true);
        }

        error.json_pointer = match pointer {
            Some(pointer) if resolves(self.input, &pointer) => Some(pointer),
            Some(pointer) => {
                tracing::warn!(
                    code = %error.error_code,
                    path = %error.path,
                    pointer = %pointer,
                    "precomputed pointer does not resolve in the input, dropping it"
                );
                None
            }
            None => self.locate_path(error.entry_index, &error.path),
        };
        error
    }

    /// Generic path resolution: `Type.a[1].b` below the entry's resource.
    fn locate_path(&self, entry_index: Option<usize>, path: &str) -> Option<String> {
        let base = resource_base(entry_index);
        let resource = self.input.pointer(&base)?;
        let (resource_type, relative) = path.split_once('.').unwrap_or((path, ""));
        if resource.get("resourceType").and_then(JsonValue::as_str) != Some(resource_type) {
            return None;
        }
        locate(self.input, &base, relative)
    }
}

fn dedup_key(error: &ValidationError) -> DedupKey {
    let origin = match error.source {
        ErrorSource::Rule => error
            .details
            .get("ruleId")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        ErrorSource::Compliance => Some(error.message.clone()),
        _ => None,
    };
    (
        error.entry_index,
        error.path.clone(),
        error.error_code.clone(),
        origin,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Severity, ValidationClass};
    use serde_json::json;

    fn input() -> JsonValue {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {
                "resourceType": "Observation",
                "status": "final",
                "performer": [{"reference": "Practitioner/1"}]
            }}]
        })
    }

    fn rule_error(code: &str, path: &str) -> ValidationError {
        ValidationError::new(
            ErrorSource::Rule,
            Severity::Error,
            ValidationClass::Advisory,
            code,
            path,
            "violation",
        )
        .with_entry(Some(0))
    }

    #[test]
    fn test_precomputed_pointer_is_trusted() {
        let input = input();
        let mut builder = ReportBuilder::new(&input);
        builder.extend([Finding::new(rule_error("A", "Observation.status"))
            .at_pointer("/entry/0/resource/performer/0/reference")]);
        let response = builder.build();
        assert_eq!(
            response.errors[0].json_pointer.as_deref(),
            Some("/entry/0/resource/performer/0/reference")
        );
    }

    #[test]
    fn test_unresolvable_precomputed_pointer_becomes_null() {
        let input = input();
        let mut builder = ReportBuilder::new(&input);
        builder.extend([
            Finding::new(rule_error("A", "Observation.status")).at_pointer("/entry/7/resource"),
        ]);
        assert_eq!(builder.build().errors[0].json_pointer, None);
    }

    #[test]
    fn test_fallback_walks_up_to_nearest_ancestor() {
        let input = input();
        let mut builder = ReportBuilder::new(&input);
        builder.extend([
            Finding::new(rule_error("A", "Observation.status")),
            Finding::new(rule_error("B", "Observation.performer[0].display")),
            Finding::new(rule_error("C", "Observation.note.text")),
            Finding::new(rule_error("D", "Patient.name")),
            Finding::new(rule_error("E", "Observation.status").with_entry(Some(4))),
        ]);
        let pointers: Vec<Option<String>> = builder
            .build()
            .errors
            .into_iter()
            .map(|e| e.json_pointer)
            .collect();
        assert_eq!(
            pointers,
            [
                Some("/entry/0/resource/status".to_string()),
                Some("/entry/0/resource/performer/0".to_string()),
                Some("/entry/0/resource".to_string()),
                None,
                None,
            ]
        );
    }

    #[test]
    fn test_dedup_prefers_higher_ranked_source() {
        let input = input();
        let mut builder = ReportBuilder::new(&input);
        let hint = ValidationError::new(
            ErrorSource::Advisory,
            Severity::Warning,
            ValidationClass::Advisory,
            "REQUIRED_FIELD_MISSING",
            "Observation.subject",
            "hint",
        )
        .with_entry(Some(0));
        builder.extend([
            Finding::new(hint),
            Finding::new(rule_error("REQUIRED_FIELD_MISSING", "Observation.subject")),
            Finding::new(rule_error("REQUIRED_FIELD_MISSING", "Observation.subject")),
        ]);
        let response = builder.build();
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].source, ErrorSource::Rule);
        assert_eq!(response.errors[0].severity, Severity::Error);
    }

    #[test]
    fn test_distinct_rules_on_one_field_are_all_kept() {
        let input = input();
        let mut builder = ReportBuilder::new(&input);
        let mut hint = rule_error("REQUIRED_FIELD_MISSING", "Observation.subject")
            .with_detail("ruleId", "hint");
        hint.severity = Severity::Warning;
        let contract = ValidationError::new(
            ErrorSource::Rule,
            Severity::Error,
            ValidationClass::Contract,
            "REQUIRED_FIELD_MISSING",
            "Observation.subject",
            "violation",
        )
        .with_entry(Some(0))
        .with_detail("ruleId", "contract");
        builder.extend([Finding::new(hint), Finding::new(contract)]);

        let response = builder.build();
        assert_eq!(response.errors.len(), 2);
        assert_eq!(response.errors[1].validation_class, ValidationClass::Contract);
        assert!(!response.is_valid());
    }

    #[test]
    fn test_same_rule_collision_keeps_more_severe() {
        let input = input();
        let mut builder = ReportBuilder::new(&input);
        let mut weak =
            rule_error("VALUE_NOT_ALLOWED", "Observation.status").with_detail("ruleId", "r1");
        weak.severity = Severity::Warning;
        let strong =
            rule_error("VALUE_NOT_ALLOWED", "Observation.status").with_detail("ruleId", "r1");
        builder.extend([Finding::new(weak), Finding::new(strong)]);

        let response = builder.build();
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].severity, Severity::Error);
    }

    #[test]
    fn test_distinct_compliance_messages_are_kept() {
        let input = input();
        let mut builder = ReportBuilder::new(&input);
        let fact = |message: &str| {
            ValidationError::new(
                ErrorSource::Compliance,
                Severity::Error,
                ValidationClass::Contract,
                "COMPLIANCE_ISSUE",
                "Observation",
                message,
            )
            .with_entry(Some(0))
        };
        builder.extend([
            Finding::new(fact("Profile A violated")),
            Finding::new(fact("Constraint dom-6 failed")),
            Finding::new(fact("Profile A violated")),
        ]);

        let messages: Vec<String> = builder.build().errors.into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["Profile A violated", "Constraint dom-6 failed"]);
    }

    #[test]
    fn test_ordering_and_truncation() {
        let input = input();
        let mut builder = ReportBuilder::new(&input).with_max_errors(Some(2));
        builder.extend([
            Finding::new(rule_error("R1", "Observation.status")),
            Finding::new(ValidationError::structural(Severity::Error, "S1", "Bundle.type", "s")),
            Finding::new(
                ValidationError::structural(Severity::Error, "S2", "Observation.status", "s")
                    .with_entry(Some(0)),
            ),
            Finding::new(rule_error("R2", "Observation.status")),
        ]);
        let response = builder.build();
        let codes: Vec<&str> = response.errors.iter().map(|e| e.error_code.as_str()).collect();
        assert_eq!(codes, ["S1", "S2"]);
        assert!(response.truncated);
        assert_eq!(response.counts.total, 2);
    }

    #[test]
    fn test_advisory_findings_are_resolved_as_advisory_source() {
        let input = input();
        let mut builder = ReportBuilder::new(&input);
        let hint = ValidationError::new(
            ErrorSource::Advisory,
            Severity::Error,
            ValidationClass::Advisory,
            "RECOMMENDED_FIELD_MISSING",
            "Observation.subject",
            "hint",
        )
        .with_entry(Some(0));
        builder.extend([Finding::new(hint)]);
        let error = &builder.build().errors[0];
        assert_eq!(error.severity, Severity::Warning);
        assert_eq!(error.configured_severity, Some(Severity::Error));
        assert_eq!(error.json_pointer.as_deref(), Some("/entry/0/resource"));
    }
}
