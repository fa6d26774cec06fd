//! Integration point for an external conformance validator.
//!
//! The collaborator re-checks the whole bundle for full FHIR conformance
//! and, when it succeeds in building one, hands back its typed object model
//! so business rules can run against it.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::{Arc, LazyLock};

use crate::core::FhirVersion;
use crate::error::Result;
use crate::types::{ErrorSource, Finding, Severity, ValidationClass, ValidationError};
use crate::validation::model::TypedBundle;

static ENTRY_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Bundle\.entry\[(\d+)\]\.resource(?:\.(.+))?$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceFinding {
    /// FHIRPath-style location, e.g. `Bundle.entry[2].resource.code`.
    pub path: String,
    pub severity: Severity,
    pub message: String,
}

impl ComplianceFinding {
    pub fn new(path: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            severity,
            message: message.into(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ComplianceReport {
    pub findings: Vec<ComplianceFinding>,
    /// The typed object model, when the collaborator could build one.
    pub model: Option<Arc<dyn TypedBundle>>,
}

#[async_trait]
pub trait ComplianceValidator: Send + Sync + std::fmt::Debug {
    async fn validate(&self, bundle_text: &str, version: FhirVersion) -> Result<ComplianceReport>;
}

/// Maps collaborator findings onto the unified error model. Findings are
/// passed through with their reported severity.
pub fn to_findings(findings: &[ComplianceFinding], input: &JsonValue) -> Vec<Finding> {
    findings
        .iter()
        .map(|finding| {
            let (entry_index, path) = localize(&finding.path, input);
            let error = ValidationError::new(
                ErrorSource::Compliance,
                finding.severity,
                ValidationClass::Contract,
                "COMPLIANCE_ISSUE",
                path,
                finding.message.clone(),
            )
            .with_entry(entry_index)
            .with_detail("reportedPath", finding.path.as_str());
            Finding::new(error)
        })
        .collect()
}

/// Reported when the collaborator fails outright; rules then run on the raw
/// input tree.
pub fn unavailable(input: &JsonValue, reason: &str) -> Finding {
    let root_type = input
        .get("resourceType")
        .and_then(JsonValue::as_str)
        .unwrap_or("Bundle");
    let error = ValidationError::new(
        ErrorSource::Compliance,
        Severity::Warning,
        ValidationClass::Advisory,
        "COMPLIANCE_UNAVAILABLE",
        root_type,
        format!("compliance validation did not run: {reason}"),
    );
    Finding::new(error).at_pointer("")
}

/// `Bundle.entry[i].resource.x` becomes entry `i` with path `Type.x`.
fn localize(path: &str, input: &JsonValue) -> (Option<usize>, String) {
    let Some(captures) = ENTRY_PATH_RE.captures(path) else {
        return (None, path.to_string());
    };
    let Ok(index) = captures[1].parse::<usize>() else {
        return (None, path.to_string());
    };
    let resource_type = input
        .pointer(&format!("/entry/{index}/resource/resourceType"))
        .and_then(JsonValue::as_str)
        .unwrap_or("Resource");
    let localized = match captures.get(2) {
        Some(rest) => format!("{resource_type}.{}", rest.as_str()),
        None => resource_type.to_string(),
    };
    (Some(index), localized)
}
