//! The unified error model shared by every validation layer.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Layer that produced a finding. Declaration order is the output order used
/// by the report builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSource {
    Structure,
    Compliance,
    Rule,
    Terminology,
    Reference,
    Advisory,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::Structure => "Structure",
            ErrorSource::Compliance => "Compliance",
            ErrorSource::Rule => "Rule",
            ErrorSource::Terminology => "Terminology",
            ErrorSource::Reference => "Reference",
            ErrorSource::Advisory => "Advisory",
        }
    }
}

impl std::fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    #[serde(alias = "information")]
    Info,
}

impl Severity {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" | "fatal" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "info" | "information" => Some(Severity::Info),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How strongly a finding is tied to the format contract. Only `Advisory`
/// findings are ever eligible for a severity downgrade.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ValidationClass {
    Contract,
    Structural,
    #[default]
    Advisory,
}

/// One precisely located, severity-classified finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub source: ErrorSource,
    pub severity: Severity,
    pub validation_class: ValidationClass,
    pub error_code: String,
    /// Index into `Bundle.entry` when the finding concerns an entry resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_index: Option<usize>,
    /// Resource-relative, index-qualified path such as `Patient.identifier[1].system`.
    pub path: String,
    pub json_pointer: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configured_severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downgrade_reason: Option<String>,
}

impl ValidationError {
    pub fn new(
        source: ErrorSource,
        severity: Severity,
        validation_class: ValidationClass,
        error_code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            severity,
            validation_class,
            error_code: error_code.into(),
            entry_index: None,
            path: path.into(),
            json_pointer: None,
            message: message.into(),
            details: BTreeMap::new(),
            configured_severity: None,
            downgrade_reason: None,
        }
    }

    /// A grammar finding: always `Structure`/`Structural`.
    pub fn structural(
        severity: Severity,
        error_code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorSource::Structure,
            severity,
            ValidationClass::Structural,
            error_code,
            path,
            message,
        )
    }

    pub fn with_entry(mut self, entry_index: Option<usize>) -> Self {
        self.entry_index = entry_index;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {} at {}: {}",
            self.severity, self.source, self.error_code, self.path, self.message
        )
    }
}

/// A finding as emitted by one layer, before the report builder resolves
/// its pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub error: ValidationError,
    /// Index-qualified pointer computed while the layer had direct access to
    /// the element. Trusted as-is by the report builder.
    pub pointer: Option<String>,
}

impl Finding {
    pub fn new(error: ValidationError) -> Self {
        Self {
            error,
            pointer: None,
        }
    }

    pub fn at_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }
}

impl From<ValidationError> for Finding {
    fn from(error: ValidationError) -> Self {
        Finding::new(error)
    }
}

/// Aggregate counts over a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCounts {
    pub total: usize,
    pub by_source: BTreeMap<ErrorSource, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

impl ValidationCounts {
    pub fn from_errors(errors: &[ValidationError]) -> Self {
        let mut counts = Self {
            total: errors.len(),
            ..Default::default()
        };
        for error in errors {
            *counts.by_source.entry(error.source).or_default() += 1;
            *counts.by_severity.entry(error.severity).or_default() += 1;
        }
        counts
    }

    pub fn severity(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn source(&self, source: ErrorSource) -> usize {
        self.by_source.get(&source).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub errors: Vec<ValidationError>,
    pub counts: ValidationCounts,
    /// Set when `maxErrors` cut the list short.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl ValidationResponse {
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        let counts = ValidationCounts::from_errors(&errors);
        Self {
            errors,
            counts,
            truncated: false,
        }
    }

    /// No finding of `error` severity.
    pub fn is_valid(&self) -> bool {
        self.counts.severity(Severity::Error) == 0
    }

    pub fn errors_with_code<'a>(
        &'a self,
        code: &'a str,
    ) -> impl Iterator<Item = &'a ValidationError> + 'a {
        self.errors.iter().filter(move |e| e.error_code == code)
    }
}
