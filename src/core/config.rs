use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{BundleValidatorError, Result};
use crate::types::Severity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FhirVersion {
    #[serde(rename = "R4", alias = "4.0.1")]
    R4,
    #[serde(rename = "R5", alias = "5.0.0")]
    R5,
}

impl std::fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FhirVersion::R4 => write!(f, "R4"),
            FhirVersion::R5 => write!(f, "R5"),
        }
    }
}

impl FromStr for FhirVersion {
    type Err = BundleValidatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "R4" | "r4" | "4.0.1" | "4.0" => Ok(FhirVersion::R4),
            "R5" | "r5" | "5.0.0" | "5.0" => Ok(FhirVersion::R5),
            other => Err(BundleValidatorError::unsupported_version(other)),
        }
    }
}

impl FhirVersion {
    /// Get all supported FHIR versions
    pub fn all() -> &'static [FhirVersion] {
        &[FhirVersion::R4, FhirVersion::R5]
    }
}

/// Top-level validator configuration.
///
/// Every section has a `Default`, so a config file only needs to name the
/// settings it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatorConfig {
    pub grammar: GrammarConfig,
    pub integrity: IntegrityConfig,
    pub hints: HintConfig,
    /// Cap applied to the final, ordered error list.
    pub max_errors: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GrammarConfig {
    pub report_unknown_elements: bool,
    /// Line breaks in `string` fields are reported as warnings when set.
    pub flag_string_line_breaks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntegrityConfig {
    pub terminology: bool,
    pub references: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HintConfig {
    pub recommended_fields: Vec<RecommendedField>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedField {
    pub resource_type: String,
    pub path: String,
    #[serde(default = "RecommendedField::default_severity")]
    pub severity: Severity,
}

impl RecommendedField {
    pub fn new<S: Into<String>>(resource_type: S, path: S) -> Self {
        Self {
            resource_type: resource_type.into(),
            path: path.into(),
            severity: Self::default_severity(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    fn default_severity() -> Severity {
        Severity::Warning
    }
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            report_unknown_elements: true,
            flag_string_line_breaks: true,
        }
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            terminology: true,
            references: true,
        }
    }
}

impl ValidatorConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| BundleValidatorError::configuration(format!("invalid config: {e}")))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn with_grammar_config(mut self, grammar: GrammarConfig) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn with_integrity_config(mut self, integrity: IntegrityConfig) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn with_recommended_field(mut self, field: RecommendedField) -> Self {
        self.hints.recommended_fields.push(field);
        self
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = Some(max_errors);
        self
    }
}
