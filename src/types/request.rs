use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::BundleValidatorError;

/// `standard` runs grammar, compliance, rules and integrity checks; `full`
/// additionally runs the advisory-hint passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    Standard,
    Full,
}

impl FromStr for ValidationMode {
    type Err = BundleValidatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(ValidationMode::Standard),
            "full" => Ok(ValidationMode::Full),
            other => Err(BundleValidatorError::configuration(format!(
                "unknown validation mode '{other}'"
            ))),
        }
    }
}

/// Everything one validation call needs, supplied as text.
///
/// The request is immutable once built; the pipeline only ever borrows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    bundle: String,
    #[serde(default)]
    rules: String,
    #[serde(default)]
    catalog: String,
    version: String,
    #[serde(default)]
    mode: ValidationMode,
}

impl ValidationRequest {
    pub fn new(bundle: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            rules: String::new(),
            catalog: String::new(),
            version: version.into(),
            mode: ValidationMode::Standard,
        }
    }

    pub fn with_rules(mut self, rules: impl Into<String>) -> Self {
        self.rules = rules.into();
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = catalog.into();
        self
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn rules(&self) -> &str {
        &self.rules
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }
}
