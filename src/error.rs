use thiserror::Error;

/// Infrastructure failures of the validator itself.
///
/// Problems found *in* the validated bundle are never reported through this
/// type; they are [`crate::types::ValidationError`] values inside the
/// response.
#[derive(Error, Debug)]
pub enum BundleValidatorError {
    #[error("Unsupported FHIR version: {version}")]
    UnsupportedVersion { version: String },

    #[error("Schema load error for {version}: {message}")]
    SchemaLoad { version: String, message: String },

    #[error("Invalid rule definition: {message}")]
    InvalidRule { message: String },

    #[error("Invalid code catalog: {message}")]
    InvalidCatalog { message: String },

    #[error("Expression evaluation failed for '{expression}': {message}")]
    Expression { expression: String, message: String },

    #[error("Compliance validator failed: {0}")]
    Compliance(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BundleValidatorError>;

impl BundleValidatorError {
    pub fn unsupported_version<S: Into<String>>(version: S) -> Self {
        Self::UnsupportedVersion {
            version: version.into(),
        }
    }

    pub fn schema_load<S: Into<String>>(version: S, message: S) -> Self {
        Self::SchemaLoad {
            version: version.into(),
            message: message.into(),
        }
    }

    pub fn invalid_rule<S: Into<String>>(message: S) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
    }

    pub fn invalid_catalog<S: Into<String>>(message: S) -> Self {
        Self::InvalidCatalog {
            message: message.into(),
        }
    }

    pub fn expression<S: Into<String>>(expression: S, message: S) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn compliance<S: Into<String>>(message: S) -> Self {
        Self::Compliance(message.into())
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
