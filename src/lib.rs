//! # FHIR Bundle Validator
//!
//! Validation of FHIR JSON bundles against the format's structural grammar,
//! user-authored business rules and terminology/reference integrity,
//! producing one precisely located, severity-classified error report.
//!
//! ## Features
//!
//! - **Grammar without deserialization**: the raw JSON tree is walked against
//!   schema metadata (cardinality, primitive grammar, choice types,
//!   extension and reference shapes, required bindings)
//! - **Business rules**: `Required`, `AllowedValues`, `Pattern`, `CodeSystem`,
//!   `ReferenceExists`, `QuestionAnswer` and more, with array-aware instance
//!   scoping and one finding per offending element
//! - **Exact locations**: every finding carries an index-qualified path and
//!   an RFC 6901 pointer into the literal input
//! - **Deterministic severities**: `Contract` and `Structural` findings are
//!   never downgraded; advisory findings carry an audit trail when they are
//! - **Build-once caches**: schema trees and enum indexes are built lazily,
//!   once per FHIR version, and shared across concurrent validations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fhir_bundle_validator::*;
//!
//! # async fn example() -> Result<()> {
//! let bundle = r#"{
//!     "resourceType": "Bundle",
//!     "type": "collection",
//!     "entry": [{"resource": {"resourceType": "Patient", "gender": "malex"}}]
//! }"#;
//! let rules = r#"[{"kind": "Required", "resourceType": "Patient", "path": "birthDate"}]"#;
//!
//! let pipeline = ValidationPipeline::new();
//! let request = ValidationRequest::new(bundle, "R4").with_rules(rules);
//! let response = pipeline.validate(&request).await?;
//!
//! for error in &response.errors {
//!     println!("{error} ({:?})", error.json_pointer);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod provider;
pub mod terminology;
pub mod types;
pub mod validation;

pub use crate::core::{
    CancellationToken, FhirVersion, GrammarConfig, HintConfig, IntegrityConfig, RecommendedField,
    ValidatorConfig,
};
pub use error::{BundleValidatorError, Result};
pub use provider::{EmbeddedSchemaProvider, SchemaProvider, SchemaRegistry};
pub use terminology::{
    CodeCatalog, EnumBinding, EnumIndex, EnumIndexCache, EnumIndexSource, StaticEnumIndex,
};
pub use types::*;
pub use validation::{
    AdvisoryHintProvider, BasicExpressionEvaluator, ComplianceFinding, ComplianceReport,
    ComplianceValidator, ExpressionEvaluator, FieldValue, ModelElement, ModelResource, RawBundle,
    RecommendedFieldsProvider, TypedBundle, ValidationPipeline,
};
