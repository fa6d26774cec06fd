pub mod error_model;
pub mod request;
pub mod rule;
pub mod schema;

pub use error_model::{
    ErrorSource, Finding, Severity, ValidationClass, ValidationCounts, ValidationError,
    ValidationResponse,
};
pub use request::{ValidationMode, ValidationRequest};
pub use rule::{InstanceScope, RuleDefinition, RuleKind, parse_rule_set};
pub use schema::{
    BindingStrength, Cardinality, ElementBinding, FHIR_PRIMITIVE_TYPES, SchemaNode,
    is_primitive_type,
};
