pub mod cancellation;
pub mod config;

pub use cancellation::CancellationToken;
pub use config::{
    FhirVersion, GrammarConfig, HintConfig, IntegrityConfig, RecommendedField, ValidatorConfig,
};
