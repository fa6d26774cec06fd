//! The validation pipeline and its stages.

pub mod compliance;
pub mod grammar;
pub mod hints;
pub mod integrity;
pub mod model;
pub mod pipeline;
pub mod pointer;
pub mod references;
pub mod report;
pub mod rules;
pub mod severity;

pub use compliance::{ComplianceFinding, ComplianceReport, ComplianceValidator};
pub use grammar::GrammarValidator;
pub use hints::{AdvisoryHintProvider, RecommendedFieldsProvider};
pub use model::{FieldValue, ModelElement, ModelResource, RawBundle, TypedBundle};
pub use pipeline::ValidationPipeline;
pub use report::ReportBuilder;
pub use rules::{BasicExpressionEvaluator, ExpressionEvaluator, RuleEngine};
pub use severity::{SeverityResolution, resolve as resolve_severity};
