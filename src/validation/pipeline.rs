//! Stage orchestration.
//!
//! Stages run in a fixed order: grammar, compliance, rules, terminology,
//! references and, in `full` mode, advisory hints. Input that cannot be
//! parsed at all (bundle JSON, root without `resourceType`, unknown version,
//! rule set, code catalog) short-circuits to a response with exactly one
//! error. Cancellation is checked between stages and inside the element
//! loops of the grammar and rule stages.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::Instrument;

use crate::core::{CancellationToken, FhirVersion, ValidatorConfig};
use crate::error::Result;
use crate::provider::SchemaRegistry;
use crate::terminology::{CodeCatalog, EnumIndexSource};
use crate::types::{
    ErrorSource, RuleDefinition, Severity, ValidationClass, ValidationError, ValidationMode,
    ValidationRequest, ValidationResponse, parse_rule_set,
};
use crate::validation::compliance::{self, ComplianceValidator};
use crate::validation::grammar::GrammarValidator;
use crate::validation::hints::{AdvisoryHintProvider, RecommendedFieldsProvider};
use crate::validation::integrity;
use crate::validation::model::{RawBundle, TypedBundle};
use crate::validation::report::ReportBuilder;
use crate::validation::rules::{BasicExpressionEvaluator, ExpressionEvaluator, RuleEngine};

/// The validation entry point.
///
/// A pipeline holds no per-call state and can be shared across tasks.
/// Without an explicit registry it uses the process-wide one, so schemas and
/// enum indexes are built once per FHIR version. Enum indexes always come
/// from the same registry as the schemas unless an enum source is given.
///
/// ```no_run
/// # async fn run() -> fhir_bundle_validator::Result<()> {
/// use fhir_bundle_validator::{ValidationPipeline, ValidationRequest};
///
/// let pipeline = ValidationPipeline::new();
/// let request = ValidationRequest::new(r#"{"resourceType": "Patient", "gender": "malex"}"#, "R4");
/// let response = pipeline.validate(&request).await?;
/// assert!(!response.is_valid());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    config: ValidatorConfig,
    registry: Option<Arc<SchemaRegistry>>,
    enum_source: Option<Arc<dyn EnumIndexSource>>,
    compliance: Option<Arc<dyn ComplianceValidator>>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    hint_providers: Vec<Arc<dyn AdvisoryHintProvider>>,
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs that parsed successfully.
struct Prepared {
    input: JsonValue,
    version: FhirVersion,
    rules: Vec<RuleDefinition>,
    catalog: CodeCatalog,
}

impl ValidationPipeline {
    pub fn new() -> Self {
        Self {
            config: ValidatorConfig::default(),
            registry: None,
            enum_source: None,
            compliance: None,
            evaluator: Arc::new(BasicExpressionEvaluator::new()),
            hint_providers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_enum_source(mut self, source: Arc<dyn EnumIndexSource>) -> Self {
        self.enum_source = Some(source);
        self
    }

    pub fn with_compliance_validator(mut self, validator: Arc<dyn ComplianceValidator>) -> Self {
        self.compliance = Some(validator);
        self
    }

    pub fn with_expression_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_hint_provider(mut self, provider: Arc<dyn AdvisoryHintProvider>) -> Self {
        self.hint_providers.push(provider);
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub async fn validate(&self, request: &ValidationRequest) -> Result<ValidationResponse> {
        self.validate_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Validates `request`, returning [`Cancelled`](crate::BundleValidatorError::Cancelled)
    /// if `cancel` fires before the response is assembled.
    pub async fn validate_with_cancellation(
        &self,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationResponse> {
        let span = tracing::info_span!(
            "validate_bundle",
            version = %request.version(),
            mode = ?request.mode(),
            bytes = request.bundle().len()
        );
        self.run(request, cancel).instrument(span).await
    }

    async fn run(
        &self,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationResponse> {
        let prepared = match prepare(request) {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::info!(code = %error.error_code, "input rejected before validation");
                return Ok(ValidationResponse::from_errors(vec![*error]));
            }
        };
        let Prepared {
            input,
            version,
            rules,
            catalog,
        } = prepared;

        let registry: &SchemaRegistry = match &self.registry {
            Some(registry) => registry.as_ref(),
            None => SchemaRegistry::global(),
        };
        let provider = registry.provider(version)?;
        let enums = match &self.enum_source {
            Some(source) => source.index_for(version, provider.as_ref())?,
            None => registry.enum_index(version)?,
        };

        let mut report = ReportBuilder::new(&input).with_max_errors(self.config.max_errors);

        cancel.check()?;
        let grammar = GrammarValidator::new(provider.as_ref(), &enums, &self.config.grammar, cancel)
            .validate(&input)?;
        report.extend(grammar);
        tracing::debug!(findings = report.len(), "grammar stage complete");

        cancel.check()?;
        let model = self.compliance_stage(request, version, &input, &mut report).await?;

        cancel.check()?;
        let raw = RawBundle::new(&input);
        let bundle: &dyn TypedBundle = match &model {
            Some(model) => model.as_ref(),
            None => &raw,
        };
        let engine = RuleEngine::new(&rules, &catalog, self.evaluator.as_ref(), cancel);
        report.extend(engine.evaluate(bundle)?);

        if self.config.integrity.terminology {
            cancel.check()?;
            report.extend(integrity::check_terminology(&input, &catalog, cancel)?);
        }
        if self.config.integrity.references {
            cancel.check()?;
            report.extend(integrity::check_references(&input, cancel)?);
        }

        if request.mode() == ValidationMode::Full {
            let recommended =
                RecommendedFieldsProvider::new(self.config.hints.recommended_fields.clone());
            let mut providers: Vec<&dyn AdvisoryHintProvider> = vec![&recommended];
            providers.extend(
                self.hint_providers
                    .iter()
                    .map(|p| p.as_ref() as &dyn AdvisoryHintProvider),
            );
            for provider in providers {
                cancel.check()?;
                let hints = provider.hints(bundle, cancel)?;
                tracing::debug!(
                    provider = provider.name(),
                    hints = hints.len(),
                    "hint provider ran"
                );
                report.extend(hints);
            }
        }

        cancel.check()?;
        let response = report.build();
        tracing::info!(
            errors = response.counts.total,
            valid = response.is_valid(),
            typed_model = model.is_some(),
            "validation complete"
        );
        Ok(response)
    }

    /// Runs the collaborator, if any. Its failure is reported and rules fall
    /// back to the raw tree.
    async fn compliance_stage(
        &self,
        request: &ValidationRequest,
        version: FhirVersion,
        input: &JsonValue,
        report: &mut ReportBuilder<'_>,
    ) -> Result<Option<Arc<dyn TypedBundle>>> {
        let Some(validator) = &self.compliance else {
            return Ok(None);
        };
        match validator.validate(request.bundle(), version).await {
            Ok(result) => {
                report.extend(compliance::to_findings(&result.findings, input));
                if result.model.is_none() {
                    tracing::debug!("no typed model from compliance validator, using raw tree");
                }
                Ok(result.model)
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "compliance validator failed, using raw tree");
                report.extend([compliance::unavailable(input, &err.to_string())]);
                Ok(None)
            }
        }
    }
}

/// Parses every textual input, or returns the single error that rejects it.
fn prepare(request: &ValidationRequest) -> std::result::Result<Prepared, Box<ValidationError>> {
    let input: JsonValue = serde_json::from_str(request.bundle()).map_err(|e| {
        Box::new(
            rejection(
                ErrorSource::Structure,
                "INVALID_JSON",
                "",
                format!("bundle is not valid JSON: {e}"),
            )
            .with_detail("line", e.line())
            .with_detail("column", e.column()),
        )
    })?;

    let Some(resource_type) = input.get("resourceType").and_then(JsonValue::as_str) else {
        let mut error = rejection(
            ErrorSource::Structure,
            "MISSING_RESOURCE_TYPE",
            "",
            "root element has no 'resourceType'",
        );
        if input.is_object() {
            error.json_pointer = Some(String::new());
        }
        return Err(Box::new(error));
    };
    let resource_type = resource_type.to_string();

    let version: FhirVersion = request.version().parse().map_err(|_| {
        Box::new(
            rejection(
                ErrorSource::Structure,
                "UNSUPPORTED_VERSION",
                resource_type.as_str(),
                format!("unsupported FHIR version '{}'", request.version()),
            )
            .with_detail("version", request.version()),
        )
    })?;

    let rules = parse_rule_set(request.rules()).map_err(|e| {
        Box::new(rejection(
            ErrorSource::Rule,
            "INVALID_RULE_SET",
            resource_type.as_str(),
            e.to_string(),
        ))
    })?;

    let catalog = CodeCatalog::parse(request.catalog()).map_err(|e| {
        Box::new(rejection(
            ErrorSource::Terminology,
            "INVALID_CODE_CATALOG",
            resource_type.as_str(),
            e.to_string(),
        ))
    })?;

    Ok(Prepared {
        input,
        version,
        rules,
        catalog,
    })
}

fn rejection(
    source: ErrorSource,
    code: &str,
    path: &str,
    message: impl Into<String>,
) -> ValidationError {
    ValidationError::new(
        source,
        Severity::Error,
        ValidationClass::Structural,
        code,
        path,
        message,
    )
}
