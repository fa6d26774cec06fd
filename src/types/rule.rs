//! Business rule definitions.
//!
//! Rule sets arrive as JSON text. Each rule is first read into a loose
//! document and then converted into a [`RuleDefinition`] whose [`RuleKind`]
//! carries the kind-specific parameters, so evaluation is an exhaustive match.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{BundleValidatorError, Result};
use crate::types::{Severity, ValidationClass};

/// Which occurrences of a repeating element a rule applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InstanceScope {
    #[default]
    All,
    First,
    Filtered {
        condition: String,
    },
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    Required,
    AllowedValues {
        values: Vec<String>,
    },
    FixedValue {
        value: JsonValue,
    },
    Pattern {
        regex: Regex,
    },
    ArrayLength {
        min: Option<usize>,
        max: Option<usize>,
    },
    CodeSystem {
        system: String,
    },
    ReferenceExists {
        /// Allowed target resource types; empty accepts any.
        target_types: Vec<String>,
    },
    QuestionAnswer {
        link_id: String,
        required: bool,
        allowed_answers: Vec<String>,
        answer_type: Option<String>,
    },
    Custom {
        expression: String,
    },
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Required => "Required",
            RuleKind::AllowedValues { .. } => "AllowedValues",
            RuleKind::FixedValue { .. } => "FixedValue",
            RuleKind::Pattern { .. } => "Pattern",
            RuleKind::ArrayLength { .. } => "ArrayLength",
            RuleKind::CodeSystem { .. } => "CodeSystem",
            RuleKind::ReferenceExists { .. } => "ReferenceExists",
            RuleKind::QuestionAnswer { .. } => "QuestionAnswer",
            RuleKind::Custom { .. } => "Custom",
        }
    }

    /// The stable error code emitted for a violation of this kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuleKind::Required => "REQUIRED_FIELD_MISSING",
            RuleKind::AllowedValues { .. } => "VALUE_NOT_ALLOWED",
            RuleKind::FixedValue { .. } => "FIXED_VALUE_MISMATCH",
            RuleKind::Pattern { .. } => "PATTERN_MISMATCH",
            RuleKind::ArrayLength { .. } => "ARRAY_LENGTH_VIOLATION",
            RuleKind::CodeSystem { .. } => "CODE_NOT_IN_CODE_SYSTEM",
            RuleKind::ReferenceExists { .. } => "REFERENCE_NOT_FOUND",
            RuleKind::QuestionAnswer { .. } => "QUESTION_ANSWER_INVALID",
            RuleKind::Custom { .. } => "CUSTOM_RULE_VIOLATION",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleDefinition {
    pub id: String,
    pub kind: RuleKind,
    pub resource_type: String,
    /// Resource-relative dotted path, e.g. `identifier.system`.
    pub path: String,
    pub instance_scope: InstanceScope,
    pub severity: Severity,
    /// Only honoured for `Custom` rules; other kinds use their fixed code.
    pub error_code: Option<String>,
    pub validation_class: ValidationClass,
    /// The rule encodes a heuristic rather than a hard requirement.
    pub heuristic: bool,
    pub message: Option<String>,
}

impl RuleDefinition {
    pub fn new(
        id: impl Into<String>,
        kind: RuleKind,
        resource_type: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            resource_type: resource_type.into(),
            path: path.into(),
            instance_scope: InstanceScope::All,
            severity: Severity::Error,
            error_code: None,
            validation_class: ValidationClass::Advisory,
            heuristic: false,
            message: None,
        }
    }

    pub fn with_scope(mut self, scope: InstanceScope) -> Self {
        self.instance_scope = scope;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_class(mut self, class: ValidationClass) -> Self {
        self.validation_class = class;
        self
    }

    pub fn with_heuristic(mut self, heuristic: bool) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn effective_error_code(&self) -> String {
        match (&self.kind, &self.error_code) {
            (RuleKind::Custom { .. }, Some(code)) if !code.trim().is_empty() => code.clone(),
            (kind, _) => kind.error_code().to_string(),
        }
    }

    /// The rule path with a leading `ResourceType.` removed. A path naming
    /// only the resource type is empty.
    pub fn relative_path(&self) -> &str {
        match self.path.strip_prefix(self.resource_type.as_str()) {
            Some("") => "",
            Some(rest) => rest.strip_prefix('.').unwrap_or(&self.path),
            None => &self.path,
        }
    }
}

/// Parses rule-set text: a JSON array of rules or `{"rules": [...]}`.
/// Blank text is an empty rule set.
pub fn parse_rule_set(text: &str) -> Result<Vec<RuleDefinition>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: RuleSetDocument = serde_json::from_str(text)
        .map_err(|e| {
            BundleValidatorError::invalid_rule(format!("rule set is not valid JSON: {e}"))
        })?;
    let raw_rules = match document {
        RuleSetDocument::List(rules) => rules,
        RuleSetDocument::Wrapped { rules } => rules,
    };

    raw_rules
        .into_iter()
        .enumerate()
        .map(|(index, raw)| raw.into_definition(index))
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleSetDocument {
    List(Vec<RawRule>),
    Wrapped { rules: Vec<RawRule> },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
    #[serde(default)]
    id: Option<String>,
    kind: String,
    resource_type: String,
    #[serde(alias = "fieldPath")]
    path: String,
    #[serde(default)]
    instance_scope: Option<JsonValue>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    validation_class: Option<ValidationClass>,
    #[serde(default)]
    heuristic: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    params: JsonValue,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawParams {
    values: Vec<String>,
    value: Option<JsonValue>,
    pattern: Option<String>,
    min: Option<usize>,
    max: Option<usize>,
    system: Option<String>,
    target_types: Vec<String>,
    link_id: Option<String>,
    required: bool,
    allowed_answers: Vec<String>,
    answer_type: Option<String>,
    expression: Option<String>,
}

impl RawRule {
    fn into_definition(self, index: usize) -> Result<RuleDefinition> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("rule-{index}"));
        let fail = |message: String| {
            BundleValidatorError::invalid_rule(format!("rule '{id}': {message}"))
        };

        if self.path.trim().is_empty() {
            return Err(fail("path must not be empty".into()));
        }

        let params: RawParams = if self.params.is_null() {
            RawParams::default()
        } else {
            serde_json::from_value(self.params).map_err(|e| fail(format!("invalid params: {e}")))?
        };

        let kind = match self.kind.as_str() {
            "Required" => RuleKind::Required,
            "AllowedValues" => {
                if params.values.is_empty() {
                    return Err(fail("AllowedValues requires params.values".into()));
                }
                RuleKind::AllowedValues {
                    values: params.values,
                }
            }
            "FixedValue" => RuleKind::FixedValue {
                value: params
                    .value
                    .ok_or_else(|| fail("FixedValue requires params.value".into()))?,
            },
            "Pattern" => {
                let pattern = params
                    .pattern
                    .ok_or_else(|| fail("Pattern requires params.pattern".into()))?;
                let regex = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| fail(format!("invalid pattern: {e}")))?;
                RuleKind::Pattern { regex }
            }
            "ArrayLength" => {
                if params.min.is_none() && params.max.is_none() {
                    return Err(fail("ArrayLength requires params.min or params.max".into()));
                }
                if let (Some(min), Some(max)) = (params.min, params.max)
                    && min > max
                {
                    return Err(fail(format!("ArrayLength min {min} exceeds max {max}")));
                }
                RuleKind::ArrayLength {
                    min: params.min,
                    max: params.max,
                }
            }
            "CodeSystem" => RuleKind::CodeSystem {
                system: params
                    .system
                    .ok_or_else(|| fail("CodeSystem requires params.system".into()))?,
            },
            "ReferenceExists" => RuleKind::ReferenceExists {
                target_types: params.target_types,
            },
            "QuestionAnswer" => RuleKind::QuestionAnswer {
                link_id: params
                    .link_id
                    .ok_or_else(|| fail("QuestionAnswer requires params.linkId".into()))?,
                required: params.required,
                allowed_answers: params.allowed_answers,
                answer_type: params.answer_type,
            },
            "Custom" => RuleKind::Custom {
                expression: params
                    .expression
                    .ok_or_else(|| fail("Custom requires params.expression".into()))?,
            },
            other => return Err(fail(format!("unknown rule kind '{other}'"))),
        };

        let severity = match self.severity {
            Some(s) => Severity::parse_str(&s)
                .ok_or_else(|| fail(format!("unknown severity '{s}'")))?,
            None => Severity::Error,
        };

        let instance_scope = match self.instance_scope {
            Some(value) => parse_instance_scope(&value).map_err(fail)?,
            None => InstanceScope::All,
        };

        Ok(RuleDefinition {
            id,
            kind,
            resource_type: self.resource_type,
            path: self.path,
            instance_scope,
            severity,
            error_code: self.error_code,
            validation_class: self.validation_class.unwrap_or_default(),
            heuristic: self.heuristic,
            message: self.message,
        })
    }
}

/// Accepts `"All"`, `"First"` or `{"type": "Filtered", "condition": "..."}`.
fn parse_instance_scope(value: &JsonValue) -> std::result::Result<InstanceScope, String> {
    let (tag, condition) = match value {
        JsonValue::String(tag) => (tag.as_str(), None),
        JsonValue::Object(obj) => {
            let tag = obj
                .get("type")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| "instanceScope object requires a 'type'".to_string())?;
            (tag, obj.get("condition").and_then(JsonValue::as_str))
        }
        _ => return Err("instanceScope must be a string or an object".to_string()),
    };

    match tag.to_lowercase().as_str() {
        "all" => Ok(InstanceScope::All),
        "first" => Ok(InstanceScope::First),
        "filtered" => match condition {
            Some(condition) if !condition.trim().is_empty() => Ok(InstanceScope::Filtered {
                condition: condition.to_string(),
            }),
            _ => Err("Filtered instanceScope requires a condition".to_string()),
        },
        other => Err(format!("unknown instanceScope '{other}'")),
    }
}
