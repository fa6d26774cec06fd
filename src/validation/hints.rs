//! Advisory hints, run in `full` mode only.
//!
//! Hint findings carry the `Advisory` source; the report builder passes each
//! of them through the severity resolver as an advisory source.

use crate::core::{CancellationToken, RecommendedField};
use crate::error::Result;
use crate::types::{ErrorSource, Finding, InstanceScope, ValidationClass, ValidationError};
use crate::validation::model::TypedBundle;
use crate::validation::pointer::resource_base;
use crate::validation::rules::navigator::segments;
use crate::validation::rules::{BasicExpressionEvaluator, Navigator, Node};

pub trait AdvisoryHintProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn hints(&self, bundle: &dyn TypedBundle, cancel: &CancellationToken) -> Result<Vec<Finding>>;
}

/// Flags resources that leave a recommended field empty.
#[derive(Debug, Clone, Default)]
pub struct RecommendedFieldsProvider {
    fields: Vec<RecommendedField>,
}

impl RecommendedFieldsProvider {
    pub fn new(fields: Vec<RecommendedField>) -> Self {
        Self { fields }
    }
}

impl AdvisoryHintProvider for RecommendedFieldsProvider {
    fn name(&self) -> &str {
        "recommended-fields"
    }

    fn hints(&self, bundle: &dyn TypedBundle, cancel: &CancellationToken) -> Result<Vec<Finding>> {
        let evaluator = BasicExpressionEvaluator::new();
        let scope = InstanceScope::All;
        let navigator = Navigator::new(&scope, &evaluator, cancel);
        let mut findings = Vec::new();

        for resource in bundle.resources() {
            for field in self.fields.iter().filter(|f| f.resource_type == resource.resource_type) {
                cancel.check()?;
                let root = Node::root(
                    resource.resource,
                    &resource.resource_type,
                    resource_base(resource.entry_index),
                );
                let relative = field
                    .path
                    .strip_prefix(&format!("{}.", field.resource_type))
                    .unwrap_or(&field.path);
                let navigation = navigator.navigate(&root, &segments(relative))?;
                if navigation.nodes.iter().any(|n| !n.element.is_empty_value()) {
                    continue;
                }

                let path = format!("{}.{relative}", resource.resource_type);
                let error = ValidationError::new(
                    ErrorSource::Advisory,
                    field.severity,
                    ValidationClass::Advisory,
                    "RECOMMENDED_FIELD_MISSING",
                    path.as_str(),
                    format!("'{path}' is recommended"),
                )
                .with_entry(resource.entry_index)
                .with_detail("provider", self.name());
                findings.push(Finding::new(error));
            }
        }
        Ok(findings)
    }
}
