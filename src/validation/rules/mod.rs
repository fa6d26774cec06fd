//! Business rule evaluation.
//!
//! The engine runs over any [`TypedBundle`]: the typed object model produced
//! by a compliance collaborator when one is available, or the raw input tree
//! ([`RawBundle`](crate::validation::model::RawBundle)) otherwise. Both views
//! expose repeated fields in document order, so the index-qualified paths and
//! pointers the engine emits are identical on either path.
//!
//! Every violating element produces its own finding; arrays are never
//! collapsed to their first offender.

pub mod expression;
pub mod navigator;

pub use expression::{BasicExpressionEvaluator, ExpressionEvaluator};
pub use navigator::{Gap, Navigation, Navigator, Node};

use serde_json::Value as JsonValue;

use crate::core::CancellationToken;
use crate::error::{BundleValidatorError, Result};
use crate::terminology::CodeCatalog;
use crate::types::{
    ErrorSource, Finding, RuleDefinition, RuleKind, Severity, ValidationClass, ValidationError,
};
use crate::validation::model::{ModelResource, TypedBundle};
use crate::validation::pointer::resource_base;
use crate::validation::references::{BundleIndex, ReferenceKind, contained_resources};
use crate::validation::severity;

use navigator::{Presence, segments};

pub struct RuleEngine<'a> {
    rules: &'a [RuleDefinition],
    catalog: &'a CodeCatalog,
    evaluator: &'a dyn ExpressionEvaluator,
    cancel: &'a CancellationToken,
}

/// Per-resource evaluation state.
struct Target<'r, 'a> {
    rule: &'r RuleDefinition,
    resource: &'r ModelResource<'a>,
    index: &'r BundleIndex,
    navigator: Navigator<'r>,
    root: Node<'a>,
}

impl<'a> RuleEngine<'a> {
    pub fn new(
        rules: &'a [RuleDefinition],
        catalog: &'a CodeCatalog,
        evaluator: &'a dyn ExpressionEvaluator,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            rules,
            catalog,
            evaluator,
            cancel,
        }
    }

    pub fn evaluate(&self, bundle: &dyn TypedBundle) -> Result<Vec<Finding>> {
        let resources = bundle.resources();
        let index = BundleIndex::from_resources(&resources);
        let mut findings = Vec::new();

        for rule in self.rules {
            self.cancel.check()?;
            let matching: Vec<&ModelResource<'_>> = resources
                .iter()
                .filter(|r| r.resource_type == rule.resource_type)
                .collect();
            if matching.is_empty() {
                continue;
            }

            if let RuleKind::CodeSystem { system } = &rule.kind
                && self.catalog.system(system).is_none()
            {
                findings.push(self.unknown_code_system(rule, system));
                continue;
            }

            for resource in matching {
                let target = Target {
                    rule,
                    resource,
                    index: &index,
                    navigator: Navigator::new(&rule.instance_scope, self.evaluator, self.cancel),
                    root: Node::root(
                        resource.resource,
                        &resource.resource_type,
                        resource_base(resource.entry_index),
                    ),
                };
                match self.evaluate_target(&target, &mut findings) {
                    Ok(()) => {}
                    Err(err @ BundleValidatorError::Expression { .. }) => {
                        tracing::debug!(rule = %rule.id, error = %err, "rule condition failed");
                        findings.push(self.condition_error(&target, &err));
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        tracing::debug!(
            rules = self.rules.len(),
            resources = resources.len(),
            findings = findings.len(),
            "rules evaluated"
        );
        Ok(findings)
    }

    fn evaluate_target(&self, target: &Target<'_, '_>, findings: &mut Vec<Finding>) -> Result<()> {
        let rule = target.rule;
        let path = segments(rule.relative_path());

        match &rule.kind {
            RuleKind::Required => self.required(target, &path, findings),
            RuleKind::ArrayLength { min, max } => {
                self.array_length(target, &path, *min, *max, findings)
            }
            kind => {
                let navigation = target.navigator.navigate(&target.root, &path)?;
                for node in &navigation.nodes {
                    self.cancel.check()?;
                    self.check_value(target, kind, node, findings)?;
                }
                Ok(())
            }
        }
    }

    /// Absent fields, empty arrays and empty values are each a violation,
    /// reported once per holder element.
    fn required(
        &self,
        target: &Target<'_, '_>,
        path: &[&str],
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(());
        };
        let holders = target.navigator.navigate(&target.root, parents)?;
        for gap in &holders.gaps {
            let missing = format!("{}.{last}", gap.path);
            let message = format!("'{missing}' is required");
            findings.push(self.violation(target, &missing, None, message, None));
        }

        for holder in &holders.nodes {
            self.cancel.check()?;
            match target.navigator.presence(holder, last)? {
                Presence::Absent => {
                    let missing = format!("{}.{last}", holder.path);
                    findings.push(self.violation(
                        target,
                        &missing,
                        None,
                        format!("'{missing}' is required"),
                        None,
                    ));
                }
                Presence::Single(node) => {
                    if node.element.is_empty_value() {
                        findings.push(self.empty_required(target, &node));
                    }
                }
                Presence::Repeated {
                    path,
                    array_pointer,
                    items,
                    total,
                } => {
                    if total == 0 {
                        findings.push(self.violation(
                            target,
                            &path,
                            Some(array_pointer),
                            format!("'{path}' is required but empty"),
                            None,
                        ));
                        continue;
                    }
                    for node in items.iter().filter(|n| n.element.is_empty_value()) {
                        findings.push(self.empty_required(target, node));
                    }
                }
            }
        }
        Ok(())
    }

    fn array_length(
        &self,
        target: &Target<'_, '_>,
        path: &[&str],
        min: Option<usize>,
        max: Option<usize>,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(());
        };
        let holders = target.navigator.navigate(&target.root, parents)?;
        let out_of_range =
            |count: usize| min.is_some_and(|m| count < m) || max.is_some_and(|m| count > m);
        let describe = |count: usize| {
            let bounds = match (min, max) {
                (Some(min), Some(max)) => format!("between {min} and {max}"),
                (Some(min), None) => format!("at least {min}"),
                (None, Some(max)) => format!("at most {max}"),
                (None, None) => "any number of".to_string(),
            };
            format!("expected {bounds} elements, found {count}")
        };

        let mut emit = |field_path: String, pointer: Option<String>, count: usize| {
            if out_of_range(count) {
                let message = format!("'{field_path}': {}", describe(count));
                findings.push(self.violation(
                    target,
                    &field_path,
                    pointer,
                    message,
                    Some(("count", JsonValue::from(count))),
                ));
            }
        };

        for gap in &holders.gaps {
            emit(format!("{}.{last}", gap.path), None, 0);
        }
        for holder in &holders.nodes {
            self.cancel.check()?;
            match target.navigator.presence(holder, last)? {
                Presence::Absent => emit(format!("{}.{last}", holder.path), None, 0),
                Presence::Single(node) => emit(node.path.clone(), Some(node.pointer.clone()), 1),
                Presence::Repeated {
                    path,
                    array_pointer,
                    total,
                    ..
                } => emit(path, Some(array_pointer), total),
            }
        }
        Ok(())
    }

    fn check_value(
        &self,
        target: &Target<'_, '_>,
        kind: &RuleKind,
        node: &Node<'_>,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let text = node.element.primitive_text();
        match kind {
            RuleKind::Required | RuleKind::ArrayLength { .. } => {}
            RuleKind::AllowedValues { values } => {
                if !text.as_ref().is_some_and(|t| values.contains(t)) {
                    findings.push(self.value_violation(
                        target,
                        node,
                        format!("value is not one of [{}]", values.join(", ")),
                    ));
                }
            }
            RuleKind::FixedValue { value } => {
                let actual = node.element.to_json();
                let matches = actual == *value
                    || value.as_str().is_some_and(|expected| text.as_deref() == Some(expected));
                if !matches {
                    let message = format!("value must be {value}");
                    findings.push(self.value_violation(target, node, message));
                }
            }
            RuleKind::Pattern { regex } => {
                if !text.as_ref().is_some_and(|t| regex.is_match(t)) {
                    findings.push(self.value_violation(
                        target,
                        node,
                        format!("value does not match pattern {}", regex.as_str()),
                    ));
                }
            }
            RuleKind::CodeSystem { system } => self.code_system(target, system, node, findings),
            RuleKind::ReferenceExists { target_types } => {
                self.reference_exists(target, target_types, node, findings)
            }
            RuleKind::QuestionAnswer {
                link_id,
                required,
                allowed_answers,
                answer_type,
            } => {
                let question = Question {
                    link_id,
                    required: *required,
                    allowed_answers,
                    answer_type: answer_type.as_deref(),
                };
                self.question_answer(target, &question, node, findings);
            }
            RuleKind::Custom { expression } => {
                if !self.evaluator.evaluate(expression, node.element)? {
                    findings.push(self.violation(
                        target,
                        &node.path,
                        Some(node.pointer.clone()),
                        format!("'{}' does not satisfy {expression}", node.path),
                        None,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Primitive codes, `Coding`s and each coding of a `CodeableConcept`.
    fn code_system(
        &self,
        target: &Target<'_, '_>,
        system: &str,
        node: &Node<'_>,
        findings: &mut Vec<Finding>,
    ) {
        let codes: Vec<Node<'_>> = if node.element.primitive().is_some() {
            vec![node.clone()]
        } else if node.element.child("coding").is_some() {
            Navigator::children(node, "coding")
                .iter()
                .flat_map(|coding| Navigator::children(coding, "code"))
                .collect()
        } else {
            Navigator::children(node, "code")
        };

        for code in codes {
            let Some(text) = code.element.primitive_text() else {
                continue;
            };
            if self.catalog.contains_code(system, &text) == Some(false) {
                let mut finding = self.value_violation(
                    target,
                    &code,
                    format!("code '{text}' is not defined in {system}"),
                );
                finding.error = finding.error.with_detail("system", system);
                findings.push(finding);
            }
        }
    }

    fn reference_exists(
        &self,
        target: &Target<'_, '_>,
        target_types: &[String],
        node: &Node<'_>,
        findings: &mut Vec<Finding>,
    ) {
        let reference_node = if node.element.primitive().is_some() {
            Some(node.clone())
        } else {
            Navigator::children(node, "reference").into_iter().next()
        };
        // Identifier-only and display-only references have no target.
        let Some(reference_node) = reference_node else {
            return;
        };
        let Some(text) = reference_node.element.primitive_text() else {
            return;
        };

        let resolved = match ReferenceKind::parse(&text) {
            Some(ReferenceKind::Local(id)) if id.is_empty() => {
                Some(target.resource.resource_type.clone())
            }
            Some(ReferenceKind::Local(id)) => contained_resources(target.resource.resource)
                .into_iter()
                .find(|(contained_id, _)| *contained_id == id)
                .map(|(_, resource_type)| resource_type),
            Some(kind) => target.index.resolve(&kind),
            None => None,
        };

        let message = match resolved {
            None => format!("reference '{text}' does not resolve within the bundle"),
            Some(resource_type)
                if !target_types.is_empty() && !target_types.contains(&resource_type) =>
            {
                format!(
                    "reference '{text}' resolves to {resource_type}, expected one of [{}]",
                    target_types.join(", ")
                )
            }
            Some(_) => return,
        };
        let mut finding = self.value_violation(target, &reference_node, message);
        finding.error = finding.error.with_detail("reference", text);
        findings.push(finding);
    }

    fn question_answer(
        &self,
        target: &Target<'_, '_>,
        question: &Question<'_>,
        node: &Node<'_>,
        findings: &mut Vec<Finding>,
    ) {
        let mut items = Vec::new();
        collect_items(node, question.link_id, &mut items);

        if items.is_empty() {
            if question.required {
                let path = format!("{}.item", node.path);
                findings.push(self.question_missing(target, question, &path, None));
            }
            return;
        }

        for item in &items {
            let answers = Navigator::children(item, "answer");
            if answers.is_empty() {
                if question.required {
                    findings.push(self.question_missing(
                        target,
                        question,
                        &format!("{}.answer", item.path),
                        Some(item.pointer.clone()),
                    ));
                }
                continue;
            }

            for answer in &answers {
                let Some(key) = answer
                    .element
                    .field_names()
                    .into_iter()
                    .find(|name| name.starts_with("value"))
                else {
                    continue;
                };
                let Some(value) = Navigator::children(answer, &key).into_iter().next() else {
                    continue;
                };

                if let Some(expected) = question.answer_type
                    && key != format!("value{}", capitalize(expected))
                {
                    findings.push(self.value_violation(
                        target,
                        &value,
                        format!(
                            "answer to '{}' must be of type {expected}, found {key}",
                            question.link_id
                        ),
                    ));
                    continue;
                }

                if question.allowed_answers.is_empty() {
                    continue;
                }
                let answer_text = value
                    .element
                    .primitive_text()
                    .or_else(|| {
                        Navigator::children(&value, "code")
                            .first()?
                            .element
                            .primitive_text()
                    });
                if !answer_text
                    .as_ref()
                    .is_some_and(|t| question.allowed_answers.contains(t))
                {
                    findings.push(self.value_violation(
                        target,
                        &value,
                        format!(
                            "answer to '{}' is not one of [{}]",
                            question.link_id,
                            question.allowed_answers.join(", ")
                        ),
                    ));
                }
            }
        }
    }

    fn value_violation(
        &self,
        target: &Target<'_, '_>,
        node: &Node<'_>,
        message: String,
    ) -> Finding {
        let mut finding = self.violation(
            target,
            &node.path,
            Some(node.pointer.clone()),
            format!("'{}': {message}", node.path),
            None,
        );
        if let Some(actual) = node.element.primitive() {
            finding.error = finding.error.with_detail("actual", actual);
        }
        finding
    }

    fn empty_required(&self, target: &Target<'_, '_>, node: &Node<'_>) -> Finding {
        self.violation(
            target,
            &node.path,
            Some(node.pointer.clone()),
            format!("'{}' is required but empty", node.path),
            None,
        )
    }

    fn question_missing(
        &self,
        target: &Target<'_, '_>,
        question: &Question<'_>,
        path: &str,
        pointer: Option<String>,
    ) -> Finding {
        let mut finding = self.violation(
            target,
            path,
            pointer,
            format!("question '{}' has no answer", question.link_id),
            Some(("linkId", JsonValue::from(question.link_id))),
        );
        finding.error.error_code = "QUESTION_ANSWER_MISSING".to_string();
        finding
    }

    /// A rule finding with the rule's configured severity and class, passed
    /// through the severity resolver.
    fn violation(
        &self,
        target: &Target<'_, '_>,
        path: &str,
        pointer: Option<String>,
        default_message: String,
        detail: Option<(&str, JsonValue)>,
    ) -> Finding {
        let rule = target.rule;
        let message = rule.message.clone().unwrap_or(default_message);
        let mut error = ValidationError::new(
            ErrorSource::Rule,
            rule.severity,
            rule.validation_class,
            rule.effective_error_code(),
            path,
            message,
        )
        .with_entry(target.resource.entry_index)
        .with_detail("ruleId", rule.id.as_str())
        .with_detail("ruleKind", rule.kind.name());
        if let Some((key, value)) = detail {
            error = error.with_detail(key, value);
        }
        severity::apply(&mut error, rule.heuristic, false);

        Finding { error, pointer }
    }

    fn condition_error(&self, target: &Target<'_, '_>, err: &BundleValidatorError) -> Finding {
        let rule = target.rule;
        let error = ValidationError::new(
            ErrorSource::Rule,
            Severity::Warning,
            ValidationClass::Advisory,
            "RULE_CONDITION_ERROR",
            &rule.path,
            format!("rule '{}' could not be evaluated: {err}", rule.id),
        )
        .with_entry(target.resource.entry_index)
        .with_detail("ruleId", rule.id.as_str());
        Finding::new(error).at_pointer(target.root.pointer.clone())
    }

    fn unknown_code_system(&self, rule: &RuleDefinition, system: &str) -> Finding {
        let mut error = ValidationError::new(
            ErrorSource::Rule,
            rule.severity,
            rule.validation_class,
            "CODE_SYSTEM_NOT_FOUND",
            &rule.path,
            format!("code system '{system}' is not in the supplied catalog"),
        )
        .with_detail("ruleId", rule.id.as_str())
        .with_detail("system", system);
        severity::apply(&mut error, rule.heuristic, false);
        Finding::new(error)
    }
}

struct Question<'q> {
    link_id: &'q str,
    required: bool,
    allowed_answers: &'q [String],
    answer_type: Option<&'q str>,
}

/// Items with `link_id` anywhere below `node`, through nested items and
/// items nested under answers.
fn collect_items<'a>(node: &Node<'a>, link_id: &str, found: &mut Vec<Node<'a>>) {
    for item in Navigator::children(node, "item") {
        let matches = Navigator::children(&item, "linkId")
            .first()
            .and_then(|id| id.element.primitive_text())
            .is_some_and(|id| id == link_id);
        if matches {
            found.push(item.clone());
        }
        collect_items(&item, link_id, found);
        for answer in Navigator::children(&item, "answer") {
            collect_items(&answer, link_id, found);
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
