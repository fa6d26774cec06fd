use async_trait::async_trait;
use fhir_bundle_validator::*;
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;

/// An owned object model, built independently of the input tree, that the
/// rule engine can run against in place of the raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Primitive(JsonValue),
    Object(Vec<(String, TreeField)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeField {
    Single(TreeNode),
    Repeated(Vec<TreeNode>),
}

impl TreeNode {
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => TreeNode::Object(
                map.iter()
                    .map(|(name, value)| {
                        let field = match value {
                            JsonValue::Array(items) => {
                                TreeField::Repeated(items.iter().map(TreeNode::from_json).collect())
                            }
                            other => TreeField::Single(TreeNode::from_json(other)),
                        };
                        (name.clone(), field)
                    })
                    .collect(),
            ),
            other => TreeNode::Primitive(other.clone()),
        }
    }
}

impl ModelElement for TreeNode {
    fn child(&self, name: &str) -> Option<FieldValue<'_>> {
        let TreeNode::Object(fields) = self else {
            return None;
        };
        let (_, field) = fields.iter().find(|(field_name, _)| field_name == name)?;
        Some(match field {
            TreeField::Single(node) => FieldValue::Single(node),
            TreeField::Repeated(nodes) => {
                FieldValue::Repeated(nodes.iter().map(|node| node as &dyn ModelElement).collect())
            }
        })
    }

    fn field_names(&self) -> Vec<String> {
        match self {
            TreeNode::Object(fields) => fields.iter().map(|(name, _)| name.clone()).collect(),
            TreeNode::Primitive(_) => Vec::new(),
        }
    }

    fn primitive(&self) -> Option<JsonValue> {
        match self {
            TreeNode::Primitive(value) => Some(value.clone()),
            TreeNode::Object(_) => None,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            TreeNode::Primitive(value) => value.clone(),
            TreeNode::Object(fields) => {
                let mut map = Map::new();
                for (name, field) in fields {
                    let value = match field {
                        TreeField::Single(node) => node.to_json(),
                        TreeField::Repeated(nodes) => {
                            JsonValue::Array(nodes.iter().map(ModelElement::to_json).collect())
                        }
                    };
                    map.insert(name.clone(), value);
                }
                JsonValue::Object(map)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeResource {
    pub entry_index: Option<usize>,
    pub resource_type: String,
    pub full_url: Option<String>,
    pub node: TreeNode,
}

#[derive(Debug, Clone, Default)]
pub struct TreeModel {
    pub resources: Vec<TreeResource>,
}

impl TreeModel {
    pub fn from_json(value: &JsonValue) -> Self {
        let resources = RawBundle::new(value)
            .resources()
            .into_iter()
            .map(|resource| TreeResource {
                entry_index: resource.entry_index,
                resource_type: resource.resource_type,
                full_url: resource.full_url,
                node: TreeNode::from_json(&resource.resource.to_json()),
            })
            .collect();
        Self { resources }
    }
}

impl TypedBundle for TreeModel {
    fn resources(&self) -> Vec<ModelResource<'_>> {
        self.resources
            .iter()
            .map(|resource| ModelResource {
                entry_index: resource.entry_index,
                resource_type: resource.resource_type.clone(),
                full_url: resource.full_url.clone(),
                resource: &resource.node,
            })
            .collect()
    }
}

/// A collaborator that builds the typed model and reports fixed findings.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct ModelBuildingValidator {
    pub findings: Vec<ComplianceFinding>,
}

#[async_trait]
impl ComplianceValidator for ModelBuildingValidator {
    async fn validate(&self, bundle_text: &str, _version: FhirVersion) -> Result<ComplianceReport> {
        let value: JsonValue = serde_json::from_str(bundle_text)
            .map_err(|e| BundleValidatorError::compliance(e.to_string()))?;
        Ok(ComplianceReport {
            findings: self.findings.clone(),
            model: Some(Arc::new(TreeModel::from_json(&value))),
        })
    }
}

/// A collaborator whose service is down.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct FailingValidator;

#[async_trait]
impl ComplianceValidator for FailingValidator {
    async fn validate(
        &self,
        _bundle_text: &str,
        _version: FhirVersion,
    ) -> Result<ComplianceReport> {
        Err(BundleValidatorError::compliance("connection refused"))
    }
}

#[allow(dead_code)]
pub fn create_test_bundle(resources: Vec<JsonValue>) -> JsonValue {
    let entry: Vec<JsonValue> = resources
        .into_iter()
        .enumerate()
        .map(|(i, resource)| {
            json!({"fullUrl": format!("urn:uuid:entry-{i}"), "resource": resource})
        })
        .collect();
    json!({"resourceType": "Bundle", "type": "collection", "entry": entry})
}

#[allow(dead_code)]
pub fn create_test_patient() -> JsonValue {
    json!({
        "resourceType": "Patient",
        "id": "p1",
        "active": true,
        "gender": "female",
        "birthDate": "1980-02-29",
        "identifier": [
            {"system": "sys-a", "value": "1"},
            {"system": "sys-b", "value": "2"},
            {"system": "sys-c", "value": "3"}
        ],
        "name": [{"family": "Doe", "given": ["Jane"]}]
    })
}

#[allow(dead_code)]
pub fn create_test_observation() -> JsonValue {
    json!({
        "resourceType": "Observation",
        "id": "o1",
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]},
        "subject": {"reference": "urn:uuid:entry-0"},
        "performer": [{"reference": "urn:uuid:entry-0"}]
    })
}

#[allow(dead_code)]
pub fn create_test_request(bundle: &JsonValue) -> ValidationRequest {
    ValidationRequest::new(bundle.to_string(), "R4")
}

/// Pipelines covering both rule-engine paths: raw tree and typed model.
#[allow(dead_code)]
pub fn both_paths() -> Vec<(&'static str, ValidationPipeline)> {
    vec![
        ("raw", ValidationPipeline::new()),
        (
            "typed",
            ValidationPipeline::new()
                .with_compliance_validator(Arc::new(ModelBuildingValidator::default())),
        ),
    ]
}

