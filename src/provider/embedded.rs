use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::SchemaProvider;
use crate::core::FhirVersion;
use crate::error::{BundleValidatorError, Result};
use crate::types::{BindingStrength, Cardinality, ElementBinding, SchemaNode};

#[cfg(feature = "embedded-providers")]
mod schemas {
    pub const R4: &str = include_str!("../../schemas/r4.json");
    pub const R5: &str = include_str!("../../schemas/r5.json");
}

/// Schema provider backed by the compact definitions compiled into the
/// binary (or any document in the same format).
#[derive(Debug)]
pub struct EmbeddedSchemaProvider {
    fhir_version: FhirVersion,
    definitions: HashMap<String, Arc<SchemaNode>>,
    resource_types: Vec<String>,
}

#[derive(Deserialize)]
struct SchemaDocument {
    version: FhirVersion,
    definitions: BTreeMap<String, RawDefinition>,
}

#[derive(Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum DefinitionKind {
    Resource,
    Datatype,
    Abstract,
}

#[derive(Deserialize)]
struct RawDefinition {
    kind: DefinitionKind,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    elements: BTreeMap<String, RawElement>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    #[serde(rename = "type", default)]
    type_name: Option<String>,
    #[serde(default)]
    min: u32,
    #[serde(default = "RawElement::default_max")]
    max: String,
    #[serde(default)]
    choices: Vec<String>,
    #[serde(default)]
    binding: Option<RawBinding>,
    #[serde(default)]
    elements: BTreeMap<String, RawElement>,
    #[serde(default)]
    long_text: bool,
}

impl RawElement {
    fn default_max() -> String {
        "1".to_string()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBinding {
    strength: String,
    #[serde(default)]
    value_set: Option<String>,
    #[serde(default)]
    codes: Vec<String>,
}

impl EmbeddedSchemaProvider {
    /// Parses the embedded definitions for `fhir_version`.
    pub fn load(fhir_version: FhirVersion) -> Result<Self> {
        #[cfg(feature = "embedded-providers")]
        {
            let document = match fhir_version {
                FhirVersion::R4 => schemas::R4,
                FhirVersion::R5 => schemas::R5,
            };
            Self::from_json_str(document)
        }

        #[cfg(not(feature = "embedded-providers"))]
        {
            Err(BundleValidatorError::schema_load(
                fhir_version.to_string(),
                "embedded schemas require the 'embedded-providers' feature".to_string(),
            ))
        }
    }

    /// Builds a provider from a schema document in the embedded format.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let document: SchemaDocument = serde_json::from_str(content).map_err(|e| {
            BundleValidatorError::schema_load("unknown".to_string(), e.to_string())
        })?;
        let fhir_version = document.version;

        let mut definitions = HashMap::with_capacity(document.definitions.len());
        let mut resource_types = Vec::new();
        for (name, raw) in document.definitions {
            if raw.kind == DefinitionKind::Resource {
                resource_types.push(name.clone());
            }
            let mut root = SchemaNode::new(name.clone(), name.clone());
            if let Some(base) = raw.base {
                root = root.with_base(base);
            }
            for (child_name, element) in raw.elements {
                let child =
                    build_node(&format!("{name}.{child_name}"), element).map_err(|message| {
                        BundleValidatorError::schema_load(fhir_version.to_string(), message)
                    })?;
                root = root.with_child(child);
            }
            definitions.insert(name, Arc::new(root));
        }
        resource_types.sort();

        tracing::info!(
            "Loaded {} schema definitions ({} resource types) for FHIR {}",
            definitions.len(),
            resource_types.len(),
            fhir_version
        );

        Ok(Self {
            fhir_version,
            definitions,
            resource_types,
        })
    }
}

fn build_node(path: &str, raw: RawElement) -> std::result::Result<SchemaNode, String> {
    let type_name = match (&raw.type_name, raw.choices.is_empty(), raw.elements.is_empty()) {
        (Some(type_name), _, _) => type_name.clone(),
        (None, false, _) => "choice".to_string(),
        (None, true, false) => "BackboneElement".to_string(),
        (None, true, true) => return Err(format!("element {path} declares no type")),
    };
    let cardinality = Cardinality::parse(raw.min, &raw.max)
        .ok_or_else(|| format!("element {path} has invalid max '{}'", raw.max))?;

    let mut node = SchemaNode::new(path, type_name)
        .with_cardinality(cardinality.min, cardinality.max)
        .with_choices(raw.choices)
        .with_long_text(raw.long_text);

    if let Some(binding) = raw.binding {
        let strength = BindingStrength::parse_str(&binding.strength).ok_or_else(|| {
            format!(
                "element {path} has unknown binding strength '{}'",
                binding.strength
            )
        })?;
        node = node.with_binding(ElementBinding {
            strength,
            value_set: binding.value_set,
            codes: binding.codes,
        });
    }

    for (child_name, element) in raw.elements {
        node = node.with_child(build_node(&format!("{path}.{child_name}"), element)?);
    }
    Ok(node)
}

impl SchemaProvider for EmbeddedSchemaProvider {
    fn version(&self) -> FhirVersion {
        self.fhir_version
    }

    fn definition(&self, type_name: &str) -> Option<Arc<SchemaNode>> {
        if let Some(definition) = self.definitions.get(type_name) {
            return Some(definition.clone());
        }
        // Element reference: `QuestionnaireResponse.item`.
        let mut segments = type_name.split('.');
        let mut node = self.definitions.get(segments.next()?)?.clone();
        for segment in segments {
            node = node.child(segment)?.clone();
        }
        Some(node)
    }

    fn resource_types(&self) -> Vec<String> {
        self.resource_types.clone()
    }

    fn is_resource_type(&self, name: &str) -> bool {
        self.resource_types.binary_search_by(|t| t.as_str().cmp(name)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_schemas_load_for_every_version() {
        for version in FhirVersion::all() {
            let provider = EmbeddedSchemaProvider::load(*version).unwrap();
            assert_eq!(provider.version(), *version);
            assert!(provider.is_resource_type("Patient"));
            assert!(provider.is_resource_type("Bundle"));
            assert!(!provider.is_resource_type("DomainResource"));
            assert!(!provider.is_resource_type("Identifier"));
        }
    }

    #[test]
    fn test_version_specific_definitions() {
        let r4 = EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap();
        let r5 = EmbeddedSchemaProvider::load(FhirVersion::R5).unwrap();

        let r4_class = r4.get_node("Encounter", "class").unwrap();
        assert_eq!(r4_class.type_name, "Coding");
        assert!(!r4_class.cardinality.is_repeating());

        let r5_class = r5.get_node("Encounter", "class").unwrap();
        assert_eq!(r5_class.type_name, "CodeableConcept");
        assert!(r5_class.cardinality.is_repeating());
    }

    #[test]
    fn test_backbone_and_choice_nodes() {
        let provider = EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap();
        let contact = provider.get_node("Patient", "contact").unwrap();
        assert_eq!(contact.type_name, "BackboneElement");
        assert!(contact.cardinality.is_repeating());

        let deceased = provider.definition("Patient").unwrap();
        let (node, type_code) = deceased.choice_for_key("deceasedDateTime").unwrap();
        assert_eq!(node.type_name, "choice");
        assert_eq!(type_code, "dateTime");
    }

    #[test]
    fn test_malformed_documents_are_schema_load_errors() {
        let err = EmbeddedSchemaProvider::from_json_str(
            r#"{"version": "R4", "definitions": {"Thing": {"kind": "resource", "elements": {"x": {}}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BundleValidatorError::SchemaLoad { .. }));

        let err = EmbeddedSchemaProvider::from_json_str(
            r#"{"version": "R4", "definitions": {"Thing": {"kind": "resource", "elements": {"x": {"type": "code", "max": "many"}}}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid max"));
    }
}
