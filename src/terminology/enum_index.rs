//! Flat index of closed-value bindings, keyed by resource type and
//! resource-relative element path.

use papaya::HashMap as PapayaMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::core::FhirVersion;
use crate::error::{BundleValidatorError, Result};
use crate::provider::SchemaProvider;
use crate::types::{BindingStrength, SchemaNode};

/// Deepest datatype nesting followed while collecting bindings.
const MAX_INDEX_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumBinding {
    pub allowed: Vec<String>,
    pub strength: BindingStrength,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

impl EnumBinding {
    pub fn new(allowed: Vec<String>, strength: BindingStrength) -> Self {
        Self {
            allowed,
            strength,
            value_set: None,
        }
    }

    pub fn with_value_set(mut self, value_set: impl Into<String>) -> Self {
        self.value_set = Some(value_set.into());
        self
    }

    pub fn allows(&self, code: &str) -> bool {
        self.allowed.iter().any(|c| c == code)
    }
}

/// Immutable map `(resourceType, elementPath) -> EnumBinding`.
///
/// Element paths carry no array indices: `contact.gender`, `telecom.system`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumIndex {
    entries: BTreeMap<(String, String), EnumBinding>,
}

impl EnumIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(
        mut self,
        resource_type: impl Into<String>,
        element_path: impl Into<String>,
        binding: EnumBinding,
    ) -> Self {
        self.entries
            .insert((resource_type.into(), element_path.into()), binding);
        self
    }

    /// Walks every resource type of `provider` and records each `code`
    /// element that has a closed binding.
    pub fn build(provider: &dyn SchemaProvider) -> Self {
        let mut index = Self::new();
        for resource_type in provider.resource_types() {
            let Some(root) = provider.definition(&resource_type) else {
                continue;
            };
            let mut visiting = HashSet::new();
            visiting.insert(resource_type.clone());
            index.collect(provider, &resource_type, &root, "", &mut visiting, 0);
        }
        tracing::debug!(
            "Enum index for FHIR {} holds {} bindings",
            provider.version(),
            index.len()
        );
        index
    }

    fn collect(
        &mut self,
        provider: &dyn SchemaProvider,
        resource_type: &str,
        node: &SchemaNode,
        prefix: &str,
        visiting: &mut HashSet<String>,
        depth: usize,
    ) {
        for child in provider.all_children(node) {
            let path = if prefix.is_empty() {
                child.name.clone()
            } else {
                format!("{prefix}.{}", child.name)
            };

            if child.type_name == "code" {
                if let Some(binding) = &child.binding
                    && binding.is_closed()
                {
                    let mut entry = EnumBinding::new(binding.codes.clone(), binding.strength);
                    entry.value_set = binding.value_set.clone();
                    self.entries
                        .insert((resource_type.to_string(), path), entry);
                }
                continue;
            }

            // Inline resources are indexed under their own type.
            if child.is_primitive() || child.is_choice() || child.type_name == "Resource" {
                continue;
            }
            if depth >= MAX_INDEX_DEPTH {
                continue;
            }

            // Backbone elements are unique per path; datatypes recurse by name.
            let guard = if child.type_name == "BackboneElement" {
                child.path.clone()
            } else {
                child.type_name.clone()
            };
            if !visiting.insert(guard.clone()) {
                continue;
            }
            self.collect(provider, resource_type, &child, &path, visiting, depth + 1);
            visiting.remove(&guard);
        }
    }

    pub fn lookup(&self, resource_type: &str, element_path: &str) -> Option<&EnumBinding> {
        self.entries
            .get(&(resource_type.to_string(), element_path.to_string()))
    }

    /// Allowed codes for the element; empty when the element is not
    /// enum-constrained.
    pub fn allowed_values(&self, resource_type: &str, element_path: &str) -> &[String] {
        self.lookup(resource_type, element_path)
            .map(|b| b.allowed.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &EnumBinding)> {
        self.entries
            .iter()
            .map(|((rt, path), binding)| (rt.as_str(), path.as_str(), binding))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Supplies the enum index for a version.
///
/// The pipeline asks this once per validation; implementations decide how
/// the index is cached.
pub trait EnumIndexSource: Send + Sync + std::fmt::Debug {
    fn index_for(
        &self,
        version: FhirVersion,
        provider: &dyn SchemaProvider,
    ) -> Result<Arc<EnumIndex>>;
}

type IndexSlot = Arc<OnceLock<Arc<EnumIndex>>>;

/// Build-once-per-version cache of enum indexes. A [`SchemaRegistry`]
/// owns one and clears a version whenever its provider changes.
///
/// [`SchemaRegistry`]: crate::provider::SchemaRegistry
#[derive(Debug, Default)]
pub struct EnumIndexCache {
    slots: PapayaMap<FhirVersion, IndexSlot>,
    builds: AtomicUsize,
}

impl EnumIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        version: FhirVersion,
        provider: &dyn SchemaProvider,
    ) -> Arc<EnumIndex> {
        let slot = self
            .slots
            .pin()
            .get_or_insert_with(version, || Arc::new(OnceLock::new()))
            .clone();
        slot.get_or_init(|| {
            self.builds.fetch_add(1, Ordering::SeqCst);
            tracing::info!("Building enum index for FHIR {}", version);
            Arc::new(EnumIndex::build(provider))
        })
        .clone()
    }

    pub fn invalidate(&self, version: FhirVersion) -> bool {
        self.slots.pin().remove(&version).is_some()
    }

    /// Number of index builds performed by this cache.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl EnumIndexSource for EnumIndexCache {
    fn index_for(
        &self,
        version: FhirVersion,
        provider: &dyn SchemaProvider,
    ) -> Result<Arc<EnumIndex>> {
        if provider.version() != version {
            return Err(BundleValidatorError::configuration(format!(
                "schema provider serves FHIR {} but {} was requested",
                provider.version(),
                version
            )));
        }
        Ok(self.get_or_build(version, provider))
    }
}

/// A pre-built index served for every version.
#[derive(Debug, Clone)]
pub struct StaticEnumIndex {
    index: Arc<EnumIndex>,
}

impl StaticEnumIndex {
    pub fn new(index: EnumIndex) -> Self {
        Self {
            index: Arc::new(index),
        }
    }
}

impl EnumIndexSource for StaticEnumIndex {
    fn index_for(&self, _: FhirVersion, _: &dyn SchemaProvider) -> Result<Arc<EnumIndex>> {
        Ok(self.index.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EmbeddedSchemaProvider;

    #[test]
    fn test_index_collects_closed_bindings() {
        let provider = EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap();
        let index = EnumIndex::build(&provider);

        let gender = index.lookup("Patient", "gender").unwrap();
        assert_eq!(gender.strength, BindingStrength::Required);
        assert!(gender.allows("female"));
        assert!(!gender.allows("malex"));

        // Backbone and datatype children.
        assert!(index.lookup("Patient", "contact.gender").is_some());
        assert!(index.lookup("Patient", "telecom.system").is_some());
        assert!(index.lookup("Patient", "text.status").is_some());
        assert!(index.lookup("Observation", "status").is_some());

        // Inline resources are not flattened into their container.
        assert!(index.lookup("Bundle", "entry.resource.gender").is_none());
        assert!(index.allowed_values("Patient", "shoeSize").is_empty());
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        for version in FhirVersion::all() {
            let provider = EmbeddedSchemaProvider::load(*version).unwrap();
            let first = EnumIndex::build(&provider);
            let second = EnumIndex::build(&provider);
            assert_eq!(first, second);
            assert!(!first.is_empty());
        }
    }

    #[test]
    fn test_version_specific_codes() {
        let r4 = EnumIndex::build(&EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap());
        let r5 = EnumIndex::build(&EmbeddedSchemaProvider::load(FhirVersion::R5).unwrap());
        let r4_types = r4.lookup("Bundle", "type").unwrap();
        let r5_types = r5.lookup("Bundle", "type").unwrap();
        assert!(!r4_types.allows("subscription-notification"));
        assert!(r5_types.allows("subscription-notification"));
    }

    #[test]
    fn test_cache_builds_once_per_version() {
        let cache = Arc::new(EnumIndexCache::new());
        let provider: Arc<dyn SchemaProvider> =
            Arc::new(EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap());

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let cache = cache.clone();
                let provider = provider.clone();
                std::thread::spawn(move || {
                    cache.index_for(FhirVersion::R4, provider.as_ref()).unwrap()
                })
            })
            .collect();
        let indexes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(cache.build_count(), 1);
        assert!(indexes.iter().all(|i| Arc::ptr_eq(i, &indexes[0])));

        assert!(cache.invalidate(FhirVersion::R4));
        cache.get_or_build(FhirVersion::R4, provider.as_ref());
        assert_eq!(cache.build_count(), 2);
    }

    #[test]
    fn test_cache_rejects_mismatched_provider() {
        let cache = EnumIndexCache::new();
        let provider = EmbeddedSchemaProvider::load(FhirVersion::R4).unwrap();
        assert!(cache.index_for(FhirVersion::R5, &provider).is_err());
    }

    #[test]
    fn test_static_index_substitution() {
        let index = EnumIndex::new().with_entry(
            "Patient",
            "gender",
            EnumBinding::new(vec!["x".into()], BindingStrength::Extensible),
        );
        let source = StaticEnumIndex::new(index);
        let provider = EmbeddedSchemaProvider::load(FhirVersion::R5).unwrap();
        let served = source.index_for(FhirVersion::R5, &provider).unwrap();
        assert_eq!(served.allowed_values("Patient", "gender"), ["x".to_string()]);
        assert_eq!(served.len(), 1);
    }
}
