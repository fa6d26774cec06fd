//! Schema providers supply the `SchemaNode` trees the grammar validator and
//! the enum index walk.
//!
//! Resource types are flat records: a field common to every resource (`id`,
//! `meta`, `extension`) is found by following the definition's `base` chain,
//! and the children of a datatype-typed element are found by looking up the
//! datatype definition by name. Nothing is copied into each resource tree.

pub mod embedded;
pub mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::FhirVersion;
use crate::types::SchemaNode;

pub use embedded::EmbeddedSchemaProvider;
pub use registry::SchemaRegistry;

/// Guard against cyclic `base`/type chains in malformed definitions.
const MAX_CHAIN_DEPTH: usize = 16;

pub trait SchemaProvider: Send + Sync + std::fmt::Debug {
    fn version(&self) -> FhirVersion;

    /// Root node of a resource or datatype definition. Element references
    /// such as `QuestionnaireResponse.item` resolve to that element.
    fn definition(&self, type_name: &str) -> Option<Arc<SchemaNode>>;

    /// Concrete (non-abstract) resource types, sorted.
    fn resource_types(&self) -> Vec<String>;

    /// The default collects [`resource_types`](Self::resource_types) on every
    /// call; providers with an indexed type table should override it.
    fn is_resource_type(&self, name: &str) -> bool {
        self.resource_types().iter().any(|t| t == name)
    }

    /// Direct child `name` of `node`, following inherited and datatype
    /// definitions.
    fn child_of(&self, node: &SchemaNode, name: &str) -> Option<Arc<SchemaNode>> {
        if let Some(child) = node.child(name) {
            return Some(child.clone());
        }
        self.type_chain(node)
            .into_iter()
            .find_map(|definition| definition.child(name).cloned())
    }

    /// Choice element that `key` is a typed variant of, with the type code.
    fn choice_child_of(&self, node: &SchemaNode, key: &str) -> Option<(Arc<SchemaNode>, String)> {
        if let Some((child, type_code)) = node.choice_for_key(key) {
            return Some((child.clone(), type_code));
        }
        self.type_chain(node).into_iter().find_map(|definition| {
            definition
                .choice_for_key(key)
                .map(|(child, type_code)| (child.clone(), type_code))
        })
    }

    /// Every child of `node` including inherited ones; own children win.
    fn all_children(&self, node: &SchemaNode) -> Vec<Arc<SchemaNode>> {
        let mut merged: BTreeMap<String, Arc<SchemaNode>> = BTreeMap::new();
        for definition in self.type_chain(node).into_iter().rev() {
            for (name, child) in &definition.children {
                merged.insert(name.clone(), child.clone());
            }
        }
        for (name, child) in &node.children {
            merged.insert(name.clone(), child.clone());
        }
        merged.into_values().collect()
    }

    /// Definitions contributing children to `node`, nearest first: the
    /// definition of its declared type (unless that is the node itself),
    /// then the `base` chain.
    fn type_chain(&self, node: &SchemaNode) -> Vec<Arc<SchemaNode>> {
        let mut chain: Vec<Arc<SchemaNode>> = Vec::new();
        // A definition root already carries its own children.
        let mut next = match &node.base {
            Some(base) => Some(base.clone()),
            None => Some(node.type_name.clone()),
        };

        while let Some(type_name) = next.take() {
            if chain.len() >= MAX_CHAIN_DEPTH {
                tracing::warn!("Definition chain for {} exceeds depth limit", node.path);
                break;
            }
            let Some(definition) = self.definition(&type_name) else {
                break;
            };
            // Element references (`Bundle.link`) continue with the referenced
            // element's own type.
            next = match &definition.base {
                Some(base) => Some(base.clone()),
                None if definition.type_name != type_name => Some(definition.type_name.clone()),
                None => None,
            };
            chain.push(definition);
        }
        chain
    }

    /// Resolves a resource-relative dotted path (`contact.gender`, array
    /// indices ignored) to its schema node.
    fn get_node(&self, resource_type: &str, field_path: &str) -> Option<Arc<SchemaNode>> {
        let mut node = self.definition(resource_type)?;
        for segment in field_path.split('.').filter(|s| !s.is_empty()) {
            let name = segment.split('[').next().unwrap_or(segment);
            node = match self.child_of(&node, name) {
                Some(child) => child,
                None => self.choice_child_of(&node, name).map(|(child, _)| child)?,
            };
        }
        Some(node)
    }
}
