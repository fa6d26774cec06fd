//! Reference grammar and in-bundle resolution, shared by the grammar
//! validator, the `ReferenceExists` rule and the reference integrity pass.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use super::model::{FieldValue, ModelElement, ModelResource};

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Za-z0-9]+)/([A-Za-z0-9\-\.]{1,64})(?:/_history/[A-Za-z0-9\-\.]{1,64})?$")
        .unwrap()
});
static ABSOLUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+$").unwrap());

/// The forms a `Reference.reference` string can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `#id` (an empty id refers to the containing resource).
    Local(String),
    /// `urn:uuid:...` or `urn:oid:...`
    Urn(String),
    /// `Patient/123`, optionally versioned.
    Relative { resource_type: String, id: String },
    /// `https://server/fhir/Patient/123`
    Absolute(String),
}

impl ReferenceKind {
    pub fn parse(reference: &str) -> Option<Self> {
        if let Some(fragment) = reference.strip_prefix('#') {
            return Some(ReferenceKind::Local(fragment.to_string()));
        }
        if reference.starts_with("urn:uuid:") || reference.starts_with("urn:oid:") {
            return Some(ReferenceKind::Urn(reference.to_string()));
        }
        if let Some(c) = RELATIVE_RE.captures(reference) {
            return Some(ReferenceKind::Relative {
                resource_type: c[1].to_string(),
                id: c[2].to_string(),
            });
        }
        if ABSOLUTE_RE.is_match(reference) && url::Url::parse(reference).is_ok() {
            return Some(ReferenceKind::Absolute(reference.to_string()));
        }
        None
    }
}

/// Resources of one bundle addressable by `fullUrl` or `Type/id`.
#[derive(Debug, Default)]
pub struct BundleIndex {
    full_urls: HashMap<String, String>,
    type_ids: HashSet<(String, String)>,
}

impl BundleIndex {
    pub fn from_resources(resources: &[ModelResource<'_>]) -> Self {
        let mut index = Self::default();
        for resource in resources {
            // The bundle itself is not a reference target.
            if resource.entry_index.is_none() && resource.resource_type == "Bundle" {
                continue;
            }
            if let Some(full_url) = &resource.full_url {
                index
                    .full_urls
                    .insert(full_url.clone(), resource.resource_type.clone());
            }
            if let Some(id) = resource.id() {
                index
                    .type_ids
                    .insert((resource.resource_type.clone(), id));
            }
        }
        index
    }

    /// Type of the bundle resource `kind` points at. Local references are
    /// never resolved here.
    pub fn resolve(&self, kind: &ReferenceKind) -> Option<String> {
        match kind {
            ReferenceKind::Local(_) => None,
            ReferenceKind::Urn(url) | ReferenceKind::Absolute(url) => {
                self.full_urls.get(url).cloned()
            }
            ReferenceKind::Relative { resource_type, id } => {
                if self
                    .type_ids
                    .contains(&(resource_type.clone(), id.clone()))
                {
                    return Some(resource_type.clone());
                }
                let suffix = format!("/{resource_type}/{id}");
                self.full_urls
                    .iter()
                    .find(|(url, _)| url.ends_with(&suffix))
                    .map(|(_, t)| t.clone())
            }
        }
    }
}

/// `(id, resourceType)` of each contained resource.
pub fn contained_resources(resource: &dyn ModelElement) -> Vec<(String, String)> {
    let Some(contained) = resource.child("contained") else {
        return Vec::new();
    };
    contained
        .items()
        .into_iter()
        .filter_map(|inner| {
            let id = match inner.child("id")? {
                FieldValue::Single(id) => id.primitive_text()?,
                FieldValue::Repeated(_) => return None,
            };
            let resource_type = match inner.child("resourceType")? {
                FieldValue::Single(t) => t.primitive_text()?,
                FieldValue::Repeated(_) => return None,
            };
            Some((id, resource_type))
        })
        .collect()
}
