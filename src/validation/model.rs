//! The element view shared by the typed-model and raw-tree rule paths.
//!
//! A typed object model built by a compliance collaborator and the raw
//! `serde_json::Value` tree both implement [`ModelElement`]. Repeated fields
//! must be exposed in document order so that element indices match the array
//! indices of the literal input; rule pointers are built from them.

use serde_json::Value as JsonValue;

/// The value of one field of an element.
pub enum FieldValue<'a> {
    Single(&'a dyn ModelElement),
    /// Array field, in document order.
    Repeated(Vec<&'a dyn ModelElement>),
}

impl<'a> FieldValue<'a> {
    pub fn items(&self) -> Vec<&'a dyn ModelElement> {
        match self {
            FieldValue::Single(element) => vec![*element],
            FieldValue::Repeated(items) => items.clone(),
        }
    }
}

pub trait ModelElement: Send + Sync {
    fn child(&self, name: &str) -> Option<FieldValue<'_>>;

    /// Names of the fields present on this element, in document order.
    fn field_names(&self) -> Vec<String>;

    /// The JSON value of a primitive element; `None` for complex elements.
    fn primitive(&self) -> Option<JsonValue>;

    fn to_json(&self) -> JsonValue;

    /// String form of a primitive (`true`, `12.5`, `final`).
    fn primitive_text(&self) -> Option<String> {
        match self.primitive()? {
            JsonValue::String(s) => Some(s),
            JsonValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// `""`, `null`, `{}` and `[]` carry no value.
    fn is_empty_value(&self) -> bool {
        is_empty_json(&self.to_json())
    }
}

pub fn is_empty_json(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl ModelElement for JsonValue {
    fn child(&self, name: &str) -> Option<FieldValue<'_>> {
        match self.as_object()?.get(name)? {
            JsonValue::Array(items) => Some(FieldValue::Repeated(
                items.iter().map(|item| item as &dyn ModelElement).collect(),
            )),
            value => Some(FieldValue::Single(value)),
        }
    }

    fn field_names(&self) -> Vec<String> {
        self.as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn primitive(&self) -> Option<JsonValue> {
        match self {
            JsonValue::Object(_) | JsonValue::Array(_) => None,
            value => Some(value.clone()),
        }
    }

    fn to_json(&self) -> JsonValue {
        self.clone()
    }
}

/// One resource the rule engine evaluates.
pub struct ModelResource<'a> {
    /// `Bundle.entry` index; `None` for the root resource.
    pub entry_index: Option<usize>,
    pub resource_type: String,
    pub full_url: Option<String>,
    pub resource: &'a dyn ModelElement,
}

impl ModelResource<'_> {
    pub fn id(&self) -> Option<String> {
        match self.resource.child("id")? {
            FieldValue::Single(id) => id.primitive_text(),
            FieldValue::Repeated(_) => None,
        }
    }
}

/// A bundle's resources, as the rule engine sees them.
///
/// For a `Bundle` root this is the bundle itself followed by every entry
/// resource in entry order; for any other root it is that single resource.
pub trait TypedBundle: Send + Sync + std::fmt::Debug {
    fn resources(&self) -> Vec<ModelResource<'_>>;
}

/// The raw-tree view of a parsed input.
#[derive(Debug, Clone, Copy)]
pub struct RawBundle<'a> {
    root: &'a JsonValue,
}

impl<'a> RawBundle<'a> {
    pub fn new(root: &'a JsonValue) -> Self {
        Self { root }
    }
}

impl TypedBundle for RawBundle<'_> {
    fn resources(&self) -> Vec<ModelResource<'_>> {
        let Some(root_type) = self.root.get("resourceType").and_then(JsonValue::as_str) else {
            return Vec::new();
        };

        let mut resources = vec![ModelResource {
            entry_index: None,
            resource_type: root_type.to_string(),
            full_url: None,
            resource: self.root,
        }];
        if root_type != "Bundle" {
            return resources;
        }

        let entries = self
            .root
            .get("entry")
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (index, entry) in entries.iter().enumerate() {
            let Some(resource) = entry.get("resource") else {
                continue;
            };
            let Some(resource_type) = resource.get("resourceType").and_then(JsonValue::as_str)
            else {
                continue;
            };
            resources.push(ModelResource {
                entry_index: Some(index),
                resource_type: resource_type.to_string(),
                full_url: entry
                    .get("fullUrl")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
                resource,
            });
        }
        resources
    }
}
