use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How strictly a field's value must come from its value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    /// Code MUST be from the value set
    Required,
    /// Code SHOULD be from the value set, but others allowed with text
    Extensible,
    /// Code SHOULD be from the value set for interoperability
    Preferred,
    /// Value set is just an example
    Example,
}

impl BindingStrength {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "required" => Some(BindingStrength::Required),
            "extensible" => Some(BindingStrength::Extensible),
            "preferred" => Some(BindingStrength::Preferred),
            "example" => Some(BindingStrength::Example),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStrength::Required => "required",
            BindingStrength::Extensible => "extensible",
            BindingStrength::Preferred => "preferred",
            BindingStrength::Example => "example",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cardinality {
    pub min: u32,
    /// `None` means unbounded (`*`).
    pub max: Option<u32>,
}

impl Cardinality {
    pub const OPTIONAL: Cardinality = Cardinality {
        min: 0,
        max: Some(1),
    };

    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    /// Parses FHIR-style `max` (`"1"`, `"*"`).
    pub fn parse(min: u32, max: &str) -> Option<Self> {
        match max {
            "*" => Some(Self::new(min, None)),
            n => n.parse().ok().map(|m| Self::new(min, Some(m))),
        }
    }

    /// Whether the JSON representation is an array.
    pub fn is_repeating(&self) -> bool {
        self.max.is_none_or(|m| m > 1)
    }

    pub fn is_required(&self) -> bool {
        self.min > 0
    }

    pub fn allows(&self, count: usize) -> bool {
        count >= self.min as usize && self.max.is_none_or(|m| count <= m as usize)
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..*", self.min),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementBinding {
    pub strength: BindingStrength,
    pub value_set: Option<String>,
    /// Codes of the expanded value set. Empty for open/unexpanded sets.
    pub codes: Vec<String>,
}

impl ElementBinding {
    pub fn is_closed(&self) -> bool {
        !self.codes.is_empty()
    }
}

/// One element of a resource or datatype definition.
///
/// Built by a schema provider and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNode {
    /// Full element path, e.g. `Patient.contact.gender`.
    pub path: String,
    /// Element name as it appears in the definition (`gender`, `value[x]`).
    pub name: String,
    pub type_name: String,
    pub cardinality: Cardinality,
    pub children: BTreeMap<String, Arc<SchemaNode>>,
    /// Allowed type codes for a choice element.
    pub choices: Vec<String>,
    pub binding: Option<ElementBinding>,
    /// Multi-line text is expected (`Annotation.text`, `Narrative.div`).
    pub long_text: bool,
    /// Base definition for resource and datatype roots.
    pub base: Option<String>,
}

impl SchemaNode {
    pub fn new(path: impl Into<String>, type_name: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('.').next().unwrap_or(&path).to_string();
        Self {
            path,
            name,
            type_name: type_name.into(),
            cardinality: Cardinality::OPTIONAL,
            children: BTreeMap::new(),
            choices: Vec::new(),
            binding: None,
            long_text: false,
            base: None,
        }
    }

    pub fn with_cardinality(mut self, min: u32, max: Option<u32>) -> Self {
        self.cardinality = Cardinality::new(min, max);
        self
    }

    pub fn with_child(mut self, child: SchemaNode) -> Self {
        self.children.insert(child.name.clone(), Arc::new(child));
        self
    }

    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_binding(mut self, binding: ElementBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_long_text(mut self, long_text: bool) -> Self {
        self.long_text = long_text;
        self
    }

    pub fn is_choice(&self) -> bool {
        self.name.ends_with("[x]")
    }

    /// `value` for `value[x]`.
    pub fn choice_prefix(&self) -> Option<&str> {
        self.name.strip_suffix("[x]")
    }

    pub fn is_primitive(&self) -> bool {
        is_primitive_type(&self.type_name)
    }

    pub fn child(&self, name: &str) -> Option<&Arc<SchemaNode>> {
        self.children.get(name)
    }

    pub fn binding_strength(&self) -> Option<BindingStrength> {
        self.binding.as_ref().map(|b| b.strength)
    }

    pub fn value_set(&self) -> Option<&str> {
        self.binding.as_ref().and_then(|b| b.value_set.as_deref())
    }

    /// Finds the choice child that `key` is a typed variant of, returning the
    /// node and the type code (`valueQuantity` -> (`value[x]`, `Quantity`)).
    pub fn choice_for_key(&self, key: &str) -> Option<(&Arc<SchemaNode>, String)> {
        self.children.values().find_map(|child| {
            let prefix = child.choice_prefix()?;
            let suffix = key.strip_prefix(prefix)?;
            let first = suffix.chars().next()?;
            if !first.is_ascii_uppercase() {
                return None;
            }
            Some((child, choice_type_code(suffix, &child.choices)))
        })
    }
}

/// Maps a key suffix (`String`, `DateTime`) back to a type code, preferring
/// the declared spelling (`string`, `dateTime`).
fn choice_type_code(suffix: &str, choices: &[String]) -> String {
    choices
        .iter()
        .find(|c| c.eq_ignore_ascii_case(suffix))
        .cloned()
        .unwrap_or_else(|| suffix.to_string())
}

pub const FHIR_PRIMITIVE_TYPES: &[&str] = &[
    "boolean",
    "integer",
    "integer64",
    "string",
    "decimal",
    "uri",
    "url",
    "canonical",
    "base64Binary",
    "instant",
    "date",
    "dateTime",
    "time",
    "code",
    "oid",
    "id",
    "markdown",
    "unsignedInt",
    "positiveInt",
    "uuid",
    "xhtml",
];

pub fn is_primitive_type(type_name: &str) -> bool {
    FHIR_PRIMITIVE_TYPES.contains(&type_name)
}
