//! Caller-supplied code systems.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{BundleValidatorError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSystem {
    pub url: String,
    /// code -> display
    pub codes: BTreeMap<String, Option<String>>,
}

impl CodeSystem {
    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains_key(code)
    }
}

/// Code systems keyed by canonical URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeCatalog {
    systems: BTreeMap<String, CodeSystem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogDocument {
    code_systems: Vec<RawCodeSystem>,
}

#[derive(Deserialize)]
struct RawCodeSystem {
    url: String,
    #[serde(default)]
    codes: Vec<RawCode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCode {
    Bare(String),
    Full {
        code: String,
        #[serde(default)]
        display: Option<String>,
    },
}

impl CodeCatalog {
    /// Parses catalog text of the form
    /// `{"codeSystems": [{"url": "...", "codes": ["a", {"code": "b", "display": "B"}]}]}`.
    /// Blank text is an empty catalog.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let document: CatalogDocument = serde_json::from_str(text)
            .map_err(|e| BundleValidatorError::invalid_catalog(e.to_string()))?;

        let mut catalog = Self::default();
        for raw in document.code_systems {
            if raw.url.trim().is_empty() {
                return Err(BundleValidatorError::invalid_catalog(
                    "code system url must not be empty",
                ));
            }
            let system = catalog
                .systems
                .entry(raw.url.clone())
                .or_insert_with(|| CodeSystem {
                    url: raw.url.clone(),
                    codes: BTreeMap::new(),
                });
            for code in raw.codes {
                let (code, display) = match code {
                    RawCode::Bare(code) => (code, None),
                    RawCode::Full { code, display } => (code, display),
                };
                system.codes.insert(code, display);
            }
        }
        Ok(catalog)
    }

    pub fn with_system(mut self, url: impl Into<String>, codes: &[&str]) -> Self {
        let url = url.into();
        self.systems.insert(
            url.clone(),
            CodeSystem {
                url,
                codes: codes.iter().map(|c| (c.to_string(), None)).collect(),
            },
        );
        self
    }

    pub fn system(&self, url: &str) -> Option<&CodeSystem> {
        self.systems.get(url)
    }

    /// `None` when the system is not in the catalog.
    pub fn contains_code(&self, system: &str, code: &str) -> Option<bool> {
        self.system(system).map(|s| s.contains(code))
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog() {
        let catalog = CodeCatalog::parse(
            r#"{"codeSystems": [
                {"url": "http://example.org/cs/colour", "codes": ["red", {"code": "blue", "display": "Blue"}]},
                {"url": "http://example.org/cs/empty"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.contains_code("http://example.org/cs/colour", "red"), Some(true));
        assert_eq!(catalog.contains_code("http://example.org/cs/colour", "green"), Some(false));
        assert_eq!(catalog.contains_code("http://example.org/cs/other", "red"), None);
        let colour = catalog.system("http://example.org/cs/colour").unwrap();
        assert_eq!(colour.codes["blue"].as_deref(), Some("Blue"));
    }

    #[test]
    fn test_blank_and_invalid_catalogs() {
        assert!(CodeCatalog::parse("").unwrap().is_empty());
        for text in ["[]", "{\"codeSystems\": 3}", "{oops", r#"{"codeSystems": [{"url": " "}]}"#] {
            let err = CodeCatalog::parse(text).unwrap_err();
            assert!(matches!(err, BundleValidatorError::InvalidCatalog { .. }), "{text}");
        }
    }
}
