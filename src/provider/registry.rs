//! Process-wide, build-once cache of schema providers per FHIR version, and
//! of the enum indexes derived from them.

use papaya::HashMap as PapayaMap;
use std::sync::{Arc, OnceLock};

use super::{EmbeddedSchemaProvider, SchemaProvider};
use crate::core::FhirVersion;
use crate::error::{BundleValidatorError, Result};
use crate::terminology::{EnumIndex, EnumIndexCache};

type ProviderLoader = dyn Fn(FhirVersion) -> Result<Arc<dyn SchemaProvider>> + Send + Sync;
type ProviderSlot = Arc<OnceLock<std::result::Result<Arc<dyn SchemaProvider>, String>>>;

/// Lazily builds one provider per version and hands out shared references.
///
/// The first caller for a version runs the loader; concurrent callers for the
/// same version block on that single build. Providers live until the entry
/// is invalidated or the process exits. Enum indexes follow their provider:
/// replacing or invalidating a version drops its index too.
pub struct SchemaRegistry {
    slots: PapayaMap<FhirVersion, ProviderSlot>,
    loader: Arc<ProviderLoader>,
    enums: EnumIndexCache,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded: Vec<FhirVersion> = self
            .slots
            .pin()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(version, _)| *version)
            .collect();
        f.debug_struct("SchemaRegistry")
            .field("loaded", &loaded)
            .field("enum_builds", &self.enums.build_count())
            .finish()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Registry backed by the embedded schemas.
    pub fn new() -> Self {
        Self::with_loader(|version| {
            EmbeddedSchemaProvider::load(version).map(|p| Arc::new(p) as Arc<dyn SchemaProvider>)
        })
    }

    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn(FhirVersion) -> Result<Arc<dyn SchemaProvider>> + Send + Sync + 'static,
    {
        Self {
            slots: PapayaMap::new(),
            loader: Arc::new(loader),
            enums: EnumIndexCache::new(),
        }
    }

    /// The registry shared by every pipeline that is not given its own.
    pub fn global() -> &'static SchemaRegistry {
        static GLOBAL: OnceLock<SchemaRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SchemaRegistry::new)
    }

    /// Returns the provider for `version`, building it on first use.
    pub fn provider(&self, version: FhirVersion) -> Result<Arc<dyn SchemaProvider>> {
        let slot = self
            .slots
            .pin()
            .get_or_insert_with(version, || Arc::new(OnceLock::new()))
            .clone();

        let built = slot.get_or_init(|| {
            tracing::info!("Building schema provider for FHIR {}", version);
            (self.loader)(version).map_err(|e| e.to_string())
        });

        built
            .clone()
            .map_err(|message| BundleValidatorError::schema_load(version.to_string(), message))
    }

    /// The enum index built from this registry's provider for `version`.
    pub fn enum_index(&self, version: FhirVersion) -> Result<Arc<EnumIndex>> {
        let provider = self.provider(version)?;
        Ok(self.enums.get_or_build(version, provider.as_ref()))
    }

    /// Number of enum index builds performed for this registry.
    pub fn enum_build_count(&self) -> usize {
        self.enums.build_count()
    }

    /// Installs a pre-built provider, replacing any cached one for its version.
    pub fn register(&self, provider: Arc<dyn SchemaProvider>) {
        let version = provider.version();
        let slot = OnceLock::new();
        let _ = slot.set(Ok(provider));
        self.slots.pin().insert(version, Arc::new(slot));
        self.enums.invalidate(version);
        tracing::debug!("Registered custom schema provider for FHIR {}", version);
    }

    /// Drops the cached provider and its enum index so the next request
    /// rebuilds them.
    pub fn invalidate(&self, version: FhirVersion) -> bool {
        let removed = self.slots.pin().remove(&version).is_some();
        self.enums.invalidate(version);
        if removed {
            tracing::debug!("Invalidated schema provider for FHIR {}", version);
        }
        removed
    }

    pub fn is_loaded(&self, version: FhirVersion) -> bool {
        self.slots
            .pin()
            .get(&version)
            .is_some_and(|slot| matches!(slot.get(), Some(Ok(_))))
    }
}
