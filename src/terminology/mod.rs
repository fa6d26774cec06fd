//! Terminology data used during validation: the per-version enum/binding
//! index derived from schema metadata, and caller-supplied code catalogs.

pub mod catalog;
pub mod enum_index;

pub use catalog::{CodeCatalog, CodeSystem};
pub use enum_index::{EnumBinding, EnumIndex, EnumIndexCache, EnumIndexSource, StaticEnumIndex};
