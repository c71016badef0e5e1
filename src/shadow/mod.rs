//! Shadow map and substitute catalog.
//!
//! A [`ShadowMap`] says which target types have a substitute ("shadow") and how calls
//! without a substitute implementation behave. The substitutes themselves come from a
//! [`SubstituteCatalog`] supplied by the embedder.
//!
//! # Key Components
//!
//! - [`ShadowInfo`] - target type, substitute type, call-through flag
//! - [`ShadowMap`] / [`ShadowMapBuilder`] - versioned immutable snapshots and diffing
//! - [`Substitute`], [`SubstituteCatalog`] - collaborator traits
//! - [`FnSubstitute`], [`MemoryCatalog`] - closure-based implementations

mod catalog;
mod map;

pub use catalog::{
    FnSubstitute, InstanceFactory, MemoryCatalog, Substitute, SubstituteCatalog, SubstituteFn,
};
pub use map::{ShadowMap, ShadowMapBuilder};

use crate::classfile::internal_name;

/// How one target type is shadowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShadowInfo {
    /// Internal name of the shadowed type
    pub target: String,
    /// Name of the substitute type, as known to the catalog
    pub substitute: String,
    /// Whether methods the substitute does not implement run the original code (`true`)
    /// or do nothing (`false`)
    pub call_through_by_default: bool,
}

impl ShadowInfo {
    /// Shadows `target` (binary or internal name) with `substitute`, calling through by
    /// default.
    #[must_use]
    pub fn new(target: &str, substitute: &str) -> ShadowInfo {
        ShadowInfo {
            target: internal_name(target),
            substitute: substitute.to_string(),
            call_through_by_default: true,
        }
    }

    /// Sets the call-through flag.
    #[must_use]
    pub fn call_through_by_default(mut self, call_through: bool) -> ShadowInfo {
        self.call_through_by_default = call_through;
        self
    }
}
