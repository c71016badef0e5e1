use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{classfile::internal_name, shadow::ShadowInfo};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Versioned mapping from target type to its [`ShadowInfo`].
///
/// Maps are immutable snapshots. Every built map gets a process-unique version that is
/// higher than the version of any map built before it; replacing a map means building a
/// new one (usually through [`ShadowMap::to_builder`]) and handing it to the sandbox,
/// which invalidates exactly the types reported by [`ShadowMap::diff`].
///
/// ```rust
/// use shadowbox::shadow::{ShadowInfo, ShadowMap};
///
/// let first = ShadowMap::builder()
///     .add(ShadowInfo::new("pkg.a.Widget", "shadows.WidgetShadow"))
///     .build();
/// let second = first
///     .to_builder()
///     .add(ShadowInfo::new("pkg.a.Gadget", "shadows.GadgetShadow"))
///     .build();
///
/// assert!(second.version() > first.version());
/// assert_eq!(second.diff(&first).into_iter().collect::<Vec<_>>(), vec!["pkg/a/Gadget"]);
/// ```
#[derive(Debug, Clone)]
pub struct ShadowMap {
    infos: Arc<BTreeMap<String, ShadowInfo>>,
    version: u64,
}

impl Default for ShadowMap {
    fn default() -> Self {
        ShadowMap::empty()
    }
}

impl ShadowMap {
    /// A map without any substitution.
    #[must_use]
    pub fn empty() -> ShadowMap {
        ShadowMap {
            infos: Arc::new(BTreeMap::new()),
            version: next_version(),
        }
    }

    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> ShadowMapBuilder {
        ShadowMapBuilder::default()
    }

    /// Starts a builder holding this map's entries.
    #[must_use]
    pub fn to_builder(&self) -> ShadowMapBuilder {
        ShadowMapBuilder {
            infos: self.infos.as_ref().clone(),
        }
    }

    /// The map's version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The info registered for `target` (internal or binary name).
    #[must_use]
    pub fn get(&self, target: &str) -> Option<&ShadowInfo> {
        if target.contains('.') {
            self.infos.get(&internal_name(target))
        } else {
            self.infos.get(target)
        }
    }

    /// The info of the most specific shadowed type in `ancestry` (a class followed by its
    /// superclasses, nearest first).
    #[must_use]
    pub fn shadow_for_ancestry<'a>(
        &self,
        ancestry: impl IntoIterator<Item = &'a str>,
    ) -> Option<&ShadowInfo> {
        ancestry.into_iter().find_map(|class| self.infos.get(class))
    }

    /// Target types whose mapping differs between `previous` and this map: added,
    /// removed, or mapped to a different [`ShadowInfo`].
    #[must_use]
    pub fn diff(&self, previous: &ShadowMap) -> BTreeSet<String> {
        if Arc::ptr_eq(&self.infos, &previous.infos) {
            return BTreeSet::new();
        }

        let mut invalidated = BTreeSet::new();
        for (target, info) in self.infos.iter() {
            if previous.infos.get(target) != Some(info) {
                invalidated.insert(target.clone());
            }
        }
        for target in previous.infos.keys() {
            if !self.infos.contains_key(target) {
                invalidated.insert(target.clone());
            }
        }
        invalidated
    }

    /// Number of shadowed types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns `true` if nothing is shadowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Iterates over the infos in target-name order.
    pub fn iter(&self) -> impl Iterator<Item = &ShadowInfo> {
        self.infos.values()
    }
}

/// Collects [`ShadowInfo`]s into a new [`ShadowMap`].
#[derive(Debug, Clone, Default)]
pub struct ShadowMapBuilder {
    infos: BTreeMap<String, ShadowInfo>,
}

impl ShadowMapBuilder {
    /// Adds or replaces the info for its target type.
    #[must_use]
    pub fn add(mut self, info: ShadowInfo) -> Self {
        self.infos.insert(info.target.clone(), info);
        self
    }

    /// Removes the info for `target`.
    #[must_use]
    pub fn remove(mut self, target: &str) -> Self {
        self.infos.remove(&internal_name(target));
        self
    }

    /// Freezes the builder into a map with a fresh version.
    #[must_use]
    pub fn build(self) -> ShadowMap {
        ShadowMap {
            infos: Arc::new(self.infos),
            version: next_version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_increase() {
        let a = ShadowMap::empty();
        let b = a.to_builder().build();
        let c = ShadowMap::builder().build();
        assert!(b.version() > a.version());
        assert!(c.version() > b.version());
    }

    #[test]
    fn test_diff_reports_changed_types_only() {
        let before = ShadowMap::builder()
            .add(ShadowInfo::new("pkg.a.Kept", "s.Kept"))
            .add(ShadowInfo::new("pkg.a.Changed", "s.Changed"))
            .add(ShadowInfo::new("pkg.a.Removed", "s.Removed"))
            .build();
        let after = before
            .to_builder()
            .add(ShadowInfo::new("pkg.a.Changed", "s.Changed").call_through_by_default(false))
            .remove("pkg.a.Removed")
            .add(ShadowInfo::new("pkg.a.Added", "s.Added"))
            .build();

        let diff: Vec<_> = after.diff(&before).into_iter().collect();
        assert_eq!(diff, vec!["pkg/a/Added", "pkg/a/Changed", "pkg/a/Removed"]);
        assert_eq!(after.diff(&before), before.diff(&after));
        assert!(after.diff(&after).is_empty());
        assert!(after.diff(&after.to_builder().build()).is_empty());
    }

    #[test]
    fn test_shadow_for_ancestry_picks_nearest() {
        let map = ShadowMap::builder()
            .add(ShadowInfo::new("pkg/a/Base", "s.Base"))
            .add(ShadowInfo::new("java/lang/Object", "s.Object"))
            .build();
        let info = map
            .shadow_for_ancestry(["pkg/a/Widget", "pkg/a/Base", "java/lang/Object"])
            .unwrap();
        assert_eq!(info.target, "pkg/a/Base");
        assert!(map.shadow_for_ancestry(["pkg/b/Other"]).is_none());
        assert_eq!(map.get("pkg.a.Base"), Some(info));
    }
}
