use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use dashmap::DashMap;

use crate::{
    dispatch::{MethodSignature, Resolution},
    Result,
};

/// What a dynamically linked call site stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSiteKind {
    /// The dispatch entry of a rewritten method
    Entry {
        /// The method being entered
        signature: MethodSignature,
        /// Whether the method is static
        is_static: bool,
    },
    /// An intercepted call inside a rewritten method body
    Intercept {
        /// The method the call targeted
        signature: MethodSignature,
        /// Internal name of the class containing the call
        caller: String,
    },
}

/// A call site emitted by the dynamically linked strategy.
///
/// Generated code only carries the `id`; everything else is recorded here when the class
/// is defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Namespace-unique id
    pub id: u32,
    /// What the site stands for
    pub kind: CallSiteKind,
}

impl CallSite {
    /// The method the site refers to.
    #[must_use]
    pub fn signature(&self) -> &MethodSignature {
        match &self.kind {
            CallSiteKind::Entry { signature, .. } | CallSiteKind::Intercept { signature, .. } => {
                signature
            }
        }
    }

    /// Internal name of the type whose shadow mapping decides this site.
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        &self.signature().owner
    }
}

/// Call sites of one namespace and the memo of their resolutions.
///
/// Ids are drawn from a counter shared with the namespace's transformer, so every site
/// emitted into any class of the namespace is unique. Resolutions are memoized on first
/// use and stay valid until [`CallSiteTable::invalidate`] names their declaring type.
#[derive(Debug, Default)]
pub struct CallSiteTable {
    ids: Arc<AtomicU32>,
    sites: DashMap<u32, CallSite>,
    memo: DashMap<u32, Resolution>,
}

impl CallSiteTable {
    /// An empty table whose ids start at zero.
    #[must_use]
    pub fn new() -> CallSiteTable {
        CallSiteTable::default()
    }

    /// The id counter to hand to the namespace's transformer.
    #[must_use]
    pub fn id_source(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.ids)
    }

    /// Draws a fresh id.
    #[must_use]
    pub fn next_id(&self) -> u32 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Records the call sites of a newly defined class.
    pub fn register(&self, sites: impl IntoIterator<Item = CallSite>) {
        for site in sites {
            self.sites.insert(site.id, site);
        }
    }

    /// The site with `id`.
    #[must_use]
    pub fn site(&self, id: u32) -> Option<CallSite> {
        self.sites.get(&id).map(|site| site.value().clone())
    }

    /// The memoized resolution of site `id`, computing and storing it with `resolve` on a
    /// miss.
    ///
    /// # Errors
    /// Propagates the error of `resolve`; nothing is memoized in that case.
    pub fn resolve<F>(&self, id: u32, resolve: F) -> Result<Resolution>
    where
        F: FnOnce() -> Result<Resolution>,
    {
        if let Some(resolution) = self.memo.get(&id) {
            return Ok(resolution.value().clone());
        }
        let resolution = resolve()?;
        self.memo.insert(id, resolution.clone());
        Ok(resolution)
    }

    /// Returns `true` if site `id` has a memoized resolution.
    #[must_use]
    pub fn is_memoized(&self, id: u32) -> bool {
        self.memo.contains_key(&id)
    }

    /// Drops the memoized resolutions of every site declared on one of `types`; returns
    /// how many were dropped.
    pub fn invalidate(&self, types: &BTreeSet<String>) -> usize {
        if types.is_empty() {
            return 0;
        }
        let before = self.memo.len();
        self.memo.retain(|id, _| {
            self.sites
                .get(id)
                .map_or(true, |site| !types.contains(site.declaring_type()))
        });
        before - self.memo.len()
    }

    /// Drops every site and memoized resolution. Ids keep counting up.
    pub fn clear(&self) {
        self.memo.clear();
        self.sites.clear();
    }

    /// Number of registered sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Returns `true` if no site is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Number of memoized resolutions.
    #[must_use]
    pub fn memoized(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::ShadowInfo;

    fn entry(id: u32, owner: &str) -> CallSite {
        CallSite {
            id,
            kind: CallSiteKind::Entry {
                signature: MethodSignature::new(owner, "size", "()I"),
                is_static: false,
            },
        }
    }

    #[test]
    fn test_resolve_memoizes() {
        let table = CallSiteTable::new();
        table.register([entry(0, "pkg/a/Widget")]);

        let mut calls = 0;
        for _ in 0..3 {
            let resolution = table
                .resolve(0, || {
                    calls += 1;
                    Ok(Resolution::Original)
                })
                .unwrap();
            assert_eq!(resolution, Resolution::Original);
        }
        assert_eq!(calls, 1);
        assert!(table.is_memoized(0));
    }

    #[test]
    fn test_invalidate_by_declaring_type() {
        let table = CallSiteTable::new();
        table.register([entry(0, "pkg/a/Widget"), entry(1, "pkg/a/Gadget")]);
        let shadowed = Resolution::Shadowed(ShadowInfo::new("pkg/a/Widget", "s.Widget"));
        table.resolve(0, || Ok(shadowed.clone())).unwrap();
        table.resolve(1, || Ok(Resolution::Original)).unwrap();

        let dropped = table.invalidate(&BTreeSet::from(["pkg/a/Widget".to_string()]));
        assert_eq!(dropped, 1);
        assert!(!table.is_memoized(0));
        assert!(table.is_memoized(1));
        assert_eq!(table.invalidate(&BTreeSet::new()), 0);
    }

    #[test]
    fn test_ids_are_shared_with_transformer() {
        let table = CallSiteTable::new();
        let ids = table.id_source();
        assert_eq!(ids.fetch_add(5, Ordering::Relaxed), 0);
        assert_eq!(table.next_id(), 5);
        table.clear();
        assert_eq!(table.next_id(), 6);
    }
}
