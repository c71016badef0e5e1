use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use crate::{
    shadow::{ShadowInfo, Substitute},
    Error, Result,
};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Contents of an instance's dispatch slot (`$$shadow$data`).
///
/// `info` is the mapping the substitute was built from and `version` the shadow-map
/// version it was last checked against. After a replacement the slot is rebuilt only if
/// the instance's mapping changed; otherwise the substitute and its state are kept.
#[derive(Clone)]
pub struct Slot {
    /// The instance-scoped substitute, `None` when the instance's class has no shadowed
    /// ancestor
    pub substitute: Option<Arc<dyn Substitute>>,
    /// The mapping of the most specific shadowed ancestor, `None` when there is none
    pub info: Option<ShadowInfo>,
    /// Shadow-map version the slot was last validated against
    pub version: u64,
}

impl Slot {
    /// A slot without substitute, validated against `version`.
    #[must_use]
    pub fn empty(version: u64) -> Slot {
        Slot {
            substitute: None,
            info: None,
            version,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("substitute", &self.substitute.is_some())
            .field("info", &self.info)
            .field("version", &self.version)
            .finish()
    }
}

struct InstanceInner {
    id: u64,
    class_name: String,
    ancestors: Vec<String>,
    slot: RwLock<Option<Slot>>,
}

/// Handle to an object of a sandboxed class.
///
/// Clones share the same object; equality is identity. The handle records the class and
/// its superclass chain as defined in the namespace that created it, and owns the
/// per-instance dispatch slot.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

impl Instance {
    /// Creates an object of `class_name` whose superclasses, nearest first, are
    /// `ancestors`. The slot starts empty.
    #[must_use]
    pub fn new(class_name: &str, ancestors: Vec<String>) -> Instance {
        Instance {
            inner: Arc::new(InstanceInner {
                id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
                class_name: class_name.to_string(),
                ancestors,
                slot: RwLock::new(None),
            }),
        }
    }

    /// Process-unique identity of the object.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Internal name of the object's class.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    /// The class followed by its superclasses, nearest first.
    pub fn ancestry(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.inner.class_name.as_str())
            .chain(self.inner.ancestors.iter().map(String::as_str))
    }

    /// Returns `true` if the object's class is `class` or extends it.
    #[must_use]
    pub fn is_instance_of(&self, class: &str) -> bool {
        self.ancestry().any(|name| name == class)
    }

    /// A copy of the dispatch slot, `None` until the init hook has run.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the slot lock is poisoned.
    pub fn slot(&self) -> Result<Option<Slot>> {
        let slot = self.inner.slot.read().map_err(|_| Error::LockError)?;
        Ok(slot.clone())
    }

    /// Stores `slot` unless another thread filled the slot first; returns the slot
    /// content after the call.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the slot lock is poisoned.
    pub fn init_slot(&self, slot: Slot) -> Result<Slot> {
        let mut current = self.inner.slot.write().map_err(|_| Error::LockError)?;
        Ok(current.get_or_insert(slot).clone())
    }

    /// Replaces the slot content unconditionally.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the slot lock is poisoned.
    pub fn replace_slot(&self, slot: Slot) -> Result<()> {
        let mut current = self.inner.slot.write().map_err(|_| Error::LockError)?;
        *current = Some(slot);
        Ok(())
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Instance {}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.inner.id)
            .field("class_name", &self.inner.class_name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x}", self.inner.class_name.replace('/', "."), self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_and_ancestry() {
        let a = Instance::new("pkg/a/Widget", vec!["java/lang/Object".to_string()]);
        let b = Instance::new("pkg/a/Widget", vec!["java/lang/Object".to_string()]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.is_instance_of("java/lang/Object"));
        assert!(!a.is_instance_of("pkg/a/Other"));
        assert_eq!(
            a.ancestry().collect::<Vec<_>>(),
            vec!["pkg/a/Widget", "java/lang/Object"]
        );
    }

    #[test]
    fn test_slot_first_init_wins() {
        let a = Instance::new("pkg/a/Widget", Vec::new());
        assert!(a.slot().unwrap().is_none());

        let first = a.init_slot(Slot::empty(1)).unwrap();
        let second = a.init_slot(Slot::empty(2)).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 1);

        a.replace_slot(Slot::empty(3)).unwrap();
        assert_eq!(a.slot().unwrap().unwrap().version, 3);
    }
}
