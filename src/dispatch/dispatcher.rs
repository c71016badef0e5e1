use std::{
    collections::BTreeSet,
    fmt,
    sync::{Arc, RwLock},
};

use dashmap::DashSet;
use tracing::{debug, info};

use crate::{
    classfile::binary_name,
    dispatch::{
        BoundSubstitute, DispatchRuntime, Instance, Interceptors, MethodSignature, Plan,
        Resolution, Slot, Value,
    },
    shadow::{ShadowMap, Substitute, SubstituteCatalog},
    Error, Result,
};

/// The standard [`DispatchRuntime`]: plans come from a [`ShadowMap`] and a
/// [`SubstituteCatalog`], intercepted calls go to an [`Interceptors`] registry.
///
/// # Plan selection
///
/// 1. The declaring type has no [`crate::shadow::ShadowInfo`]: run the original.
/// 2. Static methods use the catalog's static substitute of the declaring type;
///    instance methods use the substitute in the receiver's dispatch slot, rebuilt
///    first if the receiver's mapping changed since the slot was filled.
/// 3. The substitute implements the method: run it. Otherwise run the original when the
///    info calls through by default, and do nothing when it does not.
pub struct ShadowDispatcher {
    map: RwLock<ShadowMap>,
    catalog: Arc<dyn SubstituteCatalog>,
    interceptors: Interceptors,
    initialized: DashSet<String>,
}

impl ShadowDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        map: ShadowMap,
        catalog: Arc<dyn SubstituteCatalog>,
        interceptors: Interceptors,
    ) -> ShadowDispatcher {
        ShadowDispatcher {
            map: RwLock::new(map),
            catalog,
            interceptors,
            initialized: DashSet::new(),
        }
    }

    /// The current shadow map.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the map lock is poisoned.
    pub fn shadow_map(&self) -> Result<ShadowMap> {
        let map = self.map.read().map_err(|_| Error::LockError)?;
        Ok(map.clone())
    }

    /// The interceptor registry.
    #[must_use]
    pub fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    /// Internal names of the classes whose static initializer has started, sorted.
    #[must_use]
    pub fn initialized_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.initialized.iter().map(|c| c.key().clone()).collect();
        classes.sort();
        classes
    }

    fn slot_substitute(&self, instance: &Instance) -> Result<Option<Arc<dyn Substitute>>> {
        let map = self.shadow_map()?;
        let Some(slot) = instance.slot()? else {
            let slot = self.build_slot(&map, instance)?;
            return Ok(instance.init_slot(slot)?.substitute);
        };
        if slot.version == map.version() {
            return Ok(slot.substitute);
        }

        let current = map.shadow_for_ancestry(instance.ancestry());
        let slot = if current == slot.info.as_ref() {
            Slot {
                version: map.version(),
                ..slot
            }
        } else {
            debug!(%instance, "mapping changed, rebuilding slot");
            self.build_slot(&map, instance)?
        };
        instance.replace_slot(slot.clone())?;
        Ok(slot.substitute)
    }

    fn build_slot(&self, map: &ShadowMap, instance: &Instance) -> Result<Slot> {
        let info = map.shadow_for_ancestry(instance.ancestry()).cloned();
        let substitute = match &info {
            Some(info) => self.catalog.instantiate(info, instance)?,
            None => None,
        };
        Ok(Slot {
            substitute,
            info,
            version: map.version(),
        })
    }
}

impl DispatchRuntime for ShadowDispatcher {
    fn initializing(&self, instance: &Instance) -> Result<Slot> {
        let map = self.shadow_map()?;
        self.build_slot(&map, instance)
    }

    fn resolve(
        &self,
        signature: &MethodSignature,
        _is_static: bool,
        declaring_type: &str,
    ) -> Result<Resolution> {
        let map = self.map.read().map_err(|_| Error::LockError)?;
        Ok(match map.get(declaring_type) {
            Some(info) => Resolution::Shadowed(info.clone()),
            None => {
                debug!(%signature, "not shadowed");
                Resolution::Original
            }
        })
    }

    fn bind(
        &self,
        resolution: &Resolution,
        signature: &MethodSignature,
        instance: Option<&Instance>,
    ) -> Result<Plan> {
        let Resolution::Shadowed(info) = resolution else {
            return Ok(Plan::RunOriginal);
        };

        let substitute = match instance {
            Some(instance) => self.slot_substitute(instance)?,
            None => self.catalog.statics(info)?,
        };

        match substitute {
            Some(substitute) if substitute.implements(signature) => Ok(Plan::RunSubstitute(
                BoundSubstitute::new(substitute, instance.cloned()),
            )),
            _ if info.call_through_by_default => Ok(Plan::RunOriginal),
            _ => Ok(Plan::NoOp),
        }
    }

    fn class_initializing(&self, class_name: &str) -> Result<()> {
        debug!(class = %binary_name(class_name), "static initializer");
        self.initialized.insert(class_name.to_string());
        Ok(())
    }

    fn intercept(
        &self,
        signature: &MethodSignature,
        instance: &Value,
        args: &[Value],
        caller: &str,
    ) -> Result<Value> {
        self.interceptors.handle(signature, instance, args, caller)
    }

    fn replace_shadow_map(&self, new_map: ShadowMap) -> Result<BTreeSet<String>> {
        let mut map = self.map.write().map_err(|_| Error::LockError)?;
        let invalidated = new_map.diff(&map);
        info!(
            version = new_map.version(),
            invalidated = invalidated.len(),
            "shadow map replaced"
        );
        *map = new_map;
        Ok(invalidated)
    }
}

impl fmt::Debug for ShadowDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowDispatcher")
            .field("map", &self.map)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}
