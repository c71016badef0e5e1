//! Isolated namespaces for running code against shadowed platform classes.
//!
//! A [`Sandbox`] owns one [`IsolatedLoader`] (its private namespace), the
//! [`DispatchContext`] rewritten classes of that namespace call into, and through the
//! bound [`DispatchRuntime`] the active shadow map. Several sandboxes may share one
//! [`SystemNamespace`], which defines the classes none of them acquires.
//!
//! ```text
//!                 SystemNamespace ── ByteSupplier
//!                  ▲            ▲
//!   Sandbox "a" ───┘            └─── Sandbox "b"
//!    ├─ IsolatedLoader ── ClassTransformer
//!    └─ DispatchContext ── ShadowDispatcher ── ShadowMap
//! ```
//!
//! # Key Components
//!
//! - [`Sandbox`] - acquisition, configuration, shadow-map replacement, instances
//! - [`IsolatedLoader`] / [`SystemNamespace`] - namespaces and [`DefinedClass`]es
//! - [`ByteSupplier`] - [`MemorySupplier`], [`DirectorySupplier`], [`CompositeSupplier`]
//! - [`SandboxConfig`] - strategy, dump directory and namespace name
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shadowbox::{
//!     dispatch::{Interceptors, ShadowDispatcher},
//!     policy::Policy,
//!     sandbox::{DirectorySupplier, Sandbox, SandboxConfig, SystemNamespace},
//!     shadow::{MemoryCatalog, ShadowInfo, ShadowMap},
//! };
//!
//! let system = Arc::new(SystemNamespace::new(Arc::new(DirectorySupplier::new("classes")?)));
//! let policy = Policy::builder().instrument_package("pkg.a.").build();
//! let sandbox = Sandbox::new(policy.clone(), system, SandboxConfig::from_env());
//!
//! let map = ShadowMap::builder().add(ShadowInfo::new("pkg.a.Widget", "WidgetShadow")).build();
//! let runtime = ShadowDispatcher::new(map, Arc::new(MemoryCatalog::new()), Interceptors::new());
//! sandbox.configure(Arc::new(runtime), policy)?;
//!
//! let widget = sandbox.instantiate("pkg.a.Widget")?;
//! println!("{widget}");
//! # Ok::<(), shadowbox::Error>(())
//! ```

mod config;
mod loader;
mod namespace;
mod supplier;

pub use config::{SandboxConfig, DUMP_DIR_ENV, STRATEGY_ENV};
pub use loader::IsolatedLoader;
pub use namespace::{DefinedClass, SystemNamespace, SYSTEM_NAMESPACE};
pub use supplier::{ByteSupplier, CompositeSupplier, DirectorySupplier, MemorySupplier};

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tracing::info;

use crate::{
    dispatch::{DispatchContext, DispatchRuntime, Instance},
    policy::Policy,
    shadow::ShadowMap,
    transform::Strategy,
    Result,
};

static NEXT_SANDBOX: AtomicU64 = AtomicU64::new(0);

/// One isolated test execution environment.
pub struct Sandbox {
    loader: IsolatedLoader,
    config: SandboxConfig,
}

impl Sandbox {
    /// A sandbox rewriting classes under `policy`, delegating the rest to `system`.
    #[must_use]
    pub fn new(policy: Policy, system: Arc<SystemNamespace>, config: SandboxConfig) -> Sandbox {
        let namespace = config.namespace.clone().unwrap_or_else(|| {
            format!("sandbox-{}", NEXT_SANDBOX.fetch_add(1, Ordering::Relaxed))
        });
        let loader = IsolatedLoader::new(
            &namespace,
            policy,
            config.strategy,
            system,
            config.dump_dir.clone(),
        );
        Sandbox { loader, config }
    }

    /// Name of the private namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        self.loader.name()
    }

    /// The settings the sandbox was created with.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The call-site strategy of rewritten classes.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    /// The private namespace.
    #[must_use]
    pub fn loader(&self) -> &IsolatedLoader {
        &self.loader
    }

    /// The dispatch context of the namespace.
    #[must_use]
    pub fn context(&self) -> &Arc<DispatchContext> {
        self.loader.context()
    }

    /// The current policy.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the policy lock is poisoned.
    pub fn policy(&self) -> Result<Policy> {
        self.loader.policy()
    }

    /// Loads `binary_name`; see [`IsolatedLoader::acquire`].
    ///
    /// # Errors
    /// Returns the loader's error.
    pub fn acquire(&self, binary_name: &str) -> Result<Arc<DefinedClass>> {
        self.loader.acquire(binary_name)
    }

    /// Loads several classes in parallel; see [`IsolatedLoader::acquire_all`].
    ///
    /// # Errors
    /// Returns the first error any class failed with.
    pub fn acquire_all(&self, binary_names: &[&str]) -> Result<Vec<Arc<DefinedClass>>> {
        self.loader.acquire_all(binary_names)
    }

    /// Binds `runtime` to the namespace and sets the policy.
    ///
    /// Must happen before rewritten code runs. Once classes are defined the policy can no
    /// longer change; passing an equal one is fine.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] for a policy change after classes were defined and
    /// [`crate::Error::LockError`] if a lock is poisoned.
    pub fn configure(&self, runtime: Arc<dyn DispatchRuntime>, policy: Policy) -> Result<()> {
        self.loader.set_policy(policy)?;
        self.context().bind(runtime)?;
        info!(
            namespace = %self.name(),
            strategy = %self.config.strategy,
            defined = self.loader.len(),
            "sandbox configured"
        );
        Ok(())
    }

    /// Swaps in `map` and drops the linked resolutions of every type whose mapping
    /// changed. Returns those types (internal names).
    ///
    /// # Errors
    /// Returns [`crate::Error::NotConfigured`] if no runtime is bound.
    pub fn replace_shadow_map(&self, map: ShadowMap) -> Result<BTreeSet<String>> {
        let version = map.version();
        let invalidated = self.context().runtime()?.replace_shadow_map(map)?;
        let dropped = self.context().call_sites().invalidate(&invalidated);
        info!(
            namespace = %self.name(),
            version,
            types = invalidated.len(),
            dropped,
            "shadow map replaced"
        );
        Ok(invalidated)
    }

    /// Creates an object of `binary_name`, acquiring the class first.
    ///
    /// The handle records the class's superclasses as the namespace sees them. For an
    /// instrumented class the dispatch slot is filled the way its constructor would.
    ///
    /// # Errors
    /// Returns acquisition errors, [`crate::Error::NotFound`] for an ancestor without
    /// bytes, and [`crate::Error::NotConfigured`] when an instrumented class is created
    /// before [`Sandbox::configure`].
    pub fn instantiate(&self, binary_name: &str) -> Result<Instance> {
        let class = self.acquire(binary_name)?;
        let internal = class.internal_name();
        let ancestors = self.loader.index().superclasses(&internal)?;
        let instance = Instance::new(&internal, ancestors);
        if class.is_instrumented() {
            self.context().initializing(&instance)?;
        }
        Ok(instance)
    }

    /// Clears the namespace, the linked call sites and the runtime binding. The policy
    /// and configuration stay.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the binding lock is poisoned.
    pub fn reset(&self) -> Result<()> {
        self.loader.clear();
        self.context().unbind()?;
        info!(namespace = %self.name(), "sandbox reset");
        Ok(())
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("loader", &self.loader)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatch::{Interceptors, MethodSignature, Plan, ShadowDispatcher, Value},
        shadow::{FnSubstitute, MemoryCatalog, ShadowInfo, Substitute},
        test::{class_map, widget_class, ClassBuilder},
        Error,
    };

    fn system() -> Arc<SystemNamespace> {
        let gadget = ClassBuilder::new("pkg/a/Gadget")
            .extends("pkg/a/Widget")
            .default_constructor()
            .build();
        Arc::new(SystemNamespace::new(Arc::new(MemorySupplier::new(class_map(vec![
            ("pkg.a.Widget", widget_class()),
            ("pkg.a.Gadget", gadget),
        ])))))
    }

    fn policy() -> Policy {
        Policy::builder().instrument_package("pkg.a.").build()
    }

    fn catalog() -> Arc<MemoryCatalog> {
        Arc::new(
            MemoryCatalog::new()
                .with_instances("SevenShadow", |_| {
                    Arc::new(FnSubstitute::new("SevenShadow").method("size", "()I", |_, _, _| {
                        Ok(Value::Int(7))
                    })) as Arc<dyn Substitute>
                })
                .with_instances("NineShadow", |_| {
                    Arc::new(FnSubstitute::new("NineShadow").method("size", "()I", |_, _, _| {
                        Ok(Value::Int(9))
                    })) as Arc<dyn Substitute>
                }),
        )
    }

    fn configured(config: SandboxConfig) -> Sandbox {
        let sandbox = Sandbox::new(policy(), system(), config);
        let map = ShadowMap::builder()
            .add(ShadowInfo::new("pkg.a.Widget", "SevenShadow"))
            .build();
        let runtime = ShadowDispatcher::new(map, catalog(), Interceptors::new());
        sandbox.configure(Arc::new(runtime), policy()).unwrap();
        sandbox
    }

    fn size(sandbox: &Sandbox, instance: &Instance) -> Value {
        let signature = MethodSignature::new("pkg/a/Widget", "size", "()I");
        sandbox
            .context()
            .invoke(&signature, false, Some(instance), &[], |_| Ok(Value::Int(1)))
            .unwrap()
    }

    #[test]
    fn test_instantiate_subclass_uses_ancestor_shadow() {
        let sandbox = configured(SandboxConfig::portable());
        let gadget = sandbox.instantiate("pkg.a.Gadget").unwrap();
        assert_eq!(gadget.class_name(), "pkg/a/Gadget");
        assert!(gadget.is_instance_of("pkg/a/Widget"));
        assert!(gadget.slot().unwrap().is_some());
        assert_eq!(size(&sandbox, &gadget), Value::Int(7));
    }

    #[test]
    fn test_instantiate_before_configure_fails() {
        let sandbox = Sandbox::new(policy(), system(), SandboxConfig::portable());
        assert!(matches!(
            sandbox.instantiate("pkg.a.Widget"),
            Err(Error::NotConfigured(_))
        ));
    }

    #[test]
    fn test_replace_is_seen_by_both_strategies() {
        for config in [SandboxConfig::portable(), SandboxConfig::linked()] {
            let sandbox = configured(config);
            let widget = sandbox.instantiate("pkg.a.Widget").unwrap();
            assert_eq!(size(&sandbox, &widget), Value::Int(7));

            let map = ShadowMap::builder()
                .add(ShadowInfo::new("pkg.a.Widget", "NineShadow"))
                .build();
            let invalidated = sandbox.replace_shadow_map(map).unwrap();
            assert_eq!(invalidated.into_iter().collect::<Vec<_>>(), vec!["pkg/a/Widget"]);
            assert_eq!(size(&sandbox, &widget), Value::Int(9));
        }
    }

    #[test]
    fn test_replace_drops_linked_memo_for_changed_types() {
        let sandbox = configured(SandboxConfig::linked());
        let widget = sandbox.instantiate("pkg.a.Widget").unwrap();
        let table = Arc::clone(sandbox.context().call_sites());
        let entry = (0..table.next_id())
            .find(|id| {
                table
                    .site(*id)
                    .is_some_and(|site| site.signature().name == "size")
            })
            .unwrap();

        let plan = sandbox
            .context()
            .linked_method_invoked(entry, Some(&widget))
            .unwrap();
        assert!(matches!(plan, Plan::RunSubstitute(_)));
        assert!(table.is_memoized(entry));

        let unchanged = sandbox
            .replace_shadow_map(
                ShadowMap::builder()
                    .add(ShadowInfo::new("pkg.a.Widget", "SevenShadow"))
                    .build(),
            )
            .unwrap();
        assert!(unchanged.is_empty());
        assert!(table.is_memoized(entry));

        sandbox.replace_shadow_map(ShadowMap::empty()).unwrap();
        assert!(!table.is_memoized(entry));
    }

    #[test]
    fn test_reset_clears_namespace_and_binding() {
        let sandbox = configured(SandboxConfig::linked());
        sandbox.acquire("pkg.a.Widget").unwrap();
        sandbox.reset().unwrap();
        assert!(sandbox.loader().is_empty());
        assert!(sandbox.context().call_sites().is_empty());
        assert!(!sandbox.context().is_bound());
        assert!(sandbox.policy().unwrap() == policy());
    }

    #[test]
    fn test_sandboxes_are_isolated() {
        let system = system();
        let first = Sandbox::new(policy(), Arc::clone(&system), SandboxConfig::portable());
        let second = Sandbox::new(policy(), system, SandboxConfig::portable());
        assert_ne!(first.name(), second.name());

        let a = first.acquire("pkg.a.Widget").unwrap();
        let b = second.acquire("pkg.a.Widget").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.bytes(), b.bytes());
    }
}
