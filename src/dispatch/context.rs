use std::{
    collections::BTreeSet,
    fmt,
    sync::{Arc, RwLock},
};

use tracing::info;

use crate::{
    dispatch::{
        clean_stack_trace, CallSiteKind, CallSiteTable, Instance, MethodSignature, Plan,
        Resolution, Slot, Throwable, Value,
    },
    shadow::ShadowMap,
    Error, Result,
};

/// The decisions rewritten code delegates to at run time.
///
/// A runtime is bound to a namespace through its [`DispatchContext`]; every hook a
/// rewritten class calls reaches the runtime through that context.
pub trait DispatchRuntime: Send + Sync {
    /// Produces the dispatch slot of a freshly constructed `instance`.
    ///
    /// # Errors
    /// Returns an error if the instance's substitute cannot be created.
    fn initializing(&self, instance: &Instance) -> Result<Slot>;

    /// Resolves the receiver-independent half of a plan for a method of
    /// `declaring_type`.
    ///
    /// # Errors
    /// Returns an error if the shadow map cannot be read.
    fn resolve(
        &self,
        signature: &MethodSignature,
        is_static: bool,
        declaring_type: &str,
    ) -> Result<Resolution>;

    /// Completes `resolution` into a plan for one call on `instance` (`None` for static
    /// methods).
    ///
    /// # Errors
    /// Returns an error if the substitute cannot be created.
    fn bind(
        &self,
        resolution: &Resolution,
        signature: &MethodSignature,
        instance: Option<&Instance>,
    ) -> Result<Plan>;

    /// Decides what one call of `signature` does.
    ///
    /// # Errors
    /// Propagates errors of [`DispatchRuntime::resolve`] and [`DispatchRuntime::bind`].
    fn method_invoked(
        &self,
        signature: &MethodSignature,
        is_static: bool,
        declaring_type: &str,
        instance: Option<&Instance>,
    ) -> Result<Plan> {
        let resolution = self.resolve(signature, is_static, declaring_type)?;
        self.bind(&resolution, signature, instance)
    }

    /// Notification that `class_name` runs its static initializer.
    ///
    /// # Errors
    /// Returns an error if the notification cannot be recorded.
    fn class_initializing(&self, class_name: &str) -> Result<()>;

    /// Produces the result of an intercepted call.
    ///
    /// # Errors
    /// Returns [`Error::Thrown`] for throwables raised in place of the call, including a
    /// `java.lang.UnsupportedOperationException` when no handler is registered.
    fn intercept(
        &self,
        signature: &MethodSignature,
        instance: &Value,
        args: &[Value],
        caller: &str,
    ) -> Result<Value>;

    /// Removes dispatch frames from a throwable leaving dispatch.
    fn clean_stack_trace(&self, throwable: Throwable) -> Throwable {
        clean_stack_trace(throwable)
    }

    /// Swaps in a new shadow map and returns the target types whose mapping changed.
    ///
    /// # Errors
    /// Returns an error if the map cannot be replaced.
    fn replace_shadow_map(&self, map: ShadowMap) -> Result<BTreeSet<String>>;
}

/// The dispatch handle of one namespace.
///
/// Rewritten classes reach the dispatch runtime exclusively through this context (the
/// `$$shadow$context` field). It holds the runtime binding and the namespace's call-site
/// table, and its methods are the Rust side of every `org/shadowbox/internal/Hooks` entry
/// point.
pub struct DispatchContext {
    namespace: String,
    runtime: RwLock<Option<Arc<dyn DispatchRuntime>>>,
    call_sites: Arc<CallSiteTable>,
}

impl DispatchContext {
    /// An unbound context for `namespace`.
    #[must_use]
    pub fn new(namespace: &str) -> DispatchContext {
        DispatchContext {
            namespace: namespace.to_string(),
            runtime: RwLock::new(None),
            call_sites: Arc::new(CallSiteTable::new()),
        }
    }

    /// Name of the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The namespace's call-site table.
    #[must_use]
    pub fn call_sites(&self) -> &Arc<CallSiteTable> {
        &self.call_sites
    }

    /// Binds `runtime`, replacing any previous binding.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the binding lock is poisoned.
    pub fn bind(&self, runtime: Arc<dyn DispatchRuntime>) -> Result<()> {
        let mut binding = self.runtime.write().map_err(|_| Error::LockError)?;
        *binding = Some(runtime);
        info!(namespace = %self.namespace, "dispatch runtime bound");
        Ok(())
    }

    /// Removes the binding.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the binding lock is poisoned.
    pub fn unbind(&self) -> Result<()> {
        let mut binding = self.runtime.write().map_err(|_| Error::LockError)?;
        *binding = None;
        Ok(())
    }

    /// Returns `true` if a runtime is bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.runtime.read().is_ok_and(|binding| binding.is_some())
    }

    /// The bound runtime.
    ///
    /// # Errors
    /// Returns [`Error::NotConfigured`] if nothing is bound.
    pub fn runtime(&self) -> Result<Arc<dyn DispatchRuntime>> {
        let binding = self.runtime.read().map_err(|_| Error::LockError)?;
        binding
            .clone()
            .ok_or_else(|| Error::NotConfigured(self.namespace.clone()))
    }

    /// `$$shadow$init`: fills the dispatch slot of `instance` unless it is already set.
    ///
    /// # Errors
    /// Returns [`Error::NotConfigured`] if nothing is bound, or the runtime's error.
    pub fn initializing(&self, instance: &Instance) -> Result<()> {
        if instance.slot()?.is_some() {
            return Ok(());
        }
        let slot = self.runtime()?.initializing(instance)?;
        instance.init_slot(slot)?;
        Ok(())
    }

    /// `Hooks.classInitializing`.
    ///
    /// # Errors
    /// Returns [`Error::NotConfigured`] if nothing is bound, or the runtime's error.
    pub fn class_initializing(&self, class_name: &str) -> Result<()> {
        self.runtime()?.class_initializing(class_name)
    }

    /// `Hooks.methodInvoked`: the plan for one call through a fixed call site.
    ///
    /// # Errors
    /// Returns [`Error::NotConfigured`] if nothing is bound, or the runtime's error.
    pub fn method_invoked(
        &self,
        signature: &MethodSignature,
        is_static: bool,
        instance: Option<&Instance>,
    ) -> Result<Plan> {
        self.runtime()?
            .method_invoked(signature, is_static, &signature.owner, instance)
    }

    /// `Hooks.linkedMethodInvoked`: the plan for one call through linked entry site `id`,
    /// reusing the site's memoized resolution.
    ///
    /// # Errors
    /// Returns [`Error::NotConfigured`] if nothing is bound, [`Error::Error`] if `id` is
    /// not a registered entry site, or the runtime's error.
    pub fn linked_method_invoked(&self, id: u32, instance: Option<&Instance>) -> Result<Plan> {
        let (signature, is_static) = self.entry_site(id)?;
        let runtime = self.runtime()?;
        let resolution = self
            .call_sites
            .resolve(id, || runtime.resolve(&signature, is_static, &signature.owner))?;
        runtime.bind(&resolution, &signature, instance)
    }

    /// `Hooks.intercept`.
    ///
    /// # Errors
    /// Returns [`Error::NotConfigured`] if nothing is bound, or the runtime's error with
    /// throwables already cleaned.
    pub fn intercept(
        &self,
        signature: &MethodSignature,
        instance: &Value,
        args: &[Value],
        caller: &str,
    ) -> Result<Value> {
        let runtime = self.runtime()?;
        runtime
            .intercept(signature, instance, args, caller)
            .map_err(|e| clean_error(runtime.as_ref(), e))
    }

    /// `Hooks.linkedIntercept`: an intercepted call through linked site `id`.
    ///
    /// # Errors
    /// As [`DispatchContext::intercept`], plus [`Error::Error`] if `id` is not a registered
    /// intercept site.
    pub fn linked_intercept(&self, instance: &Value, args: &[Value], id: u32) -> Result<Value> {
        let site = self
            .call_sites
            .site(id)
            .ok_or_else(|| Error::Error(format!("Unknown call site {id}")))?;
        match site.kind {
            CallSiteKind::Intercept { signature, caller } => {
                self.intercept(&signature, instance, args, &caller)
            }
            CallSiteKind::Entry { .. } => Err(Error::Error(format!(
                "Call site {id} is an entry point, not an intercepted call"
            ))),
        }
    }

    /// `Hooks.cleanStackTrace`.
    ///
    /// # Errors
    /// Returns [`Error::NotConfigured`] if nothing is bound.
    pub fn clean_stack_trace(&self, throwable: Throwable) -> Result<Throwable> {
        Ok(self.runtime()?.clean_stack_trace(throwable))
    }

    /// Runs a call the way a rewritten entry point does.
    ///
    /// Looks the plan up once, then runs the substitute, `original` (the direct alias) or
    /// nothing. Throwables leaving either body are cleaned of dispatch frames, and the
    /// result is narrowed to the method's return type.
    ///
    /// # Errors
    /// Returns [`Error::Thrown`] for throwables raised by the call, or the error of the
    /// plan lookup.
    pub fn invoke<F>(
        &self,
        signature: &MethodSignature,
        is_static: bool,
        instance: Option<&Instance>,
        args: &[Value],
        original: F,
    ) -> Result<Value>
    where
        F: FnOnce(&[Value]) -> Result<Value>,
    {
        let plan = self.method_invoked(signature, is_static, instance)?;
        self.run_plan(&plan, signature, args, original)
    }

    /// [`DispatchContext::invoke`] for linked entry site `id`.
    ///
    /// # Errors
    /// As [`DispatchContext::invoke`] and [`DispatchContext::linked_method_invoked`].
    pub fn invoke_linked<F>(
        &self,
        id: u32,
        instance: Option<&Instance>,
        args: &[Value],
        original: F,
    ) -> Result<Value>
    where
        F: FnOnce(&[Value]) -> Result<Value>,
    {
        let (signature, _) = self.entry_site(id)?;
        let plan = self.linked_method_invoked(id, instance)?;
        self.run_plan(&plan, &signature, args, original)
    }

    fn run_plan<F>(
        &self,
        plan: &Plan,
        signature: &MethodSignature,
        args: &[Value],
        original: F,
    ) -> Result<Value>
    where
        F: FnOnce(&[Value]) -> Result<Value>,
    {
        let ret = signature.return_type()?;
        match plan.run(signature, args, original) {
            Ok(value) => Ok(value.narrow(&ret)?),
            Err(e) => {
                let runtime = self.runtime()?;
                Err(clean_error(runtime.as_ref(), e))
            }
        }
    }

    fn entry_site(&self, id: u32) -> Result<(MethodSignature, bool)> {
        match self.call_sites.site(id).map(|site| site.kind) {
            Some(CallSiteKind::Entry {
                signature,
                is_static,
            }) => Ok((signature, is_static)),
            Some(CallSiteKind::Intercept { .. }) => Err(Error::Error(format!(
                "Call site {id} is an intercepted call, not an entry point"
            ))),
            None => Err(Error::Error(format!("Unknown call site {id}"))),
        }
    }
}

fn clean_error(runtime: &dyn DispatchRuntime, error: Error) -> Error {
    match error {
        Error::Thrown(throwable) => Error::Thrown(runtime.clean_stack_trace(throwable)),
        other => other,
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("namespace", &self.namespace)
            .field("bound", &self.is_bound())
            .field("call_sites", &self.call_sites.len())
            .finish()
    }
}
