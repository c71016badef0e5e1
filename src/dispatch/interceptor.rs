//! Handlers for intercepted call sites.
//!
//! Calls to methods in the policy's interception set never reach their target: the
//! rewritten call site hands the receiver, the boxed arguments and the caller type to the
//! dispatch runtime, which looks up the [`Interceptor`] registered for the method's
//! [`MethodRef`] and returns whatever it produces.
//!
//! # Built-in interceptors
//!
//! | Interceptor | Methods |
//! |-------------|---------|
//! | [`SystemTimeInterceptor`] | `java/lang/System.nanoTime`, `currentTimeMillis` |
//! | [`NoOpInterceptor`] | `java/lang/System.loadLibrary`, `load` |
//! | [`SystemLogInterceptor`] | `java/lang/System.logE`, `logW` |
//!
//! # Examples
//!
//! ```rust
//! use shadowbox::{
//!     dispatch::{Interceptors, MethodSignature, Value, VirtualClock},
//!     policy::PolicyBuilder,
//! };
//! use std::time::Duration;
//!
//! let clock = VirtualClock::default();
//! let interceptors = Interceptors::standard(clock.clone());
//!
//! // The policy must rewrite the same call sites the registry can handle.
//! let policy = PolicyBuilder::with_defaults()
//!     .intercept_methods(interceptors.method_refs())
//!     .build();
//! assert!(policy.should_intercept("java/lang/System", "nanoTime"));
//!
//! clock.advance(Duration::from_millis(5));
//! let nano_time = MethodSignature::new("java/lang/System", "nanoTime", "()J");
//! let now = interceptors.handle(&nano_time, &Value::Null, &[], "pkg/a/Widget")?;
//! assert_eq!(now, Value::Long(5_000_000));
//! # Ok::<(), shadowbox::Error>(())
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{error, warn};

use crate::{
    dispatch::{MethodSignature, Throwable, Value},
    policy::MethodRef,
    Error, Result,
};

/// One intercepted call, as handed to an [`Interceptor`].
#[derive(Debug, Clone, Copy)]
pub struct InterceptedCall<'a> {
    /// The method the call site targeted
    pub signature: &'a MethodSignature,
    /// The receiver, [`Value::Null`] for static calls
    pub instance: &'a Value,
    /// The boxed arguments, in declaration order
    pub args: &'a [Value],
    /// Internal name of the class containing the call site
    pub caller: &'a str,
}

/// Replacement behaviour for intercepted call sites.
pub trait Interceptor: Send + Sync {
    /// The methods this interceptor handles.
    fn method_refs(&self) -> Vec<MethodRef>;

    /// Produces the result of an intercepted call.
    ///
    /// # Errors
    /// A throwable the replaced call raises is returned as [`Error::Thrown`].
    fn handle(&self, call: &InterceptedCall<'_>) -> Result<Value>;
}

/// Signature of a closure handling intercepted calls.
pub type InterceptorFn = dyn Fn(&InterceptedCall<'_>) -> Result<Value> + Send + Sync;

/// An [`Interceptor`] backed by a closure.
#[derive(Clone)]
pub struct FnInterceptor {
    refs: Vec<MethodRef>,
    handler: Arc<InterceptorFn>,
}

impl FnInterceptor {
    /// Handles `refs` with `handler`.
    pub fn new<F>(refs: Vec<MethodRef>, handler: F) -> FnInterceptor
    where
        F: Fn(&InterceptedCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        FnInterceptor {
            refs,
            handler: Arc::new(handler),
        }
    }
}

impl Interceptor for FnInterceptor {
    fn method_refs(&self) -> Vec<MethodRef> {
        self.refs.clone()
    }

    fn handle(&self, call: &InterceptedCall<'_>) -> Result<Value> {
        (self.handler)(call)
    }
}

impl fmt::Debug for FnInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("refs", &self.refs)
            .finish_non_exhaustive()
    }
}

/// A manually advanced clock shared by everything that reads sandbox time.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    nanos: Arc<AtomicI64>,
}

impl VirtualClock {
    /// A clock starting at `millis` milliseconds.
    #[must_use]
    pub fn starting_at(millis: i64) -> VirtualClock {
        let clock = VirtualClock::default();
        clock.set_millis(millis);
        clock
    }

    /// Current time in nanoseconds.
    #[must_use]
    pub fn nano_time(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }

    /// Current time in milliseconds.
    #[must_use]
    pub fn current_time_millis(&self) -> i64 {
        self.nano_time() / 1_000_000
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let nanos = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Sets the clock to `millis` milliseconds.
    pub fn set_millis(&self, millis: i64) {
        self.nanos
            .store(millis.saturating_mul(1_000_000), Ordering::SeqCst);
    }
}

/// Answers `System.nanoTime()` and `System.currentTimeMillis()` from a [`VirtualClock`].
#[derive(Debug, Clone, Default)]
pub struct SystemTimeInterceptor {
    clock: VirtualClock,
}

impl SystemTimeInterceptor {
    /// Reads time from `clock`.
    #[must_use]
    pub fn new(clock: VirtualClock) -> SystemTimeInterceptor {
        SystemTimeInterceptor { clock }
    }
}

impl Interceptor for SystemTimeInterceptor {
    fn method_refs(&self) -> Vec<MethodRef> {
        vec![
            MethodRef::new("java/lang/System", "nanoTime"),
            MethodRef::new("java/lang/System", "currentTimeMillis"),
        ]
    }

    fn handle(&self, call: &InterceptedCall<'_>) -> Result<Value> {
        match call.signature.name.as_str() {
            "nanoTime" => Ok(Value::Long(self.clock.nano_time())),
            "currentTimeMillis" => Ok(Value::Long(self.clock.current_time_millis())),
            _ => Err(unhandled(call.signature)),
        }
    }
}

/// Swallows calls, returning the default value of the method's return type.
///
/// Used for `System.loadLibrary` and `System.load`: sandboxed code has no native
/// libraries to load.
#[derive(Debug, Clone)]
pub struct NoOpInterceptor {
    refs: Vec<MethodRef>,
}

impl NoOpInterceptor {
    /// Swallows calls to `refs`.
    #[must_use]
    pub fn new(refs: Vec<MethodRef>) -> NoOpInterceptor {
        NoOpInterceptor { refs }
    }

    /// Swallows `System.loadLibrary` and `System.load`.
    #[must_use]
    pub fn native_libraries() -> NoOpInterceptor {
        NoOpInterceptor::new(vec![
            MethodRef::new("java/lang/System", "loadLibrary"),
            MethodRef::new("java/lang/System", "load"),
        ])
    }
}

impl Interceptor for NoOpInterceptor {
    fn method_refs(&self) -> Vec<MethodRef> {
        self.refs.clone()
    }

    fn handle(&self, call: &InterceptedCall<'_>) -> Result<Value> {
        Ok(Value::default_for(&call.signature.return_type()?))
    }
}

/// Forwards the hidden `System.logE`/`System.logW` platform calls to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLogInterceptor;

impl Interceptor for SystemLogInterceptor {
    fn method_refs(&self) -> Vec<MethodRef> {
        vec![
            MethodRef::new("java/lang/System", "logE"),
            MethodRef::new("java/lang/System", "logW"),
        ]
    }

    fn handle(&self, call: &InterceptedCall<'_>) -> Result<Value> {
        let message: String = call.args.iter().map(ToString::to_string).collect();
        match call.signature.name.as_str() {
            "logE" => error!(caller = call.caller, "System.logE: {}", message),
            _ => warn!(caller = call.caller, "System.logW: {}", message),
        }
        Ok(Value::Void)
    }
}

/// Registry of [`Interceptor`]s keyed by [`MethodRef`].
///
/// Lookup prefers an exact `(owner, name)` registration over a wildcard registration for
/// the owner. A later registration for the same reference replaces the earlier one.
#[derive(Clone, Default)]
pub struct Interceptors {
    by_ref: BTreeMap<MethodRef, Arc<dyn Interceptor>>,
}

impl Interceptors {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Interceptors {
        Interceptors::default()
    }

    /// The built-in interceptors, with system time read from `clock`.
    #[must_use]
    pub fn standard(clock: VirtualClock) -> Interceptors {
        Interceptors::new()
            .with(Arc::new(SystemTimeInterceptor::new(clock)))
            .with(Arc::new(NoOpInterceptor::native_libraries()))
            .with(Arc::new(SystemLogInterceptor))
    }

    /// Registers `interceptor` for every reference it reports.
    #[must_use]
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        for method_ref in interceptor.method_refs() {
            self.by_ref.insert(method_ref, Arc::clone(&interceptor));
        }
        self
    }

    /// Every registered reference, for [`crate::policy::PolicyBuilder::intercept_methods`].
    #[must_use]
    pub fn method_refs(&self) -> Vec<MethodRef> {
        self.by_ref.keys().cloned().collect()
    }

    /// The interceptor responsible for `owner.name` (internal owner name).
    #[must_use]
    pub fn find(&self, owner: &str, name: &str) -> Option<&Arc<dyn Interceptor>> {
        self.by_ref
            .get(&MethodRef::new(owner, name))
            .or_else(|| self.by_ref.get(&MethodRef::wildcard(owner)))
    }

    /// Runs the interceptor for an intercepted call.
    ///
    /// # Errors
    /// Returns [`Error::Thrown`] with a `java.lang.UnsupportedOperationException` when no
    /// interceptor is registered, or whatever the interceptor returns.
    pub fn handle(
        &self,
        signature: &MethodSignature,
        instance: &Value,
        args: &[Value],
        caller: &str,
    ) -> Result<Value> {
        let Some(interceptor) = self.find(&signature.owner, &signature.name) else {
            return Err(unhandled(signature));
        };
        interceptor.handle(&InterceptedCall {
            signature,
            instance,
            args,
            caller,
        })
    }

    /// Number of registered references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.by_ref.keys()).finish()
    }
}

fn unhandled(signature: &MethodSignature) -> Error {
    Error::Thrown(Throwable::unsupported_operation(&format!(
        "no interceptor for {signature}"
    )))
}
