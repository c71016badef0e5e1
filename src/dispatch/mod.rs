//! Dispatch runtime: the decisions rewritten code delegates to.
//!
//! Every rewritten entry point asks for a [`Plan`] before running, every intercepted call
//! site hands its arguments over instead of calling its target, and every constructor
//! fills the instance's dispatch slot. All of those calls go through the namespace's
//! [`DispatchContext`] to the [`DispatchRuntime`] bound to it.
//!
//! # Architecture
//!
//! ```text
//! rewritten class ──$$shadow$context──► DispatchContext ──► DispatchRuntime
//!                                            │                 (ShadowDispatcher)
//!                                            │                   ├─ ShadowMap
//!                                            ▼                   ├─ SubstituteCatalog
//!                                      CallSiteTable             └─ Interceptors
//!                                  (linked sites + memo)
//! ```
//!
//! # Key Components
//!
//! - [`DispatchRuntime`] / [`ShadowDispatcher`] - plan selection, interception, cleaning
//! - [`DispatchContext`] - per-namespace binding and the hook entry points
//! - [`Plan`], [`Resolution`] - per-call decision and its cacheable half
//! - [`CallSiteTable`] - linked call sites and their memoized resolutions
//! - [`Interceptors`] - handlers for intercepted call sites
//! - [`Value`], [`Instance`], [`Throwable`] - what crosses the boundary
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use shadowbox::{
//!     dispatch::{
//!         DispatchContext, Instance, Interceptors, MethodSignature, ShadowDispatcher, Value,
//!     },
//!     shadow::{FnSubstitute, MemoryCatalog, ShadowInfo, ShadowMap, Substitute},
//! };
//!
//! let catalog = MemoryCatalog::new().with_instances("WidgetShadow", |_| {
//!     Arc::new(
//!         FnSubstitute::new("WidgetShadow").method("size", "()I", |_, _, _| Ok(Value::Int(7))),
//!     ) as Arc<dyn Substitute>
//! });
//! let map = ShadowMap::builder().add(ShadowInfo::new("pkg.a.Widget", "WidgetShadow")).build();
//!
//! let context = DispatchContext::new("example");
//! context.bind(Arc::new(ShadowDispatcher::new(map, Arc::new(catalog), Interceptors::new())))?;
//!
//! let widget = Instance::new("pkg/a/Widget", vec!["java/lang/Object".to_string()]);
//! context.initializing(&widget)?;
//!
//! let size = MethodSignature::new("pkg/a/Widget", "size", "()I");
//! let value = context.invoke(&size, false, Some(&widget), &[], |_| Ok(Value::Int(1)))?;
//! assert_eq!(value, Value::Int(7));
//! # Ok::<(), shadowbox::Error>(())
//! ```

mod context;
mod dispatcher;
mod instance;
pub mod interceptor;
mod linkage;
mod plan;
mod signature;
mod throwable;
mod value;

pub use context::{DispatchContext, DispatchRuntime};
pub use dispatcher::ShadowDispatcher;
pub use instance::{Instance, Slot};
pub use interceptor::{
    FnInterceptor, InterceptedCall, Interceptor, Interceptors, NoOpInterceptor,
    SystemLogInterceptor, SystemTimeInterceptor, VirtualClock,
};
pub use linkage::{CallSite, CallSiteKind, CallSiteTable};
pub use plan::{BoundSubstitute, Plan, Resolution};
pub use signature::{MethodSignature, CONSTRUCTOR_NAME, STATIC_INITIALIZER_NAME};
pub use throwable::{
    clean_stack_trace, strip_alias, StackFrame, Throwable, DISPATCH_FRAME_PREFIXES, SHADOW_PREFIX,
};
pub use value::Value;
