//! # shadowbox Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the shadowbox library. Import it to get the types needed to set up a sandbox,
//! describe substitutions and drive dispatch in one line.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all shadowbox operations
pub use crate::Error;

/// The result type used throughout shadowbox
pub use crate::Result;

// ================================================================================================
// Policy
// ================================================================================================

/// Acquisition, instrumentation, translation and interception decisions
pub use crate::policy::{ClassDescriptor, MethodRef, Policy, PolicyBuilder};

// ================================================================================================
// Sandboxes and Loading
// ================================================================================================

/// Namespaces and their configuration
pub use crate::sandbox::{DefinedClass, IsolatedLoader, Sandbox, SandboxConfig, SystemNamespace};

/// Sources of original class bytes
pub use crate::sandbox::{ByteSupplier, CompositeSupplier, DirectorySupplier, MemorySupplier};

// ================================================================================================
// Rewriting
// ================================================================================================

/// Class rewriting and call-site strategies
pub use crate::transform::{ClassIndex, ClassTransformer, Strategy, Transformed};

// ================================================================================================
// Dispatch
// ================================================================================================

/// The runtime rewritten code calls into
pub use crate::dispatch::{DispatchContext, DispatchRuntime, ShadowDispatcher};

/// Values crossing the dispatch boundary
pub use crate::dispatch::{Instance, MethodSignature, Plan, Throwable, Value};

/// Interception of selected call sites
pub use crate::dispatch::{
    FnInterceptor, Interceptor, Interceptors, NoOpInterceptor, SystemTimeInterceptor,
    VirtualClock,
};

// ================================================================================================
// Shadows
// ================================================================================================

/// Shadow maps and the substitute catalog
pub use crate::shadow::{
    FnSubstitute, MemoryCatalog, ShadowInfo, ShadowMap, Substitute, SubstituteCatalog,
};

// ================================================================================================
// Class Files
// ================================================================================================

/// Class-file model
pub use crate::classfile::{ClassFile, FieldInfo, MethodInfo, ReadDepth};
