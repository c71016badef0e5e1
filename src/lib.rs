// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # shadowbox
//!
//! Load-time rewriting of compiled JVM classes, so that test code can transparently
//! replace the behaviour of unmodified platform classes with substitute ("shadow")
//! implementations.
//!
//! A [`sandbox::Sandbox`] acquires classes according to a [`policy::Policy`], rewrites
//! their method bodies with a [`transform::ClassTransformer`] and defines the result in a
//! private namespace. Every rewritten entry point asks the namespace's
//! [`dispatch::DispatchContext`] for a [`dispatch::Plan`] first: run the original body,
//! run a substitute, or do nothing. Which substitute applies is decided by the active
//! [`shadow::ShadowMap`], which can be replaced at any time without touching classes
//! that are already defined.
//!
//! ## Features
//!
//! - **Policy driven** - acquisition, instrumentation, name translation and call
//!   interception are all decided by one immutable policy value
//! - **Two call-site strategies** - fixed signatures, or dynamically linked ids with
//!   memoized resolutions invalidated per type
//! - **Faithful exceptions** - throwables leaving dispatch keep their type and message,
//!   only dispatch frames are removed from their stack traces
//! - **Self-contained class files** - constant pool, descriptors and bytecode are read
//!   and written by the crate itself
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shadowbox::prelude::*;
//! use std::sync::Arc;
//!
//! let system = Arc::new(SystemNamespace::new(Arc::new(DirectorySupplier::new("classes")?)));
//! let policy = Policy::builder().instrument_package("pkg.a.").build();
//! let sandbox = Sandbox::new(policy.clone(), system, SandboxConfig::portable());
//!
//! let map = ShadowMap::builder()
//!     .add(ShadowInfo::new("pkg.a.Widget", "WidgetShadow"))
//!     .build();
//! let runtime = ShadowDispatcher::new(map, Arc::new(MemoryCatalog::new()), Interceptors::new());
//! sandbox.configure(Arc::new(runtime), policy)?;
//!
//! let widget = sandbox.acquire("pkg.a.Widget")?;
//! assert!(widget.is_instrumented());
//! # Ok::<(), shadowbox::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`classfile`] / [`assembly`] - class-file model and symbolic bytecode
//! - [`policy`] - which classes are acquired, instrumented, translated, intercepted
//! - [`transform`] - the class rewriter and its call-site strategies
//! - [`dispatch`] - the runtime rewritten code calls into
//! - [`shadow`] - versioned shadow maps and the substitute catalog traits
//! - [`sandbox`] - namespaces, byte suppliers and configuration
//!
//! ## Logging
//!
//! The crate emits [`tracing`](https://docs.rs/tracing) events and spans; install any
//! subscriber to see class definitions, configuration and shadow-map replacements.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use shadowbox::prelude::*;
///
/// let policy = Policy::builder().instrument_package("pkg.a.").build();
/// assert!(policy.should_acquire("pkg.a.Widget"));
/// ```
pub mod prelude;

pub mod assembly;
pub mod classfile;
pub mod dispatch;
pub mod policy;
pub mod sandbox;
pub mod shadow;
pub mod transform;

/// `shadowbox` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `shadowbox` Error type
///
/// Every fallible operation of the crate returns this enum; see its variants for when each
/// is raised.
pub use error::Error;

/// Cursor over a byte slice, used by the class-file reader and the bytecode decoder.
pub use file::parser::Parser;

/// Decides what a sandbox acquires, rewrites and intercepts.
pub use policy::{Policy, PolicyBuilder};

/// Entry point of class rewriting.
pub use transform::{ClassTransformer, Strategy, Transformed};

/// An isolated namespace and its configuration.
pub use sandbox::{Sandbox, SandboxConfig};
