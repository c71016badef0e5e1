//! Class rewriting.
//!
//! The [`ClassTransformer`] turns the original bytes of an acquired class into the bytes
//! that are actually defined in a sandbox. Two things can happen to a class:
//!
//! - **Translation** - every type reference named in the policy's class-name translations
//!   is replaced, in the constant pool, descriptors and the class header. Applied to every
//!   acquired class.
//! - **Instrumentation** - applied to classes the policy selects. Each method body moves
//!   into a private alias and the original name becomes a delegator that asks the
//!   dispatch runtime for a [`crate::dispatch::Plan`] before falling back to the alias:
//!
//! ```text
//!   size()I                          $$shadow$$pkg_a_Widget$size()I
//!   +-------------------------+      +---------------------------+
//!   | plan = methodInvoked()  |      | original body             |
//!   | plan != null ? plan.run |----->|                           |
//!   |              : alias()  |      +---------------------------+
//!   +-------------------------+
//! ```
//!
//! Constructors are split at their super-constructor call, static initializers become
//! `__staticInitializer__`, calls to intercepted methods are replaced by hook invocations
//! and `equals`, `hashCode` and `toString` are added when the class inherits them.
//!
//! # Key Components
//!
//! - [`ClassTransformer`] / [`Transformed`] - entry point and output
//! - [`Strategy`] - how generated code finds its call sites
//! - [`ClassIndex`] - ancestor summaries for inherited final methods
//! - [`names`] - the member and type names generated code relies on

mod ancestry;
mod constructor;
mod intercept;
mod methods;
pub mod names;
mod strategy;
mod transformer;
mod translate;

pub use ancestry::{ClassIndex, ClassSummary, IndexHierarchy};
pub use names::alias_name;
pub use strategy::{CallSiteStrategy, CallSites, FixedCallSites, LinkedCallSites, Strategy};
pub use transformer::{ClassTransformer, Transformed};

pub(crate) use transformer::Rewrite;
