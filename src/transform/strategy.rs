//! How rewritten code reaches the dispatch runtime.
//!
//! The entry of every rewritten method and every intercepted call site ends in a call to
//! `org/shadowbox/internal/Hooks`. The two strategies differ only in what that call
//! carries: [`FixedCallSites`] passes the full signature and looks the plan up on every
//! call, [`LinkedCallSites`] passes an integer call-site id whose resolution the runtime
//! memoizes in the namespace's [`CallSiteTable`](crate::dispatch::CallSiteTable).

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use strum::{Display, EnumIter, EnumString};

use crate::{
    assembly::{
        opcodes::{DUP_X2, GETSTATIC, INVOKESTATIC, POP},
        MethodGenerator,
    },
    dispatch::{CallSite, CallSiteKind, MethodSignature},
    transform::names::{
        CONTEXT_DESCRIPTOR, CONTEXT_FIELD, HOOKS, INTERCEPT, LINKED_INTERCEPT,
        LINKED_METHOD_INVOKED, METHOD_INVOKED,
    },
};

/// Selects a [`CallSiteStrategy`].
///
/// ```rust
/// use shadowbox::transform::Strategy;
///
/// let strategy: Strategy = "dynamically-linked".parse().unwrap();
/// assert_eq!(strategy, Strategy::DynamicallyLinked);
/// assert_eq!(Strategy::default().to_string(), "fixed-call-site");
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Strategy {
    /// Every call looks its plan up by signature
    #[default]
    FixedCallSite,
    /// Every call site carries an id whose resolution is memoized
    DynamicallyLinked,
}

impl Strategy {
    /// The emitter for this strategy.
    #[must_use]
    pub fn call_sites(self) -> &'static dyn CallSiteStrategy {
        match self {
            Strategy::FixedCallSite => &FixedCallSites,
            Strategy::DynamicallyLinked => &LinkedCallSites,
        }
    }
}

/// Collects the call sites emitted while rewriting one class.
///
/// Ids come from the namespace-wide counter, so they are unique across every class the
/// namespace defines.
#[derive(Debug)]
pub struct CallSites<'a> {
    ids: &'a AtomicU32,
    sites: Vec<CallSite>,
}

impl<'a> CallSites<'a> {
    /// An empty collection drawing ids from `ids`.
    #[must_use]
    pub fn new(ids: &'a AtomicU32) -> CallSites<'a> {
        CallSites {
            ids,
            sites: Vec::new(),
        }
    }

    fn record(&mut self, kind: CallSiteKind) -> u32 {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        self.sites.push(CallSite { id, kind });
        id
    }

    /// Records an entry site and returns its id.
    pub fn entry(&mut self, signature: &MethodSignature, is_static: bool) -> u32 {
        self.record(CallSiteKind::Entry {
            signature: signature.clone(),
            is_static,
        })
    }

    /// Records an intercepted call and returns its id.
    pub fn intercept(&mut self, signature: &MethodSignature, caller: &str) -> u32 {
        self.record(CallSiteKind::Intercept {
            signature: signature.clone(),
            caller: caller.to_string(),
        })
    }

    /// Number of recorded sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// The recorded sites, in emission order.
    #[must_use]
    pub fn into_sites(self) -> Vec<CallSite> {
        self.sites
    }
}

/// Emits the hook calls of rewritten code.
pub trait CallSiteStrategy: fmt::Debug + Send + Sync {
    /// Which strategy this is.
    fn strategy(&self) -> Strategy;

    /// Emits the plan lookup at the entry of a rewritten method; leaves the `Plan` (or
    /// `null`) on the stack.
    ///
    /// The generator must belong to the rewritten method, `signature.owner` is the class
    /// being rewritten.
    fn emit_plan_lookup(
        &self,
        gen: &mut MethodGenerator,
        signature: &MethodSignature,
        sites: &mut CallSites<'_>,
    );

    /// Emits the replacement of an intercepted call. Expects the receiver (or `null`) and
    /// the packed `Object[]` of arguments on the stack; leaves the `Object` result.
    fn emit_intercept(
        &self,
        gen: &mut MethodGenerator,
        target: &MethodSignature,
        caller: &str,
        sites: &mut CallSites<'_>,
    );
}

fn load_context(gen: &mut MethodGenerator, class: &str) {
    gen.field(GETSTATIC, class, CONTEXT_FIELD, CONTEXT_DESCRIPTOR);
}

/// Passes signatures; the runtime looks the plan up on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCallSites;

impl CallSiteStrategy for FixedCallSites {
    fn strategy(&self) -> Strategy {
        Strategy::FixedCallSite
    }

    fn emit_plan_lookup(
        &self,
        gen: &mut MethodGenerator,
        signature: &MethodSignature,
        _sites: &mut CallSites<'_>,
    ) {
        gen.push_string(&signature.to_string());
        gen.push_int(i32::from(gen.is_static()));
        gen.push_class(&signature.owner);
        gen.load_this_or_null();
        load_context(gen, &signature.owner);
        gen.invoke(INVOKESTATIC, HOOKS, METHOD_INVOKED.0, METHOD_INVOKED.1);
    }

    fn emit_intercept(
        &self,
        gen: &mut MethodGenerator,
        target: &MethodSignature,
        caller: &str,
        _sites: &mut CallSites<'_>,
    ) {
        // receiver, args -> signature, receiver, args
        gen.push_string(&target.to_string());
        gen.op(DUP_X2);
        gen.op(POP);
        gen.push_class(caller);
        load_context(gen, caller);
        gen.invoke(INVOKESTATIC, HOOKS, INTERCEPT.0, INTERCEPT.1);
    }
}

/// Passes call-site ids; the runtime memoizes each site's resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedCallSites;

impl CallSiteStrategy for LinkedCallSites {
    fn strategy(&self) -> Strategy {
        Strategy::DynamicallyLinked
    }

    fn emit_plan_lookup(
        &self,
        gen: &mut MethodGenerator,
        signature: &MethodSignature,
        sites: &mut CallSites<'_>,
    ) {
        let id = sites.entry(signature, gen.is_static());
        gen.push_int(id as i32);
        gen.load_this_or_null();
        load_context(gen, &signature.owner);
        gen.invoke(
            INVOKESTATIC,
            HOOKS,
            LINKED_METHOD_INVOKED.0,
            LINKED_METHOD_INVOKED.1,
        );
    }

    fn emit_intercept(
        &self,
        gen: &mut MethodGenerator,
        target: &MethodSignature,
        caller: &str,
        sites: &mut CallSites<'_>,
    ) {
        let id = sites.intercept(target, caller);
        gen.push_int(id as i32);
        load_context(gen, caller);
        gen.invoke(INVOKESTATIC, HOOKS, LINKED_INTERCEPT.0, LINKED_INTERCEPT.1);
    }
}
