//! Names of the members and runtime types that rewritten classes refer to.

use crate::dispatch::SHADOW_PREFIX;

/// Marker interface implemented by every instrumented class.
pub const MARKER: &str = "org/shadowbox/internal/Shadowed";

/// Static entry points of the dispatch runtime.
pub const HOOKS: &str = "org/shadowbox/internal/Hooks";

/// Type of the per-class context handle.
pub const CONTEXT_TYPE: &str = "org/shadowbox/internal/DispatchContext";

/// Descriptor of the per-class context handle.
pub const CONTEXT_DESCRIPTOR: &str = "Lorg/shadowbox/internal/DispatchContext;";

/// Interface of the plans returned by the entry hooks.
pub const PLAN_TYPE: &str = "org/shadowbox/internal/Plan";

/// Instance field holding the dispatch slot.
pub const SHADOW_DATA_FIELD: &str = "$$shadow$data";

/// Static field holding the namespace's context.
pub const CONTEXT_FIELD: &str = "$$shadow$context";

/// Fills the dispatch slot if it is still empty.
pub const INIT_METHOD: &str = "$$shadow$init";

/// Returns the dispatch slot.
pub const GET_DATA_METHOD: &str = "$$shadow$getData";

pub(crate) const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";

pub(crate) const METHOD_INVOKED: (&str, &str) = (
    "methodInvoked",
    "(Ljava/lang/String;ZLjava/lang/Class;Ljava/lang/Object;Lorg/shadowbox/internal/DispatchContext;)Lorg/shadowbox/internal/Plan;",
);

pub(crate) const LINKED_METHOD_INVOKED: (&str, &str) = (
    "linkedMethodInvoked",
    "(ILjava/lang/Object;Lorg/shadowbox/internal/DispatchContext;)Lorg/shadowbox/internal/Plan;",
);

pub(crate) const INTERCEPT: (&str, &str) = (
    "intercept",
    "(Ljava/lang/String;Ljava/lang/Object;[Ljava/lang/Object;Ljava/lang/Class;Lorg/shadowbox/internal/DispatchContext;)Ljava/lang/Object;",
);

pub(crate) const LINKED_INTERCEPT: (&str, &str) = (
    "linkedIntercept",
    "(Ljava/lang/Object;[Ljava/lang/Object;ILorg/shadowbox/internal/DispatchContext;)Ljava/lang/Object;",
);

pub(crate) const INITIALIZING: (&str, &str) = (
    "initializing",
    "(Ljava/lang/Object;Lorg/shadowbox/internal/DispatchContext;)Ljava/lang/Object;",
);

pub(crate) const CLASS_INITIALIZING: (&str, &str) = (
    "classInitializing",
    "(Ljava/lang/Class;Lorg/shadowbox/internal/DispatchContext;)V",
);

pub(crate) const CLEAN_STACK_TRACE: (&str, &str) = (
    "cleanStackTrace",
    "(Ljava/lang/Throwable;Lorg/shadowbox/internal/DispatchContext;)Ljava/lang/Throwable;",
);

pub(crate) const PLAN_RUN: (&str, &str) = (
    "run",
    "(Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;",
);

/// Name of the private alias holding the original body of `method` declared on `class`
/// (internal name): `$$shadow$$pkg_a_Outer_Inner$method`.
#[must_use]
pub fn alias_name(class: &str, method: &str) -> String {
    let class: String = class
        .chars()
        .map(|c| if c == '/' || c == '$' { '_' } else { c })
        .collect();
    format!("{SHADOW_PREFIX}{class}${method}")
}
