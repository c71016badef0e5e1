//! Acquisition and instrumentation policy.
//!
//! A [`Policy`] answers the pure questions the loader and the transformer ask about a
//! class, with no I/O and no state:
//!
//! - [`Policy::should_acquire`]: load the class into the sandbox's private namespace, or
//!   leave it to the shared system namespace?
//! - [`Policy::should_instrument`]: rewrite its method bodies for dispatch, or only apply
//!   name translation?
//! - [`Policy::should_intercept`]: redirect calls to this method at every call site?
//! - [`Policy::class_name_translations`]: which types are replaced by others everywhere?
//!
//! Policies are built once with [`PolicyBuilder`] and then frozen. Equality is structural
//! and the hash is computed at build time, so a policy can key caches of rewritten
//! classes.
//!
//! # Example
//!
//! ```rust
//! use shadowbox::policy::Policy;
//!
//! let policy = Policy::builder()
//!     .instrument_package("pkg.a")
//!     .exclude_from_instrumentation("pkg.a.Skip")
//!     .intercept_method("java.lang.System", "nanoTime")
//!     .build();
//!
//! assert!(policy.should_acquire("pkg.a.Widget"));
//! assert!(policy.should_intercept("java/lang/System", "nanoTime"));
//! ```
//!
//! Prefix matching is a plain textual prefix test on binary names: `pkg.a` also covers
//! `pkg.abc.Widget`. Callers wanting package boundaries include the trailing dot.
//! [`PolicyBuilder::exclude_from_instrumentation_matching`] adds a regular expression that
//! must match the whole binary name, the way `String.matches` does.

mod descriptor;
mod method_ref;

pub use descriptor::ClassDescriptor;
pub use method_ref::{MethodRef, WILDCARD};

use std::{
    collections::{BTreeMap, BTreeSet},
    hash::{Hash, Hasher},
    sync::Arc,
};

use regex::Regex;
use rustc_hash::FxHasher;

use crate::{classfile::internal_name, Result};

/// Binary name of the annotation that opts a class out of instrumentation.
pub const DO_NOT_INSTRUMENT: &str = "org.shadowbox.annotation.DoNotInstrument";

/// Binary name of the annotation that opts a class into instrumentation.
pub const INSTRUMENT: &str = "org.shadowbox.annotation.Instrument";

/// Infrastructure types that are always loaded into the private namespace, so that each
/// sandbox gets its own copy of the dispatch entry points.
pub const ALWAYS_ACQUIRE: [&str; 3] = [
    "org.shadowbox.internal.Hooks",
    "org.shadowbox.internal.DispatchContext",
    "org.shadowbox.shadow.api.Shadow",
];

/// Package prefixes excluded from acquisition by [`PolicyBuilder::with_defaults`].
pub const DEFAULT_PACKAGES_NOT_ACQUIRED: [&str; 13] = [
    "java.",
    "javax.",
    "jdk.internal.",
    "sun.",
    "com.sun.",
    "org.w3c.",
    "org.xml.",
    "org.junit",
    "org.hamcrest",
    "kotlin.",
    "scala.",
    "org.shadowbox.internal.",
    "org.shadowbox.annotation.",
];

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
struct PolicyData {
    instrumented_packages: Vec<String>,
    instrumented_classes: BTreeSet<String>,
    classes_not_acquired: BTreeSet<String>,
    packages_not_acquired: Vec<String>,
    classes_not_instrumented: BTreeSet<String>,
    packages_not_instrumented: Vec<String>,
    translations: BTreeMap<String, String>,
    intercepted: BTreeSet<MethodRef>,
    stub_packages: Vec<String>,
    exclusion_pattern: Option<String>,
}

/// Frozen acquisition and instrumentation rules. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Policy {
    data: Arc<PolicyData>,
    exclusion: Option<Regex>,
    hash: u64,
}

impl Policy {
    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// Decides whether `name` (binary) is loaded into the private namespace.
    ///
    /// Rules, first match wins:
    ///
    /// 1. the infrastructure types of [`ALWAYS_ACQUIRE`] are acquired;
    /// 2. the platform resource-index classes (`android.R`, `com.android.internal.R` and
    ///    their nested classes) are acquired;
    /// 3. names under a package excluded from acquisition are not;
    /// 4. application resource-index classes (`<pkg>.R`, `<pkg>.R$<lowercase>`) are not;
    /// 5. everything else is, unless the class itself is excluded.
    #[must_use]
    pub fn should_acquire(&self, name: &str) -> bool {
        if ALWAYS_ACQUIRE.contains(&name) {
            return true;
        }

        if is_platform_resource_index(name) {
            return true;
        }

        if self
            .data
            .packages_not_acquired
            .iter()
            .any(|package| name.starts_with(package.as_str()))
        {
            return false;
        }

        !is_resource_index(name) && !self.data.classes_not_acquired.contains(name)
    }

    /// Decides whether an acquired class has its method bodies rewritten.
    ///
    /// Interfaces, annotations and classes annotated [`DO_NOT_INSTRUMENT`] never are.
    /// Otherwise a class is instrumented when it lies in an instrumented package, is
    /// listed explicitly or is annotated [`INSTRUMENT`], and is not excluded by name,
    /// package or exclusion pattern.
    #[must_use]
    pub fn should_instrument(&self, class: &ClassDescriptor) -> bool {
        if class.is_interface() || class.is_annotation() || class.has_annotation(DO_NOT_INSTRUMENT)
        {
            return false;
        }

        let name = class.binary_name.as_str();
        let included = self
            .data
            .instrumented_packages
            .iter()
            .any(|package| name.starts_with(package.as_str()))
            || self.data.instrumented_classes.contains(name)
            || class.has_annotation(INSTRUMENT);

        included
            && !self.data.classes_not_instrumented.contains(name)
            && !self
                .data
                .packages_not_instrumented
                .iter()
                .any(|package| name.starts_with(package.as_str()))
            && !self.matches_exclusion(name)
    }

    /// Returns `true` if `name` (binary) is matched in full by the exclusion pattern.
    #[must_use]
    pub fn matches_exclusion(&self, name: &str) -> bool {
        self.exclusion
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(name))
    }

    /// Decides whether calls to `owner.name` are rewritten into interception hooks.
    /// Constructors are never intercepted. `owner` may be binary or internal.
    #[must_use]
    pub fn should_intercept(&self, owner: &str, name: &str) -> bool {
        if name == "<init>" {
            return false;
        }
        let owner = internal_name(owner);
        self.data.intercepted.contains(&MethodRef {
            owner: owner.clone(),
            name: name.to_string(),
        }) || self.data.intercepted.contains(&MethodRef {
            owner,
            name: WILDCARD.to_string(),
        })
    }

    /// Returns `true` if `name` (binary) lies in a package of compiler stubs whose
    /// constructor bodies are replaced before rewriting.
    #[must_use]
    pub fn contains_stubs(&self, name: &str) -> bool {
        self.data
            .stub_packages
            .iter()
            .any(|package| name.starts_with(package.as_str()))
    }

    /// The type replacement table, keyed and valued by internal names.
    #[must_use]
    pub fn class_name_translations(&self) -> &BTreeMap<String, String> {
        &self.data.translations
    }

    /// Every intercepted method reference.
    #[must_use]
    pub fn methods_to_intercept(&self) -> &BTreeSet<MethodRef> {
        &self.data.intercepted
    }

    /// Returns `true` if there is any type translation to apply.
    #[must_use]
    pub fn has_translations(&self) -> bool {
        !self.data.translations.is_empty()
    }

    /// Reopens the rules in a builder, for deriving a related policy.
    #[must_use]
    pub fn to_builder(&self) -> PolicyBuilder {
        PolicyBuilder {
            data: (*self.data).clone(),
            exclusion: self.exclusion.clone(),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        PolicyBuilder::new().build()
    }
}

impl PartialEq for Policy {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && (Arc::ptr_eq(&self.data, &other.data) || self.data == other.data)
    }
}

impl Eq for Policy {}

impl Hash for Policy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Accumulates rules for a [`Policy`]. All methods are additive.
#[derive(Debug, Default, Clone)]
pub struct PolicyBuilder {
    data: PolicyData,
    exclusion: Option<Regex>,
}

impl PolicyBuilder {
    /// An empty builder: nothing instrumented, nothing excluded.
    #[must_use]
    pub fn new() -> Self {
        PolicyBuilder::default()
    }

    /// A builder that already excludes the JDK, common test tooling and the engine's own
    /// runtime packages from acquisition ([`DEFAULT_PACKAGES_NOT_ACQUIRED`]).
    #[must_use]
    pub fn with_defaults() -> Self {
        DEFAULT_PACKAGES_NOT_ACQUIRED
            .iter()
            .fold(PolicyBuilder::new(), |builder, package| {
                builder.exclude_package_from_acquisition(package)
            })
    }

    /// Instruments every class whose binary name starts with `prefix`.
    #[must_use]
    pub fn instrument_package(mut self, prefix: &str) -> Self {
        push_unique(&mut self.data.instrumented_packages, prefix);
        self
    }

    /// Instruments the class with this binary name.
    #[must_use]
    pub fn instrument_class(mut self, name: &str) -> Self {
        self.data.instrumented_classes.insert(name.to_string());
        self
    }

    /// Leaves the class with this binary name to the system namespace.
    #[must_use]
    pub fn exclude_from_acquisition(mut self, name: &str) -> Self {
        self.data.classes_not_acquired.insert(name.to_string());
        self
    }

    /// Leaves every class whose binary name starts with `prefix` to the system namespace.
    #[must_use]
    pub fn exclude_package_from_acquisition(mut self, prefix: &str) -> Self {
        push_unique(&mut self.data.packages_not_acquired, prefix);
        self
    }

    /// Acquires but never instruments the class with this binary name.
    #[must_use]
    pub fn exclude_from_instrumentation(mut self, name: &str) -> Self {
        self.data.classes_not_instrumented.insert(name.to_string());
        self
    }

    /// Acquires but never instruments classes whose binary name starts with `prefix`.
    #[must_use]
    pub fn exclude_package_from_instrumentation(mut self, prefix: &str) -> Self {
        push_unique(&mut self.data.packages_not_instrumented, prefix);
        self
    }

    /// Acquires but never instruments classes whose whole binary name matches `pattern`.
    /// A later call replaces the pattern.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidPattern`] if `pattern` is not a valid regular
    /// expression.
    pub fn exclude_from_instrumentation_matching(mut self, pattern: &str) -> Result<Self> {
        self.exclusion = Some(Regex::new(&format!("^(?:{pattern})$"))?);
        self.data.exclusion_pattern = Some(pattern.to_string());
        Ok(self)
    }

    /// Replaces every reference to type `from` with type `to` (binary or internal names).
    #[must_use]
    pub fn translate_class_name(mut self, from: &str, to: &str) -> Self {
        self.data
            .translations
            .insert(internal_name(from), internal_name(to));
        self
    }

    /// Intercepts calls to `owner.name`; a name of [`WILDCARD`] covers every method.
    #[must_use]
    pub fn intercept_method(mut self, owner: &str, name: &str) -> Self {
        self.data.intercepted.insert(MethodRef::new(owner, name));
        self
    }

    /// Intercepts every listed method, typically from
    /// [`crate::dispatch::Interceptors::method_refs`].
    #[must_use]
    pub fn intercept_methods(mut self, methods: impl IntoIterator<Item = MethodRef>) -> Self {
        self.data.intercepted.extend(methods);
        self
    }

    /// Marks classes under `prefix` as compiler stubs whose constructors only call
    /// `super()`.
    #[must_use]
    pub fn stub_package(mut self, prefix: &str) -> Self {
        push_unique(&mut self.data.stub_packages, prefix);
        self
    }

    /// Freezes the rules.
    #[must_use]
    pub fn build(self) -> Policy {
        let mut hasher = FxHasher::default();
        self.data.hash(&mut hasher);
        Policy {
            hash: hasher.finish(),
            data: Arc::new(self.data),
            exclusion: self.exclusion,
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

fn is_platform_resource_index(name: &str) -> bool {
    ["android.R", "com.android.internal.R"].iter().any(|base| {
        name.strip_prefix(base)
            .is_some_and(|rest| rest.is_empty() || (rest.len() > 1 && rest.starts_with('$')))
    })
}

fn is_resource_index(name: &str) -> bool {
    if name.ends_with(".R") {
        return true;
    }
    name.rfind(".R$").is_some_and(|at| {
        let nested = &name[at + 3..];
        !nested.is_empty() && nested.bytes().all(|b| b.is_ascii_lowercase())
    })
}
