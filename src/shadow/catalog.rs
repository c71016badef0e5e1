//! Collaborator traits for substitute implementations.
//!
//! The engine never knows what a substitute does. It asks a [`SubstituteCatalog`] for
//! the substitute bound to an instance (or the static substitute of a type) and then
//! asks the [`Substitute`] whether it implements a given method. The closure-based
//! [`FnSubstitute`] and [`MemoryCatalog`] cover tests and embedders that assemble their
//! substitutes in code.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    dispatch::{Instance, MethodSignature, Throwable, Value},
    shadow::ShadowInfo,
    Error, Result,
};

/// A substitute ("shadow") implementation of some methods of a target type.
pub trait Substitute: Send + Sync {
    /// Name of the substitute, for diagnostics.
    fn name(&self) -> &str;

    /// Returns `true` if the substitute provides an implementation of `signature`.
    fn implements(&self, signature: &MethodSignature) -> bool;

    /// Runs the substitute's implementation of `signature`.
    ///
    /// `instance` is `None` for static methods.
    ///
    /// # Errors
    /// A throwable raised by the implementation is returned as [`Error::Thrown`].
    fn invoke(
        &self,
        signature: &MethodSignature,
        instance: Option<&Instance>,
        args: &[Value],
    ) -> Result<Value>;
}

/// Source of substitute objects for the types named in a shadow map.
pub trait SubstituteCatalog: Send + Sync {
    /// Creates the substitute stored in the dispatch slot of `instance`, whose nearest
    /// shadowed ancestor is described by `info`. `None` leaves the slot without a
    /// substitute.
    ///
    /// # Errors
    /// Returns an error if the substitute cannot be constructed.
    fn instantiate(
        &self,
        info: &ShadowInfo,
        instance: &Instance,
    ) -> Result<Option<Arc<dyn Substitute>>>;

    /// The substitute that handles static methods of the type described by `info`.
    ///
    /// # Errors
    /// Returns an error if the substitute cannot be provided.
    fn statics(&self, info: &ShadowInfo) -> Result<Option<Arc<dyn Substitute>>>;
}

/// Signature of a closure implementing one substitute method.
pub type SubstituteFn =
    dyn Fn(&MethodSignature, Option<&Instance>, &[Value]) -> Result<Value> + Send + Sync;

/// A [`Substitute`] assembled from closures keyed by method name and descriptor.
///
/// ```rust
/// use shadowbox::{dispatch::{MethodSignature, Value}, shadow::{FnSubstitute, Substitute}};
///
/// let shadow = FnSubstitute::new("WidgetShadow")
///     .method("size", "()I", |_, _, _| Ok(Value::Int(42)));
///
/// let size = MethodSignature::new("pkg/a/Widget", "size", "()I");
/// assert!(shadow.implements(&size));
/// assert_eq!(shadow.invoke(&size, None, &[])?, Value::Int(42));
/// # Ok::<(), shadowbox::Error>(())
/// ```
#[derive(Clone)]
pub struct FnSubstitute {
    name: String,
    methods: BTreeMap<(String, String), Arc<SubstituteFn>>,
}

impl FnSubstitute {
    /// Creates a substitute without methods.
    #[must_use]
    pub fn new(name: &str) -> FnSubstitute {
        FnSubstitute {
            name: name.to_string(),
            methods: BTreeMap::new(),
        }
    }

    /// Adds the implementation of `name` with `descriptor`.
    #[must_use]
    pub fn method<F>(mut self, name: &str, descriptor: &str, f: F) -> Self
    where
        F: Fn(&MethodSignature, Option<&Instance>, &[Value]) -> Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.methods
            .insert((name.to_string(), descriptor.to_string()), Arc::new(f));
        self
    }

    /// Adds an implementation that always raises `throwable`.
    #[must_use]
    pub fn throwing(self, name: &str, descriptor: &str, throwable: Throwable) -> Self {
        self.method(name, descriptor, move |_, _, _| {
            Err(Error::Thrown(throwable.clone()))
        })
    }
}

impl Substitute for FnSubstitute {
    fn name(&self) -> &str {
        &self.name
    }

    fn implements(&self, signature: &MethodSignature) -> bool {
        self.methods
            .contains_key(&(signature.name.clone(), signature.descriptor.clone()))
    }

    fn invoke(
        &self,
        signature: &MethodSignature,
        instance: Option<&Instance>,
        args: &[Value],
    ) -> Result<Value> {
        match self
            .methods
            .get(&(signature.name.clone(), signature.descriptor.clone()))
        {
            Some(method) => method(signature, instance, args),
            None => Err(Error::Thrown(Throwable::unsupported_operation(&format!(
                "{} does not implement {}",
                self.name, signature
            )))),
        }
    }
}

impl fmt::Debug for FnSubstitute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSubstitute")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Creates the per-instance substitute for an object.
pub type InstanceFactory = dyn Fn(&Instance) -> Arc<dyn Substitute> + Send + Sync;

/// A [`SubstituteCatalog`] holding substitutes registered in code, keyed by the
/// substitute name of a [`ShadowInfo`].
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    instances: BTreeMap<String, Arc<InstanceFactory>>,
    statics: BTreeMap<String, Arc<dyn Substitute>>,
}

impl MemoryCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> MemoryCatalog {
        MemoryCatalog::default()
    }

    /// Registers the factory used for instances mapped to `substitute`.
    #[must_use]
    pub fn with_instances<F>(mut self, substitute: &str, factory: F) -> Self
    where
        F: Fn(&Instance) -> Arc<dyn Substitute> + Send + Sync + 'static,
    {
        self.instances
            .insert(substitute.to_string(), Arc::new(factory));
        self
    }

    /// Registers the static-method substitute for types mapped to `substitute`.
    #[must_use]
    pub fn with_statics(mut self, substitute: &str, statics: Arc<dyn Substitute>) -> Self {
        self.statics.insert(substitute.to_string(), statics);
        self
    }
}

impl SubstituteCatalog for MemoryCatalog {
    fn instantiate(
        &self,
        info: &ShadowInfo,
        instance: &Instance,
    ) -> Result<Option<Arc<dyn Substitute>>> {
        Ok(self
            .instances
            .get(&info.substitute)
            .map(|factory| factory(instance)))
    }

    fn statics(&self, info: &ShadowInfo) -> Result<Option<Arc<dyn Substitute>>> {
        Ok(self.statics.get(&info.substitute).cloned())
    }
}

impl fmt::Debug for MemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCatalog")
            .field("instances", &self.instances.keys().collect::<Vec<_>>())
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .finish()
    }
}
