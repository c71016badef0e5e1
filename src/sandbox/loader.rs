use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use dashmap::{mapref::entry::Entry, DashMap};
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::{
    classfile::resource_path,
    dispatch::DispatchContext,
    policy::Policy,
    sandbox::{DefinedClass, SystemNamespace},
    transform::{ClassIndex, ClassTransformer, Strategy, Transformed},
    Error, Result,
};

/// The private namespace of one sandbox.
///
/// Classes the policy acquires are fetched from the parent's supplier, rewritten and
/// defined here; everything else is delegated to the [`SystemNamespace`]. A name is
/// defined at most once: concurrent acquisitions of the same class race on the
/// namespace entry and the first definition is the one every caller gets.
pub struct IsolatedLoader {
    name: String,
    parent: Arc<SystemNamespace>,
    context: Arc<DispatchContext>,
    index: Arc<ClassIndex>,
    transformer: RwLock<Arc<ClassTransformer>>,
    classes: DashMap<String, Arc<DefinedClass>>,
    dump_dir: Option<PathBuf>,
}

impl IsolatedLoader {
    /// An empty namespace called `name` rewriting classes under `policy`.
    #[must_use]
    pub fn new(
        name: &str,
        policy: Policy,
        strategy: Strategy,
        parent: Arc<SystemNamespace>,
        dump_dir: Option<PathBuf>,
    ) -> IsolatedLoader {
        let context = Arc::new(DispatchContext::new(name));
        let index = Arc::new(ClassIndex::new(Arc::clone(parent.supplier())));
        let transformer = ClassTransformer::new(
            policy,
            strategy,
            Arc::clone(&index),
            context.call_sites().id_source(),
        );

        IsolatedLoader {
            name: name.to_string(),
            parent,
            context,
            index,
            transformer: RwLock::new(Arc::new(transformer)),
            classes: DashMap::new(),
            dump_dir,
        }
    }

    /// Name of the namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dispatch context rewritten classes of this namespace call into.
    #[must_use]
    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.context
    }

    /// Ancestor summaries of the classes seen by this namespace.
    #[must_use]
    pub fn index(&self) -> &Arc<ClassIndex> {
        &self.index
    }

    /// The parent namespace.
    #[must_use]
    pub fn parent(&self) -> &Arc<SystemNamespace> {
        &self.parent
    }

    /// The policy classes are acquired and rewritten under.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the transformer lock is poisoned.
    pub fn policy(&self) -> Result<Policy> {
        Ok(self.transformer()?.policy().clone())
    }

    /// The call-site strategy of rewritten classes.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the transformer lock is poisoned.
    pub fn strategy(&self) -> Result<Strategy> {
        Ok(self.transformer()?.strategy())
    }

    /// Switches to `policy`.
    ///
    /// Allowed while nothing is defined; afterwards only an equal policy is accepted.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if classes are defined and `policy` differs from the
    /// current one.
    pub fn set_policy(&self, policy: Policy) -> Result<()> {
        let mut transformer = self.transformer.write().map_err(|_| Error::LockError)?;
        if *transformer.policy() == policy {
            return Ok(());
        }
        if !self.classes.is_empty() {
            return Err(Error::Error(format!(
                "namespace {} already defines {} classes under a different policy",
                self.name,
                self.classes.len()
            )));
        }
        *transformer = Arc::new(ClassTransformer::new(
            policy,
            transformer.strategy(),
            Arc::clone(&self.index),
            self.context.call_sites().id_source(),
        ));
        Ok(())
    }

    /// Loads `binary_name`, returning the existing definition if there is one.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the class has no original bytes, decoding and
    /// rewriting errors of [`ClassTransformer::transform`], [`Error::ResourceExhaustion`]
    /// if the definition cannot be allocated and [`Error::FileError`] if the dump
    /// directory cannot be written.
    #[instrument(level = "debug", skip(self), fields(namespace = %self.name))]
    pub fn acquire(&self, binary_name: &str) -> Result<Arc<DefinedClass>> {
        if let Some(class) = self.classes.get(binary_name) {
            return Ok(Arc::clone(class.value()));
        }

        let transformer = self.transformer()?;
        if !transformer.policy().should_acquire(binary_name) {
            return self.parent.acquire(binary_name);
        }

        let bytes = self.parent.supplier().original_bytes(binary_name)?;
        let transformed = transformer.transform(&bytes)?;
        self.define(binary_name, transformed)
    }

    /// Loads every class in `binary_names`, transforming them in parallel.
    ///
    /// # Errors
    /// Returns the first error any of the classes failed with.
    pub fn acquire_all(&self, binary_names: &[&str]) -> Result<Vec<Arc<DefinedClass>>> {
        binary_names
            .par_iter()
            .map(|name| self.acquire(name))
            .collect()
    }

    /// The definition of `binary_name` in this namespace, if any.
    #[must_use]
    pub fn defined(&self, binary_name: &str) -> Option<Arc<DefinedClass>> {
        self.classes.get(binary_name).map(|class| Arc::clone(class.value()))
    }

    /// Names of the classes defined in this namespace, sorted.
    #[must_use]
    pub fn defined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.iter().map(|class| class.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of classes defined in this namespace.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if nothing is defined in this namespace.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Forgets every definition and linked call site.
    pub fn clear(&self) {
        self.classes.clear();
        self.context.call_sites().clear();
    }

    fn transformer(&self) -> Result<Arc<ClassTransformer>> {
        Ok(Arc::clone(&*read_lock!(self.transformer)))
    }

    fn define(&self, binary_name: &str, transformed: Transformed) -> Result<Arc<DefinedClass>> {
        match self.classes.entry(binary_name.to_string()) {
            Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            Entry::Vacant(vacant) => {
                let class = Arc::new(DefinedClass::new(
                    &transformed.name,
                    &self.name,
                    &transformed.bytes,
                    transformed.instrumented,
                )?);
                if let Some(dir) = &self.dump_dir {
                    dump(dir, class.name(), class.bytes())?;
                }
                let sites = transformed.call_sites.len();
                self.context.call_sites().register(transformed.call_sites);
                debug!(
                    class = %class.name(),
                    namespace = %self.name,
                    instrumented = class.is_instrumented(),
                    sites,
                    "defined"
                );
                Ok(Arc::clone(vacant.insert(class).value()))
            }
        }
    }
}

fn dump(dir: &Path, binary_name: &str, bytes: &[u8]) -> Result<()> {
    let path = dir.join(resource_path(binary_name));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, bytes)?;
    debug!(path = %path.display(), "dumped rewritten class");
    Ok(())
}

impl fmt::Debug for IsolatedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedLoader")
            .field("name", &self.name)
            .field("classes", &self.classes.len())
            .field("dump_dir", &self.dump_dir)
            .finish_non_exhaustive()
    }
}
