use std::{fmt, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, error};

use crate::{
    classfile::{internal_name, ClassFile, ReadDepth},
    sandbox::ByteSupplier,
    Error, Result,
};

/// Name of the namespace shared by every sandbox of a process.
pub const SYSTEM_NAMESPACE: &str = "system";

/// A class defined in a namespace. Immutable once defined.
#[derive(Clone, PartialEq, Eq)]
pub struct DefinedClass {
    name: String,
    namespace: String,
    bytes: Arc<[u8]>,
    instrumented: bool,
}

impl DefinedClass {
    /// Copies `bytes` into a new definition.
    ///
    /// # Errors
    /// Returns [`Error::ResourceExhaustion`] if the class bytes cannot be allocated.
    pub fn new(
        name: &str,
        namespace: &str,
        bytes: &[u8],
        instrumented: bool,
    ) -> Result<DefinedClass> {
        let mut buffer = Vec::new();
        if let Err(failure) = buffer.try_reserve_exact(bytes.len()) {
            error!(class = name, namespace, size = bytes.len(), %failure, "cannot allocate class");
            return Err(Error::ResourceExhaustion {
                class: name.to_string(),
                message: failure.to_string(),
            });
        }
        buffer.extend_from_slice(bytes);

        Ok(DefinedClass {
            name: name.to_string(),
            namespace: namespace.to_string(),
            bytes: Arc::from(buffer),
            instrumented,
        })
    }

    /// Binary name (`pkg.a.Widget`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Internal name (`pkg/a/Widget`).
    #[must_use]
    pub fn internal_name(&self) -> String {
        internal_name(&self.name)
    }

    /// Name of the namespace the class is defined in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The class file as defined.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns `true` if the class was rewritten for dispatch, `false` if it was only
    /// translated or defined from its original bytes.
    #[must_use]
    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    /// Parses the defined bytes.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the bytes do not parse, which would indicate a
    /// writer defect.
    pub fn parse(&self, depth: ReadDepth) -> Result<ClassFile> {
        ClassFile::parse(&self.bytes, depth)
    }
}

impl fmt::Debug for DefinedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinedClass")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("size", &self.bytes.len())
            .field("instrumented", &self.instrumented)
            .finish()
    }
}

/// The parent namespace: classes a sandbox does not acquire are defined here once, from
/// their original bytes, and shared by every sandbox using this parent.
pub struct SystemNamespace {
    supplier: Arc<dyn ByteSupplier>,
    classes: DashMap<String, Arc<DefinedClass>>,
}

impl SystemNamespace {
    /// A namespace defining classes from `supplier`.
    #[must_use]
    pub fn new(supplier: Arc<dyn ByteSupplier>) -> SystemNamespace {
        SystemNamespace {
            supplier,
            classes: DashMap::new(),
        }
    }

    /// The supplier of original bytes, shared with child sandboxes.
    #[must_use]
    pub fn supplier(&self) -> &Arc<dyn ByteSupplier> {
        &self.supplier
    }

    /// Defines `binary_name` from its original bytes unless it already is.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the supplier has no bytes for the class.
    pub fn acquire(&self, binary_name: &str) -> Result<Arc<DefinedClass>> {
        if let Some(class) = self.classes.get(binary_name) {
            return Ok(Arc::clone(class.value()));
        }

        let bytes = self.supplier.original_bytes(binary_name)?;
        let defined = Arc::new(DefinedClass::new(binary_name, SYSTEM_NAMESPACE, &bytes, false)?);
        let class = self
            .classes
            .entry(binary_name.to_string())
            .or_insert(defined)
            .value()
            .clone();
        debug!(class = binary_name, "defined in system namespace");
        Ok(class)
    }

    /// The definition of `binary_name`, if any.
    #[must_use]
    pub fn defined(&self, binary_name: &str) -> Option<Arc<DefinedClass>> {
        self.classes.get(binary_name).map(|class| Arc::clone(class.value()))
    }

    /// Number of defined classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if nothing is defined yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl fmt::Debug for SystemNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemNamespace")
            .field("classes", &self.classes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MemorySupplier;

    #[test]
    fn test_system_namespace_defines_once() {
        let system = SystemNamespace::new(Arc::new(
            MemorySupplier::default().with_class("java.lang.String", vec![0xCA, 0xFE]),
        ));
        let first = system.acquire("java.lang.String").unwrap();
        let second = system.acquire("java.lang.String").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.namespace(), SYSTEM_NAMESPACE);
        assert!(!first.is_instrumented());
        assert_eq!(first.bytes(), &[0xCA, 0xFE]);
        assert_eq!(system.len(), 1);
    }

    #[test]
    fn test_system_namespace_missing_class() {
        let system = SystemNamespace::new(Arc::new(MemorySupplier::default()));
        assert!(matches!(system.acquire("pkg.a.Gone"), Err(Error::NotFound(_))));
        assert!(system.is_empty());
    }

    #[test]
    fn test_defined_class_names() {
        let class = DefinedClass::new("pkg.a.Outer$Inner", "test", &[1], true).unwrap();
        assert_eq!(class.internal_name(), "pkg/a/Outer$Inner");
        assert!(class.is_instrumented());
    }
}
