//! Sources of original class bytes.

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::debug;

use crate::{classfile::resource_path, Error, Result};

/// Provides the unmodified bytes of a class.
///
/// Implementations must be thread-safe: sandboxes fetch bytes from parallel acquisition
/// workers. A supplier that has no bytes for a class reports [`Error::NotFound`]; callers
/// do not retry.
pub trait ByteSupplier: Send + Sync {
    /// The original class file of `binary_name` (`pkg.a.Widget`).
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the class is unknown to this supplier.
    fn original_bytes(&self, binary_name: &str) -> Result<Vec<u8>>;
}

/// Class bytes held in memory, keyed by binary name.
#[derive(Debug, Default, Clone)]
pub struct MemorySupplier {
    classes: BTreeMap<String, Vec<u8>>,
}

impl MemorySupplier {
    /// A supplier serving `classes`.
    #[must_use]
    pub fn new(classes: BTreeMap<String, Vec<u8>>) -> MemorySupplier {
        MemorySupplier { classes }
    }

    /// Adds (or replaces) the bytes of one class.
    #[must_use]
    pub fn with_class(mut self, binary_name: &str, bytes: Vec<u8>) -> Self {
        self.classes.insert(binary_name.to_string(), bytes);
        self
    }

    /// Number of classes served.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if no class is served.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ByteSupplier for MemorySupplier {
    fn original_bytes(&self, binary_name: &str) -> Result<Vec<u8>> {
        self.classes
            .get(binary_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(binary_name.to_string()))
    }
}

/// Reads `pkg/a/Widget.class` files below a class-path directory.
#[derive(Debug, Clone)]
pub struct DirectorySupplier {
    root: PathBuf,
}

impl DirectorySupplier {
    /// A supplier reading below `root`.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if `root` is not a readable directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<DirectorySupplier> {
        let root = root.as_ref().to_path_buf();
        if !fs::metadata(&root)?.is_dir() {
            return Err(Error::FileError(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            )));
        }
        Ok(DirectorySupplier { root })
    }

    /// The class-path directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ByteSupplier for DirectorySupplier {
    fn original_bytes(&self, binary_name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(resource_path(binary_name));
        match fs::read(&path) {
            Ok(bytes) => {
                debug!(
                    class = binary_name,
                    path = %path.display(),
                    size = bytes.len(),
                    "read class"
                );
                Ok(bytes)
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(binary_name.to_string()))
            }
            Err(error) => Err(Error::FileError(error)),
        }
    }
}

/// Asks several suppliers in order; the first one that has the class wins.
///
/// Only [`Error::NotFound`] moves on to the next supplier, any other error is returned
/// as is.
#[derive(Default, Clone)]
pub struct CompositeSupplier {
    suppliers: Vec<Arc<dyn ByteSupplier>>,
}

impl CompositeSupplier {
    /// An empty composite, which finds nothing.
    #[must_use]
    pub fn new() -> CompositeSupplier {
        CompositeSupplier::default()
    }

    /// Appends a supplier with lower priority than the ones already added.
    #[must_use]
    pub fn with(mut self, supplier: Arc<dyn ByteSupplier>) -> Self {
        self.suppliers.push(supplier);
        self
    }
}

impl ByteSupplier for CompositeSupplier {
    fn original_bytes(&self, binary_name: &str) -> Result<Vec<u8>> {
        for supplier in &self.suppliers {
            match supplier.original_bytes(binary_name) {
                Err(Error::NotFound(_)) => continue,
                found => return found,
            }
        }
        Err(Error::NotFound(binary_name.to_string()))
    }
}

impl fmt::Debug for CompositeSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSupplier")
            .field("suppliers", &self.suppliers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_supplier() {
        let supplier = MemorySupplier::default().with_class("pkg.a.Widget", vec![1, 2, 3]);
        assert_eq!(supplier.original_bytes("pkg.a.Widget").unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            supplier.original_bytes("pkg.a.Gone"),
            Err(Error::NotFound(name)) if name == "pkg.a.Gone"
        ));
    }

    #[test]
    fn test_directory_supplier_reads_resource_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg/a")).unwrap();
        fs::write(dir.path().join("pkg/a/Widget.class"), [0xCA, 0xFE]).unwrap();

        let supplier = DirectorySupplier::new(dir.path()).unwrap();
        assert_eq!(supplier.original_bytes("pkg.a.Widget").unwrap(), vec![0xCA, 0xFE]);
        assert!(matches!(
            supplier.original_bytes("pkg.a.Missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_directory_supplier_needs_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            DirectorySupplier::new(file.path()),
            Err(Error::FileError(_))
        ));
    }

    #[test]
    fn test_composite_first_hit_wins() {
        let first = Arc::new(MemorySupplier::default().with_class("pkg.a.Widget", vec![1]));
        let second = Arc::new(
            MemorySupplier::default()
                .with_class("pkg.a.Widget", vec![2])
                .with_class("pkg.b.Other", vec![3]),
        );
        let composite = CompositeSupplier::new().with(first).with(second);

        assert_eq!(composite.original_bytes("pkg.a.Widget").unwrap(), vec![1]);
        assert_eq!(composite.original_bytes("pkg.b.Other").unwrap(), vec![3]);
        assert!(matches!(
            composite.original_bytes("pkg.c.None"),
            Err(Error::NotFound(_))
        ));
    }
}
