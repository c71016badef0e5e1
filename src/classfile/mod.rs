//! JVM class files: model, reader and writer.
//!
//! A [`ClassFile`] is read with [`ClassFile::parse`] at one of two [`ReadDepth`]s and
//! written back with [`ClassFile::to_bytes`]. The model resolves names and descriptors to
//! strings but keeps the original [`ConstantPool`] alive, growing it append-only, so that
//! every attribute the engine does not understand can be copied as raw bytes and still
//! point at the right constants.
//!
//! # Key Components
//!
//! - [`constant`] - the constant pool and modified UTF-8
//! - [`descriptor`] - field/method descriptors and class-name translation
//! - [`access`] - class, field and method modifier flags
//! - [`attribute`] - attributes and annotation-type extraction
//! - [`ClassFile`], [`FieldInfo`], [`MethodInfo`] - the class model
//!
//! Two spellings of class names are used throughout the crate: *binary* names
//! (`pkg.a.Outer$Inner`), which is what policies and sandboxes are addressed with, and
//! *internal* names (`pkg/a/Outer$Inner`), which is what class files contain.
//! [`internal_name`] and [`binary_name`] convert between them.

pub mod access;
pub mod attribute;
mod class;
pub mod constant;
pub mod descriptor;
mod reader;
mod writer;

pub use access::{ClassAccess, FieldAccess, MethodAccess};
pub use attribute::Attribute;
pub use class::{ClassFile, FieldInfo, MethodInfo, DEFAULT_MAJOR_VERSION};
pub use constant::ConstantPool;
pub use reader::{ReadDepth, MAGIC};

/// `pkg.a.Widget` to `pkg/a/Widget`.
#[must_use]
pub fn internal_name(binary_name: &str) -> String {
    binary_name.replace('.', "/")
}

/// `pkg/a/Widget` to `pkg.a.Widget`.
#[must_use]
pub fn binary_name(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

/// Resource path of a class inside a class-path directory or archive
/// (`pkg/a/Widget.class`).
#[must_use]
pub fn resource_path(binary_name: &str) -> String {
    format!("{}.class", internal_name(binary_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_conversions() {
        assert_eq!(internal_name("pkg.a.Outer$Inner"), "pkg/a/Outer$Inner");
        assert_eq!(binary_name("pkg/a/Outer$Inner"), "pkg.a.Outer$Inner");
        assert_eq!(resource_path("pkg.a.Widget"), "pkg/a/Widget.class");
    }
}
