use crate::{
    classfile::{binary_name, ClassAccess, ClassFile},
    Result,
};

/// What the policy needs to know about a class to decide on instrumentation.
///
/// Derived once per class per rewrite from the parsed class file; read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    /// Binary name (`pkg.a.Widget`)
    pub binary_name: String,
    /// Internal name (`pkg/a/Widget`)
    pub internal_name: String,
    /// Class modifiers
    pub access: ClassAccess,
    /// Binary names of declared annotations, runtime-visible and invisible
    pub annotations: Vec<String>,
    /// Internal name of the superclass
    pub super_class: Option<String>,
    /// Internal names of the direct superinterfaces
    pub interfaces: Vec<String>,
}

impl ClassDescriptor {
    /// Summarizes a parsed class.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an annotation attribute is corrupt.
    pub fn from_class(class: &ClassFile) -> Result<ClassDescriptor> {
        Ok(ClassDescriptor {
            binary_name: binary_name(&class.this_class),
            internal_name: class.this_class.clone(),
            access: class.access,
            annotations: class.annotation_types()?,
            super_class: class.super_class.clone(),
            interfaces: class.interfaces.clone(),
        })
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(ClassAccess::INTERFACE)
    }

    /// Returns `true` for annotation interfaces.
    #[must_use]
    pub fn is_annotation(&self) -> bool {
        self.access.contains(ClassAccess::ANNOTATION)
    }

    /// Returns `true` if the class carries the annotation with this binary name.
    #[must_use]
    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|declared| declared == annotation)
    }
}
