//! In-memory model of a class file.

use crate::{
    assembly::{decoder::decode_code, instruction::Code},
    classfile::{
        access::{ClassAccess, FieldAccess, MethodAccess},
        attribute::{
            annotation_types, Attribute, RUNTIME_INVISIBLE_ANNOTATIONS,
            RUNTIME_VISIBLE_ANNOTATIONS,
        },
        binary_name,
        constant::ConstantPool,
    },
    Result,
};

/// Class-file major version written for classes built from scratch (Java 8).
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

/// A parsed class file.
///
/// Names (`this_class`, member names, descriptors) are resolved strings; the writer
/// interns them again, which finds the existing entries for anything that did not change.
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// `minor_version`
    pub minor_version: u16,
    /// `major_version`
    pub major_version: u16,
    /// The constant pool, grown in place by rewrites
    pub constant_pool: ConstantPool,
    /// Class modifiers
    pub access: ClassAccess,
    /// Internal name of this class
    pub this_class: String,
    /// Internal name of the superclass, `None` only for `java/lang/Object`
    pub super_class: Option<String>,
    /// Internal names of the direct superinterfaces
    pub interfaces: Vec<String>,
    /// Declared fields
    pub fields: Vec<FieldInfo>,
    /// Declared methods, constructors and initializers
    pub methods: Vec<MethodInfo>,
    /// Class-level attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Creates an empty class with no members.
    #[must_use]
    pub fn new(this_class: &str, super_class: Option<&str>, access: ClassAccess) -> ClassFile {
        ClassFile {
            minor_version: 0,
            major_version: DEFAULT_MAJOR_VERSION,
            constant_pool: ConstantPool::new(),
            access,
            this_class: this_class.to_string(),
            super_class: super_class.map(str::to_string),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Binary (dotted) name of this class.
    #[must_use]
    pub fn binary_name(&self) -> String {
        binary_name(&self.this_class)
    }

    /// Returns `true` for interfaces (annotation interfaces included).
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(ClassAccess::INTERFACE)
    }

    /// Returns `true` for annotation interfaces.
    #[must_use]
    pub fn is_annotation(&self) -> bool {
        self.access.contains(ClassAccess::ANNOTATION)
    }

    /// The method with this exact name and descriptor.
    #[must_use]
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    /// Mutable access to the method with this exact name and descriptor.
    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut MethodInfo> {
        self.methods
            .iter_mut()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    /// The field with this name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Binary names of the annotations declared on the class, visible and invisible.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an annotation attribute is corrupt.
    pub fn annotation_types(&self) -> Result<Vec<String>> {
        let mut types = Vec::new();
        for attribute in &self.attributes {
            if let Attribute::Raw { name, info } = attribute {
                if name == RUNTIME_VISIBLE_ANNOTATIONS || name == RUNTIME_INVISIBLE_ANNOTATIONS {
                    types.extend(annotation_types(info, &self.constant_pool)?);
                }
            }
        }
        Ok(types)
    }

    /// Decodes every raw `Code` attribute into symbolic instructions.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a body does not decode.
    pub fn decode_bodies(&mut self) -> Result<()> {
        for method in &mut self.methods {
            method.decode_body(&self.constant_pool)?;
        }
        Ok(())
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Modifiers
    pub access: FieldAccess,
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Field attributes (`ConstantValue`, `Signature`, annotations, ...)
    pub attributes: Vec<Attribute>,
}

impl FieldInfo {
    /// A field without attributes.
    #[must_use]
    pub fn new(access: FieldAccess, name: &str, descriptor: &str) -> FieldInfo {
        FieldInfo {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            attributes: Vec::new(),
        }
    }
}

/// A method, constructor or static initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    /// Modifiers
    pub access: MethodAccess,
    /// Method name (`<init>` for constructors, `<clinit>` for the static initializer)
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Method attributes, `Code` among them unless abstract or native
    pub attributes: Vec<Attribute>,
}

impl MethodInfo {
    /// A method without attributes.
    #[must_use]
    pub fn new(access: MethodAccess, name: &str, descriptor: &str) -> MethodInfo {
        MethodInfo {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            attributes: Vec::new(),
        }
    }

    /// A method with the given body.
    #[must_use]
    pub fn with_code(access: MethodAccess, name: &str, descriptor: &str, code: Code) -> MethodInfo {
        let mut method = MethodInfo::new(access, name, descriptor);
        method.set_code(code);
        method
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccess::STATIC)
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access.contains(MethodAccess::ABSTRACT)
    }

    /// Returns `true` for native methods.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.access.contains(MethodAccess::NATIVE)
    }

    /// Returns `true` for compiler-generated methods.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.access.contains(MethodAccess::SYNTHETIC)
    }

    /// Returns `true` for constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// The decoded body, if the method has one and it has been decoded.
    #[must_use]
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::Code(code) => Some(code.as_ref()),
            Attribute::Raw { .. } => None,
        })
    }

    /// Mutable access to the decoded body.
    pub fn code_mut(&mut self) -> Option<&mut Code> {
        self.attributes.iter_mut().find_map(|attribute| match attribute {
            Attribute::Code(code) => Some(code.as_mut()),
            Attribute::Raw { .. } => None,
        })
    }

    /// Removes and returns the decoded body.
    pub fn take_code(&mut self) -> Option<Code> {
        let position = self
            .attributes
            .iter()
            .position(|attribute| matches!(attribute, Attribute::Code(_)))?;
        match self.attributes.remove(position) {
            Attribute::Code(code) => Some(*code),
            Attribute::Raw { .. } => None,
        }
    }

    /// Replaces the body (decoded or raw) with `code`.
    pub fn set_code(&mut self, code: Code) {
        match self.attributes.iter().position(Attribute::is_code) {
            Some(position) => self.attributes[position] = Attribute::Code(Box::new(code)),
            None => self.attributes.insert(0, Attribute::Code(Box::new(code))),
        }
    }

    /// Decodes a raw `Code` attribute in place; no-op when there is none.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body does not decode.
    pub fn decode_body(&mut self, pool: &ConstantPool) -> Result<()> {
        for attribute in &mut self.attributes {
            if let Attribute::Raw { name, info } = attribute {
                if name == crate::classfile::attribute::CODE {
                    let code = decode_code(info, pool)?;
                    *attribute = Attribute::Code(Box::new(code));
                }
            }
        }
        Ok(())
    }
}
