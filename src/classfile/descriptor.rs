//! Field and method descriptors.
//!
//! Descriptors are the compact type strings of the class-file format: `I` for `int`,
//! `Ljava/lang/String;` for a class, `[[J` for `long[][]`, `(ILjava/lang/Object;)V` for a
//! method taking an `int` and an `Object` and returning `void`.
//!
//! Besides parsing and printing, this module implements class-name translation over
//! descriptors ([`remap_field_descriptor`], [`remap_method_descriptor`],
//! [`remap_class_name`]), which is how a policy's name-translation table reaches every
//! field, parameter and return type, array and nested forms included.

use std::{collections::BTreeMap, fmt};

use crate::Result;

/// Translates internal class names.
///
/// Implemented for `BTreeMap<String, String>` keyed by internal names.
pub trait NameMapper {
    /// Returns the replacement for `internal_name`, or `None` to keep it.
    fn map_class(&self, internal_name: &str) -> Option<&str>;
}

impl NameMapper for BTreeMap<String, String> {
    fn map_class(&self, internal_name: &str) -> Option<&str> {
        self.get(internal_name).map(String::as_str)
    }
}

/// A field type (also used for parameters and non-void returns).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `L<internal name>;`
    Object(String),
    /// `[<component>`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parses a complete field descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the text is not exactly one field type.
    pub fn parse(descriptor: &str) -> Result<FieldType> {
        let bytes = descriptor.as_bytes();
        let mut pos = 0;
        let parsed = Self::parse_at(descriptor, bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(malformed_error!(
                "trailing characters in field descriptor '{}'",
                descriptor
            ));
        }
        Ok(parsed)
    }

    fn parse_at(text: &str, bytes: &[u8], pos: &mut usize) -> Result<FieldType> {
        let Some(&c) = bytes.get(*pos) else {
            return Err(malformed_error!("truncated descriptor '{}'", text));
        };
        *pos += 1;

        Ok(match c {
            b'B' => FieldType::Byte,
            b'C' => FieldType::Char,
            b'D' => FieldType::Double,
            b'F' => FieldType::Float,
            b'I' => FieldType::Int,
            b'J' => FieldType::Long,
            b'S' => FieldType::Short,
            b'Z' => FieldType::Boolean,
            b'L' => {
                let start = *pos;
                let Some(len) = bytes[start..].iter().position(|b| *b == b';') else {
                    return Err(malformed_error!("unterminated class type in '{}'", text));
                };
                if len == 0 {
                    return Err(malformed_error!("empty class name in '{}'", text));
                }
                *pos = start + len + 1;
                FieldType::Object(text[start..start + len].to_string())
            }
            b'[' => FieldType::Array(Box::new(Self::parse_at(text, bytes, pos)?)),
            other => {
                return Err(malformed_error!(
                    "invalid descriptor character '{}' in '{}'",
                    char::from(other),
                    text
                ))
            }
        })
    }

    /// Creates an object type from an internal name, or the array type it denotes when the
    /// name is itself an array descriptor (as `Class` constants are for arrays).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid array descriptor.
    pub fn from_internal_name(internal_name: &str) -> Result<FieldType> {
        if internal_name.starts_with('[') {
            Self::parse(internal_name)
        } else {
            Ok(FieldType::Object(internal_name.to_string()))
        }
    }

    /// Number of local variable / operand stack slots a value of this type occupies.
    #[must_use]
    pub fn size(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// Returns `true` for the eight primitive types.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// The name used for this type in a `Class` constant: the internal name for objects,
    /// the descriptor for arrays and primitives.
    #[must_use]
    pub fn internal_name(&self) -> String {
        match self {
            FieldType::Object(name) => name.clone(),
            other => other.to_string(),
        }
    }

    /// The `java.lang` wrapper class used to box this primitive.
    #[must_use]
    pub fn wrapper_class(&self) -> Option<&'static str> {
        Some(match self {
            FieldType::Boolean => "java/lang/Boolean",
            FieldType::Byte => "java/lang/Byte",
            FieldType::Char => "java/lang/Character",
            FieldType::Short => "java/lang/Short",
            FieldType::Int => "java/lang/Integer",
            FieldType::Long => "java/lang/Long",
            FieldType::Float => "java/lang/Float",
            FieldType::Double => "java/lang/Double",
            FieldType::Object(_) | FieldType::Array(_) => return None,
        })
    }

    /// Name of the `xxxValue()` accessor that unboxes this primitive (`intValue`, ...).
    #[must_use]
    pub fn unbox_method(&self) -> Option<&'static str> {
        Some(match self {
            FieldType::Boolean => "booleanValue",
            FieldType::Byte => "byteValue",
            FieldType::Char => "charValue",
            FieldType::Short => "shortValue",
            FieldType::Int => "intValue",
            FieldType::Long => "longValue",
            FieldType::Float => "floatValue",
            FieldType::Double => "doubleValue",
            FieldType::Object(_) | FieldType::Array(_) => return None,
        })
    }

    /// Java source spelling of the type (`int`, `java.lang.String`, `long[]`), as used in
    /// diagnostics.
    #[must_use]
    pub fn java_name(&self) -> String {
        match self {
            FieldType::Byte => "byte".to_string(),
            FieldType::Char => "char".to_string(),
            FieldType::Double => "double".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::Int => "int".to_string(),
            FieldType::Long => "long".to_string(),
            FieldType::Short => "short".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Object(name) => name.replace('/', "."),
            FieldType::Array(component) => format!("{}[]", component.java_name()),
        }
    }

    /// Returns the type with every class name translated through `mapper`, or `None` when
    /// nothing changes.
    #[must_use]
    pub fn remap(&self, mapper: &dyn NameMapper) -> Option<FieldType> {
        match self {
            FieldType::Object(name) => mapper
                .map_class(name)
                .map(|mapped| FieldType::Object(mapped.to_string())),
            FieldType::Array(component) => component
                .remap(mapper)
                .map(|mapped| FieldType::Array(Box::new(mapped))),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Object(name) => write!(f, "L{name};"),
            FieldType::Array(component) => write!(f, "[{component}"),
        }
    }
}

/// The return part of a method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnType {
    /// `V`
    Void,
    /// Any field type
    Value(FieldType),
}

impl ReturnType {
    /// Stack slots occupied by the returned value.
    #[must_use]
    pub fn size(&self) -> u16 {
        match self {
            ReturnType::Void => 0,
            ReturnType::Value(value) => value.size(),
        }
    }

    /// The value type, or `None` for `void`.
    #[must_use]
    pub fn value(&self) -> Option<&FieldType> {
        match self {
            ReturnType::Void => None,
            ReturnType::Value(value) => Some(value),
        }
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnType::Void => f.write_str("V"),
            ReturnType::Value(value) => value.fmt(f),
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type
    pub ret: ReturnType,
}

impl MethodDescriptor {
    /// Parses `(<params>)<return>`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the text is not a method descriptor.
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor> {
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(malformed_error!(
                "method descriptor '{}' does not start with '('",
                descriptor
            ));
        }

        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => params.push(FieldType::parse_at(descriptor, bytes, &mut pos)?),
                None => {
                    return Err(malformed_error!(
                        "unterminated parameter list in '{}'",
                        descriptor
                    ))
                }
            }
        }

        let ret = if bytes.get(pos) == Some(&b'V') && pos + 1 == bytes.len() {
            ReturnType::Void
        } else {
            let value = FieldType::parse_at(descriptor, bytes, &mut pos)?;
            if pos != bytes.len() {
                return Err(malformed_error!(
                    "trailing characters in method descriptor '{}'",
                    descriptor
                ));
            }
            ReturnType::Value(value)
        };

        Ok(MethodDescriptor { params, ret })
    }

    /// Total slots used by the parameters (excluding `this`).
    #[must_use]
    pub fn args_size(&self) -> u16 {
        self.params.iter().map(FieldType::size).sum()
    }

    /// Returns `true` when the method returns `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.ret == ReturnType::Void
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            param.fmt(f)?;
        }
        f.write_str(")")?;
        self.ret.fmt(f)
    }
}

/// Translates a `Class` constant name (internal name or array descriptor). Returns `None`
/// when nothing changes.
#[must_use]
pub fn remap_class_name(name: &str, mapper: &dyn NameMapper) -> Option<String> {
    if name.starts_with('[') {
        let parsed = FieldType::parse(name).ok()?;
        parsed.remap(mapper).map(|mapped| mapped.to_string())
    } else {
        mapper.map_class(name).map(str::to_string)
    }
}

/// Translates a field descriptor. Returns `Ok(None)` when nothing changes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the descriptor does not parse.
pub fn remap_field_descriptor(descriptor: &str, mapper: &dyn NameMapper) -> Result<Option<String>> {
    Ok(FieldType::parse(descriptor)?
        .remap(mapper)
        .map(|mapped| mapped.to_string()))
}

/// Translates a method descriptor. Returns `Ok(None)` when nothing changes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the descriptor does not parse.
pub fn remap_method_descriptor(
    descriptor: &str,
    mapper: &dyn NameMapper,
) -> Result<Option<String>> {
    let parsed = MethodDescriptor::parse(descriptor)?;
    let mut changed = false;

    let params = parsed
        .params
        .iter()
        .map(|param| match param.remap(mapper) {
            Some(mapped) => {
                changed = true;
                mapped
            }
            None => param.clone(),
        })
        .collect();

    let ret = match &parsed.ret {
        ReturnType::Value(value) => match value.remap(mapper) {
            Some(mapped) => {
                changed = true;
                ReturnType::Value(mapped)
            }
            None => parsed.ret.clone(),
        },
        ReturnType::Void => ReturnType::Void,
    };

    Ok(changed.then(|| MethodDescriptor { params, ret }.to_string()))
}
