//! Class, field and method attributes.
//!
//! Only `Code` is modelled structurally, and only when the class is read with
//! [`crate::classfile::ReadDepth::Code`]. Every other attribute is carried as its name and
//! raw body. Since the constant pool is append-only during a rewrite, the pool indices
//! inside raw bodies stay valid.
//!
//! Annotations are the one raw attribute the engine looks into: [`annotation_types`]
//! lists the annotation types of a `Runtime(In)VisibleAnnotations` body, which is all the
//! instrumentation policy needs.

use crate::{
    assembly::instruction::Code,
    classfile::constant::ConstantPool,
    file::parser::Parser,
    Result,
};

/// `Code`
pub const CODE: &str = "Code";
/// `RuntimeVisibleAnnotations`
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
/// `RuntimeInvisibleAnnotations`
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
/// `StackMapTable`
pub const STACK_MAP_TABLE: &str = "StackMapTable";
/// `Exceptions`
pub const EXCEPTIONS: &str = "Exceptions";
/// `Signature`
pub const SIGNATURE: &str = "Signature";

/// One attribute of a class, field or method.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// A decoded method body
    Code(Box<Code>),
    /// Any attribute kept as raw bytes (including undecoded `Code`)
    Raw {
        /// Attribute name
        name: String,
        /// Attribute body, without the name index and length
        info: Vec<u8>,
    },
}

impl Attribute {
    /// The attribute's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Attribute::Code(_) => CODE,
            Attribute::Raw { name, .. } => name,
        }
    }

    /// Returns `true` for a `Code` attribute, decoded or raw.
    #[must_use]
    pub fn is_code(&self) -> bool {
        self.name() == CODE
    }

    /// Reads `attributes_count` followed by the attributes themselves.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for truncated data or bad name indices.
    pub fn parse_all(parser: &mut Parser<'_>, pool: &ConstantPool) -> Result<Vec<Attribute>> {
        let count = parser.read_be::<u16>()?;
        let mut attributes = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let name = pool.utf8(parser.read_be::<u16>()?)?.to_string();
            let length = parser.read_be::<u32>()? as usize;
            let info = parser.read_bytes(length)?.to_vec();
            attributes.push(Attribute::Raw { name, info });
        }
        Ok(attributes)
    }
}

/// Binary names of the annotation types in a `Runtime(In)VisibleAnnotations` body.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for truncated bodies, unknown element tags or bad
/// pool references.
pub fn annotation_types(info: &[u8], pool: &ConstantPool) -> Result<Vec<String>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut types = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        types.push(read_annotation(&mut parser, pool)?);
    }
    Ok(types)
}

fn read_annotation(parser: &mut Parser<'_>, pool: &ConstantPool) -> Result<String> {
    let descriptor = pool.utf8(parser.read_be::<u16>()?)?;
    let name = descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .ok_or_else(|| malformed_error!("annotation type '{}' is not a class", descriptor))?
        .replace('/', ".");

    let pairs = parser.read_be::<u16>()?;
    for _ in 0..pairs {
        parser.advance_by(2)?;
        skip_element_value(parser, pool)?;
    }
    Ok(name)
}

fn skip_element_value(parser: &mut Parser<'_>, pool: &ConstantPool) -> Result<()> {
    match parser.read_be::<u8>()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            parser.advance_by(2)?;
        }
        b'e' => parser.advance_by(4)?,
        b'@' => {
            read_annotation(parser, pool)?;
        }
        b'[' => {
            let values = parser.read_be::<u16>()?;
            for _ in 0..values {
                skip_element_value(parser, pool)?;
            }
        }
        other => {
            return Err(malformed_error!(
                "unknown annotation element tag '{}'",
                char::from(other)
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::io::write_be;

    #[test]
    fn test_annotation_types_skip_nested_values() {
        let mut pool = ConstantPool::new();
        let outer = pool.utf8_index("Lorg/shadowbox/annotation/Instrument;").unwrap();
        let inner = pool.utf8_index("Lpkg/Inner;").unwrap();
        let element = pool.utf8_index("value").unwrap();
        let text = pool.utf8_index("text").unwrap();
        let hidden = pool.utf8_index("Lpkg/Hidden;").unwrap();

        let mut info = Vec::new();
        write_be(&mut info, 2u16);
        // @Instrument(value = { @Inner(value = "text"), 'e' })
        write_be(&mut info, outer);
        write_be(&mut info, 1u16);
        write_be(&mut info, element);
        info.push(b'[');
        write_be(&mut info, 2u16);
        info.push(b'@');
        write_be(&mut info, inner);
        write_be(&mut info, 1u16);
        write_be(&mut info, element);
        info.push(b's');
        write_be(&mut info, text);
        info.push(b'e');
        write_be(&mut info, inner);
        write_be(&mut info, text);
        // @Hidden
        write_be(&mut info, hidden);
        write_be(&mut info, 0u16);

        let types = annotation_types(&info, &pool).unwrap();
        assert_eq!(types, vec!["org.shadowbox.annotation.Instrument", "pkg.Hidden"]);
    }

    #[test]
    fn test_unknown_element_tag() {
        let mut pool = ConstantPool::new();
        let ty = pool.utf8_index("Lpkg/A;").unwrap();
        let element = pool.utf8_index("value").unwrap();
        let mut info = Vec::new();
        write_be(&mut info, 1u16);
        write_be(&mut info, ty);
        write_be(&mut info, 1u16);
        write_be(&mut info, element);
        info.push(b'?');
        assert!(annotation_types(&info, &pool).is_err());
    }
}
