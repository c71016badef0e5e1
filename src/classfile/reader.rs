//! Class-file parsing.

use crate::{
    classfile::{
        access::{ClassAccess, FieldAccess, MethodAccess},
        attribute::Attribute,
        class::{ClassFile, FieldInfo, MethodInfo},
        constant::ConstantPool,
    },
    file::parser::Parser,
    Result,
};

/// `0xCAFEBABE`
pub const MAGIC: u32 = 0xCAFE_BABE;

/// How much of a class file to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadDepth {
    /// Everything except method bodies, which stay raw
    #[default]
    Headers,
    /// Method bodies decoded into symbolic instructions as well
    Code,
}

impl ClassFile {
    /// Parses a class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a bad magic number, truncated data, invalid
    /// pool references, trailing bytes or (at [`ReadDepth::Code`]) undecodable bodies.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use shadowbox::classfile::{ClassFile, ReadDepth};
    ///
    /// let bytes = std::fs::read("classes/pkg/a/Widget.class")?;
    /// let class = ClassFile::parse(&bytes, ReadDepth::Headers)?;
    /// println!("{} extends {:?}", class.this_class, class.super_class);
    /// # Ok::<(), shadowbox::Error>(())
    /// ```
    pub fn parse(data: &[u8], depth: ReadDepth) -> Result<ClassFile> {
        let mut parser = Parser::new(data);

        let magic = parser.read_be::<u32>()?;
        if magic != MAGIC {
            return Err(malformed_error!("bad magic {:#010x}", magic));
        }
        let minor_version = parser.read_be::<u16>()?;
        let major_version = parser.read_be::<u16>()?;
        let constant_pool = ConstantPool::parse(&mut parser)?;

        let access = ClassAccess::from_bits_retain(parser.read_be::<u16>()?);
        let this_class = constant_pool.class_name(parser.read_be::<u16>()?)?.to_string();
        let super_class = match parser.read_be::<u16>()? {
            0 => None,
            index => Some(constant_pool.class_name(index)?.to_string()),
        };

        let interface_count = parser.read_be::<u16>()?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for _ in 0..interface_count {
            interfaces.push(constant_pool.class_name(parser.read_be::<u16>()?)?.to_string());
        }

        let field_count = parser.read_be::<u16>()?;
        let mut fields = Vec::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            let access = FieldAccess::from_bits_retain(parser.read_be::<u16>()?);
            let name = constant_pool.utf8(parser.read_be::<u16>()?)?.to_string();
            let descriptor = constant_pool.utf8(parser.read_be::<u16>()?)?.to_string();
            let attributes = Attribute::parse_all(&mut parser, &constant_pool)?;
            fields.push(FieldInfo {
                access,
                name,
                descriptor,
                attributes,
            });
        }

        let method_count = parser.read_be::<u16>()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            let access = MethodAccess::from_bits_retain(parser.read_be::<u16>()?);
            let name = constant_pool.utf8(parser.read_be::<u16>()?)?.to_string();
            let descriptor = constant_pool.utf8(parser.read_be::<u16>()?)?.to_string();
            let attributes = Attribute::parse_all(&mut parser, &constant_pool)?;
            methods.push(MethodInfo {
                access,
                name,
                descriptor,
                attributes,
            });
        }

        let attributes = Attribute::parse_all(&mut parser, &constant_pool)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after class {}",
                parser.len() - parser.pos(),
                this_class
            ));
        }

        let mut class = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        if depth == ReadDepth::Code {
            class.decode_bodies()?;
        }
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{instruction::Instruction, opcodes::*},
        test::ClassBuilder,
    };

    #[test]
    fn test_parse_headers_keeps_code_raw() {
        let bytes = ClassBuilder::new("pkg/a/Widget")
            .method("size", "()I", |gen| {
                gen.push_int(3);
                gen.return_value();
            })
            .build();

        let class = ClassFile::parse(&bytes, ReadDepth::Headers).unwrap();
        assert_eq!(class.this_class, "pkg/a/Widget");
        assert_eq!(class.super_class.as_deref(), Some("java/lang/Object"));
        let size = class.method("size", "()I").unwrap();
        assert!(size.code().is_none());
        assert!(size.attributes[0].is_code());
    }

    #[test]
    fn test_parse_code_decodes_bodies() {
        let bytes = ClassBuilder::new("pkg/a/Widget")
            .method("size", "()I", |gen| {
                gen.push_int(3);
                gen.return_value();
            })
            .build();

        let class = ClassFile::parse(&bytes, ReadDepth::Code).unwrap();
        let code = class.method("size", "()I").unwrap().code().unwrap();
        assert_eq!(
            code.instructions,
            vec![Instruction::op(ICONST_3), Instruction::op(IRETURN)]
        );
    }

    #[test]
    fn test_bad_magic_and_trailing_bytes() {
        let mut bytes = ClassBuilder::new("pkg/a/Widget").build();
        bytes.push(0);
        assert!(ClassFile::parse(&bytes, ReadDepth::Headers).is_err());

        bytes.pop();
        bytes[0] = 0xCB;
        assert!(ClassFile::parse(&bytes, ReadDepth::Headers).is_err());
    }
}
