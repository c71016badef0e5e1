//! Class-file serialization.
//!
//! Members and attributes are encoded first, interning every name, descriptor and
//! operand they need, and the constant pool is written last-but-first: only once the
//! body is complete is the pool final.

use crate::{
    assembly::{
        encoder::{encode_code, encode_code_with_frames, parameter_slots},
        frames::{Hierarchy, MethodContext, UnknownHierarchy, FRAMES_MIN_VERSION},
    },
    classfile::{
        attribute::{Attribute, CODE},
        class::ClassFile,
        constant::ConstantPool,
        reader::MAGIC,
    },
    file::io::write_be,
    Result,
};

impl ClassFile {
    /// Serializes the class, merging distinct reference types in stack-map frames to
    /// `java/lang/Object`. See [`ClassFile::to_bytes_with`].
    ///
    /// # Errors
    /// As [`ClassFile::to_bytes_with`].
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.to_bytes_with(&UnknownHierarchy)
    }

    /// Serializes the class.
    ///
    /// Decoded bodies are re-encoded with fresh `max_stack`/`max_locals` and, from major
    /// version 50 on, a `StackMapTable` whose reference merges are resolved through
    /// `hierarchy`. Raw attributes are copied unchanged. Output is a pure function of the
    /// model, so identical classes produce identical bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the constant pool, a method body or
    /// a member count exceeds the format's limits, and [`crate::Error::Malformed`] for
    /// inconsistent bodies.
    pub fn to_bytes_with(&mut self, hierarchy: &dyn Hierarchy) -> Result<Vec<u8>> {
        let frames = (self.major_version >= FRAMES_MIN_VERSION).then_some(hierarchy);
        let pool = &mut self.constant_pool;
        let mut body = Vec::with_capacity(4096);

        write_be(&mut body, self.access.bits());
        write_be(&mut body, pool.class_index(&self.this_class)?);
        match &self.super_class {
            Some(super_class) => write_be(&mut body, pool.class_index(super_class)?),
            None => write_be(&mut body, 0u16),
        }

        write_be(&mut body, count(self.interfaces.len(), &self.this_class, "interfaces")?);
        for interface in &self.interfaces {
            write_be(&mut body, pool.class_index(interface)?);
        }

        write_be(&mut body, count(self.fields.len(), &self.this_class, "fields")?);
        for field in &self.fields {
            write_be(&mut body, field.access.bits());
            write_be(&mut body, pool.utf8_index(&field.name)?);
            write_be(&mut body, pool.utf8_index(&field.descriptor)?);
            write_attributes(&mut body, &field.attributes, pool, &self.this_class, None)?;
        }

        write_be(&mut body, count(self.methods.len(), &self.this_class, "methods")?);
        for method in &self.methods {
            write_be(&mut body, method.access.bits());
            write_be(&mut body, pool.utf8_index(&method.name)?);
            write_be(&mut body, pool.utf8_index(&method.descriptor)?);
            let context = MethodContext {
                class: &self.this_class,
                name: &method.name,
                descriptor: &method.descriptor,
                is_static: method.is_static(),
            };
            let code = Some((context, frames));
            write_attributes(&mut body, &method.attributes, pool, &self.this_class, code)
                .map_err(|error| match error {
                    crate::Error::StructuralViolation { message, .. } => {
                        crate::Error::StructuralViolation {
                            location: crate::error::location(
                                &self.this_class,
                                Some(&format!("{}{}", method.name, method.descriptor)),
                            ),
                            message,
                        }
                    }
                    other => other,
                })?;
        }

        write_attributes(&mut body, &self.attributes, pool, &self.this_class, None)?;

        let mut out = Vec::with_capacity(body.len() + pool.len() * 8 + 10);
        write_be(&mut out, MAGIC);
        write_be(&mut out, self.minor_version);
        write_be(&mut out, self.major_version);
        pool.write(&mut out)?;
        out.extend_from_slice(&body);
        Ok(out)
    }
}

fn count(len: usize, class: &str, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| crate::Error::StructuralViolation {
        location: class.to_string(),
        message: format!("{len} {what} exceed 65535"),
    })
}

/// The method owning a `Code` attribute, and the hierarchy for its frames if it gets any.
type CodeOwner<'a> = Option<(MethodContext<'a>, Option<&'a dyn Hierarchy>)>;

fn write_attributes(
    out: &mut Vec<u8>,
    attributes: &[Attribute],
    pool: &mut ConstantPool,
    class: &str,
    owner: CodeOwner<'_>,
) -> Result<()> {
    write_be(out, count(attributes.len(), class, "attributes")?);
    for attribute in attributes {
        match attribute {
            Attribute::Code(code) => {
                let info = match owner {
                    Some((method, Some(hierarchy))) => {
                        encode_code_with_frames(code, pool, &method, hierarchy)?
                    }
                    Some((method, None)) => encode_code(
                        code,
                        pool,
                        parameter_slots(method.descriptor, method.is_static)?,
                    )?,
                    None => encode_code(code, pool, 0)?,
                };
                write_be(out, pool.utf8_index(CODE)?);
                write_be(out, info.len() as u32);
                out.extend_from_slice(&info);
            }
            Attribute::Raw { name, info } => {
                let Ok(length) = u32::try_from(info.len()) else {
                    return Err(crate::Error::StructuralViolation {
                        location: class.to_string(),
                        message: format!("attribute {name} is too large"),
                    });
                };
                write_be(out, pool.utf8_index(name)?);
                write_be(out, length);
                out.extend_from_slice(info);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        classfile::{ClassFile, ReadDepth},
        test::ClassBuilder,
    };

    #[test]
    fn test_write_is_deterministic_and_reparses() {
        let bytes = ClassBuilder::new("pkg/a/Widget")
            .field("count", "I")
            .method("size", "()I", |gen| {
                gen.push_int(300);
                gen.return_value();
            })
            .build();

        let mut first = ClassFile::parse(&bytes, ReadDepth::Code).unwrap();
        let mut second = first.clone();
        let a = first.to_bytes().unwrap();
        let b = second.to_bytes().unwrap();
        assert_eq!(a, b);

        let reparsed = ClassFile::parse(&a, ReadDepth::Code).unwrap();
        assert_eq!(reparsed.methods, first.methods);
        assert_eq!(reparsed.fields, first.fields);
    }

    #[test]
    fn test_raw_bodies_are_copied_verbatim() {
        let bytes = ClassBuilder::new("pkg/a/Widget")
            .method("run", "()V", |gen| gen.return_value())
            .build();
        let mut class = ClassFile::parse(&bytes, ReadDepth::Headers).unwrap();
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }
}
