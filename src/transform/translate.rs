use std::collections::BTreeMap;

use crate::{
    classfile::{
        descriptor::{remap_class_name, remap_field_descriptor, remap_method_descriptor},
        ClassFile,
    },
    Result,
};

/// Replaces every reference to a translated type, keyed and valued by internal names.
///
/// The pool is remapped in place, so raw bodies and attributes that point into it follow
/// without being decoded; the resolved names of the model (this class, superclass,
/// interfaces, member descriptors) are remapped alongside. Must run before bodies are
/// decoded. Returns `true` if anything changed.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unparsable descriptors and
/// [`crate::Error::StructuralViolation`] if the pool overflows.
pub(crate) fn translate_types(
    class: &mut ClassFile,
    translations: &BTreeMap<String, String>,
) -> Result<bool> {
    if translations.is_empty() {
        return Ok(false);
    }

    let mut changed = class.constant_pool.remap_types(translations)?;

    let mut rename = |name: &mut String| {
        if let Some(mapped) = remap_class_name(name, translations) {
            *name = mapped;
            changed = true;
        }
    };
    rename(&mut class.this_class);
    if let Some(super_class) = class.super_class.as_mut() {
        rename(super_class);
    }
    class.interfaces.iter_mut().for_each(&mut rename);

    for field in &mut class.fields {
        if let Some(mapped) = remap_field_descriptor(&field.descriptor, translations)? {
            field.descriptor = mapped;
            changed = true;
        }
    }
    for method in &mut class.methods {
        if let Some(mapped) = remap_method_descriptor(&method.descriptor, translations)? {
            method.descriptor = mapped;
            changed = true;
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{opcodes::*, Instruction},
        classfile::ReadDepth,
        test::ClassBuilder,
    };

    fn translations() -> BTreeMap<String, String> {
        BTreeMap::from([("pkg/a/Old".to_string(), "pkg/a/New".to_string())])
    }

    #[test]
    fn test_descriptors_and_bodies_follow() {
        let bytes = ClassBuilder::new("pkg/a/User")
            .field("held", "[[Lpkg/a/Old;")
            .method("make", "(Lpkg/a/Old;I)Lpkg/a/Old;", |gen| {
                gen.emit(Instruction::type_insn(NEW, "pkg/a/Old"));
                gen.op(DUP);
                gen.invoke(INVOKESPECIAL, "pkg/a/Old", "<init>", "()V");
                gen.op(ARETURN);
            })
            .build();

        let mut class = ClassFile::parse(&bytes, ReadDepth::Headers).unwrap();
        assert!(translate_types(&mut class, &translations()).unwrap());
        class.decode_bodies().unwrap();

        assert_eq!(class.field("held").unwrap().descriptor, "[[Lpkg/a/New;");
        let make = class.method("make", "(Lpkg/a/New;I)Lpkg/a/New;").unwrap();
        let code = make.code().unwrap();
        assert_eq!(code.instructions[0], Instruction::type_insn(NEW, "pkg/a/New"));
        assert!(matches!(
            &code.instructions[2],
            Instruction::Method { owner, .. } if owner == "pkg/a/New"
        ));
    }

    #[test]
    fn test_raw_bodies_are_rewritten() {
        let bytes = ClassBuilder::new("pkg/a/User")
            .extends("pkg/a/Old")
            .default_constructor()
            .build();

        let mut class = ClassFile::parse(&bytes, ReadDepth::Headers).unwrap();
        translate_types(&mut class, &translations()).unwrap();
        let written = class.to_bytes().unwrap();

        let reread = ClassFile::parse(&written, ReadDepth::Code).unwrap();
        assert_eq!(reread.super_class.as_deref(), Some("pkg/a/New"));
        let init = reread.method("<init>", "()V").unwrap().code().unwrap();
        assert!(init.instructions.iter().any(|insn| matches!(
            insn,
            Instruction::Method { owner, .. } if owner == "pkg/a/New"
        )));
    }

    #[test]
    fn test_untouched_without_translations() {
        let bytes = ClassBuilder::new("pkg/a/User").default_constructor().build();
        let mut class = ClassFile::parse(&bytes, ReadDepth::Headers).unwrap();
        assert!(!translate_types(&mut class, &BTreeMap::new()).unwrap());
        assert!(!translate_types(&mut class, &translations()).unwrap());
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }
}
