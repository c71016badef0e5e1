//! Class files shared by the integration tests, assembled through the public API.

#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Arc};

use shadowbox::{
    assembly::{opcodes::*, Instruction, MethodGenerator},
    classfile::{ClassAccess, ClassFile, FieldAccess, FieldInfo, MethodAccess, MethodInfo},
    sandbox::{MemorySupplier, SystemNamespace},
};

pub fn method(
    access: MethodAccess,
    name: &str,
    descriptor: &str,
    body: impl FnOnce(&mut MethodGenerator),
) -> MethodInfo {
    let mut gen = MethodGenerator::new(descriptor, access.contains(MethodAccess::STATIC)).unwrap();
    body(&mut gen);
    MethodInfo::with_code(access, name, descriptor, gen.finish())
}

pub fn default_constructor(super_class: &str) -> MethodInfo {
    let super_class = super_class.to_string();
    method(MethodAccess::PUBLIC, "<init>", "()V", move |gen| {
        gen.load_this();
        gen.invoke(INVOKESPECIAL, &super_class, "<init>", "()V");
        gen.op(RETURN);
    })
}

pub fn class(name: &str, super_class: &str, methods: Vec<MethodInfo>) -> Vec<u8> {
    let mut class = ClassFile::new(
        name,
        Some(super_class),
        ClassAccess::PUBLIC | ClassAccess::SUPER,
    );
    class.methods = methods;
    class.to_bytes().unwrap()
}

/// `pkg/a/Widget`: `size()` returns the `size` field, `area(I)J` multiplies, `now()J`
/// calls `System.nanoTime`, `fail()V` throws `IllegalStateException`.
pub fn widget() -> Vec<u8> {
    let mut class = ClassFile::new(
        "pkg/a/Widget",
        Some("java/lang/Object"),
        ClassAccess::PUBLIC | ClassAccess::SUPER,
    );
    class
        .fields
        .push(FieldInfo::new(FieldAccess::PRIVATE, "size", "I"));
    class.methods = vec![
        default_constructor("java/lang/Object"),
        method(MethodAccess::PUBLIC, "size", "()I", |gen| {
            gen.load_this();
            gen.field(GETFIELD, "pkg/a/Widget", "size", "I");
            gen.return_value();
        }),
        method(MethodAccess::PUBLIC, "area", "(I)J", |gen| {
            gen.load_this();
            gen.field(GETFIELD, "pkg/a/Widget", "size", "I");
            gen.load_arg(0);
            gen.op(IMUL);
            gen.op(I2L);
            gen.return_value();
        }),
        method(
            MethodAccess::PUBLIC | MethodAccess::STATIC,
            "now",
            "()J",
            |gen| {
                gen.invoke(INVOKESTATIC, "java/lang/System", "nanoTime", "()J");
                gen.return_value();
            },
        ),
        method(MethodAccess::PUBLIC, "fail", "()V", |gen| {
            gen.emit(Instruction::type_insn(NEW, "java/lang/IllegalStateException"));
            gen.op(DUP);
            gen.invoke(
                INVOKESPECIAL,
                "java/lang/IllegalStateException",
                "<init>",
                "()V",
            );
            gen.op(ATHROW);
        }),
        method(MethodAccess::STATIC, "<clinit>", "()V", |gen| gen.op(RETURN)),
    ];
    class.to_bytes().unwrap()
}

/// The classes of the acquisition scenario: `pkg.a.Widget`, `pkg.a.Gadget` (a widget),
/// `pkg.a.Skip`, `pkg.b.Other` and a platform class `java.lang.Thread`.
pub fn classes() -> BTreeMap<String, Vec<u8>> {
    let mut classes = BTreeMap::new();
    classes.insert("pkg.a.Widget".to_string(), widget());
    classes.insert(
        "pkg.a.Gadget".to_string(),
        class(
            "pkg/a/Gadget",
            "pkg/a/Widget",
            vec![default_constructor("pkg/a/Widget")],
        ),
    );
    classes.insert(
        "pkg.a.Skip".to_string(),
        class(
            "pkg/a/Skip",
            "java/lang/Object",
            vec![default_constructor("java/lang/Object")],
        ),
    );
    classes.insert(
        "pkg.b.Other".to_string(),
        class(
            "pkg/b/Other",
            "java/lang/Object",
            vec![default_constructor("java/lang/Object")],
        ),
    );
    classes.insert(
        "java.lang.Thread".to_string(),
        class(
            "java/lang/Thread",
            "java/lang/Object",
            vec![default_constructor("java/lang/Object")],
        ),
    );
    classes
}

pub fn system() -> Arc<SystemNamespace> {
    Arc::new(SystemNamespace::new(Arc::new(MemorySupplier::new(classes()))))
}

/// Names of the `org/shadowbox/internal/Hooks` methods a body calls, in order.
pub fn hook_calls(method: &MethodInfo) -> Vec<String> {
    method
        .code()
        .map(|code| {
            code.instructions
                .iter()
                .filter_map(|insn| match insn {
                    Instruction::Method { owner, name, .. }
                        if owner == shadowbox::transform::names::HOOKS =>
                    {
                        Some(name.clone())
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
