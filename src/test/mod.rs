//! Factories for class files used by unit tests.
//!
//! [`ClassBuilder`] assembles small classes from [`MethodGenerator`] closures and
//! serializes them through the crate's own writer, so tests can feed realistic bytes to
//! the reader, the transformer and the sandbox without checked-in `.class` fixtures.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    assembly::{decoder::decode_instructions, generator::MethodGenerator, opcodes::*},
    classfile::{
        attribute::{
            Attribute, RUNTIME_INVISIBLE_ANNOTATIONS, RUNTIME_VISIBLE_ANNOTATIONS,
            STACK_MAP_TABLE,
        },
        internal_name, ClassAccess, ClassFile, ConstantPool, FieldAccess, FieldInfo,
        MethodAccess, MethodInfo, ReadDepth,
    },
    file::{io::write_be, parser::Parser},
};

/// Builds a class file for tests.
pub(crate) struct ClassBuilder {
    class: ClassFile,
    visible: Vec<String>,
    invisible: Vec<String>,
}

impl ClassBuilder {
    /// A public class extending `java/lang/Object`.
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            class: ClassFile::new(
                name,
                Some("java/lang/Object"),
                ClassAccess::PUBLIC | ClassAccess::SUPER,
            ),
            visible: Vec::new(),
            invisible: Vec::new(),
        }
    }

    pub fn extends(mut self, super_class: &str) -> Self {
        self.class.super_class = Some(super_class.to_string());
        self
    }

    pub fn access(mut self, access: ClassAccess) -> Self {
        self.class.access = access;
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.class.interfaces.push(interface.to_string());
        self
    }

    /// Adds an annotation given by binary name; `visible` picks the runtime-visible table.
    pub fn annotation(mut self, binary_name: &str, visible: bool) -> Self {
        if visible {
            self.visible.push(binary_name.to_string());
        } else {
            self.invisible.push(binary_name.to_string());
        }
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str) -> Self {
        self.class
            .fields
            .push(FieldInfo::new(FieldAccess::PRIVATE, name, descriptor));
        self
    }

    pub fn method_with(
        mut self,
        access: MethodAccess,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut MethodGenerator),
    ) -> Self {
        let mut gen =
            MethodGenerator::new(descriptor, access.contains(MethodAccess::STATIC)).unwrap();
        body(&mut gen);
        self.class
            .methods
            .push(MethodInfo::with_code(access, name, descriptor, gen.finish()));
        self
    }

    pub fn method(
        self,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut MethodGenerator),
    ) -> Self {
        self.method_with(MethodAccess::PUBLIC, name, descriptor, body)
    }

    pub fn static_method(
        self,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut MethodGenerator),
    ) -> Self {
        self.method_with(MethodAccess::PUBLIC | MethodAccess::STATIC, name, descriptor, body)
    }

    /// A method without a body (abstract or native).
    pub fn bodyless_method(mut self, access: MethodAccess, name: &str, descriptor: &str) -> Self {
        self.class
            .methods
            .push(MethodInfo::new(access, name, descriptor));
        self
    }

    pub fn constructor(self, descriptor: &str, body: impl FnOnce(&mut MethodGenerator)) -> Self {
        self.method_with(MethodAccess::PUBLIC, "<init>", descriptor, body)
    }

    /// `public <init>() { super(); }`
    pub fn default_constructor(self) -> Self {
        let super_class = self
            .class
            .super_class
            .clone()
            .unwrap_or_else(|| "java/lang/Object".to_string());
        self.constructor("()V", |gen| {
            gen.load_this();
            gen.invoke(INVOKESPECIAL, &super_class, "<init>", "()V");
            gen.op(RETURN);
        })
    }

    pub fn static_init(self, body: impl FnOnce(&mut MethodGenerator)) -> Self {
        self.method_with(MethodAccess::STATIC, "<clinit>", "()V", body)
    }

    /// The finished model, with annotation attributes attached.
    pub fn class_file(mut self) -> ClassFile {
        for (name, types) in [
            (RUNTIME_VISIBLE_ANNOTATIONS, &self.visible),
            (RUNTIME_INVISIBLE_ANNOTATIONS, &self.invisible),
        ] {
            if types.is_empty() {
                continue;
            }
            let mut info = Vec::new();
            write_be(&mut info, types.len() as u16);
            for binary in types {
                let descriptor = format!("L{};", internal_name(binary));
                write_be(&mut info, self.class.constant_pool.utf8_index(&descriptor).unwrap());
                write_be(&mut info, 0u16);
            }
            self.class.attributes.push(Attribute::Raw {
                name: name.to_string(),
                info,
            });
        }
        self.class
    }

    /// Serialized class bytes.
    pub fn build(self) -> Vec<u8> {
        self.class_file().to_bytes().unwrap()
    }
}

/// Offsets of a `Code` attribute body that need a stack-map frame (branch targets and
/// handler entries), and the offsets its `StackMapTable` describes.
pub(crate) fn frame_coverage(info: &[u8], pool: &ConstantPool) -> (BTreeSet<u32>, BTreeSet<u32>) {
    let mut parser = Parser::new(info);
    parser.read_be::<u32>().unwrap();
    let length = parser.read_be::<u32>().unwrap() as usize;
    let bytecode = parser.read_bytes(length).unwrap();
    let mut required: BTreeSet<u32> = decode_instructions(bytecode, pool)
        .unwrap()
        .iter()
        .flat_map(|(_, instruction)| instruction.targets())
        .map(|label| label.0)
        .collect();
    for _ in 0..parser.read_be::<u16>().unwrap() {
        // start and end
        parser.read_be::<u32>().unwrap();
        required.insert(u32::from(parser.read_be::<u16>().unwrap()));
        parser.read_be::<u16>().unwrap();
    }

    let mut described = BTreeSet::new();
    for _ in 0..parser.read_be::<u16>().unwrap() {
        let name = pool.utf8(parser.read_be::<u16>().unwrap()).unwrap().to_string();
        let length = parser.read_be::<u32>().unwrap() as usize;
        let body = parser.read_bytes(length).unwrap();
        if name == STACK_MAP_TABLE {
            described = stack_map_offsets(body);
        }
    }
    (required, described)
}

fn stack_map_offsets(body: &[u8]) -> BTreeSet<u32> {
    fn skip_types(parser: &mut Parser<'_>, count: u16) {
        for _ in 0..count {
            if matches!(parser.read_be::<u8>().unwrap(), 7 | 8) {
                parser.read_be::<u16>().unwrap();
            }
        }
    }

    let mut parser = Parser::new(body);
    let mut offsets = BTreeSet::new();
    let mut previous: Option<u32> = None;
    for _ in 0..parser.read_be::<u16>().unwrap() {
        let kind = parser.read_be::<u8>().unwrap();
        let delta = match kind {
            0..=63 => u32::from(kind),
            64..=127 => {
                skip_types(&mut parser, 1);
                u32::from(kind - 64)
            }
            _ => {
                let delta = u32::from(parser.read_be::<u16>().unwrap());
                match kind {
                    247 => skip_types(&mut parser, 1),
                    252..=254 => skip_types(&mut parser, u16::from(kind - 251)),
                    255 => {
                        let locals = parser.read_be::<u16>().unwrap();
                        skip_types(&mut parser, locals);
                        let stack = parser.read_be::<u16>().unwrap();
                        skip_types(&mut parser, stack);
                    }
                    _ => {}
                }
                delta
            }
        };
        let offset = previous.map_or(delta, |previous| previous + delta + 1);
        offsets.insert(offset);
        previous = Some(offset);
    }
    offsets
}

/// Parses bytes with decoded bodies.
pub(crate) fn parse_code(bytes: &[u8]) -> ClassFile {
    ClassFile::parse(bytes, ReadDepth::Code).unwrap()
}

/// `pkg/a/Widget`: a field, a constructor taking an `int`, an instance getter, a static
/// helper and a static initializer.
pub(crate) fn widget_class() -> Vec<u8> {
    ClassBuilder::new("pkg/a/Widget")
        .field("size", "I")
        .default_constructor()
        .constructor("(I)V", |gen| {
            gen.load_this();
            gen.invoke(INVOKESPECIAL, "java/lang/Object", "<init>", "()V");
            gen.load_this();
            gen.load_arg(0);
            gen.field(PUTFIELD, "pkg/a/Widget", "size", "I");
            gen.op(RETURN);
        })
        .method("size", "()I", |gen| {
            gen.load_this();
            gen.field(GETFIELD, "pkg/a/Widget", "size", "I");
            gen.return_value();
        })
        .static_method("twice", "(J)J", |gen| {
            gen.load_arg(0);
            gen.load_arg(0);
            gen.op(LADD);
            gen.return_value();
        })
        .static_init(|gen| {
            gen.op(NOP);
            gen.op(RETURN);
        })
        .build()
}

/// A map of class bytes keyed by binary name, for in-memory suppliers.
pub(crate) fn class_map(classes: Vec<(&str, Vec<u8>)>) -> BTreeMap<String, Vec<u8>> {
    classes
        .into_iter()
        .map(|(name, bytes)| (name.to_string(), bytes))
        .collect()
}
