//! Symbolic JVM instructions.
//!
//! Method bodies are rewritten as lists of [`Instruction`]s rather than bytes. Operands are
//! resolved (class names, member names, descriptors, constants) so instructions can be
//! moved between methods and re-encoded against a grown constant pool, and branch targets
//! are [`Label`]s that live in the list as pseudo-instructions, so inserting or removing
//! code never requires offset arithmetic.

use crate::{
    assembly::opcodes::{self, mnemonic},
    classfile::descriptor::{FieldType, MethodDescriptor},
    Result,
};

/// A position in an instruction list.
///
/// Labels are only meaningful within the method body that allocated them; see
/// [`Code::new_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// The constant loaded by `ldc`, `ldc_w` and `ldc2_w`.
#[derive(Debug, Clone, PartialEq)]
pub enum LdcConstant {
    /// `int`
    Int(i32),
    /// `float`
    Float(f32),
    /// `long`
    Long(i64),
    /// `double`
    Double(f64),
    /// `java.lang.String`
    String(String),
    /// `java.lang.Class` (internal name or array descriptor)
    Class(String),
    /// `java.lang.invoke.MethodType`
    MethodType(String),
    /// Method handles, dynamic constants and strings that are not valid Unicode, kept as a
    /// reference into the original constant pool
    Raw {
        /// Pool index
        index: u16,
        /// Loaded with `ldc2_w`
        wide: bool,
    },
}

impl LdcConstant {
    /// Returns `true` for constants loaded with `ldc2_w`.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        match self {
            LdcConstant::Long(_) | LdcConstant::Double(_) => true,
            LdcConstant::Raw { wide, .. } => *wide,
            _ => false,
        }
    }
}

/// One instruction or pseudo-instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Marks the position of a label
    Label(Label),
    /// Source line of the instructions that follow
    LineNumber(u16),
    /// An opcode without operands
    Op(u8),
    /// Local variable load/store or `ret` (always the long opcode form)
    Var {
        /// `ILOAD`..`ALOAD`, `ISTORE`..`ASTORE` or `RET`
        opcode: u8,
        /// Local variable index
        index: u16,
    },
    /// `iinc`
    Iinc {
        /// Local variable index
        index: u16,
        /// Signed increment
        delta: i16,
    },
    /// `bipush` / `sipush`
    Push {
        /// `BIPUSH` or `SIPUSH`
        opcode: u8,
        /// Pushed value
        value: i16,
    },
    /// `ldc` family
    Ldc(LdcConstant),
    /// `new`, `anewarray`, `checkcast`, `instanceof`
    Type {
        /// Opcode
        opcode: u8,
        /// Internal name or array descriptor
        class: String,
    },
    /// Field access
    Field {
        /// `GETSTATIC`, `PUTSTATIC`, `GETFIELD` or `PUTFIELD`
        opcode: u8,
        /// Internal name of the owner
        owner: String,
        /// Field name
        name: String,
        /// Field descriptor
        descriptor: String,
    },
    /// Method invocation other than `invokedynamic`
    Method {
        /// `INVOKEVIRTUAL`, `INVOKESPECIAL`, `INVOKESTATIC` or `INVOKEINTERFACE`
        opcode: u8,
        /// Internal name of the owner
        owner: String,
        /// Method name
        name: String,
        /// Method descriptor
        descriptor: String,
        /// The reference is an `InterfaceMethodref`
        interface: bool,
    },
    /// `invokedynamic`, kept as its original pool index
    InvokeDynamic {
        /// Pool index of the `InvokeDynamic` entry
        index: u16,
        /// Call site name
        name: String,
        /// Call site descriptor
        descriptor: String,
    },
    /// Branch to a label
    Jump {
        /// Conditional branch opcode, `GOTO` or `JSR`
        opcode: u8,
        /// Target
        target: Label,
    },
    /// `tableswitch`
    TableSwitch {
        /// Default target
        default: Label,
        /// Lowest key
        low: i32,
        /// Highest key
        high: i32,
        /// One target per key in `low..=high`
        targets: Vec<Label>,
    },
    /// `lookupswitch`
    LookupSwitch {
        /// Default target
        default: Label,
        /// Key/target pairs sorted by key
        pairs: Vec<(i32, Label)>,
    },
    /// `newarray` with a primitive array type code
    NewArray {
        /// `T_BOOLEAN` (4) .. `T_LONG` (11)
        atype: u8,
    },
    /// `multianewarray`
    MultiANewArray {
        /// Array descriptor
        class: String,
        /// Number of dimensions to allocate
        dimensions: u8,
    },
}

impl Instruction {
    /// `Instruction::Op(opcode)`.
    #[must_use]
    pub fn op(opcode: u8) -> Instruction {
        Instruction::Op(opcode)
    }

    /// A local variable access.
    #[must_use]
    pub fn var(opcode: u8, index: u16) -> Instruction {
        Instruction::Var { opcode, index }
    }

    /// A type instruction (`new`, `anewarray`, `checkcast`, `instanceof`).
    #[must_use]
    pub fn type_insn(opcode: u8, class: impl Into<String>) -> Instruction {
        Instruction::Type {
            opcode,
            class: class.into(),
        }
    }

    /// A field access.
    #[must_use]
    pub fn field(
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Instruction {
        Instruction::Field {
            opcode,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// A method invocation on a class (use [`Instruction::Method`] directly for interface
    /// references).
    #[must_use]
    pub fn method(
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Instruction {
        Instruction::Method {
            opcode,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            interface: opcode == opcodes::INVOKEINTERFACE,
        }
    }

    /// The shortest instruction pushing the `int` constant `value`.
    #[must_use]
    pub fn push_int(value: i32) -> Instruction {
        match value {
            -1..=5 => Instruction::Op((i32::from(opcodes::ICONST_0) + value) as u8),
            _ => {
                if let Ok(byte) = i8::try_from(value) {
                    Instruction::Push {
                        opcode: opcodes::BIPUSH,
                        value: i16::from(byte),
                    }
                } else if let Ok(short) = i16::try_from(value) {
                    Instruction::Push {
                        opcode: opcodes::SIPUSH,
                        value: short,
                    }
                } else {
                    Instruction::Ldc(LdcConstant::Int(value))
                }
            }
        }
    }

    /// Returns the opcode of a real instruction, `None` for labels and line numbers.
    #[must_use]
    pub fn opcode(&self) -> Option<u8> {
        Some(match self {
            Instruction::Label(_) | Instruction::LineNumber(_) => return None,
            Instruction::Op(opcode)
            | Instruction::Var { opcode, .. }
            | Instruction::Push { opcode, .. }
            | Instruction::Type { opcode, .. }
            | Instruction::Field { opcode, .. }
            | Instruction::Method { opcode, .. }
            | Instruction::Jump { opcode, .. } => *opcode,
            Instruction::Iinc { .. } => opcodes::IINC,
            Instruction::Ldc(constant) => {
                if constant.is_wide() {
                    opcodes::LDC2_W
                } else {
                    opcodes::LDC
                }
            }
            Instruction::InvokeDynamic { .. } => opcodes::INVOKEDYNAMIC,
            Instruction::TableSwitch { .. } => opcodes::TABLESWITCH,
            Instruction::LookupSwitch { .. } => opcodes::LOOKUPSWITCH,
            Instruction::NewArray { .. } => opcodes::NEWARRAY,
            Instruction::MultiANewArray { .. } => opcodes::MULTIANEWARRAY,
        })
    }

    /// Returns `true` for labels and line numbers.
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Instruction::Label(_) | Instruction::LineNumber(_))
    }

    /// Returns `true` if control never falls through past this instruction.
    #[must_use]
    pub fn ends_block(&self) -> bool {
        self.opcode().is_some_and(opcodes::ends_block)
    }

    /// Every label this instruction branches to.
    #[must_use]
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Instruction::Jump { target, .. } => vec![*target],
            Instruction::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Instruction::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, label)| *label))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Stack slots popped and pushed by this instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown opcodes or unparsable descriptors.
    pub fn stack_effect(&self) -> Result<(u16, u16)> {
        Ok(match self {
            Instruction::Label(_) | Instruction::LineNumber(_) | Instruction::Iinc { .. } => (0, 0),
            Instruction::Op(opcode) => match opcodes::simple_stack_effect(*opcode) {
                Some((pop, push)) => (u16::from(pop), u16::from(push)),
                None => {
                    return Err(malformed_error!(
                        "opcode {} ({:#04x}) requires an operand",
                        mnemonic(*opcode),
                        opcode
                    ))
                }
            },
            Instruction::Var { opcode, .. } => {
                let (pop, push, _) = opcodes::var_effect(*opcode);
                (u16::from(pop), u16::from(push))
            }
            Instruction::Push { .. } => (0, 1),
            Instruction::Ldc(constant) => (0, if constant.is_wide() { 2 } else { 1 }),
            Instruction::Type { opcode, .. } => {
                if *opcode == opcodes::NEW {
                    (0, 1)
                } else {
                    (1, 1)
                }
            }
            Instruction::Field {
                opcode, descriptor, ..
            } => {
                let size = FieldType::parse(descriptor)?.size();
                match *opcode {
                    opcodes::GETSTATIC => (0, size),
                    opcodes::PUTSTATIC => (size, 0),
                    opcodes::GETFIELD => (1, size),
                    _ => (1 + size, 0),
                }
            }
            Instruction::Method {
                opcode, descriptor, ..
            } => {
                let parsed = MethodDescriptor::parse(descriptor)?;
                let receiver = u16::from(*opcode != opcodes::INVOKESTATIC);
                (parsed.args_size() + receiver, parsed.ret.size())
            }
            Instruction::InvokeDynamic { descriptor, .. } => {
                let parsed = MethodDescriptor::parse(descriptor)?;
                (parsed.args_size(), parsed.ret.size())
            }
            Instruction::Jump { opcode, .. } => match *opcode {
                opcodes::JSR | opcodes::JSR_W => (0, 1),
                other => (u16::from(opcodes::jump_pops(other)), 0),
            },
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => (1, 0),
            Instruction::NewArray { .. } => (1, 1),
            Instruction::MultiANewArray { dimensions, .. } => (u16::from(*dimensions), 1),
        })
    }
}

/// An entry of a method's exception table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start: Label,
    /// End of the protected range (exclusive)
    pub end: Label,
    /// Handler entry point
    pub handler: Label,
    /// Caught class, `None` for `finally`-style catch-all handlers
    pub catch_type: Option<String>,
}

/// A decoded method body (the `Code` attribute).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Code {
    /// `max_stack` as read; the encoder never writes less than the computed depth
    pub max_stack: u16,
    /// `max_locals` as read; the encoder never writes less than the computed count
    pub max_locals: u16,
    /// Instructions and pseudo-instructions in order
    pub instructions: Vec<Instruction>,
    /// Exception table in priority order
    pub handlers: Vec<ExceptionHandler>,
    next_label: u32,
}

impl Code {
    /// Creates a body from parts, reserving label ids up to `next_label`.
    #[must_use]
    pub fn from_parts(
        instructions: Vec<Instruction>,
        handlers: Vec<ExceptionHandler>,
        next_label: u32,
    ) -> Code {
        Code {
            max_stack: 0,
            max_locals: 0,
            instructions,
            handlers,
            next_label,
        }
    }

    /// Allocates a label that is unique within this body.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// The first label id not yet handed out.
    #[must_use]
    pub fn next_label(&self) -> u32 {
        self.next_label
    }

    /// Raises the label counter so ids below `next` are never handed out again.
    pub fn reserve_labels(&mut self, next: u32) {
        self.next_label = self.next_label.max(next);
    }

    /// Number of real (non-pseudo) instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.iter().filter(|i| !i.is_pseudo()).count()
    }

    /// Returns `true` if the body holds no real instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes::*;

    #[test]
    fn test_push_int_picks_shortest_form() {
        assert_eq!(Instruction::push_int(-1), Instruction::Op(ICONST_M1));
        assert_eq!(Instruction::push_int(5), Instruction::Op(ICONST_5));
        assert_eq!(
            Instruction::push_int(-128),
            Instruction::Push {
                opcode: BIPUSH,
                value: -128
            }
        );
        assert_eq!(
            Instruction::push_int(300),
            Instruction::Push {
                opcode: SIPUSH,
                value: 300
            }
        );
        assert_eq!(
            Instruction::push_int(70_000),
            Instruction::Ldc(LdcConstant::Int(70_000))
        );
    }

    #[test]
    fn test_stack_effect_of_invocations() {
        let virtual_call = Instruction::method(INVOKEVIRTUAL, "a/B", "m", "(JI)D");
        assert_eq!(virtual_call.stack_effect().unwrap(), (4, 2));

        let static_call = Instruction::method(INVOKESTATIC, "a/B", "m", "()V");
        assert_eq!(static_call.stack_effect().unwrap(), (0, 0));

        let put = Instruction::field(PUTFIELD, "a/B", "f", "J");
        assert_eq!(put.stack_effect().unwrap(), (3, 0));

        assert!(Instruction::Op(INVOKESTATIC).stack_effect().is_err());
    }

    #[test]
    fn test_targets_and_block_end() {
        let switch = Instruction::LookupSwitch {
            default: Label(0),
            pairs: vec![(1, Label(1)), (9, Label(2))],
        };
        assert_eq!(switch.targets(), vec![Label(0), Label(1), Label(2)]);
        assert!(switch.ends_block());
        assert!(!Instruction::Jump {
            opcode: IFEQ,
            target: Label(3)
        }
        .ends_block());
    }

    #[test]
    fn test_labels_are_unique_per_body() {
        let mut code = Code::from_parts(Vec::new(), Vec::new(), 4);
        assert_eq!(code.new_label(), Label(4));
        assert_eq!(code.new_label(), Label(5));
        code.reserve_labels(3);
        assert_eq!(code.new_label(), Label(6));
    }
}
