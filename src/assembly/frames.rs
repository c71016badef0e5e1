//! Stack-map frame computation.
//!
//! Class files of major version 50 and later are checked by the type-checking verifier,
//! which needs a `StackMapTable` frame at every branch target, every exception handler
//! and every instruction that follows an unconditional transfer of control. Rewritten
//! bodies get their frames from a dataflow pass over the symbolic instruction list:
//!
//! 1. The entry frame is derived from the method descriptor (`this` is
//!    `uninitializedThis` inside constructors).
//! 2. Each reachable instruction is executed abstractly; successors and covering
//!    handlers merge the result into their entry frame until nothing changes.
//! 3. Reference types meeting at a join are widened to their closest common superclass,
//!    resolved through a [`Hierarchy`]. Unknown classes and interfaces widen to
//!    `java/lang/Object`.
//!
//! Unreachable instructions have no frame. The encoder overwrites them with `nop ...
//! athrow`, gives them a frame holding only a `java/lang/Throwable`, and cuts them out of
//! the exception table.
//!
//! Bodies using `jsr`/`ret` are left without frames; such code is only legal in class
//! files old enough to fall back to the inference verifier.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    assembly::{
        instruction::{Code, Instruction, Label, LdcConstant},
        opcodes::*,
        stack::label_positions,
    },
    classfile::{
        constant::{Constant, ConstantPool},
        descriptor::{FieldType, MethodDescriptor},
    },
    file::io::write_be,
    Result,
};

/// First class-file major version whose methods carry `StackMapTable` frames.
pub const FRAMES_MIN_VERSION: u16 = 50;

const OBJECT: &str = "java/lang/Object";
const THROWABLE: &str = "java/lang/Throwable";

/// Class hierarchy queries needed to merge reference types.
pub trait Hierarchy {
    /// Superclasses of `class` (internal name), nearest first, or `None` if the class is
    /// unknown.
    fn superclasses(&self, class: &str) -> Option<Vec<String>>;

    /// Returns `true` if `class` is known to be an interface.
    fn is_interface(&self, _class: &str) -> bool {
        false
    }
}

/// A hierarchy that knows no class: distinct reference types merge to
/// `java/lang/Object`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownHierarchy;

impl Hierarchy for UnknownHierarchy {
    fn superclasses(&self, _class: &str) -> Option<Vec<String>> {
        None
    }
}

/// The method a body belongs to.
#[derive(Debug, Clone, Copy)]
pub struct MethodContext<'a> {
    /// Internal name of the declaring class
    pub class: &'a str,
    /// Method name
    pub name: &'a str,
    /// Method descriptor
    pub descriptor: &'a str,
    /// `ACC_STATIC` is set
    pub is_static: bool,
}

/// A `verification_type_info` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    /// Unusable slot, also the second slot of a `long` or `double`
    Top,
    /// `int`, `short`, `char`, `byte` and `boolean`
    Integer,
    /// `float`
    Float,
    /// `long` (followed by [`VerificationType::Top`])
    Long,
    /// `double` (followed by [`VerificationType::Top`])
    Double,
    /// The `null` reference
    Null,
    /// `this` inside a constructor, before the super-constructor call
    UninitializedThis,
    /// A reference of the given internal name or array descriptor
    Object(String),
    /// The result of the `new` at this instruction index, before its constructor ran
    Uninitialized(usize),
}

impl VerificationType {
    /// The type a value of `field` type has on the stack or in a local.
    #[must_use]
    pub fn of(field: &FieldType) -> VerificationType {
        match field {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Boolean
            | FieldType::Int => VerificationType::Integer,
            FieldType::Float => VerificationType::Float,
            FieldType::Long => VerificationType::Long,
            FieldType::Double => VerificationType::Double,
            FieldType::Object(name) => VerificationType::Object(name.clone()),
            FieldType::Array(_) => VerificationType::Object(field.to_string()),
        }
    }

    /// Returns `true` for the two-slot types.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }

    fn object(name: &str) -> VerificationType {
        VerificationType::Object(name.to_string())
    }
}

/// Types of the local variables and the operand stack at one instruction.
///
/// Both lists hold one entry per slot; a `long` or `double` is followed by
/// [`VerificationType::Top`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Local variable slots
    pub locals: Vec<VerificationType>,
    /// Operand stack slots, bottom first
    pub stack: Vec<VerificationType>,
}

impl Frame {
    /// The frame on entry to `method`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor does not parse.
    pub fn initial(method: &MethodContext<'_>) -> Result<Frame> {
        let parsed = MethodDescriptor::parse(method.descriptor)?;
        let mut frame = Frame::default();
        if !method.is_static {
            frame.locals.push(if method.name == "<init>" && method.class != OBJECT {
                VerificationType::UninitializedThis
            } else {
                VerificationType::object(method.class)
            });
        }
        for param in &parsed.params {
            let value = VerificationType::of(param);
            let wide = value.is_wide();
            frame.locals.push(value);
            if wide {
                frame.locals.push(VerificationType::Top);
            }
        }
        Ok(frame)
    }

    /// A handler or dead-code entry: no locals, one throwable on the stack.
    fn throwable(class: &str) -> Frame {
        Frame {
            locals: Vec::new(),
            stack: vec![VerificationType::object(class)],
        }
    }

    fn push(&mut self, value: VerificationType) {
        let wide = value.is_wide();
        self.stack.push(value);
        if wide {
            self.stack.push(VerificationType::Top);
        }
    }

    fn take(&mut self, slots: usize) -> Result<Vec<VerificationType>> {
        let Some(at) = self.stack.len().checked_sub(slots) else {
            return Err(malformed_error!("operand stack underflow while computing frames"));
        };
        Ok(self.stack.split_off(at))
    }

    fn pop(&mut self) -> Result<VerificationType> {
        let len = self.stack.len();
        let wide = len >= 2
            && self.stack[len - 1] == VerificationType::Top
            && self.stack[len - 2].is_wide();
        if wide {
            self.stack.pop();
        }
        self.stack
            .pop()
            .ok_or_else(|| malformed_error!("operand stack underflow while computing frames"))
    }

    fn local(&self, index: u16) -> VerificationType {
        self.locals
            .get(usize::from(index))
            .cloned()
            .unwrap_or(VerificationType::Top)
    }

    fn set_local(&mut self, index: u16, value: VerificationType) {
        let index = usize::from(index);
        let width = if value.is_wide() { 2 } else { 1 };
        if self.locals.len() < index + width {
            self.locals.resize(index + width, VerificationType::Top);
        }
        if index > 0 && self.locals[index - 1].is_wide() {
            self.locals[index - 1] = VerificationType::Top;
        }
        if width == 2 {
            self.locals[index + 1] = VerificationType::Top;
        }
        self.locals[index] = value;
    }

    fn replace(&mut self, from: &VerificationType, to: &VerificationType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == from {
                *slot = to.clone();
            }
        }
    }

    /// Applies `instruction`, found at `index` of the body, to this frame.
    fn execute(
        &mut self,
        instruction: &Instruction,
        index: usize,
        method: &MethodContext<'_>,
        pool: &ConstantPool,
    ) -> Result<()> {
        match instruction {
            Instruction::Label(_) | Instruction::LineNumber(_) | Instruction::Iinc { .. } => {}
            Instruction::Op(opcode) => self.execute_op(*opcode)?,
            Instruction::Var { opcode, index } => match *opcode {
                ILOAD => self.push(VerificationType::Integer),
                LLOAD => self.push(VerificationType::Long),
                FLOAD => self.push(VerificationType::Float),
                DLOAD => self.push(VerificationType::Double),
                ALOAD => self.push(self.local(*index)),
                ISTORE..=ASTORE => {
                    let value = self.pop()?;
                    self.set_local(*index, value);
                }
                other => {
                    return Err(malformed_error!(
                        "{} is not supported in a framed method",
                        mnemonic(other)
                    ))
                }
            },
            Instruction::Push { .. } => self.push(VerificationType::Integer),
            Instruction::Ldc(constant) => self.push(ldc_type(constant, pool)?),
            Instruction::Type { opcode, class } => match *opcode {
                NEW => self.push(VerificationType::Uninitialized(index)),
                ANEWARRAY => {
                    self.pop()?;
                    self.push(VerificationType::Object(array_of(class)));
                }
                CHECKCAST => {
                    self.pop()?;
                    self.push(VerificationType::object(class));
                }
                _ => {
                    self.pop()?;
                    self.push(VerificationType::Integer);
                }
            },
            Instruction::Field {
                opcode, descriptor, ..
            } => {
                let field = FieldType::parse(descriptor)?;
                match *opcode {
                    GETSTATIC => self.push(VerificationType::of(&field)),
                    PUTSTATIC => {
                        self.take(usize::from(field.size()))?;
                    }
                    GETFIELD => {
                        self.pop()?;
                        self.push(VerificationType::of(&field));
                    }
                    _ => {
                        self.take(usize::from(field.size()) + 1)?;
                    }
                }
            }
            Instruction::Method {
                opcode,
                owner,
                name,
                descriptor,
                ..
            } => {
                let parsed = MethodDescriptor::parse(descriptor)?;
                self.take(usize::from(parsed.args_size()))?;
                if *opcode != INVOKESTATIC {
                    let receiver = self.pop()?;
                    if name == "<init>" {
                        let initialized = match receiver {
                            VerificationType::UninitializedThis => {
                                Some(VerificationType::object(method.class))
                            }
                            VerificationType::Uninitialized(_) => {
                                Some(VerificationType::object(owner))
                            }
                            _ => None,
                        };
                        if let Some(initialized) = initialized {
                            self.replace(&receiver, &initialized);
                        }
                    }
                }
                if let Some(value) = parsed.ret.value() {
                    self.push(VerificationType::of(value));
                }
            }
            Instruction::InvokeDynamic { descriptor, .. } => {
                let parsed = MethodDescriptor::parse(descriptor)?;
                self.take(usize::from(parsed.args_size()))?;
                if let Some(value) = parsed.ret.value() {
                    self.push(VerificationType::of(value));
                }
            }
            Instruction::Jump { opcode, .. } => {
                if matches!(*opcode, JSR | JSR_W) {
                    return Err(malformed_error!("jsr is not supported in a framed method"));
                }
                self.take(usize::from(jump_pops(*opcode)))?;
            }
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => {
                self.pop()?;
            }
            Instruction::NewArray { atype } => {
                self.pop()?;
                let element = match atype {
                    4 => 'Z',
                    5 => 'C',
                    6 => 'F',
                    7 => 'D',
                    8 => 'B',
                    9 => 'S',
                    10 => 'I',
                    11 => 'J',
                    other => return Err(malformed_error!("invalid newarray type {}", other)),
                };
                self.push(VerificationType::Object(format!("[{element}")));
            }
            Instruction::MultiANewArray { class, dimensions } => {
                self.take(usize::from(*dimensions))?;
                self.push(VerificationType::object(class));
            }
        }
        Ok(())
    }

    fn execute_op(&mut self, opcode: u8) -> Result<()> {
        use VerificationType as V;

        match opcode {
            NOP => {}
            ACONST_NULL => self.push(V::Null),
            ICONST_M1..=ICONST_5 => self.push(V::Integer),
            LCONST_0 | LCONST_1 => self.push(V::Long),
            FCONST_0..=FCONST_2 => self.push(V::Float),
            DCONST_0 | DCONST_1 => self.push(V::Double),
            AALOAD => {
                self.pop()?;
                let array = self.pop()?;
                self.push(component_of(&array));
            }
            DUP..=SWAP => {
                let shuffled = match opcode {
                    DUP => {
                        let v = self.take(1)?;
                        [v.clone(), v].concat()
                    }
                    DUP_X1 => {
                        let v = self.take(2)?;
                        vec![v[1].clone(), v[0].clone(), v[1].clone()]
                    }
                    DUP_X2 => {
                        let v = self.take(3)?;
                        vec![v[2].clone(), v[0].clone(), v[1].clone(), v[2].clone()]
                    }
                    DUP2 => {
                        let v = self.take(2)?;
                        [v.clone(), v].concat()
                    }
                    DUP2_X1 => {
                        let v = self.take(3)?;
                        [&v[1..], &v[..]].concat()
                    }
                    DUP2_X2 => {
                        let v = self.take(4)?;
                        [&v[2..], &v[..]].concat()
                    }
                    _ => {
                        let v = self.take(2)?;
                        vec![v[1].clone(), v[0].clone()]
                    }
                };
                self.stack.extend(shuffled);
            }
            _ => {
                let Some((pops, _)) = simple_stack_effect(opcode) else {
                    return Err(malformed_error!(
                        "opcode {} ({:#04x}) requires an operand",
                        mnemonic(opcode),
                        opcode
                    ));
                };
                self.take(usize::from(pops))?;
                if let Some(result) = op_result(opcode) {
                    self.push(result);
                }
            }
        }
        Ok(())
    }
}

/// Result type of an operand-less opcode, `None` when it pushes nothing.
fn op_result(opcode: u8) -> Option<VerificationType> {
    use VerificationType as V;

    const BY_KIND: [VerificationType; 4] = [V::Integer, V::Long, V::Float, V::Double];
    Some(match opcode {
        IALOAD | BALOAD | CALOAD | SALOAD => V::Integer,
        LALOAD => V::Long,
        FALOAD => V::Float,
        DALOAD => V::Double,
        IADD..=DNEG => BY_KIND[usize::from((opcode - IADD) % 4)].clone(),
        ISHL..=LXOR => BY_KIND[usize::from((opcode - ISHL) % 2)].clone(),
        I2L | F2L | D2L => V::Long,
        I2F | L2F | D2F => V::Float,
        I2D | L2D | F2D => V::Double,
        L2I | F2I | D2I | I2B | I2C | I2S => V::Integer,
        LCMP..=DCMPG | ARRAYLENGTH => V::Integer,
        _ => return None,
    })
}

fn ldc_type(constant: &LdcConstant, pool: &ConstantPool) -> Result<VerificationType> {
    use VerificationType as V;

    Ok(match constant {
        LdcConstant::Int(_) => V::Integer,
        LdcConstant::Float(_) => V::Float,
        LdcConstant::Long(_) => V::Long,
        LdcConstant::Double(_) => V::Double,
        LdcConstant::String(_) => V::object("java/lang/String"),
        LdcConstant::Class(_) => V::object("java/lang/Class"),
        LdcConstant::MethodType(_) => V::object("java/lang/invoke/MethodType"),
        LdcConstant::Raw { index, .. } => match pool.get(*index)? {
            Constant::Integer(_) => V::Integer,
            Constant::Float(_) => V::Float,
            Constant::Long(_) => V::Long,
            Constant::Double(_) => V::Double,
            Constant::String { .. } => V::object("java/lang/String"),
            Constant::Class { .. } => V::object("java/lang/Class"),
            Constant::MethodType { .. } => V::object("java/lang/invoke/MethodType"),
            Constant::MethodHandle { .. } => V::object("java/lang/invoke/MethodHandle"),
            Constant::Dynamic { name_and_type, .. } => {
                let (_, descriptor) = pool.name_and_type(*name_and_type)?;
                V::of(&FieldType::parse(descriptor)?)
            }
            other => return Err(malformed_error!("constant {:?} cannot be loaded", other)),
        },
    })
}

/// Array descriptor whose elements are `class` (internal name or array descriptor).
fn array_of(class: &str) -> String {
    if class.starts_with('[') {
        format!("[{class}")
    } else {
        format!("[L{class};")
    }
}

/// Element type loaded by `aaload` from an array of type `array`.
fn component_of(array: &VerificationType) -> VerificationType {
    match array {
        VerificationType::Object(descriptor) => match descriptor.strip_prefix('[') {
            Some(component) => match component
                .strip_prefix('L')
                .and_then(|rest| rest.strip_suffix(';'))
            {
                Some(name) => VerificationType::object(name),
                None => VerificationType::object(component),
            },
            None => VerificationType::object(OBJECT),
        },
        VerificationType::Null => VerificationType::Null,
        _ => VerificationType::object(OBJECT),
    }
}

/// Closest common superclass of two reference types.
fn common_super(a: &str, b: &str, hierarchy: &dyn Hierarchy) -> String {
    if a == b {
        return a.to_string();
    }
    match (a.strip_prefix('['), b.strip_prefix('[')) {
        (Some(a), Some(b)) => {
            let element = |component: &str| -> Option<String> {
                match component.as_bytes().first() {
                    Some(b'[') => Some(component.to_string()),
                    Some(b'L') => component
                        .strip_prefix('L')
                        .and_then(|rest| rest.strip_suffix(';'))
                        .map(str::to_string),
                    _ => None,
                }
            };
            match (element(a), element(b)) {
                (Some(a), Some(b)) => array_of(&common_super(&a, &b, hierarchy)),
                _ => OBJECT.to_string(),
            }
        }
        (None, None) => {
            if hierarchy.is_interface(a) || hierarchy.is_interface(b) {
                return OBJECT.to_string();
            }
            let (Some(above_a), Some(above_b)) =
                (hierarchy.superclasses(a), hierarchy.superclasses(b))
            else {
                return OBJECT.to_string();
            };
            let chain_b: BTreeSet<&str> = std::iter::once(b)
                .chain(above_b.iter().map(String::as_str))
                .collect();
            std::iter::once(a)
                .chain(above_a.iter().map(String::as_str))
                .find(|candidate| chain_b.contains(candidate))
                .unwrap_or(OBJECT)
                .to_string()
        }
        _ => OBJECT.to_string(),
    }
}

fn merge_type(
    a: &VerificationType,
    b: &VerificationType,
    hierarchy: &dyn Hierarchy,
) -> VerificationType {
    use VerificationType as V;

    if a == b {
        return a.clone();
    }
    match (a, b) {
        (V::Null, V::Object(_)) => b.clone(),
        (V::Object(_), V::Null) => a.clone(),
        (V::Object(x), V::Object(y)) => V::Object(common_super(x, y, hierarchy)),
        _ => V::Top,
    }
}

fn merge(existing: &Frame, incoming: &Frame, hierarchy: &dyn Hierarchy) -> Result<Frame> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(malformed_error!(
            "operand stack heights {} and {} meet at a join",
            existing.stack.len(),
            incoming.stack.len()
        ));
    }
    let width = existing.locals.len().max(incoming.locals.len());
    let slot = |locals: &[VerificationType], at: usize| {
        locals.get(at).cloned().unwrap_or(VerificationType::Top)
    };
    let mut locals: Vec<VerificationType> = (0..width)
        .map(|at| {
            merge_type(
                &slot(&existing.locals, at),
                &slot(&incoming.locals, at),
                hierarchy,
            )
        })
        .collect();
    while locals.last() == Some(&VerificationType::Top) {
        locals.pop();
    }
    let stack = existing
        .stack
        .iter()
        .zip(&incoming.stack)
        .map(|(a, b)| merge_type(a, b, hierarchy))
        .collect();
    Ok(Frame { locals, stack })
}

/// Entry frames of every instruction of a body.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    /// The frame on method entry
    pub initial: Frame,
    /// Entry frame per instruction index; `None` where the instruction is unreachable
    pub frames: Vec<Option<Frame>>,
}

impl FrameAnalysis {
    /// Returns `true` if the instruction at `index` can be executed.
    #[must_use]
    pub fn is_reachable(&self, index: usize) -> bool {
        self.frames.get(index).is_some_and(Option::is_some)
    }
}

/// Computes the entry frame of every instruction of `code`.
///
/// Returns `Ok(None)` for bodies that use `jsr` or `ret`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for stack underflows, stack heights that differ at
/// a join, unplaced labels and unparsable descriptors.
pub fn analyze(
    code: &Code,
    method: &MethodContext<'_>,
    pool: &ConstantPool,
    hierarchy: &dyn Hierarchy,
) -> Result<Option<FrameAnalysis>> {
    let instructions = &code.instructions;
    if instructions
        .iter()
        .any(|instruction| matches!(instruction.opcode(), Some(JSR | JSR_W | RET)))
    {
        return Ok(None);
    }

    let positions = label_positions(instructions);
    let position_of = |label: Label| {
        positions
            .get(&label)
            .copied()
            .ok_or_else(|| malformed_error!("label {:?} is not placed in the body", label))
    };
    let mut handlers = Vec::with_capacity(code.handlers.len());
    for handler in &code.handlers {
        handlers.push((
            position_of(handler.start)?,
            position_of(handler.end)?,
            position_of(handler.handler)?,
            handler.catch_type.as_deref().unwrap_or(THROWABLE),
        ));
    }

    let initial = Frame::initial(method)?;
    let mut frames: Vec<Option<Frame>> = vec![None; instructions.len()];
    let mut worklist = Vec::new();
    if !instructions.is_empty() {
        frames[0] = Some(initial.clone());
        worklist.push(0);
    }

    let enter = |frames: &mut Vec<Option<Frame>>,
                     worklist: &mut Vec<usize>,
                     at: usize,
                     incoming: Frame|
     -> Result<()> {
        let merged = match &frames[at] {
            None => incoming,
            Some(existing) => {
                let merged = merge(existing, &incoming, hierarchy)?;
                if &merged == existing {
                    return Ok(());
                }
                merged
            }
        };
        frames[at] = Some(merged);
        worklist.push(at);
        Ok(())
    };

    while let Some(index) = worklist.pop() {
        let Some(entry) = frames[index].clone() else {
            continue;
        };
        let instruction = &instructions[index];
        let mut out = entry.clone();
        out.execute(instruction, index, method, pool)?;

        if !instruction.is_pseudo() {
            for (start, end, handler, catch_type) in &handlers {
                if *start < index && index < *end {
                    for locals in [&entry.locals, &out.locals] {
                        let mut frame = Frame::throwable(catch_type);
                        frame.locals = locals.clone();
                        enter(&mut frames, &mut worklist, *handler, frame)?;
                    }
                }
            }
        }

        for target in instruction.targets() {
            enter(&mut frames, &mut worklist, position_of(target)?, out.clone())?;
        }
        if !instruction.ends_block() && index + 1 < instructions.len() {
            enter(&mut frames, &mut worklist, index + 1, out)?;
        }
    }

    Ok(Some(FrameAnalysis { initial, frames }))
}

/// Indices of the real instructions that need a frame: branch targets, handler entries
/// and instructions following an unconditional transfer of control.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a label is referenced but never placed.
pub fn frame_points(code: &Code) -> Result<BTreeSet<usize>> {
    let instructions = &code.instructions;
    let positions = label_positions(instructions);
    let first_real = |from: usize| {
        instructions
            .get(from..)
            .and_then(|rest| rest.iter().position(|instruction| !instruction.is_pseudo()))
            .map(|offset| from + offset)
    };
    let position_of = |label: Label| {
        positions
            .get(&label)
            .copied()
            .ok_or_else(|| malformed_error!("label {:?} is not placed in the body", label))
    };

    let mut points = BTreeSet::new();
    for (index, instruction) in instructions.iter().enumerate() {
        for target in instruction.targets() {
            points.extend(first_real(position_of(target)?));
        }
        if instruction.ends_block() {
            points.extend(first_real(index + 1));
        }
    }
    for handler in &code.handlers {
        points.extend(first_real(position_of(handler.handler)?));
    }
    Ok(points)
}

/// The frame for a run of dead code rewritten to `nop ... athrow`.
#[must_use]
pub fn dead_code_frame() -> Frame {
    Frame::throwable(THROWABLE)
}

/// Encodes the body of a `StackMapTable` attribute.
///
/// `frames` is keyed by bytecode offset; `offsets` maps instruction indices to bytecode
/// offsets, for `uninitialized` entries.
///
/// # Errors
/// Returns [`crate::Error::StructuralViolation`] if the constant pool overflows.
pub fn encode_stack_map(
    frames: &BTreeMap<usize, Frame>,
    initial: &Frame,
    pool: &mut ConstantPool,
    offsets: &[usize],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_be(&mut out, frames.len() as u16);

    let mut previous_locals = compact(&initial.locals);
    let mut previous_offset: Option<usize> = None;
    for (offset, frame) in frames {
        let delta = match previous_offset {
            None => *offset,
            Some(previous) => offset - previous - 1,
        } as u16;
        previous_offset = Some(*offset);

        let locals = compact(&frame.locals);
        let stack = compact(&frame.stack);
        let shared = previous_locals
            .iter()
            .zip(&locals)
            .take_while(|(a, b)| a == b)
            .count();

        if stack.is_empty() && locals == previous_locals {
            if delta < 64 {
                out.push(delta as u8);
            } else {
                out.push(251);
                write_be(&mut out, delta);
            }
        } else if stack.len() == 1 && locals == previous_locals {
            if delta < 64 {
                out.push(64 + delta as u8);
            } else {
                out.push(247);
                write_be(&mut out, delta);
            }
            write_type(&mut out, stack[0], pool, offsets)?;
        } else if stack.is_empty()
            && shared == locals.len()
            && (1..=3).contains(&(previous_locals.len() - shared))
        {
            out.push((251 - (previous_locals.len() - shared)) as u8);
            write_be(&mut out, delta);
        } else if stack.is_empty()
            && shared == previous_locals.len()
            && (1..=3).contains(&(locals.len() - shared))
        {
            out.push((251 + (locals.len() - shared)) as u8);
            write_be(&mut out, delta);
            for local in &locals[shared..] {
                write_type(&mut out, local, pool, offsets)?;
            }
        } else {
            out.push(255);
            write_be(&mut out, delta);
            write_be(&mut out, locals.len() as u16);
            for local in &locals {
                write_type(&mut out, local, pool, offsets)?;
            }
            write_be(&mut out, stack.len() as u16);
            for value in &stack {
                write_type(&mut out, value, pool, offsets)?;
            }
        }
        previous_locals = locals;
    }
    Ok(out)
}

/// One entry per value (the `top` after a wide type folded in), trailing `top`s dropped.
fn compact(slots: &[VerificationType]) -> Vec<&VerificationType> {
    let mut values = Vec::with_capacity(slots.len());
    let mut at = 0;
    while let Some(slot) = slots.get(at) {
        values.push(slot);
        at += if slot.is_wide() { 2 } else { 1 };
    }
    while values.last() == Some(&&VerificationType::Top) {
        values.pop();
    }
    values
}

fn write_type(
    out: &mut Vec<u8>,
    value: &VerificationType,
    pool: &mut ConstantPool,
    offsets: &[usize],
) -> Result<()> {
    match value {
        VerificationType::Top => out.push(0),
        VerificationType::Integer => out.push(1),
        VerificationType::Float => out.push(2),
        VerificationType::Double => out.push(3),
        VerificationType::Long => out.push(4),
        VerificationType::Null => out.push(5),
        VerificationType::UninitializedThis => out.push(6),
        VerificationType::Object(name) => {
            out.push(7);
            write_be(out, pool.class_index(name)?);
        }
        VerificationType::Uninitialized(index) => {
            let offset = offsets
                .get(*index)
                .copied()
                .ok_or_else(|| malformed_error!("no offset for instruction {}", index))?;
            out.push(8);
            write_be(out, offset as u16);
        }
    }
    Ok(())
}
