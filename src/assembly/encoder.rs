//! Encoding of symbolic instruction lists back into `Code` attributes.
//!
//! Encoding runs in three steps:
//!
//! 1. Every operand that lives in the constant pool is interned, which fixes the size of
//!    `ldc` instructions.
//! 2. Instructions are laid out. Switch padding depends on the position, and `goto`/`jsr`
//!    grow to their `_w` forms when a target is out of 16-bit range, so layout repeats until
//!    no branch changes size.
//! 3. Bytes are emitted, followed by the exception table and a `LineNumberTable` built from
//!    the line-number pseudo-instructions.
//!
//! `max_stack` and `max_locals` are recomputed with [`crate::assembly::stack`]; the values
//! read from the original class act as lower bounds. [`encode_code_with_frames`] also
//! writes a `StackMapTable` computed by [`crate::assembly::frames`].

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::{
    assembly::{
        frames::{
            analyze, dead_code_frame, encode_stack_map, frame_points, Frame, Hierarchy,
            MethodContext,
        },
        instruction::{Code, Instruction, Label, LdcConstant},
        opcodes::*,
        stack::{max_locals, max_stack},
    },
    classfile::{
        attribute::STACK_MAP_TABLE,
        constant::{Constant, ConstantPool},
        descriptor::MethodDescriptor,
    },
    file::io::write_be,
    Error, Result,
};

/// Maximum size of a method's bytecode.
pub const MAX_CODE_LENGTH: usize = 65535;

/// Encodes `code` into the body of a `Code` attribute (everything after
/// `attribute_length`).
///
/// `parameter_slots` is the number of local slots taken by the receiver (if any) and the
/// parameters, the floor for `max_locals`.
///
/// # Errors
/// Returns [`crate::Error::StructuralViolation`] when the body exceeds the format's limits
/// (code length, branch range, pool size) and [`crate::Error::Malformed`] for inconsistent
/// instructions such as unplaced labels.
pub fn encode_code(code: &Code, pool: &mut ConstantPool, parameter_slots: u16) -> Result<Vec<u8>> {
    encode(code, pool, parameter_slots, None)
}

/// Encodes `code` like [`encode_code`] and adds a `StackMapTable` attribute.
///
/// Reference types are merged through `hierarchy`. Unreachable instructions are replaced
/// by `nop ... athrow` and removed from the exception table. Bodies using `jsr`/`ret` are
/// encoded without frames.
///
/// # Errors
/// As [`encode_code`], plus [`crate::Error::Malformed`] when the operand stack heights of
/// two paths differ where they meet.
pub fn encode_code_with_frames(
    code: &Code,
    pool: &mut ConstantPool,
    method: &MethodContext<'_>,
    hierarchy: &dyn Hierarchy,
) -> Result<Vec<u8>> {
    let slots = parameter_slots(method.descriptor, method.is_static)?;
    encode(code, pool, slots, Some((method, hierarchy)))
}

fn encode(
    code: &Code,
    pool: &mut ConstantPool,
    parameter_slots: u16,
    frames: Option<(&MethodContext<'_>, &dyn Hierarchy)>,
) -> Result<Vec<u8>> {
    let operands = intern_operands(&code.instructions, pool)?;
    let layout = layout(&code.instructions, &operands)?;
    let analysis = match frames {
        Some((method, hierarchy)) => {
            let analysis = analyze(code, method, pool, hierarchy)?;
            if analysis.is_none() {
                debug!(
                    method = %format!("{}.{}{}", method.class, method.name, method.descriptor),
                    "body uses subroutines, writing no frames"
                );
            }
            analysis
        }
        None => None,
    };

    let mut bytecode = Vec::with_capacity(layout.length);
    for (index, instruction) in code.instructions.iter().enumerate() {
        emit(
            instruction,
            operands[index],
            layout.offsets[index],
            layout.wide_jumps.contains(&index),
            &layout.labels,
            &mut bytecode,
        )?;
    }
    debug_assert_eq!(bytecode.len(), layout.length);

    let mut dead: Vec<(usize, usize)> = Vec::new();
    let mut stack_map: BTreeMap<usize, Frame> = BTreeMap::new();
    if let Some(analysis) = &analysis {
        for index in frame_points(code)? {
            if let Some(frame) = &analysis.frames[index] {
                stack_map.insert(layout.offsets[index], frame.clone());
            }
        }
        dead = dead_ranges(&code.instructions, &analysis.frames, &layout);
        for (start, end) in &dead {
            bytecode[*start..*end].fill(NOP);
            bytecode[*end - 1] = ATHROW;
            stack_map.insert(*start, dead_code_frame());
        }
    }

    let mut stack = max_stack(&code.instructions, &code.handlers)?.max(code.max_stack);
    if !dead.is_empty() {
        stack = stack.max(1);
    }
    let locals = max_locals(&code.instructions, parameter_slots).max(code.max_locals);

    let mut out = Vec::with_capacity(bytecode.len() + 32);
    write_be(&mut out, stack);
    write_be(&mut out, locals);
    write_be(&mut out, bytecode.len() as u32);
    out.extend_from_slice(&bytecode);

    let mut table = Vec::new();
    for handler in &code.handlers {
        let start = label_offset(&layout.labels, handler.start)?;
        let end = label_offset(&layout.labels, handler.end)?;
        if start >= end {
            continue;
        }
        let catch_type = match &handler.catch_type {
            Some(class) => pool.class_index(class)?,
            None => 0,
        };
        let entry = label_offset(&layout.labels, handler.handler)? as u16;
        for (start, end) in live_ranges(start, end, &dead) {
            table.push((start as u16, end as u16, entry, catch_type));
        }
    }
    write_be(&mut out, table.len() as u16);
    for (start, end, handler, catch_type) in table {
        write_be(&mut out, start);
        write_be(&mut out, end);
        write_be(&mut out, handler);
        write_be(&mut out, catch_type);
    }

    let mut lines: Vec<(u16, u16)> = Vec::new();
    for (index, instruction) in code.instructions.iter().enumerate() {
        if let Instruction::LineNumber(line) = instruction {
            let pc = layout.offsets[index];
            if pc >= layout.length {
                continue;
            }
            match lines.last_mut() {
                Some(last) if usize::from(last.0) == pc => last.1 = *line,
                _ => lines.push((pc as u16, *line)),
            }
        }
    }

    let frames = match &analysis {
        Some(analysis) if !stack_map.is_empty() => Some(encode_stack_map(
            &stack_map,
            &analysis.initial,
            pool,
            &layout.offsets,
        )?),
        _ => None,
    };

    write_be(
        &mut out,
        u16::from(!lines.is_empty()) + u16::from(frames.is_some()),
    );
    if let Some(frames) = frames {
        write_be(&mut out, pool.utf8_index(STACK_MAP_TABLE)?);
        write_be(&mut out, frames.len() as u32);
        out.extend_from_slice(&frames);
    }
    if !lines.is_empty() {
        write_be(&mut out, pool.utf8_index("LineNumberTable")?);
        write_be(&mut out, (2 + 4 * lines.len()) as u32);
        write_be(&mut out, lines.len() as u16);
        for (pc, line) in lines {
            write_be(&mut out, pc);
            write_be(&mut out, line);
        }
    }

    Ok(out)
}

/// Parameter slots of a method: one for the receiver unless static, plus the arguments.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the descriptor does not parse.
pub fn parameter_slots(descriptor: &str, is_static: bool) -> Result<u16> {
    let parsed = MethodDescriptor::parse(descriptor)?;
    Ok(parsed.args_size() + u16::from(!is_static))
}

fn intern_operands(instructions: &[Instruction], pool: &mut ConstantPool) -> Result<Vec<u16>> {
    instructions
        .iter()
        .map(|instruction| {
            Ok(match instruction {
                Instruction::Ldc(constant) => match constant {
                    LdcConstant::Int(value) => pool.intern(Constant::Integer(*value))?,
                    LdcConstant::Float(value) => pool.intern(Constant::Float(*value))?,
                    LdcConstant::Long(value) => pool.intern(Constant::Long(*value))?,
                    LdcConstant::Double(value) => pool.intern(Constant::Double(*value))?,
                    LdcConstant::String(value) => pool.string_index(value)?,
                    LdcConstant::Class(name) => pool.class_index(name)?,
                    LdcConstant::MethodType(descriptor) => pool.method_type_index(descriptor)?,
                    LdcConstant::Raw { index, .. } => *index,
                },
                Instruction::Type { class, .. } | Instruction::MultiANewArray { class, .. } => {
                    pool.class_index(class)?
                }
                Instruction::Field {
                    owner,
                    name,
                    descriptor,
                    ..
                } => pool.field_ref_index(owner, name, descriptor)?,
                Instruction::Method {
                    owner,
                    name,
                    descriptor,
                    interface,
                    ..
                } => pool.method_ref_index(owner, name, descriptor, *interface)?,
                Instruction::InvokeDynamic { index, .. } => *index,
                _ => 0,
            })
        })
        .collect()
}

/// Byte ranges of maximal runs of unreachable instructions.
fn dead_ranges(
    instructions: &[Instruction],
    frames: &[Option<Frame>],
    layout: &Layout,
) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = None;
    for (index, instruction) in instructions.iter().enumerate() {
        if instruction.is_pseudo() {
            continue;
        }
        match (frames[index].is_some(), start) {
            (false, None) => start = Some(layout.offsets[index]),
            (true, Some(from)) => {
                ranges.push((from, layout.offsets[index]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(from) = start {
        ranges.push((from, layout.length));
    }
    ranges
}

/// Parts of `start..end` outside the sorted `dead` ranges.
fn live_ranges(start: usize, end: usize, dead: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut from = start;
    for (dead_start, dead_end) in dead {
        if *dead_end <= from || *dead_start >= end {
            continue;
        }
        if *dead_start > from {
            pieces.push((from, *dead_start));
        }
        from = from.max(*dead_end);
    }
    if from < end {
        pieces.push((from, end));
    }
    pieces
}

struct Layout {
    offsets: Vec<usize>,
    labels: FxHashMap<Label, usize>,
    wide_jumps: FxHashSet<usize>,
    length: usize,
}

fn instruction_size(
    instruction: &Instruction,
    operand: u16,
    offset: usize,
    wide_jump: bool,
) -> usize {
    match instruction {
        Instruction::Label(_) | Instruction::LineNumber(_) => 0,
        Instruction::Op(_) => 1,
        Instruction::Var { opcode, index } => {
            if compact_var(*opcode, *index).is_some() {
                1
            } else if *index <= 0xFF {
                2
            } else {
                4
            }
        }
        Instruction::Iinc { index, delta } => {
            if *index <= 0xFF && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Instruction::Push { opcode, .. } => {
            if *opcode == BIPUSH {
                2
            } else {
                3
            }
        }
        Instruction::Ldc(constant) => {
            if constant.is_wide() || operand > 0xFF {
                3
            } else {
                2
            }
        }
        Instruction::Type { .. } | Instruction::Field { .. } => 3,
        Instruction::Method { opcode, .. } => {
            if *opcode == INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Instruction::InvokeDynamic { .. } => 5,
        Instruction::Jump { .. } => {
            if wide_jump {
                5
            } else {
                3
            }
        }
        Instruction::TableSwitch { targets, .. } => {
            1 + switch_padding(offset) + 12 + 4 * targets.len()
        }
        Instruction::LookupSwitch { pairs, .. } => 1 + switch_padding(offset) + 8 + 8 * pairs.len(),
        Instruction::NewArray { .. } => 2,
        Instruction::MultiANewArray { .. } => 4,
    }
}

fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn layout(instructions: &[Instruction], operands: &[u16]) -> Result<Layout> {
    let mut wide_jumps = FxHashSet::default();

    loop {
        let mut offsets = Vec::with_capacity(instructions.len());
        let mut labels = FxHashMap::default();
        let mut offset = 0;
        for (index, instruction) in instructions.iter().enumerate() {
            offsets.push(offset);
            if let Instruction::Label(label) = instruction {
                if labels.insert(*label, offset).is_some() {
                    return Err(malformed_error!("label {:?} is placed twice", label));
                }
            }
            offset += instruction_size(
                instruction,
                operands[index],
                offset,
                wide_jumps.contains(&index),
            );
        }

        if offset > MAX_CODE_LENGTH {
            return Err(Error::StructuralViolation {
                location: "method body".to_string(),
                message: format!("code length {offset} exceeds {MAX_CODE_LENGTH} bytes"),
            });
        }

        let mut grew = false;
        for (index, instruction) in instructions.iter().enumerate() {
            let Instruction::Jump { opcode, target } = instruction else {
                continue;
            };
            if wide_jumps.contains(&index) {
                continue;
            }
            let relative = label_offset(&labels, *target)? as i64 - offsets[index] as i64;
            if i16::try_from(relative).is_err() {
                if matches!(*opcode, GOTO | JSR) {
                    wide_jumps.insert(index);
                    grew = true;
                } else {
                    return Err(Error::StructuralViolation {
                        location: "method body".to_string(),
                        message: format!(
                            "conditional branch {} spans {} bytes",
                            mnemonic(*opcode),
                            relative
                        ),
                    });
                }
            }
        }

        if !grew {
            return Ok(Layout {
                offsets,
                labels,
                wide_jumps,
                length: offset,
            });
        }
    }
}

fn label_offset(labels: &FxHashMap<Label, usize>, label: Label) -> Result<usize> {
    labels
        .get(&label)
        .copied()
        .ok_or_else(|| malformed_error!("label {:?} is referenced but never placed", label))
}

fn relative_offset(labels: &FxHashMap<Label, usize>, target: Label, from: usize) -> Result<i32> {
    Ok((label_offset(labels, target)? as i64 - from as i64) as i32)
}

fn emit(
    instruction: &Instruction,
    operand: u16,
    offset: usize,
    wide_jump: bool,
    labels: &FxHashMap<Label, usize>,
    out: &mut Vec<u8>,
) -> Result<()> {
    match instruction {
        Instruction::Label(_) | Instruction::LineNumber(_) => {}
        Instruction::Op(opcode) => out.push(*opcode),
        Instruction::Var { opcode, index } => {
            if let Some(short) = compact_var(*opcode, *index) {
                out.push(short);
            } else if let Ok(byte) = u8::try_from(*index) {
                out.push(*opcode);
                out.push(byte);
            } else {
                out.push(WIDE);
                out.push(*opcode);
                write_be(out, *index);
            }
        }
        Instruction::Iinc { index, delta } => match (u8::try_from(*index), i8::try_from(*delta)) {
            (Ok(index), Ok(delta)) => {
                out.push(IINC);
                out.push(index);
                write_be(out, delta);
            }
            _ => {
                out.push(WIDE);
                out.push(IINC);
                write_be(out, *index);
                write_be(out, *delta);
            }
        },
        Instruction::Push { opcode, value } => {
            out.push(*opcode);
            if *opcode == BIPUSH {
                let Ok(byte) = i8::try_from(*value) else {
                    return Err(malformed_error!("bipush operand {} out of range", value));
                };
                write_be(out, byte);
            } else {
                write_be(out, *value);
            }
        }
        Instruction::Ldc(constant) => {
            if constant.is_wide() {
                out.push(LDC2_W);
                write_be(out, operand);
            } else if let Ok(byte) = u8::try_from(operand) {
                out.push(LDC);
                out.push(byte);
            } else {
                out.push(LDC_W);
                write_be(out, operand);
            }
        }
        Instruction::Type { opcode, .. } | Instruction::Field { opcode, .. } => {
            out.push(*opcode);
            write_be(out, operand);
        }
        Instruction::Method {
            opcode, descriptor, ..
        } => {
            out.push(*opcode);
            write_be(out, operand);
            if *opcode == INVOKEINTERFACE {
                let count = MethodDescriptor::parse(descriptor)?.args_size() + 1;
                out.push(u8::try_from(count).map_err(|_| {
                    malformed_error!("invokeinterface with {} argument slots", count)
                })?);
                out.push(0);
            }
        }
        Instruction::InvokeDynamic { .. } => {
            out.push(INVOKEDYNAMIC);
            write_be(out, operand);
            write_be(out, 0u16);
        }
        Instruction::Jump { opcode, target } => {
            let relative = relative_offset(labels, *target, offset)?;
            if wide_jump {
                out.push(if *opcode == JSR { JSR_W } else { GOTO_W });
                write_be(out, relative);
            } else {
                out.push(*opcode);
                write_be(out, relative as i16);
            }
        }
        Instruction::TableSwitch {
            default,
            low,
            high,
            targets,
        } => {
            out.push(TABLESWITCH);
            out.extend(std::iter::repeat(0).take(switch_padding(offset)));
            write_be(out, relative_offset(labels, *default, offset)?);
            write_be(out, *low);
            write_be(out, *high);
            for target in targets {
                write_be(out, relative_offset(labels, *target, offset)?);
            }
        }
        Instruction::LookupSwitch { default, pairs } => {
            out.push(LOOKUPSWITCH);
            out.extend(std::iter::repeat(0).take(switch_padding(offset)));
            write_be(out, relative_offset(labels, *default, offset)?);
            write_be(out, pairs.len() as i32);
            for (key, target) in pairs {
                write_be(out, *key);
                write_be(out, relative_offset(labels, *target, offset)?);
            }
        }
        Instruction::NewArray { atype } => {
            out.push(NEWARRAY);
            out.push(*atype);
        }
        Instruction::MultiANewArray { dimensions, .. } => {
            out.push(MULTIANEWARRAY);
            write_be(out, operand);
            out.push(*dimensions);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{
        decoder::decode_code, frames::UnknownHierarchy, instruction::ExceptionHandler,
    };

    fn encode(code: &Code, pool: &mut ConstantPool, slots: u16) -> Vec<u8> {
        encode_code(code, pool, slots).unwrap()
    }

    #[test]
    fn test_compact_forms_are_chosen() {
        let mut pool = ConstantPool::new();
        let code = Code::from_parts(
            vec![
                Instruction::var(ALOAD, 0),
                Instruction::var(ILOAD, 300),
                Instruction::op(POP),
                Instruction::op(ARETURN),
            ],
            Vec::new(),
            0,
        );
        let info = encode(&code, &mut pool, 1);

        // max_stack 2, max_locals 301, length 7
        assert_eq!(&info[0..4], &[0, 2, 0x01, 0x2d]);
        assert_eq!(&info[4..8], &[0, 0, 0, 7]);
        assert_eq!(&info[8..14], &[ALOAD_0, WIDE, ILOAD, 0x01, 0x2c, POP]);
    }

    #[test]
    fn test_switch_padding_and_decode() {
        let mut pool = ConstantPool::new();
        let (a, b, default) = (Label(0), Label(1), Label(2));
        let code = Code::from_parts(
            vec![
                Instruction::var(ILOAD, 0),
                Instruction::TableSwitch {
                    default,
                    low: 1,
                    high: 2,
                    targets: vec![a, b],
                },
                Instruction::Label(a),
                Instruction::LineNumber(10),
                Instruction::op(ICONST_1),
                Instruction::op(IRETURN),
                Instruction::Label(b),
                Instruction::op(ICONST_2),
                Instruction::op(IRETURN),
                Instruction::Label(default),
                Instruction::op(ICONST_0),
                Instruction::op(IRETURN),
            ],
            Vec::new(),
            3,
        );
        let info = encode(&code, &mut pool, 1);
        // iload_0 at 0, tableswitch at 1, padding to 4
        assert_eq!(&info[8..13], &[ILOAD_0, TABLESWITCH, 0, 0, 0]);

        let decoded = decode_code(&info, &pool).unwrap();
        let switch = decoded
            .instructions
            .iter()
            .find(|i| matches!(i, Instruction::TableSwitch { .. }))
            .unwrap();
        assert_eq!(switch.targets().len(), 3);
        assert!(decoded
            .instructions
            .contains(&Instruction::LineNumber(10)));
        assert_eq!(decoded.len(), code.len());
    }

    #[test]
    fn test_long_goto_is_widened() {
        let mut pool = ConstantPool::new();
        let end = Label(0);
        let mut instructions = vec![Instruction::Jump {
            opcode: GOTO,
            target: end,
        }];
        instructions.extend(std::iter::repeat(Instruction::op(NOP)).take(40_000));
        instructions.push(Instruction::Label(end));
        instructions.push(Instruction::op(RETURN));
        let code = Code::from_parts(instructions, Vec::new(), 1);

        let info = encode(&code, &mut pool, 0);
        assert_eq!(info[8], GOTO_W);

        let decoded = decode_code(&info, &pool).unwrap();
        assert!(matches!(
            decoded.instructions[0],
            Instruction::Jump { opcode: GOTO, .. }
        ));
    }

    #[test]
    fn test_exception_table_and_catch_type() {
        let mut pool = ConstantPool::new();
        let (start, end, handler) = (Label(0), Label(1), Label(2));
        let code = Code::from_parts(
            vec![
                Instruction::Label(start),
                Instruction::method(INVOKESTATIC, "a/B", "risky", "()V"),
                Instruction::Label(end),
                Instruction::op(RETURN),
                Instruction::Label(handler),
                Instruction::op(ATHROW),
            ],
            vec![ExceptionHandler {
                start,
                end,
                handler,
                catch_type: Some("java/io/IOException".to_string()),
            }],
            3,
        );

        let info = encode(&code, &mut pool, 0);
        let decoded = decode_code(&info, &pool).unwrap();
        assert_eq!(decoded.handlers.len(), 1);
        assert_eq!(
            decoded.handlers[0].catch_type.as_deref(),
            Some("java/io/IOException")
        );
        // handler entry depth 1
        assert_eq!(decoded.max_stack, 1);
    }

    #[test]
    fn test_frames_cover_targets_and_dead_code() {
        let mut pool = ConstantPool::new();
        let (start, end, handler) = (Label(0), Label(1), Label(2));
        let code = Code::from_parts(
            vec![
                Instruction::Label(start),
                Instruction::method(INVOKESTATIC, "a/B", "risky", "()V"),
                Instruction::op(RETURN),
                Instruction::op(ICONST_1),
                Instruction::op(POP),
                Instruction::Label(end),
                Instruction::Label(handler),
                Instruction::op(ATHROW),
            ],
            vec![ExceptionHandler {
                start,
                end,
                handler,
                catch_type: Some("java/io/IOException".to_string()),
            }],
            3,
        );
        let method = MethodContext {
            class: "a/B",
            name: "call",
            descriptor: "()V",
            is_static: true,
        };
        let info = encode_code_with_frames(&code, &mut pool, &method, &UnknownHierarchy).unwrap();

        // the unreachable iconst_1/pop became nop/athrow
        assert_eq!(&info[8..15], &[INVOKESTATIC, 0, info[10], RETURN, NOP, ATHROW, ATHROW]);
        // the protected range stops where the dead code starts
        assert_eq!(&info[15..23], &[0, 1, 0, 0, 0, 4, 0, 6]);

        assert_eq!(&info[25..27], &[0, 1]);
        let name = u16::from_be_bytes([info[27], info[28]]);
        assert_eq!(pool.utf8(name).unwrap(), STACK_MAP_TABLE);
        let throwable = pool.class_index("java/lang/Throwable").unwrap().to_be_bytes();
        let io = pool.class_index("java/io/IOException").unwrap().to_be_bytes();
        assert_eq!(
            &info[33..],
            &[0, 2, 64 + 4, 7, throwable[0], throwable[1], 64 + 1, 7, io[0], io[1]]
        );

        let decoded = decode_code(&info, &pool).unwrap();
        assert_eq!(decoded.handlers.len(), 1);
    }

    #[test]
    fn test_unplaced_label_is_rejected() {
        let mut pool = ConstantPool::new();
        let code = Code::from_parts(
            vec![Instruction::Jump {
                opcode: GOTO,
                target: Label(9),
            }],
            Vec::new(),
            0,
        );
        assert!(encode_code(&code, &mut pool, 0).is_err());
    }
}
