//! Decoding of `Code` attributes into symbolic instruction lists.
//!
//! Decoding happens in two passes. The first walks the bytecode and produces instructions
//! whose branch targets are still byte offsets; the second assigns a [`Label`] to every
//! offset that is branched to, bounds a protected range, starts a handler or carries a
//! line number, and splices the label and line-number pseudo-instructions into the list.
//!
//! Short forms are normalized on the way in (`aload_0` becomes `Var { ALOAD, 0 }`,
//! `goto_w` becomes `GOTO`, `wide` prefixes disappear) so that rewriting code only has one
//! shape to look for; the encoder picks the compact forms again.
//!
//! `LocalVariableTable`, `LocalVariableTypeTable`, `StackMapTable` and unknown nested
//! attributes are not carried over: their offsets would not survive a rewrite.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    assembly::{
        instruction::{Code, ExceptionHandler, Instruction, Label, LdcConstant},
        opcodes::*,
    },
    classfile::constant::{Constant, ConstantPool},
    file::parser::Parser,
    Result,
};

struct RawHandler {
    start: u32,
    end: u32,
    handler: u32,
    catch_type: Option<String>,
}

/// Decodes the body of a `Code` attribute (everything after `attribute_length`).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unknown opcodes, branches into the middle of an
/// instruction, invalid exception ranges or unresolvable constant pool references.
pub fn decode_code(info: &[u8], pool: &ConstantPool) -> Result<Code> {
    let mut parser = Parser::new(info);
    let max_stack = parser.read_be::<u16>()?;
    let max_locals = parser.read_be::<u16>()?;
    let code_length = parser.read_be::<u32>()? as usize;
    if code_length == 0 {
        return Err(malformed_error!("empty Code attribute"));
    }
    let bytecode = parser.read_bytes(code_length)?;

    let handler_count = parser.read_be::<u16>()?;
    let mut raw_handlers = Vec::with_capacity(usize::from(handler_count));
    for _ in 0..handler_count {
        let start = u32::from(parser.read_be::<u16>()?);
        let end = u32::from(parser.read_be::<u16>()?);
        let handler = u32::from(parser.read_be::<u16>()?);
        let catch_index = parser.read_be::<u16>()?;
        let catch_type = if catch_index == 0 {
            None
        } else {
            Some(pool.class_name(catch_index)?.to_string())
        };
        raw_handlers.push(RawHandler {
            start,
            end,
            handler,
            catch_type,
        });
    }

    let mut line_numbers: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
    let attribute_count = parser.read_be::<u16>()?;
    for _ in 0..attribute_count {
        let name = pool.utf8(parser.read_be::<u16>()?)?;
        let length = parser.read_be::<u32>()? as usize;
        let body = parser.read_bytes(length)?;
        if name == "LineNumberTable" {
            let mut table = Parser::new(body);
            let entries = table.read_be::<u16>()?;
            for _ in 0..entries {
                let pc = u32::from(table.read_be::<u16>()?);
                let line = table.read_be::<u16>()?;
                line_numbers.entry(pc).or_default().push(line);
            }
        }
    }

    let decoded = decode_instructions(bytecode, pool)?;
    let starts: BTreeSet<u32> = decoded.iter().map(|(offset, _)| *offset).collect();
    let end_offset = code_length as u32;

    let mut labelled: BTreeSet<u32> = BTreeSet::new();
    for (_, instruction) in &decoded {
        for target in instruction.targets() {
            if !starts.contains(&target.0) {
                return Err(malformed_error!(
                    "branch target {} is not an instruction boundary",
                    target.0
                ));
            }
            labelled.insert(target.0);
        }
    }
    for handler in &raw_handlers {
        if handler.start >= handler.end
            || !starts.contains(&handler.start)
            || !(starts.contains(&handler.end) || handler.end == end_offset)
            || !starts.contains(&handler.handler)
        {
            return Err(malformed_error!(
                "invalid exception range {}..{} -> {}",
                handler.start,
                handler.end,
                handler.handler
            ));
        }
        labelled.insert(handler.start);
        labelled.insert(handler.end);
        labelled.insert(handler.handler);
    }

    let labels: BTreeMap<u32, Label> = labelled
        .iter()
        .enumerate()
        .map(|(id, offset)| (*offset, Label(id as u32)))
        .collect();
    let resolve = |offset: u32| -> Result<Label> {
        labels
            .get(&offset)
            .copied()
            .ok_or_else(|| malformed_error!("no label for offset {}", offset))
    };

    let mut instructions = Vec::with_capacity(decoded.len() + labels.len());
    for (offset, instruction) in decoded {
        if let Some(label) = labels.get(&offset) {
            instructions.push(Instruction::Label(*label));
        }
        if let Some(lines) = line_numbers.get(&offset) {
            instructions.extend(lines.iter().map(|line| Instruction::LineNumber(*line)));
        }
        instructions.push(relabel(instruction, &resolve)?);
    }
    if let Some(label) = labels.get(&end_offset) {
        instructions.push(Instruction::Label(*label));
    }

    let mut handlers = Vec::with_capacity(raw_handlers.len());
    for raw in raw_handlers {
        handlers.push(ExceptionHandler {
            start: resolve(raw.start)?,
            end: resolve(raw.end)?,
            handler: resolve(raw.handler)?,
            catch_type: raw.catch_type,
        });
    }

    let mut code = Code::from_parts(instructions, handlers, labels.len() as u32);
    code.max_stack = max_stack;
    code.max_locals = max_locals;
    Ok(code)
}

fn relabel(
    instruction: Instruction,
    resolve: &dyn Fn(u32) -> Result<Label>,
) -> Result<Instruction> {
    Ok(match instruction {
        Instruction::Jump { opcode, target } => Instruction::Jump {
            opcode,
            target: resolve(target.0)?,
        },
        Instruction::TableSwitch {
            default,
            low,
            high,
            targets,
        } => Instruction::TableSwitch {
            default: resolve(default.0)?,
            low,
            high,
            targets: targets
                .into_iter()
                .map(|target| resolve(target.0))
                .collect::<Result<_>>()?,
        },
        Instruction::LookupSwitch { default, pairs } => Instruction::LookupSwitch {
            default: resolve(default.0)?,
            pairs: pairs
                .into_iter()
                .map(|(key, target)| Ok((key, resolve(target.0)?)))
                .collect::<Result<_>>()?,
        },
        other => other,
    })
}

fn branch_target(start: usize, relative: i32, code_length: usize) -> Result<Label> {
    let target = start as i64 + i64::from(relative);
    if target < 0 || target >= code_length as i64 {
        return Err(malformed_error!(
            "branch at {} targets {} outside the code",
            start,
            target
        ));
    }
    Ok(Label(target as u32))
}

/// Decodes raw bytecode into `(offset, instruction)` pairs whose labels are byte offsets.
pub(crate) fn decode_instructions(
    bytecode: &[u8],
    pool: &ConstantPool,
) -> Result<Vec<(u32, Instruction)>> {
    let mut parser = Parser::new(bytecode);
    let mut decoded = Vec::new();

    while parser.has_more_data() {
        let start = parser.pos();
        let opcode = parser.read_be::<u8>()?;

        let instruction = match opcode {
            BIPUSH => Instruction::Push {
                opcode,
                value: i16::from(parser.read_be::<i8>()?),
            },
            SIPUSH => Instruction::Push {
                opcode,
                value: parser.read_be::<i16>()?,
            },
            LDC => Instruction::Ldc(ldc_constant(
                pool,
                u16::from(parser.read_be::<u8>()?),
                false,
            )?),
            LDC_W => Instruction::Ldc(ldc_constant(pool, parser.read_be::<u16>()?, false)?),
            LDC2_W => Instruction::Ldc(ldc_constant(pool, parser.read_be::<u16>()?, true)?),
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Instruction::Var {
                opcode,
                index: u16::from(parser.read_be::<u8>()?),
            },
            ILOAD_0..=ALOAD_3 | ISTORE_0..=ASTORE_3 => match expand_short_var(opcode) {
                Some((opcode, index)) => Instruction::Var { opcode, index },
                None => return Err(malformed_error!("invalid short load/store {}", opcode)),
            },
            IINC => Instruction::Iinc {
                index: u16::from(parser.read_be::<u8>()?),
                delta: i16::from(parser.read_be::<i8>()?),
            },
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let relative = i32::from(parser.read_be::<i16>()?);
                Instruction::Jump {
                    opcode,
                    target: branch_target(start, relative, bytecode.len())?,
                }
            }
            GOTO_W | JSR_W => {
                let relative = parser.read_be::<i32>()?;
                Instruction::Jump {
                    opcode: if opcode == GOTO_W { GOTO } else { JSR },
                    target: branch_target(start, relative, bytecode.len())?,
                }
            }
            TABLESWITCH => {
                parser.align(4)?;
                let default = branch_target(start, parser.read_be::<i32>()?, bytecode.len())?;
                let low = parser.read_be::<i32>()?;
                let high = parser.read_be::<i32>()?;
                if high < low {
                    return Err(malformed_error!("tableswitch with low {} > high {}", low, high));
                }
                let count = (i64::from(high) - i64::from(low) + 1) as usize;
                if count > bytecode.len() {
                    return Err(malformed_error!("tableswitch with {} targets", count));
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(branch_target(start, parser.read_be::<i32>()?, bytecode.len())?);
                }
                Instruction::TableSwitch {
                    default,
                    low,
                    high,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                parser.align(4)?;
                let default = branch_target(start, parser.read_be::<i32>()?, bytecode.len())?;
                let count = parser.read_be::<i32>()?;
                let Ok(count) = usize::try_from(count) else {
                    return Err(malformed_error!("lookupswitch with {} pairs", count));
                };
                if count > bytecode.len() {
                    return Err(malformed_error!("lookupswitch with {} pairs", count));
                }
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = parser.read_be::<i32>()?;
                    let target = branch_target(start, parser.read_be::<i32>()?, bytecode.len())?;
                    pairs.push((key, target));
                }
                Instruction::LookupSwitch { default, pairs }
            }
            GETSTATIC..=PUTFIELD => {
                let member = pool.member_ref(parser.read_be::<u16>()?)?;
                Instruction::field(opcode, member.owner, member.name, member.descriptor)
            }
            INVOKEVIRTUAL..=INVOKESTATIC => {
                let member = pool.member_ref(parser.read_be::<u16>()?)?;
                Instruction::Method {
                    opcode,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    descriptor: member.descriptor.to_string(),
                    interface: member.interface,
                }
            }
            INVOKEINTERFACE => {
                let member = pool.member_ref(parser.read_be::<u16>()?)?;
                parser.advance_by(2)?;
                Instruction::Method {
                    opcode,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    descriptor: member.descriptor.to_string(),
                    interface: true,
                }
            }
            INVOKEDYNAMIC => {
                let index = parser.read_be::<u16>()?;
                parser.advance_by(2)?;
                let (name, descriptor) = pool.invoke_dynamic(index)?;
                Instruction::InvokeDynamic {
                    index,
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                }
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                Instruction::type_insn(opcode, pool.class_name(parser.read_be::<u16>()?)?)
            }
            NEWARRAY => Instruction::NewArray {
                atype: parser.read_be::<u8>()?,
            },
            MULTIANEWARRAY => Instruction::MultiANewArray {
                class: pool.class_name(parser.read_be::<u16>()?)?.to_string(),
                dimensions: parser.read_be::<u8>()?,
            },
            WIDE => {
                let widened = parser.read_be::<u8>()?;
                if widened == IINC {
                    Instruction::Iinc {
                        index: parser.read_be::<u16>()?,
                        delta: parser.read_be::<i16>()?,
                    }
                } else if is_var_opcode(widened) {
                    Instruction::Var {
                        opcode: widened,
                        index: parser.read_be::<u16>()?,
                    }
                } else {
                    return Err(malformed_error!(
                        "wide prefix on {} at {}",
                        mnemonic(widened),
                        start
                    ));
                }
            }
            other if simple_stack_effect(other).is_some() => Instruction::Op(other),
            other => {
                return Err(malformed_error!(
                    "unknown opcode {:#04x} at offset {}",
                    other,
                    start
                ))
            }
        };

        decoded.push((start as u32, instruction));
    }

    Ok(decoded)
}

fn ldc_constant(pool: &ConstantPool, index: u16, wide: bool) -> Result<LdcConstant> {
    Ok(match pool.get(index)? {
        Constant::Integer(value) => LdcConstant::Int(*value),
        Constant::Float(value) => LdcConstant::Float(*value),
        Constant::Long(value) => LdcConstant::Long(*value),
        Constant::Double(value) => LdcConstant::Double(*value),
        Constant::String { value } => match pool.get(*value)? {
            Constant::Utf8(text) => LdcConstant::String(text.clone()),
            _ => LdcConstant::Raw { index, wide },
        },
        Constant::Class { name } => LdcConstant::Class(pool.utf8(*name)?.to_string()),
        Constant::MethodType { descriptor } => {
            LdcConstant::MethodType(pool.utf8(*descriptor)?.to_string())
        }
        _ => LdcConstant::Raw { index, wide },
    })
}
