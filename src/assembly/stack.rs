//! Operand stack and local variable sizing.
//!
//! Rewritten bodies need fresh `max_stack` and `max_locals` values. `max_stack` is found
//! by a worklist walk over the instruction list: every reachable instruction is visited
//! with the deepest stack it can be entered with, branches and switch targets inherit the
//! depth after the branching instruction, and exception handlers start with exactly the
//! caught throwable on the stack.

use rustc_hash::FxHashMap;

use crate::{
    assembly::{
        instruction::{ExceptionHandler, Instruction, Label},
        opcodes,
    },
    Result,
};

/// Deepest operand stack any path through the body can reach, in slots.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] when a path pops more than it pushed, a label is
/// referenced but never placed, or the depth grows without bound around a loop.
pub fn max_stack(instructions: &[Instruction], handlers: &[ExceptionHandler]) -> Result<u16> {
    let positions = label_positions(instructions);
    let position_of = |label: Label| -> Result<usize> {
        positions
            .get(&label)
            .copied()
            .ok_or_else(|| malformed_error!("label {:?} is not placed in the body", label))
    };

    let mut entry_depth: Vec<Option<u32>> = vec![None; instructions.len()];
    let mut worklist: Vec<(usize, u32)> = vec![(0, 0)];
    for handler in handlers {
        worklist.push((position_of(handler.handler)?, 1));
    }

    let mut max: u32 = 0;
    while let Some((start, depth)) = worklist.pop() {
        let mut index = start;
        let mut depth = depth;
        max = max.max(depth);

        while let Some(instruction) = instructions.get(index) {
            match entry_depth[index] {
                Some(seen) if seen >= depth => break,
                _ => entry_depth[index] = Some(depth),
            }

            let (pop, push) = instruction.stack_effect()?;
            let Some(after_pop) = depth.checked_sub(u32::from(pop)) else {
                return Err(malformed_error!(
                    "operand stack underflow at instruction {} ({:?})",
                    index,
                    instruction
                ));
            };
            depth = after_pop + u32::from(push);
            if depth > u32::from(u16::MAX) {
                return Err(malformed_error!("operand stack exceeds 65535 slots"));
            }
            max = max.max(depth);

            match instruction {
                Instruction::Jump { opcode, target } => {
                    worklist.push((position_of(*target)?, depth));
                    match *opcode {
                        opcodes::GOTO | opcodes::GOTO_W => break,
                        opcodes::JSR | opcodes::JSR_W => {
                            // the subroutine consumes its return address before `ret`
                            depth -= 1;
                        }
                        _ => {}
                    }
                }
                Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => {
                    for target in instruction.targets() {
                        worklist.push((position_of(target)?, depth));
                    }
                    break;
                }
                other if other.ends_block() => break,
                _ => {}
            }

            index += 1;
        }
    }

    Ok(max as u16)
}

/// Local variable slots needed by the body: the receiver and parameters plus every slot a
/// load, store, `iinc` or `ret` touches.
#[must_use]
pub fn max_locals(instructions: &[Instruction], parameter_slots: u16) -> u16 {
    instructions
        .iter()
        .filter_map(|instruction| match instruction {
            Instruction::Var { opcode, index } => {
                let (_, _, width) = opcodes::var_effect(*opcode);
                Some(u32::from(*index) + u32::from(width))
            }
            Instruction::Iinc { index, .. } => Some(u32::from(*index) + 1),
            _ => None,
        })
        .fold(u32::from(parameter_slots), u32::max)
        .min(u32::from(u16::MAX)) as u16
}

pub(crate) fn label_positions(instructions: &[Instruction]) -> FxHashMap<Label, usize> {
    instructions
        .iter()
        .enumerate()
        .filter_map(|(index, instruction)| match instruction {
            Instruction::Label(label) => Some((*label, index)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes::*;

    #[test]
    fn test_straight_line_depth() {
        let body = vec![
            Instruction::var(ALOAD, 0),
            Instruction::var(LLOAD, 1),
            Instruction::var(LLOAD, 3),
            Instruction::op(LADD),
            Instruction::method(INVOKEVIRTUAL, "a/B", "take", "(J)V"),
            Instruction::op(RETURN),
        ];
        assert_eq!(max_stack(&body, &[]).unwrap(), 5);
        assert_eq!(max_locals(&body, 5), 5);
    }

    #[test]
    fn test_branches_take_the_deepest_path() {
        let else_label = Label(0);
        let join = Label(1);
        let body = vec![
            Instruction::var(ILOAD, 0),
            Instruction::Jump {
                opcode: IFEQ,
                target: else_label,
            },
            Instruction::op(DCONST_1),
            Instruction::op(DCONST_1),
            Instruction::op(DADD),
            Instruction::op(POP2),
            Instruction::Jump {
                opcode: GOTO,
                target: join,
            },
            Instruction::Label(else_label),
            Instruction::op(ICONST_1),
            Instruction::op(POP),
            Instruction::Label(join),
            Instruction::op(RETURN),
        ];
        assert_eq!(max_stack(&body, &[]).unwrap(), 4);
    }

    #[test]
    fn test_handler_enters_with_throwable() {
        let start = Label(0);
        let end = Label(1);
        let handler = Label(2);
        let body = vec![
            Instruction::Label(start),
            Instruction::op(RETURN),
            Instruction::Label(end),
            Instruction::Label(handler),
            Instruction::op(DUP),
            Instruction::op(POP),
            Instruction::op(ATHROW),
        ];
        let handlers = vec![ExceptionHandler {
            start,
            end,
            handler,
            catch_type: None,
        }];
        assert_eq!(max_stack(&body, &handlers).unwrap(), 2);
    }

    #[test]
    fn test_underflow_is_reported() {
        let body = vec![Instruction::op(POP), Instruction::op(RETURN)];
        assert!(max_stack(&body, &[]).is_err());
    }

    #[test]
    fn test_wide_locals_count_two_slots() {
        let body = vec![
            Instruction::op(DCONST_0),
            Instruction::var(DSTORE, 7),
            Instruction::Iinc { index: 3, delta: 1 },
        ];
        assert_eq!(max_locals(&body, 1), 9);
    }
}
