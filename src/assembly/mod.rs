//! JVM bytecode assembly and disassembly.
//!
//! Method bodies are handled as lists of symbolic [`Instruction`]s: operands are resolved
//! against the constant pool, branch targets are [`Label`]s, and line numbers travel as
//! pseudo-instructions. This makes the rewrites of [`crate::transform`] plain list
//! edits (splitting a constructor, renaming a body, splicing a dispatch prologue) with
//! all offset arithmetic left to the [`encoder`].
//!
//! # Architecture
//!
//! - [`opcodes`] - opcode constants, stack effects and short-form tables
//! - [`instruction`] - [`Instruction`], [`Label`], [`Code`] and exception handlers
//! - [`decoder`] - `Code` attribute bytes to [`Code`]
//! - [`encoder`] - [`Code`] back to bytes, growing the constant pool as needed
//! - [`stack`] - `max_stack` / `max_locals` computation
//! - [`frames`] - `StackMapTable` frames for class files of version 50 and later
//! - [`generator`] - [`MethodGenerator`] for synthesized bodies
//!
//! # Example
//!
//! ```rust,no_run
//! use shadowbox::assembly::{decode_code, encode_code};
//! use shadowbox::classfile::constant::ConstantPool;
//!
//! # fn example(info: &[u8], pool: &mut ConstantPool) -> shadowbox::Result<()> {
//! let code = decode_code(info, pool)?;
//! let bytes = encode_code(&code, pool, 1)?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod encoder;
pub mod frames;
pub mod generator;
pub mod instruction;
pub mod opcodes;
pub mod stack;

pub use decoder::decode_code;
pub use encoder::{encode_code, encode_code_with_frames, parameter_slots};
pub use generator::MethodGenerator;
pub use instruction::{Code, ExceptionHandler, Instruction, Label, LdcConstant};
