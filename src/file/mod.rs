//! Low-level binary access shared by the class-file reader and the bytecode decoder.
//!
//! - [`crate::file::io`] - big-endian primitive conversion with bounds checking
//! - [`crate::file::parser`] - a cursor over a byte slice

pub mod io;
pub mod parser;
