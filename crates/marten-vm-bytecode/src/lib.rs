//! # Marten VM Bytecode
//!
//! This crate defines the bytecode format for the Marten JavaScript engine.
//!
//! ## Design Principles
//!
//! - **Register-based**: Operations work on virtual registers, not a stack
//! - **Immutable**: Instructions never change after compilation; runtime
//!   feedback lives out of line in per-function cache tables
//! - **Serializable**: Modules can be cached to disk for fast startup

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constant;
pub mod error;
pub mod function;
pub mod instruction;
pub mod module;
pub mod operand;

pub use constant::{Constant, ConstantPool};
pub use error::BytecodeError;
pub use function::{Function, FunctionFlags, SourcePosition};
pub use instruction::{Instruction, Opcode};
pub use module::Module;
pub use operand::{CacheSlot, ConstantIndex, FunctionIndex, JumpTarget, Register, StackSlot};

/// Bytecode format version
pub const BYTECODE_VERSION: u32 = 1;

/// Magic bytes for bytecode files
pub const BYTECODE_MAGIC: [u8; 8] = *b"MARTENB\0";
