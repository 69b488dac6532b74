//! # Conch bytecode
//!
//! This crate defines the compiled unit format consumed by the conch
//! virtual machine: the constant pool, function definitions and the
//! opcode set, together with the big-endian wire codec.
//!
//! ## Design principles
//!
//! - **Stack-based**: opcodes operate on a byte-addressed operand stack;
//!   the compiler fixes every operand width statically.
//! - **Big-endian wire format**: every multi-byte immediate and header
//!   field is big-endian on disk and converted on read.
//! - **Validated on load**: a [`Unit`] that deserializes successfully is
//!   structurally sound — constant indices resolve to the right entry
//!   kind, parameter areas fit inside locals, and exactly one `::<main>`
//!   entry point exists.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod constant;
pub mod error;
pub mod function;
pub mod opcode;
pub mod reader;
pub mod unit;

pub use builder::{FunctionBuilder, UnitBuilder};
pub use constant::{ConstantPool, PoolEntry, Signature, TypeTag};
pub use error::BytecodeError;
pub use function::Function;
pub use opcode::Opcode;
pub use reader::ByteReader;
pub use unit::Unit;

/// Index of an entry inside a [`ConstantPool`].
pub type ConstantIndex = u32;

/// Suffix that marks a unit's entry point function.
pub const MAIN_SUFFIX: &str = "::<main>";
