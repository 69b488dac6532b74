//! VM error types

use thiserror::Error;

/// Errors that terminate bytecode execution.
///
/// None of these is catchable from bytecode; they unwind the whole call
/// stack and reach the embedder, which reports them as
/// `kind: message` (see [`VmError::kind`]).
#[derive(Debug, Error, PartialEq)]
pub enum VmError {
    /// The loader rejected the unit
    #[error(transparent)]
    InvalidStructure(#[from] conch_bytecode::BytecodeError),

    /// Unknown opcode or malformed operand met at dispatch time
    #[error("{0}")]
    InvalidBytecode(String),

    /// A push would exceed the call-stack buffer capacity
    #[error("exceeded stack capacity")]
    StackOverflow,

    /// A pop asked for more bytes than the operand stack holds
    #[error("operand stack underflow: needed {needed} bytes, had {available}")]
    OperandStackUnderflow {
        /// Bytes the pop required
        needed: usize,
        /// Bytes the operand stack held
        available: usize,
    },

    /// A locals access fell outside the declared locals area
    #[error("locals access out of bounds at offset {offset} (width {width}, capacity {capacity})")]
    LocalsOutOfBound {
        /// Byte offset of the access
        offset: usize,
        /// Width of the accessed value
        width: usize,
        /// Declared locals size
        capacity: usize,
    },

    /// `INVOKE` target exists neither as bytecode nor as a native
    #[error("could not find function {0}")]
    FunctionNotFound(String),

    /// Recoverable-by-the-embedder runtime failure (`std::panic`,
    /// vector index out of bounds, invalid radix, ...)
    #[error("{0}")]
    Panic(String),
}

impl VmError {
    /// Name of the error kind, matching the VM's documented taxonomy
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidStructure(_) => "InvalidBytecodeStructure",
            Self::InvalidBytecode(_) => "InvalidBytecodeError",
            Self::StackOverflow => "StackOverflow",
            Self::OperandStackUnderflow { .. } => "OperandStackUnderflow",
            Self::LocalsOutOfBound { .. } => "LocalsOutOfBound",
            Self::FunctionNotFound(_) => "FunctionNotFound",
            Self::Panic(_) => "RuntimeException",
        }
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
