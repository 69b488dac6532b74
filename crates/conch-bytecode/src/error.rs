//! Bytecode errors

use thiserror::Error;

/// Errors raised while decoding or validating a bytecode unit
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BytecodeError {
    /// The reader ran out of bytes mid-entry
    #[error("unexpected end of bytecode")]
    UnexpectedEnd,

    /// Unknown constant pool entry kind tag
    #[error("unknown constant kind {0:#04x}")]
    UnknownConstantKind(u8),

    /// Unknown type tag in a function signature
    #[error("unknown type tag {0:#04x}")]
    UnknownTypeTag(u8),

    /// A constant index does not resolve to any pool entry
    #[error("no constant at index {0}")]
    MissingConstant(u32),

    /// A constant index resolves to an entry of the wrong kind
    #[error("constant {0} is not a string")]
    ExpectedString(u32),

    /// A string constant is not valid UTF-8
    #[error("string constant {0} is not valid UTF-8")]
    InvalidUtf8(u32),

    /// A signature declares a `void` parameter
    #[error("function `{0}` declares a void parameter")]
    VoidParameter(String),

    /// A signature's type-tag widths disagree with the function definition
    #[error("signature of `{name}` expects {expected} parameter bytes, the definition declares {actual}")]
    SignatureMismatch {
        /// Qualified function identifier
        name: String,
        /// Byte count derived from the signature's type tags
        expected: u32,
        /// Byte count declared by the function definition
        actual: u32,
    },

    /// A function's parameter area does not fit inside its locals area
    #[error("function `{0}`: parameter bytes exceed the locals area")]
    ParametersExceedLocals(String),

    /// A function's return area does not fit inside its locals area
    #[error("function `{0}`: return bytes exceed the locals area")]
    ReturnExceedsLocals(String),

    /// The unit contains no `::<main>` function
    #[error("unit does not contain a `<main>` function")]
    NoMainFunction,

    /// The unit contains more than one `::<main>` function
    #[error("unit contains more than one `<main>` function")]
    AmbiguousMain,

    /// The entry point declares parameters
    #[error("function `{0}`: the entry point takes no parameters")]
    MainHasParameters(String),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
