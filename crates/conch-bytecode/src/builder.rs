//! Builders for units and functions
//!
//! Tests and tools assemble units in memory instead of shipping
//! compiler output around; the builders intern constants and emit
//! big-endian immediates exactly as the wire format does.

use crate::constant::{ConstantPool, Signature, TypeTag};
use crate::error::Result;
use crate::function::Function;
use crate::opcode::Opcode;
use crate::unit::Unit;
use crate::ConstantIndex;

/// Builder for a [`Unit`]
#[derive(Debug, Default)]
pub struct UnitBuilder {
    pool: ConstantPool,
    functions: Vec<Function>,
}

impl UnitBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string constant, returning its pool index
    pub fn string(&mut self, s: &str) -> ConstantIndex {
        self.pool.add_string(s)
    }

    /// Append a signature constant, returning its pool index
    pub fn signature(
        &mut self,
        name: ConstantIndex,
        params: Vec<TypeTag>,
        return_type: TypeTag,
    ) -> ConstantIndex {
        self.pool.add_signature(Signature {
            name,
            params,
            return_type,
        })
    }

    /// Start a function builder for `name`
    pub fn function(&self, name: &str) -> FunctionBuilder {
        FunctionBuilder::new(name)
    }

    /// Add a finished function, returning its index
    pub fn add_function(&mut self, function: Function) -> u32 {
        let index = self.functions.len() as u32;
        self.functions.push(function);
        index
    }

    /// Validate and build the unit
    pub fn build(self) -> Result<Unit> {
        Unit::from_parts(self.pool, self.functions)
    }
}

/// Builder and assembler for a single [`Function`]
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    locals_byte_size: u32,
    parameters_byte_count: u32,
    return_byte_count: u8,
    code: Vec<u8>,
}

impl FunctionBuilder {
    /// Create a builder for a function named `name`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            locals_byte_size: 0,
            parameters_byte_count: 0,
            return_byte_count: 0,
            code: Vec::new(),
        }
    }

    /// Set the locals area size in bytes
    pub fn locals(mut self, bytes: u32) -> Self {
        self.locals_byte_size = bytes;
        self
    }

    /// Set the parameter byte count
    pub fn parameters(mut self, bytes: u32) -> Self {
        self.parameters_byte_count = bytes;
        self
    }

    /// Set the return byte count
    pub fn returns(mut self, bytes: u8) -> Self {
        self.return_byte_count = bytes;
        self
    }

    /// Emit an opcode without immediate
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    /// Emit an opcode with a one-byte immediate
    pub fn op_u8(&mut self, op: Opcode, value: u8) -> &mut Self {
        self.code.push(op as u8);
        self.code.push(value);
        self
    }

    /// Emit an opcode with a big-endian `u32` immediate
    pub fn op_u32(&mut self, op: Opcode, value: u32) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Emit an opcode with a big-endian `i32` immediate
    pub fn op_i32(&mut self, op: Opcode, value: i32) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Emit an opcode with a big-endian `i64` immediate
    pub fn op_i64(&mut self, op: Opcode, value: i64) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Emit an opcode with a big-endian IEEE-754 double immediate
    pub fn op_f64(&mut self, op: Opcode, value: f64) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend_from_slice(&value.to_bits().to_be_bytes());
        self
    }

    /// Current instruction offset, usable as a jump target
    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Emit a jump-family opcode with a placeholder target, returning
    /// the patch site for [`FunctionBuilder::patch_u32`]
    pub fn forward_jump(&mut self, op: Opcode) -> u32 {
        self.code.push(op as u8);
        let site = self.code.len() as u32;
        self.code.extend_from_slice(&u32::MAX.to_be_bytes());
        site
    }

    /// Overwrite the big-endian `u32` at `site` (from [`forward_jump`])
    ///
    /// [`forward_jump`]: FunctionBuilder::forward_jump
    pub fn patch_u32(&mut self, site: u32, value: u32) {
        self.code[site as usize..site as usize + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Finish the function
    pub fn build(self) -> Function {
        Function {
            name: self.name,
            locals_byte_size: self.locals_byte_size,
            parameters_byte_count: self.parameters_byte_count,
            return_byte_count: self.return_byte_count,
            instructions: self.code,
        }
    }
}
