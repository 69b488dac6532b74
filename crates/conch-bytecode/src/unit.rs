//! Bytecode unit: constant pool plus function definitions

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::constant::{ConstantPool, PoolEntry, Signature, TypeTag};
use crate::error::{BytecodeError, Result};
use crate::function::Function;
use crate::reader::ByteReader;
use crate::{ConstantIndex, UnitBuilder};

/// Wire tag of a string pool entry
const KIND_STRING: u8 = 0x00;
/// Wire tag of a signature pool entry
const KIND_SIGNATURE: u8 = 0x01;

/// A loaded, validated bytecode unit.
///
/// Construction (via [`Unit::from_bytes`] or [`UnitBuilder::build`])
/// guarantees: every signature resolves and carries no void parameter,
/// every function's parameter and return areas fit inside its locals
/// area, a signature naming a defined function agrees with its byte
/// counts, and exactly one parameterless `::<main>` function exists.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Constants referenced by the instruction stream
    pub pool: ConstantPool,
    functions: Vec<Function>,
    by_name: FxHashMap<String, u32>,
    main: u32,
}

impl Unit {
    /// Start building a unit in memory
    pub fn builder() -> UnitBuilder {
        UnitBuilder::new()
    }

    /// Assemble a unit from already-decoded parts, running the full
    /// structural validation.
    pub fn from_parts(mut pool: ConstantPool, functions: Vec<Function>) -> Result<Self> {
        validate_signatures(&pool, &functions)?;

        // guarantee every identifier has a string entry, so the unit can
        // always be re-encoded
        for function in &functions {
            pool.add_string(&function.name);
        }

        let mut by_name = FxHashMap::default();
        let mut main = None;
        for (index, function) in functions.iter().enumerate() {
            if function.parameters_byte_count > function.locals_byte_size {
                return Err(BytecodeError::ParametersExceedLocals(function.name.clone()));
            }
            if u32::from(function.return_byte_count) > function.locals_byte_size {
                return Err(BytecodeError::ReturnExceedsLocals(function.name.clone()));
            }
            if function.is_main() {
                if function.parameters_byte_count != 0 {
                    return Err(BytecodeError::MainHasParameters(function.name.clone()));
                }
                if main.replace(index as u32).is_some() {
                    return Err(BytecodeError::AmbiguousMain);
                }
            }
            by_name.insert(function.name.clone(), index as u32);
        }
        let main = main.ok_or(BytecodeError::NoMainFunction)?;

        Ok(Self {
            pool,
            functions,
            by_name,
            main,
        })
    }

    /// Decode and validate a unit from its wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);

        let pool = read_pool(&mut reader)?;

        let function_count = reader.read_u32()?;
        let mut functions = Vec::with_capacity(function_count as usize);
        for _ in 0..function_count {
            functions.push(read_function(&mut reader, &pool)?);
        }

        let unit = Self::from_parts(pool, functions)?;
        debug!(
            constants = unit.pool.len(),
            functions = unit.functions.len(),
            "loaded bytecode unit"
        );
        Ok(unit)
    }

    /// Encode the unit to its wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(&(self.pool.len() as u32).to_be_bytes());
        for entry in self.pool.iter() {
            match entry {
                PoolEntry::String(s) => {
                    out.push(KIND_STRING);
                    out.extend_from_slice(&(s.len() as u64).to_be_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                PoolEntry::Signature(sig) => {
                    out.push(KIND_SIGNATURE);
                    out.extend_from_slice(&sig.name.to_be_bytes());
                    out.push(sig.params.len() as u8);
                    for param in &sig.params {
                        out.push(*param as u8);
                    }
                    out.push(sig.return_type as u8);
                }
            }
        }

        out.extend_from_slice(&(self.functions.len() as u32).to_be_bytes());
        for function in &self.functions {
            // the identifier was interned on construction
            let name_idx = self
                .pool
                .iter()
                .position(|e| matches!(e, PoolEntry::String(s) if **s == *function.name))
                .expect("function identifiers are interned by from_parts")
                as u32;
            out.extend_from_slice(&name_idx.to_be_bytes());
            out.extend_from_slice(&function.locals_byte_size.to_be_bytes());
            out.extend_from_slice(&function.parameters_byte_count.to_be_bytes());
            out.push(function.return_byte_count);
            out.extend_from_slice(&(function.instructions.len() as u32).to_be_bytes());
            out.extend_from_slice(&function.instructions);
        }

        out
    }

    /// Get a function by index
    #[inline]
    pub fn function(&self, index: u32) -> Option<&Function> {
        self.functions.get(index as usize)
    }

    /// Look up a function index by qualified identifier
    #[inline]
    pub fn function_index(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Index of the `::<main>` entry point
    #[inline]
    pub fn main_index(&self) -> u32 {
        self.main
    }

    /// The `::<main>` entry point
    pub fn main_function(&self) -> &Function {
        &self.functions[self.main as usize]
    }

    /// All function definitions, in load order
    #[inline]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }
}

fn read_pool(reader: &mut ByteReader<'_>) -> Result<ConstantPool> {
    let count = reader.read_u32()?;
    let mut pool = ConstantPool::with_capacity(count as usize);
    for index in 0..count {
        match reader.read_u8()? {
            KIND_STRING => {
                let len = reader.read_u64()? as usize;
                let bytes = reader.read_bytes(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| BytecodeError::InvalidUtf8(index))?;
                pool.add_string(s);
            }
            KIND_SIGNATURE => {
                let name = reader.read_u32()?;
                let param_count = reader.read_u8()?;
                let mut params = Vec::with_capacity(param_count as usize);
                for _ in 0..param_count {
                    params.push(read_type_tag(reader)?);
                }
                let return_type = read_type_tag(reader)?;
                pool.add_signature(Signature {
                    name,
                    params,
                    return_type,
                });
            }
            kind => return Err(BytecodeError::UnknownConstantKind(kind)),
        }
    }
    Ok(pool)
}

fn read_type_tag(reader: &mut ByteReader<'_>) -> Result<TypeTag> {
    let byte = reader.read_u8()?;
    TypeTag::from_byte(byte).ok_or(BytecodeError::UnknownTypeTag(byte))
}

fn read_function(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Function> {
    let identifier: ConstantIndex = reader.read_u32()?;
    let name = pool.get_string(identifier)?.to_string();
    let locals_byte_size = reader.read_u32()?;
    let parameters_byte_count = reader.read_u32()?;
    let return_byte_count = reader.read_u8()?;
    let instruction_count = reader.read_u32()?;
    let instructions = reader.read_bytes(instruction_count as usize)?.to_vec();
    Ok(Function {
        name,
        locals_byte_size,
        parameters_byte_count,
        return_byte_count,
        instructions,
    })
}

/// Check signature entries against the pool and, when they name a
/// defined function, against its declared byte counts.
fn validate_signatures(pool: &ConstantPool, functions: &[Function]) -> Result<()> {
    for entry in pool.iter() {
        let PoolEntry::Signature(sig) = entry else {
            continue;
        };
        let name = pool.get_string(sig.name)?;
        if sig.params.contains(&TypeTag::Void) {
            return Err(BytecodeError::VoidParameter(name.to_string()));
        }
        let Some(function) = functions.iter().find(|f| f.name == name) else {
            continue;
        };
        let expected = sig.parameters_byte_count();
        if expected != function.parameters_byte_count {
            return Err(BytecodeError::SignatureMismatch {
                name: name.to_string(),
                expected,
                actual: function.parameters_byte_count,
            });
        }
        if sig.return_type.byte_width() != u32::from(function.return_byte_count) {
            return Err(BytecodeError::SignatureMismatch {
                name: name.to_string(),
                expected: sig.return_type.byte_width(),
                actual: u32::from(function.return_byte_count),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    fn minimal_unit() -> Unit {
        let mut builder = Unit::builder();
        let mut main = builder.function("script::<main>");
        main.op(Opcode::Return);
        builder.add_function(main.build());
        builder.build().unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let unit = minimal_unit();
        let bytes = unit.to_bytes();
        let restored = Unit::from_bytes(&bytes).unwrap();
        assert_eq!(restored.functions(), unit.functions());
        assert_eq!(restored.main_function().name, "script::<main>");
    }

    #[test]
    fn test_no_main_rejected() {
        let mut builder = Unit::builder();
        let f = builder.function("script::helper");
        builder.add_function(f.build());
        assert_eq!(builder.build().unwrap_err(), BytecodeError::NoMainFunction);
    }

    #[test]
    fn test_main_with_parameters_rejected() {
        let mut builder = Unit::builder();
        let f = builder
            .function("script::<main>")
            .locals(8)
            .parameters(8);
        builder.add_function(f.build());
        assert!(matches!(
            builder.build().unwrap_err(),
            BytecodeError::MainHasParameters(_)
        ));
    }

    #[test]
    fn test_parameters_exceed_locals_rejected() {
        let mut builder = Unit::builder();
        let f = builder.function("script::f").locals(4).parameters(8);
        builder.add_function(f.build());
        let main = builder.function("script::<main>");
        builder.add_function(main.build());
        assert!(matches!(
            builder.build().unwrap_err(),
            BytecodeError::ParametersExceedLocals(_)
        ));
    }

    #[test]
    fn test_void_parameter_rejected() {
        let mut builder = Unit::builder();
        let name = builder.string("script::f");
        builder.signature(name, vec![TypeTag::Void], TypeTag::Void);
        let main = builder.function("script::<main>");
        builder.add_function(main.build());
        assert!(matches!(
            builder.build().unwrap_err(),
            BytecodeError::VoidParameter(_)
        ));
    }

    #[test]
    fn test_signature_width_mismatch_rejected() {
        let mut builder = Unit::builder();
        let name = builder.string("script::add");
        builder.signature(name, vec![TypeTag::Int, TypeTag::Int], TypeTag::Int);
        // definition claims a single 8-byte parameter instead of 16
        let f = builder
            .function("script::add")
            .locals(16)
            .parameters(8)
            .returns(8);
        builder.add_function(f.build());
        let main = builder.function("script::<main>");
        builder.add_function(main.build());
        assert!(matches!(
            builder.build().unwrap_err(),
            BytecodeError::SignatureMismatch { expected: 16, actual: 8, .. }
        ));
    }

    #[test]
    fn test_truncated_unit_rejected() {
        let bytes = minimal_unit().to_bytes();
        assert_eq!(
            Unit::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err(),
            BytecodeError::UnexpectedEnd
        );
    }
}
