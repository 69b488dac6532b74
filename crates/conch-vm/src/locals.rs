//! Frame locals
//!
//! Fixed-size byte window addressed by explicit byte offsets (not slot
//! numbers). The heading `parameters_byte_count` bytes are filled from
//! the caller's arguments on frame entry.

use crate::error::{VmError, VmResult};
use crate::value::ValueRef;

/// Mutable view over one frame's locals window
#[derive(Debug)]
pub struct Locals<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Locals<'a> {
    /// Create a view over a frame's locals bytes
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Declared locals size in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn get_array<const N: usize>(&self, at: usize) -> VmResult<[u8; N]> {
        let bytes = self
            .bytes
            .get(at..at + N)
            .ok_or(VmError::LocalsOutOfBound {
                offset: at,
                width: N,
                capacity: self.bytes.len(),
            })?;
        Ok(bytes.try_into().expect("slice length checked above"))
    }

    fn set_array<const N: usize>(&mut self, at: usize, value: [u8; N]) -> VmResult<()> {
        let capacity = self.bytes.len();
        self.bytes
            .get_mut(at..at + N)
            .ok_or(VmError::LocalsOutOfBound {
                offset: at,
                width: N,
                capacity,
            })?
            .copy_from_slice(&value);
        Ok(())
    }

    /// Read the byte at offset `at`
    pub fn get_byte(&self, at: usize) -> VmResult<i8> {
        Ok(i8::from_ne_bytes(self.get_array::<1>(at)?))
    }

    /// Read the qword at offset `at`
    pub fn get_q_word(&self, at: usize) -> VmResult<i64> {
        Ok(i64::from_ne_bytes(self.get_array::<8>(at)?))
    }

    /// Read the float at offset `at`
    pub fn get_double(&self, at: usize) -> VmResult<f64> {
        Ok(f64::from_ne_bytes(self.get_array::<8>(at)?))
    }

    /// Read the reference word at offset `at`
    pub fn get_ref(&self, at: usize) -> VmResult<ValueRef> {
        Ok(ValueRef::from_raw(u64::from_ne_bytes(
            self.get_array::<8>(at)?,
        )))
    }

    /// Write a byte at offset `at`
    pub fn set_byte(&mut self, value: i8, at: usize) -> VmResult<()> {
        self.set_array(at, value.to_ne_bytes())
    }

    /// Write a qword at offset `at`
    pub fn set_q_word(&mut self, value: i64, at: usize) -> VmResult<()> {
        self.set_array(at, value.to_ne_bytes())
    }

    /// Write a float at offset `at`
    pub fn set_double(&mut self, value: f64, at: usize) -> VmResult<()> {
        self.set_array(at, value.to_ne_bytes())
    }

    /// Write a reference word at offset `at`
    pub fn set_ref(&mut self, value: ValueRef, at: usize) -> VmResult<()> {
        self.set_array(at, value.raw().to_ne_bytes())
    }
}
