//! Bounds-checked reader over the big-endian wire format

use crate::error::{BytecodeError, Result};

/// Cursor over a byte slice; every multi-byte read converts from
/// big-endian to host order.
#[derive(Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader over `bytes`, positioned at the start
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current byte position
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Whether the reader has consumed all input
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        let [b] = *self.read_array::<1>()?;
        Ok(b)
    }

    /// Read a big-endian `u32`
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(*self.read_array::<4>()?))
    }

    /// Read a big-endian `u64`
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(*self.read_array::<8>()?))
    }

    /// Read a big-endian `i64`
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(*self.read_array::<8>()?))
    }

    /// Read `n` raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(BytecodeError::UnexpectedEnd);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<&'a [u8; N]> {
        if self.remaining() < N {
            return Err(BytecodeError::UnexpectedEnd);
        }
        let array = self.bytes[self.pos..self.pos + N]
            .try_into()
            .expect("slice length checked above");
        self.pos += N;
        Ok(array)
    }
}
