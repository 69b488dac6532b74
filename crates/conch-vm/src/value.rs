//! Reference words
//!
//! A reference occupies one pointer-width (8 byte) slot on the operand
//! stack or in locals. Instead of raw addresses, conch encodes a tagged
//! handle: the high bit selects the interned-string space, anything
//! else is an object-heap handle biased by one so that the all-zero
//! word is the null reference (`std::none`). Root scanning stays
//! conservative over aligned slots, as a raw-pointer scan would be.

use crate::error::{VmError, VmResult};
use crate::heap::{Handle, Obj, ObjectHeap};
use crate::strings::StringInterner;

const INTERN_TAG: u64 = 1 << 63;

/// One reference word as stored on the operand stack or in locals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ValueRef(u64);

impl ValueRef {
    /// The null reference
    pub const NULL: ValueRef = ValueRef(0);

    /// Reference to an interned string
    #[inline]
    pub fn interned(index: u32) -> Self {
        Self(INTERN_TAG | u64::from(index))
    }

    /// Reference to an object-heap slot
    #[inline]
    pub fn object(handle: Handle) -> Self {
        Self(u64::from(handle.index()) + 1)
    }

    /// Reinterpret a stack word as a reference
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw stack word
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is the null reference
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Interned-string index, when this word designates one
    #[inline]
    pub fn as_interned(self) -> Option<u32> {
        if self.0 & INTERN_TAG != 0 {
            Some((self.0 & !INTERN_TAG) as u32)
        } else {
            None
        }
    }

    /// Object-heap handle, when this word designates one
    #[inline]
    pub fn as_object(self) -> Option<Handle> {
        if self.0 & INTERN_TAG == 0 && self.0 != 0 && self.0 - 1 <= u64::from(u32::MAX) {
            Some(Handle::new((self.0 - 1) as u32))
        } else {
            None
        }
    }
}

/// Resolve a reference to string content, in either space.
pub fn resolve_str<'a>(
    reference: ValueRef,
    strings: &'a StringInterner,
    heap: &'a ObjectHeap,
) -> VmResult<&'a str> {
    if let Some(index) = reference.as_interned() {
        return strings
            .get(index)
            .ok_or_else(|| VmError::InvalidBytecode(format!("dangling string reference {index}")));
    }
    if let Some(handle) = reference.as_object() {
        if let Some(Obj::Str(s)) = heap.get(handle) {
            return Ok(s);
        }
    }
    Err(VmError::InvalidBytecode(
        "reference does not designate a string".to_string(),
    ))
}
