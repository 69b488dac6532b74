//! Native (host-implemented) functions
//!
//! A native is invoked by `INVOKE` through a qualified name and runs
//! in the caller's frame: it pops its arguments right-to-left from the
//! caller's operand stack and pushes its result (if any) back. The
//! capability set handed to a native is deliberately narrow — operand
//! stack, heaps and a collection request flag — never the call stack
//! or the fd table.

mod lang;
mod stdlib;

use rustc_hash::FxHashMap;

use crate::error::VmResult;
use crate::heap::ObjectHeap;
use crate::operand_stack::OperandStack;
use crate::strings::StringInterner;
use crate::value::{self, ValueRef};

/// Host callback signature
pub type NativeFn = fn(&mut OperandStack<'_>, &mut NativeContext<'_>) -> VmResult<()>;

/// Capabilities available to a native during one invocation
#[derive(Debug)]
pub struct NativeContext<'a> {
    /// The managed object heap
    pub heap: &'a mut ObjectHeap,
    /// The string intern pool
    pub strings: &'a mut StringInterner,
    /// Arguments the embedder passed to the program
    pub program_args: &'a [String],
    gc_requested: &'a mut bool,
}

impl<'a> NativeContext<'a> {
    /// Assemble a context from the runtime pieces
    pub fn new(
        heap: &'a mut ObjectHeap,
        strings: &'a mut StringInterner,
        program_args: &'a [String],
        gc_requested: &'a mut bool,
    ) -> Self {
        Self {
            heap,
            strings,
            program_args,
            gc_requested,
        }
    }

    /// Ask the interpreter to run a collection at this opcode boundary
    pub fn request_gc(&mut self) {
        *self.gc_requested = true;
    }

    /// Whether a collection has been requested
    pub fn gc_requested(&self) -> bool {
        *self.gc_requested
    }

    /// Resolve a reference to string content, in either space
    pub fn resolve_str(&self, reference: ValueRef) -> VmResult<&str> {
        value::resolve_str(reference, self.strings, self.heap)
    }
}

/// Map from qualified identifier to host callback
#[derive(Debug, Default)]
pub struct NativeRegistry {
    entries: FxHashMap<String, NativeFn>,
}

impl NativeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the baseline standard library
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        lang::install(&mut registry);
        stdlib::install(&mut registry);
        registry
    }

    /// Register (or replace) a native under `name`
    pub fn register(&mut self, name: impl Into<String>, native: NativeFn) {
        self.entries.insert(name.into(), native);
    }

    /// Look up a native by qualified name
    #[inline]
    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.entries.get(name).copied()
    }

    /// Number of registered natives
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn with_native_env<R>(
    f: impl FnOnce(&mut OperandStack<'_>, &mut NativeContext<'_>) -> R,
) -> R {
    let mut buffer = [0u8; 512];
    let mut len = 0;
    let mut heap = ObjectHeap::new();
    let mut strings = StringInterner::new();
    let mut gc_requested = false;
    let program_args = vec!["build".to_string(), "--fast".to_string()];
    let mut operands = OperandStack::new(&mut buffer, &mut len);
    let mut ctx = NativeContext::new(&mut heap, &mut strings, &program_args, &mut gc_requested);
    f(&mut operands, &mut ctx)
}
