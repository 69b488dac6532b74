//! Interpreter dispatch loop
//!
//! Drives the top frame of the call stack: reads one opcode, advances
//! the instruction pointer, executes the opcode body. A frame run ends
//! by `RETURN` (or running off the instruction buffer), by invoking a
//! bytecode callee (a new frame is pushed and the loop re-enters it),
//! or by a collection request. Return values are moved from the
//! returning frame's operand stack to the caller's.

use std::ffi::CString;

use conch_bytecode::{Opcode, PoolEntry, Unit};
use tracing::debug;

use crate::call_stack::{CallStack, StackFrame};
use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::fd_table::FdTable;
use crate::gc;
use crate::heap::ObjectHeap;
use crate::natives::{NativeContext, NativeFn, NativeRegistry};
use crate::strings::StringInterner;
use crate::value::{self, ValueRef};

/// Exit code for failed process-level syscalls (`fork`, `dup2`, `pipe`)
const EX_OSERR: i32 = 71;
/// Exit code for failed I/O syscalls (`open`, `read`, `write`)
const EX_IOERR: i32 = 74;
/// Exit code of a child whose `EXEC` target could not be run
const COMMAND_NOT_RUNNABLE: i32 = 126;

/// Mutable runtime state shared by every frame: everything the
/// interpreter owns except the call stack itself.
#[derive(Debug)]
struct RuntimeState {
    strings: StringInterner,
    heap: ObjectHeap,
    fd_table: FdTable,
    natives: NativeRegistry,
    /// Pool-index-aligned reference words for string entries
    constant_refs: Vec<ValueRef>,
    program_args: Vec<String>,
    gc_requested: bool,
}

/// Why a frame run handed control back to the outer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    /// `RETURN` executed or the instruction buffer ended
    Returned,
    /// A bytecode callee must be entered
    Invoked(u32),
    /// A native requested a collection at this opcode boundary
    GcRequested,
}

/// A virtual machine executing one loaded unit
#[derive(Debug)]
pub struct Vm<'u> {
    unit: &'u Unit,
    state: RuntimeState,
    call_stack: CallStack,
}

impl<'u> Vm<'u> {
    /// Create a VM over `unit` with the baseline native library
    /// installed. Constant-pool strings are interned eagerly so
    /// `PUSH_STRING` is a table lookup.
    pub fn new(unit: &'u Unit, config: VmConfig) -> Self {
        let mut strings = StringInterner::new();
        let constant_refs = unit
            .pool
            .iter()
            .map(|entry| match entry {
                PoolEntry::String(s) => ValueRef::interned(strings.insert(s.to_string())),
                PoolEntry::Signature(_) => ValueRef::NULL,
            })
            .collect();

        Self {
            unit,
            state: RuntimeState {
                strings,
                heap: ObjectHeap::new(),
                fd_table: FdTable::new(),
                natives: NativeRegistry::with_defaults(),
                constant_refs,
                program_args: config.program_args,
                gc_requested: false,
            },
            call_stack: CallStack::new(config.call_stack_capacity),
        }
    }

    /// Register (or replace) a native function
    pub fn register_native(&mut self, name: impl Into<String>, native: NativeFn) {
        self.state.natives.register(name, native);
    }

    /// The managed object heap
    pub fn heap(&self) -> &ObjectHeap {
        &self.state.heap
    }

    /// The string intern pool
    pub fn strings(&self) -> &StringInterner {
        &self.state.strings
    }

    /// Execute the unit from its `::<main>` entry point until the call
    /// stack empties or an error unwinds.
    pub fn run(&mut self) -> VmResult<()> {
        let unit = self.unit;
        let main_index = unit.main_index();
        self.call_stack.push_frame(unit.main_function(), main_index)?;
        debug!(entry = %unit.main_function().name, "seeded root frame");

        loop {
            let Some(mut frame) = self.call_stack.peek_frame() else {
                break;
            };
            let def = unit
                .function(frame.function)
                .ok_or_else(|| invalid_function_index(frame.function))?;

            let outcome = run_frame(unit, &mut self.state, &mut frame, &def.instructions)?;
            match outcome {
                RunOutcome::Invoked(callee_index) => {
                    let callee = unit
                        .function(callee_index)
                        .ok_or_else(|| invalid_function_index(callee_index))?;
                    self.call_stack.push_frame(callee, callee_index)?;
                }
                RunOutcome::GcRequested => {
                    self.state.gc_requested = false;
                    gc::collect(&mut self.state.heap, &self.call_stack);
                }
                RunOutcome::Returned => {
                    let returned = usize::from(def.return_byte_count);
                    let mut scratch = [0u8; u8::MAX as usize];
                    let bytes = frame.operands.pop_bytes(returned)?;
                    scratch[..returned].copy_from_slice(bytes);

                    self.call_stack.pop_frame();
                    match self.call_stack.peek_frame() {
                        Some(mut caller) => caller.operands.push_raw(&scratch[..returned])?,
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
}

fn invalid_function_index(index: u32) -> VmError {
    VmError::InvalidBytecode(format!("no function at index {index}"))
}

/// Execute opcodes of the top frame until it returns, yields to a
/// bytecode callee, or requests a collection.
fn run_frame(
    unit: &Unit,
    state: &mut RuntimeState,
    frame: &mut StackFrame<'_>,
    instructions: &[u8],
) -> VmResult<RunOutcome> {
    while *frame.ip < instructions.len() {
        let byte = instructions[*frame.ip];
        let opcode = Opcode::from_byte(byte)
            .ok_or_else(|| VmError::InvalidBytecode(format!("unknown opcode {byte:#04x}")))?;
        *frame.ip += 1;

        match opcode {
            Opcode::PushByte => {
                let value = fetch_u8(instructions, frame.ip)?;
                frame.operands.push_byte(value as i8)?;
            }
            Opcode::PushInt => {
                let value = fetch_i64(instructions, frame.ip)?;
                frame.operands.push_int(value)?;
            }
            Opcode::PushFloat => {
                let bits = fetch_u64(instructions, frame.ip)?;
                frame.operands.push_double(f64::from_bits(bits))?;
            }
            Opcode::PushString => {
                let index = fetch_u32(instructions, frame.ip)?;
                let reference = state
                    .constant_refs
                    .get(index as usize)
                    .copied()
                    .filter(|r| !r.is_null())
                    .ok_or_else(|| {
                        VmError::InvalidBytecode(format!("constant {index} is not a string"))
                    })?;
                frame.operands.push_reference(reference)?;
            }

            Opcode::GetByte => {
                let offset = fetch_u32(instructions, frame.ip)? as usize;
                let value = frame.locals.get_byte(offset)?;
                frame.operands.push_byte(value)?;
            }
            Opcode::SetByte => {
                let offset = fetch_u32(instructions, frame.ip)? as usize;
                let value = frame.operands.pop_byte()?;
                frame.locals.set_byte(value, offset)?;
            }
            Opcode::GetQWord => {
                let offset = fetch_u32(instructions, frame.ip)? as usize;
                let value = frame.locals.get_q_word(offset)?;
                frame.operands.push_int(value)?;
            }
            Opcode::SetQWord => {
                let offset = fetch_u32(instructions, frame.ip)? as usize;
                let value = frame.operands.pop_int()?;
                frame.locals.set_q_word(value, offset)?;
            }
            Opcode::GetRef => {
                let offset = fetch_u32(instructions, frame.ip)? as usize;
                let value = frame.locals.get_ref(offset)?;
                frame.operands.push_reference(value)?;
            }
            Opcode::SetRef => {
                let offset = fetch_u32(instructions, frame.ip)? as usize;
                let value = frame.operands.pop_reference()?;
                frame.locals.set_ref(value, offset)?;
            }

            Opcode::PopByte => {
                frame.operands.pop_byte()?;
            }
            Opcode::PopQWord => {
                frame.operands.pop_bytes(8)?;
            }
            Opcode::PopRef => {
                frame.operands.pop_reference()?;
            }
            Opcode::Dup => {
                let value = frame.operands.pop_int()?;
                frame.operands.push_int(value)?;
                frame.operands.push_int(value)?;
            }
            Opcode::DupByte => {
                let value = frame.operands.pop_byte()?;
                frame.operands.push_byte(value)?;
                frame.operands.push_byte(value)?;
            }
            Opcode::Swap => {
                let a = frame.operands.pop_int()?;
                let b = frame.operands.pop_int()?;
                frame.operands.push_int(a)?;
                frame.operands.push_int(b)?;
            }
            Opcode::Swap2 => {
                let a = frame.operands.pop_int()?;
                let b = frame.operands.pop_int()?;
                let c = frame.operands.pop_int()?;
                frame.operands.push_int(b)?;
                frame.operands.push_int(a)?;
                frame.operands.push_int(c)?;
            }

            Opcode::Jump => {
                let target = fetch_u32(instructions, frame.ip)?;
                *frame.ip = target as usize;
            }
            Opcode::IfJump | Opcode::IfNotJump => {
                let value = frame.operands.pop_byte()?;
                let target = fetch_u32(instructions, frame.ip)?;
                if (value == 1) == (opcode == Opcode::IfJump) {
                    *frame.ip = target as usize;
                }
            }
            Opcode::Return => return Ok(RunOutcome::Returned),

            Opcode::IntAdd
            | Opcode::IntSub
            | Opcode::IntMul
            | Opcode::IntDiv
            | Opcode::IntMod => {
                let b = frame.operands.pop_int()?;
                let a = frame.operands.pop_int()?;
                frame.operands.push_int(int_arithmetic(opcode, a, b)?)?;
            }
            Opcode::FloatAdd | Opcode::FloatSub | Opcode::FloatMul | Opcode::FloatDiv => {
                let b = frame.operands.pop_double()?;
                let a = frame.operands.pop_double()?;
                frame.operands.push_double(float_arithmetic(opcode, a, b)?)?;
            }
            Opcode::ByteXor => {
                let a = frame.operands.pop_byte()?;
                let b = frame.operands.pop_byte()?;
                frame.operands.push_byte(a ^ b)?;
            }

            Opcode::IntEq | Opcode::IntLt | Opcode::IntLe | Opcode::IntGt | Opcode::IntGe => {
                let b = frame.operands.pop_int()?;
                let a = frame.operands.pop_int()?;
                frame.operands.push_byte(int_comparison(opcode, a, b)?.into())?;
            }
            Opcode::FloatEq
            | Opcode::FloatLt
            | Opcode::FloatLe
            | Opcode::FloatGt
            | Opcode::FloatGe => {
                let b = frame.operands.pop_double()?;
                let a = frame.operands.pop_double()?;
                frame
                    .operands
                    .push_byte(float_comparison(opcode, a, b)?.into())?;
            }
            Opcode::StrEq => {
                let right = frame.operands.pop_reference()?;
                let left = frame.operands.pop_reference()?;
                let equal = value::resolve_str(left, &state.strings, &state.heap)?
                    == value::resolve_str(right, &state.strings, &state.heap)?;
                frame.operands.push_byte(equal.into())?;
            }
            Opcode::ByteEq => {
                let b = frame.operands.pop_byte()?;
                let a = frame.operands.pop_byte()?;
                frame.operands.push_byte((a == b).into())?;
            }

            Opcode::ByteToInt => {
                let value = frame.operands.pop_byte()?;
                frame.operands.push_int(i64::from(value))?;
            }
            Opcode::IntToByte => {
                let value = frame.operands.pop_int()?;
                frame.operands.push_byte(value as i8)?;
            }
            Opcode::IntToStr => {
                let value = frame.operands.pop_int()?;
                let index = state.strings.insert(value.to_string());
                frame.operands.push_reference(ValueRef::interned(index))?;
            }
            Opcode::FloatToStr => {
                let value = frame.operands.pop_double()?;
                let index = state.strings.insert(value.to_string());
                frame.operands.push_reference(ValueRef::interned(index))?;
            }
            Opcode::Concat => {
                let right = frame.operands.pop_reference()?;
                let left = frame.operands.pop_reference()?;
                let joined = {
                    let left = value::resolve_str(left, &state.strings, &state.heap)?;
                    let right = value::resolve_str(right, &state.strings, &state.heap)?;
                    format!("{left}{right}")
                };
                let index = state.strings.insert(joined);
                frame.operands.push_reference(ValueRef::interned(index))?;
            }

            Opcode::Invoke => {
                let index = fetch_u32(instructions, frame.ip)?;
                let name = unit
                    .pool
                    .identifier(index)
                    .map_err(|e| VmError::InvalidBytecode(e.to_string()))?;
                if let Some(callee) = unit.function_index(name) {
                    // entering a bytecode callee interrupts this frame run
                    return Ok(RunOutcome::Invoked(callee));
                }
                let Some(native) = state.natives.get(name) else {
                    return Err(VmError::FunctionNotFound(name.to_string()));
                };
                let mut ctx = NativeContext::new(
                    &mut state.heap,
                    &mut state.strings,
                    &state.program_args,
                    &mut state.gc_requested,
                );
                native(&mut frame.operands, &mut ctx)?;
                if state.gc_requested {
                    return Ok(RunOutcome::GcRequested);
                }
            }

            Opcode::Fork => {
                let target = fetch_u32(instructions, frame.ip)?;
                // SAFETY: fork has no preconditions; the child continues
                // with a private copy of the whole VM state.
                match unsafe { libc::fork() } {
                    -1 => fail_syscall("fork", EX_OSERR),
                    0 => {} // child falls through, stack untouched
                    pid => {
                        *frame.ip = target as usize;
                        frame.operands.push_int(i64::from(pid))?;
                    }
                }
            }
            Opcode::Exec => {
                let argc = usize::from(fetch_u8(instructions, frame.ip)?);
                if argc == 0 {
                    return Err(VmError::InvalidBytecode(
                        "EXEC requires at least one argument".to_string(),
                    ));
                }
                let mut argv = vec![CString::default(); argc];
                for slot in argv.iter_mut().rev() {
                    let reference = frame.operands.pop_reference()?;
                    let arg = value::resolve_str(reference, &state.strings, &state.heap)?;
                    *slot = CString::new(arg).map_err(|_| {
                        VmError::InvalidBytecode("EXEC argument contains a NUL byte".to_string())
                    })?;
                }
                let mut ptrs: Vec<*const libc::c_char> =
                    argv.iter().map(|arg| arg.as_ptr()).collect();
                ptrs.push(std::ptr::null());
                // SAFETY: ptrs is a NULL-terminated argv whose strings
                // outlive the call; execvp only returns on failure.
                unsafe { libc::execvp(ptrs[0], ptrs.as_ptr()) };
                eprintln!(
                    "conch: {}: {}",
                    argv[0].to_string_lossy(),
                    std::io::Error::last_os_error()
                );
                // SAFETY: the child must not unwind through the parent's
                // duplicated state; _exit skips atexit and Drop.
                unsafe { libc::_exit(COMMAND_NOT_RUNNABLE) }
            }
            Opcode::Wait => {
                let pid = frame.operands.pop_int()? as libc::pid_t;
                let mut status: libc::c_int = 0;
                // SAFETY: status is a valid out-pointer.
                if unsafe { libc::waitpid(pid, &mut status, 0) } == -1 {
                    eprintln!("conch: waitpid: {}", std::io::Error::last_os_error());
                }
                frame
                    .operands
                    .push_byte((libc::WEXITSTATUS(status) & 0xFF) as i8)?;
            }
            Opcode::Exit => {
                let code = frame.operands.pop_byte()?;
                std::process::exit(i32::from(code));
            }

            Opcode::Open => {
                let path_ref = frame.operands.pop_reference()?;
                let flags = fetch_i32(instructions, frame.ip)?;
                let path = value::resolve_str(path_ref, &state.strings, &state.heap)?;
                let c_path = CString::new(path).map_err(|_| {
                    VmError::InvalidBytecode("OPEN path contains a NUL byte".to_string())
                })?;
                // SAFETY: c_path is NUL-terminated; the mode argument
                // applies when O_CREAT is among the flags.
                let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o600 as libc::c_uint) };
                if fd == -1 {
                    fail_syscall("open", EX_IOERR);
                }
                frame.operands.push_int(i64::from(fd))?;
            }
            Opcode::Close => {
                let fd = frame.operands.pop_int()? as libc::c_int;
                // SAFETY: closing an arbitrary descriptor is sound; a
                // bad fd only yields EBADF.
                unsafe { libc::close(fd) };
            }
            Opcode::Pipe => {
                let mut fds = [0 as libc::c_int; 2];
                // SAFETY: fds is a valid out-array of two ints.
                if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
                    fail_syscall("pipe", EX_OSERR);
                }
                frame.operands.push_int(i64::from(fds[0]))?;
                frame.operands.push_int(i64::from(fds[1]))?;
            }
            Opcode::SetupRedirect => {
                let target_fd = frame.operands.pop_int()? as libc::c_int;
                let src_fd = frame.operands.pop_int()? as libc::c_int;
                if let Err(err) = state.fd_table.push_redirection(src_fd, target_fd) {
                    eprintln!("conch: dup2: {err}");
                    std::process::exit(EX_OSERR);
                }
                frame.operands.push_int(i64::from(src_fd))?;
            }
            Opcode::Redirect => {
                let target_fd = frame.operands.pop_int()? as libc::c_int;
                let src_fd = frame.operands.pop_int()? as libc::c_int;
                // SAFETY: dup2 accepts arbitrary descriptor values;
                // failure is reported via errno.
                if unsafe { libc::dup2(src_fd, target_fd) } == -1 {
                    fail_syscall("dup2", EX_OSERR);
                }
                frame.operands.push_int(i64::from(src_fd))?;
            }
            Opcode::PopRedirect => {
                if !state.fd_table.pop_redirection() {
                    return Err(VmError::InvalidBytecode(
                        "no active redirection to pop".to_string(),
                    ));
                }
            }
            Opcode::Read => {
                let fd = frame.operands.pop_int()? as libc::c_int;
                let mut out = Vec::new();
                let mut buffer = [0u8; 4096];
                loop {
                    // SAFETY: buffer is valid for buffer.len() writes.
                    let n = unsafe { libc::read(fd, buffer.as_mut_ptr().cast(), buffer.len()) };
                    if n < 0 {
                        let err = std::io::Error::last_os_error();
                        if matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EINTR)) {
                            continue;
                        }
                        eprintln!("conch: read: {err}");
                        std::process::exit(EX_IOERR);
                    }
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&buffer[..n as usize]);
                }
                if out.last() == Some(&b'\n') {
                    out.pop();
                }
                let contents = String::from_utf8_lossy(&out).into_owned();
                let index = state.strings.insert(contents);
                frame.operands.push_reference(ValueRef::interned(index))?;
            }
            Opcode::Write => {
                let reference = frame.operands.pop_reference()?;
                let fd = frame.operands.pop_int()? as libc::c_int;
                let data = value::resolve_str(reference, &state.strings, &state.heap)?.as_bytes();
                let mut written = 0;
                while written < data.len() {
                    // SAFETY: the pointer range stays within data.
                    let n = unsafe {
                        libc::write(fd, data[written..].as_ptr().cast(), data.len() - written)
                    };
                    if n < 0 {
                        let err = std::io::Error::last_os_error();
                        if matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EINTR)) {
                            continue;
                        }
                        eprintln!("conch: write: {err}");
                        std::process::exit(EX_IOERR);
                    }
                    written += n as usize;
                }
                // SAFETY: the descriptor belongs to bytecode; WRITE's
                // contract closes it after the payload is flushed.
                unsafe { libc::close(fd) };
            }
        }
    }
    Ok(RunOutcome::Returned)
}

fn fail_syscall(what: &str, code: i32) -> ! {
    eprintln!("conch: {what}: {}", std::io::Error::last_os_error());
    std::process::exit(code)
}

fn truncated() -> VmError {
    VmError::InvalidBytecode("instructions ended inside an immediate".to_string())
}

fn fetch_u8(code: &[u8], ip: &mut usize) -> VmResult<u8> {
    let byte = *code.get(*ip).ok_or_else(truncated)?;
    *ip += 1;
    Ok(byte)
}

fn fetch_u32(code: &[u8], ip: &mut usize) -> VmResult<u32> {
    let bytes = code.get(*ip..*ip + 4).ok_or_else(truncated)?;
    *ip += 4;
    Ok(u32::from_be_bytes(bytes.try_into().expect("4-byte slice")))
}

fn fetch_i32(code: &[u8], ip: &mut usize) -> VmResult<i32> {
    Ok(fetch_u32(code, ip)? as i32)
}

fn fetch_u64(code: &[u8], ip: &mut usize) -> VmResult<u64> {
    let bytes = code.get(*ip..*ip + 8).ok_or_else(truncated)?;
    *ip += 8;
    Ok(u64::from_be_bytes(bytes.try_into().expect("8-byte slice")))
}

fn fetch_i64(code: &[u8], ip: &mut usize) -> VmResult<i64> {
    Ok(fetch_u64(code, ip)? as i64)
}

/// Apply an integer arithmetic opcode; division and modulo by zero trap
fn int_arithmetic(opcode: Opcode, a: i64, b: i64) -> VmResult<i64> {
    match opcode {
        Opcode::IntAdd => Ok(a.wrapping_add(b)),
        Opcode::IntSub => Ok(a.wrapping_sub(b)),
        Opcode::IntMul => Ok(a.wrapping_mul(b)),
        Opcode::IntDiv if b == 0 => Err(VmError::Panic("Division by zero.".to_string())),
        Opcode::IntDiv => Ok(a.wrapping_div(b)),
        Opcode::IntMod if b == 0 => Err(VmError::Panic("Modulo by zero.".to_string())),
        Opcode::IntMod => Ok(a.wrapping_rem(b)),
        _ => Err(VmError::InvalidBytecode(format!(
            "{opcode:?} is not an integer arithmetic opcode"
        ))),
    }
}

/// Apply a float arithmetic opcode
fn float_arithmetic(opcode: Opcode, a: f64, b: f64) -> VmResult<f64> {
    match opcode {
        Opcode::FloatAdd => Ok(a + b),
        Opcode::FloatSub => Ok(a - b),
        Opcode::FloatMul => Ok(a * b),
        Opcode::FloatDiv => Ok(a / b),
        _ => Err(VmError::InvalidBytecode(format!(
            "{opcode:?} is not a float arithmetic opcode"
        ))),
    }
}

/// Apply an integer comparison opcode
fn int_comparison(opcode: Opcode, a: i64, b: i64) -> VmResult<bool> {
    match opcode {
        Opcode::IntEq => Ok(a == b),
        Opcode::IntLt => Ok(a < b),
        Opcode::IntLe => Ok(a <= b),
        Opcode::IntGt => Ok(a > b),
        Opcode::IntGe => Ok(a >= b),
        _ => Err(VmError::InvalidBytecode(format!(
            "{opcode:?} is not an integer comparison opcode"
        ))),
    }
}

/// Apply a float comparison opcode
fn float_comparison(opcode: Opcode, a: f64, b: f64) -> VmResult<bool> {
    match opcode {
        Opcode::FloatEq => Ok(a == b),
        Opcode::FloatLt => Ok(a < b),
        Opcode::FloatLe => Ok(a <= b),
        Opcode::FloatGt => Ok(a > b),
        Opcode::FloatGe => Ok(a >= b),
        _ => Err(VmError::InvalidBytecode(format!(
            "{opcode:?} is not a float comparison opcode"
        ))),
    }
}
