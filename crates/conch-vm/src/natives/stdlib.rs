//! `std::*` natives: panics, process exit, environment, stdin, option
//! boxing, memory introspection and numeric conversions

use std::io::BufRead;

use crate::error::{VmError, VmResult};
use crate::heap::Obj;
use crate::natives::{NativeContext, NativeRegistry};
use crate::operand_stack::OperandStack;
use crate::value::ValueRef;

pub(super) fn install(registry: &mut NativeRegistry) {
    registry.register("std::panic", panic);
    registry.register("std::exit", exit);
    registry.register("std::env", env);
    registry.register("std::set_env", set_env);
    registry.register("std::read_line", read_line);
    registry.register("std::new_vec", new_vec);
    registry.register("std::some", some);
    registry.register("std::none", none);
    registry.register("std::memory::gc", gc);
    registry.register("std::memory::empty_operands", empty_operands);
    registry.register("std::memory::program_arguments", program_arguments);
    registry.register("std::convert::ceil", ceil);
    registry.register("std::convert::floor", floor);
    registry.register("std::convert::round", round);
    registry.register("std::convert::parse_int_radix", parse_int_radix);
}

fn panic(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let message = operands.pop_reference()?;
    Err(VmError::Panic(ctx.resolve_str(message)?.to_string()))
}

fn exit(operands: &mut OperandStack<'_>, _ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let code = operands.pop_byte()?;
    std::process::exit(i32::from(code));
}

fn env(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let name = operands.pop_reference()?;
    let value = std::env::var(ctx.resolve_str(name)?).unwrap_or_default();
    let index = ctx.strings.insert(value);
    operands.push_reference(ValueRef::interned(index))
}

fn set_env(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_reference()?;
    let name = operands.pop_reference()?;
    std::env::set_var(ctx.resolve_str(name)?, ctx.resolve_str(value)?);
    Ok(())
}

fn read_line(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
    if line.ends_with('\n') {
        line.pop();
    }
    let index = ctx.strings.insert(line);
    operands.push_reference(ValueRef::interned(index))
}

fn new_vec(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let vector = ctx.heap.alloc(Obj::Vec(Vec::new()));
    operands.push_reference(ValueRef::object(vector))
}

fn some(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_int()?;
    let boxed = ctx.heap.alloc(Obj::Int(value));
    operands.push_reference(ValueRef::object(boxed))
}

fn none(operands: &mut OperandStack<'_>, _ctx: &mut NativeContext<'_>) -> VmResult<()> {
    operands.push_reference(ValueRef::NULL)
}

fn gc(_operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    ctx.request_gc();
    Ok(())
}

fn empty_operands(operands: &mut OperandStack<'_>, _ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let empty = operands.is_empty();
    operands.push_byte(empty.into())
}

fn program_arguments(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let args = ctx.program_args;
    let elements: Vec<ValueRef> = args
        .iter()
        .map(|arg| ValueRef::object(ctx.heap.alloc(Obj::Str(arg.clone().into_boxed_str()))))
        .collect();
    let vector = ctx.heap.alloc(Obj::Vec(elements));
    operands.push_reference(ValueRef::object(vector))
}

fn ceil(operands: &mut OperandStack<'_>, _ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_double()?;
    operands.push_int(value.ceil() as i64)
}

fn floor(operands: &mut OperandStack<'_>, _ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_double()?;
    operands.push_int(value.floor() as i64)
}

fn round(operands: &mut OperandStack<'_>, _ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_double()?;
    operands.push_int(value.round() as i64)
}

fn parse_int_radix(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let radix = operands.pop_int()?;
    let subject = operands.pop_reference()?;
    if !(2..=36).contains(&radix) {
        return Err(VmError::Panic(format!("Invalid base: {radix}.")));
    }
    let parsed = i64::from_str_radix(ctx.resolve_str(subject)?, radix as u32);
    match parsed {
        Ok(value) => {
            let boxed = ctx.heap.alloc(Obj::Int(value));
            operands.push_reference(ValueRef::object(boxed))
        }
        Err(_) => operands.push_reference(ValueRef::NULL),
    }
}
