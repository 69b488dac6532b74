//! `lang::*` natives: conversions, string operations and vectors

use crate::error::{VmError, VmResult};
use crate::heap::Obj;
use crate::natives::{NativeContext, NativeRegistry};
use crate::operand_stack::OperandStack;
use crate::value::ValueRef;

pub(super) fn install(registry: &mut NativeRegistry) {
    registry.register("lang::Int::to_string", int_to_string);
    registry.register("lang::Float::to_string", float_to_string);
    registry.register("lang::String::concat", str_concat);
    registry.register("lang::String::eq", str_eq);
    registry.register("lang::String::split", str_split);
    registry.register("lang::String::bytes", str_bytes);
    registry.register("lang::Vec::push", vec_push);
    registry.register("lang::Vec::pop", vec_pop);
    registry.register("lang::Vec::pop_head", vec_pop_head);
    registry.register("lang::Vec::len", vec_len);
    registry.register("lang::Vec::[]", vec_index);
    registry.register("lang::Vec::[]=", vec_index_set);
}

fn int_to_string(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_int()?;
    let index = ctx.strings.insert(value.to_string());
    operands.push_reference(ValueRef::interned(index))
}

fn float_to_string(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_double()?;
    let index = ctx.strings.insert(value.to_string());
    operands.push_reference(ValueRef::interned(index))
}

fn str_concat(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let right = operands.pop_reference()?;
    let left = operands.pop_reference()?;
    let joined = {
        let left = ctx.resolve_str(left)?;
        let right = ctx.resolve_str(right)?;
        format!("{left}{right}")
    };
    let index = ctx.strings.insert(joined);
    operands.push_reference(ValueRef::interned(index))
}

fn str_eq(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let right = operands.pop_reference()?;
    let left = operands.pop_reference()?;
    let equal = ctx.resolve_str(left)? == ctx.resolve_str(right)?;
    operands.push_byte(equal.into())
}

fn str_split(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let delimiter = operands.pop_reference()?;
    let subject = operands.pop_reference()?;
    let parts: Vec<String> = {
        let delimiter = ctx.resolve_str(delimiter)?;
        if delimiter.is_empty() {
            return Err(VmError::Panic("Empty delimiter.".to_string()));
        }
        let subject = ctx.resolve_str(subject)?;
        subject.split(delimiter).map(str::to_string).collect()
    };
    let elements: Vec<ValueRef> = parts
        .into_iter()
        .map(|part| ValueRef::object(ctx.heap.alloc(Obj::Str(part.into_boxed_str()))))
        .collect();
    let vector = ctx.heap.alloc(Obj::Vec(elements));
    operands.push_reference(ValueRef::object(vector))
}

fn str_bytes(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let subject = operands.pop_reference()?;
    let bytes: Vec<u8> = ctx.resolve_str(subject)?.bytes().collect();
    let elements: Vec<ValueRef> = bytes
        .into_iter()
        .map(|b| ValueRef::object(ctx.heap.alloc(Obj::Int(i64::from(b)))))
        .collect();
    let vector = ctx.heap.alloc(Obj::Vec(elements));
    operands.push_reference(ValueRef::object(vector))
}

/// Resolve a reference expected to designate a heap vector
fn vec_items<'h>(
    ctx: &'h mut NativeContext<'_>,
    reference: ValueRef,
) -> VmResult<&'h mut Vec<ValueRef>> {
    let handle = reference.as_object().ok_or_else(not_a_vector)?;
    match ctx.heap.get_mut(handle) {
        Some(Obj::Vec(items)) => Ok(items),
        _ => Err(not_a_vector()),
    }
}

fn not_a_vector() -> VmError {
    VmError::InvalidBytecode("reference does not designate a vector".to_string())
}

fn vec_push(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_reference()?;
    let vector = operands.pop_reference()?;
    vec_items(ctx, vector)?.push(value);
    Ok(())
}

fn vec_pop(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let vector = operands.pop_reference()?;
    let value = vec_items(ctx, vector)?
        .pop()
        .ok_or_else(|| VmError::Panic("Cannot pop empty vector.".to_string()))?;
    operands.push_reference(value)
}

fn vec_pop_head(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let vector = operands.pop_reference()?;
    let items = vec_items(ctx, vector)?;
    if items.is_empty() {
        return Err(VmError::Panic("Cannot pop empty vector.".to_string()));
    }
    let value = items.remove(0);
    operands.push_reference(value)
}

fn vec_len(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let vector = operands.pop_reference()?;
    let len = vec_items(ctx, vector)?.len();
    operands.push_int(len as i64)
}

fn vec_index(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let index = operands.pop_int()?;
    let vector = operands.pop_reference()?;
    let items = vec_items(ctx, vector)?;
    let value = usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i).copied())
        .ok_or_else(|| index_out_of_range(index, items.len()))?;
    operands.push_reference(value)
}

fn vec_index_set(operands: &mut OperandStack<'_>, ctx: &mut NativeContext<'_>) -> VmResult<()> {
    let value = operands.pop_reference()?;
    let index = operands.pop_int()?;
    let vector = operands.pop_reference()?;
    let items = vec_items(ctx, vector)?;
    let len = items.len();
    let slot = usize::try_from(index)
        .ok()
        .and_then(|i| items.get_mut(i))
        .ok_or_else(|| index_out_of_range(index, len))?;
    *slot = value;
    Ok(())
}

fn index_out_of_range(index: i64, len: usize) -> VmError {
    VmError::Panic(format!(
        "Index {index} is out of range, the vector contains {len} elements."
    ))
}
