//! Stack shuffling, frames and procedure directory queries.

use crate::context::Context;
use crate::{VmError, VmResult};

pub(super) fn a_to_d(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.program_mut().control.pop()?;
    ctx.push(value)
}

pub(super) fn d_to_a(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.pop()?;
    ctx.program_mut().control.push(value)
}

pub(super) fn swap(ctx: &mut Context<'_>) -> VmResult<()> {
    ctx.program_mut().data.swap_top()
}

pub(super) fn swap_a(ctx: &mut Context<'_>) -> VmResult<()> {
    ctx.program_mut().control.swap_top()
}

pub(super) fn pop(ctx: &mut Context<'_>) -> VmResult<()> {
    ctx.pop()?;
    Ok(())
}

pub(super) fn dup(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.program().data.peek()?;
    ctx.push(value)
}

pub(super) fn dump(ctx: &mut Context<'_>) -> VmResult<()> {
    let count = ctx.pop_integer()?;
    for _ in 0..count {
        ctx.pop()?;
    }
    Ok(())
}

/// Opens a frame whose first locals are the `argc` values already on the stack.
pub(super) fn push_base(ctx: &mut Context<'_>) -> VmResult<()> {
    let argc = ctx.pop_integer()?;
    let program = ctx.program_mut();
    let depth = i32::try_from(program.data.len()).map_err(|_| VmError::InvalidAddress(argc))?;
    let base = depth
        .checked_sub(argc)
        .filter(|base| (0..=depth).contains(base))
        .ok_or(VmError::InvalidAddress(argc))?;
    let previous = program.frame_pointer;
    program.control.push(previous)?;
    program.frame_pointer = base;
    Ok(())
}

pub(super) fn pop_base(ctx: &mut Context<'_>) -> VmResult<()> {
    let previous = ctx.control_pop_integer()?;
    ctx.program_mut().frame_pointer = previous;
    Ok(())
}

pub(super) fn pop_to_base(ctx: &mut Context<'_>) -> VmResult<()> {
    let program = ctx.program_mut();
    let base = usize::try_from(program.frame_pointer)
        .ok()
        .filter(|base| *base <= program.data.len())
        .ok_or(VmError::InvalidAddress(program.frame_pointer))?;
    program.data.truncate(base);
    Ok(())
}

/// Fixes the base used by global fetches and stores.
pub(super) fn set_global(ctx: &mut Context<'_>) -> VmResult<()> {
    let program = ctx.program_mut();
    program.base_pointer = program.data.len() as i32;
    Ok(())
}

fn slot(base: i32, offset: i32) -> VmResult<i32> {
    base.checked_add(offset).ok_or(VmError::InvalidAddress(offset))
}

pub(super) fn fetch(ctx: &mut Context<'_>) -> VmResult<()> {
    let offset = ctx.pop_integer()?;
    let program = ctx.program();
    let value = program.data.get(slot(program.frame_pointer, offset)?)?;
    ctx.push(value)
}

pub(super) fn store(ctx: &mut Context<'_>) -> VmResult<()> {
    let offset = ctx.pop_integer()?;
    let value = ctx.pop()?;
    let program = ctx.program_mut();
    let index = slot(program.frame_pointer, offset)?;
    program.data.set(index, value)
}

pub(super) fn fetch_global(ctx: &mut Context<'_>) -> VmResult<()> {
    let offset = ctx.pop_integer()?;
    let program = ctx.program();
    let value = program.data.get(slot(program.base_pointer, offset)?)?;
    ctx.push(value)
}

pub(super) fn store_global(ctx: &mut Context<'_>) -> VmResult<()> {
    let offset = ctx.pop_integer()?;
    let value = ctx.pop()?;
    let program = ctx.program_mut();
    let index = slot(program.base_pointer, offset)?;
    program.data.set(index, value)
}

pub(super) fn check_arg_count(ctx: &mut Context<'_>) -> VmResult<()> {
    let expected = ctx.pop_integer()?;
    let index = ctx.pop_integer()?;
    let program = ctx.program();
    let slot = program.procedure_index(index)?;
    let declared = program.procedures[slot].argument_count;
    if declared != expected {
        return Err(VmError::ArgumentCountMismatch {
            procedure: program.procedure_name(slot).unwrap_or("<unnamed>").to_string(),
            expected: declared,
            found: expected,
        });
    }
    Ok(())
}

/// Resolves a procedure name at run time. The entry procedure cannot be looked up.
pub(super) fn lookup_procedure_by_name(ctx: &mut Context<'_>) -> VmResult<()> {
    let name = ctx.pop_string()?;
    let program = ctx.program();
    let index = (1..program.procedures.len())
        .find(|index| {
            program
                .procedure_name(*index)
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(&name))
        })
        .ok_or(VmError::UnknownProcedure(name))?;
    ctx.push(index as i32)
}

pub(super) fn fetch_procedure_address(ctx: &mut Context<'_>) -> VmResult<()> {
    let index = ctx.pop_integer()?;
    let program = ctx.program();
    let slot = program.procedure_index(index)?;
    let address = program.procedures[slot].entry_address;
    ctx.push(address as i32)
}
