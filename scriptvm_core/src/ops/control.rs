use tracing::trace;

use super::code_address;
use crate::context::Context;
use crate::export::ExternalKind;
use crate::image::{trampoline, ProcedureEntry, ProcedureFlags};
use crate::program::ProgramFlags;
use crate::runtime::Burst;
use crate::value::Value;
use crate::{VmError, VmResult};

pub(super) fn noop(_ctx: &mut Context<'_>) -> VmResult<()> {
    Ok(())
}

/// Pushes the 32-bit literal that follows the opcode word.
pub(super) fn push(ctx: &mut Context<'_>) -> VmResult<()> {
    let word = ctx.opcode();
    let program = ctx.program_mut();
    let operand = program
        .image
        .read_long(program.ip)
        .ok_or(VmError::InvalidAddress(program.ip as i32))?;
    program.ip += 4;
    ctx.push(Value::from_literal(word, operand))
}

pub(super) fn critical_start(ctx: &mut Context<'_>) -> VmResult<()> {
    ctx.program_mut().flags.insert(ProgramFlags::CRITICAL);
    Ok(())
}

pub(super) fn critical_done(ctx: &mut Context<'_>) -> VmResult<()> {
    ctx.program_mut().flags.remove(ProgramFlags::CRITICAL);
    Ok(())
}

pub(super) fn jump(ctx: &mut Context<'_>) -> VmResult<()> {
    let target = code_address(ctx.pop_integer()?)?;
    ctx.program_mut().ip = target;
    Ok(())
}

/// Truthy: discard the else address. Falsy: jump to it.
pub(super) fn branch_if(ctx: &mut Context<'_>) -> VmResult<()> {
    let condition = ctx.pop()?;
    if condition.is_truthy() {
        ctx.pop()?;
    } else {
        let target = code_address(ctx.pop_integer()?)?;
        ctx.program_mut().ip = target;
    }
    Ok(())
}

pub(super) fn branch_while(ctx: &mut Context<'_>) -> VmResult<()> {
    let condition = ctx.pop()?;
    if !condition.is_truthy() {
        let target = code_address(ctx.pop_integer()?)?;
        ctx.program_mut().ip = target;
    }
    Ok(())
}

pub(super) fn call(ctx: &mut Context<'_>) -> VmResult<()> {
    let index = ctx.pop_integer()?;
    let slot = ctx.program().procedure_index(index)?;
    let entry = ctx.program().procedures[slot];
    if entry.is_imported() {
        return call_external(ctx, entry);
    }

    let program = ctx.program_mut();
    if entry.flags.contains(ProcedureFlags::CRITICAL) {
        program.flags.insert(ProgramFlags::CRITICAL);
    }
    program.ip = entry.entry_address;
    Ok(())
}

/// Runs an imported procedure inside its exporting program, to completion.
fn call_external(ctx: &mut Context<'_>, entry: ProcedureEntry) -> VmResult<()> {
    let name = ctx.program().identifier(entry.name_offset)?.to_string();
    let export = ctx
        .exports()
        .procedure(&name)
        .cloned()
        .ok_or_else(|| VmError::UnknownExternal {
            kind: ExternalKind::Procedure,
            name: name.clone(),
        })?;

    let argc = ctx.pop_integer()?;
    if argc != export.argument_count {
        return Err(VmError::ArgumentCountMismatch {
            procedure: name,
            expected: export.argument_count,
            found: argc,
        });
    }
    let mut args = Vec::new();
    for _ in 0..argc {
        args.push(ctx.pop()?);
    }
    args.reverse();

    let caller = ctx.id();
    trace!(procedure = %name, callee = %export.owner, argc, "external call");
    ctx.runtime.setup_external_call(
        caller,
        export.owner,
        export.address,
        trampoline::EXTERN_CALL_RETURN,
        args,
    )?;
    if ctx.program().is_critical() {
        ctx.runtime.programs[export.owner]
            .flags
            .insert(ProgramFlags::CRITICAL);
    }
    ctx.run_nested(export.owner, Burst::Unlimited)?;

    let program = ctx.program_mut();
    if program.flags.contains(ProgramFlags::CALLING_CHILD) {
        program.flags.remove(ProgramFlags::CALLING_CHILD);
        return Err(VmError::ExternalCallIncomplete(name));
    }
    Ok(())
}

pub(super) fn pop_return(ctx: &mut Context<'_>) -> VmResult<()> {
    let target = code_address(ctx.control_pop_integer()?)?;
    ctx.program_mut().ip = target;
    Ok(())
}

/// Returns and ends the running slice.
pub(super) fn pop_exit(ctx: &mut Context<'_>) -> VmResult<()> {
    pop_return(ctx)?;
    ctx.program_mut().flags.insert(ProgramFlags::RETURNED);
    Ok(())
}

pub(super) fn pop_address(ctx: &mut Context<'_>) -> VmResult<()> {
    ctx.program_mut().control.pop()?;
    Ok(())
}

pub(super) fn pop_flags(ctx: &mut Context<'_>) -> VmResult<()> {
    let id = ctx.id();
    ctx.runtime.pop_flags(id)
}

pub(super) fn pop_flags_return(ctx: &mut Context<'_>) -> VmResult<()> {
    pop_flags(ctx)?;
    pop_return(ctx)
}

pub(super) fn pop_flags_exit(ctx: &mut Context<'_>) -> VmResult<()> {
    pop_flags(ctx)?;
    pop_exit(ctx)
}

pub(super) fn pop_flags_return_extern(ctx: &mut Context<'_>) -> VmResult<()> {
    pop_flags(ctx)?;
    let id = ctx.id();
    ctx.runtime.restore_caller(id)?;
    pop_return(ctx)
}

pub(super) fn pop_flags_exit_extern(ctx: &mut Context<'_>) -> VmResult<()> {
    pop_flags(ctx)?;
    let id = ctx.id();
    ctx.runtime.restore_caller(id)?;
    pop_exit(ctx)
}

/// Hands a result back to the program that made a cross-program call and resumes both
/// sides at their saved return addresses.
pub(super) fn pop_flags_return_val_extern(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.pop()?;
    pop_flags(ctx)?;
    let id = ctx.id();
    let caller = ctx.runtime.restore_caller(id)?;
    let value = ctx.runtime.transfer_value(id, caller, value)?;

    let caller_program = &mut ctx.runtime.programs[caller];
    caller_program.data.push(value)?;
    let caller_critical = caller_program.flags.contains(ProgramFlags::CRITICAL);
    let resume = code_address(caller_program.control.pop_integer()?)?;
    caller_program.ip = resume;

    if caller_critical {
        ctx.program_mut().flags.remove(ProgramFlags::CRITICAL);
    }
    pop_exit(ctx)
}

pub(super) fn pop_flags_return_val_exit(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.pop()?;
    pop_flags_exit(ctx)?;
    ctx.push(value)
}

pub(super) fn pop_flags_return_val_exit_extern(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.pop()?;
    pop_flags_exit_extern(ctx)?;
    ctx.push(value)
}
