//! Program lifecycle opcodes: child programs, forks and exits.

use tracing::debug;

use crate::context::Context;
use crate::program::{ProgramFlags, ProgramId};
use crate::runtime::Burst;
use crate::{VmError, VmResult};

/// Pops a script name and links a fresh program for it, tagged like its creator.
fn load_script(ctx: &mut Context<'_>) -> VmResult<ProgramId> {
    let name = ctx.pop_string()?;
    let tag = ctx.program().host_tag;
    let id = ctx.runtime.load_program(&mut *ctx.host, &name)?;
    ctx.runtime.programs[id].host_tag = tag;
    Ok(id)
}

fn adopt(ctx: &mut Context<'_>, child: ProgramId) {
    let parent = ctx.id();
    ctx.runtime.programs[child].parent = Some(parent);
    ctx.program_mut().child = Some(child);
}

fn start(ctx: &mut Context<'_>, id: ProgramId) -> VmResult<()> {
    ctx.runtime.check_depth()?;
    ctx.runtime.startup(ctx.dispatcher, &mut *ctx.host, id);
    Ok(())
}

/// Starts a child and blocks until it exits.
pub(super) fn call_start(ctx: &mut Context<'_>) -> VmResult<()> {
    if ctx.program().child.is_some() {
        return Err(VmError::AlreadyHasChild);
    }
    let child = load_script(ctx)?;
    ctx.program_mut().flags.insert(ProgramFlags::CALLING_CHILD);
    adopt(ctx, child);
    debug!(parent = %ctx.id(), child = %child, "callstart");
    start(ctx, child)
}

/// Starts a child that runs alongside its parent.
pub(super) fn spawn(ctx: &mut Context<'_>) -> VmResult<()> {
    if ctx.program().child.is_some() {
        return Err(VmError::AlreadyHasChild);
    }
    let child = load_script(ctx)?;
    ctx.program_mut().flags.insert(ProgramFlags::DETACHED_CHILD);
    adopt(ctx, child);
    debug!(parent = %ctx.id(), child = %child, "spawn");
    start(ctx, child)?;

    if ctx.program().is_critical() {
        if let Some(program) = ctx.runtime.programs.get_mut(child) {
            program.flags.insert(ProgramFlags::CRITICAL);
        }
        ctx.run_nested(child, Burst::Unlimited)?;
    }
    Ok(())
}

pub(super) fn fork(ctx: &mut Context<'_>) -> VmResult<()> {
    let id = load_script(ctx)?;
    debug!(program = %ctx.id(), forked = %id, "fork");
    start(ctx, id)
}

/// Replaces the running program with a fresh one that takes over its parent.
pub(super) fn exec(ctx: &mut Context<'_>) -> VmResult<()> {
    let replacement = load_script(ctx)?;
    let me = ctx.id();
    if let Some(parent) = ctx.program_mut().parent.take() {
        ctx.runtime.programs[replacement].parent = Some(parent);
        if let Some(program) = ctx.runtime.programs.get_mut(parent) {
            if program.child == Some(me) {
                program.child = Some(replacement);
            }
        }
    }
    debug!(program = %me, replacement = %replacement, "exec");
    start(ctx, replacement)?;
    exit(ctx)
}

pub(super) fn exit(ctx: &mut Context<'_>) -> VmResult<()> {
    let id = ctx.id();
    let program = ctx.program_mut();
    program.flags.insert(ProgramFlags::EXITED);
    if let Some(parent) = program.parent {
        if let Some(parent) = ctx.runtime.programs.get_mut(parent) {
            parent.flags.remove(ProgramFlags::DETACHED_CHILD);
        }
    }
    ctx.runtime.purge(id);
    Ok(())
}

pub(super) fn detach(ctx: &mut Context<'_>) -> VmResult<()> {
    let id = ctx.id();
    ctx.runtime.detach(id);
    ctx.program_mut().parent = None;
    Ok(())
}

pub(super) fn exit_program(ctx: &mut Context<'_>) -> VmResult<()> {
    ctx.program_mut().flags.insert(ProgramFlags::EXITED);
    Ok(())
}

/// Halts the program for good. Stopped programs are never rescheduled.
pub(super) fn stop_program(ctx: &mut Context<'_>) -> VmResult<()> {
    ctx.program_mut().flags.insert(ProgramFlags::STOPPED);
    Ok(())
}
