//! Timed and conditional arming, waits and cancellation.

use super::code_address;
use crate::context::Context;
use crate::image::ProcedureFlags;
use crate::program::WaitCondition;
use crate::{VmError, VmResult};

/// Index of an entry the event dispatcher may fire. The entry procedure never qualifies.
fn event_index(ctx: &Context<'_>, index: i32) -> VmResult<usize> {
    let slot = ctx.program().procedure_index(index)?;
    if slot == 0 {
        return Err(VmError::InvalidProcedure(index));
    }
    Ok(slot)
}

pub(super) fn call_at(ctx: &mut Context<'_>) -> VmResult<()> {
    let index = ctx.pop_integer()?;
    let delay = ctx.pop_integer()?;
    let slot = event_index(ctx, index)?;
    let fire_time = i64::from(ctx.now_ms()) + 1000 * i64::from(delay);
    let fire_time = fire_time.clamp(0, i64::from(u32::MAX)) as u32;

    let entry = &mut ctx.program_mut().procedures[slot];
    entry.fire_time = fire_time;
    entry.flags.insert(ProcedureFlags::TIMED);
    Ok(())
}

pub(super) fn call_when(ctx: &mut Context<'_>) -> VmResult<()> {
    let index = ctx.pop_integer()?;
    let address = code_address(ctx.pop_integer()?)?;
    let slot = event_index(ctx, index)?;

    let entry = &mut ctx.program_mut().procedures[slot];
    entry.condition_address = address;
    entry.flags.insert(ProcedureFlags::CONDITIONAL);
    Ok(())
}

pub(super) fn wait(ctx: &mut Context<'_>) -> VmResult<()> {
    let delay = ctx.pop_integer()?;
    let deadline = ctx.now_ms().saturating_add_signed(delay);
    ctx.wait_until(WaitCondition::Until(deadline));
    Ok(())
}

pub(super) fn cancel(ctx: &mut Context<'_>) -> VmResult<()> {
    let index = ctx.pop_integer()?;
    let slot = ctx.program().procedure_index(index)?;
    ctx.program_mut().procedures[slot].cancel();
    Ok(())
}

pub(super) fn cancel_all(ctx: &mut Context<'_>) -> VmResult<()> {
    for entry in &mut ctx.program_mut().procedures {
        entry.cancel();
    }
    Ok(())
}
