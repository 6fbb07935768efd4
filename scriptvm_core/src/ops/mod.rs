//! Intrinsic opcode handlers.

mod arith;
mod control;
mod frame;
mod linkage;
mod process;
mod schedule;

use std::sync::Arc;

use crate::context::Context;
use crate::dispatch::OpcodeHandler;
use crate::opcode::{Opcode, CRITICAL_DONE_ALIAS, CRITICAL_START_ALIAS};
use crate::VmResult;

fn bind<F>(table: &mut [Option<OpcodeHandler>], word: u16, handler: F)
where
    F: Fn(&mut Context<'_>) -> VmResult<()> + Send + Sync + 'static,
{
    table[usize::from(word & 0x3FF)] = Some(Arc::new(handler));
}

/// Fills `table` with every intrinsic handler.
pub(crate) fn install(table: &mut [Option<OpcodeHandler>]) {
    use Opcode::*;

    bind(table, Noop.word(), control::noop);
    bind(table, Push.word(), control::push);
    bind(table, CriticalStart.word(), control::critical_start);
    bind(table, CriticalDone.word(), control::critical_done);
    bind(table, CRITICAL_START_ALIAS, control::critical_start);
    bind(table, CRITICAL_DONE_ALIAS, control::critical_done);
    bind(table, Jump.word(), control::jump);
    bind(table, Call.word(), control::call);
    bind(table, If.word(), control::branch_if);
    bind(table, While.word(), control::branch_while);
    bind(table, PopReturn.word(), control::pop_return);
    bind(table, PopExit.word(), control::pop_exit);
    bind(table, PopAddress.word(), control::pop_address);
    bind(table, PopFlags.word(), control::pop_flags);
    bind(table, PopFlagsReturn.word(), control::pop_flags_return);
    bind(table, PopFlagsExit.word(), control::pop_flags_exit);
    bind(table, PopFlagsReturnExtern.word(), control::pop_flags_return_extern);
    bind(table, PopFlagsExitExtern.word(), control::pop_flags_exit_extern);
    bind(table, PopFlagsReturnValExtern.word(), control::pop_flags_return_val_extern);
    bind(table, PopFlagsReturnValExit.word(), control::pop_flags_return_val_exit);
    bind(
        table,
        PopFlagsReturnValExitExtern.word(),
        control::pop_flags_return_val_exit_extern,
    );

    bind(table, CallAt.word(), schedule::call_at);
    bind(table, CallWhen.word(), schedule::call_when);
    bind(table, Wait.word(), schedule::wait);
    bind(table, Cancel.word(), schedule::cancel);
    bind(table, CancelAll.word(), schedule::cancel_all);

    bind(table, CallStart.word(), process::call_start);
    bind(table, Exec.word(), process::exec);
    bind(table, Spawn.word(), process::spawn);
    bind(table, Fork.word(), process::fork);
    bind(table, Exit.word(), process::exit);
    bind(table, Detach.word(), process::detach);
    bind(table, ExitProgram.word(), process::exit_program);
    bind(table, StopProgram.word(), process::stop_program);

    bind(table, AToD.word(), frame::a_to_d);
    bind(table, DToA.word(), frame::d_to_a);
    bind(table, FetchGlobal.word(), frame::fetch_global);
    bind(table, StoreGlobal.word(), frame::store_global);
    bind(table, Swap.word(), frame::swap);
    bind(table, SwapA.word(), frame::swap_a);
    bind(table, Pop.word(), frame::pop);
    bind(table, Dup.word(), frame::dup);
    bind(table, CheckArgCount.word(), frame::check_arg_count);
    bind(table, LookupProcedureByName.word(), frame::lookup_procedure_by_name);
    bind(table, PopBase.word(), frame::pop_base);
    bind(table, PopToBase.word(), frame::pop_to_base);
    bind(table, PushBase.word(), frame::push_base);
    bind(table, SetGlobal.word(), frame::set_global);
    bind(table, FetchProcedureAddress.word(), frame::fetch_procedure_address);
    bind(table, Dump.word(), frame::dump);
    bind(table, Store.word(), frame::store);
    bind(table, Fetch.word(), frame::fetch);

    bind(table, FetchExternal.word(), linkage::fetch_external);
    bind(table, StoreExternal.word(), linkage::store_external);
    bind(table, ExportVariable.word(), linkage::export_variable);
    bind(table, ExportProcedure.word(), linkage::export_procedure);

    for opcode in [Equal, NotEqual, LessEqual, GreaterEqual, Less, Greater] {
        bind(table, opcode.word(), move |ctx| arith::compare(ctx, opcode));
    }
    for opcode in [Add, Sub, Mul, Div, Mod] {
        bind(table, opcode.word(), move |ctx| arith::arithmetic(ctx, opcode));
    }
    for opcode in [And, Or] {
        bind(table, opcode.word(), move |ctx| arith::logical(ctx, opcode));
    }
    for opcode in [BitwiseAnd, BitwiseOr, BitwiseXor] {
        bind(table, opcode.word(), move |ctx| arith::bitwise(ctx, opcode));
    }
    bind(table, BitwiseNot.word(), arith::bitwise_not);
    bind(table, Floor.word(), arith::floor);
    bind(table, Not.word(), arith::not);
    bind(table, Negate.word(), arith::negate);
}

/// Converts a popped integer into a code address.
fn code_address(value: i32) -> VmResult<u32> {
    u32::try_from(value).map_err(|_| crate::VmError::InvalidAddress(value))
}
