//! Opcodes the host layer adds on top of the intrinsics.

use scriptvm_core::{AssemblyError, Context, Dispatcher, VmResult, assemble};

/// Pops any value and sends its text to the host output.
pub const PRINT: u16 = 0x8072;
/// Pushes the host clock in milliseconds.
pub const TIMER: u16 = 0x80A0;

/// `.opcode` lines giving assembler sources mnemonics for the host opcodes. Appended
/// after the source so reported line numbers stay put.
pub const HOST_OPCODE_ALIASES: &str = ".opcode print 0x8072\n.opcode timer 0x80A0\n";

fn print(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.pop()?;
    let text = ctx.stringify(&value)?;
    ctx.output(&text);
    Ok(())
}

fn timer(ctx: &mut Context<'_>) -> VmResult<()> {
    let now = ctx.now_ms();
    ctx.push(now as i32)
}

/// Assembles `source` with the host mnemonics available.
pub fn assemble_with_host_opcodes(source: &str) -> Result<Vec<u8>, AssemblyError> {
    assemble(&format!("{source}\n{HOST_OPCODE_ALIASES}"))
}

pub fn install_host_opcodes(dispatcher: &mut Dispatcher) -> VmResult<()> {
    dispatcher.register(PRINT, print)?;
    dispatcher.register(TIMER, timer)?;
    Ok(())
}
