use tracing::debug;

use crate::context::Context;
use crate::export::ExportedValue;
use crate::value::Value;
use crate::{VmError, VmResult};

fn identifier(ctx: &mut Context<'_>) -> VmResult<String> {
    let offset = ctx.pop_integer()?;
    let offset = u32::try_from(offset).map_err(|_| VmError::InvalidStringRef {
        table: "identifier",
        offset: offset as u32,
    })?;
    Ok(ctx.program().identifier(offset)?.to_string())
}

pub(super) fn export_variable(ctx: &mut Context<'_>) -> VmResult<()> {
    let name = identifier(ctx)?;
    let owner = ctx.id();
    let owner_name = ctx.program().name().to_string();
    ctx.runtime.exports.export_variable(owner, &owner_name, &name)?;
    debug!(program = %owner_name, variable = %name, "variable exported");
    Ok(())
}

pub(super) fn export_procedure(ctx: &mut Context<'_>) -> VmResult<()> {
    let index = ctx.pop_integer()?;
    let argc = ctx.pop_integer()?;
    let program = ctx.program();
    let slot = program.procedure_index(index)?;
    let name = program
        .procedure_name(slot)
        .ok_or(VmError::InvalidProcedure(index))?
        .to_string();
    let address = program.procedures[slot].entry_address;
    let owner = ctx.id();
    ctx.runtime
        .exports
        .export_procedure(owner, &name, address, argc)?;
    debug!(procedure = %name, address, argc, "procedure exported");
    Ok(())
}

pub(super) fn fetch_external(ctx: &mut Context<'_>) -> VmResult<()> {
    let name = identifier(ctx)?;
    let value = match ctx.exports().fetch(&name)?.clone() {
        ExportedValue::Int(number) => Value::Int(number),
        ExportedValue::Float(number) => Value::Float(number),
        ExportedValue::Pointer(pointer) => Value::Pointer(pointer),
        ExportedValue::String(text) => ctx.program_mut().intern(&text),
    };
    ctx.push(value)
}

/// Strings are copied out of the storing program so the entry outlives it.
pub(super) fn store_external(ctx: &mut Context<'_>) -> VmResult<()> {
    let name = identifier(ctx)?;
    let value = ctx.pop()?;
    let exported = match value {
        Value::Int(number) => ExportedValue::Int(number),
        Value::Float(number) => ExportedValue::Float(number),
        Value::Pointer(pointer) => ExportedValue::Pointer(pointer),
        Value::StaticString(_) | Value::DynamicString(_) => {
            ExportedValue::String(ctx.program().resolve_string(&value)?.to_string())
        }
    };
    ctx.runtime.exports.store(&name, exported)
}
