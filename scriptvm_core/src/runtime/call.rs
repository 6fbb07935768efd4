//! Call frames for host-level and cross-program invocations.
//!
//! A local invocation saves the instruction pointer and a return trampoline on the
//! control stack, and the packed flags, stashed wait condition and host tag on the data
//! stack, so the `POP_FLAGS` family can restore them. A cross-program invocation
//! additionally saves the caller's flags, wait condition and identity on the callee's
//! control stack.

use tracing::{debug, instrument};

use super::{Burst, Runtime, StashedWait};
use crate::dispatch::Dispatcher;
use crate::host::Host;
use crate::image::{trampoline, ProcedureFlags};
use crate::memory::ArenaHandle;
use crate::program::{ProgramFlags, ProgramId, WaitCondition};
use crate::value::{Pointer, Value};
use crate::{VmError, VmResult};

/// Who asked for a host-level procedure invocation. Selects the return trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Event,
    Host,
}

impl CallSite {
    fn local_return(self) -> u32 {
        match self {
            CallSite::Event => trampoline::EVENT_RETURN,
            CallSite::Host => trampoline::HOST_RETURN,
        }
    }

    fn extern_return(self) -> u32 {
        match self {
            CallSite::Event => trampoline::EXTERN_EVENT_RETURN,
            CallSite::Host => trampoline::EXTERN_HOST_RETURN,
        }
    }
}

impl Runtime {
    /// Synchronously runs procedure `index` of program `id`.
    ///
    /// Imported procedures are forwarded to their exporter. Blocked or exited programs
    /// are left alone.
    #[instrument(skip_all, fields(program = %id, index = index))]
    pub fn execute_procedure(
        &mut self,
        dispatcher: &Dispatcher,
        host: &mut dyn Host,
        id: ProgramId,
        index: usize,
    ) -> VmResult<()> {
        self.invoke_procedure(dispatcher, host, id, index, CallSite::Host)
    }

    pub(crate) fn invoke_procedure(
        &mut self,
        dispatcher: &Dispatcher,
        host: &mut dyn Host,
        id: ProgramId,
        index: usize,
        site: CallSite,
    ) -> VmResult<()> {
        self.check_depth()?;
        let program = self.programs.get(id).ok_or(VmError::UnknownProgram(id))?;
        if program.purged
            || program.flags.intersects(
                ProgramFlags::EXITED | ProgramFlags::STOPPED | ProgramFlags::CALLING_CHILD,
            )
        {
            debug!(program = %program.name, index, "procedure skipped, program not runnable");
            return Ok(());
        }
        let entry = *program
            .procedure(index)
            .ok_or(VmError::InvalidProcedure(index as i32))?;

        if !entry.is_imported() {
            self.setup_call(id, entry.entry_address, site.local_return())?;
            if entry.flags.contains(ProcedureFlags::CRITICAL) {
                self.programs[id].flags.insert(ProgramFlags::CRITICAL);
            }
            self.execute(dispatcher, host, id, Burst::Unlimited);
            return Ok(());
        }

        let name = program.identifier(entry.name_offset)?.to_string();
        let Some(export) = self.exports.procedure(&name).cloned() else {
            host.output(&format!("External procedure {name} not found"));
            return Ok(());
        };
        if export.argument_count != 0 {
            host.output("External procedure cannot take arguments in interrupt context");
            return Ok(());
        }

        self.setup_external_call(id, export.owner, export.address, site.extern_return(), Vec::new())?;
        if entry.flags.contains(ProcedureFlags::CRITICAL) {
            self.programs[export.owner]
                .flags
                .insert(ProgramFlags::CRITICAL);
        }
        self.execute(dispatcher, host, export.owner, Burst::Unlimited);

        if let Some(caller) = self.programs.get_mut(id) {
            if caller.flags.contains(ProgramFlags::CALLING_CHILD) {
                caller.flags.remove(ProgramFlags::CALLING_CHILD);
                return Err(VmError::ExternalCallIncomplete(name));
            }
        }
        Ok(())
    }

    /// Parks a wait condition where a value stack can refer to it.
    pub(crate) fn stash_wait(&mut self, owner: ProgramId, condition: Option<WaitCondition>) -> Pointer {
        match condition {
            Some(condition) => {
                let handle = self.waits.allocate(StashedWait { owner, condition });
                Pointer::new(handle.to_bits())
            }
            None => Pointer::NULL,
        }
    }

    pub(crate) fn unstash_wait(&mut self, pointer: Pointer) -> Option<WaitCondition> {
        let handle = ArenaHandle::<StashedWait>::from_bits(pointer.addr())?;
        self.waits.remove(handle).map(|stashed| stashed.condition)
    }

    /// Frames a local invocation of the code at `address` on program `id`.
    pub(crate) fn setup_call(&mut self, id: ProgramId, address: u32, return_address: u32) -> VmResult<()> {
        let wait = self.programs[id].wait.take();
        let wait = self.stash_wait(id, wait);
        let program = &mut self.programs[id];
        program.control.push(Value::Int(program.ip as i32))?;
        program.control.push(Value::Int(return_address as i32))?;
        program.data.push(Value::Int(i32::from(program.flags.bits())))?;
        program.data.push(Value::Pointer(wait))?;
        program.data.push(Value::Int(program.host_tag))?;
        program.data.push(Value::Int(0))?;
        program.flags = ProgramFlags::empty();
        program.ip = address;
        Ok(())
    }

    /// Frames a call from `caller` into `callee` at `address`, handing over `args`.
    pub(crate) fn setup_external_call(
        &mut self,
        caller: ProgramId,
        callee: ProgramId,
        address: u32,
        return_address: u32,
        args: Vec<Value>,
    ) -> VmResult<()> {
        let args = args
            .into_iter()
            .map(|value| self.transfer_value(caller, callee, value))
            .collect::<VmResult<Vec<_>>>()?;

        let caller_wait = self.programs[caller].wait.take();
        let caller_flags = self.programs[caller].flags;
        let caller_tag = self.programs[caller].host_tag;
        let caller_wait = self.stash_wait(caller, caller_wait);
        let callee_wait = self.programs[callee].wait.take();
        let callee_wait = self.stash_wait(callee, callee_wait);

        let target = &mut self.programs[callee];
        target.control.push(Value::Int(target.ip as i32))?;
        target.control.push(Value::Int(i32::from(caller_flags.bits())))?;
        target.control.push(Value::Pointer(caller_wait))?;
        target.control.push(Value::Pointer(Pointer::new(caller.to_bits())))?;
        target.control.push(Value::Int(return_address as i32))?;

        target.data.push(Value::Int(i32::from(target.flags.bits())))?;
        target.data.push(Value::Pointer(callee_wait))?;
        target.data.push(Value::Int(target.host_tag))?;
        let count = args.len() as i32;
        for value in args {
            target.data.push(value)?;
        }
        target.data.push(Value::Int(count))?;

        target.flags = ProgramFlags::empty();
        target.ip = address;
        target.host_tag = caller_tag;

        self.programs[caller]
            .flags
            .insert(ProgramFlags::CALLING_CHILD);
        Ok(())
    }

    /// Restores flags, wait condition and host tag saved on `id`'s data stack.
    pub(crate) fn pop_flags(&mut self, id: ProgramId) -> VmResult<()> {
        let program = &mut self.programs[id];
        let tag = program.data.pop_integer()?;
        let wait = program.data.pop_pointer()?;
        let flags = program.data.pop_integer()?;
        let wait = self.unstash_wait(wait);
        let program = &mut self.programs[id];
        program.host_tag = tag;
        program.wait = wait;
        program.flags = ProgramFlags::from_bits_truncate(flags as u16);
        Ok(())
    }

    /// Restores the caller state saved on `callee`'s control stack and returns the caller.
    pub(crate) fn restore_caller(&mut self, callee: ProgramId) -> VmResult<ProgramId> {
        let target = &mut self.programs[callee];
        let caller = target.control.pop_pointer()?;
        let wait = target.control.pop_pointer()?;
        let flags = target.control.pop_integer()?;

        let caller = ProgramId::from_bits(caller.addr()).ok_or(VmError::TypeMismatch {
            expected: "program",
            found: "pointer",
        })?;
        if !self.programs.contains(caller) {
            return Err(VmError::UnknownProgram(caller));
        }
        let wait = self.unstash_wait(wait);
        let program = &mut self.programs[caller];
        program.flags = ProgramFlags::from_bits_truncate(flags as u16);
        program.wait = wait;
        Ok(caller)
    }

    /// Rehomes a value from one program into another. String payloads are copied into
    /// the receiver's heap.
    pub(crate) fn transfer_value(&mut self, from: ProgramId, to: ProgramId, value: Value) -> VmResult<Value> {
        if !value.is_string() || from == to {
            return Ok(value);
        }
        let text = self.programs[from].resolve_string(&value)?.to_string();
        Ok(self.programs[to].intern(&text))
    }
}
