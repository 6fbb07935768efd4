use crate::dispatch::Dispatcher;
use crate::export::ExportTable;
use crate::host::Host;
use crate::program::{Program, ProgramId, WaitCondition};
use crate::runtime::{Burst, Runtime, SliceOutcome};
use crate::value::{Pointer, Value};
use crate::VmResult;

/// What an opcode handler sees: the running program plus the services around it.
pub struct Context<'a> {
    pub(crate) runtime: &'a mut Runtime,
    pub(crate) dispatcher: &'a Dispatcher,
    pub(crate) host: &'a mut dyn Host,
    id: ProgramId,
    opcode: u16,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        runtime: &'a mut Runtime,
        dispatcher: &'a Dispatcher,
        host: &'a mut dyn Host,
        id: ProgramId,
        opcode: u16,
    ) -> Self {
        Self {
            runtime,
            dispatcher,
            host,
            id,
            opcode,
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// The word that selected this handler, type bits included.
    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn program(&self) -> &Program {
        &self.runtime.programs[self.id]
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.runtime.programs[self.id]
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    pub fn host(&mut self) -> &mut dyn Host {
        &mut *self.host
    }

    pub fn exports(&self) -> &ExportTable {
        &self.runtime.exports
    }

    pub fn now_ms(&self) -> u32 {
        self.host.now_ms()
    }

    pub fn output(&mut self, text: &str) {
        self.host.output(text);
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.program_mut().data.pop()
    }

    pub fn pop_integer(&mut self) -> VmResult<i32> {
        self.program_mut().data.pop_integer()
    }

    pub fn pop_float(&mut self) -> VmResult<f32> {
        self.program_mut().data.pop_float()
    }

    pub fn pop_pointer(&mut self) -> VmResult<Pointer> {
        self.program_mut().data.pop_pointer()
    }

    pub fn pop_string(&mut self) -> VmResult<String> {
        let value = self.pop()?;
        Ok(self.program().resolve_string(&value)?.to_string())
    }

    pub fn push(&mut self, value: impl Into<Value>) -> VmResult<()> {
        self.program_mut().data.push(value)
    }

    pub fn push_string(&mut self, text: &str) -> VmResult<()> {
        let value = self.program_mut().intern(text);
        self.push(value)
    }

    pub fn stringify(&self, value: &Value) -> VmResult<String> {
        self.program().stringify(value)
    }

    pub(crate) fn control_pop_integer(&mut self) -> VmResult<i32> {
        self.program_mut().control.pop_integer()
    }

    /// Suspends the running program until `condition` holds.
    pub fn wait_until(&mut self, condition: WaitCondition) {
        self.program_mut().set_wait(condition);
    }

    /// Synchronously runs another (or this) program's procedure, as the host would.
    pub fn execute_procedure(&mut self, target: ProgramId, index: usize) -> VmResult<()> {
        self.runtime
            .execute_procedure(self.dispatcher, &mut *self.host, target, index)
    }

    /// Runs `target` inline, bounded by the configured nesting depth.
    pub(crate) fn run_nested(&mut self, target: ProgramId, burst: Burst) -> VmResult<SliceOutcome> {
        self.runtime.check_depth()?;
        Ok(self
            .runtime
            .execute(self.dispatcher, &mut *self.host, target, burst))
    }
}
