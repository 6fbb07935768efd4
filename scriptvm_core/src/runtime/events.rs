//! Timed and conditional procedures.

use tracing::{debug, error, instrument};

use super::{Burst, CallSite, Runtime};
use crate::dispatch::Dispatcher;
use crate::host::Host;
use crate::image::ProcedureFlags;
use crate::program::{ProgramFlags, ProgramId};
use crate::value::Value;
use crate::VmResult;

impl Runtime {
    /// Stops event dispatch. Nested calls need as many [`Runtime::resume_events`].
    pub fn suspend_events(&mut self, host: &dyn Host) {
        if self.events.suspended == 0 {
            self.events.suspended_at = host.now_ms();
        }
        self.events.suspended += 1;
    }

    /// Undoes one [`Runtime::suspend_events`]. The outermost resume pushes every armed
    /// deadline forward by the time spent suspended.
    pub fn resume_events(&mut self, host: &dyn Host) {
        if self.events.suspended == 0 {
            return;
        }
        self.events.suspended -= 1;
        if self.events.suspended > 0 {
            return;
        }
        let elapsed = host.now_ms().wrapping_sub(self.events.suspended_at);
        for id in self.live.clone() {
            let Some(program) = self.programs.get_mut(id) else {
                continue;
            };
            for entry in program.procedures.iter_mut().skip(1) {
                if entry.flags.contains(ProcedureFlags::TIMED) {
                    entry.fire_time = entry.fire_time.wrapping_add(elapsed);
                }
            }
        }
        debug!(elapsed, "events resumed");
    }

    pub fn events_suspended(&self) -> bool {
        self.events.suspended > 0
    }

    /// Fires every due timed procedure and every conditional procedure whose guard holds.
    #[instrument(skip_all)]
    pub fn dispatch_events(&mut self, dispatcher: &Dispatcher, host: &mut dyn Host) {
        if self.events.suspended > 0 || !self.enabled {
            return;
        }
        let now = host.now_ms();
        for id in self.live.clone() {
            let count = match self.programs.get(id) {
                Some(program) => program.procedures.len(),
                None => continue,
            };
            for index in 1..count {
                let Some(program) = self.programs.get(id) else {
                    break;
                };
                if program.purged
                    || program.flags.intersects(
                        ProgramFlags::EXITED | ProgramFlags::STOPPED | ProgramFlags::CALLING_CHILD,
                    )
                {
                    break;
                }
                let entry = program.procedures[index];
                let due = if entry.flags.contains(ProcedureFlags::CONDITIONAL) {
                    match self.evaluate_condition(dispatcher, host, id, entry.condition_address) {
                        Some(result) => result,
                        None => break,
                    }
                } else {
                    entry.flags.contains(ProcedureFlags::TIMED) && now >= entry.fire_time
                };
                if !due {
                    continue;
                }

                self.programs[id].procedures[index].disarm();
                if let Err(err) = self.invoke_procedure(dispatcher, host, id, index, CallSite::Event) {
                    let name = self.programs.get(id).map(|program| program.name.clone());
                    error!(program = ?name, index, error = %err, "event procedure failed");
                }
            }
        }
    }

    /// Runs a guard snippet on program `id` and reports its result. Returns `None` when
    /// the snippet failed, which leaves the program marked as errored.
    fn evaluate_condition(
        &mut self,
        dispatcher: &Dispatcher,
        host: &mut dyn Host,
        id: ProgramId,
        address: u32,
    ) -> Option<bool> {
        let program = self.programs.get_mut(id)?;
        let saved_ip = program.ip;
        let saved_flags = program.flags;
        if let Err(err) = program.control.push(Value::Int(saved_ip as i32)) {
            self.fail(id, &err);
            return None;
        }
        program.flags = ProgramFlags::empty();
        program.ip = address;

        self.execute(dispatcher, host, id, Burst::Unlimited);

        let program = self.programs.get_mut(id)?;
        if program.flags.contains(ProgramFlags::ERRORED) {
            return None;
        }
        let result: VmResult<i32> = program.data.pop_integer();
        match result {
            Ok(value) => {
                program.ip = saved_ip;
                program.flags = saved_flags;
                Some(value != 0)
            }
            Err(err) => {
                self.fail(id, &err);
                None
            }
        }
    }
}
