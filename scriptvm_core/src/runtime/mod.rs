//! The cooperative scheduler and program lifecycle.

mod call;
mod events;

use std::sync::Arc;

use tracing::{debug, error, instrument, trace};

use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::export::ExportTable;
use crate::host::Host;
use crate::image::Image;
use crate::memory::Arena;
use crate::program::{Program, ProgramFlags, ProgramId, WaitCondition};
use crate::{RuntimeConfig, VmError, VmResult};

pub use call::CallSite;

/// Instruction budget for one execution slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burst {
    Limited(u32),
    Unlimited,
}

/// Why an execution slice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// The program was not eligible to run.
    Skipped,
    /// The burst budget ran out.
    Yielded,
    /// The program is waiting and its condition does not hold yet.
    Waiting,
    /// A host-level or cross-program invocation returned.
    Returned,
    Exited,
    Errored,
    Stopped,
    /// The program is blocked on a synchronous child.
    Blocked,
}

/// Called once for every program as it is destroyed.
pub type DestroyHook = Arc<dyn Fn(ProgramId, &str) + Send + Sync>;

#[derive(Debug)]
pub(crate) struct StashedWait {
    owner: ProgramId,
    condition: WaitCondition,
}

#[derive(Debug, Default)]
struct EventState {
    suspended: u32,
    suspended_at: u32,
}

/// Owns every live program and drives them one tick at a time.
pub struct Runtime {
    config: RuntimeConfig,
    pub(crate) programs: Arena<Program>,
    live: Vec<ProgramId>,
    pub(crate) exports: ExportTable,
    waits: Arena<StashedWait>,
    events: EventState,
    enabled: bool,
    depth: usize,
    current: Option<ProgramId>,
    destroy_hooks: Vec<DestroyHook>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("live", &self.live)
            .field("enabled", &self.enabled)
            .field("depth", &self.depth)
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::with_config(RuntimeConfig::default())
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> VmResult<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            programs: Arena::new(),
            live: Vec::new(),
            exports: ExportTable::new(),
            waits: Arena::new(),
            events: EventState::default(),
            enabled: true,
            depth: 0,
            current: None,
            destroy_hooks: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_burst_size(&mut self, burst_size: u32) {
        self.config.burst_size = burst_size.max(1);
    }

    pub fn program(&self, id: ProgramId) -> Option<&Program> {
        self.programs.get(id)
    }

    pub fn program_mut(&mut self, id: ProgramId) -> Option<&mut Program> {
        self.programs.get_mut(id)
    }

    /// Live programs, most recently started first.
    pub fn live(&self) -> &[ProgramId] {
        &self.live
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn program_names(&self) -> Vec<String> {
        self.live
            .iter()
            .filter_map(|id| self.programs.get(*id))
            .map(|program| program.name().to_string())
            .collect()
    }

    /// True while some live program could still execute an instruction.
    pub fn has_runnable(&self) -> bool {
        self.live.iter().filter_map(|id| self.programs.get(*id)).any(|program| {
            !program
                .flags
                .intersects(ProgramFlags::EXITED | ProgramFlags::STOPPED)
        })
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    pub fn exports_mut(&mut self) -> &mut ExportTable {
        &mut self.exports
    }

    /// The program whose slice is executing, if any.
    pub fn current(&self) -> Option<ProgramId> {
        self.current
    }

    pub fn find_procedure(&self, id: ProgramId, name: &str) -> Option<usize> {
        self.programs.get(id)?.find_procedure(name)
    }

    pub fn current_procedure_name(&self, id: ProgramId) -> Option<String> {
        self.programs
            .get(id)
            .map(|program| program.current_procedure_name().to_string())
    }

    pub fn on_program_destroyed<F>(&mut self, hook: F)
    where
        F: Fn(ProgramId, &str) + Send + Sync + 'static,
    {
        self.destroy_hooks.push(Arc::new(hook));
    }

    /// Allocates a program for `image` and links it at the head of the live list
    /// without running it.
    pub fn insert(&mut self, image: Arc<Image>) -> ProgramId {
        let program = Program::new(image, self.config.stack_capacity);
        let name = program.name().to_string();
        let id = self.programs.allocate(program);
        self.live.insert(0, id);
        debug!(program = %name, id = %id, "program linked");
        id
    }

    /// Links a program and gives it its start-up slice.
    pub fn run(&mut self, dispatcher: &Dispatcher, host: &mut dyn Host, image: Image) -> ProgramId {
        let id = self.insert(Arc::new(image));
        self.startup(dispatcher, host, id);
        id
    }

    /// Parses `bytes` and runs the result.
    pub fn run_image(
        &mut self,
        dispatcher: &Dispatcher,
        host: &mut dyn Host,
        name: &str,
        bytes: Vec<u8>,
    ) -> VmResult<ProgramId> {
        let image = Image::parse(name, bytes)?;
        Ok(self.run(dispatcher, host, image))
    }

    /// Loads a script by name through the host and runs it.
    #[instrument(skip_all, fields(script = name))]
    pub fn run_script(
        &mut self,
        dispatcher: &Dispatcher,
        host: &mut dyn Host,
        name: &str,
    ) -> VmResult<ProgramId> {
        let id = self.load_program(host, name)?;
        self.startup(dispatcher, host, id);
        Ok(id)
    }

    pub(crate) fn load_program(&mut self, host: &mut dyn Host, name: &str) -> VmResult<ProgramId> {
        let path = host.mangle_path(name);
        let bytes = host.load(&path).map_err(|err| VmError::SpawnFailed {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
        let image = Image::parse(path, bytes).map_err(|err| VmError::SpawnFailed {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
        Ok(self.insert(Arc::new(image)))
    }

    pub(crate) fn startup(
        &mut self,
        dispatcher: &Dispatcher,
        host: &mut dyn Host,
        id: ProgramId,
    ) -> SliceOutcome {
        let burst = self
            .config
            .startup_burst
            .map_or(Burst::Unlimited, Burst::Limited);
        self.execute(dispatcher, host, id, burst)
    }

    pub(crate) fn check_depth(&self) -> VmResult<()> {
        if self.depth >= self.config.max_call_depth {
            return Err(VmError::CallDepthExceeded(self.config.max_call_depth));
        }
        Ok(())
    }

    /// Runs one program for up to `burst` instructions.
    ///
    /// Script errors never escape: they are logged and the program is marked as exited
    /// with error, to be reaped on the next tick.
    pub fn execute(
        &mut self,
        dispatcher: &Dispatcher,
        host: &mut dyn Host,
        id: ProgramId,
        burst: Burst,
    ) -> SliceOutcome {
        if !self.enabled {
            return SliceOutcome::Skipped;
        }
        let now = host.now_ms();
        let Some(program) = self.programs.get_mut(id) else {
            return SliceOutcome::Skipped;
        };
        if program.purged
            || program
                .flags
                .intersects(ProgramFlags::EXITED | ProgramFlags::STOPPED)
        {
            return SliceOutcome::Skipped;
        }
        if program.flags.contains(ProgramFlags::CALLING_CHILD) {
            return SliceOutcome::Blocked;
        }
        program.started_at.get_or_insert(now);

        let previous = self.current.replace(id);
        self.depth += 1;
        let result = self.run_slice(dispatcher, host, id, burst);
        self.depth -= 1;
        self.current = previous;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fail(id, &err);
                SliceOutcome::Errored
            }
        };
        self.finish_slice(id);
        outcome
    }

    fn run_slice(
        &mut self,
        dispatcher: &Dispatcher,
        host: &mut dyn Host,
        id: ProgramId,
        burst: Burst,
    ) -> VmResult<SliceOutcome> {
        let mut remaining = burst;
        loop {
            let program = self.programs.get_mut(id).ok_or(VmError::UnknownProgram(id))?;
            let flags = program.flags;
            if flags.contains(ProgramFlags::EXITED) || program.purged {
                return Ok(SliceOutcome::Exited);
            }
            if flags.contains(ProgramFlags::STOPPED) {
                return Ok(SliceOutcome::Stopped);
            }
            if flags.contains(ProgramFlags::RETURNED) {
                return Ok(SliceOutcome::Returned);
            }
            if flags.contains(ProgramFlags::CALLING_CHILD) {
                return Ok(SliceOutcome::Blocked);
            }
            if flags.contains(ProgramFlags::WAITING) {
                let ready = program
                    .wait
                    .clone()
                    .map_or(true, |condition| condition.is_satisfied(host));
                let program = self.programs.get_mut(id).ok_or(VmError::UnknownProgram(id))?;
                if !ready {
                    return Ok(SliceOutcome::Waiting);
                }
                program.wait = None;
                program.flags.remove(ProgramFlags::WAITING);
            }

            let program = self.programs.get_mut(id).ok_or(VmError::UnknownProgram(id))?;
            if !program.flags.contains(ProgramFlags::CRITICAL) {
                match remaining {
                    Burst::Limited(0) => return Ok(SliceOutcome::Yielded),
                    Burst::Limited(count) => remaining = Burst::Limited(count - 1),
                    Burst::Unlimited => {}
                }
            }

            let Some(word) = program.image.read_word(program.ip) else {
                trace!(program = %program.name, ip = program.ip, "fell off the end of the code");
                program.flags.insert(ProgramFlags::EXITED);
                return Ok(SliceOutcome::Exited);
            };
            program.ip += 2;
            program.opcode = word;

            let handler = dispatcher.handler(word)?;
            let mut context = Context::new(self, dispatcher, host, id, word);
            handler(&mut context)?;
        }
    }

    fn fail(&mut self, id: ProgramId, err: &VmError) {
        let Some(program) = self.programs.get_mut(id) else {
            error!(error = %err, "script error with no current program");
            return;
        };
        error!(
            program = %program.name,
            procedure = %program.current_procedure_name(),
            ip = program.ip,
            error = %err,
            "script error"
        );
        program
            .flags
            .insert(ProgramFlags::EXITED | ProgramFlags::ERRORED);
    }

    fn finish_slice(&mut self, id: ProgramId) {
        let Some(program) = self.programs.get_mut(id) else {
            return;
        };
        program.flags.remove(ProgramFlags::RETURNED);

        if !program.flags.contains(ProgramFlags::EXITED) {
            if program.strings.len() > self.config.string_sweep_threshold {
                let live = program.live_string_refs();
                let freed = program.strings.sweep(&live);
                trace!(program = %program.name, freed, "swept dynamic strings");
            }
            return;
        }

        // An exiting child releases a parent blocked in callstart.
        let Some(parent_id) = program.parent else {
            return;
        };
        let blocked = self
            .programs
            .get(parent_id)
            .is_some_and(|parent| parent.flags.contains(ProgramFlags::CALLING_CHILD));
        if blocked {
            self.programs[id].parent = None;
            let parent = &mut self.programs[parent_id];
            parent.flags.remove(ProgramFlags::CALLING_CHILD);
            parent.child = None;
        }
    }

    /// Gives every live program one slice, fires due events, then reaps exited programs.
    #[instrument(skip_all, fields(programs = self.live.len()))]
    pub fn tick(&mut self, dispatcher: &Dispatcher, host: &mut dyn Host) {
        let burst = Burst::Limited(self.config.burst_size);
        let order = self.live.clone();
        for id in order {
            if self.programs.contains(id) {
                self.execute(dispatcher, host, id, burst);
            }
        }

        self.dispatch_events(dispatcher, host);

        let exited: Vec<ProgramId> = self
            .live
            .iter()
            .copied()
            .filter(|id| self.programs.get(*id).map_or(true, Program::is_exited))
            .collect();
        for id in exited {
            self.free_program(id);
        }
    }

    /// Severs `id` from its parent.
    pub(crate) fn detach(&mut self, id: ProgramId) {
        let Some(parent_id) = self.programs.get(id).and_then(|program| program.parent) else {
            return;
        };
        if let Some(parent) = self.programs.get_mut(parent_id) {
            parent
                .flags
                .remove(ProgramFlags::CALLING_CHILD | ProgramFlags::DETACHED_CHILD);
            if parent.child == Some(id) {
                parent.child = None;
            }
        }
    }

    /// Revokes a program's exports and runs destroy hooks. Safe to call repeatedly.
    pub(crate) fn purge(&mut self, id: ProgramId) {
        let Some(program) = self.programs.get_mut(id) else {
            return;
        };
        if program.purged {
            return;
        }
        program.purged = true;
        program.flags.insert(ProgramFlags::EXITED);
        let name = program.name.clone();
        self.exports.remove_program(id);
        let hooks = self.destroy_hooks.clone();
        for hook in hooks {
            hook(id, &name);
        }
    }

    /// Destroys a program: detaches it, purges its descendants and itself, and releases it.
    pub fn free_program(&mut self, id: ProgramId) {
        self.detach(id);

        let mut next = self.programs.get(id).and_then(|program| program.child);
        while let Some(child_id) = next {
            self.purge(child_id);
            next = match self.programs.get_mut(child_id) {
                Some(child) => {
                    child.parent = None;
                    child.child.take()
                }
                None => None,
            };
        }

        self.purge(id);
        self.live.retain(|live| *live != id);
        self.waits.retain(|_, stashed| stashed.owner != id);
        if let Some(program) = self.programs.remove(id) {
            debug!(program = %program.name, id = %id, "program freed");
        }
    }

    /// Frees every live program.
    pub fn clear_programs(&mut self) {
        for id in self.live.clone() {
            self.free_program(id);
        }
    }

    /// Frees the most recently started program.
    pub fn clear_top_program(&mut self) {
        if let Some(id) = self.live.first().copied() {
            self.free_program(id);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns the whole interpreter on or off. While off, slices are skipped and events
    /// are suspended.
    pub fn set_enabled(&mut self, host: &dyn Host, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.resume_events(host);
        } else {
            self.suspend_events(host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ImageBuilder;
    use crate::host::MemoryHost;
    use crate::program::ProgramState;
    use crate::Opcode;

    fn counting_image(name: &str) -> Image {
        let mut builder = ImageBuilder::new();
        let start = builder.procedure("start", 0);
        builder.bind_entry(start);
        for _ in 0..20 {
            builder.emit(Opcode::Noop);
        }
        Image::parse(name, builder.build().expect("builds")).expect("parses")
    }

    #[test]
    fn new_programs_go_to_the_head_of_the_list() {
        let mut runtime = Runtime::default();
        let first = runtime.insert(Arc::new(counting_image("first")));
        let second = runtime.insert(Arc::new(counting_image("second")));
        assert_eq!(runtime.live(), &[second, first]);
        assert_eq!(runtime.program_names(), vec!["second", "first"]);
        let linked = runtime.program(first).expect("live");
        assert!(linked.flags().is_empty());
        assert_eq!(linked.state(), ProgramState::Runnable);
    }

    #[test]
    fn burst_limits_a_slice() {
        let dispatcher = Dispatcher::new();
        let mut host = MemoryHost::new();
        let mut runtime = Runtime::default();
        let id = runtime.insert(Arc::new(counting_image("loop")));
        let start = runtime.program(id).expect("live").ip();
        let outcome = runtime.execute(&dispatcher, &mut host, id, Burst::Limited(3));
        assert_eq!(outcome, SliceOutcome::Yielded);
        assert_eq!(runtime.program(id).expect("live").ip(), start + 6);
    }

    #[test]
    fn falling_off_the_code_exits() {
        let dispatcher = Dispatcher::new();
        let mut host = MemoryHost::new();
        let mut runtime = Runtime::default();
        let id = runtime.run(&dispatcher, &mut host, counting_image("short"));
        assert!(runtime.program(id).expect("live").is_exited());
        runtime.tick(&dispatcher, &mut host);
        assert!(runtime.is_empty());
        assert!(runtime.program(id).is_none());
    }

    #[test]
    fn free_is_idempotent_and_runs_hooks_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut runtime = Runtime::default();
        runtime.on_program_destroyed(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let id = runtime.insert(Arc::new(counting_image("once")));
        runtime.purge(id);
        runtime.free_program(id);
        runtime.free_program(id);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(runtime.is_empty());
    }

    #[test]
    fn disabled_runtime_skips_slices() {
        let dispatcher = Dispatcher::new();
        let mut host = MemoryHost::new();
        let mut runtime = Runtime::default();
        let id = runtime.insert(Arc::new(counting_image("idle")));
        runtime.set_enabled(&host, false);
        assert_eq!(
            runtime.execute(&dispatcher, &mut host, id, Burst::Unlimited),
            SliceOutcome::Skipped
        );
        runtime.set_enabled(&host, true);
        assert_eq!(
            runtime.execute(&dispatcher, &mut host, id, Burst::Unlimited),
            SliceOutcome::Exited
        );
    }
}
