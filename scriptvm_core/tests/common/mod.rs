#![allow(dead_code)]

use std::sync::Arc;

use scriptvm_core::{
    assemble, Burst, Dispatcher, Image, MemoryHost, Program, ProgramId, Runtime, RuntimeConfig,
    SliceOutcome,
};

/// Host opcode the test scripts print through.
pub const PRINT: u16 = 0x8072;

/// A runtime, its opcode table and an in-memory host, wired together.
pub struct Harness {
    pub runtime: Runtime,
    pub dispatcher: Dispatcher,
    pub host: MemoryHost,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(PRINT, |ctx| {
                let value = ctx.pop()?;
                let text = ctx.stringify(&value)?;
                ctx.output(&text);
                Ok(())
            })
            .expect("print fits the table");
        Self {
            runtime: Runtime::new(config).expect("valid config"),
            dispatcher,
            host: MemoryHost::new(),
        }
    }

    fn compile(name: &str, source: &str) -> Vec<u8> {
        assemble(&format!(".opcode print {PRINT:#06x}\n{source}"))
            .unwrap_or_else(|err| panic!("{name} does not assemble: {err}"))
    }

    /// Makes a script loadable by name.
    pub fn script(&mut self, name: &str, source: &str) {
        let bytes = Self::compile(name, source);
        self.host.add_script(name, bytes);
    }

    /// Loads and starts a script registered with [`Harness::script`].
    pub fn start(&mut self, name: &str) -> ProgramId {
        self.runtime
            .run_script(&self.dispatcher, &mut self.host, name)
            .unwrap_or_else(|err| panic!("{name} does not start: {err}"))
    }

    /// Links a program without giving it a start-up slice.
    pub fn link(&mut self, name: &str, source: &str) -> ProgramId {
        let image = Image::parse(name, Self::compile(name, source)).expect("image parses");
        self.runtime.insert(Arc::new(image))
    }

    pub fn execute(&mut self, id: ProgramId, burst: Burst) -> SliceOutcome {
        self.runtime
            .execute(&self.dispatcher, &mut self.host, id, burst)
    }

    pub fn tick(&mut self) {
        self.runtime.tick(&self.dispatcher, &mut self.host);
    }

    /// Moves the clock forward, then ticks.
    pub fn tick_after(&mut self, ms: u32) {
        self.host.advance(ms);
        self.tick();
    }

    pub fn program(&self, id: ProgramId) -> &Program {
        self.runtime.program(id).expect("program is live")
    }

    pub fn output(&self) -> Vec<String> {
        self.host.output_lines().to_vec()
    }

    pub fn take_output(&mut self) -> Vec<String> {
        self.host.take_output()
    }
}

/// Idle loop appended to scripts that must stay alive between ticks.
pub const IDLE: &str = "
idle:
    push 1000
    wait
    push @idle
    jump
";

/// A zero-argument procedure body that prints `text`.
pub fn printing_procedure(name: &str, text: &str) -> String {
    format!(
        "
.proc {name}
    push_base
    push \"{text}\"
    print
    pop_to_base
    pop_base
    pop_return
.end
"
    )
}
