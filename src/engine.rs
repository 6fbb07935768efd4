//! Runtime, opcode table and host bundled for the CLI and embedders.

use std::thread;
use std::time::Duration;

use anyhow::Context;
use scriptvm_core::{Dispatcher, ProgramId, Runtime};
use tracing::{debug, instrument};

use crate::config::HostConfig;
use crate::host::{StdHost, Transcript};
use crate::ops::install_host_opcodes;

/// How a run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    /// Programs still linked when the loop stopped.
    pub remaining: usize,
}

pub struct Engine {
    runtime: Runtime,
    dispatcher: Dispatcher,
    host: StdHost,
    tick_interval: Duration,
    max_ticks: Option<u64>,
}

impl Engine {
    pub fn new(config: &HostConfig) -> anyhow::Result<Self> {
        let runtime = Runtime::new(config.runtime.clone()).context("building runtime")?;
        let mut dispatcher = Dispatcher::new();
        install_host_opcodes(&mut dispatcher).context("registering host opcodes")?;
        Ok(Self {
            runtime,
            dispatcher,
            host: StdHost::new(config),
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            max_ticks: config.max_ticks,
        })
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.host = self.host.with_echo(echo);
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn transcript(&self) -> Transcript {
        self.host.transcript()
    }

    /// Loads `name` through the host search path and gives it its start-up slice.
    pub fn start(&mut self, name: &str) -> anyhow::Result<ProgramId> {
        self.runtime
            .run_script(&self.dispatcher, &mut self.host, name)
            .with_context(|| format!("starting script {name}"))
    }

    pub fn tick(&mut self) {
        self.runtime.tick(&self.dispatcher, &mut self.host);
    }

    /// Ticks until every program is gone, only stopped programs remain, or the tick
    /// budget is spent.
    #[instrument(skip_all, fields(max_ticks = ?self.max_ticks))]
    pub fn run_until_idle(&mut self) -> RunSummary {
        let mut ticks = 0;
        while !self.runtime.is_empty() {
            if self.max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            self.tick();
            ticks += 1;
            // Only stopped programs left: nothing will ever change.
            if !self.runtime.has_runnable() {
                break;
            }
            if !self.tick_interval.is_zero() {
                thread::sleep(self.tick_interval);
            }
        }
        let summary = RunSummary {
            ticks,
            remaining: self.runtime.len(),
        };
        debug!(ticks, remaining = summary.remaining, "run loop finished");
        summary
    }
}
