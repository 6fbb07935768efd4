#![forbid(unsafe_code)]

//! ScriptVM core: a cooperative, stack-based bytecode interpreter for game logic scripts.
//!
//! The crate exposes the building blocks a host application needs to run compiled scripts:
//!
//! * [`value`] and [`stack`]: the tagged value model and the two per-program value stacks.
//! * [`image`]: loading of immutable bytecode images (procedure directory, identifier and
//!   string tables, code).
//! * [`dispatch`]: the 342-slot opcode table shared by every program. Hosts extend it with
//!   their own opcodes before any program runs.
//! * [`runtime`]: the cooperative scheduler, the call/frame protocol, the timed and
//!   conditional event dispatcher, and program lifecycle (spawn, fork, exec, detach).
//! * [`export`]: the name-keyed linkage tables programs use to share variables and procedures.
//! * [`assembler`] and [`disasm`]: tooling to build and inspect images.
//!
//! Execution is strictly single threaded. A [`Runtime`] owns every live [`Program`], and the
//! host passes its [`Dispatcher`] and [`Host`] services into each scheduler call.

pub mod assembler;
pub mod context;
pub mod disasm;
pub mod dispatch;
pub mod export;
pub mod host;
pub mod image;
pub mod memory;
pub mod opcode;
mod ops;
pub mod program;
pub mod runtime;
pub mod stack;
pub mod value;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::assembler::{assemble, AssemblyError, ImageBuilder};
pub use crate::context::Context;
pub use crate::disasm::disassemble;
pub use crate::dispatch::{Dispatcher, OpcodeHandler, OPCODE_TABLE_SIZE};
pub use crate::export::{ExportTable, ExportedValue, ExternalKind};
pub use crate::host::{Host, MemoryHost};
pub use crate::image::{Image, ImageError, ProcedureEntry, ProcedureFlags};
pub use crate::opcode::Opcode;
pub use crate::program::{Program, ProgramFlags, ProgramId, ProgramState, WaitCondition};
pub use crate::runtime::{Burst, CallSite, Runtime, SliceOutcome};
pub use crate::value::{Pointer, Value};

/// Result type used across the VM core.
pub type VmResult<T> = std::result::Result<T, VmError>;

/// Identifies which of a program's two stacks an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackKind {
    Data,
    Control,
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackKind::Data => write!(f, "data"),
            StackKind::Control => write!(f, "control"),
        }
    }
}

/// Errors raised while executing script code.
///
/// Opcode handlers return these through `?`; the scheduler catches them at the slice
/// boundary, logs them and marks the offending program as exited with error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("{0} stack overflow")]
    StackOverflow(StackKind),
    #[error("{0} stack underflow")]
    StackUnderflow(StackKind),
    #[error("{expected} expected, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("division ({op}) by zero")]
    DivisionByZero { op: &'static str },
    #[error("invalid {found} operand given to {op}")]
    InvalidOperand {
        op: &'static str,
        found: &'static str,
    },
    #[error("{reason} opcode {word:#06x}")]
    MalformedOpcode { word: u16, reason: &'static str },
    #[error("external {kind} {name} does not exist")]
    UnknownExternal { kind: ExternalKind, name: String },
    #[error("wrong number of arguments to {procedure}: expected {expected}, got {found}")]
    ArgumentCountMismatch {
        procedure: String,
        expected: i32,
        found: i32,
    },
    #[error("already have a child process")]
    AlreadyHasChild,
    #[error("external {kind} {name} is already owned by {owner}")]
    ExportConflict {
        kind: ExternalKind,
        name: String,
        owner: String,
    },
    #[error("invalid procedure index {0}")]
    InvalidProcedure(i32),
    #[error("couldn't find string procedure {0}")]
    UnknownProcedure(String),
    #[error("invalid stack address {0}")]
    InvalidAddress(i32),
    #[error("invalid {table} reference {offset}")]
    InvalidStringRef { table: &'static str, offset: u32 },
    #[error("couldn't start script {name}: {reason}")]
    SpawnFailed { name: String, reason: String },
    #[error("nested execution depth {0} exceeded")]
    CallDepthExceeded(usize),
    #[error("external procedure {0} did not return to its caller")]
    ExternalCallIncomplete(String),
    #[error("opcode {0:#06x} does not fit the opcode table")]
    OpcodeOutOfRange(u16),
    #[error("no live program with id {0}")]
    UnknownProgram(ProgramId),
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("host error: {0}")]
    Host(String),
}

/// Configuration for the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Opcodes a runnable program executes per scheduler tick.
    pub burst_size: u32,
    /// Maximum number of values on each of a program's stacks.
    pub stack_capacity: usize,
    /// Bound on nested inline execution (cross-program calls, event procedures,
    /// critical spawns).
    pub max_call_depth: usize,
    /// Burst given to a freshly started program. `None` runs it until it yields.
    pub startup_burst: Option<u32>,
    /// Live dynamic strings a program may hold before a sweep is attempted.
    pub string_sweep_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            burst_size: 10,
            stack_capacity: 0x800,
            max_call_depth: 32,
            startup_burst: None,
            string_sweep_threshold: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn with_burst_size(mut self, burst_size: u32) -> Self {
        self.burst_size = burst_size.max(1);
        self
    }

    pub fn with_stack_capacity(mut self, capacity: usize) -> VmResult<Self> {
        if capacity == 0 {
            return Err(VmError::InvalidConfig(
                "stack capacity must be greater than zero".into(),
            ));
        }
        self.stack_capacity = capacity;
        Ok(self)
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> VmResult<Self> {
        if depth == 0 {
            return Err(VmError::InvalidConfig(
                "call depth must allow at least one level".into(),
            ));
        }
        self.max_call_depth = depth;
        Ok(self)
    }

    pub fn with_startup_burst(mut self, burst: Option<u32>) -> Self {
        self.startup_burst = burst.map(|value| value.max(1));
        self
    }

    /// Checks a configuration that was deserialized rather than built.
    pub fn validate(&self) -> VmResult<()> {
        if self.burst_size == 0 {
            return Err(VmError::InvalidConfig("burst size must be at least 1".into()));
        }
        if self.stack_capacity == 0 {
            return Err(VmError::InvalidConfig(
                "stack capacity must be greater than zero".into(),
            ));
        }
        if self.max_call_depth == 0 {
            return Err(VmError::InvalidConfig(
                "call depth must allow at least one level".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_size_is_clamped() {
        let config = RuntimeConfig::default().with_burst_size(0);
        assert_eq!(config.burst_size, 1);
    }

    #[test]
    fn rejects_empty_stacks() {
        let err = RuntimeConfig::default()
            .with_stack_capacity(0)
            .expect_err("zero capacity rejected");
        assert!(matches!(err, VmError::InvalidConfig(_)));
    }

    #[test]
    fn error_messages_name_the_stack() {
        assert_eq!(
            VmError::StackUnderflow(StackKind::Control).to_string(),
            "control stack underflow"
        );
        assert_eq!(
            VmError::DivisionByZero { op: "MOD" }.to_string(),
            "division (MOD) by zero"
        );
    }
}
