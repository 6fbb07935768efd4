//! ScriptVM host layer: configuration, logging, an std-backed [`scriptvm_core::Host`],
//! host opcodes and a run loop over the core runtime.

pub mod config;
pub mod engine;
pub mod host;
pub mod logging;
pub mod ops;

pub use crate::config::HostConfig;
pub use crate::engine::{Engine, RunSummary};
pub use crate::host::{StdHost, Transcript};
pub use crate::ops::{HOST_OPCODE_ALIASES, assemble_with_host_opcodes, install_host_opcodes};
