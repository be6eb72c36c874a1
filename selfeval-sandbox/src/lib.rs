#![deny(clippy::all)]

mod cpu;
mod error;
mod helper;
mod interactive;
mod sandbox;
mod signal;
mod telemetry;

pub use self::cpu::{logical_cpu_count, logical_cpus, physical_cpus, CpuPool, DEFAULT_POOL_PATH};
pub use self::error::{Result, SandboxError};
pub use self::helper::{Access, ExternalHelper, Invocation, IsolationHelper};
pub use self::interactive::{run_interactive, InteractiveOutcome, Transcript, Transport};
pub use self::sandbox::{
    resolve_executable, Io, Running, SandboxCommand, SandboxContext, SandboxOptions, Stopped,
};
pub use self::signal::{install_interrupt_flag, is_interrupted, InterruptBlock};
pub use self::telemetry::{classify, Telemetry};
