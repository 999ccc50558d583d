//! Process execution and admission control.

pub mod gate;
pub mod shell;

pub use gate::{ConcurrencyGate, GatePermit};
pub use shell::{CommandOutput, CommandRunner, ShellRunner};
