//! Task definitions and run records.

pub mod model;

pub use model::{NotifyPolicy, RunLog, RunLogEntry, RunStatus, Task, User};
