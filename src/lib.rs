//! Task runner: executes stored shell tasks under a timeout, records every
//! run and mails the owner according to the task's notification policy.

pub mod config;
pub mod error;
pub mod job;
pub mod notify;
pub mod runner;
pub mod store;
pub mod task;
