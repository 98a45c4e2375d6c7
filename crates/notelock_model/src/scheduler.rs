//! Deferred task scheduling.
//!
//! The store and the sync engine defer observer fan-out and cycle
//! continuations through this hook so a host can yield to its UI loop.

/// Schedules a task to run soon.
pub trait Scheduler: Send + Sync {
    /// Runs or enqueues `task`.
    fn schedule(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs every task inline. The default, and what tests use.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}
