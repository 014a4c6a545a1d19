//! Deferred work run from the tick loop

use std::time::Duration;

use tokio::time::Instant;

pub type Task<C> = Box<dyn FnOnce(&mut C)>;

struct ScheduledTask<C> {
    due: Instant,
    task: Task<C>,
}

/// Ordered list of one-shot tasks. A task runs on the first sweep at or
/// after its due instant, exactly once; due tasks run in insertion order.
pub struct Scheduler<C> {
    tasks: Vec<ScheduledTask<C>>,
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn schedule(&mut self, delay: Duration, task: impl FnOnce(&mut C) + 'static) {
        self.tasks.push(ScheduledTask {
            due: Instant::now() + delay,
            task: Box::new(task),
        });
    }

    /// Remove and return every task due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<Task<C>> {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| t.due <= now);
        self.tasks = pending;
        due.into_iter().map(|t| t.task).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}
