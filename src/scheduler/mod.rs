//! Deferred and periodic task execution.
//!
//! Time-based stages (`delay_elements`, `sample`, `interval`) and
//! `subscribe_on` run their work through a `Scheduler` rather than a host
//! timer, so tests can swap in `VirtualScheduler` and drive time by hand.

mod thread;
mod virtual_time;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use thread::ThreadScheduler;
pub use virtual_time::VirtualScheduler;

/// One-shot unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Work run on every tick of a fixed-rate schedule.
pub type RepeatingTask = Box<dyn FnMut() + Send + 'static>;

/// Executes tasks now, later, or periodically.
pub trait Scheduler: Send + Sync {
    /// Run `task` as soon as possible.
    fn schedule(&self, task: Task) -> CancelHandle;

    /// Run `task` once after `delay`.
    fn schedule_after(&self, delay: Duration, task: Task) -> CancelHandle;

    /// Run `task` every `period`, first after one period. Ticks of the same
    /// task never overlap.
    fn schedule_at_fixed_rate(&self, period: Duration, task: RepeatingTask) -> CancelHandle;

    /// Time elapsed since the scheduler started.
    fn now(&self) -> Duration;
}

/// Handle to cancel a scheduled task. Cancelling is idempotent; a task that
/// already started is not interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is already cancelled (work was rejected).
    pub fn cancelled() -> Self {
        let handle = Self::new();
        handle.cancel();
        handle
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Scheduled work as stored by the scheduler implementations.
pub(crate) enum Job {
    Once(Task),
    Repeat(Arc<Mutex<RepeatingTask>>),
}

impl Job {
    pub fn repeating(task: RepeatingTask) -> Self {
        Job::Repeat(Arc::new(Mutex::new(task)))
    }

    /// Another reference to a repeating job, for re-arming.
    pub fn share(&self) -> Option<Job> {
        match self {
            Job::Once(_) => None,
            Job::Repeat(task) => Some(Job::Repeat(Arc::clone(task))),
        }
    }

    pub fn run(self) {
        match self {
            Job::Once(task) => task(),
            Job::Repeat(task) => {
                let mut task = task.lock();
                (*task)()
            }
        }
    }
}
