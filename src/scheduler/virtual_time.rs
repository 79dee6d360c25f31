//! Virtual-time scheduler for deterministic tests.
//!
//! Nothing runs until the owner advances the clock. Due tasks then run on the
//! calling thread in deadline order, with the clock set to each task's
//! deadline while it runs.

use super::{CancelHandle, Job, RepeatingTask, Scheduler, Task};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

struct VirtualTask {
    handle: CancelHandle,
    period: Option<Duration>,
    job: Job,
}

#[derive(Default)]
struct VirtualState {
    now: Duration,
    seq: u64,
    queue: BTreeMap<(Duration, u64), VirtualTask>,
}

impl VirtualState {
    fn insert(&mut self, due: Duration, task: VirtualTask) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.insert((due, seq), task);
    }
}

/// Scheduler whose clock only moves when told to.
#[derive(Default)]
pub struct VirtualScheduler {
    state: Mutex<VirtualState>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `delta`, running everything that falls due.
    pub fn advance_by(&self, delta: Duration) {
        let target = self.state.lock().now + delta;
        self.advance_to(target);
    }

    /// Move the clock to `target`, running everything that falls due.
    pub fn advance_to(&self, target: Duration) {
        loop {
            let next = {
                let mut st = self.state.lock();
                let due = st.queue.keys().next().map(|(due, _)| *due);
                match due {
                    Some(due) if due <= target => {
                        if due > st.now {
                            st.now = due;
                        }
                        st.queue.pop_first().map(|((due, _), task)| (due, task))
                    }
                    _ => None,
                }
            };
            let Some((due, task)) = next else { break };
            if task.handle.is_cancelled() {
                continue;
            }

            match task.period {
                Some(period) => {
                    if let Some(job) = task.job.share() {
                        job.run();
                    }
                    if !task.handle.is_cancelled() {
                        self.state.lock().insert(due + period, task);
                    }
                }
                None => task.job.run(),
            }
        }

        let mut st = self.state.lock();
        if target > st.now {
            st.now = target;
        }
    }

    /// Run tasks that are due at the current instant.
    pub fn flush(&self) {
        self.advance_by(Duration::ZERO);
    }

    /// Number of tasks waiting (cancelled ones included until they come due).
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn submit(&self, delay: Duration, period: Option<Duration>, job: Job) -> CancelHandle {
        let handle = CancelHandle::new();
        let mut st = self.state.lock();
        let due = st.now + delay;
        st.insert(
            due,
            VirtualTask {
                handle: handle.clone(),
                period,
                job,
            },
        );
        handle
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule(&self, task: Task) -> CancelHandle {
        self.submit(Duration::ZERO, None, Job::Once(task))
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> CancelHandle {
        self.submit(delay, None, Job::Once(task))
    }

    fn schedule_at_fixed_rate(&self, period: Duration, task: RepeatingTask) -> CancelHandle {
        self.submit(period, Some(period), Job::repeating(task))
    }

    fn now(&self) -> Duration {
        self.state.lock().now
    }
}
