//! Thread-pool scheduler backed by crossbeam channels.
//!
//! A single timer thread keeps pending deadlines ordered and hands due work
//! to a pool of worker threads.

use super::{CancelHandle, Job, RepeatingTask, Scheduler, Task};
use crate::config::SchedulerConfig;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Work handed to a worker.
struct WorkItem {
    handle: CancelHandle,
    job: Job,
}

/// Work waiting for its deadline.
struct Timed {
    deadline: Instant,
    period: Option<Duration>,
    handle: CancelHandle,
    job: Job,
}

enum Command {
    Schedule(Timed),
    Shutdown,
}

/// Scheduler running tasks on a fixed pool of OS threads.
pub struct ThreadScheduler {
    /// Start of the scheduler's clock.
    started: Instant,
    /// Commands for the timer thread.
    timer_tx: Sender<Command>,
    /// Ready work for the workers.
    worker_tx: Sender<WorkItem>,
    /// Set once `shutdown` was called.
    shut_down: AtomicBool,
}

impl ThreadScheduler {
    /// Start a scheduler with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Start a scheduler with `config.workers` worker threads.
    pub fn with_config(config: SchedulerConfig) -> Self {
        let (worker_tx, worker_rx) = unbounded::<WorkItem>();
        let (timer_tx, timer_rx) = unbounded::<Command>();

        let workers = config.workers.max(1);
        for i in 0..workers {
            let rx = worker_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, i))
                .spawn(move || run_worker(rx));
            if let Err(e) = spawned {
                warn!(error = %e, "failed to spawn scheduler worker");
            }
        }

        let dispatch = worker_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-timer", config.thread_name))
            .spawn(move || run_timer(timer_rx, dispatch));
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn scheduler timer");
        }

        debug!(workers, "thread scheduler started");

        Self {
            started: Instant::now(),
            timer_tx,
            worker_tx,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Stop accepting work. Queued work still runs; pending timers are
    /// dropped.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.timer_tx.send(Command::Shutdown);
        debug!("thread scheduler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn submit_timed(&self, timed: Timed) -> CancelHandle {
        let handle = timed.handle.clone();
        if self.is_shut_down() || self.timer_tx.send(Command::Schedule(timed)).is_err() {
            warn!("task rejected: scheduler is shut down");
            return CancelHandle::cancelled();
        }
        handle
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, task: Task) -> CancelHandle {
        let handle = CancelHandle::new();
        let item = WorkItem {
            handle: handle.clone(),
            job: Job::Once(task),
        };
        if self.is_shut_down() || self.worker_tx.send(item).is_err() {
            warn!("task rejected: scheduler is shut down");
            return CancelHandle::cancelled();
        }
        handle
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> CancelHandle {
        self.submit_timed(Timed {
            deadline: Instant::now() + delay,
            period: None,
            handle: CancelHandle::new(),
            job: Job::Once(task),
        })
    }

    fn schedule_at_fixed_rate(&self, period: Duration, task: RepeatingTask) -> CancelHandle {
        self.submit_timed(Timed {
            deadline: Instant::now() + period,
            period: Some(period),
            handle: CancelHandle::new(),
            job: Job::repeating(task),
        })
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }
}

fn run_worker(rx: Receiver<WorkItem>) {
    for item in rx.iter() {
        if item.handle.is_cancelled() {
            continue;
        }
        if catch_unwind(AssertUnwindSafe(|| item.job.run())).is_err() {
            warn!("scheduled task panicked");
        }
    }
}

fn run_timer(rx: Receiver<Command>, dispatch: Sender<WorkItem>) {
    // Keyed by (deadline, insertion order) so equal deadlines run FIFO.
    let mut timers: BTreeMap<(Instant, u64), Timed> = BTreeMap::new();
    let mut seq = 0u64;

    loop {
        let next_deadline = timers.keys().next().map(|(deadline, _)| *deadline);
        let command = match next_deadline {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(Command::Schedule(timed)) => {
                timers.insert((timed.deadline, seq), timed);
                seq += 1;
            }
            Some(Command::Shutdown) => break,
            None => {}
        }

        let now = Instant::now();
        loop {
            let due = matches!(timers.keys().next(), Some((deadline, _)) if *deadline <= now);
            if !due {
                break;
            }
            let Some((_, timed)) = timers.pop_first() else {
                break;
            };
            if timed.handle.is_cancelled() {
                continue;
            }

            if let Some(period) = timed.period {
                if let Some(job) = timed.job.share() {
                    let item = WorkItem {
                        handle: timed.handle.clone(),
                        job,
                    };
                    if dispatch.send(item).is_err() {
                        return;
                    }
                }
                let deadline = timed.deadline + period;
                timers.insert((deadline, seq), Timed { deadline, ..timed });
                seq += 1;
            } else {
                let item = WorkItem {
                    handle: timed.handle,
                    job: timed.job,
                };
                if dispatch.send(item).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn small_pool() -> ThreadScheduler {
        ThreadScheduler::with_config(SchedulerConfig {
            workers: 2,
            thread_name: "test-worker".to_string(),
        })
    }

    #[test]
    fn test_schedule_runs() {
        let scheduler = small_pool();
        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler.schedule(Box::new(move || {
            tx.send(42).unwrap();
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }

    #[test]
    fn test_schedule_after_waits() {
        let scheduler = small_pool();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let start = Instant::now();
        scheduler.schedule_after(
            Duration::from_millis(30),
            Box::new(move || {
                tx.send(Instant::now()).unwrap();
            }),
        );
        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancelled_timer_does_not_run() {
        let scheduler = small_pool();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let handle = scheduler.schedule_after(
            Duration::from_millis(30),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fixed_rate_ticks_until_cancelled() {
        let scheduler = small_pool();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = scheduler.schedule_at_fixed_rate(
            Duration::from_millis(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        thread::sleep(Duration::from_millis(100));
        handle.cancel();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {}", seen);

        thread::sleep(Duration::from_millis(50));
        assert!(ticks.load(Ordering::SeqCst) <= seen + 1);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let scheduler = small_pool();
        scheduler.shutdown();
        let handle = scheduler.schedule(Box::new(|| {}));
        assert!(handle.is_cancelled());
        let handle = scheduler.schedule_after(Duration::from_millis(1), Box::new(|| {}));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let scheduler = ThreadScheduler::with_config(SchedulerConfig {
            workers: 1,
            thread_name: "panic-worker".to_string(),
        });
        scheduler.schedule(Box::new(|| panic!("task failure")));

        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler.schedule(Box::new(move || {
            tx.send(()).unwrap();
        }));
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
