//! Operator behaviour tests: map, filter, flat_map, delay_elements, sample,
//! subscribe_on and log.

use rivulet::{
    ErrorPolicy, FlatMapConfig, FlowError, Flux, Publisher, SchedulerConfig, Subscriber,
    Subscription, TestSubscriber, ThreadScheduler, VirtualScheduler,
};
use rivulet::operators::UPSTREAM_BATCH;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Publisher that keeps signalling after it completed.
struct Babbling;

struct Ignored;

impl Subscription for Ignored {
    fn request(&self, _n: u64) -> rivulet::Result<()> {
        Ok(())
    }

    fn cancel(&self) {}
}

impl Publisher<u64> for Babbling {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<u64>>) {
        subscriber.on_subscribe(Arc::new(Ignored));
        subscriber.on_next(1);
        subscriber.on_complete();
        subscriber.on_next(2);
        subscriber.on_complete();
    }
}

// --- map ---

#[test]
fn test_map_transforms_in_order() {
    let subscriber = TestSubscriber::<String>::unbounded();
    Flux::range(1, 3)
        .map(|n| format!("#{}", n))
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.items(), vec!["#1", "#2", "#3"]);
    assert!(subscriber.is_completed());
}

#[test]
fn test_map_passes_demand_through() {
    let subscriber = TestSubscriber::<u64>::new(2);
    Flux::range(0, 10).map(|n| n * n).subscribe(subscriber.clone());
    assert_eq!(subscriber.items(), vec![0, 1]);

    subscriber.request(1).unwrap();
    assert_eq!(subscriber.items(), vec![0, 1, 4]);
    assert!(!subscriber.is_completed());
}

#[test]
fn test_map_ignores_items_after_complete() {
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::from_publisher(Babbling)
        .map(|n| n * 10)
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.items(), vec![10]);
    assert_eq!(subscriber.terminal_count(), 1);
    assert!(subscriber.violations().is_empty());
}

// --- filter ---

#[test]
fn test_filter_low_selectivity_needs_one_request() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulled);
    let subscriber = TestSubscriber::<u64>::new(1);

    Flux::range(0, 100)
        .map(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            n
        })
        .filter(|n| n % 10 == 9)
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.items(), vec![9]);
    assert_eq!(subscriber.granted(), 1);
    // One replacement request per dropped item, no more.
    assert_eq!(pulled.load(Ordering::SeqCst), 10);
}

#[test]
fn test_filter_completes_when_nothing_matches() {
    let subscriber = TestSubscriber::<u64>::new(1);
    Flux::range(0, 20)
        .filter(|_| false)
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.item_count(), 0);
    assert!(subscriber.is_completed());
}

#[test]
fn test_filter_ignores_items_after_complete() {
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::from_publisher(Babbling)
        .filter(|_| true)
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.items(), vec![1]);
    assert_eq!(subscriber.terminal_count(), 1);
    assert!(subscriber.violations().is_empty());
}

// --- flat_map ---

#[test]
fn test_flat_map_merges_all_inners() {
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 3)
        .flat_map(|n| Flux::range(n * 100, 3))
        .subscribe(subscriber.clone());

    let mut items = subscriber.items();
    items.sort_unstable();
    assert_eq!(items, vec![0, 1, 2, 100, 101, 102, 200, 201, 202]);
    assert!(subscriber.is_completed());
}

#[test]
fn test_flat_map_round_robin_is_deterministic() {
    let subscriber = TestSubscriber::<u64>::new(0);
    Flux::range(0, 2)
        .flat_map(|n| Flux::range(n * 10, 2))
        .subscribe(subscriber.clone());

    subscriber.request(100).unwrap();
    assert_eq!(subscriber.items(), vec![0, 10, 1, 11]);
}

#[test]
fn test_flat_map_respects_downstream_demand() {
    let subscriber = TestSubscriber::<u64>::new(3);
    Flux::range(0, 5)
        .flat_map(|n| Flux::range(n * 10, 10))
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.item_count(), 3);
    assert!(!subscriber.is_completed());
    subscriber.request(100).unwrap();
    assert_eq!(subscriber.item_count(), 50);
    assert!(subscriber.is_completed());
    assert!(subscriber.violations().is_empty());
}

#[test]
fn test_flat_map_waits_for_slow_inner() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let inner_scheduler = Arc::clone(&scheduler);
    let subscriber = TestSubscriber::<u64>::unbounded();

    // The first inner is the slowest; upstream completes long before it.
    Flux::range(0, 3)
        .flat_map(move |n| {
            Flux::just(n).delay_elements(ms(30 - n * 10), inner_scheduler.clone())
        })
        .subscribe(subscriber.clone());

    scheduler.advance_by(ms(10));
    assert_eq!(subscriber.items(), vec![2]);
    assert!(!subscriber.is_completed());

    scheduler.advance_by(ms(10));
    assert_eq!(subscriber.items(), vec![2, 1]);
    assert!(!subscriber.is_completed());

    scheduler.advance_by(ms(10));
    assert_eq!(subscriber.items(), vec![2, 1, 0]);
    assert!(subscriber.is_completed());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test]
fn test_flat_map_bounded_concurrency() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let scheduler = Arc::new(VirtualScheduler::new());

    let (a, p, s) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&scheduler));
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 6)
        .flat_map_with(
            move |n| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                let done = Arc::clone(&a);
                Ok::<_, FlowError>(
                    Flux::just(n)
                        .delay_elements(ms(10), s.clone())
                        .map(move |v| {
                            done.fetch_sub(1, Ordering::SeqCst);
                            v
                        }),
                )
            },
            FlatMapConfig::max_concurrency(2),
            ErrorPolicy::Propagate,
        )
        .subscribe(subscriber.clone());

    scheduler.advance_by(ms(100));
    assert_eq!(subscriber.item_count(), 6);
    assert!(subscriber.is_completed());
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[test]
fn test_flat_map_inner_error_propagates() {
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 3)
        .flat_map(|n| {
            if n == 1 {
                Flux::error(FlowError::message("inner failed"))
            } else {
                Flux::just(n)
            }
        })
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.items(), vec![0]);
    assert_eq!(subscriber.errors().len(), 1);
    assert_eq!(subscriber.terminal_count(), 1);
}

// --- concat_map ---

#[test]
fn test_concat_map_keeps_source_order() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let inner_scheduler = Arc::clone(&scheduler);
    let subscriber = TestSubscriber::<u64>::unbounded();

    // Same inners as the flat_map case above, but each waits its turn.
    Flux::range(0, 3)
        .concat_map(move |n| {
            Flux::just(n).delay_elements(ms(30 - n * 10), inner_scheduler.clone())
        })
        .subscribe(subscriber.clone());

    scheduler.advance_by(ms(30));
    assert_eq!(subscriber.items(), vec![0]);

    scheduler.advance_by(ms(20));
    assert_eq!(subscriber.items(), vec![0, 1]);
    assert!(!subscriber.is_completed());

    scheduler.advance_by(ms(10));
    assert_eq!(subscriber.items(), vec![0, 1, 2]);
    assert!(subscriber.is_completed());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test]
fn test_concat_map_with_skips_failed_mapping() {
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 4)
        .concat_map_with(
            |n| {
                if n == 1 {
                    Err("no inner for 1")
                } else {
                    Ok(Flux::range(n * 10, 2))
                }
            },
            ErrorPolicy::skip(),
        )
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.items(), vec![0, 1, 20, 21, 30, 31]);
    assert!(subscriber.is_completed());
    assert!(subscriber.errors().is_empty());
}

// --- delay_elements ---

#[test]
fn test_delay_shifts_each_item() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 3)
        .delay_elements(ms(50), scheduler.clone())
        .subscribe(subscriber.clone());

    scheduler.advance_by(ms(49));
    assert_eq!(subscriber.item_count(), 0);

    scheduler.advance_by(ms(1));
    assert_eq!(subscriber.items(), vec![0, 1, 2]);
    assert!(subscriber.is_completed());
}

#[test]
fn test_delay_completion_waits_for_last_item() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 2)
        .delay_elements(ms(20), scheduler.clone())
        .subscribe(subscriber.clone());

    // Upstream already completed, but the items are still in flight.
    assert!(!subscriber.is_completed());
    scheduler.advance_by(ms(20));
    assert!(subscriber.is_completed());
}

#[test]
fn test_delay_error_is_immediate() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 3)
        .try_map(|n| if n == 2 { Err("bad") } else { Ok(n) })
        .delay_elements(ms(20), scheduler.clone())
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.errors().len(), 1);
    scheduler.advance_by(ms(100));
    assert_eq!(subscriber.item_count(), 0);
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test]
fn test_delay_cancel_drops_pending() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 3)
        .delay_elements(ms(20), scheduler.clone())
        .subscribe(subscriber.clone());

    subscriber.cancel();
    scheduler.advance_by(ms(100));
    assert_eq!(subscriber.item_count(), 0);
    assert_eq!(subscriber.terminal_count(), 0);
}

// --- sample ---

#[test]
fn test_sample_emits_latest_per_tick() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::interval(ms(10), scheduler.clone())
        .sample(ms(33), scheduler.clone())
        .subscribe(subscriber.clone());

    scheduler.advance_by(ms(33));
    // Ticks 0, 1, 2 arrived at 10, 20, 30 ms.
    assert_eq!(subscriber.items(), vec![2]);

    scheduler.advance_by(ms(33));
    // Ticks 3, 4, 5 arrived at 40, 50, 60 ms.
    assert_eq!(subscriber.items(), vec![2, 5]);
    subscriber.cancel();
}

#[test]
fn test_sample_quiet_window_emits_nothing() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::unbounded();
    // A slow source: one item every 100 ms, sampled every 30 ms.
    Flux::interval(ms(100), scheduler.clone())
        .sample(ms(30), scheduler.clone())
        .subscribe(subscriber.clone());

    scheduler.advance_by(ms(90));
    assert_eq!(subscriber.item_count(), 0);

    scheduler.advance_by(ms(30));
    assert_eq!(subscriber.items(), vec![0]);

    // Windows ending at 150 and 180 see no new item: no stale repeat.
    scheduler.advance_by(ms(60));
    assert_eq!(subscriber.items(), vec![0]);
    subscriber.cancel();
}

#[test]
fn test_sample_flushes_on_complete() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 5)
        .sample(ms(10), scheduler.clone())
        .subscribe(subscriber.clone());

    assert_eq!(subscriber.items(), vec![4]);
    assert!(subscriber.is_completed());

    // The ticker was stopped with the stream.
    scheduler.advance_by(ms(100));
    assert_eq!(subscriber.items(), vec![4]);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn test_sample_drops_without_demand() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::new(0);
    Flux::interval(ms(10), scheduler.clone())
        .sample(ms(33), scheduler.clone())
        .subscribe(subscriber.clone());

    // The sample at 33 ms finds no demand and is dropped.
    scheduler.advance_by(ms(40));
    assert_eq!(subscriber.item_count(), 0);

    subscriber.request(1).unwrap();
    scheduler.advance_by(ms(30));
    assert_eq!(subscriber.items(), vec![5]);
    assert!(subscriber.violations().is_empty());
    subscriber.cancel();
}

#[test]
fn test_sample_pulls_infinite_source_in_batches() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::unbounded();
    // Returns: only the first batch is pulled while subscribing.
    Flux::generate(|i| i)
        .sample(ms(10), scheduler.clone())
        .subscribe(subscriber.clone());
    assert_eq!(subscriber.item_count(), 0);

    scheduler.advance_by(ms(10));
    assert_eq!(subscriber.items(), vec![UPSTREAM_BATCH - 1]);

    scheduler.advance_by(ms(10));
    assert_eq!(
        subscriber.items(),
        vec![UPSTREAM_BATCH - 1, 2 * UPSTREAM_BATCH - 1]
    );

    subscriber.cancel();
    assert_eq!(scheduler.pending(), 0);
}

// --- subscribe_on ---

#[test]
fn test_subscribe_on_runs_source_on_scheduler() {
    let scheduler = Arc::new(ThreadScheduler::with_config(SchedulerConfig {
        workers: 1,
        thread_name: "subscribe-on".to_string(),
    }));
    let caller = thread::current().id();
    let producer = Arc::new(parking_lot::Mutex::new(None));
    let seen = Arc::clone(&producer);

    let subscriber = TestSubscriber::<u64>::unbounded();
    Flux::range(0, 3)
        .map(move |n| {
            *seen.lock() = Some(thread::current().id());
            n
        })
        .subscribe_on(scheduler.clone())
        .subscribe(subscriber.clone());

    assert!(subscriber.await_terminal(Duration::from_secs(2)));
    assert_eq!(subscriber.items(), vec![0, 1, 2]);
    let producer = producer.lock().unwrap();
    assert_ne!(producer, caller);
}

#[test]
fn test_subscribe_on_with_virtual_time() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let subscriber = TestSubscriber::<u64>::new(2);
    Flux::range(0, 5)
        .subscribe_on(scheduler.clone())
        .subscribe(subscriber.clone());

    // Nothing happens until the scheduler runs the subscription task.
    assert!(!subscriber.is_subscribed());
    assert_eq!(scheduler.pending(), 1);

    // Subscribing schedules the initial request, which runs in the same
    // flush.
    scheduler.flush();
    assert!(subscriber.is_subscribed());
    assert_eq!(subscriber.items(), vec![0, 1]);
    assert_eq!(scheduler.pending(), 0);
}

// --- log ---

#[test]
fn test_log_is_transparent() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let subscriber = TestSubscriber::<u64>::new(2);
    Flux::range(0, 4).log("numbers").subscribe(subscriber.clone());
    assert_eq!(subscriber.items(), vec![0, 1]);

    subscriber.request(5).unwrap();
    assert_eq!(subscriber.items(), vec![0, 1, 2, 3]);
    assert!(subscriber.is_completed());
}
