//! `Flux`: a cloneable handle on a publisher with the operator chain
//! methods.

use crate::config::{FlatMapConfig, FrameConfig, HubConfig};
use crate::error::{BoxError, FlowError, Result};
use crate::hub::ConnectableHub;
use crate::operators::{
    DelayPublisher, FilterPublisher, FlatMapPublisher, LogPublisher, MapPublisher,
    SamplePublisher, SubscribeOnPublisher,
};
use crate::policy::ErrorPolicy;
use crate::protocol::{Publisher, Subscriber};
use crate::scheduler::Scheduler;
use crate::sinks::{FrameStream, LambdaSubscriber};
use crate::sources::{IntervalPublisher, IterPublisher, PageSource, Pages, SourceIter};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// A cold asynchronous sequence of `T`.
///
/// Building a chain does nothing by itself; each `subscribe` runs the whole
/// chain for that subscriber. Clones share the underlying publisher.
///
/// # Example
///
/// ```ignore
/// let names = Flux::from_pages(repository, 50)
///     .try_map_with(|person: Person| person.validated_name(), ErrorPolicy::skip())
///     .delay_elements(Duration::from_millis(50), scheduler)
///     .collect_list(Duration::from_secs(10))?;
/// ```
pub struct Flux<T> {
    inner: Arc<dyn Publisher<T>>,
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Flux<T> {
    pub fn from_publisher(publisher: impl Publisher<T> + 'static) -> Self {
        Self {
            inner: Arc::new(publisher),
        }
    }

    // --- Sources ---

    /// Emit the items of `items`, re-iterated for every subscriber.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_publisher(IterPublisher::new(move || -> SourceIter<T> {
            Box::new(items.clone().into_iter().map(Ok))
        }))
    }

    /// Emit items produced by a fresh fallible iterator per subscriber. An
    /// `Err` element ends the sequence with that error.
    pub fn from_results<F>(factory: F) -> Self
    where
        F: Fn() -> SourceIter<T> + Send + Sync + 'static,
    {
        Self::from_publisher(IterPublisher::new(factory))
    }

    pub fn just(item: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_iter(Some(item))
    }

    /// Complete immediately.
    pub fn empty() -> Self {
        Self::from_results(|| -> SourceIter<T> { Box::new(std::iter::empty()) })
    }

    /// Fail immediately with `error`.
    pub fn error(error: FlowError) -> Self {
        Self::from_results(move || -> SourceIter<T> {
            Box::new(std::iter::once(Err(error.clone())))
        })
    }

    /// Infinite sequence `f(0), f(1), ...`, produced only against demand.
    pub fn generate<F>(f: F) -> Self
    where
        F: Fn(u64) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_results(move || -> SourceIter<T> {
            let f = Arc::clone(&f);
            Box::new((0u64..).map(move |i| Ok(f(i))))
        })
    }

    /// Every record of a paged source, fetching the next page only when the
    /// previous one has been emitted. A page shorter than `page_size` is the
    /// last one.
    pub fn from_pages(source: impl PageSource<T> + 'static, page_size: usize) -> Self {
        let source: Arc<dyn PageSource<T>> = Arc::new(source);
        Self::from_results(move || -> SourceIter<T> {
            Box::new(Pages::new(Arc::clone(&source), page_size))
        })
    }

    // --- Operators ---

    pub fn map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let mapper = move |item: T| -> std::result::Result<U, BoxError> { Ok(f(item)) };
        Flux::from_publisher(MapPublisher::new(self, mapper, ErrorPolicy::Propagate))
    }

    /// Fallible map; the first failure ends the stream.
    pub fn try_map<U, E, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        self.try_map_with(f, ErrorPolicy::Propagate)
    }

    /// Fallible map with an explicit error policy.
    pub fn try_map_with<U, E, F>(self, f: F, policy: ErrorPolicy) -> Flux<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        let mapper =
            move |item: T| -> std::result::Result<U, BoxError> { f(item).map_err(Into::into) };
        Flux::from_publisher(MapPublisher::new(self, mapper, policy))
    }

    pub fn filter<P>(self, predicate: P) -> Flux<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Flux::from_publisher(FilterPublisher::new(self, predicate))
    }

    /// Map each item to an inner sequence and merge all of them, with no
    /// concurrency limit.
    pub fn flat_map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        let mapper = move |item: T| -> std::result::Result<Flux<U>, BoxError> { Ok(f(item)) };
        Flux::from_publisher(FlatMapPublisher::new(
            self,
            mapper,
            FlatMapConfig::default(),
            ErrorPolicy::Propagate,
        ))
    }

    /// `flat_map` with a fallible mapper, a concurrency configuration and an
    /// error policy covering both mapper and inner failures.
    pub fn flat_map_with<U, E, F>(
        self,
        f: F,
        config: FlatMapConfig,
        policy: ErrorPolicy,
    ) -> Flux<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> std::result::Result<Flux<U>, E> + Send + Sync + 'static,
    {
        let mapper = move |item: T| -> std::result::Result<Flux<U>, BoxError> {
            f(item).map_err(Into::into)
        };
        Flux::from_publisher(FlatMapPublisher::new(self, mapper, config, policy))
    }

    /// Map each item to an inner sequence and concatenate them: one inner
    /// runs at a time, so inner order follows source order.
    pub fn concat_map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        self.concat_map_with(
            move |item| Ok::<_, BoxError>(f(item)),
            ErrorPolicy::Propagate,
        )
    }

    /// `concat_map` with a fallible mapper and an error policy.
    pub fn concat_map_with<U, E, F>(self, f: F, policy: ErrorPolicy) -> Flux<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> std::result::Result<Flux<U>, E> + Send + Sync + 'static,
    {
        self.flat_map_with(f, FlatMapConfig::max_concurrency(1), policy)
    }

    /// Shift every item by `delay`, keeping order.
    pub fn delay_elements(self, delay: Duration, scheduler: Arc<dyn Scheduler>) -> Flux<T> {
        Flux::from_publisher(DelayPublisher::new(self, delay, scheduler))
    }

    /// Emit the latest item once per `period`.
    ///
    /// Upstream is pulled in bounded batches topped up on each tick, so an
    /// infinite synchronous source such as [`Flux::generate`] is safe to
    /// sample without `subscribe_on`.
    pub fn sample(self, period: Duration, scheduler: Arc<dyn Scheduler>) -> Flux<T> {
        Flux::from_publisher(SamplePublisher::new(self, period, scheduler))
    }

    /// Subscribe and request on `scheduler` instead of the calling thread.
    pub fn subscribe_on(self, scheduler: Arc<dyn Scheduler>) -> Flux<T> {
        Flux::from_publisher(SubscribeOnPublisher::new(self, scheduler))
    }

    /// Trace every signal and request under `category`.
    pub fn log(self, category: &str) -> Flux<T>
    where
        T: Debug,
    {
        Flux::from_publisher(LogPublisher::new(self, category))
    }

    /// Share this sequence through a connectable hub.
    pub fn publish(self) -> ConnectableHub<T>
    where
        T: Clone,
    {
        ConnectableHub::new(self)
    }

    pub fn publish_with(self, config: HubConfig) -> ConnectableHub<T>
    where
        T: Clone,
    {
        ConnectableHub::with_config(self, config)
    }

    // --- Sinks ---

    /// Subscribe a closure receiving every item.
    pub fn subscribe_fn(
        &self,
        on_next: impl Fn(T) + Send + Sync + 'static,
    ) -> Arc<LambdaSubscriber<T>> {
        self.subscribe_with(LambdaSubscriber::new(on_next))
    }

    /// Subscribe a closure subscriber, returning it as a dispose handle.
    pub fn subscribe_with(&self, subscriber: LambdaSubscriber<T>) -> Arc<LambdaSubscriber<T>> {
        let subscriber = Arc::new(subscriber);
        self.inner.subscribe(subscriber.clone());
        subscriber
    }

    /// Read the sequence from the calling thread, frame by frame.
    pub fn into_frames(self) -> FrameStream<T> {
        self.into_frames_with(FrameConfig::default())
    }

    pub fn into_frames_with(self, config: FrameConfig) -> FrameStream<T> {
        let (frames, subscriber) = FrameStream::open(&config);
        self.inner.subscribe(subscriber);
        frames
    }

    /// Block until the sequence terminates and return all of its items.
    pub fn collect_list(self, timeout: Duration) -> Result<Vec<T>> {
        self.into_frames().collect_within(timeout)
    }
}

impl Flux<u64> {
    /// `count` consecutive numbers starting at `start`.
    pub fn range(start: u64, count: u64) -> Self {
        let end = start.saturating_add(count);
        Self::from_iter(start..end)
    }

    /// Tick numbers `0, 1, 2, ...` once per `period` on `scheduler`.
    pub fn interval(period: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::from_publisher(IntervalPublisher::new(period, scheduler))
    }
}

impl<T: Send + 'static> Publisher<T> for Flux<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.inner.subscribe(subscriber);
    }
}

impl<T> Debug for Flux<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flux").finish_non_exhaustive()
    }
}
