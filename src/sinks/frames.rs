//! Channel-backed frame stream.

use crate::config::FrameConfig;
use crate::error::{FlowError, Result};
use crate::protocol::{Subscriber, Subscription};
use crate::types::Signal;
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Subscriber end of a frame stream. Sends one frame per signal into a
/// bounded channel sized so a send never blocks the producer.
pub(crate) struct ChannelSubscriber<T> {
    sender: Mutex<Option<Sender<Signal<T>>>>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    prefetch: u64,
}

impl<T: Send + 'static> ChannelSubscriber<T> {
    fn send(&self, signal: Signal<T>) {
        let terminal = signal.is_terminal();
        let sender = if terminal {
            // Dropping the sender after the terminal frame disconnects the
            // channel once the consumer has read everything.
            self.sender.lock().take()
        } else {
            self.sender.lock().clone()
        };
        let Some(sender) = sender else {
            return;
        };
        if sender.try_send(signal).is_err() {
            warn!("frame stream closed or full, cancelling upstream");
            self.cancel_upstream();
        }
    }

    fn cancel_upstream(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    fn request_one(&self) {
        let subscription = self.subscription.lock().clone();
        if let Some(subscription) = subscription {
            if let Err(e) = subscription.request(1) {
                debug!(error = %e, "frame stream: re-request failed");
            }
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for ChannelSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut slot = self.subscription.lock();
            if slot.is_some() {
                drop(slot);
                warn!("frame stream subscribed twice, cancelling the second subscription");
                subscription.cancel();
                return;
            }
            *slot = Some(Arc::clone(&subscription));
        }
        if let Err(e) = subscription.request(self.prefetch) {
            debug!(error = %e, "frame stream: prefetch failed");
        }
    }

    fn on_next(&self, item: T) {
        self.send(Signal::Item(item));
    }

    fn on_error(&self, error: FlowError) {
        self.send(Signal::Error(error));
        self.subscription.lock().take();
    }

    fn on_complete(&self) {
        self.send(Signal::Complete);
        self.subscription.lock().take();
    }
}

/// Pull-style view of a sequence: one frame per signal, read from a
/// channel. Every item read is replaced by a request for one more, so at
/// most `buffer_size` items are ever in flight. Dropping the stream cancels
/// the subscription.
///
/// # Example
///
/// ```ignore
/// let frames = Flux::range(0, 1000).into_frames();
/// for item in frames {
///     println!("{}", item?);
/// }
/// ```
pub struct FrameStream<T> {
    receiver: Receiver<Signal<T>>,
    subscriber: Arc<ChannelSubscriber<T>>,
    finished: AtomicBool,
}

impl<T: Send + 'static> FrameStream<T> {
    /// Create the stream and the subscriber feeding it. The caller
    /// subscribes the returned subscriber to its source.
    pub(crate) fn open(config: &FrameConfig) -> (Self, Arc<ChannelSubscriber<T>>) {
        let prefetch = config.buffer_size.max(1);
        // Room for every requested item plus the terminal frame.
        let (sender, receiver) = bounded(prefetch + 1);
        let subscriber = Arc::new(ChannelSubscriber {
            sender: Mutex::new(Some(sender)),
            subscription: Mutex::new(None),
            prefetch: prefetch as u64,
        });
        let stream = Self {
            receiver,
            subscriber: Arc::clone(&subscriber),
            finished: AtomicBool::new(false),
        };
        (stream, subscriber)
    }

    /// Receive the next frame (blocking).
    pub fn recv(&self) -> std::result::Result<Signal<T>, RecvError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(RecvError);
        }
        let signal = self.receiver.recv()?;
        self.on_frame(&signal);
        Ok(signal)
    }

    /// Try to receive a frame (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<Signal<T>, TryRecvError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(TryRecvError::Disconnected);
        }
        let signal = self.receiver.try_recv()?;
        self.on_frame(&signal);
        Ok(signal)
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Signal<T>, RecvTimeoutError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(RecvTimeoutError::Disconnected);
        }
        let signal = self.receiver.recv_timeout(timeout)?;
        self.on_frame(&signal);
        Ok(signal)
    }

    /// Stop the sequence. Frames already buffered can still be read.
    pub fn cancel(&self) {
        self.subscriber.cancel_upstream();
    }

    /// Read every remaining item. Fails with the sequence's error, or with
    /// `Timeout` if it does not terminate within `timeout` (the subscription
    /// is then cancelled).
    pub fn collect_within(self, timeout: Duration) -> Result<Vec<T>> {
        let deadline = Instant::now() + timeout;
        let mut items = Vec::new();
        loop {
            let now = Instant::now();
            let received = if now >= deadline {
                Err(RecvTimeoutError::Timeout)
            } else {
                self.recv_timeout(deadline - now)
            };
            match received {
                Ok(Signal::Item(item)) => items.push(item),
                Ok(Signal::Complete) => return Ok(items),
                Ok(Signal::Error(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    self.cancel();
                    return Err(FlowError::Timeout(format!(
                        "no terminal signal within {:?} ({} items received)",
                        timeout,
                        items.len()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(FlowError::ProtocolViolation(
                        "sequence ended without a terminal signal".to_string(),
                    ));
                }
            }
        }
    }

    fn on_frame(&self, signal: &Signal<T>) {
        if signal.is_terminal() {
            self.finished.store(true, Ordering::Release);
        } else {
            self.subscriber.request_one();
        }
    }
}

impl<T: Send + 'static> Iterator for FrameStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        match self.recv() {
            Ok(Signal::Item(item)) => Some(Ok(item)),
            Ok(Signal::Error(e)) => Some(Err(e)),
            Ok(Signal::Complete) | Err(_) => None,
        }
    }
}

impl<T> Drop for FrameStream<T> {
    fn drop(&mut self) {
        let subscription = self.subscriber.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}
