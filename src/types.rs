//! Core types for the streams runtime.

use crate::error::FlowError;
use std::fmt;

/// Demand value meaning "no limit". Once reached, demand stays unbounded.
pub const UNBOUNDED: u64 = u64::MAX;

/// One event in a subscription's lifetime.
#[derive(Clone, Debug)]
pub enum Signal<T> {
    /// A data element.
    Item(T),
    /// Successful end of the sequence.
    Complete,
    /// Failed end of the sequence.
    Error(FlowError),
}

impl<T> Signal<T> {
    /// Whether this signal ends the subscription.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Item(_))
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Signal::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&FlowError> {
        match self {
            Signal::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Terminal signal cached by multicast stages.
#[derive(Clone, Debug)]
pub enum Terminal {
    Complete,
    Error(FlowError),
}

impl Terminal {
    pub fn into_signal<T>(self) -> Signal<T> {
        match self {
            Terminal::Complete => Signal::Complete,
            Terminal::Error(e) => Signal::Error(e),
        }
    }
}

/// Identity of a subscriber attached to a multicast hub.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({})", self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connectable hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubPhase {
    /// Accepting subscribers, not yet pulling from upstream.
    Unconnected,
    /// Subscribed upstream and fanning out items.
    Connected,
    /// Upstream finished; late subscribers get the cached terminal signal.
    Terminated,
}

/// One page of a paged bulk fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page number.
    pub index: usize,
    /// Maximum number of records in the page.
    pub size: usize,
}

impl PageRequest {
    pub fn of(index: usize, size: usize) -> Self {
        Self { index, size }
    }

    pub fn next(self) -> Self {
        Self {
            index: self.index + 1,
            size: self.size,
        }
    }

    /// Offset of the first record in this page.
    pub fn offset(&self) -> usize {
        self.index * self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_terminal() {
        assert!(!Signal::Item(1).is_terminal());
        assert!(Signal::<i32>::Complete.is_terminal());
        assert!(Signal::<i32>::Error(FlowError::message("x")).is_terminal());
    }

    #[test]
    fn test_terminal_into_signal() {
        let signal: Signal<u8> = Terminal::Complete.into_signal();
        assert!(matches!(signal, Signal::Complete));
    }

    #[test]
    fn test_page_request() {
        let page = PageRequest::of(0, 50);
        assert_eq!(page.offset(), 0);
        let page = page.next().next();
        assert_eq!(page.index, 2);
        assert_eq!(page.offset(), 100);
    }
}
