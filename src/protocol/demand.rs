//! Outstanding-demand bookkeeping.

use crate::error::{FlowError, Result};
use crate::types::UNBOUNDED;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reject non-positive requests.
pub fn validate_demand(n: u64) -> Result<()> {
    if n == 0 {
        Err(FlowError::InvalidDemand(n))
    } else {
        Ok(())
    }
}

/// Add two demand values, capping at `UNBOUNDED`.
pub fn add_demand(current: u64, n: u64) -> u64 {
    if current == UNBOUNDED || n == UNBOUNDED {
        UNBOUNDED
    } else {
        current.saturating_add(n)
    }
}

/// Lock-free counter of items a subscriber has authorized but not yet
/// received.
#[derive(Debug, Default)]
pub struct DemandCounter {
    outstanding: AtomicU64,
}

impl DemandCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increase demand by `n`. Returns the previous value.
    pub fn add(&self, n: u64) -> u64 {
        match self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(add_demand(cur, n))
            }) {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// Spend one unit of demand. Returns false when none is outstanding.
    /// Unbounded demand is never decremented.
    pub fn try_consume(&self) -> bool {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| match cur {
                0 => None,
                UNBOUNDED => Some(UNBOUNDED),
                n => Some(n - 1),
            })
            .is_ok()
    }

    pub fn get(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(matches!(validate_demand(0), Err(FlowError::InvalidDemand(0))));
        assert!(validate_demand(1).is_ok());
    }

    #[test]
    fn test_add_and_consume() {
        let demand = DemandCounter::new();
        assert!(!demand.try_consume());

        demand.add(2);
        assert!(demand.try_consume());
        assert!(demand.try_consume());
        assert!(!demand.try_consume());
        assert_eq!(demand.get(), 0);
    }

    #[test]
    fn test_unbounded_is_sticky() {
        let demand = DemandCounter::new();
        demand.add(5);
        demand.add(UNBOUNDED);
        assert!(demand.is_unbounded());

        for _ in 0..100 {
            assert!(demand.try_consume());
        }
        demand.add(3);
        assert!(demand.is_unbounded());
    }

    #[test]
    fn test_add_saturates() {
        assert_eq!(add_demand(UNBOUNDED - 1, 10), UNBOUNDED);
        assert_eq!(add_demand(3, 4), 7);
    }
}
