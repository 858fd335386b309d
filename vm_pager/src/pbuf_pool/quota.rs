use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::warn;
use parking_lot::Condvar;

/// Per subsystem share of a pbuf pool.
///
/// A limited quota is a counter of buffers the subsystem may still lease plus its own
/// wait channel. The counter is only changed while the pool lock is held, so a quota
/// belongs to exactly one pool. Lease and release of a buffer have to pass the same quota.
///
/// Leased buffers keep a handle on the counter they were taken from, so that
/// a buffer dropped without `release` can still give its unit back.
pub enum Quota {
    Limited(Arc<QuotaCounter>),
    /// Never counted and never waited on
    Unlimited,
}

pub struct QuotaCounter {
    name: &'static str,
    limit: usize,
    available: AtomicUsize,

    /// leasers sleeping until `available > 0`, changed under the pool lock
    waiters: AtomicUsize,
    pub(super) wait: Condvar,
}

impl Quota {
    pub fn limited(name: &'static str, limit: usize) -> Quota {
        Quota::Limited(Arc::new(QuotaCounter {
            name,
            limit,
            available: AtomicUsize::new(limit),
            waiters: AtomicUsize::new(0),
            wait: Condvar::new(),
        }))
    }

    /// Buffers this quota still allows, `None` if unlimited
    pub fn available(&self) -> Option<usize> {
        match self {
            Quota::Limited(counter) => Some(counter.available()),
            Quota::Unlimited => None,
        }
    }

    /// Leasers sleeping on this quota, an unlimited quota is never waited on
    pub fn waiting(&self) -> usize {
        match self {
            Quota::Limited(counter) => counter.waiting(),
            Quota::Unlimited => 0,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Quota::Unlimited)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Quota::Limited(counter) => counter.name,
            Quota::Unlimited => "unlimited",
        }
    }
}

impl QuotaCounter {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Number of leasers currently sleeping on this quota
    #[inline]
    pub fn waiting(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    /// Counts a leaser that is about to sleep (`true`) or just woke up (`false`)
    pub(super) fn set_waiting(&self, sleeping: bool) {
        if sleeping {
            self.waiters.fetch_add(1, Ordering::AcqRel);
        } else {
            self.waiters.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Takes one unit, the pool lock is held and `available() > 0`
    pub(super) fn take(&self) {
        let prev = self.available.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "quota {} taken while exhausted", self.name);
    }

    /// Gives one unit back, the pool lock is held.
    ///
    /// Returns the value before the increment.
    pub(super) fn give(&self) -> usize {
        let prev = self.available.fetch_add(1, Ordering::AcqRel);
        if prev >= self.limit {
            warn!(
                "quota {} released more buffers than it leased ({} > {})",
                self.name,
                prev + 1,
                self.limit
            );
        }
        prev
    }
}

impl core::fmt::Debug for Quota {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Quota::Limited(counter) => f
                .debug_struct("Quota")
                .field("name", &counter.name)
                .field("limit", &counter.limit)
                .field("available", &counter.available())
                .field("waiting", &counter.waiting())
                .finish(),
            Quota::Unlimited => f.write_str("Quota::Unlimited"),
        }
    }
}
