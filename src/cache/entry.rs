//! Cache Entry Module
//!
//! Defines the per-key slot held by the lazy cache.

use chrono::{DateTime, Utc};
use futures::channel::oneshot;
use futures::future::Shared;

use crate::error::Result;

/// Receiving half of an initialization attempt, cloned once per waiter.
pub(crate) type Channel<V> = Shared<oneshot::Receiver<Result<V>>>;

// == Cache Entry ==
/// Slot for one key.
///
/// Absence from the table covers both "never started" and "last attempt
/// failed", so a failure is never replayed.
pub(crate) enum CacheEntry<V> {
    /// A factory call is running; joiners await `channel`.
    InFlight {
        attempt: u64,
        channel: Channel<V>,
        started_at: DateTime<Utc>,
    },
    /// The factory succeeded; the value is shared by every caller.
    Ready {
        value: V,
        initialized_at: DateTime<Utc>,
    },
}

impl<V> CacheEntry<V> {
    // == Constructors ==
    pub(crate) fn in_flight(attempt: u64, channel: Channel<V>) -> Self {
        Self::InFlight {
            attempt,
            channel,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn ready(value: V) -> Self {
        Self::Ready {
            value,
            initialized_at: Utc::now(),
        }
    }

    // == Attempt Check ==
    /// Returns true if this slot is the placeholder for `attempt`.
    pub(crate) fn is_attempt(&self, attempt: u64) -> bool {
        matches!(self, Self::InFlight { attempt: current, .. } if *current == attempt)
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    // == State ==
    /// Public, value-free view of the slot.
    pub(crate) fn state(&self) -> EntryState {
        match self {
            Self::InFlight { started_at, .. } => EntryState::InFlight {
                started_at: *started_at,
            },
            Self::Ready { initialized_at, .. } => EntryState::Ready {
                initialized_at: *initialized_at,
            },
        }
    }
}

// == Entry State ==
/// Observable state of a cached key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// An initialization attempt is running
    InFlight { started_at: DateTime<Utc> },
    /// A value is cached
    Ready { initialized_at: DateTime<Utc> },
}

impl EntryState {
    /// Returns true once a value is cached.
    pub fn is_ready(&self) -> bool {
        matches!(self, EntryState::Ready { .. })
    }
}
