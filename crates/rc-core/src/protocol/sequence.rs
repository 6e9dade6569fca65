//! Heartbeat sequence numbering.
//!
//! Each heartbeat carries a `seq` that increases by one.  The server echoes it
//! back in `heartbeat_ack`, which lets the agent match acknowledgements to
//! the heartbeat that caused them and spot gaps.
//!
//! The heartbeat timer task and the reconnect path can both touch the counter,
//! so it is an `AtomicU64` rather than a plain integer.  `Relaxed` ordering is
//! enough: the value orders messages, it does not guard other memory.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counter handing out 0, 1, 2, ... and wrapping at `u64::MAX`.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next number and advances the counter.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Peeks at the number the next call to [`next`](Self::next) will return.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}
