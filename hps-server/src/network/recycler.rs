//! Delayed reclamation of closed connection slots.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use hps_common::error::{HpsError, HpsResult};
use hps_common::ids::ConnectionRef;
use tracing::{debug, error, warn};

use super::pool::ConnectionPool;

/// Slot waiting out its grace period after close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecycleEntry {
    pub(crate) connection: ConnectionRef,
    /// Earliest instant the slot may return to the free list.
    pub(crate) eligible_at: Instant,
}

/// FIFO of closed slots. Entries are pushed in close order with a fixed wait, so they also
/// become eligible in order.
#[derive(Debug, Default)]
pub(crate) struct RecycleList {
    entries: Mutex<VecDeque<RecycleEntry>>,
}

impl RecycleList {
    pub(crate) fn push(&self, entry: RecycleEntry) -> HpsResult<()> {
        self.entries
            .lock()
            .map_err(|_| poisoned())?
            .push_back(entry);
        Ok(())
    }

    fn pop_due(&self, now: Instant) -> HpsResult<Option<RecycleEntry>> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        if entries.front().is_some_and(|entry| entry.eligible_at <= now) {
            return Ok(entries.pop_front());
        }
        Ok(None)
    }

    fn pop_any(&self) -> HpsResult<Option<RecycleEntry>> {
        Ok(self.entries.lock().map_err(|_| poisoned())?.pop_front())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }
}

/// Returns every slot whose grace period ended at or before `now` to the free list.
pub(crate) fn reclaim_due(pool: &ConnectionPool, now: Instant) -> HpsResult<usize> {
    let mut reclaimed = 0;
    while let Some(entry) = pool.recycle_list().pop_due(now)? {
        if reclaim_entry(pool, entry) {
            reclaimed += 1;
        }
    }
    Ok(reclaimed)
}

/// Returns every queued slot to the free list regardless of its grace period.
pub(crate) fn reclaim_all(pool: &ConnectionPool) -> HpsResult<usize> {
    let mut reclaimed = 0;
    while let Some(entry) = pool.recycle_list().pop_any()? {
        if reclaim_entry(pool, entry) {
            reclaimed += 1;
        }
    }
    Ok(reclaimed)
}

fn reclaim_entry(pool: &ConnectionPool, entry: RecycleEntry) -> bool {
    match pool.reclaim(entry.connection) {
        Ok(()) => {
            debug!(slot = entry.connection.index(), "slot returned to pool");
            true
        }
        Err(error) => {
            warn!(slot = entry.connection.index(), %error, "slot reclamation skipped");
            false
        }
    }
}

/// Body of the recycler thread.
///
/// Wakes every `period` (or when unparked), reclaims due slots, and drains the whole list once
/// `shutdown` is set.
pub(crate) fn run_recycler(pool: &ConnectionPool, period: Duration, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Acquire) {
        std::thread::park_timeout(period);
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        if let Err(error) = reclaim_due(pool, Instant::now()) {
            error!(%error, "recycler stopped");
            return;
        }
    }
    match reclaim_all(pool) {
        Ok(reclaimed) => debug!(reclaimed, "recycler drained on shutdown"),
        Err(error) => error!(%error, "recycler drain failed"),
    }
}

fn poisoned() -> HpsError {
    HpsError::InvalidState("recycle list mutex is poisoned")
}
