//! Outbound reply queue and the sender thread that drains it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use hps_common::error::{HpsError, HpsResult};
use hps_core::dispatch::MessageSink;
use hps_facade::protocol::OutboundMessage;
use mio::Registry;
use tracing::{debug, error, warn};

use super::pool::ConnectionPool;

/// FIFO of encoded replies shared by handlers (producers) and the sender thread.
#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    entries: Mutex<VecDeque<OutboundMessage>>,
    ready: Condvar,
}

impl SendQueue {
    pub(crate) fn enqueue(&self, message: OutboundMessage) -> HpsResult<()> {
        self.entries
            .lock()
            .map_err(|_| poisoned())?
            .push_back(message);
        self.ready.notify_one();
        Ok(())
    }

    /// Waits up to `timeout` for the next message.
    pub(crate) fn wait_pop(&self, timeout: Duration) -> HpsResult<Option<OutboundMessage>> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        let (mut entries, _) = self
            .ready
            .wait_timeout_while(entries, timeout, |entries| entries.is_empty())
            .map_err(|_| poisoned())?;
        Ok(entries.pop_front())
    }

    pub(crate) fn drain(&self) -> HpsResult<Vec<OutboundMessage>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| poisoned())?
            .drain(..)
            .collect())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Wakes a sender blocked in [`SendQueue::wait_pop`].
    pub(crate) fn wake(&self) {
        self.ready.notify_all();
    }
}

impl MessageSink for SendQueue {
    fn send_msg(&self, message: OutboundMessage) -> HpsResult<()> {
        self.enqueue(message)
    }
}

/// Sink handed to handlers by the reactor: counts each reply against its connection's write
/// budget before queueing it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReplySink<'a> {
    queue: &'a SendQueue,
    pool: &'a ConnectionPool,
}

impl<'a> ReplySink<'a> {
    pub(crate) fn new(queue: &'a SendQueue, pool: &'a ConnectionPool) -> Self {
        Self { queue, pool }
    }
}

impl MessageSink for ReplySink<'_> {
    fn send_msg(&self, message: OutboundMessage) -> HpsResult<()> {
        self.pool.reserve_outbound(message.header, message.packet.len());
        self.queue.enqueue(message)
    }
}

/// Result of handing one reply to its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Fully written to the socket.
    Written,
    /// Partly or wholly left in the slot backlog; write interest is armed.
    Backlogged,
    /// Target slot was closed or reused.
    StaleConnection,
    /// Target slot hosts the same socket but the session ended.
    StaleSession,
    /// Write failed; the connection was closed.
    Failed,
}

/// Writes one reply to its connection if the session that produced it is still current.
///
/// Replies that cannot be written immediately go to the slot backlog, which the reactor drains
/// on write readiness. Appending behind an existing backlog keeps per-connection order.
pub(crate) fn deliver(
    pool: &ConnectionPool,
    registry: &Registry,
    message: &OutboundMessage,
) -> Delivery {
    let target = message.header.connection;
    let outcome = pool.with_live_state(target, |state| {
        if state.sequence != message.header.sequence {
            return Delivery::StaleSession;
        }
        state.queued_bytes = state.queued_bytes.saturating_sub(message.packet.len());
        state.write_backlog.extend_from_slice(&message.packet);
        let flushed = match state.flush_backlog() {
            Ok(flushed) => flushed,
            Err(error) => {
                debug!(slot = target.index(), %error, "reply write failed");
                return Delivery::Failed;
            }
        };
        // Also resumes reads paused by this session's pending replies.
        if let Err(error) = state.refresh_interest(registry, target) {
            warn!(slot = target.index(), %error, "re-arming interest failed");
            return Delivery::Failed;
        }
        if flushed {
            Delivery::Written
        } else {
            Delivery::Backlogged
        }
    });

    let delivery = match outcome {
        Ok(delivery) => delivery,
        Err(HpsError::StaleConnection) => Delivery::StaleConnection,
        Err(error) => {
            error!(slot = target.index(), %error, "reply delivery failed");
            return Delivery::Failed;
        }
    };
    match delivery {
        Delivery::StaleConnection | Delivery::StaleSession => {
            debug!(slot = target.index(), ?delivery, "dropping reply for ended session");
        }
        Delivery::Failed => {
            if let Err(error) = pool.mark_for_close(target, registry, Instant::now()) {
                debug!(slot = target.index(), %error, "close after write failure skipped");
            }
        }
        Delivery::Written | Delivery::Backlogged => {}
    }
    delivery
}

/// Body of the sender thread.
///
/// Pops replies until `shutdown` is set, then delivers whatever is still queued.
pub(crate) fn run_sender(
    queue: &SendQueue,
    pool: &ConnectionPool,
    registry: &Registry,
    wait: Duration,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Acquire) {
        match queue.wait_pop(wait) {
            Ok(Some(message)) => {
                let _ = deliver(pool, registry, &message);
            }
            Ok(None) => {}
            Err(error) => {
                error!(%error, "sender stopped");
                return;
            }
        }
    }
    match queue.drain() {
        Ok(remaining) => {
            let count = remaining.len();
            for message in &remaining {
                let _ = deliver(pool, registry, message);
            }
            debug!(count, "sender drained on shutdown");
        }
        Err(error) => error!(%error, "sender drain failed"),
    }
}

fn poisoned() -> HpsError {
    HpsError::InvalidState("send queue mutex is poisoned")
}
