//! Fixed-capacity connection pool with generation-tagged slot reuse.
//!
//! Every accepted socket and every listening socket lives in one slot. Handles given out by
//! the pool are `(index, generation)` pairs; the generation moves forward each time a slot is
//! handed out, so a handle or poll token issued for an earlier occupant resolves to nothing.
//!
//! Closing is two-phase. [`ConnectionPool::mark_for_close`] takes the socket out of the slot
//! right away, which is what event filtering looks at, and queues the slot for the recycler.
//! Only [`ConnectionPool::reclaim`], called by the recycler after the grace period, puts the
//! slot back on the free list.
//!
//! Each client slot also tracks the reply bytes it still owes its peer, counted from the moment
//! a handler queues a reply until the socket accepts it. Reading from the slot pauses at the
//! high write watermark and resumes once the count drains to the low one.

use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hps_common::error::{HpsError, HpsResult};
use hps_common::ids::{
    ConnectionRef, Generation, PoolCapacity, SessionSequence, SlotIndex, next_generation,
};
use hps_common::config::{DEFAULT_WRITE_HIGH_WATERMARK, DEFAULT_WRITE_LOW_WATERMARK};
use hps_facade::connection::FrameDecoder;
use hps_facade::protocol::MessageHeader;
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::debug;

use super::recycler::{RecycleEntry, RecycleList};

/// Socket owned by one slot.
#[derive(Debug)]
pub(crate) enum SlotSocket {
    Listener(TcpListener),
    Stream(TcpStream),
}

impl Source for SlotSocket {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Self::Listener(listener) => listener.register(registry, token, interests),
            Self::Stream(stream) => stream.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Self::Listener(listener) => listener.reregister(registry, token, interests),
            Self::Stream(stream) => stream.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Self::Listener(listener) => listener.deregister(registry),
            Self::Stream(stream) => stream.deregister(registry),
        }
    }
}

/// What a slot is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionRole {
    /// Bound to the listening endpoint on `port`.
    Listening { port: u16 },
    /// Accepted peer connection.
    Client,
}

/// Behaviour run on read readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadHandler {
    Accept,
    FrameAndDispatch,
}

/// Behaviour run on write readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteHandler {
    Ignore,
    FlushBacklog,
}

impl ConnectionRole {
    pub(crate) fn read_handler(self) -> ReadHandler {
        match self {
            Self::Listening { .. } => ReadHandler::Accept,
            Self::Client => ReadHandler::FrameAndDispatch,
        }
    }

    pub(crate) fn write_handler(self) -> WriteHandler {
        match self {
            Self::Listening { .. } => WriteHandler::Ignore,
            Self::Client => WriteHandler::FlushBacklog,
        }
    }
}

/// Pending reply byte levels that pause and resume reading from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteWatermarks {
    pub(crate) high: usize,
    pub(crate) low: usize,
}

impl Default for WriteWatermarks {
    fn default() -> Self {
        Self {
            high: DEFAULT_WRITE_HIGH_WATERMARK,
            low: DEFAULT_WRITE_LOW_WATERMARK,
        }
    }
}

/// Outcome of one read call on a client socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkRead {
    Fed,
    Drained,
    PeerClosed,
}

/// Mutable state of one slot, guarded by the slot mutex.
#[derive(Debug)]
pub(crate) struct SlotState {
    /// `None` while the slot is free or waiting for reclamation.
    pub(crate) socket: Option<SlotSocket>,
    pub(crate) generation: Generation,
    pub(crate) sequence: SessionSequence,
    pub(crate) role: ConnectionRole,
    pub(crate) interest: Option<Interest>,
    pub(crate) decoder: FrameDecoder,
    pub(crate) write_backlog: Vec<u8>,
    /// Reply bytes sitting in the send queue for the current session.
    pub(crate) queued_bytes: usize,
    pub(crate) read_paused: bool,
    pub(crate) watermarks: WriteWatermarks,
    pub(crate) pending_close_at: Option<Instant>,
}

impl SlotState {
    fn new(max_packet_len: u16) -> Self {
        Self {
            socket: None,
            generation: 0,
            sequence: 0,
            role: ConnectionRole::Client,
            interest: None,
            decoder: FrameDecoder::new(max_packet_len),
            write_backlog: Vec::new(),
            queued_bytes: 0,
            read_paused: false,
            watermarks: WriteWatermarks::default(),
            pending_close_at: None,
        }
    }

    fn clear_session(&mut self) {
        self.interest = None;
        self.decoder.reset();
        self.write_backlog.clear();
        self.queued_bytes = 0;
        self.read_paused = false;
    }

    fn is_live_for(&self, connection: ConnectionRef) -> bool {
        self.generation == connection.generation() && self.socket.is_some()
    }

    /// Reads one chunk into the frame decoder.
    pub(crate) fn read_chunk(&mut self, chunk: &mut [u8]) -> ChunkRead {
        let Some(SlotSocket::Stream(stream)) = self.socket.as_mut() else {
            return ChunkRead::Drained;
        };
        loop {
            match stream.read(chunk) {
                Ok(0) => return ChunkRead::PeerClosed,
                Ok(read_len) => {
                    self.decoder.feed_bytes(&chunk[..read_len]);
                    return ChunkRead::Fed;
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return ChunkRead::Drained;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    debug!(%error, "connection read failed");
                    return ChunkRead::PeerClosed;
                }
            }
        }
    }

    /// Reply bytes accepted for the current session and not yet taken by the socket.
    pub(crate) fn outbound_bytes(&self) -> usize {
        self.queued_bytes + self.write_backlog.len()
    }

    fn update_backpressure(&mut self) {
        let pending = self.outbound_bytes();
        if self.read_paused {
            if pending <= self.watermarks.low {
                self.read_paused = false;
            }
            return;
        }
        if pending >= self.watermarks.high {
            self.read_paused = true;
        }
    }

    /// Writes as much of the backlog as the socket accepts.
    ///
    /// Returns `Ok(true)` once the backlog is empty.
    pub(crate) fn flush_backlog(&mut self) -> io::Result<bool> {
        let Some(SlotSocket::Stream(stream)) = self.socket.as_mut() else {
            return Ok(self.write_backlog.is_empty());
        };
        while !self.write_backlog.is_empty() {
            match stream.write(&self.write_backlog) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(written) => {
                    let _ = self.write_backlog.drain(..written);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        Ok(true)
    }

    /// Re-arms poll interest: writable while a backlog is pending, readable unless reads are
    /// paused by pending replies.
    pub(crate) fn refresh_interest(
        &mut self,
        registry: &Registry,
        connection: ConnectionRef,
    ) -> io::Result<()> {
        self.update_backpressure();
        let wanted = if self.read_paused {
            Interest::WRITABLE
        } else if self.write_backlog.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if self.interest == Some(wanted) {
            return Ok(());
        }
        let Some(socket) = self.socket.as_mut() else {
            return Ok(());
        };
        registry.reregister(socket, Token(connection.to_token_value()), wanted)?;
        self.interest = Some(wanted);
        Ok(())
    }
}

#[derive(Debug)]
struct ConnectionSlot {
    state: Mutex<SlotState>,
    logic_lock: Mutex<()>,
}

/// Owner of every connection slot of one reactor.
#[derive(Debug)]
pub(crate) struct ConnectionPool {
    slots: Vec<ConnectionSlot>,
    free: Mutex<Vec<SlotIndex>>,
    recycle: RecycleList,
    capacity: PoolCapacity,
    recycle_wait: Duration,
    watermarks: WriteWatermarks,
}

impl ConnectionPool {
    pub(crate) fn new(capacity: PoolCapacity, max_packet_len: u16, recycle_wait: Duration) -> Self {
        let slots = (0..capacity.get())
            .map(|_| ConnectionSlot {
                state: Mutex::new(SlotState::new(max_packet_len)),
                logic_lock: Mutex::new(()),
            })
            .collect::<Vec<_>>();
        // Popped from the back, so slot 0 is handed out first.
        let free = (0..capacity.get()).rev().collect::<Vec<_>>();
        Self {
            slots,
            free: Mutex::new(free),
            recycle: RecycleList::default(),
            capacity,
            recycle_wait,
            watermarks: WriteWatermarks::default(),
        }
    }

    #[must_use]
    pub(crate) fn with_write_watermarks(mut self, watermarks: WriteWatermarks) -> Self {
        self.watermarks = watermarks;
        self
    }

    /// Slots not on the free list: live connections plus those awaiting reclamation.
    #[cfg(test)]
    pub(crate) fn in_use_count(&self) -> usize {
        self.free
            .lock()
            .map_or(self.capacity.get(), |free| self.capacity.get() - free.len())
    }

    pub(crate) fn recycle_list(&self) -> &RecycleList {
        &self.recycle
    }

    /// Places `socket` in a free slot, starting a new session there.
    ///
    /// On exhaustion the socket is dropped, which closes it.
    pub(crate) fn acquire(
        &self,
        socket: SlotSocket,
        role: ConnectionRole,
    ) -> HpsResult<ConnectionRef> {
        let mut free = self.free.lock().map_err(|_| poisoned())?;
        let Some(index) = free.pop() else {
            return Err(HpsError::PoolExhausted {
                capacity: self.capacity.get(),
            });
        };
        let mut state = self.lock_slot(index)?;
        state.generation = next_generation(state.generation);
        state.sequence = state.sequence.saturating_add(1);
        state.socket = Some(socket);
        state.role = role;
        state.clear_session();
        state.watermarks = self.watermarks;
        state.pending_close_at = None;
        Ok(ConnectionRef::new(index, state.generation))
    }

    /// Registers the slot socket with the poller under the handle's token.
    pub(crate) fn register(
        &self,
        connection: ConnectionRef,
        registry: &Registry,
        interest: Interest,
    ) -> HpsResult<()> {
        self.with_live_state(connection, |state| {
            let Some(socket) = state.socket.as_mut() else {
                return Err(HpsError::StaleConnection);
            };
            registry
                .register(socket, Token(connection.to_token_value()), interest)
                .map_err(|error| {
                    HpsError::Io(format!(
                        "register slot {} in poll failed: {error}",
                        connection.index()
                    ))
                })?;
            state.interest = Some(interest);
            Ok(())
        })?
    }

    /// Runs `f` on the slot state if `connection` still names a live session.
    pub(crate) fn with_live_state<R>(
        &self,
        connection: ConnectionRef,
        f: impl FnOnce(&mut SlotState) -> R,
    ) -> HpsResult<R> {
        let mut state = self.lock_slot(connection.index())?;
        if !state.is_live_for(connection) {
            return Err(HpsError::StaleConnection);
        }
        Ok(f(&mut state))
    }

    /// Maps a readiness token back to a live connection and its role.
    ///
    /// The generation check runs first: the slot may already host a new session whose socket
    /// is open, so the socket sentinel alone cannot tell old and new apart.
    pub(crate) fn resolve_event(&self, token: Token) -> Option<(ConnectionRef, ConnectionRole)> {
        let connection = ConnectionRef::from_token_value(token.0);
        let slot = self.slots.get(connection.index())?;
        let state = slot.state.lock().ok()?;
        if state.generation != connection.generation() {
            debug!(
                slot = connection.index(),
                event_generation = connection.generation(),
                slot_generation = state.generation,
                "dropping event for reused slot"
            );
            return None;
        }
        if state.socket.is_none() {
            debug!(slot = connection.index(), "dropping event for closed slot");
            return None;
        }
        Some((connection, state.role))
    }

    /// Counts a queued reply against the write budget of its session.
    ///
    /// Replies addressed to an ended session are not counted.
    pub(crate) fn reserve_outbound(&self, header: MessageHeader, len: usize) {
        let _ = self.with_live_state(header.connection, |state| {
            if state.sequence == header.sequence {
                state.queued_bytes += len;
            }
        });
    }

    /// Current session sequence, or `None` when the handle is stale.
    pub(crate) fn sequence_of(&self, connection: ConnectionRef) -> Option<SessionSequence> {
        let state = self.lock_slot(connection.index()).ok()?;
        state.is_live_for(connection).then_some(state.sequence)
    }

    /// Per-connection lock serializing business handlers of one slot.
    pub(crate) fn logic_lock(&self, connection: ConnectionRef) -> Option<&Mutex<()>> {
        self.slots
            .get(connection.index())
            .map(|slot| &slot.logic_lock)
    }

    /// Live client sessions, used to close everything at shutdown.
    pub(crate) fn live_clients(&self) -> Vec<ConnectionRef> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let state = slot.state.lock().ok()?;
                (state.socket.is_some() && state.role == ConnectionRole::Client)
                    .then(|| ConnectionRef::new(index, state.generation))
            })
            .collect()
    }

    /// Closes the socket of a live session and queues its slot for delayed reclamation.
    ///
    /// Returns `Ok(false)` when the slot was already marked. The session sequence moves
    /// forward here so replies still queued for this session are discarded.
    pub(crate) fn mark_for_close(
        &self,
        connection: ConnectionRef,
        registry: &Registry,
        now: Instant,
    ) -> HpsResult<bool> {
        {
            let mut state = self.lock_slot(connection.index())?;
            if state.generation != connection.generation() {
                return Err(HpsError::StaleConnection);
            }
            let Some(mut socket) = state.socket.take() else {
                return Ok(false);
            };
            if let Err(error) = registry.deregister(&mut socket) {
                debug!(slot = connection.index(), %error, "deregister on close failed");
            }
            drop(socket);
            state.sequence = state.sequence.saturating_add(1);
            state.pending_close_at = Some(now);
            state.clear_session();
        }
        self.recycle.push(RecycleEntry {
            connection,
            eligible_at: now + self.recycle_wait,
        })?;
        Ok(true)
    }

    /// Returns a slot marked by [`ConnectionPool::mark_for_close`] to the free list.
    pub(crate) fn reclaim(&self, connection: ConnectionRef) -> HpsResult<()> {
        let mut free = self.free.lock().map_err(|_| poisoned())?;
        let mut state = self.lock_slot(connection.index())?;
        if state.generation != connection.generation() || state.pending_close_at.is_none() {
            return Err(HpsError::InvalidState("slot is not waiting for reclamation"));
        }
        state.pending_close_at = None;
        free.push(connection.index());
        Ok(())
    }

    fn lock_slot(&self, index: SlotIndex) -> HpsResult<MutexGuard<'_, SlotState>> {
        let slot = self
            .slots
            .get(index)
            .ok_or(HpsError::InvalidState("slot index is out of range"))?;
        slot.state.lock().map_err(|_| poisoned())
    }
}

fn poisoned() -> HpsError {
    HpsError::InvalidState("connection pool mutex is poisoned")
}

#[cfg(test)]
mod tests {
    use super::{
        ConnectionPool, ConnectionRole, ReadHandler, SlotSocket, WriteHandler, WriteWatermarks,
    };
    use crate::network::recycler::reclaim_all;
    use crate::network::testkit::accepted_pair;
    use googletest::prelude::*;
    use hps_common::error::HpsError;
    use hps_common::ids::PoolCapacity;
    use hps_facade::protocol::MessageHeader;
    use mio::{Interest, Poll, Token};
    use rstest::rstest;
    use std::time::{Duration, Instant};

    fn pool(capacity: usize) -> ConnectionPool {
        ConnectionPool::new(
            PoolCapacity::new(capacity).expect("capacity should be valid"),
            1024,
            Duration::from_secs(60),
        )
    }

    fn client_socket() -> SlotSocket {
        let (_client, server) = accepted_pair();
        SlotSocket::Stream(server)
    }

    #[rstest]
    fn roles_select_handlers() {
        let listening = ConnectionRole::Listening { port: 80 };
        assert_that!(listening.read_handler(), eq(ReadHandler::Accept));
        assert_that!(listening.write_handler(), eq(WriteHandler::Ignore));
        assert_that!(
            ConnectionRole::Client.read_handler(),
            eq(ReadHandler::FrameAndDispatch)
        );
        assert_that!(
            ConnectionRole::Client.write_handler(),
            eq(WriteHandler::FlushBacklog)
        );
    }

    #[rstest]
    fn acquire_fails_once_capacity_is_reached() {
        let pool = pool(2);
        let _first = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("first slot should be free");
        let _second = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("second slot should be free");

        let third = pool.acquire(client_socket(), ConnectionRole::Client);
        assert_eq!(third.err(), Some(HpsError::PoolExhausted { capacity: 2 }));
        assert_that!(pool.in_use_count(), eq(2));
    }

    #[rstest]
    fn sequence_strictly_increases_across_reuse() {
        let poll = Poll::new().expect("poll should be creatable");
        let pool = pool(1);
        let mut last_sequence = 0;
        for _ in 0..4 {
            let connection = pool
                .acquire(client_socket(), ConnectionRole::Client)
                .expect("single slot should be free again");
            let sequence = pool
                .sequence_of(connection)
                .expect("fresh handle should be live");
            assert_that!(sequence > last_sequence, eq(true));
            last_sequence = sequence;

            let _ = pool
                .mark_for_close(connection, poll.registry(), Instant::now())
                .expect("live connection should close");
            let _ = reclaim_all(&pool).expect("reclaim should succeed");
        }
    }

    #[rstest]
    fn marked_slot_rejects_events_before_reclamation() {
        let poll = Poll::new().expect("poll should be creatable");
        let pool = pool(2);
        let connection = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        let token = Token(connection.to_token_value());
        assert_that!(pool.resolve_event(token).is_some(), eq(true));

        let marked = pool
            .mark_for_close(connection, poll.registry(), Instant::now())
            .expect("live connection should close");
        assert_that!(marked, eq(true));

        // Same generation, but the socket sentinel is already cleared.
        assert_that!(pool.resolve_event(token).is_none(), eq(true));
        assert_that!(pool.sequence_of(connection), eq(None));
        assert_that!(pool.in_use_count(), eq(1));
    }

    #[rstest]
    fn reused_slot_rejects_tokens_of_previous_occupant() {
        let poll = Poll::new().expect("poll should be creatable");
        let pool = pool(1);
        let old = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        let _ = pool
            .mark_for_close(old, poll.registry(), Instant::now())
            .expect("live connection should close");
        let _ = reclaim_all(&pool).expect("reclaim should succeed");

        let new = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("reclaimed slot should be free");
        assert_that!(new.index(), eq(old.index()));
        assert_that!(
            pool.resolve_event(Token(old.to_token_value())).is_none(),
            eq(true)
        );
        assert_that!(
            pool.resolve_event(Token(new.to_token_value())),
            eq(Some((new, ConnectionRole::Client)))
        );
    }

    #[rstest]
    fn second_mark_is_a_no_op() {
        let poll = Poll::new().expect("poll should be creatable");
        let pool = pool(1);
        let connection = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        let now = Instant::now();
        assert_eq!(pool.mark_for_close(connection, poll.registry(), now), Ok(true));
        assert_eq!(pool.mark_for_close(connection, poll.registry(), now), Ok(false));
        assert_that!(pool.recycle_list().len(), eq(1));
    }

    #[rstest]
    fn reclaim_refuses_live_slot() {
        let pool = pool(1);
        let connection = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        assert_that!(pool.reclaim(connection).is_err(), eq(true));
        assert_that!(pool.in_use_count(), eq(1));
    }

    #[rstest]
    fn register_records_interest() {
        let poll = Poll::new().expect("poll should be creatable");
        let pool = pool(1);
        let connection = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        pool.register(connection, poll.registry(), Interest::READABLE)
            .expect("registration should succeed");
        let interest = pool
            .with_live_state(connection, |state| state.interest)
            .expect("handle should be live");
        assert_that!(interest, eq(Some(Interest::READABLE)));
    }

    #[rstest]
    fn live_clients_skips_listeners_and_closed_slots() {
        let poll = Poll::new().expect("poll should be creatable");
        let pool = pool(3);
        let listener = mio::net::TcpListener::bind("127.0.0.1:0".parse().expect("addr parses"))
            .expect("listener should bind");
        let _ = pool
            .acquire(
                SlotSocket::Listener(listener),
                ConnectionRole::Listening { port: 0 },
            )
            .expect("slot should be free");
        let open = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        let closed = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        let _ = pool
            .mark_for_close(closed, poll.registry(), Instant::now())
            .expect("live connection should close");

        assert_eq!(pool.live_clients(), vec![open]);
    }

    #[rstest]
    fn reads_pause_at_high_watermark_and_resume_at_low() {
        let poll = Poll::new().expect("poll should be creatable");
        let pool = pool(1).with_write_watermarks(WriteWatermarks { high: 100, low: 40 });
        let connection = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        pool.register(connection, poll.registry(), Interest::READABLE)
            .expect("registration should succeed");
        let sequence = pool.sequence_of(connection).expect("handle should be live");
        let header = MessageHeader {
            connection,
            sequence,
        };
        let refresh = |pool: &ConnectionPool| {
            pool.with_live_state(connection, |state| {
                state
                    .refresh_interest(poll.registry(), connection)
                    .expect("reregister should succeed");
                (state.read_paused, state.interest)
            })
            .expect("handle should be live")
        };

        pool.reserve_outbound(header, 60);
        assert_that!(refresh(&pool), eq((false, Some(Interest::READABLE))));

        pool.reserve_outbound(header, 60);
        assert_that!(refresh(&pool), eq((true, Some(Interest::WRITABLE))));

        // Replies addressed to an earlier session do not count.
        pool.reserve_outbound(
            MessageHeader {
                connection,
                sequence: sequence - 1,
            },
            500,
        );
        let _ = pool.with_live_state(connection, |state| state.queued_bytes -= 70);
        assert_that!(refresh(&pool), eq((true, Some(Interest::WRITABLE))));

        let _ = pool.with_live_state(connection, |state| state.queued_bytes -= 20);
        assert_that!(refresh(&pool), eq((false, Some(Interest::READABLE))));
    }

    #[rstest]
    fn close_forgets_pending_reply_bytes() {
        let poll = Poll::new().expect("poll should be creatable");
        let pool = pool(1).with_write_watermarks(WriteWatermarks { high: 10, low: 5 });
        let old = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("slot should be free");
        let sequence = pool.sequence_of(old).expect("handle should be live");
        pool.reserve_outbound(
            MessageHeader {
                connection: old,
                sequence,
            },
            64,
        );
        let _ = pool
            .mark_for_close(old, poll.registry(), Instant::now())
            .expect("live connection should close");
        let _ = reclaim_all(&pool).expect("reclaim should succeed");

        let new = pool
            .acquire(client_socket(), ConnectionRole::Client)
            .expect("reclaimed slot should be free");
        let (outbound, paused) = pool
            .with_live_state(new, |state| (state.outbound_bytes(), state.read_paused))
            .expect("handle should be live");
        assert_that!(outbound, eq(0));
        assert_that!(paused, eq(false));
    }
}
