//! Readiness-driven reactor for the packet server.
//!
//! One thread owns the `mio::Poll` instance, accepts connections and frames inbound bytes.
//! Replies travel through the [`send_queue`] to a sender thread, and closed slots wait in the
//! [`recycler`] before they can host a new session. Every poll token carries the slot index
//! and the slot generation, so events queued for a previous occupant are discarded.
//!
//! A client that does not read its replies stops being read once its pending reply bytes reach
//! the high write watermark; reading resumes after they drain to the low watermark.

pub(crate) mod listener;
pub(crate) mod pool;
pub(crate) mod recycler;
pub(crate) mod send_queue;
#[cfg(test)]
pub(crate) mod testkit;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hps_common::config::ServerConfig;
use hps_common::error::{HpsError, HpsResult};
use hps_common::ids::ConnectionRef;
use hps_facade::protocol::{InboundMessage, MessageHeader};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, info, warn};

use crate::app::ServerApp;
use crate::ingress::ingress_message;

pub use listener::ListeningEndpoint;
pub(crate) use pool::ConnectionPool;
use pool::{
    ChunkRead, ConnectionRole, ReadHandler, SlotSocket, SlotState, WriteHandler, WriteWatermarks,
};
use send_queue::{ReplySink, SendQueue};

const READ_CHUNK_BYTES: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerReactorConfig {
    pub max_events: usize,
    pub poll_timeout: Duration,
    /// Longest the sender thread blocks before re-checking the shutdown flag.
    pub sender_wait: Duration,
    pub recycle_period: Duration,
    pub write_high_watermark_bytes: usize,
    pub write_low_watermark_bytes: usize,
}

impl ServerReactorConfig {
    #[must_use]
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            max_events: config.worker_connections,
            poll_timeout: config.poll_timeout,
            sender_wait: config.recycle_period,
            recycle_period: config.recycle_period,
            write_high_watermark_bytes: config.write_high_watermark,
            write_low_watermark_bytes: config.write_low_watermark,
        }
    }

    #[must_use]
    pub fn normalized_max_events(self) -> usize {
        self.max_events.max(64)
    }

    /// Watermarks with the low mark forced below a non-zero high mark.
    #[must_use]
    pub fn normalized_write_watermarks(self) -> (usize, usize) {
        let high = self.write_high_watermark_bytes.max(1);
        let low = self.write_low_watermark_bytes.min(high - 1);
        (high, low)
    }
}

#[derive(Debug, Clone, Copy)]
struct EventSnapshot {
    token: Token,
    flags: u8,
}

const EVENT_FLAG_READABLE: u8 = 1_u8 << 0;
const EVENT_FLAG_WRITABLE: u8 = 1_u8 << 1;
const EVENT_FLAG_READ_CLOSED: u8 = 1_u8 << 2;
const EVENT_FLAG_WRITE_CLOSED: u8 = 1_u8 << 3;
const EVENT_FLAG_ERROR: u8 = 1_u8 << 4;

impl EventSnapshot {
    fn from_mio_event(event: &mio::event::Event) -> Self {
        let mut flags = 0_u8;
        if event.is_readable() {
            flags |= EVENT_FLAG_READABLE;
        }
        if event.is_writable() {
            flags |= EVENT_FLAG_WRITABLE;
        }
        if event.is_read_closed() {
            flags |= EVENT_FLAG_READ_CLOSED;
        }
        if event.is_write_closed() {
            flags |= EVENT_FLAG_WRITE_CLOSED;
        }
        if event.is_error() {
            flags |= EVENT_FLAG_ERROR;
        }
        Self {
            token: event.token(),
            flags,
        }
    }

    fn readable(self) -> bool {
        (self.flags & EVENT_FLAG_READABLE) != 0
    }

    fn writable(self) -> bool {
        (self.flags & EVENT_FLAG_WRITABLE) != 0
    }

    fn closed_or_error(self) -> bool {
        (self.flags & (EVENT_FLAG_READ_CLOSED | EVENT_FLAG_WRITE_CLOSED | EVENT_FLAG_ERROR)) != 0
    }
}

/// Packets framed from one read chunk of a client connection.
#[derive(Debug, Default)]
struct ReadTurn {
    messages: Vec<InboundMessage>,
    outcome: TurnOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum TurnOutcome {
    #[default]
    MoreInput,
    Drained,
    /// Pending replies reached the high watermark; input stays in the kernel buffer.
    Paused,
    PeerClosed,
}

#[derive(Debug)]
struct BackgroundWorkers {
    sender: JoinHandle<()>,
    recycler: JoinHandle<()>,
}

/// Reactor owning the listeners, the connection pool and the background threads.
#[derive(Debug)]
pub struct ServerReactor {
    poll: Poll,
    events: Events,
    config: ServerReactorConfig,
    endpoints: Vec<ListeningEndpoint>,
    pool: Arc<ConnectionPool>,
    send_queue: Arc<SendQueue>,
    shutdown_flag: Arc<AtomicBool>,
    workers: Option<BackgroundWorkers>,
    stopped: bool,
}

impl ServerReactor {
    /// Opens every configured listener and places it in the connection pool.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::Listen` when a port cannot be opened, `HpsError::InvalidConfig` for
    /// an unusable pool size and `HpsError::Io` when the poller cannot be created.
    pub fn bind(app: &ServerApp) -> HpsResult<Self> {
        let config = ServerReactorConfig::from_server_config(&app.config);
        let capacity = app.config.pool_capacity()?;
        let poll =
            Poll::new().map_err(|error| HpsError::Io(format!("create poll failed: {error}")))?;
        let bound = listener::open_listening_sockets(&app.facade.listen_ports)?;

        let (high, low) = config.normalized_write_watermarks();
        let pool = Arc::new(
            ConnectionPool::new(capacity, app.facade.max_packet_len, app.config.recycle_wait)
                .with_write_watermarks(WriteWatermarks { high, low }),
        );
        let mut endpoints = Vec::with_capacity(bound.len());
        for listener in bound {
            let connection = pool.acquire(
                SlotSocket::Listener(listener.socket),
                ConnectionRole::Listening {
                    port: listener.port,
                },
            )?;
            pool.register(connection, poll.registry(), Interest::READABLE)?;
            endpoints.push(ListeningEndpoint {
                port: listener.port,
                local_addr: listener.local_addr,
                connection,
            });
        }

        Ok(Self {
            poll,
            events: Events::with_capacity(config.normalized_max_events()),
            config,
            endpoints,
            pool,
            send_queue: Arc::new(SendQueue::default()),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            workers: None,
            stopped: false,
        })
    }

    /// Listening endpoints in configuration order.
    #[must_use]
    pub fn endpoints(&self) -> &[ListeningEndpoint] {
        &self.endpoints
    }

    /// Flag that stops [`ServerReactor::run`] and the background threads once set.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    /// Starts the sender and recycler threads.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::InvalidState` when called twice and `HpsError::Io` when the poll
    /// registry cannot be shared or a thread cannot be spawned.
    pub fn start_background(&mut self) -> HpsResult<()> {
        if self.workers.is_some() {
            return Err(HpsError::InvalidState("background threads already started"));
        }
        let registry = self
            .poll
            .registry()
            .try_clone()
            .map_err(|error| HpsError::Io(format!("clone poll registry failed: {error}")))?;

        let sender = {
            let queue = Arc::clone(&self.send_queue);
            let pool = Arc::clone(&self.pool);
            let shutdown = Arc::clone(&self.shutdown_flag);
            let wait = self.config.sender_wait;
            std::thread::Builder::new()
                .name("hps-sender".into())
                .spawn(move || {
                    send_queue::run_sender(&queue, &pool, &registry, wait, &shutdown);
                })
                .map_err(|error| HpsError::Io(format!("spawn sender failed: {error}")))?
        };
        let recycler = {
            let pool = Arc::clone(&self.pool);
            let shutdown = Arc::clone(&self.shutdown_flag);
            let period = self.config.recycle_period;
            std::thread::Builder::new()
                .name("hps-recycler".into())
                .spawn(move || recycler::run_recycler(&pool, period, &shutdown))
                .map_err(|error| HpsError::Io(format!("spawn recycler failed: {error}")))?
        };
        self.workers = Some(BackgroundWorkers { sender, recycler });
        Ok(())
    }

    /// Runs readiness cycles until the shutdown flag is set, then stops the reactor.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::InvalidState` when shared pool state is poisoned.
    pub fn run(&mut self, app: &ServerApp) -> HpsResult<()> {
        let timeout = Some(self.config.poll_timeout);
        while !self.shutdown_flag.load(Ordering::Acquire) {
            let _ = self.poll_once(app, timeout)?;
        }
        self.shutdown();
        Ok(())
    }

    /// Waits for readiness once and handles every delivered event.
    ///
    /// A failed wait is logged and counted as an empty cycle.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::InvalidState` when shared pool state is poisoned.
    pub fn poll_once(&mut self, app: &ServerApp, timeout: Option<Duration>) -> HpsResult<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(error) => {
                warn!(%error, "readiness wait failed");
                return Ok(0);
            }
        }
        let snapshots = self
            .events
            .iter()
            .map(EventSnapshot::from_mio_event)
            .collect::<Vec<_>>();

        for snapshot in &snapshots {
            self.handle_event(app, *snapshot)?;
        }
        Ok(snapshots.len())
    }

    fn handle_event(&self, app: &ServerApp, snapshot: EventSnapshot) -> HpsResult<()> {
        let Some((connection, role)) = self.pool.resolve_event(snapshot.token) else {
            return Ok(());
        };

        if snapshot.readable() || snapshot.closed_or_error() {
            match role.read_handler() {
                ReadHandler::Accept => self.accept_new_connections(connection)?,
                ReadHandler::FrameAndDispatch => {
                    self.read_and_dispatch(app, connection, snapshot.closed_or_error())?;
                }
            }
        }
        if snapshot.writable() && role.write_handler() == WriteHandler::FlushBacklog {
            self.flush_connection_writes(connection)?;
        }
        Ok(())
    }

    fn accept_new_connections(&self, listener: ConnectionRef) -> HpsResult<()> {
        loop {
            let accepted = ignore_stale(self.pool.with_live_state(listener, |state| {
                match state.socket.as_mut() {
                    Some(SlotSocket::Listener(socket)) => Some(socket.accept()),
                    _ => None,
                }
            }))?;
            let Some(accepted) = accepted.flatten() else {
                return Ok(());
            };

            match accepted {
                Ok((socket, peer)) => self.admit_connection(socket, peer)?,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(%error, "accept failed");
                    return Ok(());
                }
            }
        }
    }

    fn admit_connection(&self, socket: TcpStream, peer: SocketAddr) -> HpsResult<()> {
        let _ = socket.set_nodelay(true);
        match self
            .pool
            .acquire(SlotSocket::Stream(socket), ConnectionRole::Client)
        {
            Ok(connection) => {
                if let Err(error) =
                    self.pool
                        .register(connection, self.poll.registry(), Interest::READABLE)
                {
                    warn!(%peer, %error, "registering accepted connection failed");
                    self.close_connection(connection)?;
                    return Ok(());
                }
                debug!(%peer, slot = connection.index(), "connection accepted");
                Ok(())
            }
            Err(HpsError::PoolExhausted { capacity }) => {
                warn!(%peer, capacity, "connection pool exhausted, rejecting peer");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn read_and_dispatch(
        &self,
        app: &ServerApp,
        connection: ConnectionRef,
        hangup: bool,
    ) -> HpsResult<()> {
        let registry = self.poll.registry();
        let sink = ReplySink::new(&self.send_queue, &self.pool);
        let mut chunk = [0_u8; READ_CHUNK_BYTES];
        loop {
            let Some(turn) = ignore_stale(self.pool.with_live_state(connection, |state| {
                read_turn(state, connection, registry, &mut chunk)
            }))?
            else {
                return Ok(());
            };

            // Slot lock is released here; handlers take the logic lock instead.
            for message in turn.messages {
                let _ = ingress_message(app, &self.pool, &sink, message);
            }
            match turn.outcome {
                TurnOutcome::MoreInput => {}
                TurnOutcome::Drained | TurnOutcome::Paused => break,
                TurnOutcome::PeerClosed => return self.close_connection(connection),
            }
        }
        if hangup {
            self.close_connection(connection)?;
        }
        Ok(())
    }

    fn flush_connection_writes(&self, connection: ConnectionRef) -> HpsResult<()> {
        let registry = self.poll.registry();
        let flushed = ignore_stale(self.pool.with_live_state(connection, |state| {
            state.flush_backlog()?;
            state.refresh_interest(registry, connection)
        }))?;
        if let Some(Err(error)) = flushed {
            debug!(slot = connection.index(), %error, "flushing backlog failed");
            self.close_connection(connection)?;
        }
        Ok(())
    }

    fn close_connection(&self, connection: ConnectionRef) -> HpsResult<()> {
        match self
            .pool
            .mark_for_close(connection, self.poll.registry(), Instant::now())
        {
            Ok(true) => {
                debug!(slot = connection.index(), "connection closed, slot awaiting recycle");
                Ok(())
            }
            Ok(false) | Err(HpsError::StaleConnection) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Stops the background threads and closes every client connection.
    ///
    /// Queued replies are delivered first, then sessions are closed and every slot is reclaimed.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.shutdown_flag.store(true, Ordering::Release);
        self.send_queue.wake();

        let workers = self.workers.take();
        let recycler = match workers {
            Some(BackgroundWorkers { sender, recycler }) => {
                if sender.join().is_err() {
                    warn!("sender thread panicked");
                }
                Some(recycler)
            }
            None => {
                if let Ok(remaining) = self.send_queue.drain() {
                    for message in &remaining {
                        let _ = send_queue::deliver(&self.pool, self.poll.registry(), message);
                    }
                }
                None
            }
        };

        for connection in self.pool.live_clients() {
            if let Err(error) = self.close_connection(connection) {
                warn!(slot = connection.index(), %error, "closing connection on shutdown failed");
            }
        }
        if let Some(recycler) = recycler {
            recycler.thread().unpark();
            if recycler.join().is_err() {
                warn!("recycler thread panicked");
            }
        }
        // Connections closed above may postdate the recycler's final drain.
        match recycler::reclaim_all(&self.pool) {
            Ok(reclaimed) => info!(reclaimed, "reactor stopped"),
            Err(error) => warn!(%error, "final slot reclamation failed"),
        }
    }
}

impl Drop for ServerReactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reads one chunk from a client unless its pending replies pause reading, then frames every
/// complete packet.
fn read_turn(
    state: &mut SlotState,
    connection: ConnectionRef,
    registry: &Registry,
    chunk: &mut [u8],
) -> ReadTurn {
    let mut turn = ReadTurn::default();
    if let Err(error) = state.refresh_interest(registry, connection) {
        debug!(slot = connection.index(), %error, "re-arming interest failed");
        turn.outcome = TurnOutcome::PeerClosed;
        return turn;
    }
    if state.read_paused {
        debug!(
            slot = connection.index(),
            pending = state.outbound_bytes(),
            "reads paused until replies drain"
        );
        turn.outcome = TurnOutcome::Paused;
        return turn;
    }

    turn.outcome = match state.read_chunk(chunk) {
        ChunkRead::Fed => TurnOutcome::MoreInput,
        ChunkRead::Drained => TurnOutcome::Drained,
        ChunkRead::PeerClosed => {
            if state.decoder.pending_bytes() > 0 {
                debug!(
                    slot = connection.index(),
                    phase = ?state.decoder.phase(),
                    "peer closed inside a packet"
                );
            }
            TurnOutcome::PeerClosed
        }
    };
    loop {
        match state.decoder.try_pop_packet() {
            Ok(Some(packet)) => turn.messages.push(InboundMessage {
                header: MessageHeader {
                    connection,
                    sequence: state.sequence,
                },
                packet,
            }),
            Ok(None) => break,
            Err(error) => {
                warn!(slot = connection.index(), %error, "discarding bad packet header");
                if !state.decoder.recover_after_protocol_error() {
                    break;
                }
            }
        }
    }
    turn
}

/// Treats a stale handle as "nothing to do".
fn ignore_stale<T>(result: HpsResult<T>) -> HpsResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(HpsError::StaleConnection) => Ok(None),
        Err(error) => Err(error),
    }
}
