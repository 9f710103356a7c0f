//! Listening socket setup.

use std::io;
use std::net::SocketAddr;

use hps_common::error::{HpsError, HpsResult};
use hps_common::ids::ConnectionRef;
use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

/// Backlog passed to `listen(2)`.
pub(crate) const LISTEN_BACKLOG: i32 = 511;

/// Listening socket that is bound but not yet placed in the pool.
#[derive(Debug)]
pub(crate) struct BoundListener {
    pub(crate) port: u16,
    pub(crate) local_addr: SocketAddr,
    pub(crate) socket: TcpListener,
}

/// One open listening endpoint and the pool slot holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListeningEndpoint {
    /// Configured port; `0` asks the kernel for an ephemeral one.
    pub port: u16,
    /// Address actually bound.
    pub local_addr: SocketAddr,
    /// Pool slot of the listener.
    pub connection: ConnectionRef,
}

/// Opens one listening socket per port on `0.0.0.0`.
///
/// Either every port listens or none does: sockets opened before a failure are dropped.
///
/// # Errors
///
/// Returns `HpsError::InvalidConfig` for an empty port list and `HpsError::Listen` for the
/// first port that fails socket creation, option setup, bind or listen.
pub(crate) fn open_listening_sockets(ports: &[u16]) -> HpsResult<Vec<BoundListener>> {
    if ports.is_empty() {
        return Err(HpsError::InvalidConfig(
            "at least one listen port is required".into(),
        ));
    }
    ports.iter().map(|&port| open_listener(port)).collect()
}

fn open_listener(port: u16) -> HpsResult<BoundListener> {
    let listen_error = move |error: io::Error| HpsError::Listen {
        port,
        reason: error.to_string(),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let socket =
        Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(listen_error)?;
    socket.set_reuse_address(true).map_err(listen_error)?;
    socket.set_nonblocking(true).map_err(listen_error)?;
    socket.bind(&addr.into()).map_err(listen_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(listen_error)?;

    let listener: std::net::TcpListener = socket.into();
    let local_addr = listener.local_addr().map_err(listen_error)?;
    info!(port, %local_addr, "listening");
    Ok(BoundListener {
        port,
        local_addr,
        socket: TcpListener::from_std(listener),
    })
}

#[cfg(test)]
mod tests {
    use super::open_listening_sockets;
    use googletest::prelude::*;
    use hps_common::error::HpsError;
    use rstest::rstest;

    #[rstest]
    fn ephemeral_port_is_reported() {
        let bound = open_listening_sockets(&[0]).expect("ephemeral port should bind");
        assert_that!(bound.len(), eq(1));
        assert_that!(bound[0].port, eq(0));
        assert_that!(bound[0].local_addr.port() > 0, eq(true));
    }

    #[rstest]
    fn empty_port_list_is_a_config_error() {
        let result = open_listening_sockets(&[]);
        assert_that!(matches!(result, Err(HpsError::InvalidConfig(_))), eq(true));
    }

    #[rstest]
    fn busy_port_fails_whole_setup() {
        let taken = open_listening_sockets(&[0]).expect("ephemeral port should bind");
        let busy = taken[0].local_addr.port();

        let result = open_listening_sockets(&[0, busy]);
        assert_that!(
            matches!(result, Err(HpsError::Listen { port, .. }) if port == busy),
            eq(true)
        );
    }
}
