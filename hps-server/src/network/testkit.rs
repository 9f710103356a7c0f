use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::time::{Duration, Instant};

use mio::net::TcpStream;

use super::ServerReactor;
use crate::app::ServerApp;

/// Connected loopback pair: blocking client side, non-blocking accepted side.
pub(crate) fn accepted_pair() -> (StdTcpStream, TcpStream) {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("loopback listener should bind");
    let addr = listener
        .local_addr()
        .expect("listener should expose local addr");
    let client = StdTcpStream::connect(addr).expect("client should connect");
    let (server, _) = listener.accept().expect("listener should accept");
    server
        .set_nonblocking(true)
        .expect("accepted socket should switch to non-blocking");
    (client, TcpStream::from_std(server))
}

/// Connects a non-blocking client to the reactor's first listener.
pub(crate) fn connect_client(reactor: &ServerReactor) -> StdTcpStream {
    let port = reactor.endpoints()[0].local_addr.port();
    let client = StdTcpStream::connect(SocketAddr::from(([127, 0, 0, 1], port)))
        .expect("client should connect to reactor");
    client
        .set_nonblocking(true)
        .expect("client should switch to non-blocking");
    client
}

/// Polls the reactor until `done` holds or the window closes.
pub(crate) fn poll_until(
    reactor: &mut ServerReactor,
    app: &ServerApp,
    window: Duration,
    mut done: impl FnMut(&ServerReactor) -> bool,
) -> bool {
    let deadline = Instant::now() + window;
    while Instant::now() < deadline {
        let _ = reactor
            .poll_once(app, Some(Duration::from_millis(5)))
            .expect("poll should succeed");
        if done(reactor) {
            return true;
        }
    }
    false
}

/// Writes `request` and collects reply bytes until `expected_len` arrived or the window closes.
pub(crate) fn exchange(
    reactor: &mut ServerReactor,
    app: &ServerApp,
    client: &mut StdTcpStream,
    request: &[u8],
    expected_len: usize,
    window: Duration,
) -> Vec<u8> {
    client.write_all(request).expect("client write should succeed");
    let mut response = Vec::new();
    let mut chunk = [0_u8; 4096];
    let deadline = Instant::now() + window;
    'cycles: while Instant::now() < deadline && response.len() < expected_len {
        let _ = reactor
            .poll_once(app, Some(Duration::from_millis(5)))
            .expect("poll should succeed");
        loop {
            match client.read(&mut chunk) {
                Ok(0) => break 'cycles,
                Ok(read_len) => response.extend_from_slice(&chunk[..read_len]),
                Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                Err(error) => panic!("client read failed: {error}"),
            }
        }
    }
    response
}

/// True once the client observes end of stream or a reset.
pub(crate) fn peer_closed(client: &mut StdTcpStream) -> bool {
    let mut chunk = [0_u8; 64];
    match client.read(&mut chunk) {
        Ok(0) => true,
        Ok(_) => false,
        Err(error) => matches!(
            error.kind(),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
        ),
    }
}
