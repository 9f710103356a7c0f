//! Facade layer: wire packet layout and per-connection framing.

pub mod connection;
pub mod protocol;

use hps_common::config::ServerConfig;

/// Facade subsystem bootstrap module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacadeModule {
    /// Ports served by the listening sockets.
    pub listen_ports: Vec<u16>,
    /// Largest packet accepted from a peer, header included.
    pub max_packet_len: u16,
}

impl FacadeModule {
    /// Builds the facade bootstrap model from process config.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            listen_ports: config.listen_ports.clone(),
            max_packet_len: config.max_packet_len,
        }
    }
}
