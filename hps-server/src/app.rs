//! Process composition root for `hps-server`.

mod bootstrap;
mod cli;
mod logging;
mod signal;

use hps_common::config::ServerConfig;
use hps_common::error::HpsResult;
use hps_core::CoreModule;
use hps_facade::FacadeModule;

/// Subsystems shared by the reactor and the ingress path.
#[derive(Debug)]
pub struct ServerApp {
    /// Runtime configuration.
    pub config: ServerConfig,
    /// Listener and framing settings.
    pub facade: FacadeModule,
    /// Message-code table.
    pub core: CoreModule,
}

impl ServerApp {
    /// Builds the application with the built-in handlers.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self::with_core(config, CoreModule::new())
    }

    /// Builds the application around a caller-supplied core module.
    #[must_use]
    pub fn with_core(config: ServerConfig, core: CoreModule) -> Self {
        let facade = FacadeModule::from_config(&config);
        Self {
            config,
            facade,
            core,
        }
    }

    /// Human-readable startup summary.
    #[must_use]
    pub fn startup_summary(&self) -> String {
        format!(
            "hps-server bootstrap: ports={:?}, worker_connections={}, recycle_wait={:?}, \
max_packet_len={}, message_codes={:?}",
            self.facade.listen_ports,
            self.config.worker_connections,
            self.config.recycle_wait,
            self.facade.max_packet_len,
            self.core.handlers.registered_codes()
        )
    }
}

/// Starts `hps-server` and blocks until a shutdown signal arrives.
///
/// # Errors
///
/// Returns config, listener or thread startup failures.
pub fn run() -> HpsResult<()> {
    bootstrap::run_server()
}
