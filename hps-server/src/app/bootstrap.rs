use clap::Parser;
use hps_common::error::HpsResult;
use tracing::info;

use super::ServerApp;
use super::cli::{CliArgs, load_config};
use super::logging;
use super::signal::install_signal_handler;
use crate::network::ServerReactor;

pub(super) fn run_server() -> HpsResult<()> {
    let args = CliArgs::parse();
    let config = load_config(&args)?;
    logging::init(&config.log_level);

    let app = ServerApp::new(config);
    let mut reactor = ServerReactor::bind(&app)?;
    info!("{}", app.startup_summary());
    for endpoint in reactor.endpoints() {
        info!(
            port = endpoint.port,
            local_addr = %endpoint.local_addr,
            slot = endpoint.connection.index(),
            "listener ready"
        );
    }

    install_signal_handler(reactor.shutdown_handle())?;
    reactor.start_background()?;
    reactor.run(&app)
}
