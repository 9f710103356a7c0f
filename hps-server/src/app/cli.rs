//! Command-line arguments and config loading.

use std::path::PathBuf;

use clap::Parser;
use hps_common::config::{ConfFile, ServerConfig};
use hps_common::error::HpsResult;

/// `hps-server` command-line arguments.
///
/// CLI values override settings read from the config file.
#[derive(Parser, Debug)]
#[command(name = "hps-server", about = "Event-driven TCP packet server")]
pub(super) struct CliArgs {
    /// Config file; a missing file means built-in defaults.
    #[arg(long, default_value = "hps.conf")]
    pub(super) config: PathBuf,

    /// Listening port, repeat for several. Replaces the configured port list.
    #[arg(long = "port")]
    pub(super) ports: Vec<u16>,

    /// Connection pool capacity, listening sockets included.
    #[arg(long)]
    pub(super) worker_connections: Option<usize>,

    /// Log filter directive (error, warn, info, debug, trace).
    #[arg(long)]
    pub(super) log_level: Option<String>,
}

impl CliArgs {
    /// Apply CLI overrides to a loaded config.
    pub(super) fn apply_overrides(&self, config: &mut ServerConfig) {
        if !self.ports.is_empty() {
            config.listen_ports.clone_from(&self.ports);
        }
        if let Some(worker_connections) = self.worker_connections {
            config.worker_connections = worker_connections;
        }
        if let Some(ref level) = self.log_level {
            config.log_level.clone_from(level);
        }
    }
}

/// Reads the config file named by `args`, applies CLI overrides and validates the result.
pub(super) fn load_config(args: &CliArgs) -> HpsResult<ServerConfig> {
    let mut config = if args.config.exists() {
        ServerConfig::from_conf(&ConfFile::load(&args.config)?)?
    } else {
        ServerConfig::default()
    };
    args.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}
