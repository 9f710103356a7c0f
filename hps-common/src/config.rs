//! Server configuration and the plain-text config file loader.

use std::path::Path;
use std::time::Duration;

use crate::error::{HpsError, HpsResult};
use crate::ids::PoolCapacity;

/// Port used for `ListenPort<i>` entries missing from the config file.
pub const DEFAULT_LISTEN_PORT: u16 = 10000;

/// Largest accepted packet (header plus body) in bytes.
pub const DEFAULT_MAX_PACKET_LEN: u16 = 29_000;

/// Unsent reply bytes per connection at which reading from that connection pauses.
pub const DEFAULT_WRITE_HIGH_WATERMARK: usize = 256 * 1024;

/// Unsent reply bytes per connection at which a paused connection is read again.
pub const DEFAULT_WRITE_LOW_WATERMARK: usize = 128 * 1024;

/// Parsed `key = value` config file.
///
/// The format is line-oriented: blank lines, `#`/`;` comments and `[section]` headers are
/// skipped, and keys are matched case-insensitively. When a key repeats, the first entry wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfFile {
    items: Vec<(String, String)>,
}

impl ConfFile {
    /// Reads and parses one config file.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::Io` when the file cannot be read.
    pub fn load(path: &Path) -> HpsResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|error| {
            HpsError::Io(format!("read config {} failed: {error}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    /// Parses config text that is already in memory.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut items = Vec::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with(';')
                || line.starts_with('[')
            {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            items.push((key.to_owned(), value.trim().to_owned()));
        }
        Self { items }
    }

    /// Returns the raw value of `key`.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `key` parsed as an integer, or `default` when missing or not numeric.
    #[must_use]
    pub fn get_int_default(&self, key: &str, default: i64) -> i64 {
        self.get_string(key)
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(default)
    }
}

/// Runtime configuration consumed by the reactor and its background threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Connection pool capacity, listening slots included. Also the readiness batch size.
    pub worker_connections: usize,
    /// Ports opened on `0.0.0.0`, one listening socket each.
    pub listen_ports: Vec<u16>,
    /// Grace period between closing a connection and returning its slot to the pool.
    pub recycle_wait: Duration,
    /// Wake period of the recycler thread.
    pub recycle_period: Duration,
    /// Upper bound of one readiness wait.
    pub poll_timeout: Duration,
    /// Largest packet (header included) accepted from a peer.
    pub max_packet_len: u16,
    /// Queued plus unwritten reply bytes that pause reading from a connection.
    pub write_high_watermark: usize,
    /// Level the pending reply bytes must drain to before a paused connection is read again.
    pub write_low_watermark: usize,
    /// Default `tracing` filter directive.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_connections: 1024,
            listen_ports: vec![DEFAULT_LISTEN_PORT],
            recycle_wait: Duration::from_secs(60),
            recycle_period: Duration::from_millis(200),
            poll_timeout: Duration::from_millis(10),
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
            write_high_watermark: DEFAULT_WRITE_HIGH_WATERMARK,
            write_low_watermark: DEFAULT_WRITE_LOW_WATERMARK,
            log_level: "info".to_owned(),
        }
    }
}

impl ServerConfig {
    /// Builds configuration from a parsed config file, falling back to defaults per key.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::InvalidConfig` when a value is out of range or the result fails
    /// [`ServerConfig::validate`].
    pub fn from_conf(conf: &ConfFile) -> HpsResult<Self> {
        let defaults = Self::default();

        let worker_connections = usize::try_from(conf.get_int_default(
            "worker_connections",
            i64::try_from(defaults.worker_connections).unwrap_or(i64::MAX),
        ))
        .map_err(|_| HpsError::InvalidConfig("worker_connections must not be negative".into()))?;

        let port_count = usize::try_from(conf.get_int_default("ListenPortCount", 1))
            .map_err(|_| HpsError::InvalidConfig("ListenPortCount must not be negative".into()))?;
        let mut listen_ports = Vec::with_capacity(port_count);
        for index in 0..port_count {
            let key = format!("ListenPort{index}");
            let raw = conf.get_int_default(&key, i64::from(DEFAULT_LISTEN_PORT));
            let port = u16::try_from(raw)
                .map_err(|_| HpsError::InvalidConfig(format!("{key}={raw} is not a valid port")))?;
            listen_ports.push(port);
        }

        let wait_secs = u64::try_from(conf.get_int_default("Sock_RecyConnectionWaitTime", 60))
            .map_err(|_| {
                HpsError::InvalidConfig("Sock_RecyConnectionWaitTime must not be negative".into())
            })?;

        let max_packet_len = u16::try_from(conf.get_int_default(
            "MaxPacketLength",
            i64::from(defaults.max_packet_len),
        ))
        .map_err(|_| HpsError::InvalidConfig("MaxPacketLength must fit in 16 bits".into()))?;

        let write_high_watermark = usize::try_from(conf.get_int_default(
            "WriteHighWatermark",
            i64::try_from(defaults.write_high_watermark).unwrap_or(i64::MAX),
        ))
        .map_err(|_| HpsError::InvalidConfig("WriteHighWatermark must not be negative".into()))?;
        let write_low_watermark = usize::try_from(conf.get_int_default(
            "WriteLowWatermark",
            i64::try_from(defaults.write_low_watermark).unwrap_or(i64::MAX),
        ))
        .map_err(|_| HpsError::InvalidConfig("WriteLowWatermark must not be negative".into()))?;

        let log_level = conf
            .get_string("LogLevel")
            .map_or(defaults.log_level, str::to_owned);

        let config = Self {
            worker_connections,
            listen_ports,
            recycle_wait: Duration::from_secs(wait_secs),
            max_packet_len,
            write_high_watermark,
            write_low_watermark,
            log_level,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::InvalidConfig` for an empty port list, a pool that cannot hold every
    /// listening socket plus one client, a packet limit smaller than the header, or write
    /// watermarks where the low mark does not sit below the high mark.
    pub fn validate(&self) -> HpsResult<()> {
        if self.listen_ports.is_empty() {
            return Err(HpsError::InvalidConfig(
                "at least one listen port is required".into(),
            ));
        }
        let capacity = self.pool_capacity()?;
        if capacity.get() <= self.listen_ports.len() {
            return Err(HpsError::InvalidConfig(format!(
                "worker_connections={} leaves no slot for clients behind {} listeners",
                capacity.get(),
                self.listen_ports.len()
            )));
        }
        if usize::from(self.max_packet_len) < 8 {
            return Err(HpsError::InvalidConfig(
                "MaxPacketLength must cover the 8-byte packet header".into(),
            ));
        }
        if self.write_low_watermark >= self.write_high_watermark {
            return Err(HpsError::InvalidConfig(format!(
                "write low watermark {} must be smaller than high watermark {}",
                self.write_low_watermark, self.write_high_watermark
            )));
        }
        Ok(())
    }

    /// Returns the validated pool capacity.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::InvalidConfig` when `worker_connections` is zero or too large.
    pub fn pool_capacity(&self) -> HpsResult<PoolCapacity> {
        PoolCapacity::new(self.worker_connections).ok_or_else(|| {
            HpsError::InvalidConfig(format!(
                "worker_connections={} is out of range",
                self.worker_connections
            ))
        })
    }
}
