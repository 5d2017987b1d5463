//! Client configuration.

use std::time::Duration;

use encoding_rs::Encoding;
use tds_protocol::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE};

use crate::error::Error;

/// Default number of rows fetched into the row cache per batch.
pub const DEFAULT_FETCH_SIZE: usize = 100;

/// Default minimum severity class promoted to a fatal error.
pub const DEFAULT_FATAL_SEVERITY: u8 = 11;

/// Configuration for a client connection.
///
/// The connection is handed in already authenticated, so only settings
/// that affect how responses are read live here.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// TDS packet size used until the server announces another one.
    pub packet_size: usize,

    /// Rows fetched into the row cache per batch (default: 100).
    pub fetch_size: usize,

    /// Maximum rows delivered per result set, 0 for unlimited.
    pub max_rows: usize,

    /// Command timeout. `None` waits forever.
    pub command_timeout: Option<Duration>,

    /// Minimum error class treated as fatal (default: 11).
    pub fatal_severity: u8,

    /// Encoding label for single-byte character data.
    pub charset: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            fetch_size: DEFAULT_FETCH_SIZE,
            max_rows: 0,
            command_timeout: None,
            fatal_severity: DEFAULT_FATAL_SEVERITY,
            charset: "windows-1252".into(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string.
    ///
    /// Supports the format:
    /// `Packet Size=8192;Fetch Size=500;Max Rows=0;Command Timeout=30;Charset=utf-8;Fatal Severity=11;`
    ///
    /// Keys are matched case-insensitively. Keys this client has no use
    /// for (server, credentials, ...) are ignored.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "packet size" => config.packet_size = parse_number(&key, value)?,
                "fetch size" => config.fetch_size = parse_number(&key, value)?,
                "max rows" => config.max_rows = parse_number(&key, value)?,
                "command timeout" => {
                    let secs: u64 = parse_number(&key, value)?;
                    config.command_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "fatal severity" => config.fatal_severity = parse_number(&key, value)?,
                "charset" => config.charset = value.to_string(),
                _ => {
                    tracing::debug!(key = %key, "ignoring connection string key");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the packet size.
    #[must_use]
    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the row cache fetch size.
    #[must_use]
    pub fn fetch_size(mut self, rows: usize) -> Self {
        self.fetch_size = rows;
        self
    }

    /// Set the per-result-set row limit.
    #[must_use]
    pub fn max_rows(mut self, rows: usize) -> Self {
        self.max_rows = rows;
        self
    }

    /// Set the command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Set the minimum error class treated as fatal.
    #[must_use]
    pub fn fatal_severity(mut self, class: u8) -> Self {
        self.fatal_severity = class;
        self
    }

    /// Set the encoding label for single-byte character data.
    #[must_use]
    pub fn charset(mut self, label: impl Into<String>) -> Self {
        self.charset = label.into();
        self
    }

    /// Resolve the configured charset label.
    pub fn encoding(&self) -> Result<&'static Encoding, Error> {
        Encoding::for_label(self.charset.as_bytes())
            .ok_or_else(|| Error::Config(format!("unknown charset: {}", self.charset)))
    }

    /// Check that all values are in range.
    pub fn validate(&self) -> Result<(), Error> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.packet_size) {
            return Err(Error::Config(format!(
                "packet size {} outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}",
                self.packet_size
            )));
        }
        if self.max_rows > 0 && self.fetch_size > self.max_rows {
            return Err(Error::InvalidFetchSize {
                fetch_size: self.fetch_size,
                max_rows: self.max_rows,
            });
        }
        if self.fatal_severity > 25 {
            return Err(Error::Config(format!(
                "fatal severity {} above 25",
                self.fatal_severity
            )));
        }
        self.encoding()?;
        Ok(())
    }
}

fn parse_number<N: std::str::FromStr>(key: &str, value: &str) -> Result<N, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid {key}: {value}")))
}
