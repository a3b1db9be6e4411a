//! # Dispatcher Configuration
//!
//! Defaults can be overridden programmatically or from the environment:
//!
//! | variable | field |
//! |---|---|
//! | `SPARKRPC_HOST` | `host` |
//! | `SPARKRPC_PORT` | `port` |
//! | `SPARKRPC_DISPATCHER_THREADS` | `num_threads` |
//! | `SPARKRPC_DISPATCHER_THROUGHPUT` | `throughput` |

use std::fmt;
use std::str::FromStr;

pub const ENV_HOST: &str = "SPARKRPC_HOST";
pub const ENV_PORT: &str = "SPARKRPC_PORT";
pub const ENV_THREADS: &str = "SPARKRPC_DISPATCHER_THREADS";
pub const ENV_THROUGHPUT: &str = "SPARKRPC_DISPATCHER_THROUGHPUT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An override could not be parsed.
    InvalidValue { key: String, value: String },
    /// The worker pool must have at least one thread.
    ZeroThreads,
    /// A throughput limit of zero would never make progress.
    ZeroThroughput,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value } => {
                write!(f, "Invalid value for {}: '{}'", key, value)
            }
            Self::ZeroThreads => write!(f, "Dispatcher needs at least one worker thread"),
            Self::ZeroThroughput => write!(f, "Throughput limit must be positive"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Host part of the addresses handed out for registered endpoints.
    pub host: String,
    /// Port part of the addresses handed out for registered endpoints.
    pub port: u16,
    /// Size of the worker pool.
    pub num_threads: usize,
    /// Maximum messages drained from one mailbox per pull; `None` drains everything.
    pub throughput: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            num_threads: default_threads(),
            throughput: None,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the `SPARKRPC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each known key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup(ENV_HOST) {
            config.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            config.port = parse(ENV_PORT, &port)?;
        }
        if let Some(threads) = lookup(ENV_THREADS) {
            config.num_threads = parse(ENV_THREADS, &threads)?;
        }
        if let Some(throughput) = lookup(ENV_THROUGHPUT) {
            config.throughput = Some(parse(ENV_THROUGHPUT, &throughput)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn throughput(mut self, limit: usize) -> Self {
        self.throughput = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::ZeroThreads);
        }
        if self.throughput == Some(0) {
            return Err(Error::ZeroThroughput);
        }
        Ok(())
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 0);
        assert!(config.num_threads >= 1);
        assert_eq!(config.throughput, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_lookup_overrides() {
        let config = DispatcherConfig::from_lookup(lookup(&[
            (ENV_HOST, "10.0.0.5"),
            (ENV_PORT, "7077"),
            (ENV_THREADS, " 3 "),
            (ENV_THROUGHPUT, "16"),
        ]))
        .unwrap();

        let expected = DispatcherConfig::new()
            .bind("10.0.0.5", 7077)
            .threads(3)
            .throughput(16);
        assert_eq!(config, expected);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = DispatcherConfig::from_lookup(lookup(&[(ENV_PORT, "seventy")])).unwrap_err();
        assert_eq!(err, Error::InvalidValue { key: ENV_PORT.into(), value: "seventy".into() });
    }

    #[test]
    fn test_lookup_rejects_zero_threads() {
        let err = DispatcherConfig::from_lookup(lookup(&[(ENV_THREADS, "0")])).unwrap_err();
        assert_eq!(err, Error::ZeroThreads);
    }

    #[test]
    fn test_zero_throughput_is_invalid() {
        assert_eq!(DispatcherConfig::new().throughput(0).validate(), Err(Error::ZeroThroughput));
    }
}
