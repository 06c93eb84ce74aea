//! Service configuration.
//!
//! Plain structs with sensible defaults; the framework itself has no CLI
//! or environment surface.

use std::time::Duration;

/// Default send deadline per container.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(4);

/// Default receive deadline per container.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(16);

/// Default connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default accept backlog.
pub const DEFAULT_BACKLOG: i32 = 16;

/// Connector worker pool bounds.
pub const MIN_WORKERS: usize = 10;
pub const MAX_WORKERS: usize = 20;

/// Worker-pool size scaled to the host, within the configured bounds.
#[must_use]
pub fn default_workers() -> usize {
    (num_cpus::get() * 2).clamp(MIN_WORKERS, MAX_WORKERS)
}

/// Connector tuning.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// I/O workers draining the send queue.
    pub workers: usize,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
    pub backlog: i32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

/// Server tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Accepted connections beyond this are dropped, not queued.
    pub max_connections: usize,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
    pub backlog: i32,
}

impl ServerConfig {
    #[must_use]
    pub const fn with_max_connections(max_connections: usize) -> Self {
        Self {
            max_connections,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_max_connections(64)
    }
}

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_bounds() {
        let workers = default_workers();
        assert!((MIN_WORKERS..=MAX_WORKERS).contains(&workers));
    }

    #[test]
    fn test_server_config_cap() {
        let config = ServerConfig::with_max_connections(1);
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
    }
}
