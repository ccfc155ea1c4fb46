//! Configuration for k17link
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::error::{K17Error, Result};

/// TCP port the K17 listens on
pub const DEFAULT_PORT: u16 = 12100;

/// Main configuration for a device session
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Device host name or IP address
    pub host: String,

    /// Device TCP port
    pub port: u16,

    /// Budget for establishing the TCP connection
    pub connect_timeout: Duration,

    /// Socket read chunk size
    pub read_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Request Configuration
    // -------------------------------------------------------------------------
    /// Time allowed for an ACK to arrive (also the handshake budget per step)
    pub request_timeout: Duration,

    /// What a second caller sees while a request is outstanding
    pub dispatch_policy: DispatchPolicy,

    /// Interval between GET_SETTINGS health checks while READY
    pub health_check_interval: Duration,

    // -------------------------------------------------------------------------
    // Event Configuration
    // -------------------------------------------------------------------------
    /// Per-subscriber event queue depth; events beyond it are dropped
    pub event_queue_capacity: usize,

    // -------------------------------------------------------------------------
    // Reconnect Configuration
    // -------------------------------------------------------------------------
    pub backoff: BackoffConfig,
}

/// Policy for concurrent requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Wait in FIFO order for the outstanding request to finish
    Queue,

    /// Fail immediately with `K17Error::Busy`
    FailFast,
}

/// Reconnect backoff parameters
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// First delay after a drop
    pub initial_delay: Duration,

    /// Upper bound for any delay
    pub max_delay: Duration,

    /// Growth factor between consecutive failed attempts
    pub multiplier: u32,

    /// How long READY must hold before the next drop restarts at `initial_delay`
    pub stability_window: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            stability_window: Duration::from_secs(60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: 4096,
            request_timeout: Duration::from_secs(5),
            dispatch_policy: DispatchPolicy::Queue,
            health_check_interval: Duration::from_secs(30),
            event_queue_capacity: 64,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `host:port` string used to dial the device
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(K17Error::Config("host must not be empty".to_string()));
        }
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(K17Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.health_check_interval.is_zero() {
            return Err(K17Error::Config(
                "health check interval must be non-zero".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 || self.read_buffer_size == 0 {
            return Err(K17Error::Config(
                "queue capacity and read buffer size must be non-zero".to_string(),
            ));
        }
        if self.backoff.initial_delay.is_zero() || self.backoff.multiplier == 0 {
            return Err(K17Error::Config(
                "backoff needs a non-zero initial delay and multiplier".to_string(),
            ));
        }
        if self.backoff.max_delay < self.backoff.initial_delay {
            return Err(K17Error::Config(
                "backoff max delay is below the initial delay".to_string(),
            ));
        }

        let interval = self.health_check_interval;
        if interval < Duration::from_secs(30) || interval > Duration::from_secs(60) {
            tracing::warn!(
                "Health check interval {:?} is outside the usual 30-60s range",
                interval
            );
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the device host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the device port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the socket read chunk size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the per-request ACK timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the concurrent request policy
    pub fn dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.config.dispatch_policy = policy;
        self
    }

    /// Set the health check interval
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    /// Set the per-subscriber event queue depth
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity;
        self
    }

    /// Set the reconnect backoff parameters
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
