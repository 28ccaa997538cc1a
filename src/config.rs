//! Configuration management for proxbox.
//!
//! Handles loading, parsing and validating the YAML configuration file and
//! derives the immutable listener endpoints and timeouts the engines run
//! with.

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Default HTTP proxy port.
pub const DEFAULT_HTTP_PORT: u16 = 8889;

/// Default SOCKS5 proxy port.
pub const DEFAULT_SOCKS_PORT: u16 = 8890;

/// The two protocols proxbox listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Socks,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("HTTP"),
            Protocol::Socks => f.write_str("SOCKS"),
        }
    }
}

/// A listener endpoint, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerEndpoint {
    pub protocol: Protocol,
    pub bind: IpAddr,
    pub port: u16,
}

impl ListenerEndpoint {
    pub fn new(protocol: Protocol, bind: IpAddr, port: u16) -> Self {
        Self {
            protocol,
            bind,
            port,
        }
    }

    /// Socket address to bind.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Dial and relay timeouts shared by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on establishing an outbound TCP connection.
    pub connect: Duration,

    /// Tunnel idle timeout; `None` keeps tunnels open until a peer closes.
    pub idle: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            idle: None,
        }
    }
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address both listeners bind to.
    pub bind: IpAddr,

    /// HTTP proxy port.
    pub http_port: u16,

    /// SOCKS5 proxy port.
    pub socks_port: u16,

    /// Connection timeout in seconds.
    pub connect_timeout: u64,

    /// Tunnel idle timeout in seconds (0 = never).
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            socks_port: DEFAULT_SOCKS_PORT,
            connect_timeout: 10,
            idle_timeout: 0,
        }
    }
}

/// Console output section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Suppress all console output.
    pub quiet: bool,

    /// Show structured logs instead of the activity spinner.
    pub verbose: bool,
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used in verbose mode: trace, debug, info, warn, error.
    pub level: String,

    /// Output destination: stdout, stderr, or file path.
    pub output: String,

    /// Log format.
    pub format: LogFormat,

    /// Include target (module path) in logs.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            output: "stderr".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener and timeout configuration.
    pub server: ServerConfig,

    /// Console output mode.
    pub output: OutputConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProxyError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(path)?;
        let config: AppConfig =
            serde_yaml::from_str(&contents).map_err(|e| ProxyError::config_parse(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 || self.server.socks_port == 0 {
            return Err(ProxyError::config_validation(
                "Proxy ports must be positive",
            ));
        }

        if self.server.http_port == self.server.socks_port {
            return Err(ProxyError::config_validation(format!(
                "HTTP and SOCKS ports must differ (both are {})",
                self.server.http_port
            )));
        }

        if self.server.connect_timeout == 0 {
            return Err(ProxyError::config_validation(
                "Connect timeout must be positive",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ProxyError::config_validation(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }

    /// HTTP and SOCKS listener endpoints, in that order.
    pub fn endpoints(&self) -> (ListenerEndpoint, ListenerEndpoint) {
        (
            ListenerEndpoint::new(Protocol::Http, self.server.bind, self.server.http_port),
            ListenerEndpoint::new(Protocol::Socks, self.server.bind, self.server.socks_port),
        )
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.server.connect_timeout),
            idle: match self.server.idle_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}
