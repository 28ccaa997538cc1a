//! Error types for proxbox.
//!
//! Per-request failures are turned into HTTP responses (or SOCKS5 replies)
//! inside the engines. Only listener-level failures travel up to the
//! supervisor, wrapped in [`ProxyError::Engine`].

use crate::config::Protocol;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration file could not be found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// A listener could not be bound.
    #[error("failed to start {protocol} listener on {addr}: {source}")]
    Bind {
        protocol: Protocol,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The listener stopped accepting connections.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// An engine stopped; carries which protocol failed.
    #[error("{protocol} proxy error: {source}")]
    Engine {
        protocol: Protocol,
        #[source]
        source: Box<ProxyError>,
    },

    /// The request could not be turned into a forward target.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request asked for a scheme the forward path cannot speak.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Dialing the destination took longer than the connect timeout.
    #[error("dial tcp {addr}: i/o timeout")]
    DialTimeout { addr: String },

    /// Upstream HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Creates a new configuration parse error.
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Creates a new configuration validation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Annotates an engine failure with the protocol that produced it.
    pub fn engine(protocol: Protocol, source: ProxyError) -> Self {
        Self::Engine {
            protocol,
            source: Box::new(source),
        }
    }

    /// Returns the failed protocol for engine errors.
    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            Self::Engine { protocol, .. } | Self::Bind { protocol, .. } => Some(*protocol),
            _ => None,
        }
    }
}

/// Result type alias using ProxyError.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProxyError::ConfigNotFound {
            path: "/etc/proxbox/config.yaml".to_string(),
        };
        assert!(err.to_string().contains("/etc/proxbox/config.yaml"));

        let err = ProxyError::config_parse("invalid yaml");
        assert!(err.to_string().contains("invalid yaml"));
    }

    #[test]
    fn test_engine_error_names_protocol() {
        let bind = ProxyError::Bind {
            protocol: Protocol::Socks,
            addr: "127.0.0.1:8890".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        let err = ProxyError::engine(Protocol::Socks, bind);

        assert_eq!(err.protocol(), Some(Protocol::Socks));
        let msg = err.to_string();
        assert!(msg.starts_with("SOCKS proxy error:"), "{msg}");
        assert!(msg.contains("127.0.0.1:8890"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Io(_)));
    }
}
