//! # proxbox
//!
//! An HTTP/HTTPS forward proxy and a SOCKS5 proxy running side by side.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`console`]: Output mode selection, port announcements and the activity spinner
//! - [`dialer`]: Outbound connection hook shared by both engines
//! - [`error`]: Error types and handling
//! - [`http_proxy`]: HTTP forward proxy (CONNECT tunnels and header-rewriting forwarding)
//! - [`logging`]: Logging setup
//! - [`relay`]: Bidirectional tunnel relay
//! - [`socks`]: SOCKS5 listener wiring
//! - [`socks5`]: SOCKS5 protocol engine
//! - [`supervisor`]: Runs both engines and reports the first failure
//!
//! ## Example
//!
//! ```ignore
//! use proxbox::{AppConfig, Console, Supervisor};
//! use std::sync::Arc;
//!
//! let config = AppConfig::default();
//! let console = Arc::new(Console::new(config.output.quiet, config.output.verbose));
//! Supervisor::from_config(&config, console).run().await?;
//! ```

pub mod config;
pub mod console;
pub mod dialer;
pub mod error;
pub mod http_proxy;
pub mod logging;
pub mod relay;
pub mod socks;
pub mod socks5;
pub mod supervisor;

pub use config::{AppConfig, ListenerEndpoint, Protocol, Timeouts};
pub use console::{Console, OutputMode};
pub use dialer::{Dialer, DirectDialer};
pub use error::{ProxyError, Result};
pub use http_proxy::HttpProxy;
pub use socks::SocksProxy;
pub use supervisor::Supervisor;
