//! Runs the HTTP and SOCKS5 engines side by side and fails fast.
//!
//! Both engines are spawned on their own tasks. The first one to return an
//! error ends [`Supervisor::run`]; the other engine is abandoned as-is.

use crate::config::{AppConfig, Protocol};
use crate::console::Console;
use crate::dialer::{Dialer, DirectDialer};
use crate::error::{ProxyError, Result};
use crate::http_proxy::HttpProxy;
use crate::socks::SocksProxy;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

pub struct Supervisor {
    http: HttpProxy,
    socks: SocksProxy,
}

impl Supervisor {
    pub fn new(http: HttpProxy, socks: SocksProxy) -> Self {
        Self { http, socks }
    }

    /// Builds both engines from configuration with a plain dialer.
    pub fn from_config(config: &AppConfig, console: Arc<Console>) -> Self {
        let (http_endpoint, socks_endpoint) = config.endpoints();
        let timeouts = config.timeouts();
        let dialer: Arc<dyn Dialer> = Arc::new(DirectDialer);

        Self::new(
            HttpProxy::new(http_endpoint, timeouts, dialer.clone(), console.clone()),
            SocksProxy::new(socks_endpoint, timeouts, dialer, console),
        )
    }

    /// Waits for the first engine failure and returns it.
    ///
    /// Returns `Ok(())` only if both engines stop without an error.
    pub async fn run(self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<ProxyError>(2);

        let http = self.http;
        let http_tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = http.run().await {
                let _ = http_tx.send(ProxyError::engine(Protocol::Http, e)).await;
            }
        });

        let socks = self.socks;
        tokio::spawn(async move {
            if let Err(e) = socks.run().await {
                let _ = tx.send(ProxyError::engine(Protocol::Socks, e)).await;
            }
        });

        match rx.recv().await {
            Some(err) => {
                error!(error = %err, "proxy engine failed");
                Err(err)
            }
            None => Ok(()),
        }
    }
}
