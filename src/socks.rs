//! SOCKS5 listener: wires the protocol engine to the console and the dial hook.

use crate::config::{ListenerEndpoint, Protocol, Timeouts};
use crate::console::Console;
use crate::dialer::Dialer;
use crate::error::{ProxyError, Result};
use crate::socks5::{Listener, Socks5Config, Socks5Server};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Listener wrapper that reports every accepted connection.
pub struct ObservedListener {
    inner: TcpListener,
    console: Arc<Console>,
}

impl ObservedListener {
    pub fn new(inner: TcpListener, console: Arc<Console>) -> Self {
        Self { inner, console }
    }
}

#[async_trait]
impl Listener for ObservedListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        self.console.activity();
        debug!(remote_addr = %peer, "client connected");
        Ok((stream, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Dial hook handed to the engine: passes the request straight through.
struct PassthroughDialer {
    inner: Arc<dyn Dialer>,
}

#[async_trait]
impl Dialer for PassthroughDialer {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        debug!(network = "tcp", address = %addr, "connecting to destination");
        self.inner.dial(addr).await
    }
}

/// The SOCKS5 proxy engine.
#[derive(Clone)]
pub struct SocksProxy {
    endpoint: ListenerEndpoint,
    timeouts: Timeouts,
    dialer: Arc<dyn Dialer>,
    console: Arc<Console>,
}

impl SocksProxy {
    pub fn new(
        endpoint: ListenerEndpoint,
        timeouts: Timeouts,
        dialer: Arc<dyn Dialer>,
        console: Arc<Console>,
    ) -> Self {
        Self {
            endpoint,
            timeouts,
            dialer,
            console,
        }
    }

    /// Binds the configured endpoint and serves until the listener fails.
    pub async fn run(self) -> Result<()> {
        self.console.init();

        let addr = self.endpoint.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind {
                protocol: Protocol::Socks,
                addr,
                source,
            })?;

        self.serve(listener).await
    }

    /// Serves SOCKS5 on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let port = listener.local_addr()?.port();
        self.console.announce(Protocol::Socks, port);

        let server = Socks5Server::new(Socks5Config {
            dialer: Arc::new(PassthroughDialer {
                inner: self.dialer.clone(),
            }),
            idle_timeout: self.timeouts.idle,
        });

        info!(port = port, "starting proxy server");
        server
            .serve(ObservedListener::new(listener, self.console.clone()))
            .await
            .map_err(ProxyError::Accept)
    }
}
