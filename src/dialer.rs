//! Outbound connection hook shared by both engines.

use async_trait::async_trait;
use std::io;
use tokio::net::TcpStream;
use tracing::debug;

/// Establishes outbound TCP connections on behalf of a client.
///
/// `addr` is a `host:port` string exactly as the client requested it; the
/// host may be a domain name, an IPv4 literal or a bracketed IPv6 literal.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream>;
}

/// Plain dial with no allow/deny policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        debug!(address = %addr, "connecting to destination");
        let stream = TcpStream::connect(addr).await?;
        // Relayed traffic is often interactive
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
