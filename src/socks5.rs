//! SOCKS5 protocol engine (RFC 1928, CONNECT only, no authentication).
//!
//! The engine owns the wire protocol. What it dials and which listener it
//! accepts from are supplied by the caller through [`Socks5Config`] and the
//! [`Listener`] trait.

use crate::dialer::Dialer;
use crate::relay::relay;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace, warn};

const SOCKS5_VERSION: u8 = 0x05;
const SOCKS5_NO_AUTHENTICATION: u8 = 0x00;
const SOCKS5_NO_ACCEPTABLE_METHODS: u8 = 0xFF;

const SOCKS5_CMD_CONNECT: u8 = 0x01;

const SOCKS5_ATYP_IPV4: u8 = 0x01;
const SOCKS5_ATYP_DOMAIN: u8 = 0x03;
const SOCKS5_ATYP_IPV6: u8 = 0x04;

/// Reply codes sent back after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    /// Maps a dial error onto the closest reply code.
    pub fn from_dial_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
            io::ErrorKind::NetworkUnreachable => Reply::NetworkUnreachable,
            _ => Reply::HostUnreachable,
        }
    }
}

/// Errors ending a single SOCKS5 session.
#[derive(Error, Debug)]
pub enum Socks5Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    #[error("no acceptable authentication method")]
    NoAcceptableAuth,

    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    #[error("invalid domain name")]
    InvalidDomain,

    #[error("connect to {addr} failed: {source}")]
    Dial {
        addr: TargetAddr,
        #[source]
        source: io::Error,
    },
}

/// Destination requested by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl TargetAddr {
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

/// Source of inbound connections for the engine.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Listener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Engine configuration.
pub struct Socks5Config {
    /// Establishes the outbound connection for each CONNECT request.
    pub dialer: Arc<dyn Dialer>,

    /// Idle timeout applied to relayed sessions.
    pub idle_timeout: Option<Duration>,
}

/// SOCKS5 server.
#[derive(Clone)]
pub struct Socks5Server {
    config: Arc<Socks5Config>,
}

impl Socks5Server {
    pub fn new(config: Socks5Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Accepts connections until the listener fails, serving each on its own task.
    pub async fn serve<L: Listener>(&self, listener: L) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_conn(stream).await {
                    warn!(peer = %peer, error = %e, "socks5 session failed");
                }
            });
        }
    }

    /// Runs one session: handshake, dial, reply, relay.
    pub async fn serve_conn<S>(&self, mut stream: S) -> Result<(), Socks5Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let target = handshake(&mut stream).await?;
        trace!(target = %target, "socks5 request");

        let dest = match self.config.dialer.dial(&target.to_string()).await {
            Ok(dest) => dest,
            Err(source) => {
                send_reply(&mut stream, Reply::from_dial_error(&source), None).await?;
                return Err(Socks5Error::Dial {
                    addr: target,
                    source,
                });
            }
        };

        let bound = dest.local_addr().ok();
        send_reply(&mut stream, Reply::Succeeded, bound).await?;

        let stats = relay(stream, dest, self.config.idle_timeout).await;
        debug!(
            target = %target,
            sent = stats.client_to_dest,
            received = stats.dest_to_client,
            "socks5 session closed"
        );
        Ok(())
    }
}

/// Negotiates the method and reads the CONNECT request.
async fn handshake<S>(stream: &mut S) -> Result<TargetAddr, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;
    let (version, nmethods) = (buf[0], buf[1]);

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&SOCKS5_NO_AUTHENTICATION) {
        stream
            .write_all(&[SOCKS5_VERSION, SOCKS5_NO_ACCEPTABLE_METHODS])
            .await?;
        return Err(Socks5Error::NoAcceptableAuth);
    }
    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_NO_AUTHENTICATION])
        .await?;

    // VER CMD RSV ATYP
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    let (version, cmd, atyp) = (buf[0], buf[1], buf[3]);

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let target = match atyp {
        SOCKS5_ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(addr)), port))
        }
        SOCKS5_ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(addr)), port))
        }
        SOCKS5_ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            let port = stream.read_u16().await?;
            let domain = String::from_utf8(domain).map_err(|_| Socks5Error::InvalidDomain)?;
            TargetAddr::Domain(domain, port)
        }
        _ => {
            send_reply(stream, Reply::AddressTypeNotSupported, None).await?;
            return Err(Socks5Error::UnsupportedAddressType(atyp));
        }
    };

    if cmd != SOCKS5_CMD_CONNECT {
        send_reply(stream, Reply::CommandNotSupported, None).await?;
        return Err(Socks5Error::UnsupportedCommand(cmd));
    }

    Ok(target)
}

/// Writes `VER REP RSV ATYP BND.ADDR BND.PORT`.
async fn send_reply<S>(stream: &mut S, reply: Reply, bound: Option<SocketAddr>) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bound = bound.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

    let mut msg = vec![SOCKS5_VERSION, reply as u8, 0x00];
    match bound.ip() {
        IpAddr::V4(ip) => {
            msg.push(SOCKS5_ATYP_IPV4);
            msg.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            msg.push(SOCKS5_ATYP_IPV6);
            msg.extend_from_slice(&ip.octets());
        }
    }
    msg.extend_from_slice(&bound.port().to_be_bytes());

    stream.write_all(&msg).await?;
    stream.flush().await
}
