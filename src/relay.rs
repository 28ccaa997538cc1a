//! Bidirectional byte relay between a client and a destination.
//!
//! Each direction runs on its own task. When either one ends (EOF, error or
//! idle timeout) it cancels the other, both write sides are shut down and
//! every half is dropped, so neither connection outlives the tunnel.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

const BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved in each direction over the tunnel's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_dest: u64,
    pub dest_to_client: u64,
}

/// Last time either direction moved bytes, in millis since `start`.
struct Activity {
    start: Instant,
    last: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last
            .store(self.start.elapsed().as_millis() as u64, Ordering::Release);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last.load(Ordering::Acquire));
        self.start.elapsed().saturating_sub(last)
    }
}

/// Splices `client` and `dest` until one side finishes.
///
/// With `idle_timeout` set, the tunnel is also torn down once neither
/// direction has carried data for that long. Without it a silent peer keeps
/// the tunnel open indefinitely.
pub async fn relay<C, D>(client: C, dest: D, idle_timeout: Option<Duration>) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    D: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (dest_read, dest_write) = tokio::io::split(dest);

    let teardown = CancellationToken::new();
    let activity = Arc::new(Activity::new());

    let upload = tokio::spawn(transfer(
        dest_write,
        client_read,
        teardown.clone(),
        activity.clone(),
        idle_timeout,
    ));
    let download = tokio::spawn(transfer(
        client_write,
        dest_read,
        teardown,
        activity,
        idle_timeout,
    ));

    let (upload, download) = tokio::join!(upload, download);
    RelayStats {
        client_to_dest: upload.unwrap_or(0),
        dest_to_client: download.unwrap_or(0),
    }
}

/// Copies `source` into `destination` until EOF, error or teardown.
async fn transfer<R, W>(
    mut destination: W,
    mut source: R,
    teardown: CancellationToken,
    activity: Arc<Activity>,
    idle_timeout: Option<Duration>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Whichever direction finishes first takes the other one down with it
    let _guard = teardown.clone().drop_guard();

    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = teardown.cancelled() => break,
            read = read_with_idle(&mut source, &mut buf, &activity, idle_timeout) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    trace!(error = %e, "relay read ended");
                    break;
                }
            },
        };

        tokio::select! {
            _ = teardown.cancelled() => break,
            written = destination.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    trace!(error = %e, "relay write ended");
                    break;
                }
            }
        }

        activity.touch();
        total += n as u64;
    }

    let _ = destination.shutdown().await;
    total
}

async fn read_with_idle<R>(
    source: &mut R,
    buf: &mut [u8],
    activity: &Activity,
    idle_timeout: Option<Duration>,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let Some(idle_timeout) = idle_timeout else {
        return source.read(buf).await;
    };

    loop {
        match tokio::time::timeout(idle_timeout, source.read(buf)).await {
            Ok(read) => return read,
            // The other direction may still be busy
            Err(_) if activity.idle_for() < idle_timeout => continue,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "tunnel idle timeout",
                ))
            }
        }
    }
}
