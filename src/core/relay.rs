//! Bidirectional byte relay between a client and an upstream connection.
//!
//! Both directions run inside one task. Whichever direction finishes first,
//! by EOF or by error, ends the session: the other direction is dropped and
//! both write sides are shut down. The optional timeout is an idle deadline
//! shared by the pair, so traffic in either direction keeps the session alive.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep_until, timeout};

const RELAY_BUFFER_BYTES: usize = 16 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Why a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    UpstreamClosed,
    ClientToUpstreamError(io::ErrorKind),
    UpstreamToClientError(io::ErrorKind),
    IdleTimeout,
}

impl RelayEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayEnd::ClientClosed => "client_closed",
            RelayEnd::UpstreamClosed => "upstream_closed",
            RelayEnd::ClientToUpstreamError(_) => "client_to_upstream_error",
            RelayEnd::UpstreamToClientError(_) => "upstream_to_client_error",
            RelayEnd::IdleTimeout => "idle_timeout",
        }
    }
}

impl fmt::Display for RelayEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEnd::ClientToUpstreamError(kind) | RelayEnd::UpstreamToClientError(kind) => {
                write!(f, "{} ({kind})", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    pub end: RelayEnd,
}

/// Last time a byte moved in either direction, as millis since `origin`.
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// Owns both connections for the lifetime of one proxied exchange.
pub struct RelaySession<C, U> {
    client: C,
    upstream: U,
    idle_timeout: Option<Duration>,
}

impl<C, U> RelaySession<C, U>
where
    C: AsyncRead + AsyncWrite + Send,
    U: AsyncRead + AsyncWrite + Send,
{
    pub fn new(client: C, upstream: U, idle_timeout: Option<Duration>) -> Self {
        Self {
            client,
            upstream,
            idle_timeout,
        }
    }

    pub async fn run(self) -> RelayReport {
        let (mut client_read, mut client_write) = tokio::io::split(self.client);
        let (mut upstream_read, mut upstream_write) = tokio::io::split(self.upstream);

        let client_to_upstream = AtomicU64::new(0);
        let upstream_to_client = AtomicU64::new(0);
        let activity = Activity::new();

        let end = tokio::select! {
            result = pump(&mut client_read, &mut upstream_write, &client_to_upstream, &activity) => {
                match result {
                    Ok(()) => RelayEnd::ClientClosed,
                    Err(e) => RelayEnd::ClientToUpstreamError(e.kind()),
                }
            }
            result = pump(&mut upstream_read, &mut client_write, &upstream_to_client, &activity) => {
                match result {
                    Ok(()) => RelayEnd::UpstreamClosed,
                    Err(e) => RelayEnd::UpstreamToClientError(e.kind()),
                }
            }
            _ = idle_watchdog(&activity, self.idle_timeout) => RelayEnd::IdleTimeout,
        };

        let _ = timeout(SHUTDOWN_GRACE, upstream_write.shutdown()).await;
        let _ = timeout(SHUTDOWN_GRACE, client_write.shutdown()).await;

        RelayReport {
            client_to_upstream: client_to_upstream.load(Ordering::Relaxed),
            upstream_to_client: upstream_to_client.load(Ordering::Relaxed),
            end,
        }
    }
}

/// Relay until either side closes, errors, or the pair goes idle.
pub async fn relay<C, U>(client: C, upstream: U, idle_timeout: Option<Duration>) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Send,
    U: AsyncRead + AsyncWrite + Send,
{
    RelaySession::new(client, upstream, idle_timeout).run().await
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    counter: &AtomicU64,
    activity: &Activity,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_BYTES];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
        activity.touch();
    }
}

async fn idle_watchdog(activity: &Activity, idle_timeout: Option<Duration>) {
    let Some(idle_timeout) = idle_timeout else {
        return std::future::pending().await;
    };
    loop {
        let deadline = activity.last() + idle_timeout;
        if Instant::now() >= deadline {
            return;
        }
        sleep_until(deadline).await;
    }
}
