use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::core::UpstreamTarget;

/// Error type for opening upstream connections
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// DNS lookup, refusal or any other socket-level failure
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {addr} after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("TLS handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS server name '{0}'")]
    InvalidServerName(String),
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Any bidirectional byte stream the relay can drive.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A connected upstream, plain TCP or TLS.
pub type UpstreamStream = Box<dyn AsyncStream>;

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = UpstreamResult<UpstreamStream>> + Send + 'a>>;

/// UpstreamConnector defines the port (interface) for reaching proxy targets
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Connect to `target`, using TLS when its scheme is `https`.
    ///
    /// `timeout` bounds the whole connect (including the handshake); `None`
    /// leaves it to the operating system.
    fn connect<'a>(&'a self, target: &'a UpstreamTarget, timeout: Option<Duration>) -> ConnectFuture<'a>;
}
