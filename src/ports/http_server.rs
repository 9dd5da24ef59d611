use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

/// Type alias for HTTP server run futures
pub type ServerRunFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// HttpServer defines the port (interface) for serving client connections
pub trait HttpServer: Send + Sync + 'static {
    /// Run the HTTP server
    ///
    /// # Returns
    /// A future that resolves once the server has shut down and drained, or
    /// failed to start
    fn run<'a>(&'a self) -> ServerRunFuture<'a>;
}
