use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use http::StatusCode;
use tokio::net::{TcpListener, TcpStream};

use crate::adapters::http::connection::{ClientConnection, ConnectionError};
use crate::adapters::http::response::Reply;
use crate::adapters::http_handler::GatewayHandler;
use crate::config::ServerConfig;
use crate::ports::http_server::{HttpServer, ServerRunFuture};
use crate::utils::{ConnectionGuard, ConnectionTracker, GracefulShutdown, ShutdownToken};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Listener-level knobs taken from the configuration file.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: String,
    pub keep_alive_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub max_header_bytes: usize,
}

impl ServerSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            keep_alive_timeout: config.keep_alive_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            max_header_bytes: config.max_header_bytes,
        }
    }
}

/// Accepts client connections and runs each one on its own task until
/// shutdown, then drains in-flight requests.
pub struct GatewayServer {
    handler: Arc<GatewayHandler>,
    settings: ServerSettings,
    tracker: ConnectionTracker,
    shutdown: Arc<GracefulShutdown>,
}

impl GatewayServer {
    pub fn new(
        handler: Arc<GatewayHandler>,
        settings: ServerSettings,
        shutdown: Arc<GracefulShutdown>,
    ) -> Self {
        Self {
            handler,
            settings,
            tracker: ConnectionTracker::new(),
            shutdown,
        }
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        tracing::info!(%local_addr, routes = self.handler.routes().len(), "Gateway listening");

        let mut token = self.shutdown.shutdown_token();
        loop {
            tokio::select! {
                reason = token.cancelled() => {
                    tracing::info!(?reason, "Stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
        drop(listener);

        if self.tracker.drain_connections(self.settings.shutdown_timeout).await {
            tracing::info!("Gateway stopped");
        } else {
            tracing::warn!(
                remaining = self.tracker.total_active_requests(),
                "Gateway stopped with requests still in flight"
            );
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let guard = ConnectionGuard::new(self.tracker.clone(), peer_addr);
        let handler = self.handler.clone();
        let token = self.shutdown.shutdown_token();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let conn = ClientConnection::new(stream, peer_addr, settings.max_header_bytes);
            serve_connection(conn, handler, guard, token, settings.keep_alive_timeout).await;
        });
    }
}

/// Run requests on one connection until it closes, is handed to a relay, or
/// shutdown is requested.
async fn serve_connection(
    mut conn: ClientConnection<TcpStream>,
    handler: Arc<GatewayHandler>,
    guard: ConnectionGuard,
    mut token: ShutdownToken,
    keep_alive_timeout: Duration,
) {
    let connection_id = guard.connection_id();
    let peer_addr = conn.peer_addr();

    loop {
        conn.set_timeout(Some(keep_alive_timeout));
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = conn.read_request() => next,
        };

        let head = match next {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(ConnectionError::TimedOut) => {
                tracing::debug!(connection_id, %peer_addr, "Idle connection timed out");
                break;
            }
            Err(ConnectionError::Malformed(reason)) => {
                tracing::debug!(connection_id, %peer_addr, %reason, "Malformed request head");
                reject(&mut conn, StatusCode::BAD_REQUEST).await;
                break;
            }
            Err(ConnectionError::HeaderTooLarge) => {
                tracing::debug!(connection_id, %peer_addr, "Request head too large");
                reject(&mut conn, StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE).await;
                break;
            }
            Err(e) => {
                tracing::debug!(connection_id, %peer_addr, error = %e, "Connection read failed");
                break;
            }
        };

        let _request = guard.request_guard();
        match handler.dispatch(conn, head).await {
            Ok(Some(reusable)) => conn = reusable,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(connection_id, %peer_addr, error = %e, "Response write failed");
                break;
            }
        }

        if token.is_shutdown_requested() {
            break;
        }
    }
}

async fn reject(conn: &mut ClientConnection<TcpStream>, status: StatusCode) {
    let message = status.canonical_reason().unwrap_or("Bad Request");
    if let Err(e) = Reply::text(status, message).write_to(conn, true, false).await {
        tracing::debug!(%status, error = %e, "Failed to send rejection");
    }
}

impl HttpServer for GatewayServer {
    fn run<'a>(&'a self) -> ServerRunFuture<'a> {
        Box::pin(async move {
            let listener = TcpListener::bind(&self.settings.listen_addr)
                .await
                .with_context(|| format!("Failed to bind to address: {}", self.settings.listen_addr))?;
            self.serve(listener).await
        })
    }
}
