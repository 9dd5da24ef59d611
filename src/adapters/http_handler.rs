use std::path::Path;
use std::sync::Arc;

use http::StatusCode;
use http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_RANGE, CONTENT_TYPE, EXPECT, LOCATION, RANGE,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::adapters::http::connection::{ClientConnection, ConnectionError};
use crate::adapters::http::response::{Reply, ResponseBody, ResponseHead};
use crate::config::RouteAction;
use crate::core::mime::MediaType;
use crate::core::path::{decode_path, resolve_under_root, strip_route_prefix};
use crate::core::range::{self, RangeRequest};
use crate::core::{ForwardedRequest, RelaySession, RequestHead, RouteEntry, RouteTable};
use crate::metrics::{self as gateway_metrics, RequestTimer};
use crate::ports::file_system::FileSystem;
use crate::ports::upstream::UpstreamConnector;

const STATIC_CACHE_CONTROL: &str = "public, max-age=604800";
const DEFAULT_REDIRECT_TARGET: &str = "./";
/// Bodies up to this size are read and dropped so the connection can be
/// reused; anything larger closes the connection instead. Also bounds how
/// much is drained before such a close.
const MAX_DISCARD_BODY_BYTES: u64 = 1024 * 1024;

/// Per-request entry point: matches a route and runs its action.
pub struct GatewayHandler {
    routes: Arc<RouteTable>,
    file_system: Arc<dyn FileSystem>,
    connector: Arc<dyn UpstreamConnector>,
}

impl GatewayHandler {
    pub fn new(
        routes: Arc<RouteTable>,
        file_system: Arc<dyn FileSystem>,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        Self {
            routes,
            file_system,
            connector,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handle one request. Returns the connection when it may serve another
    /// request; `None` when it was closed or handed to a relay.
    pub async fn dispatch<S>(
        &self,
        mut conn: ClientConnection<S>,
        head: RequestHead,
    ) -> Result<Option<ClientConnection<S>>, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(route) = self.routes.find(&head.method, &head.path) else {
            tracing::debug!(method = %head.method, path = %head.path, "No route matched");
            let timer = RequestTimer::new("none", head.method.as_str());
            let reply = Reply::text(StatusCode::NOT_FOUND, "Not Found");
            return Self::finish(conn, &head, reply, timer).await;
        };

        if let Some(timeout) = route.timeout() {
            conn.set_timeout(Some(timeout));
        }

        let timer = RequestTimer::new(route.action().as_str(), head.method.as_str());
        match route.action() {
            RouteAction::Redirect => {
                let reply = Self::redirect(route);
                Self::finish(conn, &head, reply, timer).await
            }
            RouteAction::ServeFile => {
                let reply = self.serve_file(&head, route).await;
                Self::finish(conn, &head, reply, timer).await
            }
            RouteAction::Proxy => self.proxy(conn, head, route, timer).await,
        }
    }

    fn redirect(route: &RouteEntry) -> Reply {
        let target = route
            .options()
            .target
            .as_deref()
            .unwrap_or(DEFAULT_REDIRECT_TARGET);
        let status = route
            .options()
            .status_code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::FOUND);

        tracing::debug!(%target, %status, "Redirecting");
        Reply::new(
            ResponseHead::new(status).header(LOCATION, target),
            ResponseBody::Empty,
        )
    }

    async fn serve_file(&self, head: &RequestHead, route: &RouteEntry) -> Reply {
        let root = route.options().target.as_deref().unwrap_or(".");
        let relative = decode_path(strip_route_prefix(&head.path, route.prefix()));
        let candidate = resolve_under_root(Path::new(root), &relative);

        let file = match self.file_system.resolve(candidate).await {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %head.path, error = %e, "File lookup failed");
                return Reply::text(StatusCode::NOT_FOUND, "file not found");
            }
        };
        let media_type = MediaType::for_path(&file.path);
        let content_type = media_type.header_value();

        let window = match head.header_str(RANGE).map(|value| range::evaluate(value, file.size)) {
            None | Some(RangeRequest::Ignored) => None,
            Some(RangeRequest::Window(window)) => Some(window),
            Some(RangeRequest::Malformed) => {
                return Reply::text(StatusCode::BAD_REQUEST, "malformed range");
            }
            Some(RangeRequest::Unsatisfiable) => {
                return Reply::text(StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable")
                    .header(CONTENT_RANGE, format!("bytes */{}", file.size));
            }
        };

        let (start, end) = window.map_or((0, file.size), |w| (w.start, w.chunk_end));
        let reader = match self.file_system.open(&file, start, end).await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::debug!(path = %file.path.display(), error = %e, "File open failed");
                return Reply::text(StatusCode::NOT_FOUND, "file not found");
            }
        };
        let body = ResponseBody::File {
            reader,
            len: end - start,
        };

        let response = match window {
            Some(window) => ResponseHead::new(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_RANGE, window.content_range(file.size))
                .header(CONTENT_TYPE, &content_type)
                .header(ACCEPT_RANGES, "bytes")
                .header(CACHE_CONTROL, STATIC_CACHE_CONTROL),
            None if media_type.is_streaming() => {
                ResponseHead::new(StatusCode::OK).header(CONTENT_TYPE, content_type)
            }
            None => ResponseHead::new(StatusCode::OK)
                .header(CACHE_CONTROL, STATIC_CACHE_CONTROL)
                .header(CONTENT_TYPE, content_type),
        };
        Reply::new(response, body)
    }

    async fn proxy<S>(
        &self,
        conn: ClientConnection<S>,
        head: RequestHead,
        route: &RouteEntry,
        timer: RequestTimer,
    ) -> Result<Option<ClientConnection<S>>, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let action = timer.action();
        let Some(upstream) = route.upstream() else {
            tracing::warn!(prefix = route.prefix(), "Proxy route has no target");
            let reply = Reply::text(StatusCode::SERVICE_UNAVAILABLE, "url not found");
            return Self::finish(conn, &head, reply, timer).await;
        };

        let mut upstream_stream = match self.connector.connect(upstream, route.timeout()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(%upstream, error = %e, "Upstream connection failed");
                gateway_metrics::increment_upstream_connect_failure(&upstream.to_string());
                let reply = Reply::text(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
                return Self::finish(conn, &head, reply, timer).await;
            }
        };

        let forwarded = ForwardedRequest::build(&head, route.prefix(), upstream);
        let (client, buffered) = conn.into_parts();

        let handoff = async {
            upstream_stream.write_all(&forwarded.encode_head()).await?;
            if !buffered.is_empty() {
                upstream_stream.write_all(&buffered).await?;
            }
            upstream_stream.flush().await
        };
        let handoff = match route.timeout() {
            Some(limit) => tokio::time::timeout(limit, handoff)
                .await
                .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into())),
            None => handoff.await,
        };
        if let Err(e) = handoff {
            tracing::warn!(%upstream, error = %e, "Failed to forward request head upstream");
            gateway_metrics::increment_request_total(action, head.method.as_str(), "aborted");
            return Ok(None);
        }

        tracing::debug!(
            method = %head.method,
            path = %head.path,
            forwarded_path = %forwarded.path,
            %upstream,
            "Relaying to upstream"
        );
        let report = RelaySession::new(client, upstream_stream, route.timeout())
            .run()
            .await;

        gateway_metrics::record_relay(&report);
        gateway_metrics::increment_request_total(action, head.method.as_str(), "relayed");
        tracing::info!(
            method = %head.method,
            path = %head.path,
            peer = %head.peer_addr,
            %upstream,
            client_to_upstream = report.client_to_upstream,
            upstream_to_client = report.upstream_to_client,
            end = %report.end,
            duration = ?timer.elapsed(),
            "Relay finished"
        );
        Ok(None)
    }

    /// Write a gateway-generated reply and decide whether the connection
    /// stays open for the next request.
    async fn finish<S>(
        mut conn: ClientConnection<S>,
        head: &RequestHead,
        reply: Reply,
        timer: RequestTimer,
    ) -> Result<Option<ClientConnection<S>>, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let action = timer.action();
        let body_len = head.content_length().unwrap_or(0);
        let keep_alive = head.wants_keep_alive()
            && !head.is_chunked()
            && head.headers.get(EXPECT).is_none()
            && body_len <= MAX_DISCARD_BODY_BYTES;

        let status = reply.status();
        let written = reply.write_to(&mut conn, !head.is_head(), keep_alive).await?;

        gateway_metrics::increment_request_total(action, head.method.as_str(), status.as_str());
        tracing::info!(
            method = %head.method,
            path = %head.path,
            peer = %head.peer_addr,
            status = status.as_u16(),
            action,
            bytes = written,
            duration = ?timer.elapsed(),
            "Request handled"
        );

        if !keep_alive {
            if head.is_chunked() || body_len > 0 {
                let limit = if head.is_chunked() {
                    MAX_DISCARD_BODY_BYTES
                } else {
                    body_len.min(MAX_DISCARD_BODY_BYTES)
                };
                let drained = conn.linger_close(limit).await;
                tracing::debug!(drained, "Closed connection with an unread request body");
            }
            return Ok(None);
        }
        if body_len > 0 {
            conn.discard_body(body_len).await?;
        }
        Ok(Some(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_system::TokioFileSystem;
    use crate::config::RouteOptions;
    use crate::core::UpstreamTarget;
    use crate::ports::upstream::{ConnectFuture, UpstreamError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    /// Connector that never succeeds, counting attempts.
    #[derive(Default)]
    struct RefusingConnector {
        attempts: AtomicUsize,
    }

    impl UpstreamConnector for RefusingConnector {
        fn connect<'a>(&'a self, target: &'a UpstreamTarget, _timeout: Option<Duration>) -> ConnectFuture<'a> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Err(UpstreamError::Connect {
                    addr: target.authority(),
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                })
            })
        }
    }

    fn handler(table: RouteTable, connector: Arc<dyn UpstreamConnector>) -> GatewayHandler {
        GatewayHandler::new(Arc::new(table), Arc::new(TokioFileSystem::new()), connector)
    }

    /// Send `raw` through `dispatch` and return the raw response text plus
    /// whether the connection was kept.
    async fn exchange(handler: &GatewayHandler, raw: &[u8]) -> (String, bool) {
        let (mut client, server): (DuplexStream, DuplexStream) = duplex(1 << 20);
        client.write_all(raw).await.unwrap();

        let mut conn = ClientConnection::new(server, "203.0.113.9:5000".parse().unwrap(), 16 * 1024);
        let head = conn.read_request().await.unwrap().unwrap();

        // The connection is dropped at the end of `serve`, which lets the
        // reader see EOF.
        let serve = async {
            let kept = handler.dispatch(conn, head).await.unwrap();
            kept.is_some()
        };
        let read = async {
            let mut out = Vec::new();
            client.read_to_end(&mut out).await.unwrap();
            out
        };
        let (reused, out) = tokio::join!(serve, read);
        (String::from_utf8_lossy(&out).into_owned(), reused)
    }

    fn www() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("style.css"), b"body{}").unwrap();
        let video: Vec<u8> = (0..5_000_000u32).map(|i| b'a' + (i % 26) as u8).collect();
        std::fs::write(dir.path().join("clip.mp4"), video).unwrap();
        std::fs::write(dir.path().join("song.opus"), b"OggS").unwrap();
        dir
    }

    fn file_table(root: &Path) -> RouteTable {
        let mut table = RouteTable::new();
        table
            .add(
                "file",
                None,
                RouteOptions::new().target(root.to_string_lossy().to_string()),
            )
            .unwrap();
        table
    }

    #[tokio::test]
    async fn test_serves_index_with_content_type() {
        let dir = www();
        let handler = handler(file_table(dir.path()), Arc::new(RefusingConnector::default()));

        let (response, reused) = exchange(&handler, b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("content-type: text/html; charset=utf-8\r\n"));
        assert!(response.contains("cache-control: public, max-age=604800\r\n"));
        assert!(response.contains("content-length: 13\r\n"));
        assert!(response.ends_with("<h1>home</h1>"));
        assert!(reused);

        let (response, _) = exchange(&handler, b"GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.ends_with("<h1>home</h1>"));
    }

    #[tokio::test]
    async fn test_media_without_range_has_no_cache_control() {
        let dir = www();
        let handler = handler(file_table(dir.path()), Arc::new(RefusingConnector::default()));

        let (response, _) = exchange(&handler, b"HEAD /clip.mp4 HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("content-type: video/mp4\r\n"));
        assert!(response.contains("content-length: 5000000\r\n"));
        assert!(!response.contains("cache-control"));
        assert!(!response.contains("accept-ranges"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_audio_types_are_not_cached() {
        let dir = www();
        let handler = handler(file_table(dir.path()), Arc::new(RefusingConnector::default()));

        let (response, _) = exchange(&handler, b"GET /song.opus HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("content-type: audio/"));
        assert!(!response.contains("cache-control"));
        assert!(response.ends_with("OggS"));
    }

    #[tokio::test]
    async fn test_route_timeout_cuts_off_stalled_client() {
        let dir = www();
        let mut table = RouteTable::new();
        table
            .add(
                "file",
                None,
                RouteOptions::new()
                    .target(dir.path().to_string_lossy().to_string())
                    .timeout_ms(100),
            )
            .unwrap();
        let handler = handler(table, Arc::new(RefusingConnector::default()));

        // The announced body never arrives.
        let (mut client, server) = duplex(1 << 16);
        client
            .write_all(b"POST /style.css HTTP/1.1\r\nContent-Length: 10\r\n\r\n")
            .await
            .unwrap();
        let mut conn = ClientConnection::new(server, "203.0.113.9:5000".parse().unwrap(), 16 * 1024);
        let head = conn.read_request().await.unwrap().unwrap();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(5), handler.dispatch(conn, head))
            .await
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::TimedOut)));
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(client);
    }

    #[tokio::test]
    async fn test_expect_body_closes_after_draining() {
        let dir = www();
        let handler = handler(file_table(dir.path()), Arc::new(RefusingConnector::default()));

        let (response, reused) = exchange(
            &handler,
            b"POST /style.css HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await;
        assert!(response.contains("connection: close\r\n"));
        assert!(response.ends_with("body{}"));
        assert!(!reused);
    }

    #[tokio::test]
    async fn test_open_range_on_video() {
        let dir = www();
        let handler = handler(file_table(dir.path()), Arc::new(RefusingConnector::default()));

        let (response, _) = exchange(
            &handler,
            b"GET /clip.mp4 HTTP/1.1\r\nRange: bytes=1000000-\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 206 Partial Content"));
        assert!(head.contains("content-range: bytes 1000000-4999999/5000000"));
        assert!(head.contains("accept-ranges: bytes"));
        assert!(head.contains("cache-control: public, max-age=604800"));
        assert!(head.contains("content-length: 4000000"));
        assert_eq!(body.len(), 4_000_000);
    }

    #[tokio::test]
    async fn test_range_errors() {
        let dir = www();
        let handler = handler(file_table(dir.path()), Arc::new(RefusingConnector::default()));

        let (response, _) = exchange(&handler, b"GET /style.css HTTP/1.1\r\nRange: bytes=x-\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 "));

        let (response, _) = exchange(&handler, b"GET /style.css HTTP/1.1\r\nRange: bytes=100-\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 416 "));
        assert!(response.contains("content-range: bytes */6\r\n"));
    }

    #[tokio::test]
    async fn test_traversal_stays_inside_root() {
        let dir = www();
        let root = dir.path().join("public");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("ok.txt"), b"ok").unwrap();
        let handler = handler(file_table(&root), Arc::new(RefusingConnector::default()));

        // style.css exists one level above the root and must not be reachable.
        let (response, _) = exchange(&handler, b"GET /../style.css HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 "));
        assert!(response.ends_with("file not found"));

        let (response, _) = exchange(&handler, b"GET /%2e%2e/%2e%2e/etc/passwd HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 "));
    }

    #[tokio::test]
    async fn test_redirects() {
        let mut table = RouteTable::new();
        table
            .add("move", Some("/contact"), RouteOptions::new().target("http://example.com"))
            .unwrap()
            .add("move", Some("/old"), RouteOptions::new().status_code(301))
            .unwrap();
        let handler = handler(table, Arc::new(RefusingConnector::default()));

        let (response, _) = exchange(&handler, b"GET /contact HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(response.contains("location: http://example.com\r\n"));
        assert!(response.contains("content-length: 0\r\n"));

        let (response, _) = exchange(&handler, b"GET /old/page HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 301 "));
        assert!(response.contains("location: ./\r\n"));
    }

    #[tokio::test]
    async fn test_unmatched_request_is_404() {
        let mut table = RouteTable::new();
        table
            .add("move", Some("/only"), RouteOptions::new().method_filter("^GET$"))
            .unwrap();
        let handler = handler(table, Arc::new(RefusingConnector::default()));

        let (response, _) = exchange(&handler, b"GET /elsewhere HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 "));

        let (response, _) = exchange(&handler, b"POST /only HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 "));
    }

    #[tokio::test]
    async fn test_proxy_without_target_is_503_without_connecting() {
        let connector = Arc::new(RefusingConnector::default());
        let mut table = RouteTable::new();
        table.add("pipe", Some("/api"), RouteOptions::new()).unwrap();
        let handler = handler(table, connector.clone());

        let (response, _) = exchange(&handler, b"GET /api/x HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 503 "));
        assert!(response.ends_with("url not found"));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refused_upstream_is_503_with_error_text() {
        let connector = Arc::new(RefusingConnector::default());
        let mut table = RouteTable::new();
        table
            .add("pipe", Some("/blog"), RouteOptions::new().target("http://127.0.0.1:9/blog"))
            .unwrap();
        let handler = handler(table, connector.clone());

        let (response, _) = exchange(&handler, b"GET /blog/post HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 503 "));
        assert!(response.contains("failed to connect to 127.0.0.1:9"));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http10_and_close_are_not_reused() {
        let dir = www();
        let handler = handler(file_table(dir.path()), Arc::new(RefusingConnector::default()));

        let (response, reused) = exchange(&handler, b"GET /style.css HTTP/1.0\r\n\r\n").await;
        assert!(response.contains("connection: close\r\n"));
        assert!(!reused);

        let (_, reused) = exchange(&handler, b"GET /style.css HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(!reused);
    }
}
