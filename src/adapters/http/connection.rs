//! One client connection: request-head parsing and raw response writes.
//!
//! The connection keeps any bytes read past the end of a request head in its
//! buffer. Those bytes belong to the request body (or to the next pipelined
//! request) and are handed over with the stream by [`ClientConnection::into_parts`].

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri, Version};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::RequestHead;

const MAX_HEADERS: usize = 100;
const READ_CHUNK_BYTES: usize = 8 * 1024;
const WRITE_CHUNK_BYTES: usize = 64 * 1024;
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection timed out")]
    TimedOut,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request head too large")]
    HeaderTooLarge,

    #[error("connection closed in the middle of a request head")]
    UnexpectedEof,

    #[error("body ended after {received} of {expected} bytes")]
    ShortBody { expected: u64, received: u64 },
}

pub struct ClientConnection<S> {
    stream: S,
    peer_addr: SocketAddr,
    buffer: BytesMut,
    max_header_bytes: usize,
    timeout: Option<Duration>,
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer_addr: SocketAddr, max_header_bytes: usize) -> Self {
        Self {
            stream,
            peer_addr,
            buffer: BytesMut::with_capacity(READ_CHUNK_BYTES),
            max_header_bytes,
            timeout: None,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Bound every subsequent read and write on this connection.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Read the next request head. `Ok(None)` means the client closed the
    /// connection cleanly between requests.
    pub async fn read_request(&mut self) -> Result<Option<RequestHead>, ConnectionError> {
        loop {
            if !self.buffer.is_empty() {
                if let Some((head, len)) = parse_head(&self.buffer, self.peer_addr)? {
                    self.buffer.advance(len);
                    return Ok(Some(head));
                }
            }
            if self.buffer.len() >= self.max_header_bytes {
                return Err(ConnectionError::HeaderTooLarge);
            }

            self.buffer.reserve(READ_CHUNK_BYTES);
            let n = with_timeout(self.timeout, self.stream.read_buf(&mut self.buffer)).await?;
            if n == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ConnectionError::UnexpectedEof)
                };
            }
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        with_timeout(self.timeout, self.stream.write_all(bytes)).await
    }

    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        with_timeout(self.timeout, self.stream.flush()).await
    }

    /// Copy `reader` to the client chunk by chunk. Each read and write is
    /// bounded by the connection timeout. Returns the bytes written.
    pub async fn write_body_from<R>(&mut self, reader: &mut R) -> Result<u64, ConnectionError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut chunk = vec![0u8; WRITE_CHUNK_BYTES];
        let mut written = 0u64;
        loop {
            let n = with_timeout(self.timeout, reader.read(&mut chunk)).await?;
            if n == 0 {
                return Ok(written);
            }
            with_timeout(self.timeout, self.stream.write_all(&chunk[..n])).await?;
            written += n as u64;
        }
    }

    /// Consume and drop `len` body bytes, taking buffered bytes first.
    pub async fn discard_body(&mut self, len: u64) -> Result<(), ConnectionError> {
        let buffered = (self.buffer.len() as u64).min(len);
        self.buffer.advance(buffered as usize);

        let mut remaining = len - buffered;
        let mut scratch = vec![0u8; READ_CHUNK_BYTES];
        while remaining > 0 {
            let want = remaining.min(scratch.len() as u64) as usize;
            let n = with_timeout(self.timeout, self.stream.read(&mut scratch[..want])).await?;
            if n == 0 {
                return Err(ConnectionError::ShortBody {
                    expected: len,
                    received: len - remaining,
                });
            }
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Close a connection that still has request bytes in flight: shut down
    /// the write side, then read and drop up to `limit` bytes (or until EOF or
    /// a short deadline) so the close does not reset the response. Returns
    /// the bytes dropped.
    pub async fn linger_close(mut self, limit: u64) -> u64 {
        if let Err(e) = with_timeout(Some(LINGER_TIMEOUT), self.stream.shutdown()).await {
            tracing::debug!(peer = %self.peer_addr, error = %e, "Write shutdown failed");
            return 0;
        }

        let mut drained = (self.buffer.len() as u64).min(limit);
        self.buffer.clear();

        let deadline = tokio::time::Instant::now() + LINGER_TIMEOUT;
        let mut scratch = vec![0u8; READ_CHUNK_BYTES];
        while drained < limit {
            let want = (limit - drained).min(scratch.len() as u64) as usize;
            match tokio::time::timeout_at(deadline, self.stream.read(&mut scratch[..want])).await {
                Ok(Ok(n)) if n > 0 => drained += n as u64,
                _ => break,
            }
        }
        drained
    }

    /// Give up the connection: the raw stream plus anything read past the
    /// last request head.
    pub fn into_parts(self) -> (S, Bytes) {
        (self.stream, self.buffer.freeze())
    }
}

async fn with_timeout<F, T>(limit: Option<Duration>, operation: F) -> Result<T, ConnectionError>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, operation).await {
            Ok(result) => result.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::TimedOut),
        },
        None => operation.await.map_err(ConnectionError::from),
    }
}

fn parse_head(
    buf: &[u8],
    peer_addr: SocketAddr,
) -> Result<Option<(RequestHead, usize)>, ConnectionError> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut storage);
    let len = match request.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(ConnectionError::HeaderTooLarge),
        Err(e) => return Err(ConnectionError::Malformed(e.to_string())),
    };

    let method = request
        .method
        .ok_or_else(|| ConnectionError::Malformed("missing method".to_string()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ConnectionError::Malformed(format!("invalid method '{method}'")))?;

    let target = request
        .path
        .ok_or_else(|| ConnectionError::Malformed("missing request target".to_string()))?;
    let uri: Uri = target
        .parse()
        .map_err(|e| ConnectionError::Malformed(format!("invalid request target: {e}")))?;

    let version = match request.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for header in request.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| ConnectionError::Malformed(format!("invalid header name '{}'", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| ConnectionError::Malformed(format!("invalid value for header '{name}'")))?;
        headers.append(name, value);
    }

    let head = RequestHead {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        version,
        headers,
        peer_addr,
    };
    Ok(Some((head, len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_reads_head_and_keeps_body_bytes() {
        let (mut client, server) = duplex(4096);
        client
            .write_all(b"POST /upload?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 4\r\n\r\nbody")
            .await
            .unwrap();

        let mut conn = ClientConnection::new(server, peer(), 16 * 1024);
        let head = conn.read_request().await.unwrap().unwrap();
        assert_eq!(head.method, Method::POST);
        assert_eq!(head.path, "/upload");
        assert_eq!(head.query.as_deref(), Some("x=1"));
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.content_length(), Some(4));

        let (_, rest) = conn.into_parts();
        assert_eq!(&rest[..], b"body");
    }

    #[tokio::test]
    async fn test_head_split_across_reads() {
        let (mut client, server) = duplex(4096);
        let mut conn = ClientConnection::new(server, peer(), 16 * 1024);

        let reader = tokio::spawn(async move {
            let head = conn.read_request().await.unwrap().unwrap();
            head.path
        });
        client.write_all(b"GET /index.ht").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"ml HTTP/1.0\r\n\r\n").await.unwrap();

        assert_eq!(reader.await.unwrap(), "/index.html");
    }

    #[tokio::test]
    async fn test_clean_close_and_truncated_head() {
        let (client, server) = duplex(64);
        drop(client);
        let mut conn = ClientConnection::new(server, peer(), 1024);
        assert!(conn.read_request().await.unwrap().is_none());

        let (mut client, server) = duplex(64);
        client.write_all(b"GET / HT").await.unwrap();
        drop(client);
        let mut conn = ClientConnection::new(server, peer(), 1024);
        assert!(matches!(
            conn.read_request().await,
            Err(ConnectionError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_malformed_and_oversized_heads() {
        let (mut client, server) = duplex(4096);
        client.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();
        let mut conn = ClientConnection::new(server, peer(), 1024);
        assert!(matches!(
            conn.read_request().await,
            Err(ConnectionError::Malformed(_))
        ));

        let (mut client, server) = duplex(8192);
        let mut big = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        big.extend(std::iter::repeat_n(b'a', 2000));
        client.write_all(&big).await.unwrap();
        let mut conn = ClientConnection::new(server, peer(), 1024);
        assert!(matches!(
            conn.read_request().await,
            Err(ConnectionError::HeaderTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (_client, server) = duplex(64);
        let mut conn = ClientConnection::new(server, peer(), 1024);
        conn.set_timeout(Some(Duration::from_millis(50)));
        assert!(matches!(
            conn.read_request().await,
            Err(ConnectionError::TimedOut)
        ));
    }

    #[tokio::test]
    async fn test_discard_body_then_next_request() {
        let (mut client, server) = duplex(4096);
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /next HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut conn = ClientConnection::new(server, peer(), 4096);
        let first = conn.read_request().await.unwrap().unwrap();
        conn.discard_body(first.content_length().unwrap()).await.unwrap();
        let second = conn.read_request().await.unwrap().unwrap();
        assert_eq!(second.path, "/next");
    }

    #[tokio::test]
    async fn test_linger_close_drains_pending_body() {
        let (mut client, server) = duplex(4096);
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123")
            .await
            .unwrap();

        let mut conn = ClientConnection::new(server, peer(), 4096);
        conn.read_request().await.unwrap().unwrap();
        let closing = tokio::spawn(conn.linger_close(10));

        // The write side is shut down before the rest of the body arrives.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        client.write_all(b"456789").await.unwrap();
        let drained = tokio::time::timeout(Duration::from_secs(1), closing)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drained, 10);
    }

    #[tokio::test]
    async fn test_linger_close_stops_at_eof() {
        let (mut client, server) = duplex(4096);
        client
            .write_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello")
            .await
            .unwrap();
        let mut conn = ClientConnection::new(server, peer(), 4096);
        conn.read_request().await.unwrap().unwrap();
        drop(client);

        let drained = tokio::time::timeout(Duration::from_secs(1), conn.linger_close(1024))
            .await
            .unwrap();
        assert_eq!(drained, 8);
    }

    #[tokio::test]
    async fn test_write_body_from_reader() {
        let (mut client, server) = duplex(4096);
        let mut conn = ClientConnection::new(server, peer(), 4096);
        let mut source: &[u8] = b"streamed payload";

        let written = conn.write_body_from(&mut source).await.unwrap();
        conn.flush().await.unwrap();
        assert_eq!(written, 16);

        let mut out = vec![0u8; 16];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(out, b"streamed payload");
    }
}
