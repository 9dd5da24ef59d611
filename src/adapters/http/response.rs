use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::adapters::http::connection::{ClientConnection, ConnectionError};
use crate::ports::file_system::FileReader;

/// Status line and headers of a response written by the gateway itself.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    /// Set a header. Values that are not valid header text are dropped.
    pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => {
                tracing::warn!(header = %name, "Dropping header with invalid value");
            }
        }
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or("Unknown")
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

pub enum ResponseBody {
    Empty,
    Full(Bytes),
    /// A file window of exactly `len` bytes.
    File { reader: FileReader, len: u64 },
}

impl ResponseBody {
    pub fn len(&self) -> u64 {
        match self {
            ResponseBody::Empty => 0,
            ResponseBody::Full(bytes) => bytes.len() as u64,
            ResponseBody::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A complete response, ready to be written to a client connection.
pub struct Reply {
    pub head: ResponseHead,
    pub body: ResponseBody,
}

impl Reply {
    pub fn new(head: ResponseHead, body: ResponseBody) -> Self {
        Self { head, body }
    }

    /// Plain-text response with a short message body.
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            head: ResponseHead::new(status).header(CONTENT_TYPE, "text/plain; charset=utf-8"),
            body: ResponseBody::Full(Bytes::from(message.into())),
        }
    }

    pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
        self.head = self.head.header(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// Write the reply. `Content-Length` is always sent; `send_body` is false
    /// for HEAD requests. Returns the body bytes written.
    pub async fn write_to<S>(
        self,
        conn: &mut ClientConnection<S>,
        send_body: bool,
        keep_alive: bool,
    ) -> Result<u64, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let expected = self.body.len();
        let head = self
            .head
            .header(CONTENT_LENGTH, expected.to_string())
            .header(CONNECTION, if keep_alive { "keep-alive" } else { "close" });
        conn.write_all(&head.encode()).await?;

        let written = match self.body {
            _ if !send_body => 0,
            ResponseBody::Empty => 0,
            ResponseBody::Full(bytes) => {
                conn.write_all(&bytes).await?;
                bytes.len() as u64
            }
            ResponseBody::File { mut reader, .. } => conn.write_body_from(&mut reader).await?,
        };
        conn.flush().await?;

        if send_body && written < expected {
            return Err(ConnectionError::ShortBody {
                expected,
                received: written,
            });
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    #[test]
    fn test_encode_status_line_and_headers() {
        let head = ResponseHead::new(StatusCode::PARTIAL_CONTENT)
            .header(http::header::CONTENT_RANGE, "bytes 0-9/100");
        let text = String::from_utf8(head.encode()).unwrap();
        assert!(text.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert!(text.contains("content-range: bytes 0-9/100\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_head_request_gets_length_but_no_body() {
        let (mut client, server) = duplex(4096);
        let mut conn = ClientConnection::new(server, "127.0.0.1:1".parse().unwrap(), 1024);

        let written = Reply::text(StatusCode::NOT_FOUND, "file not found")
            .write_to(&mut conn, false, false)
            .await
            .unwrap();
        assert_eq!(written, 0);
        drop(conn);

        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(raw.contains("content-length: 14\r\n"));
        assert!(raw.contains("connection: close\r\n"));
        assert!(raw.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_truncated_file_body_is_an_error() {
        let (_client, server) = duplex(4096);
        let mut conn = ClientConnection::new(server, "127.0.0.1:1".parse().unwrap(), 1024);
        let reply = Reply::new(
            ResponseHead::new(StatusCode::OK),
            ResponseBody::File {
                reader: Box::new(&b"abc"[..]),
                len: 10,
            },
        );
        assert!(matches!(
            reply.write_to(&mut conn, true, true).await,
            Err(ConnectionError::ShortBody { expected: 10, received: 3 })
        ));
    }
}
