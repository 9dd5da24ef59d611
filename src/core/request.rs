use http::header::{AsHeaderName, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Version};
use std::net::SocketAddr;

/// The parsed head of one client request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Raw (still percent-encoded) path, without the query.
    pub path: String,
    /// Query string without the leading `?`.
    pub query: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub peer_addr: SocketAddr,
}

impl RequestHead {
    pub fn header_str<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header_str(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    /// Whether the client expects the connection to stay open after the
    /// response, following the HTTP/1.0 and HTTP/1.1 defaults.
    pub fn wants_keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.headers
                .get_all(CONNECTION)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };

        match self.version {
            Version::HTTP_11 => !has_token("close"),
            Version::HTTP_10 => has_token("keep-alive"),
            _ => false,
        }
    }
}
