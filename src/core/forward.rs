//! Rewriting a client request for an upstream.

use http::header::{HOST, HeaderName};
use http::{HeaderMap, HeaderValue, Method, Version};
use std::fmt;
use thiserror::Error;
use url::{Url, form_urlencoded};

use crate::core::path::{join_url_path, strip_route_prefix};
use crate::core::request::RequestHead;

const PARAMS_HEADER: &str = "params";
const REAL_IP_HEADER: &str = "real-ip";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid upstream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported upstream scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("upstream URL '{0}' has no host")]
    MissingHost(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

/// A parsed proxy target: where to connect and which base path to forward under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub scheme: Scheme,
    /// Hostname or IP literal. IPv6 addresses are stored without brackets.
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl UpstreamTarget {
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let url = Url::parse(raw).map_err(|e| TargetError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match url.scheme().to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };

        let host = match url.host() {
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => return Err(TargetError::MissingHost(raw.to_string())),
        };
        if host.is_empty() {
            return Err(TargetError::MissingHost(raw.to_string()));
        }

        Ok(Self {
            scheme,
            port: url.port().unwrap_or_else(|| scheme.default_port()),
            host,
            path: url.path().to_string(),
        })
    }

    /// `host:port` suitable for a socket connect call.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for the forwarded `Host` header: the bare hostname.
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority(), self.path)
    }
}

/// The request line and headers written to the upstream before relaying.
#[derive(Debug, Clone)]
pub struct ForwardedRequest {
    pub method: Method,
    pub path: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ForwardedRequest {
    pub fn build(head: &RequestHead, route_prefix: &str, upstream: &UpstreamTarget) -> Self {
        let relative = strip_route_prefix(&head.path, route_prefix);
        let mut path = join_url_path(&upstream.path, relative);
        if let Some(query) = &head.query {
            path.push('?');
            path.push_str(query);
        }

        let mut headers = head.headers.clone();

        let params: String = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form_urlencoded::parse(
                head.query.as_deref().unwrap_or_default().as_bytes(),
            ))
            .finish();
        if let Ok(value) = HeaderValue::from_str(&params) {
            headers.insert(HeaderName::from_static(PARAMS_HEADER), value);
        }
        if let Ok(value) = HeaderValue::from_str(&head.peer_addr.ip().to_string()) {
            headers.insert(HeaderName::from_static(REAL_IP_HEADER), value);
        }
        if let Ok(value) = HeaderValue::from_str(&upstream.host_header()) {
            headers.insert(HOST, value);
        }

        Self {
            method: head.method.clone(),
            path,
            version: head.version,
            headers,
        }
    }

    /// Serialise the request line and headers, terminated by the blank line.
    pub fn encode_head(&self) -> Vec<u8> {
        let version = match self.version {
            Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        };
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(format!("{} {} {}\r\n", self.method, self.path, version).as_bytes());
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
