use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_KEEP_ALIVE_TIMEOUT_SECS: u64 = 75;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_HEADER_BYTES: usize = 16 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Routes in registration order; the first match wins.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default = "default_keep_alive_timeout_secs")]
    pub keep_alive_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// Address for the Prometheus scrape endpoint. Metrics are still recorded
    /// through the facade when this is unset, they are just not exported.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_keep_alive_timeout_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_TIMEOUT_SECS
}

fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<String>,
    routes: Vec<RouteConfig>,
    keep_alive_timeout_secs: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
    max_header_bytes: Option<usize>,
    metrics_addr: Option<String>,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Append a route. Routes are matched in the order they are added.
    pub fn route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    pub fn keep_alive_timeout_secs(mut self, secs: u64) -> Self {
        self.keep_alive_timeout_secs = Some(secs);
        self
    }

    pub fn shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = Some(secs);
        self
    }

    pub fn max_header_bytes(mut self, bytes: usize) -> Self {
        self.max_header_bytes = Some(bytes);
        self
    }

    pub fn metrics_addr(mut self, addr: impl Into<String>) -> Self {
        self.metrics_addr = Some(addr.into());
        self
    }

    /// Build the final ServerConfig
    pub fn build(self) -> Result<ServerConfig, String> {
        let listen_addr = self
            .listen_addr
            .ok_or_else(|| "listen_addr is required".to_string())?;

        if self.routes.is_empty() {
            return Err("At least one route must be configured".to_string());
        }

        Ok(ServerConfig {
            listen_addr,
            routes: self.routes,
            keep_alive_timeout_secs: self
                .keep_alive_timeout_secs
                .unwrap_or(DEFAULT_KEEP_ALIVE_TIMEOUT_SECS),
            shutdown_timeout_secs: self
                .shutdown_timeout_secs
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            max_header_bytes: self.max_header_bytes.unwrap_or(DEFAULT_MAX_HEADER_BYTES),
            metrics_addr: self.metrics_addr,
        })
    }
}

/// What a route does with the requests it matches.
///
/// The serialized names (`move`, `pipe`, `file`) are the configuration
/// vocabulary; the long forms are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteAction {
    #[serde(rename = "move", alias = "redirect")]
    Redirect,
    #[serde(rename = "file", alias = "serve-file", alias = "static")]
    ServeFile,
    #[serde(rename = "pipe", alias = "proxy")]
    Proxy,
}

impl RouteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteAction::Redirect => "move",
            RouteAction::ServeFile => "file",
            RouteAction::Proxy => "pipe",
        }
    }
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown route action '{0}' (expected move, pipe or file)")]
pub struct UnknownAction(pub String);

impl FromStr for RouteAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "move" | "redirect" => Ok(RouteAction::Redirect),
            "file" | "serve-file" | "static" => Ok(RouteAction::ServeFile),
            "pipe" | "proxy" => Ok(RouteAction::Proxy),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

/// Per-route options. Every recognised key is listed here; anything else in
/// the route block is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOptions {
    /// Redirect destination, upstream URL, or file root depending on the action.
    #[serde(
        default,
        alias = "href",
        alias = "path",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<String>,
    /// Idle timeout for the client connection and, for proxies, the upstream.
    /// Zero leaves the connection defaults in place.
    #[serde(default, alias = "timeout")]
    pub timeout_ms: u64,
    /// Case-insensitive regular expression tested against the request method.
    #[serde(default, alias = "method", skip_serializing_if = "Option::is_none")]
    pub method_filter: Option<String>,
    /// Redirect status code (301, 302, 303, 307 or 308).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn method_filter(mut self, pattern: impl Into<String>) -> Self {
        self.method_filter = Some(pattern.into());
        self
    }

    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// The configured timeout, or `None` when it is zero.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub action: RouteAction,
    /// Literal path prefix. Missing or empty means catch-all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(flatten)]
    pub options: RouteOptions,
}

impl RouteConfig {
    pub fn new(action: RouteAction, prefix: Option<&str>, options: RouteOptions) -> Self {
        Self {
            action,
            prefix: prefix.map(str::to_string),
            options,
        }
    }

    /// Create a redirect route
    pub fn redirect(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            action: RouteAction::Redirect,
            prefix: Some(prefix.into()),
            options: RouteOptions::new().target(target),
        }
    }

    /// Create a proxy route to a single upstream
    pub fn proxy(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            action: RouteAction::Proxy,
            prefix: Some(prefix.into()),
            options: RouteOptions::new().target(target),
        }
    }

    /// Create a file serving route rooted at `root`
    pub fn files(prefix: Option<&str>, root: impl Into<String>) -> Self {
        Self {
            action: RouteAction::ServeFile,
            prefix: prefix.map(str::to_string),
            options: RouteOptions::new().target(root),
        }
    }

    pub fn with_options(mut self, options: RouteOptions) -> Self {
        self.options = options;
        self
    }

    /// The prefix as matched at runtime (empty for catch-all routes).
    pub fn prefix_str(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_original_vocabulary() {
        let yaml = r#"
listen_addr: "0.0.0.0:8000"
routes:
  - action: move
    prefix: /contact
    href: http://google.com
    timeout: 30000
  - action: pipe
    prefix: /blog
    href: http://localhost:8001/blog
  - action: file
    path: ./www
    method: GET|HEAD
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.routes.len(), 3);
        assert_eq!(config.keep_alive_timeout_secs, DEFAULT_KEEP_ALIVE_TIMEOUT_SECS);

        let redirect = &config.routes[0];
        assert_eq!(redirect.action, RouteAction::Redirect);
        assert_eq!(redirect.prefix_str(), "/contact");
        assert_eq!(redirect.options.target.as_deref(), Some("http://google.com"));
        assert_eq!(redirect.options.timeout(), Some(Duration::from_millis(30000)));

        let proxy = &config.routes[1];
        assert_eq!(proxy.action, RouteAction::Proxy);
        assert_eq!(proxy.options.timeout(), None);

        let files = &config.routes[2];
        assert_eq!(files.action, RouteAction::ServeFile);
        assert_eq!(files.prefix_str(), "");
        assert_eq!(files.options.target.as_deref(), Some("./www"));
        assert_eq!(files.options.method_filter.as_deref(), Some("GET|HEAD"));
    }

    #[test]
    fn test_parse_long_form_keys() {
        let yaml = r#"
listen_addr: "127.0.0.1:8080"
routes:
  - action: redirect
    prefix: /old
    target: /new
    status_code: 301
  - action: proxy
    prefix: /api
    target: https://api.example.com
    timeout_ms: 500
    method_filter: "post"
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.routes[0].action, RouteAction::Redirect);
        assert_eq!(config.routes[0].options.status_code, Some(301));
        assert_eq!(config.routes[1].action, RouteAction::Proxy);
        assert_eq!(config.routes[1].options.timeout_ms, 500);
        assert_eq!(config.routes[1].options.method_filter.as_deref(), Some("post"));
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("MOVE".parse::<RouteAction>(), Ok(RouteAction::Redirect));
        assert_eq!("pipe".parse::<RouteAction>(), Ok(RouteAction::Proxy));
        assert_eq!("serve-file".parse::<RouteAction>(), Ok(RouteAction::ServeFile));
        assert!("teleport".parse::<RouteAction>().is_err());
    }

    #[test]
    fn test_builder_requires_routes() {
        assert!(ServerConfig::builder().listen_addr("127.0.0.1:0").build().is_err());

        let config = ServerConfig::builder()
            .listen_addr("127.0.0.1:0")
            .route(RouteConfig::files(None, "./www"))
            .keep_alive_timeout_secs(5)
            .build()
            .unwrap();
        assert_eq!(config.keep_alive_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_header_bytes, DEFAULT_MAX_HEADER_BYTES);
    }
}
