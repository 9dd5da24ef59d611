/// Portico - a small HTTP gateway
///
/// A single listener answers requests from an ordered route table. Each route
/// either redirects, serves files from a directory (with byte ranges), or
/// hands the client connection to an upstream as a raw duplex relay.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub(crate) mod adapters;
pub(crate) mod core;

// Re-export the specific types needed by the binary crate
pub use crate::adapters::file_system::TokioFileSystem;
pub use crate::adapters::http::server::{GatewayServer, ServerSettings};
pub use crate::adapters::http_handler::GatewayHandler;
pub use crate::adapters::upstream::TcpTlsConnector;
pub use crate::core::{RouteEntry, RouteError, RouteTable};
pub use crate::ports::http_server::HttpServer;
pub use crate::utils::GracefulShutdown;
