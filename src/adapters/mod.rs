pub mod file_system;
pub mod http;
pub mod http_handler;
pub mod upstream;

pub use file_system::TokioFileSystem;
pub use http::{GatewayServer, ServerSettings};
pub use http_handler::GatewayHandler;
pub use upstream::TcpTlsConnector;
