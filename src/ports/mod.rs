pub mod file_system;
pub mod http_server;
pub mod upstream;

pub use file_system::{FileSystem, FileSystemError, ResolvedFile};
pub use http_server::HttpServer;
pub use upstream::{UpstreamConnector, UpstreamError, UpstreamStream};
