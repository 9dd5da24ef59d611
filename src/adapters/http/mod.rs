pub mod connection;
pub mod response;
pub mod server;


pub use connection::{ClientConnection, ConnectionError};
pub use response::{Reply, ResponseBody, ResponseHead};
pub use server::{GatewayServer, ServerSettings};
