pub mod connection_tracker;
pub mod graceful_shutdown;

pub use connection_tracker::{ConnectionGuard, ConnectionTracker};
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken};
