pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigError, load_config};
pub use models::{RouteAction, RouteConfig, RouteOptions, ServerConfig, ServerConfigBuilder};
pub use validation::{ConfigValidator, ValidationError};
