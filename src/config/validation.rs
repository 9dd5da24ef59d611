use regex::RegexBuilder;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::config::models::{RouteAction, RouteConfig, ServerConfig};

const MIN_HEADER_BYTES: usize = 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid URL in field '{field}': {url} - {reason}")]
    InvalidUrl {
        field: String,
        url: String,
        reason: String,
    },

    #[error("Invalid listen address: {address} - {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid method filter for route {route}: {message}")]
    InvalidMethodFilter { route: String, message: String },

    #[error("Route configuration conflict: {message}")]
    RouteConflict { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validator with detailed error reporting
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a complete server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Some(metrics_addr) = &config.metrics_addr {
            if metrics_addr.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::InvalidField {
                    field: "metrics_addr".to_string(),
                    message: format!("'{metrics_addr}' is not an IP:PORT address"),
                });
            }
        }

        if config.max_header_bytes < MIN_HEADER_BYTES {
            errors.push(ValidationError::InvalidField {
                field: "max_header_bytes".to_string(),
                message: format!("must be at least {MIN_HEADER_BYTES}"),
            });
        }

        if config.routes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routes".to_string(),
            });
        } else {
            for (index, route) in config.routes.iter().enumerate() {
                if let Err(mut route_errors) = Self::validate_single_route(index, route) {
                    errors.append(&mut route_errors);
                }
            }
        }

        if let Err(conflict_error_list) = Self::check_route_conflicts(&config.routes) {
            errors.extend(conflict_error_list);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate a single route configuration
    fn validate_single_route(index: usize, config: &RouteConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let label = Self::route_label(index, config);
        let prefix = config.prefix_str();

        if !prefix.is_empty() && !prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} prefix"),
                message: "Route prefixes must start with '/'".to_string(),
            });
        }

        if let Some(pattern) = &config.options.method_filter {
            if let Err(e) = RegexBuilder::new(pattern).case_insensitive(true).build() {
                errors.push(ValidationError::InvalidMethodFilter {
                    route: label.clone(),
                    message: e.to_string(),
                });
            }
        }

        match config.action {
            RouteAction::Proxy => match &config.options.target {
                Some(target) => {
                    if let Err(e) = Self::validate_url(target, &format!("{label} proxy target")) {
                        errors.push(e);
                    }
                }
                None => {
                    // Served as 503 at request time rather than refusing to start.
                    tracing::warn!(route = %label, "Proxy route has no target; requests will receive 503");
                }
            },
            RouteAction::ServeFile => {
                if let Some(root) = &config.options.target {
                    if !Path::new(root).exists() {
                        errors.push(ValidationError::FileNotFound { path: root.clone() });
                    }
                }
            }
            RouteAction::Redirect => {
                if let Some(target) = &config.options.target {
                    // Relative targets are allowed; absolute ones must parse.
                    if target.starts_with("http://") || target.starts_with("https://") {
                        if let Err(e) =
                            Self::validate_url(target, &format!("{label} redirect target"))
                        {
                            errors.push(e);
                        }
                    }
                }
            }
        }

        if let Some(code) = config.options.status_code {
            if config.action != RouteAction::Redirect {
                errors.push(ValidationError::InvalidField {
                    field: format!("{label} status_code"),
                    message: "status_code only applies to move (redirect) routes".to_string(),
                });
            } else if !Self::is_valid_redirect_status_code(code) {
                errors.push(ValidationError::InvalidField {
                    field: format!("{label} status_code"),
                    message: format!(
                        "Status code {code} is not a valid redirect code. Use 301, 302, 303, 307, or 308"
                    ),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidUrl {
                        field: context.to_string(),
                        url: url_str.to_string(),
                        reason: "URL must use http:// or https:// scheme".to_string(),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidUrl {
                        field: context.to_string(),
                        url: url_str.to_string(),
                        reason: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidUrl {
                field: context.to_string(),
                url: url_str.to_string(),
                reason: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Report routes that can never be reached because an earlier route
    /// without a method filter already claims every path they could match.
    fn check_route_conflicts(routes: &[RouteConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (later_index, later) in routes.iter().enumerate() {
            let shadowed_by = routes[..later_index].iter().enumerate().find(|(_, earlier)| {
                earlier.options.method_filter.is_none()
                    && later.prefix_str().starts_with(earlier.prefix_str())
            });

            if let Some((earlier_index, earlier)) = shadowed_by {
                errors.push(ValidationError::RouteConflict {
                    message: format!(
                        "{} is unreachable: {} matches every path it could match",
                        Self::route_label(later_index, later),
                        Self::route_label(earlier_index, earlier)
                    ),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn route_label(index: usize, config: &RouteConfig) -> String {
        match config.prefix_str() {
            "" => format!("route #{index} ({} catch-all)", config.action),
            prefix => format!("route #{index} ({} '{prefix}')", config.action),
        }
    }

    /// Check if status code is valid for redirects
    fn is_valid_redirect_status_code(code: u16) -> bool {
        matches!(code, 301 | 302 | 303 | 307 | 308)
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let mut message = format!("Found {} validation error(s):\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
