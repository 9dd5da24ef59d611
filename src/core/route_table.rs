use http::Method;
use regex::{Regex, RegexBuilder};
use std::time::Duration;
use thiserror::Error;

use crate::config::models::UnknownAction;
use crate::config::{RouteAction, RouteConfig, RouteOptions};
use crate::core::forward::{TargetError, UpstreamTarget};

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("invalid method filter '{pattern}': {source}")]
    InvalidMethodFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    InvalidUpstream(#[from] TargetError),

    #[error(transparent)]
    UnknownAction(#[from] UnknownAction),
}

/// Case-insensitive pattern tested against the request method.
///
/// The pattern is not anchored, so `GET` also matches a method containing
/// `GET`. Use `^GET$` for an exact match.
#[derive(Debug, Clone)]
pub struct MethodFilter {
    regex: Regex,
}

impl MethodFilter {
    pub fn new(pattern: &str) -> Result<Self, RouteError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| RouteError::InvalidMethodFilter {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self { regex })
    }

    pub fn matches(&self, method: &Method) -> bool {
        self.regex.is_match(method.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    action: RouteAction,
    prefix: String,
    options: RouteOptions,
    method_filter: Option<MethodFilter>,
    upstream: Option<UpstreamTarget>,
}

impl RouteEntry {
    fn new(action: RouteAction, prefix: Option<&str>, options: RouteOptions) -> Result<Self, RouteError> {
        let method_filter = options
            .method_filter
            .as_deref()
            .map(MethodFilter::new)
            .transpose()?;

        let upstream = match (action, options.target.as_deref()) {
            (RouteAction::Proxy, Some(target)) => Some(UpstreamTarget::parse(target)?),
            _ => None,
        };

        Ok(Self {
            action,
            prefix: prefix.unwrap_or_default().to_string(),
            options,
            method_filter,
            upstream,
        })
    }

    pub fn action(&self) -> RouteAction {
        self.action
    }

    /// Literal prefix; empty for a catch-all route.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn options(&self) -> &RouteOptions {
        &self.options
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.options.timeout()
    }

    /// Parsed upstream for proxy routes that carry a target.
    pub fn upstream(&self) -> Option<&UpstreamTarget> {
        self.upstream.as_ref()
    }

    pub fn method_filter(&self) -> Option<&MethodFilter> {
        self.method_filter.as_ref()
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        path.starts_with(&self.prefix)
            && self
                .method_filter
                .as_ref()
                .is_none_or(|filter| filter.matches(method))
    }
}

/// Ordered list of routes. Built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let mut table = Self::new();
        for route in routes {
            table.add_route(route)?;
        }
        Ok(table)
    }

    /// Register a route using the action vocabulary (`move`, `pipe`, `file`
    /// and their long-form aliases).
    pub fn add(
        &mut self,
        action: &str,
        prefix: Option<&str>,
        options: RouteOptions,
    ) -> Result<&mut Self, RouteError> {
        let action: RouteAction = action.parse()?;
        self.entries.push(RouteEntry::new(action, prefix, options)?);
        Ok(self)
    }

    pub fn add_route(&mut self, route: &RouteConfig) -> Result<&mut Self, RouteError> {
        self.entries.push(RouteEntry::new(
            route.action,
            route.prefix.as_deref(),
            route.options.clone(),
        )?);
        Ok(self)
    }

    /// First entry, in registration order, whose prefix is a literal prefix of
    /// `path` and whose method filter (if any) accepts `method`.
    pub fn find(&self, method: &Method, path: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|entry| entry.matches(method, path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
