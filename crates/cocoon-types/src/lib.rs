//! Shared types, errors, and request state for the Cocoon sitemap engine.
//!
//! This crate provides the foundational types used across all other Cocoon crates:
//! - `SitemapError`: unified error taxonomy
//! - `Parameters`: resolved name/value pairs handed to sitemap components
//! - `Environment`: request-scoped accessor for URI, view, object model and response
//! - `Notification`: serializable error report placed in request state for error pages

pub mod environment;
pub mod notification;

pub use environment::{Environment, ObjectModel, Request, Response, SavedContext};
pub use notification::Notification;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unified error type for all Cocoon subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SitemapError {
    // === Request routing ===
    #[error("Resource not found: {uri}")]
    ResourceNotFound {
        uri: String,
        location: Option<String>,
    },

    #[error("Client connection reset: {0}")]
    ConnectionReset(String),

    // === Wiring ===
    #[error("Cannot obtain {role} '{hint}': {message}")]
    ComponentFailure {
        role: String,
        hint: String,
        message: String,
    },

    #[error("Sitemap configuration error at {location}: {message}")]
    Configuration { location: String, message: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    PatternInvalid { pattern: String, message: String },

    // === Request processing ===
    #[error("Processing failed: {message}")]
    ProcessingFailure {
        message: String,
        location: Option<String>,
    },

    #[error("Cannot resolve '{expression}': {message}")]
    VariableResolution { expression: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a [`SitemapError`], used for error-handler routing
/// and for the `source` field of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ConnectionReset,
    ComponentFailure,
    Configuration,
    PatternInvalid,
    ProcessingFailure,
}

impl SitemapError {
    /// Shorthand for a processing failure without a location.
    pub fn processing(message: impl Into<String>) -> Self {
        SitemapError::ProcessingFailure {
            message: message.into(),
            location: None,
        }
    }

    /// Shorthand for a not-found failure on `uri`.
    pub fn not_found(uri: impl Into<String>) -> Self {
        SitemapError::ResourceNotFound {
            uri: uri.into(),
            location: None,
        }
    }

    pub fn configuration(location: impl Into<String>, message: impl Into<String>) -> Self {
        SitemapError::Configuration {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn component(
        role: impl Into<String>,
        hint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SitemapError::ComponentFailure {
            role: role.into(),
            hint: hint.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SitemapError::ResourceNotFound { .. } => ErrorKind::NotFound,
            SitemapError::ConnectionReset(_) => ErrorKind::ConnectionReset,
            SitemapError::ComponentFailure { .. } => ErrorKind::ComponentFailure,
            SitemapError::Configuration { .. } => ErrorKind::Configuration,
            SitemapError::PatternInvalid { .. } => ErrorKind::PatternInvalid,
            _ => ErrorKind::ProcessingFailure,
        }
    }

    /// Returns `true` if no pipeline or resource matched the request.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SitemapError::ResourceNotFound { .. })
    }

    /// Returns `true` if the client went away. These errors are never routed
    /// to an error handler.
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, SitemapError::ConnectionReset(_))
    }

    /// Maps the error to the HTTP status a host should answer with when the
    /// error escapes every handler.
    pub fn http_status(&self) -> u16 {
        match self {
            SitemapError::ResourceNotFound { .. } => 404,
            _ => 500,
        }
    }

    /// The sitemap location the error was raised at, if known.
    pub fn location(&self) -> Option<&str> {
        match self {
            SitemapError::ResourceNotFound { location, .. }
            | SitemapError::ProcessingFailure { location, .. } => location.as_deref(),
            SitemapError::Configuration { location, .. } => Some(location),
            _ => None,
        }
    }

    /// Attach `location` unless the error already carries one. The innermost
    /// location wins.
    pub fn with_location(self, at: &str) -> Self {
        match self {
            SitemapError::ResourceNotFound {
                uri,
                location: None,
            } => SitemapError::ResourceNotFound {
                uri,
                location: Some(at.to_string()),
            },
            SitemapError::ProcessingFailure {
                message,
                location: None,
            } => SitemapError::ProcessingFailure {
                message,
                location: Some(at.to_string()),
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for SitemapError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::ConnectionReset | Io::BrokenPipe | Io::ConnectionAborted => {
                SitemapError::ConnectionReset(err.to_string())
            }
            _ => SitemapError::Io(err),
        }
    }
}

/// A convenience alias for `Result<T, SitemapError>`.
pub type Result<T> = std::result::Result<T, SitemapError>;

// ---------------------------------------------------------------------------
// Parameters - resolved name/value pairs handed to components
// ---------------------------------------------------------------------------

/// Ordered name/value parameters passed to a sitemap component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns the value of `name`, or `default` when absent.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Parses `"true"`/`"yes"` as `true`, anything else present as `false`.
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(v) => matches!(v.trim(), "true" | "yes"),
            None => default,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Parameters(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_found() {
        let err = SitemapError::not_found("docs/index.html");
        assert_eq!(err.to_string(), "Resource not found: docs/index.html");
    }

    #[test]
    fn error_display_component_failure() {
        let err = SitemapError::component("generator", "file", "not registered");
        assert_eq!(err.to_string(), "Cannot obtain generator 'file': not registered");
    }

    #[test]
    fn error_display_pattern_invalid() {
        let err = SitemapError::PatternInvalid {
            pattern: "(".into(),
            message: "unclosed group".into(),
        };
        assert_eq!(err.to_string(), "Invalid pattern '(': unclosed group");
    }

    #[test]
    fn kind_classifies_variants() {
        assert_eq!(SitemapError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            SitemapError::ConnectionReset("gone".into()).kind(),
            ErrorKind::ConnectionReset
        );
        assert_eq!(
            SitemapError::processing("boom").kind(),
            ErrorKind::ProcessingFailure
        );
        assert_eq!(
            SitemapError::Other("misc".into()).kind(),
            ErrorKind::ProcessingFailure
        );
    }

    #[test]
    fn http_status_maps_not_found_to_404() {
        assert_eq!(SitemapError::not_found("x").http_status(), 404);
        assert_eq!(SitemapError::processing("x").http_status(), 500);
    }

    #[test]
    fn with_location_keeps_innermost() {
        let err = SitemapError::processing("boom")
            .with_location("sitemap.json#/pipelines/0")
            .with_location("outer");
        assert_eq!(err.location(), Some("sitemap.json#/pipelines/0"));
    }

    #[test]
    fn with_location_ignores_component_failures() {
        let err = SitemapError::component("matcher", "x", "y").with_location("here");
        assert_eq!(err.location(), None);
    }

    #[test]
    fn broken_pipe_becomes_connection_reset() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client gone");
        let err: SitemapError = io.into();
        assert!(err.is_connection_reset());
    }

    #[test]
    fn other_io_errors_stay_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SitemapError = io.into();
        assert!(matches!(err, SitemapError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn parameters_accessors() {
        let params: Parameters = [("a", "1"), ("flag", "yes")].into_iter().collect();
        assert_eq!(params.get("a"), Some("1"));
        assert_eq!(params.get_or("missing", "dflt"), "dflt");
        assert!(params.get_bool("flag", false));
        assert!(!params.get_bool("a", true));
        assert!(params.get_bool("missing", true));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn parameters_serialize_as_plain_map() {
        let mut params = Parameters::new();
        params.insert("x", "y");
        assert_eq!(serde_json::to_string(&params).unwrap(), r#"{"x":"y"}"#);
    }
}
