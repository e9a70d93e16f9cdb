use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ErrorKind, SitemapError};

/// Serializable error report recorded in request state by the first error
/// handler that sees an error. Error pages render it through the `notifying`
/// generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// `"resource-not-found"` or `"error"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub source: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub uri: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Notification {
    pub fn from_error(err: &SitemapError, uri: &str) -> Self {
        let (kind, title) = if err.is_not_found() {
            ("resource-not-found", "Resource Not Found")
        } else {
            ("error", "An Error Occurred")
        };
        let description = match err {
            SitemapError::ComponentFailure { role, hint, .. } => {
                Some(format!("{role} of type '{hint}' could not be used"))
            }
            SitemapError::Io(inner) => Some(inner.kind().to_string()),
            _ => None,
        };
        Self {
            kind: kind.into(),
            title: title.into(),
            source: err.kind(),
            message: err.to_string(),
            description,
            location: err.location().map(str::to_string),
            uri: uri.to_string(),
            timestamp: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.source == ErrorKind::NotFound
    }
}
