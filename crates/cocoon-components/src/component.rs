//! Contracts for the pluggable sitemap components.
//!
//! Generators, readers and actions may block on I/O and are `async`. Matchers,
//! selectors and the SAX stages are pure CPU work and stay synchronous.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cocoon_types::{Environment, Parameters, Result, SitemapError};

use crate::sax::XmlConsumer;
use crate::source::SourceResolver;

/// Result variables produced by a matcher or action.
pub type MatchResult = HashMap<String, String>;

/// A pattern compiled once at build time by a preparable matcher.
pub type PreparedPattern = Arc<dyn Any + Send + Sync>;

/// Shared buffer the link-gathering stage appends to.
pub type LinkSink = Arc<Mutex<Vec<String>>>;

/// Everything a pipeline stage needs when it is set up for one request.
pub struct Setup<'a> {
    pub env: &'a Environment,
    pub source: Option<&'a str>,
    pub params: &'a Parameters,
    pub resolver: &'a dyn SourceResolver,
    pub links: Option<LinkSink>,
}

impl<'a> Setup<'a> {
    pub fn new(
        env: &'a Environment,
        source: Option<&'a str>,
        params: &'a Parameters,
        resolver: &'a dyn SourceResolver,
    ) -> Self {
        Self {
            env,
            source,
            params,
            resolver,
            links: None,
        }
    }

    /// The `src` attribute, or a processing failure naming `role`.
    pub fn require_source(&self, role: &str) -> Result<&'a str> {
        self.source
            .ok_or_else(|| SitemapError::processing(format!("{role} requires a 'src' attribute")))
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, setup: &Setup<'_>, consumer: &mut dyn XmlConsumer) -> Result<()>;
}

pub trait Transformer: Send + Sync {
    /// Wrap `next` in this transformer's consumer.
    fn transformer<'a>(
        &self,
        setup: &Setup<'_>,
        next: Box<dyn XmlConsumer + 'a>,
    ) -> Result<Box<dyn XmlConsumer + 'a>>;
}

pub trait Serializer: Send + Sync {
    fn serializer<'a>(
        &self,
        setup: &Setup<'_>,
        out: &'a mut Vec<u8>,
    ) -> Result<Box<dyn XmlConsumer + 'a>>;

    fn mime_type(&self) -> &str;
}

#[async_trait]
pub trait Reader: Send + Sync {
    async fn read(&self, setup: &Setup<'_>, out: &mut Vec<u8>) -> Result<()>;

    /// Content type of what [`Reader::read`] produces, if known up front.
    fn mime_type(&self, setup: &Setup<'_>) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Routing components
// ---------------------------------------------------------------------------

pub trait Matcher: Send + Sync {
    /// Match `pattern` against the request. `None` means no match.
    fn matches(
        &self,
        pattern: &str,
        env: &Environment,
        params: &Parameters,
    ) -> Result<Option<MatchResult>>;

    /// Whether [`Matcher::prepare`] compiles patterns ahead of time.
    fn preparable(&self) -> bool {
        false
    }

    fn prepare(&self, pattern: &str) -> Result<PreparedPattern> {
        Err(SitemapError::PatternInvalid {
            pattern: pattern.to_string(),
            message: "matcher does not support prepared patterns".into(),
        })
    }

    fn matches_prepared(
        &self,
        prepared: &PreparedPattern,
        env: &Environment,
        params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        let _ = (prepared, env, params);
        Err(SitemapError::processing(
            "matcher does not support prepared patterns",
        ))
    }
}

pub trait Selector: Send + Sync {
    fn select(&self, test: &str, env: &Environment, params: &Parameters) -> Result<bool>;

    /// Switch selectors compute one value per `select` block with
    /// [`Selector::switch_context`] and compare every test against it.
    fn is_switch(&self) -> bool {
        false
    }

    fn switch_context(&self, env: &Environment, params: &Parameters) -> Result<Option<String>> {
        let _ = (env, params);
        Ok(None)
    }

    fn select_in_context(&self, test: &str, context: Option<&str>) -> bool {
        context == Some(test)
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    /// Perform the action. `None` means the action did not fire and its
    /// children are skipped.
    async fn act(
        &self,
        env: &mut Environment,
        source: Option<&str>,
        params: &Parameters,
    ) -> Result<Option<MatchResult>>;
}
