//! `handle_errors` blocks and the logic that routes a failure to one.
//!
//! A pipeline or pipelines node owns at most one [`ErrorHandlers`] group:
//! either a single unconditional handler or the 404/500 pair. When a failure
//! reaches the node the handler is picked as follows:
//!
//! 1. Handlers whose `when` does not cover the request (internal or external)
//!    are ignored. If none is left, the failure propagates.
//! 2. An external NotFound goes to the `404` handler if there is one.
//! 3. Otherwise the unconditional or `500` handler takes it.
//! 4. Otherwise the failure propagates.
//!
//! Connection resets are never handled.

use std::sync::Arc;

use cocoon_components::XmlConsumer;
use cocoon_types::{Environment, Notification, Result, SitemapError};

use crate::context::InvokeContext;
use crate::events::SitemapEvent;
use crate::pipeline::ProcessingPipeline;
use crate::processor::{SitemapTree, TreeProcessor};

use super::ProcessingNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// No `type`: handles everything.
    Any,
    NotFound,
    ServerError,
}

impl HandlerKind {
    pub fn parse(kind: Option<&str>) -> Option<Self> {
        match kind {
            None => Some(HandlerKind::Any),
            Some("404") => Some(HandlerKind::NotFound),
            Some("500") => Some(HandlerKind::ServerError),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerScope {
    Internal,
    External,
    Always,
}

impl HandlerScope {
    pub fn accepts(self, internal: bool) -> bool {
        match self {
            HandlerScope::Internal => internal,
            HandlerScope::External => !internal,
            HandlerScope::Always => true,
        }
    }
}

pub struct HandleErrorsNode {
    pub kind: HandlerKind,
    pub scope: HandlerScope,
    pub children: Vec<ProcessingNode>,
    pub location: String,
}

/// The handler group of one pipeline or pipelines node.
pub struct ErrorHandlers {
    handlers: Vec<ProcessingNode>,
}

impl ErrorHandlers {
    /// Fails when an unconditional handler is combined with a typed one, or
    /// when two handlers share a type and scope.
    pub fn new(handlers: Vec<HandleErrorsNode>, location: &str) -> Result<Self> {
        let any = handlers.iter().any(|h| h.kind == HandlerKind::Any);
        let typed = handlers.iter().any(|h| h.kind != HandlerKind::Any);
        if any && typed {
            return Err(SitemapError::configuration(
                location,
                "a handle_errors without type cannot be combined with type \"404\" or \"500\" handlers",
            ));
        }
        for (i, a) in handlers.iter().enumerate() {
            let overlapping = handlers[i + 1..].iter().any(|b| {
                a.kind == b.kind
                    && (a.scope == b.scope
                        || a.scope == HandlerScope::Always
                        || b.scope == HandlerScope::Always)
            });
            if overlapping {
                return Err(SitemapError::configuration(
                    &a.location,
                    "duplicate handle_errors for the same type and request scope",
                ));
            }
        }
        Ok(Self {
            handlers: handlers.into_iter().map(ProcessingNode::HandleErrors).collect(),
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ProcessingNode> {
        self.handlers.iter()
    }

    fn entries(&self) -> impl Iterator<Item = (&ProcessingNode, &HandleErrorsNode)> {
        self.handlers.iter().filter_map(|node| match node {
            ProcessingNode::HandleErrors(h) => Some((node, h)),
            _ => None,
        })
    }

    /// Whether any handler covers internal requests.
    pub fn internal_capable(&self) -> bool {
        self.entries().any(|(_, h)| h.scope.accepts(true))
    }

    pub fn select(&self, err: &SitemapError, internal: bool) -> Option<&ProcessingNode> {
        let capable: Vec<_> = self
            .entries()
            .filter(|(_, h)| h.scope.accepts(internal))
            .collect();
        if !internal && err.is_not_found() {
            if let Some((node, _)) = capable.iter().find(|(_, h)| h.kind == HandlerKind::NotFound) {
                return Some(*node);
            }
        }
        capable
            .iter()
            .find(|(_, h)| matches!(h.kind, HandlerKind::Any | HandlerKind::ServerError))
            .map(|(node, _)| *node)
    }

    /// Build the error page pipeline for `err` in a fresh build-only context.
    /// `None` means the handler answered with an external redirect. Returns
    /// `err` itself when no handler claims it.
    pub async fn prepare(
        &self,
        err: SitemapError,
        env: &mut Environment,
        processor: &Arc<TreeProcessor>,
        tree: &Arc<SitemapTree>,
    ) -> Result<Option<ProcessingPipeline>> {
        if err.is_connection_reset() {
            return Err(err);
        }
        let Some(handler) = self.select(&err, env.is_internal_request()) else {
            return Err(err);
        };

        // Only the first handler to see a failure resets the response and
        // records it.
        if env.object_model.notification.is_none() {
            tracing::warn!(
                uri = %env.full_uri(),
                location = err.location().unwrap_or("unknown"),
                error = %err,
                "Routing failure to error handler"
            );
            env.response_mut().reset();
            env.response_mut().status = err.http_status();
            env.object_model.notification = Some(Notification::from_error(&err, &env.full_uri()));
            env.object_model.throwable = Some(err.to_string());
        }

        let mut handler_ctx = InvokeContext::new(Arc::clone(processor), Arc::clone(tree), true);
        let handled = handler.invoke(env, &mut handler_ctx).await?;
        processor.events().emit(SitemapEvent::ErrorHandled {
            request_id: handler_ctx.request_id().to_string(),
            location: handler.location().to_string(),
            kind: format!("{:?}", err.kind()),
        });
        match handler_ctx.take_pipeline() {
            Some(pipeline) if handled => Ok(Some(pipeline)),
            None if handled && env.redirect_location().is_some() => Ok(None),
            _ => Err(err),
        }
    }

    /// Route `err` to a handler and either process its pipeline or, in
    /// build-only mode, hand the pipeline to the caller.
    pub async fn handle(
        &self,
        err: SitemapError,
        env: &mut Environment,
        ctx: &mut InvokeContext,
    ) -> Result<bool> {
        let processor = Arc::clone(ctx.processor());
        let tree = Arc::clone(ctx.tree());
        match self.prepare(err, env, &processor, &tree).await? {
            Some(pipeline) if ctx.is_build_only() => {
                ctx.adopt_pipeline(pipeline);
                Ok(true)
            }
            Some(mut pipeline) => pipeline.process(env).await,
            None => Ok(true),
        }
    }
}

/// Handlers remembered by a pipeline built in build-only mode, applied if
/// the pipeline fails while its XML is streamed into an aggregate.
#[derive(Clone)]
pub struct DeferredErrorHandler {
    handlers: Arc<ErrorHandlers>,
    processor: Arc<TreeProcessor>,
    tree: Arc<SitemapTree>,
}

impl DeferredErrorHandler {
    pub fn new(
        handlers: Arc<ErrorHandlers>,
        processor: Arc<TreeProcessor>,
        tree: Arc<SitemapTree>,
    ) -> Self {
        Self {
            handlers,
            processor,
            tree,
        }
    }

    pub async fn handle(
        &self,
        err: SitemapError,
        env: &Environment,
        consumer: &mut (dyn XmlConsumer + '_),
    ) -> Result<()> {
        let mut env = env.clone();
        match self
            .handlers
            .prepare(err, &mut env, &self.processor, &self.tree)
            .await?
        {
            Some(pipeline) => pipeline.process_xml(&env, consumer).await,
            None => Err(SitemapError::processing(
                "Error handler redirected while its output was being included",
            )),
        }
    }
}
