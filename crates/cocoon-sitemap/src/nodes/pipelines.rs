use std::sync::Arc;

use cocoon_types::{Environment, Result, SitemapError};

use crate::context::InvokeContext;
use crate::events::SitemapEvent;

use super::error_handling::{DeferredErrorHandler, ErrorHandlers};
use super::{invoke_nodes, ProcessingNode};

/// One `pipelines[i]` entry.
pub struct PipelineNode {
    pub id: Option<String>,
    pub internal_only: bool,
    pub pass_through: bool,
    /// The last pipeline raises NotFound instead of falling through.
    pub is_last: bool,
    pub children: Vec<ProcessingNode>,
    pub handlers: Option<Arc<ErrorHandlers>>,
    pub location: String,
}

impl PipelineNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        if self.internal_only && !env.is_internal_request() {
            return Ok(false);
        }
        ctx.reset_pipeline();

        let result = match invoke_nodes(&self.children, env, ctx).await {
            Ok(false) if self.is_last && !self.pass_through && !env.is_pass_through() => {
                Err(SitemapError::not_found(env.full_uri()))
            }
            other => other,
        };

        match result {
            Ok(true) => {
                attach_deferred(self.handlers.as_ref(), ctx);
                ctx.processor().events().emit(SitemapEvent::PipelineMatched {
                    request_id: ctx.request_id().to_string(),
                    location: self.location.clone(),
                });
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) if err.is_connection_reset() => Err(err),
            Err(err) => match &self.handlers {
                Some(handlers) => handlers.handle(err, env, ctx).await,
                None => Err(err),
            },
        }
    }
}

/// The root of a sitemap: pipelines tried in order, first match wins.
pub struct PipelinesNode {
    pub children: Vec<ProcessingNode>,
    pub handlers: Option<Arc<ErrorHandlers>>,
    pub location: String,
}

impl PipelinesNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        match invoke_nodes(&self.children, env, ctx).await {
            Ok(handled) => {
                if handled {
                    attach_deferred(self.handlers.as_ref(), ctx);
                }
                Ok(handled)
            }
            Err(err) if err.is_connection_reset() => Err(err),
            Err(err) => match &self.handlers {
                Some(handlers) => handlers.handle(err, env, ctx).await,
                None => Err(err),
            },
        }
    }
}

/// A pipeline built for a caller is streamed later, outside this node.
/// Remember the handlers so a failure at that point still reaches them.
fn attach_deferred(handlers: Option<&Arc<ErrorHandlers>>, ctx: &mut InvokeContext) {
    let Some(handlers) = handlers else { return };
    if !ctx.is_build_only() || !handlers.internal_capable() {
        return;
    }
    let deferred = DeferredErrorHandler::new(
        Arc::clone(handlers),
        Arc::clone(ctx.processor()),
        Arc::clone(ctx.tree()),
    );
    if ctx.pipeline().is_some() {
        ctx.pipeline_mut().set_error_handler(deferred);
    }
}
