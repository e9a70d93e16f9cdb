use std::sync::Arc;

use cocoon_types::{Environment, Result, SitemapError};

use crate::context::{ContextGuard, InvokeContext};
use crate::processor::{parse_internal_uri, InternalTarget};
use crate::variables::VariableResolver;

pub struct RedirectToNode {
    pub uri: VariableResolver,
    pub permanent: bool,
    pub location: String,
}

impl RedirectToNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let uri = ctx.resolve(&self.uri, env)?;
        perform_redirect(&uri, self.permanent, env, ctx).await?;
        Ok(true)
    }
}

/// Send the request to `uri`.
///
/// `cocoon:/path` re-enters the current sitemap and `cocoon://path` the root
/// sitemap as an internal request. Query parameters of the target are added
/// to the request for the duration of the forward. Anything else is an
/// external redirect.
pub async fn perform_redirect(
    uri: &str,
    permanent: bool,
    env: &mut Environment,
    ctx: &mut InvokeContext,
) -> Result<()> {
    if !uri.starts_with("cocoon:") {
        if !env.is_external() {
            return Err(SitemapError::processing(format!(
                "Cannot redirect to external location '{uri}' from an internal request"
            )));
        }
        tracing::debug!(location = %uri, permanent, "External redirect");
        env.redirect(uri, permanent);
        return Ok(());
    }

    let (processor, prefix, context, target) = match parse_internal_uri(uri)? {
        InternalTarget::Root(path) => {
            let root = ctx.processor().root();
            let context = root.context_dir().map(str::to_string);
            (root, String::new(), context, path)
        }
        InternalTarget::Current(path) => {
            (Arc::clone(ctx.processor()), env.prefix().to_string(), None, path)
        }
    };
    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    tracing::debug!(to = %uri, "Internal redirect");
    let mut forwarded = ContextGuard::new(env);
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        forwarded.set_parameter(name, value);
    }
    forwarded.set_uri(&prefix, path);
    if let Some(context) = context {
        forwarded.set_context(context);
    }
    forwarded.set_internal_redirect(true);

    if ctx.is_build_only() {
        let pipeline = processor
            .build_pipeline(&mut forwarded)
            .await?
            .ok_or_else(|| SitemapError::not_found(uri))?;
        ctx.adopt_pipeline(pipeline);
    } else if !processor.process(&mut forwarded).await? {
        return Err(SitemapError::not_found(uri));
    }
    Ok(())
}
