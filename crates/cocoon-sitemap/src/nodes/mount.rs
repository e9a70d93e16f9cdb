use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use cocoon_components::resolve_uri;
use cocoon_types::{Environment, Result};

use crate::context::{ContextGuard, InvokeContext};
use crate::events::SitemapEvent;
use crate::processor::TreeProcessor;
use crate::variables::VariableResolver;

/// Sitemap file looked up when a mount `src` names a directory.
pub const DEFAULT_SITEMAP: &str = "sitemap.json";

/// Delegates the request to a sub-sitemap. One child processor is created
/// per distinct resolved `src` and kept until the tree is disposed.
pub struct MountNode {
    pub src: VariableResolver,
    pub uri_prefix: VariableResolver,
    pub pass_through: bool,
    pub location: String,
    children: Mutex<HashMap<String, Arc<TreeProcessor>>>,
}

impl MountNode {
    pub fn new(
        src: VariableResolver,
        uri_prefix: VariableResolver,
        pass_through: bool,
        location: String,
    ) -> Self {
        Self {
            src,
            uri_prefix,
            pass_through,
            location,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let mut src = ctx.resolve(&self.src, env)?;
        if src.ends_with('/') {
            src.push_str(DEFAULT_SITEMAP);
        }
        let mut prefix = ctx.resolve(&self.uri_prefix, env)?;
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        let child = self.child(&src, &prefix, env, ctx).await?;
        let context = child
            .context_dir()
            .unwrap_or_else(|| env.context())
            .to_string();

        let mut mounted = ContextGuard::new(env);
        mounted.change_context(&prefix, &context)?;
        if self.pass_through {
            mounted.set_pass_through(true);
        }

        if ctx.is_build_only() {
            match child.build_pipeline(&mut mounted).await? {
                Some(pipeline) => {
                    ctx.adopt_pipeline(pipeline);
                    Ok(true)
                }
                None => Ok(false),
            }
        } else {
            child.process(&mut mounted).await
        }
    }

    async fn child(
        &self,
        src: &str,
        uri_prefix: &str,
        env: &Environment,
        ctx: &InvokeContext,
    ) -> Result<Arc<TreeProcessor>> {
        let mut children = self.children.lock().await;
        if let Some(child) = children.get(src) {
            return Ok(Arc::clone(child));
        }
        let source = resolve_uri(src, env.context());
        let child = ctx.processor().create_child(&source).await?;
        tracing::info!(source = %source, location = %self.location, "Mounted sub-sitemap");
        ctx.processor().events().emit(SitemapEvent::MountCreated {
            source,
            uri_prefix: uri_prefix.to_string(),
        });
        children.insert(src.to_string(), Arc::clone(&child));
        Ok(child)
    }

    /// Number of child processors created so far.
    pub async fn child_count(&self) -> usize {
        self.children.lock().await.len()
    }

    pub async fn dispose(&self) {
        let children: Vec<_> = self.children.lock().await.drain().map(|(_, c)| c).collect();
        for child in children {
            child.dispose().await;
        }
    }
}
