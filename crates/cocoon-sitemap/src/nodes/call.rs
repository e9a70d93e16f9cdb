use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use cocoon_types::{Environment, Result, SitemapError};

use crate::context::InvokeContext;
use crate::flow::{FlowInterpreter, Redirector};
use crate::variables::{ParameterResolvers, VariableResolver};

use super::redirect::perform_redirect;
use super::{invoke_with_frame, linked, LinkSlot};

/// `call: {resource: ...}`. The resolved parameters become the resource's
/// innermost frame.
pub struct CallResourceNode {
    pub name: String,
    pub slot: LinkSlot,
    pub params: ParameterResolvers,
    pub location: String,
}

impl CallResourceNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let vars: HashMap<String, String> = ctx
            .resolve_params(&self.params, env)?
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let nodes = linked(&self.slot, &format!("Resource '{}'", self.name))?;
        tracing::debug!(resource = %self.name, "Calling resource");
        invoke_with_frame(nodes, env, ctx, None, vars).await
    }
}

pub struct CallFunctionNode {
    pub function: VariableResolver,
    pub params: ParameterResolvers,
    pub interpreter: Arc<dyn FlowInterpreter>,
    pub location: String,
}

impl CallFunctionNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let name = ctx.resolve(&self.function, env)?;
        let args = arguments(&self.params, env, ctx)?;
        let mut redirector = SitemapRedirector::new(env, ctx);
        self.interpreter.call_function(&name, &args, &mut redirector).await?;
        if !redirector.has_redirected() {
            return Err(SitemapError::processing(format!(
                "Sitemap: flow function '{name}' did not send a response"
            )));
        }
        Ok(true)
    }
}

pub struct ContinueNode {
    pub continuation: VariableResolver,
    pub params: ParameterResolvers,
    pub interpreter: Arc<dyn FlowInterpreter>,
    pub location: String,
}

impl ContinueNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let id = ctx.resolve(&self.continuation, env)?;
        let args = arguments(&self.params, env, ctx)?;
        let mut redirector = SitemapRedirector::new(env, ctx);
        self.interpreter.handle_continuation(&id, &args, &mut redirector).await?;
        if !redirector.has_redirected() {
            return Err(SitemapError::processing(format!(
                "Sitemap: continuation '{id}' did not send a response"
            )));
        }
        Ok(true)
    }
}

fn arguments(
    params: &ParameterResolvers,
    env: &Environment,
    ctx: &InvokeContext,
) -> Result<Vec<(String, String)>> {
    Ok(ctx
        .resolve_params(params, env)?
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

/// Redirector handed to flow code. `cocoon:` targets are processed (or, in
/// build-only mode, built) within the current request.
pub struct SitemapRedirector<'a> {
    env: &'a mut Environment,
    ctx: &'a mut InvokeContext,
    redirected: bool,
}

impl<'a> SitemapRedirector<'a> {
    pub fn new(env: &'a mut Environment, ctx: &'a mut InvokeContext) -> Self {
        Self {
            env,
            ctx,
            redirected: false,
        }
    }
}

#[async_trait]
impl Redirector for SitemapRedirector<'_> {
    async fn redirect(&mut self, uri: &str, permanent: bool) -> Result<()> {
        if self.redirected {
            return Err(SitemapError::processing(format!(
                "Cannot redirect to '{uri}': a response was already sent"
            )));
        }
        perform_redirect(uri, permanent, self.env, self.ctx).await?;
        self.redirected = true;
        Ok(())
    }

    fn has_redirected(&self) -> bool {
        self.redirected
    }

    fn environment(&self) -> &Environment {
        self.env
    }
}
