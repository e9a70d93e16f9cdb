use cocoon_components::{ComponentHandle, Matcher, PreparedPattern};
use cocoon_types::{Environment, Result};

use crate::context::InvokeContext;
use crate::variables::{ParameterResolvers, VariableResolver};

use super::{invoke_with_frame, ProcessingNode};

pub struct MatchNode {
    pub pattern: VariableResolver,
    pub matcher: ComponentHandle<dyn Matcher>,
    pub params: ParameterResolvers,
    pub anchor: Option<String>,
    pub children: Vec<ProcessingNode>,
    pub location: String,
}

impl MatchNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let pattern = ctx.resolve(&self.pattern, env)?;
        let params = ctx.resolve_params(&self.params, env)?;
        // The lease goes back to the pool at the end of this block, errors included.
        let result = {
            let matcher = self.matcher.acquire().await?;
            matcher.matches(&pattern, env, &params)?
        };
        match result {
            Some(vars) => {
                tracing::debug!(pattern = %pattern, uri = %env.uri(), "Matched");
                invoke_with_frame(&self.children, env, ctx, self.anchor.clone(), vars).await
            }
            None => Ok(false),
        }
    }
}

/// A match whose literal pattern was compiled when the tree was built.
pub struct PreparableMatchNode {
    pub pattern: String,
    pub prepared: PreparedPattern,
    pub matcher: ComponentHandle<dyn Matcher>,
    pub params: ParameterResolvers,
    pub anchor: Option<String>,
    pub children: Vec<ProcessingNode>,
    pub location: String,
}

impl PreparableMatchNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let params = ctx.resolve_params(&self.params, env)?;
        let result = {
            let matcher = self.matcher.acquire().await?;
            matcher.matches_prepared(&self.prepared, env, &params)?
        };
        match result {
            Some(vars) => {
                tracing::debug!(pattern = %self.pattern, uri = %env.uri(), "Matched");
                invoke_with_frame(&self.children, env, ctx, self.anchor.clone(), vars).await
            }
            None => Ok(false),
        }
    }
}
