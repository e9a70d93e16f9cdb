use std::collections::HashMap;
use std::sync::Arc;

use cocoon_components::{Action, ComponentHandle};
use cocoon_types::{Environment, Result};

use crate::context::InvokeContext;
use crate::variables::{ParameterResolvers, VariableResolver};

use super::{invoke_with_frame, ProcessingNode};

/// Runs one action. Its children only run when the action fires, with the
/// returned variables as a new frame.
pub struct ActTypeNode {
    pub action: ComponentHandle<dyn Action>,
    pub source: Option<VariableResolver>,
    pub params: ParameterResolvers,
    pub anchor: Option<String>,
    pub children: Vec<ProcessingNode>,
    pub location: String,
}

impl ActTypeNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let source = ctx.resolve_opt(self.source.as_ref(), env)?;
        let params = ctx.resolve_params(&self.params, env)?;
        let result = {
            let action = self.action.acquire().await?;
            action.act(env, source.as_deref(), &params).await?
        };
        match result {
            Some(vars) => {
                tracing::debug!(action = %self.action.hint(), "Action fired");
                invoke_with_frame(&self.children, env, ctx, self.anchor.clone(), vars).await
            }
            None => Ok(false),
        }
    }
}

pub struct ActionSetEntry {
    pub action: ComponentHandle<dyn Action>,
    /// Fires only when `cocoon-action` equals this value.
    pub filter: Option<String>,
    pub source: Option<VariableResolver>,
    pub params: ParameterResolvers,
}

pub struct ActionSet {
    pub name: String,
    pub entries: Vec<ActionSetEntry>,
}

impl ActionSet {
    pub fn dispose(&self) {
        for entry in &self.entries {
            entry.action.dispose();
        }
    }
}

/// Runs every applicable action of a set. Children run with the union of
/// the results when at least one action fired.
pub struct ActSetNode {
    pub set: Arc<ActionSet>,
    pub source: Option<VariableResolver>,
    pub params: ParameterResolvers,
    pub anchor: Option<String>,
    pub children: Vec<ProcessingNode>,
    pub location: String,
}

impl ActSetNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let requested = env.action().map(str::to_string);
        let source = ctx.resolve_opt(self.source.as_ref(), env)?;
        let params = ctx.resolve_params(&self.params, env)?;

        let mut fired = false;
        let mut merged = HashMap::new();
        for entry in &self.set.entries {
            if entry.filter.is_some() && entry.filter != requested {
                continue;
            }
            let entry_source = match &entry.source {
                Some(src) => Some(ctx.resolve(src, env)?),
                None => source.clone(),
            };
            let mut entry_params = params.clone();
            for (name, value) in ctx.resolve_params(&entry.params, env)?.iter() {
                entry_params.insert(name, value);
            }

            let result = {
                let action = entry.action.acquire().await?;
                action.act(env, entry_source.as_deref(), &entry_params).await?
            };
            if let Some(vars) = result {
                fired = true;
                merged.extend(vars);
            }
        }

        if !fired {
            return Ok(false);
        }
        tracing::debug!(set = %self.set.name, "Action set fired");
        invoke_with_frame(&self.children, env, ctx, self.anchor.clone(), merged).await
    }
}
