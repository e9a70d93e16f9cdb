//! Generate, transform, serialize and read statements.

use cocoon_types::{Environment, Parameters, Result};

use crate::context::InvokeContext;
use crate::pipeline::{SinkDescriptor, StageDescriptor};
use crate::variables::{ParameterResolvers, VariableResolver};

use super::{check_views, ViewMap};

/// What every stage statement carries.
pub struct StageNode {
    pub hint: String,
    pub source: Option<VariableResolver>,
    pub params: ParameterResolvers,
    pub hints: Parameters,
    pub views: ViewMap,
    pub location: String,
}

impl StageNode {
    fn describe(&self, env: &Environment, ctx: &InvokeContext) -> Result<StageDescriptor> {
        Ok(StageDescriptor {
            hint: self.hint.clone(),
            source: ctx.resolve_opt(self.source.as_ref(), env)?,
            params: ctx.resolve_params(&self.params, env)?,
            hints: self.hints.clone(),
        })
    }
}

pub struct GenerateNode {
    pub stage: StageNode,
}

impl GenerateNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let stage = self.stage.describe(env, ctx)?;
        ctx.pipeline_mut().set_generator(stage)?;
        Ok(check_views(&self.stage.views, env, ctx).await?.unwrap_or(false))
    }
}

pub struct TransformNode {
    pub stage: StageNode,
}

impl TransformNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let stage = self.stage.describe(env, ctx)?;
        ctx.pipeline_mut().add_transformer(stage)?;
        Ok(check_views(&self.stage.views, env, ctx).await?.unwrap_or(false))
    }
}

pub struct SerializeNode {
    pub stage: StageNode,
    pub status_code: Option<u16>,
    pub mime_type: Option<String>,
}

impl SerializeNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        // A view on the serializer replaces it.
        if let Some(handled) = check_views(&self.stage.views, env, ctx).await? {
            return Ok(handled);
        }
        let stage = self.stage.describe(env, ctx)?;
        ctx.pipeline_mut().set_serializer(SinkDescriptor {
            stage,
            status_code: self.status_code,
            mime_type: self.mime_type.clone(),
        })?;
        finish(env, ctx).await
    }
}

pub struct ReadNode {
    pub stage: StageNode,
    pub status_code: Option<u16>,
    pub mime_type: Option<String>,
}

impl ReadNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let stage = self.stage.describe(env, ctx)?;
        ctx.pipeline_mut().set_reader(SinkDescriptor {
            stage,
            status_code: self.status_code,
            mime_type: self.mime_type.clone(),
        })?;
        finish(env, ctx).await
    }
}

/// Process the sealed pipeline, or leave it in the context for the caller
/// in build-only mode.
async fn finish(env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
    if ctx.is_build_only() {
        return Ok(true);
    }
    match ctx.take_pipeline() {
        Some(mut pipeline) => pipeline.process(env).await,
        None => Ok(false),
    }
}
