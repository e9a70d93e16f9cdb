//! Per-request execution state.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use uuid::Uuid;

use cocoon_components::ComponentManager;
use cocoon_types::{Environment, Parameters, Result, SavedContext};

use crate::pipeline::ProcessingPipeline;
use crate::processor::{SitemapTree, TreeProcessor};
use crate::variables::{Frame, ParameterResolvers, ResolveScope, VariableResolver};

/// Mutable state owned by one request while it walks one sitemap tree.
///
/// A fresh context is created per request, per mount call, and per error
/// handler invocation. In build-only mode terminal nodes leave the assembled
/// pipeline in the context instead of processing it.
pub struct InvokeContext {
    processor: Arc<TreeProcessor>,
    tree: Arc<SitemapTree>,
    frames: Vec<Frame>,
    pipeline: Option<ProcessingPipeline>,
    build_only: bool,
    request_id: Uuid,
}

impl InvokeContext {
    pub fn new(processor: Arc<TreeProcessor>, tree: Arc<SitemapTree>, build_only: bool) -> Self {
        Self {
            processor,
            tree,
            frames: Vec::new(),
            pipeline: None,
            build_only,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn is_build_only(&self) -> bool {
        self.build_only
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn processor(&self) -> &Arc<TreeProcessor> {
        &self.processor
    }

    pub fn tree(&self) -> &Arc<SitemapTree> {
        &self.tree
    }

    pub fn components(&self) -> &ComponentManager {
        &self.processor.services().components
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn scope<'a>(&'a self, env: &'a Environment) -> ResolveScope<'a> {
        ResolveScope {
            frames: &self.frames,
            env,
            globals: &self.tree.globals,
        }
    }

    pub fn resolve(&self, resolver: &VariableResolver, env: &Environment) -> Result<String> {
        resolver.resolve(&self.scope(env))
    }

    pub fn resolve_opt(
        &self,
        resolver: Option<&VariableResolver>,
        env: &Environment,
    ) -> Result<Option<String>> {
        resolver.map(|r| self.resolve(r, env)).transpose()
    }

    pub fn resolve_params(&self, params: &ParameterResolvers, env: &Environment) -> Result<Parameters> {
        params.resolve(&self.scope(env))
    }

    /// Push a variable frame. It is popped when the guard drops, on every
    /// exit path.
    pub fn push_frame(
        &mut self,
        anchor: Option<String>,
        vars: HashMap<String, String>,
    ) -> FrameGuard<'_> {
        self.frames.push(Frame { anchor, vars });
        FrameGuard { ctx: self }
    }

    /// The pipeline under construction, created on first use.
    pub fn pipeline_mut(&mut self) -> &mut ProcessingPipeline {
        let components = &self.processor.services().components;
        self.pipeline
            .get_or_insert_with(|| ProcessingPipeline::new(components.clone()))
    }

    pub fn pipeline(&self) -> Option<&ProcessingPipeline> {
        self.pipeline.as_ref()
    }

    pub fn take_pipeline(&mut self) -> Option<ProcessingPipeline> {
        self.pipeline.take()
    }

    /// Replace the pipeline with one built elsewhere (mount, internal redirect,
    /// error handler).
    pub fn adopt_pipeline(&mut self, pipeline: ProcessingPipeline) {
        self.pipeline = Some(pipeline);
    }

    /// Drop whatever a previous pipeline attempt assembled.
    pub fn reset_pipeline(&mut self) {
        self.pipeline = None;
    }

    pub fn inform_branch_point(&mut self) {
        self.pipeline_mut().inform_branch_point();
    }
}

/// Pops one frame from the context when dropped.
pub struct FrameGuard<'a> {
    ctx: &'a mut InvokeContext,
}

impl Deref for FrameGuard<'_> {
    type Target = InvokeContext;

    fn deref(&self) -> &InvokeContext {
        self.ctx
    }
}

impl DerefMut for FrameGuard<'_> {
    fn deref_mut(&mut self) -> &mut InvokeContext {
        self.ctx
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.ctx.frames.pop();
    }
}

/// Restores the environment's URI, prefix, context and redirect flags when
/// dropped.
pub struct ContextGuard<'a> {
    env: &'a mut Environment,
    saved: Option<SavedContext>,
}

impl<'a> ContextGuard<'a> {
    pub fn new(env: &'a mut Environment) -> Self {
        let saved = Some(env.save_context());
        Self { env, saved }
    }
}

impl Deref for ContextGuard<'_> {
    type Target = Environment;

    fn deref(&self) -> &Environment {
        self.env
    }
}

impl DerefMut for ContextGuard<'_> {
    fn deref_mut(&mut self) -> &mut Environment {
        self.env
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.env.restore_context(saved);
        }
    }
}
