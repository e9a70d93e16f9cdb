//! The compiled sitemap tree.
//!
//! Every statement becomes a [`ProcessingNode`]. `invoke` returns `Ok(true)`
//! when the node answered the request and `Ok(false)` when the caller should
//! go on with the next sibling. Errors propagate up to the nearest pipeline
//! or pipelines node that has error handlers.

pub mod act;
pub mod aggregate;
pub mod call;
pub mod error_handling;
pub mod matching;
pub mod mount;
pub mod pipelines;
pub mod redirect;
pub mod selection;
pub mod stages;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use cocoon_types::{Environment, Result, SitemapError};

use crate::context::InvokeContext;
use crate::pipeline::BoxFuture;

pub use act::{ActSetNode, ActTypeNode, ActionSet, ActionSetEntry};
pub use aggregate::{AggregateNode, PartNode};
pub use call::{CallFunctionNode, CallResourceNode, ContinueNode};
pub use error_handling::{
    DeferredErrorHandler, ErrorHandlers, HandleErrorsNode, HandlerKind, HandlerScope,
};
pub use matching::{MatchNode, PreparableMatchNode};
pub use mount::MountNode;
pub use pipelines::{PipelineNode, PipelinesNode};
pub use redirect::RedirectToNode;
pub use selection::{SelectNode, SwitchSelectNode, WhenCase};
pub use stages::{GenerateNode, ReadNode, SerializeNode, StageNode, TransformNode};

/// A statement list shared between the tree and its view/resource slots.
pub type NodeList = Arc<Vec<ProcessingNode>>;

/// Filled by the builder's link pass once every view and resource exists.
pub type LinkSlot = Arc<OnceLock<NodeList>>;

/// View name to the view body a stage jumps to.
pub type ViewMap = HashMap<String, LinkSlot>;

pub enum ProcessingNode {
    Generate(GenerateNode),
    Transform(TransformNode),
    Serialize(SerializeNode),
    Read(ReadNode),
    Aggregate(AggregateNode),
    Match(MatchNode),
    PreparableMatch(PreparableMatchNode),
    Select(SelectNode),
    SwitchSelect(SwitchSelectNode),
    Act(ActTypeNode),
    ActSet(ActSetNode),
    CallResource(CallResourceNode),
    CallFunction(CallFunctionNode),
    Continue(ContinueNode),
    Mount(MountNode),
    Redirect(RedirectToNode),
    Pipeline(PipelineNode),
    Pipelines(PipelinesNode),
    HandleErrors(HandleErrorsNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Generate,
    Transform,
    Serialize,
    Read,
    Aggregate,
    Match,
    PreparableMatch,
    Select,
    SwitchSelect,
    Act,
    ActSet,
    CallResource,
    CallFunction,
    Continue,
    Mount,
    Redirect,
    Pipeline,
    Pipelines,
    HandleErrors,
}

impl ProcessingNode {
    pub fn invoke<'a>(
        &'a self,
        env: &'a mut Environment,
        ctx: &'a mut InvokeContext,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            tracing::trace!(kind = ?self.kind(), location = %self.location(), "Invoking node");
            let result = match self {
                ProcessingNode::Generate(n) => n.invoke(env, ctx).await,
                ProcessingNode::Transform(n) => n.invoke(env, ctx).await,
                ProcessingNode::Serialize(n) => n.invoke(env, ctx).await,
                ProcessingNode::Read(n) => n.invoke(env, ctx).await,
                ProcessingNode::Aggregate(n) => n.invoke(env, ctx).await,
                ProcessingNode::Match(n) => n.invoke(env, ctx).await,
                ProcessingNode::PreparableMatch(n) => n.invoke(env, ctx).await,
                ProcessingNode::Select(n) => n.invoke(env, ctx).await,
                ProcessingNode::SwitchSelect(n) => n.invoke(env, ctx).await,
                ProcessingNode::Act(n) => n.invoke(env, ctx).await,
                ProcessingNode::ActSet(n) => n.invoke(env, ctx).await,
                ProcessingNode::CallResource(n) => n.invoke(env, ctx).await,
                ProcessingNode::CallFunction(n) => n.invoke(env, ctx).await,
                ProcessingNode::Continue(n) => n.invoke(env, ctx).await,
                ProcessingNode::Mount(n) => n.invoke(env, ctx).await,
                ProcessingNode::Redirect(n) => n.invoke(env, ctx).await,
                ProcessingNode::Pipeline(n) => n.invoke(env, ctx).await,
                ProcessingNode::Pipelines(n) => n.invoke(env, ctx).await,
                ProcessingNode::HandleErrors(n) => invoke_nodes(&n.children, env, ctx).await,
            };
            result.map_err(|e| e.with_location(self.location()))
        })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            ProcessingNode::Generate(_) => NodeKind::Generate,
            ProcessingNode::Transform(_) => NodeKind::Transform,
            ProcessingNode::Serialize(_) => NodeKind::Serialize,
            ProcessingNode::Read(_) => NodeKind::Read,
            ProcessingNode::Aggregate(_) => NodeKind::Aggregate,
            ProcessingNode::Match(_) => NodeKind::Match,
            ProcessingNode::PreparableMatch(_) => NodeKind::PreparableMatch,
            ProcessingNode::Select(_) => NodeKind::Select,
            ProcessingNode::SwitchSelect(_) => NodeKind::SwitchSelect,
            ProcessingNode::Act(_) => NodeKind::Act,
            ProcessingNode::ActSet(_) => NodeKind::ActSet,
            ProcessingNode::CallResource(_) => NodeKind::CallResource,
            ProcessingNode::CallFunction(_) => NodeKind::CallFunction,
            ProcessingNode::Continue(_) => NodeKind::Continue,
            ProcessingNode::Mount(_) => NodeKind::Mount,
            ProcessingNode::Redirect(_) => NodeKind::Redirect,
            ProcessingNode::Pipeline(_) => NodeKind::Pipeline,
            ProcessingNode::Pipelines(_) => NodeKind::Pipelines,
            ProcessingNode::HandleErrors(_) => NodeKind::HandleErrors,
        }
    }

    /// Where the statement sits in its descriptor, e.g.
    /// `sitemap.json#/pipelines/0/statements/1`.
    pub fn location(&self) -> &str {
        match self {
            ProcessingNode::Generate(n) => &n.stage.location,
            ProcessingNode::Transform(n) => &n.stage.location,
            ProcessingNode::Serialize(n) => &n.stage.location,
            ProcessingNode::Read(n) => &n.stage.location,
            ProcessingNode::Aggregate(n) => &n.location,
            ProcessingNode::Match(n) => &n.location,
            ProcessingNode::PreparableMatch(n) => &n.location,
            ProcessingNode::Select(n) => &n.location,
            ProcessingNode::SwitchSelect(n) => &n.location,
            ProcessingNode::Act(n) => &n.location,
            ProcessingNode::ActSet(n) => &n.location,
            ProcessingNode::CallResource(n) => &n.location,
            ProcessingNode::CallFunction(n) => &n.location,
            ProcessingNode::Continue(n) => &n.location,
            ProcessingNode::Mount(n) => &n.location,
            ProcessingNode::Redirect(n) => &n.location,
            ProcessingNode::Pipeline(n) => &n.location,
            ProcessingNode::Pipelines(n) => &n.location,
            ProcessingNode::HandleErrors(n) => &n.location,
        }
    }

    /// Direct children in document order. View and resource bodies are not
    /// children; they are disposed with the tree's own lists.
    pub fn children(&self) -> Vec<&ProcessingNode> {
        match self {
            ProcessingNode::Match(n) => n.children.iter().collect(),
            ProcessingNode::PreparableMatch(n) => n.children.iter().collect(),
            ProcessingNode::Select(n) => n
                .cases
                .iter()
                .flat_map(|c| c.children.iter())
                .chain(n.otherwise.iter().flatten())
                .collect(),
            ProcessingNode::SwitchSelect(n) => n
                .cases
                .iter()
                .flat_map(|c| c.children.iter())
                .chain(n.otherwise.iter().flatten())
                .collect(),
            ProcessingNode::Act(n) => n.children.iter().collect(),
            ProcessingNode::ActSet(n) => n.children.iter().collect(),
            ProcessingNode::Pipeline(n) => n
                .children
                .iter()
                .chain(n.handlers.iter().flat_map(|h| h.nodes()))
                .collect(),
            ProcessingNode::Pipelines(n) => n
                .children
                .iter()
                .chain(n.handlers.iter().flat_map(|h| h.nodes()))
                .collect(),
            ProcessingNode::HandleErrors(n) => n.children.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Number of nodes in this subtree, this one included.
    pub fn count(&self) -> usize {
        1 + self.children().iter().map(|c| c.count()).sum::<usize>()
    }

    /// Release cached component handles and child sitemaps.
    pub fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self {
                ProcessingNode::Match(n) => n.matcher.dispose(),
                ProcessingNode::PreparableMatch(n) => n.matcher.dispose(),
                ProcessingNode::Select(n) => n.selector.dispose(),
                ProcessingNode::SwitchSelect(n) => n.selector.dispose(),
                ProcessingNode::Act(n) => n.action.dispose(),
                ProcessingNode::Mount(n) => n.dispose().await,
                _ => {}
            }
            for child in self.children() {
                child.dispose().await;
            }
        })
    }
}

/// Invoke `nodes` in order until one answers the request.
pub async fn invoke_nodes(
    nodes: &[ProcessingNode],
    env: &mut Environment,
    ctx: &mut InvokeContext,
) -> Result<bool> {
    for node in nodes {
        if node.invoke(env, ctx).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Invoke `nodes` with `vars` pushed as a frame. The frame is popped on
/// every exit path.
pub async fn invoke_with_frame(
    nodes: &[ProcessingNode],
    env: &mut Environment,
    ctx: &mut InvokeContext,
    anchor: Option<String>,
    vars: HashMap<String, String>,
) -> Result<bool> {
    let mut scoped = ctx.push_frame(anchor, vars);
    invoke_nodes(nodes, env, &mut scoped).await
}

/// The statement list behind a slot the link pass should have filled.
pub fn linked<'a>(slot: &'a LinkSlot, what: &str) -> Result<&'a NodeList> {
    slot.get()
        .ok_or_else(|| SitemapError::processing(format!("{what} was never linked")))
}

/// Continue the request in view `name` instead of the normal downstream
/// stages.
pub async fn jump_to_view(
    name: &str,
    slot: &LinkSlot,
    env: &mut Environment,
    ctx: &mut InvokeContext,
) -> Result<bool> {
    let nodes = linked(slot, &format!("View '{name}'"))?;
    tracing::debug!(view = %name, uri = %env.uri(), "Jumping to view");
    invoke_nodes(nodes, env, ctx).await
}

/// Branch-point bookkeeping shared by stage nodes: tell the pipeline a view
/// could fire here, then jump if the request asked for one of `views`.
pub async fn check_views(
    views: &ViewMap,
    env: &mut Environment,
    ctx: &mut InvokeContext,
) -> Result<Option<bool>> {
    if views.is_empty() {
        return Ok(None);
    }
    ctx.inform_branch_point();
    let Some(view) = env.view().map(str::to_string) else {
        return Ok(None);
    };
    match views.get(&view) {
        Some(slot) => Ok(Some(jump_to_view(&view, slot, env, ctx).await?)),
        None => Ok(None),
    }
}
