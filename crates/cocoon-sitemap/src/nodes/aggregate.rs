use cocoon_types::{Environment, Result};

use crate::context::InvokeContext;
use crate::pipeline::{AggregatePart, Aggregation};
use crate::variables::VariableResolver;

use super::{jump_to_view, ViewMap};

pub struct PartNode {
    pub src: VariableResolver,
    pub element: Option<String>,
    pub ns: Option<String>,
    pub strip_root: bool,
    pub views: ViewMap,
}

/// Generator slot built from several parts. When the requested view is
/// declared on some parts, only those parts are aggregated.
pub struct AggregateNode {
    pub element: String,
    pub ns: Option<String>,
    pub prefix: Option<String>,
    pub parts: Vec<PartNode>,
    pub views: ViewMap,
    pub location: String,
}

impl AggregateNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let view = env.view().map(str::to_string);
        let part_views = view
            .as_deref()
            .filter(|v| self.parts.iter().any(|p| p.views.contains_key(*v)));

        let selected: Vec<&PartNode> = match part_views {
            Some(v) => self.parts.iter().filter(|p| p.views.contains_key(v)).collect(),
            None => self.parts.iter().collect(),
        };

        let mut parts = Vec::with_capacity(selected.len());
        for part in &selected {
            parts.push(AggregatePart {
                src: ctx.resolve(&part.src, env)?,
                element: part.element.clone(),
                ns: part.ns.clone(),
                strip_root: part.strip_root,
            });
        }
        let aggregation = Aggregation {
            element: self.element.clone(),
            ns: self.ns.clone(),
            prefix: self.prefix.clone(),
            parts,
            sitemap: ctx.processor().clone(),
            base_prefix: env.prefix().to_string(),
            base_context: env.context().to_string(),
        };
        ctx.pipeline_mut().set_aggregation(aggregation)?;

        let has_views = !self.views.is_empty() || self.parts.iter().any(|p| !p.views.is_empty());
        if has_views {
            ctx.inform_branch_point();
        }
        let Some(view) = view else {
            return Ok(false);
        };

        // Part-level views are checked before the aggregate's own.
        for part in &selected {
            if let Some(slot) = part.views.get(&view) {
                return jump_to_view(&view, slot, env, ctx).await;
            }
        }
        match self.views.get(&view) {
            Some(slot) => jump_to_view(&view, slot, env, ctx).await,
            None => Ok(false),
        }
    }
}
