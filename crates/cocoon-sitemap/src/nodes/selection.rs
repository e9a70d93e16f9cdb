use cocoon_components::{ComponentHandle, Selector};
use cocoon_types::{Environment, Result};

use crate::context::InvokeContext;
use crate::variables::{ParameterResolvers, VariableResolver};

use super::{invoke_nodes, ProcessingNode};

pub struct WhenCase {
    pub test: VariableResolver,
    pub children: Vec<ProcessingNode>,
}

/// Tests `when` cases in order; the first that passes wins, then `otherwise`.
pub struct SelectNode {
    pub selector: ComponentHandle<dyn Selector>,
    pub params: ParameterResolvers,
    pub cases: Vec<WhenCase>,
    pub otherwise: Option<Vec<ProcessingNode>>,
    pub location: String,
}

impl SelectNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let params = ctx.resolve_params(&self.params, env)?;
        let chosen = {
            let selector = self.selector.acquire().await?;
            let mut chosen = None;
            for case in &self.cases {
                let test = ctx.resolve(&case.test, env)?;
                if selector.select(&test, env, &params)? {
                    chosen = Some(case.children.as_slice());
                    break;
                }
            }
            chosen
        };
        match chosen.or(self.otherwise.as_deref()) {
            Some(nodes) => invoke_nodes(nodes, env, ctx).await,
            None => Ok(false),
        }
    }
}

/// A select over a switch selector: the value under test is computed once
/// and every case is compared against it.
pub struct SwitchSelectNode {
    pub selector: ComponentHandle<dyn Selector>,
    pub params: ParameterResolvers,
    pub cases: Vec<WhenCase>,
    pub otherwise: Option<Vec<ProcessingNode>>,
    pub location: String,
}

impl SwitchSelectNode {
    pub async fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool> {
        let params = ctx.resolve_params(&self.params, env)?;
        let chosen = {
            let selector = self.selector.acquire().await?;
            let switch = selector.switch_context(env, &params)?;
            let mut chosen = None;
            for case in &self.cases {
                let test = ctx.resolve(&case.test, env)?;
                if selector.select_in_context(&test, switch.as_deref()) {
                    chosen = Some(case.children.as_slice());
                    break;
                }
            }
            chosen
        };
        match chosen.or(self.otherwise.as_deref()) {
            Some(nodes) => invoke_nodes(nodes, env, ctx).await,
            None => Ok(false),
        }
    }
}
