//! Compiles a [`SitemapConfig`] into a [`SitemapTree`].
//!
//! Building runs in two passes. The first declares a [`LinkSlot`] for every
//! view and resource, then builds the pipelines; statements that branch into
//! a view or call a resource keep a clone of its slot. The second pass builds
//! the view and resource bodies and fills the slots, so references may point
//! at declarations that come later in the descriptor.

pub mod config;
pub mod labels;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cocoon_components::{ComponentHandle, ComponentSelector};
use cocoon_types::{Parameters, Result, SitemapError};

use crate::flow::FlowInterpreter;
use crate::nodes::{
    ActSetNode, ActTypeNode, ActionSet, ActionSetEntry, AggregateNode, CallFunctionNode,
    CallResourceNode, ContinueNode, ErrorHandlers, GenerateNode, HandleErrorsNode, HandlerKind,
    HandlerScope, LinkSlot, MatchNode, MountNode, NodeList, PartNode, PipelineNode,
    PipelinesNode, PreparableMatchNode, ProcessingNode, ReadNode, RedirectToNode, SelectNode,
    SerializeNode, StageNode, SwitchSelectNode, TransformNode, ViewMap, WhenCase,
};
use crate::pipeline::BoxFuture;
use crate::processor::{SitemapServices, SitemapTree};
use crate::variables::{ParameterResolvers, VariableResolver};

use config::{
    ActConfig, ActionSetConfig, AggregateConfig, CallConfig, HandleErrorsConfig, HandlerWhen,
    MatchConfig, PipelineConfig, SelectConfig, SitemapConfig, StageConfig, Statement,
};
use labels::{LabelMap, FIRST, LAST};

pub struct TreeBuilder<'a> {
    services: &'a SitemapServices,
    source: String,
    labels: LabelMap,
    views: HashMap<String, LinkSlot>,
    resources: HashMap<String, LinkSlot>,
    action_sets: HashMap<String, Arc<ActionSet>>,
    interpreter: Option<Arc<dyn FlowInterpreter>>,
}

/// Resolve the type a statement asks for, falling back to the role's default.
fn hint_for<C: ?Sized + Send + Sync>(
    selector: &dyn ComponentSelector<C>,
    kind: Option<&str>,
    location: &str,
) -> Result<String> {
    let hint = match kind {
        Some(kind) => kind,
        None => selector.default_hint().ok_or_else(|| {
            SitemapError::configuration(
                location,
                format!("no {} type given and no default declared", selector.role()),
            )
        })?,
    };
    if !selector.has(hint) {
        return Err(SitemapError::configuration(
            location,
            format!("unknown {} type '{hint}'", selector.role()),
        ));
    }
    Ok(hint.to_string())
}

fn component_labels<C: ?Sized + Send + Sync>(
    selector: &dyn ComponentSelector<C>,
    hint: &str,
) -> Vec<String> {
    selector.info(hint).map(|info| info.labels).unwrap_or_default()
}

fn parse(expression: &str, location: &str) -> Result<VariableResolver> {
    VariableResolver::parse(expression).map_err(|e| e.with_location(location))
}

fn parse_opt(expression: Option<&String>, location: &str) -> Result<Option<VariableResolver>> {
    expression.map(|e| parse(e, location)).transpose()
}

fn parse_params(params: &BTreeMap<String, String>, location: &str) -> Result<ParameterResolvers> {
    ParameterResolvers::parse(params).map_err(|e| e.with_location(location))
}

impl<'a> TreeBuilder<'a> {
    pub fn new(services: &'a SitemapServices, source: impl Into<String>) -> Self {
        Self {
            services,
            source: source.into(),
            labels: LabelMap::default(),
            views: HashMap::new(),
            resources: HashMap::new(),
            action_sets: HashMap::new(),
            interpreter: None,
        }
    }

    fn at(&self, path: &str) -> String {
        format!("{}#/{path}", self.source)
    }

    pub async fn build(mut self, config: &SitemapConfig) -> Result<SitemapTree> {
        self.declare(config)?;
        for (i, set) in config.action_sets.iter().enumerate() {
            let location = self.at(&format!("action_sets/{i}"));
            let built = self.build_action_set(set, &location).await?;
            if self.action_sets.insert(set.name.clone(), Arc::new(built)).is_some() {
                return Err(SitemapError::configuration(
                    location,
                    format!("action set '{}' is declared twice", set.name),
                ));
            }
        }

        let root = self.build_pipelines(config).await?;

        // Link pass.
        let mut views = Vec::with_capacity(config.views.len());
        for (i, view) in config.views.iter().enumerate() {
            let base = self.at(&format!("views/{i}/statements"));
            let nodes: NodeList = Arc::new(self.build_statements(&view.statements, &base, true).await?);
            link(&self.views, &view.name, Arc::clone(&nodes))?;
            views.push(nodes);
        }
        let mut resources = Vec::with_capacity(config.resources.len());
        for (i, resource) in config.resources.iter().enumerate() {
            let base = self.at(&format!("resources/{i}/statements"));
            let nodes: NodeList =
                Arc::new(self.build_statements(&resource.statements, &base, false).await?);
            link(&self.resources, &resource.name, Arc::clone(&nodes))?;
            resources.push(nodes);
        }

        let node_count = root.count()
            + views
                .iter()
                .chain(&resources)
                .flat_map(|list| list.iter())
                .map(ProcessingNode::count)
                .sum::<usize>();
        tracing::debug!(source = %self.source, nodes = node_count, "Sitemap tree built");

        Ok(SitemapTree {
            root,
            globals: config.globals.clone(),
            views,
            resources,
            action_sets: self.action_sets.into_values().collect(),
            node_count,
        })
    }

    /// First pass: slots for every view and resource, and the flow
    /// interpreter if one is declared.
    fn declare(&mut self, config: &SitemapConfig) -> Result<()> {
        self.labels = LabelMap::new(&config.views);
        for (i, view) in config.views.iter().enumerate() {
            if self.views.insert(view.name.clone(), LinkSlot::default()).is_some() {
                return Err(SitemapError::configuration(
                    self.at(&format!("views/{i}")),
                    format!("view '{}' is declared twice", view.name),
                ));
            }
        }
        for (i, resource) in config.resources.iter().enumerate() {
            if self.resources.insert(resource.name.clone(), LinkSlot::default()).is_some() {
                return Err(SitemapError::configuration(
                    self.at(&format!("resources/{i}")),
                    format!("resource '{}' is declared twice", resource.name),
                ));
            }
        }
        if let Some(flow) = &config.flow {
            let interpreter = self.services.interpreter(&flow.language).ok_or_else(|| {
                SitemapError::configuration(
                    self.at("flow"),
                    format!("no flow interpreter registered for language '{}'", flow.language),
                )
            })?;
            self.interpreter = Some(Arc::clone(interpreter));
        }
        Ok(())
    }

    async fn build_action_set(&self, set: &ActionSetConfig, location: &str) -> Result<ActionSet> {
        let actions = &self.services.components.actions;
        let mut entries = Vec::with_capacity(set.actions.len());
        for (i, entry) in set.actions.iter().enumerate() {
            let location = format!("{location}/actions/{i}");
            let hint = hint_for(actions.as_ref(), Some(&entry.kind), &location)?;
            entries.push(ActionSetEntry {
                action: ComponentHandle::resolve(Arc::clone(actions), &hint).await?,
                filter: entry.action.clone(),
                source: parse_opt(entry.src.as_ref(), &location)?,
                params: parse_params(&entry.parameters, &location)?,
            });
        }
        Ok(ActionSet {
            name: set.name.clone(),
            entries,
        })
    }

    async fn build_pipelines(&self, config: &SitemapConfig) -> Result<ProcessingNode> {
        let last = config.pipelines.len().saturating_sub(1);
        let mut children = Vec::with_capacity(config.pipelines.len());
        for (i, pipeline) in config.pipelines.iter().enumerate() {
            let location = self.at(&format!("pipelines/{i}"));
            children.push(self.build_pipeline(pipeline, i == last, location).await?);
        }
        let handlers = self
            .build_handlers(&config.handle_errors, &self.at("handle_errors"))
            .await?;
        Ok(ProcessingNode::Pipelines(PipelinesNode {
            children,
            handlers,
            location: self.at("pipelines"),
        }))
    }

    async fn build_pipeline(
        &self,
        config: &PipelineConfig,
        is_last: bool,
        location: String,
    ) -> Result<ProcessingNode> {
        let children = self
            .build_statements(&config.statements, &format!("{location}/statements"), false)
            .await?;
        let handlers = self
            .build_handlers(&config.handle_errors, &format!("{location}/handle_errors"))
            .await?;
        Ok(ProcessingNode::Pipeline(PipelineNode {
            id: config.id.clone(),
            internal_only: config.internal_only,
            pass_through: config.pass_through,
            is_last,
            children,
            handlers,
            location,
        }))
    }

    async fn build_handlers(
        &self,
        configs: &[HandleErrorsConfig],
        location: &str,
    ) -> Result<Option<Arc<ErrorHandlers>>> {
        if configs.is_empty() {
            return Ok(None);
        }
        let mut handlers = Vec::with_capacity(configs.len());
        for (i, config) in configs.iter().enumerate() {
            let location = format!("{location}/{i}");
            let kind = HandlerKind::parse(config.kind.as_deref()).ok_or_else(|| {
                SitemapError::configuration(
                    &location,
                    format!(
                        "unknown handle_errors type '{}': expected \"404\" or \"500\"",
                        config.kind.as_deref().unwrap_or_default()
                    ),
                )
            })?;
            let scope = match config.when {
                HandlerWhen::Internal => HandlerScope::Internal,
                HandlerWhen::External => HandlerScope::External,
                HandlerWhen::Always => HandlerScope::Always,
            };
            let children = self
                .build_statements(&config.statements, &format!("{location}/statements"), false)
                .await?;
            handlers.push(HandleErrorsNode {
                kind,
                scope,
                children,
                location,
            });
        }
        Ok(Some(Arc::new(ErrorHandlers::new(handlers, location)?)))
    }

    fn build_statements<'b>(
        &'b self,
        statements: &'b [Statement],
        base: &'b str,
        in_view: bool,
    ) -> BoxFuture<'b, Result<Vec<ProcessingNode>>> {
        Box::pin(async move {
            let mut nodes = Vec::with_capacity(statements.len());
            for (i, statement) in statements.iter().enumerate() {
                let location = format!("{base}/{i}");
                nodes.push(self.build_statement(statement, location, in_view).await?);
            }
            Ok(nodes)
        })
    }

    async fn build_statement(
        &self,
        statement: &Statement,
        location: String,
        in_view: bool,
    ) -> Result<ProcessingNode> {
        let components = &self.services.components;
        let node = match statement {
            Statement::Generate(s) => {
                let stage = self.stage(components.generators.as_ref(), s, Some(FIRST), in_view, location)?;
                ProcessingNode::Generate(GenerateNode { stage })
            }
            Statement::Transform(s) => {
                let stage = self.stage(components.transformers.as_ref(), s, None, in_view, location)?;
                ProcessingNode::Transform(TransformNode { stage })
            }
            Statement::Serialize(s) => {
                let stage_config = StageConfig {
                    kind: s.kind.clone(),
                    src: s.src.clone(),
                    parameters: s.parameters.clone(),
                    labels: s.labels.clone(),
                    hints: s.hints.clone(),
                };
                let stage = self.stage(
                    components.serializers.as_ref(),
                    &stage_config,
                    Some(LAST),
                    in_view,
                    location,
                )?;
                ProcessingNode::Serialize(SerializeNode {
                    stage,
                    status_code: s.status_code,
                    mime_type: s.mime_type.clone(),
                })
            }
            Statement::Read(r) => {
                let hint = hint_for(components.readers.as_ref(), r.kind.as_deref(), &location)?;
                ProcessingNode::Read(ReadNode {
                    stage: StageNode {
                        hint,
                        source: parse_opt(r.src.as_ref(), &location)?,
                        params: parse_params(&r.parameters, &location)?,
                        hints: r.hints.iter().collect::<Parameters>(),
                        views: ViewMap::new(),
                        location,
                    },
                    status_code: r.status_code,
                    mime_type: r.mime_type.clone(),
                })
            }
            Statement::Aggregate(a) => self.build_aggregate(a, in_view, location)?,
            Statement::Match(m) => self.build_match(m, in_view, location).await?,
            Statement::Select(s) => self.build_select(s, in_view, location).await?,
            Statement::Act(a) => self.build_act(a, in_view, location).await?,
            Statement::Call(c) => self.build_call(c, location)?,
            Statement::Mount(m) => ProcessingNode::Mount(MountNode::new(
                parse(&m.src, &location)?,
                parse(&m.uri_prefix, &location)?,
                m.pass_through,
                location,
            )),
            Statement::RedirectTo(r) => ProcessingNode::Redirect(RedirectToNode {
                uri: parse(&r.uri, &location)?,
                permanent: r.permanent,
                location,
            }),
        };
        Ok(node)
    }

    /// Views a statement can jump to, from the union of its component's
    /// labels, its own labels and its pseudo-label.
    fn view_map(
        &self,
        mut labels: Vec<String>,
        declared: &[String],
        pseudo: Option<&str>,
        in_view: bool,
        location: &str,
    ) -> Result<ViewMap> {
        if in_view {
            if !declared.is_empty() {
                return Err(SitemapError::configuration(
                    location,
                    "labels cannot be declared inside a view",
                ));
            }
            return Ok(ViewMap::new());
        }
        labels.extend(declared.iter().cloned());
        labels.extend(pseudo.map(str::to_string));

        let mut views = ViewMap::new();
        for name in self.labels.views_for(labels.iter().map(String::as_str)) {
            if let Some(slot) = self.views.get(name) {
                views.insert(name.to_string(), Arc::clone(slot));
            }
        }
        Ok(views)
    }

    fn stage<C: ?Sized + Send + Sync>(
        &self,
        selector: &dyn ComponentSelector<C>,
        config: &StageConfig,
        pseudo: Option<&str>,
        in_view: bool,
        location: String,
    ) -> Result<StageNode> {
        let hint = hint_for(selector, config.kind.as_deref(), &location)?;
        let views = self.view_map(
            component_labels(selector, &hint),
            &config.labels,
            pseudo,
            in_view,
            &location,
        )?;
        Ok(StageNode {
            source: parse_opt(config.src.as_ref(), &location)?,
            params: parse_params(&config.parameters, &location)?,
            hints: config.hints.iter().collect::<Parameters>(),
            hint,
            views,
            location,
        })
    }

    fn build_aggregate(
        &self,
        config: &AggregateConfig,
        in_view: bool,
        location: String,
    ) -> Result<ProcessingNode> {
        let mut parts = Vec::with_capacity(config.parts.len());
        for (i, part) in config.parts.iter().enumerate() {
            let part_location = format!("{location}/parts/{i}");
            parts.push(PartNode {
                src: parse(&part.src, &part_location)?,
                element: part.element.clone(),
                ns: part.ns.clone(),
                strip_root: part.strip_root,
                views: self.view_map(Vec::new(), &part.labels, None, in_view, &part_location)?,
            });
        }
        Ok(ProcessingNode::Aggregate(AggregateNode {
            element: config.element.clone(),
            ns: config.ns.clone(),
            prefix: config.prefix.clone(),
            parts,
            views: self.view_map(Vec::new(), &config.labels, Some(FIRST), in_view, &location)?,
            location,
        }))
    }

    async fn build_match(
        &self,
        config: &MatchConfig,
        in_view: bool,
        location: String,
    ) -> Result<ProcessingNode> {
        let matchers = &self.services.components.matchers;
        let hint = hint_for(matchers.as_ref(), config.kind.as_deref(), &location)?;
        let matcher = ComponentHandle::resolve(Arc::clone(matchers), &hint).await?;
        let pattern = parse(&config.pattern, &location)?;
        let params = parse_params(&config.parameters, &location)?;
        let children = self
            .build_statements(&config.statements, &format!("{location}/statements"), in_view)
            .await?;

        // Literal patterns are compiled once, here.
        let prepared = match pattern.literal_value() {
            Some(literal) => {
                let lease = matcher.acquire().await?;
                if lease.preparable() {
                    Some((literal.to_string(), lease.prepare(literal).map_err(|e| e.with_location(&location))?))
                } else {
                    None
                }
            }
            None => None,
        };

        Ok(match prepared {
            Some((pattern, prepared)) => ProcessingNode::PreparableMatch(PreparableMatchNode {
                pattern,
                prepared,
                matcher,
                params,
                anchor: config.name.clone(),
                children,
                location,
            }),
            None => ProcessingNode::Match(MatchNode {
                pattern,
                matcher,
                params,
                anchor: config.name.clone(),
                children,
                location,
            }),
        })
    }

    async fn build_select(
        &self,
        config: &SelectConfig,
        in_view: bool,
        location: String,
    ) -> Result<ProcessingNode> {
        let selectors = &self.services.components.selectors;
        let hint = hint_for(selectors.as_ref(), config.kind.as_deref(), &location)?;
        let selector = ComponentHandle::resolve(Arc::clone(selectors), &hint).await?;
        let is_switch = selector.acquire().await?.is_switch();
        let params = parse_params(&config.parameters, &location)?;

        let mut cases = Vec::with_capacity(config.when.len());
        for (i, when) in config.when.iter().enumerate() {
            let base = format!("{location}/when/{i}");
            cases.push(WhenCase {
                test: parse(&when.test, &base)?,
                children: self
                    .build_statements(&when.statements, &format!("{base}/statements"), in_view)
                    .await?,
            });
        }
        let otherwise = match &config.otherwise {
            Some(statements) => Some(
                self.build_statements(statements, &format!("{location}/otherwise"), in_view)
                    .await?,
            ),
            None => None,
        };

        Ok(if is_switch {
            ProcessingNode::SwitchSelect(SwitchSelectNode {
                selector,
                params,
                cases,
                otherwise,
                location,
            })
        } else {
            ProcessingNode::Select(SelectNode {
                selector,
                params,
                cases,
                otherwise,
                location,
            })
        })
    }

    async fn build_act(
        &self,
        config: &ActConfig,
        in_view: bool,
        location: String,
    ) -> Result<ProcessingNode> {
        let source = parse_opt(config.src.as_ref(), &location)?;
        let params = parse_params(&config.parameters, &location)?;
        let children = self
            .build_statements(&config.statements, &format!("{location}/statements"), in_view)
            .await?;

        match (&config.kind, &config.set) {
            (Some(_), None) => {
                let actions = &self.services.components.actions;
                let hint = hint_for(actions.as_ref(), config.kind.as_deref(), &location)?;
                Ok(ProcessingNode::Act(ActTypeNode {
                    action: ComponentHandle::resolve(Arc::clone(actions), &hint).await?,
                    source,
                    params,
                    anchor: config.name.clone(),
                    children,
                    location,
                }))
            }
            (None, Some(set)) => {
                let set = self.action_sets.get(set).ok_or_else(|| {
                    SitemapError::configuration(&location, format!("undefined action set '{set}'"))
                })?;
                Ok(ProcessingNode::ActSet(ActSetNode {
                    set: Arc::clone(set),
                    source,
                    params,
                    anchor: config.name.clone(),
                    children,
                    location,
                }))
            }
            _ => Err(SitemapError::configuration(
                location,
                "act needs exactly one of 'type' or 'set'",
            )),
        }
    }

    fn build_call(&self, config: &CallConfig, location: String) -> Result<ProcessingNode> {
        let params = parse_params(&config.parameters, &location)?;
        match (&config.resource, &config.function, &config.continuation) {
            (Some(name), None, None) => {
                let slot = self.resources.get(name).ok_or_else(|| {
                    SitemapError::configuration(&location, format!("undefined resource '{name}'"))
                })?;
                Ok(ProcessingNode::CallResource(CallResourceNode {
                    name: name.clone(),
                    slot: Arc::clone(slot),
                    params,
                    location,
                }))
            }
            (None, Some(function), None) => Ok(ProcessingNode::CallFunction(CallFunctionNode {
                function: parse(function, &location)?,
                params,
                interpreter: self.flow_interpreter(&location)?,
                location,
            })),
            (None, None, Some(continuation)) => Ok(ProcessingNode::Continue(ContinueNode {
                continuation: parse(continuation, &location)?,
                params,
                interpreter: self.flow_interpreter(&location)?,
                location,
            })),
            _ => Err(SitemapError::configuration(
                location,
                "call needs exactly one of 'resource', 'function' or 'continuation'",
            )),
        }
    }

    fn flow_interpreter(&self, location: &str) -> Result<Arc<dyn FlowInterpreter>> {
        self.interpreter.clone().ok_or_else(|| {
            SitemapError::configuration(location, "flow call without a 'flow' declaration")
        })
    }
}

fn link(slots: &HashMap<String, LinkSlot>, name: &str, nodes: NodeList) -> Result<()> {
    let slot = slots
        .get(name)
        .ok_or_else(|| SitemapError::processing(format!("'{name}' was never declared")))?;
    slot.set(nodes)
        .map_err(|_| SitemapError::processing(format!("'{name}' was linked twice")))
}
