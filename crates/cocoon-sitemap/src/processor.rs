//! The per-sitemap entry point.
//!
//! A [`TreeProcessor`] owns one compiled sitemap tree. It rebuilds the tree
//! when the descriptor's validity changes, creates child processors for
//! mounts, and answers `cocoon:` requests from aggregates and redirects.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use cocoon_components::{ComponentManager, SourceValidity};
use cocoon_types::{Environment, Result, SitemapError};

use crate::builder::config::SitemapConfig;
use crate::builder::TreeBuilder;
use crate::context::InvokeContext;
use crate::events::{EventEmitter, SitemapEvent};
use crate::flow::FlowInterpreter;
use crate::nodes::{ActionSet, NodeList, ProcessingNode};
use crate::pipeline::ProcessingPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Compare the descriptor's validity on every request and rebuild the
    /// tree when it changed.
    pub check_reload: bool,
    pub event_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            check_reload: true,
            event_capacity: 256,
        }
    }
}

/// Collaborators shared by a sitemap and everything mounted below it.
#[derive(Clone)]
pub struct SitemapServices {
    pub components: ComponentManager,
    pub interpreters: HashMap<String, Arc<dyn FlowInterpreter>>,
}

impl SitemapServices {
    pub fn new(components: ComponentManager) -> Self {
        Self {
            components,
            interpreters: HashMap::new(),
        }
    }

    pub fn with_interpreter(
        mut self,
        language: impl Into<String>,
        interpreter: Arc<dyn FlowInterpreter>,
    ) -> Self {
        self.interpreters.insert(language.into(), interpreter);
        self
    }

    pub fn interpreter(&self, language: &str) -> Option<&Arc<dyn FlowInterpreter>> {
        self.interpreters.get(language)
    }
}

/// A compiled sitemap.
pub struct SitemapTree {
    pub root: ProcessingNode,
    pub globals: BTreeMap<String, String>,
    pub views: Vec<NodeList>,
    pub resources: Vec<NodeList>,
    pub action_sets: Vec<Arc<ActionSet>>,
    pub node_count: usize,
}

impl SitemapTree {
    pub async fn dispose(&self) {
        self.root.dispose().await;
        for list in self.views.iter().chain(&self.resources) {
            for node in list.iter() {
                node.dispose().await;
            }
        }
        for set in &self.action_sets {
            set.dispose();
        }
    }
}

struct LoadedTree {
    tree: Arc<SitemapTree>,
    validity: Option<SourceValidity>,
}

pub(crate) enum InternalTarget<'a> {
    Current(&'a str),
    Root(&'a str),
}

/// Split a `cocoon:/path` or `cocoon://path` URI.
pub(crate) fn parse_internal_uri(uri: &str) -> Result<InternalTarget<'_>> {
    let rest = uri
        .strip_prefix("cocoon:")
        .ok_or_else(|| SitemapError::processing(format!("'{uri}' is not a cocoon: URI")))?;
    if let Some(path) = rest.strip_prefix("//") {
        Ok(InternalTarget::Root(path))
    } else if let Some(path) = rest.strip_prefix('/') {
        Ok(InternalTarget::Current(path))
    } else {
        Err(SitemapError::processing(format!(
            "Malformed internal URI '{uri}': expected 'cocoon:/' or 'cocoon://'"
        )))
    }
}

pub struct TreeProcessor {
    /// Descriptor location; `None` for trees built from an in-memory config.
    source: Option<String>,
    context_dir: Option<String>,
    services: SitemapServices,
    config: ProcessorConfig,
    parent: Option<Weak<TreeProcessor>>,
    tree: RwLock<Option<LoadedTree>>,
    events: EventEmitter,
}

impl TreeProcessor {
    /// Load the sitemap at `source` through the component manager's source
    /// resolver. Configuration errors surface here.
    pub async fn load(
        source: impl Into<String>,
        services: SitemapServices,
        config: ProcessorConfig,
    ) -> Result<Arc<Self>> {
        let source = source.into();
        let events = EventEmitter::new(config.event_capacity);
        let processor = Arc::new(Self {
            context_dir: Some(directory_of(&source)),
            source: Some(source),
            services,
            config,
            parent: None,
            tree: RwLock::new(None),
            events,
        });
        processor.current_tree().await?;
        Ok(processor)
    }

    /// Build a processor from an already parsed descriptor. It never reloads.
    pub async fn from_config(
        sitemap: SitemapConfig,
        services: SitemapServices,
        config: ProcessorConfig,
    ) -> Result<Arc<Self>> {
        let events = EventEmitter::new(config.event_capacity);
        let tree = TreeBuilder::new(&services, "sitemap").build(&sitemap).await?;
        events.emit(SitemapEvent::SitemapLoaded {
            source: "sitemap".into(),
            node_count: tree.node_count,
        });
        Ok(Arc::new(Self {
            source: None,
            context_dir: None,
            services,
            config,
            parent: None,
            tree: RwLock::new(Some(LoadedTree {
                tree: Arc::new(tree),
                validity: None,
            })),
            events,
        }))
    }

    /// Create the processor for a mounted sitemap. Children share services,
    /// settings and the event channel with their parent.
    pub async fn create_child(self: &Arc<Self>, source: &str) -> Result<Arc<Self>> {
        let child = Arc::new(Self {
            source: Some(source.to_string()),
            context_dir: Some(directory_of(source)),
            services: self.services.clone(),
            config: self.config.clone(),
            parent: Some(Arc::downgrade(self)),
            tree: RwLock::new(None),
            events: self.events.clone(),
        });
        child.current_tree().await?;
        Ok(child)
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Base that relative sources in this sitemap resolve against.
    pub fn context_dir(&self) -> Option<&str> {
        self.context_dir.as_deref()
    }

    pub fn services(&self) -> &SitemapServices {
        &self.services
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SitemapEvent> {
        self.events.subscribe()
    }

    pub fn parent(&self) -> Option<Arc<TreeProcessor>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The top-level processor `cocoon://` URIs resolve against.
    pub fn root(self: &Arc<Self>) -> Arc<TreeProcessor> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    fn label(&self) -> &str {
        self.source.as_deref().unwrap_or("sitemap")
    }

    /// The compiled tree, rebuilt first when the descriptor changed.
    pub async fn current_tree(&self) -> Result<Arc<SitemapTree>> {
        let Some(source) = &self.source else {
            return self
                .tree
                .read()
                .await
                .as_ref()
                .map(|loaded| Arc::clone(&loaded.tree))
                .ok_or_else(|| SitemapError::processing("Sitemap has been disposed"));
        };

        let resolver = &self.services.components.resolver;
        {
            let loaded = self.tree.read().await;
            if let Some(loaded) = loaded.as_ref() {
                if !self.config.check_reload {
                    return Ok(Arc::clone(&loaded.tree));
                }
                let validity = resolver.validity(source, "").await?;
                if validity.is_none() || validity == loaded.validity {
                    return Ok(Arc::clone(&loaded.tree));
                }
            }
        }

        let mut loaded = self.tree.write().await;
        let validity = resolver.validity(source, "").await?;
        if let Some(current) = loaded.as_ref() {
            if validity.is_none() || validity == current.validity {
                return Ok(Arc::clone(&current.tree));
            }
        }

        let started = Instant::now();
        let descriptor = resolver.resolve(source, "").await?;
        let config = SitemapConfig::from_json(descriptor.text()?)?;
        let tree = Arc::new(TreeBuilder::new(&self.services, source).build(&config).await?);
        let previous = loaded.replace(LoadedTree {
            tree: Arc::clone(&tree),
            validity: descriptor.validity.or(validity),
        });
        drop(loaded);

        match previous {
            Some(old) => {
                tracing::info!(source = %source, nodes = tree.node_count, "Sitemap changed, reloaded");
                self.events.emit(SitemapEvent::SitemapReloaded {
                    source: source.clone(),
                });
                old.tree.dispose().await;
            }
            None => {
                tracing::info!(
                    source = %source,
                    nodes = tree.node_count,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Sitemap loaded"
                );
                self.events.emit(SitemapEvent::SitemapLoaded {
                    source: source.clone(),
                    node_count: tree.node_count,
                });
            }
        }
        Ok(tree)
    }

    /// Process the request. `Ok(false)` means nothing matched and the
    /// sitemap passes the request through.
    pub async fn process(self: &Arc<Self>, env: &mut Environment) -> Result<bool> {
        let tree = self.current_tree().await?;
        if self.parent.is_none() && env.context().is_empty() {
            if let Some(dir) = &self.context_dir {
                env.set_context(dir.clone());
            }
        }

        let started = Instant::now();
        let mut ctx = InvokeContext::new(Arc::clone(self), Arc::clone(&tree), false);
        let request_id = ctx.request_id().to_string();
        self.events.emit(SitemapEvent::RequestStarted {
            request_id: request_id.clone(),
            uri: env.full_uri(),
        });
        tracing::debug!(uri = %env.uri(), sitemap = %self.label(), "Processing request");

        let result = tree.root.invoke(env, &mut ctx).await;
        match &result {
            Ok(handled) => self.events.emit(SitemapEvent::RequestCompleted {
                request_id,
                uri: env.full_uri(),
                handled: *handled,
                status: env.response().status,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            Err(err) => {
                tracing::debug!(uri = %env.full_uri(), error = %err, "Request failed");
                self.events.emit(SitemapEvent::RequestFailed {
                    request_id,
                    uri: env.full_uri(),
                    error: err.to_string(),
                });
            }
        }
        result
    }

    /// Walk the tree in build-only mode and return the pipeline that would
    /// answer the request, without processing it.
    pub async fn build_pipeline(
        self: &Arc<Self>,
        env: &mut Environment,
    ) -> Result<Option<ProcessingPipeline>> {
        let tree = self.current_tree().await?;
        let mut ctx = InvokeContext::new(Arc::clone(self), Arc::clone(&tree), true);
        if tree.root.invoke(env, &mut ctx).await? {
            Ok(ctx.take_pipeline())
        } else {
            Ok(None)
        }
    }

    /// Build the pipeline behind a `cocoon:` URI as a sub-request of
    /// `parent`. `prefix` and `context` locate the current sitemap for
    /// `cocoon:/` URIs.
    pub async fn build_internal(
        self: &Arc<Self>,
        uri: &str,
        parent: &Environment,
        prefix: &str,
        context: &str,
    ) -> Result<(ProcessingPipeline, Environment)> {
        let (processor, prefix, context, path) = match parse_internal_uri(uri)? {
            InternalTarget::Current(path) => {
                (Arc::clone(self), prefix.to_string(), context.to_string(), path)
            }
            InternalTarget::Root(path) => {
                let root = self.root();
                let context = root.context_dir().unwrap_or_default().to_string();
                (root, String::new(), context, path)
            }
        };

        let mut env = Environment::sub_request(parent, path);
        let relative = env.uri().to_string();
        env.set_uri(&prefix, &relative);
        env.set_context(context);

        let pipeline = processor
            .build_pipeline(&mut env)
            .await?
            .ok_or_else(|| SitemapError::not_found(uri))?;
        Ok((pipeline, env))
    }

    /// Release the tree and everything mounted below it.
    pub async fn dispose(&self) {
        let loaded = self.tree.write().await.take();
        if let Some(loaded) = loaded {
            loaded.tree.dispose().await;
            tracing::debug!(sitemap = %self.label(), "Sitemap disposed");
            self.events.emit(SitemapEvent::SitemapDisposed {
                source: self.label().to_string(),
            });
        }
    }
}

fn directory_of(source: &str) -> String {
    match source.rfind('/') {
        Some(idx) => source[..=idx].to_string(),
        None => String::new(),
    }
}
