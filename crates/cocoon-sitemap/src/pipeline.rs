//! Pipeline assembly and execution.
//!
//! Nodes describe stages on a [`ProcessingPipeline`] as they are invoked. Once
//! a serializer or reader is set the description is sealed and either
//! processed straight away or handed to whoever asked for it in build-only
//! mode (a parent mount, an aggregate part, an error handler).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use cocoon_components::builtin::{LinkGatherer, LinkTranslator};
use cocoon_components::{
    parse_xml, Attribute, ComponentManager, Lease, LinkSink, SaxEvent, Setup, Transformer,
    XmlConsumer,
};
use cocoon_types::{Environment, Parameters, Result, SitemapError};

use crate::nodes::error_handling::DeferredErrorHandler;
use crate::processor::TreeProcessor;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One configured stage: component type, resolved `src`, resolved
/// parameters and pipeline hints.
#[derive(Debug, Clone, Default)]
pub struct StageDescriptor {
    pub hint: String,
    pub source: Option<String>,
    pub params: Parameters,
    pub hints: Parameters,
}

impl StageDescriptor {
    pub fn new(hint: impl Into<String>) -> Self {
        Self {
            hint: hint.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A serializer or reader plus the statement's response overrides.
#[derive(Debug, Clone, Default)]
pub struct SinkDescriptor {
    pub stage: StageDescriptor,
    pub status_code: Option<u16>,
    pub mime_type: Option<String>,
}

enum GeneratorSlot {
    Component(StageDescriptor),
    Aggregate(Aggregation),
}

enum Sink {
    Serializer(SinkDescriptor),
    Reader(SinkDescriptor),
}

pub struct ProcessingPipeline {
    components: ComponentManager,
    generator: Option<GeneratorSlot>,
    transformers: Vec<StageDescriptor>,
    sink: Option<Sink>,
    branch_points: usize,
    processed: bool,
    error_handler: Option<DeferredErrorHandler>,
}

impl ProcessingPipeline {
    pub fn new(components: ComponentManager) -> Self {
        Self {
            components,
            generator: None,
            transformers: Vec::new(),
            sink: None,
            branch_points: 0,
            processed: false,
            error_handler: None,
        }
    }

    fn check_open(&self, what: &str, hint: &str) -> Result<()> {
        if self.sink.is_some() {
            return Err(SitemapError::processing(format!(
                "Cannot add {what} '{hint}': the pipeline already ends in a serializer or reader"
            )));
        }
        Ok(())
    }

    pub fn set_generator(&mut self, stage: StageDescriptor) -> Result<()> {
        self.check_open("generator", &stage.hint)?;
        if self.generator.is_some() {
            return Err(SitemapError::processing(format!(
                "Generator already set. Cannot set generator '{}'",
                stage.hint
            )));
        }
        self.generator = Some(GeneratorSlot::Component(stage));
        Ok(())
    }

    pub fn set_aggregation(&mut self, aggregation: Aggregation) -> Result<()> {
        self.check_open("aggregation", &aggregation.element)?;
        if self.generator.is_some() {
            return Err(SitemapError::processing(format!(
                "Generator already set. Cannot aggregate into '{}'",
                aggregation.element
            )));
        }
        self.generator = Some(GeneratorSlot::Aggregate(aggregation));
        Ok(())
    }

    pub fn add_transformer(&mut self, stage: StageDescriptor) -> Result<()> {
        self.check_open("transformer", &stage.hint)?;
        if self.generator.is_none() {
            return Err(SitemapError::processing(format!(
                "Must set a generator before adding transformer '{}'",
                stage.hint
            )));
        }
        self.transformers.push(stage);
        Ok(())
    }

    pub fn set_serializer(&mut self, sink: SinkDescriptor) -> Result<()> {
        self.check_open("serializer", &sink.stage.hint)?;
        if self.generator.is_none() {
            return Err(SitemapError::processing(format!(
                "Must set a generator before setting serializer '{}'",
                sink.stage.hint
            )));
        }
        self.sink = Some(Sink::Serializer(sink));
        Ok(())
    }

    pub fn set_reader(&mut self, sink: SinkDescriptor) -> Result<()> {
        self.check_open("reader", &sink.stage.hint)?;
        if self.generator.is_some() || !self.transformers.is_empty() {
            return Err(SitemapError::processing(format!(
                "Reader '{}' cannot be used in a pipeline that has a generator",
                sink.stage.hint
            )));
        }
        self.sink = Some(Sink::Reader(sink));
        Ok(())
    }

    /// Record that a stage declaring views was reached, whether or not a view
    /// fires on this request.
    pub fn inform_branch_point(&mut self) {
        self.branch_points += 1;
    }

    pub fn branch_points(&self) -> usize {
        self.branch_points
    }

    pub fn is_complete(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_reader(&self) -> bool {
        matches!(self.sink, Some(Sink::Reader(_)))
    }

    /// Stage list in execution order, as `role:type` strings.
    pub fn stages(&self) -> Vec<String> {
        let mut stages = Vec::new();
        match &self.generator {
            Some(GeneratorSlot::Component(g)) => stages.push(format!("generate:{}", g.hint)),
            Some(GeneratorSlot::Aggregate(a)) => stages.push(format!("aggregate:{}", a.element)),
            None => {}
        }
        stages.extend(self.transformers.iter().map(|t| format!("transform:{}", t.hint)));
        match &self.sink {
            Some(Sink::Serializer(s)) => stages.push(format!("serialize:{}", s.stage.hint)),
            Some(Sink::Reader(r)) => stages.push(format!("read:{}", r.stage.hint)),
            None => {}
        }
        stages
    }

    /// Attach the handler used when streaming this pipeline fails later.
    /// The innermost handler wins.
    pub fn set_error_handler(&mut self, handler: DeferredErrorHandler) {
        if self.error_handler.is_none() {
            self.error_handler = Some(handler);
        }
    }

    pub fn has_error_handler(&self) -> bool {
        self.error_handler.is_some()
    }

    /// Run the pipeline and write the response. May only be called once.
    pub async fn process(&mut self, env: &mut Environment) -> Result<bool> {
        if self.processed {
            return Err(SitemapError::processing("Pipeline has already been processed"));
        }
        self.processed = true;
        tracing::debug!(uri = %env.uri(), stages = ?self.stages(), "Processing pipeline");

        let this: &ProcessingPipeline = self;
        match &this.sink {
            Some(Sink::Serializer(sink)) => this.serialize(sink, env).await?,
            Some(Sink::Reader(sink)) => this.read(sink, env).await?,
            None => {
                return Err(SitemapError::processing(
                    "Pipeline has neither a serializer nor a reader",
                ))
            }
        }
        Ok(true)
    }

    async fn read(&self, sink: &SinkDescriptor, env: &mut Environment) -> Result<()> {
        let reader = Lease::checkout(&self.components.readers, &sink.stage.hint).await?;
        let mut body = Vec::new();
        let mime_type = {
            let setup = Setup::new(
                env,
                sink.stage.source.as_deref(),
                &sink.stage.params,
                self.components.resolver.as_ref(),
            );
            reader.read(&setup, &mut body).await?;
            sink.mime_type
                .clone()
                .or_else(|| reader.mime_type(&setup))
                .or_else(|| self.components.readers.info(&sink.stage.hint).and_then(|i| i.mime_type))
        };
        write_response(env, sink.status_code, mime_type, body);
        Ok(())
    }

    async fn serialize(&self, sink: &SinkDescriptor, env: &mut Environment) -> Result<()> {
        let serializer = Lease::checkout(&self.components.serializers, &sink.stage.hint).await?;
        let links: Option<LinkSink> = env
            .object_model
            .link_collection
            .as_ref()
            .map(|_| Arc::new(Mutex::new(Vec::new())));
        let mime_type = sink
            .mime_type
            .clone()
            .or_else(|| self.components.serializers.info(&sink.stage.hint).and_then(|i| i.mime_type))
            .unwrap_or_else(|| serializer.mime_type().to_string());

        let mut body = Vec::new();
        {
            let env: &Environment = env;
            let resolver = self.components.resolver.as_ref();
            let no_params = Parameters::new();
            let setup = Setup::new(env, sink.stage.source.as_deref(), &sink.stage.params, resolver);
            let mut consumer = serializer.serializer(&setup, &mut body)?;

            // Synthetic stages sit right before the serializer. The gatherer
            // sees links after translation.
            if links.is_some() {
                let mut gather = Setup::new(env, None, &no_params, resolver);
                gather.links = links.clone();
                consumer = LinkGatherer.transformer(&gather, consumer)?;
            }
            if env.object_model.link_translation.is_some() {
                let translate = Setup::new(env, None, &no_params, resolver);
                consumer = LinkTranslator.transformer(&translate, consumer)?;
            }
            self.feed(env, &mut consumer).await?;
        }

        if let Some(links) = links {
            let found = links.lock().map(|l| l.clone()).unwrap_or_default();
            env.object_model
                .link_collection
                .get_or_insert_with(Vec::new)
                .extend(found);
        }
        write_response(env, sink.status_code, Some(mime_type), body);
        Ok(())
    }

    /// Run generator and transformers into `consumer`.
    async fn feed(&self, env: &Environment, consumer: &mut (dyn XmlConsumer + '_)) -> Result<()> {
        let resolver = self.components.resolver.as_ref();
        let mut leases = Vec::with_capacity(self.transformers.len());
        for stage in &self.transformers {
            leases.push(Lease::checkout(&self.components.transformers, &stage.hint).await?);
        }

        let mut chain: Box<dyn XmlConsumer + '_> = Box::new(consumer);
        for (stage, transformer) in self.transformers.iter().zip(leases.iter()).rev() {
            let setup = Setup::new(env, stage.source.as_deref(), &stage.params, resolver);
            chain = transformer.transformer(&setup, chain)?;
        }

        match &self.generator {
            Some(GeneratorSlot::Component(stage)) => {
                let generator = Lease::checkout(&self.components.generators, &stage.hint).await?;
                let setup = Setup::new(env, stage.source.as_deref(), &stage.params, resolver);
                generator.generate(&setup, &mut *chain).await
            }
            Some(GeneratorSlot::Aggregate(aggregation)) => {
                aggregation.generate(env, &self.components, &mut *chain).await
            }
            None => Err(SitemapError::processing("Pipeline has no generator")),
        }
    }

    /// Stream the generator and transformers into `consumer` without a
    /// serializer. Used for `cocoon:` aggregate parts. A failure is routed to
    /// the error handler remembered at build time, if any.
    pub fn process_xml<'a>(
        &'a self,
        env: &'a Environment,
        consumer: &'a mut (dyn XmlConsumer + 'a),
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.is_reader() {
                return Err(SitemapError::processing(
                    "A reader pipeline cannot be included as XML",
                ));
            }
            match self.feed(env, &mut *consumer).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_connection_reset() => Err(err),
                Err(err) => match &self.error_handler {
                    Some(handler) => handler.handle(err, env, consumer).await,
                    None => Err(err),
                },
            }
        })
    }
}

impl std::fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("stages", &self.stages())
            .field("branch_points", &self.branch_points)
            .field("processed", &self.processed)
            .finish()
    }
}

fn write_response(env: &mut Environment, status: Option<u16>, mime_type: Option<String>, body: Vec<u8>) {
    let response = env.response_mut();
    if let Some(status) = status {
        response.status = status;
    }
    if mime_type.is_some() {
        response.content_type = mime_type;
    }
    response.body = body;
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AggregatePart {
    pub src: String,
    pub element: Option<String>,
    pub ns: Option<String>,
    pub strip_root: bool,
}

/// A generator slot that concatenates several sources under one root element.
pub struct Aggregation {
    pub element: String,
    pub ns: Option<String>,
    pub prefix: Option<String>,
    pub parts: Vec<AggregatePart>,
    /// Sitemap that `cocoon:/` parts resolve against.
    pub sitemap: Arc<TreeProcessor>,
    pub base_prefix: String,
    pub base_context: String,
}

impl Aggregation {
    async fn generate(
        &self,
        env: &Environment,
        components: &ComponentManager,
        consumer: &mut (dyn XmlConsumer + '_),
    ) -> Result<()> {
        let root = match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.element),
            None => self.element.clone(),
        };
        let mut attributes = Vec::new();
        if let Some(ns) = &self.ns {
            let attr = match &self.prefix {
                Some(prefix) => format!("xmlns:{prefix}"),
                None => "xmlns".to_string(),
            };
            attributes.push(Attribute::new(attr, ns.clone()));
        }

        consumer.handle(SaxEvent::StartDocument)?;
        consumer.handle(SaxEvent::start_with(root.clone(), attributes))?;
        for part in &self.parts {
            if let Some(element) = &part.element {
                let attrs = part
                    .ns
                    .iter()
                    .map(|ns| Attribute::new("xmlns", ns.clone()))
                    .collect();
                consumer.handle(SaxEvent::start_with(element.clone(), attrs))?;
            }

            let mut include = IncludeFilter::new(&mut *consumer, part.strip_root);
            if part.src.starts_with("cocoon:") {
                let (pipeline, sub_env) = self
                    .sitemap
                    .build_internal(&part.src, env, &self.base_prefix, &self.base_context)
                    .await?;
                pipeline.process_xml(&sub_env, &mut include).await?;
            } else {
                let source = components.resolver.resolve(&part.src, &self.base_context).await?;
                parse_xml(source.text()?, &mut include)?;
            }

            if let Some(element) = &part.element {
                consumer.handle(SaxEvent::end(element.clone()))?;
            }
        }
        consumer.handle(SaxEvent::end(root))?;
        consumer.handle(SaxEvent::EndDocument)
    }
}

/// Passes an included document through without its document events, and
/// without its root element when `strip_root` is set.
pub struct IncludeFilter<'a> {
    next: &'a mut (dyn XmlConsumer + 'a),
    strip_root: bool,
    depth: usize,
}

impl<'a> IncludeFilter<'a> {
    pub fn new(next: &'a mut (dyn XmlConsumer + 'a), strip_root: bool) -> Self {
        Self {
            next,
            strip_root,
            depth: 0,
        }
    }
}

impl XmlConsumer for IncludeFilter<'_> {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        match event {
            SaxEvent::StartDocument | SaxEvent::EndDocument => Ok(()),
            SaxEvent::StartElement { .. } => {
                self.depth += 1;
                if self.strip_root && self.depth == 1 {
                    return Ok(());
                }
                self.next.handle(event)
            }
            SaxEvent::EndElement { .. } => {
                let root = self.depth == 1;
                self.depth = self.depth.saturating_sub(1);
                if self.strip_root && root {
                    return Ok(());
                }
                self.next.handle(event)
            }
            other => {
                if self.strip_root && self.depth == 0 {
                    return Ok(());
                }
                self.next.handle(other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cocoon_components::{EventRecorder, MemorySourceResolver};

    fn components() -> ComponentManager {
        let resolver = MemorySourceResolver::new()
            .with("doc.xml", "<doc><p>hello</p></doc>")
            .with("logo.svg", "<svg/>");
        ComponentManager::with_defaults().with_resolver(Arc::new(resolver))
    }

    #[test]
    fn stage_order_is_enforced() {
        let mut p = ProcessingPipeline::new(components());
        assert!(p.add_transformer(StageDescriptor::new("link-translator")).is_err());
        p.set_generator(StageDescriptor::new("file").with_source("doc.xml")).unwrap();
        assert!(p.set_generator(StageDescriptor::new("file")).is_err());
        assert!(p
            .set_reader(SinkDescriptor {
                stage: StageDescriptor::new("resource"),
                ..Default::default()
            })
            .is_err());
        p.add_transformer(StageDescriptor::new("link-translator")).unwrap();
        p.set_serializer(SinkDescriptor {
            stage: StageDescriptor::new("xml"),
            ..Default::default()
        })
        .unwrap();
        assert!(p.is_complete());
        let err = p.add_transformer(StageDescriptor::new("link-gatherer")).unwrap_err();
        assert!(err.to_string().contains("already ends"));
        assert_eq!(
            p.stages(),
            vec!["generate:file", "transform:link-translator", "serialize:xml"]
        );
    }

    #[tokio::test]
    async fn processes_generator_into_serializer() {
        let mut p = ProcessingPipeline::new(components());
        p.set_generator(StageDescriptor::new("file").with_source("doc.xml")).unwrap();
        p.set_serializer(SinkDescriptor {
            stage: StageDescriptor::new("xml"),
            status_code: Some(203),
            mime_type: None,
        })
        .unwrap();

        let mut env = Environment::new("doc");
        assert!(p.process(&mut env).await.unwrap());
        assert_eq!(env.response().status, 203);
        assert_eq!(env.response().content_type.as_deref(), Some("text/xml"));
        assert!(env.response().body_text().contains("<p>hello</p>"));

        let again = p.process(&mut env).await.unwrap_err();
        assert!(again.to_string().contains("already been processed"));
    }

    #[tokio::test]
    async fn reader_pipeline_copies_bytes() {
        let mut p = ProcessingPipeline::new(components());
        p.set_reader(SinkDescriptor {
            stage: StageDescriptor::new("resource").with_source("logo.svg"),
            ..Default::default()
        })
        .unwrap();
        let mut env = Environment::new("logo.svg");
        p.process(&mut env).await.unwrap();
        assert_eq!(env.response().body_text(), "<svg/>");
        assert_eq!(env.response().content_type.as_deref(), Some("image/svg+xml"));
    }

    #[tokio::test]
    async fn link_flags_insert_synthetic_stages() {
        let resolver = MemorySourceResolver::new()
            .with("links.xml", r##"<doc><a href="a.html"/><a href="#top"/><a href="b.html"/></doc>"##);
        let components = ComponentManager::with_defaults().with_resolver(Arc::new(resolver));
        let mut p = ProcessingPipeline::new(components);
        p.set_generator(StageDescriptor::new("file").with_source("links.xml")).unwrap();
        p.set_serializer(SinkDescriptor {
            stage: StageDescriptor::new("xml"),
            ..Default::default()
        })
        .unwrap();

        let mut env = Environment::new("links");
        env.object_model.link_collection = Some(Vec::new());
        env.object_model.link_translation =
            Some([("a.html".to_string(), "a-static.html".to_string())].into_iter().collect());
        p.process(&mut env).await.unwrap();

        assert_eq!(
            env.object_model.link_collection.as_deref(),
            Some(&["a-static.html".to_string(), "b.html".to_string()][..])
        );
        assert!(env.response().body_text().contains("a-static.html"));
    }

    #[test]
    fn include_filter_strips_root() {
        let mut recorder = EventRecorder::new();
        {
            let mut filter = IncludeFilter::new(&mut recorder, true);
            parse_xml("<root><a>x</a></root>", &mut filter).unwrap();
        }
        assert_eq!(
            recorder.events,
            vec![SaxEvent::start("a"), SaxEvent::text("x"), SaxEvent::end("a")]
        );
    }
}
