//! End-to-end integration tests for the sitemap tree processor.
//!
//! Each test goes the whole way: JSON descriptor -> tree build -> request ->
//! response body, status and component counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cocoon_components::builtin::TextSerializer;
use cocoon_components::{
    parse_xml, ComponentInfo, ComponentManager, ComponentSelector, FileSourceResolver, Generator,
    MatchResult, Matcher, MemorySourceResolver, Registries, Serializer, Setup, XmlConsumer,
};
use cocoon_sitemap::{
    validate_or_raise, ProcessorConfig, SitemapConfig, SitemapEvent, SitemapServices,
    TreeProcessor,
};
use cocoon_types::{Environment, Parameters, Result, SitemapError};

// ---------------------------------------------------------------------------
// Test components
// ---------------------------------------------------------------------------

/// Emits `<doc>src</doc>` and records every `src` it was run with.
struct RecordingGenerator {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, setup: &Setup<'_>, consumer: &mut dyn XmlConsumer) -> Result<()> {
        let src = setup.source.unwrap_or_default().to_string();
        self.log.lock().unwrap().push(src.clone());
        parse_xml(&format!("<doc>{src}</doc>"), consumer)
    }
}

/// Plain-text serializer that counts how often it was set up.
struct CountingSerializer {
    count: Arc<AtomicUsize>,
}

impl Serializer for CountingSerializer {
    fn serializer<'a>(
        &self,
        setup: &Setup<'_>,
        out: &'a mut Vec<u8>,
    ) -> Result<Box<dyn XmlConsumer + 'a>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        TextSerializer.serializer(setup, out)
    }

    fn mime_type(&self) -> &str {
        "text/plain"
    }
}

/// Fails as if the client had gone away.
struct DisconnectingGenerator;

#[async_trait]
impl Generator for DisconnectingGenerator {
    async fn generate(&self, _setup: &Setup<'_>, _consumer: &mut dyn XmlConsumer) -> Result<()> {
        Err(SitemapError::ConnectionReset("client closed the connection".into()))
    }
}

struct FailingMatcher;

impl Matcher for FailingMatcher {
    fn matches(
        &self,
        _pattern: &str,
        _env: &Environment,
        _params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        Err(SitemapError::processing("matcher exploded"))
    }
}

/// Matcher selector whose `failing` type is pooled, counting check-outs and
/// check-ins.
struct CountingSelector {
    inner: Arc<dyn ComponentSelector<dyn Matcher>>,
    selects: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl ComponentSelector<dyn Matcher> for CountingSelector {
    fn role(&self) -> &str {
        "matcher"
    }

    fn has(&self, hint: &str) -> bool {
        hint == "failing" || self.inner.has(hint)
    }

    async fn select(&self, hint: &str) -> Result<Arc<dyn Matcher>> {
        if hint == "failing" {
            self.selects.fetch_add(1, Ordering::SeqCst);
            return Ok(Arc::new(FailingMatcher));
        }
        self.inner.select(hint).await
    }

    fn release(&self, hint: &str, component: Arc<dyn Matcher>) {
        if hint == "failing" {
            self.releases.fetch_add(1, Ordering::SeqCst);
        } else {
            self.inner.release(hint, component);
        }
    }

    fn is_stateless(&self, hint: &str) -> bool {
        hint != "failing" && self.inner.is_stateless(hint)
    }

    fn info(&self, hint: &str) -> Option<ComponentInfo> {
        self.inner.info(hint)
    }

    fn default_hint(&self) -> Option<&str> {
        self.inner.default_hint()
    }

    fn hints(&self) -> Vec<String> {
        let mut hints = self.inner.hints();
        hints.push("failing".into());
        hints
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    resolver: Arc<MemorySourceResolver>,
    generated: Arc<Mutex<Vec<String>>>,
    serialized: Arc<AtomicUsize>,
    components: ComponentManager,
}

/// Built-in components plus the `recording` generator and `counting` serializer,
/// reading sources from memory.
fn harness() -> Harness {
    let generated = Arc::new(Mutex::new(Vec::new()));
    let serialized = Arc::new(AtomicUsize::new(0));
    let resolver = Arc::new(MemorySourceResolver::new());

    let mut registries = Registries::builtin();
    registries.generators.register_stateless(
        "recording",
        Arc::new(RecordingGenerator {
            log: Arc::clone(&generated),
        }),
        ComponentInfo::default(),
    );
    registries.generators.register_stateless(
        "disconnecting",
        Arc::new(DisconnectingGenerator),
        ComponentInfo::default(),
    );
    registries.serializers.register_stateless(
        "counting",
        Arc::new(CountingSerializer {
            count: Arc::clone(&serialized),
        }),
        ComponentInfo::default().with_mime_type("text/plain"),
    );

    Harness {
        components: registries.into_manager(resolver.clone()),
        resolver,
        generated,
        serialized,
    }
}

async fn processor(components: &ComponentManager, json: &str) -> Arc<TreeProcessor> {
    let config = SitemapConfig::from_json(json).expect("sitemap JSON should parse");
    TreeProcessor::from_config(
        config,
        SitemapServices::new(components.clone()),
        ProcessorConfig::default(),
    )
    .await
    .expect("sitemap should build")
}

/// Process `uri` and return the environment afterwards.
async fn request(processor: &Arc<TreeProcessor>, uri: &str) -> Result<Environment> {
    let mut env = Environment::new(uri);
    let handled = processor.process(&mut env).await?;
    assert!(handled, "request {uri} was not handled");
    Ok(env)
}

// ---------------------------------------------------------------------------
// Pipelines: first match, exhaustion, frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_matching_pipeline_wins() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{"pipelines": [
            {"statements": [{"match": {"pattern": "a", "statements": [
                {"generate": {"type": "recording", "src": "one"}}, {"serialize": {"type": "text"}}]}}]},
            {"statements": [{"match": {"pattern": "b", "statements": [
                {"generate": {"type": "recording", "src": "two"}}, {"serialize": {"type": "text"}}]}}]},
            {"statements": [{"match": {"pattern": "c", "statements": [
                {"generate": {"type": "recording", "src": "three"}}, {"serialize": {"type": "text"}}]}}]}
        ]}"#,
    )
    .await;

    let env = request(&p, "c").await.unwrap();
    assert_eq!(env.response().body_text(), "three");
    assert_eq!(env.response().content_type.as_deref(), Some("text/plain"));
    assert_eq!(*h.generated.lock().unwrap(), vec!["three".to_string()]);
}

#[tokio::test]
async fn exhausted_sitemap_raises_not_found() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "never", "statements": [{"read": {"src": "x"}}]}}
        ]}]}"#,
    )
    .await;
    let err = request(&p, "something").await.unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err}");

    let pass = processor(
        &h.components,
        r#"{"pipelines": [{"pass_through": true, "statements": [
            {"match": {"pattern": "never", "statements": [{"read": {"src": "x"}}]}}
        ]}]}"#,
    )
    .await;
    let mut env = Environment::new("something");
    assert!(!pass.process(&mut env).await.unwrap());
}

#[tokio::test]
async fn match_variables_are_scoped_to_their_subtree() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "page-*", "name": "outer", "statements": [
                {"act": {"type": "set-attribute", "parameters": {"b": "inner"}, "statements": [
                    {"select": {"when": [{"test": "param.show = yes", "statements": [
                        {"generate": {"type": "inline", "parameters": {"xml": "<v>{b}/{../1}/{#outer:1}</v>"}}},
                        {"serialize": {"type": "text"}}
                    ]}]}}
                ]}},
                {"generate": {"type": "inline", "parameters": {"xml": "<v>{b}</v>"}}},
                {"serialize": {"type": "text"}}
            ]}}
        ]}]}"#,
    )
    .await;

    let env = request(&p, "page-x?show=yes").await.unwrap();
    assert_eq!(env.response().body_text(), "inner/x/x");

    // The act's frame is gone by the time its sibling runs.
    let err = request(&p, "page-x").await.unwrap_err();
    assert!(
        matches!(err, SitemapError::VariableResolution { .. }),
        "expected a resolution failure, got {err}"
    );
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn untyped_and_typed_handlers_are_exclusive() {
    let h = harness();
    let config = SitemapConfig::from_json(
        r#"{"pipelines": [{"statements": [], "handle_errors": [
            {"statements": [{"read": {"src": "a"}}]},
            {"type": "404", "statements": [{"read": {"src": "b"}}]}
        ]}]}"#,
    )
    .unwrap();
    assert!(validate_or_raise(&config, &h.components).is_err());
    let err = TreeProcessor::from_config(
        config,
        SitemapServices::new(h.components.clone()),
        ProcessorConfig::default(),
    )
    .await
    .err()
    .expect("build should fail");
    assert!(matches!(err, SitemapError::Configuration { .. }));
}

#[tokio::test]
async fn not_found_and_server_errors_reach_their_handlers() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{"pipelines": [{
            "statements": [
                {"match": {"pattern": "broken", "statements": [
                    {"generate": {"type": "inline"}},
                    {"serialize": {"type": "text"}}
                ]}}
            ],
            "handle_errors": [
                {"type": "404", "statements": [
                    {"generate": {"type": "notifying"}}, {"serialize": {"type": "text"}}]},
                {"type": "500", "statements": [
                    {"generate": {"type": "notifying"}}, {"serialize": {"type": "text"}}]}
            ]
        }]}"#,
    )
    .await;
    let mut events = p.subscribe();

    let env = request(&p, "missing").await.unwrap();
    assert_eq!(env.response().status, 404);
    assert!(env.response().body_text().contains("Resource Not Found"));

    let env = request(&p, "broken").await.unwrap();
    assert_eq!(env.response().status, 500);
    assert!(env.response().body_text().contains("An Error Occurred"));
    let notification = env.object_model.notification.as_ref().unwrap();
    assert_eq!(notification.kind, "error");

    let mut handled = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SitemapEvent::ErrorHandled { .. }) {
            handled += 1;
        }
    }
    assert_eq!(handled, 2);
}

#[tokio::test]
async fn internal_handler_covers_failed_aggregate_part() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{"pipelines": [
            {"statements": [{"match": {"pattern": "page", "statements": [
                {"aggregate": {"element": "page", "parts": [{"src": "cocoon:/part"}]}},
                {"serialize": {"type": "xml", "parameters": {"omit-xml-declaration": "true"}}}
            ]}}]},
            {"internal_only": true,
             "statements": [{"match": {"pattern": "part", "statements": [
                {"generate": {"src": "missing.xml"}},
                {"serialize": {}}
             ]}}],
             "handle_errors": [{"when": "internal", "statements": [
                {"generate": {"type": "inline", "parameters": {"xml": "<fallback/>"}}},
                {"serialize": {}}
             ]}]}
        ]}"#,
    )
    .await;

    let env = request(&p, "page").await.unwrap();
    assert_eq!(env.response().body_text(), "<page><fallback/></page>");

    // The internal-only pipeline is invisible from outside.
    let mut env = Environment::new("part");
    assert!(!p.process(&mut env).await.unwrap());
}

#[tokio::test]
async fn pooled_matcher_is_released_when_it_fails() {
    let h = harness();
    let selects = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));
    let mut components = h.components.clone();
    components.matchers = Arc::new(CountingSelector {
        inner: h.components.matchers.clone(),
        selects: Arc::clone(&selects),
        releases: Arc::clone(&releases),
    });

    let p = processor(
        &components,
        r#"{"pipelines": [{"statements": [
            {"match": {"type": "failing", "pattern": "x", "statements": [{"read": {"src": "x"}}]}}
        ]}]}"#,
    )
    .await;
    // Building may check the matcher out once to see whether it prepares.
    let built_selects = selects.load(Ordering::SeqCst);
    let built_releases = releases.load(Ordering::SeqCst);
    assert_eq!(built_selects, built_releases);

    let err = request(&p, "x").await.unwrap_err();
    assert!(err.to_string().contains("matcher exploded"));
    assert_eq!(selects.load(Ordering::SeqCst) - built_selects, 1);
    assert_eq!(releases.load(Ordering::SeqCst) - built_releases, 1);
}

#[tokio::test]
async fn connection_reset_skips_every_handler() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{
          "pipelines": [
            {"statements": [
                {"match": {"pattern": "gone", "statements": [
                    {"generate": {"type": "disconnecting"}}, {"serialize": {"type": "text"}}]}},
                {"match": {"pattern": "page", "statements": [
                    {"aggregate": {"element": "page", "parts": [{"src": "cocoon:/part"}]}},
                    {"serialize": {}}]}}
             ],
             "handle_errors": [{"when": "always", "statements": [
                {"generate": {"type": "recording", "src": "pipeline-handler"}},
                {"serialize": {"type": "text"}}]}]},
            {"internal_only": true,
             "statements": [{"match": {"pattern": "part", "statements": [
                {"generate": {"type": "disconnecting"}}, {"serialize": {}}]}}],
             "handle_errors": [{"when": "internal", "statements": [
                {"generate": {"type": "recording", "src": "part-handler"}},
                {"serialize": {}}]}]}
          ],
          "handle_errors": [{"when": "always", "statements": [
            {"generate": {"type": "recording", "src": "sitemap-handler"}},
            {"serialize": {"type": "text"}}]}]
        }"#,
    )
    .await;

    for uri in ["gone", "page"] {
        let mut env = Environment::new(uri);
        let err = p.process(&mut env).await.unwrap_err();
        assert!(err.is_connection_reset(), "{uri}: expected a reset, got {err}");
        assert!(env.object_model.notification.is_none());
    }
    assert!(h.generated.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_handler_keeps_first_notification() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{
          "pipelines": [{
            "statements": [
                {"match": {"pattern": "broken", "statements": [
                    {"generate": {"type": "inline"}},
                    {"serialize": {"type": "text"}}
                ]}}
            ],
            "handle_errors": [{"statements": [
                {"generate": {"src": "missing-error-page.xml"}},
                {"serialize": {"type": "text"}}
            ]}]
          }],
          "handle_errors": [{"statements": [
            {"generate": {"type": "notifying"}},
            {"serialize": {"type": "text"}}
          ]}]
        }"#,
    )
    .await;

    let env = request(&p, "broken").await.unwrap();
    assert_eq!(env.response().status, 500);
    let body = env.response().body_text();
    assert!(body.contains("An Error Occurred"), "body: {body}");
    assert!(!body.contains("Resource Not Found"), "body: {body}");

    let notification = env.object_model.notification.as_ref().unwrap();
    assert_eq!(notification.kind, "error");
    assert!(
        notification.message.contains("inline generator needs an 'xml' parameter"),
        "{}",
        notification.message
    );
    if let Some(location) = &notification.location {
        assert!(location.starts_with("sitemap#/pipelines/0/"), "{location}");
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[tokio::test]
async fn view_replaces_downstream_stages() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{
          "views": [{"name": "debug", "from_label": "debug", "statements": [
              {"serialize": {"type": "xml", "parameters": {"omit-xml-declaration": "true"}}}
          ]}],
          "pipelines": [{"statements": [
            {"match": {"pattern": "doc", "statements": [
                {"generate": {"type": "recording", "src": "d", "labels": ["debug"]}},
                {"transform": {"type": "link-translator"}},
                {"serialize": {"type": "counting"}}
            ]}}
          ]}]
        }"#,
    )
    .await;

    let env = request(&p, "doc?cocoon-view=debug").await.unwrap();
    assert_eq!(env.response().body_text(), "<doc>d</doc>");
    assert_eq!(h.serialized.load(Ordering::SeqCst), 0);

    let env = request(&p, "doc").await.unwrap();
    assert_eq!(env.response().body_text(), "d");
    assert_eq!(h.serialized.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn last_position_view_replaces_serializer() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{
          "views": [{"name": "raw", "from_position": "last", "statements": [{"serialize": {"type": "text"}}]}],
          "pipelines": [{"statements": [
            {"generate": {"type": "inline", "parameters": {"xml": "<a>text</a>"}}},
            {"serialize": {"type": "counting"}}
          ]}]
        }"#,
    )
    .await;
    let env = request(&p, "anything?cocoon-view=raw").await.unwrap();
    assert_eq!(env.response().body_text(), "text");
    assert_eq!(h.serialized.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn labelled_generator_is_a_branch_point_when_no_view_is_requested() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{
          "views": [{"name": "debug", "from_label": "debug", "statements": [{"serialize": {}}]}],
          "pipelines": [{"statements": [
            {"generate": {"type": "recording", "src": "d", "labels": ["debug"]}},
            {"serialize": {"type": "text"}}
          ]}]
        }"#,
    )
    .await;

    let mut env = Environment::new("doc");
    let pipeline = p.build_pipeline(&mut env).await.unwrap().unwrap();
    assert_eq!(pipeline.branch_points(), 1);
    assert_eq!(pipeline.stages(), vec!["generate:recording", "serialize:text"]);
    // Building does not run anything.
    assert!(h.generated.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Mounts
// ---------------------------------------------------------------------------

const CHILD: &str = r#"{"pipelines": [{"statements": [
    {"match": {"pattern": "**", "statements": [
        {"generate": {"type": "inline", "parameters": {"xml": "<t>{global:site}:{1}</t>"}}},
        {"serialize": {"type": "text"}}
    ]}}
]}], "globals": {"site": "SITE"}}"#;

#[tokio::test]
async fn mount_reuses_one_child_per_source() {
    let h = harness();
    h.resolver.insert("docs/sitemap.json", CHILD.replace("SITE", "docs"));
    h.resolver.insert("blog/sitemap.json", CHILD.replace("SITE", "blog"));
    let p = processor(
        &h.components,
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "*/**", "statements": [
                {"mount": {"src": "{1}/", "uri_prefix": "{1}"}}
            ]}}
        ]}]}"#,
    )
    .await;
    let mut events = p.subscribe();

    assert_eq!(request(&p, "docs/a").await.unwrap().response().body_text(), "docs:a");
    assert_eq!(request(&p, "docs/b/c").await.unwrap().response().body_text(), "docs:b/c");
    assert_eq!(request(&p, "blog/a").await.unwrap().response().body_text(), "blog:a");

    let mut mounts = HashMap::new();
    while let Ok(event) = events.try_recv() {
        if let SitemapEvent::MountCreated { source, uri_prefix } = event {
            let prefix = source.split('/').next().unwrap_or_default();
            assert_eq!(uri_prefix, format!("{prefix}/"));
            *mounts.entry(source).or_insert(0) += 1;
        }
    }
    assert_eq!(mounts.len(), 2);
    assert_eq!(mounts.get("docs/sitemap.json"), Some(&1));
    assert_eq!(mounts.get("blog/sitemap.json"), Some(&1));
}

#[tokio::test]
async fn mount_restores_environment_and_reloads_child() {
    let h = harness();
    h.resolver.insert("docs/sitemap.json", CHILD.replace("SITE", "v1"));
    let p = processor(
        &h.components,
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "docs/**", "statements": [
                {"mount": {"src": "docs/sitemap.json", "uri_prefix": "docs"}}
            ]}}
        ]}]}"#,
    )
    .await;

    let env = request(&p, "docs/x").await.unwrap();
    assert_eq!(env.uri(), "docs/x");
    assert_eq!(env.prefix(), "");
    assert_eq!(env.response().body_text(), "v1:x");

    h.resolver.insert("docs/sitemap.json", CHILD.replace("SITE", "v2"));
    let env = request(&p, "docs/x").await.unwrap();
    assert_eq!(env.response().body_text(), "v2:x");
}

#[tokio::test]
async fn aggregate_part_is_built_through_a_mount() {
    let h = harness();
    h.resolver.insert(
        "sub/sitemap.json",
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "*", "statements": [
                {"generate": {"type": "inline", "parameters": {"xml": "<sub>{1}</sub>"}}},
                {"serialize": {}}
            ]}}
        ]}]}"#,
    );
    let p = processor(
        &h.components,
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "page", "statements": [
                {"aggregate": {"element": "page", "parts": [{"src": "cocoon:/sub/a"}]}},
                {"serialize": {"type": "xml", "parameters": {"omit-xml-declaration": "true"}}}
            ]}},
            {"match": {"pattern": "sub/**", "statements": [
                {"mount": {"src": "sub/", "uri_prefix": "sub"}}
            ]}}
        ]}]}"#,
    )
    .await;

    let env = request(&p, "page").await.unwrap();
    assert_eq!(env.response().body_text(), "<page><sub>a</sub></page>");
    assert_eq!(env.uri(), "page");
}

#[tokio::test]
async fn pass_through_mount_falls_back_to_parent() {
    let h = harness();
    h.resolver.insert(
        "sub/sitemap.json",
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "known", "statements": [
                {"generate": {"type": "inline", "parameters": {"xml": "<t>child</t>"}}},
                {"serialize": {"type": "text"}}
            ]}}
        ]}]}"#,
    );
    let p = processor(
        &h.components,
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "sub/**", "statements": [
                {"mount": {"src": "sub/", "uri_prefix": "sub", "pass_through": true}}
            ]}},
            {"generate": {"type": "inline", "parameters": {"xml": "<t>parent</t>"}}},
            {"serialize": {"type": "text"}}
        ]}]}"#,
    )
    .await;

    let env = request(&p, "sub/known").await.unwrap();
    assert_eq!(env.response().body_text(), "child");

    let env = request(&p, "sub/other").await.unwrap();
    assert_eq!(env.response().body_text(), "parent");
    assert_eq!(env.uri(), "sub/other");
    assert!(!env.is_pass_through());
}

// ---------------------------------------------------------------------------
// Redirects, resources, action sets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn redirects() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "old", "statements": [{"redirect_to": {"uri": "http://example.com/new"}}]}},
            {"match": {"pattern": "moved", "statements": [
                {"redirect_to": {"uri": "http://example.com/moved", "permanent": true}}]}},
            {"match": {"pattern": "alias", "statements": [{"redirect_to": {"uri": "cocoon:/target?x=1"}}]}},
            {"match": {"pattern": "target", "statements": [
                {"generate": {"type": "inline", "parameters": {"xml": "<t>{request-param:x}</t>"}}},
                {"serialize": {"type": "text"}}
            ]}}
        ]}]}"#,
    )
    .await;

    let env = request(&p, "old").await.unwrap();
    assert_eq!(env.response().status, 302);
    assert_eq!(env.response().header("Location"), Some("http://example.com/new"));

    let env = request(&p, "moved").await.unwrap();
    assert_eq!(env.response().status, 301);

    let env = request(&p, "alias").await.unwrap();
    assert_eq!(env.response().body_text(), "1");
    assert_eq!(env.uri(), "alias");
}

#[tokio::test]
async fn resources_receive_parameters() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{
          "pipelines": [{"statements": [
            {"match": {"pattern": "r/*", "statements": [
                {"call": {"resource": "page", "parameters": {"title": "hello {1}"}}}
            ]}}
          ]}],
          "resources": [{"name": "page", "statements": [
            {"generate": {"type": "inline", "parameters": {"xml": "<t>{title}</t>"}}},
            {"serialize": {"type": "text"}}
          ]}]
        }"#,
    )
    .await;
    assert_eq!(request(&p, "r/world").await.unwrap().response().body_text(), "hello world");
}

#[tokio::test]
async fn action_set_filters_on_requested_action() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{
          "action_sets": [{"name": "form", "actions": [
            {"type": "set-attribute", "parameters": {"a": "1"}},
            {"type": "set-attribute", "action": "save", "parameters": {"saved": "yes"}}
          ]}],
          "pipelines": [{"statements": [
            {"act": {"set": "form", "statements": [
                {"generate": {"type": "inline", "parameters": {"xml": "<t>{a}-{request-attr:saved}</t>"}}},
                {"serialize": {"type": "text"}}
            ]}}
          ]}]
        }"#,
    )
    .await;
    assert_eq!(request(&p, "f").await.unwrap().response().body_text(), "1-");
    assert_eq!(
        request(&p, "f?cocoon-action=save").await.unwrap().response().body_text(),
        "1-yes"
    );
}

#[tokio::test]
async fn forward_query_selects_view_for_the_forward_only() {
    let h = harness();
    let p = processor(
        &h.components,
        r#"{
          "views": [{"name": "raw", "from_position": "last", "statements": [{"serialize": {"type": "text"}}]}],
          "pipelines": [{"statements": [
            {"match": {"pattern": "alias", "statements": [
                {"redirect_to": {"uri": "cocoon:/target?cocoon-view=raw&lang=fr"}}]}},
            {"match": {"pattern": "target", "statements": [
                {"generate": {"type": "inline", "parameters": {"xml": "<t>{request-param:lang}</t>"}}},
                {"serialize": {"type": "counting"}}
            ]}}
          ]}]
        }"#,
    )
    .await;

    let env = request(&p, "alias?lang=en").await.unwrap();
    assert_eq!(env.response().body_text(), "fr");
    assert_eq!(h.serialized.load(Ordering::SeqCst), 0);
    assert_eq!(env.view(), None);
    assert_eq!(env.request().parameter("lang"), Some("en"));
    assert_eq!(env.request().parameter("cocoon-view"), None);
}

// ---------------------------------------------------------------------------
// Loading from disk
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loads_sitemap_and_sources_from_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("sitemap.json"),
        r#"{"pipelines": [{"statements": [
            {"match": {"pattern": "*.txt", "statements": [
                {"generate": {"src": "{1}.xml"}},
                {"serialize": {"type": "text", "mime_type": "text/x-test"}}
            ]}}
        ]}]}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("hello.xml"), "<p>from disk</p>").unwrap();

    let components = ComponentManager::with_defaults()
        .with_resolver(Arc::new(FileSourceResolver::with_root(dir.path())));
    let p = TreeProcessor::load(
        "sitemap.json",
        SitemapServices::new(components),
        ProcessorConfig::default(),
    )
    .await
    .unwrap();

    let env = tokio::time::timeout(Duration::from_secs(5), request(&p, "hello.txt"))
        .await
        .expect("request should not hang")
        .unwrap();
    assert_eq!(env.response().body_text(), "from disk");
    assert_eq!(env.response().content_type.as_deref(), Some("text/x-test"));
    assert!(request(&p, "absent.txt").await.unwrap_err().is_not_found());
}
