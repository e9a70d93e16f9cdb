//! Per-role component selectors bundled with the source resolver.

use std::sync::Arc;

use crate::builtin::*;
use crate::component::{Action, Generator, Matcher, Reader, Selector, Serializer, Transformer};
use crate::selector::{ComponentInfo, ComponentRegistry, ComponentSelector};
use crate::source::{FileSourceResolver, SourceResolver};

/// Mutable registries for every role, turned into a [`ComponentManager`]
/// once registration is done.
pub struct Registries {
    pub generators: ComponentRegistry<dyn Generator>,
    pub transformers: ComponentRegistry<dyn Transformer>,
    pub serializers: ComponentRegistry<dyn Serializer>,
    pub readers: ComponentRegistry<dyn Reader>,
    pub matchers: ComponentRegistry<dyn Matcher>,
    pub selectors: ComponentRegistry<dyn Selector>,
    pub actions: ComponentRegistry<dyn Action>,
}

impl Registries {
    pub fn empty() -> Self {
        Self {
            generators: ComponentRegistry::new("generator"),
            transformers: ComponentRegistry::new("transformer"),
            serializers: ComponentRegistry::new("serializer"),
            readers: ComponentRegistry::new("reader"),
            matchers: ComponentRegistry::new("matcher"),
            selectors: ComponentRegistry::new("selector"),
            actions: ComponentRegistry::new("action"),
        }
    }

    /// Registries pre-filled with the built-in components.
    pub fn builtin() -> Self {
        let mut r = Self::empty();
        let none = ComponentInfo::default;

        r.generators
            .register_stateless("file", Arc::new(FileGenerator), ComponentInfo::labeled(&["content"]))
            .register_stateless("inline", Arc::new(InlineGenerator), ComponentInfo::labeled(&["content"]))
            .register_stateless("notifying", Arc::new(NotifyingGenerator), none())
            .set_default("file");

        r.transformers
            .register_stateless("link-translator", Arc::new(LinkTranslator), none())
            .register_stateless("link-gatherer", Arc::new(LinkGatherer), none())
            .register_stateless("attribute-rewriter", Arc::new(AttributeRewriter), none());

        r.serializers
            .register_stateless("xml", Arc::new(XmlSerializer), none().with_mime_type("text/xml"))
            .register_stateless("html", Arc::new(HtmlSerializer), none().with_mime_type("text/html"))
            .register_stateless("text", Arc::new(TextSerializer), none().with_mime_type("text/plain"))
            .set_default("xml");

        r.readers
            .register_stateless("resource", Arc::new(ResourceReader), none())
            .set_default("resource");

        r.matchers
            .register_stateless("wildcard", Arc::new(WildcardMatcher), none())
            .register_stateless("regexp", Arc::new(RegexpMatcher), none())
            .register_stateless("request-parameter", Arc::new(RequestParameterMatcher), none())
            .set_default("wildcard");

        r.selectors
            .register_stateless("parameter", Arc::new(ParameterSelector), none())
            .register_stateless("request-parameter", Arc::new(RequestParameterSelector), none())
            .register_stateless("expression", Arc::new(ExpressionSelector), none())
            .set_default("expression");

        r.actions
            .register_stateless("request-params", Arc::new(RequestParamsAction), none())
            .register_stateless("set-attribute", Arc::new(SetAttributeAction), none());

        r
    }

    pub fn into_manager(self, resolver: Arc<dyn SourceResolver>) -> ComponentManager {
        ComponentManager {
            generators: Arc::new(self.generators),
            transformers: Arc::new(self.transformers),
            serializers: Arc::new(self.serializers),
            readers: Arc::new(self.readers),
            matchers: Arc::new(self.matchers),
            selectors: Arc::new(self.selectors),
            actions: Arc::new(self.actions),
            resolver,
        }
    }
}

/// Component lookup for a sitemap. Fields are plain selectors so a host can
/// swap in its own implementation for any role.
#[derive(Clone)]
pub struct ComponentManager {
    pub generators: Arc<dyn ComponentSelector<dyn Generator>>,
    pub transformers: Arc<dyn ComponentSelector<dyn Transformer>>,
    pub serializers: Arc<dyn ComponentSelector<dyn Serializer>>,
    pub readers: Arc<dyn ComponentSelector<dyn Reader>>,
    pub matchers: Arc<dyn ComponentSelector<dyn Matcher>>,
    pub selectors: Arc<dyn ComponentSelector<dyn Selector>>,
    pub actions: Arc<dyn ComponentSelector<dyn Action>>,
    pub resolver: Arc<dyn SourceResolver>,
}

impl ComponentManager {
    /// Built-in components reading sources from the filesystem.
    pub fn with_defaults() -> Self {
        Registries::builtin().into_manager(Arc::new(FileSourceResolver::new()))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}

impl std::fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentManager")
            .field("generators", &self.generators.hints())
            .field("transformers", &self.transformers.hints())
            .field("serializers", &self.serializers.hints())
            .field("readers", &self.readers.hints())
            .field("matchers", &self.matchers.hints())
            .field("selectors", &self.selectors.hints())
            .field("actions", &self.actions.hints())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults() {
        let m = ComponentManager::with_defaults();
        assert_eq!(m.matchers.default_hint(), Some("wildcard"));
        assert_eq!(m.serializers.default_hint(), Some("xml"));
        assert!(m.generators.has("notifying"));
        assert!(m.matchers.is_stateless("regexp"));
        assert_eq!(
            m.serializers.info("html").and_then(|i| i.mime_type).as_deref(),
            Some("text/html")
        );
        assert_eq!(m.generators.info("file").unwrap().labels, vec!["content"]);
    }

    #[tokio::test]
    async fn selects_builtin_matcher() {
        let m = ComponentManager::with_defaults();
        let matcher = m.matchers.select("wildcard").await.unwrap();
        assert!(matcher.preparable());
    }
}
