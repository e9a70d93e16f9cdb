use async_trait::async_trait;

use cocoon_types::{Result, SitemapError};

use crate::component::{Generator, Setup};
use crate::sax::{emit_document, parse_xml, Attribute, SaxEvent, XmlConsumer};

/// Parses the XML document named by `src`, resolved against the sitemap
/// context.
pub struct FileGenerator;

#[async_trait]
impl Generator for FileGenerator {
    async fn generate(&self, setup: &Setup<'_>, consumer: &mut dyn XmlConsumer) -> Result<()> {
        let src = setup.require_source("file generator")?;
        let source = setup.resolver.resolve(src, setup.env.context()).await?;
        tracing::debug!(uri = %source.uri, "Generating from file");
        parse_xml(source.text()?, consumer)
    }
}

/// Parses XML given directly in the `xml` parameter, or in `src` when the
/// parameter is absent.
pub struct InlineGenerator;

#[async_trait]
impl Generator for InlineGenerator {
    async fn generate(&self, setup: &Setup<'_>, consumer: &mut dyn XmlConsumer) -> Result<()> {
        let xml = setup
            .params
            .get("xml")
            .or(setup.source)
            .ok_or_else(|| SitemapError::processing("inline generator needs an 'xml' parameter"))?;
        parse_xml(xml, consumer)
    }
}

/// Renders the notification recorded by the error handler.
pub struct NotifyingGenerator;

fn text_element(name: &str, text: &str) -> [SaxEvent; 3] {
    [
        SaxEvent::start(name),
        SaxEvent::text(text),
        SaxEvent::end(name),
    ]
}

#[async_trait]
impl Generator for NotifyingGenerator {
    async fn generate(&self, setup: &Setup<'_>, consumer: &mut dyn XmlConsumer) -> Result<()> {
        let notification = setup
            .env
            .object_model
            .notification
            .as_ref()
            .ok_or_else(|| SitemapError::processing("No notification available to render"))?;

        let source = serde_json::to_value(notification.source)?;
        let mut body = vec![SaxEvent::start_with(
            "notify",
            vec![
                Attribute::new("type", &notification.kind),
                Attribute::new("sender", "cocoon"),
            ],
        )];
        body.extend(text_element("title", &notification.title));
        body.extend(text_element("source", source.as_str().unwrap_or_default()));
        body.extend(text_element("message", &notification.message));
        if let Some(description) = &notification.description {
            body.extend(text_element("description", description));
        }
        if let Some(location) = &notification.location {
            body.extend(text_element("location", location));
        }
        body.extend(text_element("uri", &notification.uri));
        for (key, value) in &notification.extra {
            body.push(SaxEvent::start_with(
                "extra",
                vec![Attribute::new("description", key)],
            ));
            body.push(SaxEvent::text(value));
            body.push(SaxEvent::end("extra"));
        }
        body.push(SaxEvent::end("notify"));
        emit_document(consumer, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sax::EventRecorder;
    use crate::source::MemorySourceResolver;
    use cocoon_types::{Environment, Notification, Parameters};

    #[tokio::test]
    async fn file_generator_resolves_against_context() {
        let resolver = MemorySourceResolver::new().with("site/docs/a.xml", "<a>hello</a>");
        let env = Environment::new("a").with_context("site/docs/");
        let params = Parameters::new();
        let setup = Setup::new(&env, Some("a.xml"), &params, &resolver);
        let mut rec = EventRecorder::new();
        FileGenerator.generate(&setup, &mut rec).await.unwrap();
        assert_eq!(rec.text(), "hello");
    }

    #[tokio::test]
    async fn file_generator_requires_src() {
        let resolver = MemorySourceResolver::new();
        let env = Environment::new("a");
        let params = Parameters::new();
        let setup = Setup::new(&env, None, &params, &resolver);
        let mut rec = EventRecorder::new();
        assert!(FileGenerator.generate(&setup, &mut rec).await.is_err());
    }

    #[tokio::test]
    async fn inline_generator_prefers_parameter() {
        let resolver = MemorySourceResolver::new();
        let env = Environment::new("a");
        let params: Parameters = [("xml", "<p>param</p>")].into_iter().collect();
        let setup = Setup::new(&env, Some("<p>src</p>"), &params, &resolver);
        let mut rec = EventRecorder::new();
        InlineGenerator.generate(&setup, &mut rec).await.unwrap();
        assert_eq!(rec.text(), "param");
    }

    #[tokio::test]
    async fn notifying_generator_renders_notification() {
        let resolver = MemorySourceResolver::new();
        let mut env = Environment::new("missing");
        env.object_model.notification = Some(Notification::from_error(
            &SitemapError::not_found("missing"),
            "missing",
        ));
        let params = Parameters::new();
        let setup = Setup::new(&env, None, &params, &resolver);
        let mut rec = EventRecorder::new();
        NotifyingGenerator.generate(&setup, &mut rec).await.unwrap();
        assert_eq!(
            rec.events[1],
            SaxEvent::start_with(
                "notify",
                vec![
                    Attribute::new("type", "resource-not-found"),
                    Attribute::new("sender", "cocoon"),
                ]
            )
        );
        assert!(rec.text().contains("Resource not found: missing"));
        assert!(rec.text().contains("not_found"));
    }

    #[tokio::test]
    async fn notifying_generator_without_notification_fails() {
        let resolver = MemorySourceResolver::new();
        let env = Environment::new("x");
        let params = Parameters::new();
        let setup = Setup::new(&env, None, &params, &resolver);
        let mut rec = EventRecorder::new();
        assert!(NotifyingGenerator.generate(&setup, &mut rec).await.is_err());
    }
}
