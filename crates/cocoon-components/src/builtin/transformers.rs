use std::collections::HashMap;

use cocoon_types::Result;

use crate::component::{LinkSink, Setup, Transformer};
use crate::sax::{SaxEvent, XmlConsumer};

/// Attributes that carry links.
const LINK_ATTRIBUTES: &[&str] = &["href", "src", "action", "background"];

fn is_link_attribute(name: &str) -> bool {
    let local = name.rsplit(':').next().unwrap_or(name);
    LINK_ATTRIBUTES.contains(&local)
}

// ---------------------------------------------------------------------------
// Link translator
// ---------------------------------------------------------------------------

/// Rewrites links through the object model's link-translation map. Links
/// without an entry pass through unchanged.
pub struct LinkTranslator;

struct TranslatingConsumer<'a> {
    map: HashMap<String, String>,
    next: Box<dyn XmlConsumer + 'a>,
}

impl XmlConsumer for TranslatingConsumer<'_> {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        match event {
            SaxEvent::StartElement {
                name,
                mut attributes,
            } => {
                for attr in attributes.iter_mut() {
                    if is_link_attribute(&attr.name) {
                        if let Some(translated) = self.map.get(&attr.value) {
                            attr.value = translated.clone();
                        }
                    }
                }
                self.next.handle(SaxEvent::StartElement { name, attributes })
            }
            other => self.next.handle(other),
        }
    }
}

impl Transformer for LinkTranslator {
    fn transformer<'a>(
        &self,
        setup: &Setup<'_>,
        next: Box<dyn XmlConsumer + 'a>,
    ) -> Result<Box<dyn XmlConsumer + 'a>> {
        let map = setup
            .env
            .object_model
            .link_translation
            .clone()
            .unwrap_or_default();
        Ok(Box::new(TranslatingConsumer { map, next }))
    }
}

// ---------------------------------------------------------------------------
// Link gatherer
// ---------------------------------------------------------------------------

/// Collects relative links into the pipeline's link sink. Fragment-only links
/// and links with a scheme are skipped.
pub struct LinkGatherer;

struct GatheringConsumer<'a> {
    sink: Option<LinkSink>,
    next: Box<dyn XmlConsumer + 'a>,
}

impl XmlConsumer for GatheringConsumer<'_> {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        if let (Some(sink), SaxEvent::StartElement { attributes, .. }) = (&self.sink, &event) {
            let found = attributes
                .iter()
                .filter(|a| is_link_attribute(&a.name))
                .map(|a| a.value.as_str())
                .filter(|v| !v.is_empty() && !v.starts_with('#') && !v.contains(':'));
            let mut links = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for link in found {
                if !links.iter().any(|l| l == link) {
                    links.push(link.to_string());
                }
            }
        }
        self.next.handle(event)
    }
}

impl Transformer for LinkGatherer {
    fn transformer<'a>(
        &self,
        setup: &Setup<'_>,
        next: Box<dyn XmlConsumer + 'a>,
    ) -> Result<Box<dyn XmlConsumer + 'a>> {
        if setup.links.is_none() {
            tracing::debug!("link-gatherer used without a link sink, passing events through");
        }
        Ok(Box::new(GatheringConsumer {
            sink: setup.links.clone(),
            next,
        }))
    }
}

// ---------------------------------------------------------------------------
// Attribute rewriter
// ---------------------------------------------------------------------------

/// Prefixes relative values of one attribute (`attribute`, default `href`)
/// with `prefix`. `element` restricts rewriting to one element name.
pub struct AttributeRewriter;

struct RewritingConsumer<'a> {
    attribute: String,
    element: Option<String>,
    prefix: String,
    next: Box<dyn XmlConsumer + 'a>,
}

impl XmlConsumer for RewritingConsumer<'_> {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        match event {
            SaxEvent::StartElement {
                name,
                mut attributes,
            } if self.element.as_deref().map_or(true, |e| e == name) => {
                for attr in attributes.iter_mut() {
                    let relative = !attr.value.starts_with('/')
                        && !attr.value.starts_with('#')
                        && !attr.value.contains(':');
                    if attr.name == self.attribute && relative {
                        attr.value = format!("{}{}", self.prefix, attr.value);
                    }
                }
                self.next.handle(SaxEvent::StartElement { name, attributes })
            }
            other => self.next.handle(other),
        }
    }
}

impl Transformer for AttributeRewriter {
    fn transformer<'a>(
        &self,
        setup: &Setup<'_>,
        next: Box<dyn XmlConsumer + 'a>,
    ) -> Result<Box<dyn XmlConsumer + 'a>> {
        Ok(Box::new(RewritingConsumer {
            attribute: setup.params.get_or("attribute", "href").to_string(),
            element: setup.params.get("element").map(str::to_string),
            prefix: setup.params.get_or("prefix", "").to_string(),
            next,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sax::{parse_xml, Attribute, EventRecorder};
    use crate::source::MemorySourceResolver;
    use cocoon_types::{Environment, Parameters};
    use std::sync::{Arc, Mutex};

    fn first_attr(rec: &EventRecorder, element: &str) -> Vec<Attribute> {
        rec.events
            .iter()
            .find_map(|e| match e {
                SaxEvent::StartElement { name, attributes } if name == element => {
                    Some(attributes.clone())
                }
                _ => None,
            })
            .unwrap_or_default()
    }

    #[test]
    fn translator_rewrites_known_links() {
        let resolver = MemorySourceResolver::new();
        let mut env = Environment::new("x");
        env.object_model.link_translation =
            Some(HashMap::from([("a.html".to_string(), "a-1.html".to_string())]));
        let params = Parameters::new();
        let setup = Setup::new(&env, None, &params, &resolver);
        let mut rec = EventRecorder::new();
        {
            let mut t = LinkTranslator
                .transformer(&setup, Box::new(&mut rec))
                .unwrap();
            parse_xml(r#"<p><a href="a.html"/><a href="b.html"/></p>"#, &mut t).unwrap();
        }
        let links: Vec<String> = rec
            .events
            .iter()
            .filter_map(|e| match e {
                SaxEvent::StartElement { name, attributes } if name == "a" => {
                    Some(attributes[0].value.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(links, vec!["a-1.html", "b.html"]);
    }

    #[test]
    fn gatherer_collects_relative_links_once() {
        let resolver = MemorySourceResolver::new();
        let env = Environment::new("x");
        let params = Parameters::new();
        let sink: LinkSink = Arc::new(Mutex::new(Vec::new()));
        let mut setup = Setup::new(&env, None, &params, &resolver);
        setup.links = Some(Arc::clone(&sink));
        let mut rec = EventRecorder::new();
        {
            let mut t = LinkGatherer.transformer(&setup, Box::new(&mut rec)).unwrap();
            parse_xml(
                r##"<p><a href="a.html"/><img src="i.png"/><a href="a.html"/><a href="#top"/><a href="http://x.org/"/></p>"##,
                &mut t,
            )
            .unwrap();
        }
        assert_eq!(*sink.lock().unwrap(), vec!["a.html", "i.png"]);
        assert!(!rec.events.is_empty());
    }

    #[test]
    fn rewriter_prefixes_relative_values() {
        let resolver = MemorySourceResolver::new();
        let env = Environment::new("x");
        let params: Parameters = [("prefix", "/site/"), ("element", "a")].into_iter().collect();
        let setup = Setup::new(&env, None, &params, &resolver);
        let mut rec = EventRecorder::new();
        {
            let mut t = AttributeRewriter
                .transformer(&setup, Box::new(&mut rec))
                .unwrap();
            parse_xml(
                r#"<p><a href="doc.html"/><link href="style.css"/></p>"#,
                &mut t,
            )
            .unwrap();
        }
        assert_eq!(first_attr(&rec, "a")[0].value, "/site/doc.html");
        assert_eq!(first_attr(&rec, "link")[0].value, "style.css");
    }
}
