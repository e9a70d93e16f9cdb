use quick_xml::escape::escape;

use cocoon_types::Result;

use crate::component::{Serializer, Setup};
use crate::sax::{Attribute, SaxEvent, XmlConsumer};

/// HTML elements written without an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Markup {
    Xml,
    Html,
}

/// Writes a SAX stream as markup text.
struct MarkupWriter<'a> {
    out: &'a mut Vec<u8>,
    markup: Markup,
    declaration: bool,
    /// Start tag written without its closing `>` yet, so an immediately
    /// following end tag can collapse it to `<x/>`.
    pending: Option<String>,
}

impl MarkupWriter<'_> {
    fn write(&mut self, s: &str) {
        self.out.extend_from_slice(s.as_bytes());
    }

    fn flush_pending(&mut self) {
        if self.pending.take().is_some() {
            self.write(">");
        }
    }

    fn start_tag(&mut self, name: &str, attributes: &[Attribute]) {
        let mut tag = format!("<{name}");
        for attr in attributes {
            tag.push_str(&format!(" {}=\"{}\"", attr.name, escape(attr.value.as_str())));
        }
        self.write(&tag);
    }
}

impl XmlConsumer for MarkupWriter<'_> {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        match event {
            SaxEvent::StartDocument => {
                if self.declaration {
                    self.write("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
                }
            }
            SaxEvent::EndDocument => self.flush_pending(),
            SaxEvent::StartElement { name, attributes } => {
                self.flush_pending();
                self.start_tag(&name, &attributes);
                match self.markup {
                    Markup::Xml => self.pending = Some(name),
                    Markup::Html => self.write(">"),
                }
            }
            SaxEvent::EndElement { name } => match self.markup {
                Markup::Xml if self.pending.as_deref() == Some(name.as_str()) => {
                    self.pending = None;
                    self.write("/>");
                }
                Markup::Html if VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) => {}
                _ => {
                    self.flush_pending();
                    self.write(&format!("</{name}>"));
                }
            },
            SaxEvent::Characters(text) => {
                self.flush_pending();
                self.write(&escape(text.as_str()));
            }
            SaxEvent::Comment(text) => {
                self.flush_pending();
                self.write(&format!("<!--{text}-->"));
            }
            SaxEvent::ProcessingInstruction { target, data } => {
                self.flush_pending();
                if data.is_empty() {
                    self.write(&format!("<?{target}?>"));
                } else {
                    self.write(&format!("<?{target} {data}?>"));
                }
            }
        }
        Ok(())
    }
}

/// XML output. `omit-xml-declaration=true` drops the declaration.
pub struct XmlSerializer;

impl Serializer for XmlSerializer {
    fn serializer<'a>(
        &self,
        setup: &Setup<'_>,
        out: &'a mut Vec<u8>,
    ) -> Result<Box<dyn XmlConsumer + 'a>> {
        Ok(Box::new(MarkupWriter {
            out,
            markup: Markup::Xml,
            declaration: !setup.params.get_bool("omit-xml-declaration", false),
            pending: None,
        }))
    }

    fn mime_type(&self) -> &str {
        "text/xml"
    }
}

/// HTML output: no declaration, void elements without end tags.
pub struct HtmlSerializer;

impl Serializer for HtmlSerializer {
    fn serializer<'a>(
        &self,
        _setup: &Setup<'_>,
        out: &'a mut Vec<u8>,
    ) -> Result<Box<dyn XmlConsumer + 'a>> {
        Ok(Box::new(MarkupWriter {
            out,
            markup: Markup::Html,
            declaration: false,
            pending: None,
        }))
    }

    fn mime_type(&self) -> &str {
        "text/html"
    }
}

/// Character data only, unescaped.
pub struct TextSerializer;

struct TextWriter<'a> {
    out: &'a mut Vec<u8>,
}

impl XmlConsumer for TextWriter<'_> {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        if let SaxEvent::Characters(text) = event {
            self.out.extend_from_slice(text.as_bytes());
        }
        Ok(())
    }
}

impl Serializer for TextSerializer {
    fn serializer<'a>(
        &self,
        _setup: &Setup<'_>,
        out: &'a mut Vec<u8>,
    ) -> Result<Box<dyn XmlConsumer + 'a>> {
        Ok(Box::new(TextWriter { out }))
    }

    fn mime_type(&self) -> &str {
        "text/plain"
    }
}
