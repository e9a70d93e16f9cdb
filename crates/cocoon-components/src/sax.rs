//! SAX-style event stream connecting generators, transformers and serializers.

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use cocoon_types::{Result, SitemapError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaxEvent {
    StartDocument,
    EndDocument,
    StartElement {
        name: String,
        attributes: Vec<Attribute>,
    },
    EndElement {
        name: String,
    },
    Characters(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

impl SaxEvent {
    pub fn start(name: impl Into<String>) -> Self {
        SaxEvent::StartElement {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn start_with(name: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        SaxEvent::StartElement {
            name: name.into(),
            attributes,
        }
    }

    pub fn end(name: impl Into<String>) -> Self {
        SaxEvent::EndElement { name: name.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        SaxEvent::Characters(text.into())
    }
}

/// Receiver of a SAX event stream. Transformers wrap the next consumer in the
/// chain; serializers are the last consumer and write bytes.
pub trait XmlConsumer: Send {
    fn handle(&mut self, event: SaxEvent) -> Result<()>;
}

impl<T: XmlConsumer + ?Sized> XmlConsumer for Box<T> {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        (**self).handle(event)
    }
}

impl<T: XmlConsumer + ?Sized> XmlConsumer for &mut T {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        (**self).handle(event)
    }
}

/// Buffers events for later replay or inspection.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    pub events: Vec<SaxEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replay(&self, consumer: &mut dyn XmlConsumer) -> Result<()> {
        for event in &self.events {
            consumer.handle(event.clone())?;
        }
        Ok(())
    }

    /// Concatenated character data, handy in assertions.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                SaxEvent::Characters(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl XmlConsumer for EventRecorder {
    fn handle(&mut self, event: SaxEvent) -> Result<()> {
        self.events.push(event);
        Ok(())
    }
}

/// Emit the given events wrapped in a start/end document pair.
pub fn emit_document(
    consumer: &mut dyn XmlConsumer,
    body: impl IntoIterator<Item = SaxEvent>,
) -> Result<()> {
    consumer.handle(SaxEvent::StartDocument)?;
    for event in body {
        consumer.handle(event)?;
    }
    consumer.handle(SaxEvent::EndDocument)
}

/// Parse `xml` and push it through `consumer` as a complete document.
pub fn parse_xml(xml: &str, consumer: &mut dyn XmlConsumer) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    consumer.handle(SaxEvent::StartDocument)?;
    loop {
        let position = reader.buffer_position();
        let event = reader.read_event().map_err(|e| parse_error(position, e))?;
        match event {
            Event::Start(e) => {
                let (name, attributes) = element_parts(&e)?;
                consumer.handle(SaxEvent::StartElement { name, attributes })?;
            }
            Event::Empty(e) => {
                let (name, attributes) = element_parts(&e)?;
                consumer.handle(SaxEvent::StartElement {
                    name: name.clone(),
                    attributes,
                })?;
                consumer.handle(SaxEvent::EndElement { name })?;
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                consumer.handle(SaxEvent::EndElement { name })?;
            }
            Event::Text(e) => {
                let raw = String::from_utf8_lossy(&e);
                let text = unescape(&raw)
                    .map_err(|err| parse_error(position, err))?
                    .into_owned();
                if !text.is_empty() {
                    consumer.handle(SaxEvent::Characters(text))?;
                }
            }
            Event::CData(e) => {
                consumer.handle(SaxEvent::Characters(
                    String::from_utf8_lossy(&e).into_owned(),
                ))?;
            }
            Event::GeneralRef(e) => {
                let name = String::from_utf8_lossy(&e).into_owned();
                consumer.handle(SaxEvent::Characters(resolve_reference(&name)?))?;
            }
            Event::Comment(e) => {
                consumer.handle(SaxEvent::Comment(String::from_utf8_lossy(&e).into_owned()))?;
            }
            Event::PI(e) => {
                let content = String::from_utf8_lossy(&e).into_owned();
                let (target, data) = match content.split_once(char::is_whitespace) {
                    Some((t, d)) => (t.to_string(), d.trim_start().to_string()),
                    None => (content, String::new()),
                };
                consumer.handle(SaxEvent::ProcessingInstruction { target, data })?;
            }
            Event::Eof => break,
            Event::Decl(_) | Event::DocType(_) => {}
        }
    }
    consumer.handle(SaxEvent::EndDocument)
}

fn element_parts(e: &BytesStart<'_>) -> Result<(String, Vec<Attribute>)> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SitemapError::processing(format!("Malformed attribute: {err}")))?;
        let raw = String::from_utf8_lossy(&attr.value);
        let value = unescape(&raw)
            .map_err(|err| SitemapError::processing(format!("Malformed attribute value: {err}")))?
            .into_owned();
        attributes.push(Attribute {
            name: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value,
        });
    }
    Ok((name, attributes))
}

fn resolve_reference(name: &str) -> Result<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => num.parse::<u32>().ok(),
        };
        return code
            .and_then(char::from_u32)
            .map(String::from)
            .ok_or_else(|| SitemapError::processing(format!("Invalid character reference &{name};")));
    }
    let text = match name {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "apos" => "'",
        "quot" => "\"",
        _ => {
            return Err(SitemapError::processing(format!(
                "Unknown entity reference &{name};"
            )))
        }
    };
    Ok(text.to_string())
}

fn parse_error(position: u64, err: impl std::fmt::Display) -> SitemapError {
    SitemapError::processing(format!("XML parse error at byte {position}: {err}"))
}
