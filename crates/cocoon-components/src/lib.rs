//! Sitemap components and the machinery for looking them up.
//!
//! Provides the SAX event model (`SaxEvent`, `XmlConsumer`), the component
//! contracts (`Generator`, `Transformer`, `Serializer`, `Reader`, `Matcher`,
//! `Selector`, `Action`), the pooled `ComponentRegistry` with its
//! `ComponentHandle`/`Lease` checkout discipline, `SourceResolver`
//! implementations, and the built-in components.

pub mod builtin;
pub mod component;
pub mod condition;
pub mod lookup;
pub mod manager;
pub mod sax;
pub mod selector;
pub mod source;

pub use component::{
    Action, Generator, LinkSink, MatchResult, Matcher, PreparedPattern, Reader, Selector,
    Serializer, Setup, Transformer,
};
pub use lookup::{ComponentHandle, Lease};
pub use manager::{ComponentManager, Registries};
pub use sax::{parse_xml, Attribute, EventRecorder, SaxEvent, XmlConsumer};
pub use selector::{ComponentInfo, ComponentRegistry, ComponentSelector};
pub use source::{
    resolve_uri, FileSourceResolver, MemorySourceResolver, Source, SourceResolver, SourceValidity,
};
