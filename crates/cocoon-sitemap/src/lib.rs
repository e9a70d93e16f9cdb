//! Sitemap tree processor: compiled node tree, pipeline assembly, error
//! handling, and sub-sitemap mounts.
//!
//! A sitemap descriptor is parsed into [`SitemapConfig`], checked by the lint
//! rules in [`validation`], and compiled by [`TreeBuilder`] into a tree of
//! [`ProcessingNode`]s. A [`TreeProcessor`] owns that tree, reloads it when
//! the descriptor changes, and routes each request through it.

pub mod builder;
pub mod context;
pub mod events;
pub mod flow;
pub mod nodes;
pub mod pipeline;
pub mod processor;
pub mod validation;
pub mod variables;

pub use builder::config::{SitemapConfig, Statement};
pub use builder::TreeBuilder;
pub use context::{ContextGuard, FrameGuard, InvokeContext};
pub use events::{EventEmitter, SitemapEvent};
pub use flow::{FlowInterpreter, Redirector};
pub use nodes::{NodeKind, ProcessingNode};
pub use pipeline::{ProcessingPipeline, SinkDescriptor, StageDescriptor};
pub use processor::{ProcessorConfig, SitemapServices, SitemapTree, TreeProcessor};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
pub use variables::{ParameterResolvers, VariableResolver};
