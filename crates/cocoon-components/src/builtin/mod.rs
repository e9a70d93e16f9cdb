//! Built-in components registered by [`crate::manager::Registries::builtin`].

pub mod actions;
pub mod generators;
pub mod matchers;
pub mod readers;
pub mod selectors;
pub mod serializers;
pub mod transformers;

pub use actions::{RequestParamsAction, SetAttributeAction};
pub use generators::{FileGenerator, InlineGenerator, NotifyingGenerator};
pub use matchers::{RegexpMatcher, RequestParameterMatcher, WildcardMatcher};
pub use readers::ResourceReader;
pub use selectors::{ExpressionSelector, ParameterSelector, RequestParameterSelector};
pub use serializers::{HtmlSerializer, TextSerializer, XmlSerializer};
pub use transformers::{AttributeRewriter, LinkGatherer, LinkTranslator};
