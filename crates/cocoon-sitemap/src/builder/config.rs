//! Serde model of a sitemap descriptor.
//!
//! ```json
//! {
//!   "pipelines": [{
//!     "statements": [
//!       {"match": {"pattern": "*.html", "statements": [
//!         {"generate": {"src": "docs/{1}.xml"}},
//!         {"serialize": {"type": "html"}}
//!       ]}}
//!     ]
//!   }]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cocoon_types::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SitemapConfig {
    pub views: Vec<ViewConfig>,
    pub resources: Vec<ResourceConfig>,
    pub action_sets: Vec<ActionSetConfig>,
    /// Values readable through the `global` input module.
    pub globals: BTreeMap<String, String>,
    pub flow: Option<FlowConfig>,
    pub pipelines: Vec<PipelineConfig>,
    /// Handlers on the `pipelines` element itself, tried after a pipeline's own.
    pub handle_errors: Vec<HandleErrorsConfig>,
}

impl SitemapConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Number of statements in the whole descriptor, nested ones included.
    pub fn statement_count(&self) -> usize {
        let views: usize = self.views.iter().map(|v| count(&v.statements)).sum();
        let resources: usize = self.resources.iter().map(|r| count(&r.statements)).sum();
        let pipelines: usize = self
            .pipelines
            .iter()
            .map(|p| count(&p.statements) + p.handle_errors.iter().map(|h| count(&h.statements)).sum::<usize>())
            .sum();
        let handlers: usize = self.handle_errors.iter().map(|h| count(&h.statements)).sum();
        views + resources + pipelines + handlers
    }
}

fn count(statements: &[Statement]) -> usize {
    statements
        .iter()
        .map(|s| 1 + s.children().map(count).sum::<usize>())
        .sum()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPosition {
    #[default]
    None,
    First,
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    pub name: String,
    /// Statements carrying this label branch into the view.
    #[serde(default)]
    pub from_label: Option<String>,
    /// `first` (after the generator) or `last` (instead of the serializer).
    #[serde(default)]
    pub from_position: ViewPosition,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSetConfig {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ActionSetEntryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSetEntryConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub src: Option<String>,
    /// Only fire when the `cocoon-action` request parameter equals this.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub language: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub id: Option<String>,
    /// Skipped for external requests.
    pub internal_only: bool,
    /// When this is the last pipeline, return unhandled instead of NotFound.
    pub pass_through: bool,
    pub statements: Vec<Statement>,
    pub handle_errors: Vec<HandleErrorsConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerWhen {
    Internal,
    #[default]
    External,
    Always,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleErrorsConfig {
    /// `"404"`, `"500"`, or absent for an unconditional handler.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub when: HandlerWhen,
    pub statements: Vec<Statement>,
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    Generate(StageConfig),
    Transform(StageConfig),
    Serialize(SerializeConfig),
    Read(ReadConfig),
    Aggregate(AggregateConfig),
    Match(MatchConfig),
    Select(SelectConfig),
    Act(ActConfig),
    Call(CallConfig),
    Mount(MountConfig),
    RedirectTo(RedirectConfig),
}

impl Statement {
    pub fn name(&self) -> &'static str {
        match self {
            Statement::Generate(_) => "generate",
            Statement::Transform(_) => "transform",
            Statement::Serialize(_) => "serialize",
            Statement::Read(_) => "read",
            Statement::Aggregate(_) => "aggregate",
            Statement::Match(_) => "match",
            Statement::Select(_) => "select",
            Statement::Act(_) => "act",
            Statement::Call(_) => "call",
            Statement::Mount(_) => "mount",
            Statement::RedirectTo(_) => "redirect_to",
        }
    }

    /// Whether this statement always answers the request when reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Statement::Serialize(_)
                | Statement::Read(_)
                | Statement::Mount(_)
                | Statement::RedirectTo(_)
        )
    }

    /// Labels declared on the statement itself.
    pub fn labels(&self) -> &[String] {
        match self {
            Statement::Generate(s) | Statement::Transform(s) => &s.labels,
            Statement::Serialize(s) => &s.labels,
            Statement::Aggregate(a) => &a.labels,
            _ => &[],
        }
    }

    /// Nested statement lists, in document order.
    pub fn children(&self) -> impl Iterator<Item = &[Statement]> {
        let lists: Vec<&[Statement]> = match self {
            Statement::Match(m) => vec![&m.statements],
            Statement::Act(a) => vec![&a.statements],
            Statement::Select(s) => s
                .when
                .iter()
                .map(|w| w.statements.as_slice())
                .chain(s.otherwise.as_deref())
                .collect(),
            _ => Vec::new(),
        };
        lists.into_iter()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub src: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub labels: Vec<String>,
    pub hints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializeConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub src: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub labels: Vec<String>,
    pub hints: BTreeMap<String, String>,
    pub status_code: Option<u16>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub src: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub hints: BTreeMap<String, String>,
    pub status_code: Option<u16>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    pub element: String,
    #[serde(default)]
    pub ns: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub parts: Vec<PartConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartConfig {
    pub src: String,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub ns: Option<String>,
    #[serde(default)]
    pub strip_root: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub pattern: String,
    /// Anchor for `{#name:var}` references.
    pub name: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub when: Vec<WhenConfig>,
    pub otherwise: Option<Vec<Statement>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenConfig {
    pub test: String,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActConfig {
    /// Action type. Mutually exclusive with `set`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Name of an action set.
    pub set: Option<String>,
    pub src: Option<String>,
    pub name: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub statements: Vec<Statement>,
}

/// Exactly one of `resource`, `function`, `continuation` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub resource: Option<String>,
    pub function: Option<String>,
    pub continuation: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub src: String,
    pub uri_prefix: String,
    #[serde(default)]
    pub pass_through: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    pub uri: String,
    #[serde(default)]
    pub permanent: bool,
}
