//! Sitemap validation: lint rules and diagnostics.
//!
//! Rules run over the parsed descriptor before a tree is built. Call
//! [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail on
//! the first `Error`-severity issue.

use std::collections::HashSet;

use cocoon_components::{ComponentManager, ComponentSelector};
use cocoon_types::{Result, SitemapError};

use crate::builder::config::{HandleErrorsConfig, SitemapConfig, Statement};
use crate::nodes::HandlerKind;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// JSON-pointer style path, e.g. `pipelines/0/statements/2`.
    pub location: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, config: &SitemapConfig, components: &ComponentManager) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Walking the descriptor
// ---------------------------------------------------------------------------

/// A statement list and where it sits.
struct StatementList<'a> {
    path: String,
    statements: &'a [Statement],
    in_view: bool,
}

fn nested<'a>(statement: &'a Statement, path: &str) -> Vec<(String, &'a [Statement])> {
    match statement {
        Statement::Match(m) => vec![(format!("{path}/statements"), m.statements.as_slice())],
        Statement::Act(a) => vec![(format!("{path}/statements"), a.statements.as_slice())],
        Statement::Select(s) => {
            let mut lists: Vec<_> = s
                .when
                .iter()
                .enumerate()
                .map(|(i, w)| (format!("{path}/when/{i}/statements"), w.statements.as_slice()))
                .collect();
            if let Some(otherwise) = &s.otherwise {
                lists.push((format!("{path}/otherwise"), otherwise.as_slice()));
            }
            lists
        }
        _ => Vec::new(),
    }
}

fn collect_lists<'a>(
    path: String,
    statements: &'a [Statement],
    in_view: bool,
    out: &mut Vec<StatementList<'a>>,
) {
    for (i, statement) in statements.iter().enumerate() {
        for (child_path, child) in nested(statement, &format!("{path}/{i}")) {
            collect_lists(child_path, child, in_view, out);
        }
    }
    out.push(StatementList {
        path,
        statements,
        in_view,
    });
}

/// Every statement list in the descriptor, nested ones included.
fn statement_lists(config: &SitemapConfig) -> Vec<StatementList<'_>> {
    let mut out = Vec::new();
    for (i, view) in config.views.iter().enumerate() {
        collect_lists(format!("views/{i}/statements"), &view.statements, true, &mut out);
    }
    for (i, resource) in config.resources.iter().enumerate() {
        collect_lists(format!("resources/{i}/statements"), &resource.statements, false, &mut out);
    }
    for (i, pipeline) in config.pipelines.iter().enumerate() {
        collect_lists(format!("pipelines/{i}/statements"), &pipeline.statements, false, &mut out);
        for (j, handler) in pipeline.handle_errors.iter().enumerate() {
            collect_lists(
                format!("pipelines/{i}/handle_errors/{j}/statements"),
                &handler.statements,
                false,
                &mut out,
            );
        }
    }
    for (j, handler) in config.handle_errors.iter().enumerate() {
        collect_lists(format!("handle_errors/{j}/statements"), &handler.statements, false, &mut out);
    }
    out
}

fn statements(config: &SitemapConfig) -> Vec<(String, &Statement, bool)> {
    statement_lists(config)
        .into_iter()
        .flat_map(|StatementList { path, statements, in_view }| {
            statements
                .iter()
                .enumerate()
                .map(move |(i, s)| (format!("{path}/{i}"), s, in_view))
        })
        .collect()
}

fn diagnostic(rule: &str, severity: Severity, message: String, location: Option<String>) -> Diagnostic {
    Diagnostic {
        rule: rule.into(),
        severity,
        message,
        location,
        fix: None,
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn check_type<C: ?Sized + Send + Sync>(
    selector: &dyn ComponentSelector<C>,
    kind: Option<&str>,
) -> Option<String> {
    match kind {
        Some(kind) if !selector.has(kind) => Some(format!("Unknown {} type '{kind}'", selector.role())),
        None if selector.default_hint().is_none() => Some(format!(
            "No {} type given and the registry declares no default",
            selector.role()
        )),
        _ => None,
    }
}

struct ComponentTypeRule;
impl LintRule for ComponentTypeRule {
    fn name(&self) -> &str { "component_type" }
    fn apply(&self, config: &SitemapConfig, components: &ComponentManager) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let mut report = |message: Option<String>, location: &str| {
            if let Some(message) = message {
                out.push(Diagnostic {
                    fix: Some("Register the component or use one of the known types".into()),
                    ..diagnostic(self.name(), Severity::Error, message, Some(location.to_string()))
                });
            }
        };
        for (path, statement, _) in statements(config) {
            let message = match statement {
                Statement::Generate(s) => check_type(components.generators.as_ref(), s.kind.as_deref()),
                Statement::Transform(s) => check_type(components.transformers.as_ref(), s.kind.as_deref()),
                Statement::Serialize(s) => check_type(components.serializers.as_ref(), s.kind.as_deref()),
                Statement::Read(r) => check_type(components.readers.as_ref(), r.kind.as_deref()),
                Statement::Match(m) => check_type(components.matchers.as_ref(), m.kind.as_deref()),
                Statement::Select(s) => check_type(components.selectors.as_ref(), s.kind.as_deref()),
                Statement::Act(a) if a.kind.is_some() => {
                    check_type(components.actions.as_ref(), a.kind.as_deref())
                }
                _ => None,
            };
            report(message, &path);
        }
        for (i, set) in config.action_sets.iter().enumerate() {
            for (j, entry) in set.actions.iter().enumerate() {
                report(
                    check_type(components.actions.as_ref(), Some(&entry.kind)),
                    &format!("action_sets/{i}/actions/{j}"),
                );
            }
        }
        out
    }
}

fn has_sink(statements: &[Statement]) -> bool {
    statements.iter().any(|s| {
        matches!(
            s,
            Statement::Serialize(_)
                | Statement::Call(_)
                | Statement::Mount(_)
                | Statement::RedirectTo(_)
        ) || s.children().any(has_sink)
    })
}

struct PipelineSinkRule;
impl LintRule for PipelineSinkRule {
    fn name(&self) -> &str { "pipeline_sink" }
    fn apply(&self, config: &SitemapConfig, _components: &ComponentManager) -> Vec<Diagnostic> {
        statement_lists(config)
            .into_iter()
            .filter(|list| !list.in_view)
            .filter_map(|list| {
                let start = list
                    .statements
                    .iter()
                    .position(|s| matches!(s, Statement::Generate(_) | Statement::Aggregate(_)))?;
                if has_sink(&list.statements[start..]) {
                    return None;
                }
                Some(Diagnostic {
                    fix: Some("Add a serialize statement after the generator".into()),
                    ..diagnostic(
                        self.name(),
                        Severity::Warning,
                        "Statements generate content but never serialize it".into(),
                        Some(format!("{}/{start}", list.path)),
                    )
                })
            })
            .collect()
    }
}

struct UndefinedReferenceRule;
impl LintRule for UndefinedReferenceRule {
    fn name(&self) -> &str { "undefined_reference" }
    fn apply(&self, config: &SitemapConfig, _components: &ComponentManager) -> Vec<Diagnostic> {
        let resources: HashSet<&str> = config.resources.iter().map(|r| r.name.as_str()).collect();
        let sets: HashSet<&str> = config.action_sets.iter().map(|s| s.name.as_str()).collect();
        let mut out = Vec::new();
        for (path, statement, _) in statements(config) {
            let message = match statement {
                Statement::Call(c) => match (&c.resource, &c.function, &c.continuation) {
                    (Some(name), _, _) if !resources.contains(name.as_str()) => {
                        Some(format!("Call to undefined resource '{name}'"))
                    }
                    (_, Some(_), _) | (_, _, Some(_)) if config.flow.is_none() => {
                        Some("Flow call without a 'flow' declaration".to_string())
                    }
                    _ => None,
                },
                Statement::Act(a) => match &a.set {
                    Some(set) if !sets.contains(set.as_str()) => {
                        Some(format!("Act refers to undefined action set '{set}'"))
                    }
                    _ => None,
                },
                _ => None,
            };
            if let Some(message) = message {
                out.push(diagnostic(self.name(), Severity::Error, message, Some(path)));
            }
        }
        out
    }
}

struct LabelInViewRule;
impl LintRule for LabelInViewRule {
    fn name(&self) -> &str { "label_in_view" }
    fn apply(&self, config: &SitemapConfig, _components: &ComponentManager) -> Vec<Diagnostic> {
        statements(config)
            .into_iter()
            .filter(|(_, _, in_view)| *in_view)
            .filter(|(_, statement, _)| {
                !statement.labels().is_empty()
                    || matches!(statement, Statement::Aggregate(a) if a.parts.iter().any(|p| !p.labels.is_empty()))
            })
            .map(|(path, statement, _)| Diagnostic {
                fix: Some("Move the label to the statement outside the view".into()),
                ..diagnostic(
                    self.name(),
                    Severity::Error,
                    format!("'{}' declares labels inside a view", statement.name()),
                    Some(path),
                )
            })
            .collect()
    }
}

fn check_handlers(group: &[HandleErrorsConfig], path: &str, rule: &str, out: &mut Vec<Diagnostic>) {
    let mut kinds = Vec::new();
    for (i, handler) in group.iter().enumerate() {
        match HandlerKind::parse(handler.kind.as_deref()) {
            Some(kind) => kinds.push(kind),
            None => out.push(diagnostic(
                rule,
                Severity::Error,
                format!(
                    "Unknown handle_errors type '{}'",
                    handler.kind.as_deref().unwrap_or_default()
                ),
                Some(format!("{path}/{i}")),
            )),
        }
    }
    let any = kinds.contains(&HandlerKind::Any);
    if any && kinds.iter().any(|k| *k != HandlerKind::Any) {
        out.push(Diagnostic {
            fix: Some("Give every handler a type, or keep a single untyped handler".into()),
            ..diagnostic(
                rule,
                Severity::Error,
                "An untyped handle_errors cannot be combined with \"404\" or \"500\" handlers".into(),
                Some(path.to_string()),
            )
        });
    }
}

struct HandleErrorsRule;
impl LintRule for HandleErrorsRule {
    fn name(&self) -> &str { "handle_errors" }
    fn apply(&self, config: &SitemapConfig, _components: &ComponentManager) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for (i, pipeline) in config.pipelines.iter().enumerate() {
            check_handlers(
                &pipeline.handle_errors,
                &format!("pipelines/{i}/handle_errors"),
                self.name(),
                &mut out,
            );
        }
        check_handlers(&config.handle_errors, "handle_errors", self.name(), &mut out);
        out
    }
}

struct UnreachableStatementRule;
impl LintRule for UnreachableStatementRule {
    fn name(&self) -> &str { "unreachable_statement" }
    fn apply(&self, config: &SitemapConfig, _components: &ComponentManager) -> Vec<Diagnostic> {
        statement_lists(config)
            .into_iter()
            .filter_map(|list| {
                let sink = list.statements.iter().position(Statement::is_terminal)?;
                let next = sink + 1;
                (next < list.statements.len()).then(|| Diagnostic {
                    fix: Some("Remove the statements or move them before the sink".into()),
                    ..diagnostic(
                        self.name(),
                        Severity::Warning,
                        format!(
                            "'{}' can never run: '{}' before it always answers the request",
                            list.statements[next].name(),
                            list.statements[sink].name()
                        ),
                        Some(format!("{}/{next}", list.path)),
                    )
                })
            })
            .collect()
    }
}

struct DuplicateNameRule;
impl LintRule for DuplicateNameRule {
    fn name(&self) -> &str { "duplicate_name" }
    fn apply(&self, config: &SitemapConfig, _components: &ComponentManager) -> Vec<Diagnostic> {
        let groups: [(&str, Vec<&str>); 3] = [
            ("views", config.views.iter().map(|v| v.name.as_str()).collect()),
            ("resources", config.resources.iter().map(|r| r.name.as_str()).collect()),
            ("action_sets", config.action_sets.iter().map(|s| s.name.as_str()).collect()),
        ];
        let mut out = Vec::new();
        for (group, names) in groups {
            let mut seen = HashSet::new();
            for (i, name) in names.into_iter().enumerate() {
                if !seen.insert(name) {
                    out.push(diagnostic(
                        self.name(),
                        Severity::Error,
                        format!("'{name}' is declared twice in {group}"),
                        Some(format!("{group}/{i}")),
                    ));
                }
            }
        }
        out
    }
}

struct UnreachableViewRule;
impl LintRule for UnreachableViewRule {
    fn name(&self) -> &str { "unreachable_view" }
    fn apply(&self, config: &SitemapConfig, _components: &ComponentManager) -> Vec<Diagnostic> {
        use crate::builder::config::ViewPosition;
        config
            .views
            .iter()
            .enumerate()
            .filter(|(_, v)| v.from_label.is_none() && v.from_position == ViewPosition::None)
            .map(|(i, v)| Diagnostic {
                fix: Some("Set from_label or from_position".into()),
                ..diagnostic(
                    self.name(),
                    Severity::Warning,
                    format!("View '{}' has no label or position and can never be entered", v.name),
                    Some(format!("views/{i}")),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(config: &SitemapConfig, components: &ComponentManager) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(ComponentTypeRule),
        Box::new(PipelineSinkRule),
        Box::new(UndefinedReferenceRule),
        Box::new(LabelInViewRule),
        Box::new(HandleErrorsRule),
        Box::new(UnreachableStatementRule),
        Box::new(DuplicateNameRule),
        Box::new(UnreachableViewRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(config, components));
    }
    diagnostics
}

/// Run all lint rules; return `Err` for the first `Error`-severity
/// diagnostic.
pub fn validate_or_raise(
    config: &SitemapConfig,
    components: &ComponentManager,
) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(config, components);
    if let Some(error) = diagnostics.iter().find(|d| d.severity == Severity::Error) {
        return Err(SitemapError::configuration(
            error.location.clone().unwrap_or_else(|| "sitemap".into()),
            format!("[{}] {}", error.rule, error.message),
        ));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lint(json: &str) -> Vec<Diagnostic> {
        let config = SitemapConfig::from_json(json).unwrap();
        validate(&config, &ComponentManager::with_defaults())
    }

    fn has(diags: &[Diagnostic], rule: &str, severity: Severity) -> bool {
        diags.iter().any(|d| d.rule == rule && d.severity == severity)
    }

    #[test]
    fn valid_sitemap_passes() {
        let diags = lint(
            r#"{"pipelines": [{"statements": [
                {"match": {"pattern": "*.html", "statements": [
                    {"generate": {"src": "{1}.xml"}},
                    {"transform": {"type": "link-translator"}},
                    {"serialize": {"type": "html"}}
                ]}}
            ]}]}"#,
        );
        let errors: Vec<_> = diags.iter().filter(|d| d.severity == Severity::Error).collect();
        assert!(errors.is_empty(), "Expected no errors, got: {errors:?}");
        assert!(diags.is_empty(), "Expected no warnings, got: {diags:?}");
    }

    #[test]
    fn unknown_component_type_error() {
        let diags = lint(r#"{"pipelines": [{"statements": [{"generate": {"type": "xslt"}}]}]}"#);
        let diag = diags.iter().find(|d| d.rule == "component_type").unwrap();
        assert_eq!(diag.location.as_deref(), Some("pipelines/0/statements/0"));
        assert!(diag.message.contains("xslt"));
    }

    #[test]
    fn generator_without_serializer_warns() {
        let diags = lint(
            r#"{"pipelines": [{"statements": [
                {"match": {"pattern": "a", "statements": [{"generate": {"src": "a.xml"}}]}}
            ]}]}"#,
        );
        assert!(has(&diags, "pipeline_sink", Severity::Warning));

        // A serializer inside a nested select still counts.
        let diags = lint(
            r#"{"pipelines": [{"statements": [
                {"generate": {"src": "a.xml"}},
                {"select": {"when": [{"test": "method = GET", "statements": [{"serialize": {}}]}]}}
            ]}]}"#,
        );
        assert!(!has(&diags, "pipeline_sink", Severity::Warning));
    }

    #[test]
    fn undefined_references_error() {
        let diags = lint(
            r#"{"pipelines": [{"statements": [
                {"act": {"set": "login", "statements": [{"call": {"resource": "page"}}]}},
                {"call": {"function": "main"}}
            ]}]}"#,
        );
        let undefined: Vec<_> = diags.iter().filter(|d| d.rule == "undefined_reference").collect();
        assert_eq!(undefined.len(), 3, "{undefined:?}");
        assert!(undefined
            .iter()
            .any(|d| d.location.as_deref() == Some("pipelines/0/statements/0/statements/0")));
    }

    #[test]
    fn label_in_view_error() {
        let diags = lint(
            r#"{"views": [{"name": "v", "from_label": "x", "statements": [
                {"transform": {"type": "link-gatherer", "labels": ["x"]}},
                {"serialize": {}}
            ]}]}"#,
        );
        assert!(has(&diags, "label_in_view", Severity::Error));
    }

    #[test]
    fn handler_exclusivity_error() {
        let diags = lint(
            r#"{"pipelines": [{"statements": [], "handle_errors": [
                {"statements": []}, {"type": "404", "statements": []}
            ]}], "handle_errors": [{"type": "teapot"}]}"#,
        );
        let handler_errors = diags.iter().filter(|d| d.rule == "handle_errors").count();
        assert_eq!(handler_errors, 2);
    }

    #[test]
    fn statements_after_sink_warn() {
        let diags = lint(
            r#"{"pipelines": [{"statements": [
                {"read": {"src": "a"}},
                {"redirect_to": {"uri": "b"}}
            ]}]}"#,
        );
        let diag = diags.iter().find(|d| d.rule == "unreachable_statement").unwrap();
        assert_eq!(diag.location.as_deref(), Some("pipelines/0/statements/1"));
    }

    #[test]
    fn duplicate_names_and_dead_views() {
        let diags = lint(
            r#"{"resources": [{"name": "r"}, {"name": "r"}],
                "views": [{"name": "orphan"}]}"#,
        );
        assert!(has(&diags, "duplicate_name", Severity::Error));
        assert!(has(&diags, "unreachable_view", Severity::Warning));
    }

    #[test]
    fn validate_or_raise_reports_first_error() {
        let config =
            SitemapConfig::from_json(r#"{"pipelines": [{"statements": [{"read": {"type": "nope"}}]}]}"#)
                .unwrap();
        let err = validate_or_raise(&config, &ComponentManager::with_defaults()).unwrap_err();
        assert!(matches!(err, SitemapError::Configuration { .. }));
        assert!(err.to_string().contains("component_type"));

        let ok = SitemapConfig::from_json(r#"{"pipelines": [{"statements": [{"read": {"src": "a"}}]}]}"#)
            .unwrap();
        assert!(validate_or_raise(&ok, &ComponentManager::with_defaults()).is_ok());
    }
}
