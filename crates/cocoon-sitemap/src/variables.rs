//! `{...}` substitution in sitemap attribute values.
//!
//! Syntax:
//! - `{name}` looks `name` up in the innermost frame pushed by a match or act.
//! - `{../name}` goes one frame further out per `../`.
//! - `{#anchor:name}` looks in the frame whose statement carried `name: "anchor"`.
//! - `{module:key}` reads an input module (`request-param`, `request-header`,
//!   `request-attr`, `global`). Missing module values are empty.
//! - Expressions nest (`{../{1}}`); `\{`, `\}` and `\\` are literal.

use std::collections::{BTreeMap, HashMap};

use cocoon_types::{Environment, Parameters, Result, SitemapError};

/// Named variables produced by one match or act statement.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub anchor: Option<String>,
    pub vars: HashMap<String, String>,
}

/// What an expression can see while it resolves.
pub struct ResolveScope<'a> {
    pub frames: &'a [Frame],
    pub env: &'a Environment,
    pub globals: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputModule {
    RequestParam,
    RequestHeader,
    RequestAttr,
    Global,
}

impl InputModule {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "request-param" => Some(InputModule::RequestParam),
            "request-header" => Some(InputModule::RequestHeader),
            "request-attr" => Some(InputModule::RequestAttr),
            "global" => Some(InputModule::Global),
            _ => None,
        }
    }

    fn value(self, key: &str, scope: &ResolveScope<'_>) -> Option<String> {
        let request = scope.env.request();
        match self {
            InputModule::RequestParam => request.parameter(key).map(str::to_string),
            InputModule::RequestHeader => request.header(key).map(str::to_string),
            InputModule::RequestAttr => request.attribute(key).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            InputModule::Global => scope.globals.get(key).cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Expr(Vec<Segment>),
}

/// A parsed attribute value. Values without expressions resolve to
/// themselves without touching the scope.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    expression: String,
    literal: Option<String>,
    segments: Vec<Segment>,
}

impl VariableResolver {
    pub fn parse(expression: &str) -> Result<Self> {
        let mut chars = expression.chars().peekable();
        let segments = parse_sequence(&mut chars, expression, 0)?;
        check_modules(&segments, expression)?;
        let literal = if segments.iter().all(|s| matches!(s, Segment::Text(_))) {
            Some(
                segments
                    .iter()
                    .map(|s| match s {
                        Segment::Text(t) => t.as_str(),
                        Segment::Expr(_) => "",
                    })
                    .collect(),
            )
        } else {
            None
        };
        Ok(Self {
            expression: expression.to_string(),
            literal,
            segments,
        })
    }

    pub fn literal(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            expression: value.clone(),
            literal: Some(value.clone()),
            segments: vec![Segment::Text(value)],
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_literal(&self) -> bool {
        self.literal.is_some()
    }

    /// The value with escapes removed, when there is nothing to resolve.
    pub fn literal_value(&self) -> Option<&str> {
        self.literal.as_deref()
    }

    pub fn resolve(&self, scope: &ResolveScope<'_>) -> Result<String> {
        if let Some(literal) = &self.literal {
            return Ok(literal.clone());
        }
        let mut out = String::new();
        for segment in &self.segments {
            self.resolve_segment(segment, scope, &mut out)?;
        }
        Ok(out)
    }

    fn resolve_segment(
        &self,
        segment: &Segment,
        scope: &ResolveScope<'_>,
        out: &mut String,
    ) -> Result<()> {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Expr(inner) => {
                let mut name = String::new();
                for s in inner {
                    self.resolve_segment(s, scope, &mut name)?;
                }
                out.push_str(&self.lookup(&name, scope)?);
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str, scope: &ResolveScope<'_>) -> Result<String> {
        if let Some(anchored) = name.strip_prefix('#') {
            let (anchor, var) = anchored
                .split_once(':')
                .ok_or_else(|| self.error(format!("anchored reference '{{{name}}}' needs 'anchor:name'")))?;
            let frame = scope
                .frames
                .iter()
                .rev()
                .find(|f| f.anchor.as_deref() == Some(anchor))
                .ok_or_else(|| self.error(format!("no enclosing statement is named '{anchor}'")))?;
            return frame
                .vars
                .get(var)
                .cloned()
                .ok_or_else(|| self.error(format!("unknown variable '{var}' in '{anchor}'")));
        }

        if let Some((module, key)) = name.split_once(':') {
            let module = InputModule::from_name(module)
                .ok_or_else(|| self.error(format!("unknown input module '{module}'")))?;
            return Ok(module.value(key, scope).unwrap_or_default());
        }

        let mut var = name;
        let mut levels = 0;
        while let Some(rest) = var.strip_prefix("../") {
            levels += 1;
            var = rest;
        }
        let frame = scope
            .frames
            .len()
            .checked_sub(levels + 1)
            .and_then(|idx| scope.frames.get(idx))
            .ok_or_else(|| {
                self.error(format!(
                    "'{name}' goes {levels} level(s) up but only {} frame(s) are in scope",
                    scope.frames.len()
                ))
            })?;
        frame
            .vars
            .get(var)
            .cloned()
            .ok_or_else(|| self.error(format!("unknown variable '{var}'")))
    }

    fn error(&self, message: String) -> SitemapError {
        SitemapError::VariableResolution {
            expression: self.expression.clone(),
            message,
        }
    }
}

fn parse_sequence(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    expression: &str,
    depth: usize,
) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut text = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('{') | Some('}') | Some('\\') => {
                    if let Some(escaped) = chars.next() {
                        text.push(escaped);
                    }
                }
                _ => text.push('\\'),
            },
            '{' => {
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                let inner = parse_sequence(chars, expression, depth + 1)?;
                if inner.is_empty() {
                    return Err(syntax_error(expression, "empty '{}' expression"));
                }
                segments.push(Segment::Expr(inner));
            }
            '}' if depth > 0 => {
                if !text.is_empty() {
                    segments.push(Segment::Text(text));
                }
                return Ok(segments);
            }
            '}' => return Err(syntax_error(expression, "unbalanced '}'")),
            other => text.push(other),
        }
    }
    if depth > 0 {
        return Err(syntax_error(expression, "unclosed '{'"));
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

/// Reject unknown input modules up front when the module name is literal.
fn check_modules(segments: &[Segment], expression: &str) -> Result<()> {
    for segment in segments {
        if let Segment::Expr(inner) = segment {
            if let [Segment::Text(name)] = inner.as_slice() {
                if let Some((module, _)) = name.split_once(':') {
                    if !name.starts_with('#') && InputModule::from_name(module).is_none() {
                        return Err(syntax_error(
                            expression,
                            &format!("unknown input module '{module}'"),
                        ));
                    }
                }
            }
            check_modules(inner, expression)?;
        }
    }
    Ok(())
}

fn syntax_error(expression: &str, message: &str) -> SitemapError {
    SitemapError::VariableResolution {
        expression: expression.to_string(),
        message: message.to_string(),
    }
}

/// Component parameters whose values may contain expressions.
#[derive(Debug, Clone, Default)]
pub struct ParameterResolvers(Vec<(String, VariableResolver)>);

impl ParameterResolvers {
    pub fn parse<'a>(params: impl IntoIterator<Item = (&'a String, &'a String)>) -> Result<Self> {
        params
            .into_iter()
            .map(|(k, v)| Ok((k.clone(), VariableResolver::parse(v)?)))
            .collect::<Result<Vec<_>>>()
            .map(ParameterResolvers)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn resolve(&self, scope: &ResolveScope<'_>) -> Result<Parameters> {
        self.0
            .iter()
            .map(|(name, resolver)| Ok((name.clone(), resolver.resolve(scope)?)))
            .collect()
    }
}
