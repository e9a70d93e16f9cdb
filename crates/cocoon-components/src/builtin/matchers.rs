use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use cocoon_types::{Environment, Parameters, Result, SitemapError};

use crate::component::{MatchResult, Matcher, PreparedPattern};

/// Numbered groups (`"0"` is the whole match) plus named groups.
fn captures_to_result(re: &Regex, input: &str) -> Option<MatchResult> {
    let caps = re.captures(input)?;
    let mut result = HashMap::new();
    for (i, group) in caps.iter().enumerate() {
        result.insert(
            i.to_string(),
            group.map(|m| m.as_str().to_string()).unwrap_or_default(),
        );
    }
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            result.insert(name.to_string(), m.as_str().to_string());
        }
    }
    Some(result)
}

fn downcast_regex(prepared: &PreparedPattern) -> Result<&Regex> {
    prepared
        .downcast_ref::<Regex>()
        .ok_or_else(|| SitemapError::processing("prepared pattern was not compiled by this matcher"))
}

/// The value the URI matchers test: the `value` parameter when given,
/// otherwise the sitemap-relative URI.
fn match_input<'a>(env: &'a Environment, params: &'a Parameters) -> &'a str {
    params.get("value").unwrap_or_else(|| env.uri())
}

// ---------------------------------------------------------------------------
// Wildcard
// ---------------------------------------------------------------------------

/// Matches the URI against a wildcard pattern: `*` matches within one path
/// segment, `**` across segments, `\` escapes the next character. Each
/// wildcard becomes a numbered result variable.
pub struct WildcardMatcher;

impl WildcardMatcher {
    /// Translate a wildcard pattern into an anchored regular expression.
    pub fn compile(pattern: &str) -> Result<Regex> {
        let mut re = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    re.push_str("(.*)");
                }
                '*' => re.push_str("([^/]*)"),
                '\\' => match chars.next() {
                    Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                    None => {
                        return Err(SitemapError::PatternInvalid {
                            pattern: pattern.to_string(),
                            message: "dangling escape at end of pattern".into(),
                        })
                    }
                },
                other => re.push_str(&regex::escape(&other.to_string())),
            }
        }
        re.push('$');
        Regex::new(&re).map_err(|e| SitemapError::PatternInvalid {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
    }
}

impl Matcher for WildcardMatcher {
    fn matches(
        &self,
        pattern: &str,
        env: &Environment,
        params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        let re = Self::compile(pattern)?;
        Ok(captures_to_result(&re, match_input(env, params)))
    }

    fn preparable(&self) -> bool {
        true
    }

    fn prepare(&self, pattern: &str) -> Result<PreparedPattern> {
        Ok(Arc::new(Self::compile(pattern)?))
    }

    fn matches_prepared(
        &self,
        prepared: &PreparedPattern,
        env: &Environment,
        params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        let re = downcast_regex(prepared)?;
        Ok(captures_to_result(re, match_input(env, params)))
    }
}

// ---------------------------------------------------------------------------
// Regexp
// ---------------------------------------------------------------------------

/// Matches the URI against a regular expression. The expression is not
/// anchored implicitly.
pub struct RegexpMatcher;

impl RegexpMatcher {
    fn compile(pattern: &str) -> Result<Regex> {
        Regex::new(pattern).map_err(|e| SitemapError::PatternInvalid {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
    }
}

impl Matcher for RegexpMatcher {
    fn matches(
        &self,
        pattern: &str,
        env: &Environment,
        params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        let re = Self::compile(pattern)?;
        Ok(captures_to_result(&re, match_input(env, params)))
    }

    fn preparable(&self) -> bool {
        true
    }

    fn prepare(&self, pattern: &str) -> Result<PreparedPattern> {
        Ok(Arc::new(Self::compile(pattern)?))
    }

    fn matches_prepared(
        &self,
        prepared: &PreparedPattern,
        env: &Environment,
        params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        let re = downcast_regex(prepared)?;
        Ok(captures_to_result(re, match_input(env, params)))
    }
}

// ---------------------------------------------------------------------------
// Request parameter
// ---------------------------------------------------------------------------

/// Matches when the request carries the parameter named by the pattern. The
/// value is exposed as `{1}`.
pub struct RequestParameterMatcher;

impl Matcher for RequestParameterMatcher {
    fn matches(
        &self,
        pattern: &str,
        env: &Environment,
        _params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        Ok(env
            .request()
            .parameter(pattern)
            .map(|value| HashMap::from([("1".to_string(), value.to_string())])))
    }
}
