use cocoon_types::{Environment, Parameters, Result, SitemapError};

use crate::component::Selector;
use crate::condition::{evaluate_condition, parse_condition};

/// Compares the `parameter-selector-test` sitemap parameter with the test.
pub struct ParameterSelector;

impl Selector for ParameterSelector {
    fn select(&self, test: &str, _env: &Environment, params: &Parameters) -> Result<bool> {
        Ok(params.get("parameter-selector-test") == Some(test))
    }
}

/// Compares a request parameter, named by the `parameter-name` sitemap
/// parameter, with each test. The value is read once per `select` block.
pub struct RequestParameterSelector;

impl RequestParameterSelector {
    fn value(env: &Environment, params: &Parameters) -> Result<Option<String>> {
        let name = params.get("parameter-name").ok_or_else(|| {
            SitemapError::processing("request-parameter selector needs a 'parameter-name' parameter")
        })?;
        Ok(env.request().parameter(name).map(str::to_string))
    }
}

impl Selector for RequestParameterSelector {
    fn select(&self, test: &str, env: &Environment, params: &Parameters) -> Result<bool> {
        Ok(Self::value(env, params)?.as_deref() == Some(test))
    }

    fn is_switch(&self) -> bool {
        true
    }

    fn switch_context(&self, env: &Environment, params: &Parameters) -> Result<Option<String>> {
        Self::value(env, params)
    }
}

/// Evaluates the test as a condition expression over the request.
///
/// Keys: `method`, `uri`, `view`, `param.<name>`, `header.<name>`,
/// `attr.<name>`, `sitemap.<name>` (sitemap parameters).
pub struct ExpressionSelector;

impl ExpressionSelector {
    fn lookup(env: &Environment, params: &Parameters, key: &str) -> String {
        let request = env.request();
        let value = match key.split_once('.') {
            None => match key {
                "method" => Some(request.method.clone()),
                "uri" => Some(env.uri().to_string()),
                "view" => env.view().map(str::to_string),
                _ => None,
            },
            Some(("param", name)) => request.parameter(name).map(str::to_string),
            Some(("header", name)) => request.header(name).map(str::to_string),
            Some(("attr", name)) => request.attribute(name).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            Some(("sitemap", name)) => params.get(name).map(str::to_string),
            Some(_) => None,
        };
        value.unwrap_or_default()
    }
}

impl Selector for ExpressionSelector {
    fn select(&self, test: &str, env: &Environment, params: &Parameters) -> Result<bool> {
        let cond = parse_condition(test)?;
        Ok(evaluate_condition(&cond, &|key| Self::lookup(env, params, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_selector() {
        let params: Parameters = [("parameter-selector-test", "pdf")].into_iter().collect();
        let env = Environment::new("x");
        assert!(ParameterSelector.select("pdf", &env, &params).unwrap());
        assert!(!ParameterSelector.select("html", &env, &params).unwrap());
    }

    #[test]
    fn request_parameter_switch_context() {
        let params: Parameters = [("parameter-name", "format")].into_iter().collect();
        let env = Environment::new("x?format=rss");
        let ctx = RequestParameterSelector.switch_context(&env, &params).unwrap();
        assert!(RequestParameterSelector.is_switch());
        assert!(RequestParameterSelector.select_in_context("rss", ctx.as_deref()));
        assert!(!RequestParameterSelector.select_in_context("atom", ctx.as_deref()));

        let absent = Environment::new("x");
        let ctx = RequestParameterSelector.switch_context(&absent, &params).unwrap();
        assert!(!RequestParameterSelector.select_in_context("rss", ctx.as_deref()));
        assert!(RequestParameterSelector.select("rss", &env, &params).unwrap());
    }

    #[test]
    fn request_parameter_requires_name() {
        let env = Environment::new("x");
        assert!(RequestParameterSelector
            .select("a", &env, &Parameters::new())
            .is_err());
    }

    #[test]
    fn expression_selector_over_request() {
        let env = Environment::new("doc?mode=print")
            .with_header("User-Agent", "lynx")
            .with_method("POST");
        let params = Parameters::new();
        assert!(ExpressionSelector
            .select("method = POST && param.mode = print", &env, &params)
            .unwrap());
        assert!(ExpressionSelector
            .select("header.user-agent = lynx", &env, &params)
            .unwrap());
        assert!(!ExpressionSelector.select("uri != doc", &env, &params).unwrap());
    }
}
