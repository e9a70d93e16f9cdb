use std::collections::HashMap;

use async_trait::async_trait;

use cocoon_types::{Environment, Parameters, Result};

use crate::component::{Action, MatchResult};

/// Exposes every request parameter as a variable, plus `requestURI`,
/// `requestQuery` and `context`. Always fires.
pub struct RequestParamsAction;

#[async_trait]
impl Action for RequestParamsAction {
    async fn act(
        &self,
        env: &mut Environment,
        _source: Option<&str>,
        _params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        let request = env.request();
        let mut result: HashMap<String, String> = request.parameters.clone().into_iter().collect();
        let query = request
            .parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        result.insert("requestURI".into(), env.full_uri());
        result.insert("requestQuery".into(), query);
        result.insert("context".into(), env.context().to_string());
        Ok(Some(result))
    }
}

/// Stores every sitemap parameter as a request attribute and returns them as
/// variables.
pub struct SetAttributeAction;

#[async_trait]
impl Action for SetAttributeAction {
    async fn act(
        &self,
        env: &mut Environment,
        _source: Option<&str>,
        params: &Parameters,
    ) -> Result<Option<MatchResult>> {
        let mut result = HashMap::new();
        for (name, value) in params.iter() {
            env.request_mut()
                .set_attribute(name, serde_json::Value::String(value.to_string()));
            result.insert(name.to_string(), value.to_string());
        }
        tracing::debug!(count = result.len(), "Set request attributes");
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_params_action_exposes_query() {
        let mut env = Environment::new("search?q=rust&page=2");
        let result = RequestParamsAction
            .act(&mut env, None, &Parameters::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["q"], "rust");
        assert_eq!(result["requestURI"], "search");
        assert_eq!(result["requestQuery"], "page=2&q=rust");
    }

    #[tokio::test]
    async fn set_attribute_action_writes_request_attributes() {
        let mut env = Environment::new("x");
        let params: Parameters = [("skin", "dark")].into_iter().collect();
        let result = SetAttributeAction
            .act(&mut env, None, &params)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["skin"], "dark");
        assert_eq!(
            env.request().attribute("skin"),
            Some(&serde_json::Value::String("dark".into()))
        );
    }
}
