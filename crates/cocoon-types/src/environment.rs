//! Request-scoped environment handed to every node and component.
//!
//! The hosting dispatcher creates one [`Environment`] per incoming request. Mount
//! points change the URI/prefix/context for the duration of a sub-sitemap call
//! and put them back with [`Environment::restore_context`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::notification::Notification;
use crate::{Result, SitemapError};

/// Request parameter naming the view to render instead of the normal output.
pub const VIEW_PARAM: &str = "cocoon-view";

/// Request parameter selecting which actions of an action set fire.
pub const ACTION_PARAM: &str = "cocoon-action";

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub parameters: BTreeMap<String, String>,
    /// Header names are stored lower-cased.
    pub headers: BTreeMap<String, String>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: "GET".into(),
            parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
            attributes: HashMap::new(),
        }
    }
}

impl Request {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<serde_json::Value> {
        self.attributes.remove(name)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            content_type: None,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }
}

impl Response {
    /// Drop any partial output, headers and status so an error page can be
    /// rendered from scratch.
    pub fn reset(&mut self) {
        *self = Response::default();
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Body decoded as UTF-8, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ---------------------------------------------------------------------------
// ObjectModel
// ---------------------------------------------------------------------------

/// Handles available to components: request, response, session, and the
/// special flags that make the pipeline insert synthetic link transformers.
#[derive(Debug, Clone, Default)]
pub struct ObjectModel {
    pub request: Request,
    pub response: Response,
    pub session: HashMap<String, serde_json::Value>,
    /// Set by the first error handler that sees an error.
    pub notification: Option<Notification>,
    /// Display form of the raw error the notification was built from.
    pub throwable: Option<String>,
    /// When present, links in the output are rewritten through this map.
    pub link_translation: Option<HashMap<String, String>>,
    /// When present, links found in the output are appended here.
    pub link_collection: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Location, view, request parameters and redirect flags saved around a
/// mount or forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedContext {
    uri: String,
    prefix: String,
    context: String,
    view: Option<String>,
    action: Option<String>,
    parameters: BTreeMap<String, String>,
    pass_through: bool,
    internal_redirect: bool,
}

/// Request-scoped accessor object consumed by the tree processor.
#[derive(Debug, Clone)]
pub struct Environment {
    uri: String,
    prefix: String,
    context: String,
    view: Option<String>,
    action: Option<String>,
    external: bool,
    internal_redirect: bool,
    pass_through: bool,
    redirect: Option<String>,
    pub object_model: ObjectModel,
}

impl Environment {
    /// Create an external request for `uri`. A leading `/` is dropped and a
    /// query string is split into request parameters.
    pub fn new(uri: &str) -> Self {
        let mut env = Self {
            uri: String::new(),
            prefix: String::new(),
            context: String::new(),
            view: None,
            action: None,
            external: true,
            internal_redirect: false,
            pass_through: false,
            redirect: None,
            object_model: ObjectModel::default(),
        };
        let (path, query) = split_query(uri);
        env.uri = path.trim_start_matches('/').to_string();
        for (k, v) in query {
            env = env.with_parameter(k, v);
        }
        env
    }

    /// Create a sub-request for `uri` that shares the parent's request
    /// parameters, headers and attributes. Sub-requests are internal.
    pub fn sub_request(parent: &Environment, uri: &str) -> Self {
        let mut env = Environment::new(uri);
        let mut request = parent.object_model.request.clone();
        request
            .parameters
            .extend(std::mem::take(&mut env.object_model.request.parameters));
        env.object_model.request = request;
        env.object_model.session = parent.object_model.session.clone();
        env.context = parent.context.clone();
        // View and action come from the sub-request URI only.
        env.external = false;
        env
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(name, value);
        self
    }

    /// Set a request parameter. `cocoon-view` and `cocoon-action` also
    /// select the view and action.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if name == VIEW_PARAM {
            self.view = Some(value.clone());
        } else if name == ACTION_PARAM {
            self.action = Some(value.clone());
        }
        self.object_model.request.parameters.insert(name, value);
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.object_model
            .request
            .headers
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.object_model.request.method = method.into();
        self
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// URI relative to the current sitemap.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Part of the request URI consumed by enclosing mounts.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full request URI, prefix included.
    pub fn full_uri(&self) -> String {
        format!("{}{}", self.prefix, self.uri)
    }

    /// Base URI of the current sitemap, used to resolve relative sources.
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn view(&self) -> Option<&str> {
        self.view.as_deref()
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    /// True for sub-requests and internal (`cocoon:`) redirects.
    pub fn is_internal_request(&self) -> bool {
        !self.external || self.internal_redirect
    }

    pub fn set_internal_redirect(&mut self, internal: bool) {
        self.internal_redirect = internal;
    }

    pub fn is_pass_through(&self) -> bool {
        self.pass_through
    }

    pub fn set_pass_through(&mut self, pass_through: bool) {
        self.pass_through = pass_through;
    }

    pub fn request(&self) -> &Request {
        &self.object_model.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.object_model.request
    }

    pub fn response(&self) -> &Response {
        &self.object_model.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.object_model.response
    }

    /// Snapshot the parts a mount point or forward changes.
    pub fn save_context(&self) -> SavedContext {
        SavedContext {
            uri: self.uri.clone(),
            prefix: self.prefix.clone(),
            context: self.context.clone(),
            view: self.view.clone(),
            action: self.action.clone(),
            parameters: self.object_model.request.parameters.clone(),
            pass_through: self.pass_through,
            internal_redirect: self.internal_redirect,
        }
    }

    /// Move `uri_prefix` from the URI to the prefix and switch the sitemap
    /// context. Fails when the current URI does not start with the prefix.
    pub fn change_context(&mut self, uri_prefix: &str, context: &str) -> Result<()> {
        if !uri_prefix.is_empty() {
            if let Some(rest) = self.uri.strip_prefix(uri_prefix) {
                self.uri = rest.to_string();
            } else if uri_prefix.ends_with('/') && self.uri == uri_prefix.trim_end_matches('/') {
                self.uri.clear();
            } else {
                return Err(SitemapError::processing(format!(
                    "The current URI ({}) doesn't start with given prefix ({})",
                    self.uri, uri_prefix
                )));
            }
            self.prefix.push_str(uri_prefix);
        }
        self.context = context.to_string();
        tracing::debug!(uri = %self.uri, prefix = %self.prefix, context = %self.context, "Changed environment context");
        Ok(())
    }

    /// Replace the URI relative to the current sitemap (internal forwards).
    pub fn set_uri(&mut self, prefix: &str, uri: &str) {
        self.prefix = prefix.to_string();
        self.uri = uri.trim_start_matches('/').to_string();
    }

    pub fn restore_context(&mut self, saved: SavedContext) {
        self.uri = saved.uri;
        self.prefix = saved.prefix;
        self.context = saved.context;
        self.view = saved.view;
        self.action = saved.action;
        self.object_model.request.parameters = saved.parameters;
        self.pass_through = saved.pass_through;
        self.internal_redirect = saved.internal_redirect;
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    /// Issue an external redirect.
    pub fn redirect(&mut self, location: &str, permanent: bool) {
        let response = &mut self.object_model.response;
        response.status = if permanent { 301 } else { 302 };
        response.set_header("Location", location);
        self.redirect = Some(location.to_string());
    }

    pub fn redirect_location(&self) -> Option<&str> {
        self.redirect.as_deref()
    }
}

fn split_query(uri: &str) -> (&str, Vec<(String, String)>) {
    match uri.split_once('?') {
        None => (uri, Vec::new()),
        Some((path, query)) => {
            let pairs = query
                .split('&')
                .filter(|p| !p.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (pair.to_string(), String::new()),
                })
                .collect();
            (path, pairs)
        }
    }
}
