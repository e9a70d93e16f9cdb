//! Hooks for flow-control interpreters.
//!
//! `call: {function: ...}` and `call: {continuation: ...}` hand control to a
//! [`FlowInterpreter`] registered under the sitemap's flow language. The
//! interpreter answers the request by redirecting through the
//! [`Redirector`] it is given, usually to an internal `cocoon:` pipeline.

use async_trait::async_trait;

use cocoon_types::{Environment, Result};

#[async_trait]
pub trait FlowInterpreter: Send + Sync {
    async fn call_function(
        &self,
        name: &str,
        args: &[(String, String)],
        redirector: &mut dyn Redirector,
    ) -> Result<()>;

    async fn handle_continuation(
        &self,
        id: &str,
        args: &[(String, String)],
        redirector: &mut dyn Redirector,
    ) -> Result<()>;
}

/// Lets flow code send the response for the current request.
#[async_trait]
pub trait Redirector: Send {
    /// Redirect to `uri`. `cocoon:/` and `cocoon://` URIs are processed
    /// internally; anything else becomes an HTTP redirect.
    async fn redirect(&mut self, uri: &str, permanent: bool) -> Result<()>;

    fn has_redirected(&self) -> bool;

    fn environment(&self) -> &Environment;
}
