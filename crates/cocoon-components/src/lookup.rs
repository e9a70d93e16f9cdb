use std::ops::Deref;
use std::sync::Arc;

use cocoon_types::{Result, SitemapError};

use crate::selector::ComponentSelector;

/// A component reference held by a node for the lifetime of the tree.
///
/// Stateless components are selected once when the tree is built. Pooled ones
/// are selected on every invocation through [`ComponentHandle::acquire`].
pub enum ComponentHandle<C: ?Sized + Send + Sync> {
    Singleton {
        component: Arc<C>,
        selector: Arc<dyn ComponentSelector<C>>,
        hint: String,
    },
    Pooled {
        selector: Arc<dyn ComponentSelector<C>>,
        hint: String,
    },
}

impl<C: ?Sized + Send + Sync + 'static> ComponentHandle<C> {
    /// Resolve `hint` against `selector`, caching the instance when the
    /// component is stateless.
    pub async fn resolve(selector: Arc<dyn ComponentSelector<C>>, hint: &str) -> Result<Self> {
        if !selector.has(hint) {
            return Err(SitemapError::component(
                selector.role(),
                hint,
                "no component registered under this type",
            ));
        }
        if selector.is_stateless(hint) {
            let component = selector.select(hint).await?;
            Ok(ComponentHandle::Singleton {
                component,
                selector,
                hint: hint.to_string(),
            })
        } else {
            Ok(ComponentHandle::Pooled {
                selector,
                hint: hint.to_string(),
            })
        }
    }

    pub fn hint(&self) -> &str {
        match self {
            ComponentHandle::Singleton { hint, .. } | ComponentHandle::Pooled { hint, .. } => hint,
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, ComponentHandle::Pooled { .. })
    }

    /// The cached instance, if this handle holds one.
    pub fn singleton(&self) -> Option<&Arc<C>> {
        match self {
            ComponentHandle::Singleton { component, .. } => Some(component),
            ComponentHandle::Pooled { .. } => None,
        }
    }

    /// Obtain an instance for one invocation. Pooled instances go back to their
    /// pool when the lease is dropped.
    pub async fn acquire(&self) -> Result<Lease<C>> {
        match self {
            ComponentHandle::Singleton { component, .. } => Ok(Lease {
                component: Arc::clone(component),
                release_to: None,
                hint: String::new(),
            }),
            ComponentHandle::Pooled { selector, hint } => {
                let component = selector.select(hint).await?;
                Ok(Lease {
                    component,
                    release_to: Some(Arc::clone(selector)),
                    hint: hint.clone(),
                })
            }
        }
    }

    /// Give a cached singleton back to its selector when the tree is disposed.
    pub fn dispose(&self) {
        if let ComponentHandle::Singleton {
            component,
            selector,
            hint,
        } = self
        {
            selector.release(hint, Arc::clone(component));
        }
    }
}

/// A checked-out component. Dropping it releases pooled instances exactly once,
/// on every exit path.
pub struct Lease<C: ?Sized + Send + Sync> {
    component: Arc<C>,
    release_to: Option<Arc<dyn ComponentSelector<C>>>,
    hint: String,
}

impl<C: ?Sized + Send + Sync + 'static> Lease<C> {
    /// Select `hint` for one use. The instance is handed back to `selector`
    /// when the lease drops, whether or not it is stateless.
    pub async fn checkout(selector: &Arc<dyn ComponentSelector<C>>, hint: &str) -> Result<Self> {
        let component = selector.select(hint).await?;
        Ok(Lease {
            component,
            release_to: Some(Arc::clone(selector)),
            hint: hint.to_string(),
        })
    }
}

impl<C: ?Sized + Send + Sync> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.component
    }
}

impl<C: ?Sized + Send + Sync> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(selector) = self.release_to.take() {
            selector.release(&self.hint, Arc::clone(&self.component));
        }
    }
}
