//! Component selection: look up a component by type name, hand it out, and
//! take it back.
//!
//! A registry entry is either stateless (one shared instance, release is a
//! no-op) or pooled (instances are checked out and must be checked in exactly
//! once). The choice is made when the component is registered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use cocoon_types::{Result, SitemapError};

/// Static facts about a registered component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// View labels every statement using this component carries.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl ComponentInfo {
    pub fn labeled(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Lookup service for one component role.
#[async_trait]
pub trait ComponentSelector<C: ?Sized + Send + Sync>: Send + Sync {
    /// Role name used in error messages, e.g. `"matcher"`.
    fn role(&self) -> &str;

    fn has(&self, hint: &str) -> bool;

    /// Check out an instance. May wait while a pool is exhausted.
    async fn select(&self, hint: &str) -> Result<Arc<C>>;

    /// Check an instance back in.
    fn release(&self, hint: &str, component: Arc<C>);

    /// Stateless components are selected once and cached by the node tree.
    fn is_stateless(&self, hint: &str) -> bool;

    fn info(&self, hint: &str) -> Option<ComponentInfo>;

    fn default_hint(&self) -> Option<&str>;

    fn hints(&self) -> Vec<String>;
}

type Factory<C> = Box<dyn Fn() -> Arc<C> + Send + Sync>;

struct Pool<C: ?Sized> {
    factory: Factory<C>,
    idle: Mutex<Vec<Arc<C>>>,
    permits: Semaphore,
}

enum Entry<C: ?Sized> {
    Stateless(Arc<C>),
    Pooled(Pool<C>),
}

/// In-process [`ComponentSelector`] backed by a map of type names.
pub struct ComponentRegistry<C: ?Sized> {
    role: String,
    entries: HashMap<String, Entry<C>>,
    info: HashMap<String, ComponentInfo>,
    default_hint: Option<String>,
}

impl<C: ?Sized + Send + Sync> ComponentRegistry<C> {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            entries: HashMap::new(),
            info: HashMap::new(),
            default_hint: None,
        }
    }

    /// Register a shared, thread-safe instance.
    pub fn register_stateless(
        &mut self,
        hint: impl Into<String>,
        component: Arc<C>,
        info: ComponentInfo,
    ) -> &mut Self {
        let hint = hint.into();
        self.info.insert(hint.clone(), info);
        self.entries.insert(hint, Entry::Stateless(component));
        self
    }

    /// Register a pooled component: at most `max` instances are checked out at
    /// the same time, new instances come from `factory`.
    pub fn register_pooled(
        &mut self,
        hint: impl Into<String>,
        max: usize,
        factory: impl Fn() -> Arc<C> + Send + Sync + 'static,
        info: ComponentInfo,
    ) -> &mut Self {
        let hint = hint.into();
        self.info.insert(hint.clone(), info);
        self.entries.insert(
            hint,
            Entry::Pooled(Pool {
                factory: Box::new(factory),
                idle: Mutex::new(Vec::new()),
                permits: Semaphore::new(max.max(1)),
            }),
        );
        self
    }

    /// Type used by statements that do not name one.
    pub fn set_default(&mut self, hint: impl Into<String>) -> &mut Self {
        self.default_hint = Some(hint.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pooled instances currently idle for `hint`.
    pub fn idle_count(&self, hint: &str) -> usize {
        match self.entries.get(hint) {
            Some(Entry::Pooled(pool)) => pool.idle.lock().map(|v| v.len()).unwrap_or(0),
            _ => 0,
        }
    }
}

#[async_trait]
impl<C: ?Sized + Send + Sync + 'static> ComponentSelector<C> for ComponentRegistry<C> {
    fn role(&self) -> &str {
        &self.role
    }

    fn has(&self, hint: &str) -> bool {
        self.entries.contains_key(hint)
    }

    async fn select(&self, hint: &str) -> Result<Arc<C>> {
        match self.entries.get(hint) {
            None => Err(SitemapError::component(
                &self.role,
                hint,
                "no component registered under this type",
            )),
            Some(Entry::Stateless(component)) => Ok(Arc::clone(component)),
            Some(Entry::Pooled(pool)) => {
                let permit = pool
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| SitemapError::component(&self.role, hint, e.to_string()))?;
                // Returned by release().
                permit.forget();
                let idle = pool
                    .idle
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .pop();
                tracing::trace!(role = %self.role, hint, "Checked out pooled component");
                Ok(idle.unwrap_or_else(|| (pool.factory)()))
            }
        }
    }

    fn release(&self, hint: &str, component: Arc<C>) {
        if let Some(Entry::Pooled(pool)) = self.entries.get(hint) {
            pool.idle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(component);
            pool.permits.add_permits(1);
            tracing::trace!(role = %self.role, hint, "Released pooled component");
        }
    }

    fn is_stateless(&self, hint: &str) -> bool {
        matches!(self.entries.get(hint), Some(Entry::Stateless(_)))
    }

    fn info(&self, hint: &str) -> Option<ComponentInfo> {
        self.info.get(hint).cloned()
    }

    fn default_hint(&self) -> Option<&str> {
        self.default_hint.as_deref()
    }

    fn hints(&self) -> Vec<String> {
        let mut hints: Vec<String> = self.entries.keys().cloned().collect();
        hints.sort();
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Named: Send + Sync {
        fn name(&self) -> String;
    }

    struct Fixed(&'static str);

    impl Named for Fixed {
        fn name(&self) -> String {
            self.0.to_string()
        }
    }

    #[tokio::test]
    async fn stateless_returns_same_instance() {
        let mut reg: ComponentRegistry<dyn Named> = ComponentRegistry::new("thing");
        reg.register_stateless("a", Arc::new(Fixed("a")), ComponentInfo::default());
        let first = reg.select("a").await.unwrap();
        let second = reg.select("a").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(reg.is_stateless("a"));
    }

    #[tokio::test]
    async fn unknown_hint_is_component_failure() {
        let reg: ComponentRegistry<dyn Named> = ComponentRegistry::new("thing");
        let err = reg.select("nope").await.err().unwrap();
        assert!(matches!(err, SitemapError::ComponentFailure { .. }));
        assert!(err.to_string().contains("thing 'nope'"));
    }

    #[tokio::test]
    async fn pooled_instances_are_reused_after_release() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let mut reg: ComponentRegistry<dyn Named> = ComponentRegistry::new("thing");
        reg.register_pooled(
            "p",
            2,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(Fixed("p"))
            },
            ComponentInfo::default(),
        );
        assert!(!reg.is_stateless("p"));

        let one = reg.select("p").await.unwrap();
        reg.release("p", one);
        assert_eq!(reg.idle_count("p"), 1);
        let again = reg.select("p").await.unwrap();
        assert_eq!(again.name(), "p");
        assert_eq!(created.load(Ordering::SeqCst), 1);
        reg.release("p", again);
    }

    #[tokio::test]
    async fn exhausted_pool_waits_for_release() {
        let mut reg: ComponentRegistry<dyn Named> = ComponentRegistry::new("thing");
        reg.register_pooled("p", 1, || Arc::new(Fixed("p")), ComponentInfo::default());
        let reg = Arc::new(reg);

        let held = reg.select("p").await.unwrap();
        let waiter = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.select("p").await.map(|c| c.name()) })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        reg.release("p", held);
        assert_eq!(waiter.await.unwrap().unwrap(), "p");
    }

    #[test]
    fn info_and_default() {
        let mut reg: ComponentRegistry<dyn Named> = ComponentRegistry::new("thing");
        reg.register_stateless(
            "a",
            Arc::new(Fixed("a")),
            ComponentInfo::labeled(&["content"]).with_mime_type("text/xml"),
        )
        .set_default("a");
        assert_eq!(reg.default_hint(), Some("a"));
        let info = reg.info("a").unwrap();
        assert_eq!(info.labels, vec!["content".to_string()]);
        assert_eq!(info.mime_type.as_deref(), Some("text/xml"));
        assert_eq!(reg.hints(), vec!["a".to_string()]);
    }
}
