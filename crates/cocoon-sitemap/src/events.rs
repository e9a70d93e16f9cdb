//! Sitemap lifecycle events.
//!
//! A [`TreeProcessor`](crate::TreeProcessor) publishes [`SitemapEvent`]s on a
//! [`tokio::sync::broadcast`] channel. Mounted sub-sitemaps share their
//! parent's channel, so one subscription sees the whole tree.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SitemapEvent {
    RequestStarted {
        request_id: String,
        uri: String,
    },
    RequestCompleted {
        request_id: String,
        uri: String,
        handled: bool,
        status: u16,
        duration_ms: u64,
    },
    RequestFailed {
        request_id: String,
        uri: String,
        error: String,
    },
    PipelineMatched {
        request_id: String,
        location: String,
    },
    ErrorHandled {
        request_id: String,
        location: String,
        kind: String,
    },
    SitemapLoaded {
        source: String,
        node_count: usize,
    },
    SitemapReloaded {
        source: String,
    },
    SitemapDisposed {
        source: String,
    },
    MountCreated {
        source: String,
        uri_prefix: String,
    },
}

#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<SitemapEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers. Dropped when nobody listens.
    pub fn emit(&self, event: SitemapEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SitemapEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let emitter = EventEmitter::new(8);
        let mut rx = emitter.subscribe();

        emitter.emit(SitemapEvent::MountCreated {
            source: "docs/sitemap.json".into(),
            uri_prefix: "docs/".into(),
        });

        match rx.recv().await.unwrap() {
            SitemapEvent::MountCreated { source, uri_prefix } => {
                assert_eq!(source, "docs/sitemap.json");
                assert_eq!(uri_prefix, "docs/");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let emitter = EventEmitter::default();
        emitter.emit(SitemapEvent::SitemapDisposed {
            source: "sitemap.json".into(),
        });
    }

    #[test]
    fn events_serialize() {
        let event = SitemapEvent::RequestCompleted {
            request_id: "r1".into(),
            uri: "index.html".into(),
            handled: true,
            status: 200,
            duration_ms: 4,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("RequestCompleted"));
        assert!(json.contains("index.html"));
    }
}
