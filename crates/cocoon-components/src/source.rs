//! Source resolution: turn a (possibly relative) URI into bytes plus a
//! validity token that changes whenever the content does.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use async_trait::async_trait;

use cocoon_types::{Result, SitemapError};

/// Token compared across requests to detect changed sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceValidity {
    Modified(SystemTime),
    Version(u64),
}

#[derive(Debug, Clone)]
pub struct Source {
    /// Absolute URI after resolution against the base.
    pub uri: String,
    pub content: Vec<u8>,
    pub validity: Option<SourceValidity>,
}

impl Source {
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.content)
            .map_err(|e| SitemapError::processing(format!("{} is not UTF-8: {e}", self.uri)))
    }
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, uri: &str, base: &str) -> Result<Source>;

    /// Current validity of `uri` without reading its content.
    async fn validity(&self, uri: &str, base: &str) -> Result<Option<SourceValidity>>;
}

/// Resolve `uri` against `base`. Absolute paths and URIs with a scheme are
/// returned as-is (minus a `file://` scheme); relative ones are joined to the
/// directory of `base`. A base ending in `/` is a directory.
pub fn resolve_uri(uri: &str, base: &str) -> String {
    let uri = uri.strip_prefix("file://").unwrap_or(uri);
    if uri.starts_with('/') || uri.contains("://") || base.is_empty() {
        return normalize(uri);
    }
    let base = base.strip_prefix("file://").unwrap_or(base);
    let dir = if base.ends_with('/') {
        base.to_string()
    } else {
        match base.rfind('/') {
            Some(idx) => base[..=idx].to_string(),
            None => String::new(),
        }
    };
    normalize(&format!("{dir}{uri}"))
}

fn normalize(path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "." => {}
            ".." => {
                if matches!(parts.last(), Some(p) if !p.is_empty()) {
                    parts.pop();
                }
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Reads sources from the local filesystem with `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct FileSourceResolver {
    root: Option<PathBuf>,
}

impl FileSourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative URIs with an empty base against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, uri: &str, base: &str) -> PathBuf {
        let resolved = resolve_uri(uri, base);
        match &self.root {
            Some(root) if !Path::new(&resolved).is_absolute() => root.join(resolved),
            _ => PathBuf::from(resolved),
        }
    }
}

fn not_found_or_io(err: std::io::Error, path: &Path) -> SitemapError {
    if err.kind() == std::io::ErrorKind::NotFound {
        SitemapError::not_found(path.display().to_string())
    } else {
        err.into()
    }
}

#[async_trait]
impl SourceResolver for FileSourceResolver {
    async fn resolve(&self, uri: &str, base: &str) -> Result<Source> {
        let path = self.path_for(uri, base);
        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, &path))?;
        let validity = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(SourceValidity::Modified);
        tracing::debug!(path = %path.display(), bytes = content.len(), "Resolved file source");
        Ok(Source {
            uri: path.display().to_string(),
            content,
            validity,
        })
    }

    async fn validity(&self, uri: &str, base: &str) -> Result<Option<SourceValidity>> {
        let path = self.path_for(uri, base);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, &path))?;
        Ok(meta.modified().ok().map(SourceValidity::Modified))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Sources held in memory, keyed by resolved URI. Each `insert` bumps the
/// version so reload detection works without touching the filesystem.
#[derive(Debug, Default)]
pub struct MemorySourceResolver {
    sources: RwLock<HashMap<String, (Vec<u8>, u64)>>,
}

impl MemorySourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, uri: &str, content: impl Into<Vec<u8>>) -> Self {
        self.insert(uri, content);
        self
    }

    pub fn insert(&self, uri: &str, content: impl Into<Vec<u8>>) {
        let mut sources = self
            .sources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = normalize(uri);
        let version = sources.get(&key).map(|(_, v)| v + 1).unwrap_or(1);
        sources.insert(key, (content.into(), version));
    }
}

#[async_trait]
impl SourceResolver for MemorySourceResolver {
    async fn resolve(&self, uri: &str, base: &str) -> Result<Source> {
        let key = resolve_uri(uri, base);
        let sources = self
            .sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match sources.get(&key) {
            Some((content, version)) => Ok(Source {
                uri: key.clone(),
                content: content.clone(),
                validity: Some(SourceValidity::Version(*version)),
            }),
            None => Err(SitemapError::not_found(key)),
        }
    }

    async fn validity(&self, uri: &str, base: &str) -> Result<Option<SourceValidity>> {
        let key = resolve_uri(uri, base);
        let sources = self
            .sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sources
            .get(&key)
            .map(|(_, version)| Some(SourceValidity::Version(*version)))
            .ok_or_else(|| SitemapError::not_found(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_relative_against_file_base() {
        assert_eq!(resolve_uri("page.xml", "site/sitemap.json"), "site/page.xml");
        assert_eq!(resolve_uri("../common/a.xml", "site/docs/"), "site/common/a.xml");
        assert_eq!(resolve_uri("/abs/a.xml", "site/"), "/abs/a.xml");
        assert_eq!(resolve_uri("file:///abs/a.xml", "site/"), "/abs/a.xml");
        assert_eq!(resolve_uri("./a.xml", ""), "a.xml");
    }

    #[tokio::test]
    async fn memory_resolver_bumps_version() {
        let res = MemorySourceResolver::new().with("site/a.xml", "<a/>");
        let first = res.validity("a.xml", "site/").await.unwrap();
        res.insert("site/a.xml", "<b/>");
        let second = res.validity("a.xml", "site/").await.unwrap();
        assert_ne!(first, second);
        let src = res.resolve("a.xml", "site/").await.unwrap();
        assert_eq!(src.text().unwrap(), "<b/>");
    }

    #[tokio::test]
    async fn memory_resolver_missing_is_not_found() {
        let res = MemorySourceResolver::new();
        let err = res.resolve("nope.xml", "").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn file_resolver_reads_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("doc.xml"), "<doc/>").await.unwrap();
        let base = format!("{}/", dir.path().display());
        let res = FileSourceResolver::new();
        let src = res.resolve("doc.xml", &base).await.unwrap();
        assert_eq!(src.content, b"<doc/>");
        assert!(matches!(src.validity, Some(SourceValidity::Modified(_))));

        let err = res.resolve("missing.xml", &base).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
