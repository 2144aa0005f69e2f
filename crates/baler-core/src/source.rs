//! Source text abstraction for rendered assets.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

/// A piece of output text, produced by a template render.
pub trait Source: Send + Sync + fmt::Debug {
    fn source(&self) -> Cow<'_, str>;

    fn size(&self) -> usize {
        self.source().len()
    }
}

/// Shared handle to a source.
pub type BoxSource = Arc<dyn Source>;

/// Plain owned text.
#[derive(Debug, Clone)]
pub struct RawSource(String);

impl RawSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

impl Source for RawSource {
    fn source(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.0)
    }

    fn size(&self) -> usize {
        self.0.len()
    }
}

impl From<String> for RawSource {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// Wraps another source and materialises its text at most once.
///
/// Render thunks can be arbitrarily expensive; the asset pipeline wraps
/// every rendered source in one of these before storing it in the asset
/// cache so repeated reads don't re-render.
#[derive(Debug)]
pub struct CachedSource {
    inner: BoxSource,
    cached: OnceLock<String>,
}

impl CachedSource {
    pub fn new(inner: BoxSource) -> Self {
        Self {
            inner,
            cached: OnceLock::new(),
        }
    }
}

impl Source for CachedSource {
    fn source(&self) -> Cow<'_, str> {
        Cow::Borrowed(
            self.cached
                .get_or_init(|| self.inner.source().into_owned()),
        )
    }

    fn size(&self) -> usize {
        self.source().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct CountingSource {
        text: &'static str,
        renders: std::sync::atomic::AtomicUsize,
    }

    impl Source for CountingSource {
        fn source(&self) -> Cow<'_, str> {
            self.renders
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Cow::Borrowed(self.text)
        }
    }

    #[test]
    fn test_raw_source_roundtrip() {
        let source = RawSource::new("module.exports = 1;");
        assert_eq!(source.source(), "module.exports = 1;");
        assert_eq!(source.size(), 19);
    }

    #[test]
    fn test_cached_source_renders_once() {
        let inner = Arc::new(CountingSource {
            text: "content",
            renders: std::sync::atomic::AtomicUsize::new(0),
        });
        let cached = CachedSource::new(inner.clone() as BoxSource);
        assert_eq!(cached.source(), "content");
        assert_eq!(cached.source(), "content");
        assert_eq!(cached.size(), 7);
        assert_eq!(inner.renders.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
