//! Optional persistent side-table shared across compilations.
//!
//! The embedder owns the cache and threads it through successive
//! compilations; within one compilation it is consulted on module
//! insertion (keyed by cache-group-prefixed identifier) and on chunk
//! rendering (keyed by manifest identifier, validated by hash).

use rustc_hash::FxHashMap;

use crate::diagnostics::Diagnostic;
use crate::module::BoxModule;
use crate::source::BoxSource;

/// A previously built module instance with its stamped findings.
#[derive(Debug)]
pub struct CachedModule {
    pub module: BoxModule,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

/// A rendered source, valid as long as the manifest hash matches.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub hash: String,
    pub source: BoxSource,
}

/// Key-value side-table for modules and rendered assets.
#[derive(Debug, Default)]
pub struct CompilationCache {
    modules: FxHashMap<String, CachedModule>,
    assets: FxHashMap<String, CachedAsset>,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a module: the cache group (default `"m"`) prefixed
    /// to the identifier.
    pub fn cache_name(cache_group: Option<&str>, identifier: &str) -> String {
        format!("{}{identifier}", cache_group.unwrap_or("m"))
    }

    /// Remove and return a cached module instance.
    pub fn take_module(&mut self, cache_name: &str) -> Option<CachedModule> {
        self.modules.remove(cache_name)
    }

    pub fn store_module(&mut self, cache_name: impl Into<String>, cached: CachedModule) {
        self.modules.insert(cache_name.into(), cached);
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn asset(&self, identifier: &str) -> Option<&CachedAsset> {
        self.assets.get(identifier)
    }

    pub fn store_asset(&mut self, identifier: impl Into<String>, asset: CachedAsset) {
        self.assets.insert(identifier.into(), asset);
    }
}
