//! Rendering templates and filename interpolation.
//!
//! Templates are injected collaborators: the main template renders chunks
//! that carry the runtime, the chunk template renders on-demand chunks,
//! and per-language module templates render individual modules. Each
//! exposes a render manifest describing the files to produce and an
//! `asset_path` waterfall that plugins can tap to rewrite output paths.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use baler_hooks::SyncWaterfallHook;
use rustc_hash::FxHashMap;

use crate::Result;
use crate::chunk::Chunk;
use crate::config::OutputOptions;
use crate::dependency::{Dependency, DependencyCategory};
use crate::hashing::CompilationHasher;
use crate::module::Module;
use crate::module_graph::ModuleGraph;
use crate::source::BoxSource;

/// Values available to filename templates and the `asset_path` waterfall.
#[derive(Debug, Clone, Default)]
pub struct PathData {
    pub chunk_name: Option<String>,
    pub chunk_id: Option<u32>,
    pub chunk_hash: Option<String>,
    /// The truncated compilation hash.
    pub hash: Option<String>,
    /// Pre-computed filename for module assets.
    pub filename: Option<String>,
}

/// Plugin surface shared by the main and chunk templates.
#[derive(Debug, Default)]
pub struct TemplateHooks {
    /// Waterfall over the output path; seeded with the filename template.
    pub asset_path: SyncWaterfallHook<String, PathData>,
}

/// Interpolate `[name]`, `[id]`, `[hash]` and `[chunkhash]` tokens, with
/// optional `:N` length suffixes (`[chunkhash:8]`).
///
/// `[name]` falls back to the chunk id when the chunk is unnamed.
pub fn render_path(template: &str, data: &PathData) -> String {
    let id = data.chunk_id.map(|id| id.to_string());
    let name = data
        .chunk_name
        .clone()
        .or_else(|| id.clone())
        .unwrap_or_default();
    let mut out = replace_token(template, "name", &name);
    out = replace_token(&out, "id", id.as_deref().unwrap_or(""));
    out = replace_token(&out, "chunkhash", data.chunk_hash.as_deref().unwrap_or(""));
    replace_token(&out, "hash", data.hash.as_deref().unwrap_or(""))
}

fn replace_token(input: &str, token: &str, value: &str) -> String {
    let open = format!("[{token}");
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(position) = rest.find(&open) {
        out.push_str(&rest[..position]);
        let after = &rest[position + open.len()..];
        if let Some(remaining) = after.strip_prefix(']') {
            out.push_str(value);
            rest = remaining;
        } else if let Some((length, remaining)) = parse_length_suffix(after) {
            out.push_str(&value[..length.min(value.len())]);
            rest = remaining;
        } else {
            // Not a well-formed token; emit the opening literally.
            out.push_str(&open);
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

fn parse_length_suffix(after: &str) -> Option<(usize, &str)> {
    let after_colon = after.strip_prefix(':')?;
    let close = after_colon.find(']')?;
    let length = after_colon[..close].parse::<usize>().ok()?;
    Some((length, &after_colon[close + 1..]))
}

/// One file a template wants emitted for a chunk.
pub struct RenderManifestEntry {
    /// Cache key for the rendered source.
    pub identifier: String,
    /// Content hash; a cache entry is valid while this matches.
    pub hash: String,
    pub filename_template: String,
    pub path_options: PathData,
    /// Deferred render; only invoked on cache miss.
    pub render: Box<dyn FnOnce() -> Result<BoxSource> + Send>,
}

impl fmt::Debug for RenderManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderManifestEntry")
            .field("identifier", &self.identifier)
            .field("hash", &self.hash)
            .field("filename_template", &self.filename_template)
            .finish_non_exhaustive()
    }
}

/// Read access a template gets while producing its manifest.
pub struct RenderManifestContext<'a> {
    pub chunk: &'a Chunk,
    pub module_graph: &'a ModuleGraph,
    pub module_templates: &'a BTreeMap<String, Arc<dyn ModuleTemplate>>,
    pub dependency_templates: &'a FxHashMap<DependencyCategory, Arc<dyn DependencyTemplate>>,
    pub output_options: &'a OutputOptions,
    pub hash: Option<&'a str>,
    pub full_hash: Option<&'a str>,
}

/// Renders chunks that carry the bootstrap runtime.
pub trait MainTemplate: Send + Sync {
    fn update_hash(&self, hasher: &mut CompilationHasher);

    fn update_hash_for_chunk(&self, hasher: &mut CompilationHasher, chunk: &Chunk);

    fn get_render_manifest(
        &self,
        context: &RenderManifestContext<'_>,
    ) -> Result<Vec<RenderManifestEntry>>;

    fn hooks(&self) -> &TemplateHooks;
}

/// Renders on-demand chunks.
pub trait ChunkTemplate: Send + Sync {
    fn update_hash(&self, hasher: &mut CompilationHasher);

    fn update_hash_for_chunk(&self, hasher: &mut CompilationHasher, chunk: &Chunk);

    fn get_render_manifest(
        &self,
        context: &RenderManifestContext<'_>,
    ) -> Result<Vec<RenderManifestEntry>>;

    fn hooks(&self) -> &TemplateHooks;
}

/// Renders a single module into a chunk.
pub trait ModuleTemplate: Send + Sync {
    fn update_hash(&self, hasher: &mut CompilationHasher);

    fn render(&self, module: &dyn Module, context: &RenderManifestContext<'_>)
    -> Result<BoxSource>;
}

/// Rewrites rendered module text for one dependency kind.
pub trait DependencyTemplate: Send + Sync {
    fn apply(&self, dependency: &dyn Dependency, source: String) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> PathData {
        PathData {
            chunk_name: Some("main".to_string()),
            chunk_id: Some(0),
            chunk_hash: Some("deadbeefcafe".to_string()),
            hash: Some("0123456789abcdef".to_string()),
            filename: None,
        }
    }

    #[test]
    fn test_render_path_basic_tokens() {
        assert_eq!(render_path("[name].js", &data()), "main.js");
        assert_eq!(render_path("[id].[chunkhash].js", &data()), "0.deadbeefcafe.js");
    }

    #[test]
    fn test_render_path_length_suffix() {
        assert_eq!(render_path("[name].[chunkhash:8].js", &data()), "main.deadbeef.js");
        assert_eq!(render_path("[hash:4].js", &data()), "0123.js");
    }

    #[test]
    fn test_render_path_name_falls_back_to_id() {
        let mut data = data();
        data.chunk_name = None;
        assert_eq!(render_path("[name].js", &data), "0.js");
    }

    #[test]
    fn test_render_path_leaves_malformed_tokens() {
        assert_eq!(render_path("[name.js", &data()), "[name.js");
        assert_eq!(render_path("[hash:x].js", &data()), "[hash:x].js");
    }

    #[test]
    fn test_asset_path_waterfall() {
        let mut hooks = TemplateHooks::default();
        hooks
            .asset_path
            .tap("prefix", |path, _data| format!("assets/{path}"));
        let result = hooks.asset_path.call("main.js".to_string(), &data());
        assert_eq!(result, "assets/main.js");
    }
}
