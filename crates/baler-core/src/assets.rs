//! Asset production from modules and chunks.

use std::sync::Arc;

use crate::cache::CachedAsset;
use crate::chunk::ChunkKey;
use crate::compilation::Compilation;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::source::{BoxSource, CachedSource};
use crate::template::{PathData, RenderManifestContext};

impl Compilation {
    /// Install assets declared by individual modules.
    pub fn create_module_assets(&mut self) {
        let hooks = Arc::clone(&self.hooks);
        for id in self.module_graph.module_ids().collect::<Vec<_>>() {
            let assets: Vec<(String, BoxSource)> = match self.module_graph.node(id).module() {
                Some(module) => module.module_assets().to_vec(),
                None => continue,
            };
            for (name, source) in assets {
                let data = PathData {
                    filename: Some(name.clone()),
                    hash: self.hash.clone(),
                    ..PathData::default()
                };
                let file = self.get_path(&name, &data);
                self.install_asset(file.clone(), source);
                hooks.module_asset.call_with(self, &mut (id, file));
            }
        }
    }

    /// Render every chunk through its template's manifest.
    ///
    /// Failures are scoped to the chunk: rendering continues with the
    /// next chunk and the failure lands in `errors`.
    pub fn create_chunk_assets(&mut self) {
        for key in self.chunk_graph.keys().collect::<Vec<_>>() {
            if let Err(diagnostic) = self.render_chunk(key) {
                self.errors.push(diagnostic);
            }
        }
    }

    fn render_chunk(&mut self, key: ChunkKey) -> std::result::Result<(), Diagnostic> {
        let hooks = Arc::clone(&self.hooks);
        let chunk_label = {
            let chunk = self.chunk_graph.chunk(key);
            chunk
                .name
                .clone()
                .unwrap_or_else(|| chunk.debug_id.to_string())
        };

        let manifest = {
            let chunk = self.chunk_graph.chunk(key);
            let context = RenderManifestContext {
                chunk,
                module_graph: &self.module_graph,
                module_templates: &self.module_templates,
                dependency_templates: &self.dependency_templates,
                output_options: &self.options.output,
                hash: self.hash.as_deref(),
                full_hash: self.full_hash.as_deref(),
            };
            let manifest = if chunk.has_runtime() {
                self.main_template.get_render_manifest(&context)
            } else {
                self.chunk_template.get_render_manifest(&context)
            };
            manifest.map_err(|error| {
                Diagnostic::error(
                    DiagnosticKind::ChunkRender,
                    format!("failed to build render manifest for chunk {chunk_label}: {error}"),
                )
            })?
        };

        for entry in manifest {
            let cached = self
                .cache
                .as_ref()
                .and_then(|cache| cache.asset(&entry.identifier))
                .filter(|asset| asset.hash == entry.hash)
                .map(|asset| asset.source.clone());

            let source: BoxSource = match cached {
                Some(source) => source,
                None => {
                    let rendered = (entry.render)().map_err(|error| {
                        Diagnostic::error(
                            DiagnosticKind::ChunkRender,
                            format!("failed to render chunk {chunk_label}: {error}"),
                        )
                    })?;
                    let wrapped: BoxSource = Arc::new(CachedSource::new(rendered));
                    if let Some(cache) = self.cache.as_mut() {
                        cache.store_asset(
                            entry.identifier.clone(),
                            CachedAsset {
                                hash: entry.hash.clone(),
                                source: wrapped.clone(),
                            },
                        );
                    }
                    wrapped
                }
            };

            let file = self.get_path(&entry.filename_template, &entry.path_options);
            if let Some(existing) = self.asset(&file) {
                if existing.source() != source.source() {
                    return Err(Diagnostic::error(
                        DiagnosticKind::AssetConflict,
                        format!(
                            "conflict: multiple chunks emit different content to the same \
                             filename {file}"
                        ),
                    ));
                }
            }
            self.install_asset(file.clone(), source);
            self.chunk_graph.chunk_mut(key).files.push(file.clone());
            hooks.chunk_asset.call_with(self, &mut (key, file));
        }
        Ok(())
    }
}
