//! The seal state machine: Building -> Finished -> Sealing -> Sealed,
//! re-enterable through `unseal`.
//!
//! `seal` orders every optimization, labelling, id, hash and asset
//! phase, firing the named hooks between them. The three-hook
//! optimization loops run to a fixed point: any tap returning `true`
//! restarts the loop. Loops are capped defensively; non-termination
//! surfaces as an error instead of a hang.

use std::sync::Arc;

use crate::chunk::{ChunkKey, Entrypoint};
use crate::compilation::{Compilation, CompilationHooks};
use crate::{Error, Result};

const FIXED_POINT_CAP: usize = 10_000;

impl Compilation {
    /// Partition, optimize, label, hash and render the built graph.
    ///
    /// If a `need_additional_seal` tap asks for it, the compilation is
    /// unsealed and sealed again; `after_seal` fires once, at the very
    /// end.
    pub async fn seal(&mut self) -> Result<()> {
        loop {
            self.seal_once().await?;
            let hooks = Arc::clone(&self.hooks);
            if hooks.need_additional_seal.call(self) == Some(true) {
                tracing::debug!("additional seal requested");
                self.unseal();
                continue;
            }
            hooks.after_seal.call(self).await?;
            return Ok(());
        }
    }

    async fn seal_once(&mut self) -> Result<()> {
        let hooks = Arc::clone(&self.hooks);
        tracing::debug!(
            modules = self.module_graph.len(),
            entries = self.entries.len(),
            "sealing compilation"
        );
        hooks.seal.call(self);

        self.run_fixed_point("optimize-dependencies", |hooks, compilation| {
            hooks.optimize_dependencies_basic.call(compilation) == Some(true)
                || hooks.optimize_dependencies.call(compilation) == Some(true)
                || hooks.optimize_dependencies_advanced.call(compilation) == Some(true)
        })?;
        hooks.after_optimize_dependencies.call(self);

        // Entry chunks, entrypoints and graph labelling.
        let prepared: Vec<(String, Option<crate::module_graph::ModuleId>)> = self
            .prepared_chunks
            .iter()
            .map(|slot| (slot.name.clone(), slot.module))
            .collect();
        for (name, module) in prepared {
            let key = self.add_chunk(Some(&name), module, None);
            {
                let chunk = self.chunk_graph.chunk_mut(key);
                chunk.initial = true;
                chunk.runtime = true;
            }
            let mut entrypoint = Entrypoint::new(name.clone());
            entrypoint.unshift_chunk(key);
            self.entrypoints.insert(name, entrypoint);
            if let Some(module) = module {
                let chunk = self.chunk_graph.chunk_mut(key);
                chunk.entry_module = Some(module);
                chunk.add_module(module);
                self.module_graph.node_mut(module).chunks.add(key);
                self.assign_index(module);
                self.assign_depth(module);
            }
        }

        let input_chunks: Vec<ChunkKey> = self.chunk_graph.keys().collect();
        self.process_dependencies_blocks_for_chunks(input_chunks);
        self.sort_modules();
        hooks.optimize.call(self);

        self.run_fixed_point("optimize-modules", |hooks, compilation| {
            hooks.optimize_modules_basic.call(compilation) == Some(true)
                || hooks.optimize_modules.call(compilation) == Some(true)
                || hooks.optimize_modules_advanced.call(compilation) == Some(true)
        })?;
        hooks.after_optimize_modules.call(self);

        self.run_fixed_point("optimize-chunks", |hooks, compilation| {
            hooks.optimize_chunks_basic.call(compilation) == Some(true)
                || hooks.optimize_chunks.call(compilation) == Some(true)
                || hooks.optimize_chunks_advanced.call(compilation) == Some(true)
        })?;
        hooks.after_optimize_chunks.call(self);

        hooks.optimize_tree.call(self).await?;
        hooks.after_optimize_tree.call(self);

        self.run_fixed_point("optimize-chunk-modules", |hooks, compilation| {
            hooks.optimize_chunk_modules_basic.call(compilation) == Some(true)
                || hooks.optimize_chunk_modules.call(compilation) == Some(true)
                || hooks.optimize_chunk_modules_advanced.call(compilation) == Some(true)
        })?;
        hooks.after_optimize_chunk_modules.call(self);

        let should_record = hooks.should_record.call(self) != Some(false);

        hooks.revive_modules.call(self);
        hooks.optimize_module_order.call(self);
        hooks.advanced_optimize_module_order.call(self);
        hooks.before_module_ids.call(self);
        hooks.module_ids.call(self);
        self.apply_module_ids();
        hooks.optimize_module_ids.call(self);
        hooks.after_optimize_module_ids.call(self);

        self.sort_items_with_module_ids();

        hooks.revive_chunks.call(self);
        hooks.optimize_chunk_order.call(self);
        hooks.before_chunk_ids.call(self);
        self.apply_chunk_ids();
        hooks.optimize_chunk_ids.call(self);
        hooks.after_optimize_chunk_ids.call(self);

        self.sort_items_with_chunk_ids();

        if should_record {
            hooks.record_modules.call(self);
            hooks.record_chunks.call(self);
        }

        hooks.before_hash.call(self);
        self.create_hash()?;
        hooks.after_hash.call(self);
        if should_record {
            hooks.record_hash.call(self);
        }

        hooks.before_module_assets.call(self);
        self.create_module_assets();
        if hooks.should_generate_chunk_assets.call(self) != Some(false) {
            hooks.before_chunk_assets.call(self);
            self.create_chunk_assets();
        }
        hooks.additional_chunk_assets.call(self);
        self.summarize_dependencies();
        if should_record {
            hooks.record.call(self);
        }

        hooks.additional_assets.call(self).await?;
        hooks.optimize_chunk_assets.call(self).await?;
        hooks.after_optimize_chunk_assets.call(self).await?;
        hooks.optimize_assets.call(self).await?;
        hooks.after_optimize_assets.call(self).await?;

        tracing::debug!(
            chunks = self.chunk_graph.len(),
            assets = self.asset_count(),
            hash = self.hash.as_deref().unwrap_or(""),
            "sealed compilation"
        );
        Ok(())
    }

    fn run_fixed_point(
        &mut self,
        phase: &'static str,
        step: impl Fn(&CompilationHooks, &mut Compilation) -> bool,
    ) -> Result<()> {
        let hooks = Arc::clone(&self.hooks);
        let mut iterations = 0;
        loop {
            iterations += 1;
            if iterations > FIXED_POINT_CAP {
                return Err(Error::OptimizationLoop {
                    phase,
                    iterations: FIXED_POINT_CAP,
                });
            }
            if !step(hooks.as_ref(), self) {
                return Ok(());
            }
        }
    }
}
