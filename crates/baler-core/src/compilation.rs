//! The compilation aggregate and its lifecycle plumbing.
//!
//! A `Compilation` is single-shot: entries go in through
//! [`Compilation::add_entry`], `finish` closes the build phase, `seal`
//! partitions and renders, and the embedder reads `assets` out. The
//! `unseal`/`seal` pair may re-enter; modules survive unseal, chunks do
//! not.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use baler_hooks::{AsyncSeriesHook, SyncBailHook, SyncHook};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::oneshot;

use crate::cache::{CachedModule, CompilationCache};
use crate::chunk::{Chunk, ChunkGraph, ChunkKey, Entrypoint};
use crate::config::CompilerOptions;
use crate::dependency::{
    BoxDependency, DependencyBlock, DependencyCategory, DependencyLocation, ModuleVariable,
};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::hashing::CompilationHasher;
use crate::module::{InputFileSystem, ModuleFactory, ResolverFactory, TimestampMap};
use crate::module_graph::{ModuleGraph, ModuleId};
use crate::source::BoxSource;
use crate::template::{
    ChunkTemplate, DependencyTemplate, MainTemplate, ModuleTemplate, PathData, render_path,
};
use crate::util::Semaphore;
use crate::{Error, Result};

type BuildWaiter = oneshot::Sender<std::result::Result<(), Diagnostic>>;

/// Named hook phases, in seal order where applicable.
///
/// Hooks are registered before the compilation is constructed and shared
/// behind an `Arc`, so calling a hook never aliases the compilation it
/// receives.
#[derive(Debug, Default)]
pub struct CompilationHooks {
    // Build phase.
    pub build_module: SyncHook<Compilation, ModuleId>,
    pub failed_module: SyncHook<Compilation, ModuleId>,
    pub succeed_module: SyncHook<Compilation, ModuleId>,
    pub finish_modules: SyncHook<Compilation>,

    // Seal lifecycle.
    pub seal: SyncHook<Compilation>,
    pub unseal: SyncHook<Compilation>,
    pub optimize_dependencies_basic: SyncBailHook<Compilation, bool>,
    pub optimize_dependencies: SyncBailHook<Compilation, bool>,
    pub optimize_dependencies_advanced: SyncBailHook<Compilation, bool>,
    pub after_optimize_dependencies: SyncHook<Compilation>,
    pub optimize: SyncHook<Compilation>,
    pub optimize_modules_basic: SyncBailHook<Compilation, bool>,
    pub optimize_modules: SyncBailHook<Compilation, bool>,
    pub optimize_modules_advanced: SyncBailHook<Compilation, bool>,
    pub after_optimize_modules: SyncHook<Compilation>,
    pub optimize_chunks_basic: SyncBailHook<Compilation, bool>,
    pub optimize_chunks: SyncBailHook<Compilation, bool>,
    pub optimize_chunks_advanced: SyncBailHook<Compilation, bool>,
    pub after_optimize_chunks: SyncHook<Compilation>,
    pub optimize_tree: AsyncSeriesHook<Compilation, Error>,
    pub after_optimize_tree: SyncHook<Compilation>,
    pub optimize_chunk_modules_basic: SyncBailHook<Compilation, bool>,
    pub optimize_chunk_modules: SyncBailHook<Compilation, bool>,
    pub optimize_chunk_modules_advanced: SyncBailHook<Compilation, bool>,
    pub after_optimize_chunk_modules: SyncHook<Compilation>,
    pub should_record: SyncBailHook<Compilation, bool>,

    // Id assignment.
    pub revive_modules: SyncHook<Compilation>,
    pub optimize_module_order: SyncHook<Compilation>,
    pub advanced_optimize_module_order: SyncHook<Compilation>,
    pub before_module_ids: SyncHook<Compilation>,
    pub module_ids: SyncHook<Compilation>,
    pub optimize_module_ids: SyncHook<Compilation>,
    pub after_optimize_module_ids: SyncHook<Compilation>,
    pub revive_chunks: SyncHook<Compilation>,
    pub optimize_chunk_order: SyncHook<Compilation>,
    pub before_chunk_ids: SyncHook<Compilation>,
    pub optimize_chunk_ids: SyncHook<Compilation>,
    pub after_optimize_chunk_ids: SyncHook<Compilation>,
    pub record_modules: SyncHook<Compilation>,
    pub record_chunks: SyncHook<Compilation>,

    // Hashing.
    pub before_hash: SyncHook<Compilation>,
    /// Receives each chunk with its in-progress hasher.
    pub chunk_hash: SyncHook<Chunk, CompilationHasher>,
    pub after_hash: SyncHook<Compilation>,
    pub record_hash: SyncHook<Compilation>,

    // Assets.
    pub before_module_assets: SyncHook<Compilation>,
    /// Receives the owning module and the emitted file name.
    pub module_asset: SyncHook<Compilation, (ModuleId, String)>,
    pub should_generate_chunk_assets: SyncBailHook<Compilation, bool>,
    pub before_chunk_assets: SyncHook<Compilation>,
    /// Receives the chunk and the emitted file name.
    pub chunk_asset: SyncHook<Compilation, (ChunkKey, String)>,
    pub additional_chunk_assets: SyncHook<Compilation>,
    pub record: SyncHook<Compilation>,
    pub additional_assets: AsyncSeriesHook<Compilation, Error>,
    pub optimize_chunk_assets: AsyncSeriesHook<Compilation, Error>,
    pub after_optimize_chunk_assets: AsyncSeriesHook<Compilation, Error>,
    pub optimize_assets: AsyncSeriesHook<Compilation, Error>,
    pub after_optimize_assets: AsyncSeriesHook<Compilation, Error>,
    pub need_additional_seal: SyncBailHook<Compilation, bool>,
    pub after_seal: AsyncSeriesHook<Compilation, Error>,
}

/// A reserved entry slot: the name exists from `add_entry` on, the module
/// arrives once its chain resolves.
#[derive(Debug)]
pub(crate) struct PreparedEntry {
    pub name: String,
    pub module: Option<ModuleId>,
}

/// Everything a compilation is constructed from.
pub struct CompilationParams {
    pub name: Option<String>,
    pub options: Arc<CompilerOptions>,
    pub hooks: Arc<CompilationHooks>,
    pub resolver_factory: Arc<dyn ResolverFactory>,
    pub input_file_system: Arc<dyn InputFileSystem>,
    pub main_template: Arc<dyn MainTemplate>,
    pub chunk_template: Arc<dyn ChunkTemplate>,
    pub module_templates: BTreeMap<String, Arc<dyn ModuleTemplate>>,
    pub dependency_templates: FxHashMap<DependencyCategory, Arc<dyn DependencyTemplate>>,
    pub dependency_factories: FxHashMap<DependencyCategory, Arc<dyn ModuleFactory>>,
    pub cache: Option<CompilationCache>,
    pub file_timestamps: Option<TimestampMap>,
    pub context_timestamps: Option<TimestampMap>,
    pub records: Option<serde_json::Value>,
}

impl CompilationParams {
    pub fn new(
        options: Arc<CompilerOptions>,
        resolver_factory: Arc<dyn ResolverFactory>,
        input_file_system: Arc<dyn InputFileSystem>,
        main_template: Arc<dyn MainTemplate>,
        chunk_template: Arc<dyn ChunkTemplate>,
    ) -> Self {
        Self {
            name: None,
            options,
            hooks: Arc::new(CompilationHooks::default()),
            resolver_factory,
            input_file_system,
            main_template,
            chunk_template,
            module_templates: BTreeMap::new(),
            dependency_templates: FxHashMap::default(),
            dependency_factories: FxHashMap::default(),
            cache: None,
            file_timestamps: None,
            context_timestamps: None,
            records: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<CompilationHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_cache(mut self, cache: CompilationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timestamps(
        mut self,
        file_timestamps: TimestampMap,
        context_timestamps: TimestampMap,
    ) -> Self {
        self.file_timestamps = Some(file_timestamps);
        self.context_timestamps = Some(context_timestamps);
        self
    }

    pub fn with_dependency_factory(
        mut self,
        category: DependencyCategory,
        factory: Arc<dyn ModuleFactory>,
    ) -> Self {
        self.dependency_factories.insert(category, factory);
        self
    }

    pub fn with_module_template(
        mut self,
        name: impl Into<String>,
        template: Arc<dyn ModuleTemplate>,
    ) -> Self {
        self.module_templates.insert(name.into(), template);
        self
    }
}

/// Top-level aggregate owning the module graph, the chunk graph and the
/// produced assets.
pub struct Compilation {
    pub name: Option<String>,
    pub options: Arc<CompilerOptions>,
    pub hooks: Arc<CompilationHooks>,
    pub(crate) resolver_factory: Arc<dyn ResolverFactory>,
    pub(crate) input_file_system: Arc<dyn InputFileSystem>,
    pub main_template: Arc<dyn MainTemplate>,
    pub chunk_template: Arc<dyn ChunkTemplate>,
    pub module_templates: BTreeMap<String, Arc<dyn ModuleTemplate>>,
    pub dependency_templates: FxHashMap<DependencyCategory, Arc<dyn DependencyTemplate>>,
    pub dependency_factories: FxHashMap<DependencyCategory, Arc<dyn ModuleFactory>>,

    pub module_graph: ModuleGraph,
    pub chunk_graph: ChunkGraph,
    /// Entry modules, in `add_entry` order.
    pub entries: Vec<ModuleId>,
    pub(crate) prepared_chunks: Vec<PreparedEntry>,
    pub entrypoints: IndexMap<String, Entrypoint>,

    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub children: Vec<Compilation>,

    pub cache: Option<CompilationCache>,
    pub records: Option<serde_json::Value>,
    pub file_timestamps: Option<TimestampMap>,
    pub context_timestamps: Option<TimestampMap>,

    /// Id reservations honored by the allocators.
    pub used_module_ids: FxHashSet<u32>,
    pub used_chunk_ids: FxHashSet<u32>,

    assets: IndexMap<String, BoxSource>,
    pub additional_chunk_assets: Vec<String>,
    pub file_dependencies: Vec<PathBuf>,
    pub context_dependencies: Vec<PathBuf>,
    pub missing_dependencies: Vec<PathBuf>,

    pub hash: Option<String>,
    pub full_hash: Option<String>,

    pub(crate) semaphore: Semaphore,
    pub(crate) building: FxHashMap<ModuleId, Vec<BuildWaiter>>,
    pub(crate) next_free_module_index: u32,
    pub(crate) next_free_module_index2: u32,
}

impl Compilation {
    pub fn new(params: CompilationParams) -> Self {
        let semaphore = Semaphore::new(params.options.parallelism.max(1));
        Self {
            name: params.name,
            options: params.options,
            hooks: params.hooks,
            resolver_factory: params.resolver_factory,
            input_file_system: params.input_file_system,
            main_template: params.main_template,
            chunk_template: params.chunk_template,
            module_templates: params.module_templates,
            dependency_templates: params.dependency_templates,
            dependency_factories: params.dependency_factories,
            module_graph: ModuleGraph::new(),
            chunk_graph: ChunkGraph::new(),
            entries: Vec::new(),
            prepared_chunks: Vec::new(),
            entrypoints: IndexMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            children: Vec::new(),
            cache: params.cache,
            records: params.records,
            file_timestamps: params.file_timestamps,
            context_timestamps: params.context_timestamps,
            used_module_ids: FxHashSet::default(),
            used_chunk_ids: FxHashSet::default(),
            assets: IndexMap::new(),
            additional_chunk_assets: Vec::new(),
            file_dependencies: Vec::new(),
            context_dependencies: Vec::new(),
            missing_dependencies: Vec::new(),
            hash: None,
            full_hash: None,
            semaphore,
            building: FxHashMap::default(),
            next_free_module_index: 0,
            next_free_module_index2: 0,
        }
    }

    /// Register the factory responsible for a dependency category.
    pub fn set_dependency_factory(
        &mut self,
        category: DependencyCategory,
        factory: Arc<dyn ModuleFactory>,
    ) {
        self.dependency_factories.insert(category, factory);
    }

    pub(crate) fn dependency_factory(
        &self,
        category: DependencyCategory,
    ) -> Result<Arc<dyn ModuleFactory>> {
        self.dependency_factories
            .get(&category)
            .cloned()
            .ok_or(Error::FactoryLookup(category))
    }

    /// Get or create a chunk, recording its origin.
    pub fn add_chunk(
        &mut self,
        name: Option<&str>,
        module: Option<ModuleId>,
        loc: Option<DependencyLocation>,
    ) -> ChunkKey {
        let (key, created) = self.chunk_graph.add_chunk(name);
        let chunk = self.chunk_graph.chunk_mut(key);
        chunk.add_origin(module, loc, name.map(str::to_string));
        if created {
            tracing::debug!(name = name.unwrap_or("<anonymous>"), "created chunk");
        }
        key
    }

    /// Run the `asset_path` waterfall and interpolate the result.
    pub fn get_path(&self, filename: &str, data: &PathData) -> String {
        let templated = self
            .main_template
            .hooks()
            .asset_path
            .call(filename.to_string(), data);
        render_path(&templated, data)
    }

    /// Rendered assets by filename.
    pub fn assets(&self) -> impl Iterator<Item = (&str, &BoxSource)> {
        self.assets.iter().map(|(name, source)| (name.as_str(), source))
    }

    pub fn asset(&self, file: &str) -> Option<&BoxSource> {
        self.assets.get(file)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub(crate) fn install_asset(&mut self, file: String, source: BoxSource) {
        self.assets.insert(file, source);
    }

    pub(crate) fn clear_assets(&mut self) {
        self.assets.clear();
    }

    /// Close the build phase: fire `finish-modules` and surface the
    /// errors and warnings dependencies discovered during builds.
    pub fn finish(&mut self) {
        let hooks = Arc::clone(&self.hooks);
        hooks.finish_modules.call(self);

        let mut collected: Vec<(Diagnostic, bool)> = Vec::new();
        for id in self.module_graph.module_ids().collect::<Vec<_>>() {
            let Some(module) = self.module_graph.node(id).module() else {
                continue;
            };
            let identifier = self.module_graph.node(id).identifier().to_string();
            collect_dependency_findings(
                &identifier,
                module.dependencies(),
                module.variables(),
                module.blocks(),
                &mut collected,
            );
        }
        for (diagnostic, is_error) in collected {
            if is_error {
                self.errors.push(diagnostic);
            } else {
                self.warnings.push(diagnostic);
            }
        }
    }

    /// Whether a module has a justification for being in a chunk: it is
    /// the chunk's entry module, or some reason's origin is a member of
    /// the chunk.
    pub fn has_reason_for_chunk(&self, module: ModuleId, chunk: ChunkKey) -> bool {
        if self.chunk_graph.chunk(chunk).entry_module == Some(module) {
            return true;
        }
        self.module_graph
            .node(module)
            .reasons
            .iter()
            .any(|reason| match reason.origin {
                Some(origin) => self.module_graph.node(origin).chunks.contains(chunk),
                None => false,
            })
    }

    /// Remove the reasons a block's dependencies contributed, patching
    /// chunk membership of targets that lost their last justification.
    pub fn remove_reasons_of_dependency_block(&mut self, origin: ModuleId, block: &BlockSnapshot) {
        let mut touched: Vec<ModuleId> = Vec::new();
        self.remove_reasons_walk(origin, block, &mut touched);
        for module in touched {
            self.patch_chunks_after_reason_removal(module);
        }
    }

    fn remove_reasons_walk(
        &mut self,
        origin: ModuleId,
        block: &BlockSnapshot,
        touched: &mut Vec<ModuleId>,
    ) {
        for variable in &block.variables {
            for dependency in &variable.dependencies {
                self.remove_one_reason(origin, dependency, touched);
            }
        }
        for dependency in &block.dependencies {
            self.remove_one_reason(origin, dependency, touched);
        }
        for nested in &block.blocks {
            let snapshot = BlockSnapshot::from_block(nested);
            self.remove_reasons_walk(origin, &snapshot, touched);
        }
    }

    fn remove_one_reason(
        &mut self,
        origin: ModuleId,
        dependency: &BoxDependency,
        touched: &mut Vec<ModuleId>,
    ) {
        let Some(target) = self.module_graph.module_for_dependency(dependency.id()) else {
            return;
        };
        if self
            .module_graph
            .node_mut(target)
            .remove_reason(Some(origin), dependency.id())
            && !touched.contains(&target)
        {
            touched.push(target);
        }
    }

    /// Re-examine a module's chunk membership after reason removal. A
    /// module with no reasons left cascades removal into its own
    /// dependencies.
    pub fn patch_chunks_after_reason_removal(&mut self, module: ModuleId) {
        if !self.module_graph.node(module).has_reasons() {
            if let Some(snapshot) = self.snapshot_module_block(module) {
                self.remove_reasons_of_dependency_block(module, &snapshot);
            }
        }
        let chunks: Vec<ChunkKey> = self.module_graph.node(module).chunks.iter().collect();
        for chunk in chunks {
            if !self.has_reason_for_chunk(module, chunk) {
                if self.module_graph.node_mut(module).chunks.remove(chunk) {
                    self.chunk_graph.chunk_mut(chunk).remove_module(module);
                    self.remove_chunk_from_dependencies(module, chunk);
                }
            }
        }
    }

    /// Walk a module's direct and variable dependencies, evicting targets
    /// from a chunk they no longer have a reason for.
    fn remove_chunk_from_dependencies(&mut self, module: ModuleId, chunk: ChunkKey) {
        let Some(snapshot) = self.snapshot_module_block(module) else {
            return;
        };
        let mut targets: Vec<ModuleId> = Vec::new();
        for dependency in snapshot
            .variables
            .iter()
            .flat_map(|variable| variable.dependencies.iter())
            .chain(snapshot.dependencies.iter())
        {
            if let Some(target) = self.module_graph.module_for_dependency(dependency.id()) {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        for target in targets {
            if !self.has_reason_for_chunk(target, chunk)
                && self.module_graph.node_mut(target).chunks.remove(chunk)
            {
                self.chunk_graph.chunk_mut(chunk).remove_module(target);
                self.remove_chunk_from_dependencies(target, chunk);
            }
        }
    }

    /// Snapshot a module's root dependency block for reason bookkeeping.
    pub(crate) fn snapshot_module_block(&self, module: ModuleId) -> Option<BlockSnapshot> {
        let instance = self.module_graph.node(module).module()?;
        Some(BlockSnapshot {
            dependencies: instance.dependencies().to_vec(),
            variables: instance.variables().to_vec(),
            blocks: instance.blocks().to_vec(),
        })
    }

    /// Remove a chunk and its membership edges.
    pub fn remove_chunk(&mut self, key: ChunkKey, reason: &str) {
        let members: Vec<ModuleId> = self.chunk_graph.chunk(key).modules.iter().collect();
        for module in members {
            self.module_graph.node_mut(module).chunks.remove(key);
        }
        tracing::debug!(chunk = self.chunk_graph.chunk(key).debug_id, reason, "removed chunk");
        self.chunk_graph.remove_chunk(key);
    }

    /// Replace module insertion order with index order.
    pub fn sort_modules(&mut self) {
        self.module_graph.sort_by_index();
    }

    pub(crate) fn sort_items_with_module_ids(&mut self) {
        self.module_graph.sort_by_id();
        self.sort_node_items(false);
    }

    pub(crate) fn sort_items_with_chunk_ids(&mut self) {
        self.chunk_graph.sort_alive_by_id();
        self.sort_node_items(true);
        self.errors.sort_by(|a, b| a.message.cmp(&b.message));
        self.warnings.sort_by(|a, b| a.message.cmp(&b.message));
    }

    fn sort_node_items(&mut self, with_id: bool) {
        for id in self.module_graph.module_ids().collect::<Vec<_>>() {
            let node = self.module_graph.node_mut(id);
            node.reasons
                .sort_by_key(|reason| (reason.origin, reason.dependency));
            if let Some(module) = node.module_mut() {
                module.sort_items(with_id);
            }
        }
        for key in self.chunk_graph.keys().collect::<Vec<_>>() {
            self.chunk_graph
                .chunk_mut(key)
                .sort_items(&self.module_graph);
        }
    }

    /// Aggregate file/context/missing dependency paths from modules,
    /// children and recorded diagnostics; sorted and deduped.
    pub fn summarize_dependencies(&mut self) {
        let mut files: Vec<PathBuf> = Vec::new();
        let mut contexts: Vec<PathBuf> = Vec::new();
        let mut missing: Vec<PathBuf> = Vec::new();

        for child in &self.children {
            files.extend(child.file_dependencies.iter().cloned());
            contexts.extend(child.context_dependencies.iter().cloned());
            missing.extend(child.missing_dependencies.iter().cloned());
        }
        for id in self.module_graph.module_ids() {
            if let Some(module) = self.module_graph.node(id).module() {
                files.extend(module.file_dependencies().iter().cloned());
                contexts.extend(module.context_dependencies().iter().cloned());
            }
        }
        for diagnostic in self.errors.iter().chain(self.warnings.iter()) {
            missing.extend(diagnostic.missing.iter().cloned());
        }

        for list in [&mut files, &mut contexts, &mut missing] {
            list.sort();
            list.dedup();
        }
        self.file_dependencies = files;
        self.context_dependencies = contexts;
        self.missing_dependencies = missing;
    }

    /// Verify id uniqueness and membership symmetry.
    pub fn check_constraints(&self) -> Result<()> {
        let mut module_ids: FxHashSet<u32> = FxHashSet::default();
        for id in self.module_graph.module_ids() {
            let node = self.module_graph.node(id);
            if let Some(assigned) = node.id {
                if !module_ids.insert(assigned) {
                    return Err(Error::Constraint(format!(
                        "duplicate module id {assigned} ({})",
                        node.identifier()
                    )));
                }
            }
        }
        let mut chunk_ids: FxHashSet<u32> = FxHashSet::default();
        for key in self.chunk_graph.keys() {
            let chunk = self.chunk_graph.chunk(key);
            if let Some(assigned) = chunk.id {
                if !chunk_ids.insert(assigned) {
                    return Err(Error::Constraint(format!(
                        "duplicate chunk id {assigned}"
                    )));
                }
            }
            for module in chunk.modules.iter() {
                if !self.module_graph.node(module).chunks.contains(key) {
                    return Err(Error::Constraint(format!(
                        "module {} missing back-reference to chunk {}",
                        self.module_graph.node(module).identifier(),
                        chunk.debug_id
                    )));
                }
            }
        }
        for id in self.module_graph.module_ids() {
            for chunk in self.module_graph.node(id).chunks.iter() {
                if !self.chunk_graph.chunk(chunk).modules.contains(id) {
                    return Err(Error::Constraint(format!(
                        "chunk {} missing module {}",
                        self.chunk_graph.chunk(chunk).debug_id,
                        self.module_graph.node(id).identifier()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Tear down seal state so `seal` can run again. Modules survive;
    /// chunks, entrypoints and assets do not.
    pub fn unseal(&mut self) {
        let hooks = Arc::clone(&self.hooks);
        hooks.unseal.call(self);
        self.chunk_graph.clear();
        self.entrypoints.clear();
        self.additional_chunk_assets.clear();
        self.clear_assets();
        for id in self.module_graph.module_ids().collect::<Vec<_>>() {
            let node = self.module_graph.node_mut(id);
            node.chunks.clear();
            if let Some(module) = node.module_mut() {
                module.unseal();
            }
        }
    }

    /// Consume the compilation, writing built modules back into the
    /// cache side-table for the next compilation to revive.
    pub fn into_cache(mut self) -> Option<CompilationCache> {
        let mut cache = self.cache.take()?;
        for id in self.module_graph.module_ids().collect::<Vec<_>>() {
            let node = self.module_graph.node_mut(id);
            let Some(cache_name) = node.cache_name.take() else {
                continue;
            };
            let errors = node.errors.clone();
            let warnings = node.warnings.clone();
            if node.module().is_some() {
                let module = self.module_graph.check_out(id);
                cache.store_module(
                    cache_name,
                    CachedModule {
                        module,
                        errors,
                        warnings,
                    },
                );
            }
        }
        Some(cache)
    }
}

impl std::fmt::Debug for Compilation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compilation")
            .field("name", &self.name)
            .field("modules", &self.module_graph.len())
            .field("chunks", &self.chunk_graph.len())
            .field("errors", &self.errors.len())
            .field("warnings", &self.warnings.len())
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// An owned copy of a dependency block's three parallel sequences, taken
/// before a rebuild so the old edges can be retired afterwards.
#[derive(Debug, Clone)]
pub struct BlockSnapshot {
    pub dependencies: Vec<BoxDependency>,
    pub variables: Vec<ModuleVariable>,
    pub blocks: Vec<Arc<DependencyBlock>>,
}

impl BlockSnapshot {
    pub(crate) fn from_block(block: &DependencyBlock) -> Self {
        Self {
            dependencies: block.dependencies.clone(),
            variables: block.variables.clone(),
            blocks: block.blocks.clone(),
        }
    }
}

fn collect_dependency_findings(
    identifier: &str,
    dependencies: &[BoxDependency],
    variables: &[ModuleVariable],
    blocks: &[Arc<DependencyBlock>],
    out: &mut Vec<(Diagnostic, bool)>,
) {
    for dependency in dependencies
        .iter()
        .chain(variables.iter().flat_map(|variable| variable.dependencies.iter()))
    {
        for warning in dependency.get_warnings() {
            out.push((
                Diagnostic::warning(DiagnosticKind::ModuleDependency, warning.message)
                    .with_module(identifier)
                    .with_loc(dependency.loc()),
                false,
            ));
        }
        for error in dependency.get_errors() {
            out.push((
                Diagnostic::error(DiagnosticKind::ModuleDependency, error.message)
                    .with_module(identifier)
                    .with_loc(dependency.loc()),
                true,
            ));
        }
    }
    for block in blocks {
        collect_dependency_findings(
            identifier,
            &block.dependencies,
            &block.variables,
            &block.blocks,
            out,
        );
    }
}
