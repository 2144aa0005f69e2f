//! Arena-backed module store and graph bookkeeping.
//!
//! Module instances live behind trait objects in an arena with stable
//! [`ModuleId`] indices; all graph-side state (resolved dependency
//! targets, inclusion reasons, chunk membership, labelling, ids, hashes)
//! lives on the compilation-owned [`ModuleNode`], so module graphs with
//! cycles need no reference counting.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::cache::CompilationCache;
use crate::chunk::ChunkKey;
use crate::dependency::DependencyId;
use crate::diagnostics::Diagnostic;
use crate::module::{BoxModule, Module, TimestampMap};
use crate::util::SortableSet;

/// Stable arena index of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// One (origin, dependency) pair that caused a module's inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleReason {
    /// The module whose dependency pulled the target in; `None` for
    /// entries.
    pub origin: Option<ModuleId>,
    pub dependency: DependencyId,
}

/// Per-module timing record, populated when profiling is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleProfile {
    pub factory: Duration,
    pub building: Duration,
    pub dependencies: Duration,
}

/// Graph-side record for one module.
#[derive(Debug)]
pub struct ModuleNode {
    identifier: Arc<str>,
    /// The module instance. `None` while checked out into a build task.
    module: Option<BoxModule>,
    /// The module that first caused inclusion.
    pub issuer: Option<ModuleId>,
    pub reasons: Vec<ModuleReason>,
    pub chunks: SortableSet<ChunkKey>,
    pub id: Option<u32>,
    pub index: Option<u32>,
    pub index2: Option<u32>,
    pub depth: Option<u32>,
    pub hash: Option<String>,
    pub rendered_hash: Option<String>,
    /// Stamped build findings, replayed when this instance is restored
    /// from cache.
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub profile: Option<ModuleProfile>,
    pub built: bool,
    pub(crate) cache_name: Option<String>,
}

impl ModuleNode {
    fn new(identifier: Arc<str>, module: BoxModule, cache_name: Option<String>) -> Self {
        Self {
            identifier,
            module: Some(module),
            issuer: None,
            reasons: Vec::new(),
            chunks: SortableSet::new(),
            id: None,
            index: None,
            index2: None,
            depth: None,
            hash: None,
            rendered_hash: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            profile: None,
            built: false,
            cache_name,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The module instance, if not checked out into a build task.
    pub fn module(&self) -> Option<&dyn Module> {
        self.module.as_deref()
    }

    pub fn module_mut(&mut self) -> Option<&mut BoxModule> {
        self.module.as_mut()
    }

    pub fn has_reasons(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// Record a reason; duplicate (origin, dependency) pairs collapse,
    /// which keeps re-walking an already-built module a no-op.
    pub fn add_reason(&mut self, origin: Option<ModuleId>, dependency: DependencyId) {
        let reason = ModuleReason { origin, dependency };
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    pub fn remove_reason(&mut self, origin: Option<ModuleId>, dependency: DependencyId) -> bool {
        let reason = ModuleReason { origin, dependency };
        if let Some(position) = self.reasons.iter().position(|existing| *existing == reason) {
            self.reasons.remove(position);
            true
        } else {
            false
        }
    }
}

/// Result of [`ModuleGraph::add_module`].
///
/// The three cases are load-bearing and must not be collapsed: a
/// duplicate redirects the caller to the already-inserted instance,
/// while a cache restore hands back a previously built instance whose
/// stored findings must be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleInsertion {
    /// Newly inserted; the module still needs building.
    Fresh(ModuleId),
    /// The identifier already exists; discard the new instance.
    Duplicate(ModuleId),
    /// A cached instance was revived; it is already built.
    Restored(ModuleId),
}

impl ModuleInsertion {
    pub fn module_id(self) -> ModuleId {
        match self {
            Self::Fresh(id) | Self::Duplicate(id) | Self::Restored(id) => id,
        }
    }
}

/// Identity-keyed module table plus dependency resolution state.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: Vec<ModuleNode>,
    by_identifier: FxHashMap<Arc<str>, ModuleId>,
    /// Insertion order until `sort_modules` replaces it by index.
    order: Vec<ModuleId>,
    /// Dependency id to resolved target.
    connections: FxHashMap<DependencyId, ModuleId>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module, consulting the content cache.
    ///
    /// The cache path only revives an instance when both timestamp maps
    /// are available and the cached instance reports itself fresh;
    /// otherwise the stale entry is dropped, the incoming instance is
    /// unbuilt, and insertion proceeds normally.
    pub fn add_module(
        &mut self,
        mut module: BoxModule,
        cache_group: Option<&str>,
        cache: Option<&mut CompilationCache>,
        file_timestamps: Option<&TimestampMap>,
        context_timestamps: Option<&TimestampMap>,
    ) -> ModuleInsertion {
        let identifier: Arc<str> = Arc::from(module.identifier());
        if let Some(&existing) = self.by_identifier.get(&identifier) {
            return ModuleInsertion::Duplicate(existing);
        }

        let cache_name =
            cache.is_some().then(|| CompilationCache::cache_name(cache_group, &identifier));
        if let Some(cache) = cache {
            let name = cache_name.clone().unwrap_or_default();
            if let Some(mut cached) = cache.take_module(&name) {
                let fresh = match (file_timestamps, context_timestamps) {
                    (Some(files), Some(contexts)) => !cached.module.need_rebuild(files, contexts),
                    _ => false,
                };
                if fresh {
                    cached.module.disconnect();
                    let id = self.insert_node(identifier, cached.module, Some(name));
                    let node = &mut self.nodes[id.0 as usize];
                    node.errors = cached.errors;
                    node.warnings = cached.warnings;
                    node.built = true;
                    return ModuleInsertion::Restored(id);
                }
                module.unbuild();
            }
        }

        let id = self.insert_node(identifier, module, cache_name);
        ModuleInsertion::Fresh(id)
    }

    fn insert_node(
        &mut self,
        identifier: Arc<str>,
        module: BoxModule,
        cache_name: Option<String>,
    ) -> ModuleId {
        let id = ModuleId(self.nodes.len() as u32);
        self.nodes
            .push(ModuleNode::new(Arc::clone(&identifier), module, cache_name));
        self.by_identifier.insert(identifier, id);
        self.order.push(id);
        id
    }

    pub fn node(&self, id: ModuleId) -> &ModuleNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: ModuleId) -> &mut ModuleNode {
        &mut self.nodes[id.0 as usize]
    }

    /// The checked-in module instance.
    ///
    /// Panics if the module is currently checked out into a build task;
    /// seal-phase callers run strictly after the build loop drained.
    pub fn module(&self, id: ModuleId) -> &dyn Module {
        self.nodes[id.0 as usize]
            .module
            .as_deref()
            .expect("module should be checked in")
    }

    pub fn module_by_identifier(&self, identifier: &str) -> Option<ModuleId> {
        self.by_identifier.get(identifier).copied()
    }

    /// Move the module instance out for a build task.
    pub(crate) fn check_out(&mut self, id: ModuleId) -> BoxModule {
        self.nodes[id.0 as usize]
            .module
            .take()
            .expect("module already checked out")
    }

    pub(crate) fn check_in(&mut self, id: ModuleId, module: BoxModule) {
        self.nodes[id.0 as usize].module = Some(module);
    }

    /// Modules in their current published order.
    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn set_resolved(&mut self, dependency: DependencyId, target: ModuleId) {
        self.connections.insert(dependency, target);
    }

    /// The module a dependency resolved to, if any.
    pub fn module_for_dependency(&self, dependency: DependencyId) -> Option<ModuleId> {
        self.connections.get(&dependency).copied()
    }

    /// Replace insertion order with index order.
    pub fn sort_by_index(&mut self) {
        let nodes = &self.nodes;
        self.order
            .sort_by_key(|id| nodes[id.0 as usize].index.unwrap_or(u32::MAX));
    }

    /// Replace the published order with assigned-id order.
    pub fn sort_by_id(&mut self) {
        let nodes = &self.nodes;
        self.order
            .sort_by_key(|id| nodes[id.0 as usize].id.unwrap_or(u32::MAX));
    }
}
