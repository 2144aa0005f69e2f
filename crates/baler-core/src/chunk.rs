//! Chunks, entrypoints and the chunk arena.
//!
//! A chunk is a unit of output - the smallest thing rendered to an
//! asset. Chunks and modules hold both sides of the membership relation;
//! chunk-to-chunk edges (`parents`/`children`) are index pairs into the
//! arena.

use rustc_hash::FxHashMap;

use crate::dependency::{BlockId, DependencyLocation};
use crate::hashing::CompilationHasher;
use crate::module_graph::{ModuleGraph, ModuleId};
use crate::util::SortableSet;

/// Stable arena index of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey(u32);

impl ChunkKey {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Where a chunk came from: the requesting module, the request site and
/// the chunk name it asked for.
#[derive(Debug, Clone)]
pub struct ChunkOrigin {
    pub module: Option<ModuleId>,
    pub loc: Option<DependencyLocation>,
    pub name: Option<String>,
}

/// A unit of output.
#[derive(Debug)]
pub struct Chunk {
    key: ChunkKey,
    pub name: Option<String>,
    /// Assigned numeric id; stable for a given graph.
    pub id: Option<u32>,
    pub ids: Option<Vec<u32>>,
    /// Process-unique id usable before numeric ids exist.
    pub debug_id: u32,
    /// Files emitted for this chunk.
    pub files: Vec<String>,
    pub modules: SortableSet<ModuleId>,
    pub parents: SortableSet<ChunkKey>,
    pub children: SortableSet<ChunkKey>,
    /// Async blocks loaded through this chunk.
    pub blocks: SortableSet<BlockId>,
    pub entry_module: Option<ModuleId>,
    pub origins: Vec<ChunkOrigin>,
    /// Seeded from a top-level entry rather than an async split.
    pub initial: bool,
    /// Carries the bootstrap runtime; hashed after all other chunks.
    pub runtime: bool,
    pub hash: Option<String>,
    pub rendered_hash: Option<String>,
    pub(crate) removed: bool,
}

impl Chunk {
    fn new(key: ChunkKey, name: Option<String>, debug_id: u32) -> Self {
        Self {
            key,
            name,
            id: None,
            ids: None,
            debug_id,
            files: Vec::new(),
            modules: SortableSet::new(),
            parents: SortableSet::new(),
            children: SortableSet::new(),
            blocks: SortableSet::new(),
            entry_module: None,
            origins: Vec::new(),
            initial: false,
            runtime: false,
            hash: None,
            rendered_hash: None,
            removed: false,
        }
    }

    pub fn key(&self) -> ChunkKey {
        self.key
    }

    pub fn has_runtime(&self) -> bool {
        self.runtime
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    /// Whether the chunk was unlinked from the arena.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Add a module; returns `true` if it was not already a member.
    pub fn add_module(&mut self, module: ModuleId) -> bool {
        self.modules.add(module)
    }

    pub fn remove_module(&mut self, module: ModuleId) -> bool {
        self.modules.remove(module)
    }

    pub fn add_parent(&mut self, parent: ChunkKey) -> bool {
        self.parents.add(parent)
    }

    /// Record an outgoing chunk edge; returns `true` the first time.
    pub fn add_child(&mut self, child: ChunkKey) -> bool {
        self.children.add(child)
    }

    pub fn add_block(&mut self, block: BlockId) -> bool {
        self.blocks.add(block)
    }

    pub fn add_origin(
        &mut self,
        module: Option<ModuleId>,
        loc: Option<DependencyLocation>,
        name: Option<String>,
    ) {
        self.origins.push(ChunkOrigin { module, loc, name });
    }

    /// Feed identifying content into a chunk hash: id, ids, name and the
    /// member modules' hashes in membership order.
    pub fn update_hash(&self, hasher: &mut CompilationHasher, graph: &ModuleGraph) {
        hasher.update(format!(
            "{} ",
            self.id.map(|id| id.to_string()).unwrap_or_default()
        ));
        if let Some(ids) = &self.ids {
            let joined: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            hasher.update(joined.join(","));
        }
        hasher.update(format!("{} ", self.name.as_deref().unwrap_or("")));
        for module in self.modules.iter() {
            if let Some(hash) = &graph.node(module).hash {
                hasher.update(hash.as_bytes());
            }
        }
    }

    /// Deterministic internal order once ids exist.
    pub fn sort_items(&mut self, graph: &ModuleGraph) {
        self.modules
            .sort_by(|a, b| graph.node(*a).id.cmp(&graph.node(*b).id));
        self.parents.sort_by(|a, b| a.cmp(b));
        self.children.sort_by(|a, b| a.cmp(b));
    }
}

/// Ordered list of chunks for a named entry.
///
/// Owns its chunks by key only; module data stays on the compilation.
/// The first chunk is the runtime chunk.
#[derive(Debug, Clone)]
pub struct Entrypoint {
    pub name: String,
    chunks: Vec<ChunkKey>,
}

impl Entrypoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunks: Vec::new(),
        }
    }

    pub fn unshift_chunk(&mut self, chunk: ChunkKey) {
        self.chunks.insert(0, chunk);
    }

    pub fn push_chunk(&mut self, chunk: ChunkKey) {
        self.chunks.push(chunk);
    }

    pub fn chunks(&self) -> &[ChunkKey] {
        &self.chunks
    }

    pub fn runtime_chunk(&self) -> Option<ChunkKey> {
        self.chunks.first().copied()
    }
}

/// Arena of chunks plus the name table and block assignments.
#[derive(Debug, Default)]
pub struct ChunkGraph {
    arena: Vec<Chunk>,
    /// Live chunks in creation order; this is `compilation.chunks`.
    alive: Vec<ChunkKey>,
    named: FxHashMap<String, ChunkKey>,
    /// Chunks assigned to each async block during partitioning.
    block_chunk_lists: FxHashMap<BlockId, Vec<ChunkKey>>,
    next_debug_id: u32,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self {
            next_debug_id: 1000,
            ..Self::default()
        }
    }

    /// Get or create a chunk.
    ///
    /// A named chunk appears at most once: a second request for the same
    /// name returns the existing chunk with `created = false`.
    pub fn add_chunk(&mut self, name: Option<&str>) -> (ChunkKey, bool) {
        if let Some(name) = name {
            if let Some(&existing) = self.named.get(name) {
                return (existing, false);
            }
        }
        let key = ChunkKey(self.arena.len() as u32);
        let debug_id = self.next_debug_id;
        self.next_debug_id += 1;
        self.arena
            .push(Chunk::new(key, name.map(str::to_string), debug_id));
        self.alive.push(key);
        if let Some(name) = name {
            self.named.insert(name.to_string(), key);
        }
        (key, true)
    }

    pub fn chunk(&self, key: ChunkKey) -> &Chunk {
        &self.arena[key.0 as usize]
    }

    pub fn chunk_mut(&mut self, key: ChunkKey) -> &mut Chunk {
        &mut self.arena[key.0 as usize]
    }

    pub fn named_chunk(&self, name: &str) -> Option<ChunkKey> {
        self.named.get(name).copied()
    }

    /// Live chunks in creation order.
    pub fn keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.alive.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    /// Unlink a chunk from the arena. Membership edges on modules are the
    /// caller's responsibility.
    pub fn remove_chunk(&mut self, key: ChunkKey) {
        let chunk = &mut self.arena[key.0 as usize];
        chunk.removed = true;
        if let Some(name) = chunk.name.clone() {
            if self.named.get(&name) == Some(&key) {
                self.named.remove(&name);
            }
        }
        self.alive.retain(|existing| *existing != key);
        for other in &mut self.arena {
            other.parents.remove(key);
            other.children.remove(key);
        }
        for list in self.block_chunk_lists.values_mut() {
            list.retain(|existing| *existing != key);
        }
    }

    pub fn sort_alive_by_id(&mut self) {
        let arena = &self.arena;
        self.alive
            .sort_by_key(|key| arena[key.0 as usize].id.unwrap_or(u32::MAX));
    }

    pub(crate) fn push_block_chunk(&mut self, block: BlockId, chunk: ChunkKey) {
        self.block_chunk_lists.entry(block).or_default().push(chunk);
    }

    pub(crate) fn reset_block_chunks(&mut self, block: BlockId) {
        self.block_chunk_lists.insert(block, Vec::new());
    }

    /// Chunks assigned to an async block.
    pub fn block_chunks(&self, block: BlockId) -> &[ChunkKey] {
        self.block_chunk_lists
            .get(&block)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop all chunk state; used by unseal. Modules survive, chunks do
    /// not.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.alive.clear();
        self.named.clear();
        self.block_chunk_lists.clear();
        self.next_debug_id = 1000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_chunk_is_unique() {
        let mut graph = ChunkGraph::new();
        let (first, created) = graph.add_chunk(Some("main"));
        assert!(created);
        let (second, created) = graph.add_chunk(Some("main"));
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_debug_ids_are_distinct() {
        let mut graph = ChunkGraph::new();
        let (a, _) = graph.add_chunk(None);
        let (b, _) = graph.add_chunk(None);
        assert_ne!(graph.chunk(a).debug_id, graph.chunk(b).debug_id);
        assert!(graph.chunk(a).debug_id >= 1000);
    }

    #[test]
    fn test_remove_chunk_unlinks_edges() {
        let mut graph = ChunkGraph::new();
        let (parent, _) = graph.add_chunk(Some("main"));
        let (child, _) = graph.add_chunk(Some("lazy"));
        graph.chunk_mut(parent).add_child(child);
        graph.chunk_mut(child).add_parent(parent);

        graph.remove_chunk(child);
        assert_eq!(graph.len(), 1);
        assert!(graph.chunk(child).is_removed());
        assert_eq!(graph.named_chunk("lazy"), None);
        assert!(graph.chunk(parent).children.is_empty());
    }

    #[test]
    fn test_entrypoint_runtime_chunk_is_first() {
        let mut graph = ChunkGraph::new();
        let (main, _) = graph.add_chunk(Some("main"));
        let (vendor, _) = graph.add_chunk(Some("vendor"));

        let mut entrypoint = Entrypoint::new("main");
        entrypoint.unshift_chunk(main);
        entrypoint.unshift_chunk(vendor);
        assert_eq!(entrypoint.runtime_chunk(), Some(vendor));
        assert_eq!(entrypoint.chunks(), &[vendor, main]);
    }
}
