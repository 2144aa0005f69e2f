//! Module-to-chunk partitioning.
//!
//! Two phases. Phase 1 walks dependency blocks from the input chunks,
//! filling chunks with modules and creating a fresh chunk per async
//! split point. Phase 2 connects chunks along the recorded edges while
//! pruning edges whose target delivers nothing new: each chunk tracks
//! the minimal set of modules guaranteed available wherever it loads,
//! and those sets only ever shrink, which both breaks cycles and
//! guarantees termination. Chunks created in phase 1 that end up with no
//! parents are removed.

use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::chunk::ChunkKey;
use crate::compilation::Compilation;
use crate::dependency::{BlockId, DependencyBlock};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::module_graph::ModuleId;
use crate::util::WorkQueue;

/// A dependency block under traversal: a module's root block or a nested
/// async block, with the module that owns it.
enum BlockLike {
    ModuleRoot(ModuleId),
    Nested(ModuleId, Arc<DependencyBlock>),
}

struct AvailabilityItem {
    chunk: ChunkKey,
    available: FxHashSet<ModuleId>,
}

impl Compilation {
    /// Partition modules into chunks, starting from the given input
    /// chunks (each carrying an entry module).
    pub fn process_dependencies_blocks_for_chunks(&mut self, input_chunks: Vec<ChunkKey>) {
        let mut block_chunks: FxHashMap<BlockId, ChunkKey> = FxHashMap::default();
        let mut chunk_dependencies: FxHashMap<ChunkKey, Vec<(BlockId, ChunkKey)>> =
            FxHashMap::default();
        let mut all_created_chunks: Vec<ChunkKey> = Vec::new();

        // Phase 1: basic chunk graph.
        let mut queue: WorkQueue<(BlockLike, ChunkKey)> = WorkQueue::new();
        for &chunk in &input_chunks {
            if let Some(entry) = self.chunk_graph.chunk(chunk).entry_module {
                queue.push((BlockLike::ModuleRoot(entry), chunk));
            }
        }

        while let Some((block, chunk)) = queue.pop() {
            let (owner, references, nested_blocks) = match &block {
                BlockLike::ModuleRoot(module) => {
                    let Some(instance) = self.module_graph.node(*module).module() else {
                        continue;
                    };
                    let references = self.block_references(
                        instance.dependencies(),
                        instance.variables(),
                    );
                    (*module, references, instance.blocks().to_vec())
                }
                BlockLike::Nested(owner, nested) => {
                    let references =
                        self.block_references(&nested.dependencies, &nested.variables);
                    (*owner, references, nested.blocks.clone())
                }
            };

            for reference in references {
                let Some(reference) = reference else { continue };
                let Some(target) = reference.module else { continue };
                if reference.weak {
                    continue;
                }
                if self.chunk_graph.chunk_mut(chunk).add_module(target) {
                    self.module_graph.node_mut(target).chunks.add(chunk);
                    queue.push((BlockLike::ModuleRoot(target), chunk));
                }
            }

            for nested in nested_blocks {
                let assigned = match block_chunks.get(&nested.id()) {
                    Some(&existing) => existing,
                    None => {
                        let collides_with_initial = nested
                            .chunk_name
                            .as_deref()
                            .and_then(|name| self.chunk_graph.named_chunk(name))
                            .is_some_and(|key| self.chunk_graph.chunk(key).is_initial());
                        if collides_with_initial {
                            self.warnings.push(
                                Diagnostic::warning(
                                    DiagnosticKind::AsyncDependencyToInitialChunk,
                                    format!(
                                        "chunk name \"{}\" is already used by an entrypoint; \
                                         loading it on demand is not possible",
                                        nested.chunk_name.as_deref().unwrap_or_default()
                                    ),
                                )
                                .with_module(self.module_graph.node(owner).identifier())
                                .with_loc(nested.loc),
                            );
                            // Legacy behavior: fold the split into the
                            // requesting chunk.
                            chunk
                        } else {
                            let created = self.add_chunk(
                                nested.chunk_name.as_deref(),
                                Some(owner),
                                nested.loc,
                            );
                            block_chunks.insert(nested.id(), created);
                            if !all_created_chunks.contains(&created) {
                                all_created_chunks.push(created);
                            }
                            self.chunk_graph.reset_block_chunks(nested.id());
                            created
                        }
                    }
                };
                chunk_dependencies
                    .entry(chunk)
                    .or_default()
                    .push((nested.id(), assigned));
                queue.push((BlockLike::Nested(owner, nested), assigned));
            }
        }

        // Phase 2: availability-pruned connection.
        let mut min_available: FxHashMap<ChunkKey, FxHashSet<ModuleId>> = FxHashMap::default();
        let mut queue: VecDeque<AvailabilityItem> = VecDeque::new();
        for &chunk in &input_chunks {
            queue.push_back(AvailabilityItem {
                chunk,
                available: FxHashSet::default(),
            });
        }

        while let Some(item) = queue.pop_front() {
            let chunk = item.chunk;
            let available = match min_available.entry(chunk) {
                Entry::Vacant(slot) => {
                    slot.insert(item.available.clone());
                    item.available
                }
                Entry::Occupied(mut slot) => {
                    // Intersect in place; no shrink means no new
                    // information and the item is discarded.
                    let stored = slot.get_mut();
                    let before = stored.len();
                    stored.retain(|module| item.available.contains(module));
                    if stored.len() == before {
                        continue;
                    }
                    stored.clone()
                }
            };

            let Some(edges) = chunk_dependencies.get(&chunk) else {
                continue;
            };
            if edges.is_empty() {
                continue;
            }
            let edges = edges.clone();

            let mut new_available = available;
            for module in self.chunk_graph.chunk(chunk).modules.iter() {
                new_available.insert(module);
            }

            let mut next_chunks: Vec<ChunkKey> = Vec::new();
            for (block, dep_chunk) in edges {
                // An edge whose target is fully covered by what's
                // already available delivers nothing; dropping it also
                // breaks cycles.
                let fully_available = self
                    .chunk_graph
                    .chunk(dep_chunk)
                    .modules
                    .iter()
                    .all(|module| new_available.contains(&module));
                if fully_available {
                    continue;
                }
                if self.chunk_graph.chunk_mut(dep_chunk).add_block(block) {
                    self.chunk_graph.push_block_chunk(block, dep_chunk);
                }
                if self.chunk_graph.chunk_mut(chunk).add_child(dep_chunk) {
                    self.chunk_graph.chunk_mut(dep_chunk).add_parent(chunk);
                }
                if !next_chunks.contains(&dep_chunk) {
                    next_chunks.push(dep_chunk);
                }
            }
            for dep_chunk in next_chunks {
                queue.push_back(AvailabilityItem {
                    chunk: dep_chunk,
                    available: new_available.clone(),
                });
            }
        }

        // A module in a chunk's final minimal availability set reaches
        // every consumer of the chunk through its parents already;
        // re-delivering it is dropped.
        for (&chunk, available) in &min_available {
            let redundant: Vec<ModuleId> = self
                .chunk_graph
                .chunk(chunk)
                .modules
                .iter()
                .filter(|module| available.contains(module))
                .collect();
            for module in redundant {
                self.chunk_graph.chunk_mut(chunk).remove_module(module);
                self.module_graph.node_mut(module).chunks.remove(chunk);
            }
        }

        // Cleanup: phase-1 chunks that never got connected.
        for created in all_created_chunks {
            if self.chunk_graph.chunk(created).parents.is_empty() {
                self.remove_chunk(created, "unconnected");
            }
        }
    }

    /// References a block contributes, variables first, in array order.
    fn block_references(
        &self,
        dependencies: &[crate::dependency::BoxDependency],
        variables: &[crate::dependency::ModuleVariable],
    ) -> Vec<Option<crate::dependency::DependencyReference>> {
        variables
            .iter()
            .flat_map(|variable| variable.dependencies.iter())
            .chain(dependencies.iter())
            .map(|dependency| {
                dependency
                    .get_reference(self.module_graph.module_for_dependency(dependency.id()))
            })
            .collect()
    }
}
