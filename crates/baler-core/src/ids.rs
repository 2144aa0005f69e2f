//! Numeric id assignment for modules and chunks.
//!
//! Ids reserved by the embedder (`used_module_ids` / `used_chunk_ids`,
//! typically revived from records) and ids already carried by nodes are
//! honored; holes below the used maximum are reused smallest-first
//! before fresh ids are taken above it.

use rustc_hash::FxHashSet;

use crate::compilation::Compilation;

/// Derive the allocation state from the set of taken ids: the next
/// fresh id and the reusable holes, ordered so `pop` yields the
/// smallest first.
fn id_allocation_state(used: &FxHashSet<u32>) -> (u32, Vec<u32>) {
    if used.is_empty() {
        return (0, Vec::new());
    }
    let next_free = used.iter().copied().max().unwrap_or(0) + 1;
    let mut unused = Vec::new();
    let mut candidate = next_free;
    while candidate > 0 {
        candidate -= 1;
        if !used.contains(&candidate) {
            unused.push(candidate);
        }
    }
    (next_free, unused)
}

impl Compilation {
    /// Assign ids to modules without one, in module order.
    pub fn apply_module_ids(&mut self) {
        let mut used = self.used_module_ids.clone();
        for id in self.module_graph.module_ids() {
            if let Some(assigned) = self.module_graph.node(id).id {
                used.insert(assigned);
            }
        }
        let (mut next_free, mut unused) = id_allocation_state(&used);

        for id in self.module_graph.module_ids().collect::<Vec<_>>() {
            let node = self.module_graph.node_mut(id);
            if node.id.is_none() {
                node.id = Some(unused.pop().unwrap_or_else(|| {
                    let fresh = next_free;
                    next_free += 1;
                    fresh
                }));
            }
        }
    }

    /// Assign ids to chunks without one; every chunk ends up with an
    /// `ids` list, defaulting to its own id.
    pub fn apply_chunk_ids(&mut self) {
        let mut used = self.used_chunk_ids.clone();
        for key in self.chunk_graph.keys() {
            if let Some(assigned) = self.chunk_graph.chunk(key).id {
                used.insert(assigned);
            }
        }
        let (mut next_free, mut unused) = id_allocation_state(&used);

        for key in self.chunk_graph.keys().collect::<Vec<_>>() {
            let chunk = self.chunk_graph.chunk_mut(key);
            if chunk.id.is_none() {
                chunk.id = Some(unused.pop().unwrap_or_else(|| {
                    let fresh = next_free;
                    next_free += 1;
                    fresh
                }));
            }
            if chunk.ids.is_none() {
                chunk.ids = chunk.id.map(|id| vec![id]);
            }
        }
    }
}
