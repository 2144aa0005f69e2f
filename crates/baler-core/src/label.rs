//! Topological labelling of the module graph.
//!
//! `assign_index` produces two orderings in one pass - entry-time
//! `index` and exit-time `index2` - by pushing on-leave actions onto the
//! same explicit stack that drives the walk. `assign_depth` is a BFS
//! relaxation. Both are iterative (module graphs are deep enough to
//! overflow the call stack) and idempotent on re-entry, which makes
//! cycles safe.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::compilation::Compilation;
use crate::dependency::{BoxDependency, DependencyBlock, ModuleVariable};
use crate::make::walk_block;
use crate::module_graph::ModuleId;
use crate::util::WorkQueue;

enum IndexAction {
    Enter(ModuleId),
    Leave(ModuleId),
    /// Process a module's root dependency block.
    ModuleBlock(ModuleId),
    NestedBlock(Arc<DependencyBlock>),
}

impl Compilation {
    /// Assign pre-order `index` and post-order `index2` starting from a
    /// root module. Modules that already carry an index are skipped, so
    /// re-entering a cycle terminates.
    pub fn assign_index(&mut self, root: ModuleId) {
        let mut stack: WorkQueue<IndexAction> = WorkQueue::new();
        stack.push(IndexAction::Enter(root));

        while let Some(action) = stack.pop() {
            match action {
                IndexAction::Enter(module) => {
                    let next = self.next_free_module_index;
                    let node = self.module_graph.node_mut(module);
                    if node.index.is_some() {
                        continue;
                    }
                    node.index = Some(next);
                    self.next_free_module_index += 1;
                    // Leave fires after the whole subtree has been
                    // entered.
                    stack.push(IndexAction::Leave(module));
                    stack.push(IndexAction::ModuleBlock(module));
                }
                IndexAction::Leave(module) => {
                    let next = self.next_free_module_index2;
                    let node = self.module_graph.node_mut(module);
                    if node.index2.is_none() {
                        node.index2 = Some(next);
                        self.next_free_module_index2 += 1;
                    }
                }
                IndexAction::ModuleBlock(module) => {
                    let Some(instance) = self.module_graph.node(module).module() else {
                        continue;
                    };
                    let children = self.block_children(
                        instance.dependencies(),
                        instance.variables(),
                    );
                    let blocks: Vec<Arc<DependencyBlock>> = instance.blocks().to_vec();
                    push_block_items(&mut stack, children, blocks);
                }
                IndexAction::NestedBlock(block) => {
                    let children = self.block_children(&block.dependencies, &block.variables);
                    push_block_items(&mut stack, children, block.blocks.clone());
                }
            }
        }
    }

    /// Resolved targets of a block's dependencies, variables first (they
    /// behave as if inlined at the start of the dependency list), then
    /// the block's own dependencies in array order.
    fn block_children(
        &self,
        dependencies: &[BoxDependency],
        variables: &[ModuleVariable],
    ) -> Vec<ModuleId> {
        let mut children = Vec::new();
        for dependency in variables
            .iter()
            .flat_map(|variable| variable.dependencies.iter())
            .chain(dependencies.iter())
        {
            if let Some(target) = self.module_graph.module_for_dependency(dependency.id()) {
                children.push(target);
            }
        }
        children
    }

    /// Assign `depth` as the minimum edge count from the root.
    pub fn assign_depth(&mut self, root: ModuleId) {
        self.module_graph.node_mut(root).depth = Some(0);
        let mut queue: VecDeque<ModuleId> = VecDeque::new();
        queue.push_back(root);

        while let Some(module) = queue.pop_front() {
            let depth = self
                .module_graph
                .node(module)
                .depth
                .expect("queued module should have a depth");
            let next_depth = depth + 1;

            let mut targets: Vec<ModuleId> = Vec::new();
            if let Some(instance) = self.module_graph.node(module).module() {
                walk_block(
                    instance.dependencies(),
                    instance.blocks(),
                    instance.variables(),
                    &mut |dependency| {
                        if let Some(target) =
                            self.module_graph.module_for_dependency(dependency.id())
                        {
                            targets.push(target);
                        }
                    },
                );
            }
            for target in targets {
                let node = self.module_graph.node_mut(target);
                match node.depth {
                    Some(existing) if existing <= next_depth => {}
                    _ => {
                        node.depth = Some(next_depth);
                        queue.push_back(target);
                    }
                }
            }
        }
    }
}

/// Push a block's contents so the stack pops them in source order:
/// dependency children first (array order), then nested blocks (array
/// order). Both lists go on reversed because the stack is LIFO.
fn push_block_items(
    stack: &mut WorkQueue<IndexAction>,
    children: Vec<ModuleId>,
    blocks: Vec<Arc<DependencyBlock>>,
) {
    for block in blocks.into_iter().rev() {
        stack.push(IndexAction::NestedBlock(block));
    }
    for child in children.into_iter().rev() {
        stack.push(IndexAction::Enter(child));
    }
}
