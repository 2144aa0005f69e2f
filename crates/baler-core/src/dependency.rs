//! Typed references between modules.
//!
//! A [`Dependency`] is a reference from one module (or block) to another,
//! created by the parser that built the module and resolved by a module
//! factory looked up through the dependency's [`DependencyCategory`].
//! Dependencies nest inside [`DependencyBlock`]s; a nested block is an
//! asynchronous split point and may name the chunk it wants to load.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostic;
use crate::module_graph::ModuleId;

/// Process-unique dependency identity.
///
/// Graph-side state (the resolved target, the reasons it created) is
/// keyed by this id so the dependency object itself stays immutable and
/// shareable across build tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId(u32);

static NEXT_DEPENDENCY_ID: AtomicU32 = AtomicU32::new(0);

impl DependencyId {
    /// Allocate a fresh id.
    pub fn new() -> Self {
        Self(NEXT_DEPENDENCY_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Default for DependencyId {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-unique identity of a [`DependencyBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

static NEXT_BLOCK_ID: AtomicU32 = AtomicU32::new(0);

impl BlockId {
    pub fn new() -> Self {
        Self(NEXT_BLOCK_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

/// Discriminant used to look up the module factory for a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyCategory(pub &'static str);

impl DependencyCategory {
    pub const ENTRY: Self = Self("entry");
    pub const ESM: Self = Self("esm");
    pub const COMMONJS: Self = Self("commonjs");

    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for DependencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A position in a source file, 1-based line and 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Source span a dependency was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyLocation {
    pub start: SourcePosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<SourcePosition>,
}

impl DependencyLocation {
    pub fn new(start: SourcePosition, end: Option<SourcePosition>) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for DependencyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start.line, self.start.column)?;
        if let Some(end) = &self.end {
            write!(f, "-{}:{}", end.line, end.column)?;
        }
        Ok(())
    }
}

/// What a dependency contributes to the chunk graph.
///
/// `None` from [`Dependency::get_reference`] means the dependency is not
/// materialised as an edge at all. A reference may also point at a module
/// other than the resolved one, for reference-only edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyReference {
    pub module: Option<ModuleId>,
    pub weak: bool,
}

/// A typed reference from one module (or block) to another.
pub trait Dependency: Send + Sync + fmt::Debug {
    /// Stable identity of this dependency within the process.
    fn id(&self) -> DependencyId;

    /// Factory-lookup discriminant.
    fn category(&self) -> DependencyCategory;

    /// The raw request string, as written in the source.
    fn request(&self) -> &str;

    /// Optional dependencies downgrade factory and build errors to
    /// warnings.
    fn optional(&self) -> bool {
        false
    }

    /// Weak dependencies never pull their target into a chunk.
    fn weak(&self) -> bool {
        false
    }

    fn loc(&self) -> Option<DependencyLocation> {
        None
    }

    /// The edge this dependency contributes, given its resolved target.
    fn get_reference(&self, resolved: Option<ModuleId>) -> Option<DependencyReference> {
        Some(DependencyReference {
            module: resolved,
            weak: self.weak(),
        })
    }

    /// Whether two dependencies point at the same resource and can share
    /// one factory call.
    fn is_equal_resource(&self, other: &dyn Dependency) -> bool {
        self.category() == other.category() && self.request() == other.request()
    }

    /// Errors found after the owning module was built.
    fn get_errors(&self) -> Vec<Diagnostic> {
        Vec::new()
    }

    /// Warnings found after the owning module was built.
    fn get_warnings(&self) -> Vec<Diagnostic> {
        Vec::new()
    }
}

/// Shared handle to a dependency; cheap to clone into factory tasks.
pub type BoxDependency = Arc<dyn Dependency>;

/// Total order over dependencies: by source location, then request.
///
/// Every module's dependency list is brought into this order after the
/// module builds, before downstream phases observe it.
pub fn compare_dependencies(a: &dyn Dependency, b: &dyn Dependency) -> Ordering {
    match (a.loc(), b.loc()) {
        (Some(left), Some(right)) => left
            .cmp(&right)
            .then_with(|| a.request().cmp(b.request()))
            .then_with(|| a.id().cmp(&b.id())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a
            .request()
            .cmp(b.request())
            .then_with(|| a.id().cmp(&b.id())),
    }
}

/// An injected variable carrying its own dependency list.
///
/// During traversal a variable's dependencies behave as if inlined at the
/// start of the owning block's dependency list.
#[derive(Debug, Clone)]
pub struct ModuleVariable {
    pub name: String,
    pub expression: String,
    pub dependencies: Vec<BoxDependency>,
}

impl ModuleVariable {
    pub fn new(
        name: impl Into<String>,
        expression: impl Into<String>,
        dependencies: Vec<BoxDependency>,
    ) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            dependencies,
        }
    }
}

/// A recursive grouping of dependencies inside a module.
///
/// Modules own a root block (their plain `dependencies`, `variables` and
/// `blocks` accessors); each nested block is an asynchronous split point
/// that may name the chunk it wants its subtree loaded from.
#[derive(Debug)]
pub struct DependencyBlock {
    id: BlockId,
    pub chunk_name: Option<String>,
    pub loc: Option<DependencyLocation>,
    pub dependencies: Vec<BoxDependency>,
    pub variables: Vec<ModuleVariable>,
    pub blocks: Vec<Arc<DependencyBlock>>,
}

impl DependencyBlock {
    pub fn new(chunk_name: Option<String>, loc: Option<DependencyLocation>) -> Self {
        Self {
            id: BlockId::new(),
            chunk_name,
            loc,
            dependencies: Vec::new(),
            variables: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn with_dependencies(mut self, dependencies: Vec<BoxDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_variables(mut self, variables: Vec<ModuleVariable>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Arc<DependencyBlock>>) -> Self {
        self.blocks = blocks;
        self
    }
}
