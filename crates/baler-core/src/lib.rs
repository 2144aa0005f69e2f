#![cfg_attr(docsrs, feature(doc_cfg))]

//! # baler-core
//!
//! The compilation core of the baler bundler: starting from entry
//! dependencies it builds a module graph through pluggable module
//! factories, partitions the graph into output chunks, assigns stable
//! identifiers and content hashes, and renders the chunks into named
//! assets.
//!
//! The crate is a library with an injected boundary: parsers, resolvers,
//! filesystems, dependency subtypes and rendering templates are consumed
//! through the traits in [`module`], [`dependency`] and [`template`].
//!
//! ## Quick start
//!
//! ```no_run
//! use baler_core::{Compilation, CompilationParams};
//! # async fn example(params: CompilationParams) -> baler_core::Result<()> {
//! let mut compilation = Compilation::new(params);
//! # let entry = todo!();
//! compilation.add_entry(None, entry, "main").await?;
//! compilation.finish();
//! compilation.seal().await?;
//! for (file, source) in compilation.assets() {
//!     println!("{file}: {} bytes", source.size());
//! }
//! # Ok(()) }
//! ```

pub mod cache;
pub mod chunk;
pub mod compilation;
pub mod config;
pub mod dependency;
pub mod diagnostics;
pub mod hashing;
pub mod module;
pub mod module_graph;
pub mod source;
pub mod template;
pub mod util;

mod assets;
mod build_chunk_graph;
mod ids;
mod label;
mod make;
mod seal;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod test_utils;

pub use cache::{CachedAsset, CachedModule, CompilationCache};
pub use chunk::{Chunk, ChunkGraph, ChunkKey, ChunkOrigin, Entrypoint};
pub use compilation::{Compilation, CompilationHooks, CompilationParams};
pub use config::{CompilerOptions, OutputOptions, ResolveOptions};
pub use dependency::{
    BlockId, BoxDependency, Dependency, DependencyBlock, DependencyCategory, DependencyId,
    DependencyLocation, DependencyReference, ModuleVariable, SourcePosition, compare_dependencies,
};
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use hashing::{CompilationHasher, HashDigest, HashFunction};
pub use module::{
    BoxModule, BuildContext, BuildOutcome, Compiler, InputFileSystem, Module, ModuleFactory,
    ModuleFactoryContext, Resolver, ResolverFactory, TimestampMap,
};
pub use module_graph::{
    ModuleGraph, ModuleId, ModuleInsertion, ModuleNode, ModuleProfile, ModuleReason,
};
pub use source::{BoxSource, CachedSource, RawSource, Source};
pub use template::{
    ChunkTemplate, DependencyTemplate, MainTemplate, ModuleTemplate, PathData,
    RenderManifestContext, RenderManifestEntry, TemplateHooks,
};
pub use util::semaphore::{Permit, Semaphore};

use dependency::DependencyCategory as Category;

/// Error types for baler-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No module factory registered for a dependency category. Always
    /// fatal; raised before the async pipeline starts.
    #[error("no module factory registered for dependency category `{0}`")]
    FactoryLookup(Category),

    /// A module factory failed with an unstructured message.
    #[error("module factory failed: {0}")]
    Factory(String),

    /// A module build failed with an unstructured message.
    #[error("build failed: {0}")]
    Build(String),

    /// The resolver could not resolve a request.
    #[error("failed to resolve `{request}`: {reason}")]
    Resolve { request: String, reason: String },

    /// A diagnostic escalated to a fatal error (`bail` mode).
    #[error("{0}")]
    Compilation(diagnostics::Diagnostic),

    /// A fixed-point optimization loop failed to converge.
    #[error("`{phase}` optimization loop did not reach a fixed point after {iterations} iterations")]
    OptimizationLoop {
        phase: &'static str,
        iterations: usize,
    },

    /// The configured hash function name is not supported.
    #[error("hash function `{0}` is not supported")]
    UnsupportedHashFunction(String),

    /// A post-seal consistency check failed.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A build worker task disappeared without reporting a result.
    #[error("build task channel closed unexpectedly")]
    TaskChannelClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not supported by this collaborator.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

/// Result type alias for baler-core operations.
pub type Result<T> = std::result::Result<T, Error>;
