//! The module contract and the injected collaborator interfaces.
//!
//! The compilation never parses or resolves anything itself: module
//! factories turn dependencies into [`Module`] instances, and modules
//! build themselves against the injected resolver and input filesystem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::config::{CompilerOptions, OutputOptions, ResolveOptions};
use crate::dependency::{BoxDependency, DependencyBlock, ModuleVariable};
use crate::diagnostics::Diagnostic;
use crate::hashing::CompilationHasher;
use crate::source::BoxSource;
use crate::{Error, Result};

/// Path to last-modification time in milliseconds.
pub type TimestampMap = FxHashMap<PathBuf, u64>;

/// Everything a module build may touch. Owned so the build can run on a
/// worker task while the compilation keeps driving.
#[derive(Clone)]
pub struct BuildContext {
    pub options: Arc<CompilerOptions>,
    pub resolver: Arc<dyn Resolver>,
    pub input_file_system: Arc<dyn InputFileSystem>,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext").finish_non_exhaustive()
    }
}

/// Errors and warnings a build accumulated.
///
/// The coordinator stamps these with the originating module and
/// dependency location before distributing them to the compilation.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

/// A built compilation unit.
///
/// Instances are created by a [`ModuleFactory`], inserted into the module
/// graph once, mutated during build and during seal, and never destroyed
/// while the compilation lives.
#[async_trait]
pub trait Module: Send + Sync + fmt::Debug {
    /// Stable identity; unique across the compilation.
    fn identifier(&self) -> &str;

    /// The directory requests from this module resolve against.
    fn context(&self) -> Option<&Path> {
        None
    }

    fn resolve_options(&self) -> Option<Arc<ResolveOptions>> {
        None
    }

    /// Parse and transform the module's source, populating dependencies,
    /// blocks and variables.
    async fn build(&mut self, context: BuildContext) -> Result<BuildOutcome>;

    /// Discard build state so the module can be rebuilt from scratch.
    fn unbuild(&mut self) {}

    /// Clear seal-phase artifacts; the module itself survives unseal.
    fn unseal(&mut self) {}

    /// Clear transient graph edges on a cache-restored instance.
    fn disconnect(&mut self) {}

    /// Whether a cached instance is stale against the given timestamps.
    fn need_rebuild(&self, _file_timestamps: &TimestampMap, _context_timestamps: &TimestampMap) -> bool {
        true
    }

    /// Direct dependencies, in source order until the coordinator sorts
    /// them.
    fn dependencies(&self) -> &[BoxDependency];

    fn dependencies_mut(&mut self) -> &mut Vec<BoxDependency>;

    /// Nested asynchronous split points.
    fn blocks(&self) -> &[Arc<DependencyBlock>] {
        &[]
    }

    /// Injected variables, each with its own dependency list.
    fn variables(&self) -> &[ModuleVariable] {
        &[]
    }

    fn file_dependencies(&self) -> &[PathBuf] {
        &[]
    }

    fn context_dependencies(&self) -> &[PathBuf] {
        &[]
    }

    /// Extra named assets this module wants emitted.
    fn module_assets(&self) -> &[(String, BoxSource)] {
        &[]
    }

    fn update_hash(&self, hasher: &mut CompilationHasher);

    /// Rendered form, consumed by templates.
    fn source(&self) -> Option<BoxSource> {
        None
    }

    /// A name usable for chunk naming heuristics.
    fn name_for_condition(&self) -> Option<String> {
        None
    }

    /// Bring internal collections into deterministic order; `with_id` is
    /// set once module ids have been assigned.
    fn sort_items(&mut self, _with_id: bool) {}
}

pub type BoxModule = Box<dyn Module>;

/// Inputs for one factory call; one call covers a whole group of
/// dependencies that point at the same resource.
#[derive(Debug)]
pub struct ModuleFactoryContext {
    /// Identifier of the module that issued the request.
    pub issuer: Option<String>,
    /// Name of the owning compiler, for nested compilers.
    pub compiler: Option<String>,
    pub resolve_options: Option<Arc<ResolveOptions>>,
    pub context: Option<PathBuf>,
    pub dependencies: Vec<BoxDependency>,
}

/// Turns dependencies into modules.
///
/// Returning `Ok(None)` silently drops the dependency - no module, no
/// diagnostic.
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    async fn create(&self, context: ModuleFactoryContext) -> Result<Option<BoxModule>>;
}

/// Resolves a request string against a directory.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, context: &Path, request: &str) -> Result<PathBuf>;
}

/// Produces resolvers for given resolve options.
pub trait ResolverFactory: Send + Sync {
    fn resolver(&self, options: &ResolveOptions) -> Arc<dyn Resolver>;
}

/// Read access to input sources.
#[async_trait]
pub trait InputFileSystem: Send + Sync {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// The owning compiler, as seen from a compilation.
pub trait Compiler: Send + Sync {
    fn name(&self) -> Option<&str> {
        None
    }

    fn options(&self) -> Arc<CompilerOptions>;

    fn resolver_factory(&self) -> Arc<dyn ResolverFactory>;

    fn input_file_system(&self) -> Arc<dyn InputFileSystem>;

    /// Spawn a compiler for a child compilation.
    fn create_child_compiler(
        &self,
        _name: &str,
        _index: usize,
        _output_options: OutputOptions,
    ) -> Result<Box<dyn Compiler>> {
        Err(Error::Unsupported("child compilers"))
    }
}
