//! In-memory module, factory and template implementations for tests.
//!
//! These are fast, deterministic and filesystem-free: the factory hands
//! out pre-registered module blueprints by request, modules "build" by
//! replaying a configured outcome, and the templates render a plain
//! concatenation of member module sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cache::CompilationCache;
use crate::compilation::{Compilation, CompilationHooks, CompilationParams};
use crate::config::{CompilerOptions, OutputOptions, ResolveOptions};
use crate::dependency::{
    BoxDependency, Dependency, DependencyBlock, DependencyCategory, DependencyId,
    DependencyLocation, ModuleVariable,
};
use crate::diagnostics::Diagnostic;
use crate::hashing::CompilationHasher;
use crate::module::{
    BoxModule, BuildContext, BuildOutcome, Compiler, InputFileSystem, Module, ModuleFactory,
    ModuleFactoryContext, Resolver, ResolverFactory, TimestampMap,
};
use crate::source::{BoxSource, RawSource};
use crate::template::{
    ChunkTemplate, MainTemplate, PathData, RenderManifestContext, RenderManifestEntry,
    TemplateHooks,
};
use crate::{Error, Result};

/// A request-addressed dependency.
#[derive(Debug)]
pub struct TestDependency {
    id: DependencyId,
    request: String,
    category: DependencyCategory,
    optional: bool,
    is_weak: bool,
    loc: Option<DependencyLocation>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl TestDependency {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: DependencyId::new(),
            request: request.into(),
            category: DependencyCategory::ESM,
            optional: false,
            is_weak: false,
            loc: None,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn entry(request: impl Into<String>) -> Self {
        Self {
            category: DependencyCategory::ENTRY,
            ..Self::new(request)
        }
    }

    pub fn with_category(mut self, category: DependencyCategory) -> Self {
        self.category = category;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn weak(mut self) -> Self {
        self.is_weak = true;
        self
    }

    pub fn with_loc(mut self, loc: Option<DependencyLocation>) -> Self {
        self.loc = loc;
        self
    }

    /// Report a warning after the owning module builds.
    pub fn with_warning(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(message.into());
        self
    }

    /// Report an error after the owning module builds.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.errors.push(message.into());
        self
    }

    pub fn into_box(self) -> BoxDependency {
        Arc::new(self)
    }
}

impl Dependency for TestDependency {
    fn id(&self) -> DependencyId {
        self.id
    }

    fn category(&self) -> DependencyCategory {
        self.category
    }

    fn request(&self) -> &str {
        &self.request
    }

    fn optional(&self) -> bool {
        self.optional
    }

    fn weak(&self) -> bool {
        self.is_weak
    }

    fn loc(&self) -> Option<DependencyLocation> {
        self.loc
    }

    fn get_warnings(&self) -> Vec<Diagnostic> {
        self.warnings
            .iter()
            .map(|message| {
                Diagnostic::warning(
                    crate::diagnostics::DiagnosticKind::ModuleDependency,
                    message.clone(),
                )
            })
            .collect()
    }

    fn get_errors(&self) -> Vec<Diagnostic> {
        self.errors
            .iter()
            .map(|message| {
                Diagnostic::error(
                    crate::diagnostics::DiagnosticKind::ModuleDependency,
                    message.clone(),
                )
            })
            .collect()
    }
}

/// Shorthand for a boxed [`TestDependency`].
pub fn dep(request: &str) -> BoxDependency {
    TestDependency::new(request).into_box()
}

/// A module whose build replays a configured outcome.
#[derive(Debug, Clone)]
pub struct TestModule {
    identifier: String,
    dependencies: Vec<BoxDependency>,
    blocks: Vec<Arc<DependencyBlock>>,
    variables: Vec<ModuleVariable>,
    text: String,
    assets: Vec<(String, BoxSource)>,
    files: Vec<PathBuf>,
    outcome_errors: Vec<Diagnostic>,
    outcome_warnings: Vec<Diagnostic>,
    fail_with: Option<String>,
    rebuild_needed: bool,
    refresh_dependencies: bool,
    builds: Arc<AtomicUsize>,
}

impl TestModule {
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            text: format!("/* {identifier} */"),
            identifier,
            dependencies: Vec::new(),
            blocks: Vec::new(),
            variables: Vec::new(),
            assets: Vec::new(),
            files: Vec::new(),
            outcome_errors: Vec::new(),
            outcome_warnings: Vec::new(),
            fail_with: None,
            rebuild_needed: true,
            refresh_dependencies: false,
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<BoxDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Add an async split point loading the given requests under a chunk
    /// name.
    pub fn with_async_block(mut self, chunk_name: &str, requests: &[&str]) -> Self {
        let dependencies = requests.iter().map(|request| dep(request)).collect();
        self.blocks.push(Arc::new(
            DependencyBlock::new(Some(chunk_name.to_string()), None)
                .with_dependencies(dependencies),
        ));
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Arc<DependencyBlock>>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_variables(mut self, variables: Vec<ModuleVariable>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_asset(mut self, name: &str, text: &str) -> Self {
        self.assets
            .push((name.to_string(), Arc::new(RawSource::new(text)) as BoxSource));
        self
    }

    pub fn with_file_dependency(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn with_build_error(mut self, error: Diagnostic) -> Self {
        self.outcome_errors.push(error);
        self
    }

    pub fn with_build_warning(mut self, warning: Diagnostic) -> Self {
        self.outcome_warnings.push(warning);
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    pub fn rebuild_needed(mut self, needed: bool) -> Self {
        self.rebuild_needed = needed;
        self
    }

    /// Produce fresh dependency instances on every build, the way a real
    /// parse does; required for rebuilds to retire old reasons cleanly.
    pub fn refresh_dependencies(mut self) -> Self {
        self.refresh_dependencies = true;
        self
    }

    /// How many times any clone of this blueprint has built.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn build_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.builds)
    }
}

#[async_trait]
impl Module for TestModule {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn build(&mut self, _context: BuildContext) -> Result<BuildOutcome> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = &self.fail_with {
            return Err(Error::Build(message.clone()));
        }
        if self.refresh_dependencies {
            self.dependencies = self
                .dependencies
                .iter()
                .map(|dependency| {
                    TestDependency::new(dependency.request())
                        .with_category(dependency.category())
                        .with_loc(dependency.loc())
                        .into_box()
                })
                .collect();
        }
        Ok(BuildOutcome {
            errors: self.outcome_errors.clone(),
            warnings: self.outcome_warnings.clone(),
        })
    }

    fn need_rebuild(
        &self,
        _file_timestamps: &TimestampMap,
        _context_timestamps: &TimestampMap,
    ) -> bool {
        self.rebuild_needed
    }

    fn dependencies(&self) -> &[BoxDependency] {
        &self.dependencies
    }

    fn dependencies_mut(&mut self) -> &mut Vec<BoxDependency> {
        &mut self.dependencies
    }

    fn blocks(&self) -> &[Arc<DependencyBlock>] {
        &self.blocks
    }

    fn variables(&self) -> &[ModuleVariable] {
        &self.variables
    }

    fn file_dependencies(&self) -> &[PathBuf] {
        &self.files
    }

    fn module_assets(&self) -> &[(String, BoxSource)] {
        &self.assets
    }

    fn update_hash(&self, hasher: &mut CompilationHasher) {
        hasher.update(self.identifier.as_bytes());
        hasher.update(self.text.as_bytes());
    }

    fn source(&self) -> Option<BoxSource> {
        Some(Arc::new(RawSource::new(self.text.clone())))
    }
}

/// Hands out registered module blueprints by request.
#[derive(Debug, Default)]
pub struct TestFactory {
    modules: Mutex<FxHashMap<String, TestModule>>,
    failures: Mutex<FxHashMap<String, String>>,
    dropped: Mutex<FxHashSet<String>>,
    calls: AtomicUsize,
}

impl TestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, request: &str, module: TestModule) {
        self.modules.lock().insert(request.to_string(), module);
    }

    /// Make the factory fail for a request.
    pub fn fail(&self, request: &str, message: &str) {
        self.failures
            .lock()
            .insert(request.to_string(), message.to_string());
    }

    /// Make the factory return no module for a request.
    pub fn ignore(&self, request: &str) {
        self.dropped.lock().insert(request.to_string());
    }

    /// Total factory invocations, across all requests.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ModuleFactory for TestFactory {
    async fn create(&self, context: ModuleFactoryContext) -> Result<Option<BoxModule>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let request = context.dependencies[0].request().to_string();
        if let Some(message) = self.failures.lock().get(&request) {
            return Err(Error::Factory(message.clone()));
        }
        if self.dropped.lock().contains(&request) {
            return Ok(None);
        }
        match self.modules.lock().get(&request) {
            Some(blueprint) => Ok(Some(Box::new(blueprint.clone()))),
            None => Err(Error::Factory(format!("cannot resolve '{request}'"))),
        }
    }
}

/// Resolver that joins the request onto the context directory.
#[derive(Debug, Default)]
pub struct TestResolver;

#[async_trait]
impl Resolver for TestResolver {
    async fn resolve(&self, context: &Path, request: &str) -> Result<PathBuf> {
        Ok(context.join(request))
    }
}

#[derive(Debug, Default)]
pub struct TestResolverFactory;

impl ResolverFactory for TestResolverFactory {
    fn resolver(&self, _options: &ResolveOptions) -> Arc<dyn Resolver> {
        Arc::new(TestResolver)
    }
}

/// In-memory input filesystem.
#[derive(Debug, Default)]
pub struct TestFileSystem {
    files: Mutex<FxHashMap<PathBuf, Vec<u8>>>,
}

impl TestFileSystem {
    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.into(), content.into());
    }
}

#[async_trait]
impl InputFileSystem for TestFileSystem {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        self.files.lock().get(path).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string())
        })
    }
}

fn concatenate_chunk(context: &RenderManifestContext<'_>, banner: &str) -> String {
    let mut out = String::from(banner);
    for module in context.chunk.modules.iter() {
        let node = context.module_graph.node(module);
        let id = node.id.map(|id| id.to_string()).unwrap_or_default();
        out.push_str(&format!("\n/* {id} */ "));
        if let Some(instance) = node.module() {
            if let Some(source) = instance.source() {
                out.push_str(&source.source());
            }
        }
    }
    out.push('\n');
    out
}

fn manifest_entry(
    context: &RenderManifestContext<'_>,
    banner: &str,
    filename_template: &str,
) -> RenderManifestEntry {
    let chunk = context.chunk;
    let text = concatenate_chunk(context, banner);
    let path_options = PathData {
        chunk_name: chunk.name.clone(),
        chunk_id: chunk.id,
        chunk_hash: chunk.rendered_hash.clone(),
        hash: context.hash.map(str::to_string),
        filename: None,
    };
    RenderManifestEntry {
        identifier: format!("chunk{}", chunk.debug_id),
        hash: chunk.hash.clone().unwrap_or_default(),
        filename_template: filename_template.to_string(),
        path_options,
        render: Box::new(move || Ok(Arc::new(RawSource::new(text)) as BoxSource)),
    }
}

/// Renders runtime chunks as a banner plus member module sources.
#[derive(Default)]
pub struct TestMainTemplate {
    hooks: TemplateHooks,
}

impl MainTemplate for TestMainTemplate {
    fn update_hash(&self, hasher: &mut CompilationHasher) {
        hasher.update("main-template");
    }

    fn update_hash_for_chunk(&self, hasher: &mut CompilationHasher, chunk: &crate::chunk::Chunk) {
        hasher.update("main");
        for child in chunk.children.iter() {
            hasher.update(child.as_u32().to_le_bytes());
        }
    }

    fn get_render_manifest(
        &self,
        context: &RenderManifestContext<'_>,
    ) -> Result<Vec<RenderManifestEntry>> {
        Ok(vec![manifest_entry(
            context,
            "/* runtime */",
            &context.output_options.filename,
        )])
    }

    fn hooks(&self) -> &TemplateHooks {
        &self.hooks
    }
}

/// Renders on-demand chunks.
#[derive(Default)]
pub struct TestChunkTemplate {
    hooks: TemplateHooks,
}

impl ChunkTemplate for TestChunkTemplate {
    fn update_hash(&self, hasher: &mut CompilationHasher) {
        hasher.update("chunk-template");
    }

    fn update_hash_for_chunk(&self, hasher: &mut CompilationHasher, _chunk: &crate::chunk::Chunk) {
        hasher.update("chunk");
    }

    fn get_render_manifest(
        &self,
        context: &RenderManifestContext<'_>,
    ) -> Result<Vec<RenderManifestEntry>> {
        Ok(vec![manifest_entry(
            context,
            "/* chunk */",
            &context.output_options.chunk_filename,
        )])
    }

    fn hooks(&self) -> &TemplateHooks {
        &self.hooks
    }
}

/// Trivial compiler handing out the test collaborators.
pub struct TestCompiler {
    pub options: Arc<CompilerOptions>,
}

impl TestCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

impl Compiler for TestCompiler {
    fn name(&self) -> Option<&str> {
        Some("test")
    }

    fn options(&self) -> Arc<CompilerOptions> {
        Arc::clone(&self.options)
    }

    fn resolver_factory(&self) -> Arc<dyn ResolverFactory> {
        Arc::new(TestResolverFactory)
    }

    fn input_file_system(&self) -> Arc<dyn InputFileSystem> {
        Arc::new(TestFileSystem::default())
    }

    fn create_child_compiler(
        &self,
        _name: &str,
        _index: usize,
        output_options: OutputOptions,
    ) -> Result<Box<dyn Compiler>> {
        let options = CompilerOptions::clone(&self.options).with_output(output_options);
        Ok(Box::new(TestCompiler::new(options)))
    }
}

/// Compilation params wired to the test collaborators.
pub fn test_params(options: CompilerOptions) -> CompilationParams {
    CompilationParams::new(
        Arc::new(options),
        Arc::new(TestResolverFactory),
        Arc::new(TestFileSystem::default()),
        Arc::new(TestMainTemplate::default()),
        Arc::new(TestChunkTemplate::default()),
    )
}

/// A compilation with a fresh factory registered for the entry and esm
/// categories.
pub fn harness_with_options(options: CompilerOptions) -> (Arc<TestFactory>, Compilation) {
    let factory = Arc::new(TestFactory::new());
    let params = test_params(options)
        .with_dependency_factory(DependencyCategory::ENTRY, factory.clone())
        .with_dependency_factory(DependencyCategory::ESM, factory.clone());
    (factory, Compilation::new(params))
}

pub fn harness() -> (Arc<TestFactory>, Compilation) {
    harness_with_options(CompilerOptions::default())
}

/// Harness variant with a persistent cache and timestamp maps.
pub fn harness_with_cache(
    cache: CompilationCache,
    file_timestamps: TimestampMap,
    context_timestamps: TimestampMap,
) -> (Arc<TestFactory>, Compilation) {
    let factory = Arc::new(TestFactory::new());
    let params = test_params(CompilerOptions::default())
        .with_dependency_factory(DependencyCategory::ENTRY, factory.clone())
        .with_dependency_factory(DependencyCategory::ESM, factory.clone())
        .with_cache(cache)
        .with_timestamps(file_timestamps, context_timestamps);
    (factory, Compilation::new(params))
}

/// Harness variant exposing the hook set for tapping before
/// construction.
pub fn harness_with_hooks(
    options: CompilerOptions,
    hooks: CompilationHooks,
) -> (Arc<TestFactory>, Compilation) {
    let factory = Arc::new(TestFactory::new());
    let params = test_params(options)
        .with_dependency_factory(DependencyCategory::ENTRY, factory.clone())
        .with_dependency_factory(DependencyCategory::ESM, factory.clone())
        .with_hooks(Arc::new(hooks));
    (factory, Compilation::new(params))
}
