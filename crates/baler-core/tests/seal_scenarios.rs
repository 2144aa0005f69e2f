//! End-to-end compilation scenarios: entries in, sealed assets out.

use baler_core::test_utils::{TestDependency, TestModule, dep, harness, harness_with_options};
use baler_core::{CompilerOptions, DiagnosticKind, Error, ModuleId, OutputOptions, Severity};

fn entry(request: &str) -> baler_core::BoxDependency {
    TestDependency::entry(request).into_box()
}

fn module_id(compilation: &baler_core::Compilation, identifier: &str) -> ModuleId {
    compilation
        .module_graph
        .module_by_identifier(identifier)
        .unwrap_or_else(|| panic!("module {identifier} should exist"))
}

#[tokio::test]
async fn test_single_module_entry() {
    let (factory, mut compilation) = harness();
    factory.register("./a", TestModule::new("./a"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(compilation.module_graph.len(), 1);
    let a = module_id(&compilation, "./a");
    assert_eq!(compilation.module_graph.node(a).id, Some(0));

    assert_eq!(compilation.chunk_graph.len(), 1);
    let main = compilation.chunk_graph.named_chunk("main").unwrap();
    let chunk = compilation.chunk_graph.chunk(main);
    assert_eq!(chunk.entry_module, Some(a));
    assert_eq!(chunk.id, Some(0));
    assert_eq!(chunk.ids.as_deref(), Some(&[0][..]));

    // One asset, named per the `[name].js` filename template.
    assert_eq!(compilation.asset_count(), 1);
    assert!(compilation.asset("main.js").is_some());
    assert!(compilation.hash.is_some());
    compilation.check_constraints().unwrap();
}

#[tokio::test]
async fn test_linear_chain_indices_and_depths() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![dep("./b")]),
    );
    factory.register(
        "./b",
        TestModule::new("./b").with_dependencies(vec![dep("./c")]),
    );
    factory.register("./c", TestModule::new("./c"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(compilation.module_graph.len(), 3);
    for (identifier, index, depth) in [("./a", 0, 0), ("./b", 1, 1), ("./c", 2, 2)] {
        let node = compilation.module_graph.node(module_id(&compilation, identifier));
        assert_eq!(node.index, Some(index), "{identifier} index");
        assert_eq!(node.depth, Some(depth), "{identifier} depth");
        assert!(node.index2.is_some(), "{identifier} index2");
    }

    // All three share the single entry chunk.
    assert_eq!(compilation.chunk_graph.len(), 1);
    let main = compilation.chunk_graph.named_chunk("main").unwrap();
    assert_eq!(compilation.chunk_graph.chunk(main).modules.len(), 3);
}

#[tokio::test]
async fn test_diamond_deduplicates_shared_module() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![dep("./b"), dep("./c")]),
    );
    factory.register(
        "./b",
        TestModule::new("./b").with_dependencies(vec![dep("./d")]),
    );
    factory.register(
        "./c",
        TestModule::new("./c").with_dependencies(vec![dep("./d")]),
    );
    let d_blueprint = TestModule::new("./d");
    let d_builds = d_blueprint.build_counter();
    factory.register("./d", d_blueprint);

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(compilation.module_graph.len(), 4);
    assert_eq!(compilation.chunk_graph.len(), 1);
    assert_eq!(d_builds.load(std::sync::atomic::Ordering::Relaxed), 1);

    let d = module_id(&compilation, "./d");
    let node = compilation.module_graph.node(d);
    assert_eq!(node.depth, Some(2));
    // Exactly one reason from each of b and c.
    let b = module_id(&compilation, "./b");
    let c = module_id(&compilation, "./c");
    let origins: Vec<_> = node.reasons.iter().map(|reason| reason.origin).collect();
    assert_eq!(node.reasons.len(), 2);
    assert!(origins.contains(&Some(b)));
    assert!(origins.contains(&Some(c)));
}

#[tokio::test]
async fn test_async_split_creates_named_chunk() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a")
            .with_dependencies(vec![dep("./b")])
            .with_async_block("x", &["./c"]),
    );
    factory.register("./b", TestModule::new("./b"));
    factory.register(
        "./c",
        TestModule::new("./c").with_dependencies(vec![dep("./d")]),
    );
    factory.register("./d", TestModule::new("./d"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(compilation.chunk_graph.len(), 2);
    let main = compilation.chunk_graph.named_chunk("main").unwrap();
    let split = compilation.chunk_graph.named_chunk("x").unwrap();

    let a = module_id(&compilation, "./a");
    let b = module_id(&compilation, "./b");
    let c = module_id(&compilation, "./c");
    let d = module_id(&compilation, "./d");

    let main_chunk = compilation.chunk_graph.chunk(main);
    let split_chunk = compilation.chunk_graph.chunk(split);
    assert!(main_chunk.modules.contains(a));
    assert!(main_chunk.modules.contains(b));
    assert!(!main_chunk.modules.contains(c));
    assert!(split_chunk.modules.contains(c));
    assert!(split_chunk.modules.contains(d));
    assert!(!split_chunk.modules.contains(b));

    assert_eq!(split_chunk.parents.as_slice(), &[main]);
    assert!(main_chunk.children.contains(split));
    assert!(!split_chunk.is_initial());
    assert!(!split_chunk.has_runtime());

    // Two assets: the runtime chunk and the on-demand chunk.
    assert_eq!(compilation.asset_count(), 2);
    assert!(compilation.asset("main.js").is_some());
}

#[tokio::test]
async fn test_shared_async_availability_pruning() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a")
            .with_dependencies(vec![dep("./b")])
            .with_async_block("x", &["./b", "./e"]),
    );
    factory.register("./b", TestModule::new("./b"));
    factory.register("./e", TestModule::new("./e"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    let split = compilation.chunk_graph.named_chunk("x").unwrap();
    let split_chunk = compilation.chunk_graph.chunk(split);
    let b = module_id(&compilation, "./b");
    let e = module_id(&compilation, "./e");

    // b is already available to every consumer of "x" through the
    // parent chunk, so "x" only delivers e.
    assert!(!split_chunk.modules.contains(b));
    assert!(split_chunk.modules.contains(e));
    assert_eq!(split_chunk.modules.len(), 1);

    let main = compilation.chunk_graph.named_chunk("main").unwrap();
    assert!(compilation.module_graph.node(b).chunks.contains(main));
    assert!(!compilation.module_graph.node(b).chunks.contains(split));
}

#[tokio::test]
async fn test_optional_dependency_failure_is_a_warning() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a")
            .with_dependencies(vec![TestDependency::new("./missing").optional().into_box()]),
    );
    factory.fail("./missing", "cannot resolve './missing'");

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert!(compilation.errors.is_empty());
    assert_eq!(compilation.warnings.len(), 1);
    let warning = &compilation.warnings[0];
    assert_eq!(warning.kind, DiagnosticKind::ModuleNotFound);
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.module.as_deref(), Some("./a"));

    // The module stays, and its chunk is untouched.
    assert_eq!(compilation.module_graph.len(), 1);
    assert_eq!(compilation.chunk_graph.len(), 1);
}

#[tokio::test]
async fn test_fatal_dependency_failure_with_bail() {
    let (factory, mut compilation) =
        harness_with_options(CompilerOptions::default().with_bail(true));
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![dep("./missing")]),
    );
    factory.fail("./missing", "cannot resolve './missing'");

    let error = compilation
        .add_entry(None, entry("./a"), "main")
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Compilation(_)));

    // Nothing was rendered; assets are untouched.
    assert_eq!(compilation.asset_count(), 0);
}

#[tokio::test]
async fn test_two_entries_two_assets() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./one",
        TestModule::new("./one").with_dependencies(vec![dep("./shared")]),
    );
    factory.register(
        "./two",
        TestModule::new("./two").with_dependencies(vec![dep("./shared")]),
    );
    factory.register("./shared", TestModule::new("./shared"));

    compilation.add_entry(None, entry("./one"), "one").await.unwrap();
    compilation.add_entry(None, entry("./two"), "two").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(compilation.entrypoints.len(), 2);
    assert_eq!(compilation.chunk_graph.len(), 2);
    assert!(compilation.asset("one.js").is_some());
    assert!(compilation.asset("two.js").is_some());

    // The shared module is built once and belongs to both chunks.
    let shared = module_id(&compilation, "./shared");
    assert_eq!(compilation.module_graph.node(shared).chunks.len(), 2);
    compilation.check_constraints().unwrap();
}

#[tokio::test]
async fn test_async_split_to_initial_chunk_folds_and_warns() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_async_block("main", &["./b"]),
    );
    factory.register("./b", TestModule::new("./b"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(
        compilation
            .warnings
            .iter()
            .filter(|warning| warning.kind == DiagnosticKind::AsyncDependencyToInitialChunk)
            .count(),
        1
    );
    // Legacy fold-in: the split lands in the requesting chunk.
    assert_eq!(compilation.chunk_graph.len(), 1);
    let main = compilation.chunk_graph.named_chunk("main").unwrap();
    let b = module_id(&compilation, "./b");
    assert!(compilation.chunk_graph.chunk(main).modules.contains(b));
}

#[tokio::test]
async fn test_asset_conflict_is_reported() {
    let (factory, mut compilation) = harness_with_options(
        CompilerOptions::default()
            .with_output(OutputOptions::default().with_filename("bundle.js")),
    );
    factory.register("./one", TestModule::new("./one"));
    factory.register("./two", TestModule::new("./two"));

    compilation.add_entry(None, entry("./one"), "one").await.unwrap();
    compilation.add_entry(None, entry("./two"), "two").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    let conflicts: Vec<_> = compilation
        .errors
        .iter()
        .filter(|error| error.kind == DiagnosticKind::AssetConflict)
        .collect();
    assert_eq!(conflicts.len(), 1);
    // The first chunk's output survives.
    assert_eq!(compilation.asset_count(), 1);
    assert!(compilation.asset("bundle.js").is_some());
}
