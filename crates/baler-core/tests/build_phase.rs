//! Build-phase behavior: deduplication, caching, rebuilds and error
//! routing, before any sealing happens.

use std::sync::atomic::Ordering;

use baler_core::module::TimestampMap;
use baler_core::test_utils::{
    TestDependency, TestModule, dep, harness, harness_with_cache, harness_with_options,
};
use baler_core::{
    CachedModule, CompilationCache, CompilerOptions, DependencyCategory, Diagnostic,
    DiagnosticKind, Error, Severity,
};

fn entry(request: &str) -> baler_core::BoxDependency {
    TestDependency::entry(request).into_box()
}

#[tokio::test]
async fn test_missing_factory_is_fatal() {
    let (_factory, mut compilation) = harness();
    let dependency = TestDependency::new("./a")
        .with_category(DependencyCategory("wasm"))
        .into_box();

    let error = compilation
        .add_entry(None, dependency, "main")
        .await
        .unwrap_err();
    assert!(matches!(error, Error::FactoryLookup(_)));
    // The reserved entry slot is rolled back.
    assert!(compilation.entries.is_empty());
}

#[tokio::test]
async fn test_entry_factory_failure_without_bail_is_recorded() {
    let (factory, mut compilation) = harness();
    factory.fail("./gone", "no such file");

    compilation.add_entry(None, entry("./gone"), "main").await.unwrap();

    assert!(compilation.entries.is_empty());
    assert_eq!(compilation.errors.len(), 1);
    assert_eq!(compilation.errors[0].kind, DiagnosticKind::EntryModuleNotFound);
    // The compilation continues without the entry.
    compilation.finish();
    compilation.seal().await.unwrap();
    assert_eq!(compilation.chunk_graph.len(), 0);
}

#[tokio::test]
async fn test_factory_returning_nothing_drops_dependency() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![dep("./virtual")]),
    );
    factory.ignore("./virtual");

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();

    assert_eq!(compilation.module_graph.len(), 1);
    assert!(compilation.errors.is_empty());
    assert!(compilation.warnings.is_empty());
}

#[tokio::test]
async fn test_build_findings_are_stamped_and_routed() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a")
            .with_build_error(Diagnostic::error(DiagnosticKind::ModuleBuild, "bad syntax"))
            .with_build_warning(Diagnostic::warning(
                DiagnosticKind::ModuleBuild,
                "deprecated import",
            )),
    );

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();

    assert_eq!(compilation.errors.len(), 1);
    assert_eq!(compilation.errors[0].module.as_deref(), Some("./a"));
    assert_eq!(compilation.warnings.len(), 1);
    assert_eq!(compilation.warnings[0].severity, Severity::Warning);
}

#[tokio::test]
async fn test_optional_build_errors_become_warnings() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a")
            .with_dependencies(vec![TestDependency::new("./flaky").optional().into_box()]),
    );
    factory.register(
        "./flaky",
        TestModule::new("./flaky").failing("parse exploded"),
    );

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();

    assert!(compilation.errors.is_empty());
    assert_eq!(compilation.warnings.len(), 1);
    assert_eq!(compilation.warnings[0].kind, DiagnosticKind::ModuleBuild);
}

#[tokio::test]
async fn test_cache_restore_skips_build_and_replays_findings() {
    let mut cache = CompilationCache::new();
    let cached = TestModule::new("./a").rebuild_needed(false);
    let cached_builds = cached.build_counter();
    cache.store_module(
        "m./a",
        CachedModule {
            module: Box::new(cached),
            errors: Vec::new(),
            warnings: vec![Diagnostic::warning(
                DiagnosticKind::ModuleBuild,
                "stale import",
            )],
        },
    );

    let (factory, mut compilation) =
        harness_with_cache(cache, TimestampMap::default(), TimestampMap::default());
    let fresh = TestModule::new("./a");
    let fresh_builds = fresh.build_counter();
    factory.register("./a", fresh);

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();

    // The factory ran, but the cached instance won: nothing was built
    // and the stored warning is replayed.
    assert_eq!(factory.call_count(), 1);
    assert_eq!(cached_builds.load(Ordering::Relaxed), 0);
    assert_eq!(fresh_builds.load(Ordering::Relaxed), 0);
    assert_eq!(compilation.warnings.len(), 1);
    let a = compilation.module_graph.module_by_identifier("./a").unwrap();
    assert!(compilation.module_graph.node(a).built);
}

#[tokio::test]
async fn test_stale_cache_entry_falls_through_to_build() {
    let mut cache = CompilationCache::new();
    cache.store_module(
        "m./a",
        CachedModule {
            module: Box::new(TestModule::new("./a").rebuild_needed(true)),
            errors: Vec::new(),
            warnings: Vec::new(),
        },
    );

    let (factory, mut compilation) =
        harness_with_cache(cache, TimestampMap::default(), TimestampMap::default());
    let fresh = TestModule::new("./a");
    let fresh_builds = fresh.build_counter();
    factory.register("./a", fresh);

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();

    assert_eq!(fresh_builds.load(Ordering::Relaxed), 1);
    assert!(compilation.warnings.is_empty());
}

#[tokio::test]
async fn test_into_cache_returns_built_modules() {
    let mut cache = CompilationCache::new();
    // Seed so the compilation tracks cache names for inserted modules.
    cache.store_module(
        "m./never",
        CachedModule {
            module: Box::new(TestModule::new("./never")),
            errors: Vec::new(),
            warnings: Vec::new(),
        },
    );
    let (factory, mut compilation) =
        harness_with_cache(cache, TimestampMap::default(), TimestampMap::default());
    factory.register("./a", TestModule::new("./a"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    let cache = compilation.into_cache().unwrap();
    assert!(cache.module_count() >= 1);
}

#[tokio::test]
async fn test_process_module_dependencies_twice_is_noop() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![dep("./b")]),
    );
    factory.register("./b", TestModule::new("./b"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    let a = compilation.module_graph.module_by_identifier("./a").unwrap();
    let b = compilation.module_graph.module_by_identifier("./b").unwrap();
    assert_eq!(compilation.module_graph.node(b).reasons.len(), 1);

    compilation.process_module_dependencies(a).await.unwrap();
    compilation.process_module_dependencies(a).await.unwrap();

    assert_eq!(compilation.module_graph.len(), 2);
    assert_eq!(compilation.module_graph.node(b).reasons.len(), 1);
}

#[tokio::test]
async fn test_rebuild_module_retires_old_reasons() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a")
            .with_dependencies(vec![dep("./b")])
            .refresh_dependencies(),
    );
    factory.register("./b", TestModule::new("./b"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    let a = compilation.module_graph.module_by_identifier("./a").unwrap();
    let b = compilation.module_graph.module_by_identifier("./b").unwrap();
    assert_eq!(compilation.module_graph.node(b).reasons.len(), 1);

    compilation.rebuild_module(a).await.unwrap();

    // The fresh dependency instance carries the reason now; the old one
    // is gone.
    let reasons = &compilation.module_graph.node(b).reasons;
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].origin, Some(a));
    assert_eq!(compilation.module_graph.len(), 2);
}

#[tokio::test]
async fn test_wait_for_building_finished_resolves_when_idle() {
    let (factory, mut compilation) = harness();
    factory.register("./a", TestModule::new("./a"));
    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    let a = compilation.module_graph.module_by_identifier("./a").unwrap();

    // No build in flight: resolves on the next tick as "already done".
    compilation.wait_for_building_finished(a).await.unwrap();
}

#[tokio::test]
async fn test_prefetch_builds_without_entry_slot() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./warm",
        TestModule::new("./warm").with_dependencies(vec![dep("./dep")]),
    );
    factory.register("./dep", TestModule::new("./dep"));

    compilation
        .prefetch(None, dep("./warm"))
        .await
        .unwrap();

    assert_eq!(compilation.module_graph.len(), 2);
    assert!(compilation.entries.is_empty());
    assert!(compilation.entrypoints.is_empty());
}

#[tokio::test]
async fn test_wide_fanout_under_small_parallelism() {
    let (factory, mut compilation) =
        harness_with_options(CompilerOptions::default().with_parallelism(2));
    let requests: Vec<String> = (0..16).map(|i| format!("./m{i}")).collect();
    factory.register(
        "./a",
        TestModule::new("./a")
            .with_dependencies(requests.iter().map(|request| dep(request)).collect()),
    );
    for request in &requests {
        factory.register(request, TestModule::new(request.clone()));
    }

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    assert_eq!(compilation.module_graph.len(), 17);
    assert!(compilation.errors.is_empty());
}

#[tokio::test]
async fn test_dependency_findings_surface_in_finish() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![
            TestDependency::new("./b")
                .with_warning("unused specifier")
                .into_box(),
        ]),
    );
    factory.register("./b", TestModule::new("./b"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    assert!(compilation.warnings.is_empty());
    compilation.finish();

    assert_eq!(compilation.warnings.len(), 1);
    let warning = &compilation.warnings[0];
    assert_eq!(warning.kind, DiagnosticKind::ModuleDependency);
    assert_eq!(warning.module.as_deref(), Some("./a"));
}

#[tokio::test]
async fn test_profiling_records_timings() {
    let (factory, mut compilation) =
        harness_with_options(CompilerOptions::default().with_profile(true));
    factory.register("./a", TestModule::new("./a"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    let a = compilation.module_graph.module_by_identifier("./a").unwrap();
    assert!(compilation.module_graph.node(a).profile.is_some());
}
