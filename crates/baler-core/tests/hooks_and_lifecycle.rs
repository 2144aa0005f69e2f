//! Hook ordering, fixed-point loops, and the seal/unseal lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use baler_core::test_utils::{TestDependency, TestModule, dep, harness, harness_with_hooks};
use baler_core::{CompilationHooks, CompilerOptions};

fn entry(request: &str) -> baler_core::BoxDependency {
    TestDependency::entry(request).into_box()
}

#[tokio::test]
async fn test_seal_fires_phases_in_order() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = CompilationHooks::default();
    for (name, hook) in [
        ("seal", &mut hooks.seal),
        ("optimize", &mut hooks.optimize),
        ("after-optimize-chunks", &mut hooks.after_optimize_chunks),
        ("before-hash", &mut hooks.before_hash),
        ("after-hash", &mut hooks.after_hash),
        ("before-chunk-assets", &mut hooks.before_chunk_assets),
        ("additional-chunk-assets", &mut hooks.additional_chunk_assets),
    ] {
        let log = Arc::clone(&log);
        hook.tap("order-probe", move |_, _| log.lock().push(name));
    }
    {
        let log = Arc::clone(&log);
        hooks.after_seal.tap("order-probe", move |_| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push("after-seal");
                Ok(())
            })
        });
    }

    let (factory, mut compilation) = harness_with_hooks(CompilerOptions::default(), hooks);
    factory.register("./a", TestModule::new("./a"));
    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "seal",
            "optimize",
            "after-optimize-chunks",
            "before-hash",
            "after-hash",
            "before-chunk-assets",
            "additional-chunk-assets",
            "after-seal",
        ]
    );
}

#[tokio::test]
async fn test_build_module_hooks_fire_per_module() {
    let built = Arc::new(AtomicUsize::new(0));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let mut hooks = CompilationHooks::default();
    {
        let built = Arc::clone(&built);
        hooks.build_module.tap("probe", move |_, _| {
            built.fetch_add(1, Ordering::Relaxed);
        });
    }
    {
        let succeeded = Arc::clone(&succeeded);
        hooks.succeed_module.tap("probe", move |_, _| {
            succeeded.fetch_add(1, Ordering::Relaxed);
        });
    }

    let (factory, mut compilation) = harness_with_hooks(CompilerOptions::default(), hooks);
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![dep("./b")]),
    );
    factory.register("./b", TestModule::new("./b"));
    compilation.add_entry(None, entry("./a"), "main").await.unwrap();

    assert_eq!(built.load(Ordering::Relaxed), 2);
    assert_eq!(succeeded.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_failed_module_hook_fires_on_build_failure() {
    let failed = Arc::new(AtomicUsize::new(0));
    let mut hooks = CompilationHooks::default();
    {
        let failed = Arc::clone(&failed);
        hooks.failed_module.tap("probe", move |_, _| {
            failed.fetch_add(1, Ordering::Relaxed);
        });
    }

    let (factory, mut compilation) = harness_with_hooks(CompilerOptions::default(), hooks);
    factory.register("./a", TestModule::new("./a").failing("broken"));
    compilation.add_entry(None, entry("./a"), "main").await.unwrap();

    assert_eq!(failed.load(Ordering::Relaxed), 1);
    assert_eq!(compilation.errors.len(), 1);
}

#[tokio::test]
async fn test_optimization_loop_runs_to_fixed_point() {
    let rounds = Arc::new(AtomicUsize::new(0));
    let mut hooks = CompilationHooks::default();
    {
        let rounds = Arc::clone(&rounds);
        hooks.optimize_modules_basic.tap("churn", move |_, _| {
            // Report progress on the first three passes, then settle.
            if rounds.fetch_add(1, Ordering::Relaxed) < 3 {
                Some(true)
            } else {
                None
            }
        });
    }

    let (factory, mut compilation) = harness_with_hooks(CompilerOptions::default(), hooks);
    factory.register("./a", TestModule::new("./a"));
    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(rounds.load(Ordering::Relaxed), 4);
}

#[tokio::test]
async fn test_need_additional_seal_reseals_once() {
    let seals = Arc::new(AtomicUsize::new(0));
    let after_seals = Arc::new(AtomicUsize::new(0));
    let mut hooks = CompilationHooks::default();
    {
        let seals = Arc::clone(&seals);
        hooks.seal.tap("count", move |_, _| {
            seals.fetch_add(1, Ordering::Relaxed);
        });
    }
    {
        let seals = Arc::clone(&seals);
        hooks.need_additional_seal.tap("once", move |_, _| {
            // Ask for a second pass only after the first one.
            Some(seals.load(Ordering::Relaxed) == 1)
        });
    }
    {
        let after_seals = Arc::clone(&after_seals);
        hooks.after_seal.tap("count", move |_| {
            let after_seals = Arc::clone(&after_seals);
            Box::pin(async move {
                after_seals.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        });
    }

    let (factory, mut compilation) = harness_with_hooks(CompilerOptions::default(), hooks);
    factory.register("./a", TestModule::new("./a"));
    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(seals.load(Ordering::Relaxed), 2);
    assert_eq!(after_seals.load(Ordering::Relaxed), 1);
    // The second pass produced a working chunk graph again.
    assert_eq!(compilation.chunk_graph.len(), 1);
    assert_eq!(compilation.asset_count(), 1);
}

#[tokio::test]
async fn test_should_generate_chunk_assets_can_veto() {
    let mut hooks = CompilationHooks::default();
    hooks
        .should_generate_chunk_assets
        .tap("veto", |_, _| Some(false));

    let (factory, mut compilation) = harness_with_hooks(CompilerOptions::default(), hooks);
    factory.register("./a", TestModule::new("./a"));
    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(compilation.asset_count(), 0);
    // Hashing still ran.
    assert!(compilation.hash.is_some());
}

#[tokio::test]
async fn test_seal_unseal_seal_is_hash_stable() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![dep("./b")]),
    );
    factory.register("./b", TestModule::new("./b"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();
    let first_hash = compilation.full_hash.clone().unwrap();
    let first_asset = compilation
        .asset("main.js")
        .map(|source| source.source().into_owned())
        .unwrap();

    compilation.unseal();
    assert_eq!(compilation.chunk_graph.len(), 0);
    assert_eq!(compilation.asset_count(), 0);

    compilation.seal().await.unwrap();
    assert_eq!(compilation.full_hash.clone().unwrap(), first_hash);
    let second_asset = compilation
        .asset("main.js")
        .map(|source| source.source().into_owned())
        .unwrap();
    assert_eq!(first_asset, second_asset);
}

#[tokio::test]
async fn test_hash_determinism_across_compilations() {
    async fn build() -> String {
        let (factory, mut compilation) = harness();
        factory.register(
            "./a",
            TestModule::new("./a")
                .with_dependencies(vec![dep("./b")])
                .with_async_block("x", &["./c"]),
        );
        factory.register("./b", TestModule::new("./b"));
        factory.register("./c", TestModule::new("./c"));
        compilation.add_entry(None, entry("./a"), "main").await.unwrap();
        compilation.finish();
        compilation.seal().await.unwrap();
        compilation.full_hash.unwrap()
    }

    assert_eq!(build().await, build().await);
}

#[tokio::test]
async fn test_removing_and_restoring_a_reason_restores_membership() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_dependencies(vec![dep("./b")]),
    );
    factory.register("./b", TestModule::new("./b"));

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    let a = compilation.module_graph.module_by_identifier("./a").unwrap();
    let b = compilation.module_graph.module_by_identifier("./b").unwrap();
    let main = compilation.chunk_graph.named_chunk("main").unwrap();
    assert!(compilation.chunk_graph.chunk(main).modules.contains(b));

    let dependency = compilation.module_graph.node(b).reasons[0].dependency;
    compilation.module_graph.node_mut(b).remove_reason(Some(a), dependency);
    compilation.patch_chunks_after_reason_removal(b);
    assert!(!compilation.chunk_graph.chunk(main).modules.contains(b));

    // Restore the reason and re-seal: membership comes back.
    compilation.module_graph.node_mut(b).add_reason(Some(a), dependency);
    compilation.unseal();
    compilation.seal().await.unwrap();
    let main = compilation.chunk_graph.named_chunk("main").unwrap();
    assert!(compilation
        .chunk_graph
        .chunk(main)
        .modules
        .contains(compilation.module_graph.module_by_identifier("./b").unwrap()));
}

#[tokio::test]
async fn test_summarize_dependencies_collects_sorted_paths() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a")
            .with_dependencies(vec![dep("./b")])
            .with_file_dependency("src/z.js")
            .with_file_dependency("src/a.js"),
    );
    factory.register(
        "./b",
        TestModule::new("./b").with_file_dependency("src/a.js"),
    );

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert_eq!(
        compilation.file_dependencies,
        vec![
            std::path::PathBuf::from("src/a.js"),
            std::path::PathBuf::from("src/z.js"),
        ]
    );
}

#[tokio::test]
async fn test_module_assets_are_emitted() {
    let (factory, mut compilation) = harness();
    factory.register(
        "./a",
        TestModule::new("./a").with_asset("logo.svg", "<svg/>"),
    );

    compilation.add_entry(None, entry("./a"), "main").await.unwrap();
    compilation.finish();
    compilation.seal().await.unwrap();

    assert!(compilation.asset("logo.svg").is_some());
    assert_eq!(compilation.asset_count(), 2);
}
