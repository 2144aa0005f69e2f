//! Concurrent module graph construction.
//!
//! All graph mutation happens on the driver task that owns the
//! compilation. Factory calls and module builds are pure work: they are
//! spawned onto the runtime under the semaphore (one permit per entry,
//! released on every exit path) and report back over a channel the
//! driver drains until no work is pending. Modules are moved into their
//! build task and moved back on completion, so `build` gets `&mut self`
//! without any locking.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;

use crate::compilation::{Compilation, PreparedEntry};
use crate::dependency::{
    BoxDependency, DependencyBlock, DependencyLocation, ModuleVariable, compare_dependencies,
};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::module::{BoxModule, BuildContext, BuildOutcome, ModuleFactoryContext};
use crate::module_graph::{ModuleId, ModuleInsertion, ModuleProfile};
use crate::{Error, Result};

struct Factorized {
    origin: Option<ModuleId>,
    group: Vec<BoxDependency>,
    cache_group: Option<String>,
    recursive: bool,
    chain_root: bool,
    all_optional: bool,
    error_kind: DiagnosticKind,
    result: std::result::Result<Option<BoxModule>, String>,
    factory_time: Duration,
}

struct Built {
    module: ModuleId,
    instance: BoxModule,
    optional: bool,
    recursive: bool,
    loc: Option<DependencyLocation>,
    result: std::result::Result<BuildOutcome, Diagnostic>,
    build_time: Duration,
}

/// A completed unit of spawned work, applied to the graph by the driver.
enum TaskPayload {
    Factorized(Box<Factorized>),
    Built(Box<Built>),
}

/// Channel and outstanding-task counter for one driver run.
struct DriverState {
    tx: UnboundedSender<TaskPayload>,
    rx: UnboundedReceiver<TaskPayload>,
    pending: usize,
    chain_root: Option<ModuleId>,
}

impl DriverState {
    fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx,
            pending: 0,
            chain_root: None,
        }
    }
}

impl Compilation {
    /// Register a named entry and build its module chain.
    ///
    /// A slot is reserved in the prepared chunks up front; if the chain
    /// produces no module (factory returned nothing, or errored without
    /// `bail`), the slot is removed and the compilation continues
    /// without that entry.
    pub async fn add_entry(
        &mut self,
        context: Option<PathBuf>,
        dependency: BoxDependency,
        name: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        tracing::debug!(entry = %name, request = dependency.request(), "adding entry");
        let slot = self.prepared_chunks.len();
        self.prepared_chunks.push(PreparedEntry { name, module: None });
        match self.add_module_chain(context, dependency, true).await {
            Ok(Some(module)) => {
                self.prepared_chunks[slot].module = Some(module);
                self.entries.push(module);
                Ok(())
            }
            Ok(None) => {
                self.prepared_chunks.remove(slot);
                Ok(())
            }
            Err(error) => {
                self.prepared_chunks.remove(slot);
                Err(error)
            }
        }
    }

    /// Build a module chain without reserving an entry slot.
    pub async fn prefetch(
        &mut self,
        context: Option<PathBuf>,
        dependency: BoxDependency,
    ) -> Result<()> {
        self.add_module_chain(context, dependency, false).await?;
        Ok(())
    }

    /// Single-dependency chain: one factory call under a permit, the
    /// resulting module attached and recursively walked. Yields the
    /// final module instance's id exactly once, whichever insertion
    /// branch produced it.
    async fn add_module_chain(
        &mut self,
        context: Option<PathBuf>,
        dependency: BoxDependency,
        is_entry: bool,
    ) -> Result<Option<ModuleId>> {
        let mut state = DriverState::new();
        self.spawn_factorize(
            &mut state,
            FactorizeRequest {
                origin: None,
                group: vec![dependency],
                cache_group: None,
                recursive: true,
                chain_root: true,
                error_kind: if is_entry {
                    DiagnosticKind::EntryModuleNotFound
                } else {
                    DiagnosticKind::ModuleNotFound
                },
                context,
            },
        )?;
        self.run_driver(&mut state).await?;
        Ok(state.chain_root)
    }

    /// Group a built module's transitive dependencies and factorize each
    /// group. Groups preserve first-seen order; dependencies pointing at
    /// the same resource share one factory call.
    pub async fn process_module_dependencies(&mut self, module: ModuleId) -> Result<()> {
        let mut state = DriverState::new();
        self.schedule_process_dependencies(&mut state, module)?;
        self.run_driver(&mut state).await
    }

    /// Rebuild an already-built module in place.
    ///
    /// The old dependency tree is snapshotted first; after the rebuild
    /// and its dependency walk, the snapshot's reasons are retired. The
    /// module is expected to repopulate its dependency list with fresh
    /// dependency instances during the rebuild.
    pub async fn rebuild_module(&mut self, module: ModuleId) -> Result<()> {
        tracing::debug!(
            module = self.module_graph.node(module).identifier(),
            "rebuilding module"
        );
        let _ = self.wait_for_building_finished(module).await;
        let snapshot = self
            .snapshot_module_block(module)
            .expect("module should be checked in");
        let mut state = DriverState::new();
        self.spawn_build(&mut state, module, false, None, true)?;
        self.run_driver(&mut state).await?;
        self.remove_reasons_of_dependency_block(module, &snapshot);
        Ok(())
    }

    /// Resolve once any in-flight build of the module completes.
    ///
    /// When no build is tracked this resolves on the next scheduler
    /// tick - callers observe "already done", not "never started";
    /// consult the module table first if the distinction matters.
    pub async fn wait_for_building_finished(
        &mut self,
        module: ModuleId,
    ) -> std::result::Result<(), Diagnostic> {
        let receiver = self.building.get_mut(&module).map(|waiters| {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            rx
        });
        match receiver {
            Some(rx) => rx.await.unwrap_or(Ok(())),
            None => {
                tokio::task::yield_now().await;
                Ok(())
            }
        }
    }

    /// Drain the channel until no spawned work is outstanding.
    ///
    /// A fatal error returns immediately; results of tasks still in
    /// flight are discarded with the channel.
    async fn run_driver(&mut self, state: &mut DriverState) -> Result<()> {
        while state.pending > 0 {
            let payload = state.rx.recv().await.ok_or(Error::TaskChannelClosed)?;
            state.pending -= 1;
            match payload {
                TaskPayload::Factorized(payload) => self.handle_factorized(state, *payload)?,
                TaskPayload::Built(payload) => self.handle_built(state, *payload)?,
            }
        }
        Ok(())
    }

    fn spawn_factorize(&mut self, state: &mut DriverState, request: FactorizeRequest) -> Result<()> {
        let FactorizeRequest {
            origin,
            group,
            cache_group,
            recursive,
            chain_root,
            error_kind,
            context,
        } = request;

        // Factory lookup failures are fatal and synchronous, before any
        // task is spawned.
        let factory = self.dependency_factory(group[0].category())?;
        let all_optional = group.iter().all(|dependency| dependency.optional());

        let (issuer, resolve_options, origin_context) = match origin {
            Some(origin) => {
                let node = self.module_graph.node(origin);
                let instance = node.module();
                (
                    Some(node.identifier().to_string()),
                    instance.and_then(|module| module.resolve_options()),
                    instance.and_then(|module| module.context().map(PathBuf::from)),
                )
            }
            None => (None, None, None),
        };
        let factory_context = ModuleFactoryContext {
            issuer,
            compiler: self.name.clone(),
            resolve_options,
            context: context.or(origin_context),
            dependencies: group.clone(),
        };

        let semaphore = self.semaphore.clone();
        let tx = state.tx.clone();
        state.pending += 1;
        tokio::spawn(async move {
            let permit = semaphore.acquire().await;
            let started = Instant::now();
            let result = factory
                .create(factory_context)
                .await
                .map_err(|error| error.to_string());
            let factory_time = started.elapsed();
            drop(permit);
            let _ = tx.send(TaskPayload::Factorized(Box::new(Factorized {
                origin,
                group,
                cache_group,
                recursive,
                chain_root,
                all_optional,
                error_kind,
                result,
                factory_time,
            })));
        });
        Ok(())
    }

    fn handle_factorized(&mut self, state: &mut DriverState, payload: Factorized) -> Result<()> {
        let Factorized {
            origin,
            group,
            cache_group,
            recursive,
            chain_root,
            all_optional,
            error_kind,
            result,
            factory_time,
        } = payload;

        let module = match result {
            Err(message) => {
                let mut diagnostic =
                    Diagnostic::error(error_kind, message).with_loc(group[0].loc());
                if let Some(origin) = origin {
                    diagnostic =
                        diagnostic.with_module(self.module_graph.node(origin).identifier());
                }
                let entry_failure = error_kind == DiagnosticKind::EntryModuleNotFound;
                if !entry_failure && all_optional {
                    self.warnings.push(diagnostic.into_warning());
                    return Ok(());
                }
                self.errors.push(diagnostic.clone());
                if self.options.bail {
                    return Err(Error::Compilation(diagnostic));
                }
                return Ok(());
            }
            // A factory may decline to materialise the dependency.
            Ok(None) => return Ok(()),
            Ok(Some(module)) => module,
        };

        let insertion = self.module_graph.add_module(
            module,
            cache_group.as_deref(),
            self.cache.as_mut(),
            self.file_timestamps.as_ref(),
            self.context_timestamps.as_ref(),
        );
        let id = insertion.module_id();
        for dependency in &group {
            self.module_graph.set_resolved(dependency.id(), id);
            self.module_graph.node_mut(id).add_reason(origin, dependency.id());
        }
        if chain_root {
            state.chain_root = Some(id);
        }

        match insertion {
            ModuleInsertion::Duplicate(_) => {
                // The existing instance is authoritative; if it is still
                // building, its own completion drives the walk.
            }
            ModuleInsertion::Restored(id) => {
                let node = self.module_graph.node_mut(id);
                if node.issuer.is_none() {
                    node.issuer = origin;
                }
                let errors = node.errors.clone();
                let warnings = node.warnings.clone();
                self.errors.extend(errors);
                self.warnings.extend(warnings);
                tracing::debug!(
                    module = self.module_graph.node(id).identifier(),
                    "restored module from cache"
                );
                if recursive {
                    self.schedule_process_dependencies(state, id)?;
                }
            }
            ModuleInsertion::Fresh(id) => {
                let profile = self.options.profile;
                let node = self.module_graph.node_mut(id);
                if node.issuer.is_none() {
                    node.issuer = origin;
                }
                if profile {
                    node.profile.get_or_insert_with(ModuleProfile::default).factory =
                        factory_time;
                }
                self.spawn_build(state, id, all_optional, group.first().cloned(), recursive)?;
            }
        }
        Ok(())
    }

    fn spawn_build(
        &mut self,
        state: &mut DriverState,
        module: ModuleId,
        optional: bool,
        requesting: Option<BoxDependency>,
        recursive: bool,
    ) -> Result<()> {
        let hooks = Arc::clone(&self.hooks);
        let mut hook_arg = module;
        hooks.build_module.call_with(self, &mut hook_arg);

        self.building.insert(module, Vec::new());
        let instance = self.module_graph.check_out(module);
        let resolve_options = instance.resolve_options().unwrap_or_default();
        let context = BuildContext {
            options: Arc::clone(&self.options),
            resolver: self.resolver_factory.resolver(&resolve_options),
            input_file_system: Arc::clone(&self.input_file_system),
        };
        let loc = requesting.and_then(|dependency| dependency.loc());

        let semaphore = self.semaphore.clone();
        let tx = state.tx.clone();
        state.pending += 1;
        tokio::spawn(async move {
            let permit = semaphore.acquire().await;
            let mut instance = instance;
            let started = Instant::now();
            let result = instance
                .build(context)
                .await
                .map_err(|error| Diagnostic::error(DiagnosticKind::ModuleBuild, error.to_string()));
            let build_time = started.elapsed();
            drop(permit);
            let _ = tx.send(TaskPayload::Built(Box::new(Built {
                module,
                instance,
                optional,
                recursive,
                loc,
                result,
                build_time,
            })));
        });
        Ok(())
    }

    fn handle_built(&mut self, state: &mut DriverState, payload: Built) -> Result<()> {
        let Built {
            module,
            instance,
            optional,
            recursive,
            loc,
            result,
            build_time,
        } = payload;

        self.module_graph.check_in(module, instance);
        let identifier = self.module_graph.node(module).identifier().to_string();
        // Publish dependencies in their total order before anything
        // downstream observes them.
        if let Some(instance) = self.module_graph.node_mut(module).module_mut() {
            instance
                .dependencies_mut()
                .sort_by(|a, b| compare_dependencies(a.as_ref(), b.as_ref()));
        }
        {
            let profile = self.options.profile;
            let node = self.module_graph.node_mut(module);
            node.built = true;
            if profile {
                node.profile.get_or_insert_with(ModuleProfile::default).building = build_time;
            }
        }

        // Stamp findings with the module and, when the finding has no
        // location of its own, the requesting dependency's.
        let stamp = |diagnostic: Diagnostic| {
            let keep = diagnostic.loc;
            diagnostic
                .with_module(identifier.as_str())
                .with_loc(keep.or(loc))
        };

        let hooks = Arc::clone(&self.hooks);
        let mut hook_arg = module;
        match result {
            Ok(outcome) => {
                let mut first_error = None;
                for error in outcome.errors {
                    let stamped = stamp(error);
                    self.module_graph.node_mut(module).errors.push(stamped.clone());
                    if optional {
                        self.warnings.push(stamped.into_warning());
                    } else {
                        first_error.get_or_insert_with(|| stamped.clone());
                        self.errors.push(stamped);
                    }
                }
                for warning in outcome.warnings {
                    let stamped = stamp(warning);
                    self.module_graph
                        .node_mut(module)
                        .warnings
                        .push(stamped.clone());
                    self.warnings.push(stamped);
                }

                // The waiter list comes out before completion so a
                // waiter may immediately schedule a rebuild.
                let waiters = self.building.remove(&module).unwrap_or_default();
                hooks.succeed_module.call_with(self, &mut hook_arg);
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }

                if let Some(error) = first_error {
                    if self.options.bail {
                        return Err(Error::Compilation(error));
                    }
                }
                let walk_started = Instant::now();
                if recursive {
                    self.schedule_process_dependencies(state, module)?;
                }
                if self.options.profile {
                    self.module_graph
                        .node_mut(module)
                        .profile
                        .get_or_insert_with(ModuleProfile::default)
                        .dependencies = walk_started.elapsed();
                }
            }
            Err(diagnostic) => {
                let stamped = stamp(diagnostic);
                self.module_graph.node_mut(module).errors.push(stamped.clone());
                if optional {
                    self.warnings.push(stamped.clone().into_warning());
                } else {
                    self.errors.push(stamped.clone());
                }

                let waiters = self.building.remove(&module).unwrap_or_default();
                hooks.failed_module.call_with(self, &mut hook_arg);
                for waiter in waiters {
                    let _ = waiter.send(Err(stamped.clone()));
                }

                if self.options.bail && !optional {
                    return Err(Error::Compilation(stamped));
                }
            }
        }
        Ok(())
    }

    /// Spawn factorize tasks for every dependency group of a module.
    fn schedule_process_dependencies(
        &mut self,
        state: &mut DriverState,
        module: ModuleId,
    ) -> Result<()> {
        let groups = self.dependency_groups(module);
        for group in groups {
            self.spawn_factorize(
                state,
                FactorizeRequest {
                    origin: Some(module),
                    group,
                    cache_group: None,
                    recursive: true,
                    chain_root: false,
                    error_kind: DiagnosticKind::ModuleNotFound,
                    context: None,
                },
            )?;
        }
        Ok(())
    }

    /// Transitive dependencies of a module (own, nested blocks,
    /// variables), bucketed by `is_equal_resource` in first-seen order.
    fn dependency_groups(&self, module: ModuleId) -> Vec<Vec<BoxDependency>> {
        let mut groups: Vec<Vec<BoxDependency>> = Vec::new();
        let mut add = |dependency: &BoxDependency| {
            for group in groups.iter_mut() {
                if group[0].is_equal_resource(dependency.as_ref()) {
                    group.push(Arc::clone(dependency));
                    return;
                }
            }
            groups.push(vec![Arc::clone(dependency)]);
        };

        let Some(instance) = self.module_graph.node(module).module() else {
            return Vec::new();
        };
        walk_block(
            instance.dependencies(),
            instance.blocks(),
            instance.variables(),
            &mut add,
        );
        groups
    }
}

/// Arguments for one factorize task.
struct FactorizeRequest {
    origin: Option<ModuleId>,
    group: Vec<BoxDependency>,
    cache_group: Option<String>,
    recursive: bool,
    chain_root: bool,
    error_kind: DiagnosticKind,
    context: Option<PathBuf>,
}

pub(crate) fn walk_block(
    dependencies: &[BoxDependency],
    blocks: &[Arc<DependencyBlock>],
    variables: &[ModuleVariable],
    add: &mut impl FnMut(&BoxDependency),
) {
    for dependency in dependencies {
        add(dependency);
    }
    for block in blocks {
        walk_block(&block.dependencies, &block.blocks, &block.variables, add);
    }
    for variable in variables {
        for dependency in &variable.dependencies {
            add(dependency);
        }
    }
}
