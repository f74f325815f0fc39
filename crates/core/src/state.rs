//! Shared application state: every long-lived component, wired once at
//! startup.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use av_blocks::{
    ContextRegistry, EventPersister, RouteMetaStore, StatsPersister, BlockStore,
};
use av_blocks::context::RunLockMap;
use av_blocks::stats::{JsonlStatsSink, StatsSink};
use av_domain::config::AppConfig;
use av_domain::error::Result;
use av_domain::filter::SensitiveFilter;
use av_providers::ProviderRegistry;
use av_runner::{CcRunner, SessionManager};
use av_tools::ToolRegistry;

use crate::memory::{MemoryGenerator, MemoryStore};
use crate::parrot::{factory, ParrotDeps, ParrotRegistry};
use crate::router::Router;
use crate::runtime::CancelMap;

pub struct AppState {
    pub config: AppConfig,
    pub providers: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub parrots: Arc<ParrotRegistry>,
    pub parrot_deps: ParrotDeps,
    pub router: Arc<Router>,
    pub blocks: Arc<BlockStore>,
    pub persister: Arc<EventPersister>,
    pub stats: Arc<StatsPersister>,
    pub contexts: Arc<ContextRegistry>,
    pub run_locks: Arc<RunLockMap>,
    pub route_meta: Arc<RouteMetaStore>,
    pub runner: Arc<CcRunner>,
    pub memory: Arc<MemoryGenerator>,
    pub cancel_map: Arc<CancelMap>,
    pub filter: Arc<SensitiveFilter>,
    /// Stops the session idle reaper on shutdown.
    pub reaper_cancel: CancellationToken,
}

impl AppState {
    /// Wire the full state with durable journals under the configured
    /// state path. Must run inside a tokio runtime (background workers are
    /// spawned here).
    pub fn build(
        config: AppConfig,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        memory_store: Arc<dyn MemoryStore>,
    ) -> Result<Self> {
        let blocks = Arc::new(BlockStore::new(&config.store.state_path)?);
        let route_meta = Arc::new(RouteMetaStore::new(&config.store.state_path)?);
        let stats_sink: Arc<dyn StatsSink> =
            Arc::new(JsonlStatsSink::new(&config.store.state_path)?);
        Self::assemble(config, providers, tools, memory_store, blocks, route_meta, stats_sink)
    }

    /// Wire the state fully in memory (tests, ephemeral runs).
    pub fn build_in_memory(
        config: AppConfig,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        memory_store: Arc<dyn MemoryStore>,
        stats_sink: Arc<dyn StatsSink>,
    ) -> Result<Self> {
        let blocks = Arc::new(BlockStore::in_memory());
        let route_meta = Arc::new(RouteMetaStore::in_memory());
        Self::assemble(config, providers, tools, memory_store, blocks, route_meta, stats_sink)
    }

    fn assemble(
        config: AppConfig,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        memory_store: Arc<dyn MemoryStore>,
        blocks: Arc<BlockStore>,
        route_meta: Arc<RouteMetaStore>,
        stats_sink: Arc<dyn StatsSink>,
    ) -> Result<Self> {
        let filter = Arc::new(SensitiveFilter::new());

        let session_manager = Arc::new(SessionManager::new(config.runner.clone()));
        let reaper_cancel = CancellationToken::new();
        let _reaper = session_manager.spawn_reaper(reaper_cancel.clone());
        let runner = Arc::new(CcRunner::new(session_manager, filter.clone()));

        let parrots = factory::build_registry(&config.parrots, &tools)?;

        let router = Arc::new(Router::new(
            config.router.clone(),
            std::time::Duration::from_secs(config.llm.intent_timeout_secs),
            providers.clone(),
            route_meta.clone(),
            parrots.clone(),
        ));

        let persister = Arc::new(EventPersister::new(
            blocks.clone(),
            std::time::Duration::from_secs(config.store.dedup_window_secs),
        ));
        let stats = Arc::new(StatsPersister::spawn(&config.stats, stats_sink));

        let memory = MemoryGenerator::new(providers.clone(), memory_store, config.memory.clone());

        let parrot_deps = ParrotDeps {
            providers: providers.clone(),
            tools: tools.clone(),
            runner: runner.clone(),
            runner_config: config.runner.clone(),
        };

        Ok(Self {
            config,
            providers,
            tools,
            parrots,
            parrot_deps,
            router,
            blocks,
            persister,
            stats,
            contexts: Arc::new(ContextRegistry::new()),
            run_locks: Arc::new(RunLockMap::new()),
            route_meta,
            runner,
            memory,
            cancel_map: Arc::new(CancelMap::new()),
            filter,
            reaper_cancel,
        })
    }
}
