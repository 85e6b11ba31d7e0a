//! Explicit wiring of every core component.

use crate::error::Result;
use crate::session::PlaybackSession;
use bridge_traits::background::TaskQueue;
use bridge_traits::playback::MediaPlayer;
use core_connection::{
    ActiveEndpoint, ConnectionArbiter, ConnectionConfig, Endpoint, EndpointCandidate,
    HttpEndpointProber, ServerContext,
};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::{
    ParentRepository, SegmentLocks, SegmentRepository, SqliteParentRepository,
    SqliteSegmentRepository,
};
use core_playback::cache::{
    CacheConfig, CacheLayout, CacheManager, CacheReconciler, DownloadPlan, HttpSegmentFetcher,
    ReconcileReport,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_sync::{ProgressSyncConfig, ProgressSyncEngine, WatchTarget};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[cfg(feature = "desktop-shims")]
use bridge_desktop::TokioTaskQueue;

/// Per-component settings applied by [`CoreContext::bootstrap`].
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub connection: ConnectionConfig,
    pub cache: CacheConfig,
    pub sync: ProgressSyncConfig,
}

impl ServiceOptions {
    pub fn with_connection(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    pub fn with_cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    pub fn with_sync(mut self, config: ProgressSyncConfig) -> Self {
        self.sync = config;
        self
    }
}

/// Owns one instance of every core component.
///
/// Hosts create a single context at startup and pass it where it is needed;
/// there is no process-wide instance. [`CoreContext::shutdown`] stops the
/// background work the context started.
pub struct CoreContext {
    config: CoreConfig,
    options: ServiceOptions,
    event_bus: EventBus,
    segments: Arc<dyn SegmentRepository>,
    parents: Arc<dyn ParentRepository>,
    arbiter: Arc<ConnectionArbiter>,
    server: Arc<ServerContext>,
    task_queue: Arc<dyn TaskQueue>,
    #[cfg(feature = "desktop-shims")]
    owned_queue: Option<Arc<TokioTaskQueue>>,
    cache: Arc<CacheManager>,
    reconciler: Arc<CacheReconciler>,
    sync: Arc<ProgressSyncEngine>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl CoreContext {
    /// Open the database, build every component and start background work.
    ///
    /// A host-supplied task queue is used as is; the host must route the
    /// kinds in [`core_sync::TASK_KINDS`] to a [`core_sync::SyncTaskHandler`].
    /// Without one, a desktop queue persisted in the database is created and
    /// jobs left by a previous run are restored.
    ///
    /// # Errors
    ///
    /// - `CoreError::Runtime` / `Connection` / `Playback` / `Sync` for an
    ///   invalid component configuration
    /// - `CoreError::Library` when the database cannot be opened
    /// - `CoreError::CapabilityMissing` when no task queue is available
    #[instrument(skip(config, options), fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig, options: ServiceOptions) -> Result<Self> {
        config.validate()?;
        options.connection.validate()?;

        let event_bus = EventBus::new(config.event_buffer_size);
        let pool = create_pool(DatabaseConfig::new(config.database_path.clone())).await?;
        let segments: Arc<dyn SegmentRepository> =
            Arc::new(SqliteSegmentRepository::new(pool.clone()));
        let parents: Arc<dyn ParentRepository> = Arc::new(SqliteParentRepository::new(pool.clone()));
        let locks = Arc::new(SegmentLocks::new());

        let active = Arc::new(ActiveEndpoint::new());
        let prober = Arc::new(HttpEndpointProber::new(
            config.http_client.clone(),
            &options.connection,
            config.client_identifier.clone(),
        ));
        let arbiter = Arc::new(ConnectionArbiter::new(
            prober,
            active.clone(),
            event_bus.clone(),
        ));
        let server = Arc::new(ServerContext::new(active, config.client_identifier.clone()));

        let api = Arc::new(core_sync::HttpProgressApi::new(
            config.http_client.clone(),
            server.clone(),
        ));
        let handler = core_sync::SyncTaskHandler::new(api);

        #[cfg(feature = "desktop-shims")]
        let (task_queue, owned_queue) = match config.task_queue.clone() {
            Some(queue) => (queue, None),
            None => {
                let queue = Arc::new(desktop_queue(&config, pool.clone(), handler).await?);
                let shared: Arc<dyn TaskQueue> = queue.clone();
                (shared, Some(queue))
            }
        };

        #[cfg(not(feature = "desktop-shims"))]
        let task_queue = {
            let _ = handler;
            config.task_queue.clone().ok_or_else(|| crate::error::CoreError::CapabilityMissing {
                capability: "TaskQueue".to_string(),
                message: "A durable task queue is required for progress sync. \
                         Inject the platform scheduler or enable 'desktop-shims'."
                    .to_string(),
            })?
        };

        let layout = CacheLayout::new(&config.cache_dir, &options.cache)?;
        let reconciler = Arc::new(CacheReconciler::new(
            layout.clone(),
            segments.clone(),
            parents.clone(),
            config.file_system.clone(),
            locks.clone(),
            event_bus.clone(),
        ));
        let fetcher = Arc::new(HttpSegmentFetcher::new(
            config.http_client.clone(),
            server.clone(),
        ));
        let cache = Arc::new(
            CacheManager::new(
                options.cache.clone(),
                layout,
                segments.clone(),
                parents.clone(),
                config.file_system.clone(),
                fetcher,
                locks.clone(),
                event_bus.clone(),
            )?
            .with_reconciler(reconciler.clone()),
        );

        let sync = Arc::new(ProgressSyncEngine::new(
            options.sync.clone(),
            segments.clone(),
            parents.clone(),
            locks,
            task_queue.clone(),
            event_bus.clone(),
            config.clock.clone(),
        )?);

        let shutdown = CancellationToken::new();
        let mut background = Vec::new();
        if config.features.enable_background_reconcile {
            background.push(
                reconciler
                    .clone()
                    .spawn_periodic(options.cache.reconcile_interval, shutdown.child_token()),
            );
        }

        info!(
            background_reconcile = config.features.enable_background_reconcile,
            "Core context ready"
        );

        Ok(Self {
            config,
            options,
            event_bus,
            segments,
            parents,
            arbiter,
            server,
            task_queue,
            #[cfg(feature = "desktop-shims")]
            owned_queue,
            cache,
            reconciler,
            sync,
            shutdown,
            background: Mutex::new(background),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn server(&self) -> &Arc<ServerContext> {
        &self.server
    }

    pub fn task_queue(&self) -> &Arc<dyn TaskQueue> {
        &self.task_queue
    }

    pub fn sync_engine(&self) -> &Arc<ProgressSyncEngine> {
        &self.sync
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn segments(&self) -> &Arc<dyn SegmentRepository> {
        &self.segments
    }

    pub fn parents(&self) -> &Arc<dyn ParentRepository> {
        &self.parents
    }

    /// Race `candidates` and make the winner the active endpoint.
    pub async fn connect(&self, candidates: Vec<EndpointCandidate>) -> Result<Endpoint> {
        let endpoint = self
            .arbiter
            .race(candidates, self.options.connection.race_timeout)
            .await?;
        Ok(endpoint)
    }

    pub fn set_access_token(&self, token: Option<String>) {
        self.server.set_access_token(token);
    }

    /// Load a parent into a new session driven by `player`.
    pub async fn open_session(
        &self,
        parent_id: &str,
        player: Arc<dyn MediaPlayer>,
    ) -> Result<PlaybackSession> {
        PlaybackSession::open(
            parent_id,
            player,
            self.segments.as_ref(),
            self.parents.as_ref(),
            self.sync.clone(),
            self.event_bus.clone(),
            self.shutdown.child_token(),
        )
        .await
    }

    pub async fn download(&self, parent_id: &str) -> Result<DownloadPlan> {
        Ok(self.cache.start_download(parent_id).await?)
    }

    pub fn cancel_download(&self, parent_id: &str) -> usize {
        self.cache.cancel(parent_id)
    }

    pub async fn remove_download(&self, parent_id: &str) -> Result<()> {
        Ok(self.cache.remove(parent_id).await?)
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        Ok(self.reconciler.reconcile().await?)
    }

    pub async fn mark_watched(&self, target: WatchTarget) -> Result<()> {
        self.sync.mark_watched(target).await?;
        Ok(())
    }

    pub async fn mark_unwatched(&self, target: WatchTarget) -> Result<()> {
        self.sync.mark_unwatched(target).await?;
        Ok(())
    }

    /// Stop background work and the owned task queue. Pending queue jobs
    /// stay persisted for the next bootstrap.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        #[cfg(feature = "desktop-shims")]
        if let Some(queue) = &self.owned_queue {
            queue.shutdown().await;
        }
        info!("Core context shut down");
    }
}

#[cfg(feature = "desktop-shims")]
async fn desktop_queue(
    config: &CoreConfig,
    pool: core_library::db::SqlitePool,
    handler: core_sync::SyncTaskHandler,
) -> Result<TokioTaskQueue> {
    let mut queue = TokioTaskQueue::new()
        .with_store(Arc::new(core_library::SqliteTaskStore::new(pool)));
    if config.features.enable_network_awareness {
        if let Some(monitor) = &config.network_monitor {
            queue = queue.with_network_monitor(monitor.clone());
        }
    }

    for kind in core_sync::TASK_KINDS {
        let handler = handler.clone();
        queue
            .register_handler(kind, move |payload| {
                let handler = handler.clone();
                async move { handler.handle(payload).await }
            })
            .await;
    }

    let restored = queue.restore().await?;
    if restored > 0 {
        info!(restored, "Resumed pending sync tasks");
    }
    Ok(queue)
}
