pub mod embedding;
pub mod notify;
pub mod orchestrator;
pub mod reasoning;
pub mod reconciler;
pub mod scheduler;
pub mod watcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ducky_core::{
    DuckyConfig, EmbeddingClient, Notifier, ReasoningClient, Result, WatchEventKind,
};
use ducky_index::SqliteIndexStore;
use ducky_parser::EntityExtractor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use embedding::HttpEmbeddingClient;
pub use notify::{notifier_from_config, HttpNotifier, LogNotifier};
pub use orchestrator::FeedbackOrchestrator;
pub use reasoning::HttpReasoningClient;
pub use reconciler::ChangeReconciler;
pub use scheduler::DebounceScheduler;
pub use watcher::ProjectWatcher;

/// Wires the whole pipeline together: filesystem events flow through the
/// debounce scheduler into the change reconciler, whose records feed the
/// feedback orchestrator. One file's failure never blocks indexing or
/// feedback for any other file.
pub struct DuckyPipeline {
    config: DuckyConfig,
    watcher: ProjectWatcher,
    reconciler: Arc<ChangeReconciler>,
    orchestrator: Arc<FeedbackOrchestrator>,
}

impl DuckyPipeline {
    pub fn new(config: DuckyConfig) -> Result<Self> {
        let store = Arc::new(SqliteIndexStore::open(&config.db_path())?);
        let embedder: Arc<dyn EmbeddingClient> =
            Arc::new(HttpEmbeddingClient::new(config.embedding.clone()));
        let reasoner: Arc<dyn ReasoningClient> =
            Arc::new(HttpReasoningClient::new(config.reasoning.clone()));
        let notifier = notifier_from_config(&config.feedback);
        Self::with_collaborators(config, store, embedder, reasoner, notifier)
    }

    /// Injection seam: same wiring, caller-supplied store and collaborators.
    pub fn with_collaborators(
        config: DuckyConfig,
        store: Arc<SqliteIndexStore>,
        embedder: Arc<dyn EmbeddingClient>,
        reasoner: Arc<dyn ReasoningClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let watcher = ProjectWatcher::new(&config.project)?;
        let extractor = Arc::new(EntityExtractor::from_config(config.index.comments_matter));
        let reconciler = Arc::new(ChangeReconciler::new(
            config.project.root.clone(),
            Arc::clone(&store),
            extractor,
            embedder,
        ));
        let orchestrator = Arc::new(FeedbackOrchestrator::new(
            store,
            reasoner,
            notifier,
            config.retrieval.clone(),
            config.feedback.clone(),
        ));
        Ok(Self {
            config,
            watcher,
            reconciler,
            orchestrator,
        })
    }

    /// One-time walk of the project so the index converges with disk before
    /// watching begins. Change records from this pass never produce feedback.
    pub async fn bootstrap(&self) -> Result<usize> {
        let files = self.watcher.tracked_files().await?;
        let total = files.len();
        for file in files {
            let token = CancellationToken::new();
            match self.reconciler.reconcile(&file, &token).await {
                Ok(records) => {
                    for record in records {
                        if let Err(e) = self.orchestrator.process(&record, true).await {
                            warn!(error = %e, "bootstrap feedback processing failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "bootstrap reconcile failed; file skipped");
                }
            }
        }
        info!(files = total, "initial scan complete");
        Ok(total)
    }

    /// Watch loop; runs until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (settled_tx, mut settled_rx) = mpsc::unbounded_channel();
        let _fs_watcher = self.watcher.spawn(event_tx)?;

        self.bootstrap().await?;

        let scheduler = DebounceScheduler::new(
            Duration::from_millis(self.config.watch.quiet_period_ms),
            settled_tx,
        );
        let inflight: Arc<DashMap<PathBuf, CancellationToken>> = Arc::new(DashMap::new());
        let rename_sources: Arc<DashMap<PathBuf, PathBuf>> = Arc::new(DashMap::new());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested; stopping watch loop");
                    break;
                }
                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    debug!(path = %event.path.display(), kind = ?event.kind, "watch event");
                    if let WatchEventKind::Renamed { from } = &event.kind {
                        rename_sources.insert(event.path.clone(), from.clone());
                    }
                    // A newer event for the same path makes any in-flight
                    // reconciliation stale; its result will be discarded.
                    if let Some(token) = inflight.get(&event.path) {
                        token.cancel();
                    }
                    scheduler.observe(event.path);
                }
                maybe_settled = settled_rx.recv() => {
                    let Some(path) = maybe_settled else { break };
                    let token = CancellationToken::new();
                    inflight.insert(path.clone(), token.clone());
                    let reconciler = Arc::clone(&self.reconciler);
                    let orchestrator = Arc::clone(&self.orchestrator);
                    let rename_from = rename_sources.remove(&path).map(|(_, from)| from);
                    tokio::spawn(async move {
                        let outcome = match rename_from {
                            Some(from) => reconciler.reconcile_rename(&from, &path, &token).await,
                            None => reconciler.reconcile(&path, &token).await,
                        };
                        match outcome {
                            Ok(records) => {
                                for record in records {
                                    if let Err(e) = orchestrator.process(&record, false).await {
                                        warn!(entity = %record.entity, error = %e, "feedback processing failed");
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "reconciliation failed; file skipped");
                            }
                        }
                    });
                }
            }
        }
        Ok(())
    }
}
