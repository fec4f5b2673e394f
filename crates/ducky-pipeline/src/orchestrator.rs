use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use ducky_core::{
    ChangeKind, ChangeRecord, FeedbackConfig, FeedbackDecision, Notifier, ReasoningClient, Result,
    RetrievalConfig,
};
use ducky_index::{build_bundle, SqliteIndexStore};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::reasoning::DEFAULT_INSTRUCTIONS;

/// Tracks consecutive reasoning-collaborator failures. Past the threshold,
/// feedback generation pauses and the state change is surfaced exactly once;
/// indexing keeps running silently. While paused, an occasional probe call
/// still goes out so recovery is noticed.
struct DegradedGate {
    threshold: u32,
    probe_every: u32,
    consecutive: AtomicU32,
    paused: AtomicBool,
    skipped: AtomicU32,
}

impl DegradedGate {
    fn new(threshold: u32, probe_every: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            probe_every: probe_every.max(1),
            consecutive: AtomicU32::new(0),
            paused: AtomicBool::new(false),
            skipped: AtomicU32::new(0),
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn allow_probe(&self) -> bool {
        let skipped = self.skipped.fetch_add(1, Ordering::SeqCst) + 1;
        skipped % self.probe_every == 0
    }

    /// Returns true exactly when this failure tripped the pause.
    fn on_failure(&self) -> bool {
        let consecutive = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        consecutive >= self.threshold && !self.paused.swap(true, Ordering::SeqCst)
    }

    /// Returns true when this success ended a pause.
    fn on_success(&self) -> bool {
        self.consecutive.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.paused.swap(false, Ordering::SeqCst)
    }
}

/// Decides whether a change record warrants invoking the reasoning
/// collaborator, assembles the context, dispatches the call, and hands the
/// shaped verdict to the notification surface.
pub struct FeedbackOrchestrator {
    store: Arc<SqliteIndexStore>,
    reasoning: Arc<dyn ReasoningClient>,
    notifier: Arc<dyn Notifier>,
    retrieval: RetrievalConfig,
    config: FeedbackConfig,
    review_slots: Semaphore,
    degraded: DegradedGate,
    instructions: String,
}

impl FeedbackOrchestrator {
    pub fn new(
        store: Arc<SqliteIndexStore>,
        reasoning: Arc<dyn ReasoningClient>,
        notifier: Arc<dyn Notifier>,
        retrieval: RetrievalConfig,
        config: FeedbackConfig,
    ) -> Self {
        Self {
            review_slots: Semaphore::new(config.max_concurrent_reviews.max(1)),
            degraded: DegradedGate::new(config.degraded_threshold, config.degraded_probe_every),
            store,
            reasoning,
            notifier,
            retrieval,
            config,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }

    /// Apply the suppression policy and, when the change survives it, run one
    /// review round-trip. Returns the persisted decision, or `None` when the
    /// change was suppressed or the collaborator was unavailable.
    pub async fn process(
        &self,
        record: &ChangeRecord,
        bootstrap: bool,
    ) -> Result<Option<FeedbackDecision>> {
        if bootstrap {
            debug!(entity = %record.entity, "initial scan; feedback suppressed");
            return Ok(None);
        }
        if !record.parsed && !self.config.review_unparsed {
            debug!(entity = %record.entity, "unparsed entity; feedback suppressed");
            return Ok(None);
        }
        if record.embedding_missing {
            debug!(entity = %record.entity, "embedding unavailable; feedback suppressed");
            return Ok(None);
        }
        if record.kind == ChangeKind::Removed {
            // A pure removal only matters while someone still depends on it.
            let dependents = self.store.callers_of(record.entity.short_name())?;
            if dependents.is_empty() {
                debug!(entity = %record.entity, "removal with no dependents; feedback suppressed");
                return Ok(None);
            }
        }
        let Some(digest) = record.dedup_digest().map(str::to_string) else {
            return Ok(None);
        };
        if self.store.has_decision(&record.entity, &digest)? {
            debug!(entity = %record.entity, "identical content already decided; feedback suppressed");
            return Ok(None);
        }
        if self.degraded.is_paused() && !self.degraded.allow_probe() {
            return Ok(None);
        }

        let _permit = self
            .review_slots
            .acquire()
            .await
            .map_err(|_| ducky_core::DuckyError::InvalidOperation("review queue closed".into()))?;

        let bundle = build_bundle(&self.store, record, &self.retrieval, Utc::now())?;
        match self.reasoning.review(&bundle, &self.instructions).await {
            Err(e) => {
                warn!(entity = %record.entity, error = %e, "reasoning collaborator unavailable");
                if self.degraded.on_failure() {
                    // Surfaced once, not per file.
                    warn!("feedback generation paused; indexing continues");
                    let _ = self
                        .notifier
                        .notify(
                            "Ducky feedback is paused: the reasoning service is unreachable. \
                             Indexing continues in the background.",
                            None,
                        )
                        .await;
                }
                Ok(None)
            }
            Ok(response) => {
                if self.degraded.on_success() {
                    info!("reasoning collaborator recovered; feedback resumed");
                }
                // Last-chance check: if the entity moved on while the
                // collaborator was thinking, the verdict is stale and is
                // discarded rather than committed.
                if record.kind != ChangeKind::Removed {
                    let current = self.store.get_entity(&record.entity)?;
                    if current.as_ref().map(|e| e.digest.as_str()) != record.new_digest.as_deref() {
                        debug!(entity = %record.entity, "entity changed during review; verdict discarded");
                        return Ok(None);
                    }
                }
                let decision = FeedbackDecision {
                    entity: record.entity.clone(),
                    record_id: record.id,
                    digest,
                    should_notify: response.should_notify,
                    message: response.message,
                    tag: response.tag,
                    created_at: Utc::now(),
                };
                self.store.record_decision(&decision)?;
                if decision.should_notify {
                    if let Some(message) = &decision.message {
                        if let Err(e) = self.notifier.notify(message, decision.tag).await {
                            // The decision is already persisted for dedup;
                            // a lost notification is only worth a log line.
                            warn!(error = %e, "notification surface failed");
                        }
                    }
                }
                Ok(Some(decision))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FailingReasoner, RecordingNotifier, ScriptedReasoner};
    use chrono::Utc;
    use ducky_core::{Entity, EntityId, EntityKind, FeedbackTag, Language, ReviewResponse, Span};
    use uuid::Uuid;

    fn entity(path: &str, name: &str, deps: &[&str]) -> Entity {
        Entity {
            id: EntityId::new(path, name),
            kind: EntityKind::Function,
            qualified_name: name.to_string(),
            path: path.to_string(),
            language: Language::Python,
            span: Span {
                start_byte: 0,
                end_byte: 10,
                start_line: 1,
                end_line: 2,
            },
            digest: format!("digest-{}", name),
            raw_text: format!("def {}(): pass", name),
            embedding: None,
            last_seen: Utc::now(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            parsed: true,
        }
    }

    fn record(path: &str, name: &str, kind: ChangeKind) -> ChangeRecord {
        ChangeRecord {
            id: Uuid::new_v4(),
            entity: EntityId::new(path, name),
            kind,
            entity_kind: EntityKind::Function,
            language: Language::Python,
            old_digest: matches!(kind, ChangeKind::Modified | ChangeKind::Removed)
                .then(|| "old-digest".to_string()),
            new_digest: (kind != ChangeKind::Removed).then(|| format!("digest-{}", name)),
            old_text: Some("def f(): pass".to_string()),
            new_text: (kind != ChangeKind::Removed).then(|| "def f(): return 1".to_string()),
            timestamp: Utc::now(),
            parsed: true,
            embedding_missing: false,
        }
    }

    fn orchestrator_with(
        reasoning: Arc<dyn ReasoningClient>,
    ) -> (FeedbackOrchestrator, Arc<RecordingNotifier>, Arc<SqliteIndexStore>) {
        let store = Arc::new(SqliteIndexStore::open_in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = FeedbackOrchestrator::new(
            Arc::clone(&store),
            reasoning,
            notifier.clone(),
            RetrievalConfig::default(),
            FeedbackConfig::default(),
        );
        (orchestrator, notifier, store)
    }

    fn notifying_reasoner() -> Arc<ScriptedReasoner> {
        Arc::new(ScriptedReasoner::new(ReviewResponse {
            should_notify: true,
            message: Some("That unwrap will bite you.".to_string()),
            tag: Some(FeedbackTag::Correctness),
        }))
    }

    /// Make the store agree with the record's new digest, as it would after
    /// the reconciler committed the change.
    fn seed(store: &SqliteIndexStore, path: &str, names: &[&str]) {
        let entities: Vec<Entity> = names.iter().map(|n| entity(path, n, &[])).collect();
        store
            .upsert_file(path, Utc::now(), "seed", &entities)
            .unwrap();
    }

    #[tokio::test]
    async fn notifies_and_persists_decision() {
        let reasoner = notifying_reasoner();
        let (orchestrator, notifier, store) = orchestrator_with(reasoner.clone());
        seed(&store, "a.py", &["f"]);

        let rec = record("a.py", "f", ChangeKind::Modified);
        let decision = orchestrator.process(&rec, false).await.unwrap().unwrap();
        assert!(decision.should_notify);
        assert_eq!(notifier.messages().len(), 1);
        assert!(store.has_decision(&rec.entity, "digest-f").unwrap());
    }

    #[tokio::test]
    async fn stale_verdict_is_discarded() {
        let reasoner = notifying_reasoner();
        let (orchestrator, notifier, _store) = orchestrator_with(reasoner.clone());

        // The store never saw this digest: the entity changed again (or was
        // removed) while the collaborator was thinking.
        let rec = record("a.py", "f", ChangeKind::Modified);
        let outcome = orchestrator.process(&rec, false).await.unwrap();
        assert!(outcome.is_none());
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn identical_content_is_decided_once() {
        let reasoner = notifying_reasoner();
        let (orchestrator, notifier, store) = orchestrator_with(reasoner.clone());
        seed(&store, "a.py", &["f"]);

        let first = record("a.py", "f", ChangeKind::Modified);
        orchestrator.process(&first, false).await.unwrap();

        // Second save with identical content: same entity, same digest.
        let mut second = record("a.py", "f", ChangeKind::Modified);
        second.id = Uuid::new_v4();
        let outcome = orchestrator.process(&second, false).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(notifier.messages().len(), 1);
        assert_eq!(reasoner.calls(), 1, "no second reasoning call");
    }

    #[tokio::test]
    async fn bootstrap_pass_is_silent() {
        let reasoner = notifying_reasoner();
        let (orchestrator, notifier, _store) = orchestrator_with(reasoner.clone());

        let rec = record("a.py", "f", ChangeKind::Created);
        assert!(orchestrator.process(&rec, true).await.unwrap().is_none());
        assert!(notifier.messages().is_empty());
        assert_eq!(reasoner.calls(), 0);
    }

    #[tokio::test]
    async fn unparsed_entities_are_skipped() {
        let reasoner = notifying_reasoner();
        let (orchestrator, _notifier, _store) = orchestrator_with(reasoner.clone());

        let mut rec = record("broken.py", "broken", ChangeKind::Created);
        rec.parsed = false;
        assert!(orchestrator.process(&rec, false).await.unwrap().is_none());
        assert_eq!(reasoner.calls(), 0);
    }

    #[tokio::test]
    async fn embedding_degraded_changes_are_skipped() {
        let reasoner = notifying_reasoner();
        let (orchestrator, _notifier, _store) = orchestrator_with(reasoner.clone());

        let mut rec = record("a.py", "f", ChangeKind::Modified);
        rec.embedding_missing = true;
        assert!(orchestrator.process(&rec, false).await.unwrap().is_none());
        assert_eq!(reasoner.calls(), 0);
    }

    #[tokio::test]
    async fn removal_without_dependents_is_suppressed() {
        let reasoner = notifying_reasoner();
        let (orchestrator, _notifier, _store) = orchestrator_with(reasoner.clone());

        let rec = record("b.py", "g", ChangeKind::Removed);
        assert!(orchestrator.process(&rec, false).await.unwrap().is_none());
        assert_eq!(reasoner.calls(), 0);
    }

    #[tokio::test]
    async fn removal_with_dependents_is_reviewed() {
        let reasoner = notifying_reasoner();
        let (orchestrator, notifier, store) = orchestrator_with(reasoner.clone());
        store
            .upsert_file("a.py", Utc::now(), "fa", &[entity("a.py", "f", &["g"])])
            .unwrap();

        let rec = record("b.py", "g", ChangeKind::Removed);
        let decision = orchestrator.process(&rec, false).await.unwrap();
        assert!(decision.is_some());
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn quiet_verdict_is_persisted_without_notification() {
        let reasoner = Arc::new(ScriptedReasoner::new(ReviewResponse::suppress()));
        let (orchestrator, notifier, store) = orchestrator_with(reasoner.clone());
        seed(&store, "a.py", &["f"]);

        let rec = record("a.py", "f", ChangeKind::Modified);
        let decision = orchestrator.process(&rec, false).await.unwrap().unwrap();
        assert!(!decision.should_notify);
        assert!(notifier.messages().is_empty());
        // Still deduplicated next time around.
        assert!(store.has_decision(&rec.entity, "digest-f").unwrap());
    }

    #[tokio::test]
    async fn total_reasoning_outage_degrades_gracefully() {
        let reasoner = Arc::new(FailingReasoner);
        let (orchestrator, notifier, store) = orchestrator_with(reasoner.clone());

        for i in 0..10 {
            let rec = record("a.py", &format!("f{}", i), ChangeKind::Modified);
            let outcome = orchestrator.process(&rec, false).await.unwrap();
            assert!(outcome.is_none(), "no decision while collaborator is down");
        }

        // Exactly one degraded-mode notice, no feedback notifications, and
        // nothing persisted as a decision.
        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0.contains("paused"));
        assert!(!store.has_decision(&EntityId::new("a.py", "f0"), "digest-f0").unwrap());
    }

    #[tokio::test]
    async fn recovery_resumes_feedback() {
        let reasoner = Arc::new(ScriptedReasoner::failing_then_ok(
            5,
            ReviewResponse {
                should_notify: true,
                message: Some("Back online and this needs a docstring.".to_string()),
                tag: Some(FeedbackTag::Style),
            },
        ));
        let (orchestrator, notifier, store) = orchestrator_with(reasoner.clone());
        let names: Vec<String> = (0..30).map(|i| format!("f{}", i)).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        seed(&store, "a.py", &name_refs);

        // Trip the gate, then keep submitting distinct changes until a probe
        // slips through and succeeds.
        for i in 0..30 {
            let rec = record("a.py", &format!("f{}", i), ChangeKind::Modified);
            orchestrator.process(&rec, false).await.unwrap();
        }
        let messages = notifier.messages();
        assert!(
            messages.iter().any(|(text, _)| text.contains("docstring")),
            "feedback must resume after recovery"
        );
    }
}
