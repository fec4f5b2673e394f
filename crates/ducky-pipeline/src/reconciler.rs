use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use ducky_core::{
    ChangeKind, ChangeRecord, DuckyError, EmbeddingClient, Entity, EntityId, EntityKind, Language,
    Result,
};
use ducky_index::SqliteIndexStore;
use ducky_parser::{hash_str, EntityExtractor, ExtractedEntity};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Brings the index store's view of a settled file in line with its on-disk
/// content and emits one immutable change record per affected entity.
///
/// Embeddings are computed outside any lock so other files' reconciliation
/// is never blocked; the per-path commit lock is held only for the duration
/// of the store write. A last-chance digest check discards results that went
/// stale while waiting on the embedding collaborator.
pub struct ChangeReconciler {
    root: PathBuf,
    store: Arc<SqliteIndexStore>,
    extractor: Arc<EntityExtractor>,
    embedder: Arc<dyn EmbeddingClient>,
    commit_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ChangeReconciler {
    pub fn new(
        root: PathBuf,
        store: Arc<SqliteIndexStore>,
        extractor: Arc<EntityExtractor>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            root,
            store,
            extractor,
            embedder,
            commit_locks: DashMap::new(),
        }
    }

    /// Project-relative identity string for a path.
    fn rel(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn lock_for(&self, rel: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.commit_locks
            .entry(rel.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn reconcile(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChangeRecord>> {
        let rel = self.rel(path);
        match tokio::fs::read_to_string(path).await {
            Ok(content) => self.reconcile_content(&rel, path, content, cancel).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.reconcile_removal(&rel).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reconcile a paired rename. Entity identities embed the path, so moved
    /// entities surface as removal + creation; pairs whose content digest is
    /// unchanged collapse into a single `Renamed` record instead.
    pub async fn reconcile_rename(
        &self,
        from: &Path,
        to: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChangeRecord>> {
        let mut removed = self.reconcile(from, cancel).await?;
        let created = self.reconcile(to, cancel).await?;

        let mut records = Vec::with_capacity(removed.len() + created.len());
        for mut record in created {
            if record.kind == ChangeKind::Created {
                let matching = removed.iter().position(|r| {
                    r.kind == ChangeKind::Removed
                        && r.old_digest == record.new_digest
                        && r.entity.short_name() == record.entity.short_name()
                });
                if let Some(pos) = matching {
                    let prior = removed.swap_remove(pos);
                    record.kind = ChangeKind::Renamed;
                    record.old_digest = prior.old_digest;
                    record.old_text = prior.old_text;
                }
            }
            records.push(record);
        }
        records.extend(removed);
        Ok(records)
    }

    async fn reconcile_removal(&self, rel: &str) -> Result<Vec<ChangeRecord>> {
        // Capture structural info before the rows disappear; downstream
        // consumers still need it to describe what was removed.
        let prior: HashMap<EntityId, (EntityKind, Language, bool)> = self
            .store
            .entities_in_file(rel)?
            .into_iter()
            .map(|e| (e.id.clone(), (e.kind, e.language, e.parsed)))
            .collect();
        if prior.is_empty() {
            return Ok(Vec::new());
        }

        let lock = self.lock_for(rel);
        let changes = {
            let _guard = lock.lock().await;
            self.store.remove_file(rel)?
        };

        let timestamp = Utc::now();
        Ok(changes
            .into_iter()
            .map(|change| {
                let (kind, language, parsed) = prior
                    .get(&change.id)
                    .cloned()
                    .unwrap_or((EntityKind::File, Language::Other("unknown".into()), true));
                ChangeRecord {
                    id: Uuid::new_v4(),
                    entity: change.id,
                    kind: ChangeKind::Removed,
                    entity_kind: kind,
                    language,
                    old_digest: change.old_digest,
                    new_digest: None,
                    old_text: change.old_text,
                    new_text: None,
                    timestamp,
                    parsed,
                    embedding_missing: false,
                }
            })
            .collect())
    }

    async fn reconcile_content(
        &self,
        rel: &str,
        path: &Path,
        content: String,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChangeRecord>> {
        let file_digest = hash_str(&content);
        if self.store.file_digest(rel)?.as_deref() == Some(file_digest.as_str()) {
            debug!(path = rel, "file content unchanged; nothing to reconcile");
            return Ok(Vec::new());
        }

        let language = self
            .extractor
            .detect_language(path)
            .unwrap_or_else(|| Language::Other("unknown".to_string()));
        let extracted = self.extract(rel, &content, &language).await?;

        let now = Utc::now();
        let mut entities: Vec<Entity> = extracted
            .into_iter()
            .map(|e| to_entity(rel, &language, now, e))
            .collect();

        let plan = self.store.diff_file(rel, &entities)?;
        let mut removed_meta: HashMap<EntityId, (EntityKind, Language, bool)> = HashMap::new();
        for change in plan.iter().filter(|c| c.kind == ChangeKind::Removed) {
            if let Some(prior) = self.store.get_entity(&change.id)? {
                removed_meta.insert(change.id.clone(), (prior.kind, prior.language, prior.parsed));
            }
        }

        let stale: HashSet<EntityId> = plan
            .iter()
            .filter(|c| c.kind != ChangeKind::Removed)
            .map(|c| c.id.clone())
            .collect();

        let mut missing_embeddings: HashSet<EntityId> = HashSet::new();
        for entity in entities.iter_mut().filter(|e| stale.contains(&e.id)) {
            if cancel.is_cancelled() {
                debug!(path = rel, "reconciliation cancelled mid-embedding");
                return Ok(Vec::new());
            }
            let text = embed_text(entity);
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(path = rel, "reconciliation cancelled mid-embedding");
                    return Ok(Vec::new());
                }
                result = self.embedder.embed(&text) => match result {
                    Ok(vector) => entity.embedding = Some(vector),
                    Err(e) => {
                        warn!(entity = %entity.id, error = %e, "embedding failed; indexing without it");
                        missing_embeddings.insert(entity.id.clone());
                    }
                }
            }
        }

        // Last-chance check: if the file changed while we were suspended on
        // the collaborator, this result is stale and must not be committed.
        // The newer event's own reconciliation will pick up the final state.
        let still_current = matches!(
            tokio::fs::read_to_string(path).await,
            Ok(current) if hash_str(&current) == file_digest
        );
        if !still_current || cancel.is_cancelled() {
            debug!(path = rel, "content moved on; discarding stale reconciliation");
            return Ok(Vec::new());
        }

        let lock = self.lock_for(rel);
        let changes = {
            let _guard = lock.lock().await;
            self.store.upsert_file(rel, now, &file_digest, &entities)?
        };

        let by_id: HashMap<&str, &Entity> =
            entities.iter().map(|e| (e.id.as_str(), e)).collect();
        let timestamp = Utc::now();
        let records = changes
            .into_iter()
            .map(|change| {
                let current = by_id.get(change.id.as_str());
                let (entity_kind, record_language, parsed) = match current {
                    Some(e) => (e.kind.clone(), e.language.clone(), e.parsed),
                    None => removed_meta.get(&change.id).cloned().unwrap_or((
                        EntityKind::File,
                        language.clone(),
                        true,
                    )),
                };
                ChangeRecord {
                    id: Uuid::new_v4(),
                    embedding_missing: missing_embeddings.contains(&change.id),
                    entity: change.id,
                    kind: change.kind,
                    entity_kind,
                    language: record_language,
                    old_digest: change.old_digest,
                    new_digest: change.new_digest,
                    old_text: change.old_text,
                    new_text: current.map(|e| e.raw_text.clone()),
                    timestamp,
                    parsed,
                }
            })
            .collect();
        Ok(records)
    }

    async fn extract(
        &self,
        rel: &str,
        content: &str,
        language: &Language,
    ) -> Result<Vec<ExtractedEntity>> {
        let extractor = Arc::clone(&self.extractor);
        let source = content.to_string();
        let lang = language.clone();
        let outcome = tokio::task::spawn_blocking(move || extractor.extract(&source, &lang))
            .await
            .map_err(|e| DuckyError::InvalidOperation(format!("extraction task failed: {}", e)))?;

        let stem = Path::new(rel)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(rel);
        match outcome {
            Ok(entities) if entities.is_empty() && !content.trim().is_empty() => {
                // Parseable but without structural units (a script of
                // module-level statements); track it as one file entity.
                let mut fallback = ExtractedEntity::whole_file(content, stem);
                fallback.parsed = true;
                Ok(vec![fallback])
            }
            Ok(entities) => Ok(entities),
            Err(DuckyError::UnparsableSource(reason)) => {
                debug!(path = rel, reason = %reason, "falling back to whole-file entity");
                Ok(vec![ExtractedEntity::whole_file(content, stem)])
            }
            Err(other) => Err(other),
        }
    }
}

fn to_entity(rel: &str, language: &Language, now: chrono::DateTime<Utc>, e: ExtractedEntity) -> Entity {
    Entity {
        id: EntityId::new(rel, &e.qualified_name),
        kind: e.kind,
        qualified_name: e.qualified_name,
        path: rel.to_string(),
        language: language.clone(),
        span: e.span,
        digest: e.digest,
        raw_text: e.raw_text,
        embedding: None,
        last_seen: now,
        depends_on: e.depends_on,
        parsed: e.parsed,
    }
}

fn embed_text(entity: &Entity) -> String {
    format!(
        "{} {} {}\n{}",
        entity.language, entity.kind, entity.qualified_name, entity.raw_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FailingEmbedder, MockEmbedder};
    use ducky_parser::NormalizeMode;

    fn reconciler_in(root: &Path) -> ChangeReconciler {
        reconciler_with(root, Arc::new(MockEmbedder::new(4)))
    }

    fn reconciler_with(root: &Path, embedder: Arc<dyn EmbeddingClient>) -> ChangeReconciler {
        ChangeReconciler::new(
            root.to_path_buf(),
            Arc::new(SqliteIndexStore::open_in_memory().unwrap()),
            Arc::new(EntityExtractor::new(NormalizeMode::StripComments)),
            embedder,
        )
    }

    #[tokio::test]
    async fn create_then_reconcile_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "def f(x):\n    return x\n").unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        let first = reconciler.reconcile(&file, &token).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, ChangeKind::Created);
        assert_eq!(first[0].entity, EntityId::new("a.py", "f"));
        assert!(!first[0].embedding_missing);

        let second = reconciler.reconcile(&file, &token).await.unwrap();
        assert!(second.is_empty(), "unchanged file must produce no records");
    }

    #[tokio::test]
    async fn body_edit_emits_modified_with_both_texts() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "def f(x):\n    return x\n").unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        reconciler.reconcile(&file, &token).await.unwrap();

        std::fs::write(&file, "def f(x):\n    return x * 2\n").unwrap();
        let records = reconciler.reconcile(&file, &token).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ChangeKind::Modified);
        assert!(records[0].old_text.as_deref().unwrap().contains("return x"));
        assert!(records[0]
            .new_text
            .as_deref()
            .unwrap()
            .contains("return x * 2"));
    }

    #[tokio::test]
    async fn deletion_emits_removed_records() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "def f(x):\n    return x\n\ndef g():\n    pass\n").unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        reconciler.reconcile(&file, &token).await.unwrap();

        std::fs::remove_file(&file).unwrap();
        let records = reconciler.reconcile(&file, &token).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == ChangeKind::Removed));
        assert!(records.iter().all(|r| r.new_text.is_none()));
    }

    #[tokio::test]
    async fn delete_then_identical_recreate_is_net_zero() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        let source = "def f(x):\n    return x\n";
        std::fs::write(&file, source).unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        reconciler.reconcile(&file, &token).await.unwrap();

        // Both transitions land inside one debounce window, so the scheduler
        // only hands over the final state.
        std::fs::remove_file(&file).unwrap();
        std::fs::write(&file, source).unwrap();
        let records = reconciler.reconcile(&file, &token).await.unwrap();
        assert!(records.is_empty(), "net-zero diff must emit no records");
    }

    #[tokio::test]
    async fn comment_only_edit_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.rs");
        std::fs::write(&file, "fn a() { 1; }\n").unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        reconciler.reconcile(&file, &token).await.unwrap();

        std::fs::write(&file, "// cosmetic note\nfn a() { 1; }\n").unwrap();
        let records = reconciler.reconcile(&file, &token).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn unparsable_source_degrades_to_whole_file_entity() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.py");
        std::fs::write(&file, "def (((\n").unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        let records = reconciler.reconcile(&file, &token).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_kind, EntityKind::File);
        assert!(!records[0].parsed, "fallback entity must be flagged unparsed");
    }

    #[tokio::test]
    async fn script_without_definitions_indexes_as_module_block() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("script.py");
        std::fs::write(&file, "print('hello')\nprint('world')\n").unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        let records = reconciler.reconcile(&file, &token).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_kind, EntityKind::File);
        assert!(records[0].parsed, "a parseable script is not an extractor failure");
    }

    #[tokio::test]
    async fn embedding_failure_indexes_without_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "def f(x):\n    return x\n").unwrap();

        let reconciler = reconciler_with(dir.path(), Arc::new(FailingEmbedder));
        let token = CancellationToken::new();
        let records = reconciler.reconcile(&file, &token).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].embedding_missing);

        // Entity still landed in the index, embedding-less.
        let stored = reconciler
            .store
            .get_entity(&EntityId::new("a.py", "f"))
            .unwrap()
            .unwrap();
        assert!(stored.embedding.is_none());
    }

    #[tokio::test]
    async fn cancelled_reconciliation_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "def f(x):\n    return x\n").unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        token.cancel();
        let records = reconciler.reconcile(&file, &token).await.unwrap();
        assert!(records.is_empty());
        assert!(reconciler
            .store
            .get_entity(&EntityId::new("a.py", "f"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rename_with_unchanged_content_collapses_to_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.py");
        let new = dir.path().join("new.py");
        std::fs::write(&old, "def f(x):\n    return x\n").unwrap();

        let reconciler = reconciler_in(dir.path());
        let token = CancellationToken::new();
        reconciler.reconcile(&old, &token).await.unwrap();

        std::fs::rename(&old, &new).unwrap();
        let records = reconciler.reconcile_rename(&old, &new, &token).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ChangeKind::Renamed);
        assert_eq!(records[0].entity, EntityId::new("new.py", "f"));
        assert!(records[0].old_text.is_some());
    }
}
