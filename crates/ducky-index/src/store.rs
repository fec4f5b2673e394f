use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use ducky_core::{
    ChangeKind, DuckyError, Entity, EntityChange, EntityId, EntityKind, FeedbackDecision,
    FileRecord, Language, Result,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

/// The single source of truth for what Ducky currently believes the codebase
/// looks like. Only the change reconciler writes to it; everything else
/// treats it as a queryable service. Each call takes its own snapshot of the
/// connection, which is all the isolation entities need since they are
/// independently owned.
pub struct SqliteIndexStore {
    conn: Mutex<Connection>,
}

fn index_err(e: rusqlite::Error) -> DuckyError {
    DuckyError::IndexUnavailable(e.to_string())
}

impl SqliteIndexStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(index_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(index_err)?;
        crate::schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(index_err)?;
        crate::schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn file_record(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock();
        let header = conn
            .query_row(
                "SELECT modified, digest FROM files WHERE path = ?1",
                [path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                },
            )
            .optional()
            .map_err(index_err)?;
        let Some((modified, digest)) = header else {
            return Ok(None);
        };
        let mut stmt = conn
            .prepare("SELECT id FROM entities WHERE path = ?1 ORDER BY start_byte")
            .map_err(index_err)?;
        let ids = stmt
            .query_map([path], |row| row.get::<_, String>(0))
            .map_err(index_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(index_err)?;
        Ok(Some(FileRecord {
            path: path.to_string(),
            modified: parse_timestamp(&modified),
            digest,
            entities: ids.into_iter().map(EntityId::from).collect(),
        }))
    }

    pub fn file_digest(&self, path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT digest FROM files WHERE path = ?1",
            [path],
            |row| row.get(0),
        )
        .optional()
        .map_err(index_err)
    }

    /// Read-only diff of the incoming entity set against the stored one.
    /// This is what tells the reconciler which digests are stale and need a
    /// fresh embedding before commit.
    pub fn diff_file(&self, path: &str, entities: &[Entity]) -> Result<Vec<EntityChange>> {
        let conn = self.conn.lock();
        compute_diff(&conn, path, entities)
    }

    /// Atomically replace the file's entity set. Entities whose digest is
    /// unchanged keep their stored embedding; changed ones are written as
    /// given; missing ones are removed together with their outgoing edges.
    /// Returns the entity-level changes in the order entities were supplied,
    /// removals last.
    pub fn upsert_file(
        &self,
        path: &str,
        modified: DateTime<Utc>,
        file_digest: &str,
        entities: &[Entity],
    ) -> Result<Vec<EntityChange>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(index_err)?;
        let changes = compute_diff(&tx, path, entities)?;
        let changed: HashSet<&EntityId> = changes.iter().map(|c| &c.id).collect();

        for change in &changes {
            match change.kind {
                ChangeKind::Created | ChangeKind::Modified => {
                    if let Some(entity) = entities.iter().find(|e| e.id == change.id) {
                        write_entity(&tx, entity)?;
                    }
                }
                ChangeKind::Removed => {
                    tx.execute("DELETE FROM entities WHERE id = ?1", [change.id.as_str()])
                        .map_err(index_err)?;
                    tx.execute(
                        "DELETE FROM edges WHERE source_id = ?1",
                        [change.id.as_str()],
                    )
                    .map_err(index_err)?;
                }
                ChangeKind::Renamed => {}
            }
        }

        for entity in entities.iter().filter(|e| !changed.contains(&e.id)) {
            tx.execute(
                "UPDATE entities SET start_byte = ?1, end_byte = ?2, start_line = ?3, \
                 end_line = ?4, raw_text = ?5, last_seen = ?6 WHERE id = ?7",
                params![
                    entity.span.start_byte as i64,
                    entity.span.end_byte as i64,
                    entity.span.start_line as i64,
                    entity.span.end_line as i64,
                    entity.raw_text,
                    entity.last_seen.to_rfc3339(),
                    entity.id.as_str(),
                ],
            )
            .map_err(index_err)?;
        }

        tx.execute(
            "INSERT INTO files (path, modified, digest) VALUES (?1, ?2, ?3) \
             ON CONFLICT(path) DO UPDATE SET modified = excluded.modified, \
             digest = excluded.digest",
            params![path, modified.to_rfc3339(), file_digest],
        )
        .map_err(index_err)?;

        tx.commit().map_err(index_err)?;
        debug!(path, changes = changes.len(), "file upserted");
        Ok(changes)
    }

    /// Remove all entities owned by a file; used on delete and rename.
    pub fn remove_file(&self, path: &str) -> Result<Vec<EntityChange>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(index_err)?;
        let rows = load_rows(&tx, path)?;
        let mut changes = Vec::with_capacity(rows.len());
        for row in &rows {
            changes.push(EntityChange {
                id: EntityId::from(row.id.clone()),
                kind: ChangeKind::Removed,
                old_digest: Some(row.digest.clone()),
                new_digest: None,
                old_text: Some(row.raw_text.clone()),
            });
            tx.execute("DELETE FROM edges WHERE source_id = ?1", [row.id.as_str()])
                .map_err(index_err)?;
        }
        tx.execute("DELETE FROM entities WHERE path = ?1", [path])
            .map_err(index_err)?;
        tx.execute("DELETE FROM files WHERE path = ?1", [path])
            .map_err(index_err)?;
        tx.commit().map_err(index_err)?;
        debug!(path, removed = changes.len(), "file removed from index");
        Ok(changes)
    }

    pub fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_ENTITY),
                [id.as_str()],
                EntityRow::from_row,
            )
            .optional()
            .map_err(index_err)?;
        match row {
            Some(row) => Ok(Some(row.into_entity(load_edges(&conn, id.as_str())?))),
            None => Ok(None),
        }
    }

    pub fn entities_in_file(&self, path: &str) -> Result<Vec<Entity>> {
        let conn = self.conn.lock();
        let rows = load_rows(&conn, path)?;
        rows.into_iter()
            .map(|row| {
                let edges = load_edges(&conn, row.id.as_str())?;
                Ok(row.into_entity(edges))
            })
            .collect()
    }

    /// Entities whose terminal or qualified name matches; how call edges,
    /// which carry unresolved names, bind to identities at query time.
    pub fn resolve_name(&self, name: &str) -> Result<Vec<Entity>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE short_name = ?1 OR qualified_name = ?1 ORDER BY id",
                SELECT_ENTITY
            ))
            .map_err(index_err)?;
        let rows = stmt
            .query_map([name], EntityRow::from_row)
            .map_err(index_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(index_err)?;
        rows.into_iter()
            .map(|row| {
                let edges = load_edges(&conn, row.id.as_str())?;
                Ok(row.into_entity(edges))
            })
            .collect()
    }

    /// Entities holding a dependency edge onto the given terminal name.
    /// Edges pointing at identities that no longer resolve are simply inert;
    /// they get rewritten the next time their source entity is touched.
    pub fn callers_of(&self, short_name: &str) -> Result<Vec<Entity>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{} JOIN edges ON edges.source_id = entities.id \
                 WHERE edges.target_name = ?1 ORDER BY entities.id",
                SELECT_ENTITY
            ))
            .map_err(index_err)?;
        let rows = stmt
            .query_map([short_name], EntityRow::from_row)
            .map_err(index_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(index_err)?;
        rows.into_iter()
            .map(|row| {
                let edges = load_edges(&conn, row.id.as_str())?;
                Ok(row.into_entity(edges))
            })
            .collect()
    }

    pub fn record_decision(&self, decision: &FeedbackDecision) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO feedback_decisions \
             (entity_id, digest, record_id, should_notify, message, tag, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                decision.entity.as_str(),
                decision.digest,
                decision.record_id.to_string(),
                decision.should_notify,
                decision.message,
                decision.tag.map(|t| t.to_string()),
                decision.created_at.to_rfc3339(),
            ],
        )
        .map_err(index_err)?;
        Ok(())
    }

    pub fn has_decision(&self, entity: &EntityId, digest: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT 1 FROM feedback_decisions WHERE entity_id = ?1 AND digest = ?2",
            params![entity.as_str(), digest],
            |_| Ok(()),
        )
        .optional()
        .map_err(index_err)
        .map(|found| found.is_some())
    }

    pub fn stats(&self) -> Result<(u64, u64)> {
        let conn = self.conn.lock();
        let files: i64 = conn
            .query_row("SELECT count(*) FROM files", [], |row| row.get(0))
            .map_err(index_err)?;
        let entities: i64 = conn
            .query_row("SELECT count(*) FROM entities", [], |row| row.get(0))
            .map_err(index_err)?;
        Ok((files as u64, entities as u64))
    }
}

const SELECT_ENTITY: &str = "SELECT entities.id, entities.path, entities.qualified_name, \
    entities.kind, entities.language, entities.start_byte, entities.end_byte, \
    entities.start_line, entities.end_line, entities.digest, entities.raw_text, \
    entities.embedding, entities.last_seen, entities.parsed FROM entities";

struct EntityRow {
    id: String,
    path: String,
    qualified_name: String,
    kind: String,
    language: String,
    start_byte: i64,
    end_byte: i64,
    start_line: i64,
    end_line: i64,
    digest: String,
    raw_text: String,
    embedding: Option<Vec<u8>>,
    last_seen: String,
    parsed: bool,
}

impl EntityRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            qualified_name: row.get(2)?,
            kind: row.get(3)?,
            language: row.get(4)?,
            start_byte: row.get(5)?,
            end_byte: row.get(6)?,
            start_line: row.get(7)?,
            end_line: row.get(8)?,
            digest: row.get(9)?,
            raw_text: row.get(10)?,
            embedding: row.get(11)?,
            last_seen: row.get(12)?,
            parsed: row.get(13)?,
        })
    }

    fn into_entity(self, depends_on: Vec<String>) -> Entity {
        Entity {
            id: EntityId::from(self.id),
            kind: self
                .kind
                .parse()
                .unwrap_or(EntityKind::Other("unknown".to_string())),
            qualified_name: self.qualified_name,
            path: self.path,
            language: self
                .language
                .parse()
                .unwrap_or(Language::Other("unknown".to_string())),
            span: ducky_core::Span {
                start_byte: self.start_byte as usize,
                end_byte: self.end_byte as usize,
                start_line: self.start_line as u32,
                end_line: self.end_line as u32,
            },
            digest: self.digest,
            raw_text: self.raw_text,
            embedding: self.embedding.as_deref().map(blob_to_vec),
            last_seen: parse_timestamp(&self.last_seen),
            depends_on,
            parsed: self.parsed,
        }
    }
}

fn compute_diff(conn: &Connection, path: &str, entities: &[Entity]) -> Result<Vec<EntityChange>> {
    let mut stmt = conn
        .prepare("SELECT id, digest, raw_text FROM entities WHERE path = ?1")
        .map_err(index_err)?;
    let mut existing: HashMap<String, (String, String)> = stmt
        .query_map([path], |row| {
            Ok((
                row.get::<_, String>(0)?,
                (row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            ))
        })
        .map_err(index_err)?
        .collect::<rusqlite::Result<HashMap<_, _>>>()
        .map_err(index_err)?;

    let mut changes = Vec::new();
    for entity in entities {
        match existing.remove(entity.id.as_str()) {
            None => changes.push(EntityChange {
                id: entity.id.clone(),
                kind: ChangeKind::Created,
                old_digest: None,
                new_digest: Some(entity.digest.clone()),
                old_text: None,
            }),
            Some((old_digest, old_text)) => {
                if old_digest != entity.digest {
                    changes.push(EntityChange {
                        id: entity.id.clone(),
                        kind: ChangeKind::Modified,
                        old_digest: Some(old_digest),
                        new_digest: Some(entity.digest.clone()),
                        old_text: Some(old_text),
                    });
                }
            }
        }
    }

    let mut removed: Vec<_> = existing.into_iter().collect();
    removed.sort_by(|a, b| a.0.cmp(&b.0));
    for (id, (digest, text)) in removed {
        changes.push(EntityChange {
            id: EntityId::from(id),
            kind: ChangeKind::Removed,
            old_digest: Some(digest),
            new_digest: None,
            old_text: Some(text),
        });
    }
    Ok(changes)
}

fn write_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    conn.execute(
        "INSERT INTO entities (id, path, short_name, qualified_name, kind, language, \
         start_byte, end_byte, start_line, end_line, digest, raw_text, embedding, \
         last_seen, parsed) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
         ON CONFLICT(id) DO UPDATE SET path = excluded.path, \
         short_name = excluded.short_name, qualified_name = excluded.qualified_name, \
         kind = excluded.kind, language = excluded.language, \
         start_byte = excluded.start_byte, end_byte = excluded.end_byte, \
         start_line = excluded.start_line, end_line = excluded.end_line, \
         digest = excluded.digest, raw_text = excluded.raw_text, \
         embedding = excluded.embedding, last_seen = excluded.last_seen, \
         parsed = excluded.parsed",
        params![
            entity.id.as_str(),
            entity.path,
            entity.id.short_name(),
            entity.qualified_name,
            entity.kind.to_string(),
            entity.language.to_string(),
            entity.span.start_byte as i64,
            entity.span.end_byte as i64,
            entity.span.start_line as i64,
            entity.span.end_line as i64,
            entity.digest,
            entity.raw_text,
            entity.embedding.as_deref().map(vec_to_blob),
            entity.last_seen.to_rfc3339(),
            entity.parsed,
        ],
    )
    .map_err(index_err)?;

    // Rewriting the edge set on every write is the lazy prune: stale targets
    // disappear the next time their source is touched.
    conn.execute(
        "DELETE FROM edges WHERE source_id = ?1",
        [entity.id.as_str()],
    )
    .map_err(index_err)?;
    for target in &entity.depends_on {
        conn.execute(
            "INSERT OR IGNORE INTO edges (source_id, target_name) VALUES (?1, ?2)",
            params![entity.id.as_str(), target],
        )
        .map_err(index_err)?;
    }
    Ok(())
}

fn load_rows(conn: &Connection, path: &str) -> Result<Vec<EntityRow>> {
    let mut stmt = conn
        .prepare(&format!(
            "{} WHERE path = ?1 ORDER BY start_byte",
            SELECT_ENTITY
        ))
        .map_err(index_err)?;
    let rows = stmt
        .query_map([path], EntityRow::from_row)
        .map_err(index_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(index_err);
    rows
}

fn load_edges(conn: &Connection, source_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT target_name FROM edges WHERE source_id = ?1 ORDER BY target_name")
        .map_err(index_err)?;
    let rows = stmt
        .query_map([source_id], |row| row.get::<_, String>(0))
        .map_err(index_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(index_err);
    rows
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn vec_to_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ducky_core::Span;

    fn entity(path: &str, name: &str, digest: &str, deps: &[&str]) -> Entity {
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
            digest: digest.to_string(),
            raw_text: format!("def {}(): pass", name),
            embedding: None,
            last_seen: Utc::now(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            parsed: true,
        }
    }

    #[test]
    fn first_upsert_creates_then_reupsert_is_empty() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let entities = vec![entity("a.py", "f", "d1", &[]), entity("a.py", "g", "d2", &[])];
        let changes = store
            .upsert_file("a.py", Utc::now(), "fd1", &entities)
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Created));

        let again = store
            .upsert_file("a.py", Utc::now(), "fd1", &entities)
            .unwrap();
        assert!(again.is_empty(), "reconciling unchanged content must be silent");
    }

    #[test]
    fn digest_change_reports_modified_with_old_text() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let v1 = vec![entity("a.py", "f", "d1", &[])];
        store.upsert_file("a.py", Utc::now(), "fd1", &v1).unwrap();

        let mut v2 = vec![entity("a.py", "f", "d2", &[])];
        v2[0].raw_text = "def f(): return 1".to_string();
        let changes = store.upsert_file("a.py", Utc::now(), "fd2", &v2).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_eq!(changes[0].old_digest.as_deref(), Some("d1"));
        assert_eq!(changes[0].old_text.as_deref(), Some("def f(): pass"));
    }

    #[test]
    fn missing_entity_reports_removed() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let v1 = vec![entity("a.py", "f", "d1", &[]), entity("a.py", "g", "d2", &[])];
        store.upsert_file("a.py", Utc::now(), "fd1", &v1).unwrap();

        let v2 = vec![entity("a.py", "f", "d1", &[])];
        let changes = store.upsert_file("a.py", Utc::now(), "fd2", &v2).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert_eq!(changes[0].id, EntityId::new("a.py", "g"));
        assert!(store.get_entity(&EntityId::new("a.py", "g")).unwrap().is_none());
    }

    #[test]
    fn unchanged_entity_keeps_stored_embedding() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let mut v1 = vec![entity("a.py", "f", "d1", &[])];
        v1[0].embedding = Some(vec![0.25, 0.5]);
        store.upsert_file("a.py", Utc::now(), "fd1", &v1).unwrap();

        // Caller never recomputes embeddings for unchanged digests.
        let v2 = vec![entity("a.py", "f", "d1", &[])];
        store.upsert_file("a.py", Utc::now(), "fd1", &v2).unwrap();
        let stored = store.get_entity(&v2[0].id).unwrap().unwrap();
        assert_eq!(stored.embedding, Some(vec![0.25, 0.5]));
    }

    #[test]
    fn remove_file_drops_all_entities() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let v1 = vec![entity("a.py", "f", "d1", &[]), entity("a.py", "g", "d2", &[])];
        store.upsert_file("a.py", Utc::now(), "fd1", &v1).unwrap();

        let changes = store.remove_file("a.py").unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Removed));
        assert!(store.file_record("a.py").unwrap().is_none());
        let (files, entities) = store.stats().unwrap();
        assert_eq!((files, entities), (0, 0));
    }

    #[test]
    fn callers_resolve_through_edges() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        store
            .upsert_file("a.py", Utc::now(), "fa", &[entity("a.py", "f", "d1", &["g"])])
            .unwrap();
        store
            .upsert_file("b.py", Utc::now(), "fb", &[entity("b.py", "g", "d2", &[])])
            .unwrap();

        let callers = store.callers_of("g").unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].id, EntityId::new("a.py", "f"));
    }

    #[test]
    fn edges_are_rewritten_on_next_touch() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        store
            .upsert_file("a.py", Utc::now(), "fa", &[entity("a.py", "f", "d1", &["gone"])])
            .unwrap();
        assert_eq!(store.callers_of("gone").unwrap().len(), 1);

        // Touching the referencing entity replaces its edge set.
        store
            .upsert_file("a.py", Utc::now(), "fa2", &[entity("a.py", "f", "d2", &["kept"])])
            .unwrap();
        assert!(store.callers_of("gone").unwrap().is_empty());
        assert_eq!(store.callers_of("kept").unwrap().len(), 1);
    }

    #[test]
    fn decisions_deduplicate_by_entity_and_digest() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let id = EntityId::new("a.py", "f");
        assert!(!store.has_decision(&id, "d1").unwrap());
        store
            .record_decision(&FeedbackDecision {
                entity: id.clone(),
                record_id: uuid::Uuid::new_v4(),
                digest: "d1".to_string(),
                should_notify: true,
                message: Some("tighten this up".to_string()),
                tag: Some(ducky_core::FeedbackTag::Style),
                created_at: Utc::now(),
            })
            .unwrap();
        assert!(store.has_decision(&id, "d1").unwrap());
        assert!(!store.has_decision(&id, "d2").unwrap());
    }

    #[test]
    fn embedding_round_trips_through_blob() {
        let values = vec![1.0f32, -0.5, 0.125];
        assert_eq!(blob_to_vec(&vec_to_blob(&values)), values);
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        {
            let store = SqliteIndexStore::open(&db).unwrap();
            store
                .upsert_file("a.py", Utc::now(), "fa", &[entity("a.py", "f", "d1", &[])])
                .unwrap();
        }
        let store = SqliteIndexStore::open(&db).unwrap();
        let loaded = store.get_entity(&EntityId::new("a.py", "f")).unwrap();
        assert!(loaded.is_some());
    }
}
