use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use ducky_core::{
    ChangeKind, ChangeRecord, ContextBundle, Entity, EntityId, RelatedSnippet, Result,
    RetrievalConfig, StructuralSummary,
};
use tracing::debug;

use crate::store::SqliteIndexStore;

/// Graph distance assigned to same-file siblings that are not reachable
/// through call edges; near, but weaker than a direct dependency.
const SIBLING_DISTANCE: u32 = 2;

#[derive(Debug, Clone)]
pub struct RelatedEntity {
    pub entity: Entity,
    pub distance: u32,
    pub similarity: f32,
    pub score: f32,
}

/// Bounded breadth-first walk over the dependency graph around `id`, plus
/// same-file siblings, ranked by a blend of graph distance, embedding cosine
/// similarity and recency. Ties break on smaller distance, then higher
/// similarity, then more recent modification.
pub fn get_related(
    store: &SqliteIndexStore,
    id: &EntityId,
    cfg: &RetrievalConfig,
    now: DateTime<Utc>,
) -> Result<Vec<RelatedEntity>> {
    let Some(origin) = store.get_entity(id)? else {
        return Ok(Vec::new());
    };

    let mut visited: HashSet<EntityId> = HashSet::new();
    visited.insert(id.clone());
    let mut candidates: Vec<(Entity, u32)> = Vec::new();
    let mut frontier = vec![origin.clone()];

    for depth in 1..=cfg.max_hops {
        let mut next = Vec::new();
        for entity in frontier.drain(..) {
            for neighbor in neighbors(store, &entity)? {
                if visited.insert(neighbor.id.clone()) {
                    candidates.push((neighbor.clone(), depth));
                    next.push(neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    for sibling in store.entities_in_file(&origin.path)? {
        if visited.insert(sibling.id.clone()) {
            candidates.push((sibling, SIBLING_DISTANCE));
        }
    }

    let mut ranked: Vec<RelatedEntity> = candidates
        .into_iter()
        .map(|(entity, distance)| {
            let similarity = match (&origin.embedding, &entity.embedding) {
                (Some(a), Some(b)) => cosine_similarity(a, b),
                _ => 0.0,
            };
            let recency = recency_weight(now, entity.last_seen, cfg.recency_half_life_secs);
            let graph = 1.0 / (1.0 + distance as f32);
            let score = cfg.weights.graph * graph
                + cfg.weights.semantic * similarity
                + cfg.weights.recency * recency;
            RelatedEntity {
                entity,
                distance,
                similarity,
                score,
            }
        })
        .collect();

    ranked.sort_by(compare_related);
    ranked.truncate(cfg.max_results);
    debug!(origin = %id, related = ranked.len(), "related entities retrieved");
    Ok(ranked)
}

fn compare_related(a: &RelatedEntity, b: &RelatedEntity) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.distance.cmp(&b.distance))
        .then(
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal),
        )
        .then(b.entity.last_seen.cmp(&a.entity.last_seen))
}

fn neighbors(store: &SqliteIndexStore, entity: &Entity) -> Result<Vec<Entity>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for name in &entity.depends_on {
        for callee in store.resolve_name(name)? {
            if callee.id != entity.id && seen.insert(callee.id.clone()) {
                out.push(callee);
            }
        }
    }
    for caller in store.callers_of(entity.id.short_name())? {
        if caller.id != entity.id && seen.insert(caller.id.clone()) {
            out.push(caller);
        }
    }
    Ok(out)
}

fn recency_weight(now: DateTime<Utc>, last_seen: DateTime<Utc>, half_life_secs: u64) -> f32 {
    let age = (now - last_seen).num_seconds().max(0) as f32;
    0.5f32.powf(age / half_life_secs.max(1) as f32)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Assemble the bounded context bundle for one change record: changed text
/// before/after, a short structural summary, and as many related entities as
/// the character budget allows, lowest-ranked dropped first.
pub fn build_bundle(
    store: &SqliteIndexStore,
    record: &ChangeRecord,
    cfg: &RetrievalConfig,
    now: DateTime<Utc>,
) -> Result<ContextBundle> {
    let path = record.entity.path().to_string();
    let module = std::path::Path::new(&path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&path)
        .to_string();
    let summary = StructuralSummary {
        path,
        kind: record.entity_kind.clone(),
        module,
        language: record.language.clone(),
    };

    let budget = cfg.max_context_chars;
    let per_side = budget / 2;
    let before = record
        .old_text
        .as_deref()
        .map(|t| truncate_chars(t, per_side).to_string());
    let after = record
        .new_text
        .as_deref()
        .map(|t| truncate_chars(t, per_side).to_string());
    let mut used = before.as_deref().map_or(0, str::len) + after.as_deref().map_or(0, str::len);

    let ranked = match record.kind {
        // The removed entity is gone from the index; what remains relevant is
        // whoever still depends on it.
        ChangeKind::Removed => store
            .callers_of(record.entity.short_name())?
            .into_iter()
            .map(|entity| RelatedEntity {
                entity,
                distance: 1,
                similarity: 0.0,
                score: cfg.weights.graph / 2.0,
            })
            .collect(),
        _ => get_related(store, &record.entity, cfg, now)?,
    };

    let mut related = Vec::new();
    for item in ranked {
        let text = truncate_chars(&item.entity.raw_text, cfg.max_snippet_chars).to_string();
        if used + text.len() > budget {
            break;
        }
        used += text.len();
        related.push(RelatedSnippet {
            id: item.entity.id.clone(),
            kind: item.entity.kind.clone(),
            distance: item.distance,
            score: item.score,
            text,
        });
    }

    Ok(ContextBundle {
        entity: record.entity.clone(),
        change: record.kind,
        summary,
        before,
        after,
        related,
    })
}

fn truncate_chars(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
