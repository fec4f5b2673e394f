use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub type RecordId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Other(String),
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rust" => Ok(Language::Rust),
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::JavaScript),
            "typescript" => Ok(Language::TypeScript),
            "go" => Ok(Language::Go),
            other => Ok(Language::Other(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Function,
    Method,
    Class,
    Module,
    /// Whole-file fallback entity used when a source file cannot be parsed.
    File,
    Other(String),
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Function => "function",
            EntityKind::Method => "method",
            EntityKind::Class => "class",
            EntityKind::Module => "module",
            EntityKind::File => "file",
            EntityKind::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "function" => Ok(EntityKind::Function),
            "method" => Ok(EntityKind::Method),
            "class" => Ok(EntityKind::Class),
            "module" => Ok(EntityKind::Module),
            "file" => Ok(EntityKind::File),
            other => Ok(EntityKind::Other(other.to_string())),
        }
    }
}

/// Stable identity of a code entity: project-relative path plus qualified name.
///
/// The identity survives edits as long as the entity keeps its name and file;
/// moving an entity to another file produces a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(path: &str, qualified_name: &str) -> Self {
        Self(format!("{}::{}", path, qualified_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn path(&self) -> &str {
        self.0.split_once("::").map(|(p, _)| p).unwrap_or(&self.0)
    }

    pub fn qualified_name(&self) -> &str {
        self.0.split_once("::").map(|(_, n)| n).unwrap_or("")
    }

    /// Terminal name segment, used to resolve call edges across files.
    pub fn short_name(&self) -> &str {
        short_name(self.qualified_name())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Last segment of a qualified name (`Type::method` -> `method`, `pkg.fn` -> `fn`).
pub fn short_name(qualified: &str) -> &str {
    qualified
        .rsplit(|c| c == ':' || c == '.')
        .next()
        .unwrap_or(qualified)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub qualified_name: String,
    pub path: String,
    pub language: Language,
    pub span: Span,
    /// Hex SHA-256 of the normalized entity text.
    pub digest: String,
    pub raw_text: String,
    pub embedding: Option<Vec<f32>>,
    pub last_seen: DateTime<Utc>,
    /// Unresolved names this entity structurally depends on (calls, imports).
    pub depends_on: Vec<String>,
    /// False for the whole-file fallback entity of an unparsable source file.
    pub parsed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub modified: DateTime<Utc>,
    pub digest: String,
    pub entities: Vec<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
            ChangeKind::Renamed => "renamed",
        };
        write!(f, "{}", s)
    }
}

/// Entity-level outcome of one `upsert_file`/`remove_file` call; the raw
/// material change records are built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityChange {
    pub id: EntityId,
    pub kind: ChangeKind,
    pub old_digest: Option<String>,
    pub new_digest: Option<String>,
    pub old_text: Option<String>,
}

/// Immutable record of one entity-level change, emitted once per
/// reconciliation pass per affected entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: RecordId,
    pub entity: EntityId,
    pub kind: ChangeKind,
    pub entity_kind: EntityKind,
    pub language: Language,
    pub old_digest: Option<String>,
    pub new_digest: Option<String>,
    pub old_text: Option<String>,
    pub new_text: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub parsed: bool,
    /// True when the embedding for this change could not be computed; the
    /// entity is indexed anyway but feedback is suppressed.
    pub embedding_missing: bool,
}

impl ChangeRecord {
    /// Digest that feedback deduplication keys on: the new content when
    /// present, the removed content otherwise.
    pub fn dedup_digest(&self) -> Option<&str> {
        self.new_digest.as_deref().or(self.old_digest.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackTag {
    Style,
    Correctness,
    Consistency,
    Debt,
}

impl fmt::Display for FeedbackTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedbackTag::Style => "style",
            FeedbackTag::Correctness => "correctness",
            FeedbackTag::Consistency => "consistency",
            FeedbackTag::Debt => "debt",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for FeedbackTag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "style" => Ok(FeedbackTag::Style),
            "correctness" => Ok(FeedbackTag::Correctness),
            "consistency" => Ok(FeedbackTag::Consistency),
            "debt" => Ok(FeedbackTag::Debt),
            other => Err(format!("unknown feedback tag: {}", other)),
        }
    }
}

/// Persisted outcome of deciding whether to tell the developer about a change.
/// Keyed by `(entity, digest)` for session-level deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackDecision {
    pub entity: EntityId,
    pub record_id: RecordId,
    pub digest: String,
    pub should_notify: bool,
    pub message: Option<String>,
    pub tag: Option<FeedbackTag>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
    Renamed { from: PathBuf },
}

/// Raw filesystem event as delivered by the watch layer. May arrive out of
/// order or coalesced; the pipeline never assumes exactly-once delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralSummary {
    pub path: String,
    pub kind: EntityKind,
    pub module: String,
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedSnippet {
    pub id: EntityId,
    pub kind: EntityKind,
    pub distance: u32,
    pub score: f32,
    pub text: String,
}

/// Bounded context assembled for one reasoning-collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub entity: EntityId,
    pub change: ChangeKind,
    pub summary: StructuralSummary,
    pub before: Option<String>,
    pub after: Option<String>,
    pub related: Vec<RelatedSnippet>,
}

impl ContextBundle {
    pub fn char_len(&self) -> usize {
        self.before.as_deref().map_or(0, str::len)
            + self.after.as_deref().map_or(0, str::len)
            + self.related.iter().map(|r| r.text.len()).sum::<usize>()
    }
}

/// Structured verdict returned by the reasoning collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub should_notify: bool,
    pub message: Option<String>,
    pub tag: Option<FeedbackTag>,
}

impl ReviewResponse {
    /// The fail-closed verdict: never surface garbage as feedback.
    pub fn suppress() -> Self {
        Self {
            should_notify: false,
            message: None,
            tag: None,
        }
    }
}
