use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DuckyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Root directory of the watched project.
    pub root: PathBuf,
    /// File extensions considered source code.
    pub include_exts: Vec<String>,
    /// Extra ignore globs merged with the built-in set.
    pub ignore: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include_exts: ["rs", "py", "js", "jsx", "ts", "tsx", "go"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period per file; the timer restarts on every raw event.
    pub quiet_period_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Database path; relative paths resolve under the project root.
    pub db_path: PathBuf,
    /// When true, comment edits count as content changes.
    pub comments_matter: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".ducky/index.db"),
            comments_matter: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalWeights {
    pub graph: f32,
    pub semantic: f32,
    pub recency: f32,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            graph: 0.5,
            semantic: 0.35,
            recency: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_hops: u32,
    pub max_results: usize,
    /// Hard character budget for one context bundle.
    pub max_context_chars: usize,
    /// Per-related-entity snippet cap.
    pub max_snippet_chars: usize,
    pub weights: RetrievalWeights,
    pub recency_half_life_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            max_results: 8,
            max_context_chars: 24_000,
            max_snippet_chars: 2_000,
            weights: RetrievalWeights::default(),
            recency_half_life_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            timeout_secs: 30,
            max_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_output_tokens: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_output_tokens: 1024,
            timeout_secs: 60,
            max_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Reasoning calls allowed in flight at once; excess changes queue.
    pub max_concurrent_reviews: usize,
    /// Consecutive reasoning failures before feedback generation pauses.
    pub degraded_threshold: u32,
    /// While paused, one in `degraded_probe_every` eligible changes still
    /// dispatches, so the pipeline notices recovery.
    pub degraded_probe_every: u32,
    /// Review whole-file fallback entities from unparsable sources.
    pub review_unparsed: bool,
    /// Optional local notification service; feedback is logged when unset.
    pub notify_url: Option<String>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reviews: 1,
            degraded_threshold: 3,
            degraded_probe_every: 5,
            review_unparsed: false,
            notify_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckyConfig {
    pub project: ProjectConfig,
    pub watch: WatchConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub reasoning: ReasoningConfig,
    pub feedback: FeedbackConfig,
}

impl DuckyConfig {
    /// Layered load: defaults, then an optional TOML file, then `DUCKY_*`
    /// environment variables (`DUCKY_WATCH__QUIET_PERIOD_MS=250`).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        match file {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                builder = builder.add_source(config::File::with_name("ducky").required(false));
            }
        }
        builder = builder.add_source(
            config::Environment::with_prefix("DUCKY")
                .separator("__")
                .try_parsing(true),
        );
        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DuckyError::Config(e.to_string()))
    }

    pub fn db_path(&self) -> PathBuf {
        if self.index.db_path.is_absolute() {
            self.index.db_path.clone()
        } else {
            self.project.root.join(&self.index.db_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = DuckyConfig::default();
        assert_eq!(cfg.watch.quiet_period_ms, 600);
        assert_eq!(cfg.feedback.max_concurrent_reviews, 1);
        assert!(cfg.retrieval.max_context_chars > 0);
        assert!(!cfg.index.comments_matter);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[watch]\nquiet_period_ms = 250\n\n[retrieval]\nmax_results = 3\n"
        )
        .unwrap();
        let cfg = DuckyConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.watch.quiet_period_ms, 250);
        assert_eq!(cfg.retrieval.max_results, 3);
        // Untouched sections keep defaults.
        assert_eq!(cfg.feedback.degraded_threshold, 3);
    }

    #[test]
    fn relative_db_path_resolves_under_root() {
        let mut cfg = DuckyConfig::default();
        cfg.project.root = PathBuf::from("/tmp/project");
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/project/.ducky/index.db"));
    }
}
