use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use ducky_core::{DuckyError, ProjectConfig, Result, WatchEvent, WatchEventKind};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Paths never worth watching, merged with user-configured globs.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/.git/**",
    "**/.hg/**",
    "**/.svn/**",
    "**/target/**",
    "**/node_modules/**",
    "**/__pycache__/**",
    "**/.venv/**",
    "**/venv/**",
    "**/dist/**",
    "**/build/**",
    "**/.ducky/**",
    "**/*.min.js",
];

/// Filters raw filesystem events down to tracked source files and maps them
/// into the pipeline's event model.
#[derive(Clone)]
pub struct ProjectWatcher {
    root: PathBuf,
    ignore: GlobSet,
    include_exts: HashSet<String>,
}

impl ProjectWatcher {
    pub fn new(config: &ProjectConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .chain(config.ignore.iter().cloned())
        {
            let glob = Glob::new(&pattern)
                .map_err(|e| DuckyError::Config(format!("bad ignore glob {:?}: {}", pattern, e)))?;
            builder.add(glob);
        }
        let ignore = builder
            .build()
            .map_err(|e| DuckyError::Config(e.to_string()))?;

        Ok(Self {
            root: config.root.clone(),
            ignore,
            include_exts: config.include_exts.iter().cloned().collect(),
        })
    }

    /// Extension and ignore check only; deliberately no filesystem access so
    /// it also works for paths that no longer exist (deletes, rename sources).
    pub fn should_track(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            return false;
        };
        if !self.include_exts.contains(ext) {
            return false;
        }
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        !self.ignore.is_match(rel)
    }

    fn should_descend(&self, dir: &Path) -> bool {
        let rel = dir.strip_prefix(&self.root).unwrap_or(dir);
        !self.ignore.is_match(rel.join("probe"))
    }

    /// Start the OS watcher; events land on `tx` already filtered. The
    /// returned watcher must be kept alive for as long as events are wanted.
    pub fn spawn(&self, tx: UnboundedSender<WatchEvent>) -> Result<RecommendedWatcher> {
        let tracker = self.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for mapped in map_event(&tracker, event) {
                    let _ = tx.send(mapped);
                }
            }
            Err(e) => warn!(error = %e, "file watcher error"),
        })
        .map_err(|e| DuckyError::Watch(e.to_string()))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| DuckyError::Watch(e.to_string()))?;
        debug!(root = %self.root.display(), "watching project");
        Ok(watcher)
    }

    /// One-time walk of the project used by the initial scan.
    pub async fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if self.should_descend(&path) {
                        stack.push(path);
                    }
                } else if file_type.is_file() && self.should_track(&path) {
                    out.push(path);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

fn map_event(tracker: &ProjectWatcher, event: Event) -> Vec<WatchEvent> {
    let timestamp = Utc::now();
    let make = |path: &PathBuf, kind: WatchEventKind| WatchEvent {
        path: path.clone(),
        kind,
        timestamp,
    };

    match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| tracker.should_track(p))
            .map(|p| make(p, WatchEventKind::Created))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter(|p| tracker.should_track(p))
            .map(|p| make(p, WatchEventKind::Removed))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                if tracker.should_track(to) {
                    return vec![make(
                        to,
                        WatchEventKind::Renamed { from: from.clone() },
                    )];
                }
                if tracker.should_track(from) {
                    // Moved out of tracked scope; all that remains is the removal.
                    return vec![make(from, WatchEventKind::Removed)];
                }
            }
            Vec::new()
        }
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| tracker.should_track(p))
            .map(|p| make(p, WatchEventKind::Modified))
            .collect(),
        _ => Vec::new(),
    }
}
