use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

/// Absorbs bursts from the filesystem watcher. Every raw event restarts the
/// file's quiet-period timer; only when the quiet period elapses with no
/// further events does the path settle and get handed to the reconciler.
/// Timers are independent per file, and there is deliberately no upper bound
/// on delay: a continuously edited file never settles until editing pauses.
pub struct DebounceScheduler {
    quiet: Duration,
    pending: Arc<DashMap<PathBuf, u64>>,
    settled_tx: UnboundedSender<PathBuf>,
}

impl DebounceScheduler {
    pub fn new(quiet: Duration, settled_tx: UnboundedSender<PathBuf>) -> Self {
        Self {
            quiet,
            pending: Arc::new(DashMap::new()),
            settled_tx,
        }
    }

    /// Record a raw event for `path`, resetting its quiet-period timer.
    ///
    /// A generation counter per path makes the reset cheap: each event bumps
    /// the generation and arms a fresh timer; a timer only fires if its
    /// generation is still current when it wakes. Delete-then-recreate inside
    /// one window therefore collapses to a single settle, and the reconciler
    /// diffs the final on-disk state (the net effect, not both transitions).
    pub fn observe(&self, path: PathBuf) {
        let generation = {
            let mut entry = self.pending.entry(path.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        trace!(path = %path.display(), generation, "debounce timer reset");

        let pending = Arc::clone(&self.pending);
        let tx = self.settled_tx.clone();
        let quiet = self.quiet;
        tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            if pending
                .remove_if(&path, |_, current| *current == generation)
                .is_some()
            {
                let _ = tx.send(path);
            }
        });
    }

    pub fn pending_files(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn rapid_events_settle_exactly_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = DebounceScheduler::new(Duration::from_millis(600), tx);

        for _ in 0..10 {
            scheduler.observe(PathBuf::from("a.py"));
        }
        assert_eq!(scheduler.pending_files(), 1);

        let settled = rx.recv().await.unwrap();
        assert_eq!(settled, PathBuf::from("a.py"));
        assert_eq!(scheduler.pending_files(), 0);

        // Nothing else fires once the window is drained.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn files_debounce_independently() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = DebounceScheduler::new(Duration::from_millis(600), tx);

        scheduler.observe(PathBuf::from("a.py"));
        scheduler.observe(PathBuf::from("b.py"));
        assert_eq!(scheduler.pending_files(), 2);

        let mut settled = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        settled.sort();
        assert_eq!(settled, vec![PathBuf::from("a.py"), PathBuf::from("b.py")]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_event_resets_the_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = DebounceScheduler::new(Duration::from_millis(600), tx);

        scheduler.observe(PathBuf::from("a.py"));
        tokio::time::advance(Duration::from_millis(500)).await;
        // Still inside the window; this resets it.
        scheduler.observe(PathBuf::from("a.py"));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err(), "timer must have been reset");

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(rx.recv().await.unwrap(), PathBuf::from("a.py"));
    }
}
