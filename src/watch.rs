//! Snapshot change watcher
//!
//! Watches the snapshot's containing directory and turns the two file
//! lifecycle events the bridge cares about into signals for the run loop:
//! - the snapshot was atomically renamed into place -> `SnapshotReady`
//! - the snapshot was deleted (readsb stopped) -> `SourceGone`
//!
//! The notify callback runs on its own thread; the handoff to the run
//! loop is a capacity-1 channel written with `try_send`, so bursts of
//! rename events coalesce into a single pending update and the run loop
//! only ever does a non-blocking receive.

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// A complete new snapshot was moved into place.
    SnapshotReady,
    /// The snapshot was deleted; the producer has stopped.
    SourceGone,
}

/// Owns the filesystem watch. Dropping it releases the subscription.
pub struct SnapshotWatcher {
    _watcher: RecommendedWatcher,
}

/// Receiving side of the watcher signals, polled by the run loop.
pub struct WatchSignals {
    ready: mpsc::Receiver<()>,
    gone: mpsc::Receiver<()>,
}

impl WatchSignals {
    /// Wait for the next signal. `SourceGone` wins over a pending
    /// `SnapshotReady` since it aborts the run anyway.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        tokio::select! {
            biased;
            Some(()) = self.gone.recv() => Some(WatchEvent::SourceGone),
            Some(()) = self.ready.recv() => Some(WatchEvent::SnapshotReady),
            else => None,
        }
    }
}

/// Start watching `dir` for lifecycle events of `file_name`.
///
/// Events for any other filename in the directory are ignored.
pub fn watch(dir: &Path, file_name: &str) -> Result<(SnapshotWatcher, WatchSignals)> {
    let (ready_tx, ready_rx) = mpsc::channel(1);
    let (gone_tx, gone_rx) = mpsc::channel(1);
    let expected = OsString::from(file_name);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("watch error: {e}");
                    return;
                }
            };
            if !event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(expected.as_os_str()))
            {
                return;
            }
            match event.kind {
                EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                    // Full slot means an update is already pending.
                    let _ = ready_tx.try_send(());
                }
                EventKind::Remove(RemoveKind::File) => {
                    let _ = gone_tx.try_send(());
                }
                _ => {}
            }
        },
        notify::Config::default(),
    )
    .context("creating filesystem watcher failed")?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("cannot watch {}: readsb running?", dir.display()))?;

    Ok((
        SnapshotWatcher { _watcher: watcher },
        WatchSignals { ready: ready_rx, gone: gone_rx },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const EVENT_WAIT: Duration = Duration::from_secs(2);

    fn move_snapshot_into_place(dir: &Path, name: &str) {
        let tmp = dir.join("wip.tmp");
        fs::write(&tmp, b"payload").unwrap();
        fs::rename(&tmp, dir.join(name)).unwrap();
    }

    #[tokio::test]
    async fn rename_into_place_signals_ready() {
        let dir = TempDir::new().unwrap();
        let (_watcher, mut signals) = watch(dir.path(), "stats.pb").unwrap();

        move_snapshot_into_place(dir.path(), "stats.pb");

        let event = timeout(EVENT_WAIT, signals.next()).await.unwrap();
        assert_eq!(event, Some(WatchEvent::SnapshotReady));
    }

    #[tokio::test]
    async fn removal_signals_source_gone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stats.pb"), b"payload").unwrap();
        let (_watcher, mut signals) = watch(dir.path(), "stats.pb").unwrap();

        fs::remove_file(dir.path().join("stats.pb")).unwrap();

        let event = timeout(EVENT_WAIT, signals.next()).await.unwrap();
        assert_eq!(event, Some(WatchEvent::SourceGone));
    }

    #[tokio::test]
    async fn unrelated_filenames_are_ignored() {
        let dir = TempDir::new().unwrap();
        let (_watcher, mut signals) = watch(dir.path(), "stats.pb").unwrap();

        move_snapshot_into_place(dir.path(), "other.pb");
        fs::remove_file(dir.path().join("other.pb")).unwrap();

        let result = timeout(Duration::from_millis(300), signals.next()).await;
        assert!(result.is_err(), "no signal expected for other filenames");
    }

    #[tokio::test]
    async fn rapid_replacements_coalesce_into_one_signal() {
        let dir = TempDir::new().unwrap();
        let (_watcher, mut signals) = watch(dir.path(), "stats.pb").unwrap();

        for _ in 0..3 {
            move_snapshot_into_place(dir.path(), "stats.pb");
        }
        // let the callback thread process the whole burst
        tokio::time::sleep(Duration::from_millis(500)).await;

        let event = timeout(EVENT_WAIT, signals.next()).await.unwrap();
        assert_eq!(event, Some(WatchEvent::SnapshotReady));
        assert!(
            signals.ready.try_recv().is_err(),
            "burst must collapse to a single pending update"
        );
    }
}
