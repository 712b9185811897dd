//! Filesystem watcher: converts OS events into index mutations.
//!
//! Events are debounced per path, temp files are filtered, and moves are
//! decomposed into a remove of the source and an add of the destination. Adds
//! wait out a settle delay so in-flight writers can finish.

use super::IndexService;
use crate::asset::Source;
use crate::config::WatcherConfig;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TEMP_SUFFIXES: &[&str] = &["tmp", "crdownload", "part", "lock", "aria2"];
/// Debounce map is cleared wholesale once it grows past this.
const DEBOUNCE_MAP_MAX: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Add,
    Remove,
}

#[derive(Debug, Clone)]
struct Job {
    action: Action,
    path: PathBuf,
}

/// Watches a set of directories and keeps the index in sync with create,
/// modify, move, and delete events.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    shutdown: Arc<AtomicBool>,
    tx: Sender<Job>,
}

impl DirectoryWatcher {
    /// Start watching `directories` recursively. Returns `None` when no
    /// directory could be scheduled.
    pub fn start(
        index: Arc<IndexService>,
        directories: Vec<PathBuf>,
        config: &WatcherConfig,
    ) -> Option<DirectoryWatcher> {
        let (tx, rx) = unbounded::<Job>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let event_tx = tx.clone();
        let mut watcher = match notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => dispatch_event(&event_tx, event),
                Err(e) => debug!("watch error: {e}"),
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                warn!("failed to create filesystem watcher: {e}");
                return None;
            }
        };

        let mut scheduled = 0;
        for dir in &directories {
            if !dir.is_dir() {
                continue;
            }
            match watcher.watch(dir, RecursiveMode::Recursive) {
                Ok(()) => scheduled += 1,
                Err(e) => warn!(dir = %dir.display(), "failed to watch: {e}"),
            }
        }
        if scheduled == 0 {
            warn!("file watcher disabled: no watchable directories");
            return None;
        }
        info!(directories = scheduled, "file watcher started (event-driven)");

        let worker_shutdown = shutdown.clone();
        let debounce = Duration::from_millis(config.debounce_ms.max(1));
        let settle = Duration::from_millis(config.settle_ms);
        let roots = directories;
        std::thread::Builder::new()
            .name("atelier-watcher".into())
            .spawn(move || worker(index, rx, worker_shutdown, debounce, settle, roots))
            .map_err(|e| warn!("failed to spawn watcher worker: {e}"))
            .ok()?;

        Some(DirectoryWatcher {
            _watcher: watcher,
            shutdown,
            tx,
        })
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        info!("file watcher stopped");
    }

    /// Submit a synthetic job, bypassing the OS event source. Only used by
    /// integration tests.
    pub fn submit_add(&self, path: PathBuf) {
        let _ = self.tx.send(Job {
            action: Action::Add,
            path,
        });
    }

    /// Synthetic remove counterpart of [`DirectoryWatcher::submit_add`].
    pub fn submit_remove(&self, path: PathBuf) {
        let _ = self.tx.send(Job {
            action: Action::Remove,
            path,
        });
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_event(tx: &Sender<Job>, event: Event) {
    match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
            for path in event.paths {
                let _ = tx.send(Job {
                    action: Action::Add,
                    path,
                });
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Move: remove(src) + add(dst).
            let mut paths = event.paths.into_iter();
            if let Some(src) = paths.next() {
                let _ = tx.send(Job {
                    action: Action::Remove,
                    path: src,
                });
            }
            if let Some(dst) = paths.next() {
                let _ = tx.send(Job {
                    action: Action::Add,
                    path: dst,
                });
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in event.paths {
                let _ = tx.send(Job {
                    action: Action::Remove,
                    path,
                });
            }
        }
        // RenameMode::To and plain content modifications both become adds.
        EventKind::Modify(_) => {
            for path in event.paths {
                let _ = tx.send(Job {
                    action: Action::Add,
                    path,
                });
            }
        }
        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
            for path in event.paths {
                let _ = tx.send(Job {
                    action: Action::Remove,
                    path,
                });
            }
        }
        _ => {}
    }
}

fn is_valid_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.is_empty() || name.starts_with('.') {
        return false;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => !TEMP_SUFFIXES.contains(&ext.to_ascii_lowercase().as_str()),
        None => true,
    }
}

fn worker(
    index: Arc<IndexService>,
    rx: Receiver<Job>,
    shutdown: Arc<AtomicBool>,
    debounce: Duration,
    settle: Duration,
    roots: Vec<PathBuf>,
) {
    let mut last_events: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let job = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        if job.path.is_dir() || !is_valid_file(&job.path) {
            continue;
        }

        // Per-path debounce: created + modified bursts collapse into one add.
        if job.action == Action::Add {
            let now = Instant::now();
            if let Some(last) = last_events.get(&job.path) {
                if now.duration_since(*last) < debounce {
                    continue;
                }
            }
            if last_events.len() > DEBOUNCE_MAP_MAX {
                last_events.clear();
            }
            last_events.insert(job.path.clone(), now);
        }

        match job.action {
            Action::Remove => {
                let filepath = job.path.to_string_lossy();
                if let Err(e) = index.remove_path(&filepath) {
                    debug!(%filepath, "watcher remove failed: {e}");
                }
            }
            Action::Add => {
                // Let the writing process finish before probing the file.
                std::thread::sleep(settle);
                let base_dir = roots
                    .iter()
                    .find(|root| job.path.starts_with(root))
                    .cloned()
                    .unwrap_or_else(|| {
                        job.path
                            .parent()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| PathBuf::from("."))
                    });
                if let Err(e) =
                    index.index_paths(&[job.path.clone()], &base_dir, true, Source::Output, None)
                {
                    debug!(path = %job.path.display(), "watcher index failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_file_filters() {
        assert!(is_valid_file(Path::new("/out/a.png")));
        assert!(!is_valid_file(Path::new("/out/.hidden.png")));
        assert!(!is_valid_file(Path::new("/out/a.tmp")));
        assert!(!is_valid_file(Path::new("/out/a.crdownload")));
        assert!(!is_valid_file(Path::new("/out/a.part")));
        assert!(!is_valid_file(Path::new("/out/dl.aria2")));
        assert!(is_valid_file(Path::new("/out/noext")));
    }
}
