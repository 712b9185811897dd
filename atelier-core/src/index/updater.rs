//! Rating/tag mutations with canonicalization, plus the best-effort worker
//! that mirrors them into on-disk EXIF/XMP tags.

use crate::error::AtelierError;
use crate::metadata::parsing::canonicalize_tags;
use crate::probes::ExifTool;
use crate::store::{Store, TxMode};
use crossbeam_channel::{unbounded, Receiver, Sender};
use rusqlite::params;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub struct Updater {
    store: Arc<Store>,
    scan_lock: Arc<Mutex<()>>,
    sync: Arc<RatingTagsSync>,
}

impl Updater {
    pub fn new(store: Arc<Store>, scan_lock: Arc<Mutex<()>>, exiftool: Arc<ExifTool>) -> Self {
        Self {
            store,
            scan_lock,
            sync: RatingTagsSync::spawn(exiftool),
        }
    }

    /// Set the rating for an asset, clamped to 0..=5.
    pub fn update_asset_rating(&self, asset_id: i64, rating: i64) -> crate::Result<i64> {
        let rating = rating.clamp(0, 5);
        let filepath = self.require_asset(asset_id)?;

        {
            let _guard = self.scan_lock.lock().expect("scan lock poisoned");
            let tx = self.store.transaction(TxMode::Immediate)?;
            tx.execute(
                "INSERT INTO asset_metadata (asset_id, rating)
                 VALUES (?, ?)
                 ON CONFLICT(asset_id) DO UPDATE SET rating = excluded.rating",
                params![asset_id, rating],
            )?;
            tx.commit()?;
        }

        self.queue_file_sync(&filepath, asset_id);
        Ok(rating)
    }

    /// Replace the tags for an asset with a canonicalized list.
    pub fn update_asset_tags(&self, asset_id: i64, tags: &[String]) -> crate::Result<Vec<String>> {
        let cleaned = canonicalize_tags(tags);
        let tags_json = serde_json::to_string(&cleaned).unwrap_or_else(|_| "[]".into());
        let tags_text = cleaned.join(" ");
        let filepath = self.require_asset(asset_id)?;

        {
            let _guard = self.scan_lock.lock().expect("scan lock poisoned");
            let tx = self.store.transaction(TxMode::Immediate)?;
            tx.execute(
                "INSERT INTO asset_metadata (asset_id, tags, tags_text)
                 VALUES (?, ?, ?)
                 ON CONFLICT(asset_id) DO UPDATE SET
                     tags = excluded.tags,
                     tags_text = excluded.tags_text",
                params![asset_id, tags_json, tags_text],
            )?;
            tx.commit()?;
        }

        self.queue_file_sync(&filepath, asset_id);
        Ok(cleaned)
    }

    /// All unique tags across the index, sorted.
    pub fn get_all_tags(&self) -> crate::Result<Vec<String>> {
        let rows: Vec<String> = self.store.query_map(
            "SELECT tags FROM asset_metadata WHERE tags IS NOT NULL AND tags NOT IN ('', '[]')",
            [],
            |row| row.get(0),
        )?;
        let mut seen = std::collections::HashSet::new();
        let mut out: Vec<String> = Vec::new();
        for raw in rows {
            let Ok(tags) = serde_json::from_str::<Vec<String>>(&raw) else {
                continue;
            };
            for tag in tags {
                if seen.insert(tag.clone()) {
                    out.push(tag);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn require_asset(&self, asset_id: i64) -> crate::Result<String> {
        self.store
            .query_row_opt(
                "SELECT filepath FROM assets WHERE id = ?",
                params![asset_id],
                |row| row.get(0),
            )?
            .ok_or_else(|| AtelierError::NotFound(format!("Asset not found: {asset_id}")))
    }

    /// Mirror the stored rating/tags to the file's embedded tags. Best-effort
    /// and fully asynchronous; the caller never observes a failure.
    fn queue_file_sync(&self, filepath: &str, asset_id: i64) {
        let row: Option<(i64, String)> = self
            .store
            .query_row_opt(
                "SELECT COALESCE(rating, 0), COALESCE(tags, '[]') FROM asset_metadata WHERE asset_id = ?",
                params![asset_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok()
            .flatten();
        let Some((rating, tags_raw)) = row else { return };
        let tags: Vec<String> = serde_json::from_str(&tags_raw).unwrap_or_default();
        self.sync.enqueue(filepath.to_string(), rating, tags);
    }
}

struct SyncTask {
    rating: i64,
    tags: Vec<String>,
}

/// Background worker mirroring rating/tags into file metadata. Updates are
/// coalesced per filepath; only the latest state for a path is written.
struct RatingTagsSync {
    exiftool: Arc<ExifTool>,
    pending: Mutex<HashMap<String, SyncTask>>,
    notify: Sender<()>,
}

impl RatingTagsSync {
    fn spawn(exiftool: Arc<ExifTool>) -> Arc<Self> {
        let (notify, wakeups) = unbounded::<()>();
        let sync = Arc::new(Self {
            exiftool,
            pending: Mutex::new(HashMap::new()),
            notify,
        });

        let worker = sync.clone();
        if let Err(e) = std::thread::Builder::new()
            .name("atelier-tag-sync".into())
            .spawn(move || worker.run(wakeups))
        {
            warn!("failed to spawn rating/tags sync worker: {e}");
        }
        sync
    }

    fn enqueue(&self, filepath: String, rating: i64, tags: Vec<String>) {
        let mut pending = self.pending.lock().expect("sync pending poisoned");
        pending.insert(filepath, SyncTask { rating, tags });
        drop(pending);
        let _ = self.notify.send(());
    }

    fn run(&self, wakeups: Receiver<()>) {
        while wakeups.recv().is_ok() {
            loop {
                let task = {
                    let mut pending = self.pending.lock().expect("sync pending poisoned");
                    match pending.keys().next().cloned() {
                        Some(key) => pending.remove_entry(&key),
                        None => None,
                    }
                };
                let Some((filepath, task)) = task else { break };
                if let Err(e) = self.write_file_tags(&filepath, &task) {
                    debug!(filepath, "rating/tags file sync skipped: {e}");
                }
            }
        }
    }

    /// Write rating/tags into multiple tag namespaces for cross-OS
    /// compatibility, restoring the file mtime afterwards so the change does
    /// not retrigger scans.
    fn write_file_tags(&self, filepath: &str, task: &SyncTask) -> crate::Result<()> {
        if !self.exiftool.is_available() {
            return Err(AtelierError::ToolMissing { tool: "exiftool" });
        }
        let path = Path::new(filepath);
        if !path.is_file() {
            return Err(AtelierError::NotFound(filepath.to_string()));
        }

        let stars = task.rating.clamp(0, 5);
        let percent = windows_rating_percent(stars);
        let joined = task.tags.join("; ");

        let mut payload = Map::new();
        payload.insert("XMP:Rating".into(), json!(stars));
        payload.insert("RatingPercent".into(), json!(percent));
        payload.insert("Microsoft:SharedUserRating".into(), json!(percent));
        payload.insert("Microsoft:Category".into(), json!(joined));
        payload.insert("XMP:Subject".into(), json!(task.tags));
        payload.insert("IPTC:Keywords".into(), json!(task.tags));
        payload.insert("XPKeywords".into(), json!(joined));
        payload.insert("Keywords".into(), json!(joined));
        payload.insert("Subject".into(), json!(joined));

        // Clearing tags: write explicit empties across all namespaces.
        if task.tags.is_empty() {
            payload.insert("XMP:Subject".into(), json!([]));
            payload.insert("IPTC:Keywords".into(), json!([]));
            payload.insert("Microsoft:Category".into(), json!(""));
            payload.insert("XPKeywords".into(), json!(""));
            payload.insert("Keywords".into(), json!(""));
            payload.insert("Subject".into(), json!(""));
        }

        let original_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        self.exiftool.write(path, &payload, true)?;

        if let Some(mtime) = original_mtime {
            if let Err(e) = restore_mtime(path, mtime) {
                debug!(filepath, "failed to restore mtime after tag write: {e}");
            }
        }
        Ok(())
    }
}

/// Windows Explorer's star-to-percent mapping.
fn windows_rating_percent(stars: i64) -> i64 {
    match stars.clamp(0, 5) {
        0 => 0,
        1 => 1,
        2 => 25,
        3 => 50,
        4 => 75,
        _ => 99,
    }
}

fn restore_mtime(path: &Path, mtime: std::time::SystemTime) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(mtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_rating_percent_map() {
        assert_eq!(windows_rating_percent(0), 0);
        assert_eq!(windows_rating_percent(1), 1);
        assert_eq!(windows_rating_percent(2), 25);
        assert_eq!(windows_rating_percent(3), 50);
        assert_eq!(windows_rating_percent(4), 75);
        assert_eq!(windows_rating_percent(5), 99);
        assert_eq!(windows_rating_percent(9), 99);
        assert_eq!(windows_rating_percent(-1), 0);
    }

    #[test]
    fn test_sync_worker_survives_missing_tool() {
        let exiftool = Arc::new(ExifTool::new("missing-tool", std::time::Duration::from_secs(1)));
        let sync = RatingTagsSync::spawn(exiftool);
        sync.enqueue("/nonexistent/x.png".into(), 3, vec!["a".into()]);
        // Worker drains without panicking even when the tool is missing.
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(sync.pending.lock().unwrap().len() <= 1);
    }
}
