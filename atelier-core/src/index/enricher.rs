//! Background metadata enrichment for assets indexed in fast mode.

use super::meta_rows::{
    compute_state_hash, metadata_error_record, retrieve_cached_metadata, store_metadata_cache,
    write_asset_metadata_row,
};
use crate::metadata::MetadataService;
use crate::store::{Store, TxMode};
use rusqlite::params;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const ENRICH_CHUNK: usize = 64;

struct EnrichState {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    running: bool,
}

/// Drains a deduplicated queue of file paths on a background thread,
/// computing metadata and writing the rows under the scan write lock. The
/// worker exits when the queue runs dry.
pub struct Enricher {
    store: Arc<Store>,
    metadata: Arc<MetadataService>,
    scan_lock: Arc<Mutex<()>>,
    state: Mutex<EnrichState>,
}

impl Enricher {
    pub fn new(store: Arc<Store>, metadata: Arc<MetadataService>, scan_lock: Arc<Mutex<()>>) -> Self {
        Self {
            store,
            metadata,
            scan_lock,
            state: Mutex::new(EnrichState {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                running: false,
            }),
        }
    }

    /// Enqueue files for background enrichment, spawning the worker when it
    /// is not already running.
    pub fn start_enrichment(this: &Arc<Self>, filepaths: Vec<String>) {
        let cleaned: Vec<String> = filepaths.into_iter().filter(|p| !p.is_empty()).collect();
        if cleaned.is_empty() {
            return;
        }

        let spawn = {
            let mut state = this.state.lock().expect("enrich state poisoned");
            for fp in cleaned {
                if state.queued.insert(fp.clone()) {
                    state.queue.push_back(fp);
                }
            }
            if state.running {
                false
            } else {
                state.running = true;
                true
            }
        };

        if spawn {
            let worker = this.clone();
            std::thread::Builder::new()
                .name("atelier-enricher".into())
                .spawn(move || worker.worker())
                .map(|_| ())
                .unwrap_or_else(|e| {
                    warn!("failed to spawn enrichment worker: {e}");
                    let mut state = this.state.lock().expect("enrich state poisoned");
                    state.running = false;
                });
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().expect("enrich state poisoned").queue.len()
    }

    fn worker(self: Arc<Self>) {
        loop {
            let chunk: Vec<String> = {
                let mut state = self.state.lock().expect("enrich state poisoned");
                if state.queue.is_empty() {
                    state.running = false;
                    return;
                }
                let take = state.queue.len().min(ENRICH_CHUNK);
                let chunk: Vec<String> = state.queue.drain(..take).collect();
                for fp in &chunk {
                    state.queued.remove(fp);
                }
                chunk
            };
            if let Err(e) = self.enrich_chunk(&chunk) {
                debug!("enrichment chunk failed: {e}");
            }
        }
    }

    fn enrich_chunk(&self, filepaths: &[String]) -> crate::Result<()> {
        if filepaths.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; filepaths.len()].join(",");
        let rows: Vec<(i64, String)> = self.store.query_map(
            &format!("SELECT id, filepath FROM assets WHERE filepath IN ({placeholders})"),
            rusqlite::params_from_iter(filepaths.iter()),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let id_by_fp: HashMap<String, i64> = rows.into_iter().map(|(id, fp)| (fp, id)).collect();

        struct Update {
            asset_id: i64,
            filepath: String,
            state_hash: String,
            record: crate::metadata::extractors::MetadataRecord,
            cache_store: bool,
        }
        let mut updates: Vec<Update> = Vec::new();

        for fp in filepaths {
            let Some(&asset_id) = id_by_fp.get(fp) else {
                continue;
            };
            let path = Path::new(fp);
            let Ok(meta) = std::fs::metadata(path) else {
                continue;
            };
            let mtime_ns: i128 = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i128)
                .unwrap_or(0);
            let state_hash = compute_state_hash(fp, mtime_ns, meta.len());

            // Cache first to avoid probe work.
            let cached = retrieve_cached_metadata(&self.store, fp, &state_hash);
            let (record, cache_store) = match cached {
                Some(record) => (record, false),
                None => match self.metadata.get_metadata(path, None) {
                    Ok(record) => (record, true),
                    Err(e) => (metadata_error_record(&e, fp), false),
                },
            };

            updates.push(Update {
                asset_id,
                filepath: fp.clone(),
                state_hash,
                record,
                cache_store,
            });
        }

        if updates.is_empty() {
            return Ok(());
        }

        // Serialize with scans and targeted indexing.
        let _guard = self.scan_lock.lock().expect("scan lock poisoned");
        let tx = self.store.transaction(TxMode::Immediate)?;
        for update in &updates {
            tx.execute(
                "UPDATE assets
                 SET width = COALESCE(?, width),
                     height = COALESCE(?, height),
                     duration = COALESCE(?, duration),
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?",
                params![
                    update.record.width(),
                    update.record.height(),
                    update.record.duration(),
                    update.asset_id,
                ],
            )?;
            write_asset_metadata_row(&tx, update.asset_id, &update.record)?;
            if update.cache_store {
                store_metadata_cache(&tx, &update.filepath, &update.state_hash, &update.record)?;
            }
        }
        tx.commit()?;
        debug!(count = updates.len(), "enriched metadata chunk");
        Ok(())
    }
}
