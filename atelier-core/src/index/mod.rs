//! Index service: coordinates scanning, search, updates, enrichment, and the
//! filesystem watcher over one embedded store.

pub mod enricher;
pub mod meta_rows;
pub mod scanner;
pub mod searcher;
pub mod updater;
pub mod watcher;

use crate::asset::{AssetDetail, AssetRow, ScanStats, SearchPage, Source};
use crate::config::{index_db_path, Config};
use crate::error::Quality;
use crate::metadata::extractors::MetadataRecord;
use crate::metadata::MetadataService;
use crate::store::{schema, Store, TxMode};
use enricher::Enricher;
use rusqlite::params;
use scanner::Scanner;
use searcher::Searcher;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use updater::Updater;

pub use scanner::ScanOptions;
pub use searcher::SearchFilters;
pub use watcher::DirectoryWatcher;

/// Minimum interval between background scans of the same target.
const BG_SCAN_MIN_INTERVAL: Duration = Duration::from_secs(10);
/// Bound on the background-scan coalescing map.
const BG_SCAN_PENDING_MAX: usize = 64;

/// Coordinates all index mutations behind a single scan/write lock, and all
/// reads through the searcher.
pub struct IndexService {
    store: Arc<Store>,
    metadata: Arc<MetadataService>,
    config: Config,
    scan_lock: Arc<Mutex<()>>,
    scanner: Scanner,
    searcher: Searcher,
    updater: Updater,
    enricher: Arc<Enricher>,
    bg_scans: Mutex<HashMap<(String, String, String), Instant>>,
}

impl IndexService {
    /// Open (or create) the index for an output root at
    /// `<output_root>/_mjr_index/assets.sqlite` and ensure the schema.
    pub fn open(output_root: &Path, config: Config) -> crate::Result<Arc<Self>> {
        Self::open_db(&index_db_path(output_root), config)
    }

    /// Open the index at an explicit store path.
    pub fn open_db(db_path: &Path, config: Config) -> crate::Result<Arc<Self>> {
        let store = Arc::new(Store::open(db_path, &config.store)?);
        schema::migrate_schema(&store)?;

        let metadata = Arc::new(MetadataService::new(&config.metadata, &config.geninfo));
        let scan_lock = Arc::new(Mutex::new(()));

        let scanner = Scanner::new(
            store.clone(),
            metadata.clone(),
            scan_lock.clone(),
            config.scan.clone(),
        );
        let searcher = Searcher::new(store.clone(), config.search.clone());
        let updater = Updater::new(store.clone(), scan_lock.clone(), metadata.exiftool().clone());
        let enricher = Arc::new(Enricher::new(
            store.clone(),
            metadata.clone(),
            scan_lock.clone(),
        ));

        Ok(Arc::new(Self {
            store,
            metadata,
            config,
            scan_lock,
            scanner,
            searcher,
            updater,
            enricher,
            bg_scans: Mutex::new(HashMap::new()),
        }))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn metadata_service(&self) -> &Arc<MetadataService> {
        &self.metadata
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ==================== Scanning ====================

    /// Scan a directory; fast scans with background metadata hand their
    /// leftovers to the enricher.
    pub fn scan_directory(&self, directory: &Path, opts: &ScanOptions) -> crate::Result<ScanStats> {
        self.scan_directory_cancelable(directory, opts, None)
    }

    pub fn scan_directory_cancelable(
        &self,
        directory: &Path,
        opts: &ScanOptions,
        cancel: Option<&AtomicBool>,
    ) -> crate::Result<ScanStats> {
        let mut stats = self.scanner.scan_directory(directory, opts, cancel)?;
        if opts.fast && opts.background_metadata && !stats.to_enrich.is_empty() {
            let to_enrich = std::mem::take(&mut stats.to_enrich);
            Enricher::start_enrichment(&self.enricher, to_enrich);
        }
        Ok(stats)
    }

    /// Index an explicit list of paths (watcher adds, drag-and-drop).
    pub fn index_paths(
        &self,
        paths: &[PathBuf],
        base_dir: &Path,
        incremental: bool,
        source: Source,
        root_id: Option<&str>,
    ) -> crate::Result<ScanStats> {
        self.scanner
            .index_paths(paths, base_dir, incremental, source, root_id)
    }

    /// Remove a file from the index (watcher delete path).
    pub fn remove_path(&self, filepath: &str) -> crate::Result<bool> {
        self.scanner.remove_path(filepath)
    }

    /// Kick off a background scan, coalesced per (source, root, directory)
    /// with a minimum interval. Returns whether a scan was started.
    pub fn kickoff_background_scan(this: &Arc<Self>, directory: &Path, opts: ScanOptions) -> bool {
        let key = (
            opts.source.as_str().to_string(),
            opts.root_id.clone().unwrap_or_default(),
            directory.to_string_lossy().into_owned(),
        );
        {
            let mut pending = this.bg_scans.lock().expect("bg scan map poisoned");
            let now = Instant::now();
            pending.retain(|_, started| now.duration_since(*started) < BG_SCAN_MIN_INTERVAL);
            if pending.contains_key(&key) {
                return false;
            }
            if pending.len() >= BG_SCAN_PENDING_MAX {
                debug!("background scan map full; skipping kickoff");
                return false;
            }
            pending.insert(key, now);
        }

        let this = this.clone();
        let directory = directory.to_path_buf();
        std::thread::Builder::new()
            .name("atelier-bg-scan".into())
            .spawn(move || {
                if let Err(e) = this.scan_directory(&directory, &opts) {
                    warn!(directory = %directory.display(), "background scan failed: {e}");
                }
            })
            .map(|_| true)
            .unwrap_or_else(|e| {
                warn!("failed to spawn background scan: {e}");
                false
            })
    }

    // ==================== Search ====================

    pub fn search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        filters: &SearchFilters,
        include_total: bool,
    ) -> crate::Result<SearchPage> {
        self.searcher.search(query, limit, offset, filters, include_total)
    }

    pub fn search_scoped(
        &self,
        query: &str,
        roots: &[PathBuf],
        limit: usize,
        offset: usize,
        filters: &SearchFilters,
        include_total: bool,
    ) -> crate::Result<SearchPage> {
        self.searcher
            .search_scoped(query, roots, limit, offset, filters, include_total)
    }

    pub fn has_assets_under_root(&self, root: &Path) -> crate::Result<bool> {
        self.searcher.has_assets_under_root(root)
    }

    /// Fetch one asset with hydration and opportunistic self-heal: recompute
    /// geninfo from a stored prompt graph when it is missing or poorer than a
    /// fresh parse, and fall back to a targeted extraction when the asset has
    /// no workflow/generation flags at all.
    pub fn get_asset(&self, asset_id: i64) -> crate::Result<Option<AssetDetail>> {
        let Some(asset) = self.searcher.get_asset(asset_id)? else {
            return Ok(None);
        };

        let mut did_update = false;

        // Recompute geninfo from the stored prompt graph (no external tools).
        if let Some(prompt_graph) = asset.prompt.clone().filter(Value::is_object) {
            let current = asset.geninfo.as_ref();
            if current.is_none() || geninfo_is_incomplete(current) {
                match crate::geninfo::parse_geninfo_from_prompt(
                    Some(&prompt_graph),
                    asset.workflow.as_ref(),
                ) {
                    Ok(Some(fresh)) if geninfo_score(Some(&fresh)) > geninfo_score(current) => {
                        let mut meta_obj = match &asset.metadata_raw {
                            Value::Object(map) => map.clone(),
                            _ => serde_json::Map::new(),
                        };
                        meta_obj.entry("prompt".to_string()).or_insert(prompt_graph);
                        if let Some(workflow) = &asset.workflow {
                            meta_obj
                                .entry("workflow".to_string())
                                .or_insert(workflow.clone());
                        }
                        meta_obj.insert("geninfo".to_string(), fresh);

                        let quality = meta_obj
                            .get("quality")
                            .and_then(Value::as_str)
                            .map(Quality::parse)
                            .unwrap_or(Quality::Partial);
                        let record = MetadataRecord {
                            data: meta_obj,
                            quality,
                        };

                        let written: crate::Result<()> = (|| {
                            let _guard = self.scan_lock.lock().expect("scan lock poisoned");
                            let tx = self.store.transaction(TxMode::Immediate)?;
                            meta_rows::write_asset_metadata_row(&tx, asset_id, &record)?;
                            tx.commit()
                        })();
                        match written {
                            Ok(()) => did_update = true,
                            Err(e) => debug!(asset_id, "geninfo self-heal skipped: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!(asset_id, "geninfo self-heal skipped: {e}"),
                }
            }
        }

        // Still no generation flags: try a targeted single-file extraction.
        if !did_update && !asset.has_workflow && !asset.has_generation_data {
            let path = Path::new(&asset.filepath);
            if path.is_file() {
                if let Err(e) = self.targeted_refresh(asset_id, path) {
                    debug!(asset_id, "targeted metadata extraction skipped: {e}");
                } else {
                    did_update = true;
                }
            }
        }

        if did_update {
            return self.searcher.get_asset(asset_id);
        }
        Ok(Some(asset))
    }

    fn targeted_refresh(&self, asset_id: i64, path: &Path) -> crate::Result<()> {
        let filepath = path.to_string_lossy().into_owned();
        let meta = std::fs::metadata(path)?;
        let mtime_ns: i128 = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i128)
            .unwrap_or(0);
        let state_hash = meta_rows::compute_state_hash(&filepath, mtime_ns, meta.len());

        let record = meta_rows::retrieve_cached_metadata(&self.store, &filepath, &state_hash)
            .map(Ok)
            .unwrap_or_else(|| self.metadata.get_metadata(path, None))?;

        let _guard = self.scan_lock.lock().expect("scan lock poisoned");
        let tx = self.store.transaction(TxMode::Immediate)?;
        tx.execute(
            "UPDATE assets
             SET width = COALESCE(?, width),
                 height = COALESCE(?, height),
                 duration = COALESCE(?, duration),
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![record.width(), record.height(), record.duration(), asset_id],
        )?;
        meta_rows::write_asset_metadata_row(&tx, asset_id, &record)?;
        meta_rows::store_metadata_cache(&tx, &filepath, &state_hash, &record)?;
        tx.commit()
    }

    /// Batch fetch without the per-asset self-heal path (viewer preloading).
    pub fn get_assets_batch(&self, asset_ids: &[i64]) -> crate::Result<Vec<AssetDetail>> {
        self.searcher.get_assets(asset_ids)
    }

    pub fn lookup_assets_by_filepaths(
        &self,
        filepaths: &[String],
    ) -> crate::Result<HashMap<String, AssetRow>> {
        self.searcher.lookup_assets_by_filepaths(filepaths)
    }

    // ==================== Updates ====================

    pub fn update_asset_rating(&self, asset_id: i64, rating: i64) -> crate::Result<i64> {
        self.updater.update_asset_rating(asset_id, rating)
    }

    pub fn update_asset_tags(&self, asset_id: i64, tags: &[String]) -> crate::Result<Vec<String>> {
        self.updater.update_asset_tags(asset_id, tags)
    }

    pub fn get_all_tags(&self) -> crate::Result<Vec<String>> {
        self.updater.get_all_tags()
    }

    // ==================== Maintenance & status ====================

    pub fn rebuild_fts(&self) -> crate::Result<()> {
        schema::rebuild_fts(&self.store)
    }

    pub fn vacuum(&self) -> crate::Result<()> {
        self.store.vacuum()
    }

    pub fn last_scan_end(&self) -> Option<String> {
        meta_rows::get_metadata_value(&self.store, "last_scan_end")
    }

    pub fn last_index_end(&self) -> Option<String> {
        meta_rows::get_metadata_value(&self.store, "last_index_end")
    }

    /// Which logical roots the watcher covers; persisted so it survives
    /// restarts. Currently restricted to the output root by default.
    pub fn watcher_scope(&self) -> String {
        meta_rows::get_metadata_value(&self.store, "watcher_scope")
            .unwrap_or_else(|| "output".to_string())
    }

    pub fn set_watcher_scope(&self, scope: &str) -> crate::Result<()> {
        meta_rows::set_metadata_value(&self.store, "watcher_scope", scope)
    }

    /// Start the filesystem watcher over the output root.
    pub fn start_watcher(this: &Arc<Self>, output_root: &Path) -> Option<DirectoryWatcher> {
        if !this.config.watcher.enabled {
            info!("file watcher disabled by configuration");
            return None;
        }
        DirectoryWatcher::start(
            this.clone(),
            vec![output_root.to_path_buf()],
            &this.config.watcher,
        )
    }

    /// Summary status for CLI/status surfaces.
    pub fn status(&self) -> crate::Result<Value> {
        let assets: i64 = self
            .store
            .query_row_opt("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?
            .unwrap_or(0);
        let with_metadata: i64 = self
            .store
            .query_row_opt("SELECT COUNT(*) FROM asset_metadata", [], |row| row.get(0))?
            .unwrap_or(0);
        let index_size = std::fs::metadata(self.store.db_path())
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(json!({
            "assets": assets,
            "with_metadata": with_metadata,
            "schema_version": self.store.get_schema_version(),
            "index_size_bytes": index_size,
            "last_scan_end": self.last_scan_end(),
            "last_index_end": self.last_index_end(),
            "watcher_scope": self.watcher_scope(),
            "enrich_pending": self.enricher.pending(),
        }))
    }
}

/// Score a geninfo document by field presence; used to decide whether a fresh
/// parse actually improves on the stored one.
fn geninfo_score(value: Option<&Value>) -> i64 {
    let Some(Value::Object(map)) = value else {
        return 0;
    };
    let mut score = 0;
    let has = |key: &str, inner: &str| -> bool {
        map.get(key)
            .and_then(|v| v.get(inner))
            .map(|v| !v.is_null() && v.as_str().map(|s| !s.is_empty()).unwrap_or(true))
            .unwrap_or(false)
    };
    if has("positive", "value") {
        score += 3;
    }
    if has("negative", "value") {
        score += 2;
    }
    if let Some(models) = map.get("models").and_then(Value::as_object) {
        // Primary models count higher than accessory models (clip/vae).
        if ["checkpoint", "unet", "diffusion"]
            .iter()
            .any(|k| models.contains_key(*k))
        {
            score += 3;
        }
        if has("clip", "name") {
            score += 1;
        }
        if has("vae", "name") {
            score += 1;
        }
    }
    if has("checkpoint", "name") {
        score += 2;
    }
    if map
        .get("loras")
        .and_then(Value::as_array)
        .map(|l| !l.is_empty())
        .unwrap_or(false)
    {
        score += 1;
    }
    if has("sampler", "name") {
        score += 1;
    }
    score
}

/// A geninfo document with no prompt text and no primary model is likely a
/// stale/partial parse and worth recomputing from the prompt graph.
fn geninfo_is_incomplete(value: Option<&Value>) -> bool {
    let Some(Value::Object(map)) = value else {
        return true;
    };
    let has = |key: &str, inner: &str| -> bool {
        map.get(key)
            .and_then(|v| v.get(inner))
            .and_then(Value::as_str)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    };
    let has_prompt = has("positive", "value");
    let has_negative = has("negative", "value");
    let has_primary_model = map
        .get("models")
        .and_then(Value::as_object)
        .map(|m| ["checkpoint", "unet", "diffusion"].iter().any(|k| m.contains_key(*k)))
        .unwrap_or(false);
    let has_checkpoint = has("checkpoint", "name");
    !(has_prompt || has_negative || has_primary_model || has_checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geninfo_score_ordering() {
        let rich = json!({
            "positive": {"value": "a cat"},
            "models": {"checkpoint": {"name": "sd15"}},
            "sampler": {"name": "euler"},
        });
        let poor = json!({
            "sampler": {"name": "euler"},
        });
        assert!(geninfo_score(Some(&rich)) > geninfo_score(Some(&poor)));
        assert_eq!(geninfo_score(None), 0);
    }

    #[test]
    fn test_geninfo_incomplete() {
        assert!(geninfo_is_incomplete(None));
        assert!(geninfo_is_incomplete(Some(&json!({"steps": {"value": 20}}))));
        assert!(!geninfo_is_incomplete(Some(
            &json!({"positive": {"value": "a cat"}})
        )));
        assert!(!geninfo_is_incomplete(Some(
            &json!({"checkpoint": {"name": "sd15"}})
        )));
    }
}
