//! Directory scanning and file indexing: streaming walk, incremental
//! decisions, and batched durable writes.

use super::meta_rows::{
    compute_state_hash, metadata_error_record, refresh_metadata_if_needed, set_metadata_value,
    store_metadata_cache, write_asset_metadata_row, write_scan_journal_entry,
};
use crate::asset::{classify_path, ext_of, AssetKind, ScanStats, Source};
use crate::config::ScanConfig;
use crate::error::AtelierError;
use crate::metadata::extractors::MetadataRecord;
use crate::metadata::MetadataService;
use crate::store::{Store, StoreTx, TxMode};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rusqlite::params;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STAT_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Options for a scan or targeted index operation.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub recursive: bool,
    pub incremental: bool,
    pub source: Source,
    pub root_id: Option<String>,
    /// Skip metadata extraction during the scan.
    pub fast: bool,
    /// Hand back a `to_enrich` list for background enrichment (fast scans).
    pub background_metadata: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            incremental: true,
            source: Source::Output,
            root_id: None,
            fast: false,
            background_metadata: false,
        }
    }
}

pub struct Scanner {
    store: Arc<Store>,
    metadata: Arc<MetadataService>,
    scan_lock: Arc<Mutex<()>>,
    config: ScanConfig,
    ignore_set: GlobSet,
}

/// One decided action for a file in a batch. Writes are applied in a single
/// immediate transaction per batch.
enum Prepared {
    SkippedJournal,
    Skipped,
    Refresh {
        asset_id: i64,
        record: MetadataRecord,
        filepath: String,
        state_hash: String,
        mtime: i64,
        size: i64,
    },
    Update {
        asset_id: i64,
        record: MetadataRecord,
        cache_store: bool,
        filepath: String,
        state_hash: String,
        mtime: i64,
        size: i64,
        fast: bool,
    },
    Add {
        filename: String,
        subfolder: String,
        filepath: String,
        kind: AssetKind,
        ext: String,
        record: MetadataRecord,
        cache_store: bool,
        state_hash: String,
        mtime: i64,
        size: i64,
        fast: bool,
    },
}

pub(crate) fn now_iso() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

impl Scanner {
    pub fn new(
        store: Arc<Store>,
        metadata: Arc<MetadataService>,
        scan_lock: Arc<Mutex<()>>,
        config: ScanConfig,
    ) -> Self {
        let ignore_set = build_ignore_set(&config.ignore_patterns);
        Self {
            store,
            metadata,
            scan_lock,
            config,
            ignore_set,
        }
    }

    /// Batch size as a step function of items scanned so far.
    fn stream_batch_target(&self, scanned: usize) -> usize {
        let c = &self.config;
        let target = if scanned <= c.small_threshold {
            c.batch_small
        } else if scanned <= c.med_threshold {
            c.batch_med
        } else if scanned <= c.large_threshold {
            c.batch_large
        } else {
            c.batch_xl
        };
        target.clamp(1, c.max_transaction_batch)
    }

    /// Scan a directory for asset files.
    ///
    /// The filesystem walk runs on a dedicated thread feeding a bounded
    /// channel; the caller's thread drains it in batches so the walker blocks
    /// when writes lag behind.
    pub fn scan_directory(
        &self,
        directory: &Path,
        opts: &ScanOptions,
        cancel: Option<&AtomicBool>,
    ) -> crate::Result<ScanStats> {
        let _guard = self.scan_lock.lock().expect("scan lock poisoned");

        if !directory.exists() {
            return Err(AtelierError::DirNotFound(directory.to_path_buf()));
        }
        if !directory.is_dir() {
            return Err(AtelierError::NotADirectory(directory.to_path_buf()));
        }

        let scan_id = Uuid::new_v4().to_string();
        info!(
            scan_id,
            directory = %directory.display(),
            recursive = opts.recursive,
            incremental = opts.incremental,
            "starting directory scan"
        );

        let mut stats = ScanStats {
            start_time: now_iso(),
            ..Default::default()
        };

        let capacity = (self.config.batch_xl * 4).max(1000);
        let (tx_walk, rx_walk) = bounded::<PathBuf>(capacity);
        let stop = Arc::new(AtomicBool::new(false));

        let walker_stop = stop.clone();
        let walk_root = directory.to_path_buf();
        let recursive = opts.recursive;
        let ignore_set = self.ignore_set.clone();
        let walker = std::thread::spawn(move || {
            walk_files(&walk_root, recursive, &ignore_set, &walker_stop, &tx_walk);
        });

        let result = self.consume_walk(directory, opts, cancel, &stop, rx_walk, &mut stats);

        stop.store(true, Ordering::Relaxed);
        let _ = walker.join();

        stats.end_time = now_iso();
        // Only full directory scans update last_scan_end; targeted indexing
        // writes last_index_end instead (UI reload coupling).
        if let Err(e) = set_metadata_value(&self.store, "last_scan_end", &stats.end_time) {
            debug!("failed to persist last_scan_end: {e}");
        }

        info!(
            scan_id,
            scanned = stats.scanned,
            added = stats.added,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            "directory scan complete"
        );

        result.map(|_| stats)
    }

    fn consume_walk(
        &self,
        directory: &Path,
        opts: &ScanOptions,
        cancel: Option<&AtomicBool>,
        stop: &AtomicBool,
        rx_walk: Receiver<PathBuf>,
        stats: &mut ScanStats,
    ) -> crate::Result<()> {
        let mut batch: Vec<PathBuf> = Vec::new();
        loop {
            if cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false) {
                stop.store(true, Ordering::Relaxed);
                // In-flight batch still runs to completion below; no new
                // batches are started after cancellation.
                break;
            }

            match rx_walk.recv_timeout(Duration::from_millis(200)) {
                Ok(path) => {
                    batch.push(path);
                    stats.scanned += 1;
                    // Drain whatever is already buffered without blocking.
                    while batch.len() < self.stream_batch_target(stats.scanned) {
                        match rx_walk.try_recv() {
                            Ok(path) => {
                                batch.push(path);
                                stats.scanned += 1;
                            }
                            Err(_) => break,
                        }
                    }
                    if batch.len() >= self.stream_batch_target(stats.scanned) {
                        self.index_batch(&batch, directory, opts, stats)?;
                        batch.clear();
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if !batch.is_empty() {
            self.index_batch(&batch, directory, opts, stats)?;
        }
        Ok(())
    }

    /// Index an explicit list of paths (no directory walk). Unsupported kinds
    /// are filtered so internal files never enter the index.
    pub fn index_paths(
        &self,
        paths: &[PathBuf],
        base_dir: &Path,
        incremental: bool,
        source: Source,
        root_id: Option<&str>,
    ) -> crate::Result<ScanStats> {
        let _guard = self.scan_lock.lock().expect("scan lock poisoned");

        let filtered: Vec<PathBuf> = paths
            .iter()
            .filter(|p| classify_path(p) != AssetKind::Unknown)
            .cloned()
            .collect();

        let mut stats = ScanStats {
            scanned: filtered.len(),
            start_time: now_iso(),
            ..Default::default()
        };
        if filtered.is_empty() {
            stats.end_time = now_iso();
            return Ok(stats);
        }

        let opts = ScanOptions {
            recursive: false,
            incremental,
            source,
            root_id: root_id.map(str::to_string),
            fast: false,
            background_metadata: false,
        };

        let batch_size = self.stream_batch_target(filtered.len());
        for batch in filtered.chunks(batch_size) {
            self.index_batch(batch, base_dir, &opts, &mut stats)?;
        }

        stats.end_time = now_iso();
        if let Err(e) = set_metadata_value(&self.store, "last_index_end", &stats.end_time) {
            debug!("failed to persist last_index_end: {e}");
        }

        let level_changed = stats.added > 0 || stats.updated > 0 || stats.errors > 0;
        if level_changed {
            info!(
                added = stats.added,
                updated = stats.updated,
                skipped = stats.skipped,
                errors = stats.errors,
                "file list index complete"
            );
        } else {
            debug!(skipped = stats.skipped, "file list index complete");
        }
        Ok(stats)
    }

    /// Remove a single file from the index (watcher delete path). Journal and
    /// cache rows ride via FK cascade.
    pub fn remove_path(&self, filepath: &str) -> crate::Result<bool> {
        let _guard = self.scan_lock.lock().expect("scan lock poisoned");
        let tx = self.store.transaction(TxMode::Immediate)?;
        let affected = tx.execute("DELETE FROM assets WHERE filepath = ?", params![filepath])?;
        tx.commit()?;
        if affected > 0 {
            debug!(filepath, "asset removed from index");
        }
        Ok(affected > 0)
    }

    pub fn compute_state_hash_for(&self, filepath: &str, mtime_ns: i128, size: u64) -> String {
        compute_state_hash(filepath, mtime_ns, size)
    }

    fn stat_with_retry(&self, path: &Path) -> crate::Result<std::fs::Metadata> {
        let retries = self.config.stat_retries.max(1);
        let mut last_err: Option<std::io::Error> = None;
        for attempt in 0..retries {
            match std::fs::metadata(path) {
                Ok(meta) => return Ok(meta),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < retries {
                        std::thread::sleep(STAT_RETRY_BASE_DELAY * (attempt as u32 + 1));
                    }
                }
            }
        }
        Err(AtelierError::StatFailed(format!(
            "{}: {}",
            path.display(),
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Index a batch of files with one transaction for all writes. Falls back
    /// to per-entry transactions if the batch transaction fails, bounding the
    /// blast radius of a single poisonous row.
    fn index_batch(
        &self,
        batch: &[PathBuf],
        base_dir: &Path,
        opts: &ScanOptions,
        stats: &mut ScanStats,
    ) -> crate::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let filepaths: Vec<String> = batch
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        // Phase 1: prefetch journal, existing assets, metadata cache, and
        // asset_metadata presence for the whole batch (no N+1 queries).
        let journal_map = if opts.incremental {
            self.fetch_journal_entries(&filepaths)?
        } else {
            HashMap::new()
        };
        let existing_map = self.fetch_existing_assets(&filepaths)?;
        let cache_map = self.fetch_cache_entries(&filepaths)?;
        let has_meta: HashSet<i64> = {
            let ids: Vec<i64> = existing_map.values().map(|(id, _)| *id).collect();
            self.fetch_asset_metadata_presence(&ids)?
        };

        // Phase 2: stat + decide per file.
        let mut prepared: Vec<Prepared> = Vec::new();
        let mut needs_metadata: Vec<(PathBuf, String, i64, i64, String, Option<i64>)> = Vec::new();

        for path in batch {
            let filepath = path.to_string_lossy().into_owned();

            let meta = match self.stat_with_retry(path) {
                Ok(meta) => meta,
                Err(e) => {
                    stats.errors += 1;
                    warn!(filepath, "failed to stat: {e}");
                    continue;
                }
            };
            let mtime_ns: i128 = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i128)
                .unwrap_or(0);
            let mtime = (mtime_ns / 1_000_000_000) as i64;
            let size = meta.len() as i64;
            let state_hash = compute_state_hash(&filepath, mtime_ns, meta.len());

            if opts.incremental {
                if let Some(journal_hash) = journal_map.get(&filepath) {
                    if *journal_hash == state_hash {
                        prepared.push(Prepared::SkippedJournal);
                        continue;
                    }
                }
            }

            let (existing_id, existing_mtime) = existing_map
                .get(&filepath)
                .copied()
                .map(|(id, mtime)| (Some(id), mtime))
                .unwrap_or((None, 0));

            // Unchanged mtime: re-apply cached metadata if present, or skip
            // entirely when a metadata row already exists. This avoids
            // redundant probe work even for non-incremental scans.
            if let Some(asset_id) = existing_id {
                if existing_mtime == mtime {
                    if let Some(record) = cache_map.get(&(filepath.clone(), state_hash.clone())) {
                        prepared.push(Prepared::Refresh {
                            asset_id,
                            record: record.clone(),
                            filepath,
                            state_hash,
                            mtime,
                            size,
                        });
                        continue;
                    }
                    if has_meta.contains(&asset_id) {
                        prepared.push(Prepared::Skipped);
                        continue;
                    }
                }
            }

            if opts.fast {
                let rel = safe_relative_path(path, base_dir);
                let subfolder = rel
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let record = MetadataRecord::new(crate::error::Quality::None);
                match existing_id {
                    Some(asset_id) => prepared.push(Prepared::Update {
                        asset_id,
                        record,
                        cache_store: false,
                        filepath,
                        state_hash,
                        mtime,
                        size,
                        fast: true,
                    }),
                    None => prepared.push(Prepared::Add {
                        filename: path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        subfolder,
                        filepath,
                        kind: classify_path(path),
                        ext: ext_of(path),
                        record,
                        cache_store: false,
                        state_hash,
                        mtime,
                        size,
                        fast: true,
                    }),
                }
                continue;
            }

            needs_metadata.push((path.clone(), filepath, mtime, size, state_hash, existing_id));
        }

        // Phase 3: one batch call into the metadata service.
        if !needs_metadata.is_empty() {
            let paths: Vec<PathBuf> = needs_metadata.iter().map(|(p, ..)| p.clone()).collect();
            let mut batch_metadata = self.metadata.get_metadata_batch(&paths, None);

            for (path, filepath, mtime, size, state_hash, existing_id) in needs_metadata {
                let result = batch_metadata.remove(filepath.as_str()).unwrap_or_else(|| {
                    Err(AtelierError::ScanFailed("no metadata returned".into()))
                });
                let (record, cache_store) = match result {
                    Ok(record) => (record, true),
                    Err(e) => (metadata_error_record(&e, &filepath), false),
                };

                match existing_id {
                    Some(asset_id) => prepared.push(Prepared::Update {
                        asset_id,
                        record,
                        cache_store,
                        filepath,
                        state_hash,
                        mtime,
                        size,
                        fast: false,
                    }),
                    None => {
                        let rel = safe_relative_path(&path, base_dir);
                        let subfolder = rel
                            .parent()
                            .filter(|p| !p.as_os_str().is_empty())
                            .map(|p| p.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        prepared.push(Prepared::Add {
                            filename: path
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                            subfolder,
                            filepath,
                            kind: classify_path(&path),
                            ext: ext_of(&path),
                            record,
                            cache_store,
                            state_hash,
                            mtime,
                            size,
                            fast: false,
                        });
                    }
                }
            }
        }

        if prepared.is_empty() {
            return Ok(());
        }

        // Phase 4: apply all writes in one immediate transaction; on failure
        // retry each entry in its own transaction.
        let dir_path = base_dir.to_string_lossy();
        let batch_result: crate::Result<ScanStats> = (|| {
            let tx = self.store.transaction(TxMode::Immediate)?;
            let mut local = ScanStats::default();
            for entry in &prepared {
                self.apply_entry(&tx, entry, &dir_path, opts, &mut local)?;
            }
            tx.commit()?;
            Ok(local)
        })();

        match batch_result {
            Ok(local) => merge_stats(stats, &local, opts, self.config.max_to_enrich),
            Err(batch_error) => {
                warn!("batch transaction failed: {batch_error}; falling back to individual processing");
                for entry in &prepared {
                    let entry_result: crate::Result<ScanStats> = (|| {
                        let tx = self.store.transaction(TxMode::Immediate)?;
                        let mut local = ScanStats::default();
                        self.apply_entry(&tx, entry, &dir_path, opts, &mut local)?;
                        tx.commit()?;
                        Ok(local)
                    })();
                    match entry_result {
                        Ok(local) => merge_stats(stats, &local, opts, self.config.max_to_enrich),
                        Err(e) => {
                            stats.errors += 1;
                            warn!("individual processing failed: {e}");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply one prepared entry inside the batch transaction. Writes are
    /// ordered per entry: asset row first, then metadata cache and journal.
    fn apply_entry(
        &self,
        tx: &StoreTx<'_>,
        entry: &Prepared,
        dir_path: &str,
        opts: &ScanOptions,
        stats: &mut ScanStats,
    ) -> crate::Result<()> {
        match entry {
            Prepared::Skipped | Prepared::SkippedJournal => {
                stats.skipped += 1;
            }
            Prepared::Refresh {
                asset_id,
                record,
                filepath,
                state_hash,
                mtime,
                size,
            } => {
                match refresh_metadata_if_needed(tx, *asset_id, record) {
                    Ok(refreshed) => {
                        if refreshed {
                            write_scan_journal_entry(tx, filepath, dir_path, state_hash, *mtime, *size)?;
                            if opts.fast {
                                stats.to_enrich.push(filepath.clone());
                            }
                        }
                        stats.skipped += 1;
                    }
                    Err(e) => {
                        stats.errors += 1;
                        warn!(asset_id, "metadata refresh failed: {e}");
                    }
                }
            }
            Prepared::Update {
                asset_id,
                record,
                cache_store,
                filepath,
                state_hash,
                mtime,
                size,
                fast,
            } => {
                if *cache_store {
                    store_metadata_cache(tx, filepath, state_hash, record)?;
                }
                tx.execute(
                    "UPDATE assets
                     SET width = COALESCE(?, width),
                         height = COALESCE(?, height),
                         duration = COALESCE(?, duration),
                         size = ?, mtime = ?,
                         source = ?, root_id = ?,
                         indexed_at = CURRENT_TIMESTAMP
                     WHERE id = ?",
                    params![
                        record.width(),
                        record.height(),
                        record.duration(),
                        size,
                        mtime,
                        opts.source.as_str(),
                        opts.root_id.as_deref(),
                        asset_id,
                    ],
                )
                .map_err(|e| AtelierError::UpdateFailed(e.to_string()))?;
                if !*fast {
                    write_asset_metadata_row(tx, *asset_id, record)?;
                }
                write_scan_journal_entry(tx, filepath, dir_path, state_hash, *mtime, *size)?;
                stats.updated += 1;
                if *fast {
                    stats.to_enrich.push(filepath.clone());
                }
            }
            Prepared::Add {
                filename,
                subfolder,
                filepath,
                kind,
                ext,
                record,
                cache_store,
                state_hash,
                mtime,
                size,
                fast,
            } => {
                let asset_id = tx
                    .insert(
                        "INSERT INTO assets
                         (filename, subfolder, filepath, source, root_id, kind, ext, width, height, duration, size, mtime)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        params![
                            filename,
                            subfolder,
                            filepath,
                            opts.source.as_str(),
                            opts.root_id.as_deref(),
                            kind.as_str(),
                            ext,
                            record.width(),
                            record.height(),
                            record.duration(),
                            size,
                            mtime,
                        ],
                    )
                    .map_err(|e| AtelierError::InsertFailed(e.to_string()))?;
                write_asset_metadata_row(tx, asset_id, record)?;
                if *cache_store {
                    store_metadata_cache(tx, filepath, state_hash, record)?;
                }
                write_scan_journal_entry(tx, filepath, dir_path, state_hash, *mtime, *size)?;
                stats.added += 1;
                if *fast {
                    stats.to_enrich.push(filepath.clone());
                }
            }
        }
        Ok(())
    }

    fn fetch_journal_entries(&self, filepaths: &[String]) -> crate::Result<HashMap<String, String>> {
        if filepaths.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; filepaths.len()].join(",");
        let rows: Vec<(String, Option<String>)> = self.store.query_map(
            &format!("SELECT filepath, state_hash FROM scan_journal WHERE filepath IN ({placeholders})"),
            rusqlite::params_from_iter(filepaths.iter()),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|(fp, hash)| hash.map(|h| (fp, h)))
            .collect())
    }

    fn fetch_existing_assets(
        &self,
        filepaths: &[String],
    ) -> crate::Result<HashMap<String, (i64, i64)>> {
        if filepaths.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; filepaths.len()].join(",");
        let rows: Vec<(String, i64, i64)> = self.store.query_map(
            &format!("SELECT filepath, id, mtime FROM assets WHERE filepath IN ({placeholders})"),
            rusqlite::params_from_iter(filepaths.iter()),
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(rows
            .into_iter()
            .map(|(fp, id, mtime)| (fp, (id, mtime)))
            .collect())
    }

    fn fetch_cache_entries(
        &self,
        filepaths: &[String],
    ) -> crate::Result<HashMap<(String, String), MetadataRecord>> {
        if filepaths.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; filepaths.len()].join(",");
        let rows: Vec<(String, Option<String>, Option<String>)> = self.store.query_map(
            &format!(
                "SELECT filepath, state_hash, metadata_raw FROM metadata_cache WHERE filepath IN ({placeholders})"
            ),
            rusqlite::params_from_iter(filepaths.iter()),
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let mut out = HashMap::new();
        for (fp, state_hash, raw) in rows {
            let (Some(state_hash), Some(raw)) = (state_hash, raw) else {
                continue;
            };
            if let Some(record) = super::meta_rows::record_from_raw_json(&raw) {
                out.insert((fp, state_hash), record);
            }
        }
        Ok(out)
    }

    fn fetch_asset_metadata_presence(&self, asset_ids: &[i64]) -> crate::Result<HashSet<i64>> {
        if asset_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders = vec!["?"; asset_ids.len()].join(",");
        let rows: Vec<i64> = self.store.query_map(
            &format!("SELECT asset_id FROM asset_metadata WHERE asset_id IN ({placeholders})"),
            rusqlite::params_from_iter(asset_ids.iter()),
            |row| row.get(0),
        )?;
        Ok(rows.into_iter().collect())
    }
}

fn merge_stats(stats: &mut ScanStats, local: &ScanStats, opts: &ScanOptions, max_to_enrich: usize) {
    stats.added += local.added;
    stats.updated += local.updated;
    stats.skipped += local.skipped;
    stats.errors += local.errors;
    if opts.fast && opts.background_metadata {
        for fp in &local.to_enrich {
            if stats.to_enrich.len() >= max_to_enrich {
                break;
            }
            stats.to_enrich.push(fp.clone());
        }
    }
}

/// Glob matcher for walker ignore patterns. Bare names are wrapped so they
/// match the directory itself and anything nested under it.
fn build_ignore_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob_pattern = if pattern.contains('*') || pattern.contains('?') {
            pattern.clone()
        } else {
            format!("**/{pattern}")
        };
        if let Ok(g) = Glob::new(&glob_pattern) {
            builder.add(g);
        }
        if let Ok(g) = Glob::new(&format!("**/{pattern}/**")) {
            builder.add(g);
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!("invalid ignore patterns, walker filters disabled: {e}");
        GlobSet::empty()
    })
}

/// Streaming walk pushing supported files into the bounded channel. Send
/// blocks when the consumer lags (backpressure); disconnect terminates the
/// consumer loop.
fn walk_files(
    root: &Path,
    recursive: bool,
    ignore_set: &GlobSet,
    stop: &AtomicBool,
    tx: &crossbeam_channel::Sender<PathBuf>,
) {
    let mut dirs: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), "walk skipping unreadable directory: {e}");
                continue;
            }
        };
        for entry in entries.flatten() {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if ignore_set.is_match(relative) {
                continue;
            }
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                if recursive {
                    dirs.push(path);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if classify_path(&path) == AssetKind::Unknown {
                continue;
            }
            if tx.send(path).is_err() {
                return;
            }
        }
    }
}

fn safe_relative_path(path: &Path, base_dir: &Path) -> PathBuf {
    match path.strip_prefix(base_dir) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            warn!(
                path = %path.display(),
                base = %base_dir.display(),
                "could not compute relative path; using absolute path"
            );
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_relative_path() {
        let rel = safe_relative_path(Path::new("/out/sub/a.png"), Path::new("/out"));
        assert_eq!(rel, PathBuf::from("sub/a.png"));
        let abs = safe_relative_path(Path::new("/elsewhere/a.png"), Path::new("/out"));
        assert_eq!(abs, PathBuf::from("/elsewhere/a.png"));
    }

    #[test]
    fn test_walk_files_filters_unknown_kinds() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.mp4"), b"x").unwrap();

        let (tx, rx) = bounded(100);
        let stop = AtomicBool::new(false);
        walk_files(dir.path(), true, &GlobSet::empty(), &stop, &tx);
        drop(tx);

        let mut names: Vec<String> = rx
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.png", "c.mp4"]);
    }

    #[test]
    fn test_walk_files_non_recursive() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.png"), b"x").unwrap();

        let (tx, rx) = bounded(100);
        let stop = AtomicBool::new(false);
        walk_files(dir.path(), false, &GlobSet::empty(), &stop, &tx);
        drop(tx);

        let names: Vec<String> = rx
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png"]);
    }

    #[test]
    fn test_walk_files_honors_ignore_patterns() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("keep.png"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("_mjr_index")).unwrap();
        std::fs::write(dir.path().join("_mjr_index/stray.png"), b"x").unwrap();

        let ignore_set = build_ignore_set(&["_mjr_index".to_string()]);
        let (tx, rx) = bounded(100);
        let stop = AtomicBool::new(false);
        walk_files(dir.path(), true, &ignore_set, &stop, &tx);
        drop(tx);

        let names: Vec<String> = rx
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["keep.png"]);
    }
}
