//! Shared helpers for asset_metadata rows, the metadata cache, and the scan
//! journal.
//!
//! The asset_metadata upsert must never clobber user-authored rating/tags:
//! rating is only filled when currently 0, tags only when currently empty.

use crate::error::Quality;
use crate::metadata::extractors::MetadataRecord;
use crate::metadata::graph_has_sampler;
use crate::metadata::parsing::canonicalize_tags;
use crate::store::{Store, StoreTx};
use rusqlite::params;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Flags and payload derived from a metadata record for the asset_metadata
/// row.
#[derive(Debug, Clone)]
pub struct MetaFields {
    pub has_workflow: bool,
    pub has_generation_data: bool,
    pub quality: Quality,
    pub raw_json: String,
}

fn non_empty_object(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_object)
        .map(|m| !m.is_empty())
        .unwrap_or(false)
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
    }
}

/// Extract workflow/generation flags and the JSON payload from a record.
///
/// `has_workflow` means an embedded workflow graph; Auto1111-style
/// `parameters` text counts as generation data only.
pub fn metadata_fields(record: &MetadataRecord) -> MetaFields {
    let data = &record.data;
    let has_workflow = truthy(data.get("workflow"));
    let has_generation_data = truthy(data.get("parameters"))
        || non_empty_object(data.get("geninfo"))
        || truthy(data.get("model"))
        || truthy(data.get("seed"))
        || graph_has_sampler(data.get("prompt"))
        || graph_has_sampler(data.get("workflow"));

    let raw_json =
        serde_json::to_string(&Value::Object(data.clone())).unwrap_or_else(|_| "{}".to_string());

    MetaFields {
        has_workflow,
        has_generation_data,
        quality: record.quality,
        raw_json,
    }
}

/// Insert or update the asset_metadata row with the latest flags.
///
/// Existing OS/file metadata is imported without overriding user edits:
/// rating fills only when the stored value is 0, tags only when the stored
/// list is empty.
pub fn write_asset_metadata_row(
    tx: &StoreTx<'_>,
    asset_id: i64,
    record: &MetadataRecord,
) -> crate::Result<()> {
    let fields = metadata_fields(record);

    let extracted_rating = record.rating().map(|r| r.clamp(0, 5)).unwrap_or(0);
    let tags = canonicalize_tags(&record.tags());
    let extracted_tags_json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());
    let extracted_tags_text = tags.join(" ");

    tx.execute(
        "INSERT INTO asset_metadata
         (asset_id, rating, tags, tags_text, has_workflow, has_generation_data, metadata_quality, metadata_raw)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(asset_id) DO UPDATE SET
             rating = CASE
                 WHEN COALESCE(asset_metadata.rating, 0) = 0 THEN excluded.rating
                 ELSE asset_metadata.rating
             END,
             tags = CASE
                 WHEN COALESCE(asset_metadata.tags, '[]') IN ('[]', '') THEN excluded.tags
                 ELSE asset_metadata.tags
             END,
             tags_text = CASE
                 WHEN COALESCE(asset_metadata.tags, '[]') IN ('[]', '') THEN excluded.tags_text
                 ELSE asset_metadata.tags_text
             END,
             has_workflow = excluded.has_workflow,
             has_generation_data = excluded.has_generation_data,
             metadata_quality = excluded.metadata_quality,
             metadata_raw = excluded.metadata_raw",
        params![
            asset_id,
            extracted_rating,
            extracted_tags_json,
            extracted_tags_text,
            fields.has_workflow as i64,
            fields.has_generation_data as i64,
            fields.quality.as_str(),
            fields.raw_json,
        ],
    )?;
    Ok(())
}

/// Re-apply metadata for an unchanged file only when the flags or raw payload
/// would actually change. Returns whether a write happened.
pub fn refresh_metadata_if_needed(
    tx: &StoreTx<'_>,
    asset_id: i64,
    record: &MetadataRecord,
) -> crate::Result<bool> {
    let current: Option<(i64, i64, String)> = tx.query_row_opt(
        "SELECT has_workflow, has_generation_data, metadata_raw FROM asset_metadata WHERE asset_id = ?",
        params![asset_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let new_fields = metadata_fields(record);
    let (cur_wf, cur_gen, cur_raw) = current.unwrap_or((0, 0, String::new()));
    if cur_wf == new_fields.has_workflow as i64
        && cur_gen == new_fields.has_generation_data as i64
        && cur_raw == new_fields.raw_json
    {
        return Ok(false);
    }

    write_asset_metadata_row(tx, asset_id, record)?;
    Ok(true)
}

/// Read a cached metadata record, valid only when the state hash still
/// matches the file's current state.
pub fn retrieve_cached_metadata(
    store: &Store,
    filepath: &str,
    state_hash: &str,
) -> Option<MetadataRecord> {
    if state_hash.is_empty() {
        return None;
    }
    let raw: Option<String> = store
        .query_row_opt(
            "SELECT metadata_raw FROM metadata_cache WHERE filepath = ? AND state_hash = ?",
            params![filepath, state_hash],
            |row| row.get(0),
        )
        .ok()
        .flatten();
    record_from_raw_json(&raw?)
}

/// Rebuild a record from a stored metadata_raw JSON document.
pub fn record_from_raw_json(raw: &str) -> Option<MetadataRecord> {
    if raw.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(raw).ok()?;
    let data = value.as_object()?.clone();
    let quality = data
        .get("quality")
        .and_then(Value::as_str)
        .map(Quality::parse)
        .unwrap_or(Quality::None);
    Some(MetadataRecord { data, quality })
}

/// Write-through the content-addressed metadata cache.
pub fn store_metadata_cache(
    tx: &StoreTx<'_>,
    filepath: &str,
    state_hash: &str,
    record: &MetadataRecord,
) -> crate::Result<()> {
    let raw = serde_json::to_string(&Value::Object(record.data.clone()))
        .unwrap_or_else(|_| "{}".to_string());
    let metadata_hash = compute_metadata_hash(&raw);
    tx.execute(
        "INSERT INTO metadata_cache (filepath, state_hash, metadata_hash, metadata_raw)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(filepath) DO UPDATE SET
             state_hash = excluded.state_hash,
             metadata_hash = excluded.metadata_hash,
             metadata_raw = excluded.metadata_raw,
             last_updated = CURRENT_TIMESTAMP",
        params![filepath, state_hash, metadata_hash, raw],
    )?;
    Ok(())
}

pub fn compute_metadata_hash(raw_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Persist a simple key/value in the metadata table.
pub fn set_metadata_value(store: &Store, key: &str, value: &str) -> crate::Result<()> {
    store.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_metadata_value(store: &Store, key: &str) -> Option<String> {
    store
        .query_row_opt(
            "SELECT value FROM metadata WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .ok()
        .flatten()
}

/// Append a journal entry for a processed path. Only called after the
/// corresponding asset write succeeded in the same transaction.
pub fn write_scan_journal_entry(
    tx: &StoreTx<'_>,
    filepath: &str,
    dir_path: &str,
    state_hash: &str,
    mtime: i64,
    size: i64,
) -> crate::Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO scan_journal
         (filepath, dir_path, state_hash, mtime, size, last_seen)
         VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
        params![filepath, dir_path, state_hash, mtime, size],
    )?;
    Ok(())
}

/// Stable fingerprint of `(filepath, mtime_ns, size)` driving incremental
/// decisions and cache validity.
pub fn compute_state_hash(filepath: &str, mtime_ns: i128, size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filepath.as_bytes());
    hasher.update([0u8]);
    hasher.update(mtime_ns.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(size.to_string().as_bytes());
    hasher.update([0u8]);
    hex::encode(hasher.finalize())
}

/// Degraded payload written when extraction failed: the asset stays
/// searchable by filename/filepath and the error is preserved in the raw
/// document.
pub fn metadata_error_record(err: &crate::AtelierError, filepath: &str) -> MetadataRecord {
    debug!(filepath, code = err.code(), "building degraded metadata payload");
    crate::metadata::extractors::degraded_record(err, std::path::Path::new(filepath))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_hash_is_stable_and_distinct() {
        let a = compute_state_hash("/out/a.png", 1_000_000_001, 42);
        let b = compute_state_hash("/out/a.png", 1_000_000_001, 42);
        assert_eq!(a, b);
        assert_ne!(a, compute_state_hash("/out/a.png", 1_000_000_002, 42));
        assert_ne!(a, compute_state_hash("/out/a.png", 1_000_000_001, 43));
        assert_ne!(a, compute_state_hash("/out/b.png", 1_000_000_001, 42));
    }

    #[test]
    fn test_metadata_fields_flags() {
        // Auto1111 parameters text is generation data, not a workflow.
        let mut record = MetadataRecord::new(Quality::Partial);
        record.set("parameters", json!("Steps: 20"));
        let fields = metadata_fields(&record);
        assert!(!fields.has_workflow);
        assert!(fields.has_generation_data);

        let mut record = MetadataRecord::new(Quality::Full);
        record.set("workflow", json!({"nodes": [{"type": "SaveImage", "id": 1}]}));
        let fields = metadata_fields(&record);
        assert!(fields.has_workflow);

        let mut record = MetadataRecord::new(Quality::Partial);
        record.set(
            "prompt",
            json!({"3": {"class_type": "KSampler", "inputs": {"steps": 20}}}),
        );
        let fields = metadata_fields(&record);
        assert!(!fields.has_workflow);
        assert!(fields.has_generation_data);

        // Empty geninfo dict must not count as generation data.
        let mut record = MetadataRecord::new(Quality::None);
        record.set("geninfo", json!({}));
        let fields = metadata_fields(&record);
        assert!(!fields.has_generation_data);
    }

    #[test]
    fn test_record_round_trip_via_raw_json() {
        let mut record = MetadataRecord::new(Quality::Full);
        record.set("workflow", json!({"nodes": []}));
        let raw = metadata_fields(&record).raw_json;
        let parsed = record_from_raw_json(&raw).unwrap();
        assert_eq!(parsed.quality, Quality::Full);
        assert!(parsed.get("workflow").is_some());
    }
}
