//! Declarative schema: tables, indexes, FTS virtual tables, triggers, and the
//! idempotent self-heal used at startup.

use super::{Store, TxMode};
use crate::error::AtelierError;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

pub const CURRENT_SCHEMA_VERSION: i64 = 8;
// Schema version history (high-level):
// 1: initial assets + metadata tables
// 2-4: incremental columns and FTS/search support
// 5: workflow/generation flags, scan journal, and robustness fixes
// 6: asset sources (output/input/custom) + custom root id
// 7: metadata FTS (tags/metadata_raw) to improve search UX
// 8: duplicate analysis hashes (content_hash/phash/hash_state)

const SCHEMA_TABLES: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    subfolder TEXT DEFAULT '',
    filepath TEXT NOT NULL UNIQUE,
    source TEXT DEFAULT 'output', -- output, input, custom
    root_id TEXT, -- for source=custom
    kind TEXT NOT NULL,  -- image, video, audio, model3d
    ext TEXT NOT NULL,
    size INTEGER NOT NULL,  -- File size in bytes
    mtime INTEGER NOT NULL,  -- File modification time (unix timestamp)
    width INTEGER,  -- Image/video width (NULL for non-visual assets)
    height INTEGER,  -- Image/video height (NULL for non-visual assets)
    duration REAL,  -- Video/audio duration in seconds (NULL for non-temporal assets)
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    content_hash TEXT,
    phash TEXT,
    hash_state TEXT
);

CREATE TABLE IF NOT EXISTS asset_metadata (
    asset_id INTEGER PRIMARY KEY,
    rating INTEGER DEFAULT 0,
    tags TEXT DEFAULT '',  -- JSON array stored as string
    tags_text TEXT DEFAULT '',  -- Space-joined mirror for FTS
    metadata_text TEXT DEFAULT '',  -- Full metadata text for FTS
    workflow_hash TEXT,
    has_workflow BOOLEAN DEFAULT 0,
    has_generation_data BOOLEAN DEFAULT 0,
    metadata_quality TEXT DEFAULT 'none',  -- full, partial, degraded, none
    metadata_raw TEXT DEFAULT '{}',  -- Full raw metadata as JSON
    FOREIGN KEY (asset_id) REFERENCES assets(id) ON DELETE CASCADE
);

-- Scan journal to track last-processed state per file
CREATE TABLE IF NOT EXISTS scan_journal (
    filepath TEXT PRIMARY KEY,
    dir_path TEXT,
    state_hash TEXT,
    mtime INTEGER,
    size INTEGER,
    last_seen TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (filepath) REFERENCES assets(filepath) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS metadata_cache (
    filepath TEXT PRIMARY KEY,
    state_hash TEXT,
    metadata_hash TEXT,
    metadata_raw TEXT DEFAULT '{}',
    last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (filepath) REFERENCES assets(filepath) ON DELETE CASCADE
);
";

/// Columns ensured on existing tables (self-heal for partially/old-created DBs).
const COLUMN_DEFINITIONS: &[(&str, &[(&str, &str)])] = &[
    (
        "assets",
        &[
            ("subfolder", "subfolder TEXT DEFAULT ''"),
            ("source", "source TEXT DEFAULT 'output'"),
            ("root_id", "root_id TEXT"),
            ("width", "width INTEGER"),
            ("height", "height INTEGER"),
            ("duration", "duration REAL"),
            ("created_at", "created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
            ("updated_at", "updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
            ("indexed_at", "indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
            ("content_hash", "content_hash TEXT"),
            ("phash", "phash TEXT"),
            ("hash_state", "hash_state TEXT"),
        ],
    ),
    (
        "asset_metadata",
        &[
            ("rating", "rating INTEGER DEFAULT 0"),
            ("tags", "tags TEXT DEFAULT ''"),
            ("tags_text", "tags_text TEXT DEFAULT ''"),
            ("metadata_text", "metadata_text TEXT DEFAULT ''"),
            ("workflow_hash", "workflow_hash TEXT"),
            ("has_workflow", "has_workflow BOOLEAN DEFAULT 0"),
            ("has_generation_data", "has_generation_data BOOLEAN DEFAULT 0"),
            ("metadata_quality", "metadata_quality TEXT DEFAULT 'none'"),
            ("metadata_raw", "metadata_raw TEXT DEFAULT '{}'"),
        ],
    ),
    (
        "scan_journal",
        &[
            ("dir_path", "dir_path TEXT"),
            ("state_hash", "state_hash TEXT"),
            ("mtime", "mtime INTEGER"),
            ("size", "size INTEGER"),
            ("last_seen", "last_seen TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
        ],
    ),
    (
        "metadata_cache",
        &[
            ("state_hash", "state_hash TEXT"),
            ("metadata_hash", "metadata_hash TEXT"),
            ("metadata_raw", "metadata_raw TEXT DEFAULT '{}'"),
            ("last_updated", "last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
        ],
    ),
];

const INDEXES_AND_TRIGGERS: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS assets_fts USING fts5(
    filename,
    subfolder,
    content='assets',
    content_rowid='id'
);

CREATE VIRTUAL TABLE IF NOT EXISTS asset_metadata_fts USING fts5(
    tags,
    tags_text,
    metadata_text,
    content=''
);

CREATE INDEX IF NOT EXISTS idx_assets_filename ON assets(filename);
CREATE INDEX IF NOT EXISTS idx_assets_subfolder ON assets(subfolder);
CREATE INDEX IF NOT EXISTS idx_assets_kind ON assets(kind);
CREATE INDEX IF NOT EXISTS idx_assets_mtime ON assets(mtime);
CREATE INDEX IF NOT EXISTS idx_assets_kind_mtime ON assets(kind, mtime);
CREATE INDEX IF NOT EXISTS idx_assets_source ON assets(source);
CREATE INDEX IF NOT EXISTS idx_assets_root_id ON assets(root_id);
CREATE INDEX IF NOT EXISTS idx_assets_source_root_id ON assets(source, root_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_assets_filepath_source_root ON assets(filepath, source, root_id);
CREATE INDEX IF NOT EXISTS idx_metadata_rating ON asset_metadata(rating);
CREATE INDEX IF NOT EXISTS idx_metadata_workflow_hash ON asset_metadata(workflow_hash);
CREATE INDEX IF NOT EXISTS idx_metadata_quality_workflow ON asset_metadata(metadata_quality, has_workflow);
CREATE INDEX IF NOT EXISTS idx_assets_source_mtime_desc ON assets(source, mtime DESC);
CREATE INDEX IF NOT EXISTS idx_assets_content_hash ON assets(content_hash);
CREATE INDEX IF NOT EXISTS idx_assets_phash ON assets(phash);
CREATE INDEX IF NOT EXISTS idx_assets_hash_state ON assets(hash_state);
CREATE INDEX IF NOT EXISTS idx_asset_metadata_has_workflow_true ON asset_metadata(has_workflow) WHERE has_workflow = 1;
CREATE INDEX IF NOT EXISTS idx_asset_metadata_has_generation_data_true ON asset_metadata(has_generation_data) WHERE has_generation_data = 1;
CREATE INDEX IF NOT EXISTS idx_assets_list_cover ON assets(source, mtime DESC, id, filename, filepath, kind);

CREATE INDEX IF NOT EXISTS idx_scan_journal_dir ON scan_journal(dir_path);
CREATE INDEX IF NOT EXISTS idx_metadata_cache_state ON metadata_cache(state_hash);

CREATE TRIGGER IF NOT EXISTS assets_fts_insert AFTER INSERT ON assets BEGIN
    INSERT INTO assets_fts(rowid, filename, subfolder)
    VALUES (new.id, new.filename, new.subfolder);
END;

CREATE TRIGGER IF NOT EXISTS assets_fts_delete AFTER DELETE ON assets BEGIN
    INSERT INTO assets_fts(assets_fts, rowid, filename, subfolder)
    VALUES ('delete', old.id, old.filename, old.subfolder);
END;

CREATE TRIGGER IF NOT EXISTS assets_fts_update AFTER UPDATE ON assets BEGIN
    INSERT INTO assets_fts(assets_fts, rowid, filename, subfolder)
    VALUES ('delete', old.id, old.filename, old.subfolder);
    INSERT INTO assets_fts(rowid, filename, subfolder)
    VALUES (new.id, new.filename, new.subfolder);
END;

CREATE TRIGGER IF NOT EXISTS asset_metadata_fts_insert AFTER INSERT ON asset_metadata BEGIN
    INSERT INTO asset_metadata_fts(rowid, tags, tags_text, metadata_text)
    VALUES (new.asset_id, COALESCE(new.tags, ''), COALESCE(new.tags_text, ''), COALESCE(new.metadata_text, ''));
END;

CREATE TRIGGER IF NOT EXISTS asset_metadata_fts_delete AFTER DELETE ON asset_metadata BEGIN
    INSERT INTO asset_metadata_fts(asset_metadata_fts, rowid, tags, tags_text, metadata_text)
    VALUES ('delete', old.asset_id, COALESCE(old.tags, ''), COALESCE(old.tags_text, ''), COALESCE(old.metadata_text, ''));
END;

CREATE TRIGGER IF NOT EXISTS asset_metadata_fts_update AFTER UPDATE ON asset_metadata BEGIN
    INSERT INTO asset_metadata_fts(asset_metadata_fts, rowid, tags, tags_text, metadata_text)
    VALUES ('delete', old.asset_id, COALESCE(old.tags, ''), COALESCE(old.tags_text, ''), COALESCE(old.metadata_text, ''));
    INSERT INTO asset_metadata_fts(rowid, tags, tags_text, metadata_text)
    VALUES (new.asset_id, COALESCE(new.tags, ''), COALESCE(new.tags_text, ''), COALESCE(new.metadata_text, ''));
END;
";

/// Identifier grammar allowed in self-heal DDL. Anything else is rejected
/// before touching the store.
pub fn is_safe_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn table_columns(store: &Store, table_name: &str) -> crate::Result<Vec<String>> {
    if !is_safe_identifier(table_name) {
        return Err(AtelierError::InvalidInput(format!(
            "Invalid table name: {table_name}"
        )));
    }
    store
        .query_map(&format!("PRAGMA table_info('{table_name}')"), [], |row| {
            row.get::<_, String>(1)
        })
        .map_err(|e| AtelierError::PragmaFailed(format!("{table_name}: {e}")))
}

/// Best-effort check whether `table_name` has `column_name`.
pub fn table_has_column(store: &Store, table_name: &str, column_name: &str) -> bool {
    if !is_safe_identifier(table_name) || !is_safe_identifier(column_name) {
        warn!("invalid identifier in table_has_column: {table_name}.{column_name}");
        return false;
    }
    match table_columns(store, table_name) {
        Ok(cols) => cols.iter().any(|c| c == column_name),
        Err(e) => {
            warn!("unable to determine columns for {table_name}.{column_name}: {e}");
            false
        }
    }
}

fn ensure_column(
    store: &Store,
    table_name: &str,
    column_name: &str,
    definition: &str,
) -> crate::Result<()> {
    let columns = table_columns(store, table_name)?;
    if columns.iter().any(|c| c == column_name) {
        return Ok(());
    }
    info!("adding missing column {table_name}.{column_name}");
    store.execute(
        &format!("ALTER TABLE {table_name} ADD COLUMN {definition}"),
        [],
    )?;
    Ok(())
}

/// Ensure required columns exist in existing tables.
pub fn ensure_columns_exist(store: &Store) -> crate::Result<()> {
    for (table, columns) in COLUMN_DEFINITIONS {
        for (column_name, definition) in *columns {
            if let Err(e) = ensure_column(store, table, column_name, definition) {
                error!("failed to ensure column {table}.{column_name}: {e}");
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Ensure base schema tables exist (idempotent).
pub fn ensure_tables_exist(store: &Store) -> crate::Result<()> {
    info!("ensuring tables exist");
    store.execute_script(SCHEMA_TABLES)
}

/// Ensure indexes/triggers exist and repair the metadata FTS if needed.
///
/// Repair runs first: creating the canonical triggers against a legacy FTS
/// shape would fail, so the shape must be fixed before the idempotent script.
pub fn ensure_indexes_and_triggers(store: &Store) -> crate::Result<()> {
    info!("ensuring indexes/triggers exist");
    if let Err(e) = repair_asset_metadata_fts(store) {
        warn!("failed to repair asset_metadata_fts: {e}");
    }
    store.execute_script(INDEXES_AND_TRIGGERS)?;
    Ok(())
}

fn fts_has_column(store: &Store, table: &str, col: &str) -> bool {
    if !is_safe_identifier(table) {
        return false;
    }
    store
        .query_map(&format!("PRAGMA table_info({table})"), [], |row| {
            row.get::<_, String>(1)
        })
        .map(|cols| cols.iter().any(|c| c == col))
        .unwrap_or(false)
}

fn master_sql(store: &Store, kind: &str, name: &str) -> String {
    store
        .query_row_opt(
            "SELECT sql FROM sqlite_master WHERE type = ? AND name = ? LIMIT 1",
            [kind, name],
            |row| row.get::<_, Option<String>>(0),
        )
        .ok()
        .flatten()
        .flatten()
        .unwrap_or_default()
}

/// Repair legacy/incorrect FTS definitions for asset metadata.
///
/// Older versions used `content_rowid='asset_id'` on a contentless table,
/// which breaks updates with errors like "no such column: T.asset_id". A
/// trigger that issues `UPDATE asset_metadata_fts` is equally broken for a
/// contentless table. Missing columns force a rebuild too. Destructive DDL
/// runs only inside one immediate transaction, after positive identification,
/// and never touches `asset_metadata` itself.
pub fn repair_asset_metadata_fts(store: &Store) -> crate::Result<()> {
    let ddl = master_sql(store, "table", "asset_metadata_fts").to_lowercase();
    if ddl.is_empty() {
        // No FTS table yet; creation is the schema script's job.
        return Ok(());
    }
    let trig = master_sql(store, "trigger", "asset_metadata_fts_update").to_lowercase();

    let mut needs_table_rebuild = ddl.contains("content_rowid") && ddl.contains("asset_id");
    let needs_trigger_rebuild = trig.contains("update asset_metadata_fts");
    if !fts_has_column(store, "asset_metadata_fts", "tags_text")
        || !fts_has_column(store, "asset_metadata_fts", "metadata_text")
    {
        needs_table_rebuild = true;
    }

    if !(needs_table_rebuild || needs_trigger_rebuild) {
        return Ok(());
    }

    warn!("repairing asset_metadata_fts (schema/triggers)");

    let result: crate::Result<()> = (|| {
        let tx = store.transaction(TxMode::Immediate)?;
        if needs_table_rebuild {
            tx.execute_script(
                "DROP TRIGGER IF EXISTS asset_metadata_fts_insert;
                 DROP TRIGGER IF EXISTS asset_metadata_fts_delete;
                 DROP TRIGGER IF EXISTS asset_metadata_fts_update;
                 DROP TABLE IF EXISTS asset_metadata_fts;",
            )?;
            tx.execute_script(
                "CREATE VIRTUAL TABLE IF NOT EXISTS asset_metadata_fts USING fts5(
                    tags,
                    tags_text,
                    metadata_text,
                    content=''
                );",
            )?;
        } else {
            tx.execute_script(
                "DROP TRIGGER IF EXISTS asset_metadata_fts_insert;
                 DROP TRIGGER IF EXISTS asset_metadata_fts_delete;
                 DROP TRIGGER IF EXISTS asset_metadata_fts_update;",
            )?;
        }

        tx.execute_script(
            "CREATE TRIGGER IF NOT EXISTS asset_metadata_fts_insert AFTER INSERT ON asset_metadata BEGIN
                INSERT INTO asset_metadata_fts(rowid, tags, tags_text, metadata_text)
                VALUES (new.asset_id, COALESCE(new.tags, ''), COALESCE(new.tags_text, ''), COALESCE(new.metadata_text, ''));
            END;

            CREATE TRIGGER IF NOT EXISTS asset_metadata_fts_delete AFTER DELETE ON asset_metadata BEGIN
                INSERT INTO asset_metadata_fts(asset_metadata_fts, rowid, tags, tags_text, metadata_text)
                VALUES ('delete', old.asset_id, COALESCE(old.tags, ''), COALESCE(old.tags_text, ''), COALESCE(old.metadata_text, ''));
            END;

            CREATE TRIGGER IF NOT EXISTS asset_metadata_fts_update AFTER UPDATE ON asset_metadata BEGIN
                INSERT INTO asset_metadata_fts(asset_metadata_fts, rowid, tags, tags_text, metadata_text)
                VALUES ('delete', old.asset_id, COALESCE(old.tags, ''), COALESCE(old.tags_text, ''), COALESCE(old.metadata_text, ''));
                INSERT INTO asset_metadata_fts(rowid, tags, tags_text, metadata_text)
                VALUES (new.asset_id, COALESCE(new.tags, ''), COALESCE(new.tags_text, ''), COALESCE(new.metadata_text, ''));
            END;",
        )?;

        // Contentless tables reject plain DELETE; 'delete-all' resets the
        // index before repopulating from the base table.
        tx.execute_script(
            "INSERT INTO asset_metadata_fts(asset_metadata_fts) VALUES('delete-all');
             INSERT INTO asset_metadata_fts(rowid, tags, tags_text, metadata_text)
             SELECT asset_id, COALESCE(tags, ''), COALESCE(tags_text, ''), COALESCE(metadata_text, '')
             FROM asset_metadata;",
        )?;

        tx.commit()
    })();

    result.map_err(|e| AtelierError::FtsRepairFailed(e.to_string()))
}

/// Stable fingerprint of the declared DDL, used to spot "exotic" databases.
/// Informational only; self-heal happens via `COLUMN_DEFINITIONS`.
fn schema_fingerprint() -> String {
    let ddl = format!("{SCHEMA_TABLES}\n{INDEXES_AND_TRIGGERS}");
    let normalized: String = ddl
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn ensure_schema_fingerprint(store: &Store) -> crate::Result<()> {
    if !store.has_table("metadata") {
        return Ok(());
    }
    let fingerprint = schema_fingerprint();
    let existing: Option<String> = store
        .query_row_opt(
            "SELECT value FROM metadata WHERE key = 'schema_ddl_hash'",
            [],
            |row| row.get(0),
        )
        .ok()
        .flatten();
    if let Some(current) = existing {
        if !current.is_empty() && current != fingerprint {
            warn!("database schema fingerprint differs from expected (will self-heal columns anyway)");
        }
    }
    store.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_ddl_hash', ?)",
        [fingerprint],
    )?;
    Ok(())
}

fn ensure_schema(store: &Store) -> crate::Result<()> {
    ensure_tables_exist(store)?;
    ensure_columns_exist(store)?;
    ensure_indexes_and_triggers(store)?;
    store.set_schema_version(CURRENT_SCHEMA_VERSION)?;
    if let Err(e) = ensure_schema_fingerprint(store) {
        warn!("failed to store schema fingerprint: {e}");
    }
    info!("schema ensured (version {CURRENT_SCHEMA_VERSION})");
    Ok(())
}

/// Initialize the schema (first-time installs and tests).
pub fn init_schema(store: &Store) -> crate::Result<()> {
    ensure_schema(store)
}

/// Repair the schema to the current version by ensuring expected tables,
/// columns, indexes, and triggers exist.
pub fn migrate_schema(store: &Store) -> crate::Result<()> {
    let current_version = store.get_schema_version();
    info!("ensuring schema (current version {current_version} -> target {CURRENT_SCHEMA_VERSION})");
    ensure_schema(store)?;
    let final_version = store.get_schema_version();
    if current_version == final_version {
        info!("schema already reported up to date ({final_version})");
    } else {
        info!("schema repaired from version {current_version} to {final_version}");
    }
    Ok(())
}

/// Rebuild the full-text search indexes.
pub fn rebuild_fts(store: &Store) -> crate::Result<()> {
    info!("rebuilding FTS index");
    store
        .execute("INSERT INTO assets_fts(assets_fts) VALUES('rebuild')", [])
        .map_err(|e| {
            error!("failed to rebuild assets_fts: {e}");
            e
        })?;
    repair_asset_metadata_fts(store)?;
    info!("FTS index rebuilt");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Store {
        Store::open(&dir.path().join("assets.sqlite"), &StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_safe_identifier() {
        assert!(is_safe_identifier("assets"));
        assert!(is_safe_identifier("_private"));
        assert!(is_safe_identifier("a1_b2"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("1abc"));
        assert!(!is_safe_identifier("a;drop"));
        assert!(!is_safe_identifier("a b"));
    }

    #[test]
    fn test_migrate_schema_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        migrate_schema(&store).unwrap();
        let v1 = store.get_schema_version();
        let fp1: Option<String> = store
            .query_row_opt(
                "SELECT value FROM metadata WHERE key = 'schema_ddl_hash'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        migrate_schema(&store).unwrap();
        let v2 = store.get_schema_version();
        let fp2: Option<String> = store
            .query_row_opt(
                "SELECT value FROM metadata WHERE key = 'schema_ddl_hash'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(v1, CURRENT_SCHEMA_VERSION);
        assert_eq!(v1, v2);
        assert_eq!(fp1, fp2);
        assert!(fp1.is_some());
    }

    #[test]
    fn test_fts_triggers_track_assets() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        migrate_schema(&store).unwrap();

        store
            .execute(
                "INSERT INTO assets (filename, subfolder, filepath, kind, ext, size, mtime)
                 VALUES ('cat.png', '', '/out/cat.png', 'image', '.png', 10, 100)",
                [],
            )
            .unwrap();

        let hits: Vec<i64> = store
            .query_map(
                "SELECT rowid FROM assets_fts WHERE assets_fts MATCH 'cat'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);

        store
            .execute(
                "UPDATE assets SET filename = 'dog.png' WHERE filepath = '/out/cat.png'",
                [],
            )
            .unwrap();
        let old_hits: Vec<i64> = store
            .query_map(
                "SELECT rowid FROM assets_fts WHERE assets_fts MATCH 'cat'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(old_hits.is_empty());
        let new_hits: Vec<i64> = store
            .query_map(
                "SELECT rowid FROM assets_fts WHERE assets_fts MATCH 'dog'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(new_hits.len(), 1);
    }

    #[test]
    fn test_repair_rebuilds_legacy_fts() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        ensure_tables_exist(&store).unwrap();
        ensure_columns_exist(&store).unwrap();

        // Simulate a legacy contentless FTS keyed by asset_id.
        store
            .execute_script(
                "CREATE VIRTUAL TABLE asset_metadata_fts USING fts5(
                    tags,
                    content='',
                    content_rowid='asset_id'
                );",
            )
            .unwrap();

        ensure_indexes_and_triggers(&store).unwrap();

        assert!(fts_has_column(&store, "asset_metadata_fts", "tags_text"));
        assert!(fts_has_column(&store, "asset_metadata_fts", "metadata_text"));
        let ddl = master_sql(&store, "table", "asset_metadata_fts").to_lowercase();
        assert!(!ddl.contains("content_rowid"));
    }

    #[test]
    fn test_metadata_fts_update_via_delete_insert() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        migrate_schema(&store).unwrap();

        store
            .execute(
                "INSERT INTO assets (filename, subfolder, filepath, kind, ext, size, mtime)
                 VALUES ('a.png', '', '/out/a.png', 'image', '.png', 1, 1)",
                [],
            )
            .unwrap();
        store
            .execute(
                "INSERT INTO asset_metadata (asset_id, tags, tags_text) VALUES (1, '[\"fluffy\"]', 'fluffy')",
                [],
            )
            .unwrap();

        let hits: Vec<i64> = store
            .query_map(
                "SELECT rowid FROM asset_metadata_fts WHERE asset_metadata_fts MATCH 'fluffy'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, vec![1]);

        store
            .execute(
                "UPDATE asset_metadata SET tags = '[\"sleek\"]', tags_text = 'sleek' WHERE asset_id = 1",
                [],
            )
            .unwrap();
        let hits: Vec<i64> = store
            .query_map(
                "SELECT rowid FROM asset_metadata_fts WHERE asset_metadata_fts MATCH 'sleek'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, vec![1]);
    }
}
