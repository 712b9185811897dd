//! FTS + attribute search over the asset index, scoped search, and asset
//! hydration.

use crate::asset::{AssetDetail, AssetKind, AssetRow, SearchPage, Source};
use crate::config::SearchConfig;
use crate::error::AtelierError;
use crate::store::Store;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::Row;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Attribute filters applied on top of the text query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub kind: Option<AssetKind>,
    pub min_rating: Option<i64>,
    pub has_workflow: Option<bool>,
}

static FTS_SPECIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'\-:&/\\|;@#*~()\[\]{}]+"#).expect("valid regex"));
static NON_PRINTABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\x20-\x7E]+").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

const ROW_COLUMNS: &str = "
    a.id, a.filename, a.subfolder, a.filepath, a.kind,
    a.source, a.root_id,
    a.width, a.height, a.duration, a.size, a.mtime,
    COALESCE(m.rating, 0) AS rating,
    COALESCE(m.tags, '[]') AS tags,
    COALESCE(m.tags_text, '') AS tags_text,
    COALESCE(m.has_workflow, 0) AS has_workflow,
    COALESCE(m.has_generation_data, 0) AS has_generation_data";

pub struct Searcher {
    store: Arc<Store>,
    config: SearchConfig,
}

impl Searcher {
    pub fn new(store: Arc<Store>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    /// Search assets using FTS5, or browse all when the query is `*`.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        filters: &SearchFilters,
        include_total: bool,
    ) -> crate::Result<SearchPage> {
        self.search_impl(query, None, limit, offset, filters, include_total)
    }

    /// Search restricted to assets whose filepath equals one of `roots` or is
    /// a descendant of one.
    pub fn search_scoped(
        &self,
        query: &str,
        roots: &[PathBuf],
        limit: usize,
        offset: usize,
        filters: &SearchFilters,
        include_total: bool,
    ) -> crate::Result<SearchPage> {
        let cleaned: Vec<String> = roots
            .iter()
            .filter(|r| !r.as_os_str().is_empty())
            .map(|r| canonical_string(r))
            .collect();
        if cleaned.is_empty() {
            return Err(AtelierError::InvalidInput("Missing or invalid roots".into()));
        }
        self.search_impl(query, Some(&cleaned), limit, offset, filters, include_total)
    }

    fn search_impl(
        &self,
        query: &str,
        roots: Option<&[String]>,
        limit: usize,
        offset: usize,
        filters: &SearchFilters,
        include_total: bool,
    ) -> crate::Result<SearchPage> {
        if query.trim().is_empty() {
            return Err(AtelierError::EmptyQuery);
        }
        self.validate_search_input(query)?;

        let limit = limit.min(self.config.max_limit).max(1);
        if offset > self.config.max_offset {
            return Err(AtelierError::InvalidInput(format!(
                "Offset must be at most {}",
                self.config.max_offset
            )));
        }

        let trimmed = query.trim();
        let is_browse_all = trimmed == "*" || trimmed.split_whitespace().all(|t| t == "*");
        debug!(query = trimmed, limit, offset, browse_all = is_browse_all, "searching");

        // Scope restriction: exact root match or descendant via escaped LIKE.
        let mut roots_clause = String::new();
        let mut roots_params: Vec<SqlValue> = Vec::new();
        if let Some(roots) = roots {
            let mut parts = Vec::new();
            for root in roots {
                let prefix = format!(
                    "{}{}",
                    root.trim_end_matches(std::path::MAIN_SEPARATOR),
                    std::path::MAIN_SEPARATOR
                );
                parts.push("(a.filepath = ? OR a.filepath LIKE ? ESCAPE '\\')".to_string());
                roots_params.push(SqlValue::Text(root.clone()));
                roots_params.push(SqlValue::Text(format!("{}%", escape_like_pattern(&prefix))));
            }
            roots_clause = format!("({})", parts.join(" OR "));
        }

        let mut filter_clauses = String::new();
        let mut filter_params: Vec<SqlValue> = Vec::new();
        if let Some(kind) = filters.kind {
            filter_clauses.push_str(" AND a.kind = ?");
            filter_params.push(SqlValue::Text(kind.as_str().to_string()));
        }
        if let Some(min_rating) = filters.min_rating {
            filter_clauses.push_str(" AND COALESCE(m.rating, 0) >= ?");
            filter_params.push(SqlValue::Integer(min_rating));
        }
        if let Some(has_workflow) = filters.has_workflow {
            filter_clauses.push_str(" AND COALESCE(m.has_workflow, 0) = ?");
            filter_params.push(SqlValue::Integer(has_workflow as i64));
        }

        let where_scope = if roots_clause.is_empty() {
            "1=1".to_string()
        } else {
            roots_clause
        };

        let (assets, total) = if is_browse_all {
            let sql = format!(
                "SELECT {ROW_COLUMNS}
                 FROM assets a
                 LEFT JOIN asset_metadata m ON a.id = m.asset_id
                 WHERE {where_scope}{filter_clauses}
                 ORDER BY a.mtime DESC
                 LIMIT {limit} OFFSET {offset}"
            );
            let mut params: Vec<SqlValue> = roots_params.clone();
            params.extend(filter_params.clone());
            let assets = self.store.query_map(
                &sql,
                rusqlite::params_from_iter(params.iter()),
                |row| asset_row_from(row, false),
            )?;

            let total = if include_total {
                let count_sql = format!(
                    "SELECT COUNT(*) FROM assets a
                     LEFT JOIN asset_metadata m ON a.id = m.asset_id
                     WHERE {where_scope}{filter_clauses}"
                );
                let mut params: Vec<SqlValue> = roots_params;
                params.extend(filter_params);
                self.store
                    .query_row_opt(&count_sql, rusqlite::params_from_iter(params.iter()), |row| {
                        row.get::<_, i64>(0)
                    })?
            } else {
                None
            };
            (assets, total)
        } else {
            let fts_query = sanitize_fts_query(trimmed);

            // Union both FTS tables taking the best (smallest) BM25 rank per
            // asset; metadata matches are biased +8.0 so filename/subfolder
            // hits rank above pure-metadata hits.
            let sql = format!(
                "WITH matches AS (
                     SELECT rowid AS asset_id, bm25(assets_fts) AS rank
                     FROM assets_fts
                     WHERE assets_fts MATCH ?

                     UNION ALL

                     SELECT rowid AS asset_id, (bm25(asset_metadata_fts) + 8.0) AS rank
                     FROM asset_metadata_fts
                     WHERE asset_metadata_fts MATCH ?
                 ),
                 best AS (
                     SELECT asset_id, MIN(rank) AS rank
                     FROM matches
                     GROUP BY asset_id
                 )
                 SELECT {ROW_COLUMNS}, best.rank AS rank
                 FROM best
                 JOIN assets a ON best.asset_id = a.id
                 LEFT JOIN asset_metadata m ON a.id = m.asset_id
                 WHERE {where_scope}{filter_clauses}
                 ORDER BY rank, a.id
                 LIMIT {limit} OFFSET {offset}"
            );
            let mut params: Vec<SqlValue> = vec![
                SqlValue::Text(fts_query.clone()),
                SqlValue::Text(fts_query.clone()),
            ];
            params.extend(roots_params.clone());
            params.extend(filter_params.clone());
            let assets = self.store.query_map(
                &sql,
                rusqlite::params_from_iter(params.iter()),
                |row| asset_row_from(row, true),
            )?;

            let total = if include_total {
                let count_sql = format!(
                    "WITH matches AS (
                         SELECT rowid AS asset_id FROM assets_fts WHERE assets_fts MATCH ?
                         UNION
                         SELECT rowid AS asset_id FROM asset_metadata_fts WHERE asset_metadata_fts MATCH ?
                     )
                     SELECT COUNT(*) FROM (SELECT DISTINCT asset_id FROM matches) t
                     JOIN assets a ON t.asset_id = a.id
                     LEFT JOIN asset_metadata m ON a.id = m.asset_id
                     WHERE {where_scope}{filter_clauses}"
                );
                let mut params: Vec<SqlValue> = vec![
                    SqlValue::Text(fts_query.clone()),
                    SqlValue::Text(fts_query),
                ];
                params.extend(roots_params);
                params.extend(filter_params);
                self.store
                    .query_row_opt(&count_sql, rusqlite::params_from_iter(params.iter()), |row| {
                        row.get::<_, i64>(0)
                    })?
            } else {
                None
            };
            (assets, total)
        };

        debug!(results = assets.len(), total = ?total, "search finished");
        Ok(SearchPage {
            assets,
            limit,
            offset,
            query: query.to_string(),
            total: if include_total { Some(total.unwrap_or(0)) } else { None },
        })
    }

    /// True when the index contains at least one asset at or under `root`.
    pub fn has_assets_under_root(&self, root: &Path) -> crate::Result<bool> {
        let resolved = canonical_string(root);
        let prefix = format!(
            "{}{}",
            resolved.trim_end_matches(std::path::MAIN_SEPARATOR),
            std::path::MAIN_SEPARATOR
        );
        let hit: Option<i64> = self.store.query_row_opt(
            "SELECT 1 FROM assets a
             WHERE (a.filepath = ? OR a.filepath LIKE ? ESCAPE '\\')
             LIMIT 1",
            [resolved, format!("{}%", escape_like_pattern(&prefix))],
            |row| row.get(0),
        )?;
        Ok(hit.is_some())
    }

    /// Fetch a single asset with full hydration. No self-heal here; the
    /// index service layers that on top.
    pub fn get_asset(&self, asset_id: i64) -> crate::Result<Option<AssetDetail>> {
        let detail = self.store.query_row_opt(
            "SELECT
                a.id, a.filename, a.subfolder, a.filepath, a.kind, a.source, a.root_id, a.ext,
                a.width, a.height, a.duration, a.size, a.mtime,
                a.created_at, a.updated_at, a.indexed_at,
                a.content_hash, a.phash, a.hash_state,
                COALESCE(m.rating, 0) AS rating,
                COALESCE(m.tags, '') AS tags,
                COALESCE(m.tags_text, '') AS tags_text,
                m.workflow_hash,
                COALESCE(m.has_workflow, 0) AS has_workflow,
                COALESCE(m.has_generation_data, 0) AS has_generation_data,
                COALESCE(m.metadata_quality, 'none') AS metadata_quality,
                COALESCE(m.metadata_raw, '{}') AS metadata_raw
             FROM assets a
             LEFT JOIN asset_metadata m ON m.asset_id = a.id
             WHERE a.id = ?",
            [asset_id],
            asset_detail_from,
        )?;
        Ok(detail)
    }

    /// Batch fetch assets by id in one query, preserving the requested order.
    pub fn get_assets(&self, asset_ids: &[i64]) -> crate::Result<Vec<AssetDetail>> {
        let mut cleaned: Vec<i64> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for &id in asset_ids {
            if id <= 0 || !seen.insert(id) {
                continue;
            }
            cleaned.push(id);
            if cleaned.len() >= self.config.max_batch_ids {
                break;
            }
        }
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; cleaned.len()].join(",");
        let rows = self.store.query_map(
            &format!(
                "SELECT
                    a.id, a.filename, a.subfolder, a.filepath, a.kind, a.source, a.root_id, a.ext,
                    a.width, a.height, a.duration, a.size, a.mtime,
                    a.created_at, a.updated_at, a.indexed_at,
                    a.content_hash, a.phash, a.hash_state,
                    COALESCE(m.rating, 0) AS rating,
                    COALESCE(m.tags, '') AS tags,
                    COALESCE(m.tags_text, '') AS tags_text,
                    m.workflow_hash,
                    COALESCE(m.has_workflow, 0) AS has_workflow,
                    COALESCE(m.has_generation_data, 0) AS has_generation_data,
                    COALESCE(m.metadata_quality, 'none') AS metadata_quality,
                    COALESCE(m.metadata_raw, '{{}}') AS metadata_raw
                 FROM assets a
                 LEFT JOIN asset_metadata m ON m.asset_id = a.id
                 WHERE a.id IN ({placeholders})"
            ),
            rusqlite::params_from_iter(cleaned.iter()),
            asset_detail_from,
        )?;

        let mut by_id: HashMap<i64, AssetDetail> = rows.into_iter().map(|d| (d.id, d)).collect();
        Ok(cleaned.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Lookup DB-enriched fields for a set of absolute filepaths. Used to
    /// enrich filesystem listings without a full scan.
    pub fn lookup_assets_by_filepaths(
        &self,
        filepaths: &[String],
    ) -> crate::Result<HashMap<String, AssetRow>> {
        let mut cleaned: Vec<&String> = filepaths.iter().filter(|p| !p.is_empty()).collect();
        if cleaned.is_empty() {
            return Ok(HashMap::new());
        }
        cleaned.truncate(self.config.max_filepath_lookup);

        let placeholders = vec!["?"; cleaned.len()].join(",");
        let rows = self.store.query_map(
            &format!(
                "SELECT {ROW_COLUMNS}
                 FROM assets a
                 LEFT JOIN asset_metadata m ON a.id = m.asset_id
                 WHERE a.filepath IN ({placeholders})"
            ),
            rusqlite::params_from_iter(cleaned.iter()),
            |row| asset_row_from(row, false),
        )?;

        Ok(rows
            .into_iter()
            .map(|row| (row.filepath.clone(), row))
            .collect())
    }

    fn validate_search_input(&self, query: &str) -> crate::Result<()> {
        let trimmed = query.trim();
        // Browse-all queries are always allowed.
        if trimmed == "*" || (!trimmed.is_empty() && trimmed.split_whitespace().all(|t| t == "*")) {
            return Ok(());
        }
        if trimmed.len() > self.config.max_query_length {
            return Err(AtelierError::QueryTooLong {
                max: self.config.max_query_length,
            });
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() > self.config.max_tokens {
            return Err(AtelierError::QueryTooComplex {
                max: self.config.max_tokens,
            });
        }
        if tokens.iter().any(|t| t.len() > self.config.max_token_length) {
            return Err(AtelierError::TokenTooLong {
                max: self.config.max_token_length,
            });
        }
        // Reject queries that are wildcards plus at most one real token.
        let wildcard_hits = tokens.iter().filter(|t| **t == "*").count();
        if wildcard_hits > 0 && wildcard_hits >= tokens.len().saturating_sub(1) {
            return Err(AtelierError::QueryTooGeneral);
        }
        Ok(())
    }
}

/// Escape special characters for FTS5 and collapse whitespace.
pub fn sanitize_fts_query(query: &str) -> String {
    let text = query.trim();
    if text.is_empty() {
        return "*".to_string();
    }
    let sanitized = FTS_SPECIAL_RE.replace_all(text, " ");
    let sanitized = NON_PRINTABLE_RE.replace_all(&sanitized, " ");
    let sanitized = WHITESPACE_RE.replace_all(&sanitized, " ");
    let out = sanitized.trim().to_string();
    if out.is_empty() {
        "*".to_string()
    } else {
        out
    }
}

/// Escape LIKE special characters (% and _) for safe prefix matching.
pub fn escape_like_pattern(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn canonical_string(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn parse_tags(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

fn asset_row_from(row: &Row<'_>, with_rank: bool) -> rusqlite::Result<AssetRow> {
    let kind: String = row.get(4)?;
    let source: String = row.get(5)?;
    let tags_raw: String = row.get(13)?;
    Ok(AssetRow {
        id: row.get(0)?,
        filename: row.get(1)?,
        subfolder: row.get(2)?,
        filepath: row.get(3)?,
        kind: AssetKind::parse(&kind),
        source: Source::parse(&source),
        root_id: row.get(6)?,
        width: row.get(7)?,
        height: row.get(8)?,
        duration: row.get(9)?,
        size: row.get(10)?,
        mtime: row.get(11)?,
        rating: row.get(12)?,
        tags: parse_tags(&tags_raw),
        tags_text: row.get(14)?,
        has_workflow: row.get::<_, i64>(15)? != 0,
        has_generation_data: row.get::<_, i64>(16)? != 0,
        rank: if with_rank { row.get(17)? } else { None },
    })
}

fn asset_detail_from(row: &Row<'_>) -> rusqlite::Result<AssetDetail> {
    let kind: String = row.get(4)?;
    let source: String = row.get(5)?;
    let tags_raw: String = row.get(20)?;
    let metadata_raw_text: String = row.get(26)?;

    let metadata_raw: Value = serde_json::from_str(&metadata_raw_text)
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
    let field = |key: &str| -> Option<Value> {
        metadata_raw.get(key).filter(|v| !v.is_null()).cloned()
    };
    let exif = field("exif").or_else(|| field("raw"));

    Ok(AssetDetail {
        id: row.get(0)?,
        filename: row.get(1)?,
        subfolder: row.get(2)?,
        filepath: row.get(3)?,
        kind: AssetKind::parse(&kind),
        source: Source::parse(&source),
        root_id: row.get(6)?,
        ext: row.get(7)?,
        width: row.get(8)?,
        height: row.get(9)?,
        duration: row.get(10)?,
        size: row.get(11)?,
        mtime: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        indexed_at: row.get(15)?,
        content_hash: row.get(16)?,
        phash: row.get(17)?,
        hash_state: row.get(18)?,
        rating: row.get(19)?,
        tags: parse_tags(&tags_raw),
        tags_text: row.get(21)?,
        workflow_hash: row.get(22)?,
        has_workflow: row.get::<_, i64>(23)? != 0,
        has_generation_data: row.get::<_, i64>(24)? != 0,
        metadata_quality: row.get(25)?,
        prompt: field("prompt"),
        workflow: field("workflow"),
        exif,
        geninfo: field("geninfo"),
        metadata_raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_fts_query() {
        assert_eq!(sanitize_fts_query("cat"), "cat");
        assert_eq!(sanitize_fts_query("  cat   dog "), "cat dog");
        assert_eq!(sanitize_fts_query("\"quoted\" AND (x)"), "quoted AND x");
        assert_eq!(sanitize_fts_query("cat-dog"), "cat dog");
        assert_eq!(sanitize_fts_query("'';--"), "*");
    }

    #[test]
    fn test_escape_like_pattern() {
        assert_eq!(escape_like_pattern("/out/a_b%c"), "/out/a\\_b\\%c");
        assert_eq!(escape_like_pattern("C:\\out\\"), "C:\\\\out\\\\");
    }

    #[test]
    fn test_parse_tags_tolerates_garbage() {
        assert_eq!(parse_tags(""), Vec::<String>::new());
        assert_eq!(parse_tags("not json"), Vec::<String>::new());
        assert_eq!(parse_tags("[\"a\",\"b\"]"), vec!["a", "b"]);
    }
}
