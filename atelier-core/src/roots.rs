//! Custom roots persistence and resolution.
//!
//! Custom roots allow browsing/indexing arbitrary folders on disk. They are
//! persisted as a small JSON document next to the index store so they survive
//! restarts.

use crate::config::custom_roots_path;
use crate::error::AtelierError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

static STORE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomRoot {
    pub id: String,
    pub path: String,
    pub label: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RootsDocument {
    version: u32,
    roots: Vec<CustomRoot>,
}

impl Default for RootsDocument {
    fn default() -> Self {
        Self {
            version: 1,
            roots: Vec::new(),
        }
    }
}

fn normalize_dir_path(path: &str) -> Option<PathBuf> {
    if path.is_empty() || path.contains('\0') {
        return None;
    }
    let p = PathBuf::from(path);
    Some(std::fs::canonicalize(&p).unwrap_or(p))
}

fn read_store(store_path: &Path) -> RootsDocument {
    let Ok(raw) = std::fs::read_to_string(store_path) else {
        return RootsDocument::default();
    };
    match serde_json::from_str::<RootsDocument>(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("failed to read custom roots store: {e}");
            RootsDocument::default()
        }
    }
}

fn write_store(store_path: &Path, doc: &RootsDocument) -> crate::Result<()> {
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(doc)?;
    std::fs::write(store_path, raw)?;
    Ok(())
}

/// List registered custom roots, dropping malformed entries.
pub fn list_custom_roots(output_root: &Path) -> crate::Result<Vec<CustomRoot>> {
    let _guard = STORE_LOCK.lock().expect("roots lock poisoned");
    let doc = read_store(&custom_roots_path(output_root));
    Ok(doc
        .roots
        .into_iter()
        .filter(|r| !r.id.trim().is_empty() && !r.path.trim().is_empty())
        .collect())
}

/// Register a directory as a custom root. Idempotent per canonical path.
pub fn add_custom_root(
    output_root: &Path,
    path: &str,
    label: Option<&str>,
) -> crate::Result<CustomRoot> {
    let normalized =
        normalize_dir_path(path).ok_or_else(|| AtelierError::InvalidInput("Invalid path".into()))?;
    if !normalized.exists() {
        return Err(AtelierError::DirNotFound(normalized));
    }
    if !normalized.is_dir() {
        return Err(AtelierError::NotADirectory(normalized));
    }

    let resolved = normalized.to_string_lossy().into_owned();
    let safe_label = label
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            normalized
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| resolved.clone())
        });

    let _guard = STORE_LOCK.lock().expect("roots lock poisoned");
    let store_path = custom_roots_path(output_root);
    let mut doc = read_store(&store_path);

    if let Some(existing) = doc.roots.iter().find(|r| r.path == resolved) {
        return Ok(existing.clone());
    }

    let root = CustomRoot {
        id: Uuid::new_v4().to_string(),
        path: resolved,
        label: safe_label,
        created_at: Some(crate::index::scanner::now_iso()),
    };
    doc.roots.push(root.clone());
    write_store(&store_path, &doc)?;
    Ok(root)
}

/// Remove a custom root by id.
pub fn remove_custom_root(output_root: &Path, root_id: &str) -> crate::Result<()> {
    let rid = root_id.trim();
    if rid.is_empty() {
        return Err(AtelierError::InvalidInput("Missing root_id".into()));
    }

    let _guard = STORE_LOCK.lock().expect("roots lock poisoned");
    let store_path = custom_roots_path(output_root);
    let mut doc = read_store(&store_path);
    let before = doc.roots.len();
    doc.roots.retain(|r| r.id != rid);
    if doc.roots.len() == before {
        return Err(AtelierError::NotFound(format!("Custom root not found: {rid}")));
    }
    write_store(&store_path, &doc)
}

/// Resolve a custom root id to its directory, validating the stored path.
pub fn resolve_custom_root(output_root: &Path, root_id: &str) -> crate::Result<PathBuf> {
    let rid = root_id.trim();
    if rid.is_empty() {
        return Err(AtelierError::InvalidInput("Missing root_id".into()));
    }
    for root in list_custom_roots(output_root)? {
        if root.id == rid {
            return normalize_dir_path(&root.path)
                .ok_or_else(|| AtelierError::InvalidInput("Invalid stored path".into()));
        }
    }
    Err(AtelierError::NotFound(format!("Custom root not found: {rid}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_list_remove_round_trip() {
        let out = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();

        let added = add_custom_root(out.path(), target.path().to_str().unwrap(), Some("Art")).unwrap();
        assert_eq!(added.label, "Art");

        let listed = list_custom_roots(out.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, added.id);

        let resolved = resolve_custom_root(out.path(), &added.id).unwrap();
        assert_eq!(resolved, std::fs::canonicalize(target.path()).unwrap());

        remove_custom_root(out.path(), &added.id).unwrap();
        assert!(list_custom_roots(out.path()).unwrap().is_empty());
        assert!(resolve_custom_root(out.path(), &added.id).is_err());
    }

    #[test]
    fn test_add_is_idempotent_per_path() {
        let out = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let a = add_custom_root(out.path(), target.path().to_str().unwrap(), None).unwrap();
        let b = add_custom_root(out.path(), target.path().to_str().unwrap(), Some("other")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(list_custom_roots(out.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_add_rejects_missing_directory() {
        let out = TempDir::new().unwrap();
        let err = add_custom_root(out.path(), "/definitely/not/here", None).unwrap_err();
        assert_eq!(err.code(), "DIR_NOT_FOUND");
    }
}
