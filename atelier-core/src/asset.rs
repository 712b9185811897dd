//! Asset domain model: kinds, sources, and row types returned by the index.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Asset kind derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
    Audio,
    Model3d,
    Unknown,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Model3d => "model3d",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> AssetKind {
        match s {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "model3d" => Self::Model3d,
            _ => Self::Unknown,
        }
    }
}

const IMAGE_EXTS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "gif", "bmp", "tiff", "tif", "avif",
];
const VIDEO_EXTS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "webm", "m4v", "flv", "wmv", "mpg", "mpeg",
];
const AUDIO_EXTS: &[&str] = &["mp3", "wav", "flac", "ogg", "opus", "m4a", "aac", "wma"];
const MODEL3D_EXTS: &[&str] = &["glb", "gltf", "obj", "fbx", "stl", "ply"];

/// Classify an extension (without the leading dot, lowercase) into a kind.
pub fn classify_ext(ext: &str) -> AssetKind {
    if IMAGE_EXTS.contains(&ext) {
        AssetKind::Image
    } else if VIDEO_EXTS.contains(&ext) {
        AssetKind::Video
    } else if AUDIO_EXTS.contains(&ext) {
        AssetKind::Audio
    } else if MODEL3D_EXTS.contains(&ext) {
        AssetKind::Model3d
    } else {
        AssetKind::Unknown
    }
}

/// Classify a path by its extension.
pub fn classify_path(path: &Path) -> AssetKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => classify_ext(&ext.to_ascii_lowercase()),
        None => AssetKind::Unknown,
    }
}

/// Lowercased extension with leading dot, as stored in the `ext` column.
pub fn ext_of(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}", ext.to_ascii_lowercase()),
        None => String::new(),
    }
}

/// Logical root the asset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Output,
    Input,
    Custom,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Input => "input",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Source {
        match s {
            "input" => Self::Input,
            "custom" => Self::Custom,
            _ => Self::Output,
        }
    }
}

/// Statistics from a scan or index operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub scanned: usize,
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub start_time: String,
    pub end_time: String,
    /// Paths queued for background enrichment (fast scans only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to_enrich: Vec<String>,
}

/// An asset row as returned by search/listing queries.
#[derive(Debug, Clone, Serialize)]
pub struct AssetRow {
    pub id: i64,
    pub filename: String,
    pub subfolder: String,
    pub filepath: String,
    pub kind: AssetKind,
    pub source: Source,
    pub root_id: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<f64>,
    pub size: i64,
    pub mtime: i64,
    pub rating: i64,
    pub tags: Vec<String>,
    pub tags_text: String,
    pub has_workflow: bool,
    pub has_generation_data: bool,
    /// BM25 rank for FTS hits (lower is better); absent for browse-all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<f64>,
}

/// A fully hydrated asset as returned by `get_asset`.
#[derive(Debug, Clone, Serialize)]
pub struct AssetDetail {
    pub id: i64,
    pub filename: String,
    pub subfolder: String,
    pub filepath: String,
    pub kind: AssetKind,
    pub source: Source,
    pub root_id: Option<String>,
    pub ext: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<f64>,
    pub size: i64,
    pub mtime: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub indexed_at: Option<String>,
    pub content_hash: Option<String>,
    pub phash: Option<String>,
    pub hash_state: Option<String>,
    pub rating: i64,
    pub tags: Vec<String>,
    pub tags_text: String,
    pub workflow_hash: Option<String>,
    pub has_workflow: bool,
    pub has_generation_data: bool,
    pub metadata_quality: String,
    /// Parsed `metadata_raw` JSON document.
    pub metadata_raw: serde_json::Value,
    /// Common nested fields surfaced from `metadata_raw` for convenience.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geninfo: Option<serde_json::Value>,
}

/// A page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub assets: Vec<AssetRow>,
    pub limit: usize,
    pub offset: usize,
    pub query: String,
    /// Total matches without pagination; `None` when `include_total=false`.
    pub total: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_classify_known_extensions() {
        assert_eq!(classify_path(&PathBuf::from("a/b.png")), AssetKind::Image);
        assert_eq!(classify_path(&PathBuf::from("a/B.MP4")), AssetKind::Video);
        assert_eq!(classify_path(&PathBuf::from("x.flac")), AssetKind::Audio);
        assert_eq!(classify_path(&PathBuf::from("m.glb")), AssetKind::Model3d);
        assert_eq!(classify_path(&PathBuf::from("doc.txt")), AssetKind::Unknown);
        assert_eq!(classify_path(&PathBuf::from("noext")), AssetKind::Unknown);
    }

    #[test]
    fn test_ext_of_lowercases() {
        assert_eq!(ext_of(&PathBuf::from("a/B.PNG")), ".png");
        assert_eq!(ext_of(&PathBuf::from("noext")), "");
    }

    #[test]
    fn test_source_round_trip() {
        for s in [Source::Output, Source::Input, Source::Custom] {
            assert_eq!(Source::parse(s.as_str()), s);
        }
        assert_eq!(Source::parse("bogus"), Source::Output);
    }
}
