//! Atelier Core - local media asset indexing and search
//!
//! This library provides the core functionality for scanning creative
//! image/video/audio output trees, extracting embedded generation metadata,
//! and serving full-text + attribute search over an embedded SQLite store.

pub mod asset;
pub mod config;
pub mod error;
pub mod geninfo;
pub mod index;
pub mod metadata;
pub mod probes;
pub mod roots;
pub mod store;

pub use asset::{classify_path, AssetDetail, AssetKind, AssetRow, ScanStats, SearchPage, Source};
pub use config::Config;
pub use error::{AtelierError, Quality};
pub use geninfo::parse_geninfo_from_prompt;
pub use index::{IndexService, ScanOptions, SearchFilters};
pub use metadata::MetadataService;
pub use probes::{ProbeMode, ProbeRouter};
pub use store::Store;

/// Result type alias for atelier operations
pub type Result<T> = std::result::Result<T, AtelierError>;
