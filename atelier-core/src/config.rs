//! Configuration for atelier

use crate::AtelierError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Atelier Configuration

[store]
# Bounded connection pool size
max_connections = 8
# Per-statement deadline in seconds (0 disables)
query_timeout_secs = 30.0
# SQLite busy timeout applied per connection (milliseconds)
busy_timeout_ms = 5000

[scan]
# Batch size step function: <= threshold -> batch size
small_threshold = 100
med_threshold = 1000
large_threshold = 10000
batch_small = 50
batch_med = 50
batch_large = 100
batch_xl = 200
# Hard cap on rows written per transaction
max_transaction_batch = 500
# Stat retries on transient OS errors
stat_retries = 3
# Cap on the background-enrichment queue handed back by fast scans
max_to_enrich = 10000
# Directory/file patterns the walker skips entirely
ignore_patterns = ["_mjr_index", ".thumbnails", ".cache"]

[metadata]
# Concurrent metadata extractions (probes are expensive)
extract_concurrency = 1
# Probe backend: "auto", "exiftool", "ffprobe", or "both"
probe_backend = "auto"
exiftool_bin = "exiftool"
ffprobe_bin = "ffprobe"
exiftool_timeout_secs = 15
ffprobe_timeout_secs = 10

[search]
max_limit = 500
max_offset = 10000
max_query_length = 512
max_tokens = 16
max_token_length = 64
max_batch_ids = 200
max_filepath_lookup = 5000

[watcher]
enabled = true
# Identical path events within this window are collapsed
debounce_ms = 1000
# Delay before indexing a newly created file (lets writers finish)
settle_ms = 500

[geninfo]
max_graph_nodes = 5000
max_link_nodes = 200
max_graph_depth = 100
"#;

/// Atelier configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub geninfo: GeninfoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: f64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_small_threshold")]
    pub small_threshold: usize,
    #[serde(default = "default_med_threshold")]
    pub med_threshold: usize,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: usize,
    #[serde(default = "default_batch_small")]
    pub batch_small: usize,
    #[serde(default = "default_batch_med")]
    pub batch_med: usize,
    #[serde(default = "default_batch_large")]
    pub batch_large: usize,
    #[serde(default = "default_batch_xl")]
    pub batch_xl: usize,
    #[serde(default = "default_max_transaction_batch")]
    pub max_transaction_batch: usize,
    #[serde(default = "default_stat_retries")]
    pub stat_retries: usize,
    #[serde(default = "default_max_to_enrich")]
    pub max_to_enrich: usize,
    /// Directory/file patterns the walker skips entirely.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_extract_concurrency")]
    pub extract_concurrency: usize,
    #[serde(default = "default_probe_backend")]
    pub probe_backend: String,
    #[serde(default = "default_exiftool_bin")]
    pub exiftool_bin: String,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    #[serde(default = "default_exiftool_timeout_secs")]
    pub exiftool_timeout_secs: u64,
    #[serde(default = "default_ffprobe_timeout_secs")]
    pub ffprobe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_max_offset")]
    pub max_offset: usize,
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_max_token_length")]
    pub max_token_length: usize,
    #[serde(default = "default_max_batch_ids")]
    pub max_batch_ids: usize,
    #[serde(default = "default_max_filepath_lookup")]
    pub max_filepath_lookup: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_watcher_enabled")]
    pub enabled: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeninfoConfig {
    #[serde(default = "default_max_graph_nodes")]
    pub max_graph_nodes: usize,
    #[serde(default = "default_max_link_nodes")]
    pub max_link_nodes: usize,
    #[serde(default = "default_max_graph_depth")]
    pub max_graph_depth: usize,
}

// Default value functions
fn default_max_connections() -> usize {
    8
}
fn default_query_timeout_secs() -> f64 {
    30.0
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_small_threshold() -> usize {
    100
}
fn default_med_threshold() -> usize {
    1000
}
fn default_large_threshold() -> usize {
    10_000
}
fn default_batch_small() -> usize {
    50
}
fn default_batch_med() -> usize {
    50
}
fn default_batch_large() -> usize {
    100
}
fn default_batch_xl() -> usize {
    200
}
fn default_max_transaction_batch() -> usize {
    500
}
fn default_stat_retries() -> usize {
    3
}
fn default_max_to_enrich() -> usize {
    10_000
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        "_mjr_index".to_string(),
        ".thumbnails".to_string(),
        ".cache".to_string(),
    ]
}
fn default_extract_concurrency() -> usize {
    1
}
fn default_probe_backend() -> String {
    "auto".to_string()
}
fn default_exiftool_bin() -> String {
    "exiftool".to_string()
}
fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}
fn default_exiftool_timeout_secs() -> u64 {
    15
}
fn default_ffprobe_timeout_secs() -> u64 {
    10
}
fn default_max_limit() -> usize {
    500
}
fn default_max_offset() -> usize {
    10_000
}
fn default_max_query_length() -> usize {
    512
}
fn default_max_tokens() -> usize {
    16
}
fn default_max_token_length() -> usize {
    64
}
fn default_max_batch_ids() -> usize {
    200
}
fn default_max_filepath_lookup() -> usize {
    5000
}
fn default_watcher_enabled() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    1000
}
fn default_settle_ms() -> u64 {
    500
}
fn default_max_graph_nodes() -> usize {
    5000
}
fn default_max_link_nodes() -> usize {
    200
}
fn default_max_graph_depth() -> usize {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            query_timeout_secs: default_query_timeout_secs(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            small_threshold: default_small_threshold(),
            med_threshold: default_med_threshold(),
            large_threshold: default_large_threshold(),
            batch_small: default_batch_small(),
            batch_med: default_batch_med(),
            batch_large: default_batch_large(),
            batch_xl: default_batch_xl(),
            max_transaction_batch: default_max_transaction_batch(),
            stat_retries: default_stat_retries(),
            max_to_enrich: default_max_to_enrich(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            extract_concurrency: default_extract_concurrency(),
            probe_backend: default_probe_backend(),
            exiftool_bin: default_exiftool_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            exiftool_timeout_secs: default_exiftool_timeout_secs(),
            ffprobe_timeout_secs: default_ffprobe_timeout_secs(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_limit: default_max_limit(),
            max_offset: default_max_offset(),
            max_query_length: default_max_query_length(),
            max_tokens: default_max_tokens(),
            max_token_length: default_max_token_length(),
            max_batch_ids: default_max_batch_ids(),
            max_filepath_lookup: default_max_filepath_lookup(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_watcher_enabled(),
            debounce_ms: default_debounce_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for GeninfoConfig {
    fn default() -> Self {
        Self {
            max_graph_nodes: default_max_graph_nodes(),
            max_link_nodes: default_max_link_nodes(),
            max_graph_depth: default_max_graph_depth(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| AtelierError::ConfigParse(e.to_string()))
    }
}

/// Directory holding the index store and sibling state for an output root.
pub fn index_dir(output_root: &Path) -> PathBuf {
    output_root.join("_mjr_index")
}

/// Path of the embedded store file for an output root.
pub fn index_db_path(output_root: &Path) -> PathBuf {
    index_dir(output_root).join("assets.sqlite")
}

/// Path of the custom roots registry for an output root.
pub fn custom_roots_path(output_root: &Path) -> PathBuf {
    index_dir(output_root).join("custom_roots.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.store.max_connections, 8);
        assert_eq!(config.scan.max_transaction_batch, 500);
        assert_eq!(config.metadata.probe_backend, "auto");
        assert_eq!(config.search.max_query_length, 512);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.scan.batch_xl, 200);
        assert_eq!(config.watcher.debounce_ms, 1000);
        assert_eq!(config.geninfo.max_graph_nodes, 5000);
    }

    #[test]
    fn test_index_paths() {
        let root = Path::new("/out");
        assert_eq!(index_db_path(root), PathBuf::from("/out/_mjr_index/assets.sqlite"));
        assert_eq!(
            custom_roots_path(root),
            PathBuf::from("/out/_mjr_index/custom_roots.json")
        );
    }
}
