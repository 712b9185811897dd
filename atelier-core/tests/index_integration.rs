//! End-to-end tests for the scan/search/update pipeline over temp dirs.
//!
//! External probe tools are assumed absent: extraction degrades but files are
//! still indexed and searchable by filename/filepath.

use atelier_core::index::ScanOptions;
use atelier_core::{AssetKind, Config, IndexService, SearchFilters, Source};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn open_index(output_root: &Path) -> Arc<IndexService> {
    let mut config = Config::default();
    // Keep tool probing cheap in test environments.
    config.metadata.exiftool_bin = "atelier-test-missing-exiftool".into();
    config.metadata.ffprobe_bin = "atelier-test-missing-ffprobe".into();
    IndexService::open(output_root, config).unwrap()
}

fn write_files(dir: &Path, names: &[&str]) {
    for name in names {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, format!("stub-{name}")).unwrap();
    }
}

fn scan_opts() -> ScanOptions {
    ScanOptions::default()
}

#[test]
fn test_full_scan_indexes_supported_files() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["cat_1.png", "cat_2.png", "dog.png", "note.txt", "clip.mp4"]);

    let index = open_index(out.path());
    let stats = index.scan_directory(out.path(), &scan_opts()).unwrap();

    assert_eq!(stats.added, 4, "txt files must be filtered");
    assert_eq!(stats.errors, 0);

    let page = index
        .search("*", 100, 0, &SearchFilters::default(), true)
        .unwrap();
    assert_eq!(page.total, Some(4));
    assert!(page.assets.iter().all(|a| a.kind != AssetKind::Unknown));
}

#[test]
fn test_incremental_rescan_is_idempotent() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["a.png", "b.png", "sub/c.png"]);

    let index = open_index(out.path());
    let first = index.scan_directory(out.path(), &scan_opts()).unwrap();
    assert_eq!(first.added, 3);

    let second = index.scan_directory(out.path(), &scan_opts()).unwrap();
    let third = index.scan_directory(out.path(), &scan_opts()).unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.scanned, third.scanned);
    assert_eq!(second.skipped, third.skipped);
}

#[test]
fn test_subfolder_and_source_columns() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["sub/deep/x.png"]);

    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    let page = index
        .search("*", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    let asset = &page.assets[0];
    assert_eq!(asset.subfolder, "sub/deep");
    assert_eq!(asset.filename, "x.png");
    assert_eq!(asset.source, Source::Output);
    assert!(asset.filepath.ends_with("sub/deep/x.png"));
}

#[test]
fn test_fts_search_by_filename() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["cat_1.png", "cat_2.png", "dog.png"]);

    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    let page = index
        .search("cat", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    assert_eq!(page.total, Some(2));
    let mut names: Vec<&str> = page.assets.iter().map(|a| a.filename.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["cat_1.png", "cat_2.png"]);

    let none = index
        .search("zebra", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    assert_eq!(none.total, Some(0));
    assert!(none.assets.is_empty());
}

#[test]
fn test_fts_follows_rename() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["before.png"]);

    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();
    assert_eq!(
        index
            .search("before", 10, 0, &SearchFilters::default(), true)
            .unwrap()
            .total,
        Some(1)
    );

    // Rename on disk: remove the old path, index the new one.
    let old = out.path().join("before.png");
    let new = out.path().join("after.png");
    fs::rename(&old, &new).unwrap();
    index.remove_path(&old.to_string_lossy()).unwrap();
    index
        .index_paths(&[new.clone()], out.path(), true, Source::Output, None)
        .unwrap();

    assert_eq!(
        index
            .search("before", 10, 0, &SearchFilters::default(), true)
            .unwrap()
            .total,
        Some(0)
    );
    assert_eq!(
        index
            .search("after", 10, 0, &SearchFilters::default(), true)
            .unwrap()
            .total,
        Some(1)
    );
}

#[test]
fn test_scoped_search_soundness_and_pagination() {
    let out = TempDir::new().unwrap();
    let r1 = out.path().join("outputs");
    let r2 = out.path().join("inputs");
    write_files(&r1, &["cat_1.png", "cat_2.png", "dog.png"]);
    write_files(&r2, &["cat_3.png"]);

    let index = open_index(out.path());
    index.scan_directory(&r1, &scan_opts()).unwrap();
    let input_opts = ScanOptions {
        source: Source::Input,
        ..scan_opts()
    };
    index.scan_directory(&r2, &input_opts).unwrap();

    // Single root scope.
    let page = index
        .search_scoped(
            "cat",
            &[r1.clone()],
            10,
            0,
            &SearchFilters {
                kind: Some(AssetKind::Image),
                ..Default::default()
            },
            true,
        )
        .unwrap();
    assert_eq!(page.total, Some(2));
    let r1_canon = fs::canonicalize(&r1).unwrap();
    for asset in &page.assets {
        assert!(
            Path::new(&asset.filepath).starts_with(&r1_canon),
            "scoped result escaped its root: {}",
            asset.filepath
        );
    }

    // Both roots; paginated pages concatenate to the full list.
    let all = index
        .search_scoped("cat", &[r1.clone(), r2.clone()], 10, 0, &SearchFilters::default(), true)
        .unwrap();
    assert_eq!(all.total, Some(3));

    let page1 = index
        .search_scoped("cat", &[r1.clone(), r2.clone()], 2, 0, &SearchFilters::default(), true)
        .unwrap();
    let page2 = index
        .search_scoped("cat", &[r1, r2], 2, 2, &SearchFilters::default(), true)
        .unwrap();
    let mut combined: Vec<i64> = page1.assets.iter().map(|a| a.id).collect();
    combined.extend(page2.assets.iter().map(|a| a.id));
    let full: Vec<i64> = all.assets.iter().map(|a| a.id).collect();
    assert_eq!(combined, full);
}

#[test]
fn test_browse_all_orders_by_mtime_desc() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["old.png"]);
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    // A later file with a later mtime sorts first.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    write_files(out.path(), &["new.png"]);
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    let page = index
        .search("*", 10, 0, &SearchFilters::default(), false)
        .unwrap();
    assert_eq!(page.assets[0].filename, "new.png");
    assert!(page.total.is_none());
}

#[test]
fn test_search_validation_errors() {
    let out = TempDir::new().unwrap();
    let index = open_index(out.path());

    assert_eq!(
        index
            .search("  ", 10, 0, &SearchFilters::default(), true)
            .unwrap_err()
            .code(),
        "EMPTY_QUERY"
    );
    let long = "x".repeat(600);
    assert_eq!(
        index
            .search(&long, 10, 0, &SearchFilters::default(), true)
            .unwrap_err()
            .code(),
        "QUERY_TOO_LONG"
    );
    let many: String = (0..20).map(|i| format!("t{i} ")).collect();
    assert_eq!(
        index
            .search(&many, 10, 0, &SearchFilters::default(), true)
            .unwrap_err()
            .code(),
        "QUERY_TOO_COMPLEX"
    );
    assert_eq!(
        index
            .search("* * cat", 10, 0, &SearchFilters::default(), true)
            .unwrap_err()
            .code(),
        "QUERY_TOO_GENERAL"
    );
}

#[test]
fn test_rating_and_tags_round_trip() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["a.png"]);
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    // Clamp out-of-range ratings.
    assert_eq!(index.update_asset_rating(1, 9).unwrap(), 5);
    assert_eq!(index.get_asset(1).unwrap().unwrap().rating, 5);
    assert_eq!(index.update_asset_rating(1, -2).unwrap(), 0);

    // Canonicalize: case-insensitive dedupe, empties dropped.
    let stored = index
        .update_asset_tags(
            1,
            &[
                "Cats".to_string(),
                "cats".to_string(),
                "Fluffy".to_string(),
                " ".to_string(),
            ],
        )
        .unwrap();
    assert_eq!(stored, vec!["Cats", "Fluffy"]);
    assert_eq!(index.get_asset(1).unwrap().unwrap().tags, vec!["Cats", "Fluffy"]);
    assert_eq!(index.get_all_tags().unwrap(), vec!["Cats", "Fluffy"]);

    // A re-scan must not overwrite user-authored tags.
    let full = ScanOptions {
        incremental: false,
        ..scan_opts()
    };
    index.scan_directory(out.path(), &full).unwrap();
    let asset = index.get_asset(1).unwrap().unwrap();
    assert_eq!(asset.tags, vec!["Cats", "Fluffy"]);
    // A zero rating stays fillable from file metadata on later scans.
    assert_eq!(asset.rating, 0);

    index.update_asset_rating(1, 4).unwrap();
    index.scan_directory(out.path(), &full).unwrap();
    assert_eq!(index.get_asset(1).unwrap().unwrap().rating, 4);
}

#[test]
fn test_tags_searchable_via_metadata_fts() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["plain.png"]);
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    index
        .update_asset_tags(1, &["fluffy".to_string(), "orange".to_string()])
        .unwrap();

    let page = index
        .search("fluffy", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    assert_eq!(page.total, Some(1));
    assert_eq!(page.assets[0].filename, "plain.png");
}

#[test]
fn test_min_rating_filter() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["a.png", "b.png"]);
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();
    index.update_asset_rating(1, 5).unwrap();

    let filters = SearchFilters {
        min_rating: Some(4),
        ..Default::default()
    };
    let page = index.search("*", 10, 0, &filters, true).unwrap();
    assert_eq!(page.total, Some(1));
    assert_eq!(page.assets[0].id, 1);
}

#[test]
fn test_remove_path_deletes_row_and_fts() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["gone.png"]);
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    // The scanner stores the path it walked; use the stored value.
    let page = index
        .search("*", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    let stored = page.assets[0].filepath.clone();

    assert!(index.remove_path(&stored).unwrap());
    let page = index
        .search("*", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    assert_eq!(page.total, Some(0));
    assert_eq!(
        index
            .search("gone", 10, 0, &SearchFilters::default(), true)
            .unwrap()
            .total,
        Some(0)
    );
}

#[test]
fn test_custom_source_rows_carry_root_id() {
    let out = TempDir::new().unwrap();
    let custom = TempDir::new().unwrap();
    write_files(custom.path(), &["art.png"]);

    let index = open_index(out.path());
    let opts = ScanOptions {
        source: Source::Custom,
        root_id: Some("root-123".to_string()),
        ..scan_opts()
    };
    index.scan_directory(custom.path(), &opts).unwrap();

    let page = index
        .search("*", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    assert_eq!(page.assets[0].source, Source::Custom);
    assert_eq!(page.assets[0].root_id.as_deref(), Some("root-123"));
}

#[test]
fn test_get_assets_batch_preserves_requested_order() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["a.png", "b.png", "c.png"]);
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    let batch = index.get_assets_batch(&[3, 1, 3, -5, 2]).unwrap();
    let ids: Vec<i64> = batch.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![3, 1, 2]);
}

#[test]
fn test_lookup_assets_by_filepaths() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["a.png", "b.png"]);
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    let page = index
        .search("*", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    let paths: Vec<String> = page.assets.iter().map(|a| a.filepath.clone()).collect();

    let found = index.lookup_assets_by_filepaths(&paths).unwrap();
    assert_eq!(found.len(), 2);
    for path in &paths {
        assert!(found.contains_key(path));
    }
    let missing = index
        .lookup_assets_by_filepaths(&["/nope/x.png".to_string()])
        .unwrap();
    assert!(missing.is_empty());
}

#[test]
fn test_has_assets_under_root() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["a.png"]);
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    assert!(index.has_assets_under_root(out.path()).unwrap());
    let other = TempDir::new().unwrap();
    assert!(!index.has_assets_under_root(other.path()).unwrap());
}

#[test]
fn test_fast_scan_defers_metadata() {
    let out = TempDir::new().unwrap();
    write_files(out.path(), &["a.png", "b.png"]);
    let index = open_index(out.path());

    let opts = ScanOptions {
        fast: true,
        background_metadata: true,
        ..scan_opts()
    };
    let stats = index.scan_directory(out.path(), &opts).unwrap();
    assert_eq!(stats.added, 2);

    // Rows are searchable immediately even before enrichment completes.
    let page = index
        .search("*", 10, 0, &SearchFilters::default(), true)
        .unwrap();
    assert_eq!(page.total, Some(2));
}

#[test]
fn test_scan_missing_directory_errors() {
    let out = TempDir::new().unwrap();
    let index = open_index(out.path());
    let err = index
        .scan_directory(&out.path().join("nope"), &scan_opts())
        .unwrap_err();
    assert_eq!(err.code(), "DIR_NOT_FOUND");
}

/// Scan a real Auto1111-tagged PNG end to end and read it back: the file
/// yields generation data (prompt, sampler, seed, size) but no workflow.
#[cfg(unix)]
#[test]
fn test_auto1111_png_scan_to_get_asset() {
    use std::os::unix::fs::PermissionsExt;

    let out = TempDir::new().unwrap();
    fs::write(out.path().join("test.png"), b"stub-png").unwrap();

    // Stand-in tag reader: answers -ver and reports the Auto1111 parameters
    // blob as PNG:Parameters for whatever file it is pointed at.
    let tool_dir = TempDir::new().unwrap();
    let tool = tool_dir.path().join("exiftool-stub");
    fs::write(
        &tool,
        concat!(
            "#!/bin/sh\n",
            "if [ \"$1\" = \"-ver\" ]; then echo 12.70; exit 0; fi\n",
            "for last; do :; done\n",
            "printf '[{\"SourceFile\":\"%s\",\"PNG:Parameters\":\"a cat\\\\nNegative prompt: lowres\\\\nSteps: 20, Sampler: Euler a, CFG scale: 7, Seed: 1234567890, Size: 512x512, Model: sd_xl_base.safetensors\"}]' \"$last\"\n",
        ),
    )
    .unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = Config::default();
    config.metadata.exiftool_bin = tool.to_string_lossy().into_owned();
    config.metadata.ffprobe_bin = "atelier-test-missing-ffprobe".into();
    let index = IndexService::open(out.path(), config).unwrap();

    let stats = index.scan_directory(out.path(), &scan_opts()).unwrap();
    assert_eq!(stats.added, 1);
    assert_eq!(stats.updated, 0);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.errors, 0);

    let asset = index.get_asset(1).unwrap().unwrap();
    assert_eq!(asset.rating, 0);
    assert!(asset.tags.is_empty());
    assert_eq!(asset.width, Some(512));
    assert_eq!(asset.height, Some(512));
    assert!(!asset.has_workflow, "parameters text is not a workflow graph");
    assert!(asset.has_generation_data);

    let geninfo = asset.geninfo.expect("geninfo derived from parameters");
    assert_eq!(
        geninfo.pointer("/positive/value").and_then(|v| v.as_str()),
        Some("a cat")
    );
    assert_eq!(
        geninfo.pointer("/negative/value").and_then(|v| v.as_str()),
        Some("lowres")
    );
    assert_eq!(
        geninfo.pointer("/steps/value").and_then(|v| v.as_i64()),
        Some(20)
    );
    assert_eq!(
        geninfo.pointer("/sampler/name").and_then(|v| v.as_str()),
        Some("Euler a")
    );
    assert_eq!(
        geninfo.pointer("/cfg/value").and_then(|v| v.as_f64()),
        Some(7.0)
    );
    assert_eq!(
        geninfo.pointer("/seed/value").and_then(|v| v.as_i64()),
        Some(1234567890)
    );
    assert_eq!(
        geninfo.pointer("/size/width").and_then(|v| v.as_i64()),
        Some(512)
    );
    assert_eq!(
        geninfo.pointer("/size/height").and_then(|v| v.as_i64()),
        Some(512)
    );
    assert_eq!(
        geninfo.pointer("/checkpoint/name").and_then(|v| v.as_str()),
        Some("sd_xl_base")
    );

    // Unchanged file: the journal short-circuits the next incremental scan.
    let rescan = index.scan_directory(out.path(), &scan_opts()).unwrap();
    assert_eq!(rescan.added, 0);
    assert_eq!(rescan.updated, 0);
    assert_eq!(rescan.skipped, 1);
}

#[test]
fn test_watcher_add_and_remove() {
    let out = TempDir::new().unwrap();
    let index = open_index(out.path());
    index.scan_directory(out.path(), &scan_opts()).unwrap();

    let Some(watcher) = IndexService::start_watcher(&index, out.path()) else {
        // Environments without a working notify backend skip the OS path;
        // the synthetic submission path below still needs a watcher.
        return;
    };

    let path = out.path().join("new.png");
    fs::write(&path, b"stub").unwrap();
    watcher.submit_add(path.clone());

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    let appeared = loop {
        let total = index
            .search("*", 10, 0, &SearchFilters::default(), true)
            .unwrap()
            .total;
        if total == Some(1) {
            break true;
        }
        if std::time::Instant::now() > deadline {
            break false;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    };
    assert!(appeared, "created file never showed up in the index");

    let stored = index
        .search("*", 10, 0, &SearchFilters::default(), true)
        .unwrap()
        .assets[0]
        .filepath
        .clone();
    fs::remove_file(&path).unwrap();
    watcher.submit_remove(std::path::PathBuf::from(stored));

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    let removed = loop {
        let total = index
            .search("*", 10, 0, &SearchFilters::default(), true)
            .unwrap()
            .total;
        if total == Some(0) {
            break true;
        }
        if std::time::Instant::now() > deadline {
            break false;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    };
    assert!(removed, "deleted file never left the index");
}
