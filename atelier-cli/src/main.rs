//! Atelier CLI - local media asset indexing and search

use atelier_core::index::ScanOptions;
use atelier_core::{AssetKind, Config, IndexService, SearchFilters, Source};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "atelier")]
#[command(about = "Local media asset indexing and search", long_about = None)]
struct Cli {
    /// Output root holding the index (defaults to the current directory)
    #[arg(long, global = true, env = "ATELIER_OUTPUT_ROOT")]
    output_root: Option<PathBuf>,

    /// Config file path (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory into the index
    Scan {
        /// Directory to scan (default: the output root)
        directory: Option<PathBuf>,

        /// Full re-check instead of incremental
        #[arg(long)]
        full: bool,

        /// Skip metadata extraction (enrich in the background)
        #[arg(long)]
        fast: bool,

        /// Source scope for the scanned files
        #[arg(long, default_value = "output", value_parser = ["output", "input", "custom"])]
        source: String,

        /// Custom root id (required when --source custom)
        #[arg(long)]
        root_id: Option<String>,
    },

    /// Search the index (use '*' to browse everything)
    Search {
        query: String,

        /// Restrict to filepaths under these roots
        #[arg(long)]
        root: Vec<PathBuf>,

        /// Filter by kind
        #[arg(long, value_parser = ["image", "video", "audio", "model3d"])]
        kind: Option<String>,

        /// Minimum rating (0-5)
        #[arg(long)]
        min_rating: Option<i64>,

        /// Only assets with an embedded workflow
        #[arg(long)]
        has_workflow: bool,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Skip the total count query
        #[arg(long)]
        no_total: bool,
    },

    /// Show one asset with full metadata
    Asset {
        id: i64,
    },

    /// Set the rating for an asset
    Rate {
        id: i64,
        rating: i64,
    },

    /// Replace the tags for an asset
    Tag {
        id: i64,
        tags: Vec<String>,
    },

    /// List all tags in the index
    Tags,

    /// Manage custom roots
    Roots {
        #[command(subcommand)]
        command: RootsCommand,
    },

    /// Watch the output root and keep the index in sync
    Watch,

    /// Show index status
    Status,

    /// Rebuild the full-text search indexes
    RebuildFts,

    /// Compact the store
    Vacuum,
}

#[derive(Subcommand)]
enum RootsCommand {
    /// List registered custom roots
    List,
    /// Register a directory as a custom root
    Add {
        path: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a custom root by id
    Remove { id: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        if cli.json {
            let error_json = serde_json::json!({ "code": e.code(), "message": e.to_string() });
            eprintln!("{}", serde_json::to_string_pretty(&error_json).unwrap());
        } else {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> atelier_core::Result<()> {
    let output_root = match &cli.output_root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let index = IndexService::open(&output_root, config)?;

    match &cli.command {
        Commands::Scan {
            directory,
            full,
            fast,
            source,
            root_id,
        } => cmd_scan(
            &index,
            &output_root,
            directory.clone(),
            *full,
            *fast,
            source,
            root_id.as_deref(),
            cli.json,
        ),
        Commands::Search {
            query,
            root,
            kind,
            min_rating,
            has_workflow,
            limit,
            offset,
            no_total,
        } => {
            let filters = SearchFilters {
                kind: kind.as_deref().map(AssetKind::parse),
                min_rating: *min_rating,
                has_workflow: has_workflow.then_some(true),
            };
            cmd_search(&index, query, root, &filters, *limit, *offset, !*no_total, cli.json)
        }
        Commands::Asset { id } => cmd_asset(&index, *id, cli.json),
        Commands::Rate { id, rating } => {
            let stored = index.update_asset_rating(*id, *rating)?;
            if cli.json {
                println!("{}", serde_json::json!({ "id": id, "rating": stored }));
            } else {
                println!("{} asset {} rated {}", "Updated".green(), id, stored);
            }
            Ok(())
        }
        Commands::Tag { id, tags } => {
            let stored = index.update_asset_tags(*id, tags)?;
            if cli.json {
                println!("{}", serde_json::json!({ "id": id, "tags": stored }));
            } else {
                println!("{} asset {} tags: {}", "Updated".green(), id, stored.join(", "));
            }
            Ok(())
        }
        Commands::Tags => {
            let tags = index.get_all_tags()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tags).unwrap());
            } else {
                for tag in tags {
                    println!("{tag}");
                }
            }
            Ok(())
        }
        Commands::Roots { command } => cmd_roots(&output_root, command, cli.json),
        Commands::Watch => cmd_watch(&index, &output_root),
        Commands::Status => {
            let status = index.status()?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
            Ok(())
        }
        Commands::RebuildFts => {
            index.rebuild_fts()?;
            println!("{} FTS indexes", "Rebuilt".green());
            Ok(())
        }
        Commands::Vacuum => {
            index.vacuum()?;
            println!("{} store", "Vacuumed".green());
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_scan(
    index: &Arc<IndexService>,
    output_root: &std::path::Path,
    directory: Option<PathBuf>,
    full: bool,
    fast: bool,
    source: &str,
    root_id: Option<&str>,
    json: bool,
) -> atelier_core::Result<()> {
    let directory = directory.unwrap_or_else(|| output_root.to_path_buf());
    let opts = ScanOptions {
        recursive: true,
        incremental: !full,
        source: Source::parse(source),
        root_id: root_id.map(str::to_string),
        fast,
        background_metadata: fast,
    };
    let stats = index.scan_directory(&directory, &opts)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats).unwrap());
    } else {
        println!(
            "{} {} files: {} added, {} updated, {} skipped, {} errors",
            "Scanned".green(),
            stats.scanned,
            stats.added,
            stats.updated,
            stats.skipped,
            stats.errors
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_search(
    index: &Arc<IndexService>,
    query: &str,
    roots: &[PathBuf],
    filters: &SearchFilters,
    limit: usize,
    offset: usize,
    include_total: bool,
    json: bool,
) -> atelier_core::Result<()> {
    let page = if roots.is_empty() {
        index.search(query, limit, offset, filters, include_total)?
    } else {
        index.search_scoped(query, roots, limit, offset, filters, include_total)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&page).unwrap());
        return Ok(());
    }

    for asset in &page.assets {
        let rating = if asset.rating > 0 {
            format!(" {}", "*".repeat(asset.rating as usize).yellow())
        } else {
            String::new()
        };
        println!(
            "{:>6}  {}  {}{}",
            asset.id,
            asset.kind.as_str().dimmed(),
            asset.filepath,
            rating
        );
    }
    match page.total {
        Some(total) => println!(
            "{} {} of {} (offset {})",
            "Showing".green(),
            page.assets.len(),
            total,
            page.offset
        ),
        None => println!("{} {}", "Showing".green(), page.assets.len()),
    }
    Ok(())
}

fn cmd_asset(index: &Arc<IndexService>, id: i64, json: bool) -> atelier_core::Result<()> {
    let Some(asset) = index.get_asset(id)? else {
        eprintln!("Asset not found: {id}");
        std::process::exit(1);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&asset).unwrap());
        return Ok(());
    }

    println!("{}  {}", asset.id.to_string().bold(), asset.filepath);
    println!("  kind: {}  source: {}", asset.kind.as_str(), asset.source.as_str());
    if let (Some(w), Some(h)) = (asset.width, asset.height) {
        println!("  size: {w}x{h}");
    }
    if let Some(d) = asset.duration {
        println!("  duration: {d:.2}s");
    }
    println!("  rating: {}  tags: {}", asset.rating, asset.tags.join(", "));
    println!(
        "  workflow: {}  generation data: {}  quality: {}",
        asset.has_workflow, asset.has_generation_data, asset.metadata_quality
    );
    if let Some(geninfo) = &asset.geninfo {
        println!("  geninfo: {}", serde_json::to_string_pretty(geninfo).unwrap());
    }
    Ok(())
}

fn cmd_roots(
    output_root: &std::path::Path,
    command: &RootsCommand,
    json: bool,
) -> atelier_core::Result<()> {
    use atelier_core::roots;
    match command {
        RootsCommand::List => {
            let roots = roots::list_custom_roots(output_root)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&roots).unwrap());
            } else {
                for root in roots {
                    println!("{}  {}  ({})", root.id, root.path, root.label);
                }
            }
        }
        RootsCommand::Add { path, label } => {
            let root = roots::add_custom_root(output_root, path, label.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&root).unwrap());
            } else {
                println!("{} custom root {} -> {}", "Added".green(), root.id, root.path);
            }
        }
        RootsCommand::Remove { id } => {
            roots::remove_custom_root(output_root, id)?;
            if !json {
                println!("{} custom root {}", "Removed".green(), id);
            }
        }
    }
    Ok(())
}

fn cmd_watch(index: &Arc<IndexService>, output_root: &std::path::Path) -> atelier_core::Result<()> {
    let Some(_watcher) = IndexService::start_watcher(index, output_root) else {
        eprintln!("Watcher could not be started");
        std::process::exit(1);
    };
    println!(
        "{} {} (press Ctrl-C to stop)",
        "Watching".green(),
        output_root.display()
    );
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
