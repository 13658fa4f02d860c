use pixseek::cli::{Cli, Commands, ConfigAction, IndexingArgs};
use pixseek::config::Config;
use pixseek::embedding::ClipModel;
use pixseek::error::{PixseekError, Result};
use pixseek::imaging::Downloader;
use pixseek::indexing::{sweep_progress_bar, IndexOptions, IndexProgress, IndexReport, Indexer};
use pixseek::scanner::ExcludeDirs;
use pixseek::search::{QueryEngine, SearchQuery};
use pixseek::storage::{format_size, MergeOptions, Store, StoreMerger};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Search {
            query,
            add,
            subtract,
            top,
            filepath_only,
            no_indexing,
            dir,
            indexing,
        } => {
            let mut positive = vec![query];
            positive.extend(add);
            cmd_search(
                cli.config.as_deref(),
                SearchArgs {
                    positive,
                    negative: subtract,
                    top,
                    filepath_only,
                    no_indexing,
                    dir,
                },
                &indexing,
            )
        }
        Commands::Index { dir, indexing } => cmd_index(cli.config.as_deref(), dir, &indexing),
        Commands::Merge {
            first,
            second,
            output,
            force,
            dry_run,
            check_versions,
            batch_size,
        } => cmd_merge(
            StoreMerger::new(
                first,
                second,
                output,
                MergeOptions {
                    batch_size: batch_size as usize,
                    force,
                    dry_run,
                },
            ),
            check_versions,
        ),
        Commands::Config { action } => cmd_config(cli.config.as_deref(), action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "pixseek=debug" } else { "pixseek=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct SearchArgs {
    positive: Vec<String>,
    negative: Vec<String>,
    top: Option<u64>,
    filepath_only: bool,
    no_indexing: bool,
    dir: Option<PathBuf>,
}

fn cmd_search(config_path: Option<&Path>, args: SearchArgs, indexing: &IndexingArgs) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let root = resolve_root(args.dir)?;
    let store = open_store(&config, indexing)?;
    let model = ClipModel::new(&config.embedding.model, config.model_cache_dir())?;
    let options = index_options(&config, indexing);

    if args.no_indexing {
        if !store.has_any_records()? {
            tracing::warn!(
                "The index is empty; run without --no-indexing (or `pixseek index`) to build it"
            );
        }
    } else {
        sweep(&store, &model, options.clone(), &root)?;
    }

    let engine = QueryEngine::new(
        &store,
        &model,
        Downloader::new(config.download_limits()?)?,
        options.exclude_dirs,
    )?;
    let query = SearchQuery {
        positive: args.positive,
        negative: args.negative,
        root,
        top_k: args.top.map(|t| t as usize).unwrap_or(config.search.top_k),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| PixseekError::io(e, "Failed to create tokio runtime"))?;
    let results = runtime.block_on(engine.search(&query))?;
    drop(engine);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for result in results {
        let line = if args.filepath_only {
            writeln!(out, "{}", result.filepath)
        } else {
            writeln!(out, "{:.2}\t{}", result.score, result.filepath)
        };
        line.map_err(|e| PixseekError::io(e, "Failed to write results"))?;
    }

    store.close()
}

fn cmd_index(config_path: Option<&Path>, dir: Option<PathBuf>, indexing: &IndexingArgs) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let root = resolve_root(dir)?;
    let store = open_store(&config, indexing)?;
    let model = ClipModel::new(&config.embedding.model, config.model_cache_dir())?;

    let report = sweep(&store, &model, index_options(&config, indexing), &root)?;
    let stats = store.stats()?;

    println!("Indexed {}", root.display());
    println!(
        "  {} scanned, {} unchanged, {} embedded, {} moved, {} copied, {} failed, {} removed",
        report.scanned,
        report.unchanged,
        report.embedded,
        report.moved,
        report.copied,
        report.failed,
        report.removed
    );
    println!(
        "  Index v{}: {} live, {} deleted",
        stats.version, stats.live, stats.deleted
    );

    store.close()
}

fn cmd_merge(merger: StoreMerger, check_versions: bool) -> Result<()> {
    if check_versions {
        for summary in merger.check_versions()? {
            println!(
                "{}: version {}, {} images, {}",
                summary.path.display(),
                summary.version,
                summary.rows,
                format_size(summary.size_bytes)
            );
        }
        return Ok(());
    }

    let report = merger.merge()?;
    println!("✓ Merged index version {}", report.version);
    println!("  First database:  {} images", report.first_rows);
    println!("  Second database: {} images", report.second_rows);
    println!("  Merged:          {} images", report.merged_rows);
    println!("  Conflicts resolved: {}", report.conflicts_resolved);
    println!("  Deleted preserved:  {}", report.deleted_preserved);
    Ok(())
}

fn cmd_config(config_path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = Config::load_or_default(config_path)?;
            let rendered = match section {
                Some(section) => config.section_toml(&section)?,
                None => toml::to_string_pretty(&config)?,
            };
            println!("{}", rendered);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or_else(|| config_path.map(Path::to_path_buf)) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path.to_path_buf(),
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn sweep(store: &Store, model: &ClipModel, options: IndexOptions, root: &Path) -> Result<IndexReport> {
    let bar = sweep_progress_bar(&root.display().to_string());
    let progress: Arc<dyn IndexProgress> = Arc::new(bar);
    Indexer::new(store, model, options).sweep(root, progress)
}

/// Canonical search or index root, defaulting to the working directory
fn resolve_root(dir: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|e| PixseekError::io(e, "Failed to read the current directory"))?,
    };
    let root = dir
        .canonicalize()
        .map_err(|e| PixseekError::io(e, format!("Cannot open directory {}", dir.display())))?;
    if !root.is_dir() {
        return Err(PixseekError::InvalidInput(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

fn open_store(config: &Config, indexing: &IndexingArgs) -> Result<Store> {
    let path = match &indexing.db_path {
        Some(path) => path.clone(),
        None => config.db_path(),
    };
    tracing::debug!("Opening index at {}", path.display());
    Store::open(&path)
}

/// Configured sweep options with command-line flags applied
fn index_options(config: &Config, indexing: &IndexingArgs) -> IndexOptions {
    let mut options = config.index_options();
    if let Some(batch_size) = indexing.indexing_batch_size {
        options.batch_size = batch_size as usize;
    }
    if !indexing.exclude_dir.is_empty() {
        options.exclude_dirs = ExcludeDirs::new(indexing.exclude_dir.iter().cloned());
    }
    if indexing.experimental_raw_support {
        options.raw_support = true;
    }
    options
}
