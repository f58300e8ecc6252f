use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use histmine_core::{LogFormat, LoggingConfig, MinerConfig, OutputFormat, StabilityMode};
use histmine_pulse::cache::{AnalysisCache, MemoryCache};
use histmine_pulse::developers::{summarize, DeveloperSummary};
use histmine_pulse::git::GitGateway;
use histmine_pulse::orchestrator::{Miner, MiningReport, TaskId};
use histmine_pulse::rollup::{build_tree, OwnershipTree};
use histmine_store::SqliteCache;

#[derive(Parser)]
#[command(
    name = "histmine",
    version,
    about = "Mine change metrics, commit stability and line ownership from git history",
    long_about = "histmine walks the history of a git repository and records, per commit,\n\
                   what changed and how much of it survived the following weeks. It also\n\
                   blames every file at HEAD and rolls line ownership up the directory tree.\n\n\
                   Results are cached, so reruns only analyze new commits and changed files.\n\n\
                   Examples:\n  \
                     histmine mine --path . --db .histmine/cache.db   Mine and cache results\n  \
                     histmine mine --sketch --format json             Estimate stability with sketches\n  \
                     histmine ownership --package src                 Show who owns src/\n  \
                     histmine init                                    Write a default .histmine.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .histmine.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Mine commit metrics, stability and ownership
    #[command(long_about = "Mine commit metrics, stability and ownership.\n\n\
        Every commit reachable from the reference is diffed against its first parent.\n\
        Every file at the reference is blamed. Commits and unchanged files already in\n\
        the cache are skipped. Exits with status 2 when any task failed.\n\n\
        Examples:\n  histmine mine --path .\n  histmine mine --db .histmine/cache.db --workers 4\n  histmine mine --sketch --format json")]
    Mine {
        /// Repository path (default: from config, else current directory)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Reference to mine (default: HEAD)
        #[arg(long)]
        reference: Option<String>,

        /// Project name used as the cache key and the root package name
        #[arg(long)]
        project: Option<String>,

        /// SQLite cache file (default: from config, else in-memory)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Worker threads (default: available parallelism)
        #[arg(long)]
        workers: Option<usize>,

        /// Estimate stability with theta sketches instead of exact intervals
        #[arg(long)]
        sketch: bool,
    },
    /// Show cached ownership of a directory and its direct children
    #[command(long_about = "Show cached ownership of a directory and its direct children.\n\n\
        Reads the blame results of a previous `histmine mine --db` run. No blame is computed.\n\n\
        Examples:\n  histmine ownership --db .histmine/cache.db\n  histmine ownership --package src/net")]
    Ownership {
        /// Repository path, used to derive the project name
        #[arg(long)]
        path: Option<PathBuf>,

        /// Directory relative to the repository root (default: project root)
        #[arg(long, default_value = "")]
        package: String,

        /// Project name (default: from config, else the repository directory name)
        #[arg(long)]
        project: Option<String>,

        /// SQLite cache file (default: from config, else .histmine/cache.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Create a default .histmine.toml configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# histmine configuration

[repository]
# path = "."
# reference = "HEAD"
# project = "my-project"

[mining]
# max_files_per_commit = 5000
# stability_window_months = 1
# stability_mode = "exact"   # or "sketch"
# sketch_size = 4096
# workers = 8
# exclude = ["**/.DS_Store"]

[cache]
# path = ".histmine/cache.db"

[logging]
# level = "info"
# format = "compact"         # or "pretty"
"#;

const DEFAULT_DB: &str = ".histmine/cache.db";

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("failed to install log subscriber: {e}");
    }
}

fn load_config(path: Option<&Path>) -> Result<MinerConfig> {
    match path {
        Some(path) => MinerConfig::from_file(path).into_diagnostic(),
        None => {
            let default_path = Path::new(".histmine.toml");
            if default_path.exists() {
                MinerConfig::from_file(default_path).into_diagnostic()
            } else {
                Ok(MinerConfig::default())
            }
        }
    }
}

fn spinner(message: &str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    let style = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} [{pos} tasks] ({elapsed})")
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn print_mining_text(report: &MiningReport, developers: &[DeveloperSummary]) {
    let summary = &report.summary;
    println!("Project: {}", report.ownership.project);
    println!(
        "Commits: {} total, {} mined, {} cached, {} oversized",
        summary.commits_total,
        summary.commits_processed,
        summary.commits_cached,
        summary.commits_oversized
    );
    println!(
        "Files:   {} total, {} blamed, {} reused, {} skipped",
        summary.files_total,
        summary.files_blamed,
        summary.files_reused,
        summary.skipped.len()
    );

    let scored: Vec<f64> = report.metrics.iter().filter_map(|m| m.stability).collect();
    if !scored.is_empty() {
        let mean = scored.iter().sum::<f64>() / scored.len() as f64;
        println!(
            "Stability: mean {:.2} over {} commits ({} undefined)",
            mean,
            scored.len(),
            report.metrics.len() - scored.len()
        );
    }

    if let Some(root) = report.ownership.root() {
        println!("\nLines: {} ({} bytes)", root.line_count, root.byte_size);
    }
    if !developers.is_empty() {
        println!("\nTop authors:");
        for dev in developers.iter().take(10) {
            println!(
                "  {:<32} {:>8} lines owned  {:>5} commits  {:>8} changes",
                dev.email, dev.lines_owned, dev.commits, dev.changes
            );
        }
    }

    if !summary.failures.is_empty() {
        println!("\nFailures:");
        for (kind, count) in summary.failure_counts() {
            println!("  {kind}: {count}");
        }
        for failure in &summary.failures {
            println!("  {}: {}", failure.task, failure.message);
        }
    }
}

fn print_ownership_text(tree: &OwnershipTree, package: &str) -> Result<()> {
    let Some(pkg) = tree.package(package) else {
        miette::bail!(miette::miette!(
            help = "Run `histmine mine --db <FILE>` first, or check the --package path",
            "No cached ownership for package {:?}",
            package
        ));
    };

    let label = if pkg.path.is_empty() { pkg.name.as_str() } else { pkg.path.as_str() };
    println!("{label}: {} lines, {} bytes, {} files", pkg.line_count, pkg.byte_size, pkg.files.len());
    let mut authors: Vec<_> = pkg.per_author.values().collect();
    authors.sort_by(|a, b| b.line_count.cmp(&a.line_count).then_with(|| a.author.cmp(&b.author)));
    for author in authors {
        let share = author.line_count as f64 / pkg.line_count.max(1) as f64 * 100.0;
        println!("  {:<32} {:>8} lines  {:>5.1}%", author.author, author.line_count, share);
    }

    let (packages, files) = tree.children(package);
    if !packages.is_empty() || !files.is_empty() {
        println!("\nChildren:");
    }
    for child in packages {
        let owner = child.owner().map(|o| o.author.as_str()).unwrap_or("-");
        println!("  {:<40} {:>8} lines  owner {owner}", format!("{}/", child.name), child.line_count);
    }
    for file in files {
        let owner = file.owner().map(|o| o.author.as_str()).unwrap_or("-");
        let name = file.path.rsplit('/').next().unwrap_or(&file.path);
        println!("  {:<40} {:>8} lines  owner {owner}", name, file.line_count);
    }
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Command::Mine {
            path,
            reference,
            project,
            db,
            workers,
            sketch,
        } => {
            if let Some(path) = path {
                config.repository.path = path;
            }
            if let Some(reference) = reference {
                config.repository.reference = reference;
            }
            if project.is_some() {
                config.repository.project = project;
            }
            if workers.is_some() {
                config.mining.workers = workers;
            }
            if sketch {
                config.mining.stability_mode = StabilityMode::Sketch;
            }

            let repo_path = config.repository.path.clone();
            let project_name = config.repository.project_name();
            let cache: Arc<dyn AnalysisCache> = match db.or_else(|| config.cache.path.clone()) {
                Some(db) => Arc::new(SqliteCache::open(&db, project_name.clone()).into_diagnostic()?),
                None => Arc::new(MemoryCache::new(project_name.clone())),
            };
            let gateway = match GitGateway::open(config.repository.clone()) {
                Ok(gateway) => Arc::new(gateway),
                Err(e) => miette::bail!(miette::miette!(
                    help = "Run histmine from inside a git repository, or specify --path to one",
                    "{e}"
                )),
            };
            let miner = Miner::new(config, gateway, Arc::clone(&cache)).into_diagnostic()?;

            tracing::info!(project = %project_name, path = %repo_path.display(), "mining started");
            let pb = spinner("Mining history...");
            let on_task = |task: &TaskId| {
                if let Some(pb) = &pb {
                    pb.inc(1);
                    pb.set_message(task.to_string());
                }
            };
            let report = miner.run_with_progress(&on_task).inspect_err(|_| {
                if let Some(pb) = &pb {
                    pb.finish_with_message("Failed");
                }
            });
            let report = report.into_diagnostic()?;
            if let Some(pb) = &pb {
                pb.finish_with_message("Done");
            }

            let history = cache.commit_metrics().into_diagnostic()?;
            let developers = summarize(&history, &report.ownership);

            match cli.format {
                OutputFormat::Json => {
                    let mut json = serde_json::Map::new();
                    json.insert("metrics".into(), serde_json::to_value(&report.metrics).into_diagnostic()?);
                    json.insert("ownership".into(), serde_json::to_value(&report.ownership).into_diagnostic()?);
                    json.insert("summary".into(), serde_json::to_value(&report.summary).into_diagnostic()?);
                    json.insert("developers".into(), serde_json::to_value(&developers).into_diagnostic()?);
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::Value::Object(json)).into_diagnostic()?
                    );
                }
                OutputFormat::Text => print_mining_text(&report, &developers),
            }

            if !report.summary.is_success() {
                tracing::warn!(failures = report.summary.failures.len(), "mining finished with failed tasks");
                std::process::exit(2);
            }
        }
        Command::Ownership {
            path,
            package,
            project,
            db,
        } => {
            if let Some(path) = path {
                config.repository.path = path;
            }
            if project.is_some() {
                config.repository.project = project;
            }
            let db = db
                .or_else(|| config.cache.path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));
            if !db.exists() {
                miette::bail!(miette::miette!(
                    help = "Run `histmine mine --db <FILE>` first to populate the cache",
                    "Cache not found: {}",
                    db.display()
                ));
            }

            let project_name = config.repository.project_name();
            let cache = SqliteCache::open(&db, project_name.clone()).into_diagnostic()?;
            let files = cache.latest_blames().into_diagnostic()?;
            let tree = build_tree(&project_name, files);
            let package = package.trim_matches('/').to_string();

            match cli.format {
                OutputFormat::Json => {
                    let Some(pkg) = tree.package(&package) else {
                        miette::bail!("No cached ownership for package {:?}", package);
                    };
                    let (packages, files) = tree.children(&package);
                    let json = serde_json::json!({
                        "package": pkg,
                        "packages": packages,
                        "files": files,
                    });
                    println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
                }
                OutputFormat::Text => print_ownership_text(&tree, &package)?,
            }
        }
        Command::Init => {
            let path = Path::new(".histmine.toml");
            if path.exists() {
                miette::bail!(".histmine.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .histmine.toml with default configuration");
        }
    }

    Ok(())
}
