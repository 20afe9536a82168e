use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sweeprs::catalog::{Catalog, ImmichClient, LocalCatalog};
use sweeprs::config::{AppConfig, CatalogConfig};
use sweeprs::core::{Category, ClassificationRecord};
use sweeprs::database::{RecordQuery, ResultsStore, SessionStatus, SqliteStore};
use sweeprs::services::{AnalysisSession, ExportService, StatusSnapshot};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(
    name = "sweeprs",
    version,
    about = "Find screenshots, cache junk and recovery leftovers in a photo library"
)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify every asset in the catalog
    Analyze {
        /// Continue from the last checkpoint of an unfinished run
        #[arg(long)]
        resume: bool,
        #[arg(long, value_name = "N")]
        page_size: Option<usize>,
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
    },

    /// Show the state of the last analysis session
    Status,

    /// List classified assets
    Results {
        #[arg(short, long)]
        category: Option<Category>,
        #[arg(long, default_value_t = 40.0)]
        min_confidence: f64,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Summary of stored results
    Stats,

    /// Mark assets for deletion (nothing is deleted)
    Mark {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Clear the mark instead
        #[arg(long)]
        unmark: bool,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Drop stored results for assets that left the catalog
    Forget {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Write results to a CSV file
    Export {
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
        #[arg(short, long)]
        category: Option<Category>,
        #[arg(long)]
        min_confidence: Option<f64>,
    },

    /// Inspect or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the effective configuration
    Show,

    /// Read assets from an Immich server
    SetImmich {
        #[arg(long)]
        base_url: String,
        /// Prompted for when omitted
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Read assets from a local directory
    SetLocal {
        #[arg(long, value_name = "DIR")]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let mut config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    match cli.command {
        Commands::Analyze {
            resume,
            page_size,
            workers,
        } => analyze(&config, resume, page_size, workers).await?,

        Commands::Status => {
            let store = open_store(&config)?;
            match store.get_session_state()? {
                Some(state) => print_status(&StatusSnapshot::from_state(&state, None)),
                None => println!("No analysis has been run yet."),
            }
        }

        Commands::Results {
            category,
            min_confidence,
            limit,
        } => {
            let store = open_store(&config)?;
            let mut query = RecordQuery::all().min_confidence(min_confidence).limit(limit);
            query.category = category;
            let records = store.query(&query)?;
            if records.is_empty() {
                println!("No results at or above {:.0}%.", min_confidence);
            }
            for record in &records {
                print_record(record);
            }
        }

        Commands::Stats => {
            let store = open_store(&config)?;
            let stats = store.stats()?;
            println!("📊 {} classified assets", stats.total);
            for category in Category::ALL {
                println!(
                    "   {:<14} {:>6} candidates",
                    category.as_str(),
                    stats.candidates.get(&category).copied().unwrap_or(0)
                );
            }
            println!("   high confidence: {}", stats.high_confidence);
            println!(
                "   marked: {} ({:.1} MiB reclaimable)",
                stats.marked,
                stats.marked_bytes as f64 / (1024.0 * 1024.0)
            );
        }

        Commands::Mark { ids, unmark, yes } => {
            let store = open_store(&config)?;
            let marked = !unmark;
            if marked && !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Mark {} asset(s) for deletion?", ids.len()))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            let changed = store.set_marked(&ids, marked)?;
            if changed < ids.len() {
                eprintln!("⚠️  {} id(s) have no stored result", ids.len() - changed);
            }
            let verb = if marked { "Marked" } else { "Unmarked" };
            println!("{} {} asset(s). Nothing was deleted.", verb, changed);
        }

        Commands::Forget { ids } => {
            let store = open_store(&config)?;
            let removed = store.remove(&ids)?;
            println!("🧹 Removed {} stored result(s)", removed);
        }

        Commands::Export {
            out,
            category,
            min_confidence,
        } => {
            let store = open_store(&config)?;
            let query = RecordQuery {
                category,
                min_confidence,
                limit: None,
            };
            let written = ExportService::new()
                .export_to_path(&*store, &query, &out)
                .with_context(|| format!("Failed to export to {}", out.display()))?;
            println!("📄 Wrote {} record(s) to {}", written, out.display());
        }

        Commands::Config { command } => match command {
            ConfigCmd::Show => {
                println!("# {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            }
            ConfigCmd::SetImmich { base_url, api_key } => {
                let api_key = match api_key {
                    Some(key) => key,
                    None => Password::new().with_prompt("Immich API key").interact()?,
                };
                if api_key.trim().is_empty() {
                    bail!("API key must not be empty");
                }
                config.catalog = Some(CatalogConfig::Immich { base_url, api_key });
                config.save(&config_path)?;
                println!("Saved Immich catalog to {}", config_path.display());
            }
            ConfigCmd::SetLocal { root } => {
                if !root.is_dir() {
                    bail!("{} is not a directory", root.display());
                }
                config.catalog = Some(CatalogConfig::Local { root });
                config.save(&config_path)?;
                println!("Saved local catalog to {}", config_path.display());
            }
        },
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn open_store(config: &AppConfig) -> Result<Arc<SqliteStore>> {
    let path = config.store_path()?;
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open results store {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_catalog(config: &AppConfig) -> Result<Arc<dyn Catalog>> {
    match config.catalog()? {
        CatalogConfig::Immich { base_url, api_key } => {
            let client = ImmichClient::new(base_url, api_key)
                .with_context(|| format!("Failed to set up Immich client for {}", base_url))?;
            Ok(Arc::new(client))
        }
        CatalogConfig::Local { root } => Ok(Arc::new(LocalCatalog::new(root.clone()))),
    }
}

async fn analyze(
    config: &AppConfig,
    resume: bool,
    page_size: Option<usize>,
    workers: Option<usize>,
) -> Result<()> {
    let mut options = config.session_options();
    if let Some(page_size) = page_size {
        options.page_size = page_size.max(1);
    }
    if let Some(workers) = workers {
        options.workers = workers.max(1);
    }

    let catalog = build_catalog(config)?;
    let store = open_store(config)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = Arc::new(AnalysisSession::new(catalog, store, options).with_progress_sender(tx));

    session
        .start(resume)
        .await
        .context("Could not start analysis")?;

    let initial = session.status();
    let bar = ProgressBar::new(initial.total.unwrap_or(0));
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=>-"),
    );
    bar.set_position(initial.processed);
    bar.enable_steady_tick(Duration::from_millis(100));

    let canceller = Arc::clone(&session);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current asset");
            let _ = canceller.cancel();
        }
    });

    let progress_bar = bar.clone();
    let drain = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            progress_bar.set_position(snapshot.processed);
            let candidates: u64 = snapshot.categorized.values().sum();
            progress_bar.set_message(format!("{} | {} candidates", snapshot.status, candidates));
        }
    });

    let last = session.wait().await?;
    drain.abort();
    ctrl_c.abort();
    bar.finish_and_clear();

    print_status(&last);
    match last.status {
        SessionStatus::Failed => bail!(
            "Analysis failed at {}: {}",
            last.cursor,
            last.last_error.unwrap_or_default()
        ),
        SessionStatus::Cancelled => {
            println!("Run `sweeprs analyze --resume` to continue.");
        }
        _ => {}
    }
    Ok(())
}

fn print_status(snapshot: &StatusSnapshot) {
    let total = snapshot
        .total
        .map(|t| format!("/{}", t))
        .unwrap_or_default();
    println!("▶ Session {}", snapshot.status);
    println!("   processed: {}{}", snapshot.processed, total);
    println!("   with faults: {}", snapshot.errored);
    for category in Category::ALL {
        println!(
            "   {:<14} {}",
            category.as_str(),
            snapshot.categorized.get(&category).copied().unwrap_or(0)
        );
    }
    println!("   cursor: {}", snapshot.cursor);
    if let Some(started) = snapshot.started_at {
        println!("   started: {}", started.to_rfc3339());
    }
    if let Some(ended) = snapshot.ended_at {
        println!("   ended: {}", ended.to_rfc3339());
    }
    if let Some(error) = &snapshot.last_error {
        println!("   last error: {}", error);
    }
}

fn print_record(record: &ClassificationRecord) {
    let mark = if record.marked_for_deletion { "🗑️ " } else { "  " };
    println!(
        "{}{:>5.1}%  {:<14} {:<16} {}  {}",
        mark,
        record.confidence,
        record.primary_category.as_str(),
        record.recommendation().as_str(),
        record.asset_id,
        record.snapshot.path
    );
    for reason in record.justifications() {
        println!("        · {}", reason);
    }
}
