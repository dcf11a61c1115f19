use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use listing_scout::config::AppConfig;
use listing_scout::extract::ExtractionEngine;
use listing_scout::models::{write_rows, RawPage};
use listing_scout::pipeline::{CrawlRunner, Normalizer, RunOutput};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "listing-scout")]
#[command(about = "Crawl real-estate sites into one normalized, deduplicated dataset")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "scout.toml", env = "LISTING_SCOUT_CONFIG")]
    config: PathBuf,

    /// Verbosity level (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl all enabled sites and write the results
    Run {
        /// Only crawl these site keys
        #[arg(short, long = "site")]
        sites: Vec<String>,

        /// Sites crawled at the same time
        #[arg(long)]
        concurrency: Option<usize>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip coordinate lookups
        #[arg(long)]
        no_geocode: bool,

        /// Stop issuing fetches after this many seconds
        #[arg(long)]
        budget: Option<u64>,
    },

    /// Validate the configuration without fetching anything
    Check,

    /// Extract and normalize listings from a saved HTML file
    Extract {
        /// Site whose selectors and currency to use
        #[arg(short, long)]
        site: String,

        /// Saved HTML page
        file: PathBuf,

        /// URL the page was saved from; relative links resolve against it
        #[arg(long)]
        url: Option<String>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("warn,listing_scout={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = AppConfig::load(&cli.config).with_context(|| format!("Invalid config {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            sites,
            concurrency,
            output,
            no_geocode,
            budget,
        } => {
            config.restrict_to(&sites)?;
            if let Some(concurrency) = concurrency {
                config.run.concurrency = concurrency;
            }
            if let Some(output) = output {
                config.run.output_dir = output;
            }
            if no_geocode {
                config.geocode.enabled = false;
            }
            if budget.is_some() {
                config.run.time_budget_secs = budget;
            }
            run(config).await
        }
        Commands::Check => check(&config),
        Commands::Extract { site, file, url } => extract(&config, &site, &file, url).await,
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!("🏠 Listing Scout");
    info!("==========================================");

    let output_dir = config.run.output_dir.clone();
    let runner = CrawlRunner::from_config(config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupted, finishing in-flight fetches");
            on_signal.cancel();
        }
    });

    let output = runner.run(cancel).await?;
    write_outputs(&output, &output_dir).await?;

    println!();
    for site in &output.manifest.sites {
        let stop = site
            .stop_reason
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:>3} pages  {:>4} listings  {:>3} rejected  {:>3} duplicates  {:>2} errors  ({})",
            site.site,
            site.pages_fetched,
            site.listings_extracted,
            site.listings_rejected,
            site.duplicates_found,
            site.errors.total(),
            stop
        );
    }
    println!();
    Ok(())
}

async fn write_outputs(output: &RunOutput, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    write_json(&dir.join("listings.json"), &output.listings).await?;
    write_json(&dir.join("documents.json"), &output.documents).await?;
    write_json(&dir.join("manifest.json"), &output.manifest).await?;

    let mut tsv = Vec::new();
    write_rows(&mut tsv, &output.listings, '\t')?;
    tokio::fs::write(dir.join("listings.tsv"), tsv).await?;
    info!("💾 Saved {} listings to {}", output.listings.len(), dir.display());

    // One file per document, like a document store would hold them.
    let documents_dir = dir.join("documents");
    tokio::fs::create_dir_all(&documents_dir).await?;
    for document in &output.documents {
        write_json(&documents_dir.join(format!("{}.json", file_stem(&document.id))), document).await?;
    }
    info!(
        "💾 Saved {} individual documents to {}",
        output.documents.len(),
        documents_dir.display()
    );
    Ok(())
}

async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn check(config: &AppConfig) -> Result<()> {
    let order: Vec<String> = config.fetch.order.iter().map(ToString::to_string).collect();
    println!("Configuration OK");
    println!("Default fetch order: {}", order.join(" -> "));
    println!("Concurrency: {}", config.run.effective_concurrency());
    println!();
    for site in config.enabled_sites() {
        println!(
            "{:<20} {:?}  cap {:>3}  {}",
            site.key,
            site.parser,
            site.page_cap,
            site.base_urls.join(", ")
        );
    }
    Ok(())
}

async fn extract(config: &AppConfig, key: &str, file: &Path, url: Option<String>) -> Result<()> {
    let Some(site) = config.site(key) else {
        bail!("Unknown site {key}");
    };
    let html = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let Some(url) = url.or_else(|| site.base_urls.first().cloned()) else {
        bail!("Site {key} has no base URL; pass --url");
    };

    let page = RawPage::from_html(&site.key, &url, html);
    let extraction = ExtractionEngine::new().extract(&page, site);
    if let Some(reason) = &extraction.skipped {
        warn!("Page skipped: {:?}", reason);
    }

    let normalizer = Normalizer::from_config(config);
    let listings: Vec<_> = extraction
        .listings
        .iter()
        .filter_map(|raw| normalizer.normalize(raw, &site.currency).ok())
        .map(|normalized| normalized.listing)
        .collect();
    info!(
        "{} card(s), {} dropped, {} listing(s) kept",
        extraction.cards_found,
        extraction.cards_dropped,
        listings.len()
    );

    println!("{}", serde_json::to_string_pretty(&listings)?);
    Ok(())
}
