//! stepcrawl main entry point
//!
//! Command-line front end that wires a link-following `fetch` step into the
//! orchestrator and crawls from the given seed URLs.

use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use stepcrawl::config::{load_config_with_hash, validate, Config};
use stepcrawl::crawler::{parse_page, HttpClient};
use stepcrawl::{Args, Chain, ConfigError, CrawlError, Orchestrator};
use tracing_subscriber::EnvFilter;
use url::Url;

/// stepcrawl: a rate-limited, step-based web crawler
///
/// Each seed URL is fetched by a `fetch` step. Links found on a page are
/// queued as further `fetch` steps until `--depth` is reached, and no two
/// steps start closer together than the configured interval.
#[derive(Parser, Debug)]
#[command(name = "stepcrawl")]
#[command(version)]
#[command(about = "A rate-limited, step-based web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(long, short = 'c', value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Seed URLs to crawl
    #[arg(value_name = "URL", required = true)]
    urls: Vec<Url>,

    /// How many links deep to follow from each seed
    #[arg(long, default_value_t = 0)]
    depth: u32,

    /// Only follow links on the seed's host
    #[arg(long)]
    same_host: bool,

    /// Override the configured number of scheduler workers
    #[arg(long)]
    workers: Option<usize>,

    /// Override the configured interval between steps (milliseconds)
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Crawl-wide settings and the set of URLs already queued
struct CrawlPlan {
    max_depth: u32,
    same_host: bool,
    seen: Mutex<HashSet<Url>>,
}

impl CrawlPlan {
    /// Records `url`, returning whether it was new
    fn claim(&self, url: &Url) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone())
    }
}

/// One page to fetch, bound per invocation
struct Target {
    url: Url,
    depth: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            match load_config_with_hash(path) {
                Ok((cfg, hash)) => {
                    tracing::info!("Configuration loaded successfully (hash: {})", hash);
                    cfg
                }
                Err(e) => {
                    tracing::error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => Config::default(),
    };

    if let Err(e) = apply_overrides(&mut config, cli.workers, cli.interval_ms) {
        tracing::error!("Invalid command-line override: {}", e);
        return Err(e.into());
    }

    if cli.dry_run {
        handle_dry_run(&cli, &config);
        return Ok(());
    }

    handle_crawl(&cli, &config).await?;
    Ok(())
}

/// Applies `--workers` / `--interval-ms` and re-validates the result
fn apply_overrides(
    config: &mut Config,
    workers: Option<usize>,
    interval_ms: Option<u64>,
) -> Result<(), ConfigError> {
    if let Some(workers) = workers {
        config.scheduler.workers = workers;
    }
    if let Some(interval_ms) = interval_ms {
        config.scheduler.interval_ms = interval_ms;
    }
    validate(config)
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("stepcrawl=info,warn"),
            1 => EnvFilter::new("stepcrawl=debug,info"),
            2 => EnvFilter::new("stepcrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective settings and seeds
fn handle_dry_run(cli: &Cli, config: &Config) {
    println!("=== stepcrawl Dry Run ===\n");

    println!("Scheduler:");
    println!("  Workers: {}", config.scheduler.workers);
    println!("  Interval: {}ms", config.scheduler.interval_ms);

    println!("\nRegistry:");
    println!("  Duplicate bindings: {:?}", config.registry.duplicate_bindings);

    println!("\nHTTP:");
    println!("  User agent: {}", config.http.user_agent);
    println!("  Timeout: {}s", config.http.timeout_secs);
    match &config.http.cache_dir {
        Some(dir) => println!("  Cache: {}", dir.display()),
        None => println!("  Cache: disabled"),
    }

    println!("\nSeeds ({}), depth {}:", cli.urls.len(), cli.depth);
    for url in &cli.urls {
        println!("  - {}", url);
    }
    if cli.same_host {
        println!("\nOnly links on each seed's host will be followed.");
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(cli: &Cli, config: &Config) -> Result<(), CrawlError> {
    let crawler = Orchestrator::from_config(config)?;

    crawler
        .bind(CrawlPlan {
            max_depth: cli.depth,
            same_host: cli.same_host,
            seen: Mutex::new(HashSet::new()),
        })
        .await?;

    crawler.register_step("fetch", fetch);

    let plan = crawler.resolve::<CrawlPlan>()?;
    for url in &cli.urls {
        if !plan.claim(url) {
            continue;
        }
        let target = Target {
            url: url.clone(),
            depth: 0,
        };
        crawler.next("fetch", Args::new().with(target)).await?;
    }

    tracing::info!(
        "Crawling {} seed(s), one step every {:?}",
        cli.urls.len(),
        Duration::from_millis(config.scheduler.interval_ms)
    );

    crawler.wait().await;

    let visited = plan.seen.lock().unwrap_or_else(PoisonError::into_inner).len();
    tracing::info!("Crawl complete: {} URL(s) queued in total", visited);
    Ok(())
}

/// Fetches one page and queues the links it has not seen yet
async fn fetch(
    http: Arc<HttpClient>,
    plan: Arc<CrawlPlan>,
    target: Arc<Target>,
    chain: Chain,
) -> Result<(), CrawlError> {
    let page = http.fetch(target.url.as_str()).await?;

    if !page.is_success() {
        tracing::warn!("{} returned HTTP {}", page.url, page.status);
        return Ok(());
    }

    let base = Url::parse(&page.url).unwrap_or_else(|_| target.url.clone());
    let parsed = parse_page(&page.body, &base);

    tracing::info!(
        "{} [{}]{} - {} link(s)",
        page.url,
        parsed.title.as_deref().unwrap_or("untitled"),
        if page.from_cache { " (cached)" } else { "" },
        parsed.links.len()
    );

    if target.depth >= plan.max_depth {
        return Ok(());
    }

    for link in parsed.links {
        if plan.same_host && link.host_str() != target.url.host_str() {
            continue;
        }
        if !plan.claim(&link) {
            continue;
        }
        let next = Target {
            url: link,
            depth: target.depth + 1,
        };
        chain.next("fetch", Args::new().with(next))?;
    }

    Ok(())
}
