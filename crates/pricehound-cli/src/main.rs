use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pricehound_client::HttpLauncher;
use pricehound_core::models::NewRetailer;
use pricehound_core::traits::{BrowserLauncher, ProductStore};
use pricehound_core::{Engine, EngineConfig, EventBus, register_default_handlers};
use pricehound_db::{Database, DatabaseConfig, PgProductStore};

#[derive(Parser)]
#[command(name = "pricehound", version, about = "Retail price tracker")]
struct Cli {
    /// Page backend used to load retailer pages
    #[arg(long, value_enum, env = "PRICEHOUND_ENGINE", default_value_t = EngineKind::Http, global = true)]
    engine: EngineKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineKind {
    /// Plain HTTP download, no JavaScript
    Http,
    /// Headless Chromium (requires the `browser` feature)
    Chrome,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover and re-price all products now, then every schedule interval
    Run,

    /// Scrape a single product page and store the observed price
    Scrape {
        /// Product page URL
        #[arg(short, long)]
        url: String,

        /// Retailer the page belongs to
        #[arg(short, long)]
        retailer_id: i64,
    },

    /// Visit every retailer's listing page and register new product URLs
    Discover,

    /// Manage retailers
    Retailer {
        #[command(subcommand)]
        action: RetailerCommand,
    },

    /// Show the recorded prices of a product, newest first
    History {
        #[arg(short, long)]
        product_id: i64,

        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum RetailerCommand {
    /// Register a retailer
    Add {
        #[arg(long)]
        name: String,

        /// Site root that relative links resolve against
        #[arg(long)]
        base_url: String,

        #[arg(long)]
        name_selector: Option<String>,

        #[arg(long)]
        price_selector: Option<String>,

        #[arg(long)]
        image_selector: Option<String>,

        /// Listing page scanned by discovery
        #[arg(long)]
        discovery_url: Option<String>,

        /// Selector of product anchors on the listing page
        #[arg(long)]
        product_link_selector: Option<String>,

        /// Register without scheduling it
        #[arg(long, default_value_t = false)]
        inactive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pricehound=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let db = connect_db().await?;

    match cli.engine {
        EngineKind::Http => {
            let launcher = HttpLauncher::with_timeout(config.navigation_timeout)
                .context("Failed to create HTTP client")?;
            dispatch(cli.command, config, launcher, db).await
        }
        EngineKind::Chrome => dispatch_chrome(cli.command, config, db).await,
    }
}

#[cfg(feature = "browser")]
async fn dispatch_chrome(command: Commands, config: EngineConfig, db: Database) -> Result<()> {
    let launcher = pricehound_client::ChromeLauncher::with_timeout(config.navigation_timeout);
    dispatch(command, config, launcher, db).await
}

#[cfg(not(feature = "browser"))]
async fn dispatch_chrome(_command: Commands, _config: EngineConfig, _db: Database) -> Result<()> {
    anyhow::bail!("The chrome engine is not compiled in. Rebuild with `--features browser`.")
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("Database configuration")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to migrate database")?;
    Ok(db)
}

async fn dispatch<L: BrowserLauncher>(
    command: Commands,
    config: EngineConfig,
    launcher: L,
    db: Database,
) -> Result<()> {
    let bus = EventBus::with_history_capacity(config.event_history);
    register_default_handlers(&bus);
    let engine = Engine::build(config, launcher, db.store(), bus);

    match command {
        Commands::Run => cmd_run(&engine).await,
        Commands::Scrape { url, retailer_id } => cmd_scrape(&engine, &url, retailer_id).await,
        Commands::Discover => cmd_discover(&engine).await,
        Commands::Retailer {
            action:
                RetailerCommand::Add {
                    name,
                    base_url,
                    name_selector,
                    price_selector,
                    image_selector,
                    discovery_url,
                    product_link_selector,
                    inactive,
                },
        } => {
            let retailer = NewRetailer {
                name,
                base_url,
                active: !inactive,
                name_selector,
                price_selector,
                image_selector,
                discovery_url,
                product_link_selector,
            };
            cmd_add_retailer(&engine, &retailer).await
        }
        Commands::History { product_id, limit } => cmd_history(&db, product_id, limit).await,
    }
}

/// Cancellation token fired by Ctrl+C.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing in-flight scrapes");
            trigger.cancel();
        }
    });
    cancel
}

async fn cmd_run<L: BrowserLauncher>(engine: &Engine<L, PgProductStore>) -> Result<()> {
    engine.scheduler().run(shutdown_token()).await;
    Ok(())
}

async fn cmd_scrape<L: BrowserLauncher>(
    engine: &Engine<L, PgProductStore>,
    url: &str,
    retailer_id: i64,
) -> Result<()> {
    let product = engine
        .service
        .scrape_with_retry(url, retailer_id, &engine.config.retry, &shutdown_token())
        .await
        .with_context(|| format!("Scrape of {url} failed"))?;

    println!("{}", serde_json::to_string_pretty(&product)?);
    Ok(())
}

async fn cmd_discover<L: BrowserLauncher>(engine: &Engine<L, PgProductStore>) -> Result<()> {
    let reports = engine
        .cycle
        .discovery()
        .discover_all(&shutdown_token())
        .await
        .context("Discovery failed")?;

    if reports.is_empty() {
        println!("No active retailer has discovery configured");
        return Ok(());
    }

    for report in &reports {
        match &report.error {
            Some(error) => println!("  {} — FAILED: {error}", report.retailer_name),
            None => println!(
                "  {} — {} links, {} unique, {} new, {} refreshed, {} failed",
                report.retailer_name,
                report.links_found,
                report.unique_urls,
                report.created,
                report.refreshed,
                report.failed,
            ),
        }
    }

    let created: usize = reports.iter().map(|r| r.created).sum();
    println!("\nTotal: {created} new products across {} retailers", reports.len());
    Ok(())
}

async fn cmd_add_retailer<L: BrowserLauncher>(
    engine: &Engine<L, PgProductStore>,
    retailer: &NewRetailer,
) -> Result<()> {
    let created = engine
        .service
        .register_retailer(retailer)
        .await
        .context("Failed to register retailer")?;

    println!("{}", serde_json::to_string_pretty(&created)?);
    Ok(())
}

async fn cmd_history(db: &Database, product_id: i64, limit: usize) -> Result<()> {
    let store = db.store();
    let history = store
        .get_price_history(product_id, limit)
        .await
        .context("Failed to load price history")?;

    if history.is_empty() {
        println!("No prices recorded for product {product_id}");
        return Ok(());
    }

    println!("Price history for product {product_id}:\n");
    for (i, entry) in history.iter().enumerate() {
        let marker = match history.get(i + 1) {
            Some(older) if older.price != entry.price => "CHANGED",
            Some(_) => "unchanged",
            None => "first",
        };
        println!(
            "  [{marker}] {} — {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.price,
        );
    }

    println!("\nTotal: {} entries", history.len());
    Ok(())
}
