pub mod batch;
pub mod config;
pub mod cycle;
pub mod discovery;
pub mod error;
pub mod events;
pub mod extractor;
pub mod handlers;
pub mod models;
pub mod pool;
pub mod retry;
pub mod scrape;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use batch::{BatchConfig, BatchItemError, BatchOrchestrator, BatchResult};
pub use config::EngineConfig;
pub use cycle::{CycleReport, Engine, ScrapeCycle, Scheduler};
pub use discovery::{DiscoveryReport, DiscoveryService};
pub use error::AppError;
pub use events::{EventBus, EventPayload, EventType, ScrapeEvent};
pub use handlers::register_default_handlers;
pub use models::{
    NewRetailer, NewScrape, PlaceholderOutcome, PriceChange, PriceHistoryEntry, Product, Retailer,
    SavedScrape,
};
pub use pool::{BrowserPool, PoolConfig};
pub use retry::RetryPolicy;
pub use scrape::ScrapeService;
pub use traits::{BrowserLauncher, PageSession, ProductStore};
