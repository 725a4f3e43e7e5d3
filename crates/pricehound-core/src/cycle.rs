//! Periodic discovery + scrape runs.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchOrchestrator, BatchResult};
use crate::config::EngineConfig;
use crate::discovery::{DiscoveryReport, DiscoveryService};
use crate::error::AppError;
use crate::events::EventBus;
use crate::pool::BrowserPool;
use crate::scrape::ScrapeService;
use crate::traits::{BrowserLauncher, ProductStore};

/// Everything one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub discovery: Vec<DiscoveryReport>,
    pub batch: BatchResult,
}

/// One full pass: discover new products, then re-scrape every product of
/// every active retailer.
#[derive(Clone)]
pub struct ScrapeCycle<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    discovery: DiscoveryService<L, S>,
    orchestrator: BatchOrchestrator<L, S>,
}

impl<L, S> ScrapeCycle<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    pub fn new(discovery: DiscoveryService<L, S>, orchestrator: BatchOrchestrator<L, S>) -> Self {
        Self {
            discovery,
            orchestrator,
        }
    }

    pub fn discovery(&self) -> &DiscoveryService<L, S> {
        &self.discovery
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleReport, AppError> {
        let discovery = match self.discovery.discover_all(cancel).await {
            Ok(reports) => reports,
            Err(e) => {
                tracing::error!(error = %e, "Discovery phase failed, scraping known products only");
                Vec::new()
            }
        };

        let products = self
            .orchestrator
            .service()
            .store()
            .get_products_from_active_retailers()
            .await?;
        let batch = self.orchestrator.run(&products, cancel).await;

        Ok(CycleReport { discovery, batch })
    }
}

/// Runs a [`ScrapeCycle`] at startup and then on a fixed interval.
pub struct Scheduler<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    cycle: ScrapeCycle<L, S>,
    interval: Duration,
}

impl<L, S> Scheduler<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    pub fn new(cycle: ScrapeCycle<L, S>, interval: Duration) -> Self {
        Self { cycle, interval }
    }

    /// Loop until `cancel` fires. Ticks missed while a cycle is still
    /// running are skipped, so cycles never overlap.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel.cancelled() => break,
            }

            match self.cycle.run_once(&cancel).await {
                Ok(report) => tracing::info!(
                    run_id = %report.batch.run_id,
                    discovered = report.discovery.iter().map(|r| r.created).sum::<usize>(),
                    successful = report.batch.successful,
                    failed = report.batch.failed,
                    "Scrape cycle finished"
                ),
                Err(e) => tracing::error!(error = %e, "Scrape cycle failed"),
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

/// The scrape engine wired together from one launcher, store and bus.
#[derive(Clone)]
pub struct Engine<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    pub service: ScrapeService<L, S>,
    pub cycle: ScrapeCycle<L, S>,
    pub config: EngineConfig,
}

impl<L, S> Engine<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    /// All components share a single browser pool.
    pub fn build(config: EngineConfig, launcher: L, store: S, bus: EventBus) -> Self {
        let pool = BrowserPool::new(launcher, &config.pool);
        let service = ScrapeService::new(pool.clone(), store.clone(), bus);
        let discovery = DiscoveryService::new(pool, store, config.retry.clone());
        let orchestrator =
            BatchOrchestrator::new(service.clone(), config.batch.clone(), config.retry.clone());

        Self {
            service,
            cycle: ScrapeCycle::new(discovery, orchestrator),
            config,
        }
    }

    pub fn scheduler(&self) -> Scheduler<L, S> {
        Scheduler::new(self.cycle.clone(), self.config.schedule_interval)
    }
}
