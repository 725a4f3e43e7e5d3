use std::fmt;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::AppError;
use crate::events::{EventBus, EventPayload, ProductScraped, RetailerCreated, ScrapeEvent};
use crate::extractor::extract_fields;
use crate::models::{ExtractedProduct, NewRetailer, NewScrape, Product, Retailer, ScrapingProfile};
use crate::pool::BrowserPool;
use crate::retry::RetryPolicy;
use crate::traits::{BrowserLauncher, PageSession, ProductStore};

const EVENT_SOURCE: &str = "scrape_service";

/// Lifecycle of a single scrape attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Pending,
    Navigating,
    Extracting,
    Persisting,
    Succeeded,
    Failed,
}

impl ScrapeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeState::Pending => "pending",
            ScrapeState::Navigating => "navigating",
            ScrapeState::Extracting => "extracting",
            ScrapeState::Persisting => "persisting",
            ScrapeState::Succeeded => "succeeded",
            ScrapeState::Failed => "failed",
        }
    }
}

impl fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn transition(url: &str, state: &mut ScrapeState, next: ScrapeState) {
    tracing::debug!(%url, from = %state, to = %next, "Scrape state");
    *state = next;
}

/// Orchestrates one scrape: look up retailer → validate → launch → navigate
/// → extract → persist → publish.
///
/// Generic over the browser and the store so it can run against real
/// Chromium and Postgres or against in-memory mocks.
#[derive(Clone)]
pub struct ScrapeService<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    pool: BrowserPool<L>,
    store: S,
    bus: EventBus,
}

impl<L, S> ScrapeService<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    pub fn new(pool: BrowserPool<L>, store: S, bus: EventBus) -> Self {
        Self { pool, store, bus }
    }

    pub fn pool(&self) -> &BrowserPool<L> {
        &self.pool
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Scrape one product page and persist the observation.
    ///
    /// Fails with `RetailerNotFound` or `ValidationError` before any browser
    /// is launched. The browser is closed on every path once launched.
    pub async fn scrape(&self, url: &str, retailer_id: i64) -> Result<Product, AppError> {
        let mut state = ScrapeState::Pending;
        match self.run_scrape(url, retailer_id, &mut state).await {
            Ok(product) => {
                transition(url, &mut state, ScrapeState::Succeeded);
                Ok(product)
            }
            Err(e) => {
                tracing::warn!(
                    %url,
                    retailer_id,
                    failed_in = %state,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Scrape failed"
                );
                transition(url, &mut state, ScrapeState::Failed);
                Err(e)
            }
        }
    }

    /// [`Self::scrape`] wrapped in `policy`; each retry re-runs the full
    /// scrape with a fresh browser.
    pub async fn scrape_with_retry(
        &self,
        url: &str,
        retailer_id: i64,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Product, AppError> {
        policy
            .run_until_cancelled(url, cancel, || self.scrape(url, retailer_id))
            .await
    }

    async fn run_scrape(
        &self,
        url: &str,
        retailer_id: i64,
        state: &mut ScrapeState,
    ) -> Result<Product, AppError> {
        let retailer = self
            .store
            .get_retailer(retailer_id)
            .await?
            .ok_or(AppError::RetailerNotFound(retailer_id))?;
        let profile = ScrapingProfile::try_from(&retailer)?;

        let mut lease = self.pool.acquire().await?;
        let visited = visit(lease.page(), url, &profile, state).await;
        lease.release().await;
        let extracted = visited?;

        transition(url, state, ScrapeState::Persisting);
        let saved = self
            .store
            .save_scrape(&NewScrape {
                product_url: url.to_string(),
                retailer_id,
                name: extracted.name,
                price: extracted.price,
                image_url: extracted.image_url,
            })
            .await?;

        tracing::info!(
            %url,
            product_id = saved.product.id,
            price = %saved.product.price,
            is_new = saved.is_new,
            degraded = extracted.quality.is_degraded(),
            "Product scraped"
        );

        self.bus
            .publish(ScrapeEvent::new(
                EVENT_SOURCE,
                EventPayload::ProductScraped(ProductScraped {
                    product_id: saved.product.id,
                    retailer_id,
                    name: saved.product.name.clone(),
                    price: saved.product.price,
                    old_price: saved.old_price,
                    is_new: saved.is_new,
                    url: url.to_string(),
                    degraded: extracted.quality.is_degraded(),
                }),
            ))
            .await;

        Ok(saved.product)
    }

    /// Register a retailer and announce it on the bus.
    pub async fn register_retailer(&self, retailer: &NewRetailer) -> Result<Retailer, AppError> {
        if retailer.name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Retailer name must not be empty".into(),
            ));
        }
        Url::parse(&retailer.base_url).map_err(|e| {
            AppError::ValidationError(format!("Invalid base URL '{}': {e}", retailer.base_url))
        })?;

        let created = self.store.create_retailer(retailer).await?;
        self.bus
            .publish(ScrapeEvent::new(
                EVENT_SOURCE,
                EventPayload::RetailerCreated(RetailerCreated {
                    retailer_id: created.id,
                    name: created.name.clone(),
                }),
            ))
            .await;
        Ok(created)
    }
}

async fn visit<P: PageSession>(
    page: &mut P,
    url: &str,
    profile: &ScrapingProfile,
    state: &mut ScrapeState,
) -> Result<ExtractedProduct, AppError> {
    transition(url, state, ScrapeState::Navigating);
    page.goto(url).await?;
    transition(url, state, ScrapeState::Extracting);
    extract_fields(page, profile).await
}
