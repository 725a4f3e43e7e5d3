//! Chunked, concurrency-bounded scraping of a product list.

use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::events::{EventPayload, ScrapeEvent, ScrapingCompleted, ScrapingStarted};
use crate::models::Product;
use crate::retry::RetryPolicy;
use crate::scrape::ScrapeService;
use crate::traits::{BrowserLauncher, ProductStore};

const EVENT_SOURCE: &str = "batch_orchestrator";

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Pause between consecutive batches; not applied after the last one.
    pub delay_between_batches: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            delay_between_batches: Duration::from_secs(2),
        }
    }
}

/// One product that could not be scraped.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemError {
    pub product_id: i64,
    pub retailer_id: i64,
    pub url: String,
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Aggregate outcome of a run. `successful + failed + skipped == total`.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Correlation id shared by every log line and event of the run.
    pub run_id: Uuid,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Items never started because the run was cancelled.
    pub skipped: usize,
    pub batches_processed: usize,
    pub errors: Vec<BatchItemError>,
    pub duration: Duration,
    pub products_per_second: f64,
    pub cancelled: bool,
}

impl BatchResult {
    fn summary(&self) -> ScrapingCompleted {
        ScrapingCompleted {
            run_id: self.run_id,
            total: self.total,
            successful: self.successful,
            failed: self.failed,
            skipped: self.skipped,
            batches_processed: self.batches_processed,
            duration_seconds: self.duration.as_secs_f64(),
            products_per_second: self.products_per_second,
            cancelled: self.cancelled,
        }
    }
}

/// Runs products through a [`ScrapeService`] batch by batch.
///
/// Batches run strictly one after another. Inside a batch every product is
/// scraped concurrently, bounded by the browser pool, and individual
/// failures never affect siblings.
#[derive(Clone)]
pub struct BatchOrchestrator<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    service: ScrapeService<L, S>,
    config: BatchConfig,
    retry: RetryPolicy,
}

impl<L, S> BatchOrchestrator<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    pub fn new(service: ScrapeService<L, S>, config: BatchConfig, retry: RetryPolicy) -> Self {
        Self {
            service,
            config,
            retry,
        }
    }

    pub fn service(&self) -> &ScrapeService<L, S> {
        &self.service
    }

    pub async fn run(&self, products: &[Product], cancel: &CancellationToken) -> BatchResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let batch_count = products.len().div_ceil(batch_size);

        tracing::info!(
            %run_id,
            products = products.len(),
            batch_count,
            batch_size,
            max_concurrent = self.service.pool().capacity(),
            "Scraping run started"
        );
        self.service
            .bus()
            .publish(ScrapeEvent::new(
                EVENT_SOURCE,
                EventPayload::ScrapingStarted(ScrapingStarted {
                    run_id,
                    products_count: products.len(),
                    batch_count,
                    batch_size,
                    max_concurrent: self.service.pool().capacity(),
                }),
            ))
            .await;

        let mut result = BatchResult {
            run_id,
            total: products.len(),
            successful: 0,
            failed: 0,
            skipped: 0,
            batches_processed: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
            products_per_second: 0.0,
            cancelled: false,
        };

        for (index, batch) in products.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                result.skipped += products.len() - index * batch_size;
                tracing::warn!(%run_id, skipped = result.skipped, "Run cancelled, skipping remaining batches");
                break;
            }

            tracing::info!(%run_id, batch = index + 1, batch_count, size = batch.len(), "Processing batch");

            let outcomes = join_all(batch.iter().map(|product| {
                let span = tracing::info_span!(
                    "scrape",
                    %run_id,
                    product_id = product.id,
                    retailer_id = product.retailer_id
                );
                self.service
                    .scrape_with_retry(
                        &product.product_url,
                        product.retailer_id,
                        &self.retry,
                        cancel,
                    )
                    .instrument(span)
            }))
            .await;

            if cancel.is_cancelled() {
                result.cancelled = true;
            }
            for (product, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(_) => result.successful += 1,
                    Err(AppError::Cancelled) => {
                        result.cancelled = true;
                        result.skipped += 1;
                    }
                    Err(e) => {
                        result.failed += 1;
                        result.errors.push(BatchItemError {
                            product_id: product.id,
                            retailer_id: product.retailer_id,
                            url: product.product_url.clone(),
                            kind: e.kind(),
                            message: e.to_string(),
                            retryable: e.is_retryable(),
                        });
                    }
                }
            }
            result.batches_processed += 1;

            if index + 1 < batch_count && !self.config.delay_between_batches.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(self.config.delay_between_batches) => {}
                    () = cancel.cancelled() => {}
                }
            }
        }

        result.duration = started.elapsed();
        let processed = result.successful + result.failed;
        let secs = result.duration.as_secs_f64();
        result.products_per_second = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };

        tracing::info!(
            %run_id,
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            skipped = result.skipped,
            batches = result.batches_processed,
            duration_secs = secs,
            products_per_second = result.products_per_second,
            cancelled = result.cancelled,
            "Scraping run completed"
        );

        self.service
            .bus()
            .publish(ScrapeEvent::new(
                EVENT_SOURCE,
                EventPayload::ScrapingCompleted(result.summary()),
            ))
            .await;

        result
    }
}
