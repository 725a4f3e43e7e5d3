//! Default subscribers for the event bus.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::{counter, gauge};
use rust_decimal::Decimal;

use crate::error::AppError;
use crate::events::{
    EventBus, EventHandler, EventPayload, EventType, PriceChanged, ScrapeEvent, WeakEventBus,
};
use crate::models::PriceChange;

/// Changes above this percentage count as significant.
pub const SIGNIFICANT_CHANGE_PERCENT: Decimal = Decimal::TEN;

/// Changes above this percentage raise an alert.
pub const ALERT_CHANGE_PERCENT: Decimal = Decimal::from_parts(20, 0, 0, false, 0);

/// Wire up the standard handlers. Call once at startup.
pub fn register_default_handlers(bus: &EventBus) {
    let detector: Arc<dyn EventHandler> = Arc::new(PriceChangeDetector::new(bus));
    bus.subscribe(EventType::ProductScraped, detector);

    let metrics: Arc<dyn EventHandler> = Arc::new(MetricsRecorder);
    for event_type in [
        EventType::ProductScraped,
        EventType::PriceChanged,
        EventType::RetailerCreated,
        EventType::ScrapingStarted,
        EventType::ScrapingCompleted,
    ] {
        bus.subscribe(event_type, metrics.clone());
    }

    bus.subscribe(EventType::PriceChanged, Arc::new(PriceAlertHandler::default()));
    bus.subscribe(EventType::RetailerCreated, Arc::new(RetailerLogger));

    tracing::debug!("Default event handlers registered");
}

// ---------------------------------------------------------------------------
// PriceChangeDetector
// ---------------------------------------------------------------------------

/// Turns a `ProductScraped` with a moved price into a `PriceChanged`.
pub struct PriceChangeDetector {
    bus: WeakEventBus,
}

impl PriceChangeDetector {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.downgrade(),
        }
    }
}

impl EventHandler for PriceChangeDetector {
    fn name(&self) -> &str {
        "price_change_detector"
    }

    fn handle<'a>(&'a self, event: &'a ScrapeEvent) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            let EventPayload::ProductScraped(scraped) = &event.payload else {
                return Ok(());
            };
            let Some(old_price) = scraped.old_price else {
                return Ok(());
            };
            let Some(change) = PriceChange::between(old_price, scraped.price) else {
                return Ok(());
            };
            let Some(bus) = self.bus.upgrade() else {
                return Ok(());
            };

            bus.publish(ScrapeEvent::new(
                self.name(),
                EventPayload::PriceChanged(PriceChanged {
                    product_id: scraped.product_id,
                    retailer_id: scraped.retailer_id,
                    name: scraped.name.clone(),
                    url: scraped.url.clone(),
                    change,
                }),
            ))
            .await;
            Ok(())
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// MetricsRecorder
// ---------------------------------------------------------------------------

/// Feeds counters and gauges through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    fn record(&self, event: &ScrapeEvent) {
        match &event.payload {
            EventPayload::ProductScraped(p) => {
                let retailer_id = p.retailer_id.to_string();
                counter!("products.scraped", "retailer_id" => retailer_id.clone()).increment(1);
                if p.is_new {
                    counter!("products.discovered", "retailer_id" => retailer_id.clone())
                        .increment(1);
                }
                if p.degraded {
                    counter!("extraction.degraded", "retailer_id" => retailer_id).increment(1);
                }
            }
            EventPayload::PriceChanged(c) => {
                counter!("price_changes.total").increment(1);
                if c.change.exceeds(SIGNIFICANT_CHANGE_PERCENT) {
                    counter!("price_changes.significant").increment(1);
                }
            }
            EventPayload::RetailerCreated(_) => {
                counter!("retailers.created").increment(1);
            }
            EventPayload::ScrapingStarted(s) => {
                counter!("scraping.started").increment(1);
                gauge!("scraping.last_products_queued").set(s.products_count as f64);
            }
            EventPayload::ScrapingCompleted(c) => {
                counter!("scraping.completed").increment(1);
                gauge!("scraping.last_duration_seconds").set(c.duration_seconds);
                gauge!("scraping.last_products_processed").set(c.total as f64);
                gauge!("scraping.last_success_rate").set(c.success_rate());
                gauge!("scraping.products_per_second").set(c.products_per_second);
            }
        }
    }
}

impl EventHandler for MetricsRecorder {
    fn name(&self) -> &str {
        "metrics_recorder"
    }

    fn handle<'a>(&'a self, event: &'a ScrapeEvent) -> BoxFuture<'a, Result<(), AppError>> {
        self.record(event);
        futures::future::ready(Ok(())).boxed()
    }
}

// ---------------------------------------------------------------------------
// PriceAlertHandler
// ---------------------------------------------------------------------------

/// Logs price movements: a warning above the significant threshold and an
/// alert above the alert threshold.
#[derive(Debug, Clone)]
pub struct PriceAlertHandler {
    pub significant_percent: Decimal,
    pub alert_percent: Decimal,
}

impl Default for PriceAlertHandler {
    fn default() -> Self {
        Self {
            significant_percent: SIGNIFICANT_CHANGE_PERCENT,
            alert_percent: ALERT_CHANGE_PERCENT,
        }
    }
}

impl EventHandler for PriceAlertHandler {
    fn name(&self) -> &str {
        "price_alert"
    }

    fn handle<'a>(&'a self, event: &'a ScrapeEvent) -> BoxFuture<'a, Result<(), AppError>> {
        if let EventPayload::PriceChanged(c) = &event.payload {
            let direction = if c.change.change_amount.is_sign_negative() {
                "dropped"
            } else {
                "rose"
            };
            let pct = c.change.change_percentage.round_dp(2);

            if c.change.exceeds(self.alert_percent) {
                tracing::warn!(
                    product_id = c.product_id,
                    name = %c.name,
                    old_price = %c.change.old_price,
                    new_price = %c.change.new_price,
                    change_percentage = %pct,
                    alert = true,
                    "PRICE ALERT: price {direction} sharply"
                );
            } else if c.change.exceeds(self.significant_percent) {
                tracing::warn!(
                    product_id = c.product_id,
                    name = %c.name,
                    old_price = %c.change.old_price,
                    new_price = %c.change.new_price,
                    change_percentage = %pct,
                    "Significant price change: price {direction}"
                );
            } else {
                tracing::info!(
                    product_id = c.product_id,
                    old_price = %c.change.old_price,
                    new_price = %c.change.new_price,
                    change_percentage = %pct,
                    "Price {direction}"
                );
            }
        }
        futures::future::ready(Ok(())).boxed()
    }
}

// ---------------------------------------------------------------------------
// RetailerLogger
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct RetailerLogger;

impl EventHandler for RetailerLogger {
    fn name(&self) -> &str {
        "retailer_logger"
    }

    fn handle<'a>(&'a self, event: &'a ScrapeEvent) -> BoxFuture<'a, Result<(), AppError>> {
        if let EventPayload::RetailerCreated(r) = &event.payload {
            tracing::info!(retailer_id = r.retailer_id, name = %r.name, "New retailer registered");
        }
        futures::future::ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::events::{ProductScraped, RetailerCreated, ScrapingCompleted};

    fn scraped(old_price: Option<i64>, price: i64) -> ScrapeEvent {
        ScrapeEvent::new(
            "test",
            EventPayload::ProductScraped(ProductScraped {
                product_id: 9,
                retailer_id: 1,
                name: "Kettle".into(),
                price: Decimal::from(price),
                old_price: old_price.map(Decimal::from),
                is_new: old_price.is_none(),
                url: "https://shop.test/p/kettle".into(),
                degraded: false,
            }),
        )
    }

    fn price_changes(bus: &EventBus) -> Vec<PriceChanged> {
        bus.history(100)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::PriceChanged(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn price_increase_publishes_one_change() {
        let bus = EventBus::new();
        register_default_handlers(&bus);

        bus.publish(scraped(Some(100), 120)).await;

        let changes = price_changes(&bus);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].product_id, 9);
        assert_eq!(changes[0].change.old_price, Decimal::from(100));
        assert_eq!(changes[0].change.new_price, Decimal::from(120));
        assert_eq!(changes[0].change.change_amount, Decimal::from(20));
        assert_eq!(changes[0].change.change_percentage, Decimal::from(20));
    }

    #[tokio::test]
    async fn unchanged_price_publishes_nothing() {
        let bus = EventBus::new();
        register_default_handlers(&bus);

        bus.publish(scraped(Some(100), 100)).await;

        assert!(price_changes(&bus).is_empty());
    }

    #[tokio::test]
    async fn new_product_publishes_nothing() {
        let bus = EventBus::new();
        register_default_handlers(&bus);

        bus.publish(scraped(None, 100)).await;

        assert!(price_changes(&bus).is_empty());
    }

    #[tokio::test]
    async fn drop_from_zero_placeholder_is_zero_percent() {
        let bus = EventBus::new();
        register_default_handlers(&bus);

        bus.publish(scraped(Some(0), 35)).await;

        let changes = price_changes(&bus);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change.change_percentage, Decimal::ZERO);
    }

    #[test]
    fn default_registration_covers_every_event_type() {
        let bus = EventBus::new();
        register_default_handlers(&bus);

        assert_eq!(bus.handler_count(EventType::ProductScraped), 2);
        assert_eq!(bus.handler_count(EventType::PriceChanged), 2);
        assert_eq!(bus.handler_count(EventType::RetailerCreated), 2);
        assert_eq!(bus.handler_count(EventType::ScrapingStarted), 1);
        assert_eq!(bus.handler_count(EventType::ScrapingCompleted), 1);
    }

    #[tokio::test]
    async fn handlers_accept_every_payload() {
        let bus = EventBus::new();
        register_default_handlers(&bus);

        bus.publish(ScrapeEvent::new(
            "test",
            EventPayload::RetailerCreated(RetailerCreated {
                retailer_id: 1,
                name: "Acme".into(),
            }),
        ))
        .await;
        bus.publish(ScrapeEvent::new(
            "test",
            EventPayload::ScrapingCompleted(ScrapingCompleted {
                run_id: Uuid::new_v4(),
                total: 0,
                successful: 0,
                failed: 0,
                skipped: 0,
                batches_processed: 0,
                duration_seconds: 0.0,
                products_per_second: 0.0,
                cancelled: false,
            }),
        ))
        .await;

        assert_eq!(bus.history_len(), 2);
    }

    #[test]
    fn alert_threshold_is_twenty_percent() {
        assert_eq!(ALERT_CHANGE_PERCENT, Decimal::from(20));
    }
}
