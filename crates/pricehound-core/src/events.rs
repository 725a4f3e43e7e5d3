//! In-process event bus.
//!
//! Scrape outcomes are published as [`ScrapeEvent`]s; consumers (metrics,
//! logging, price-change detection, alerts) subscribe per [`EventType`].
//! Handlers run concurrently and are isolated from each other: an error or
//! panic in one is logged and never reaches the publisher or its siblings.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::PriceChange;

/// Default number of events kept for introspection.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Kind of event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ProductScraped,
    PriceChanged,
    RetailerCreated,
    ScrapingStarted,
    ScrapingCompleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ProductScraped => "product_scraped",
            EventType::PriceChanged => "price_changed",
            EventType::RetailerCreated => "retailer_created",
            EventType::ScrapingStarted => "scraping_started",
            EventType::ScrapingCompleted => "scraping_completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product_scraped" => Ok(EventType::ProductScraped),
            "price_changed" => Ok(EventType::PriceChanged),
            "retailer_created" => Ok(EventType::RetailerCreated),
            "scraping_started" => Ok(EventType::ScrapingStarted),
            "scraping_completed" => Ok(EventType::ScrapingCompleted),
            _ => Err(format!("Unknown event type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductScraped {
    pub product_id: i64,
    pub retailer_id: i64,
    pub name: String,
    pub price: Decimal,
    pub old_price: Option<Decimal>,
    pub is_new: bool,
    pub url: String,
    /// Some field fell back to its default value during extraction.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceChanged {
    pub product_id: i64,
    pub retailer_id: i64,
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    pub change: PriceChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetailerCreated {
    pub retailer_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapingStarted {
    pub run_id: Uuid,
    pub products_count: usize,
    pub batch_count: usize,
    pub batch_size: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapingCompleted {
    pub run_id: Uuid,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub batches_processed: usize,
    pub duration_seconds: f64,
    pub products_per_second: f64,
    pub cancelled: bool,
}

impl ScrapingCompleted {
    /// Share of attempted items that succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.successful + self.failed;
        if attempted == 0 {
            0.0
        } else {
            self.successful as f64 / attempted as f64 * 100.0
        }
    }
}

/// Typed event data. Serializes as `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    ProductScraped(ProductScraped),
    PriceChanged(PriceChanged),
    RetailerCreated(RetailerCreated),
    ScrapingStarted(ScrapingStarted),
    ScrapingCompleted(ScrapingCompleted),
}

/// An event as published on the bus.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeEvent {
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    /// Component that published the event.
    pub source: String,
}

impl ScrapeEvent {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> EventType {
        match &self.payload {
            EventPayload::ProductScraped(_) => EventType::ProductScraped,
            EventPayload::PriceChanged(_) => EventType::PriceChanged,
            EventPayload::RetailerCreated(_) => EventType::RetailerCreated,
            EventPayload::ScrapingStarted(_) => EventType::ScrapingStarted,
            EventPayload::ScrapingCompleted(_) => EventType::ScrapingCompleted,
        }
    }
}

/// A subscriber. Implementations must not assume any ordering relative to
/// other handlers of the same event.
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle<'a>(&'a self, event: &'a ScrapeEvent) -> BoxFuture<'a, Result<(), AppError>>;
}

/// Adapter turning an async closure into an [`EventHandler`].
struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(ScrapeEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(&'a self, event: &'a ScrapeEvent) -> BoxFuture<'a, Result<(), AppError>> {
        (self.f)(event.clone()).boxed()
    }
}

/// Identifies a subscription for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Registry = HashMap<EventType, Vec<(HandlerId, Arc<dyn EventHandler>)>>;

struct BusInner {
    handlers: Mutex<Registry>,
    history: Mutex<VecDeque<ScrapeEvent>>,
    capacity: usize,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to one bus instance.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Non-owning handle, for handlers that publish back into the bus.
#[derive(Clone)]
pub struct WeakEventBus {
    inner: Weak<BusInner>,
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY))),
                capacity,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn lock_handlers(&self) -> MutexGuard<'_, Registry> {
        self.inner.handlers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned event handler registry");
            poisoned.into_inner()
        })
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<ScrapeEvent>> {
        self.inner.history.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned event history");
            poisoned.into_inner()
        })
    }

    /// Register a handler for one event type.
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%event_type, handler = handler.name(), "Handler registered");
        self.lock_handlers()
            .entry(event_type)
            .or_default()
            .push((id, handler));
        id
    }

    /// Register an async closure as a handler.
    pub fn subscribe_fn<F, Fut>(
        &self,
        event_type: EventType,
        name: impl Into<String>,
        f: F,
    ) -> HandlerId
    where
        F: Fn(ScrapeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.subscribe(
            event_type,
            Arc::new(FnHandler {
                name: name.into(),
                f,
            }),
        )
    }

    /// Returns false if no such subscription exists.
    pub fn unsubscribe(&self, event_type: EventType, id: HandlerId) -> bool {
        let mut handlers = self.lock_handlers();
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        before != list.len()
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.lock_handlers().get(&event_type).map_or(0, Vec::len)
    }

    /// Record the event, then run every handler for its type to completion.
    pub async fn publish(&self, event: ScrapeEvent) {
        let event_type = event.kind();
        tracing::debug!(%event_type, source = %event.source, event_id = %event.id, "Publishing event");

        {
            let mut history = self.lock_history();
            history.push_back(event.clone());
            while history.len() > self.inner.capacity {
                history.pop_front();
            }
        }

        let handlers: Vec<Arc<dyn EventHandler>> = self
            .lock_handlers()
            .get(&event_type)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(%event_type, "No handlers registered");
            return;
        }

        let event = &event;
        join_all(handlers.iter().map(|handler| async move {
            let run = async { handler.handle(event).await };
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(
                    %event_type,
                    handler = handler.name(),
                    error = %e,
                    "Event handler failed"
                ),
                Err(_) => tracing::error!(
                    %event_type,
                    handler = handler.name(),
                    "Event handler panicked"
                ),
            }
        }))
        .await;
    }

    /// The most recent `limit` events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<ScrapeEvent> {
        let history = self.lock_history();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock_history().len()
    }
}
