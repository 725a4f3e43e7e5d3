use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pricehound_core::models::{NewRetailer, PriceHistoryEntry, Product, Retailer};
use pricehound_core::{AppError, ScrapeEvent};

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    /// Product page URL
    pub product_url: String,
    /// Retailer the page belongs to
    pub retailer_id: i64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: i64,
    pub retailer_id: i64,
    pub product_url: String,
    pub name: String,
    #[schema(value_type = String, example = "249.99")]
    pub price: Decimal,
    pub image_url: Option<String>,
    pub last_scraped_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            retailer_id: p.retailer_id,
            product_url: p.product_url,
            name: p.name,
            price: p.price,
            image_url: p.image_url,
            last_scraped_at: p.last_scraped_at,
            last_seen_at: p.last_seen_at,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ProductQuery {
    /// Only products of this retailer
    pub retailer_id: Option<i64>,
    /// Products to return when no retailer is given (default 50, max 500)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProductListResponse {
    pub products: Vec<ProductResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Retailers
// ---------------------------------------------------------------------------

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRetailerRequest {
    pub name: String,
    pub base_url: String,
    /// Whether scheduled runs include this retailer (default true)
    #[serde(default = "default_active")]
    pub active: bool,
    pub name_selector: Option<String>,
    pub price_selector: Option<String>,
    pub image_selector: Option<String>,
    /// Listing page scanned for product links
    pub discovery_url: Option<String>,
    pub product_link_selector: Option<String>,
}

impl From<CreateRetailerRequest> for NewRetailer {
    fn from(r: CreateRetailerRequest) -> Self {
        Self {
            name: r.name,
            base_url: r.base_url,
            active: r.active,
            name_selector: r.name_selector,
            price_selector: r.price_selector,
            image_selector: r.image_selector,
            discovery_url: r.discovery_url,
            product_link_selector: r.product_link_selector,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetailerResponse {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub active: bool,
    pub name_selector: Option<String>,
    pub price_selector: Option<String>,
    pub image_selector: Option<String>,
    pub discovery_url: Option<String>,
    pub product_link_selector: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Retailer> for RetailerResponse {
    fn from(r: Retailer) -> Self {
        Self {
            id: r.id,
            name: r.name,
            base_url: r.base_url,
            active: r.active,
            name_selector: r.name_selector,
            price_selector: r.price_selector,
            image_selector: r.image_selector,
            discovery_url: r.discovery_url,
            product_link_selector: r.product_link_selector,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RetailerListResponse {
    pub retailers: Vec<RetailerResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct EventQuery {
    /// Most recent events to return (default 50, max 1000)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub id: Uuid,
    /// One of `product_scraped`, `price_changed`, `retailer_created`,
    /// `scraping_started`, `scraping_completed`
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl TryFrom<ScrapeEvent> for EventResponse {
    type Error = AppError;

    fn try_from(event: ScrapeEvent) -> Result<Self, Self::Error> {
        let mut payload = serde_json::to_value(&event.payload)?;
        let data = payload
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or_default();

        Ok(Self {
            id: event.id,
            event_type: event.kind().to_string(),
            source: event.source,
            timestamp: event.timestamp,
            data,
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct EventListResponse {
    /// Oldest first
    pub events: Vec<EventResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Price history
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct HistoryQuery {
    /// Entries to return (default 20, max 500)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceEntryResponse {
    pub id: i64,
    #[schema(value_type = String, example = "249.99")]
    pub price: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl From<PriceHistoryEntry> for PriceEntryResponse {
    fn from(e: PriceHistoryEntry) -> Self {
        Self {
            id: e.id,
            price: e.price,
            recorded_at: e.recorded_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistoryResponse {
    pub product_id: i64,
    /// Newest first
    pub entries: Vec<PriceEntryResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
