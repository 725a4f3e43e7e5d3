use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Name stored when the name selector matches nothing visible.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Per-site configuration: where the retailer lives and how to read it.
///
/// Selector fields are nullable because retailers can be registered before
/// they are configured. Use [`ScrapingProfile::try_from`] and
/// [`DiscoveryProfile::from_retailer`] to get validated views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retailer {
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

/// DTO for registering a retailer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRetailer {
    pub name: String,
    pub base_url: String,
    pub active: bool,
    pub name_selector: Option<String>,
    pub price_selector: Option<String>,
    pub image_selector: Option<String>,
    pub discovery_url: Option<String>,
    pub product_link_selector: Option<String>,
}

/// Validated extraction selectors for one retailer.
///
/// Constructing one is the only place selector completeness is checked;
/// holding one means a scrape is allowed to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapingProfile {
    pub retailer_id: i64,
    pub base_url: Url,
    pub name_selector: String,
    pub price_selector: String,
    pub image_selector: Option<String>,
}

impl TryFrom<&Retailer> for ScrapingProfile {
    type Error = AppError;

    fn try_from(retailer: &Retailer) -> Result<Self, Self::Error> {
        let name_selector = non_blank(retailer.name_selector.as_deref());
        let price_selector = non_blank(retailer.price_selector.as_deref());

        let (Some(name_selector), Some(price_selector)) = (name_selector, price_selector) else {
            return Err(AppError::ValidationError(format!(
                "Retailer '{}' has no scraping selectors configured (name and price are required)",
                retailer.name
            )));
        };

        let base_url = parse_base_url(retailer)?;

        Ok(Self {
            retailer_id: retailer.id,
            base_url,
            name_selector: name_selector.to_string(),
            price_selector: price_selector.to_string(),
            image_selector: non_blank(retailer.image_selector.as_deref()).map(str::to_string),
        })
    }
}

/// Validated discovery configuration for one retailer.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryProfile {
    pub retailer_id: i64,
    pub retailer_name: String,
    pub base_url: Url,
    pub discovery_url: Url,
    pub link_selector: String,
}

impl DiscoveryProfile {
    /// Returns `Ok(None)` for retailers without discovery configured, and an
    /// error when the configuration is present but unusable.
    pub fn from_retailer(retailer: &Retailer) -> Result<Option<Self>, AppError> {
        let discovery_url = non_blank(retailer.discovery_url.as_deref());
        let link_selector = non_blank(retailer.product_link_selector.as_deref());

        let (Some(discovery_url), Some(link_selector)) = (discovery_url, link_selector) else {
            return Ok(None);
        };

        let base_url = parse_base_url(retailer)?;
        let discovery_url = base_url.join(discovery_url).map_err(|e| {
            AppError::ValidationError(format!(
                "Retailer '{}' has an invalid discovery URL '{discovery_url}': {e}",
                retailer.name
            ))
        })?;

        Ok(Some(Self {
            retailer_id: retailer.id,
            retailer_name: retailer.name.clone(),
            base_url,
            discovery_url,
            link_selector: link_selector.to_string(),
        }))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_base_url(retailer: &Retailer) -> Result<Url, AppError> {
    Url::parse(&retailer.base_url).map_err(|e| {
        AppError::ValidationError(format!(
            "Retailer '{}' has an invalid base URL '{}': {e}",
            retailer.name, retailer.base_url
        ))
    })
}

/// A tracked product, unique per (product URL, retailer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub retailer_id: i64,
    pub product_url: String,
    pub name: String,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub last_scraped_at: DateTime<Utc>,
    /// Last time discovery saw this URL on a listing page.
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One observed price. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub id: i64,
    pub product_id: i64,
    pub retailer_id: i64,
    pub price: Decimal,
    pub recorded_at: DateTime<Utc>,
}

/// Which fields fell back to their defaults during extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionQuality {
    pub name_missing: bool,
    /// The price selector matched nothing visible, or its text had no number.
    pub price_fallback: bool,
}

impl ExtractionQuality {
    pub fn is_degraded(&self) -> bool {
        self.name_missing || self.price_fallback
    }
}

/// Field values read from a product page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedProduct {
    pub name: String,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub quality: ExtractionQuality,
}

/// Input to [`crate::traits::ProductStore::save_scrape`].
#[derive(Debug, Clone)]
pub struct NewScrape {
    pub product_url: String,
    pub retailer_id: i64,
    pub name: String,
    pub price: Decimal,
    pub image_url: Option<String>,
}

/// Result of the atomic persist step of a scrape.
#[derive(Debug, Clone)]
pub struct SavedScrape {
    pub product: Product,
    pub history: PriceHistoryEntry,
    /// Price before this scrape; `None` when the product did not exist.
    pub old_price: Option<Decimal>,
    pub is_new: bool,
}

/// What discovery did with one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderOutcome {
    Created(i64),
    Refreshed(i64),
}

/// A price movement between two observations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub change_amount: Decimal,
    /// Percentage relative to the old price; zero when the old price is zero.
    pub change_percentage: Decimal,
}

impl PriceChange {
    /// Returns `None` when the price did not move.
    pub fn between(old_price: Decimal, new_price: Decimal) -> Option<Self> {
        if old_price == new_price {
            return None;
        }
        let change_amount = new_price - old_price;
        let change_percentage = if old_price.is_zero() {
            Decimal::ZERO
        } else {
            change_amount / old_price * Decimal::ONE_HUNDRED
        };
        Some(Self {
            old_price,
            new_price,
            change_amount,
            change_percentage,
        })
    }

    /// Absolute percentage movement exceeds `threshold` percent.
    pub fn exceeds(&self, threshold: Decimal) -> bool {
        self.change_percentage.abs() > threshold
    }
}
