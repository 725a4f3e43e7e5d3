use std::future::Future;

use rust_decimal::Decimal;

use crate::error::AppError;
use crate::models::{
    NewRetailer, NewScrape, PlaceholderOutcome, PriceHistoryEntry, Product, Retailer, SavedScrape,
};

/// One open page inside an isolated browser instance.
///
/// Selector queries only consider the *first* element that matches, and only
/// when that element is visible, mirroring what a shopper would see.
pub trait PageSession: Send {
    /// Navigate to `url` and wait until the document body is available.
    fn goto(&mut self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Text content of the first visible element matching `selector`.
    fn visible_text(
        &mut self,
        selector: &str,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// Attribute value of the first visible element matching `selector`.
    fn visible_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// Attribute values of every element matching `selector`, in document order.
    fn all_attributes(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    /// Tear down the page and its browser instance.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Launches a fresh, isolated browser instance with one page.
pub trait BrowserLauncher: Send + Sync + Clone {
    type Session: PageSession;

    fn launch(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// Persistence gateway for retailers, products and price history.
pub trait ProductStore: Send + Sync + Clone {
    fn get_retailer(
        &self,
        retailer_id: i64,
    ) -> impl Future<Output = Result<Option<Retailer>, AppError>> + Send;

    fn get_active_retailers(&self) -> impl Future<Output = Result<Vec<Retailer>, AppError>> + Send;

    fn create_retailer(
        &self,
        retailer: &NewRetailer,
    ) -> impl Future<Output = Result<Retailer, AppError>> + Send;

    fn find_product(
        &self,
        product_url: &str,
        retailer_id: i64,
    ) -> impl Future<Output = Result<Option<Product>, AppError>> + Send;

    fn get_products_for_retailer(
        &self,
        retailer_id: i64,
    ) -> impl Future<Output = Result<Vec<Product>, AppError>> + Send;

    fn get_products_from_active_retailers(
        &self,
    ) -> impl Future<Output = Result<Vec<Product>, AppError>> + Send;

    /// Insert or update the product at (url, retailer), stamping last-scraped.
    fn upsert_product(
        &self,
        product_url: &str,
        retailer_id: i64,
        name: &str,
        price: Decimal,
        image_url: Option<&str>,
    ) -> impl Future<Output = Result<Product, AppError>> + Send;

    fn record_price(
        &self,
        product_id: i64,
        retailer_id: i64,
        price: Decimal,
    ) -> impl Future<Output = Result<PriceHistoryEntry, AppError>> + Send;

    /// Look up the previous price, upsert the product and append a history
    /// row as one atomic unit. On error nothing of the unit is persisted.
    fn save_scrape(
        &self,
        scrape: &NewScrape,
    ) -> impl Future<Output = Result<SavedScrape, AppError>> + Send;

    /// Create a placeholder product for a discovered URL, or refresh the
    /// last-seen timestamp of the existing one.
    fn ensure_placeholder(
        &self,
        product_url: &str,
        retailer_id: i64,
    ) -> impl Future<Output = Result<PlaceholderOutcome, AppError>> + Send;

    /// Price history for a product, newest first.
    fn get_price_history(
        &self,
        product_id: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<PriceHistoryEntry>, AppError>> + Send;
}
