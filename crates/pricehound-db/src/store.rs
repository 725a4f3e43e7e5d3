use pricehound_core::AppError;
use pricehound_core::models::{
    NewRetailer, NewScrape, PlaceholderOutcome, PriceHistoryEntry, Product, Retailer, SavedScrape,
};
use pricehound_core::traits::ProductStore;
use rust_decimal::Decimal;

use crate::product_repository::ProductRepository;
use crate::retailer_repository::RetailerRepository;

/// PostgreSQL-backed [`ProductStore`].
#[derive(Clone)]
pub struct PgProductStore {
    retailers: RetailerRepository,
    products: ProductRepository,
}

impl PgProductStore {
    pub fn new(retailers: RetailerRepository, products: ProductRepository) -> Self {
        Self {
            retailers,
            products,
        }
    }
}

impl ProductStore for PgProductStore {
    async fn get_retailer(&self, retailer_id: i64) -> Result<Option<Retailer>, AppError> {
        self.retailers.get(retailer_id).await
    }

    async fn get_active_retailers(&self) -> Result<Vec<Retailer>, AppError> {
        self.retailers.list_active().await
    }

    async fn create_retailer(&self, retailer: &NewRetailer) -> Result<Retailer, AppError> {
        self.retailers.create(retailer).await
    }

    async fn find_product(
        &self,
        product_url: &str,
        retailer_id: i64,
    ) -> Result<Option<Product>, AppError> {
        self.products.find(product_url, retailer_id).await
    }

    async fn get_products_for_retailer(&self, retailer_id: i64) -> Result<Vec<Product>, AppError> {
        self.products.list_by_retailer(retailer_id).await
    }

    async fn get_products_from_active_retailers(&self) -> Result<Vec<Product>, AppError> {
        self.products.list_from_active_retailers().await
    }

    async fn upsert_product(
        &self,
        product_url: &str,
        retailer_id: i64,
        name: &str,
        price: Decimal,
        image_url: Option<&str>,
    ) -> Result<Product, AppError> {
        self.products
            .upsert(product_url, retailer_id, name, price, image_url)
            .await
    }

    async fn record_price(
        &self,
        product_id: i64,
        retailer_id: i64,
        price: Decimal,
    ) -> Result<PriceHistoryEntry, AppError> {
        self.products
            .record_price(product_id, retailer_id, price)
            .await
    }

    async fn save_scrape(&self, scrape: &NewScrape) -> Result<SavedScrape, AppError> {
        self.products.save_scrape(scrape).await
    }

    async fn ensure_placeholder(
        &self,
        product_url: &str,
        retailer_id: i64,
    ) -> Result<PlaceholderOutcome, AppError> {
        self.products
            .ensure_placeholder(product_url, retailer_id)
            .await
    }

    async fn get_price_history(
        &self,
        product_id: i64,
        limit: usize,
    ) -> Result<Vec<PriceHistoryEntry>, AppError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.products.price_history(product_id, limit).await
    }
}
