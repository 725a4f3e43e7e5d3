use chrono::{DateTime, Utc};
use pricehound_core::AppError;
use pricehound_core::models::{
    NewScrape, PlaceholderOutcome, PriceHistoryEntry, Product, SavedScrape, UNKNOWN_NAME,
};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use crate::db_error;

const PRODUCT_COLUMNS: &str = "id, retailer_id, product_url, name, price, image_url, \
     last_scraped_at, last_seen_at, created_at";

/// Largest value a `NUMERIC(10, 2)` price column holds.
pub const MAX_STORED_PRICE: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Products and their append-only price history.
#[derive(Clone)]
pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(
        &self,
        product_url: &str,
        retailer_id: i64,
    ) -> Result<Option<Product>, AppError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE product_url = $1 AND retailer_id = $2"
        ))
        .bind(product_url)
        .bind(retailer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Product::from))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Product>, AppError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Product::from))
    }

    pub async fn list_by_retailer(&self, retailer_id: i64) -> Result<Vec<Product>, AppError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE retailer_id = $1 ORDER BY id"
        ))
        .bind(retailer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    /// Most recently scraped first.
    pub async fn list(&self, limit: i64) -> Result<Vec<Product>, AppError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY last_scraped_at DESC, id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    /// Every product whose retailer is active.
    pub async fn list_from_active_retailers(&self) -> Result<Vec<Product>, AppError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT p.id, p.retailer_id, p.product_url, p.name, p.price, p.image_url, \
                    p.last_scraped_at, p.last_seen_at, p.created_at \
             FROM products p \
             JOIN retailers r ON r.id = p.retailer_id \
             WHERE r.active = TRUE \
             ORDER BY p.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    pub async fn upsert(
        &self,
        product_url: &str,
        retailer_id: i64,
        name: &str,
        price: Decimal,
        image_url: Option<&str>,
    ) -> Result<Product, AppError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        upsert_on(&mut conn, product_url, retailer_id, name, price, image_url).await
    }

    pub async fn record_price(
        &self,
        product_id: i64,
        retailer_id: i64,
        price: Decimal,
    ) -> Result<PriceHistoryEntry, AppError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        record_price_on(&mut conn, product_id, retailer_id, price).await
    }

    /// Previous-price lookup, product upsert and history insert in a single
    /// transaction. The existing row is locked so concurrent scrapes of the
    /// same URL see each other's prices in order.
    pub async fn save_scrape(&self, scrape: &NewScrape) -> Result<SavedScrape, AppError> {
        if scrape.price.abs() > MAX_STORED_PRICE {
            return Err(AppError::ValidationError(format!(
                "Price {} for {} exceeds the storable maximum {MAX_STORED_PRICE}",
                scrape.price, scrape.product_url
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let old_price: Option<Decimal> = sqlx::query_scalar(
            "SELECT price FROM products WHERE product_url = $1 AND retailer_id = $2 FOR UPDATE",
        )
        .bind(&scrape.product_url)
        .bind(scrape.retailer_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let product = upsert_on(
            &mut tx,
            &scrape.product_url,
            scrape.retailer_id,
            &scrape.name,
            scrape.price,
            scrape.image_url.as_deref(),
        )
        .await?;
        let history = record_price_on(&mut tx, product.id, product.retailer_id, scrape.price).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(SavedScrape {
            product,
            history,
            is_new: old_price.is_none(),
            old_price,
        })
    }

    /// Insert a placeholder for a discovered URL, or bump `last_seen_at`
    /// when the product is already tracked. Name and price of an existing
    /// product are left alone.
    pub async fn ensure_placeholder(
        &self,
        product_url: &str,
        retailer_id: i64,
    ) -> Result<PlaceholderOutcome, AppError> {
        let (id, inserted): (i64, bool) = sqlx::query_as(
            "INSERT INTO products (product_url, retailer_id, name, price) \
             VALUES ($1, $2, $3, 0) \
             ON CONFLICT (product_url, retailer_id) DO UPDATE SET last_seen_at = NOW() \
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(product_url)
        .bind(retailer_id)
        .bind(UNKNOWN_NAME)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(if inserted {
            PlaceholderOutcome::Created(id)
        } else {
            PlaceholderOutcome::Refreshed(id)
        })
    }

    /// Newest first; ties on `recorded_at` fall back to insertion order.
    pub async fn price_history(
        &self,
        product_id: i64,
        limit: i64,
    ) -> Result<Vec<PriceHistoryEntry>, AppError> {
        let rows = sqlx::query_as::<_, PriceHistoryRow>(
            "SELECT id, product_id, retailer_id, price, recorded_at \
             FROM price_history \
             WHERE product_id = $1 \
             ORDER BY recorded_at DESC, id DESC \
             LIMIT $2",
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(PriceHistoryEntry::from).collect())
    }
}

async fn upsert_on(
    conn: &mut PgConnection,
    product_url: &str,
    retailer_id: i64,
    name: &str,
    price: Decimal,
    image_url: Option<&str>,
) -> Result<Product, AppError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "INSERT INTO products (product_url, retailer_id, name, price, image_url) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (product_url, retailer_id) DO UPDATE SET \
             name = EXCLUDED.name, \
             price = EXCLUDED.price, \
             image_url = EXCLUDED.image_url, \
             last_scraped_at = NOW() \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(product_url)
    .bind(retailer_id)
    .bind(name)
    .bind(price)
    .bind(image_url)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(row.into())
}

async fn record_price_on(
    conn: &mut PgConnection,
    product_id: i64,
    retailer_id: i64,
    price: Decimal,
) -> Result<PriceHistoryEntry, AppError> {
    let row = sqlx::query_as::<_, PriceHistoryRow>(
        "INSERT INTO price_history (product_id, retailer_id, price) \
         VALUES ($1, $2, $3) \
         RETURNING id, product_id, retailer_id, price, recorded_at",
    )
    .bind(product_id)
    .bind(retailer_id)
    .bind(price)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(row.into())
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    retailer_id: i64,
    product_url: String,
    name: String,
    price: Decimal,
    image_url: Option<String>,
    last_scraped_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            retailer_id: row.retailer_id,
            product_url: row.product_url,
            name: row.name,
            price: row.price,
            image_url: row.image_url,
            last_scraped_at: row.last_scraped_at,
            last_seen_at: row.last_seen_at,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PriceHistoryRow {
    id: i64,
    product_id: i64,
    retailer_id: i64,
    price: Decimal,
    recorded_at: DateTime<Utc>,
}

impl From<PriceHistoryRow> for PriceHistoryEntry {
    fn from(row: PriceHistoryRow) -> Self {
        PriceHistoryEntry {
            id: row.id,
            product_id: row.product_id,
            retailer_id: row.retailer_id,
            price: row.price,
            recorded_at: row.recorded_at,
        }
    }
}
