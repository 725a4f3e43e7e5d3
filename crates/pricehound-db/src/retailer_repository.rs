use chrono::{DateTime, Utc};
use pricehound_core::AppError;
use pricehound_core::models::{NewRetailer, Retailer};
use sqlx::PgPool;

use crate::db_error;

const RETAILER_COLUMNS: &str = "id, name, base_url, active, name_selector, price_selector, \
     image_selector, discovery_url, product_link_selector, created_at";

#[derive(Clone)]
pub struct RetailerRepository {
    pool: PgPool,
}

impl RetailerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Retailer>, AppError> {
        let row = sqlx::query_as::<_, RetailerRow>(&format!(
            "SELECT {RETAILER_COLUMNS} FROM retailers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Retailer::from))
    }

    pub async fn list(&self) -> Result<Vec<Retailer>, AppError> {
        let rows = sqlx::query_as::<_, RetailerRow>(&format!(
            "SELECT {RETAILER_COLUMNS} FROM retailers ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Retailer::from).collect())
    }

    pub async fn list_active(&self) -> Result<Vec<Retailer>, AppError> {
        let rows = sqlx::query_as::<_, RetailerRow>(&format!(
            "SELECT {RETAILER_COLUMNS} FROM retailers WHERE active = TRUE ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Retailer::from).collect())
    }

    /// Insert a retailer. A duplicate name is an [`AppError::IntegrityError`].
    pub async fn create(&self, retailer: &NewRetailer) -> Result<Retailer, AppError> {
        let row = sqlx::query_as::<_, RetailerRow>(&format!(
            "INSERT INTO retailers \
                (name, base_url, active, name_selector, price_selector, image_selector, \
                 discovery_url, product_link_selector) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {RETAILER_COLUMNS}"
        ))
        .bind(&retailer.name)
        .bind(&retailer.base_url)
        .bind(retailer.active)
        .bind(&retailer.name_selector)
        .bind(&retailer.price_selector)
        .bind(&retailer.image_selector)
        .bind(&retailer.discovery_url)
        .bind(&retailer.product_link_selector)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::debug!(retailer_id = row.id, name = %row.name, "Retailer inserted");
        Ok(row.into())
    }
}

#[derive(sqlx::FromRow)]
struct RetailerRow {
    id: i64,
    name: String,
    base_url: String,
    active: bool,
    name_selector: Option<String>,
    price_selector: Option<String>,
    image_selector: Option<String>,
    discovery_url: Option<String>,
    product_link_selector: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RetailerRow> for Retailer {
    fn from(row: RetailerRow) -> Self {
        Retailer {
            id: row.id,
            name: row.name,
            base_url: row.base_url,
            active: row.active,
            name_selector: row.name_selector,
            price_selector: row.price_selector,
            image_selector: row.image_selector,
            discovery_url: row.discovery_url,
            product_link_selector: row.product_link_selector,
            created_at: row.created_at,
        }
    }
}
