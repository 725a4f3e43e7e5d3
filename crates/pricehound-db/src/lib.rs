pub mod config;
pub mod database;
pub mod product_repository;
pub mod retailer_repository;
pub mod store;

pub use config::DatabaseConfig;
pub use database::Database;
pub use product_repository::ProductRepository;
pub use retailer_repository::RetailerRepository;
pub use store::PgProductStore;

use pricehound_core::AppError;

/// Map a sqlx error by SQLSTATE class so retries only see transient failures.
pub(crate) fn db_error(e: sqlx::Error) -> AppError {
    match e.as_database_error() {
        Some(db) => classify(db.code().as_deref(), db.message(), &e),
        None => AppError::DatabaseError(e.to_string()),
    }
}

fn classify(code: Option<&str>, message: &str, e: &sqlx::Error) -> AppError {
    match code {
        // Class 23: integrity constraint violation (unique, foreign key, not null, check).
        Some(code) if code.starts_with("23") => AppError::IntegrityError(message.to_string()),
        // Class 22: data exception, e.g. numeric overflow.
        Some(code) if code.starts_with("22") => AppError::ValidationError(message.to_string()),
        _ => AppError::DatabaseError(e.to_string()),
    }
}
