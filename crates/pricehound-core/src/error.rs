use thiserror::Error;

/// Application-wide error types for Pricehound.
#[derive(Error, Debug)]
pub enum AppError {
    /// Input or configuration that can never succeed (e.g. a retailer
    /// without name/price selectors).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// No retailer with the given id.
    #[error("Retailer {0} not found")]
    RetailerNotFound(i64),

    /// Page navigation failed (DNS, TLS, HTTP status, renderer crash).
    #[error("Navigation error: {0}")]
    NavigationError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Launching or talking to the browser process failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// A database constraint (unique, foreign key, not null) rejected the write.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The run was cancelled before the operation could start or finish.
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    ///
    /// Retrying a terminal error repeats the same input against the same
    /// state, so it can only fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NavigationError(_)
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::BrowserError(_)
            | AppError::DatabaseError(_)
            | AppError::Generic(_) => true,
            AppError::ValidationError(_)
            | AppError::RetailerNotFound(_)
            | AppError::IntegrityError(_)
            | AppError::ConfigError(_)
            | AppError::SerializationError(_)
            | AppError::Cancelled => false,
        }
    }

    /// Short machine-readable name, used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation",
            AppError::RetailerNotFound(_) => "retailer_not_found",
            AppError::NavigationError(_) => "navigation",
            AppError::NetworkError(_) => "network",
            AppError::Timeout(_) => "timeout",
            AppError::BrowserError(_) => "browser",
            AppError::IntegrityError(_) => "integrity",
            AppError::DatabaseError(_) => "database",
            AppError::ConfigError(_) => "config",
            AppError::SerializationError(_) => "serialization",
            AppError::Cancelled => "cancelled",
            AppError::Generic(_) => "unexpected",
        }
    }
}
