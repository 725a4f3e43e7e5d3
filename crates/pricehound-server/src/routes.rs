use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use pricehound_core::AppError;
use pricehound_core::traits::ProductStore;

use crate::auth::require_admin_token;
use crate::dto::{
    CreateRetailerRequest, ErrorResponse, EventListResponse, EventQuery, EventResponse,
    HealthResponse, HistoryQuery, PriceEntryResponse, PriceHistoryResponse, ProductListResponse,
    ProductQuery, ProductResponse, RetailerListResponse, RetailerResponse, ScrapeRequest,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/scrape", post(scrape))
        .route("/v1/events", get(list_events))
        .route("/v1/retailers", post(create_retailer).get(list_retailers))
        .route("/v1/retailers/{id}", get(get_retailer))
        .route("/v1/products", get(list_products))
        .route("/v1/products/{id}", get(get_product))
        .route("/v1/products/{id}/history", get(product_history))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    let public = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

#[utoipa::path(
    post,
    path = "/v1/scrape",
    request_body = ScrapeRequest,
    responses(
        (status = 200, description = "Scraped product", body = ProductResponse),
        (status = 400, description = "Invalid request or retailer not configured", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Retailer not found", body = ErrorResponse),
        (status = 409, description = "Conflicting write", body = ErrorResponse),
        (status = 504, description = "Page load timed out", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "scrape"
)]
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ScrapeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let url = Url::parse(body.product_url.trim()).map_err(|e| {
        AppError::ValidationError(format!("Invalid productUrl '{}': {e}", body.product_url))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::ValidationError(format!(
            "productUrl must be http(s), got '{}'",
            url.scheme()
        ))
        .into());
    }

    let engine = &state.engine;
    let product = engine
        .service
        .scrape_with_retry(
            url.as_str(),
            body.retailer_id,
            &engine.config.retry,
            &CancellationToken::new(),
        )
        .await?;

    Ok(axum::Json(ProductResponse::from(product)))
}

fn product_not_found(id: i64) -> axum::response::Response {
    let body = ErrorResponse {
        error: "not_found".to_string(),
        message: format!("Product not found: {id}"),
    };
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/retailers",
    request_body = CreateRetailerRequest,
    responses(
        (status = 201, description = "Retailer registered", body = RetailerResponse),
        (status = 400, description = "Empty name or invalid base URL", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Retailer name already taken", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "retailers"
)]
pub async fn create_retailer(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateRetailerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let retailer = state
        .engine
        .service
        .register_retailer(&body.into())
        .await?;

    Ok((StatusCode::CREATED, axum::Json(RetailerResponse::from(retailer))))
}

#[utoipa::path(
    get,
    path = "/v1/retailers",
    responses(
        (status = 200, description = "All retailers by id", body = RetailerListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "retailers"
)]
pub async fn list_retailers(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let retailers: Vec<RetailerResponse> = state
        .db
        .retailer_repo()
        .list()
        .await?
        .into_iter()
        .map(RetailerResponse::from)
        .collect();
    let total = retailers.len();

    Ok(axum::Json(RetailerListResponse { retailers, total }))
}

#[utoipa::path(
    get,
    path = "/v1/retailers/{id}",
    params(("id" = i64, Path, description = "Retailer ID")),
    responses(
        (status = 200, description = "Retailer", body = RetailerResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "retailers"
)]
pub async fn get_retailer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let retailer = state
        .engine
        .service
        .store()
        .get_retailer(id)
        .await?
        .ok_or(AppError::RetailerNotFound(id))?;

    Ok(axum::Json(RetailerResponse::from(retailer)))
}

#[utoipa::path(
    get,
    path = "/v1/products",
    params(ProductQuery),
    responses(
        (status = 200, description = "Products of one retailer, or the most recently scraped", body = ProductListResponse),
        (status = 404, description = "Retailer not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.engine.service.store();
    let products = match query.retailer_id {
        Some(retailer_id) => {
            if store.get_retailer(retailer_id).await?.is_none() {
                return Err(AppError::RetailerNotFound(retailer_id).into());
            }
            store.get_products_for_retailer(retailer_id).await?
        }
        None => {
            let limit = query.limit.unwrap_or(50).min(500);
            state.db.product_repo().list(limit as i64).await?
        }
    };
    let products: Vec<ProductResponse> = products.into_iter().map(ProductResponse::from).collect();
    let total = products.len();

    Ok(axum::Json(ProductListResponse { products, total }))
}

#[utoipa::path(
    get,
    path = "/v1/products/{id}",
    params(("id" = i64, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product", body = ProductResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let response = match state.db.product_repo().get(id).await? {
        Some(product) => axum::Json(ProductResponse::from(product)).into_response(),
        None => product_not_found(id),
    };
    Ok(response)
}

#[utoipa::path(
    get,
    path = "/v1/events",
    params(EventQuery),
    responses(
        (status = 200, description = "Most recent events, oldest first", body = EventListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).min(1000);
    let events = state
        .engine
        .service
        .bus()
        .history(limit)
        .into_iter()
        .map(EventResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let total = events.len();

    Ok(axum::Json(EventListResponse { events, total }))
}

#[utoipa::path(
    get,
    path = "/v1/products/{id}/history",
    params(
        ("id" = i64, Path, description = "Product ID"),
        HistoryQuery,
    ),
    responses(
        (status = 200, description = "Recorded prices, newest first", body = PriceHistoryResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "products"
)]
pub async fn product_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.product_repo().get(id).await?.is_none() {
        return Ok(product_not_found(id));
    }

    let limit = query.limit.unwrap_or(20).min(500);
    let entries = state
        .engine
        .service
        .store()
        .get_price_history(id, limit)
        .await?;
    let total = entries.len();

    let response = PriceHistoryResponse {
        product_id: id,
        entries: entries.into_iter().map(PriceEntryResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response).into_response())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = state.db.health_check().await.is_ok();

    let (status, response) = if healthy {
        (
            StatusCode::OK,
            HealthResponse {
                status: "healthy",
                database: "ok",
            },
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthResponse {
                status: "unhealthy",
                database: "error",
            },
        )
    };

    (status, axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus text exposition", content_type = "text/plain"),
    ),
    tag = "system"
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
