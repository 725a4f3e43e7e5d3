use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pricehound API",
        version = "0.1.0",
        description = "Retail price tracker: on-demand scrapes, retailers, products, events and price history."
    ),
    paths(
        crate::routes::scrape,
        crate::routes::create_retailer,
        crate::routes::list_retailers,
        crate::routes::get_retailer,
        crate::routes::list_products,
        crate::routes::get_product,
        crate::routes::list_events,
        crate::routes::product_history,
        crate::routes::health,
        crate::routes::metrics,
    ),
    components(schemas(
        crate::dto::ScrapeRequest,
        crate::dto::ProductResponse,
        crate::dto::ProductListResponse,
        crate::dto::CreateRetailerRequest,
        crate::dto::RetailerResponse,
        crate::dto::RetailerListResponse,
        crate::dto::EventResponse,
        crate::dto::EventListResponse,
        crate::dto::PriceEntryResponse,
        crate::dto::PriceHistoryResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "scrape", description = "On-demand scraping"),
        (name = "events", description = "Recent engine events"),
        (name = "retailers", description = "Retailer registration and lookup"),
        (name = "products", description = "Tracked products and their price history"),
        (name = "system", description = "Health and metrics"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Admin token. Set via PRICEHOUND_ADMIN_TOKEN environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
