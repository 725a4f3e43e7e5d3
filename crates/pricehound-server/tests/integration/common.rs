use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::response::Html;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::net::TcpListener;

use pricehound_client::HttpLauncher;
use pricehound_core::models::NewRetailer;
use pricehound_core::{BatchConfig, Engine, EngineConfig, EventBus, RetryPolicy};
use pricehound_core::{register_default_handlers, traits::ProductStore};
use pricehound_db::Database;
use pricehound_server::routes;
use pricehound_server::state::AppState;

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

pub const PRODUCT_PAGE: &str = r#"<html><body>
    <h1 class="title">Espresso Machine</h1>
    <span class="price">$249.99</span>
    <img class="main" src="/img/espresso.jpg">
</body></html>"#;

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    _container: ContainerAsync<GenericImage>,
}

/// App with [`TEST_ADMIN_TOKEN`] configured.
pub async fn setup_test_app() -> TestApp {
    build_app(Some(TEST_ADMIN_TOKEN.to_string())).await
}

/// App without an admin token: `/v1/*` is disabled.
pub async fn setup_test_app_no_auth() -> TestApp {
    build_app(None).await
}

async fn build_app(admin_token: Option<String>) -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "pricehound_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/pricehound_test");
    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    let config = EngineConfig {
        batch: BatchConfig {
            batch_size: 10,
            delay_between_batches: Duration::ZERO,
        },
        retry: RetryPolicy::none(),
        ..EngineConfig::default()
    };
    let bus = EventBus::new();
    register_default_handlers(&bus);
    let launcher = HttpLauncher::with_timeout(Duration::from_secs(5)).expect("HTTP client");
    let engine = Engine::build(config, launcher, db.store(), bus);

    let state = Arc::new(AppState {
        db: db.clone(),
        engine,
        admin_token,
        metrics: PrometheusBuilder::new().build_recorder().handle(),
    });

    TestApp {
        router: routes::router(state),
        db,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}

/// Serve [`PRODUCT_PAGE`] on a random local port; returns the base URL.
pub async fn serve_product_page() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shop = Router::new().route("/p/espresso", get(|| async { Html(PRODUCT_PAGE) }));
    tokio::spawn(async move {
        axum::serve(listener, shop).await.unwrap();
    });
    format!("http://{addr}")
}

/// Register a retailer whose selectors match [`PRODUCT_PAGE`].
pub async fn create_retailer(db: &Database, base_url: &str) -> i64 {
    db.store()
        .create_retailer(&NewRetailer {
            name: "Test Shop".into(),
            base_url: base_url.into(),
            active: true,
            name_selector: Some("h1.title".into()),
            price_selector: Some(".price".into()),
            image_selector: Some("img.main".into()),
            discovery_url: None,
            product_link_selector: None,
        })
        .await
        .expect("create retailer")
        .id
}
