use metrics_exporter_prometheus::PrometheusHandle;
use pricehound_client::HttpLauncher;
use pricehound_core::Engine;
use pricehound_db::{Database, PgProductStore};

/// The scrape engine as wired by the server.
pub type ServerEngine = Engine<HttpLauncher, PgProductStore>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub engine: ServerEngine,
    /// Bearer token protecting `/v1/*` (None = API disabled).
    pub admin_token: Option<String>,
    pub metrics: PrometheusHandle,
}
