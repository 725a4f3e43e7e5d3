//! Product discovery from retailer listing pages.
//!
//! Each configured retailer's listing page is visited once per cycle; every
//! product link found there either creates a placeholder product (to be
//! priced by the next batch run) or refreshes the existing one's last-seen
//! timestamp.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::extractor::resolve_url;
use crate::models::{DiscoveryProfile, PlaceholderOutcome};
use crate::pool::BrowserPool;
use crate::retry::RetryPolicy;
use crate::traits::{BrowserLauncher, PageSession, ProductStore};

/// Outcome of discovery for one retailer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    pub retailer_id: i64,
    pub retailer_name: String,
    /// Anchors matched by the link selector, before filtering.
    pub links_found: usize,
    /// Distinct http(s) product URLs after resolution.
    pub unique_urls: usize,
    pub created: usize,
    pub refreshed: usize,
    /// URLs whose placeholder could not be written.
    pub failed: usize,
    /// Set when the retailer could not be processed at all.
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct DiscoveryService<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    pool: BrowserPool<L>,
    store: S,
    retry: RetryPolicy,
}

impl<L, S> DiscoveryService<L, S>
where
    L: BrowserLauncher,
    S: ProductStore,
{
    pub fn new(pool: BrowserPool<L>, store: S, retry: RetryPolicy) -> Self {
        Self { pool, store, retry }
    }

    /// Run discovery for every active retailer that has it configured.
    ///
    /// A failing retailer is recorded in its report; the others still run.
    pub async fn discover_all(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveryReport>, AppError> {
        let retailers = self.store.get_active_retailers().await?;
        let mut reports = Vec::new();

        for retailer in &retailers {
            if cancel.is_cancelled() {
                break;
            }
            let profile = match DiscoveryProfile::from_retailer(retailer) {
                Ok(Some(profile)) => profile,
                Ok(None) => {
                    tracing::debug!(retailer_id = retailer.id, "Discovery not configured, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(retailer_id = retailer.id, error = %e, "Invalid discovery configuration");
                    reports.push(DiscoveryReport {
                        retailer_id: retailer.id,
                        retailer_name: retailer.name.clone(),
                        error: Some(e.to_string()),
                        ..Default::default()
                    });
                    continue;
                }
            };

            let report = match self.discover_retailer(&profile, cancel).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(
                        retailer_id = profile.retailer_id,
                        url = %profile.discovery_url,
                        error = %e,
                        "Discovery failed"
                    );
                    DiscoveryReport {
                        retailer_id: profile.retailer_id,
                        retailer_name: profile.retailer_name.clone(),
                        error: Some(e.to_string()),
                        ..Default::default()
                    }
                }
            };
            reports.push(report);
        }

        Ok(reports)
    }

    /// Visit one listing page and register every product link on it.
    pub async fn discover_retailer(
        &self,
        profile: &DiscoveryProfile,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport, AppError> {
        let listing_url = profile.discovery_url.as_str();
        let hrefs = self
            .retry
            .run_until_cancelled(listing_url, cancel, || self.collect_links(profile))
            .await?;

        let urls: BTreeSet<String> = hrefs
            .iter()
            .filter_map(|href| resolve_url(&profile.base_url, href))
            .collect();

        let mut report = DiscoveryReport {
            retailer_id: profile.retailer_id,
            retailer_name: profile.retailer_name.clone(),
            links_found: hrefs.len(),
            unique_urls: urls.len(),
            ..Default::default()
        };

        for url in &urls {
            match self.store.ensure_placeholder(url, profile.retailer_id).await {
                Ok(PlaceholderOutcome::Created(product_id)) => {
                    tracing::debug!(%url, product_id, "Discovered new product");
                    report.created += 1;
                }
                Ok(PlaceholderOutcome::Refreshed(_)) => report.refreshed += 1,
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Failed to record discovered product");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            retailer_id = profile.retailer_id,
            retailer = %profile.retailer_name,
            links_found = report.links_found,
            unique_urls = report.unique_urls,
            created = report.created,
            refreshed = report.refreshed,
            "Discovery complete"
        );
        Ok(report)
    }

    async fn collect_links(&self, profile: &DiscoveryProfile) -> Result<Vec<String>, AppError> {
        let mut lease = self.pool.acquire().await?;
        let page = lease.page();
        let links = match page.goto(profile.discovery_url.as_str()).await {
            Ok(()) => page.all_attributes(&profile.link_selector, "href").await,
            Err(e) => Err(e),
        };
        lease.release().await;
        links
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;

    use super::*;
    use crate::pool::PoolConfig;
    use crate::testutil::*;

    const LISTING: &str = "https://shop.test/catalog";

    fn service(launcher: MockLauncher, store: MockStore) -> DiscoveryService<MockLauncher, MockStore> {
        DiscoveryService::new(
            BrowserPool::new(launcher, &PoolConfig::default()),
            store,
            RetryPolicy::default().with_base_delay(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn duplicate_links_create_one_placeholder_each() {
        let hrefs = [
            "/p/1", "/p/2", "/p/3", "/p/4", "/p/5", "/p/6", "/p/7",
            "/p/1", "https://shop.test/p/2", "/p/3#reviews",
        ];
        let launcher = MockLauncher::new().with_page(LISTING, PageFixture::listing(&hrefs));
        let store = MockStore::new().with_retailer(make_retailer(1));
        let svc = service(launcher, store.clone());

        let reports = svc.discover_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].links_found, 10);
        assert_eq!(reports[0].unique_urls, 7);
        assert_eq!(reports[0].created, 7);
        let products = store.products();
        assert_eq!(products.len(), 7);
        assert!(products.iter().all(|p| p.name == "Unknown" && p.price == Decimal::ZERO));
    }

    #[tokio::test]
    async fn existing_products_are_only_refreshed() {
        let existing = make_product(50, 1, "https://shop.test/p/1", Decimal::new(1999, 2));
        let seen_before = existing.last_seen_at;
        let launcher =
            MockLauncher::new().with_page(LISTING, PageFixture::listing(&["/p/1", "/p/2"]));
        let store = MockStore::new()
            .with_retailer(make_retailer(1))
            .with_product(existing);
        let svc = service(launcher, store.clone());

        let reports = svc.discover_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(reports[0].created, 1);
        assert_eq!(reports[0].refreshed, 1);
        let refreshed = store.product_by_url("https://shop.test/p/1").unwrap();
        assert_eq!(refreshed.price, Decimal::new(1999, 2));
        assert!(refreshed.last_seen_at >= seen_before);
    }

    #[tokio::test]
    async fn non_http_links_are_skipped() {
        let launcher = MockLauncher::new().with_page(
            LISTING,
            PageFixture::listing(&["mailto:help@shop.test", "javascript:void(0)", "/p/9", ""]),
        );
        let store = MockStore::new().with_retailer(make_retailer(1));
        let svc = service(launcher, store.clone());

        let reports = svc.discover_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(reports[0].unique_urls, 1);
        assert_eq!(store.products()[0].product_url, "https://shop.test/p/9");
    }

    #[tokio::test]
    async fn one_failing_retailer_does_not_stop_others() {
        let mut second = make_retailer(2);
        second.base_url = "https://other.test".into();
        second.discovery_url = Some("/list".into());
        let launcher = MockLauncher::new()
            .with_navigation_failure(LISTING, "net::ERR_CONNECTION_REFUSED")
            .with_page("https://other.test/list", PageFixture::listing(&["/item/1"]));
        let store = MockStore::new()
            .with_retailer(make_retailer(1))
            .with_retailer(second);
        let svc = service(launcher.clone(), store.clone());

        let reports = svc.discover_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports[0].error.is_some());
        assert_eq!(reports[1].created, 1);
        assert_eq!(launcher.navigations_to(LISTING), 4);
        assert_eq!(store.products().len(), 1);
    }

    #[tokio::test]
    async fn retailers_without_discovery_are_skipped() {
        let mut retailer = make_retailer(1);
        retailer.discovery_url = None;
        let launcher = MockLauncher::new();
        let svc = service(launcher.clone(), MockStore::new().with_retailer(retailer));

        let reports = svc.discover_all(&CancellationToken::new()).await.unwrap();

        assert!(reports.is_empty());
        assert_eq!(launcher.launches(), 0);
    }
}
