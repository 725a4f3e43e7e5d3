//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. Shared state
//! lives behind `Arc`, so clones handed to a service stay observable from
//! the test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::AppError;
use crate::models::{
    NewRetailer, NewScrape, PlaceholderOutcome, PriceHistoryEntry, Product, Retailer, SavedScrape,
    UNKNOWN_NAME,
};
use crate::traits::{BrowserLauncher, PageSession, ProductStore};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A fully configured retailer at `https://shop.test`.
pub fn make_retailer(id: i64) -> Retailer {
    Retailer {
        id,
        name: format!("Shop {id}"),
        base_url: "https://shop.test".to_string(),
        active: true,
        name_selector: Some("h1.title".to_string()),
        price_selector: Some(".price".to_string()),
        image_selector: Some("img.main".to_string()),
        discovery_url: Some("https://shop.test/catalog".to_string()),
        product_link_selector: Some("a.product".to_string()),
        created_at: Utc::now(),
    }
}

pub fn make_product(id: i64, retailer_id: i64, url: &str, price: Decimal) -> Product {
    let now = Utc::now();
    Product {
        id,
        retailer_id,
        product_url: url.to_string(),
        name: format!("Product {id}"),
        price,
        image_url: None,
        last_scraped_at: now,
        last_seen_at: now,
        created_at: now,
    }
}

/// What a page shows to a visitor. Only visible content belongs here.
#[derive(Debug, Clone, Default)]
pub struct PageFixture {
    texts: HashMap<String, String>,
    attributes: HashMap<(String, String), String>,
    lists: HashMap<(String, String), Vec<String>>,
}

impl PageFixture {
    /// A product page matching the selectors of [`make_retailer`].
    pub fn product(name: &str, price: &str) -> Self {
        Self::default()
            .with_text("h1.title", name)
            .with_text(".price", price)
    }

    /// A listing page whose `a.product` anchors point at `hrefs`.
    pub fn listing(hrefs: &[&str]) -> Self {
        Self::default().with_links("a.product", hrefs)
    }

    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.texts.insert(selector.to_string(), text.to_string());
        self
    }

    pub fn with_attribute(mut self, selector: &str, attribute: &str, value: &str) -> Self {
        self.attributes.insert(
            (selector.to_string(), attribute.to_string()),
            value.to_string(),
        );
        self
    }

    pub fn with_image(self, src: &str) -> Self {
        self.with_attribute("img.main", "src", src)
    }

    pub fn with_links(mut self, selector: &str, hrefs: &[&str]) -> Self {
        self.lists.insert(
            (selector.to_string(), "href".to_string()),
            hrefs.iter().map(|h| h.to_string()).collect(),
        );
        self
    }
}

// ---------------------------------------------------------------------------
// MockLauncher / MockPage
// ---------------------------------------------------------------------------

struct FailurePlan {
    message: String,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Default)]
struct LauncherState {
    pages: Mutex<HashMap<String, PageFixture>>,
    default_page: Mutex<PageFixture>,
    failures: Mutex<HashMap<String, FailurePlan>>,
    launch_error: Mutex<Option<String>>,
    navigation_delay: Mutex<Duration>,
    navigations: Mutex<Vec<String>>,
    launches: AtomicUsize,
    closes: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Launcher whose sessions serve [`PageFixture`]s keyed by URL.
#[derive(Clone, Default)]
pub struct MockLauncher {
    state: Arc<LauncherState>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, fixture: PageFixture) -> Self {
        self.state
            .pages
            .lock()
            .unwrap()
            .insert(url.to_string(), fixture);
        self
    }

    /// Served for every URL without its own fixture.
    pub fn with_default_page(self, fixture: PageFixture) -> Self {
        *self.state.default_page.lock().unwrap() = fixture;
        self
    }

    /// Every navigation to `url` fails.
    pub fn with_navigation_failure(self, url: &str, message: &str) -> Self {
        self.state.failures.lock().unwrap().insert(
            url.to_string(),
            FailurePlan {
                message: message.to_string(),
                remaining: None,
            },
        );
        self
    }

    /// The first `count` navigations to `url` fail, later ones succeed.
    pub fn with_transient_failures(self, url: &str, count: u32, message: &str) -> Self {
        self.state.failures.lock().unwrap().insert(
            url.to_string(),
            FailurePlan {
                message: message.to_string(),
                remaining: Some(count),
            },
        );
        self
    }

    pub fn with_launch_error(self, message: &str) -> Self {
        *self.state.launch_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_navigation_delay(self, delay: Duration) -> Self {
        *self.state.navigation_delay.lock().unwrap() = delay;
        self
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Sessions currently alive.
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Highest number of sessions alive at the same time.
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.navigations.lock().unwrap().clone()
    }

    pub fn navigations_to(&self, url: &str) -> usize {
        self.state
            .navigations
            .lock()
            .unwrap()
            .iter()
            .filter(|u| *u == url)
            .count()
    }
}

impl BrowserLauncher for MockLauncher {
    type Session = MockPage;

    async fn launch(&self) -> Result<MockPage, AppError> {
        if let Some(message) = self.state.launch_error.lock().unwrap().clone() {
            return Err(AppError::BrowserError(message));
        }
        // Yield so concurrent launches actually overlap.
        tokio::task::yield_now().await;
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(active, Ordering::SeqCst);

        Ok(MockPage {
            fixture: PageFixture::default(),
            launcher: Some(self.state.clone()),
        })
    }
}

/// A page session serving a single fixture, or URL-keyed fixtures when it
/// comes from a [`MockLauncher`].
pub struct MockPage {
    fixture: PageFixture,
    launcher: Option<Arc<LauncherState>>,
}

impl MockPage {
    pub fn new(fixture: PageFixture) -> Self {
        Self {
            fixture,
            launcher: None,
        }
    }
}

impl Drop for MockPage {
    fn drop(&mut self) {
        if let Some(state) = &self.launcher {
            state.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl PageSession for MockPage {
    async fn goto(&mut self, url: &str) -> Result<(), AppError> {
        let Some(state) = self.launcher.clone() else {
            return Ok(());
        };
        state.navigations.lock().unwrap().push(url.to_string());

        let delay = *state.navigation_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut failures = state.failures.lock().unwrap();
            match failures.get_mut(url) {
                Some(plan) => match plan.remaining {
                    None => Some(plan.message.clone()),
                    Some(0) => None,
                    Some(ref mut n) => {
                        *n -= 1;
                        Some(plan.message.clone())
                    }
                },
                None => None,
            }
        };
        if let Some(message) = failure {
            return Err(AppError::NavigationError(message));
        }

        self.fixture = state
            .pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| state.default_page.lock().unwrap().clone());
        Ok(())
    }

    async fn visible_text(&mut self, selector: &str) -> Result<Option<String>, AppError> {
        Ok(self.fixture.texts.get(selector).cloned())
    }

    async fn visible_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, AppError> {
        Ok(self
            .fixture
            .attributes
            .get(&(selector.to_string(), attribute.to_string()))
            .cloned())
    }

    async fn all_attributes(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, AppError> {
        Ok(self
            .fixture
            .lists
            .get(&(selector.to_string(), attribute.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn close(self) {
        if let Some(state) = &self.launcher {
            state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct StoreState {
    retailers: Vec<Retailer>,
    products: Vec<Product>,
    history: Vec<PriceHistoryEntry>,
    next_id: i64,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_product(&self, url: &str, retailer_id: i64) -> Option<&Product> {
        self.products
            .iter()
            .find(|p| p.product_url == url && p.retailer_id == retailer_id)
    }

    fn upsert(
        &mut self,
        url: &str,
        retailer_id: i64,
        name: &str,
        price: Decimal,
        image_url: Option<&str>,
    ) -> Product {
        let now = Utc::now();
        if let Some(existing) = self
            .products
            .iter_mut()
            .find(|p| p.product_url == url && p.retailer_id == retailer_id)
        {
            existing.name = name.to_string();
            existing.price = price;
            existing.image_url = image_url.map(str::to_string);
            existing.last_scraped_at = now;
            return existing.clone();
        }
        let product = Product {
            id: self.next_id(),
            retailer_id,
            product_url: url.to_string(),
            name: name.to_string(),
            price,
            image_url: image_url.map(str::to_string),
            last_scraped_at: now,
            last_seen_at: now,
            created_at: now,
        };
        self.products.push(product.clone());
        product
    }

    fn append_history(
        &mut self,
        product_id: i64,
        retailer_id: i64,
        price: Decimal,
    ) -> PriceHistoryEntry {
        let entry = PriceHistoryEntry {
            id: self.next_id(),
            product_id,
            retailer_id,
            price,
            recorded_at: Utc::now(),
        };
        self.history.push(entry.clone());
        entry
    }
}

/// In-memory store. `save_scrape` is all-or-nothing, like the real one.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
    fail_history: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retailer(self, retailer: Retailer) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id = state.next_id.max(retailer.id);
            state.retailers.push(retailer);
        }
        self
    }

    pub fn with_product(self, product: Product) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id = state.next_id.max(product.id);
            state.products.push(product);
        }
        self
    }

    /// Make every history insert fail with a database error.
    pub fn fail_price_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    /// Make every operation fail with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn products(&self) -> Vec<Product> {
        self.state.lock().unwrap().products.clone()
    }

    pub fn history(&self) -> Vec<PriceHistoryEntry> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn retailers(&self) -> Vec<Retailer> {
        self.state.lock().unwrap().retailers.clone()
    }

    pub fn product_by_url(&self, url: &str) -> Option<Product> {
        self.state
            .lock()
            .unwrap()
            .products
            .iter()
            .find(|p| p.product_url == url)
            .cloned()
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError("connection refused".into()));
        }
        Ok(())
    }

    fn check_history(&self) -> Result<(), AppError> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(
                "insert into price_history failed".into(),
            ));
        }
        Ok(())
    }
}

impl ProductStore for MockStore {
    async fn get_retailer(&self, retailer_id: i64) -> Result<Option<Retailer>, AppError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        Ok(state.retailers.iter().find(|r| r.id == retailer_id).cloned())
    }

    async fn get_active_retailers(&self) -> Result<Vec<Retailer>, AppError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        Ok(state.retailers.iter().filter(|r| r.active).cloned().collect())
    }

    async fn create_retailer(&self, retailer: &NewRetailer) -> Result<Retailer, AppError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        if state.retailers.iter().any(|r| r.name == retailer.name) {
            return Err(AppError::IntegrityError(format!(
                "Retailer '{}' already exists",
                retailer.name
            )));
        }
        let created = Retailer {
            id: state.next_id(),
            name: retailer.name.clone(),
            base_url: retailer.base_url.clone(),
            active: retailer.active,
            name_selector: retailer.name_selector.clone(),
            price_selector: retailer.price_selector.clone(),
            image_selector: retailer.image_selector.clone(),
            discovery_url: retailer.discovery_url.clone(),
            product_link_selector: retailer.product_link_selector.clone(),
            created_at: Utc::now(),
        };
        state.retailers.push(created.clone());
        Ok(created)
    }

    async fn find_product(
        &self,
        product_url: &str,
        retailer_id: i64,
    ) -> Result<Option<Product>, AppError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        Ok(state.find_product(product_url, retailer_id).cloned())
    }

    async fn get_products_for_retailer(&self, retailer_id: i64) -> Result<Vec<Product>, AppError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .products
            .iter()
            .filter(|p| p.retailer_id == retailer_id)
            .cloned()
            .collect())
    }

    async fn get_products_from_active_retailers(&self) -> Result<Vec<Product>, AppError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .products
            .iter()
            .filter(|p| {
                state
                    .retailers
                    .iter()
                    .any(|r| r.id == p.retailer_id && r.active)
            })
            .cloned()
            .collect())
    }

    async fn upsert_product(
        &self,
        product_url: &str,
        retailer_id: i64,
        name: &str,
        price: Decimal,
        image_url: Option<&str>,
    ) -> Result<Product, AppError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.upsert(product_url, retailer_id, name, price, image_url))
    }

    async fn record_price(
        &self,
        product_id: i64,
        retailer_id: i64,
        price: Decimal,
    ) -> Result<PriceHistoryEntry, AppError> {
        self.check_available()?;
        self.check_history()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.append_history(product_id, retailer_id, price))
    }

    async fn save_scrape(&self, scrape: &NewScrape) -> Result<SavedScrape, AppError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        let snapshot = state.clone();

        let old_price = state
            .find_product(&scrape.product_url, scrape.retailer_id)
            .map(|p| p.price);
        let product = state.upsert(
            &scrape.product_url,
            scrape.retailer_id,
            &scrape.name,
            scrape.price,
            scrape.image_url.as_deref(),
        );

        if let Err(e) = self.check_history() {
            *state = snapshot;
            return Err(e);
        }
        let history = state.append_history(product.id, scrape.retailer_id, scrape.price);

        Ok(SavedScrape {
            product,
            history,
            old_price,
            is_new: old_price.is_none(),
        })
    }

    async fn ensure_placeholder(
        &self,
        product_url: &str,
        retailer_id: i64,
    ) -> Result<PlaceholderOutcome, AppError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .products
            .iter_mut()
            .find(|p| p.product_url == product_url && p.retailer_id == retailer_id)
        {
            existing.last_seen_at = Utc::now();
            return Ok(PlaceholderOutcome::Refreshed(existing.id));
        }
        let product = state.upsert(product_url, retailer_id, UNKNOWN_NAME, Decimal::ZERO, None);
        Ok(PlaceholderOutcome::Created(product.id))
    }

    async fn get_price_history(
        &self,
        product_id: i64,
        limit: usize,
    ) -> Result<Vec<PriceHistoryEntry>, AppError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        let mut entries: Vec<PriceHistoryEntry> = state
            .history
            .iter()
            .filter(|h| h.product_id == product_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
        entries.truncate(limit);
        Ok(entries)
    }
}
