use std::time::Duration;

use pricehound_core::error::AppError;
use pricehound_core::traits::{BrowserLauncher, PageSession};
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};

/// Desktop browser user agent sent by both launchers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Plain-HTTP launcher for sites that render server-side.
///
/// Each session downloads the page with reqwest and queries the static DOM
/// with `scraper`. Nothing is executed, so content injected by JavaScript is
/// invisible to it; use the Chrome launcher for those sites.
#[derive(Clone)]
pub struct HttpLauncher {
    client: Client,
    timeout_secs: u64,
}

impl HttpLauncher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::BrowserError(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl BrowserLauncher for HttpLauncher {
    type Session = StaticPage;

    async fn launch(&self) -> Result<StaticPage, AppError> {
        Ok(StaticPage {
            client: Some((self.client.clone(), self.timeout_secs)),
            html: String::new(),
        })
    }
}

/// A downloaded HTML document.
pub struct StaticPage {
    client: Option<(Client, u64)>,
    html: String,
}

impl StaticPage {
    /// A page over fixed markup; `goto` is a no-op.
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            client: None,
            html: html.into(),
        }
    }
}

impl PageSession for StaticPage {
    async fn goto(&mut self, url: &str) -> Result<(), AppError> {
        let Some((client, timeout_secs)) = &self.client else {
            return Ok(());
        };

        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(*timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::NavigationError(format!("Failed to load {url}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }

        self.html = response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))?;
        Ok(())
    }

    async fn visible_text(&mut self, selector: &str) -> Result<Option<String>, AppError> {
        first_visible(&self.html, selector, |el| {
            Some(el.text().collect::<String>())
        })
    }

    async fn visible_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, AppError> {
        first_visible(&self.html, selector, |el| {
            el.value().attr(attribute).map(str::to_string)
        })
    }

    async fn all_attributes(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, AppError> {
        let selector = parse_selector(selector)?;
        let document = Html::parse_document(&self.html);
        Ok(document
            .select(&selector)
            .filter_map(|el| el.value().attr(attribute).map(str::to_string))
            .collect())
    }

    async fn close(self) {}
}

/// Client errors other than 408 and 429 will not change on retry (a delisted
/// product keeps answering 404), so they are terminal.
fn status_error(status: StatusCode, url: &str) -> AppError {
    let message = format!("HTTP {} for {url}", status.as_u16());
    let transient = matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
    );
    if status.is_client_error() && !transient {
        AppError::ValidationError(message)
    } else {
        AppError::NavigationError(message)
    }
}

/// Parse a CSS selector; a malformed one is a configuration problem.
pub fn parse_selector(selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector)
        .map_err(|e| AppError::ValidationError(format!("Invalid CSS selector '{selector}': {e}")))
}

fn first_visible<T>(
    html: &str,
    selector: &str,
    read: impl Fn(ElementRef<'_>) -> Option<T>,
) -> Result<Option<T>, AppError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .next()
        .filter(|el| is_visible(*el))
        .and_then(read))
}

/// Static approximation of visibility: the element and all its ancestors
/// must be free of `hidden`, inline `display:none` / `visibility:hidden`,
/// and must not sit inside non-rendered containers.
fn is_visible(element: ElementRef<'_>) -> bool {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .all(|el| {
            let value = el.value();
            if matches!(value.name(), "script" | "style" | "template" | "noscript" | "head") {
                return false;
            }
            if value.attr("hidden").is_some() {
                return false;
            }
            if value.name() == "input" && value.attr("type") == Some("hidden") {
                return false;
            }
            match value.attr("style") {
                Some(style) => {
                    let style: String = style
                        .chars()
                        .filter(|c| !c.is_whitespace())
                        .collect::<String>()
                        .to_ascii_lowercase();
                    !style.contains("display:none") && !style.contains("visibility:hidden")
                }
                None => true,
            }
        })
}
