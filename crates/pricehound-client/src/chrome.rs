use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use pricehound_core::error::AppError;
use pricehound_core::traits::{BrowserLauncher, PageSession};
use tokio::task::JoinHandle;

use crate::http::{DEFAULT_USER_AGENT, parse_selector};

/// Resource types never downloaded while scraping.
const BLOCKED_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.css", "*.woff",
    "*.woff2", "*.ttf", "*.otf",
];

static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Headless Chromium launcher.
///
/// Every [`BrowserLauncher::launch`] starts a separate Chromium process with
/// its own throwaway profile, so sessions share no cookies or cache.
#[derive(Clone)]
pub struct ChromeLauncher {
    navigation_timeout: Duration,
    chrome_binary: Option<PathBuf>,
}

impl ChromeLauncher {
    /// Launcher with a **30 s** navigation timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(navigation_timeout: Duration) -> Self {
        let chrome_binary = find_chrome_binary();
        if let Some(bin) = &chrome_binary {
            tracing::info!("Using Chrome binary: {}", bin.display());
        }
        Self {
            navigation_timeout,
            chrome_binary,
        }
    }

    fn config(&self, profile_dir: &Path) -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .user_data_dir(profile_dir)
            .window_size(1280, 720)
            .viewport(Viewport {
                width: 1280,
                height: 720,
                ..Viewport::default()
            });

        if let Some(bin) = &self.chrome_binary {
            builder = builder.chrome_executable(bin);
        }

        builder
            .arg("--headless=new")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg(format!("--user-agent={DEFAULT_USER_AGENT}"))
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))
    }
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Session = ChromePage;

    async fn launch(&self) -> Result<ChromePage, AppError> {
        let profile = ProfileDir::next();
        let config = self.config(profile.path())?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::debug!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        let page = match open_page(&browser).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                return Err(e);
            }
        };

        Ok(ChromePage {
            browser,
            page,
            handler_task: Some(handler_task),
            navigation_timeout: self.navigation_timeout,
            profile,
        })
    }
}

/// Per-session Chromium profile under the temp dir, removed on drop.
struct ProfileDir(PathBuf);

impl ProfileDir {
    fn next() -> Self {
        Self(std::env::temp_dir().join(format!(
            "pricehound-{}-{}",
            std::process::id(),
            PROFILE_COUNTER.fetch_add(1, Ordering::Relaxed)
        )))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ProfileDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::debug!(path = %self.0.display(), error = %e, "Failed to remove browser profile");
        }
    }
}

async fn open_page(browser: &Browser) -> Result<Page, AppError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to open page: {e}")))?;

    page.execute(EnableParams::default())
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to enable network domain: {e}")))?;
    let patterns = BLOCKED_PATTERNS.iter().map(|p| p.to_string()).collect();
    page.execute(SetBlockedUrLsParams::new(patterns))
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to block resources: {e}")))?;

    Ok(page)
}

/// One page in a dedicated Chromium process.
pub struct ChromePage {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    navigation_timeout: Duration,
    // Declared after `browser` so the profile is removed once the process is gone.
    profile: ProfileDir,
}

impl ChromePage {
    async fn evaluate(&self, script: String) -> Result<Option<serde_json::Value>, AppError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| AppError::BrowserError(format!("Script evaluation failed: {e}")))?;
        Ok(result.value().cloned())
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

impl PageSession for ChromePage {
    async fn goto(&mut self, url: &str) -> Result<(), AppError> {
        let timeout = self.navigation_timeout;
        let page = &self.page;

        let result = tokio::time::timeout(timeout, async {
            page.goto(url).await.map_err(|e| {
                AppError::NavigationError(format!("Failed to navigate to {url}: {e}"))
            })?;
            // <body> present is the minimal signal that content has loaded.
            page.find_element("body").await.map_err(|e| {
                AppError::NavigationError(format!("Page did not render body: {e}"))
            })?;
            Ok::<(), AppError>(())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(timeout.as_secs())),
        }
    }

    async fn visible_text(&mut self, selector: &str) -> Result<Option<String>, AppError> {
        parse_selector(selector)?;
        let value = self
            .evaluate(visible_element_script(selector, "el.innerText"))
            .await?;
        Ok(value.as_ref().and_then(|v| v.as_str()).map(str::to_string))
    }

    async fn visible_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, AppError> {
        parse_selector(selector)?;
        let read = format!("el.getAttribute({})", js_string(attribute));
        let value = self.evaluate(visible_element_script(selector, &read)).await?;
        Ok(value.as_ref().and_then(|v| v.as_str()).map(str::to_string))
    }

    async fn all_attributes(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, AppError> {
        parse_selector(selector)?;
        let script = format!(
            "Array.from(document.querySelectorAll({})).map(el => el.getAttribute({})).filter(v => v !== null)",
            js_string(selector),
            js_string(attribute)
        );
        match self.evaluate(script).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!(error = %e, "Browser close failed");
        }
        let _ = self.browser.wait().await;
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

/// Script returning `read` for the first element matching `selector`, or
/// null when that element is not rendered.
fn visible_element_script(selector: &str, read: &str) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return null;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden') return null;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 && rect.height === 0) return null;
    return {read};
}})()"#,
        selector = js_string(selector)
    )
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// `CHROME_BIN` wins when it points at an existing file. Snap-packaged
/// Chromium wraps the real binary in a launcher that rejects headless flags,
/// so the binary inside the snap is preferred over `/snap/bin/chromium`.
/// Returns `None` to let `chromiumoxide` do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
