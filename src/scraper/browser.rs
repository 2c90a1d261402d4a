use crate::config::EngineConfig;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Upper bound on waiting for the post-load network lull; some pages keep
/// trickling requests and never go fully idle.
const NAVIGATION_SETTLE: Duration = Duration::from_secs(10);

const SELECTOR_POLL_ATTEMPTS: usize = 10;
const SELECTOR_POLL_DELAY: Duration = Duration::from_millis(300);

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rendering engine: {0}")]
    Engine(String),

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("timed out after {timeout:?} loading {url}")]
    Timeout { url: String, timeout: Duration },

    #[error("selector {selector:?} never appeared on {url}")]
    MissingSelector { url: String, selector: String },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("{url}: giving up after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: usize,
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub(crate) fn exhausted(url: &str, attempts: usize, last: FetchError) -> Self {
        FetchError::Exhausted {
            url: url.to_string(),
            attempts,
            last: Box::new(last),
        }
    }

    /// Errors no amount of retrying will fix.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }
}

// ── Wait policy ──────────────────────────────────────────────────────────────

/// What "loaded" means for a given navigation.
#[derive(Debug, Clone)]
pub enum WaitPolicy {
    /// Navigation settled; extraction decides what is actually present.
    /// Container absence on listing pages is a pagination signal, not an
    /// error, so it must reach the extractor.
    NetworkIdle,
    /// The page is useless until this selector exists; its absence after a
    /// bounded poll counts as an attempt failure.
    Selector(String),
}

// ── Rendering engine ─────────────────────────────────────────────────────────

/// Shared headless Chromium instance. Launched once at run start (a launch
/// failure is fatal to the whole run), handed to every concurrent unit, and
/// shut down explicitly at run end. Page isolation is the engine's own: one
/// tab per in-flight navigation.
pub struct RenderingEngine {
    inner: Mutex<Option<Arc<Browser>>>,
    navigation_timeout: Duration,
}

impl RenderingEngine {
    pub async fn launch(
        config: &EngineConfig,
        navigation_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder();

        if !config.sandbox {
            builder = builder
                .arg("--no-sandbox")
                .arg("--disable-setuid-sandbox")
                .arg("--disable-dev-shm-usage");
        }
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }

        let browser_cfg = builder.build().map_err(FetchError::Engine)?;

        let (browser, mut handler) = Browser::launch(browser_cfg)
            .await
            .map_err(|e| FetchError::Engine(format!("launch failed: {e}")))?;

        // The CDP event stream must be drained for the connection to live.
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self {
            inner: Mutex::new(Some(Arc::new(browser))),
            navigation_timeout,
        })
    }

    async fn browser(&self) -> Result<Arc<Browser>, FetchError> {
        self.inner
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| FetchError::Engine("engine already shut down".to_string()))
    }

    /// One navigation attempt: open a tab, wait per `wait`, hand the live
    /// page back for extraction. Callers wrap this in a retry policy; a
    /// timeout here is a single attempt failure, not a unit failure.
    pub async fn goto(&self, url: &str, wait: &WaitPolicy) -> Result<RenderedPage, FetchError> {
        let browser = self.browser().await?;

        let page = timeout(self.navigation_timeout, browser.new_page(url))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                timeout: self.navigation_timeout,
            })?
            .map_err(|e| FetchError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        // Best-effort settle; see NAVIGATION_SETTLE.
        let _ = timeout(NAVIGATION_SETTLE, page.wait_for_navigation()).await;

        let rendered = RenderedPage {
            url: url.to_string(),
            page,
        };

        if let WaitPolicy::Selector(selector) = wait {
            if let Err(e) = rendered.wait_for_selector(selector).await {
                rendered.close().await;
                return Err(e);
            }
        }

        Ok(rendered)
    }

    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(browser) = guard.take() {
            match Arc::try_unwrap(browser) {
                Ok(mut b) => {
                    if let Err(e) = b.close().await {
                        warn!(error = %e, "browser close error");
                    }
                }
                Err(_) => warn!("browser still in use at shutdown"),
            }
        }
    }
}

// ── Rendered page ────────────────────────────────────────────────────────────

/// A live tab. Kept open so extraction can re-snapshot the DOM while late
/// client-side fields finish rendering; closed explicitly when the unit is
/// done with it.
pub struct RenderedPage {
    url: String,
    page: Page,
}

impl RenderedPage {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Snapshot of the current DOM as HTML text.
    pub async fn content(&self) -> Result<String, FetchError> {
        self.page
            .content()
            .await
            .map_err(|e| FetchError::Navigation {
                url: self.url.clone(),
                message: format!("content snapshot failed: {e}"),
            })
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), FetchError> {
        for _ in 0..SELECTOR_POLL_ATTEMPTS {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            sleep(SELECTOR_POLL_DELAY).await;
        }
        Err(FetchError::MissingSelector {
            url: self.url.clone(),
            selector: selector.to_string(),
        })
    }

    /// A failed close only leaks a tab until the engine shuts down.
    pub async fn close(self) {
        if let Err(e) = self.page.close().await {
            debug!(url = %self.url, error = %e, "page close error");
        }
    }
}
