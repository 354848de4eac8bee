use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::Browser as CrBrowser;
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress,
};
use chromiumoxide::cdp::browser_protocol::page::{NavigateParams, PrintToPdfParams};
use chromiumoxide::page::Page as CrPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::accessor::{Locator, PageAccessor, PdfOptions, WaitUntil};
use crate::element::Element;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long resource activity must stay flat before the page counts as idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);

/// Attribute used to hand a JS-resolved element over to CDP input events.
const HANDLE_ATTR: &str = "data-parcel-docs-handle";

/// Locator resolution shared by every query. Expects `__spec` in scope, shaped
/// like a serialized [`Locator`] plus the regex `flags`.
const LOCATE_JS: &str = r#"
function __text(el) {
    return el.innerText || el.value || el.textContent || '';
}
function __candidates(spec) {
    const target = spec.target;
    if (target.kind === 'text') {
        return Array.from(document.querySelectorAll('body, body *')).filter(el =>
            Array.from(el.childNodes).some(n =>
                n.nodeType === Node.TEXT_NODE && n.textContent.includes(target.value)));
    }
    let els = Array.from(document.querySelectorAll(target.value));
    if (spec.has_text) {
        const re = new RegExp(spec.has_text.source, spec.flags);
        els = els.filter(el => re.test(__text(el)));
    }
    return els;
}
function __resolve(spec) {
    const el = __candidates(spec)[spec.index];
    if (!el) return null;
    return spec.descendant ? el.querySelector(spec.descendant) : el;
}
function __visible(el) {
    if (!el || !el.isConnected) return false;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
}
"#;

/// A single tab in a dedicated browser process, implementing
/// [`PageAccessor`] over the Chrome DevTools Protocol.
pub struct ChromiumPage {
    inner: CrPage,
    browser: Mutex<Option<CrBrowser>>,
    handler_task: JoinHandle<()>,
    downloads: TempDir,
    default_timeout: Duration,
    next_handle: AtomicU64,
}

impl ChromiumPage {
    pub(crate) fn new(
        inner: CrPage,
        browser: CrBrowser,
        handler_task: JoinHandle<()>,
        downloads: TempDir,
        default_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            browser: Mutex::new(Some(browser)),
            handler_task,
            downloads,
            default_timeout,
            next_handle: AtomicU64::new(0),
        }
    }

    /// Evaluate `body` inside a function that has the locator helpers and
    /// `__spec` in scope. The body must `return` a JSON-serializable value.
    async fn eval_locator<T: DeserializeOwned>(&self, locator: &Locator, body: &str) -> Result<T> {
        let flags = locator
            .has_text
            .as_ref()
            .map(|p| p.js_flags())
            .unwrap_or("");
        let mut spec = serde_json::to_value(locator).map_err(|e| Error::JsError(e.to_string()))?;
        spec["flags"] = json!(flags);
        let js = format!(
            "JSON.stringify((() => {{ const __spec = {spec}; {LOCATE_JS} {body} }})())"
        );
        self.eval_json(&js).await
    }

    async fn eval_json<T: DeserializeOwned>(&self, js: &str) -> Result<T> {
        let result = self
            .inner
            .evaluate(js)
            .await
            .map_err(|e| Error::JsError(e.to_string()))?;
        let json_str: String = result
            .into_value()
            .map_err(|e| Error::JsError(e.to_string()))?;
        serde_json::from_str(&json_str).map_err(|e| Error::JsError(e.to_string()))
    }

    async fn visible_now(&self, locator: &Locator) -> Result<bool> {
        self.eval_locator(locator, "return __visible(__resolve(__spec));")
            .await
    }

    /// Tag the located element so chromiumoxide can find it by attribute.
    async fn element(&self, locator: &Locator) -> Result<Element> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed).to_string();
        let body = format!(
            "const el = __resolve(__spec); if (!el) return false; \
             el.setAttribute('{HANDLE_ATTR}', '{handle}'); return true;"
        );
        let tagged: bool = self.eval_locator(locator, &body).await?;
        if !tagged {
            return Err(Error::ElementNotFound(locator.to_string()));
        }
        let el = self
            .inner
            .find_element(format!(r#"[{HANDLE_ATTR}="{handle}"]"#))
            .await
            .map_err(|e| Error::ElementNotFound(e.to_string()))?;
        Ok(Element::new(el))
    }

    /// Resource-entry count stays flat for [`NETWORK_QUIET`] after the
    /// document finishes loading.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        let sample = "JSON.stringify([document.readyState, performance.getEntriesByType('resource').length])";
        let start = Instant::now();
        let mut last_count = None;
        let mut quiet_since = Instant::now();

        loop {
            // Evaluation fails while a navigation swaps the execution context.
            if let Ok((state, count)) = self.eval_json::<(String, usize)>(sample).await {
                if state == "complete" && last_count == Some(count) {
                    if quiet_since.elapsed() >= NETWORK_QUIET {
                        return Ok(());
                    }
                } else {
                    last_count = Some(count);
                    quiet_since = Instant::now();
                }
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout("network idle".into()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_ready_state(&self, state: &str, timeout: Duration) -> Result<()> {
        let sample = "JSON.stringify(document.readyState)";
        let start = Instant::now();
        loop {
            if let Ok(current) = self.eval_json::<String>(sample).await {
                if current == "complete" || current == state {
                    return Ok(());
                }
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout(format!("document.readyState == {state}")));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn download_path(&self, guid: &str) -> PathBuf {
        self.downloads.path().join(guid)
    }
}

#[async_trait]
impl PageAccessor for ChromiumPage {
    async fn goto(&self, url: &str, until: WaitUntil) -> Result<()> {
        tokio::time::timeout(self.default_timeout, self.inner.goto(url))
            .await
            .map_err(|_| Error::Timeout(format!("navigation to {url}")))?
            .map_err(|e| Error::NavigationError(e.to_string()))?;
        self.wait_for_load(until, self.default_timeout).await
    }

    async fn wait_for_load(&self, until: WaitUntil, timeout: Duration) -> Result<()> {
        match until {
            WaitUntil::DomContentLoaded => self.wait_for_ready_state("interactive", timeout).await,
            WaitUntil::Load => self.wait_for_ready_state("complete", timeout).await,
            WaitUntil::NetworkIdle => self.wait_for_network_idle(timeout).await,
        }
    }

    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        if self.is_visible(locator, timeout).await? {
            Ok(())
        } else {
            Err(Error::Timeout(format!("visible {locator}")))
        }
    }

    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            match self.visible_now(locator).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => debug!(%locator, error = %e, "visibility check failed"),
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        self.eval_locator(locator, "return __candidates(__spec).length;")
            .await
    }

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        self.wait_for(locator, timeout).await?;
        let el = self.element(locator).await?;
        tokio::time::timeout(timeout, el.click())
            .await
            .map_err(|_| Error::Timeout(format!("click {locator}")))?
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        let value_js = serde_json::to_string(value).map_err(|e| Error::JsError(e.to_string()))?;
        let body = format!(
            "const el = __resolve(__spec); if (!el) return false; \
             el.focus(); el.value = {value_js}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true;"
        );
        let filled: bool = self.eval_locator(locator, &body).await?;
        if filled {
            Ok(())
        } else {
            Err(Error::ElementNotFound(locator.to_string()))
        }
    }

    async fn type_text(&self, locator: &Locator, text: &str, delay: Duration) -> Result<()> {
        let el = self.element(locator).await?;
        el.focus().await?;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            el.type_text(ch.encode_utf8(&mut buf)).await?;
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn press(&self, locator: &Locator, key: &str) -> Result<()> {
        let el = self.element(locator).await?;
        el.press_key(key).await
    }

    async fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        let name_js = serde_json::to_string(name).map_err(|e| Error::JsError(e.to_string()))?;
        let body = format!(
            "const el = __resolve(__spec); return el ? el.getAttribute({name_js}) : null;"
        );
        self.eval_locator(locator, &body).await
    }

    async fn inner_text(&self, locator: &Locator) -> Result<String> {
        let text: Option<String> = self
            .eval_locator(locator, "const el = __resolve(__spec); return el ? __text(el) : null;")
            .await?;
        text.ok_or_else(|| Error::ElementNotFound(locator.to_string()))
    }

    async fn expect_download(&self, url: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        // Subscribe before navigating so the first progress event is not lost.
        let mut progress = {
            let browser = self.browser.lock().await;
            let browser = browser
                .as_ref()
                .ok_or_else(|| Error::DownloadError("session already closed".into()))?;
            browser.event_listener::<EventDownloadProgress>().await?
        };

        // A navigation that turns into a download never commits, so only the
        // navigate command itself is awaited, not the page load.
        self.inner.execute(NavigateParams::new(url)).await?;

        let completed = async {
            while let Some(event) = progress.next().await {
                match event.state {
                    DownloadProgressState::Completed => return Some(event.guid.clone()),
                    DownloadProgressState::Canceled => {
                        warn!(guid = %event.guid, "download canceled");
                        return None;
                    }
                    DownloadProgressState::InProgress => {}
                }
            }
            None
        };

        let guid = match tokio::time::timeout(timeout, completed).await {
            Ok(Some(guid)) => guid,
            Ok(None) => return Ok(None),
            Err(_) => {
                debug!(url, ?timeout, "no download started");
                return Ok(None);
            }
        };
        let bytes = tokio::fs::read(self.download_path(&guid)).await?;
        Ok(Some(bytes))
    }

    async fn render_pdf(&self, options: &PdfOptions) -> Result<Vec<u8>> {
        let mut params = PrintToPdfParams::default();
        params.landscape = Some(options.landscape());
        params.print_background = Some(options.print_background);
        params.paper_width = Some(options.paper_width);
        params.paper_height = Some(options.paper_height);
        params.margin_top = Some(options.margin);
        params.margin_bottom = Some(options.margin);
        params.margin_left = Some(options.margin);
        params.margin_right = Some(options.margin);
        self.inner
            .pdf(params)
            .await
            .map_err(|e| Error::PdfError(e.to_string()))
    }

    async fn current_url(&self) -> Result<String> {
        self.inner
            .url()
            .await
            .map_err(|e| Error::NavigationError(e.to_string()))?
            .ok_or_else(|| Error::NavigationError("No URL found".into()))
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        let shutdown = tokio::time::timeout(self.default_timeout, async {
            let closed = browser.close().await;
            if let Err(e) = browser.wait().await {
                warn!(error = %e, "browser process did not exit cleanly");
            }
            closed
        })
        .await;
        let closed = match shutdown {
            Ok(closed) => closed.map_err(Error::CdpError),
            Err(_) => {
                warn!(timeout = ?self.default_timeout, "browser did not close, killing it");
                if let Some(Err(e)) = browser.kill().await {
                    warn!(error = %e, "failed to kill browser process");
                }
                Err(Error::Timeout(format!(
                    "browser close exceeded {:?}",
                    self.default_timeout
                )))
            }
        };
        self.handler_task.abort();
        closed.map(|_| ())
    }
}
