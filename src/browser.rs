use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CrBrowser, BrowserConfig as CrBrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::handler::viewport::Viewport;
use futures::StreamExt;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::accessor::{PageAccessor, SessionLauncher};
use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::page::ChromiumPage;

/// Chrome flags that improve performance without affecting functionality.
const PERF_ARGS: &[&str] = &[
    "disable-gpu",
    "disable-extensions",
    "metrics-recording-only",
    "mute-audio",
    "no-default-browser-check",
    "no-first-run",
    "disable-client-side-phishing-detection",
    "disable-prompt-on-repost",
    "disable-dev-shm-usage",
];

/// Launches a fresh headless Chromium for every session, so no cookies,
/// cache or page state are shared between requests.
pub struct PortalBrowser {
    config: FetchConfig,
}

impl PortalBrowser {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    fn chrome_config(&self) -> Result<CrBrowserConfig> {
        let config = &self.config;
        let mut builder = CrBrowserConfig::builder();

        if config.headless {
            builder = builder.new_headless_mode().no_sandbox();
        } else {
            builder = builder.with_head().no_sandbox();
        }

        // chromiumoxide adds the `--` prefix itself
        for arg in PERF_ARGS {
            builder = builder.arg(*arg);
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder = builder.viewport(Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: false,
            has_touch: false,
        });

        builder.build().map_err(Error::LaunchError)
    }
}

#[async_trait]
impl SessionLauncher for PortalBrowser {
    async fn open(&self) -> Result<Box<dyn PageAccessor>> {
        let downloads = tempfile::Builder::new().prefix("parcel-docs-").tempdir()?;

        let download_behavior = download_behavior(&downloads)?;

        let (mut browser, mut handler) = CrBrowser::launch(self.chrome_config()?)
            .await
            .map_err(|e| Error::LaunchError(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        let setup = async {
            browser.execute(download_behavior).await?;
            browser.new_page("about:blank").await
        }
        .await;

        let page = match setup {
            Ok(page) => page,
            Err(e) => {
                // Don't leak the child process when setup fails half way.
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                return Err(Error::LaunchError(e.to_string()));
            }
        };

        debug!(downloads = %downloads.path().display(), "download directory ready");
        info!(headless = self.config.headless, "browser session opened");

        Ok(Box::new(ChromiumPage::new(
            page,
            browser,
            handler_task,
            downloads,
            self.config.timeouts.required,
        )))
    }
}

/// Save downloads under their GUID in `downloads` and report progress events.
fn download_behavior(downloads: &TempDir) -> Result<SetDownloadBehaviorParams> {
    SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::AllowAndName)
        .download_path(downloads.path().to_string_lossy().into_owned())
        .events_enabled(true)
        .build()
        .map_err(Error::LaunchError)
}
