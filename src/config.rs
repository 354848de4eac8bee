use std::time::Duration;

use crate::acquire::TieBreak;
use crate::browser::PortalBrowser;

/// Property search view of the Iredell County MapGeo portal.
pub const DEFAULT_PORTAL_URL: &str = "https://iredellcountync.mapgeo.io/datasets/properties";

/// Every bounded wait and settle delay used while driving the portal.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Required waits: portal load, search input, details marker after a click.
    pub required: Duration,
    /// Probe for a details view the portal opened on its own.
    pub auto_open_probe: Duration,
    /// Wait for a search result to become visible and clickable.
    pub result_click: Duration,
    /// Visibility wait for each document link on the details view.
    pub link_visible: Duration,
    /// Visibility wait for a "Search" control on the tax-bills page.
    pub search_button: Duration,
    /// Wait for a navigation to hand off a file download.
    pub download: Duration,
    /// Settle after submitting the quick search.
    pub search_settle: Duration,
    /// Settle after network-idle before printing a page.
    pub print_settle: Duration,
    /// Settle after clicking the tax-bills "Search" control.
    pub search_button_settle: Duration,
    /// Delay between keystrokes when typing the address.
    pub keystroke: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            required: Duration::from_secs(45),
            auto_open_probe: Duration::from_secs(6),
            result_click: Duration::from_secs(12),
            link_visible: Duration::from_millis(2_500),
            search_button: Duration::from_secs(2),
            download: Duration::from_secs(20),
            search_settle: Duration::from_millis(1_500),
            print_settle: Duration::from_millis(750),
            search_button_settle: Duration::from_millis(800),
            keystroke: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub portal_url: String,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub chrome_path: Option<String>,
    pub timeouts: Timeouts,
    /// Upper bound on simultaneously open browser sessions.
    pub max_sessions: usize,
    /// How equal-year tax bill rows are ranked.
    pub tie_break: TieBreak,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            chrome_path: None,
            timeouts: Timeouts::default(),
            max_sessions: 2,
            tie_break: TieBreak::default(),
        }
    }
}

impl FetchConfig {
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::new()
    }
}

pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: FetchConfig::default(),
        }
    }

    pub fn portal_url(mut self, url: impl Into<String>) -> Self {
        self.config.portal_url = url.into();
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport_width = width;
        self.config.viewport_height = height;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<String>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    /// Override the required-stage wait (portal load, details marker).
    pub fn required_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.required = timeout;
        self
    }

    /// Cap concurrent sessions. Zero is raised to one.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max.max(1);
        self
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.config.tie_break = tie_break;
        self
    }

    pub fn build_config(self) -> FetchConfig {
        self.config
    }

    /// Build the config and wrap it in a chromium launcher.
    pub fn build(self) -> PortalBrowser {
        PortalBrowser::new(self.build_config())
    }
}

impl Default for FetchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_portal_constants() {
        let config = FetchConfig::default();
        assert_eq!(config.portal_url, DEFAULT_PORTAL_URL);
        assert!(config.headless);
        assert_eq!(config.timeouts.required, Duration::from_secs(45));
        assert_eq!(config.timeouts.link_visible, Duration::from_millis(2_500));
        assert_eq!(config.tie_break, TieBreak::LastWins);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = FetchConfig::builder()
            .portal_url("http://localhost:8080/props")
            .headless(false)
            .chrome_path("/usr/bin/chromium")
            .required_timeout(Duration::from_secs(5))
            .max_sessions(0)
            .tie_break(TieBreak::FirstWins)
            .build_config();

        assert_eq!(config.portal_url, "http://localhost:8080/props");
        assert!(!config.headless);
        assert_eq!(config.chrome_path.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(config.timeouts.required, Duration::from_secs(5));
        assert_eq!(config.max_sessions, 1);
        assert_eq!(config.tie_break, TieBreak::FirstWins);
    }
}
