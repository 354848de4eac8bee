use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use crate::error::Result;

/// A text regex shared between the browser (as a JS `RegExp`) and Rust.
///
/// Sources must stay within the syntax both engines agree on: character
/// classes, `\d \s \w \b`, anchors and quantifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextPattern {
    pub source: String,
    pub case_insensitive: bool,
}

impl TextPattern {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            case_insensitive: false,
        }
    }

    pub fn case_insensitive(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            case_insensitive: true,
        }
    }

    /// Flags for the JS `RegExp` constructor.
    pub fn js_flags(&self) -> &'static str {
        if self.case_insensitive {
            "i"
        } else {
            ""
        }
    }

    pub fn to_regex(&self) -> std::result::Result<Regex, regex::Error> {
        if self.case_insensitive {
            Regex::new(&format!("(?i){}", self.source))
        } else {
            Regex::new(&self.source)
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.to_regex().map(|re| re.is_match(text)).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Target {
    /// Elements matching a CSS selector.
    Css(String),
    /// Elements whose own text contains the given string.
    Text(String),
}

/// Description of "the nth element matching X", resolved lazily against the
/// live page every time an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locator {
    pub target: Target,
    /// Keep only candidates whose visible text matches.
    pub has_text: Option<TextPattern>,
    pub index: usize,
    /// Descend into the first element matching this selector under the
    /// resolved candidate.
    pub descendant: Option<String>,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            target: Target::Css(selector.into()),
            has_text: None,
            index: 0,
            descendant: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            target: Target::Text(text.into()),
            has_text: None,
            index: 0,
            descendant: None,
        }
    }

    pub fn has_text(mut self, pattern: TextPattern) -> Self {
        self.has_text = Some(pattern);
        self
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn descendant(mut self, selector: impl Into<String>) -> Self {
        self.descendant = Some(selector.into());
        self
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Target::Css(css) => write!(f, "{css}")?,
            Target::Text(text) => write!(f, "text={text}")?,
        }
        if let Some(pattern) = &self.has_text {
            write!(f, " has-text=/{}/{}", pattern.source, pattern.js_flags())?;
        }
        write!(f, " >> nth={}", self.index)?;
        if let Some(descendant) = &self.descendant {
            write!(f, " >> {descendant}")?;
        }
        Ok(())
    }
}

/// How far a navigation must progress before `goto` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    DomContentLoaded,
    Load,
    /// Loaded, and no new network activity for a quiet period.
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Page setup for rendering the current page to PDF. Dimensions in inches.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub orientation: Orientation,
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin: f64,
    pub print_background: bool,
}

impl PdfOptions {
    /// US Letter with quarter-inch margins and backgrounds printed.
    pub fn letter(orientation: Orientation) -> Self {
        Self {
            orientation,
            paper_width: 8.5,
            paper_height: 11.0,
            margin: 0.25,
            print_background: true,
        }
    }

    pub fn landscape(&self) -> bool {
        self.orientation == Orientation::Landscape
    }
}

/// One live browser page. Operations on a page are strictly sequential;
/// callers never issue two of them concurrently.
#[async_trait]
pub trait PageAccessor: Send + Sync {
    /// Navigate to `url` and wait for the given load state.
    async fn goto(&self, url: &str, until: WaitUntil) -> Result<()>;

    /// Wait for the current document to reach a load state.
    async fn wait_for_load(&self, until: WaitUntil, timeout: Duration) -> Result<()>;

    /// Wait until the located element is visible; `Error::Timeout` otherwise.
    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<()>;

    /// Poll for visibility up to `timeout`, answering `false` once it elapses.
    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> Result<bool>;

    /// Number of elements matching the locator, ignoring its index.
    async fn count(&self, locator: &Locator) -> Result<usize>;

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<()>;

    /// Replace the value of an input.
    async fn fill(&self, locator: &Locator, value: &str) -> Result<()>;

    /// Type `text` one key at a time, pausing `delay` between keys.
    async fn type_text(&self, locator: &Locator, text: &str, delay: Duration) -> Result<()>;

    async fn press(&self, locator: &Locator, key: &str) -> Result<()>;

    async fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>>;

    async fn inner_text(&self, locator: &Locator) -> Result<String>;

    /// Navigate to `url` expecting it to hand off a file download. `None` when
    /// no download completes within `timeout`.
    async fn expect_download(&self, url: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Render the current page to PDF bytes.
    async fn render_pdf(&self, options: &PdfOptions) -> Result<Vec<u8>>;

    async fn wait_for_timeout(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn current_url(&self) -> Result<String>;

    /// Tear the session down. Called exactly once, after the last operation.
    async fn close(&self) -> Result<()>;
}

/// Opens one isolated session (browser + page) per request.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageAccessor>>;
}
