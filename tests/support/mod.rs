#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parcel_docs::accessor::{Locator, Target};
use parcel_docs::{
    Error, FetchConfig, Orientation, PageAccessor, PdfOptions, Result, SessionLauncher, WaitUntil,
};
use regex::Regex;

pub const PORTAL: &str = "https://portal.example/datasets/properties";
pub const ADDRESS: &str = "133 Manorly Ln, Mooresville, NC";
pub const PRC_URL: &str = "https://prc.example/card/4655";
pub const TAX_BILLS_URL: &str = "https://tax.example/bills?pin=4655";
pub const LATEST_BILL_URL: &str = "https://tax.example/bill/2023.pdf";
pub const DEED_URL: &str = "https://deeds.example/book/2972/328";

#[derive(Debug, Clone)]
pub enum Action {
    Reveal(Vec<FakeElement>),
    Navigate(String),
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub tag: String,
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub visible: bool,
    pub children: Vec<FakeElement>,
    pub on_click: Option<Action>,
    pub on_enter: Option<Action>,
}

impl FakeElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: String::new(),
            attrs: HashMap::new(),
            visible: true,
            children: Vec::new(),
            on_click: None,
            on_enter: None,
        }
    }

    pub fn link(text: &str, href: &str) -> Self {
        Self::new("a").text(text).attr("href", href)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn child(mut self, child: FakeElement) -> Self {
        self.text = if self.text.is_empty() {
            child.text.clone()
        } else {
            format!("{} {}", self.text, child.text)
        };
        self.children.push(child);
        self
    }

    pub fn on_click(mut self, action: Action) -> Self {
        self.on_click = Some(action);
        self
    }

    pub fn on_enter(mut self, action: Action) -> Self {
        self.on_enter = Some(action);
        self
    }

    /// What a text filter sees: visible text, or the value of an input.
    fn label(&self) -> &str {
        if self.text.is_empty() {
            self.attrs.get("value").map(String::as_str).unwrap_or("")
        } else {
            &self.text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Goto(String),
    Click(String),
    Fill(String),
    Type(String, Duration),
    Press(String),
    Download(String),
    Render { url: String, orientation: Orientation },
    Sleep(Duration),
    Close,
}

#[derive(Default)]
struct State {
    pages: HashMap<String, Vec<FakeElement>>,
    downloads: HashMap<String, Vec<u8>>,
    failing_goto: HashSet<String>,
    failing_render: HashSet<String>,
    close_times_out: bool,
    current_url: String,
    dom: Vec<FakeElement>,
    calls: Vec<Call>,
}

/// In-memory page: a flat list of elements per URL, where clicks and key
/// presses reveal more elements or navigate. Clones share state, so a test
/// can keep one handle and give another to the pipeline.
#[derive(Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<State>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, elements: Vec<FakeElement>) -> Self {
        self.state.lock().unwrap().pages.insert(url.to_string(), elements);
        self
    }

    pub fn download(self, url: &str, bytes: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .downloads
            .insert(url.to_string(), bytes.to_vec());
        self
    }

    pub fn fail_goto(self, url: &str) -> Self {
        self.state.lock().unwrap().failing_goto.insert(url.to_string());
        self
    }

    pub fn fail_render(self, url: &str) -> Self {
        self.state.lock().unwrap().failing_render.insert(url.to_string());
        self
    }

    /// Make `close` report that the browser had to be killed.
    pub fn close_times_out(self) -> Self {
        self.state.lock().unwrap().close_times_out = true;
        self
    }

    /// Load `url` as the current document without recording a call.
    pub fn at(self, url: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.current_url = url.to_string();
            state.dom = state.pages.get(url).cloned().unwrap_or_default();
        }
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn closes(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Close).count()
    }

    pub fn renders(&self) -> Vec<(String, Orientation)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Render { url, orientation } => Some((url, orientation)),
                _ => None,
            })
            .collect()
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher { page: self.clone() }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

impl State {
    fn record(&mut self, call: Call) {
        self.calls.push(call);
    }

    fn body(&self) -> FakeElement {
        let text = flatten(&self.dom)
            .into_iter()
            .filter(|el| el.visible && el.children.is_empty())
            .map(|el| el.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        FakeElement::new("body").text(&text)
    }

    fn candidates(&self, locator: &Locator) -> Vec<FakeElement> {
        let all = flatten(&self.dom);
        let mut found: Vec<FakeElement> = match &locator.target {
            Target::Css(css) if css == "body" => vec![self.body()],
            Target::Css(css) => all
                .into_iter()
                .filter(|el| matches_css(el, css))
                .cloned()
                .collect(),
            Target::Text(text) => all
                .into_iter()
                .filter(|el| el.children.is_empty() && el.text.contains(text.as_str()))
                .cloned()
                .collect(),
        };
        if let Some(pattern) = &locator.has_text {
            let re = pattern.to_regex().unwrap();
            found.retain(|el| re.is_match(el.label()));
        }
        found
    }

    fn resolve(&self, locator: &Locator) -> Option<FakeElement> {
        let el = self.candidates(locator).into_iter().nth(locator.index)?;
        match &locator.descendant {
            Some(css) => flatten(&el.children)
                .into_iter()
                .find(|c| matches_css(c, css))
                .cloned(),
            None => Some(el),
        }
    }

    fn resolve_visible(&self, locator: &Locator) -> Result<FakeElement> {
        match self.resolve(locator) {
            Some(el) if el.visible => Ok(el),
            _ => Err(Error::Timeout(format!("visible {locator}"))),
        }
    }

    fn load(&mut self, url: &str) {
        self.current_url = url.to_string();
        self.dom = self.pages.get(url).cloned().unwrap_or_default();
    }

    fn apply(&mut self, action: Option<Action>) {
        match action {
            Some(Action::Reveal(elements)) => self.dom.extend(elements),
            Some(Action::Navigate(url)) => self.load(&url),
            None => {}
        }
    }
}

fn flatten(elements: &[FakeElement]) -> Vec<&FakeElement> {
    let mut out = Vec::new();
    for el in elements {
        out.push(el);
        out.extend(flatten(&el.children));
    }
    out
}

/// Tag names with optional `[attr="v"]` / `[attr*="v"]` filters, comma lists.
fn matches_css(el: &FakeElement, selector: &str) -> bool {
    let attr_re = Regex::new(r#"\[([\w-]+)(\*?=)"([^"]*)"\]"#).unwrap();
    selector.split(',').map(str::trim).any(|part| {
        let (tag, filters) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if !tag.is_empty() && tag != "*" && tag != el.tag {
            return false;
        }
        attr_re.captures_iter(filters).all(|c| {
            match (&c[2], el.attrs.get(&c[1])) {
                ("=", Some(v)) => v == &c[3],
                ("*=", Some(v)) => v.contains(&c[3]),
                _ => false,
            }
        })
    })
}

#[async_trait]
impl PageAccessor for FakePage {
    async fn goto(&self, url: &str, _until: WaitUntil) -> Result<()> {
        self.with_state(|s| {
            s.record(Call::Goto(url.to_string()));
            if s.failing_goto.contains(url) {
                return Err(Error::NavigationError(format!("net::ERR_FAILED at {url}")));
            }
            s.load(url);
            Ok(())
        })
    }

    async fn wait_for_load(&self, _until: WaitUntil, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn wait_for(&self, locator: &Locator, _timeout: Duration) -> Result<()> {
        self.with_state(|s| s.resolve_visible(locator).map(|_| ()))
    }

    async fn is_visible(&self, locator: &Locator, _timeout: Duration) -> Result<bool> {
        Ok(self.with_state(|s| s.resolve_visible(locator).is_ok()))
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        Ok(self.with_state(|s| s.candidates(locator).len()))
    }

    async fn click(&self, locator: &Locator, _timeout: Duration) -> Result<()> {
        self.with_state(|s| {
            let el = s.resolve_visible(locator)?;
            s.record(Call::Click(el.label().to_string()));
            s.apply(el.on_click);
            Ok(())
        })
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        self.with_state(|s| {
            s.resolve(locator)
                .ok_or_else(|| Error::ElementNotFound(locator.to_string()))?;
            s.record(Call::Fill(value.to_string()));
            Ok(())
        })
    }

    async fn type_text(&self, locator: &Locator, text: &str, delay: Duration) -> Result<()> {
        self.with_state(|s| {
            s.resolve(locator)
                .ok_or_else(|| Error::ElementNotFound(locator.to_string()))?;
            s.record(Call::Type(text.to_string(), delay));
            Ok(())
        })
    }

    async fn press(&self, locator: &Locator, key: &str) -> Result<()> {
        self.with_state(|s| {
            let el = s
                .resolve(locator)
                .ok_or_else(|| Error::ElementNotFound(locator.to_string()))?;
            s.record(Call::Press(key.to_string()));
            if key == "Enter" {
                s.apply(el.on_enter);
            }
            Ok(())
        })
    }

    async fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        self.with_state(|s| {
            let el = s
                .resolve(locator)
                .ok_or_else(|| Error::ElementNotFound(locator.to_string()))?;
            Ok(el.attrs.get(name).cloned())
        })
    }

    async fn inner_text(&self, locator: &Locator) -> Result<String> {
        self.with_state(|s| {
            s.resolve(locator)
                .map(|el| el.label().to_string())
                .ok_or_else(|| Error::ElementNotFound(locator.to_string()))
        })
    }

    async fn expect_download(&self, url: &str, _timeout: Duration) -> Result<Option<Vec<u8>>> {
        Ok(self.with_state(|s| {
            s.record(Call::Download(url.to_string()));
            s.downloads.get(url).cloned()
        }))
    }

    async fn render_pdf(&self, options: &PdfOptions) -> Result<Vec<u8>> {
        self.with_state(|s| {
            let url = s.current_url.clone();
            s.record(Call::Render {
                url: url.clone(),
                orientation: options.orientation,
            });
            if s.failing_render.contains(&url) {
                return Err(Error::PdfError(format!("Printing failed for {url}")));
            }
            Ok(format!("%PDF-1.7 {url}").into_bytes())
        })
    }

    async fn wait_for_timeout(&self, duration: Duration) {
        self.with_state(|s| s.record(Call::Sleep(duration)));
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.with_state(|s| s.current_url.clone()))
    }

    async fn close(&self) -> Result<()> {
        self.with_state(|s| {
            s.record(Call::Close);
            if s.close_times_out {
                return Err(Error::Timeout("browser close exceeded 45s".into()));
            }
            Ok(())
        })
    }
}

pub struct FakeLauncher {
    page: FakePage,
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn open(&self) -> Result<Box<dyn PageAccessor>> {
        Ok(Box::new(self.page.clone()))
    }
}

pub fn config() -> FetchConfig {
    FetchConfig::builder().portal_url(PORTAL).build_config()
}

pub fn details_view() -> Vec<FakeElement> {
    vec![
        FakeElement::new("div").text("Owner  SMITH JOHN & JANE"),
        FakeElement::new("div").text("PIN 4655.12-34-5678"),
        FakeElement::link("Property Record Card", PRC_URL),
        FakeElement::link("Tax Bills", TAX_BILLS_URL),
        FakeElement::new("div")
            .text("Deed")
            .child(FakeElement::link("2972 / 328", DEED_URL)),
    ]
}

pub fn quick_search(results: Vec<FakeElement>) -> FakeElement {
    FakeElement::new("input")
        .attr("placeholder", "Quick Search (address, owner, PIN)")
        .on_enter(Action::Reveal(results))
}

pub fn bill_row(text: &str, href: Option<&str>) -> FakeElement {
    let row = FakeElement::new("tr").text(text);
    match href {
        Some(href) => row.child(FakeElement::link("View", href)),
        None => row,
    }
}

/// The full happy path: search, click the address link, three documents.
pub fn manorly() -> FakePage {
    FakePage::new()
        .page(
            PORTAL,
            vec![quick_search(vec![FakeElement::link(
                "133 Manorly Ln, Mooresville",
                "#/properties/4655",
            )
            .on_click(Action::Reveal(details_view()))])],
        )
        .page(
            TAX_BILLS_URL,
            vec![FakeElement::new("button")
                .text("Search")
                .on_click(Action::Reveal(vec![
                    bill_row("Year Type Amount", None),
                    bill_row("2022 Real Estate $1,200.00", Some("/bill/2022.pdf")),
                    bill_row("2023 Real Estate $1,300.00", Some("/bill/2023.pdf")),
                ]))],
        )
        .download(DEED_URL, b"%PDF-1.4 deed 2972/328")
}
