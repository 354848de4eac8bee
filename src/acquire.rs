use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::accessor::{Orientation, PageAccessor, PdfOptions, WaitUntil};
use crate::config::Timeouts;
use crate::error::Result;
use crate::patterns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Deed,
    PropertyRecordCard,
    TaxBill,
}

impl DocumentKind {
    /// Acquisition order within a session.
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::Deed,
        DocumentKind::PropertyRecordCard,
        DocumentKind::TaxBill,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            DocumentKind::Deed => "deed.pdf",
            DocumentKind::PropertyRecordCard => "property_record_card.pdf",
            DocumentKind::TaxBill => "tax_bill.pdf",
        }
    }

    /// Record cards are wide tables; deeds and bills are portrait pages.
    pub fn orientation(self) -> Orientation {
        match self {
            DocumentKind::PropertyRecordCard => Orientation::Landscape,
            DocumentKind::Deed | DocumentKind::TaxBill => Orientation::Portrait,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Why an optional step produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Absence {
    /// The details view carried no link for this document.
    NotOffered,
    /// Navigating to the link did not hand off a file.
    NoDownload,
    /// The document was produced but had no content.
    Empty,
    /// A browser step failed; carries the error message.
    Failed(String),
}

/// Result of an optional step: a value, or an explicit reason for its absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Present(T),
    Absent(Absence),
}

impl<T> Outcome<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Outcome::Present(_))
    }

    pub fn present(self) -> Option<T> {
        match self {
            Outcome::Present(value) => Some(value),
            Outcome::Absent(_) => None,
        }
    }

    pub fn absence(&self) -> Option<&Absence> {
        match self {
            Outcome::Present(_) => None,
            Outcome::Absent(reason) => Some(reason),
        }
    }

    pub fn as_ref(&self) -> Outcome<&T> {
        match self {
            Outcome::Present(value) => Outcome::Present(value),
            Outcome::Absent(reason) => Outcome::Absent(reason.clone()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Present(value) => Outcome::Present(f(value)),
            Outcome::Absent(reason) => Outcome::Absent(reason),
        }
    }
}

impl Outcome<Vec<u8>> {
    fn from_bytes(result: Result<Vec<u8>>) -> Self {
        match result {
            Ok(bytes) if bytes.is_empty() => Outcome::Absent(Absence::Empty),
            Ok(bytes) => Outcome::Present(bytes),
            Err(e) => Outcome::Absent(Absence::Failed(e.to_string())),
        }
    }
}

/// Which row wins when several tax bill rows share the latest year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// The later row in document order.
    #[default]
    LastWins,
    /// The earlier row in document order.
    FirstWins,
}

/// Visible text of one table row on the tax-bills page and its first link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRow {
    pub text: String,
    pub href: Option<String>,
}

impl BillRow {
    pub fn new(text: impl Into<String>, href: Option<&str>) -> Self {
        Self {
            text: text.into(),
            href: href.map(str::to_string),
        }
    }
}

/// Pick the link of the row with the latest bill year.
///
/// Only rows carrying a link can raise the running maximum; a linkless row
/// with a newer year is skipped without affecting later rows.
pub fn select_latest_bill(rows: &[BillRow], tie_break: TieBreak) -> Option<(u32, &str)> {
    let mut best: Option<(u32, &str)> = None;
    for row in rows {
        let Some(year) = patterns::bill_year(&row.text) else {
            continue;
        };
        if let Some((best_year, _)) = best {
            let beaten = match tie_break {
                TieBreak::LastWins => year < best_year,
                TieBreak::FirstWins => year <= best_year,
            };
            if beaten {
                continue;
            }
        }
        if let Some(href) = row.href.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            best = Some((year, href));
        }
    }
    best
}

/// Resolve `href` against `page_url` the way a browser would, keeping only
/// http(s) targets.
pub fn resolve_href(href: &str, page_url: &str) -> Option<String> {
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(page_url).ok()?.join(href).ok()?,
        Err(_) => return None,
    };
    match resolved.scheme() {
        "http" | "https" => Some(resolved.into()),
        _ => None,
    }
}

/// Acquires documents on one page, one step at a time.
pub struct Acquirer<'a> {
    page: &'a dyn PageAccessor,
    timeouts: &'a Timeouts,
    tie_break: TieBreak,
}

impl<'a> Acquirer<'a> {
    pub fn new(page: &'a dyn PageAccessor, timeouts: &'a Timeouts, tie_break: TieBreak) -> Self {
        Self {
            page,
            timeouts,
            tie_break,
        }
    }

    /// Acquire one document from its link, degrading every failure to absence.
    pub async fn acquire(&self, kind: DocumentKind, link: Option<&str>) -> Outcome<Vec<u8>> {
        let Some(url) = link else {
            return Outcome::Absent(Absence::NotOffered);
        };
        info!(document = %kind, url, "acquiring");
        let outcome = match kind {
            DocumentKind::Deed => self.deed(url).await,
            DocumentKind::PropertyRecordCard => self.record_card(url).await,
            DocumentKind::TaxBill => self.tax_bill(url).await,
        };
        match &outcome {
            Outcome::Present(bytes) => info!(document = %kind, bytes = bytes.len(), "acquired"),
            Outcome::Absent(reason) => warn!(document = %kind, ?reason, "not acquired"),
        }
        outcome
    }

    /// Try a file download first; deeds that open in a viewer get printed.
    pub async fn deed(&self, url: &str) -> Outcome<Vec<u8>> {
        match self.triggered_download(url).await {
            Outcome::Present(bytes) => Outcome::Present(bytes),
            Outcome::Absent(reason) => {
                debug!(?reason, "deed download unavailable, printing viewer");
                Outcome::from_bytes(
                    self.print_to_document(url, DocumentKind::Deed.orientation())
                        .await,
                )
            }
        }
    }

    pub async fn record_card(&self, url: &str) -> Outcome<Vec<u8>> {
        Outcome::from_bytes(
            self.print_to_document(url, DocumentKind::PropertyRecordCard.orientation())
                .await,
        )
    }

    pub async fn tax_bill(&self, bills_url: &str) -> Outcome<Vec<u8>> {
        let result = async {
            let bill_url = self.latest_tax_bill_url(bills_url).await?;
            self.print_to_document(&bill_url, DocumentKind::TaxBill.orientation())
                .await
        }
        .await;
        Outcome::from_bytes(result)
    }

    /// Navigate and capture a file download, if the link produces one.
    pub async fn triggered_download(&self, url: &str) -> Outcome<Vec<u8>> {
        match self.page.expect_download(url, self.timeouts.download).await {
            Ok(Some(bytes)) if !bytes.is_empty() => Outcome::Present(bytes),
            Ok(Some(_)) => Outcome::Absent(Absence::Empty),
            Ok(None) => Outcome::Absent(Absence::NoDownload),
            Err(e) => Outcome::Absent(Absence::Failed(e.to_string())),
        }
    }

    /// Navigate, let the viewer settle, and print the page to Letter PDF.
    pub async fn print_to_document(&self, url: &str, orientation: Orientation) -> Result<Vec<u8>> {
        self.page.goto(url, WaitUntil::NetworkIdle).await?;
        self.page.wait_for_timeout(self.timeouts.print_settle).await;
        self.page.render_pdf(&PdfOptions::letter(orientation)).await
    }

    /// Find the newest bill on the tax-bills page, falling back to the page
    /// itself when no dated row carries a usable link.
    pub async fn latest_tax_bill_url(&self, bills_url: &str) -> Result<String> {
        self.page.goto(bills_url, WaitUntil::DomContentLoaded).await?;
        self.page
            .wait_for_load(WaitUntil::NetworkIdle, self.timeouts.required)
            .await?;

        self.click_search_control().await;

        let rows = self.bill_rows().await?;
        let page_url = self.page.current_url().await?;

        let latest = select_latest_bill(&rows, self.tie_break)
            .and_then(|(year, href)| resolve_href(href, &page_url).map(|url| (year, url)));
        match latest {
            Some((year, url)) => {
                info!(year, url = %url, "latest tax bill");
                Ok(url)
            }
            None => {
                debug!(rows = rows.len(), "no dated bill link, printing bills page");
                Ok(page_url)
            }
        }
    }

    /// Some bill lookups only populate their table after "Search" is pressed.
    async fn click_search_control(&self) -> bool {
        let control = patterns::search_control();
        if !self
            .page
            .is_visible(&control, self.timeouts.search_button)
            .await
            .unwrap_or(false)
        {
            return false;
        }
        match self.page.click(&control, self.timeouts.search_button).await {
            Ok(()) => {
                self.page
                    .wait_for_timeout(self.timeouts.search_button_settle)
                    .await;
                true
            }
            Err(e) => {
                debug!(error = %e, "search control not clickable");
                false
            }
        }
    }

    async fn bill_rows(&self) -> Result<Vec<BillRow>> {
        let rows = patterns::table_rows();
        let count = self.page.count(&rows).await?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let row = rows.clone().nth(i);
            let text = match self.page.inner_text(&row).await {
                Ok(text) => text.trim().to_string(),
                Err(_) => continue,
            };
            let href = self
                .page
                .attribute(&row.descendant("a"), "href")
                .await
                .ok()
                .flatten();
            out.push(BillRow { text, href });
        }
        Ok(out)
    }
}
