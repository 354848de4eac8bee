use serde::Serialize;
use tracing::{debug, info};

use crate::accessor::{Locator, PageAccessor, TextPattern};
use crate::acquire::resolve_href;
use crate::config::Timeouts;
use crate::patterns;

/// Everything the details view offered for one address. Absent fields mean
/// the portal did not offer them, not that anything went wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertyLinks {
    pub address: String,
    pub pin: Option<String>,
    pub prc_url: Option<String>,
    pub tax_bills_url: Option<String>,
    pub deed_url: Option<String>,
    /// Book/page citation as displayed, e.g. "2972 / 328".
    pub deed_book_page: Option<String>,
}

impl PropertyLinks {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Number of document links found.
    pub fn offered(&self) -> usize {
        [&self.deed_url, &self.prc_url, &self.tax_bills_url]
            .iter()
            .filter(|url| url.is_some())
            .count()
    }
}

/// Extract links from the current page. Never navigates and never fails:
/// anything that cannot be read is left absent.
pub async fn extract_links(
    page: &dyn PageAccessor,
    address: &str,
    timeouts: &Timeouts,
) -> PropertyLinks {
    let mut links = PropertyLinks::new(address);
    let base = page.current_url().await.ok();

    match page.inner_text(&patterns::details_body()).await {
        Ok(text) => links.pin = patterns::pin_in_text(&text),
        Err(e) => debug!(error = %e, "details text unreadable"),
    }

    let absolute = |href: Option<String>| href.and_then(|h| absolutize(&h, base.as_deref()));

    links.prc_url = absolute(href_for_label(page, patterns::record_card_label(), timeouts).await);
    links.tax_bills_url = absolute(href_for_label(page, patterns::tax_bills_label(), timeouts).await);

    if let Some((citation, href)) = deed_citation(page, timeouts).await {
        links.deed_book_page = Some(citation);
        links.deed_url = absolute(href);
    }

    info!(
        pin = links.pin.as_deref().unwrap_or("-"),
        offered = links.offered(),
        deed = links.deed_book_page.as_deref().unwrap_or("-"),
        "extracted property links"
    );
    links
}

/// Href of the first visible anchor whose text matches `label`.
async fn href_for_label(
    page: &dyn PageAccessor,
    label: TextPattern,
    timeouts: &Timeouts,
) -> Option<String> {
    let anchor = Locator::css("a").has_text(label).first();
    match page.is_visible(&anchor, timeouts.link_visible).await {
        Ok(true) => page.attribute(&anchor, "href").await.ok().flatten(),
        Ok(false) => {
            debug!(%anchor, "link not offered");
            None
        }
        Err(e) => {
            debug!(%anchor, error = %e, "link lookup failed");
            None
        }
    }
}

/// The deed link carries no label, only a "book / page" citation as its text.
async fn deed_citation(
    page: &dyn PageAccessor,
    timeouts: &Timeouts,
) -> Option<(String, Option<String>)> {
    let anchor = patterns::deed_anchor();
    if !page
        .is_visible(&anchor, timeouts.link_visible)
        .await
        .unwrap_or(false)
    {
        debug!("no deed citation link");
        return None;
    }
    let text = page.inner_text(&anchor).await.ok()?;
    let citation = text.trim();
    if !patterns::is_deed_citation(citation) {
        return None;
    }
    let href = page.attribute(&anchor, "href").await.ok().flatten();
    Some((citation.to_string(), href))
}

fn absolutize(href: &str, base: Option<&str>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match base {
        Some(base) => resolve_href(href, base),
        None => Some(href.to_string()),
    }
}
