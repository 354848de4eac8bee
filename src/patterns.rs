use std::sync::LazyLock;

use regex::Regex;

use crate::accessor::{Locator, TextPattern};

/// Quick-search box on the portal's property view.
pub const QUICK_SEARCH_INPUT: &str = r#"input[placeholder*="Quick Search"]"#;

/// Label that appears once a property's detail panel is open.
pub const DETAILS_MARKER: &str = "PIN";

static PIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bPIN\b[\s:#]*(\d[\d.\-]*)").expect("valid PIN regex")
});

static DEED_CITATION: LazyLock<Regex> =
    LazyLock::new(|| deed_citation().to_regex().expect("valid deed citation regex"));

static BILL_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(20\d{2})\b").expect("valid year regex"));

pub fn quick_search_input() -> Locator {
    Locator::css(QUICK_SEARCH_INPUT).first()
}

pub fn details_marker() -> Locator {
    Locator::text(DETAILS_MARKER).first()
}

pub fn details_body() -> Locator {
    Locator::css("body").first()
}

/// Link text that starts with a house number, e.g. "133 Manorly Ln".
pub fn address_link_text() -> TextPattern {
    TextPattern::case_insensitive(r"^\s*\d+\s+.+")
}

/// A number followed by a word anywhere in the text.
pub fn embedded_address_text() -> TextPattern {
    TextPattern::case_insensitive(r"\b\d+\s+\w+")
}

pub fn address_result_link() -> Locator {
    Locator::css("a").has_text(address_link_text()).first()
}

pub fn address_result_row() -> Locator {
    Locator::css("div").has_text(embedded_address_text()).first()
}

pub fn record_card_label() -> TextPattern {
    TextPattern::case_insensitive(r"Property\s+Record\s+Card")
}

pub fn tax_bills_label() -> TextPattern {
    TextPattern::case_insensitive(r"Tax\s+Bills")
}

/// Deed book/page citation such as "2972 / 328".
pub fn deed_citation() -> TextPattern {
    TextPattern::new(r"^\s*\d+\s*/\s*\d+\s*$")
}

pub fn deed_anchor() -> Locator {
    Locator::css("a").has_text(deed_citation()).first()
}

/// Submit input or button labelled "Search" in any case. Inputs are matched
/// on their value.
pub fn search_control() -> Locator {
    Locator::css(r#"input[type="submit"], button"#)
        .has_text(TextPattern::case_insensitive(r"\bsearch\b"))
        .first()
}

pub fn table_rows() -> Locator {
    Locator::css("tr")
}

/// First PIN value following a "PIN" label.
pub fn pin_in_text(text: &str) -> Option<String> {
    let caps = PIN.captures(text)?;
    let pin = caps[1].trim_end_matches(['.', '-']);
    if pin.is_empty() {
        None
    } else {
        Some(pin.to_string())
    }
}

pub fn is_deed_citation(text: &str) -> bool {
    DEED_CITATION.is_match(text.trim())
}

/// First 20xx year appearing in a tax bill row.
pub fn bill_year(text: &str) -> Option<u32> {
    BILL_YEAR
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}
