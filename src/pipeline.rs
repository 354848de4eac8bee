use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::accessor::{Locator, PageAccessor, SessionLauncher, WaitUntil};
use crate::acquire::{Acquirer, DocumentKind, Outcome};
use crate::browser::PortalBrowser;
use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::extract::{extract_links, PropertyLinks};
use crate::package::{Packager, ZipPackager};
use crate::patterns;
use crate::pool::{SessionLimiter, SessionSlot};

/// Minimum trimmed address length accepted by [`Pipeline::retrieve_documents`].
pub const MIN_ADDRESS_LEN: usize = 5;

/// Documents obtained for one request, keyed by their fixed file names.
/// Entries are only ever added.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DocumentBundle {
    documents: BTreeMap<DocumentKind, Vec<u8>>,
}

impl DocumentBundle {
    /// Add a document. Returns `false` and keeps the existing payload if the
    /// kind is already present.
    pub fn insert(&mut self, kind: DocumentKind, bytes: Vec<u8>) -> bool {
        if self.documents.contains_key(&kind) {
            return false;
        }
        self.documents.insert(kind, bytes);
        true
    }

    pub fn get(&self, kind: DocumentKind) -> Option<&[u8]> {
        self.documents.get(&kind).map(Vec::as_slice)
    }

    pub fn contains(&self, kind: DocumentKind) -> bool {
        self.documents.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// `(file name, bytes)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &[u8])> {
        self.documents
            .iter()
            .map(|(kind, bytes)| (kind.file_name(), bytes.as_slice()))
    }

    pub fn file_names(&self) -> Vec<&'static str> {
        self.iter().map(|(name, _)| name).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentReport {
    pub document: DocumentKind,
    /// Payload size when present.
    pub outcome: Outcome<usize>,
}

/// What happened to each document during one retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalReport {
    pub links: PropertyLinks,
    pub documents: Vec<DocumentReport>,
}

impl RetrievalReport {
    pub fn outcome(&self, kind: DocumentKind) -> Option<&Outcome<usize>> {
        self.documents
            .iter()
            .find(|r| r.document == kind)
            .map(|r| &r.outcome)
    }

    pub fn obtained(&self) -> usize {
        self.documents.iter().filter(|r| r.outcome.is_present()).count()
    }
}

/// A successful retrieval: a non-empty bundle plus the per-document report.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub bundle: DocumentBundle,
    pub report: RetrievalReport,
}

/// Drives one isolated browser session per request. Cheap to clone and safe
/// to share across tasks; concurrent requests are capped by the configured
/// session limit.
#[derive(Clone)]
pub struct Pipeline {
    launcher: Arc<dyn SessionLauncher>,
    packager: Arc<dyn Packager>,
    config: Arc<FetchConfig>,
    sessions: SessionLimiter,
}

impl Pipeline {
    pub fn new(launcher: impl SessionLauncher + 'static, config: FetchConfig) -> Self {
        Self {
            launcher: Arc::new(launcher),
            packager: Arc::new(ZipPackager),
            sessions: SessionLimiter::new(config.max_sessions),
            config: Arc::new(config),
        }
    }

    /// Pipeline backed by headless Chromium.
    pub fn chromium(config: FetchConfig) -> Self {
        Self::new(PortalBrowser::new(config.clone()), config)
    }

    pub fn with_packager(mut self, packager: impl Packager + 'static) -> Self {
        self.packager = Arc::new(packager);
        self
    }

    /// Slots shared by every clone of this pipeline.
    pub fn sessions(&self) -> &SessionLimiter {
        &self.sessions
    }

    /// Retrieve every document the portal offers for `address`.
    pub async fn retrieve(&self, address: &str) -> Result<DocumentBundle> {
        self.retrieve_with_report(address).await.map(|r| r.bundle)
    }

    /// Like [`Pipeline::retrieve`], also reporting why missing documents are
    /// missing.
    pub async fn retrieve_with_report(&self, address: &str) -> Result<Retrieval> {
        let span = info_span!("retrieve", address);
        async {
            let session = self.open_session().await?;
            let result = self.run(session.page(), address).await;
            session.close().await;
            let (bundle, report) = result?;

            info!(
                obtained = report.obtained(),
                documents = ?bundle.file_names(),
                "retrieval finished"
            );
            if bundle.is_empty() {
                return Err(Error::NoDocumentsFound {
                    address: address.to_string(),
                });
            }
            Ok(Retrieval { bundle, report })
        }
        .instrument(span)
        .await
    }

    /// Retrieve and package: the archive bytes for `address`.
    pub async fn retrieve_documents(&self, address: &str) -> Result<Vec<u8>> {
        let address = validate_address(address)?;
        let bundle = self.retrieve(address).await?;
        self.package(&bundle)
    }

    pub fn package(&self, bundle: &DocumentBundle) -> Result<Vec<u8>> {
        self.packager.package(bundle)
    }

    /// Run the navigation stages and extraction only, without acquiring.
    pub async fn links(&self, address: &str) -> Result<PropertyLinks> {
        let span = info_span!("links", address);
        async {
            let session = self.open_session().await?;
            let result = match self.open_details(session.page(), address).await {
                Ok(()) => Ok(extract_links(session.page(), address, &self.config.timeouts).await),
                Err(e) => Err(e),
            };
            session.close().await;
            result
        }
        .instrument(span)
        .await
    }

    async fn open_session(&self) -> Result<Session> {
        let slot = self.sessions.acquire().await;
        let page = self.launcher.open().await?;
        debug!(active = self.sessions.active(), "session open");
        Ok(Session { page, _slot: slot })
    }

    async fn run(
        &self,
        page: &dyn PageAccessor,
        address: &str,
    ) -> Result<(DocumentBundle, RetrievalReport)> {
        self.open_details(page, address).await?;
        let links = extract_links(page, address, &self.config.timeouts).await;

        let acquirer = Acquirer::new(page, &self.config.timeouts, self.config.tie_break);
        let mut bundle = DocumentBundle::default();
        let mut documents = Vec::with_capacity(DocumentKind::ALL.len());

        // Strictly one after another: every acquisition navigates the same page.
        for kind in DocumentKind::ALL {
            let link = match kind {
                DocumentKind::Deed => links.deed_url.as_deref(),
                DocumentKind::PropertyRecordCard => links.prc_url.as_deref(),
                DocumentKind::TaxBill => links.tax_bills_url.as_deref(),
            };
            let outcome = acquirer.acquire(kind, link).await;
            documents.push(DocumentReport {
                document: kind,
                outcome: outcome.as_ref().map(Vec::len),
            });
            if let Some(bytes) = outcome.present() {
                bundle.insert(kind, bytes);
            }
        }

        Ok((bundle, RetrievalReport { links, documents }))
    }

    async fn open_details(&self, page: &dyn PageAccessor, address: &str) -> Result<()> {
        self.open_portal(page).await?;
        self.submit_search(page, address).await?;
        self.open_first_result(page).await
    }

    async fn open_portal(&self, page: &dyn PageAccessor) -> Result<()> {
        let url = &self.config.portal_url;
        info!(url = %url, "opening portal");
        page.goto(url, WaitUntil::DomContentLoaded)
            .await
            .map_err(|e| Error::PortalUnreachable(format!("{url}: {e}")))?;
        page.wait_for(&patterns::quick_search_input(), self.config.timeouts.required)
            .await
            .map_err(|e| Error::PortalUnreachable(format!("quick search input: {e}")))
    }

    async fn submit_search(&self, page: &dyn PageAccessor, address: &str) -> Result<()> {
        let timeouts = &self.config.timeouts;
        let input = patterns::quick_search_input();
        info!("submitting quick search");

        let typed = async {
            page.wait_for(&input, timeouts.required).await?;
            page.click(&input, timeouts.required).await?;
            page.fill(&input, "").await?;
            page.type_text(&input, address, timeouts.keystroke).await?;
            page.press(&input, "Enter").await
        }
        .await;
        typed.map_err(|e| Error::PortalUnreachable(format!("quick search: {e}")))?;

        // The portal gives no "results ready" signal.
        page.wait_for_timeout(timeouts.search_settle).await;
        Ok(())
    }

    async fn open_first_result(&self, page: &dyn PageAccessor) -> Result<()> {
        let timeouts = &self.config.timeouts;
        let marker = patterns::details_marker();

        if page
            .is_visible(&marker, timeouts.auto_open_probe)
            .await
            .unwrap_or(false)
        {
            info!("details opened with the search");
            return Ok(());
        }

        let link = patterns::address_result_link();
        let clicked = match click_when_visible(page, &link, timeouts.result_click).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(error = %e, "no address link, trying result rows");
                let row = patterns::address_result_row();
                click_when_visible(page, &row, timeouts.result_click).await
            }
        };
        clicked.map_err(|e| Error::ResultNotFound(format!("no clickable result: {e}")))?;

        page.wait_for(&marker, timeouts.required)
            .await
            .map_err(|e| Error::ResultNotFound(format!("details never opened: {e}")))?;
        info!("details opened");
        Ok(())
    }
}

/// Trim `address` and enforce the minimum length a request must carry.
pub fn validate_address(address: &str) -> Result<&str> {
    let address = address.trim();
    if address.chars().count() < MIN_ADDRESS_LEN {
        return Err(Error::InvalidAddress(format!(
            "expected at least {MIN_ADDRESS_LEN} characters, got {address:?}"
        )));
    }
    Ok(address)
}

/// One browser page holding one session slot. Closed exactly once, after the
/// last stage, whether the stages succeeded or not.
struct Session {
    page: Box<dyn PageAccessor>,
    _slot: SessionSlot,
}

impl Session {
    fn page(&self) -> &dyn PageAccessor {
        self.page.as_ref()
    }

    async fn close(self) {
        match self.page.close().await {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "browser killed after close timed out")
            }
            Err(e) => warn!(error = %e, "session teardown failed"),
        }
        debug!("session closed");
    }
}

async fn click_when_visible(
    page: &dyn PageAccessor,
    locator: &Locator,
    timeout: Duration,
) -> Result<()> {
    page.wait_for(locator, timeout).await?;
    page.click(locator, timeout).await
}
