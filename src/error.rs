use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Browser launch failed: {0}")]
    LaunchError(String),

    #[error("Navigation failed: {0}")]
    NavigationError(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("JavaScript error: {0}")]
    JsError(String),

    #[error("PDF render failed: {0}")]
    PdfError(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Portal unreachable: {0}")]
    PortalUnreachable(String),

    #[error("No search result opened: {0}")]
    ResultNotFound(String),

    #[error("No documents could be retrieved for {address:?}")]
    NoDocumentsFound { address: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Packaging failed: {0}")]
    PackagingError(String),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// True for the content outcome "nothing to hand back", as opposed to a
    /// navigation or browser failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NoDocumentsFound { .. })
    }

    /// True when a bounded wait elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
