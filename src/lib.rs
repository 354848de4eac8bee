pub mod accessor;
pub mod acquire;
pub mod browser;
pub mod config;
mod element;
pub mod error;
pub mod extract;
pub mod package;
pub mod page;
pub mod patterns;
pub mod pipeline;
pub mod pool;

pub use accessor::{
    Locator, Orientation, PageAccessor, PdfOptions, SessionLauncher, TextPattern, WaitUntil,
};
pub use acquire::{Absence, DocumentKind, Outcome, TieBreak};
pub use browser::PortalBrowser;
pub use config::{FetchConfig, Timeouts};
pub use error::{Error, Result};
pub use extract::PropertyLinks;
pub use package::{Packager, ZipPackager};
pub use pipeline::{DocumentBundle, Pipeline, Retrieval, RetrievalReport};
