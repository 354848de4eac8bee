use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};
use crate::pipeline::DocumentBundle;

/// Turns a bundle into the single archive handed back to the caller.
pub trait Packager: Send + Sync {
    fn package(&self, bundle: &DocumentBundle) -> Result<Vec<u8>>;
}

/// Deflate-compressed zip with one entry per document.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipPackager;

impl Packager for ZipPackager {
    fn package(&self, bundle: &DocumentBundle) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, bytes) in bundle.iter() {
            zip.start_file(name, options)
                .map_err(|e| Error::PackagingError(e.to_string()))?;
            zip.write_all(bytes)?;
        }

        let cursor = zip
            .finish()
            .map_err(|e| Error::PackagingError(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}
