use std::fs::File;
use std::io::{self, Cursor};

use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{FilterSpec, Store, StoreError, StoreResult};

pub const DEFAULT_MAX_FILES: usize = 500;

/// In-memory zip produced by an export, with counts for logging and headers.
#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub bytes: Vec<u8>,
    pub included: usize,
    pub skipped: usize,
}

impl Store {
    /// Zip up to `max_files` records of the listing described by `spec`.
    ///
    /// A record that cannot be resolved or read is logged and skipped; the archive holds
    /// whatever could be read, possibly nothing. Only a failure of the archive writer
    /// itself is returned as an error.
    pub fn build_archive(&self, spec: &FilterSpec, max_files: usize) -> StoreResult<ExportArchive> {
        let names: Vec<String> = self.list(spec).into_iter().take(max_files).map(|r| r.name).collect();
        self.archive_names(&names)
    }

    pub(crate) fn archive_names(&self, names: &[String]) -> StoreResult<ExportArchive> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut included = 0usize;
        let mut skipped = 0usize;

        for name in names {
            // Open before starting the entry so a vanished file never leaves an empty member.
            let mut file = match self.resolve(name).and_then(|p| File::open(p).map_err(StoreError::from)) {
                Ok(f) => f,
                Err(e) => {
                    warn!(target: "export", "skipping {name}: {e}");
                    skipped += 1;
                    continue;
                }
            };
            zip.start_file(name.as_str(), options)?;
            if let Err(e) = io::copy(&mut file, &mut zip) {
                warn!(target: "export", "skipping {name}: read failed: {e}");
                zip.abort_file()?;
                skipped += 1;
                continue;
            }
            included += 1;
        }

        let bytes = zip.finish()?.into_inner();
        info!(target: "export", "archive built: included={included} skipped={skipped} bytes={}", bytes.len());
        Ok(ExportArchive { bytes, included, skipped })
    }
}
