//!
//! result_store storage module
//! ----------------------------
//! The store is a single flat directory of immutable JSON submissions. Every file is
//! named `{experiment}_{UUID}_{YYYYMMDD-HHMMSS}.json` and becomes visible only through
//! the rename at the end of the atomic write path.
//!
//! Key responsibilities:
//! - Name validation and resolution against the store root (`paths`).
//! - Crash-safe ingestion: temp file, fsync, rename, directory fsync (`writer`).
//! - Filtered, sorted, paginated listings derived from filesystem metadata (`listing`).
//! - Best-effort zip export of a listing (`export`).
//!
//! There are no locks anywhere in this module; coordination between concurrent
//! writers and readers is left to the filesystem's rename and directory-sync semantics.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

mod paths;
mod writer;
mod listing;
mod export;

pub use paths::validate_name;
pub use writer::{submission_stem, DEFAULT_EXPERIMENT, DEFAULT_UUID, MAX_COMPONENT_CHARS};
pub use listing::{parse_timestamp, FileRecord, FilterSpec, SortKey, SortOrder, DEFAULT_LIMIT};
pub use export::{ExportArchive, DEFAULT_MAX_FILES};

/// Failures surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Client-supplied name is empty, contains a separator or `..`, or resolves outside the root.
    #[error("invalid name")]
    InvalidName,
    #[error("permission denied: {0}")]
    PermissionDenied(#[source] io::Error),
    #[error("io error: {0}")]
    Io(#[source] io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            StoreError::PermissionDenied(err)
        } else {
            StoreError::Io(err)
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle on the submission directory. Cheap to clone; holds no open descriptors.
#[derive(Debug, Clone)]
pub struct Store {
    /// Directory holding all persisted submissions.
    root: Arc<PathBuf>,
}

impl Store {
    /// Create a Store rooted at the given path. The directory itself is created lazily
    /// by the first write or listing.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: Arc::new(root.as_ref().to_path_buf()) }
    }

    /// Return the configured root folder for this Store.
    pub fn root_path(&self) -> &Path { self.root.as_path() }

    /// Create the store directory if it is absent. Idempotent.
    pub fn ensure_root(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.root.as_path())
    }
}
