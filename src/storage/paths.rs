use std::io;
use std::path::PathBuf;

use super::{Store, StoreError, StoreResult};

/// Reject names that could address anything other than a direct child of the store root:
/// empty, NUL, either separator style, or the parent-directory token anywhere in the name.
pub fn validate_name(raw: &str) -> StoreResult<()> {
    if raw.is_empty() {
        return Err(StoreError::InvalidName);
    }
    if raw.contains('\u{0000}') || raw.contains('/') || raw.contains('\\') || raw.contains("..") {
        return Err(StoreError::InvalidName);
    }
    Ok(())
}

impl Store {
    /// Resolve a client-supplied file name to an absolute path strictly inside the store root.
    ///
    /// The lexical check runs first and touches nothing on disk. After that both the root and
    /// the candidate are canonicalized so a symlink planted in the root cannot point outside it.
    /// A candidate that does not exist yet resolves to `<canonical root>/<name>`, which is what
    /// the writer needs for names it is about to create.
    pub fn resolve(&self, raw: &str) -> StoreResult<PathBuf> {
        validate_name(raw)?;
        let root = self.root_path().canonicalize().map_err(|_| StoreError::InvalidName)?;
        let candidate = root.join(raw);
        let resolved = match candidate.canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A dangling symlink also reports NotFound; it must not be written through.
                if std::fs::symlink_metadata(&candidate).is_ok() {
                    return Err(StoreError::InvalidName);
                }
                candidate
            }
            Err(_) => return Err(StoreError::InvalidName),
        };
        if resolved == root || !resolved.starts_with(&root) {
            return Err(StoreError::InvalidName);
        }
        Ok(resolved)
    }
}
