use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{Store, StoreError, StoreResult};

pub const DEFAULT_EXPERIMENT: &str = "exp";
pub const DEFAULT_UUID: &str = "nouuid";

const TMP_SUFFIX: &str = ".tmp";

/// Longest experiment or UUID component kept in a file name.
pub const MAX_COMPONENT_CHARS: usize = 64;

/// Pull a naming component out of the submission. Missing, null, false and empty values
/// fall back to the default; other scalars use their JSON text. The result is cut to
/// `MAX_COMPONENT_CHARS`.
fn component(payload: &Map<String, Value>, key: &str, default: &str) -> String {
    let raw = match payload.get(key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if raw.is_empty() {
        return default.to_string();
    }
    raw.chars()
        .take(MAX_COMPONENT_CHARS)
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

/// Derived file stem `{experiment}_{UUID}_{YYYYMMDD-HHMMSS}` for a submission written at `now`.
pub fn submission_stem(payload: &Map<String, Value>, now: DateTime<Utc>) -> String {
    let exp = component(payload, "experiment", DEFAULT_EXPERIMENT);
    let uuid = component(payload, "UUID", DEFAULT_UUID);
    format!("{}_{}_{}", exp, uuid, now.format("%Y%m%d-%H%M%S"))
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl Store {
    /// Names built here are always well formed, so a resolve failure is a store fault.
    fn resolve_generated(&self, name: &str) -> StoreResult<PathBuf> {
        self.resolve(name).map_err(|e| match e {
            StoreError::InvalidName => {
                StoreError::Io(io::Error::new(io::ErrorKind::InvalidInput, format!("cannot place {name} under the store root")))
            }
            other => other,
        })
    }

    /// Persist one submission stamped with the current UTC time.
    pub fn write_submission(&self, payload: &Map<String, Value>) -> StoreResult<PathBuf> {
        self.write_submission_at(payload, Utc::now())
    }

    /// Persist one submission as `{stem}.json`, or `{stem}.NN.json` when that name is taken.
    ///
    /// The bytes go to `<name>.tmp`, are fsynced, then renamed over the final name; the
    /// directory is fsynced afterwards so the entry survives a crash and shows up in listings.
    /// A failure part-way may leave the `.tmp` file behind; an `ext=.json` listing never
    /// reports it.
    pub fn write_submission_at(&self, payload: &Map<String, Value>, now: DateTime<Utc>) -> StoreResult<PathBuf> {
        let stem = submission_stem(payload, now);
        self.ensure_root()?;

        let mut name = format!("{stem}.json");
        let mut final_path = self.resolve_generated(&name)?;
        let mut counter = 0u32;
        while final_path.exists() {
            counter += 1;
            name = format!("{stem}.{counter:02}.json");
            final_path = self.resolve_generated(&name)?;
        }
        if counter > 0 {
            debug!(target: "store", "name collision on {stem}, using {name}");
        }

        let tmp_path = self.resolve_generated(&format!("{name}{TMP_SUFFIX}"))?;
        let bytes = serde_json::to_vec_pretty(payload).map_err(io::Error::from)?;
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(&bytes)?;
            f.flush()?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        sync_directory(final_path.parent().unwrap_or(self.root_path()))?;

        info!(target: "store", "saved {}", final_path.display());
        Ok(final_path)
    }
}
