use std::cmp::Ordering;
use std::fs;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::warn;

use super::Store;

pub const DEFAULT_LIMIT: usize = 200;

/// Listing sort key. Unrecognized keys fall back to `Date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Date,
    Name,
    Size,
}

impl SortKey {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => SortKey::Name,
            "size" => SortKey::Size,
            _ => SortKey::Date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Only `desc` sorts descending; anything else is ascending.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") { SortOrder::Desc } else { SortOrder::Asc }
    }
}

/// Per-request listing filter. Predicates are applied in field order, cheapest first.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub pattern: Option<glob::Pattern>,
    /// Case-insensitive suffix, e.g. `.json`.
    pub ext: Option<String>,
    pub min_size: u64,
    pub max_size: Option<u64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub sort: SortKey,
    pub order: SortOrder,
    pub limit: usize,
    pub offset: usize,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            pattern: None,
            ext: None,
            min_size: 0,
            max_size: None,
            since: None,
            until: None,
            sort: SortKey::Date,
            order: SortOrder::Desc,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl FilterSpec {
    fn matches_name(&self, name: &str) -> bool {
        if let Some(p) = &self.pattern {
            if !p.matches(name) { return false; }
        }
        if let Some(ext) = &self.ext {
            if !name.to_lowercase().ends_with(&ext.to_lowercase()) { return false; }
        }
        true
    }

    fn matches_meta(&self, size: u64, mtime: DateTime<Utc>) -> bool {
        if size < self.min_size { return false; }
        if let Some(max) = self.max_size {
            if size > max { return false; }
        }
        if let Some(since) = self.since {
            if mtime < since { return false; }
        }
        if let Some(until) = self.until {
            if mtime > until { return false; }
        }
        true
    }
}

/// Parse a `since`/`until` value: RFC 3339, a naive date-time (taken as UTC), or a bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

fn serialize_mtime<S: Serializer>(mtime: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&mtime.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// Metadata view of one stored file, computed per listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
    #[serde(serialize_with = "serialize_mtime")]
    pub mtime: DateTime<Utc>,
    pub url: String,
}

impl FileRecord {
    fn new(name: String, size: u64, mtime: DateTime<Utc>) -> Self {
        let url = format!("/api/results/file/{}", urlencoding::encode(&name));
        Self { name, size, mtime, url }
    }

    /// `mtime` at seconds precision, as rendered in JSON and HTML listings.
    pub fn mtime_display(&self) -> String {
        self.mtime.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

fn compare(a: &FileRecord, b: &FileRecord, key: SortKey, order: SortOrder) -> Ordering {
    let by_key = match key {
        SortKey::Date => a.mtime.cmp(&b.mtime),
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Size => a.size.cmp(&b.size),
    };
    let by_key = if order == SortOrder::Desc { by_key.reverse() } else { by_key };
    by_key.then_with(|| a.name.cmp(&b.name))
}

impl Store {
    /// Scan the store root (non-recursive), filter, sort, then window by `offset`/`limit`.
    ///
    /// Never fails: a missing or unreadable root yields an empty listing after a
    /// create-if-absent attempt. Only regular files are considered; symlinks are skipped.
    pub fn list(&self, spec: &FilterSpec) -> Vec<FileRecord> {
        if let Err(e) = self.ensure_root() {
            warn!(target: "store", "cannot create store root {}: {e}", self.root_path().display());
        }
        let entries = match fs::read_dir(self.root_path()) {
            Ok(rd) => rd,
            Err(e) => {
                warn!(target: "store", "cannot read store root {}: {e}", self.root_path().display());
                return Vec::new();
            }
        };

        let mut files: Vec<FileRecord> = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) { continue; }
            let Ok(name) = entry.file_name().into_string() else { continue; };
            if !spec.matches_name(&name) { continue; }
            let Ok(meta) = entry.metadata() else { continue; };
            let Ok(modified) = meta.modified() else { continue; };
            let mtime = DateTime::<Utc>::from(modified);
            if !spec.matches_meta(meta.len(), mtime) { continue; }
            files.push(FileRecord::new(name, meta.len(), mtime));
        }

        files.sort_by(|a, b| compare(a, b, spec.sort, spec.order));
        files.into_iter().skip(spec.offset).take(spec.limit).collect()
    }
}
