//! Deterministic document paths and best-effort discovery.
//!
//! Path resolution is a two-phase contract:
//!
//! 1. [`PathResolver::resolve`] - a pure function from record attributes to
//!    the canonical location `base/YYYY/MM/DD/{seq}_{YYYYMMDD}_{key}.xml`.
//! 2. [`PathResolver::discover`] - a best-effort search over existing files,
//!    because an out-of-band compaction step may relocate documents into
//!    numbered sub-folders once a per-day limit is exceeded. Without this
//!    search, relocated documents would be re-downloaded.
//!
//! Discovery order: deterministic path, then exact name in the day directory
//! (non-recursive), then exact name recursively, then any file whose name
//! contains the key.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, instrument, warn};

use crate::store::{KEY_LENGTH, date_key_of};

/// Extension of every written document.
pub const DOCUMENT_EXTENSION: &str = "xml";

/// The canonical directory and file path for one record's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Day directory the document belongs in.
    pub dir: PathBuf,
    /// Full file path inside [`ResolvedPath::dir`].
    pub path: PathBuf,
}

/// Maps record attributes to filesystem locations under a base directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_dir: PathBuf,
}

impl PathResolver {
    /// Creates a resolver rooted at the given base directory.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory documents are written under.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Computes the canonical path for a record's document.
    ///
    /// Pure function of its inputs: the same key, date and sequence number
    /// always yield the same path. The key is normalized to its canonical
    /// length first so names stay stable across harvester versions.
    #[must_use]
    pub fn resolve(&self, key: &str, date: NaiveDate, sequence_number: &str) -> ResolvedPath {
        let key = normalize_key(key);
        let dir = self
            .base_dir
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(date.format("%d").to_string());
        let name = format!(
            "{sequence_number}_{date_key}_{key}.{DOCUMENT_EXTENSION}",
            date_key = date_key_of(date)
        );
        let path = dir.join(name);
        ResolvedPath { dir, path }
    }

    /// Searches for an already-existing document for the record.
    ///
    /// Returns the first match in deterministic order, or `None` when no
    /// file exists yet anywhere under the day directory.
    #[instrument(skip(self), fields(key = %key))]
    #[must_use]
    pub fn discover(&self, key: &str, date: NaiveDate, sequence_number: &str) -> Option<PathBuf> {
        let key = normalize_key(key);
        let resolved = self.resolve(&key, date, sequence_number);

        if resolved.path.is_file() {
            return Some(resolved.path);
        }
        if !resolved.dir.is_dir() {
            return None;
        }

        let wanted_name = resolved.path.file_name()?.to_string_lossy().into_owned();

        // Exact name directly in the day directory.
        if let Ok(entries) = fs::read_dir(&resolved.dir) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy() == wanted_name
                    && entry.path().is_file()
                {
                    return Some(entry.path());
                }
            }
        }

        // Exact name in relocated sub-folders, then name containing the key.
        let candidates = scan_documents(&resolved.dir);
        if let Some(found) = candidates
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == wanted_name))
        {
            debug!(path = %found.display(), "document found in relocated sub-folder");
            return Some(found.clone());
        }
        candidates
            .into_iter()
            .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy().contains(&key)))
    }
}

/// Normalizes a record key to its canonical fixed length.
///
/// Overlong keys are truncated; short keys are kept as-is. Both cases are
/// logged because they indicate a malformed harvest upstream.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    let key = key.trim();
    if key.len() > KEY_LENGTH {
        warn!(len = key.len(), "record key longer than canonical length; truncating");
        key.chars().take(KEY_LENGTH).collect()
    } else {
        if key.len() < KEY_LENGTH {
            warn!(len = key.len(), "record key shorter than canonical length");
        }
        key.to_string()
    }
}

/// Extracts the record key from a document file name.
///
/// Accepts the canonical `{seq}_{date}_{key}.xml` shape as well as a bare
/// `{key}.xml`; returns `None` when no canonical-length key is present.
#[must_use]
pub fn parse_key_from_name(file_name: &str) -> Option<String> {
    let stem = file_name
        .strip_suffix(&format!(".{DOCUMENT_EXTENSION}"))
        .or_else(|| file_name.strip_suffix(&format!(".{}", DOCUMENT_EXTENSION.to_uppercase())))?;

    let candidate = stem.rsplit('_').next()?;
    (candidate.len() == KEY_LENGTH && candidate.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| candidate.to_string())
}

/// Recursively lists every document file under a directory.
///
/// Unreadable directories are logged and skipped; the scan never fails.
#[must_use]
pub fn scan_documents(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %current.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
            {
                found.push(path);
            }
        }
    }

    found
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(fill: char) -> String {
        fill.to_string().repeat(KEY_LENGTH)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let resolver = PathResolver::new("/data/out");
        let a = resolver.resolve(&key('1'), date(), "9001");
        let b = resolver.resolve(&key('1'), date(), "9001");
        assert_eq!(a, b);
    }

    #[test]
    fn test_resolve_layout_and_name() {
        let resolver = PathResolver::new("/data/out");
        let resolved = resolver.resolve(&key('1'), date(), "9001");

        assert_eq!(resolved.dir, Path::new("/data/out/2024/03/05"));
        assert_eq!(
            resolved.path.file_name().unwrap().to_string_lossy(),
            format!("9001_20240305_{}.xml", key('1'))
        );
    }

    #[test]
    fn test_normalize_key_truncates_overlong() {
        let long = key('2') + "extra";
        assert_eq!(normalize_key(&long), key('2'));
    }

    #[test]
    fn test_normalize_key_keeps_short() {
        assert_eq!(normalize_key("abc"), "abc");
    }

    #[test]
    fn test_parse_key_from_canonical_name() {
        let name = format!("9001_20240305_{}.xml", key('3'));
        assert_eq!(parse_key_from_name(&name), Some(key('3')));
    }

    #[test]
    fn test_parse_key_from_bare_key_name() {
        let name = format!("{}.xml", key('4'));
        assert_eq!(parse_key_from_name(&name), Some(key('4')));
    }

    #[test]
    fn test_parse_key_rejects_non_documents_and_short_keys() {
        assert_eq!(parse_key_from_name("notes.txt"), None);
        assert_eq!(parse_key_from_name("1_20240305_short.xml"), None);
    }

    #[test]
    fn test_discover_finds_deterministic_path() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path());
        let resolved = resolver.resolve(&key('5'), date(), "1");

        fs::create_dir_all(&resolved.dir).unwrap();
        fs::write(&resolved.path, "<xml/>").unwrap();

        assert_eq!(
            resolver.discover(&key('5'), date(), "1"),
            Some(resolved.path)
        );
    }

    #[test]
    fn test_discover_finds_relocated_file_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path());
        let resolved = resolver.resolve(&key('6'), date(), "1");

        // Compaction moved the file into a numbered sub-folder.
        let sub = resolved.dir.join("2");
        fs::create_dir_all(&sub).unwrap();
        let relocated = sub.join(resolved.path.file_name().unwrap());
        fs::write(&relocated, "<xml/>").unwrap();

        assert_eq!(
            resolver.discover(&key('6'), date(), "1"),
            Some(relocated)
        );
    }

    #[test]
    fn test_discover_falls_back_to_key_substring() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path());
        let resolved = resolver.resolve(&key('7'), date(), "1");

        // Historical variant used a different sequence prefix.
        fs::create_dir_all(&resolved.dir).unwrap();
        let variant = resolved.dir.join(format!("0_19990101_{}.xml", key('7')));
        fs::write(&variant, "<xml/>").unwrap();

        assert_eq!(resolver.discover(&key('7'), date(), "1"), Some(variant));
    }

    #[test]
    fn test_discover_none_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path());
        assert_eq!(resolver.discover(&key('8'), date(), "1"), None);
    }

    #[test]
    fn test_scan_documents_recursive_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("a/one.xml"), "x").unwrap();
        fs::write(tmp.path().join("a/b/two.XML"), "x").unwrap();
        fs::write(tmp.path().join("a/skip.txt"), "x").unwrap();

        let mut names: Vec<String> = scan_documents(tmp.path())
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["one.xml", "two.XML"]);
    }
}
