//! Continuation-based directory enumeration.
//!
//! A [`DirectoryCursor`] wraps the backing store's native directory stream
//! together with the active name pattern. Each call to
//! [`DirectoryCursor::next_entry`] advances the same stream, so a listing is
//! delivered in the backing store's native order and reflects concurrent
//! changes only as far as the native stream does. Exhaustion is reported as
//! `Ok(None)`; the owner drops the cursor at that point.
//!
//! Patterns use NT wildcard syntax: `*` and `?` as usual, plus the DOS
//! variants `<` (as `*`), `>` (as `?`) and `"` (as `.`). Matching is
//! case-insensitive.

use crate::error::{ProviderError, ProviderResult};
use crate::info::DirInfo;
use crate::metadata;
use crate::path_mapper::names_equal;
use glob::{MatchOptions, Pattern};
use std::fs::ReadDir;
use std::path::{Path, PathBuf};
use tracing::trace;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled NT name pattern.
#[derive(Debug, Clone)]
pub struct NamePattern {
    /// `None` matches everything.
    glob: Option<Pattern>,
}

impl NamePattern {
    /// Pattern that matches every name.
    pub fn all() -> Self {
        Self { glob: None }
    }

    /// Compiles an NT pattern. Empty, `*` and `*.*` match everything.
    pub fn new(pattern: &str) -> ProviderResult<Self> {
        if pattern.is_empty() || pattern == "*" || pattern == "*.*" {
            return Ok(Self::all());
        }
        let mut translated = String::with_capacity(pattern.len());
        for c in pattern.chars() {
            match c {
                '*' | '<' => translated.push('*'),
                '?' | '>' => translated.push('?'),
                '"' => translated.push('.'),
                other => translated.push_str(&Pattern::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        Pattern::new(&translated)
            .map(|glob| Self { glob: Some(glob) })
            .map_err(|_| ProviderError::InvalidParameter("directory pattern"))
    }

    /// Whether `name` matches.
    pub fn matches(&self, name: &str) -> bool {
        self.glob
            .as_ref()
            .is_none_or(|glob| glob.matches_with(name, MATCH_OPTIONS))
    }
}

/// Enumeration state owned by a directory descriptor.
#[derive(Debug)]
pub struct DirectoryCursor {
    dir: PathBuf,
    pattern: NamePattern,
    stream: ReadDir,
}

impl DirectoryCursor {
    /// Opens a native directory stream on `dir`.
    pub fn open(dir: &Path, pattern: NamePattern) -> ProviderResult<Self> {
        let stream = std::fs::read_dir(dir)
            .map_err(|e| ProviderError::from_io("read_dir", &dir.display().to_string(), e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            pattern,
            stream,
        })
    }

    /// Opens a stream positioned just after the entry named `marker`.
    ///
    /// If no entry is named `marker` the cursor is already exhausted.
    pub fn open_after(dir: &Path, pattern: NamePattern, marker: &str) -> ProviderResult<Self> {
        let mut cursor = Self::open(dir, NamePattern::all())?;
        for entry in cursor.stream.by_ref() {
            let Ok(entry) = entry else { continue };
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| names_equal(name, marker))
            {
                break;
            }
        }
        cursor.pattern = pattern;
        Ok(cursor)
    }

    /// Advances to the next matching entry.
    ///
    /// Entries whose names are not valid Unicode or that vanish between
    /// listing and stat are skipped.
    pub fn next_entry(&mut self) -> ProviderResult<Option<DirInfo>> {
        for entry in self.stream.by_ref() {
            let entry = entry
                .map_err(|e| ProviderError::from_io("read_dir", &self.dir.display().to_string(), e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !self.pattern.matches(&name) {
                continue;
            }
            match metadata::query_path(&entry.path()) {
                Ok(info) => return Ok(Some(DirInfo { name, info })),
                Err(e) => {
                    trace!(name = %name, error = %e, "Skipping entry that could not be queried");
                }
            }
        }
        Ok(None)
    }
}
