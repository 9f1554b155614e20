//! Playlist catalog
//!
//! Ordered, circular list of item locations built once from a directory
//! snapshot. Order is the lexical order of the location URI so a given folder
//! always plays back the same way.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// One playable location
///
/// Immutable once listed; the sequencer only ever borrows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    path: PathBuf,
    uri: String,
}

impl PlaylistEntry {
    /// Entry for a file path; absolute paths get a `file://` URI
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let uri = Url::from_file_path(&path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| path.to_string_lossy().into_owned());
        Self { path, uri }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location identifier (the sort key)
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Percent-decoded location for operator messages
    pub fn display_location(&self) -> String {
        Url::parse(&self.uri)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .map(|path| format!("file://{}", path.display()))
            .unwrap_or_else(|| self.uri.clone())
    }
}

impl fmt::Display for PlaylistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Logical position in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor(usize);

impl Cursor {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ordered, non-empty, circular playlist
#[derive(Debug, Clone)]
pub struct Catalog {
    folder: PathBuf,
    entries: Vec<PlaylistEntry>,
}

impl Catalog {
    /// List the regular files of `folder`, sorted by location
    ///
    /// Symlinks are followed; entries that cannot be stat'ed are skipped.
    ///
    /// # Errors
    /// - `Unreadable` if the folder cannot be opened
    /// - `EmptyDirectory` if it holds no regular file
    pub fn build(folder: &Path) -> Result<Self> {
        let folder = folder.canonicalize().map_err(|source| Error::Unreadable {
            path: folder.to_path_buf(),
            source,
        })?;

        let dir = std::fs::read_dir(&folder).map_err(|source| Error::Unreadable {
            path: folder.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for dirent in dir {
            let dirent = match dirent {
                Ok(d) => d,
                Err(e) => {
                    debug!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };

            let path = dirent.path();
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => entries.push(PlaylistEntry::from_path(path)),
                Ok(_) => {}
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }

        let catalog = Self::from_entries(&folder, entries)?;
        info!(
            "Catalog built from {}: {} entries",
            catalog.folder.display(),
            catalog.len()
        );
        Ok(catalog)
    }

    /// Catalog from already-resolved entries (sorted here)
    pub fn from_entries(folder: &Path, mut entries: Vec<PlaylistEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::EmptyDirectory {
                path: folder.to_path_buf(),
            });
        }
        entries.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(Self {
            folder: folder.to_path_buf(),
            entries,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn first(&self) -> Cursor {
        Cursor(0)
    }

    /// Cursor at `index`, if in range
    pub fn cursor_at(&self, index: usize) -> Option<Cursor> {
        (index < self.entries.len()).then_some(Cursor(index))
    }

    /// Logical successor, wrapping to the first entry after the last
    pub fn advance(&self, cursor: Cursor) -> Cursor {
        Cursor((cursor.0 + 1) % self.entries.len())
    }

    /// Logical predecessor, wrapping to the last entry before the first
    pub fn retreat(&self, cursor: Cursor) -> Cursor {
        if cursor.0 == 0 {
            Cursor(self.entries.len() - 1)
        } else {
            Cursor(cursor.0 - 1)
        }
    }

    pub fn get(&self, cursor: Cursor) -> &PlaylistEntry {
        &self.entries[cursor.0]
    }
}
