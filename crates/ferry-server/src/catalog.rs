//! The set of files the server offers.

use std::fs;
use std::io;
use std::path::PathBuf;

use ferry_protocol::is_plain_filename;

/// A file the catalog can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// Source of downloadable files. The control handler only goes through this
/// trait, so tests can substitute a fixed listing.
pub trait FileCatalog: Send + Sync {
    /// Names in the order they should be listed.
    fn list(&self) -> io::Result<Vec<String>>;

    /// Resolve `name` to a readable file, or `None` if it is not offered.
    fn lookup(&self, name: &str) -> Option<CatalogEntry>;
}

/// Serves the regular files directly inside one directory.
pub struct DirCatalog {
    root: PathBuf,
}

impl DirCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileCatalog for DirCatalog {
    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Names that are not valid UTF-8 cannot be requested.
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn lookup(&self, name: &str) -> Option<CatalogEntry> {
        if !is_plain_filename(name) {
            return None;
        }
        let path = self.root.join(name);
        let meta = fs::metadata(&path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(CatalogEntry {
            path,
            size: meta.len(),
        })
    }
}
