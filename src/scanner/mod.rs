//! Directory tree walking for indexing
//!
//! The same walk (same filters, same order) backs both the indexing pipeline
//! and the concurrent counting pass that sizes the progress bar.

pub mod filters;

pub use filters::{
    ExcludeDirs, ImageFilter, ProcessedStems, DEFAULT_EXCLUDED_DIRS, IMAGE_EXTENSIONS,
    RAW_EXTENSIONS,
};

use crate::storage::FileMeta;
use filters::{extension_of, is_processed_extension};
use std::cmp::Ordering;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

/// A candidate file with its metadata fetched at discovery time
#[derive(Debug)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub meta: io::Result<FileMeta>,
}

/// Walks a tree yielding indexable image files
#[derive(Debug, Clone, Default)]
pub struct TreeScanner {
    exclude: ExcludeDirs,
    filter: ImageFilter,
}

impl TreeScanner {
    pub fn new(exclude: ExcludeDirs, filter: ImageFilter) -> Self {
        Self { exclude, filter }
    }

    pub fn exclude_dirs(&self) -> &ExcludeDirs {
        &self.exclude
    }

    /// Lazily walk `root`, fetching metadata per entry
    ///
    /// Each call starts a fresh walk. Walk errors (unreadable directories,
    /// broken links) are logged and skipped.
    pub fn walk<'a>(&'a self, root: &Path) -> impl Iterator<Item = ScanEntry> + 'a {
        self.candidates(root).map(|entry| {
            let path = entry.into_path();
            let meta = read_meta(&path);
            ScanEntry { path, meta }
        })
    }

    /// Count the files `walk` would yield, reporting every `every` matches
    ///
    /// `on_count` is called with the running total every `every` matches and
    /// once more with the final total.
    pub fn count<F>(&self, root: &Path, every: u64, mut on_count: F) -> u64
    where
        F: FnMut(u64),
    {
        let every = every.max(1);
        let mut count = 0u64;
        for _ in self.candidates(root) {
            count += 1;
            if count % every == 0 {
                on_count(count);
            }
        }
        on_count(count);
        count
    }

    fn candidates<'a>(&'a self, root: &Path) -> impl Iterator<Item = DirEntry> + 'a {
        let mut siblings = ProcessedStems::default();
        WalkDir::new(root)
            .follow_links(false)
            .sort_by(compare_entries)
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.exclude.is_excluded_name(&entry.file_name().to_string_lossy())
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable path: {}", e);
                    None
                }
            })
            .filter(move |entry| self.is_candidate(entry, &mut siblings))
    }

    fn is_candidate(&self, entry: &DirEntry, siblings: &mut ProcessedStems) -> bool {
        let path = entry.path();
        if entry.file_type().is_dir() || !self.filter.accepts(path) {
            return false;
        }
        // symlinks count when they point at a regular file
        if !entry.file_type().is_file() && !path.is_file() {
            return false;
        }
        if self.filter.is_raw_companion(path, siblings) {
            trace!("Skipping RAW companion {}", path.display());
            return false;
        }
        true
    }
}

/// Processed raster formats first, then by name
fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    let rank = |name: &OsStr| {
        let processed = extension_of(Path::new(name)).is_some_and(|ext| is_processed_extension(&ext));
        !processed
    };
    rank(a.file_name())
        .cmp(&rank(b.file_name()))
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Modification time (seconds since the epoch, negative before it) and size
pub fn read_meta(path: &Path) -> io::Result<FileMeta> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    let modified_at = match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    };
    Ok(FileMeta {
        modified_at,
        size: metadata.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x").unwrap();
    }

    fn names(scanner: &TreeScanner, root: &Path) -> Vec<String> {
        scanner
            .walk(root)
            .map(|e| {
                e.path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn test_walk_filters_and_excludes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("a.jpg"));
        touch(&root.join("notes.txt"));
        touch(&root.join("sub").join("b.PNG"));
        touch(&root.join("node_modules").join("c.jpg"));
        touch(&root.join("sub").join(".git").join("d.jpg"));
        touch(&root.join("raw.cr2"));

        let scanner = TreeScanner::default();
        let mut found = names(&scanner, root);
        found.sort();
        assert_eq!(
            found,
            vec!["a.jpg".to_string(), format!("sub{}b.PNG", std::path::MAIN_SEPARATOR)]
        );
    }

    #[test]
    fn test_processed_formats_sort_first() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("a.arw"));
        touch(&root.join("b.jpg"));
        touch(&root.join("c.cr2"));

        let scanner = TreeScanner::new(ExcludeDirs::default(), ImageFilter::new(true));
        assert_eq!(names(&scanner, root), vec!["b.jpg", "a.arw", "c.cr2"]);
    }

    #[test]
    fn test_raw_companion_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("IMG_1.CR2"));
        touch(&root.join("IMG_1.jpg"));
        touch(&root.join("IMG_2.cr2"));

        let scanner = TreeScanner::new(ExcludeDirs::default(), ImageFilter::new(true));
        assert_eq!(names(&scanner, root), vec!["IMG_1.jpg", "IMG_2.cr2"]);
    }

    #[test]
    fn test_walk_reports_metadata() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.webp");
        std::fs::write(&path, b"12345").unwrap();

        let scanner = TreeScanner::default();
        let entries: Vec<_> = scanner.walk(temp.path()).collect();
        assert_eq!(entries.len(), 1);
        let meta = entries[0].meta.as_ref().unwrap();
        assert_eq!(meta.size, 5);
        assert!(meta.modified_at > 0.0);
    }

    #[test]
    fn test_count_reports_periodically() {
        let temp = TempDir::new().unwrap();
        for i in 0..5 {
            touch(&temp.path().join(format!("{}.jpg", i)));
        }
        touch(&temp.path().join("skip.txt"));

        let scanner = TreeScanner::default();
        let mut updates = Vec::new();
        let total = scanner.count(temp.path(), 2, |n| updates.push(n));
        assert_eq!(total, 5);
        assert_eq!(updates, vec![2, 4, 5]);
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        let temp = TempDir::new().unwrap();
        let scanner = TreeScanner::default();
        assert_eq!(scanner.walk(&temp.path().join("absent")).count(), 0);
    }
}
