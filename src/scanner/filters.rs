//! Inclusion and exclusion rules shared by indexing and search

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Processed formats, always indexed
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// RAW formats, indexed only with raw support and no processed sibling
pub const RAW_EXTENSIONS: &[&str] = &["arw", "cr2"];

/// Directory names skipped when none are configured
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["@eaDir", "node_modules", ".git"];

/// Lower-cased extension of a path, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn is_processed_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext)
}

pub fn is_raw_extension(ext: &str) -> bool {
    RAW_EXTENSIONS.contains(&ext)
}

/// Directory exclusion by name
///
/// A path is excluded when any directory component below the walk root has
/// one of the configured names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeDirs {
    names: HashSet<String>,
}

impl ExcludeDirs {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a single directory name is excluded
    pub fn is_excluded_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Whether `path` lies inside an excluded directory below `root`
    pub fn excludes(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            // the last component is the file itself
            if components.peek().is_none() {
                break;
            }
            if let Component::Normal(name) = component {
                if name.to_str().is_some_and(|n| self.is_excluded_name(n)) {
                    return true;
                }
            }
        }
        false
    }
}

impl Default for ExcludeDirs {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_DIRS.iter().copied())
    }
}

/// File inclusion by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageFilter {
    /// Also accept RAW formats
    pub raw_support: bool,
}

impl ImageFilter {
    pub fn new(raw_support: bool) -> Self {
        Self { raw_support }
    }

    /// Whether a file name has an indexable extension
    pub fn accepts(&self, path: &Path) -> bool {
        match extension_of(path) {
            Some(ext) => {
                is_processed_extension(&ext) || (self.raw_support && is_raw_extension(&ext))
            }
            None => false,
        }
    }

    /// Whether `path` is a RAW file shadowed by a processed sibling on disk
    ///
    /// `siblings` caches the listing of the last directory looked at, so a
    /// walk lists each directory at most once per visit.
    pub fn is_raw_companion(&self, path: &Path, siblings: &mut ProcessedStems) -> bool {
        let is_raw = extension_of(path).is_some_and(|ext| is_raw_extension(&ext));
        if !self.raw_support || !is_raw {
            return false;
        }
        siblings.has_processed_sibling(path)
    }
}

/// File stems of the processed images in one directory
#[derive(Debug, Default)]
pub struct ProcessedStems {
    dir: Option<PathBuf>,
    stems: HashSet<OsString>,
}

impl ProcessedStems {
    /// Whether a same-named file with a processed extension exists next to `path`
    pub fn has_processed_sibling(&mut self, path: &Path) -> bool {
        let (Some(parent), Some(stem)) = (path.parent(), path.file_stem()) else {
            return false;
        };
        if self.dir.as_deref() != Some(parent) {
            self.load(parent);
        }
        self.stems.contains(stem)
    }

    fn load(&mut self, dir: &Path) {
        self.stems.clear();
        self.dir = Some(dir.to_path_buf());

        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.filter_map(|entry| entry.ok()) {
            let sibling = entry.path();
            if !extension_of(&sibling).is_some_and(|ext| is_processed_extension(&ext)) {
                continue;
            }
            if let Some(stem) = sibling.file_stem() {
                self.stems.insert(stem.to_os_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_accepts_extensions_case_insensitively() {
        let filter = ImageFilter::new(false);
        assert!(filter.accepts(Path::new("/p/cat.JPG")));
        assert!(filter.accepts(Path::new("/p/tree.webp")));
        assert!(!filter.accepts(Path::new("/p/notes.txt")));
        assert!(!filter.accepts(Path::new("/p/raw.CR2")));
        assert!(!filter.accepts(Path::new("/p/no_extension")));

        let filter = ImageFilter::new(true);
        assert!(filter.accepts(Path::new("/p/raw.CR2")));
        assert!(filter.accepts(Path::new("/p/raw.arw")));
    }

    #[test]
    fn test_excludes_only_below_root() {
        let exclude = ExcludeDirs::default();
        let root = Path::new("/home/me/node_modules/photos");
        assert!(!exclude.excludes(root, &root.join("cat.jpg")));
        assert!(exclude.excludes(root, &root.join(".git").join("cat.jpg")));
        assert!(exclude.excludes(root, &root.join("a").join("@eaDir").join("b").join("c.jpg")));
        // a file that merely shares the name is not a directory
        assert!(!exclude.excludes(root, &root.join("node_modules")));
    }

    #[test]
    fn test_raw_companion_detection() {
        let temp = TempDir::new().unwrap();
        let raw = temp.path().join("DSC001.ARW");
        let lonely_raw = temp.path().join("DSC002.arw");
        std::fs::write(&raw, b"raw").unwrap();
        std::fs::write(&lonely_raw, b"raw").unwrap();
        std::fs::write(temp.path().join("DSC001.JPG"), b"jpg").unwrap();

        let filter = ImageFilter::new(true);
        let mut siblings = ProcessedStems::default();
        assert!(filter.is_raw_companion(&raw, &mut siblings));
        assert!(!filter.is_raw_companion(&lonely_raw, &mut siblings));
        assert!(!filter.is_raw_companion(&temp.path().join("DSC001.JPG"), &mut siblings));

        let disabled = ImageFilter::new(false);
        assert!(!disabled.is_raw_companion(&raw, &mut siblings));
    }

    #[test]
    fn test_sibling_listing_is_reused_within_a_directory() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("a");
        let second = temp.path().join("b");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(first.join("IMG1.jpeg"), b"jpg").unwrap();
        std::fs::write(second.join("IMG1.png"), b"png").unwrap();

        let mut siblings = ProcessedStems::default();
        assert!(siblings.has_processed_sibling(&first.join("IMG1.cr2")));

        // files created after the listing are not seen until the directory changes
        std::fs::write(first.join("IMG2.jpg"), b"jpg").unwrap();
        assert!(!siblings.has_processed_sibling(&first.join("IMG2.cr2")));

        assert!(siblings.has_processed_sibling(&second.join("IMG1.arw")));
        assert!(!siblings.has_processed_sibling(&second.join("IMG2.arw")));
        assert!(siblings.has_processed_sibling(&first.join("IMG2.cr2")));
    }
}
