//! Change detection against stored metadata

use crate::error::Result;
use crate::storage::{FileMeta, Lookup, Record, Store};

/// How a discovered file relates to the store
#[derive(Debug)]
pub enum FileChange {
    /// A live record with identical `(modified_at, size)` exists
    Unchanged,
    /// No live record at this path
    New,
    /// A live record exists but its metadata differs
    Modified(Box<Record>),
}

impl FileChange {
    pub fn needs_embedding(&self) -> bool {
        !matches!(self, FileChange::Unchanged)
    }
}

/// Classify `filepath` by comparing its metadata with the live record
///
/// Timestamps are compared exactly; any difference counts as a change.
pub fn detect_change(store: &Store, filepath: &str, meta: FileMeta) -> Result<FileChange> {
    let Some(record) = store.get(Lookup::LivePath(filepath))? else {
        return Ok(FileChange::New);
    };

    if record.modified_at == meta.modified_at && record.size == meta.size {
        Ok(FileChange::Unchanged)
    } else {
        Ok(FileChange::Modified(Box::new(record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewRecord, VECTOR_DIM};

    fn store_with(filepath: &str, modified_at: f64, size: u64) -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert(&NewRecord {
                filepath: filepath.to_string(),
                modified_at,
                size,
                vector: vec![0.0; VECTOR_DIM],
                hash: None,
            })
            .unwrap();
        store
    }

    #[test]
    fn test_unknown_path_is_new() {
        let store = Store::open_in_memory().unwrap();
        let change = detect_change(
            &store,
            "/p/a.jpg",
            FileMeta {
                modified_at: 1.0,
                size: 1,
            },
        )
        .unwrap();
        assert!(matches!(change, FileChange::New));
        assert!(change.needs_embedding());
    }

    #[test]
    fn test_identical_metadata_is_unchanged() {
        let store = store_with("/p/a.jpg", 1700000000.25, 42);
        let change = detect_change(
            &store,
            "/p/a.jpg",
            FileMeta {
                modified_at: 1700000000.25,
                size: 42,
            },
        )
        .unwrap();
        assert!(!change.needs_embedding());
    }

    #[test]
    fn test_any_metadata_difference_is_modified() {
        let store = store_with("/p/a.jpg", 1700000000.25, 42);

        let newer = FileMeta {
            modified_at: 1700000000.5,
            size: 42,
        };
        assert!(matches!(
            detect_change(&store, "/p/a.jpg", newer).unwrap(),
            FileChange::Modified(_)
        ));

        let resized = FileMeta {
            modified_at: 1700000000.25,
            size: 43,
        };
        assert!(matches!(
            detect_change(&store, "/p/a.jpg", resized).unwrap(),
            FileChange::Modified(_)
        ));
    }

    #[test]
    fn test_soft_deleted_record_is_new() {
        let store = store_with("/p/a.jpg", 1.0, 1);
        store.flag_indexing_under(std::path::Path::new("/p")).unwrap();
        store
            .soft_delete_indexing_under(std::path::Path::new("/p"))
            .unwrap();

        let change = detect_change(
            &store,
            "/p/a.jpg",
            FileMeta {
                modified_at: 1.0,
                size: 1,
            },
        )
        .unwrap();
        assert!(matches!(change, FileChange::New));
    }
}
