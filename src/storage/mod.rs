//! Storage layer for pixseek
//!
//! Persists one record per indexed image path in a single SQLite file and
//! provides the offline merge tool that shares its schema.

pub mod database;
pub mod merge;
pub mod record;

use std::path::{Path, PathBuf};

pub use database::{Lookup, Store, StoreStats, STORE_VERSION};
pub use merge::{InputSummary, MergeOptions, MergeReport, StoreMerger};
pub use record::{FileMeta, NewRecord, Record, RecordStatus, StoredVector, VECTOR_DIM};

/// File name of the store inside the data directory
pub const DB_FILE_NAME: &str = "db.sqlite3";

/// Default store location inside a data directory
pub fn db_path_in(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE_NAME)
}

/// Format size as human-readable string
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_db_path_in() {
        assert_eq!(
            db_path_in(Path::new("/data/pixseek")),
            PathBuf::from("/data/pixseek").join("db.sqlite3")
        );
    }
}
