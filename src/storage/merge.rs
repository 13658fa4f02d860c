//! Offline merge of two image stores into a fresh one
//!
//! Rows are keyed by normalized filepath. On a conflict the incoming row wins
//! when it is soft-deleted, or when the kept row is live and the incoming one
//! was modified later.

use crate::error::{PixseekError, Result};
use crate::storage::database::Store;
use ahash::AHashMap;
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Component, Path, PathBuf};

/// Merge tuning knobs
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Rows inserted per transaction
    pub batch_size: usize,
    /// Overwrite an existing output file
    pub force: bool,
    /// Only report what would be merged
    pub dry_run: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            force: false,
            dry_run: false,
        }
    }
}

/// Outcome of a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub version: i64,
    pub first_rows: usize,
    pub second_rows: usize,
    pub merged_rows: usize,
    pub conflicts_resolved: usize,
    pub deleted_preserved: usize,
}

/// Version and size information about one input store
#[derive(Debug, Clone)]
pub struct InputSummary {
    pub path: PathBuf,
    pub version: i64,
    pub rows: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
struct MergeRow {
    deleted: bool,
    filepath: String,
    modified_at: f64,
    size: i64,
    vector: Vec<u8>,
    hash: Option<String>,
}

/// Merges two stores that share a schema version
pub struct StoreMerger {
    first: PathBuf,
    second: PathBuf,
    output: PathBuf,
    options: MergeOptions,
}

impl StoreMerger {
    pub fn new(first: PathBuf, second: PathBuf, output: PathBuf, options: MergeOptions) -> Self {
        Self {
            first,
            second,
            output,
            options,
        }
    }

    /// Check both inputs exist, pass an integrity check and share a version
    pub fn validate(&self) -> Result<i64> {
        for path in [&self.first, &self.second] {
            if !path.exists() {
                return Err(PixseekError::Merge(format!(
                    "Database not found: {}",
                    path.display()
                )));
            }
            let conn = open_input(path)?;
            let check: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            if check != "ok" {
                return Err(PixseekError::Merge(format!(
                    "Database integrity check failed: {}",
                    path.display()
                )));
            }
        }

        let first = read_version(&open_input(&self.first)?)?;
        let second = read_version(&open_input(&self.second)?)?;
        if first != second {
            return Err(PixseekError::Merge(format!(
                "Database version mismatch: {} vs {}",
                first, second
            )));
        }
        Ok(first)
    }

    /// Describe both inputs without merging
    pub fn check_versions(&self) -> Result<Vec<InputSummary>> {
        [&self.first, &self.second]
            .into_iter()
            .map(|path| {
                let conn = open_input(path)?;
                let rows: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
                let size_bytes = std::fs::metadata(path)
                    .map_err(|e| PixseekError::io(e, format!("Failed to stat {:?}", path)))?
                    .len();
                Ok(InputSummary {
                    path: path.clone(),
                    version: read_version(&conn)?,
                    rows: rows as usize,
                    size_bytes,
                })
            })
            .collect()
    }

    /// Run the merge
    pub fn merge(&self) -> Result<MergeReport> {
        let version = self.validate()?;
        let mut report = MergeReport {
            version,
            ..MergeReport::default()
        };

        if self.output.exists() && !self.options.force && !self.options.dry_run {
            return Err(PixseekError::Merge(format!(
                "Output file '{}' already exists; use --force to overwrite",
                self.output.display()
            )));
        }

        let mut order: Vec<MergeRow> = Vec::new();
        let mut index: AHashMap<String, usize> = AHashMap::new();

        let first_rows = self.collect_rows(&self.first, &mut order, &mut index, &mut report)?;
        let second_rows = self.collect_rows(&self.second, &mut order, &mut index, &mut report)?;
        report.first_rows = first_rows;
        report.second_rows = second_rows;
        report.merged_rows = order.len();

        if self.options.dry_run {
            tracing::info!("Dry run: {} rows would be merged", report.merged_rows);
            return Ok(report);
        }

        if self.output.exists() {
            std::fs::remove_file(&self.output).map_err(|e| {
                PixseekError::io(e, format!("Failed to remove {:?}", self.output))
            })?;
        }

        let store = Store::open(&self.output)?;
        self.write_rows(&store, &order)?;
        validate_output(store.connection())?;
        store.close()?;

        tracing::info!(
            "Merged {} rows ({} conflicts resolved, {} deleted preserved)",
            report.merged_rows,
            report.conflicts_resolved,
            report.deleted_preserved
        );
        Ok(report)
    }

    fn collect_rows(
        &self,
        path: &Path,
        order: &mut Vec<MergeRow>,
        index: &mut AHashMap<String, usize>,
        report: &mut MergeReport,
    ) -> Result<usize> {
        let conn = open_input(path)?;
        let hash_column = if has_column(&conn, "images", "hash")? {
            "hash"
        } else {
            "NULL"
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT deleted, filepath, modified_at, size, vector, {hash_column}
             FROM images ORDER BY id"
        ))?;
        let mut rows = stmt.query([])?;
        let mut seen = 0;

        while let Some(row) = rows.next()? {
            let deleted: Option<bool> = row.get(0)?;
            let incoming = MergeRow {
                deleted: deleted.is_some(),
                filepath: row.get(1)?,
                modified_at: row.get(2)?,
                size: row.get(3)?,
                vector: row.get(4)?,
                hash: row.get(5)?,
            };
            seen += 1;

            let key = normalize_path(&incoming.filepath);
            match index.get(&key) {
                Some(&slot) => {
                    let existing = &order[slot];
                    if incoming.deleted
                        || (!existing.deleted && incoming.modified_at > existing.modified_at)
                    {
                        report.conflicts_resolved += 1;
                        if incoming.deleted {
                            report.deleted_preserved += 1;
                        }
                        order[slot] = incoming;
                    }
                }
                None => {
                    index.insert(key, order.len());
                    order.push(incoming);
                }
            }
        }

        tracing::debug!("Read {} rows from {}", seen, path.display());
        Ok(seen)
    }

    fn write_rows(&self, store: &Store, rows: &[MergeRow]) -> Result<()> {
        let conn = store.connection();
        for batch in rows.chunks(self.options.batch_size.max(1)) {
            let tx = conn.unchecked_transaction()?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO images (deleted, filepath, modified_at, size, vector, hash, indexing)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                )?;
                for row in batch {
                    insert.execute(params![
                        row.deleted.then_some(true),
                        &row.filepath,
                        row.modified_at,
                        row.size,
                        &row.vector,
                        &row.hash,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }
}

/// Open an existing input without creating it; WAL stores need write access
/// to their shared-memory file even when only read
fn open_input(path: &Path) -> Result<Connection> {
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

fn read_version(conn: &Connection) -> Result<i64> {
    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'db_version')",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(1);
    }
    let version: Option<i64> = conn
        .query_row("SELECT version FROM db_version LIMIT 1", [], |row| row.get(0))
        .ok();
    Ok(version.unwrap_or(1))
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn validate_output(conn: &Connection) -> Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
    let duplicates: i64 = conn.query_row(
        "SELECT COUNT(*) FROM (
            SELECT filepath FROM images WHERE deleted IS NULL
            GROUP BY filepath HAVING COUNT(*) > 1
        )",
        [],
        |row| row.get(0),
    )?;

    if count == 0 {
        return Err(PixseekError::Merge("merged database is empty".to_string()));
    }
    if duplicates > 0 {
        return Err(PixseekError::Merge(format!(
            "merged database has {} duplicate live filepaths",
            duplicates
        )));
    }
    Ok(())
}

/// Lexically normalize a path: drop `.`, fold `..`, collapse separators
pub fn normalize_path(filepath: &str) -> String {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in Path::new(filepath).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return ".".to_string();
    }
    parts
        .iter()
        .collect::<PathBuf>()
        .to_string_lossy()
        .into_owned()
}
