//! SQLite image store with forward-only migrations
//!
//! One `images` row per filesystem path ever indexed. Writes open an implicit
//! transaction that stays open until [`Store::commit`], so callers decide the
//! batch boundaries.

use crate::error::{PixseekError, Result};
use crate::storage::record::{
    decode_vector, encode_vector, NewRecord, Record, RecordStatus, StoredVector, VECTOR_DIM,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Schema version written by this release
pub const STORE_VERSION: i64 = 4;

const RECORD_COLUMNS: &str = "id, filepath, modified_at, size, vector, hash, deleted, indexing";

/// Criteria for [`Store::get`]
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Id(i64),
    /// The live record at a path
    LivePath(&'a str),
    /// Any record at a path, live first, then the most recent soft-deleted one
    AnyPath(&'a str),
    /// A record with this content hash at some other path, live first
    HashElsewhere { hash: &'a str, filepath: &'a str },
}

/// Image store backed by a single SQLite file
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the store at `db_path` and migrate it
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PixseekError::io(
                        e,
                        format!("Failed to create database directory: {:?}", parent),
                    )
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        let store = Self {
            conn,
            path: Some(db_path.to_path_buf()),
        };
        store.prepare_schema()?;
        Ok(store)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.prepare_schema()?;
        Ok(store)
    }

    /// Location of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn prepare_schema(&self) -> Result<()> {
        let has_images: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'images')",
            [],
            |row| row.get(0),
        )?;

        if !has_images {
            let tx = self.conn.unchecked_transaction()?;
            tx.execute_batch(CURRENT_SCHEMA)?;
            tx.execute(
                "INSERT INTO db_version (version) VALUES (?1)",
                params![STORE_VERSION],
            )?;
            tx.commit()?;
            tracing::debug!("Created image store at version {}", STORE_VERSION);
            return Ok(());
        }

        self.conn
            .execute("CREATE TABLE IF NOT EXISTS db_version (version INTEGER)", [])?;
        self.migrate()
    }

    /// Bring an existing store up to [`STORE_VERSION`]
    fn migrate(&self) -> Result<()> {
        let recorded: Option<i64> = self
            .conn
            .query_row("SELECT version FROM db_version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        // Stores written before versioning existed carry no row
        let mut version = recorded.unwrap_or(1);

        if version == STORE_VERSION {
            return Ok(());
        }
        if version > STORE_VERSION {
            return Err(PixseekError::StoreVersionTooNew {
                found: version,
                supported: STORE_VERSION,
            });
        }

        let start = version;
        let tx = self.conn.unchecked_transaction()?;
        for migration in MIGRATIONS.iter().filter(move |m| m.to > start) {
            if migration.to != version + 1 {
                return Err(PixseekError::MigrationNotImplemented {
                    from: version,
                    to: migration.to,
                });
            }
            tracing::info!("Migrating image store to version {}", migration.to);
            tx.execute_batch(migration.sql)?;
            version = migration.to;
        }

        if version != STORE_VERSION {
            return Err(PixseekError::MigrationNotImplemented {
                from: version,
                to: STORE_VERSION,
            });
        }

        if recorded.is_some() {
            tx.execute("UPDATE db_version SET version = ?1", params![version])?;
        } else {
            tx.execute(
                "INSERT INTO db_version (version) VALUES (?1)",
                params![version],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Schema version recorded in the store
    pub fn version(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT version FROM db_version LIMIT 1", [], |row| row.get(0))?)
    }

    fn begin_if_needed(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Commit pending writes; a no-op when nothing is pending
    pub fn commit(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Commit and close the store
    pub fn close(self) -> Result<()> {
        self.commit()
    }

    /// Fetch a single record
    pub fn get(&self, lookup: Lookup<'_>) -> Result<Option<Record>> {
        let raw = match lookup {
            Lookup::Id(id) => self.query_record(
                &format!("SELECT {RECORD_COLUMNS} FROM images WHERE id = ?1"),
                params![id],
            )?,
            Lookup::LivePath(filepath) => self.query_record(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM images WHERE filepath = ?1 AND deleted IS NULL LIMIT 1"
                ),
                params![filepath],
            )?,
            Lookup::AnyPath(filepath) => self.query_record(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM images WHERE filepath = ?1
                     ORDER BY deleted IS NOT NULL, id DESC LIMIT 1"
                ),
                params![filepath],
            )?,
            Lookup::HashElsewhere { hash, filepath } => self.query_record(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM images WHERE hash = ?1 AND filepath != ?2
                     ORDER BY deleted IS NOT NULL, id LIMIT 1"
                ),
                params![hash, filepath],
            )?,
        };

        raw.map(RawRecord::into_record).transpose()
    }

    fn query_record(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<RawRecord>> {
        Ok(self
            .conn
            .query_row(sql, params, RawRecord::from_row)
            .optional()?)
    }

    /// Insert or update the record for `record.filepath`
    ///
    /// Updates the live row at that path, else resurrects the most recent
    /// soft-deleted one, else inserts. Either way the row ends up live with no
    /// indexing flag. Returns the row id.
    pub fn upsert(&self, record: &NewRecord) -> Result<i64> {
        check_dimension(&record.vector)?;
        self.begin_if_needed()?;

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM images WHERE filepath = ?1
                 ORDER BY deleted IS NOT NULL, id DESC LIMIT 1",
                params![&record.filepath],
                |row| row.get(0),
            )
            .optional()?;

        let vector = encode_vector(&record.vector);
        let size = record.size as i64;

        match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE images SET deleted = NULL, indexing = NULL, modified_at = ?2,
                     size = ?3, vector = ?4, hash = COALESCE(?5, hash)
                     WHERE id = ?1",
                    params![id, record.modified_at, size, vector, record.hash],
                )?;
                Ok(id)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO images (deleted, indexing, filepath, modified_at, size, vector, hash)
                     VALUES (NULL, NULL, ?1, ?2, ?3, ?4, ?5)",
                    params![&record.filepath, record.modified_at, size, vector, record.hash],
                )?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    /// Move a record to a new path in place, keeping its id, vector and hash
    pub fn relocate(&self, id: i64, filepath: &str, modified_at: f64, size: u64) -> Result<()> {
        self.begin_if_needed()?;
        self.conn.execute(
            "UPDATE images SET filepath = ?2, modified_at = ?3, size = ?4,
             deleted = NULL, indexing = NULL
             WHERE id = ?1",
            params![id, filepath, modified_at, size as i64],
        )?;
        Ok(())
    }

    /// Remove a row for good; only for moves and maintenance, never for sweeps
    pub fn hard_delete(&self, id: i64) -> Result<()> {
        self.begin_if_needed()?;
        self.conn
            .execute("DELETE FROM images WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Confirm a live record as unchanged during a sweep
    pub fn clear_indexing_flag(&self, filepath: &str) -> Result<()> {
        self.begin_if_needed()?;
        self.conn.execute(
            "UPDATE images SET indexing = NULL WHERE filepath = ?1 AND indexing IS NOT NULL",
            params![filepath],
        )?;
        Ok(())
    }

    /// Clear the indexing flag everywhere; repairs interrupted sweeps
    pub fn clear_all_indexing_flags(&self) -> Result<usize> {
        self.begin_if_needed()?;
        Ok(self.conn.execute(
            "UPDATE images SET indexing = NULL WHERE indexing IS NOT NULL",
            [],
        )?)
    }

    /// Flag every live record under `root` as awaiting confirmation
    pub fn flag_indexing_under(&self, root: &Path) -> Result<usize> {
        self.begin_if_needed()?;
        Ok(self.conn.execute(
            "UPDATE images SET indexing = 1
             WHERE deleted IS NULL AND substr(filepath, 1, length(?1)) = ?1",
            params![subtree_prefix(root)],
        )?)
    }

    /// Soft-delete records under `root` that a sweep never confirmed
    pub fn soft_delete_indexing_under(&self, root: &Path) -> Result<usize> {
        self.begin_if_needed()?;
        Ok(self.conn.execute(
            "UPDATE images SET deleted = 1, indexing = NULL
             WHERE indexing = 1 AND substr(filepath, 1, length(?1)) = ?1",
            params![subtree_prefix(root)],
        )?)
    }

    /// Visit `(filepath, vector)` of every live record under `root`, in id order
    pub fn for_each_vector_under<F>(&self, root: &Path, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &[f32]),
    {
        let mut stmt = self.conn.prepare(
            "SELECT id, filepath, vector FROM images
             WHERE deleted IS NULL AND substr(filepath, 1, length(?1)) = ?1
             ORDER BY id",
        )?;
        let mut rows = stmt.query(params![subtree_prefix(root)])?;

        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let filepath: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let vector = decode_stored_vector(id, &blob)?;
            visit(&filepath, &vector);
        }

        Ok(())
    }

    /// Collect the live vectors under `root`, in id order
    pub fn list_vectors_under(&self, root: &Path) -> Result<Vec<StoredVector>> {
        let mut vectors = Vec::new();
        self.for_each_vector_under(root, |filepath, vector| {
            vectors.push(StoredVector {
                filepath: filepath.to_string(),
                vector: vector.to_vec(),
            });
        })?;
        Ok(vectors)
    }

    /// Whether the store holds any record at all
    pub fn has_any_records(&self) -> Result<bool> {
        Ok(self
            .conn
            .query_row("SELECT EXISTS(SELECT 1 FROM images)", [], |row| row.get(0))?)
    }

    /// Record counts by status
    pub fn stats(&self) -> Result<StoreStats> {
        let (live, indexing, deleted): (i64, i64, i64) = self.conn.query_row(
            "SELECT
                COALESCE(SUM(deleted IS NULL AND indexing IS NULL), 0),
                COALESCE(SUM(deleted IS NULL AND indexing IS NOT NULL), 0),
                COALESCE(SUM(deleted IS NOT NULL), 0)
             FROM images",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StoreStats {
            version: self.version()?,
            live: live as usize,
            indexing: indexing as usize,
            deleted: deleted as usize,
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            tracing::warn!("Failed to commit pending image store writes: {}", e);
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub version: i64,
    pub live: usize,
    pub indexing: usize,
    pub deleted: usize,
}

struct RawRecord {
    id: i64,
    filepath: String,
    modified_at: f64,
    size: i64,
    vector: Vec<u8>,
    hash: Option<String>,
    deleted: Option<bool>,
    indexing: Option<bool>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            filepath: row.get(1)?,
            modified_at: row.get(2)?,
            size: row.get(3)?,
            vector: row.get(4)?,
            hash: row.get(5)?,
            deleted: row.get(6)?,
            indexing: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<Record> {
        let vector = decode_stored_vector(self.id, &self.vector)?;
        Ok(Record {
            id: self.id,
            filepath: self.filepath,
            modified_at: self.modified_at,
            size: self.size.max(0) as u64,
            vector,
            hash: self.hash,
            status: RecordStatus::from_flags(self.deleted, self.indexing),
        })
    }
}

fn decode_stored_vector(id: i64, blob: &[u8]) -> Result<Vec<f32>> {
    match decode_vector(blob) {
        Some(vector) if vector.len() == VECTOR_DIM => Ok(vector),
        _ => Err(PixseekError::CorruptRecord {
            id,
            message: format!(
                "vector blob of {} bytes, expected {}",
                blob.len(),
                VECTOR_DIM * 4
            ),
        }),
    }
}

fn check_dimension(vector: &[f32]) -> Result<()> {
    if vector.len() != VECTOR_DIM {
        return Err(PixseekError::InvalidInput(format!(
            "vector has {} dimensions, expected {}",
            vector.len(),
            VECTOR_DIM
        )));
    }
    Ok(())
}

/// `root` followed by exactly one separator, so `/a/b` never matches `/a/bc`
pub(crate) fn subtree_prefix(root: &Path) -> String {
    let mut prefix = root.to_string_lossy().into_owned();
    while prefix.len() > 1 && prefix.ends_with(MAIN_SEPARATOR) {
        prefix.pop();
    }
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    prefix
}

struct Migration {
    to: i64,
    sql: &'static str,
}

/// Forward migrations, one per version step
const MIGRATIONS: &[Migration] = &[
    // Version 2: sweep bookkeeping
    Migration {
        to: 2,
        sql: "ALTER TABLE images ADD COLUMN indexing BOOLEAN;",
    },
    // Version 3: content hashes, uniqueness scoped to live rows only
    Migration {
        to: 3,
        sql: r#"
        CREATE TABLE images_v3 (
            id INTEGER PRIMARY KEY,
            deleted BOOLEAN,
            filepath TEXT NOT NULL,
            modified_at REAL NOT NULL,
            size INTEGER NOT NULL,
            vector BLOB NOT NULL,
            hash TEXT,
            indexing BOOLEAN
        );
        INSERT INTO images_v3 (id, deleted, filepath, modified_at, size, vector, indexing)
            SELECT id, deleted, filepath, modified_at, size, vector, indexing FROM images;
        DROP TABLE images;
        ALTER TABLE images_v3 RENAME TO images;
        CREATE UNIQUE INDEX existing_images ON images(filepath) WHERE deleted IS NULL;
        CREATE INDEX images_filepath ON images(filepath);
        CREATE INDEX images_hash ON images(hash);
        "#,
    },
    // Version 4: ids of removed rows are never handed out again
    Migration {
        to: 4,
        sql: r#"
        CREATE TABLE images_v4 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            deleted BOOLEAN,
            filepath TEXT NOT NULL,
            modified_at REAL NOT NULL,
            size INTEGER NOT NULL,
            vector BLOB NOT NULL,
            hash TEXT,
            indexing BOOLEAN
        );
        INSERT INTO images_v4 (id, deleted, filepath, modified_at, size, vector, hash, indexing)
            SELECT id, deleted, filepath, modified_at, size, vector, hash, indexing FROM images;
        DROP TABLE images;
        ALTER TABLE images_v4 RENAME TO images;
        CREATE UNIQUE INDEX existing_images ON images(filepath) WHERE deleted IS NULL;
        CREATE INDEX images_filepath ON images(filepath);
        CREATE INDEX images_hash ON images(hash);
        "#,
    },
];

/// Schema of a freshly created store
const CURRENT_SCHEMA: &str = r#"
    CREATE TABLE images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        deleted BOOLEAN,
        filepath TEXT NOT NULL,
        modified_at REAL NOT NULL,
        size INTEGER NOT NULL,
        vector BLOB NOT NULL,
        hash TEXT,
        indexing BOOLEAN
    );
    CREATE UNIQUE INDEX existing_images ON images(filepath) WHERE deleted IS NULL;
    CREATE INDEX images_filepath ON images(filepath);
    CREATE INDEX images_hash ON images(hash);
    CREATE TABLE db_version (version INTEGER);
"#;
