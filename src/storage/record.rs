//! Indexed image records and the on-disk vector encoding

/// Dimension of every stored embedding (CLIP ViT-B/32)
pub const VECTOR_DIM: usize = 512;

/// Lifecycle state of a record
///
/// Stored as the nullable `deleted` / `indexing` columns; this enum is the only
/// shape the rest of the crate sees, so "deleted and indexing" cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Present on disk as of the last sweep
    Live,
    /// Live before the running sweep, not yet confirmed by it
    Indexing,
    /// Soft-deleted: the file disappeared, the row is kept for history
    Deleted,
}

impl RecordStatus {
    pub(crate) fn from_flags(deleted: Option<bool>, indexing: Option<bool>) -> Self {
        if deleted.is_some() {
            RecordStatus::Deleted
        } else if indexing == Some(true) {
            RecordStatus::Indexing
        } else {
            RecordStatus::Live
        }
    }

    /// Whether the record counts as present (`deleted` absent)
    pub fn is_live(self) -> bool {
        !matches!(self, RecordStatus::Deleted)
    }
}

/// A stored image record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: i64,
    pub filepath: String,
    pub modified_at: f64,
    pub size: u64,
    pub vector: Vec<f32>,
    pub hash: Option<String>,
    pub status: RecordStatus,
}

/// Record contents written by an upsert
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub filepath: String,
    pub modified_at: f64,
    pub size: u64,
    pub vector: Vec<f32>,
    /// `None` leaves an existing hash untouched
    pub hash: Option<String>,
}

/// Filesystem metadata compared during change detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileMeta {
    pub modified_at: f64,
    pub size: u64,
}

/// A stored vector yielded by subtree listings
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub filepath: String,
    pub vector: Vec<f32>,
}

/// Encode a vector as little-endian f32 bytes
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes; `None` when the length is not a multiple of 4
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
