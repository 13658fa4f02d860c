//! Incremental indexing
//!
//! A sweep keeps the store in step with one directory tree:
//!
//! 1. clear every `indexing` flag (repairs interrupted sweeps)
//! 2. flag every live record under the root, commit
//! 3. walk the tree; unchanged files are confirmed, changed ones are batched
//!    for embedding, renamed or copied ones reuse a stored vector
//! 4. flush the last batch, wait for the counting thread, commit
//! 5. soft-delete whatever is still flagged: it was not found on disk

mod change;
mod progress;

pub use change::{detect_change, FileChange};
pub use progress::{sweep_progress_bar, IndexProgress, NoProgress};

use crate::embedding::{check_batch, EmbeddingProvider};
use crate::error::Result;
use crate::imaging::{content_hash, LoadedImage};
use crate::scanner::{ExcludeDirs, ImageFilter, ScanEntry, TreeScanner};
use crate::storage::{FileMeta, Lookup, NewRecord, Record, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Sweep tuning
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Images embedded per model call
    pub batch_size: usize,
    /// Processed files between intermediate commits
    pub commit_interval: u64,
    /// Matches between progress total updates from the counting walk
    pub count_update_every: u64,
    pub exclude_dirs: ExcludeDirs,
    pub raw_support: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 8,
            commit_interval: 50_000,
            count_update_every: 10_000,
            exclude_dirs: ExcludeDirs::default(),
            raw_support: false,
        }
    }
}

/// What a sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Candidate files the walk produced
    pub scanned: usize,
    /// Files confirmed without re-embedding
    pub unchanged: usize,
    /// Files embedded by the model
    pub embedded: usize,
    /// Files whose stored vector was reused after a move
    pub moved: usize,
    /// Files whose vector was copied from an identical file
    pub copied: usize,
    /// Files skipped because of read, decode or embedding failures
    pub failed: usize,
    /// Records soft-deleted at the end of the sweep
    pub removed: usize,
}

/// A changed file waiting for the next embedding batch
struct PendingFile {
    filepath: String,
    meta: FileMeta,
    bytes: Vec<u8>,
    hash: String,
}

/// Keeps a [`Store`] in sync with directory trees
pub struct Indexer<'a> {
    store: &'a Store,
    provider: &'a dyn EmbeddingProvider,
    scanner: TreeScanner,
    options: IndexOptions,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a Store, provider: &'a dyn EmbeddingProvider, options: IndexOptions) -> Self {
        let scanner = TreeScanner::new(
            options.exclude_dirs.clone(),
            ImageFilter::new(options.raw_support),
        );
        Self {
            store,
            provider,
            scanner,
            options,
        }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Run one sweep over `root`
    ///
    /// `root` should be absolute: stored paths are the walked paths. Per-file
    /// failures are logged and counted; store failures abort the sweep.
    pub fn sweep(&self, root: &Path, progress: Arc<dyn IndexProgress>) -> Result<IndexReport> {
        info!("Indexing {}", root.display());
        let mut report = IndexReport::default();

        let stale = self.store.clear_all_indexing_flags()?;
        if stale > 0 {
            debug!("Cleared {} stale indexing flags", stale);
        }
        let flagged = self.store.flag_indexing_under(root)?;
        self.store.commit()?;
        debug!("Flagged {} records under {}", flagged, root.display());

        let counter = self.spawn_counter(root, Arc::clone(&progress));

        let batch_size = self.options.batch_size.max(1);
        let commit_interval = self.options.commit_interval.max(1);
        let mut batch: Vec<PendingFile> = Vec::with_capacity(batch_size);
        let mut processed = 0u64;

        for entry in self.scanner.walk(root) {
            report.scanned += 1;
            self.process_entry(entry, &mut batch, &mut report)?;
            if batch.len() >= batch_size {
                self.flush(&mut batch, &mut report)?;
            }

            progress.advance(1);
            processed += 1;
            if processed % commit_interval == 0 {
                debug!("Committing after {} files", processed);
                self.store.commit()?;
            }
        }
        self.flush(&mut batch, &mut report)?;

        if let Some(handle) = counter {
            match handle.join() {
                Ok(total) => debug!("Counting walk found {} files", total),
                Err(_) => warn!("File counting thread panicked; progress total may be off"),
            }
        }
        self.store.commit()?;

        report.removed = self.store.soft_delete_indexing_under(root)?;
        self.store.commit()?;
        progress.finish();

        info!(
            "Indexed {}: {} scanned, {} unchanged, {} embedded, {} moved, {} copied, {} failed, {} removed",
            root.display(),
            report.scanned,
            report.unchanged,
            report.embedded,
            report.moved,
            report.copied,
            report.failed,
            report.removed
        );
        Ok(report)
    }

    fn spawn_counter(
        &self,
        root: &Path,
        progress: Arc<dyn IndexProgress>,
    ) -> Option<JoinHandle<u64>> {
        let scanner = self.scanner.clone();
        let root: PathBuf = root.to_path_buf();
        let every = self.options.count_update_every;

        let spawned = thread::Builder::new()
            .name("pixseek-count".to_string())
            .spawn(move || scanner.count(&root, every, |total| progress.set_total(total)));

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to start file counting thread: {}", e);
                None
            }
        }
    }

    fn process_entry(
        &self,
        entry: ScanEntry,
        batch: &mut Vec<PendingFile>,
        report: &mut IndexReport,
    ) -> Result<()> {
        let Some(filepath) = entry.path.to_str() else {
            warn!("Skipping non UTF-8 path {}", entry.path.display());
            report.failed += 1;
            return Ok(());
        };
        let meta = match entry.meta {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Failed to read metadata of {}: {}", filepath, e);
                report.failed += 1;
                return Ok(());
            }
        };

        let existing = match detect_change(self.store, filepath, meta)? {
            FileChange::Unchanged => {
                self.store.clear_indexing_flag(filepath)?;
                report.unchanged += 1;
                return Ok(());
            }
            FileChange::New => None,
            FileChange::Modified(record) => Some(*record),
        };

        let bytes = match std::fs::read(&entry.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read {}: {}", filepath, e);
                report.failed += 1;
                return Ok(());
            }
        };
        let hash = content_hash(&bytes);

        if let Some(record) = &existing {
            // touched but identical content
            if record.hash.as_deref() == Some(hash.as_str()) {
                self.store
                    .relocate(record.id, filepath, meta.modified_at, meta.size)?;
                report.unchanged += 1;
                return Ok(());
            }
        }

        if self.reuse_by_hash(filepath, meta, &hash, existing.as_ref(), report)? {
            return Ok(());
        }

        batch.push(PendingFile {
            filepath: filepath.to_string(),
            meta,
            bytes,
            hash,
        });
        Ok(())
    }

    /// Reuse the vector of a record with identical content at another path
    ///
    /// If that path still exists the file is a copy. Otherwise it was moved:
    /// the record follows it, or, when `destination` is already live, the
    /// destination keeps its id and the old live record is dropped.
    fn reuse_by_hash(
        &self,
        filepath: &str,
        meta: FileMeta,
        hash: &str,
        destination: Option<&Record>,
        report: &mut IndexReport,
    ) -> Result<bool> {
        let Some(donor) = self.store.get(Lookup::HashElsewhere { hash, filepath })? else {
            return Ok(false);
        };

        let donor_live = donor.status.is_live();
        if donor_live && Path::new(&donor.filepath).exists() {
            debug!("{} is a copy of {}", filepath, donor.filepath);
            self.store
                .upsert(&reused_record(filepath, meta, hash, donor.vector))?;
            report.copied += 1;
            return Ok(true);
        }

        match destination {
            None => {
                debug!("{} moved to {}", donor.filepath, filepath);
                self.store
                    .relocate(donor.id, filepath, meta.modified_at, meta.size)?;
            }
            Some(_) => {
                debug!(
                    "{} moved onto indexed {}, keeping the destination record",
                    donor.filepath, filepath
                );
                let donor_id = donor.id;
                self.store
                    .upsert(&reused_record(filepath, meta, hash, donor.vector))?;
                if donor_live {
                    self.store.hard_delete(donor_id)?;
                }
            }
        }
        report.moved += 1;
        Ok(true)
    }

    /// Decode, embed and store a batch; failures drop files, never the sweep
    fn flush(&self, batch: &mut Vec<PendingFile>, report: &mut IndexReport) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut images = Vec::with_capacity(batch.len());
        let mut keys = Vec::with_capacity(batch.len());
        for file in batch.drain(..) {
            match LoadedImage::from_file_bytes(Path::new(&file.filepath), file.bytes) {
                Ok(image) => {
                    images.push(image);
                    keys.push((file.filepath, file.meta, file.hash));
                }
                Err(e) => {
                    warn!("Skipping {}: {}", file.filepath, e);
                    report.failed += 1;
                }
            }
        }
        if images.is_empty() {
            return Ok(());
        }

        let vectors = match self.provider.embed_images(&images).and_then(|vectors| {
            check_batch(&vectors, images.len(), self.provider.dimension())?;
            Ok(vectors)
        }) {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!("Failed to embed a batch of {} images: {}", images.len(), e);
                report.failed += images.len();
                return Ok(());
            }
        };

        for ((filepath, meta, hash), vector) in keys.into_iter().zip(vectors) {
            self.store.upsert(&NewRecord {
                filepath,
                modified_at: meta.modified_at,
                size: meta.size,
                vector,
                hash: Some(hash),
            })?;
            report.embedded += 1;
        }
        debug!("Embedded a batch of {} images", images.len());
        Ok(())
    }
}

fn reused_record(filepath: &str, meta: FileMeta, hash: &str, vector: Vec<f32>) -> NewRecord {
    NewRecord {
        filepath: filepath.to_string(),
        modified_at: meta.modified_at,
        size: meta.size,
        vector,
        hash: Some(hash.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::imaging::test_support::write_png;
    use crate::storage::{RecordStatus, VECTOR_DIM};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Embeds an image as its first pixel's color on the first three axes
    #[derive(Default)]
    struct ColorProvider {
        calls: AtomicUsize,
        images: AtomicUsize,
        fail: AtomicBool,
    }

    impl EmbeddingProvider for ColorProvider {
        fn embed_images(&self, images: &[LoadedImage]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(EmbeddingError::GenerationError("boom".to_string()));
            }
            self.images.fetch_add(images.len(), Ordering::SeqCst);
            Ok(images
                .iter()
                .map(|img| {
                    let rgb = image::load_from_memory(&img.bytes).unwrap().to_rgb8();
                    let px = rgb.get_pixel(0, 0).0;
                    let mut v = vec![0.0; VECTOR_DIM];
                    v[0] = px[0] as f32 + 1.0;
                    v[1] = px[1] as f32;
                    v[2] = px[2] as f32;
                    crate::embedding::normalize(&mut v);
                    v
                })
                .collect())
        }

        fn embed_texts(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.0; VECTOR_DIM]).collect())
        }

        fn dimension(&self) -> usize {
            VECTOR_DIM
        }

        fn model_name(&self) -> &str {
            "color"
        }
    }

    fn sweep(store: &Store, provider: &ColorProvider, root: &Path) -> IndexReport {
        let options = IndexOptions {
            batch_size: 2,
            ..IndexOptions::default()
        };
        Indexer::new(store, provider, options)
            .sweep(root, Arc::new(NoProgress))
            .unwrap()
    }

    #[test]
    fn test_corrupt_image_is_skipped() {
        let temp = TempDir::new().unwrap();
        write_png(&temp.path().join("a.png"), [255, 0, 0]);
        std::fs::write(temp.path().join("b.jpg"), b"not really a jpeg").unwrap();
        write_png(&temp.path().join("c.png"), [0, 0, 255]);

        let store = Store::open_in_memory().unwrap();
        let provider = ColorProvider::default();
        let report = sweep(&store, &provider, temp.path());

        assert_eq!(report.scanned, 3);
        assert_eq!(report.embedded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(store.stats().unwrap().live, 2);
    }

    #[test]
    fn test_failed_batch_is_dropped_and_retried() {
        let temp = TempDir::new().unwrap();
        write_png(&temp.path().join("a.png"), [255, 0, 0]);
        write_png(&temp.path().join("b.png"), [0, 255, 0]);

        let store = Store::open_in_memory().unwrap();
        let provider = ColorProvider::default();
        provider.fail.store(true, Ordering::SeqCst);
        let report = sweep(&store, &provider, temp.path());
        assert_eq!(report.failed, 2);
        assert!(!store.has_any_records().unwrap());

        provider.fail.store(false, Ordering::SeqCst);
        let report = sweep(&store, &provider, temp.path());
        assert_eq!(report.embedded, 2);
        assert_eq!(store.stats().unwrap().live, 2);
    }

    #[test]
    fn test_touched_file_is_not_re_embedded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.png");
        write_png(&path, [255, 0, 0]);

        let store = Store::open_in_memory().unwrap();
        let provider = ColorProvider::default();
        sweep(&store, &provider, temp.path());

        // rewrite identical bytes with a different mtime
        let bytes = std::fs::read(&path).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, bytes).unwrap();
        let before = store
            .get(Lookup::LivePath(path.to_str().unwrap()))
            .unwrap()
            .unwrap();

        let report = sweep(&store, &provider, temp.path());
        assert_eq!(report.embedded, 0);
        assert_eq!(provider.images.load(Ordering::SeqCst), 1);

        let after = store
            .get(Lookup::LivePath(path.to_str().unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.status, RecordStatus::Live);
    }

    #[test]
    fn test_interrupted_sweep_flags_are_repaired() {
        let temp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        write_png(&temp.path().join("a.png"), [255, 0, 0]);
        write_png(&other.path().join("b.png"), [0, 0, 255]);

        let store = Store::open_in_memory().unwrap();
        let provider = ColorProvider::default();
        sweep(&store, &provider, temp.path());
        sweep(&store, &provider, other.path());

        // a sweep of `other` that died after flagging
        store.flag_indexing_under(other.path()).unwrap();
        store.commit().unwrap();
        assert_eq!(store.stats().unwrap().indexing, 1);

        // sweeping a different root clears the stale flag instead of deleting
        sweep(&store, &provider, temp.path());
        let stats = store.stats().unwrap();
        assert_eq!(stats.indexing, 0);
        assert_eq!(stats.live, 2);
        assert_eq!(stats.deleted, 0);
    }

    #[test]
    fn test_progress_receives_total_and_advances() {
        let temp = TempDir::new().unwrap();
        for (i, color) in [[1, 2, 3], [4, 5, 6], [7, 8, 9]].iter().enumerate() {
            write_png(&temp.path().join(format!("{}.png", i)), *color);
        }

        let store = Store::open_in_memory().unwrap();
        let provider = ColorProvider::default();
        let bar = indicatif::ProgressBar::hidden();
        let progress: Arc<dyn IndexProgress> = Arc::new(bar.clone());
        Indexer::new(&store, &provider, IndexOptions::default())
            .sweep(temp.path(), progress)
            .unwrap();

        assert_eq!(bar.length(), Some(3));
        assert_eq!(bar.position(), 3);
    }
}
