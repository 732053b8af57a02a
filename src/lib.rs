//! An embedded, append-only, ordered persistent journal.
//!
//! Records are fixed-width tuples described by a [`Codec`]; the journal
//! keeps them durably on a local filesystem and exposes them as a single
//! logically-sorted sequence, ordered by the natural lexicographic order
//! of the record tuple. Records are never updated or deleted — the
//! journal only grows.
//!
//! Internally this is a small LSM: an in-memory sorted write buffer
//! ([`buffer::Buffer`]), immutable on-disk sorted segments
//! ([`segment::Segment`]), and a background compactor that folds the two
//! smallest segments together on a loop. See `DESIGN.md` in the
//! repository for how each piece is put together.
//!
//! ```
//! use opj::{Journal, Format, Tuple, Value};
//!
//! # let dir = tempfile::tempdir()?;
//! let journal = Journal::<Format>::new(dir.path(), Format::parse("i")?)?;
//!
//! journal.append(Tuple::new(vec![Value::I32(3)]))?;
//! journal.append(Tuple::new(vec![Value::I32(1)]))?;
//! journal.append(Tuple::new(vec![Value::I32(2)]))?;
//!
//! let ordered: Vec<_> = journal.iterate()?.collect();
//! assert_eq!(
//!     ordered,
//!     vec![1, 2, 3].into_iter().map(|v| Tuple::new(vec![Value::I32(v)])).collect::<Vec<_>>()
//! );
//! # Ok::<(), opj::Error>(())
//! ```

mod buffer;
mod codec;
mod compaction;
mod error;
mod file;
mod merge;
mod registry;
mod segment;

pub use codec::{Codec, Format, Tuple, Value};
pub use error::{CorruptRecord, Error, Result};

use buffer::Buffer;
use compaction::PriorityQueue;
use merge::KWayMerge;
use registry::SegmentRegistry;
use segment::Segment;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread::JoinHandle,
};

/// Design default for [`Journal::new`]/[`Journal::open`]: the in-memory
/// buffer flushes to a new segment once its length exceeds this many
/// records.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024;

/// An open journal directory.
///
/// `C` is the [`Codec`] this journal's records are encoded with; it
/// defaults to [`Format`], the dynamic struct-pack-style schema, but any
/// type implementing [`Codec`] may be used.
pub struct Journal<C: Codec = Format> {
    dir: PathBuf,
    codec: C,
    max_buffer_size: usize,
    buffer: Mutex<Buffer<C>>,
    registry: SegmentRegistry<C>,
    queue: Arc<PriorityQueue<C>>,
    results: crossbeam_channel::Receiver<compaction::MergeResult<C>>,
    compactor: Option<JoinHandle<()>>,
}

impl<C: Codec> Journal<C> {
    /// Creates a new journal directory at `path` with the given codec.
    ///
    /// # Errors
    /// Returns [`Error::JournalAlreadyExists`] if `path` exists and is
    /// not empty.
    pub fn new(path: impl AsRef<Path>, codec: C) -> Result<Self> {
        Self::new_with_max_buffer_size(path, codec, DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Like [`Journal::new`], with an explicit buffer flush threshold.
    pub fn new_with_max_buffer_size(
        path: impl AsRef<Path>,
        codec: C,
        max_buffer_size: usize,
    ) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();

        if dir.exists() {
            if fs::read_dir(&dir)?.next().is_some() {
                return Err(Error::JournalAlreadyExists(dir));
            }
        } else {
            fs::create_dir_all(&dir)?;
        }

        file::rewrite_atomic(dir.join(file::FMT_FILE), codec.descriptor().as_bytes())?;
        file::fsync_directory(&dir)?;

        log::info!(
            "created journal at {dir:?} with schema {:?}",
            codec.descriptor()
        );

        Self::open_internal(dir, codec, max_buffer_size, true)
    }

    /// Opens an existing journal directory.
    ///
    /// Sweeps and removes any stray `_*.opj` files left by a process
    /// that crashed mid-write or mid-compaction, then rebuilds the
    /// segment set from the remaining `*.opj` files and recovers the
    /// buffer from its crash log.
    ///
    /// # Errors
    /// Returns [`Error::JournalNotFound`] if `path` doesn't exist or is
    /// missing its `fmt` descriptor.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_max_buffer_size(path, DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Like [`Journal::open`], with an explicit buffer flush threshold.
    pub fn open_with_max_buffer_size(path: impl AsRef<Path>, max_buffer_size: usize) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();

        if !dir.is_dir() {
            return Err(Error::JournalNotFound(dir));
        }

        let descriptor = fs::read_to_string(dir.join(file::FMT_FILE))
            .map_err(|_| Error::JournalNotFound(dir.clone()))?;
        let codec = C::from_descriptor(descriptor.trim())?;

        Self::open_internal(dir, codec, max_buffer_size, false)
    }

    fn open_internal(dir: PathBuf, codec: C, max_buffer_size: usize, is_new: bool) -> Result<Self> {
        let swept = if is_new { 0 } else { sweep_hidden_segments(&dir)? };

        let registry = SegmentRegistry::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if file::has_segment_extension(&name) && !file::is_hidden(&name) {
                if let Some(id) = parse_segment_id(&name) {
                    let segment = Segment::open_active(&dir, id, codec.clone())?;
                    registry.insert(segment);
                } else {
                    log::warn!("ignoring unrecognized segment filename {name:?}");
                }
            }
        }

        log::info!(
            "opened journal at {dir:?}: {} active segments, {swept} stray hidden files swept",
            registry.segment_count()
        );

        let buffer = Buffer::open(&dir, codec.clone())?;

        let queue = Arc::new(PriorityQueue::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        let compactor = compaction::spawn(dir.clone(), codec.clone(), queue.clone(), tx);

        Ok(Self {
            dir,
            codec,
            max_buffer_size,
            buffer: Mutex::new(buffer),
            registry,
            queue,
            results: rx,
            compactor: Some(compactor),
        })
    }

    /// Appends `record` to the journal.
    ///
    /// Blocks only if this append pushes the buffer's length past the
    /// flush threshold, in which case it also performs the flush (a
    /// foreground I/O operation) before returning.
    pub fn append(&self, record: C::Record) -> Result<()> {
        self.drain_compactor_results();

        let mut buffer = self.buffer.lock().expect("buffer mutex poisoned");
        let len_after_append = buffer.append(record)?;

        if len_after_append > self.max_buffer_size {
            let segment = buffer.flush()?;
            self.registry.insert(segment.clone());
            // Priority of a freshly flushed segment is its pre-flush
            // buffer length, which equals its record count.
            self.queue.push(len_after_append, segment);
        }

        Ok(())
    }

    /// An ordered, non-decreasing sequence over every record currently in
    /// the journal (buffer and all segments), as of the moment this call
    /// snapshots them. Concurrent appends or compactions after the
    /// snapshot do not affect an in-progress iteration.
    pub fn iterate(&self) -> Result<impl Iterator<Item = C::Record>> {
        self.drain_compactor_results();
        self.merge_snapshot(None, None)
    }

    /// An ordered sequence over records `r` with `lo <= r <= hi`. Either
    /// bound may be `None` (unbounded).
    pub fn select(
        &self,
        lo: Option<&C::Record>,
        hi: Option<&C::Record>,
    ) -> Result<impl Iterator<Item = C::Record>> {
        self.drain_compactor_results();
        self.merge_snapshot(lo, hi)
    }

    /// True iff `record` is present in the journal.
    pub fn contains(&self, record: &C::Record) -> Result<bool> {
        Ok(self.select(Some(record), Some(record))?.next().is_some())
    }

    /// Sum of the buffer's length and every segment's length. Advisory:
    /// not snapshot-consistent with a concurrent `iterate()`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drain_compactor_results();
        let buffer_len = self.buffer.lock().expect("buffer mutex poisoned").len();
        buffer_len + self.registry.len_records()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active on-disk segments. Advisory diagnostic, useful
    /// for observing the compactor converge towards one segment.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.drain_compactor_results();
        self.registry.segment_count()
    }

    /// Forces the current buffer contents out to a new segment and
    /// enqueues it for compaction, regardless of the flush threshold.
    /// A no-op on an empty buffer.
    pub fn flush(&self) -> Result<()> {
        self.drain_compactor_results();

        let mut buffer = self.buffer.lock().expect("buffer mutex poisoned");
        if buffer.is_empty() {
            return Ok(());
        }

        let len = buffer.len();
        let segment = buffer.flush()?;
        self.registry.insert(segment.clone());
        self.queue.push(len, segment);
        Ok(())
    }

    /// Shuts down the compactor thread and drops the journal. Equivalent
    /// to dropping the `Journal` directly; provided so callers have an
    /// explicit, fallible-looking name for "I'm done with this journal".
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.queue.shutdown();
        if let Some(handle) = self.compactor.take() {
            if handle.join().is_err() {
                log::error!("compactor thread for {:?} panicked during shutdown", self.dir);
            }
        }
    }

    fn drain_compactor_results(&self) {
        while let Ok(result) = self.results.try_recv() {
            self.registry.remove(result.removed[0]);
            self.registry.remove(result.removed[1]);
            self.registry.insert(result.added);
        }
    }

    fn merge_snapshot(
        &self,
        lo: Option<&C::Record>,
        hi: Option<&C::Record>,
    ) -> Result<KWayMerge<C::Record, Box<dyn Iterator<Item = Result<C::Record>>>>> {
        let mut merge = KWayMerge::new();

        let buffered: Vec<C::Record> = {
            let buffer = self.buffer.lock().expect("buffer mutex poisoned");
            buffer.select(lo, hi).collect::<Result<Vec<_>>>()?
        };
        merge.push(Box::new(buffered.into_iter().map(Ok)));

        for segment in self.registry.snapshot() {
            match segment.select(lo, hi) {
                Ok(iter) => merge.push(Box::new(iter)),
                Err(error) => {
                    log::warn!("skipping segment {} for this read: {error}", segment.id());
                }
            }
        }

        Ok(merge)
    }
}

impl<C: Codec> Drop for Journal<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep_hidden_segments(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file::is_hidden(&name) && file::has_segment_extension(&name) {
            fs::remove_file(entry.path())?;
            count += 1;
        }
    }
    Ok(count)
}

fn parse_segment_id(name: &str) -> Option<uuid::Uuid> {
    let stem = name.strip_suffix(&format!(".{}", file::SEGMENT_EXT))?;
    let stem = stem.strip_prefix('_').unwrap_or(stem);
    uuid::Uuid::parse_str(stem).ok()
}
