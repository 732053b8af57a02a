//! The in-memory sorted write buffer and its write-through crash log.

use crate::{
    codec::Codec,
    file,
    segment::{Segment, Writer},
    Result,
};
use std::{
    fs,
    io::{Read, Write},
    path::PathBuf,
};
#[cfg(test)]
use std::path::Path;

/// In-memory sorted staging area for not-yet-flushed records, backed by
/// an insertion-order crash log (the `buffer` file).
///
/// The file exists *only* so that records are not lost if the process
/// dies before a flush — it is never read back except by
/// [`Buffer::recover`] at construction, and is truncated to empty by
/// every successful [`Buffer::flush`]. Do not "optimize" it into sorted
/// order: that would require a rewrite on every append.
pub struct Buffer<C: Codec> {
    codec: C,
    dir: PathBuf,
    items: Vec<C::Record>,
    file: fs::File,
}

impl<C: Codec> Buffer<C> {
    /// Opens (or creates) the buffer file under `dir` and recovers any
    /// records left over from a prior, unflushed run.
    pub fn open(dir: impl Into<PathBuf>, codec: C) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join(file::BUFFER_FILE);

        let mut items = Vec::new();
        let record_size = codec.record_size();

        if let Ok(mut existing) = fs::File::open(&path) {
            let mut bytes = Vec::new();
            existing.read_to_end(&mut bytes)?;

            let whole_records = bytes.len() / record_size;
            let trailing = bytes.len() % record_size;
            if trailing != 0 {
                log::warn!(
                    "discarding {trailing} torn trailing bytes from buffer file {path:?}"
                );
            }

            for chunk in bytes[..whole_records * record_size].chunks_exact(record_size) {
                let record = codec.decode(chunk)?;
                insert_sorted(&mut items, record);
            }

            log::debug!("recovered {whole_records} buffered records from {path:?}");
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            codec,
            dir,
            items,
            file,
        })
    }

    /// Current number of buffered (unflushed) records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Inserts `record` into the sorted in-memory sequence via
    /// binary-search insert, and durably appends its *unsorted* encoding
    /// to the `buffer` crash log. Returns the new length.
    pub fn append(&mut self, record: C::Record) -> Result<usize> {
        let mut bytes = Vec::with_capacity(self.codec.record_size());
        self.codec.encode(&record, &mut bytes);

        if bytes.len() != self.codec.record_size() {
            return Err(crate::Error::SchemaMismatch {
                expected: self.codec.record_size(),
                got: bytes.len(),
            });
        }

        self.file.write_all(&bytes)?;
        self.file.sync_data()?;

        insert_sorted(&mut self.items, record);
        Ok(self.items.len())
    }

    /// A lazy sequence over the full sorted in-memory view.
    pub fn iterate(&self) -> impl Iterator<Item = Result<C::Record>> + '_ {
        self.items.iter().cloned().map(Ok)
    }

    /// A lazy sequence over records `r` with `lo <= r <= hi`, using
    /// binary search on both ends of the sorted in-memory sequence.
    pub fn select<'a>(
        &'a self,
        lo: Option<&C::Record>,
        hi: Option<&C::Record>,
    ) -> impl Iterator<Item = Result<C::Record>> + 'a {
        let from = match lo {
            Some(bound) => self.items.partition_point(|r| r < bound),
            None => 0,
        };
        let to = match hi {
            Some(bound) => self.items.partition_point(|r| r <= bound),
            None => self.items.len(),
        };
        self.items[from..to.max(from)].iter().cloned().map(Ok)
    }

    /// Writes every current record, in sorted order, to a new segment,
    /// activates it, then clears the in-memory sequence and truncates
    /// the `buffer` file.
    ///
    /// If anything fails between writing the hidden segment and
    /// renaming it active, the hidden file is left for the next
    /// [`crate::Journal::open`] sweep to clean up, and the in-memory
    /// buffer is left untouched — no record is lost.
    pub fn flush(&mut self) -> Result<Segment<C>> {
        let mut writer = Writer::create(&self.dir, self.codec.clone())?;
        for record in &self.items {
            writer.write(record)?;
        }
        let segment = writer.finish()?;
        segment.activate()?;

        log::debug!(
            "flushed {} buffered records to segment {}",
            self.items.len(),
            segment.id()
        );

        self.items.clear();
        self.truncate_file()?;

        Ok(segment)
    }

    fn truncate_file(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        // A fresh writer (opened in append mode) always seeks to EOF
        // before a write regardless of the handle's internal cursor, so
        // no explicit seek is needed here.
        Ok(())
    }

    #[cfg(test)]
    fn path(dir: &Path) -> PathBuf {
        dir.join(file::BUFFER_FILE)
    }
}

/// Binary-search insert, keeping `items` sorted. Equal records are
/// permitted (the store is a multiset); `partition_point` finds the
/// insertion point after any existing equal elements, preserving
/// insertion order among ties — irrelevant for correctness since ties
/// compare equal either way.
fn insert_sorted<T: Ord>(items: &mut Vec<T>, record: T) {
    let index = items.partition_point(|item| item <= &record);
    items.insert(index, record);
}
