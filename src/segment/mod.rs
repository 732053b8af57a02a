// Copyright (c) 2025-present, opj-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod guard;
mod inner;
pub mod writer;

pub use guard::SegmentReadGuard;
pub use writer::Writer;

use crate::{codec::Codec, file, Error, Result};
use inner::Inner;
use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use uuid::Uuid;

/// An immutable, sorted, fixed-width on-disk run of records — the
/// on-disk unit produced by a buffer flush or a compaction.
///
/// A segment is born hidden (`_<uuid>.opj`), becomes *active* via an
/// atomic rename once fully written, and is *retired* (renamed back to
/// hidden) by the compactor once its contents have been folded into a
/// larger output segment. The file's bytes never change between
/// activation and the eventual unlink: [`Segment::activate`] is the
/// last write that ever touches it.
pub struct Segment<C: Codec> {
    inner: Arc<Inner>,
    codec: C,
}

impl<C: Codec> Clone for Segment<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<C: Codec> std::fmt::Debug for Segment<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Segment:{}({} records, {})",
            self.inner.id,
            self.inner.len,
            if self.is_active() { "active" } else { "hidden" }
        )
    }
}

impl<C: Codec> Segment<C> {
    pub(crate) fn from_inner(inner: Arc<Inner>, codec: C) -> Self {
        Self { inner, codec }
    }

    /// Reopens a segment from an already-active file on disk, e.g. when
    /// rebuilding the segment set at journal open.
    pub(crate) fn open_active(dir: &std::path::Path, id: Uuid, codec: C) -> Result<Self> {
        let path = dir.join(file::active_name(id));
        let size = fs::metadata(&path)?.len() as usize;
        let record_size = codec.record_size();
        let len = size / record_size;

        let inner = Arc::new(Inner {
            id,
            dir: dir.to_path_buf(),
            active: AtomicBool::new(true),
            readers: AtomicUsize::new(0),
            pending_unlink: AtomicBool::new(false),
            len,
        });

        Ok(Self { inner, codec })
    }

    /// This segment's globally unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Number of records in this segment. Fixed for the segment's
    /// lifetime — segments are immutable once written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// True if this segment is currently visible under its active name.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// The segment's current filename (active or hidden), for
    /// diagnostics and logging.
    #[must_use]
    pub fn current_name(&self) -> String {
        if self.is_active() {
            file::active_name(self.inner.id)
        } else {
            file::hidden_name(self.inner.id)
        }
    }

    fn path(&self) -> PathBuf {
        self.inner.dir.join(self.current_name())
    }

    /// Scoped read acquisition: opens the file read-only and guarantees
    /// release on every exit path. Multiple holders may read
    /// concurrently; a read acquisition does not prevent a concurrent
    /// `retire()` (rename), only a `destroy_if_retired()` unlink.
    pub fn open_for_read(&self) -> Result<SegmentReadGuard> {
        self.inner.readers.fetch_add(1, Ordering::AcqRel);

        match fs::File::open(self.path()) {
            Ok(file) => Ok(SegmentReadGuard {
                inner: self.inner.clone(),
                file,
                len: self.inner.len,
            }),
            Err(error) => {
                self.inner.readers.fetch_sub(1, Ordering::AcqRel);
                Err(error.into())
            }
        }
    }

    /// Returns the `index`-th record.
    ///
    /// # Errors
    /// Returns [`Error::OutOfRange`] if `index >= len()`.
    pub fn get(&self, index: usize) -> Result<C::Record> {
        if index >= self.inner.len {
            return Err(Error::OutOfRange {
                index,
                len: self.inner.len,
            });
        }

        let mut guard = self.open_for_read()?;
        let bytes = guard.read_at(index, self.codec.record_size())?;
        self.codec.decode(&bytes)
    }

    /// A lazy, single-pass sequence over every record, in file order
    /// (non-decreasing, by the segment invariant).
    pub fn iterate(&self) -> Result<SegmentIter<C>> {
        let guard = self.open_for_read()?;
        let end = guard.len();
        Ok(SegmentIter {
            segment: self.clone(),
            guard,
            next: 0,
            end,
        })
    }

    /// A lazy sequence over records `r` with `lo <= r <= hi`. Either
    /// bound may be `None` (unbounded). Resolves both bounds with a
    /// binary search against the on-disk ordered array, each in
    /// `O(log len())` seeks, then iterates the index range in between.
    pub fn select(&self, lo: Option<&C::Record>, hi: Option<&C::Record>) -> Result<SegmentIter<C>> {
        let mut guard = self.open_for_read()?;
        let len = guard.len();

        let from = match lo {
            Some(bound) => self.lower_bound(&mut guard, bound)?,
            None => 0,
        };
        let to = match hi {
            Some(bound) => self.upper_bound(&mut guard, bound)?,
            None => len,
        };

        Ok(SegmentIter {
            segment: self.clone(),
            guard,
            next: from,
            end: to.max(from),
        })
    }

    /// Left-most index `i` such that `records[i] >= target`.
    fn lower_bound(&self, guard: &mut SegmentReadGuard, target: &C::Record) -> Result<usize> {
        let mut lo = 0_usize;
        let mut hi = guard.len();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let value = self.decode_at(guard, mid)?;
            if value < *target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        Ok(lo)
    }

    /// Left-most index `i` such that `records[i] > target` — i.e. the
    /// exclusive end of the run of records `<= target`.
    fn upper_bound(&self, guard: &mut SegmentReadGuard, target: &C::Record) -> Result<usize> {
        let mut lo = 0_usize;
        let mut hi = guard.len();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let value = self.decode_at(guard, mid)?;
            if value <= *target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        Ok(lo)
    }

    fn decode_at(&self, guard: &mut SegmentReadGuard, index: usize) -> Result<C::Record> {
        let bytes = guard.read_at(index, self.codec.record_size())?;
        self.codec.decode(&bytes)
    }

    /// Renames `_<id>.opj` to `<id>.opj`. Atomic on any
    /// POSIX-compatible filesystem; the sole moment this segment
    /// becomes visible to readers.
    pub fn activate(&self) -> Result<()> {
        let from = self.inner.dir.join(file::hidden_name(self.inner.id));
        let to = self.inner.dir.join(file::active_name(self.inner.id));
        fs::rename(&from, &to)?;
        file::fsync_directory(&self.inner.dir)?;
        self.inner.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Renames `<id>.opj` to `_<id>.opj`. Atomic. Readers that opened
    /// the segment before retirement keep reading the same bytes
    /// through their open file handle.
    pub fn retire(&self) -> Result<()> {
        let from = self.inner.dir.join(file::active_name(self.inner.id));
        let to = self.inner.dir.join(file::hidden_name(self.inner.id));
        fs::rename(&from, &to)?;
        self.inner.active.store(false, Ordering::Release);
        Ok(())
    }

    /// Unlinks the file if and only if it is currently hidden. If live
    /// readers still hold the segment open, the unlink is deferred
    /// until the last one releases it.
    pub fn destroy_if_retired(&self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        if self.inner.readers.load(Ordering::Acquire) == 0 {
            self.inner.unlink_hidden()?;
        } else {
            self.inner.pending_unlink.store(true, Ordering::Release);
        }

        Ok(())
    }
}

/// A lazy, single-pass iterator over a [`Segment`]'s records, holding
/// its read acquisition for the iterator's lifetime.
pub struct SegmentIter<C: Codec> {
    segment: Segment<C>,
    guard: SegmentReadGuard,
    next: usize,
    end: usize,
}

impl<C: Codec> Iterator for SegmentIter<C> {
    type Item = Result<C::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }

        let size = self.segment.codec.record_size();
        let result = self
            .guard
            .read_at(self.next, size)
            .and_then(|bytes| self.segment.codec.decode(&bytes));
        self.next += 1;

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Format, Tuple, Value};
    use test_log::test;

    fn format() -> Format {
        Format::parse("i").unwrap()
    }

    fn write_segment(dir: &std::path::Path, values: &[i32]) -> Segment<Format> {
        let mut writer = Writer::create(dir, format()).unwrap();
        for v in values {
            writer.write(&Tuple::new(vec![Value::I32(*v)])).unwrap();
        }
        let segment = writer.finish().unwrap();
        segment.activate().unwrap();
        segment
    }

    #[test]
    fn get_and_iterate() {
        let dir = tempfile::tempdir().unwrap();
        let segment = write_segment(dir.path(), &[1, 2, 3, 5, 8]);

        assert_eq!(segment.len(), 5);
        assert_eq!(segment.get(2).unwrap(), Tuple::new(vec![Value::I32(3)]));
        assert!(segment.get(5).is_err());

        let collected: Vec<_> = segment
            .iterate()
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            collected,
            vec![1, 2, 3, 5, 8]
                .into_iter()
                .map(|v| Tuple::new(vec![Value::I32(v)]))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn select_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let segment = write_segment(dir.path(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let t = |v: i32| Tuple::new(vec![Value::I32(v)]);

        let got: Vec<_> = segment
            .select(Some(&t(3)), Some(&t(6)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got, vec![t(3), t(4), t(5), t(6)]);

        let got: Vec<_> = segment
            .select(None, Some(&t(1)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got, vec![t(0), t(1)]);

        let got: Vec<_> = segment
            .select(Some(&t(8)), None)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got, vec![t(8), t(9)]);

        let got: Vec<_> = segment
            .select(Some(&t(100)), None)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert!(got.is_empty());
    }

    #[test]
    fn activate_then_retire_then_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let segment = write_segment(dir.path(), &[1, 2, 3]);
        assert!(segment.is_active());

        segment.retire().unwrap();
        assert!(!segment.is_active());
        assert!(dir.path().join(file::hidden_name(segment.id())).exists());

        segment.destroy_if_retired().unwrap();
        assert!(!dir.path().join(file::hidden_name(segment.id())).exists());
    }

    #[test]
    fn destroy_is_deferred_while_a_reader_is_open() {
        let dir = tempfile::tempdir().unwrap();
        let segment = write_segment(dir.path(), &[1, 2, 3]);

        let guard = segment.open_for_read().unwrap();
        segment.retire().unwrap();
        segment.destroy_if_retired().unwrap();

        // The hidden file must still exist: a reader is holding it open.
        assert!(dir.path().join(file::hidden_name(segment.id())).exists());

        drop(guard);
        assert!(!dir.path().join(file::hidden_name(segment.id())).exists());
    }
}
