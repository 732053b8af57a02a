// Copyright (c) 2025-present, opj-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::inner::Inner;
use crate::Result;
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    sync::Arc,
};

/// A scoped read acquisition of a [`super::Segment`].
///
/// Opens the file read-only on construction and guarantees the handle is
/// released on every exit path (`Drop`), including early returns from an
/// iterator and panics unwinding through it. Holding a guard keeps the
/// segment's reader count above zero, which defers a concurrent
/// [`super::Segment::destroy_if_retired`] until the guard is released —
/// a retire (rename to hidden) may still happen underneath a live guard,
/// since POSIX keeps the inode reachable through an open file descriptor.
pub struct SegmentReadGuard {
    pub(super) inner: Arc<Inner>,
    pub(super) file: File,
    pub(super) len: usize,
}

impl SegmentReadGuard {
    /// Number of records in the segment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(super) fn read_at(&mut self, index: usize, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; size];
        self.file.seek(SeekFrom::Start((index * size) as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Drop for SegmentReadGuard {
    fn drop(&mut self) {
        let remaining = self.inner.readers.fetch_sub(1, std::sync::atomic::Ordering::AcqRel) - 1;
        if remaining == 0 && self.inner.pending_unlink.load(std::sync::atomic::Ordering::Acquire) {
            if let Err(error) = self.inner.unlink_hidden() {
                log::warn!(
                    "failed to unlink retired segment {} after last reader released it: {error}",
                    self.inner.id
                );
            }
        }
    }
}
