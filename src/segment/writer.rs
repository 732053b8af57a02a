// Copyright (c) 2025-present, opj-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{inner::Inner, Segment};
use crate::{codec::Codec, file, Result};
use std::{
    fs,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize},
        Arc,
    },
};
use uuid::Uuid;

/// Writes a fresh, hidden segment file.
///
/// Used by both buffer flush and compaction: the caller streams records
/// in non-decreasing order, calls [`Writer::finish`] to get back a
/// hidden [`Segment`] handle, then [`Segment::activate`]s it — the
/// publication protocol in full (spec §4.4) is: pick a fresh id, write
/// `_<id>.opj`, close, rename, *then* register the segment.
pub struct Writer<C: Codec> {
    id: Uuid,
    dir: PathBuf,
    codec: C,
    file: fs::File,
    count: usize,
}

impl<C: Codec> Writer<C> {
    /// Creates a new hidden segment file under `dir`.
    pub fn create(dir: impl Into<PathBuf>, codec: C) -> Result<Self> {
        let dir = dir.into();
        let id = Uuid::new_v4();
        let path = dir.join(file::hidden_name(id));

        log::debug!("writing segment {id} to {path:?}");

        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            id,
            dir,
            codec,
            file,
            count: 0,
        })
    }

    /// The fresh id this writer's output will carry once published.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Appends one record. Callers are responsible for supplying records
    /// in non-decreasing order — the writer does not sort or validate.
    pub fn write(&mut self, record: &C::Record) -> Result<()> {
        let mut buf = Vec::with_capacity(self.codec.record_size());
        self.codec.encode(record, &mut buf);

        if buf.len() != self.codec.record_size() {
            return Err(crate::Error::SchemaMismatch {
                expected: self.codec.record_size(),
                got: buf.len(),
            });
        }

        self.file.write_all(&buf)?;
        self.count += 1;
        Ok(())
    }

    /// Closes the file and returns a hidden [`Segment`] handle.
    ///
    /// The segment is not yet visible to readers — call
    /// [`Segment::activate`] to publish it.
    pub fn finish(mut self) -> Result<Segment<C>> {
        self.file.sync_all()?;
        drop(self.file);

        log::debug!(
            "finalized segment write {} ({} records) in {:?}",
            self.id,
            self.count,
            self.dir
        );

        let inner = Arc::new(Inner {
            id: self.id,
            dir: self.dir,
            active: AtomicBool::new(false),
            readers: AtomicUsize::new(0),
            pending_unlink: AtomicBool::new(false),
            len: self.count,
        });

        Ok(Segment::from_inner(inner, self.codec))
    }
}
