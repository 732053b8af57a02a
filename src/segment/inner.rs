// Copyright (c) 2025-present, opj-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, AtomicUsize},
};
use uuid::Uuid;

/// Shared segment state behind an `Arc`.
///
/// `len` is fixed at construction: segments are immutable once their
/// writer finishes, so the record count never changes again.
pub(crate) struct Inner {
    pub(crate) id: Uuid,
    pub(crate) dir: PathBuf,
    pub(crate) active: AtomicBool,
    pub(crate) readers: AtomicUsize,
    pub(crate) pending_unlink: AtomicBool,
    pub(crate) len: usize,
}

impl Inner {
    pub(crate) fn unlink_hidden(&self) -> std::io::Result<()> {
        let path = self.dir.join(crate::file::hidden_name(self.id));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }
}
