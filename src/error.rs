use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the journal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// [`crate::Journal::new`] was called on a directory that already
    /// contains files.
    #[error("journal already exists at {0:?}")]
    JournalAlreadyExists(PathBuf),

    /// [`crate::Journal::open`] was called on a directory that does not
    /// exist, or that is missing its `fmt` descriptor.
    #[error("no journal found at {0:?}")]
    JournalNotFound(PathBuf),

    /// A fixed-width record block failed to decode.
    #[error("corrupt record: {0}")]
    CorruptRecord(#[from] CorruptRecord),

    /// A segment random-access index was out of bounds.
    #[error("index {index} out of range (segment has {len} records)")]
    OutOfRange {
        /// The requested index.
        index: usize,
        /// The segment's record count.
        len: usize,
    },

    /// The encoded size of an appended record did not match the codec's
    /// `record_size()`.
    #[error("schema mismatch: expected {expected} bytes, got {got}")]
    SchemaMismatch {
        /// Expected, fixed record size.
        expected: usize,
        /// Size actually produced by the codec for this record.
        got: usize,
    },

    /// Any underlying filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a fixed-width record block failed to decode.
#[derive(Debug, thiserror::Error)]
pub enum CorruptRecord {
    /// The byte slice handed to `decode` was not exactly `record_size()`
    /// bytes long.
    #[error("expected {expected} bytes, got {got}")]
    WrongLength {
        /// Expected byte length.
        expected: usize,
        /// Byte length actually supplied.
        got: usize,
    },

    /// The `fmt` descriptor string could not be parsed into a schema.
    #[error("invalid format descriptor {0:?}")]
    InvalidDescriptor(String),
}
