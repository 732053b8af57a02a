use std::{fs::File, io::Write, path::Path};

/// The schema descriptor, persisted once at journal creation.
pub const FMT_FILE: &str = "fmt";

/// The in-memory buffer's write-through crash log.
pub const BUFFER_FILE: &str = "buffer";

/// Extension every segment file carries, active or hidden.
pub const SEGMENT_EXT: &str = "opj";

/// Returns the active (visible) filename for a segment id.
pub fn active_name(id: uuid::Uuid) -> String {
    format!("{id}.{SEGMENT_EXT}")
}

/// Returns the hidden (in-flight or retired) filename for a segment id.
pub fn hidden_name(id: uuid::Uuid) -> String {
    format!("_{id}.{SEGMENT_EXT}")
}

/// True if `name` is a hidden file (`_`-prefixed) within a journal
/// directory — readers must ignore these.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('_')
}

/// True if `name` matches the dot-qualified segment suffix (`*.opj`),
/// i.e. the spec's literal glob — not merely any filename ending in the
/// bare substring `"opj"`.
pub fn has_segment_extension(name: &str) -> bool {
    name.ends_with(&format!(".{SEGMENT_EXT}"))
}

/// Atomically rewrites a file's entire content.
///
/// Writes to a temporary file in the same directory, then renames over
/// the target; the rename is atomic on any POSIX-compatible filesystem,
/// so a reader never observes a partially written file.
pub fn rewrite_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    let folder = path.parent().expect("should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.persist(path)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = File::open(path)?;
        file.sync_all()?;
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory<P: AsRef<Path>>(_path: P) -> std::io::Result<()> {
    // Cannot fsync a directory handle on Windows.
    Ok(())
}
