//! The journal's segment set: the active segments it is currently aware
//! of. Mutations are add-after-activate and remove-after-retire (spec
//! §5); an iterator snapshots the set once at the start of its
//! lifetime, so a concurrent compaction can never invalidate an
//! in-progress iteration.

use crate::{codec::Codec, segment::Segment};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone)]
pub(crate) struct SegmentRegistry<C: Codec> {
    segments: Arc<Mutex<FxHashMap<Uuid, Segment<C>>>>,
}

impl<C: Codec> SegmentRegistry<C> {
    pub(crate) fn new() -> Self {
        Self {
            segments: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    pub(crate) fn insert(&self, segment: Segment<C>) {
        self.segments
            .lock()
            .expect("segment registry mutex poisoned")
            .insert(segment.id(), segment);
    }

    pub(crate) fn remove(&self, id: Uuid) {
        self.segments
            .lock()
            .expect("segment registry mutex poisoned")
            .remove(&id);
    }

    /// A point-in-time copy of every segment handle currently
    /// registered, cheap because each handle is an `Arc` clone.
    pub(crate) fn snapshot(&self) -> Vec<Segment<C>> {
        self.segments
            .lock()
            .expect("segment registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn len_records(&self) -> usize {
        self.segments
            .lock()
            .expect("segment registry mutex poisoned")
            .values()
            .map(Segment::len)
            .sum()
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments
            .lock()
            .expect("segment registry mutex poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Format;
    use crate::segment::Writer;
    use test_log::test;

    fn new_segment(dir: &std::path::Path) -> Segment<Format> {
        let writer = Writer::create(dir, Format::parse("i").unwrap()).unwrap();
        let segment = writer.finish().unwrap();
        segment.activate().unwrap();
        segment
    }

    #[test]
    fn insert_snapshot_remove() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SegmentRegistry::<Format>::new();

        let a = new_segment(dir.path());
        let b = new_segment(dir.path());
        registry.insert(a.clone());
        registry.insert(b.clone());

        assert_eq!(registry.segment_count(), 2);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);

        registry.remove(a.id());
        assert_eq!(registry.segment_count(), 1);

        // The earlier snapshot is unaffected by the subsequent remove.
        assert_eq!(snapshot.len(), 2);
    }
}
