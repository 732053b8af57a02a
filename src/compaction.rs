//! The background compactor: a single worker thread that repeatedly
//! merges the two smallest eligible segments into one larger segment.
//!
//! Re-architected per the "cyclic/backward references" redesign note:
//! the compactor holds no reference back to the journal façade. It owns
//! only the sending half of a results channel and a handle to a shared
//! blocking priority queue (the "in-queue") that both the façade and the
//! compactor's own requeue push onto. The façade is the one that owns
//! the segment set — it drains the results channel (lazily, on its own
//! call paths) and applies each result.

use crate::{
    codec::Codec,
    merge::merge_two,
    segment::{Segment, Writer},
    Result,
};
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    path::PathBuf,
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
    time::Duration,
};
use uuid::Uuid;

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

struct Entry<C: Codec> {
    priority: usize,
    seq: u64,
    segment: Segment<C>,
}

impl<C: Codec> PartialEq for Entry<C> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<C: Codec> Eq for Entry<C> {}

impl<C: Codec> PartialOrd for Entry<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: Codec> Ord for Entry<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed, so a std `BinaryHeap` (a max-heap) surfaces the
        // *smallest* priority first; ties broken oldest-enqueued-first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<C: Codec> {
    heap: BinaryHeap<Entry<C>>,
    next_seq: u64,
    shutdown: bool,
}

/// An ordinary blocking concurrent min-priority queue, keyed by segment
/// record count. Shared between the journal façade (which pushes freshly
/// flushed segments) and the compactor (which pops two at a time and
/// pushes its own output back in).
pub(crate) struct PriorityQueue<C: Codec> {
    state: Mutex<QueueState<C>>,
    condvar: Condvar,
}

impl<C: Codec> PriorityQueue<C> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, priority: usize, segment: Segment<C>) {
        let mut state = self.state.lock().expect("priority queue mutex poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            priority,
            seq,
            segment,
        });
        self.condvar.notify_all();
    }

    /// Blocks until at least two segments are available, then pops the
    /// two smallest. Returns `None` once shutdown has been requested and
    /// fewer than two segments remain — the compactor thread's signal to
    /// exit.
    fn pop_two(&self) -> Option<(Segment<C>, Segment<C>)> {
        let mut state = self.state.lock().expect("priority queue mutex poisoned");
        loop {
            if state.heap.len() >= 2 {
                let a = state.heap.pop().expect("checked len").segment;
                let b = state.heap.pop().expect("checked len").segment;
                return Some((a, b));
            }
            if state.shutdown {
                return None;
            }
            state = self
                .condvar
                .wait(state)
                .expect("priority queue mutex poisoned");
        }
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock().expect("priority queue mutex poisoned");
        state.shutdown = true;
        self.condvar.notify_all();
    }
}

/// One completed merge, sent from the compactor to the journal façade so
/// the façade can update its segment set.
pub(crate) struct MergeResult<C: Codec> {
    pub(crate) added: Segment<C>,
    pub(crate) removed: [Uuid; 2],
}

/// Starts the compactor thread. The returned handle should be joined
/// after calling [`PriorityQueue::shutdown`] on the same queue.
pub(crate) fn spawn<C: Codec>(
    dir: PathBuf,
    codec: C,
    queue: Arc<PriorityQueue<C>>,
    results: crossbeam_channel::Sender<MergeResult<C>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        log::debug!("compactor thread started for {dir:?}");

        loop {
            let Some((a, b)) = queue.pop_two() else {
                log::debug!("compactor thread shutting down for {dir:?}");
                break;
            };

            match merge_pair(&dir, &codec, &a, &b) {
                Ok(output) => {
                    let len = output.len();
                    log::debug!(
                        "compacted segments {} + {} into {} ({len} records)",
                        a.id(),
                        b.id(),
                        output.id()
                    );

                    let result = MergeResult {
                        added: output.clone(),
                        removed: [a.id(), b.id()],
                    };

                    if results.send(result).is_err() {
                        // The journal side has been dropped; there is no
                        // one left to publish to, so stop merging.
                        break;
                    }

                    queue.push(len, output);

                    if let Err(error) = a.destroy_if_retired() {
                        log::warn!("failed to unlink retired segment {}: {error}", a.id());
                    }
                    if let Err(error) = b.destroy_if_retired() {
                        log::warn!("failed to unlink retired segment {}: {error}", b.id());
                    }
                }
                Err(error) => {
                    log::warn!(
                        "compaction of {} + {} failed, retrying after backoff: {error}",
                        a.id(),
                        b.id()
                    );
                    std::thread::sleep(RETRY_BACKOFF);
                    queue.push(a.len(), a);
                    queue.push(b.len(), b);
                }
            }
        }
    })
}

/// Performs one straight two-way merge of `a` and `b`, publishing the
/// result and retiring both inputs. On a tie, emits from `b` — matching
/// the original implementation's tie-break.
fn merge_pair<C: Codec>(
    dir: &std::path::Path,
    codec: &C,
    a: &Segment<C>,
    b: &Segment<C>,
) -> Result<Segment<C>> {
    let iter_a = a.iterate()?;
    let iter_b = b.iterate()?;

    let mut writer = Writer::create(dir, codec.clone())?;
    merge_two(iter_a, iter_b, |record| writer.write(&record))?;
    let output = writer.finish()?;

    output.activate()?;
    a.retire()?;
    b.retire()?;

    Ok(output)
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
    fn priority_queue_pops_smallest_first() {
        let queue: PriorityQueue<Format> = PriorityQueue::new();
        let dir = tempfile::tempdir().unwrap();

        let small = write_segment(dir.path(), &[1]);
        let medium = write_segment(dir.path(), &[1, 2, 3]);
        let large = write_segment(dir.path(), &[1, 2, 3, 4, 5]);

        queue.push(large.len(), large.clone());
        queue.push(small.len(), small.clone());
        queue.push(medium.len(), medium.clone());

        let (a, b) = queue.pop_two().unwrap();
        assert_eq!(a.id(), small.id());
        assert_eq!(b.id(), medium.id());
    }

    #[test]
    fn pop_two_returns_none_after_shutdown_with_fewer_than_two() {
        let queue: PriorityQueue<Format> = PriorityQueue::new();
        let dir = tempfile::tempdir().unwrap();
        queue.push(1, write_segment(dir.path(), &[1]));
        queue.shutdown();
        assert!(queue.pop_two().is_none());
    }

    #[test]
    fn merge_pair_combines_and_retires_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_segment(dir.path(), &[0, 1, 49, 500, 510, 990]);
        let b = write_segment(dir.path(), &[0, 2, 4, 198]);

        let output = merge_pair(dir.path(), &format(), &a, &b).unwrap();

        assert!(!a.is_active());
        assert!(!b.is_active());
        assert!(output.is_active());
        assert_eq!(output.len(), a.len() + b.len());

        let got: Vec<i32> = output
            .iterate()
            .unwrap()
            .map(|r| match r.unwrap().values()[0] {
                Value::I32(v) => v,
                _ => unreachable!(),
            })
            .collect();

        let mut expected: Vec<i32> = vec![0, 1, 49, 500, 510, 990, 0, 2, 4, 198];
        expected.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn end_to_end_compaction_via_spawned_thread() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(PriorityQueue::<Format>::new());
        let (tx, rx) = crossbeam_channel::unbounded();

        let handle = spawn(dir.path().to_path_buf(), format(), queue.clone(), tx);

        let a = write_segment(dir.path(), &[1, 3, 5]);
        let b = write_segment(dir.path(), &[2, 4, 6]);
        queue.push(a.len(), a.clone());
        queue.push(b.len(), b.clone());

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.removed, [a.id(), b.id()]);
        assert_eq!(result.added.len(), 6);

        queue.shutdown();
        handle.join().unwrap();
    }
}
