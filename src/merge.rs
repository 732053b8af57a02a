//! Generic streaming merges over multiple already-sorted sources.
//!
//! Used in two places: the compactor's two-way segment merge
//! ([`merge_two`]), and the journal façade's k-way merge across the
//! buffer and every segment in a snapshot ([`KWayMerge`]). Both are the
//! same idea — repeatedly emit the smallest current head — so this
//! module owns the comparator logic once instead of duplicating it.

use crate::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Streams the sorted union of two already-sorted record iterators.
///
/// On a tie, emits from `b` (the second/right-hand operand) — matching
/// the original implementation's tie-break (`OPJ.py`'s `Combine.run`
/// prefers the right operand in its `if/elif` chain).
///
/// I/O is O(|a| + |b|), memory is O(1) beyond the two current heads.
pub fn merge_two<T, A, B>(mut a: A, mut b: B, mut emit: impl FnMut(T) -> Result<()>) -> Result<usize>
where
    T: Ord,
    A: Iterator<Item = Result<T>>,
    B: Iterator<Item = Result<T>>,
{
    let mut head_a = a.next().transpose()?;
    let mut head_b = b.next().transpose()?;
    let mut count = 0_usize;

    loop {
        match (&head_a, &head_b) {
            (None, None) => break,
            (Some(_), None) => {
                emit(head_a.take().unwrap())?;
                head_a = a.next().transpose()?;
            }
            (None, Some(_)) => {
                emit(head_b.take().unwrap())?;
                head_b = b.next().transpose()?;
            }
            (Some(va), Some(vb)) => {
                if va < vb {
                    emit(head_a.take().unwrap())?;
                    head_a = a.next().transpose()?;
                } else {
                    emit(head_b.take().unwrap())?;
                    head_b = b.next().transpose()?;
                }
            }
        }
        count += 1;
    }

    Ok(count)
}

/// One live source in a [`KWayMerge`]: its current head value plus the
/// rest of its iterator, ordered by head value only (reversed, so a
/// `BinaryHeap` — a max-heap — surfaces the smallest head first).
struct Source<T, I> {
    head: T,
    rest: I,
    /// Tie-break: sources registered later win ties against earlier
    /// ones, matching [`merge_two`]'s "prefer the right-hand side".
    order: usize,
}

impl<T: Ord, I> PartialEq for Source<T, I> {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head && self.order == other.order
    }
}
impl<T: Ord, I> Eq for Source<T, I> {}

impl<T: Ord, I> PartialOrd for Source<T, I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord, I> Ord for Source<T, I> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap (a max-heap) pops the smallest head;
        // ties broken by `order` so the later-registered source wins,
        // consistent with merge_two's right-hand preference.
        other
            .head
            .cmp(&self.head)
            .then_with(|| self.order.cmp(&other.order))
    }
}

/// A lazy k-way merge over any number of already-sorted sources.
///
/// Streams the globally smallest head from a priority queue of
/// `(current value, source iterator)` pairs, re-queueing each source
/// after it yields. Exhausted sources are dropped; an errored source is
/// dropped too (spec §7: "errors during iteration close the offending
/// source and continue with the remainder").
pub struct KWayMerge<T, I> {
    heap: BinaryHeap<Source<T, I>>,
    next_order: usize,
}

impl<T, I> KWayMerge<T, I>
where
    T: Ord,
    I: Iterator<Item = Result<T>>,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_order: 0,
        }
    }

    /// Registers one sorted source. Pulls its first item eagerly; a
    /// source that is already exhausted, or whose first read errors, is
    /// simply not registered (errors are logged by the caller before
    /// registration if they want to surface them — here we match spec
    /// §7's "prefix-correct subset" policy by dropping it silently).
    pub fn push(&mut self, mut source: I) {
        match source.next() {
            Some(Ok(head)) => {
                let order = self.next_order;
                self.next_order += 1;
                self.heap.push(Source {
                    head,
                    rest: source,
                    order,
                });
            }
            Some(Err(error)) => {
                log::warn!("dropping merge source after read error: {error}");
            }
            None => {}
        }
    }
}

impl<T, I> Default for KWayMerge<T, I>
where
    T: Ord,
    I: Iterator<Item = Result<T>>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, I> Iterator for KWayMerge<T, I>
where
    T: Ord,
    I: Iterator<Item = Result<T>>,
{
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let Source {
            head,
            mut rest,
            order,
        } = self.heap.pop()?;

        match rest.next() {
            Some(Ok(next_head)) => {
                self.heap.push(Source {
                    head: next_head,
                    rest,
                    order,
                });
            }
            Some(Err(error)) => {
                log::warn!("dropping merge source after read error: {error}");
            }
            None => {}
        }

        Some(head)
    }
}
