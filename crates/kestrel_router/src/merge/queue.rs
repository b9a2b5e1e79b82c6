use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use kestrel_common::sort::extract_sort_key;
use kestrel_common::{Document, SortSpec};

/// Min-heap of remote indices keyed by each remote's current head
/// document.
///
/// An index is pushed only when its remote's head changes: when the buffer
/// goes from empty to non-empty at the end of a batch append, or when the
/// index is popped and the remote still has buffered documents. Each entry
/// therefore carries a snapshot of the head's sort key that stays accurate
/// for as long as the entry is in the heap, and the queue never needs a
/// defensive rebuild.
pub(crate) struct MergeQueue {
    heap: BinaryHeap<Reverse<MergeEntry>>,
    sort: Arc<SortSpec>,
}

struct MergeEntry {
    key: Document,
    remote_index: usize,
    sort: Arc<SortSpec>,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort.compare_keys(&self.key, &other.key)
    }
}

impl MergeQueue {
    pub(crate) fn new(sort: SortSpec) -> Self {
        Self {
            heap: BinaryHeap::new(),
            sort: Arc::new(sort),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Record `remote_index` with its head document's sort key. The head
    /// must carry a well-formed sort key; batch validation guarantees it.
    pub(crate) fn push_head(&mut self, remote_index: usize, head: &Document) {
        let Some(key) = extract_sort_key(head) else {
            debug_assert!(false, "buffered document without sort key");
            return;
        };
        self.heap.push(Reverse(MergeEntry {
            key: key.clone(),
            remote_index,
            sort: Arc::clone(&self.sort),
        }));
    }

    /// Remove and return the remote index whose head sorts smallest.
    pub(crate) fn pop(&mut self) -> Option<usize> {
        self.heap.pop().map(|Reverse(entry)| entry.remote_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::sort::SORT_KEY_FIELD;
    use kestrel_common::SortField;
    use serde_json::json;

    fn doc(k: i64) -> Document {
        json!({"_id": k, SORT_KEY_FIELD: {"k": k}})
    }

    #[test]
    fn pops_smallest_head_first() {
        let mut q = MergeQueue::new(SortSpec::new(vec![SortField::asc("k")]));
        q.push_head(0, &doc(5));
        q.push_head(1, &doc(2));
        q.push_head(2, &doc(4));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn descending_spec_reverses_pop_order() {
        let mut q = MergeQueue::new(SortSpec::new(vec![SortField::desc("k")]));
        q.push_head(0, &doc(5));
        q.push_head(1, &doc(2));
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), Some(1));
    }

    #[test]
    fn repush_after_pop_keeps_order() {
        let mut q = MergeQueue::new(SortSpec::new(vec![SortField::asc("k")]));
        q.push_head(0, &doc(1));
        q.push_head(1, &doc(2));
        assert_eq!(q.pop(), Some(0));
        // Remote 0's next head is 3; remote 1 should win now.
        q.push_head(0, &doc(3));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(0));
    }
}
