// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{StorageError, StorageResult};

/// A node of a [`SegmentTree`]: a contiguous run of rows with a global start
/// offset and a tree-local index for O(1) successor lookup.
pub trait SegmentNode: Send + Sync {
    fn start(&self) -> u64;
    fn count(&self) -> u64;
    fn index(&self) -> u64;
    fn set_index(&self, index: u64);
}

/// Hook used by lazily-materialized trees to produce the next segment on
/// demand. Returning `None` marks loading as finished.
pub trait SegmentLoader<T>: Send {
    fn load_segment(&mut self) -> Option<Arc<T>>;
}

pub struct SegmentTreeNode<T> {
    pub row_start: u64,
    pub node: Arc<T>,
}

struct TreeInner<T: SegmentNode> {
    nodes: Vec<SegmentTreeNode<T>>,
    loader: Option<Box<dyn SegmentLoader<T>>>,
}

/// An ordered, indexable, optionally lazily-materialized sequence of
/// segments. Segments are stored in a vector and linked by index, so erasing
/// or moving the tail can never leave a dangling successor pointer.
///
/// Invariants: segments are contiguous and gapless
/// (`node[i].start + node[i].count == node[i + 1].start`), `row_start`
/// mirrors each node's `start`, and a node's `index()` is its position in
/// the vector.
pub struct SegmentTree<T: SegmentNode> {
    inner: Mutex<TreeInner<T>>,
    finished_loading: AtomicBool,
}

impl<T: SegmentNode> Default for SegmentTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SegmentNode> SegmentTree<T> {
    /// A fully materialized (non-lazy) tree.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TreeInner {
                nodes: vec![],
                loader: None,
            }),
            finished_loading: AtomicBool::new(true),
        }
    }

    /// A lazily-loading tree; segments materialize on demand via `loader`.
    pub fn with_loader(loader: Box<dyn SegmentLoader<T>>) -> Self {
        Self {
            inner: Mutex::new(TreeInner {
                nodes: vec![],
                loader: Some(loader),
            }),
            finished_loading: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> SegmentTreeGuard<'_, T> {
        SegmentTreeGuard {
            inner: self.inner.lock(),
            finished_loading: &self.finished_loading,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.lock().segment_count()
    }

    pub fn root_segment(&self) -> Option<Arc<T>> {
        self.lock().root_segment()
    }

    pub fn last_segment(&self) -> Option<Arc<T>> {
        self.lock().last_segment()
    }

    /// The segment at `index`; negative indices count from the end.
    pub fn segment_at(&self, index: i64) -> Option<Arc<T>> {
        self.lock().segment_at(index)
    }

    /// The segment containing `row_number`.
    pub fn get_segment(&self, row_number: u64) -> StorageResult<Arc<T>> {
        self.lock().get_segment(row_number)
    }

    /// The successor of `segment`, loading it if necessary.
    pub fn next_segment(&self, segment: &T) -> Option<Arc<T>> {
        self.lock().segment_at(segment.index() as i64 + 1)
    }

    pub fn append_segment(&self, segment: Arc<T>) {
        self.lock().append_segment(segment);
    }

    /// A snapshot of all segments, materializing lazy ones first.
    pub fn segments(&self) -> Vec<Arc<T>> {
        let mut guard = self.lock();
        guard.load_all_segments();
        guard.inner.nodes.iter().map(|n| n.node.clone()).collect()
    }
}

pub struct SegmentTreeGuard<'a, T: SegmentNode> {
    inner: MutexGuard<'a, TreeInner<T>>,
    finished_loading: &'a AtomicBool,
}

impl<T: SegmentNode> SegmentTreeGuard<'_, T> {
    pub fn is_empty(&mut self) -> bool {
        self.root_segment().is_none()
    }

    pub fn segment_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn root_segment(&mut self) -> Option<Arc<T>> {
        if self.inner.nodes.is_empty() {
            self.load_next_segment();
        }
        self.inner.nodes.first().map(|n| n.node.clone())
    }

    pub fn last_segment(&mut self) -> Option<Arc<T>> {
        self.load_all_segments();
        self.inner.nodes.last().map(|n| n.node.clone())
    }

    pub fn segment_at(&mut self, index: i64) -> Option<Arc<T>> {
        if index < 0 {
            self.load_all_segments();
            let index = index + self.inner.nodes.len() as i64;
            if index < 0 {
                return None;
            }
            self.inner.nodes.get(index as usize).map(|n| n.node.clone())
        } else {
            while index as usize >= self.inner.nodes.len() && self.load_next_segment() {}
            self.inner.nodes.get(index as usize).map(|n| n.node.clone())
        }
    }

    pub fn next_segment(&mut self, segment: &T) -> Option<Arc<T>> {
        self.segment_at(segment.index() as i64 + 1)
    }

    pub fn get_segment(&mut self, row_number: u64) -> StorageResult<Arc<T>> {
        let index = self.segment_index(row_number)?;
        Ok(self.inner.nodes[index].node.clone())
    }

    pub fn segment_index(&mut self, row_number: u64) -> StorageResult<usize> {
        self.try_segment_index(row_number)?.ok_or_else(|| {
            StorageError::internal(format!("could not find row {row_number} in segment tree"))
        })
    }

    /// Binary search by `start`; loads lazy segments until the row is
    /// covered or loading finishes.
    pub fn try_segment_index(&mut self, row_number: u64) -> StorageResult<Option<usize>> {
        loop {
            match self.inner.nodes.last() {
                Some(last) if row_number < last.row_start + last.node.count() => break,
                _ => {
                    if !self.load_next_segment() {
                        break;
                    }
                }
            }
        }
        if self.inner.nodes.is_empty() {
            return Ok(None);
        }
        let nodes = &self.inner.nodes;
        let mut lower = 0usize;
        let mut upper = nodes.len() - 1;
        while lower <= upper {
            let index = (lower + upper) / 2;
            let entry = &nodes[index];
            debug_assert_eq!(entry.row_start, entry.node.start());
            if row_number < entry.row_start {
                if index == 0 {
                    return Ok(None);
                }
                upper = index - 1;
            } else if row_number >= entry.row_start + entry.node.count() {
                lower = index + 1;
            } else {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    pub fn append_segment(&mut self, segment: Arc<T>) {
        self.load_all_segments();
        self.append_segment_internal(segment);
    }

    fn append_segment_internal(&mut self, segment: Arc<T>) {
        segment.set_index(self.inner.nodes.len() as u64);
        self.inner.nodes.push(SegmentTreeNode {
            row_start: segment.start(),
            node: segment,
        });
    }

    pub fn has_segment(&self, segment: &T) -> bool {
        let index = segment.index() as usize;
        self.inner
            .nodes
            .get(index)
            .map(|n| std::ptr::eq(n.node.as_ref(), segment))
            .unwrap_or(false)
    }

    /// Truncates the tail, keeping segments `0..=index`. Used for append
    /// rollback.
    pub fn erase_after(&mut self, index: usize) {
        self.load_all_segments();
        if index + 1 >= self.inner.nodes.len() {
            return;
        }
        self.inner.nodes.truncate(index + 1);
    }

    /// Detaches the whole sequence, leaving this tree empty.
    pub fn move_segments(&mut self) -> Vec<SegmentTreeNode<T>> {
        self.load_all_segments();
        std::mem::take(&mut self.inner.nodes)
    }

    pub fn reference_segments(&mut self) -> &[SegmentTreeNode<T>] {
        self.load_all_segments();
        &self.inner.nodes
    }

    /// Re-derives `row_start` from the nodes' starts after they have been
    /// re-anchored; errors if the sequence has a gap.
    pub fn reinitialize(&mut self) -> StorageResult<()> {
        if self.inner.nodes.is_empty() {
            return Ok(());
        }
        let mut offset = self.inner.nodes[0].node.start();
        for entry in &mut self.inner.nodes {
            if entry.node.start() != offset {
                return Err(StorageError::internal(
                    "gap found between segment tree nodes",
                ));
            }
            entry.row_start = offset;
            offset += entry.node.count();
        }
        Ok(())
    }

    fn load_next_segment(&mut self) -> bool {
        if self.finished_loading.load(Ordering::Acquire) {
            return false;
        }
        let loaded = self.inner.loader.as_mut().and_then(|l| l.load_segment());
        match loaded {
            Some(segment) => {
                self.append_segment_internal(segment);
                true
            }
            None => {
                self.finished_loading.store(true, Ordering::Release);
                false
            }
        }
    }

    fn load_all_segments(&mut self) {
        while self.load_next_segment() {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    struct TestSegment {
        start: u64,
        count: u64,
        index: AtomicU64,
    }

    impl TestSegment {
        fn new(start: u64, count: u64) -> Arc<Self> {
            Arc::new(Self {
                start,
                count,
                index: AtomicU64::new(0),
            })
        }
    }

    impl SegmentNode for TestSegment {
        fn start(&self) -> u64 {
            self.start
        }
        fn count(&self) -> u64 {
            self.count
        }
        fn index(&self) -> u64 {
            self.index.load(Ordering::Relaxed)
        }
        fn set_index(&self, index: u64) {
            self.index.store(index, Ordering::Relaxed);
        }
    }

    fn build_tree(counts: &[u64]) -> SegmentTree<TestSegment> {
        let tree = SegmentTree::new();
        let mut start = 0;
        for &count in counts {
            tree.append_segment(TestSegment::new(start, count));
            start += count;
        }
        tree
    }

    #[test]
    fn lookup_by_row() {
        let tree = build_tree(&[10, 20, 5]);
        assert_eq!(tree.get_segment(0).unwrap().start(), 0);
        assert_eq!(tree.get_segment(9).unwrap().start(), 0);
        assert_eq!(tree.get_segment(10).unwrap().start(), 10);
        assert_eq!(tree.get_segment(29).unwrap().start(), 10);
        assert_eq!(tree.get_segment(34).unwrap().start(), 30);
        assert!(tree.get_segment(35).is_err());
    }

    #[test]
    fn negative_indexing() {
        let tree = build_tree(&[10, 20, 5]);
        assert_eq!(tree.segment_at(-1).unwrap().start(), 30);
        assert_eq!(tree.segment_at(-3).unwrap().start(), 0);
        assert!(tree.segment_at(-4).is_none());
        assert!(tree.segment_at(3).is_none());
    }

    #[test]
    fn successor_via_index() {
        let tree = build_tree(&[10, 20]);
        let root = tree.root_segment().unwrap();
        let next = tree.next_segment(&root).unwrap();
        assert_eq!(next.start(), 10);
        assert!(tree.next_segment(&next).is_none());
    }

    #[test]
    fn erase_tail() {
        let tree = build_tree(&[10, 10, 10]);
        tree.lock().erase_after(0);
        assert_eq!(tree.segment_count(), 1);
        assert_eq!(tree.last_segment().unwrap().start(), 0);
    }

    #[test]
    fn contiguity_holds() {
        let tree = build_tree(&[7, 13, 22]);
        let segments = tree.segments();
        for pair in segments.windows(2) {
            assert_eq!(pair[0].start() + pair[0].count(), pair[1].start());
        }
    }

    struct CountLoader {
        next: u64,
        remaining: u64,
    }

    impl SegmentLoader<TestSegment> for CountLoader {
        fn load_segment(&mut self) -> Option<Arc<TestSegment>> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            let segment = TestSegment::new(self.next, 8);
            self.next += 8;
            Some(segment)
        }
    }

    #[test]
    fn lazy_loading_materializes_on_demand() {
        let tree = SegmentTree::with_loader(Box::new(CountLoader {
            next: 0,
            remaining: 4,
        }));
        // Looking up a row in the third segment forces three loads.
        let segment = tree.get_segment(17).unwrap();
        assert_eq!(segment.start(), 16);
        assert_eq!(tree.lock().segment_count(), 3);
        // A full snapshot drains the loader.
        assert_eq!(tree.segments().len(), 4);
        assert!(tree.segment_at(4).is_none());
    }
}
