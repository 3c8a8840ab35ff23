// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! The in-memory block pool.
//!
//! All physical byte access in the storage layer goes through a pinned
//! [`BufferHandle`]. A handle keeps its block alive for as long as it exists;
//! byte access happens through short-lived read/write guards so that no lock
//! is ever held across a call into another component.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

pub type BlockId = u32;

/// Marks a block that has no registered identity (purely transient memory).
pub const INVALID_BLOCK: BlockId = BlockId::MAX;

/// What an allocation is charged to, for memory accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryTag {
    InMemoryTable,
    Transaction,
    OverflowStrings,
}

impl MemoryTag {
    fn index(self) -> usize {
        match self {
            MemoryTag::InMemoryTable => 0,
            MemoryTag::Transaction => 1,
            MemoryTag::OverflowStrings => 2,
        }
    }
}

/// One allocated block. The buffer is behind a lock; access it through a
/// pinned [`BufferHandle`].
pub struct BlockHandle {
    id: BlockId,
    tag: MemoryTag,
    buffer: RwLock<Vec<u8>>,
}

impl BlockHandle {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn tag(&self) -> MemoryTag {
        self.tag
    }

    pub fn size(&self) -> usize {
        self.buffer.read().len()
    }
}

/// A pin on a block. Dropping the handle releases the pin.
pub struct BufferHandle {
    block: Arc<BlockHandle>,
}

impl BufferHandle {
    pub fn block(&self) -> &Arc<BlockHandle> {
        &self.block
    }

    /// Read access to the block bytes. Keep the guard short-lived.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.block.buffer.read()
    }

    /// Write access to the block bytes. Keep the guard short-lived.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.block.buffer.write()
    }
}

/// Hands out and pins in-memory blocks and accounts their memory per tag.
pub struct BufferManager {
    block_size: usize,
    next_block_id: AtomicU32,
    memory_used: [AtomicUsize; 3],
}

impl BufferManager {
    pub fn new(block_size: usize) -> Arc<Self> {
        Arc::new(Self {
            block_size,
            next_block_id: AtomicU32::new(0),
            memory_used: Default::default(),
        })
    }

    /// The size of a standard block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Allocates a zeroed block of `size` bytes and pins it.
    pub fn allocate(&self, tag: MemoryTag, size: usize) -> BufferHandle {
        let id = self.next_block_id.fetch_add(1, Ordering::Relaxed);
        self.memory_used[tag.index()].fetch_add(size, Ordering::Relaxed);
        trace!(block_id = id, size, ?tag, "allocate block");
        BufferHandle {
            block: Arc::new(BlockHandle {
                id,
                tag,
                buffer: RwLock::new(vec![0; size]),
            }),
        }
    }

    /// Registers transient memory for a column segment: a zeroed block of
    /// `size` bytes, never larger than a standard block.
    pub fn register_transient(&self, size: usize) -> Arc<BlockHandle> {
        debug_assert!(size <= self.block_size);
        self.allocate(MemoryTag::InMemoryTable, size).block
    }

    /// Pins an existing block.
    pub fn pin(&self, block: &Arc<BlockHandle>) -> BufferHandle {
        BufferHandle {
            block: block.clone(),
        }
    }

    /// Bytes currently allocated under `tag`.
    pub fn memory_used(&self, tag: MemoryTag) -> usize {
        self.memory_used[tag.index()].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_pin() {
        let manager = BufferManager::new(4096);
        let handle = manager.allocate(MemoryTag::InMemoryTable, 128);
        assert_eq!(handle.read().len(), 128);
        handle.write()[0] = 0xAB;

        let block = handle.block().clone();
        let second = manager.pin(&block);
        assert_eq!(second.read()[0], 0xAB);
        assert_eq!(manager.memory_used(MemoryTag::InMemoryTable), 128);
    }

    #[test]
    fn block_ids_are_unique() {
        let manager = BufferManager::new(4096);
        let a = manager.allocate(MemoryTag::Transaction, 8);
        let b = manager.allocate(MemoryTag::Transaction, 8);
        assert_ne!(a.block().id(), b.block().id());
    }
}
