//! Persistent fixed-size block allocation
//!
//! A [`BlockFile`] treats a [`Mapper`] as an array of fixed-size blocks.
//! Block 0 holds the root free-list header; [`allocate`](BlockFile::allocate)
//! hands out block indices ≥ 1 and [`free`](BlockFile::free) returns them to
//! a free list persisted inside the file itself, so the allocator state
//! survives reopen without a separate journal.
//!
//! The free list is a singly linked chain of header blocks rooted at block 0.
//! Each node stores a LIFO stack of free block indices in its payload. When
//! the root's stack overflows, the freed block itself is recruited as a new
//! overflow node and threaded in behind the root; when an overflow node
//! drains, it is reclaimed as ordinary storage.
//!
//! There are no transactions: an OS failure in the middle of a multi-step
//! `free` or `allocate` can leak a block or leave the chain inconsistent, and
//! the caller must treat subsequent results as suspect. The caller also
//! serialises access; the allocator performs no locking of its own.

use crate::error::{BlockFileError, Result};
use crate::header::{FreeListNode, HeaderFields, HEADER_SIZE};
use crate::mapped_file::MappedFile;
use crate::mapper::Mapper;
use std::path::Path;
use tracing::debug;

/// Block size used by [`BlockFile::create`] and
/// [`BlockFile::create_in_mapper`].
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// A fixed-size block allocator over a [`Mapper`].
///
/// All allocator state lives in the mapper; the handle itself only caches the
/// block size. Dropping the handle closes the mapper best-effort, but
/// [`close`](BlockFile::close) reports errors and should be preferred.
pub struct BlockFile<M: Mapper = MappedFile> {
    mapper: Option<M>,
    block_size: u32,
}

impl BlockFile<MappedFile> {
    /// Create a new block file at `path` with [`DEFAULT_BLOCK_SIZE`].
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_block_size(path, DEFAULT_BLOCK_SIZE)
    }

    /// Create a new block file at `path` with the given block size.
    pub fn create_with_block_size<P: AsRef<Path>>(path: P, block_size: u32) -> Result<Self> {
        let mapped = MappedFile::create(path, block_size as u64)?;
        Self::create_in_mapper_with_block_size(mapped, block_size)
    }

    /// Open an existing block file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mapped = MappedFile::open(path)?;
        Self::open_from_mapper(mapped)
    }
}

impl<M: Mapper> BlockFile<M> {
    /// Initialize a block file inside `mapper` with [`DEFAULT_BLOCK_SIZE`].
    pub fn create_in_mapper(mapper: M) -> Result<Self> {
        Self::create_in_mapper_with_block_size(mapper, DEFAULT_BLOCK_SIZE)
    }

    /// Initialize a block file inside `mapper` with the given block size.
    ///
    /// Truncates the mapper to one block and writes an empty free-list root
    /// at block 0. The block size must fit at least the 20-byte header.
    pub fn create_in_mapper_with_block_size(mut mapper: M, block_size: u32) -> Result<Self> {
        if (block_size as usize) < HEADER_SIZE {
            return Err(BlockFileError::BlockSizeTooSmall(block_size));
        }
        mapper.truncate(block_size as u64)?;
        let mut bf = BlockFile {
            mapper: Some(mapper),
            block_size,
        };
        bf.init_header_block(0, 0)?;
        debug!(block_size, "created block file");
        Ok(bf)
    }

    /// Open a block file already present in `mapper`.
    ///
    /// Reads and validates the root header, derives the block size from it,
    /// and checks the mapper holds at least one block.
    pub fn open_from_mapper(mut mapper: M) -> Result<Self> {
        let mut block_size = 0u32;
        mapper.map(0, HEADER_SIZE, |data| {
            let fields = HeaderFields::read_from(data);
            fields.validate()?;
            block_size = fields.block_size;
            Ok(())
        })?;
        if mapper.size() < block_size as usize {
            return Err(BlockFileError::MapperTooSmall {
                size: mapper.size(),
                block_size,
            });
        }
        debug!(block_size, "opened block file");
        Ok(BlockFile {
            mapper: Some(mapper),
            block_size,
        })
    }

    /// Size of a single block in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Close the underlying mapper. Idempotent; after closing, every other
    /// operation fails with a "closed" error.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut mapper) = self.mapper.take() {
            mapper.close()?;
        }
        Ok(())
    }

    fn mapper_mut(&mut self) -> Result<&mut M> {
        self.mapper.as_mut().ok_or(BlockFileError::Closed)
    }

    /// Scoped access to the bytes of `block`.
    ///
    /// Block 0 holds the allocator root and cannot be mapped; blocks beyond
    /// the end of the mapper fail the range check.
    pub fn map_block(&mut self, block: u32, f: impl FnOnce(&mut [u8]) -> Result<()>) -> Result<()> {
        if block == 0 {
            return Err(BlockFileError::RootBlockReserved);
        }
        let offset = block as u64 * self.block_size as u64;
        let len = self.block_size as usize;
        self.mapper_mut()?.map(offset, len, f)
    }

    /// Map `block` as a free-list header, validating it, and run `f` on the
    /// node view.
    fn with_header_block(
        &mut self,
        block: u32,
        f: impl FnOnce(&mut FreeListNode) -> Result<()>,
    ) -> Result<()> {
        let offset = block as u64 * self.block_size as u64;
        let len = self.block_size as usize;
        self.mapper_mut()?.map(offset, len, |data| {
            let mut node = FreeListNode::load(data)?;
            f(&mut node)
        })
    }

    /// Overwrite `block` with a fresh, empty free-list header whose `next`
    /// points at `next`.
    fn init_header_block(&mut self, block: u32, next: u32) -> Result<()> {
        let block_size = self.block_size;
        let offset = block as u64 * block_size as u64;
        self.mapper_mut()?.map(offset, block_size as usize, |data| {
            let mut node = FreeListNode::init(data, block_size)?;
            node.set_next(next);
            Ok(())
        })
    }

    /// Return an unused block index ≥ 1.
    ///
    /// Free entries are taken from the root node first, then from the first
    /// overflow node. An overflow node found empty is itself reclaimed as the
    /// allocated block after the root is relinked past it. With no free entry
    /// anywhere, the file grows by one block.
    pub fn allocate(&mut self) -> Result<u32> {
        let mut popped = None;
        let mut next = 0u32;
        self.with_header_block(0, |node| {
            match node.pop() {
                Some(block) => popped = Some(block),
                None => next = node.next(),
            }
            Ok(())
        })?;
        if let Some(block) = popped {
            return Ok(block);
        }

        if next != 0 {
            let header_block = next;
            let mut popped = None;
            let mut chained = 0u32;
            self.with_header_block(header_block, |node| {
                match node.pop() {
                    Some(block) => popped = Some(block),
                    None => chained = node.next(),
                }
                Ok(())
            })?;
            if let Some(block) = popped {
                return Ok(block);
            }
            // The overflow node is empty: unlink it and hand it out as
            // ordinary storage.
            self.with_header_block(0, |node| {
                node.set_next(chained);
                Ok(())
            })?;
            debug!(block = header_block, "reclaimed empty free-list node");
            return Ok(header_block);
        }

        // No free entry anywhere: extend the file by one block.
        let block_size = self.block_size as u64;
        let size = self.mapper_mut()?.size() as u64;
        let new_block = (size + block_size - 1) / block_size;
        let new_block =
            u32::try_from(new_block).map_err(|_| BlockFileError::BlockIndexOverflow)?;
        self.mapper_mut()?
            .truncate((new_block as u64 + 1) * block_size)?;
        debug!(block = new_block, "extended file by one block");
        Ok(new_block)
    }

    /// Allocate `count` blocks.
    ///
    /// On a mid-sequence failure the error carries the prefix of blocks that
    /// were successfully allocated.
    pub fn allocate_blocks(&mut self, count: usize) -> Result<Vec<u32>> {
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate() {
                Ok(block) => blocks.push(block),
                Err(source) => {
                    return Err(BlockFileError::PartialAllocation {
                        allocated: blocks,
                        wanted: count,
                        source: Box::new(source),
                    })
                }
            }
        }
        Ok(blocks)
    }

    /// Return `block` to the free list so a later [`allocate`](BlockFile::allocate)
    /// can hand it out again.
    ///
    /// The index is pushed onto the root node, or onto the first overflow
    /// node when the root is full. When neither has room, `block` itself
    /// becomes a new overflow node threaded in directly behind the root.
    pub fn free(&mut self, block: u32) -> Result<()> {
        if block == 0 {
            return Err(BlockFileError::RootBlockReserved);
        }
        let mut pushed = false;
        let mut next = 0u32;
        self.with_header_block(0, |node| {
            if node.push(block) {
                pushed = true;
            } else {
                next = node.next();
            }
            Ok(())
        })?;
        if pushed {
            return Ok(());
        }

        if next != 0 {
            let mut pushed = false;
            self.with_header_block(next, |node| {
                pushed = node.push(block);
                Ok(())
            })?;
            if pushed {
                return Ok(());
            }
        }

        // Both nodes full (or no overflow node yet): consume the freed block
        // as a new overflow node behind the root.
        self.init_header_block(block, next)?;
        self.with_header_block(0, |node| {
            node.set_next(block);
            Ok(())
        })?;
        debug!(block, "freed block became a free-list node");
        Ok(())
    }

    /// Free every block in `blocks`, stopping at the first failure.
    ///
    /// On failure the error carries how many blocks were freed before it.
    pub fn free_blocks(&mut self, blocks: &[u32]) -> Result<()> {
        for (freed, &block) in blocks.iter().enumerate() {
            if let Err(source) = self.free(block) {
                return Err(BlockFileError::PartialFree {
                    freed,
                    wanted: blocks.len(),
                    source: Box::new(source),
                });
            }
        }
        Ok(())
    }
}

impl<M: Mapper> Drop for BlockFile<M> {
    fn drop(&mut self) {
        if let Some(mut mapper) = self.mapper.take() {
            let _ = mapper.close();
        }
    }
}
