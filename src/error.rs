use thiserror::Error;

/// Errors produced by mapped regions and block files.
#[derive(Error, Debug)]
pub enum BlockFileError {
    /// An operating-system call failed. Tagged with the syscall's name.
    #[error("MappedFile: {syscall} failed")]
    Os {
        syscall: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The requested size does not fit the host's address-space integer.
    #[error("MappedFile: requested size {0} is too large for this platform")]
    SizeOverflow(u64),

    /// The region or allocator has already been closed.
    #[error("MappedFile: closed")]
    Closed,

    /// A requested range lies outside the mapped region.
    #[error("MappedFile: range {offset}+{len} exceeds the mapped size of {size} bytes")]
    OutOfRange {
        offset: u64,
        len: usize,
        size: usize,
    },

    /// A seek target lies outside `[0, size]`.
    #[error("MappedFile: seek out of bounds")]
    SeekOutOfBounds,

    /// The cursor reached the end of the mapped region.
    #[error("MappedFile: end of mapped region")]
    EndOfRegion,

    /// The file carries the byte-swapped magic number: it was written by a
    /// platform of the opposite endianness.
    #[error("BlockFile: unable to read header: was the file generated on another platform?")]
    ForeignPlatform,

    #[error("BlockFile: unable to read header: unexpected magic number")]
    BadMagic,

    /// A free-list node claims more entries than its declared capacity.
    #[error("BlockFile: free-list count {count} exceeds capacity {capacity}")]
    CorruptFreeList { count: u32, capacity: u32 },

    /// A free-list node's declared capacity does not fit inside one block.
    #[error("BlockFile: free-list capacity {capacity} does not fit a block of {block_size} bytes")]
    CapacityOverflow { capacity: u32, block_size: u32 },

    #[error("BlockFile: block size {0} is below the 20-byte header minimum")]
    BlockSizeTooSmall(u32),

    /// The mapper holds fewer bytes than the block size recorded in the root
    /// header.
    #[error("BlockFile: mapper holds {size} bytes, smaller than one block of {block_size}")]
    MapperTooSmall { size: usize, block_size: u32 },

    /// Block 0 holds the allocator root and is never handed to clients.
    #[error("BlockFile: block 0 is the allocator root and cannot be used")]
    RootBlockReserved,

    /// Growing the file would push the block count past `u32::MAX`.
    #[error("BlockFile: block index overflow")]
    BlockIndexOverflow,

    /// A batch allocation failed partway through. `allocated` holds the
    /// blocks that were handed out before the failure.
    #[error("BlockFile: allocated {} of {wanted} blocks", allocated.len())]
    PartialAllocation {
        allocated: Vec<u32>,
        wanted: usize,
        #[source]
        source: Box<BlockFileError>,
    },

    /// A batch free failed partway through. `freed` counts the blocks that
    /// were returned before the failure.
    #[error("BlockFile: freed {freed} of {wanted} blocks")]
    PartialFree {
        freed: usize,
        wanted: usize,
        #[source]
        source: Box<BlockFileError>,
    },
}

pub type Result<T> = std::result::Result<T, BlockFileError>;

impl BlockFileError {
    /// Wrap an I/O error with the name of the syscall that produced it.
    pub(crate) fn os(syscall: &'static str, source: std::io::Error) -> Self {
        BlockFileError::Os { syscall, source }
    }
}

impl From<BlockFileError> for std::io::Error {
    fn from(err: BlockFileError) -> Self {
        match err {
            BlockFileError::Os { source, .. } => source,
            BlockFileError::Closed => {
                std::io::Error::new(std::io::ErrorKind::NotConnected, err.to_string())
            }
            other => std::io::Error::other(other),
        }
    }
}
