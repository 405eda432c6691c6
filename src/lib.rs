//! # blockfile - Persistent Block Allocation over Memory-Mapped Files
//!
//! `blockfile` exposes a file as an array of fixed-size blocks and manages
//! their allocation. Freed blocks are tracked in a free list embedded in the
//! file itself, so allocator state survives process restarts without a
//! separate journal.
//!
//! - **Memory-mapped regions** with scoped access, growth, and flush
//! - **Persistent free list** threaded through header blocks inside the file
//! - **LIFO reuse**: the most recently freed block is reallocated first
//! - **Pluggable backing**: the allocator runs over any [`Mapper`], whether
//!   an OS mapping, a heap buffer, or a test fake
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockfile::{BlockFile, Result};
//!
//! # fn main() -> Result<()> {
//! let mut bf = BlockFile::create("data.blocks")?;
//!
//! let block = bf.allocate()?;
//! bf.map_block(block, |bytes| {
//!     bytes[..5].copy_from_slice(b"hello");
//!     Ok(())
//! })?;
//!
//! bf.free(block)?;
//! bf.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## File Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Block 0: root free-list header              │
//! │  - Magic 0xB10CF11E, block size             │
//! │  - LIFO stack of free block indices         │
//! │  - `next` link to overflow header blocks    │
//! ├─────────────────────────────────────────────┤
//! │ Block 1..N: client data                     │
//! │  - or recruited as overflow free-list nodes │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Caveats
//!
//! The allocator performs no locking and no journaling: callers serialise
//! access to a handle, and a crash in the middle of an `allocate` or `free`
//! can leak a block. Multiple processes mapping the same file get the OS's
//! shared-mapping coherence and nothing more.

pub mod block_file;
pub mod error;
pub mod header;
pub mod mapped_file;
pub mod mapper;

pub use block_file::{BlockFile, DEFAULT_BLOCK_SIZE};
pub use error::{BlockFileError, Result};
pub use header::{BLOCK_FILE_MAGIC, HEADER_SIZE};
pub use mapped_file::MappedFile;
pub use mapper::{MemMapper, Mapper};
