//! Backing-store abstraction for block files
//!
//! A [`Mapper`] turns some byte store into a growable region with scoped
//! access. The allocator is oblivious to whether the bytes live in an OS
//! memory mapping ([`MappedFile`](crate::MappedFile)), on the heap
//! ([`MemMapper`]), or in a test fake.

use crate::error::{BlockFileError, Result};

/// Byte-addressable, growable backing store.
pub trait Mapper {
    /// Invoke `f` with a mutable view of `[offset, offset + len)`.
    ///
    /// The view is valid only for the duration of `f`; growing the region
    /// may move it. The borrow checker enforces that no view outlives the
    /// call and that [`truncate`](Mapper::truncate) cannot run while a view
    /// is outstanding.
    fn map(&mut self, offset: u64, len: usize, f: impl FnOnce(&mut [u8]) -> Result<()>)
        -> Result<()>;

    /// Current length of the region in bytes.
    fn size(&self) -> usize;

    /// Grow or shrink the region to `new_size` bytes.
    fn truncate(&mut self, new_size: u64) -> Result<()>;

    /// Release any resources behind the region. The default does nothing;
    /// implementations owning an OS handle override it.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A heap-backed [`Mapper`].
///
/// Growth zero-fills, matching what the OS provides for freshly truncated
/// file pages.
#[derive(Debug, Default)]
pub struct MemMapper {
    data: Vec<u8>,
}

impl MemMapper {
    pub fn new() -> Self {
        MemMapper::default()
    }

    /// Create a mapper pre-sized to `size` zero bytes.
    pub fn with_size(size: usize) -> Self {
        MemMapper {
            data: vec![0; size],
        }
    }

    /// Consume the mapper and return the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Mapper for MemMapper {
    fn map(
        &mut self,
        offset: u64,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> Result<()>,
    ) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| BlockFileError::OutOfRange {
            offset,
            len,
            size: self.data.len(),
        })?;
        let end = start.checked_add(len).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => f(&mut self.data[start..end]),
            None => Err(BlockFileError::OutOfRange {
                offset,
                len,
                size: self.data.len(),
            }),
        }
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        let new_size =
            usize::try_from(new_size).map_err(|_| BlockFileError::SizeOverflow(new_size))?;
        self.data.resize(new_size, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_scopes_a_subrange() {
        let mut mapper = MemMapper::with_size(64);
        mapper
            .map(16, 4, |view| {
                view.copy_from_slice(b"abcd");
                Ok(())
            })
            .unwrap();
        assert_eq!(&mapper.into_inner()[16..20], b"abcd");
    }

    #[test]
    fn map_beyond_size_fails() {
        let mut mapper = MemMapper::with_size(64);
        let err = mapper.map(60, 8, |_| Ok(())).unwrap_err();
        assert!(matches!(err, BlockFileError::OutOfRange { .. }));
    }

    #[test]
    fn truncate_zero_fills_growth() {
        let mut mapper = MemMapper::with_size(4);
        mapper.map(0, 4, |view| {
            view.fill(0xFF);
            Ok(())
        })
        .unwrap();

        mapper.truncate(8).unwrap();
        assert_eq!(mapper.size(), 8);
        assert_eq!(&mapper.into_inner()[4..], &[0, 0, 0, 0]);
    }
}
