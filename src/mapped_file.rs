//! Memory-mapped file region
//!
//! [`MappedFile`] maps a file read/write shared, so changes land in the
//! page cache and reach the file without explicit writes; other processes
//! mapping the same file observe them per the OS's shared-mapping rules.
//! The region can be grown with [`truncate`](MappedFile::truncate), which
//! unmaps and remaps; the mapping's address may change, so byte views never
//! survive it. Rust's borrow rules encode that contract: slice accessors
//! borrow `self`, `truncate` takes `&mut self`, and the two cannot overlap.
//!
//! Besides random access, the region carries a cursor for stream-style use:
//! [`std::io::Read`], [`std::io::Write`] and [`std::io::Seek`] are
//! implemented over it, with short counts at the end of the region and no
//! automatic growth.

use crate::error::{BlockFileError, Result};
use crate::mapper::Mapper;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
#[cfg(windows)]
use std::os::windows::io::{AsRawHandle, RawHandle};

/// A file mapped into memory as a growable byte region.
pub struct MappedFile {
    file: Option<File>,
    path: PathBuf,
    map: Option<MmapMut>,
    pos: usize,
}

fn open_options(truncate: bool) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(truncate);
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.custom_flags(libc::O_NOATIME);
    }
    opts
}

impl MappedFile {
    /// Create a new file (replacing any existing one) of `size` bytes and
    /// map it read/write shared.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let len = usize::try_from(size).map_err(|_| BlockFileError::SizeOverflow(size))?;
        let file = open_options(true)
            .open(&path)
            .map_err(|e| BlockFileError::os("open", e))?;
        file.set_len(size)
            .map_err(|e| BlockFileError::os("ftruncate", e))?;
        Self::from_file(file, path.as_ref().to_path_buf(), len)
    }

    /// Open an existing file and map its current size read/write shared.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = open_options(false)
            .open(&path)
            .map_err(|e| BlockFileError::os("open", e))?;
        let size = file
            .metadata()
            .map_err(|e| BlockFileError::os("stat", e))?
            .len();
        let len = usize::try_from(size).map_err(|_| BlockFileError::SizeOverflow(size))?;
        Self::from_file(file, path.as_ref().to_path_buf(), len)
    }

    fn from_file(file: File, path: PathBuf, len: usize) -> Result<Self> {
        let map = Self::map_file(&file, len)?;
        Ok(MappedFile {
            file: Some(file),
            path,
            map,
            pos: 0,
        })
    }

    /// Map `len` bytes of `file`. Empty files hold no mapping at all, since
    /// zero-length mappings are rejected by the OS.
    fn map_file(file: &File, len: usize) -> Result<Option<MmapMut>> {
        if len == 0 {
            return Ok(None);
        }
        // SAFETY: the mapping is backed by a file this handle keeps open, and
        // `truncate` drops the mapping before the file length changes.
        let map = unsafe { MmapOptions::new().len(len).map_mut(file) }
            .map_err(|e| BlockFileError::os("mmap", e))?;
        Ok(Some(map))
    }

    fn require_open(&self) -> Result<()> {
        if self.file.is_none() {
            return Err(BlockFileError::Closed);
        }
        Ok(())
    }

    /// The path this region was created or opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total size of the mapped region in bytes.
    pub fn size(&self) -> usize {
        self.map.as_deref().map(<[u8]>::len).unwrap_or(0)
    }

    /// Bytes remaining between the cursor and the end of the region.
    /// `offset() + len() == size()`.
    pub fn len(&self) -> usize {
        self.size() - self.pos.min(self.size())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cursor position.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// The whole region as a slice. Empty after `close`.
    ///
    /// The borrow ends before any call to [`truncate`](MappedFile::truncate)
    /// or [`close`](MappedFile::close) can invalidate the mapping.
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or_default()
    }

    /// Mutable access to the whole region. Empty after `close`.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.map.as_deref_mut().unwrap_or_default()
    }

    /// Scoped access to `[offset, offset + len)`.
    pub fn map(
        &mut self,
        offset: u64,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> Result<()>,
    ) -> Result<()> {
        self.require_open()?;
        let size = self.size();
        let out_of_range = BlockFileError::OutOfRange { offset, len, size };
        let Ok(start) = usize::try_from(offset) else {
            return Err(out_of_range);
        };
        match start.checked_add(len).filter(|&end| end <= size) {
            Some(end) => f(&mut self.bytes_mut()[start..end]),
            None => Err(out_of_range),
        }
    }

    /// Resize the file and remap it.
    ///
    /// The mapping's virtual address may change; the cursor is clamped to the
    /// new size.
    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.require_open()?;
        let len = usize::try_from(new_size).map_err(|_| BlockFileError::SizeOverflow(new_size))?;
        // Unmap before the file length changes.
        self.map = None;
        let file = self.file.as_ref().ok_or(BlockFileError::Closed)?;
        file.set_len(new_size)
            .map_err(|e| BlockFileError::os("ftruncate", e))?;
        self.map = Self::map_file(file, len)?;
        self.pos = self.pos.min(len);
        Ok(())
    }

    /// Flush dirty pages and wait for the OS to commit them.
    pub fn sync(&self) -> Result<()> {
        self.require_open()?;
        if let Some(map) = &self.map {
            map.flush().map_err(|e| BlockFileError::os("msync", e))?;
        }
        Ok(())
    }

    /// Schedule a write-back of dirty pages without waiting for it.
    pub fn sync_async(&self) -> Result<()> {
        self.require_open()?;
        if let Some(map) = &self.map {
            map.flush_async()
                .map_err(|e| BlockFileError::os("msync", e))?;
        }
        Ok(())
    }

    /// Unmap the region and close the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.map = None;
        self.file = None;
        Ok(())
    }

    /// Read and return the byte under the cursor, advancing it.
    pub fn read_byte(&mut self) -> Result<u8> {
        self.require_open()?;
        match self.bytes().get(self.pos).copied() {
            Some(byte) => {
                self.pos += 1;
                Ok(byte)
            }
            None => Err(BlockFileError::EndOfRegion),
        }
    }

    /// Write one byte at the cursor, advancing it. The region never grows.
    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.require_open()?;
        let pos = self.pos;
        match self.bytes_mut().get_mut(pos) {
            Some(slot) => {
                *slot = byte;
                self.pos += 1;
                Ok(())
            }
            None => Err(BlockFileError::EndOfRegion),
        }
    }

    /// Borrow the next `n` bytes and advance the cursor past them, returning
    /// fewer when the end of the region is closer than `n`.
    pub fn next(&mut self, n: usize) -> &[u8] {
        let start = self.pos.min(self.size());
        let end = start + n.min(self.size() - start);
        self.pos = end;
        &self.bytes()[start..end]
    }

    /// Copy bytes from absolute `offset` into `buf`, returning the count.
    /// Short counts occur at the end of the region.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.require_open()?;
        let size = self.size();
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start <= size)
            .ok_or(BlockFileError::OutOfRange {
                offset,
                len: buf.len(),
                size,
            })?;
        let n = buf.len().min(size - start);
        buf[..n].copy_from_slice(&self.bytes()[start..start + n]);
        Ok(n)
    }

    /// Copy `buf` into the region at absolute `offset`, returning the count.
    /// Short counts occur at the end of the region; the region never grows.
    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.require_open()?;
        let size = self.size();
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start <= size)
            .ok_or(BlockFileError::OutOfRange {
                offset,
                len: buf.len(),
                size,
            })?;
        let n = buf.len().min(size - start);
        self.bytes_mut()[start..start + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }
}

impl io::Read for MappedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.require_open()?;
        let data = MappedFile::bytes(self);
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl io::Write for MappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.require_open()?;
        let pos = self.pos;
        let data = self.bytes_mut();
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        data[pos..pos + n].copy_from_slice(&buf[..n]);
        self.pos += n;
        Ok(n)
    }

    /// Writes land in the shared mapping as they happen; durability is the
    /// job of [`MappedFile::sync`].
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for MappedFile {
    fn seek(&mut self, target: io::SeekFrom) -> io::Result<u64> {
        self.require_open()?;
        let size = self.size() as i128;
        let target = match target {
            io::SeekFrom::Start(offset) => offset as i128,
            io::SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            io::SeekFrom::End(delta) => size + delta as i128,
        };
        if target < 0 || target > size {
            return Err(BlockFileError::SeekOutOfBounds.into());
        }
        self.pos = target as usize;
        Ok(target as u64)
    }
}

impl Mapper for MappedFile {
    fn map(
        &mut self,
        offset: u64,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> Result<()>,
    ) -> Result<()> {
        MappedFile::map(self, offset, len, f)
    }

    fn size(&self) -> usize {
        MappedFile::size(self)
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        MappedFile::truncate(self, new_size)
    }

    fn close(&mut self) -> Result<()> {
        MappedFile::close(self)
    }
}

#[cfg(unix)]
impl AsRawFd for MappedFile {
    /// The descriptor behind the mapping, or `-1` once closed.
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1)
    }
}

#[cfg(windows)]
impl AsRawHandle for MappedFile {
    /// The handle behind the mapping, or `INVALID_HANDLE_VALUE` once closed.
    fn as_raw_handle(&self) -> RawHandle {
        self.file
            .as_ref()
            .map(|f| f.as_raw_handle())
            .unwrap_or(usize::MAX as RawHandle)
    }
}
