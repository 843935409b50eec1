//! Resizable memory-mapped file store.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use braid_common::{BraidError, Result};
use memmap2::MmapMut;
use tracing::debug;

use crate::store::{short_read, ByteStore};

/// File-backed byte store using a mutable memory mapping.
///
/// The mapping always covers the whole file. Growth flushes the current
/// mapping, extends the file, and remaps; `grow` takes `&mut self`, so the
/// borrow checker guarantees no slice into the old mapping survives a remap.
pub struct MappedStore {
    file: File,
    map: MmapMut,
    len: u32,
    path: PathBuf,
}

impl MappedStore {
    /// Creates a new store file of `initial_len` bytes, zero-filled.
    ///
    /// `initial_len` must be positive: an empty file cannot be mapped.
    pub fn create<P: AsRef<Path>>(path: P, initial_len: u32) -> Result<Self> {
        let path = path.as_ref();
        if initial_len == 0 {
            return Err(BraidError::Storage(format!(
                "cannot create empty store file '{}'",
                path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(initial_len as u64)?;

        // SAFETY: the file was just created with exclusive read/write access
        // and sized to initial_len; the mapping's lifetime is tied to self and
        // every access below is bounds-checked against self.len.
        let map = unsafe { MmapMut::map_mut(&file)? };

        debug!(path = %path.display(), len = initial_len, "created mapped store");

        Ok(Self {
            file,
            map,
            len: initial_len,
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing store file and maps it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let file_len = file.metadata()?.len();
        if file_len == 0 {
            return Err(BraidError::Storage(format!(
                "cannot open empty store file '{}'",
                path.display()
            )));
        }
        if file_len > u32::MAX as u64 {
            return Err(BraidError::Storage(format!(
                "store file '{}' is {} bytes, beyond the 32-bit address space",
                path.display(),
                file_len
            )));
        }

        // SAFETY: opened with exclusive read/write access; store files are not
        // modified by other processes while mapped, and access is bounds-checked.
        let map = unsafe { MmapMut::map_mut(&file)? };

        debug!(path = %path.display(), len = file_len, "opened mapped store");

        Ok(Self {
            file,
            map,
            len: file_len as u32,
            path: path.to_path_buf(),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grows the file and remaps so that `end` bytes are addressable.
    fn ensure_len(&mut self, end: u64) -> Result<()> {
        if end <= self.len as u64 {
            return Ok(());
        }
        if end > u32::MAX as u64 {
            return Err(BraidError::Storage(format!(
                "store file '{}' cannot grow to {} bytes",
                self.path.display(),
                end
            )));
        }

        self.map.flush()?;
        self.file.set_len(end)?;
        // SAFETY: no slice into the old mapping can be live here (&mut self),
        // the old mapping was flushed, and the file now covers `end` bytes.
        self.map = unsafe { MmapMut::map_mut(&self.file)? };

        debug!(path = %self.path.display(), old_len = self.len, new_len = end, "grew mapped store");
        self.len = end as u32;
        Ok(())
    }

    fn check_read(&self, offset: u32, len: usize) -> Result<usize> {
        let start = offset as usize;
        if start as u64 + len as u64 > self.len as u64 {
            return Err(short_read(offset, len, self.len));
        }
        Ok(start)
    }
}

impl ByteStore for MappedStore {
    fn get_u8(&self, offset: u32) -> Result<u8> {
        let start = self.check_read(offset, 1)?;
        Ok(self.map[start])
    }

    fn put_u8(&mut self, offset: u32, value: u8) -> Result<()> {
        self.ensure_len(offset as u64 + 1)?;
        self.map[offset as usize] = value;
        Ok(())
    }

    fn get_i32(&self, offset: u32) -> Result<i32> {
        let start = self.check_read(offset, 4)?;
        let raw: [u8; 4] = self.map[start..start + 4].try_into().unwrap();
        Ok(i32::from_be_bytes(raw))
    }

    fn put_i32(&mut self, offset: u32, value: i32) -> Result<()> {
        self.put_bytes(offset, &value.to_be_bytes())
    }

    fn get_bytes(&self, offset: u32, dst: &mut [u8]) -> Result<()> {
        let start = self.check_read(offset, dst.len())?;
        dst.copy_from_slice(&self.map[start..start + dst.len()]);
        Ok(())
    }

    fn put_bytes(&mut self, offset: u32, src: &[u8]) -> Result<()> {
        self.ensure_len(offset as u64 + src.len() as u64)?;
        let start = offset as usize;
        self.map[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn len(&self) -> u32 {
        self.len
    }

    fn sync(&mut self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}
