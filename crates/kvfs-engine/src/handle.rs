//! Per-open file cursor with a lazily loaded buffer.
//!
//! The buffer is fetched on the first read or write and owned by the handle
//! until [`FileHandle::close`] or [`FileHandle::sync`] writes it back in one
//! transaction together with the metadata snapshot.

use std::fmt;
use std::io::SeekFrom;

use tracing::{debug, warn};

use crate::error::{FsError, Result};
use crate::fs::Filesystem;
use crate::types::{unix_now, MetaEntry, OpenFlags, Stat};

/// An open file or directory.
pub struct FileHandle {
    fs: Filesystem,
    meta: MetaEntry,
    flags: OpenFlags,
    position: u64,
    dirty: bool,
    buffer: Option<Vec<u8>>,
    readdir_offset: usize,
    closed: bool,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.meta.path)
            .field("flags", &self.flags)
            .field("position", &self.position)
            .field("dirty", &self.dirty)
            .field("closed", &self.closed)
            .finish()
    }
}

impl FileHandle {
    pub(crate) fn new(fs: Filesystem, meta: MetaEntry, flags: OpenFlags) -> Self {
        Self {
            fs,
            meta,
            flags,
            position: 0,
            dirty: false,
            buffer: None,
            readdir_offset: 0,
            closed: false,
        }
    }

    /// Path of the node this handle is bound to.
    pub fn path(&self) -> &str {
        &self.meta.path
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns true once the handle holds changes not yet written back.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(self.bad_descriptor());
        }
        Ok(())
    }

    fn bad_descriptor(&self) -> FsError {
        FsError::BadDescriptor {
            path: self.meta.path.clone(),
        }
    }

    fn check_not_dir(&self) -> Result<()> {
        if self.meta.is_dir() {
            return Err(FsError::IsADirectory {
                path: self.meta.path.clone(),
            });
        }
        Ok(())
    }

    fn ensure_buffer(&mut self) -> Result<&mut Vec<u8>> {
        if self.buffer.is_none() {
            let data = self.fs.load_payload(&self.meta)?;
            self.buffer = Some(data);
        }
        Ok(self.buffer.get_or_insert_with(Vec::new))
    }

    /// Reads from the cursor into `buf`.
    ///
    /// Returns `None` at end of file, otherwise the number of bytes copied.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        debug!("fread: {} len={}", self.meta.path, buf.len());
        self.check_open()?;
        if !self.flags.is_readable() {
            return Err(self.bad_descriptor());
        }
        self.check_not_dir()?;

        let position = self.position;
        let size = self.meta.size;
        let data = self.ensure_buffer()?;
        let available = size.min(data.len() as u64).saturating_sub(position);
        let to_read = (buf.len() as u64).min(available) as usize;
        if to_read == 0 {
            return Ok(None);
        }
        let start = position as usize;
        buf[..to_read].copy_from_slice(&data[start..start + to_read]);

        self.position += to_read as u64;
        self.meta.atime = unix_now();
        self.dirty = true;
        Ok(Some(to_read))
    }

    /// Writes `data` at the cursor, or at the end when opened with `APPEND`.
    ///
    /// Writing past the end zero-fills the gap.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        debug!("fwrite: {} len={}", self.meta.path, data.len());
        self.check_open()?;
        if !self.flags.is_writable() {
            return Err(self.bad_descriptor());
        }
        self.check_not_dir()?;

        if self.flags.contains(OpenFlags::APPEND) {
            self.position = self.meta.size;
        }
        let start = usize::try_from(self.position)
            .map_err(|_| FsError::invalid("write position out of range"))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| FsError::invalid("write extends past the maximum file size"))?;

        let buffer = self.ensure_buffer()?;
        if end > buffer.len() {
            buffer
                .try_reserve(end - buffer.len())
                .map_err(|_| FsError::invalid("write extends past the maximum file size"))?;
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(data);
        let new_size = buffer.len() as u64;

        self.position = end as u64;
        self.meta.size = new_size;
        self.meta.mtime = unix_now();
        self.meta.atime = self.meta.mtime;
        self.dirty = true;
        Ok(data.len())
    }

    /// Moves the cursor. A resulting negative position fails with EINVAL and
    /// leaves the cursor where it was.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        debug!("fseek: {} {:?}", self.meta.path, pos);
        self.check_open()?;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => self.meta.size as i128 + delta as i128,
        };
        if target < 0 {
            return Err(FsError::invalid(format!("seek to negative position {}", target)));
        }
        self.position =
            u64::try_from(target).map_err(|_| FsError::invalid("seek position out of range"))?;
        Ok(self.position)
    }

    /// Lists up to `count` children from the handle's listing offset.
    ///
    /// `None` returns every remaining child and rewinds the offset to 0.
    pub fn readdir(&mut self, count: Option<usize>) -> Result<Vec<Stat>> {
        debug!("freaddir: {} count={:?}", self.meta.path, count);
        self.check_open()?;
        if !self.meta.is_dir() {
            return Err(FsError::NotADirectory {
                path: self.meta.path.clone(),
            });
        }
        let children = self.fs.children_of(&self.meta.path)?;
        let start = self.readdir_offset.min(children.len());
        let end = match count {
            None => {
                self.readdir_offset = 0;
                children.len()
            }
            Some(n) => {
                let end = start.saturating_add(n).min(children.len());
                self.readdir_offset = end;
                end
            }
        };
        Ok(children[start..end].iter().map(Stat::from_entry).collect())
    }

    /// Attributes as seen by this handle, including unflushed writes.
    pub fn stat(&self) -> Result<Stat> {
        debug!("fstat: {}", self.meta.path);
        self.check_open()?;
        Ok(Stat::from_entry(&self.meta))
    }

    /// Writes pending changes back without closing the handle.
    pub async fn sync(&mut self) -> Result<()> {
        debug!("fsync: {}", self.meta.path);
        self.check_open()?;
        if self.dirty {
            let stored = self
                .fs
                .put_entry(self.meta.clone(), self.buffer.clone())
                .await?;
            self.meta = stored;
            self.dirty = false;
        }
        Ok(())
    }

    /// Closes the handle, writing pending changes back in one transaction.
    ///
    /// The handle is closed even if the write-back fails. Closing twice fails
    /// with EBADF.
    pub async fn close(&mut self) -> Result<()> {
        debug!("fclose: {}", self.meta.path);
        self.check_open()?;
        self.closed = true;
        if self.dirty {
            self.dirty = false;
            let data = self.buffer.take();
            self.meta = self.fs.put_entry(self.meta.clone(), data).await?;
        }
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.dirty && !self.closed {
            warn!("Handle for {} dropped with unflushed changes", self.meta.path);
        }
    }
}
