//! Growable memory mapping over a single host file.
//!
//! [`FileMap`] owns one file and a read/write mapping of its full length.
//! All database bytes are read and written through this window; flushing the
//! dirty pages to disk is delegated to the operating system, with a final
//! explicit flush on [`FileMap::close`].
//!
//! # Remapping invalidates pointers
//!
//! [`FileMap::resize`] replaces the mapping with a new one over the resized
//! file. **Every pointer previously derived from the window is invalid after
//! a successful resize.** The pager above couples its page-pointer cache to
//! this call so that no stale pointer survives a remap; nothing else in the
//! engine holds window pointers across a resize.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Result, StoreError};

/// A single host file mapped into the process address space as one
/// contiguous, growable byte window.
#[derive(Debug)]
pub struct FileMap {
    file: Option<File>,
    map: Option<MmapMut>,
}

impl FileMap {
    /// Open `path` (creating it if necessary) and map it read/write.
    ///
    /// With `initial_size == 0` the existing file length is adopted; an
    /// empty file cannot be mapped and is rejected. Otherwise the file
    /// length is set to exactly `initial_size` before mapping.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Io`] -- the file could not be created, sized, or
    ///   mapped.
    /// * [`StoreError::Corrupt`] -- `initial_size == 0` and the file is
    ///   empty.
    pub fn open<P: AsRef<Path>>(path: P, initial_size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if initial_size == 0 {
            if file.metadata()?.len() == 0 {
                return Err(StoreError::Corrupt(
                    "cannot adopt an empty file".into(),
                ));
            }
        } else if file.metadata()?.len() != initial_size {
            file.set_len(initial_size)?;
        }

        // SAFETY: the mapping is private to this process for the lifetime
        // of the handle; all access goes through this struct.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(FileMap {
            file: Some(file),
            map: Some(map),
        })
    }

    /// Flush the mapping and release both the mapping and the file handle.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Closed`] -- the map was already closed.
    /// * [`StoreError::Io`] -- the final flush failed.
    pub fn close(&mut self) -> Result<()> {
        match (self.map.take(), self.file.take()) {
            (Some(map), Some(_file)) => {
                map.flush()?;
                Ok(())
            }
            _ => Err(StoreError::Closed),
        }
    }

    /// Grow (or shrink) the file to `new_size` bytes and remap it.
    ///
    /// A resize to the current length is a no-op. The new mapping is
    /// established before the old one is released, so on failure the old
    /// window stays valid. After a successful resize every pointer derived
    /// from the previous window is invalid.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Closed`] -- the map was already closed.
    /// * [`StoreError::Io`] -- the file could not be resized or remapped.
    pub fn resize(&mut self, new_size: u64) -> Result<()> {
        let file = self.file.as_ref().ok_or(StoreError::Closed)?;
        if new_size == self.len() as u64 {
            return Ok(());
        }

        file.set_len(new_size)?;
        // SAFETY: same justification as in `open`.
        let new_map = unsafe { MmapMut::map_mut(file)? };
        self.map = Some(new_map);
        Ok(())
    }

    /// The full mapped window.
    pub fn window(&self) -> Result<&[u8]> {
        self.map.as_deref().ok_or(StoreError::Closed)
    }

    /// The full mapped window, writable.
    pub fn window_mut(&mut self) -> Result<&mut [u8]> {
        self.map.as_deref_mut().ok_or(StoreError::Closed)
    }

    /// Current mapped length in bytes (0 once closed).
    pub fn len(&self) -> usize {
        self.map.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the window currently maps zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
