//! Low-level page management for the padron storage engine.
//!
//! The [`Pager`] is the lowest-level storage abstraction in the engine. It
//! views the memory-mapped database file as a flat sequence of fixed-size
//! **pages** ([`PAGE_SIZE`] = 4 096 bytes each) and provides allocate / free
//! operations plus direct access to page bytes inside the mapping.
//!
//! The pager knows nothing about the *contents* of pages -- it deals
//! exclusively in raw `PAGE_SIZE`-byte windows. Higher layers (the slotted
//! pages, the B+Tree) build their own structure on top.
//!
//! # Free set
//!
//! Freed pages are collected in an ordered set and recycled smallest-id
//! first, so reuse is deterministic: after `free(a); free(b)` with `a < b`,
//! the next two allocations return `a` then `b`. The set is in-memory only;
//! pages freed before a close are not remembered across a reopen.
//!
//! # Pointer cache
//!
//! Page lookups go through a [`CACHE_CAPACITY`]-entry LRU cache of raw
//! pointers into the current mapping. The cache owns nothing -- it is purely
//! a lookup hint. It is dropped whenever the mapping is re-created (the
//! grow path of [`Pager::alloc`], and [`Pager::close`]), so a stale pointer
//! is never handed out.
//!
//! # Allocation is a barrier
//!
//! [`Pager::alloc`] may grow the file and remap the window, which
//! invalidates every page reference previously obtained from this pager.
//! The borrow checker enforces the discipline: page slices borrow the pager,
//! so none can be held across an `alloc` call.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;

use crate::error::{Result, StoreError};
use crate::filemap::FileMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Every page in the database file is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;

/// Number of page pointers kept in the LRU cache (4 MiB of pages).
pub const CACHE_CAPACITY: usize = 1024;

/// A zero-based page number. Page 0 is always the superblock.
pub type PageId = u32;

/// Sentinel meaning "no page". Never a valid page number.
pub const INVALID_PAGE_ID: PageId = u32::MAX;

// ---------------------------------------------------------------------------
// Pager
// ---------------------------------------------------------------------------

/// Manages the mapped database file as a flat array of [`PAGE_SIZE`]-byte
/// pages.
///
/// The pager is responsible for:
///
/// * Handing out page bytes by [`PageId`].
/// * Allocating new pages (from the free set or by growing the file).
/// * Freeing pages (inserting them into the free set).
/// * Caching page pointers, and discarding the cache on every remap.
pub struct Pager {
    /// The mapped database file.
    file: FileMap,
    /// Total number of pages currently in the file (including page 0).
    /// Kept as `u64` so the overflow check against the id sentinel is
    /// performed before narrowing.
    page_count: u64,
    /// Freed page ids awaiting reuse, smallest first.
    free_pages: BTreeSet<PageId>,
    /// LRU cache of raw page pointers into the current mapping.
    cache: LruCache<PageId, *mut u8>,
}

impl Pager {
    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    /// Open the database file at `path`, sized to at least `initial_pages`
    /// pages. An existing longer file keeps its length; a fresh file is
    /// created with exactly `initial_pages` pages.
    ///
    /// With `initial_pages == 0` the existing file length is adopted
    /// unchanged (opening a missing or empty file fails in that mode).
    ///
    /// # Errors
    ///
    /// * [`StoreError::Io`] -- the file could not be created, sized, or
    ///   mapped.
    /// * [`StoreError::Corrupt`] -- adoption of an empty file was requested.
    pub fn open<P: AsRef<Path>>(path: P, initial_pages: u64) -> Result<Self> {
        let requested = initial_pages * PAGE_SIZE as u64;
        let current = std::fs::metadata(path.as_ref())
            .map(|m| m.len())
            .unwrap_or(0);

        let file = FileMap::open(path, requested.max(current))?;
        let page_count = file.len() as u64 / PAGE_SIZE as u64;

        Ok(Pager {
            file,
            page_count,
            free_pages: BTreeSet::new(),
            cache: LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
        })
    }

    /// Flush and release the mapping; drop the free set and the cache.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Closed`] -- the pager was already closed.
    /// * [`StoreError::Io`] -- the final flush failed.
    pub fn close(&mut self) -> Result<()> {
        self.cache.clear();
        self.free_pages.clear();
        self.page_count = 0;
        self.file.close()
    }

    // ---------------------------------------------------------------------
    // Allocation / deallocation
    // ---------------------------------------------------------------------

    /// Allocate a page and return its [`PageId`].
    ///
    /// The smallest freed id is recycled if one exists; otherwise the file
    /// grows by one page. A freshly allocated page keeps whatever bytes it
    /// had -- callers initialise it.
    ///
    /// Growing remaps the window, invalidating every previously obtained
    /// page reference; the pointer cache is dropped on that path.
    ///
    /// # Errors
    ///
    /// * [`StoreError::OutOfPages`] -- the id space is exhausted.
    /// * [`StoreError::Io`] -- the file could not be grown (the old mapping
    ///   stays valid).
    pub fn alloc(&mut self) -> Result<PageId> {
        if let Some(id) = self.free_pages.pop_first() {
            return Ok(id);
        }

        if self.page_count >= INVALID_PAGE_ID as u64 {
            return Err(StoreError::OutOfPages);
        }

        let needed = (self.page_count + 1) * PAGE_SIZE as u64;
        if (self.file.len() as u64) < needed {
            self.grow(needed)?;
        }

        let id = self.page_count as PageId;
        self.page_count += 1;
        Ok(id)
    }

    /// Return `page_id` to the free set for reuse by a future
    /// [`alloc`](Self::alloc). Out-of-range and sentinel ids are ignored.
    /// The page bytes are not wiped.
    pub fn free(&mut self, page_id: PageId) {
        if page_id == INVALID_PAGE_ID || page_id as u64 >= self.page_count {
            return;
        }
        self.free_pages.insert(page_id);
    }

    // ---------------------------------------------------------------------
    // Page access
    // ---------------------------------------------------------------------

    /// The bytes of page `page_id`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::PageNotFound`] -- `page_id` is out of range or the
    ///   sentinel.
    /// * [`StoreError::Closed`] -- the pager was closed.
    pub fn page(&mut self, page_id: PageId) -> Result<&[u8]> {
        let ptr = self.page_ptr(page_id)?;
        // SAFETY: `ptr` points at PAGE_SIZE bytes inside the live mapping
        // (see `page_ptr`), and the returned borrow of `self` keeps the
        // mapping from being remapped or closed while the slice is alive.
        Ok(unsafe { std::slice::from_raw_parts(ptr, PAGE_SIZE) })
    }

    /// The bytes of page `page_id`, writable.
    ///
    /// # Errors
    ///
    /// Same as [`page`](Self::page).
    pub fn page_mut(&mut self, page_id: PageId) -> Result<&mut [u8]> {
        let ptr = self.page_ptr(page_id)?;
        // SAFETY: as in `page`, plus the `&mut self` borrow guarantees this
        // is the only live reference into the mapping.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, PAGE_SIZE) })
    }

    /// Total number of pages in the file, including the superblock.
    #[inline]
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    // ---------------------------------------------------------------------
    // Private helpers
    // ---------------------------------------------------------------------

    /// Grow the file to `new_len` bytes. The one call site that can remap
    /// the window, so the pointer cache is dropped here unconditionally.
    fn grow(&mut self, new_len: u64) -> Result<()> {
        self.file.resize(new_len)?;
        self.cache.clear();
        Ok(())
    }

    /// Resolve `page_id` to a raw pointer into the current mapping,
    /// consulting the LRU cache first.
    fn page_ptr(&mut self, page_id: PageId) -> Result<*mut u8> {
        if page_id == INVALID_PAGE_ID || page_id as u64 >= self.page_count {
            return Err(StoreError::PageNotFound(page_id));
        }

        if let Some(&ptr) = self.cache.get(&page_id) {
            return Ok(ptr);
        }

        let base = self.file.window_mut()?.as_mut_ptr();
        // SAFETY: `page_id < page_count` and the file length is always
        // `page_count * PAGE_SIZE` or more, so the whole page lies inside
        // the mapping.
        let ptr = unsafe { base.add(page_id as usize * PAGE_SIZE) };
        self.cache.put(page_id, ptr);
        Ok(ptr)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Helper: create a fresh `Pager` backed by a temporary file.
    fn new_pager(initial_pages: u64) -> (TempDir, Pager) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let pager =
            Pager::open(dir.path().join("pages.db"), initial_pages).expect("failed to open pager");
        (dir, pager)
    }

    // ----- Creation ----------------------------------------------------

    #[test]
    fn fresh_file_has_requested_page_count() {
        let (_dir, pager) = new_pager(10);
        assert_eq!(pager.page_count(), 10);
    }

    #[test]
    fn reopen_adopts_existing_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.db");

        {
            let mut pager = Pager::open(&path, 4).unwrap();
            let id = pager.alloc().unwrap(); // grows to 5 pages
            assert_eq!(id, 4);
            pager.close().unwrap();
        }

        let pager = Pager::open(&path, 0).unwrap();
        assert_eq!(pager.page_count(), 5);
    }

    #[test]
    fn open_does_not_truncate_longer_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.db");

        {
            let mut pager = Pager::open(&path, 8).unwrap();
            pager.close().unwrap();
        }

        // Requesting fewer pages than the file already holds keeps them.
        let pager = Pager::open(&path, 2).unwrap();
        assert_eq!(pager.page_count(), 8);
    }

    // ----- Allocation --------------------------------------------------

    #[test]
    fn alloc_extends_past_initial_pages() {
        let (_dir, mut pager) = new_pager(3);
        assert_eq!(pager.alloc().unwrap(), 3);
        assert_eq!(pager.alloc().unwrap(), 4);
        assert_eq!(pager.page_count(), 5);
    }

    #[test]
    fn freed_pages_are_reused_smallest_first() {
        let (_dir, mut pager) = new_pager(1);
        let a = pager.alloc().unwrap(); // 1
        let b = pager.alloc().unwrap(); // 2
        let c = pager.alloc().unwrap(); // 3

        pager.free(c);
        pager.free(a);
        pager.free(b);

        // Deterministic: lowest freed id first, regardless of free order.
        assert_eq!(pager.alloc().unwrap(), a);
        assert_eq!(pager.alloc().unwrap(), b);
        assert_eq!(pager.alloc().unwrap(), c);
        assert_eq!(pager.page_count(), 4);
    }

    #[test]
    fn free_ignores_out_of_range_and_sentinel() {
        let (_dir, mut pager) = new_pager(2);
        pager.free(999);
        pager.free(INVALID_PAGE_ID);

        // Neither bogus free may be recycled.
        assert_eq!(pager.alloc().unwrap(), 2);
    }

    #[test]
    fn freed_page_keeps_its_bytes() {
        let (_dir, mut pager) = new_pager(1);
        let id = pager.alloc().unwrap();
        pager.page_mut(id).unwrap()[0] = 0xEE;

        pager.free(id);
        let recycled = pager.alloc().unwrap();
        assert_eq!(recycled, id);
        assert_eq!(pager.page(recycled).unwrap()[0], 0xEE);
    }

    // ----- Page access -------------------------------------------------

    #[test]
    fn write_then_read_page() {
        let (_dir, mut pager) = new_pager(1);
        let id = pager.alloc().unwrap();

        {
            let page = pager.page_mut(id).unwrap();
            page[0] = 0xCA;
            page[PAGE_SIZE - 1] = 0xFE;
        }

        let page = pager.page(id).unwrap();
        assert_eq!(page[0], 0xCA);
        assert_eq!(page[PAGE_SIZE - 1], 0xFE);
    }

    #[test]
    fn out_of_range_page_is_an_error() {
        let (_dir, mut pager) = new_pager(2);
        assert!(matches!(
            pager.page(999),
            Err(StoreError::PageNotFound(999))
        ));
        assert!(matches!(
            pager.page_mut(INVALID_PAGE_ID),
            Err(StoreError::PageNotFound(_))
        ));
    }

    #[test]
    fn pages_survive_remapping_growth() {
        let (_dir, mut pager) = new_pager(1);

        // Touch every page through the cache, then force many remaps and
        // verify no page reads back through a stale window.
        let mut ids = Vec::new();
        for i in 0..64u8 {
            let id = pager.alloc().unwrap();
            pager.page_mut(id).unwrap().fill(i);
            ids.push(id);
        }

        for (i, &id) in ids.iter().enumerate() {
            let page = pager.page(id).unwrap();
            assert!(page.iter().all(|&b| b == i as u8), "page {id} corrupted");
        }
    }

    #[test]
    fn data_survives_close_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.db");

        {
            let mut pager = Pager::open(&path, 1).unwrap();
            let id = pager.alloc().unwrap();
            pager.page_mut(id).unwrap()[123] = 0xAB;
            pager.close().unwrap();
        }

        let mut pager = Pager::open(&path, 0).unwrap();
        assert_eq!(pager.page(1).unwrap()[123], 0xAB);
    }

    // ----- Close -------------------------------------------------------

    #[test]
    fn close_clears_state_and_reports_second_close() {
        let (_dir, mut pager) = new_pager(2);
        pager.close().unwrap();
        assert_eq!(pager.page_count(), 0);
        assert!(matches!(pager.page(0), Err(StoreError::PageNotFound(0))));
        assert!(matches!(pager.close(), Err(StoreError::Closed)));
    }

    #[test]
    fn free_set_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.db");

        {
            let mut pager = Pager::open(&path, 1).unwrap();
            let a = pager.alloc().unwrap();
            let _b = pager.alloc().unwrap();
            pager.free(a);
            pager.close().unwrap();
        }

        // The freed page is forgotten; allocation extends the file instead.
        let mut pager = Pager::open(&path, 0).unwrap();
        assert_eq!(pager.alloc().unwrap(), 3);
    }
}
