//! # Padron DB
//!
//! An embedded single-file record store for citizen records keyed by DNI
//! (a 32-bit national identity number). Supports point insert, lookup,
//! update, and delete of variable-length records, with the whole database
//! living in one memory-mapped host file.
//!
//! The engine is layered bottom-up; each layer consumes only the one below:
//!
//! | Layer | Responsibility |
//! |---|---|
//! | [`filemap::FileMap`] | one host file mapped as a growable byte window |
//! | [`pager::Pager`] | fixed-size pages, id allocation/recycling, pointer cache |
//! | [`page::SlottedPage`] | variable-length records inside one page |
//! | [`btree::BPlusTree`] | ordered DNI → record-locator index over pages |
//! | [`Database`] | superblock, data-page placement, orchestration |
//!
//! The store is single-threaded: callers serialise access to a [`Database`]
//! externally. Durability is filesystem-level -- pages are written through
//! the mapping and flushed on close; there is no journal.

pub mod btree;
pub mod datagen;
pub mod error;
pub mod filemap;
pub mod page;
pub mod pager;
pub mod types;

pub use error::{Result, StoreError};
pub use pager::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
pub use types::{Citizen, Dni, RecordId};

use std::path::{Path, PathBuf};

use log::{debug, info};

use btree::BPlusTree;
use page::{SlottedPage, SLOT_SIZE};
use pager::Pager;

/// Page 0 of every database file.
const SUPERBLOCK_PAGE_ID: PageId = 0;

/// Pages pre-sized into a freshly created database file.
const INITIAL_PAGES: u64 = 10;

// ---------------------------------------------------------------------------
// Superblock
// ---------------------------------------------------------------------------

/// The fields needed to reopen a database, stored at the start of page 0:
/// the B+Tree root and the most recently used data page, as two u32 LE
/// values.
struct Superblock {
    root: PageId,
    last_data_page: PageId,
}

impl Superblock {
    fn read(page: &[u8]) -> Self {
        Superblock {
            root: u32::from_le_bytes([page[0], page[1], page[2], page[3]]),
            last_data_page: u32::from_le_bytes([page[4], page[5], page[6], page[7]]),
        }
    }

    fn write(&self, page: &mut [u8]) {
        page[0..4].copy_from_slice(&self.root.to_le_bytes());
        page[4..8].copy_from_slice(&self.last_data_page.to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// The main database handle: a single-file citizen store with a B+Tree
/// index over the DNI.
///
/// Rejected operations -- duplicate insert, lookup/update/delete of an
/// absent DNI, an update that grew past its slot -- come back as `Ok(false)`
/// or `Ok(None)`; errors are reserved for storage failures.
pub struct Database {
    path: PathBuf,
    pager: Pager,
    index: BPlusTree,
    last_data_page: PageId,
    open: bool,
}

impl Database {
    /// Open the database at `path`, creating a fresh one if the file does
    /// not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Database> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Self::create(path)
        }
    }

    fn create(path: &Path) -> Result<Database> {
        let mut pager = Pager::open(path, INITIAL_PAGES)?;
        let index = BPlusTree::create(&mut pager)?;

        let mut db = Database {
            path: path.to_path_buf(),
            pager,
            index,
            last_data_page: INVALID_PAGE_ID,
            open: true,
        };
        db.write_superblock()?;
        info!("created database at {}", path.display());
        Ok(db)
    }

    fn load(path: &Path) -> Result<Database> {
        let mut pager = Pager::open(path, 0)?;
        let superblock = Superblock::read(pager.page(SUPERBLOCK_PAGE_ID)?);

        if superblock.root == INVALID_PAGE_ID
            || superblock.root == SUPERBLOCK_PAGE_ID
            || superblock.root as u64 >= pager.page_count()
        {
            return Err(StoreError::Corrupt(format!(
                "superblock references root page {}",
                superblock.root
            )));
        }

        debug!(
            "opened {} ({} pages, root {})",
            path.display(),
            pager.page_count(),
            superblock.root
        );
        Ok(Database {
            path: path.to_path_buf(),
            pager,
            index: BPlusTree::open(superblock.root),
            last_data_page: superblock.last_data_page,
            open: true,
        })
    }

    /// Persist the superblock and close the underlying file. A no-op after
    /// the first call.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.write_superblock()?;
        self.pager.close()?;
        self.open = false;
        debug!("closed {}", self.path.display());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Point operations
    // ---------------------------------------------------------------------

    /// Insert a citizen. Returns `Ok(false)` when the DNI already exists.
    pub fn insert(&mut self, citizen: &Citizen) -> Result<bool> {
        self.ensure_open()?;
        if self.index.search(&mut self.pager, citizen.dni)?.is_some() {
            return Ok(false);
        }

        let mut buf = vec![0u8; citizen.serialized_size()];
        let size = citizen.serialize_into(&mut buf);

        let page_id = self.data_page_with_room(size)?;
        let mut page = SlottedPage::new(self.pager.page_mut(page_id)?);
        let Some(slot) = page.insert(&buf[..size]) else {
            return Ok(false);
        };

        self.index.insert(
            &mut self.pager,
            citizen.dni,
            RecordId {
                page: page_id,
                slot,
            },
        )?;
        Ok(true)
    }

    /// Look up a citizen by DNI.
    pub fn find(&mut self, dni: Dni) -> Result<Option<Citizen>> {
        self.ensure_open()?;
        let Some(rid) = self.index.search(&mut self.pager, dni)? else {
            return Ok(None);
        };

        let page = SlottedPage::new(self.pager.page_mut(rid.page)?);
        match page.read(rid.slot) {
            Some(bytes) => Ok(Some(Citizen::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    /// Replace the stored record for `citizen.dni` in place.
    ///
    /// Returns `Ok(false)` when the DNI is absent, or when the new record
    /// serializes larger than the old slot (records never relocate).
    pub fn update(&mut self, citizen: &Citizen) -> Result<bool> {
        self.ensure_open()?;
        let Some(rid) = self.index.search(&mut self.pager, citizen.dni)? else {
            return Ok(false);
        };

        let mut buf = vec![0u8; citizen.serialized_size()];
        let size = citizen.serialize_into(&mut buf);

        let mut page = SlottedPage::new(self.pager.page_mut(rid.page)?);
        let Some((_, old_size)) = page.slot_entry(rid.slot) else {
            return Ok(false);
        };
        if size > old_size as usize {
            return Ok(false);
        }

        if !page.delete(rid.slot) {
            return Ok(false);
        }
        Ok(page.insert_into_slot(rid.slot, &buf[..size]))
    }

    /// Delete a citizen by DNI: tombstone the record, then drop the key
    /// from the index. Returns `Ok(false)` when the DNI is absent.
    pub fn delete(&mut self, dni: Dni) -> Result<bool> {
        self.ensure_open()?;
        let Some(rid) = self.index.search(&mut self.pager, dni)? else {
            return Ok(false);
        };

        let mut page = SlottedPage::new(self.pager.page_mut(rid.page)?);
        if !page.delete(rid.slot) {
            return Ok(false);
        }
        self.index.remove(&mut self.pager, dni)
    }

    /// All stored DNIs in ascending order (a leftmost-leaf chain walk).
    pub fn scan_dnis(&mut self) -> Result<Vec<Dni>> {
        self.ensure_open()?;
        Ok(self
            .index
            .scan(&mut self.pager)?
            .into_iter()
            .map(|(dni, _)| dni)
            .collect())
    }

    // ---------------------------------------------------------------------
    // Private helpers
    // ---------------------------------------------------------------------

    /// The data page a new record of `size` bytes goes to: the last data
    /// page when it still has room for the record plus a directory slot,
    /// otherwise a freshly initialised page which becomes the new last.
    fn data_page_with_room(&mut self, size: usize) -> Result<PageId> {
        if self.last_data_page != INVALID_PAGE_ID {
            let page = SlottedPage::new(self.pager.page_mut(self.last_data_page)?);
            if page.has_space(SLOT_SIZE + size) {
                return Ok(self.last_data_page);
            }
        }

        let id = self.pager.alloc()?;
        SlottedPage::new(self.pager.page_mut(id)?).init();
        self.last_data_page = id;
        Ok(id)
    }

    fn write_superblock(&mut self) -> Result<()> {
        let superblock = Superblock {
            root: self.index.root(),
            last_data_page: self.last_data_page,
        };
        superblock.write(self.pager.page_mut(SUPERBLOCK_PAGE_ID)?);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
