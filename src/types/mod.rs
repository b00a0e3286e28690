//! Core record types for the citizen store.
//!
//! This module provides:
//! - [`Dni`]: the 32-bit national identity number every record is keyed by.
//! - [`RecordId`]: the `(page, slot)` locator of a stored record.
//! - [`Citizen`]: the stored entity, with its compact binary encoding.
//!
//! ## Wire format
//!
//! A serialized citizen is laid out as
//!
//! ```text
//! [dni: u32 LE]
//! [len: u16 LE][given_names bytes]
//! [len: u16 LE][surnames bytes]
//! [len: u16 LE][address bytes]
//! ```
//!
//! The storage layers below treat these bytes as opaque; only this module
//! encodes and decodes them.

use crate::error::{Result, StoreError};
use crate::page::SlotId;
use crate::pager::PageId;

// ---------------------------------------------------------------------------
// Dni / RecordId
// ---------------------------------------------------------------------------

/// A national identity number; the unique key of every stored record.
pub type Dni = u32;

/// Locator of a stored record: the data page holding it and the slot within
/// that page's directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordId {
    pub page: PageId,
    pub slot: SlotId,
}

// ---------------------------------------------------------------------------
// Citizen
// ---------------------------------------------------------------------------

/// One citizen record as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citizen {
    pub dni: Dni,
    pub given_names: String,
    pub surnames: String,
    pub address: String,
}

impl Citizen {
    pub fn new(
        dni: Dni,
        given_names: impl Into<String>,
        surnames: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Citizen {
            dni,
            given_names: given_names.into(),
            surnames: surnames.into(),
            address: address.into(),
        }
    }

    /// Number of bytes [`serialize_into`](Self::serialize_into) will write.
    pub fn serialized_size(&self) -> usize {
        4 + 3 * 2 + self.given_names.len() + self.surnames.len() + self.address.len()
    }

    /// Write the wire form into `buf`, returning the number of bytes
    /// written. `buf` must hold at least
    /// [`serialized_size`](Self::serialized_size) bytes.
    pub fn serialize_into(&self, buf: &mut [u8]) -> usize {
        let mut pos = 0;
        buf[pos..pos + 4].copy_from_slice(&self.dni.to_le_bytes());
        pos += 4;
        for field in [&self.given_names, &self.surnames, &self.address] {
            let bytes = field.as_bytes();
            buf[pos..pos + 2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
            pos += 2;
            buf[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        }
        pos
    }

    /// Decode a citizen from its wire form.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Corrupt`] -- the buffer is truncated or a string
    ///   field is not valid UTF-8.
    pub fn deserialize(bytes: &[u8]) -> Result<Citizen> {
        let mut reader = Reader { bytes, pos: 0 };
        let dni = reader.read_u32()?;
        let given_names = reader.read_string()?;
        let surnames = reader.read_string()?;
        let address = reader.read_string()?;
        Ok(Citizen {
            dni,
            given_names,
            surnames,
            address,
        })
    }
}

/// Cursor over a serialized record; every read is bounds-checked so a
/// corrupt record surfaces as an error rather than a panic.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let out = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(StoreError::Corrupt("truncated record".into())),
        }
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = {
            let b = self.take(2)?;
            u16::from_le_bytes([b[0], b[1]]) as usize
        };
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StoreError::Corrupt("record field is not valid UTF-8".into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
