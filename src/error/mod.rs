//! Unified error handling for the padron storage engine.
//!
//! This module defines [`StoreError`], the single error type propagated
//! throughout every layer of the engine -- from the file mapping and pager,
//! through the slotted pages and the B+Tree, up to the public [`Database`]
//! surface.
//!
//! Only genuine failures become errors. Outcomes the caller is expected to
//! handle in normal operation -- a duplicate key on insert, a missing key on
//! lookup or delete, an update whose payload no longer fits its slot -- are
//! reported as values (`Ok(false)` / `Ok(None)`), never as a [`StoreError`].
//!
//! A convenience [`Result<T>`] type alias is re-exported so that callers can
//! write `Result<T>` instead of `std::result::Result<T, StoreError>`.
//!
//! [`Database`]: crate::Database

use std::io;

use thiserror::Error;

/// The canonical error type for all storage operations.
///
/// Every fallible function in the codebase returns this type (via the
/// [`Result`] alias). Variants are organised by subsystem so that callers
/// can match on the error category without inspecting free-form strings.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error originating from the filesystem or the mapping layer.
    ///
    /// This includes a failed grow of the database file: the previous
    /// mapping is preserved in that case, so the store remains usable.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An operation was attempted on a file map or database that has
    /// already been closed.
    #[error("storage is closed")]
    Closed,

    /// The on-disk file is corrupt or contains an unrecognised structure
    /// (e.g. a superblock referencing an impossible root page, a node with
    /// an unknown type byte, a record that cannot be decoded).
    #[error("corrupt database: {0}")]
    Corrupt(String),

    /// The requested page number does not exist in the database file.
    #[error("page not found: {0}")]
    PageNotFound(u32),

    /// The page counter would overflow the invalid-page sentinel; the file
    /// cannot hold any more pages.
    #[error("out of pages: page id space exhausted")]
    OutOfPages,
}

/// A specialised [`Result`] type for storage operations.
///
/// This is defined as a convenience so that every function in the codebase
/// can simply return `Result<T>` rather than spelling out the full
/// `std::result::Result<T, StoreError>`.
pub type Result<T> = std::result::Result<T, StoreError>;
