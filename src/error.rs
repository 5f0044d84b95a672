//! Offload Error Types
//!
//! This module defines all error types that can occur during offload operations.
//!
//! ## Error Categories
//!
//! ### Precondition Errors
//! - `Precondition`: offload requested for an open or empty ledger; no I/O was
//!   performed when this is returned
//!
//! ### Upload Errors
//! - `Upload`: a part upload failed; the multipart upload has been aborted
//! - `Finalize`: the index build/upload failed after the data object was
//!   already committed; a best-effort delete of the orphaned data object was
//!   attempted
//!
//! ### Maintenance Errors
//! - `Deletion`: deleting an object failed for a reason other than "object
//!   does not exist" (a missing object is treated as success)
//! - `Scan`: listing failed or the scan consumer raised an error
//! - `Cancelled`: the scan consumer cancelled; preserved rather than wrapped
//!
//! ### Format Errors
//! - `InvalidMagic` / `UnsupportedVersion` / `CrcMismatch` / `InvalidIndex` /
//!   `InvalidBlock`: a stored index or block failed validation
//!
//! ## Usage
//!
//! All operations return `Result<T>` which is aliased to `Result<T, Error>`,
//! allowing clean propagation with `?`. This layer performs no retries:
//! failures resolve the operation's result exactly once, and compensating
//! actions (abort multipart, delete orphaned data) never replace the
//! original error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Part upload failed for {key}: {reason}")]
    Upload { key: String, reason: String },

    #[error("Finalize failed for {key}: {reason}")]
    Finalize { key: String, reason: String },

    #[error("Deletion failed for {key}: {reason}")]
    Deletion { key: String, reason: String },

    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Scan cancelled by consumer")]
    Cancelled,

    #[error("A streaming segment is already active on this offloader")]
    SegmentActive,

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u16),

    #[error("CRC mismatch")]
    CrcMismatch,

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Entry not found: {ledger_id}:{entry_id}")]
    EntryNotFound { ledger_id: u64, entry_id: u64 },

    #[error("Ledger source error: {0}")]
    Ledger(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
