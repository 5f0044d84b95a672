//! Entry and Position Types
//!
//! This module defines the core `Entry` type - the unit of ledger data the
//! offload engine moves - and `Position`, a `(ledger_id, entry_id)` pair
//! identifying a point in the stream.
//!
//! ## Structure
//!
//! - **ledger_id**: the ledger the entry belongs to
//! - **entry_id**: unique, monotonically increasing id within the ledger
//! - **payload**: the record data (arbitrary bytes)
//!
//! ## Design Decisions
//!
//! - Uses `bytes::Bytes` for zero-copy payload handling (entries are cloned
//!   into the streaming buffer and dropped once folded into a block)
//! - Positions order lexicographically by `(ledger_id, entry_id)`, matching
//!   source order across ledgers

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Ledger this entry belongs to.
    pub ledger_id: u64,

    /// Entry id within the ledger.
    pub entry_id: u64,

    /// Payload bytes.
    pub payload: Bytes,
}

impl Entry {
    pub fn new(ledger_id: u64, entry_id: u64, payload: Bytes) -> Self {
        Self {
            ledger_id,
            entry_id,
            payload,
        }
    }

    /// Payload length in bytes. Buffer and block accounting use this value.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn position(&self) -> Position {
        Position {
            ledger_id: self.ledger_id,
            entry_id: self.entry_id,
        }
    }
}

/// A `(ledger_id, entry_id)` position in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub ledger_id: u64,
    pub entry_id: u64,
}

impl Position {
    pub fn new(ledger_id: u64, entry_id: u64) -> Self {
        Self {
            ledger_id,
            entry_id,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.entry_id)
    }
}
