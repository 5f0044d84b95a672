//! Ledger Source Capabilities
//!
//! The offload engine does not implement ledger storage itself - it consumes
//! two capabilities from the surrounding system:
//!
//! - [`LedgerSource`]: a closed, immutable, randomly-readable sequence of
//!   entries with a known length and last-confirmed entry id. The bulk path
//!   reads from it; it is never written to.
//! - [`LedgerInfoProvider`]: per-ledger metadata snapshots for the streaming
//!   path, which may span ledgers that are still open. When a ledger has no
//!   recorded metadata yet, the engine falls back to the last entry id seen
//!   in the uploaded block.
//!
//! [`MemoryLedger`] is an in-memory implementation used by tests and small
//! tools, analogous to running the metadata store against `:memory:`.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::index::LedgerMeta;
use async_trait::async_trait;
use bytes::Bytes;

/// A closed, randomly-readable ledger. Consumed by the bulk offload path.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Ledger id.
    fn id(&self) -> u64;

    /// Total payload bytes in the ledger.
    fn length(&self) -> u64;

    /// Whether the ledger is closed. Open ledgers are never bulk-offloaded.
    fn is_closed(&self) -> bool;

    /// Id of the last confirmed entry, or `None` for an empty ledger.
    fn last_confirmed_entry(&self) -> Option<u64>;

    /// Read entries `first..=last` in order.
    async fn read_entries(&self, first: u64, last: u64) -> Result<Vec<Entry>>;
}

/// Per-ledger metadata snapshots for the streaming path.
pub trait LedgerInfoProvider: Send + Sync {
    /// Metadata for a ledger, if known. `None` for ledgers still open.
    fn ledger_info(&self, ledger_id: u64) -> Option<LedgerMeta>;
}

/// Provider that knows nothing; every snapshot falls back to block contents.
pub struct NoLedgerInfo;

impl LedgerInfoProvider for NoLedgerInfo {
    fn ledger_info(&self, _ledger_id: u64) -> Option<LedgerMeta> {
        None
    }
}

/// Fixed metadata map, handy for tests and for closed-ledger catalogs.
pub struct StaticLedgerInfo {
    ledgers: std::collections::HashMap<u64, LedgerMeta>,
}

impl StaticLedgerInfo {
    pub fn new(metas: impl IntoIterator<Item = LedgerMeta>) -> Self {
        Self {
            ledgers: metas.into_iter().map(|m| (m.ledger_id, m)).collect(),
        }
    }
}

impl LedgerInfoProvider for StaticLedgerInfo {
    fn ledger_info(&self, ledger_id: u64) -> Option<LedgerMeta> {
        self.ledgers.get(&ledger_id).cloned()
    }
}

/// In-memory ledger for tests.
pub struct MemoryLedger {
    id: u64,
    closed: bool,
    entries: Vec<Bytes>,
}

impl MemoryLedger {
    /// Create a closed ledger holding the given payloads as entries 0..n.
    pub fn closed(id: u64, payloads: Vec<Bytes>) -> Self {
        Self {
            id,
            closed: true,
            entries: payloads,
        }
    }

    /// Create an open (not yet offloadable) ledger.
    pub fn open(id: u64, payloads: Vec<Bytes>) -> Self {
        Self {
            id,
            closed: false,
            entries: payloads,
        }
    }

    pub fn meta(&self) -> LedgerMeta {
        LedgerMeta {
            ledger_id: self.id,
            entry_count: self.entries.len() as u64,
            size_bytes: self.length(),
        }
    }
}

#[async_trait]
impl LedgerSource for MemoryLedger {
    fn id(&self) -> u64 {
        self.id
    }

    fn length(&self) -> u64 {
        self.entries.iter().map(|p| p.len() as u64).sum()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn last_confirmed_entry(&self) -> Option<u64> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.len() as u64 - 1)
        }
    }

    async fn read_entries(&self, first: u64, last: u64) -> Result<Vec<Entry>> {
        if last < first {
            return Err(Error::Ledger(format!(
                "invalid entry range {}..={}",
                first, last
            )));
        }
        if last >= self.entries.len() as u64 {
            return Err(Error::Ledger(format!(
                "entry {} out of range for ledger {} ({} entries)",
                last,
                self.id,
                self.entries.len()
            )));
        }
        Ok((first..=last)
            .map(|entry_id| Entry::new(self.id, entry_id, self.entries[entry_id as usize].clone()))
            .collect())
    }
}
