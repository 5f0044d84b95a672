//! Offloaded Read-Back
//!
//! [`OffloadedReader`] reconstructs entries from data objects using their
//! indexes. Opening a reader fetches and validates the index object for
//! every data object named (magic, version, CRC, tiling) and builds one
//! ordered map of `(ledger_id, entry_id)` to owning block across all of
//! them, so a reader can span a bulk object and several streaming segments.
//!
//! Point reads go through the shared [`OffsetsCache`]: a hit fetches just
//! the entry's frame with one ranged get; a miss fetches the owning block,
//! records every frame's byte range, and returns the target. Sequential
//! reads amortize through the same per-block fill.
//!
//! Dropping a reader releases local state only; nothing is touched in the
//! store.

use crate::block::{parse_block, parse_frame};
use crate::cache::OffsetsCache;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::index::{BlockDescriptor, LedgerMeta, OffloadIndex};
use crate::keys;
use crate::store::BlobStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

struct BlockRef {
    data_key: Arc<str>,
    descriptor: BlockDescriptor,
}

pub struct OffloadedReader {
    store: Arc<dyn BlobStore>,
    /// `(ledger_id, first_entry_id)` of each block, across all data objects.
    blocks: BTreeMap<(u64, u64), BlockRef>,
    ledgers: HashMap<u64, LedgerMeta>,
    cache: OffsetsCache,
}

impl std::fmt::Debug for OffloadedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadedReader")
            .field("blocks", &self.blocks.len())
            .field("ledgers", &self.ledgers.len())
            .finish_non_exhaustive()
    }
}

impl OffloadedReader {
    /// Open a reader over the given data objects.
    ///
    /// Each data object's index is fetched and validated up front; a missing
    /// or corrupt index fails the open.
    pub async fn open(
        store: Arc<dyn BlobStore>,
        data_keys: impl IntoIterator<Item = String>,
        cache: OffsetsCache,
    ) -> Result<Self> {
        let mut blocks = BTreeMap::new();
        let mut ledgers = HashMap::new();

        for data_key in data_keys {
            let index_bytes = store.get(&keys::index_key(&data_key)).await?;
            let index = OffloadIndex::from_bytes(&index_bytes)?;
            debug!(
                key = %data_key,
                version = index.version,
                blocks = index.blocks.len(),
                "opened offload index"
            );

            let data_key: Arc<str> = Arc::from(data_key);
            for descriptor in index.blocks {
                blocks.insert(
                    (descriptor.ledger_id, descriptor.first_entry_id),
                    BlockRef {
                        data_key: data_key.clone(),
                        descriptor,
                    },
                );
            }
            for meta in index.ledgers {
                ledgers.insert(meta.ledger_id, meta);
            }
        }

        Ok(Self {
            store,
            blocks,
            ledgers,
            cache,
        })
    }

    /// Ledgers this reader covers, with their metadata snapshots.
    pub fn ledgers(&self) -> impl Iterator<Item = &LedgerMeta> {
        self.ledgers.values()
    }

    /// Read one entry by position.
    pub async fn read_entry(&self, ledger_id: u64, entry_id: u64) -> Result<Entry> {
        let not_found = || Error::EntryNotFound {
            ledger_id,
            entry_id,
        };

        match self.ledgers.get(&ledger_id) {
            Some(meta) if entry_id < meta.entry_count => {}
            _ => return Err(not_found()),
        }

        let block = self
            .blocks
            .range(..=(ledger_id, entry_id))
            .next_back()
            .map(|(_, block)| block)
            .filter(|block| block.descriptor.ledger_id == ledger_id)
            .ok_or_else(not_found)?;

        if let Some(cached) = self.cache.get(&block.data_key, ledger_id, entry_id) {
            let frame = self
                .store
                .get_range(
                    &block.data_key,
                    cached.offset..cached.offset + cached.frame_len as u64,
                )
                .await?;
            return parse_frame(ledger_id, &frame);
        }

        let data = self
            .store
            .get_range(
                &block.data_key,
                block.descriptor.byte_offset..block.descriptor.end_offset(),
            )
            .await?;
        let parsed = parse_block(&data)?;
        if parsed.ledger_id != ledger_id {
            return Err(Error::InvalidBlock(format!(
                "block at {} holds ledger {}, expected {}",
                block.descriptor.byte_offset, parsed.ledger_id, ledger_id
            )));
        }

        let mut target = None;
        for frame in parsed.frames {
            self.cache.insert(
                &block.data_key,
                ledger_id,
                frame.entry.entry_id,
                block.descriptor.byte_offset + frame.offset_in_block as u64,
                frame.frame_len,
            );
            if frame.entry.entry_id == entry_id {
                target = Some(frame.entry);
            }
        }
        target.ok_or_else(not_found)
    }

    /// Read entries `first..=last` of one ledger, in order.
    pub async fn read_range(&self, ledger_id: u64, first: u64, last: u64) -> Result<Vec<Entry>> {
        if last < first {
            return Err(Error::Ledger(format!(
                "invalid entry range {}..={}",
                first, last
            )));
        }
        let mut entries = Vec::with_capacity((last - first + 1) as usize);
        for entry_id in first..=last {
            entries.push(self.read_entry(ledger_id, entry_id).await?);
        }
        Ok(entries)
    }
}
