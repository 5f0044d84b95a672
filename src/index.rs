//! Offload Index Format
//!
//! Every data object is paired with a small index object that maps entry
//! positions to byte ranges. The index carries:
//!
//! - the total data object length,
//! - per-ledger metadata snapshots ([`LedgerMeta`]),
//! - ordered block descriptors ([`BlockDescriptor`]) whose
//!   `(byte_offset, length)` ranges exactly tile the data object.
//!
//! Two wire versions exist. V1 indexes describe a single bulk-offloaded
//! ledger; V2 indexes describe a streaming segment that may span several
//! ledgers. Readers accept both.
//!
//! ## Layout
//!
//! ```text
//! +--------+---------+-------------------+--------------+--------------+
//! | magic  | version | data_object_length| ledger_count | block_count  |
//! | u32    | u16     | u64               | u32          | u32          |
//! +--------+---------+-------------------+--------------+--------------+
//! | ledger metas: [ledger_id u64 | entry_count u64 | size_bytes u64]   |
//! | block descriptors:                                                 |
//! |   [ledger_id u64 | first_entry_id u64 | part_id u32 |              |
//! |    byte_offset u64 | length u64]                                   |
//! +--------------------------------------------------------------------+
//! | crc32 of everything above, u32                                     |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Construction
//!
//! [`IndexBuilder`] accumulates descriptors as parts are uploaded. Part ids
//! start at 1 and must arrive in order; byte offsets are computed
//! cumulatively, so the tiling invariant holds by construction. `build_*`
//! consumes the builder - an index is sealed exactly once.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const INDEX_MAGIC: u32 = 0x4C49_4458; // "LIDX"
pub const INDEX_VERSION_SINGLE: u16 = 1;
pub const INDEX_VERSION_MULTI: u16 = 2;

const INDEX_HEADER_SIZE: usize = 4 + 2 + 8 + 4 + 4;
const LEDGER_META_SIZE: usize = 8 + 8 + 8;
const BLOCK_DESC_SIZE: usize = 8 + 8 + 4 + 8 + 8;

/// Metadata snapshot for one ledger covered by an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMeta {
    pub ledger_id: u64,
    pub entry_count: u64,
    pub size_bytes: u64,
}

/// Location of one block inside the data object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub ledger_id: u64,
    pub first_entry_id: u64,
    /// Multipart part id the block was uploaded as. Starts at 1.
    pub part_id: u32,
    /// Byte offset of the block within the data object.
    pub byte_offset: u64,
    /// Block length in bytes.
    pub length: u64,
}

impl BlockDescriptor {
    pub fn end_offset(&self) -> u64 {
        self.byte_offset + self.length
    }
}

/// Accumulates block descriptors while parts are uploaded.
pub struct IndexBuilder {
    ledgers: Vec<LedgerMeta>,
    blocks: Vec<BlockDescriptor>,
    data_object_length: u64,
    next_part_id: u32,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self {
            ledgers: Vec::new(),
            blocks: Vec::new(),
            data_object_length: 0,
            next_part_id: 1,
        }
    }

    /// Record a block uploaded as the next multipart part.
    ///
    /// Part ids must arrive in order starting at 1. The block's byte offset
    /// is the current data object length, so descriptors tile the object with
    /// no gaps or overlaps.
    pub fn add_block(
        &mut self,
        ledger_id: u64,
        first_entry_id: u64,
        part_id: u32,
        length: u64,
    ) -> Result<()> {
        if part_id != self.next_part_id {
            return Err(Error::InvalidIndex(format!(
                "part id {} out of order, expected {}",
                part_id, self.next_part_id
            )));
        }
        if length == 0 {
            return Err(Error::InvalidIndex("zero-length block".to_string()));
        }
        self.blocks.push(BlockDescriptor {
            ledger_id,
            first_entry_id,
            part_id,
            byte_offset: self.data_object_length,
            length,
        });
        self.data_object_length += length;
        self.next_part_id += 1;
        Ok(())
    }

    /// Record a ledger metadata snapshot.
    pub fn add_ledger_meta(&mut self, meta: LedgerMeta) {
        self.ledgers.push(meta);
    }

    /// Bytes uploaded so far.
    pub fn data_object_length(&self) -> u64 {
        self.data_object_length
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Seal a single-ledger (bulk) index.
    pub fn build_single(self) -> Result<OffloadIndex> {
        self.build(INDEX_VERSION_SINGLE)
    }

    /// Seal a multi-ledger (streaming segment) index.
    pub fn build_multi(self) -> Result<OffloadIndex> {
        self.build(INDEX_VERSION_MULTI)
    }

    fn build(self, version: u16) -> Result<OffloadIndex> {
        if self.blocks.is_empty() {
            return Err(Error::InvalidIndex(
                "index must describe at least one block".to_string(),
            ));
        }
        if version == INDEX_VERSION_SINGLE {
            let ledger = self.blocks[0].ledger_id;
            if self.blocks.iter().any(|b| b.ledger_id != ledger) {
                return Err(Error::InvalidIndex(
                    "single-ledger index spans multiple ledgers".to_string(),
                ));
            }
        }
        Ok(OffloadIndex {
            version,
            data_object_length: self.data_object_length,
            ledgers: self.ledgers,
            blocks: self.blocks,
        })
    }
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A sealed, serializable offload index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadIndex {
    pub version: u16,
    pub data_object_length: u64,
    pub ledgers: Vec<LedgerMeta>,
    pub blocks: Vec<BlockDescriptor>,
}

impl OffloadIndex {
    /// Find the block holding `(ledger_id, entry_id)`, if any.
    ///
    /// Blocks are ordered by `(ledger_id, first_entry_id)`; the match is the
    /// last block whose first entry does not exceed the target, provided the
    /// ledger matches.
    pub fn find_block(&self, ledger_id: u64, entry_id: u64) -> Option<&BlockDescriptor> {
        let idx = self
            .blocks
            .partition_point(|b| (b.ledger_id, b.first_entry_id) <= (ledger_id, entry_id));
        if idx == 0 {
            return None;
        }
        let block = &self.blocks[idx - 1];
        (block.ledger_id == ledger_id).then_some(block)
    }

    /// Metadata for one of the covered ledgers.
    pub fn ledger_meta(&self, ledger_id: u64) -> Option<&LedgerMeta> {
        self.ledgers.iter().find(|m| m.ledger_id == ledger_id)
    }

    pub fn to_bytes(&self) -> Bytes {
        let body_len = INDEX_HEADER_SIZE
            + self.ledgers.len() * LEDGER_META_SIZE
            + self.blocks.len() * BLOCK_DESC_SIZE;
        let mut buf = BytesMut::with_capacity(body_len + 4);
        buf.put_u32(INDEX_MAGIC);
        buf.put_u16(self.version);
        buf.put_u64(self.data_object_length);
        buf.put_u32(self.ledgers.len() as u32);
        buf.put_u32(self.blocks.len() as u32);

        for meta in &self.ledgers {
            buf.put_u64(meta.ledger_id);
            buf.put_u64(meta.entry_count);
            buf.put_u64(meta.size_bytes);
        }
        for block in &self.blocks {
            buf.put_u64(block.ledger_id);
            buf.put_u64(block.first_entry_id);
            buf.put_u32(block.part_id);
            buf.put_u64(block.byte_offset);
            buf.put_u64(block.length);
        }

        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);
        buf.freeze()
    }

    pub fn from_bytes(data: &Bytes) -> Result<Self> {
        if data.len() < INDEX_HEADER_SIZE + 4 {
            return Err(Error::InvalidIndex("index shorter than header".to_string()));
        }

        let body = &data[..data.len() - 4];
        let stored_crc = (&data[data.len() - 4..]).get_u32();
        if crc32fast::hash(body) != stored_crc {
            return Err(Error::CrcMismatch);
        }

        let mut cursor = body;
        if cursor.get_u32() != INDEX_MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = cursor.get_u16();
        if version != INDEX_VERSION_SINGLE && version != INDEX_VERSION_MULTI {
            return Err(Error::UnsupportedVersion(version));
        }
        let data_object_length = cursor.get_u64();
        let ledger_count = cursor.get_u32() as usize;
        let block_count = cursor.get_u32() as usize;

        let expected = ledger_count * LEDGER_META_SIZE + block_count * BLOCK_DESC_SIZE;
        if cursor.remaining() != expected {
            return Err(Error::InvalidIndex(format!(
                "index body length {} does not match {} ledgers, {} blocks",
                cursor.remaining(),
                ledger_count,
                block_count
            )));
        }

        let mut ledgers = Vec::with_capacity(ledger_count);
        for _ in 0..ledger_count {
            ledgers.push(LedgerMeta {
                ledger_id: cursor.get_u64(),
                entry_count: cursor.get_u64(),
                size_bytes: cursor.get_u64(),
            });
        }

        let mut blocks = Vec::with_capacity(block_count);
        let mut expected_offset = 0u64;
        for i in 0..block_count {
            let block = BlockDescriptor {
                ledger_id: cursor.get_u64(),
                first_entry_id: cursor.get_u64(),
                part_id: cursor.get_u32(),
                byte_offset: cursor.get_u64(),
                length: cursor.get_u64(),
            };
            if block.byte_offset != expected_offset {
                return Err(Error::InvalidIndex(format!(
                    "block {} does not tile: offset {} expected {}",
                    i, block.byte_offset, expected_offset
                )));
            }
            expected_offset = block.end_offset();
            blocks.push(block);
        }
        if expected_offset != data_object_length {
            return Err(Error::InvalidIndex(format!(
                "blocks cover {} bytes but data object is {}",
                expected_offset, data_object_length
            )));
        }

        Ok(Self {
            version,
            data_object_length,
            ledgers,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> OffloadIndex {
        let mut builder = IndexBuilder::new();
        builder.add_block(3, 0, 1, 100).unwrap();
        builder.add_block(3, 50, 2, 60).unwrap();
        builder.add_block(4, 0, 3, 30).unwrap();
        builder.add_ledger_meta(LedgerMeta {
            ledger_id: 3,
            entry_count: 80,
            size_bytes: 150,
        });
        builder.add_ledger_meta(LedgerMeta {
            ledger_id: 4,
            entry_count: 10,
            size_bytes: 25,
        });
        builder.build_multi().unwrap()
    }

    #[test]
    fn test_builder_tiles_by_construction() {
        let index = sample_index();
        assert_eq!(index.data_object_length, 190);
        assert_eq!(index.blocks[0].byte_offset, 0);
        assert_eq!(index.blocks[1].byte_offset, 100);
        assert_eq!(index.blocks[2].byte_offset, 160);
    }

    #[test]
    fn test_builder_rejects_out_of_order_parts() {
        let mut builder = IndexBuilder::new();
        builder.add_block(1, 0, 1, 10).unwrap();
        assert!(builder.add_block(1, 5, 3, 10).is_err());
    }

    #[test]
    fn test_single_ledger_index_rejects_mixed_ledgers() {
        let mut builder = IndexBuilder::new();
        builder.add_block(1, 0, 1, 10).unwrap();
        builder.add_block(2, 0, 2, 10).unwrap();
        assert!(builder.build_single().is_err());
    }

    #[test]
    fn test_empty_index_rejected() {
        assert!(IndexBuilder::new().build_single().is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let index = sample_index();
        let bytes = index.to_bytes();
        let decoded = OffloadIndex::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_crc_detects_corruption() {
        let bytes = sample_index().to_bytes();
        let mut corrupt = bytes.to_vec();
        let mid = corrupt.len() / 2;
        corrupt[mid] ^= 0x01;
        assert!(matches!(
            OffloadIndex::from_bytes(&Bytes::from(corrupt)),
            Err(Error::CrcMismatch)
        ));
    }

    #[test]
    fn test_find_block() {
        let index = sample_index();

        // Inside the first block of ledger 3.
        assert_eq!(index.find_block(3, 0).unwrap().part_id, 1);
        assert_eq!(index.find_block(3, 49).unwrap().part_id, 1);
        // Second block starts at entry 50.
        assert_eq!(index.find_block(3, 50).unwrap().part_id, 2);
        assert_eq!(index.find_block(3, 1000).unwrap().part_id, 2);
        // Other ledger.
        assert_eq!(index.find_block(4, 0).unwrap().part_id, 3);
        // Unknown ledger.
        assert!(index.find_block(2, 0).is_none());
    }

    #[test]
    fn test_ledger_meta_lookup() {
        let index = sample_index();
        assert_eq!(index.ledger_meta(3).unwrap().entry_count, 80);
        assert!(index.ledger_meta(9).is_none());
    }
}
