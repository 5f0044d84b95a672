//! Data Block Wire Format
//!
//! A block is a contiguous run of same-ledger entries uploaded as one
//! multipart part. Blocks are the granularity of the index: each one is
//! described by a `(ledger_id, first_entry, part_id, byte_offset, length)`
//! descriptor, and the descriptors exactly tile the stored data object.
//!
//! ## Layout
//!
//! ```text
//! +--------+---------+-----------+----------------+-------------+
//! | magic  | version | ledger_id | first_entry_id | entry_count |
//! | u32    | u16     | u64       | u64            | u32         |
//! +--------+---------+-----------+----------------+-------------+
//! | frame 0: len u32 | entry_id u64 | payload [len]             |
//! | frame 1: ...                                                |
//! +-------------------------------------------------------------+
//! ```
//!
//! There is no padding: a block's wire size is exactly the header plus the
//! sum of its frames, which is what makes the tiling invariant hold.
//!
//! ## Sizing Rule
//!
//! Entries are admitted into a block while the accumulated *payload* bytes
//! stay under the configured budget; the entry that reaches or crosses the
//! budget is still admitted and closes the block. A block therefore may
//! exceed the budget by at most one entry, and never splits an entry.

use crate::entry::Entry;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const BLOCK_MAGIC: u32 = 0x4F42_4C4B; // "OBLK"
pub const BLOCK_VERSION: u16 = 1;

/// magic + version + ledger_id + first_entry_id + entry_count
pub const BLOCK_HEADER_SIZE: usize = 4 + 2 + 8 + 8 + 4;

/// len + entry_id prefix on every entry frame
pub const ENTRY_FRAME_OVERHEAD: usize = 4 + 8;

/// Wire size of a block holding the given entries.
pub fn block_wire_size(entries: &[Entry]) -> u64 {
    BLOCK_HEADER_SIZE as u64
        + entries
            .iter()
            .map(|e| (ENTRY_FRAME_OVERHEAD + e.len()) as u64)
            .sum::<u64>()
}

/// Decide whether one more entry fits the current block.
///
/// `accumulated` is the payload bytes already admitted. The first entry is
/// always admitted.
pub fn admits_entry(accumulated: u64, admitted: usize, max_block_size: usize) -> bool {
    admitted == 0 || accumulated < max_block_size as u64
}

/// Encode a block from same-ledger entries.
pub fn encode_block(entries: &[Entry]) -> Result<Bytes> {
    let first = entries
        .first()
        .ok_or_else(|| Error::InvalidBlock("cannot encode an empty block".to_string()))?;
    if entries.iter().any(|e| e.ledger_id != first.ledger_id) {
        return Err(Error::InvalidBlock(
            "all entries in a block must share one ledger id".to_string(),
        ));
    }

    let mut buf = BytesMut::with_capacity(block_wire_size(entries) as usize);
    buf.put_u32(BLOCK_MAGIC);
    buf.put_u16(BLOCK_VERSION);
    buf.put_u64(first.ledger_id);
    buf.put_u64(first.entry_id);
    buf.put_u32(entries.len() as u32);

    for entry in entries {
        buf.put_u32(entry.len() as u32);
        buf.put_u64(entry.entry_id);
        buf.put_slice(&entry.payload);
    }

    Ok(buf.freeze())
}

/// One decoded entry frame plus its location inside the block.
#[derive(Debug, Clone)]
pub struct Frame {
    pub entry: Entry,
    /// Byte offset of the frame within the block.
    pub offset_in_block: u32,
    /// Full frame length (prefix + payload).
    pub frame_len: u32,
}

/// A fully parsed block.
#[derive(Debug)]
pub struct ParsedBlock {
    pub ledger_id: u64,
    pub first_entry_id: u64,
    pub frames: Vec<Frame>,
}

/// Parse a block fetched from the data object.
pub fn parse_block(data: &Bytes) -> Result<ParsedBlock> {
    if data.len() < BLOCK_HEADER_SIZE {
        return Err(Error::InvalidBlock("block shorter than header".to_string()));
    }

    let mut cursor = &data[..];
    if cursor.get_u32() != BLOCK_MAGIC {
        return Err(Error::InvalidMagic);
    }
    let version = cursor.get_u16();
    if version != BLOCK_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let ledger_id = cursor.get_u64();
    let first_entry_id = cursor.get_u64();
    let entry_count = cursor.get_u32() as usize;

    let mut frames = Vec::with_capacity(entry_count);
    let mut pos = BLOCK_HEADER_SIZE;
    for _ in 0..entry_count {
        if data.len() < pos + ENTRY_FRAME_OVERHEAD {
            return Err(Error::InvalidBlock("truncated entry frame".to_string()));
        }
        let mut prefix = &data[pos..pos + ENTRY_FRAME_OVERHEAD];
        let len = prefix.get_u32() as usize;
        let entry_id = prefix.get_u64();
        let payload_start = pos + ENTRY_FRAME_OVERHEAD;
        if data.len() < payload_start + len {
            return Err(Error::InvalidBlock("truncated entry payload".to_string()));
        }
        frames.push(Frame {
            entry: Entry::new(ledger_id, entry_id, data.slice(payload_start..payload_start + len)),
            offset_in_block: pos as u32,
            frame_len: (ENTRY_FRAME_OVERHEAD + len) as u32,
        });
        pos = payload_start + len;
    }

    if pos != data.len() {
        return Err(Error::InvalidBlock(format!(
            "trailing bytes after {} frames",
            entry_count
        )));
    }

    Ok(ParsedBlock {
        ledger_id,
        first_entry_id,
        frames,
    })
}

/// Parse a single entry frame starting at the beginning of `data`.
///
/// Used by the cached read path, where the frame's byte range inside the data
/// object is already known.
pub fn parse_frame(ledger_id: u64, data: &Bytes) -> Result<Entry> {
    if data.len() < ENTRY_FRAME_OVERHEAD {
        return Err(Error::InvalidBlock("truncated entry frame".to_string()));
    }
    let mut cursor = &data[..];
    let len = cursor.get_u32() as usize;
    let entry_id = cursor.get_u64();
    if data.len() != ENTRY_FRAME_OVERHEAD + len {
        return Err(Error::InvalidBlock(format!(
            "frame length mismatch: prefix says {}, got {}",
            len,
            data.len() - ENTRY_FRAME_OVERHEAD
        )));
    }
    Ok(Entry::new(
        ledger_id,
        entry_id,
        data.slice(ENTRY_FRAME_OVERHEAD..),
    ))
}
