//! Offload Configuration
//!
//! This module defines configuration for the offload engine.
//!
//! ## OffloadConfig
//!
//! Controls how ledgers are split into blocks, how streaming segments are
//! rolled, and how read-back is cached:
//!
//! - **max_block_size**: byte budget per data block on the bulk path (default: 64MB)
//! - **streaming_block_size**: byte threshold that triggers a block upload on
//!   the streaming path (default: 5MB)
//! - **write_buffer_size**: bound on pending (undrained) streaming bytes;
//!   the effective bound is `max(write_buffer_size, streaming_block_size)` so
//!   the buffer can always hold a full block (default: 10MB)
//! - **max_segment_size**: cumulative bytes after which a streaming segment
//!   closes automatically (default: 1GB)
//! - **min_segment_open_ms / max_segment_open_ms**: a size-triggered close is
//!   deferred until the minimum open duration has elapsed; a timer forces
//!   close at the maximum regardless of volume (defaults: 0 / 10 minutes)
//! - **drain_poll_ms**: how long the drain loop waits for more data before
//!   re-checking (default: 100ms)
//! - **scan_page_size**: page size for bucket scans (default: 100)
//! - **worker_count**: fixed worker pool size; operations for one ledger or
//!   segment always serialize through the same worker (default: 4)
//!
//! ## Usage
//!
//! ```ignore
//! use ledger_offload::OffloadConfig;
//!
//! // Small blocks for faster testing
//! let config = OffloadConfig {
//!     max_block_size: 1024 * 1024,
//!     streaming_block_size: 256 * 1024,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadConfig {
    /// Byte budget per data block on the bulk path (default: 64MB).
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,

    /// Byte threshold that triggers a streaming block upload (default: 5MB).
    #[serde(default = "default_streaming_block_size")]
    pub streaming_block_size: usize,

    /// Bound on pending streaming bytes awaiting drain (default: 10MB).
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,

    /// Cumulative segment bytes after which a close is requested (default: 1GB).
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: u64,

    /// Minimum time a segment stays open before a size-triggered close (default: 0).
    #[serde(default)]
    pub min_segment_open_ms: u64,

    /// Maximum time a segment stays open before a forced close (default: 10 minutes).
    #[serde(default = "default_max_segment_open_ms")]
    pub max_segment_open_ms: u64,

    /// Drain loop wait between checks when there is not enough data (default: 100ms).
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,

    /// Entry offset cache capacity, shared across readers (default: 16384).
    #[serde(default = "default_offsets_cache_capacity")]
    pub offsets_cache_capacity: usize,

    /// Age after which a cached entry offset is considered stale (default: 10 minutes).
    #[serde(default = "default_offsets_cache_ttl_ms")]
    pub offsets_cache_ttl_ms: u64,

    /// Page size for paginated bucket scans (default: 100).
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,

    /// Fixed worker pool size for ledger/segment-affine scheduling (default: 4).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            max_block_size: default_max_block_size(),
            streaming_block_size: default_streaming_block_size(),
            write_buffer_size: default_write_buffer_size(),
            max_segment_size: default_max_segment_size(),
            min_segment_open_ms: 0,
            max_segment_open_ms: default_max_segment_open_ms(),
            drain_poll_ms: default_drain_poll_ms(),
            offsets_cache_capacity: default_offsets_cache_capacity(),
            offsets_cache_ttl_ms: default_offsets_cache_ttl_ms(),
            scan_page_size: default_scan_page_size(),
            worker_count: default_worker_count(),
        }
    }
}

impl OffloadConfig {
    /// Effective bound on pending streaming bytes.
    ///
    /// Never smaller than the streaming block size, so the buffer can always
    /// accumulate enough content to fill one full block.
    pub fn max_buffer_len(&self) -> u64 {
        self.write_buffer_size.max(self.streaming_block_size) as u64
    }

    pub fn min_segment_open(&self) -> Duration {
        Duration::from_millis(self.min_segment_open_ms)
    }

    pub fn max_segment_open(&self) -> Duration {
        Duration::from_millis(self.max_segment_open_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn offsets_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.offsets_cache_ttl_ms)
    }
}

fn default_max_block_size() -> usize {
    64 * 1024 * 1024
}

fn default_streaming_block_size() -> usize {
    5 * 1024 * 1024
}

fn default_write_buffer_size() -> usize {
    10 * 1024 * 1024
}

fn default_max_segment_size() -> u64 {
    1024 * 1024 * 1024
}

fn default_max_segment_open_ms() -> u64 {
    10 * 60 * 1000
}

fn default_drain_poll_ms() -> u64 {
    100
}

fn default_offsets_cache_capacity() -> usize {
    16384
}

fn default_offsets_cache_ttl_ms() -> u64 {
    10 * 60 * 1000
}

fn default_scan_page_size() -> usize {
    100
}

fn default_worker_count() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OffloadConfig::default();
        assert_eq!(config.max_block_size, 64 * 1024 * 1024);
        assert_eq!(config.streaming_block_size, 5 * 1024 * 1024);
        assert_eq!(config.scan_page_size, 100);
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn test_buffer_bound_covers_a_full_block() {
        let config = OffloadConfig {
            write_buffer_size: 1024,
            streaming_block_size: 4096,
            ..Default::default()
        };
        // A buffer smaller than the block size could never fill a block.
        assert_eq!(config.max_buffer_len(), 4096);

        let config = OffloadConfig {
            write_buffer_size: 8192,
            streaming_block_size: 4096,
            ..Default::default()
        };
        assert_eq!(config.max_buffer_len(), 8192);
    }
}
