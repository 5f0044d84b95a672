//! Ledger Offload Engine
//!
//! This crate moves cold append-only ledgers from local storage to
//! S3-compatible object storage while preserving random read-back through a
//! position index.
//!
//! ## What is Offloading?
//!
//! Ledger data starts life on fast local disks. Once a ledger is closed (or
//! while a live segment is still being written), its entries can be shipped
//! to cheap object storage and the local copy reclaimed. Readers then
//! reconstruct any entry straight from the remote objects.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐        ┌──────────────┐
//! │ LedgerSource │        │  Producers   │
//! │   (closed)   │        │ (live entries)│
//! └──────┬───────┘        └──────┬───────┘
//!        │ bulk path             │ offer_entry
//!        ▼                       ▼
//! ┌─────────────────────────────────────────┐
//! │              Offloader                  │
//! │  - folds entries into blocks            │
//! │  - multipart upload, one block per part │
//! │  - builds and stores the index          │
//! └────────────────────┬────────────────────┘
//!                      │ data object + index object
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        Object storage (S3/MinIO)        │
//! └────────────────────┬────────────────────┘
//!                      │ ranged gets
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           OffloadedReader               │
//! │  - index lookup, block fetch            │
//! │  - offsets cache for point reads        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Main Components
//!
//! ### Offloader
//! Engine facade over one store location. Bulk-offloads closed ledgers,
//! drives at most one streaming segment at a time, opens readers, deletes
//! and scans. Work for a ledger or segment always runs on the same worker.
//!
//! ### OffloadHandle
//! Producer-side handle to a streaming segment: non-blocking `offer_entry`
//! with explicit backpressure (`BufferFull`), a `close` that succeeds for
//! exactly one caller, and a result that resolves exactly once with the
//! position range the segment covers.
//!
//! ### OffloadedReader
//! Reconstructs entries from offloaded objects. One reader can span a bulk
//! object and several streaming segments; point reads hit a shared offsets
//! cache so repeat reads fetch single frames instead of whole blocks.
//!
//! ## Usage Example
//!
//! ```ignore
//! use ledger_offload::{Offloader, OffloadConfig};
//! use uuid::Uuid;
//!
//! let offloader = Offloader::new(config, location, registry, ledger_info, metadata);
//!
//! // Bulk: ship a closed ledger.
//! let uuid = Uuid::new_v4();
//! offloader.offload(ledger, uuid, Default::default()).await?;
//!
//! // Read it back by position.
//! let reader = offloader.read_offloaded(ledger_id, uuid).await?;
//! let entry = reader.read_entry(ledger_id, 42).await?;
//! ```
//!
//! ## Design Decisions
//!
//! ### Why One Block per Multipart Part?
//! - **Atomic visibility**: the data object appears only when complete
//! - **Cheap failure**: aborting the upload leaves nothing behind
//! - **Index by construction**: part offsets tile the object exactly
//!
//! ### Why an Index Object Instead of a Footer?
//! - **Write-once data**: the data object never needs rewriting
//! - **Small reads**: opening a reader fetches only the index
//! - **Streaming friendly**: the index is built while parts upload
//!
//! ### Why No Retries in This Layer?
//! - **One resolution**: every operation resolves exactly once
//! - **Caller policy**: retry/backoff belongs to the orchestration above
//! - **Compensation instead**: abort uploads, delete orphans, keep the
//!   original error

pub mod block;
pub mod bulk;
pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod index;
pub mod keys;
pub mod ledger;
pub mod maintenance;
pub mod offloader;
pub mod reader;
pub mod shard;
pub mod store;
pub mod streaming;

pub use cache::OffsetsCache;
pub use config::OffloadConfig;
pub use entry::{Entry, Position};
pub use error::{Error, Result};
pub use index::{BlockDescriptor, IndexBuilder, LedgerMeta, OffloadIndex};
pub use ledger::{LedgerInfoProvider, LedgerSource, MemoryLedger, NoLedgerInfo, StaticLedgerInfo};
pub use maintenance::OffloadedLedgerMetadata;
pub use offloader::Offloader;
pub use reader::OffloadedReader;
pub use shard::ShardedExecutor;
pub use store::{
    BlobStore, ListPage, ObjectDescriptor, ObjectMetadata, ObjectRole, StoreLocation,
    StoreRegistry, UploadId,
};
pub use streaming::{OfferOutcome, OffloadHandle, OffloadResult, SegmentState};
