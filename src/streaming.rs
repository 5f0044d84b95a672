//! Streaming Offload Path
//!
//! Offloads a live segment while producers are still appending. Producers
//! push entries through [`OffloadHandle::offer_entry`]; a drain task owned by
//! the segment's worker folds buffered entries into blocks and uploads them
//! as multipart parts; closing the segment finalizes the upload, writes a V2
//! index, and resolves the handle's result exactly once.
//!
//! ## State machine
//!
//! ```text
//! Open --close()--> Closed --finalize--> Complete
//!                      \--upload/index failure--> Failed
//! ```
//!
//! `close` returns `true` for exactly one caller: the one that performed the
//! Open -> Closed transition. Size-triggered closes go through the same
//! transition, gated on the minimum open duration; a timer forces the close
//! at the maximum open duration regardless of volume.
//!
//! ## Buffering
//!
//! The buffer is bounded by `max_buffer_len` in payload bytes. The bound is
//! checked before admission, so the buffer can exceed it by at most one
//! entry; producers seeing [`OfferOutcome::BufferFull`] retry after the
//! drain catches up. The drain loop waits on a notification with a bounded
//! poll interval, so it never spins and always observes shutdown.

use crate::block::{admits_entry, encode_block, BLOCK_VERSION};
use crate::config::OffloadConfig;
use crate::entry::{Entry, Position};
use crate::error::{Error, Result};
use crate::index::{IndexBuilder, LedgerMeta};
use crate::keys;
use crate::ledger::LedgerInfoProvider;
use crate::store::{BlobStore, ObjectMetadata, ObjectRole, UploadId};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{oneshot, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Accepting entries.
    Open,
    /// Close transition happened; the drain is flushing remaining entries.
    Closed,
    /// Data and index committed, result resolved.
    Complete,
    /// Upload or finalize failed, result resolved with the error.
    Failed,
}

/// Outcome of offering one entry to an open segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted,
    /// The segment already closed; the entry was not taken.
    SegmentClosed,
    /// Pending bytes are at the buffer bound; retry after the drain catches up.
    BufferFull,
}

/// Resolved once per segment: the inclusive position range it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadResult {
    pub begin: Position,
    pub end: Position,
}

struct SegmentInner {
    state: SegmentState,
    buffer: VecDeque<Entry>,
    first_offered: Option<Position>,
    last_offered: Option<Position>,
    /// Segment end, fixed at the close transition.
    end: Option<Position>,
}

pub(crate) struct SegmentShared {
    inner: Mutex<SegmentInner>,
    /// Pending (buffered, undrained) payload bytes.
    buffer_len: AtomicU64,
    /// Cumulative payload bytes accepted over the segment's lifetime.
    segment_len: AtomicU64,
    notify: Notify,
    opened_at: Instant,
    config: OffloadConfig,
}

impl SegmentShared {
    fn new(config: OffloadConfig) -> Self {
        Self {
            inner: Mutex::new(SegmentInner {
                state: SegmentState::Open,
                buffer: VecDeque::new(),
                first_offered: None,
                last_offered: None,
                end: None,
            }),
            buffer_len: AtomicU64::new(0),
            segment_len: AtomicU64::new(0),
            notify: Notify::new(),
            opened_at: Instant::now(),
            config,
        }
    }

    fn offer_entry(&self, entry: Entry) -> OfferOutcome {
        let mut inner = self.inner.lock().expect("segment lock poisoned");
        if inner.state != SegmentState::Open {
            return OfferOutcome::SegmentClosed;
        }
        if self.buffer_len.load(Ordering::Acquire) >= self.config.max_buffer_len() {
            return OfferOutcome::BufferFull;
        }

        let position = entry.position();
        let len = entry.len() as u64;
        inner.buffer.push_back(entry);
        if inner.first_offered.is_none() {
            inner.first_offered = Some(position);
        }
        inner.last_offered = Some(position);
        self.buffer_len.fetch_add(len, Ordering::AcqRel);
        let segment_len = self.segment_len.fetch_add(len, Ordering::AcqRel) + len;

        if segment_len >= self.config.max_segment_size
            && self.opened_at.elapsed() >= self.config.min_segment_open()
        {
            Self::close_locked(&mut inner);
        }
        drop(inner);
        self.notify.notify_one();
        OfferOutcome::Accepted
    }

    fn close(&self) -> bool {
        let mut inner = self.inner.lock().expect("segment lock poisoned");
        let closed = Self::close_locked(&mut inner);
        drop(inner);
        if closed {
            self.notify.notify_one();
        }
        closed
    }

    fn close_locked(inner: &mut SegmentInner) -> bool {
        if inner.state != SegmentState::Open {
            return false;
        }
        inner.state = SegmentState::Closed;
        inner.end = inner.last_offered;
        true
    }

    fn state(&self) -> SegmentState {
        self.inner.lock().expect("segment lock poisoned").state
    }

    fn last_offered(&self) -> Option<Position> {
        self.inner.lock().expect("segment lock poisoned").last_offered
    }

    fn set_state(&self, state: SegmentState) {
        self.inner.lock().expect("segment lock poisoned").state = state;
    }

    /// Pop one block's worth of same-ledger entries under the sizing rule.
    fn pop_block(&self) -> Vec<Entry> {
        let mut inner = self.inner.lock().expect("segment lock poisoned");
        let mut block: Vec<Entry> = Vec::new();
        let mut accumulated = 0u64;
        while let Some(front) = inner.buffer.front() {
            if block.first().is_some_and(|first| first.ledger_id != front.ledger_id) {
                break;
            }
            if !admits_entry(accumulated, block.len(), self.config.streaming_block_size) {
                break;
            }
            let entry = inner.buffer.pop_front().expect("front checked above");
            accumulated += entry.len() as u64;
            block.push(entry);
        }
        self.buffer_len.fetch_sub(accumulated, Ordering::AcqRel);
        block
    }
}

/// Handle returned to the producer side of a streaming segment.
pub struct OffloadHandle {
    shared: Arc<SegmentShared>,
    result: oneshot::Receiver<Result<OffloadResult>>,
}

impl std::fmt::Debug for OffloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadHandle").finish_non_exhaustive()
    }
}

impl OffloadHandle {
    /// Offer one entry. Entries must arrive in source order.
    pub fn offer_entry(&self, entry: Entry) -> OfferOutcome {
        self.shared.offer_entry(entry)
    }

    /// Request the close transition. `true` for exactly one caller.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    pub fn state(&self) -> SegmentState {
        self.shared.state()
    }

    /// Position of the most recently accepted entry.
    pub fn last_offered(&self) -> Option<Position> {
        self.shared.last_offered()
    }

    /// Wait for the segment's final result. Resolves exactly once.
    pub async fn result(self) -> Result<OffloadResult> {
        self.result
            .await
            .unwrap_or_else(|_| Err(Error::Store("segment drain task dropped".to_string())))
    }
}

/// Drain task state; runs on the segment's worker until the result resolves.
pub struct SegmentDrain {
    shared: Arc<SegmentShared>,
    store: Arc<dyn BlobStore>,
    ledger_info: Arc<dyn LedgerInfoProvider>,
    data_key: String,
    index_key: String,
    upload: UploadId,
    user_metadata: HashMap<String, String>,
    result_tx: oneshot::Sender<Result<OffloadResult>>,
    active_flag: Option<Arc<AtomicBool>>,
}

/// Open a streaming segment: create the multipart upload, hand back the
/// producer handle and the drain task for the caller to place on a worker.
///
/// A timer forces the close transition at `max_segment_open`.
pub async fn start_segment(
    store: Arc<dyn BlobStore>,
    ledger_info: Arc<dyn LedgerInfoProvider>,
    uuid: Uuid,
    config: OffloadConfig,
    user_metadata: HashMap<String, String>,
) -> Result<(OffloadHandle, SegmentDrain)> {
    let data_key = keys::segment_data_key(uuid);
    let index_key = keys::index_key(&data_key);
    let metadata =
        ObjectMetadata::new(ObjectRole::Data, BLOCK_VERSION).with_user(user_metadata.clone());
    let upload = store.create_multipart(&data_key, &metadata).await?;

    let max_open = config.max_segment_open();
    let shared = Arc::new(SegmentShared::new(config));
    let (result_tx, result_rx) = oneshot::channel();

    let timer_shared = Arc::downgrade(&shared);
    tokio::spawn(async move {
        tokio::time::sleep(max_open).await;
        if let Some(shared) = timer_shared.upgrade() {
            if shared.close() {
                info!("segment reached max open duration, closing");
            }
        }
    });

    info!(key = %data_key, "streaming segment opened");
    Ok((
        OffloadHandle {
            shared: shared.clone(),
            result: result_rx,
        },
        SegmentDrain {
            shared,
            store,
            ledger_info,
            data_key,
            index_key,
            upload,
            user_metadata,
            result_tx,
            active_flag: None,
        },
    ))
}

enum Step {
    Wait,
    Upload,
    Finalize,
}

/// Per-ledger fallback metadata accumulated from drained blocks, used when
/// the info provider has no snapshot for a still-open ledger.
#[derive(Default)]
struct LedgerTally {
    last_entry: u64,
    bytes: u64,
}

impl SegmentDrain {
    /// Register a flag cleared when the segment's result resolves.
    ///
    /// Cleared before the result is sent, so a caller that saw the result
    /// can immediately open a new segment.
    pub fn clear_on_resolve(&mut self, flag: Arc<AtomicBool>) {
        self.active_flag = Some(flag);
    }

    pub async fn run(self) {
        let mut builder = IndexBuilder::new();
        let mut part_id = 1u32;
        let mut ledger_order: Vec<u64> = Vec::new();
        let mut tallies: HashMap<u64, LedgerTally> = HashMap::new();

        loop {
            let step = {
                let inner = self.shared.inner.lock().expect("segment lock poisoned");
                let closed = inner.state == SegmentState::Closed;
                if closed && inner.buffer.is_empty() {
                    Step::Finalize
                } else if (closed && !inner.buffer.is_empty())
                    || self.shared.buffer_len.load(Ordering::Acquire)
                        >= self.shared.config.streaming_block_size as u64
                {
                    Step::Upload
                } else {
                    Step::Wait
                }
            };

            match step {
                Step::Wait => {
                    let _ = timeout(
                        self.shared.config.drain_poll(),
                        self.shared.notify.notified(),
                    )
                    .await;
                }
                Step::Upload => {
                    let entries = self.shared.pop_block();
                    if entries.is_empty() {
                        continue;
                    }
                    let ledger_id = entries[0].ledger_id;
                    let first_entry_id = entries[0].entry_id;
                    let last_entry_id = entries.last().expect("non-empty block").entry_id;
                    let payload_bytes: u64 = entries.iter().map(|e| e.len() as u64).sum();

                    let outcome = async {
                        let block = encode_block(&entries)?;
                        let length = block.len() as u64;
                        self.store
                            .upload_part(&self.data_key, &self.upload, part_id, block)
                            .await?;
                        builder.add_block(ledger_id, first_entry_id, part_id, length)?;
                        Ok::<u64, Error>(length)
                    }
                    .await;

                    match outcome {
                        Ok(length) => {
                            debug!(
                                key = %self.data_key,
                                part_id,
                                ledger_id,
                                first_entry_id,
                                bytes = length,
                                "uploaded streaming block"
                            );
                            if !tallies.contains_key(&ledger_id) {
                                ledger_order.push(ledger_id);
                            }
                            let tally = tallies.entry(ledger_id).or_default();
                            tally.last_entry = last_entry_id;
                            tally.bytes += payload_bytes;
                            part_id += 1;
                        }
                        Err(error) => {
                            self.fail(error).await;
                            return;
                        }
                    }
                }
                Step::Finalize => {
                    self.finalize(builder, ledger_order, tallies).await;
                    return;
                }
            }
        }
    }

    async fn finalize(
        self,
        mut builder: IndexBuilder,
        ledger_order: Vec<u64>,
        tallies: HashMap<u64, LedgerTally>,
    ) {
        if builder.block_count() == 0 {
            self.fail(Error::Precondition(
                "segment closed with no entries".to_string(),
            ))
            .await;
            return;
        }

        if let Err(error) = self.store.complete_multipart(&self.data_key, &self.upload).await {
            self.fail(error).await;
            return;
        }

        for ledger_id in &ledger_order {
            let tally = &tallies[ledger_id];
            let meta = self
                .ledger_info
                .ledger_info(*ledger_id)
                .unwrap_or_else(|| LedgerMeta {
                    ledger_id: *ledger_id,
                    entry_count: tally.last_entry + 1,
                    size_bytes: tally.bytes,
                });
            builder.add_ledger_meta(meta);
        }

        let result = async {
            let index = builder.build_multi()?;
            let metadata = ObjectMetadata::new(ObjectRole::Index, index.version)
                .with_user(self.user_metadata.clone());
            self.store
                .put(&self.index_key, index.to_bytes(), &metadata)
                .await
        }
        .await;

        if let Err(error) = result {
            // The data object is committed; delete it rather than leave an
            // orphan no index points at.
            warn!(key = %self.data_key, %error, "segment index write failed, deleting data object");
            if let Err(delete_error) = self.store.delete(&self.data_key).await {
                warn!(key = %self.data_key, error = %delete_error, "failed to delete orphaned segment data");
            }
            let key = self.index_key.clone();
            self.resolve(
                Err(Error::Finalize {
                    key,
                    reason: error.to_string(),
                }),
                SegmentState::Failed,
            );
            return;
        }

        let (begin, end) = {
            let inner = self.shared.inner.lock().expect("segment lock poisoned");
            (inner.first_offered, inner.end)
        };
        match (begin, end) {
            (Some(begin), Some(end)) => {
                info!(key = %self.data_key, %begin, %end, "streaming segment complete");
                self.resolve(Ok(OffloadResult { begin, end }), SegmentState::Complete);
            }
            // Unreachable once block_count > 0; kept as a hard failure
            // rather than a panic in a background task.
            _ => {
                self.resolve(
                    Err(Error::Store("segment has blocks but no positions".to_string())),
                    SegmentState::Failed,
                );
            }
        }
    }

    async fn fail(self, error: Error) {
        warn!(key = %self.data_key, %error, "streaming segment failed");
        if let Err(abort_error) = self.store.abort_multipart(&self.data_key, &self.upload).await {
            warn!(key = %self.data_key, error = %abort_error, "failed to abort segment upload");
        }
        self.resolve(Err(error), SegmentState::Failed);
    }

    fn resolve(self, result: Result<OffloadResult>, state: SegmentState) {
        self.shared.set_state(state);
        if let Some(flag) = &self.active_flag {
            flag.store(false, Ordering::SeqCst);
        }
        let _ = self.result_tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn shared(config: OffloadConfig) -> SegmentShared {
        SegmentShared::new(config)
    }

    fn entry(ledger: u64, id: u64, len: usize) -> Entry {
        Entry::new(ledger, id, Bytes::from(vec![0u8; len]))
    }

    #[test]
    fn test_buffer_bound_checked_before_admission() {
        // Bound of 40 bytes with 20-byte entries: two admitted, the third
        // rejected because the check precedes the append.
        let shared = shared(OffloadConfig {
            write_buffer_size: 40,
            streaming_block_size: 40,
            ..Default::default()
        });

        assert_eq!(shared.offer_entry(entry(1, 0, 20)), OfferOutcome::Accepted);
        assert_eq!(shared.offer_entry(entry(1, 1, 20)), OfferOutcome::Accepted);
        assert_eq!(shared.offer_entry(entry(1, 2, 20)), OfferOutcome::BufferFull);
        assert_eq!(shared.last_offered(), Some(Position::new(1, 1)));
    }

    #[test]
    fn test_close_returns_true_exactly_once() {
        let shared = shared(OffloadConfig::default());
        shared.offer_entry(entry(1, 0, 10));

        assert!(shared.close());
        assert!(!shared.close());
        assert_eq!(shared.state(), SegmentState::Closed);
        assert_eq!(shared.offer_entry(entry(1, 1, 10)), OfferOutcome::SegmentClosed);
    }

    #[test]
    fn test_size_close_gated_on_min_open_duration() {
        let shared = shared(OffloadConfig {
            max_segment_size: 10,
            min_segment_open_ms: 60_000,
            ..Default::default()
        });
        // Over the size threshold, but the segment just opened.
        assert_eq!(shared.offer_entry(entry(1, 0, 50)), OfferOutcome::Accepted);
        assert_eq!(shared.state(), SegmentState::Open);

        let shared = self::shared(OffloadConfig {
            max_segment_size: 10,
            min_segment_open_ms: 0,
            ..Default::default()
        });
        assert_eq!(shared.offer_entry(entry(1, 0, 50)), OfferOutcome::Accepted);
        assert_eq!(shared.state(), SegmentState::Closed);
    }

    #[test]
    fn test_pop_block_splits_at_ledger_boundary() {
        let shared = shared(OffloadConfig {
            streaming_block_size: 1024,
            ..Default::default()
        });
        shared.offer_entry(entry(1, 0, 10));
        shared.offer_entry(entry(1, 1, 10));
        shared.offer_entry(entry(2, 0, 10));

        let block = shared.pop_block();
        assert_eq!(block.len(), 2);
        assert!(block.iter().all(|e| e.ledger_id == 1));

        let block = shared.pop_block();
        assert_eq!(block.len(), 1);
        assert_eq!(block[0].ledger_id, 2);
        assert_eq!(shared.buffer_len.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_pop_block_respects_sizing_rule() {
        let shared = shared(OffloadConfig {
            streaming_block_size: 15,
            write_buffer_size: 1024,
            ..Default::default()
        });
        for id in 0..3 {
            assert_eq!(shared.offer_entry(entry(1, id, 10)), OfferOutcome::Accepted);
        }

        assert_eq!(shared.pop_block().len(), 2);
        assert_eq!(shared.pop_block().len(), 1);
    }
}
