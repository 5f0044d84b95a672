//! Offload Engine Facade
//!
//! [`Offloader`] ties the paths together: bulk and streaming offload,
//! read-back, deletion, and scanning against one store location. Work for a
//! given ledger or segment is routed through the [`ShardedExecutor`] so it
//! never interleaves with other work on the same id; readers share one
//! offsets cache sized by the configuration.
//!
//! One offloader drives at most one streaming segment at a time: a second
//! `streaming_offload` while one is active returns
//! [`Error::SegmentActive`] synchronously, without touching the store.

use crate::bulk;
use crate::cache::OffsetsCache;
use crate::config::OffloadConfig;
use crate::error::{Error, Result};
use crate::keys;
use crate::ledger::{LedgerInfoProvider, LedgerSource, NoLedgerInfo};
use crate::maintenance::{self, OffloadedLedgerMetadata};
use crate::reader::OffloadedReader;
use crate::shard::ShardedExecutor;
use crate::store::{BlobStore, StoreLocation, StoreRegistry};
use crate::streaming::{start_segment, OffloadHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

pub struct Offloader {
    config: OffloadConfig,
    location: StoreLocation,
    registry: Arc<StoreRegistry>,
    ledger_info: Arc<dyn LedgerInfoProvider>,
    /// Attached to every object this offloader writes.
    user_metadata: HashMap<String, String>,
    executor: Arc<ShardedExecutor>,
    offsets_cache: OffsetsCache,
    segment_active: Arc<AtomicBool>,
}

impl Offloader {
    pub fn new(
        config: OffloadConfig,
        location: StoreLocation,
        registry: Arc<StoreRegistry>,
        ledger_info: Arc<dyn LedgerInfoProvider>,
        user_metadata: HashMap<String, String>,
    ) -> Self {
        let executor = Arc::new(ShardedExecutor::new(config.worker_count));
        let offsets_cache = OffsetsCache::new(config.offsets_cache_capacity, config.offsets_cache_ttl());
        Self {
            config,
            location,
            registry,
            ledger_info,
            user_metadata,
            executor,
            offsets_cache,
            segment_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Offloader over an in-memory store, for tests and tooling.
    pub fn in_memory(config: OffloadConfig) -> Self {
        Self::new(
            config,
            StoreLocation::memory("offload"),
            Arc::new(StoreRegistry::in_memory()),
            Arc::new(NoLedgerInfo),
            HashMap::new(),
        )
    }

    /// Storage driver name this offloader writes through.
    pub fn driver(&self) -> &str {
        &self.location.driver
    }

    /// Metadata attached to every written object.
    pub fn user_metadata(&self) -> &HashMap<String, String> {
        &self.user_metadata
    }

    /// Base uri of the target location, e.g. `aws-s3://bucket`.
    pub fn uri(&self) -> String {
        format!("{}://{}", self.location.driver, self.location.bucket)
    }

    fn store(&self) -> Result<Arc<dyn BlobStore>> {
        self.registry.get_or_create(&self.location)
    }

    /// Bulk-offload a closed ledger under `uuid`.
    ///
    /// Runs on the worker owning the ledger id; `extra_metadata` is merged
    /// over the engine metadata for this offload only.
    pub async fn offload(
        &self,
        ledger: Arc<dyn LedgerSource>,
        uuid: Uuid,
        extra_metadata: HashMap<String, String>,
    ) -> Result<()> {
        let store = self.store()?;
        let config = self.config.clone();
        let mut user_metadata = self.user_metadata.clone();
        user_metadata.extend(extra_metadata);

        let ledger_id = ledger.id();
        let (tx, rx) = oneshot::channel();
        let queued = self.executor.spawn_on(ledger_id, async move {
            let result =
                bulk::offload_ledger(&store, ledger.as_ref(), uuid, &config, &user_metadata).await;
            let _ = tx.send(result);
        });
        if !queued {
            return Err(Error::Store("offloader is closed".to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err(Error::Store("offload task dropped".to_string())))
    }

    /// Open a streaming segment under `uuid`.
    ///
    /// At most one segment is active per offloader; the returned handle's
    /// result resolves when the segment completes or fails.
    pub async fn streaming_offload(&self, uuid: Uuid) -> Result<OffloadHandle> {
        if self
            .segment_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::SegmentActive);
        }

        let result = async {
            let store = self.store()?;
            start_segment(
                store,
                self.ledger_info.clone(),
                uuid,
                self.config.clone(),
                self.user_metadata.clone(),
            )
            .await
        }
        .await;

        let (handle, mut drain) = match result {
            Ok(pair) => pair,
            Err(error) => {
                self.segment_active.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };
        drain.clear_on_resolve(self.segment_active.clone());

        let queued = self.executor.spawn_on(segment_key(uuid), drain.run());
        if !queued {
            self.segment_active.store(false, Ordering::SeqCst);
            return Err(Error::Store("offloader is closed".to_string()));
        }
        Ok(handle)
    }

    /// Open a reader over one bulk-offloaded ledger.
    pub async fn read_offloaded(&self, ledger_id: u64, uuid: Uuid) -> Result<OffloadedReader> {
        let store = self.store()?;
        OffloadedReader::open(
            store,
            [keys::data_key(ledger_id, uuid)],
            self.offsets_cache.clone(),
        )
        .await
    }

    /// Open a reader spanning one or more streaming segments.
    pub async fn read_offloaded_segments(
        &self,
        uuids: impl IntoIterator<Item = Uuid>,
    ) -> Result<OffloadedReader> {
        let store = self.store()?;
        OffloadedReader::open(
            store,
            uuids.into_iter().map(keys::segment_data_key),
            self.offsets_cache.clone(),
        )
        .await
    }

    /// Delete a bulk-offloaded ledger. Idempotent.
    pub async fn delete_offloaded(&self, ledger_id: u64, uuid: Uuid) -> Result<()> {
        let store = self.store()?;
        let (tx, rx) = oneshot::channel();
        let queued = self.executor.spawn_on(ledger_id, async move {
            let _ = tx.send(maintenance::delete_offloaded(&store, ledger_id, uuid).await);
        });
        if !queued {
            return Err(Error::Store("offloader is closed".to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err(Error::Store("delete task dropped".to_string())))
    }

    /// Delete a streaming segment. Idempotent.
    pub async fn delete_offloaded_segment(&self, uuid: Uuid) -> Result<()> {
        let store = self.store()?;
        let (tx, rx) = oneshot::channel();
        let queued = self.executor.spawn_on(segment_key(uuid), async move {
            let _ = tx.send(maintenance::delete_offloaded_segment(&store, uuid).await);
        });
        if !queued {
            return Err(Error::Store("offloader is closed".to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err(Error::Store("delete task dropped".to_string())))
    }

    /// Scan every object at the target location.
    pub async fn scan_ledgers<F>(&self, consumer: F) -> Result<()>
    where
        F: FnMut(OffloadedLedgerMetadata) -> Result<bool>,
    {
        let store = self.store()?;
        maintenance::scan_ledgers(&store, &self.uri(), self.config.scan_page_size, consumer).await
    }

    /// Drain queued work and stop the workers.
    pub async fn close(&self) {
        self.executor.shutdown().await;
    }
}

/// Routing key for a segment's worker affinity.
fn segment_key(uuid: Uuid) -> u64 {
    let bits = uuid.as_u128();
    (bits as u64) ^ ((bits >> 64) as u64)
}
