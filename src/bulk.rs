//! Bulk Offload Path
//!
//! Moves a closed ledger to object storage as one multipart data object plus
//! a V1 index. Entries are folded into blocks under the sizing rule, each
//! block uploaded as the next part; the index is written only after the data
//! object commits, so a reader never observes an index without its data.
//!
//! Failure handling is compensation without retry: a part failure aborts the
//! multipart upload (no object becomes visible), and an index failure after
//! the data object committed deletes the orphaned data object best-effort.
//! The original error is always the one returned.

use crate::block::{admits_entry, encode_block, BLOCK_VERSION};
use crate::config::OffloadConfig;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::index::{IndexBuilder, LedgerMeta};
use crate::keys;
use crate::ledger::LedgerSource;
use crate::store::{BlobStore, ObjectMetadata, ObjectRole, UploadId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Entries fetched from the ledger source per read.
const READ_BATCH: u64 = 128;

/// Offload a closed ledger under the given uuid.
///
/// Preconditions are checked before any I/O: the ledger must be closed and
/// hold at least one confirmed entry.
pub async fn offload_ledger(
    store: &Arc<dyn BlobStore>,
    ledger: &dyn LedgerSource,
    uuid: Uuid,
    config: &OffloadConfig,
    user_metadata: &HashMap<String, String>,
) -> Result<()> {
    let ledger_id = ledger.id();
    if !ledger.is_closed() {
        return Err(Error::Precondition(format!(
            "ledger {} is not closed",
            ledger_id
        )));
    }
    let last_entry = ledger.last_confirmed_entry().ok_or_else(|| {
        Error::Precondition(format!("ledger {} has no confirmed entries", ledger_id))
    })?;

    let data_key = keys::data_key(ledger_id, uuid);
    let index_key = keys::index_key(&data_key);
    let metadata = ObjectMetadata::new(ObjectRole::Data, BLOCK_VERSION).with_user(user_metadata.clone());

    let upload = store.create_multipart(&data_key, &metadata).await?;
    let mut builder = IndexBuilder::new();
    match upload_blocks(store, ledger, last_entry, config, &data_key, &upload, &mut builder).await
    {
        Ok(()) => {}
        Err(error) => {
            abort_best_effort(store, &data_key, &upload).await;
            return Err(error);
        }
    }
    if let Err(error) = store.complete_multipart(&data_key, &upload).await {
        abort_best_effort(store, &data_key, &upload).await;
        return Err(error);
    }

    // The data object is committed; from here failures orphan it, so we
    // delete it best-effort and surface the original error.
    builder.add_ledger_meta(LedgerMeta {
        ledger_id,
        entry_count: last_entry + 1,
        size_bytes: ledger.length(),
    });
    let block_count = builder.block_count();
    let result = async {
        let index = builder.build_single()?;
        let index_metadata =
            ObjectMetadata::new(ObjectRole::Index, index.version).with_user(user_metadata.clone());
        store.put(&index_key, index.to_bytes(), &index_metadata).await
    }
    .await;

    if let Err(error) = result {
        warn!(
            ledger_id,
            key = %data_key,
            %error,
            "index write failed, deleting orphaned data object"
        );
        if let Err(delete_error) = store.delete(&data_key).await {
            warn!(key = %data_key, error = %delete_error, "failed to delete orphaned data object");
        }
        return Err(Error::Finalize {
            key: index_key,
            reason: error.to_string(),
        });
    }

    info!(ledger_id, key = %data_key, blocks = block_count, "ledger offloaded");
    Ok(())
}

async fn upload_blocks(
    store: &Arc<dyn BlobStore>,
    ledger: &dyn LedgerSource,
    last_entry: u64,
    config: &OffloadConfig,
    data_key: &str,
    upload: &UploadId,
    builder: &mut IndexBuilder,
) -> Result<()> {
    let ledger_id = ledger.id();
    let mut pending: VecDeque<Entry> = VecDeque::new();
    let mut next_entry = 0u64;
    let mut part_id = 1u32;

    loop {
        // Assemble one block under the sizing rule.
        let mut block_entries = Vec::new();
        let mut accumulated = 0u64;
        loop {
            if pending.is_empty() && next_entry <= last_entry {
                let batch_last = (next_entry + READ_BATCH - 1).min(last_entry);
                pending.extend(ledger.read_entries(next_entry, batch_last).await?);
                next_entry = batch_last + 1;
            }
            let Some(entry) = pending.front() else {
                break;
            };
            if !admits_entry(accumulated, block_entries.len(), config.max_block_size) {
                break;
            }
            accumulated += entry.len() as u64;
            block_entries.push(pending.pop_front().expect("front checked above"));
        }
        if block_entries.is_empty() {
            break;
        }

        let first_entry_id = block_entries[0].entry_id;
        let block = encode_block(&block_entries)?;
        let length = block.len() as u64;
        store.upload_part(data_key, upload, part_id, block).await?;
        builder.add_block(ledger_id, first_entry_id, part_id, length)?;
        debug!(
            ledger_id,
            part_id,
            first_entry_id,
            bytes = length,
            entries = block_entries.len(),
            "uploaded block"
        );
        part_id += 1;
    }

    Ok(())
}

async fn abort_best_effort(store: &Arc<dyn BlobStore>, key: &str, upload: &UploadId) {
    if let Err(error) = store.abort_multipart(key, upload).await {
        warn!(key, %error, "failed to abort multipart upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::store::memory::InMemoryBlobStore;
    use bytes::Bytes;

    fn small_block_config() -> OffloadConfig {
        OffloadConfig {
            max_block_size: 15,
            ..Default::default()
        }
    }

    fn store() -> Arc<dyn BlobStore> {
        Arc::new(InMemoryBlobStore::new())
    }

    #[tokio::test]
    async fn test_rejects_open_ledger_without_io() {
        let store = store();
        let ledger = MemoryLedger::open(1, vec![Bytes::from_static(b"x")]);
        let err = offload_ledger(&store, &ledger, Uuid::new_v4(), &OffloadConfig::default(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));

        let page = store.list_page(None, None, 10).await.unwrap();
        assert!(page.objects.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_ledger() {
        let store = store();
        let ledger = MemoryLedger::closed(1, vec![]);
        let err = offload_ledger(&store, &ledger, Uuid::new_v4(), &OffloadConfig::default(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[tokio::test]
    async fn test_blocks_follow_sizing_rule() {
        // Three 10-byte entries against a 15-byte budget: two blocks, 2 + 1.
        let store = store();
        let ledger = MemoryLedger::closed(9, vec![Bytes::from(vec![1u8; 10]); 3]);
        let uuid = Uuid::new_v4();
        offload_ledger(&store, &ledger, uuid, &small_block_config(), &HashMap::new())
            .await
            .unwrap();

        let data_key = keys::data_key(9, uuid);
        let index_bytes = store.get(&keys::index_key(&data_key)).await.unwrap();
        let index = crate::index::OffloadIndex::from_bytes(&index_bytes).unwrap();

        assert_eq!(index.blocks.len(), 2);
        assert_eq!(index.blocks[0].first_entry_id, 0);
        assert_eq!(index.blocks[1].first_entry_id, 2);
        assert_eq!(
            index.data_object_length,
            store.head(&data_key).await.unwrap().size
        );
        assert_eq!(index.ledger_meta(9).unwrap().entry_count, 3);
    }

    #[tokio::test]
    async fn test_part_failure_aborts_upload() {
        let memory = Arc::new(InMemoryBlobStore::new());
        memory.fail_next_part_uploads(1);
        let store: Arc<dyn BlobStore> = memory.clone();

        let ledger = MemoryLedger::closed(2, vec![Bytes::from_static(b"payload")]);
        let err = offload_ledger(&store, &ledger, Uuid::new_v4(), &OffloadConfig::default(), &HashMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upload { .. }));
        assert_eq!(memory.object_count(), 0);
        assert_eq!(memory.pending_upload_count(), 0);
    }

    #[tokio::test]
    async fn test_metadata_attached_to_objects() {
        let store = store();
        let ledger = MemoryLedger::closed(4, vec![Bytes::from_static(b"data")]);
        let uuid = Uuid::new_v4();
        let mut user = HashMap::new();
        user.insert("managed-ledger".to_string(), "tenant/ns/topic".to_string());

        offload_ledger(&store, &ledger, uuid, &OffloadConfig::default(), &user)
            .await
            .unwrap();

        let data_key = keys::data_key(4, uuid);
        let head = store.head(&data_key).await.unwrap();
        assert_eq!(head.user_metadata["managed-ledger"], "tenant/ns/topic");
        let head = store.head(&keys::index_key(&data_key)).await.unwrap();
        assert_eq!(head.user_metadata["managed-ledger"], "tenant/ns/topic");
    }
}
