//! Maintenance: Deletion and Bucket Scans
//!
//! Deletes are idempotent: removing a ledger or segment that was already
//! deleted (or never offloaded) succeeds, so callers can retry deletes
//! freely. Scans page through the store with a marker cursor and hand each
//! object to a consumer that can stop early or cancel.

use crate::error::{Error, Result};
use crate::keys;
use crate::store::BlobStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// What a scan reports for one stored object.
#[derive(Debug, Clone)]
pub struct OffloadedLedgerMetadata {
    /// Object key.
    pub name: String,
    /// Ledger id parsed from the key; `None` for streaming segments.
    pub ledger_id: Option<u64>,
    /// Offload uuid parsed from the key.
    pub uuid: Option<String>,
    /// Whether this is an index object rather than a data object.
    pub is_index: bool,
    pub size: u64,
    pub last_modified_ms: i64,
    /// Full object uri, e.g. `s3://bucket/key`.
    pub uri: String,
    pub user_metadata: HashMap<String, String>,
}

/// Delete a bulk-offloaded ledger's data and index objects.
pub async fn delete_offloaded(
    store: &Arc<dyn BlobStore>,
    ledger_id: u64,
    uuid: Uuid,
) -> Result<()> {
    let data_key = keys::data_key(ledger_id, uuid);
    delete_pair(store, &data_key).await?;
    info!(ledger_id, key = %data_key, "offloaded ledger deleted");
    Ok(())
}

/// Delete a streaming segment's data and index objects.
pub async fn delete_offloaded_segment(store: &Arc<dyn BlobStore>, uuid: Uuid) -> Result<()> {
    let data_key = keys::segment_data_key(uuid);
    delete_pair(store, &data_key).await?;
    info!(key = %data_key, "offloaded segment deleted");
    Ok(())
}

async fn delete_pair(store: &Arc<dyn BlobStore>, data_key: &str) -> Result<()> {
    delete_idempotent(store, data_key).await?;
    delete_idempotent(store, &keys::index_key(data_key)).await
}

async fn delete_idempotent(store: &Arc<dyn BlobStore>, key: &str) -> Result<()> {
    match store.delete(key).await {
        Ok(()) => Ok(()),
        // Already gone counts as deleted.
        Err(Error::ObjectNotFound(_)) => Ok(()),
        Err(error) => Err(Error::Deletion {
            key: key.to_string(),
            reason: error.to_string(),
        }),
    }
}

/// Page through the store and hand every object to `consumer`.
///
/// The consumer returns `Ok(true)` to continue, `Ok(false)` to stop early.
/// A consumer error aborts the scan: [`Error::Cancelled`] is surfaced
/// unchanged, anything else as [`Error::Scan`].
pub async fn scan_ledgers<F>(
    store: &Arc<dyn BlobStore>,
    uri_prefix: &str,
    page_size: usize,
    mut consumer: F,
) -> Result<()>
where
    F: FnMut(OffloadedLedgerMetadata) -> Result<bool>,
{
    let mut marker: Option<String> = None;
    loop {
        let page = store
            .list_page(None, marker.as_deref(), page_size)
            .await
            .map_err(|e| match e {
                Error::Scan(_) => e,
                other => Error::Scan(other.to_string()),
            })?;
        debug!(objects = page.objects.len(), "scan page");

        for object in page.objects {
            let metadata = OffloadedLedgerMetadata {
                ledger_id: keys::parse_ledger_id(&object.key),
                uuid: keys::parse_uuid(&object.key),
                is_index: keys::is_index_key(&object.key),
                uri: format!("{}/{}", uri_prefix.trim_end_matches('/'), object.key),
                name: object.key,
                size: object.size,
                last_modified_ms: object.last_modified_ms,
                user_metadata: object.user_metadata,
            };
            match consumer(metadata) {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => return Err(Error::Scan(error.to_string())),
            }
        }

        match page.next_marker {
            Some(next) => marker = Some(next),
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryBlobStore;
    use crate::store::{ObjectMetadata, ObjectRole};
    use bytes::Bytes;

    async fn seeded_store(keys: &[&str]) -> Arc<dyn BlobStore> {
        let store = InMemoryBlobStore::new();
        let meta = ObjectMetadata::new(ObjectRole::Data, 1);
        for key in keys {
            store.put(key, Bytes::from_static(b"x"), &meta).await.unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let uuid = Uuid::new_v4();
        let data_key = keys::data_key(5, uuid);
        let store = seeded_store(&[data_key.as_str(), keys::index_key(&data_key).as_str()]).await;

        delete_offloaded(&store, 5, uuid).await.unwrap();
        assert!(matches!(store.get(&data_key).await, Err(Error::ObjectNotFound(_))));

        // Second delete of the same ledger succeeds.
        delete_offloaded(&store, 5, uuid).await.unwrap();
        // So does deleting something never offloaded.
        delete_offloaded_segment(&store, Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_visits_every_object_across_pages() {
        let uuid = Uuid::new_v4();
        let data_key = keys::data_key(7, uuid);
        let index_key = keys::index_key(&data_key);
        let segment_key = keys::segment_data_key(Uuid::new_v4());
        let store = seeded_store(&[data_key.as_str(), index_key.as_str(), segment_key.as_str()]).await;

        let mut seen = Vec::new();
        scan_ledgers(&store, "s3://bucket", 2, |meta| {
            seen.push(meta);
            Ok(true)
        })
        .await
        .unwrap();

        assert_eq!(seen.len(), 3);
        let data = seen.iter().find(|m| m.name == data_key).unwrap();
        assert_eq!(data.ledger_id, Some(7));
        assert_eq!(data.uuid, Some(uuid.to_string()));
        assert!(!data.is_index);
        assert_eq!(data.uri, format!("s3://bucket/{}", data_key));

        let index = seen.iter().find(|m| m.name == index_key).unwrap();
        assert!(index.is_index);

        let segment = seen.iter().find(|m| m.name == segment_key).unwrap();
        assert_eq!(segment.ledger_id, None);
        assert!(segment.uuid.is_some());
    }

    #[tokio::test]
    async fn test_scan_stops_early() {
        let store = seeded_store(&["a", "b", "c"]).await;
        let mut count = 0;
        scan_ledgers(&store, "s3://bucket", 10, |_| {
            count += 1;
            Ok(count < 2)
        })
        .await
        .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_scan_preserves_cancellation() {
        let store = seeded_store(&["a"]).await;
        let err = scan_ledgers(&store, "s3://bucket", 10, |_| Err(Error::Cancelled))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let err = scan_ledgers(&store, "s3://bucket", 10, |_| {
            Err(Error::Store("consumer broke".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Scan(_)));
    }
}
