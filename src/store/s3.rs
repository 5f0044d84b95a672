//! `object_store` adapter.
//!
//! Bridges the [`BlobStore`] contract onto any `object_store` backend
//! (S3-compatible services, local filesystem). Multipart parts map onto the
//! backend's streaming upload writer: parts arrive in order starting at 1,
//! so writing them sequentially preserves the byte layout the index
//! descriptors tile.
//!
//! The backend does not expose per-object user metadata, so `head` and
//! listing return empty metadata maps here; the in-memory store round-trips
//! them in full.

use super::{BlobStore, ListPage, ObjectDescriptor, ObjectMetadata, UploadId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{MultipartId, ObjectStore};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

struct PendingUpload {
    multipart_id: MultipartId,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    next_part: u32,
}

pub struct ObjectStoreBlobStore {
    store: Arc<dyn ObjectStore>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
}

impl ObjectStoreBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            uploads: Mutex::new(HashMap::new()),
        }
    }
}

fn map_err(key: &str, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::ObjectNotFound(key.to_string()),
        other => Error::ObjectStore(other),
    }
}

fn descriptor(meta: object_store::ObjectMeta) -> ObjectDescriptor {
    ObjectDescriptor {
        key: meta.location.to_string(),
        size: meta.size as u64,
        last_modified_ms: meta.last_modified.timestamp_millis(),
        user_metadata: HashMap::new(),
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn put(&self, key: &str, data: Bytes, _metadata: &ObjectMetadata) -> Result<()> {
        self.store
            .put(&Path::from(key), data)
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .map_err(|e| map_err(key, e))?;
        result.bytes().await.map_err(|e| map_err(key, e))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        self.store
            .get_range(&Path::from(key), range.start as usize..range.end as usize)
            .await
            .map_err(|e| map_err(key, e))
    }

    async fn head(&self, key: &str) -> Result<ObjectDescriptor> {
        let meta = self
            .store
            .head(&Path::from(key))
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(descriptor(meta))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(&Path::from(key))
            .await
            .map_err(|e| map_err(key, e))
    }

    async fn create_multipart(&self, key: &str, _metadata: &ObjectMetadata) -> Result<UploadId> {
        let (multipart_id, writer) = self
            .store
            .put_multipart(&Path::from(key))
            .await
            .map_err(|e| map_err(key, e))?;
        let id = multipart_id.clone();
        self.uploads.lock().await.insert(
            id.clone(),
            PendingUpload {
                multipart_id,
                writer,
                next_part: 1,
            },
        );
        Ok(UploadId(id))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> Result<()> {
        let mut uploads = self.uploads.lock().await;
        let pending = uploads
            .get_mut(&upload.0)
            .ok_or_else(|| Error::Store(format!("unknown upload {}", upload.0)))?;
        // Parts become ordered writes on the streaming writer, so out-of-order
        // arrival would silently reshuffle bytes. Refuse it instead.
        if part_number != pending.next_part {
            return Err(Error::Upload {
                key: key.to_string(),
                reason: format!(
                    "part {} out of order, expected {}",
                    part_number, pending.next_part
                ),
            });
        }
        pending.writer.write_all(&data).await.map_err(|e| Error::Upload {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        pending.next_part += 1;
        Ok(())
    }

    async fn complete_multipart(&self, key: &str, upload: &UploadId) -> Result<()> {
        let pending = self
            .uploads
            .lock()
            .await
            .remove(&upload.0)
            .ok_or_else(|| Error::Store(format!("unknown upload {}", upload.0)))?;
        let PendingUpload {
            multipart_id,
            mut writer,
            ..
        } = pending;
        if let Err(error) = writer.shutdown().await {
            // The entry is already out of the map, so a later abort from the
            // caller could no longer reach the backend. Abort here with the
            // retained id before surfacing the failure.
            drop(writer);
            if let Err(abort_error) = self
                .store
                .abort_multipart(&Path::from(key), &multipart_id)
                .await
            {
                warn!(key, error = %abort_error, "failed to abort multipart upload after finalize failure");
            }
            return Err(Error::Finalize {
                key: key.to_string(),
                reason: error.to_string(),
            });
        }
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload: &UploadId) -> Result<()> {
        let pending = self.uploads.lock().await.remove(&upload.0);
        let Some(pending) = pending else {
            // Already completed or aborted; nothing to clean up.
            return Ok(());
        };
        drop(pending.writer);
        if let Err(error) = self
            .store
            .abort_multipart(&Path::from(key), &pending.multipart_id)
            .await
        {
            warn!(key, %error, "failed to abort multipart upload");
            return Err(map_err(key, error));
        }
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: Option<&str>,
        marker: Option<&str>,
        page_size: usize,
    ) -> Result<ListPage> {
        let prefix_path = prefix.map(Path::from);
        let mut stream = match marker {
            Some(marker) => self
                .store
                .list_with_offset(prefix_path.as_ref(), &Path::from(marker)),
            None => self.store.list(prefix_path.as_ref()),
        };

        let mut objects = Vec::with_capacity(page_size);
        while objects.len() < page_size {
            match stream.next().await {
                Some(Ok(meta)) => objects.push(descriptor(meta)),
                Some(Err(error)) => return Err(Error::Scan(error.to_string())),
                None => break,
            }
        }
        // Marker pagination relies on the backend listing in key order,
        // which object stores guarantee.
        let next_marker = if objects.len() == page_size {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_marker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectRole;
    use futures::stream::BoxStream;
    use object_store::local::LocalFileSystem;
    use object_store::{
        GetOptions, GetResult, ListResult, ObjectMeta, PutOptions, PutResult,
    };
    use std::fmt::{Display, Formatter};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    /// Accepts writes but fails the final shutdown, like a backend that
    /// rejects the multipart completion.
    struct FailShutdownWriter;

    impl AsyncWrite for FailShutdownWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "completion rejected",
            )))
        }
    }

    /// Delegates to an inner store but hands out writers that fail on
    /// shutdown, and counts aborts reaching the backend.
    #[derive(Debug)]
    struct FailingFinalizeStore {
        inner: Arc<dyn ObjectStore>,
        aborts: Arc<AtomicUsize>,
    }

    impl Display for FailingFinalizeStore {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "FailingFinalizeStore({})", self.inner)
        }
    }

    #[async_trait]
    impl ObjectStore for FailingFinalizeStore {
        async fn put(&self, location: &Path, bytes: Bytes) -> object_store::Result<PutResult> {
            self.inner.put(location, bytes).await
        }

        async fn put_opts(
            &self,
            location: &Path,
            bytes: Bytes,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, bytes, opts).await
        }

        async fn put_multipart(
            &self,
            location: &Path,
        ) -> object_store::Result<(MultipartId, Box<dyn AsyncWrite + Unpin + Send>)> {
            let (id, _writer) = self.inner.put_multipart(location).await?;
            Ok((id, Box::new(FailShutdownWriter)))
        }

        async fn abort_multipart(
            &self,
            location: &Path,
            multipart_id: &MultipartId,
        ) -> object_store::Result<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            self.inner.abort_multipart(location, multipart_id).await
        }

        async fn get(&self, location: &Path) -> object_store::Result<GetResult> {
            self.inner.get(location).await
        }

        async fn get_opts(
            &self,
            location: &Path,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn get_range(
            &self,
            location: &Path,
            range: Range<usize>,
        ) -> object_store::Result<Bytes> {
            self.inner.get_range(location, range).await
        }

        async fn head(&self, location: &Path) -> object_store::Result<ObjectMeta> {
            self.inner.head(location).await
        }

        async fn delete(&self, location: &Path) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&Path>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    fn local_store(dir: &TempDir) -> ObjectStoreBlobStore {
        let fs = LocalFileSystem::new_with_prefix(dir.path()).unwrap();
        ObjectStoreBlobStore::new(Arc::new(fs))
    }

    fn meta() -> ObjectMetadata {
        ObjectMetadata::new(ObjectRole::Data, 1)
    }

    #[tokio::test]
    async fn test_put_get_range_delete() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);

        store.put("obj", Bytes::from_static(b"hello world"), &meta()).await.unwrap();
        assert_eq!(store.get("obj").await.unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(store.get_range("obj", 6..11).await.unwrap(), Bytes::from_static(b"world"));
        assert_eq!(store.head("obj").await.unwrap().size, 11);

        store.delete("obj").await.unwrap();
        assert!(matches!(store.get("obj").await, Err(Error::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_multipart_parts_concatenate_in_order() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);

        let upload = store.create_multipart("obj", &meta()).await.unwrap();
        store.upload_part("obj", &upload, 1, Bytes::from_static(b"aaa")).await.unwrap();
        store.upload_part("obj", &upload, 2, Bytes::from_static(b"bb")).await.unwrap();
        store.complete_multipart("obj", &upload).await.unwrap();

        assert_eq!(store.get("obj").await.unwrap(), Bytes::from_static(b"aaabb"));
    }

    #[tokio::test]
    async fn test_failed_completion_aborts_backend_upload() {
        let dir = TempDir::new().unwrap();
        let inner: Arc<dyn ObjectStore> =
            Arc::new(LocalFileSystem::new_with_prefix(dir.path()).unwrap());
        let aborts = Arc::new(AtomicUsize::new(0));
        let store = ObjectStoreBlobStore::new(Arc::new(FailingFinalizeStore {
            inner,
            aborts: aborts.clone(),
        }));

        let upload = store.create_multipart("obj", &meta()).await.unwrap();
        store.upload_part("obj", &upload, 1, Bytes::from_static(b"abc")).await.unwrap();

        let err = store.complete_multipart("obj", &upload).await.unwrap_err();
        assert!(matches!(err, Error::Finalize { .. }));
        // The multipart upload must not dangle on the backend.
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_part_rejected() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);

        let upload = store.create_multipart("obj", &meta()).await.unwrap();
        let err = store
            .upload_part("obj", &upload, 2, Bytes::from_static(b"bb"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upload { .. }));
        store.abort_multipart("obj", &upload).await.ok();
    }

    #[tokio::test]
    async fn test_list_page_with_marker() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        for key in ["k1", "k2", "k3"] {
            store.put(key, Bytes::from_static(b"x"), &meta()).await.unwrap();
        }

        let page = store.list_page(None, None, 2).await.unwrap();
        assert_eq!(page.objects.len(), 2);
        let marker = page.next_marker.clone().unwrap();

        let rest = store.list_page(None, Some(&marker), 2).await.unwrap();
        assert_eq!(rest.objects.len(), 1);
        assert_eq!(rest.objects[0].key, "k3");
        assert!(rest.next_marker.is_none());
    }
}
