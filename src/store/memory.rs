//! In-memory blob store for tests.
//!
//! Honors the full [`BlobStore`] contract: numbered multipart parts that must
//! be contiguous from 1 on commit, atomic visibility on complete, user
//! metadata round-tripping, and marker pagination in key order. A failure
//! injection hook makes part uploads fail on demand so the abort path can be
//! exercised without a real store.

use super::{
    BlobStore, ListPage, ObjectDescriptor, ObjectMetadata, UploadId,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
    last_modified_ms: i64,
}

struct PendingUpload {
    key: String,
    metadata: ObjectMetadata,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

pub struct InMemoryBlobStore {
    inner: Mutex<Inner>,
    next_upload_id: AtomicU64,
    clock_ms: AtomicU64,
    /// Remaining part uploads to fail; 0 disables injection.
    fail_next_parts: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_upload_id: AtomicU64::new(1),
            clock_ms: AtomicU64::new(1),
            fail_next_parts: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` part uploads fail.
    pub fn fail_next_part_uploads(&self, count: usize) {
        self.fail_next_parts.store(count, Ordering::SeqCst);
    }

    /// Number of in-flight multipart uploads, for leak assertions.
    pub fn pending_upload_count(&self) -> usize {
        self.inner.lock().expect("blob store lock poisoned").uploads.len()
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().expect("blob store lock poisoned").objects.len()
    }

    fn tick(&self) -> i64 {
        self.clock_ms.fetch_add(1, Ordering::SeqCst) as i64
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes, metadata: &ObjectMetadata) -> Result<()> {
        let last_modified_ms = self.tick();
        let mut inner = self.inner.lock().expect("blob store lock poisoned");
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
                last_modified_ms,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let inner = self.inner.lock().expect("blob store lock poisoned");
        inner
            .objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        let inner = self.inner.lock().expect("blob store lock poisoned");
        let object = inner
            .objects
            .get(key)
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))?;
        if range.end > object.data.len() as u64 || range.start > range.end {
            return Err(Error::Store(format!(
                "range {}..{} out of bounds for {} ({} bytes)",
                range.start,
                range.end,
                key,
                object.data.len()
            )));
        }
        Ok(object.data.slice(range.start as usize..range.end as usize))
    }

    async fn head(&self, key: &str) -> Result<ObjectDescriptor> {
        let inner = self.inner.lock().expect("blob store lock poisoned");
        let object = inner
            .objects
            .get(key)
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))?;
        Ok(ObjectDescriptor {
            key: key.to_string(),
            size: object.data.len() as u64,
            last_modified_ms: object.last_modified_ms,
            user_metadata: object.metadata.user.clone(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("blob store lock poisoned");
        inner
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))
    }

    async fn create_multipart(&self, key: &str, metadata: &ObjectMetadata) -> Result<UploadId> {
        let id = self.next_upload_id.fetch_add(1, Ordering::SeqCst);
        let upload_id = format!("upload-{}", id);
        let mut inner = self.inner.lock().expect("blob store lock poisoned");
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(UploadId(upload_id))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> Result<()> {
        let remaining = self.fail_next_parts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_parts.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Upload {
                key: key.to_string(),
                reason: "injected part failure".to_string(),
            });
        }
        if part_number == 0 {
            return Err(Error::Upload {
                key: key.to_string(),
                reason: "part numbers start at 1".to_string(),
            });
        }
        let mut inner = self.inner.lock().expect("blob store lock poisoned");
        let pending = inner
            .uploads
            .get_mut(&upload.0)
            .ok_or_else(|| Error::Store(format!("unknown upload {}", upload.0)))?;
        pending.parts.insert(part_number, data);
        Ok(())
    }

    async fn complete_multipart(&self, key: &str, upload: &UploadId) -> Result<()> {
        let last_modified_ms = self.tick();
        let mut inner = self.inner.lock().expect("blob store lock poisoned");
        let pending = inner
            .uploads
            .remove(&upload.0)
            .ok_or_else(|| Error::Store(format!("unknown upload {}", upload.0)))?;

        // Parts must be contiguous from 1, matching real multipart semantics.
        for (expected, part_number) in (1..).zip(pending.parts.keys()) {
            if *part_number != expected {
                return Err(Error::Store(format!(
                    "upload {} missing part {}",
                    upload.0, expected
                )));
            }
        }
        if pending.parts.is_empty() {
            return Err(Error::Store(format!("upload {} has no parts", upload.0)));
        }

        let mut data = BytesMut::new();
        for part in pending.parts.values() {
            data.extend_from_slice(part);
        }
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                data: data.freeze(),
                metadata: pending.metadata,
                last_modified_ms,
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload: &UploadId) -> Result<()> {
        let mut inner = self.inner.lock().expect("blob store lock poisoned");
        inner.uploads.remove(&upload.0);
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: Option<&str>,
        marker: Option<&str>,
        page_size: usize,
    ) -> Result<ListPage> {
        let inner = self.inner.lock().expect("blob store lock poisoned");
        let mut objects = Vec::with_capacity(page_size);
        for (key, object) in &inner.objects {
            if let Some(prefix) = prefix {
                if !key.starts_with(prefix) {
                    continue;
                }
            }
            if let Some(marker) = marker {
                if key.as_str() <= marker {
                    continue;
                }
            }
            objects.push(ObjectDescriptor {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified_ms: object.last_modified_ms,
                user_metadata: object.metadata.user.clone(),
            });
            if objects.len() == page_size {
                break;
            }
        }
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
