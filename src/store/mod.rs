//! Blob Store Abstraction
//!
//! The offload engine talks to object storage through the [`BlobStore`]
//! trait: whole-object put/get, ranged reads, multipart uploads with
//! numbered parts, and marker-paginated listing. Two implementations ship
//! here:
//!
//! - [`memory::InMemoryBlobStore`]: an in-process store for tests,
//!   honoring the full contract including failure injection
//! - [`s3::ObjectStoreBlobStore`]: an adapter over `object_store`, covering
//!   S3-compatible services and local filesystems
//!
//! [`StoreRegistry`] caches one store handle per [`StoreLocation`] so every
//! offloader and reader targeting the same bucket shares a connection pool.

pub mod memory;
pub mod s3;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// Role of an object in the offload layout, recorded in its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRole {
    Data,
    Index,
}

impl ObjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectRole::Data => "data",
            ObjectRole::Index => "index",
        }
    }
}

/// Metadata attached to an object at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub role: ObjectRole,
    pub format_version: u16,
    /// Caller-supplied key/value pairs, attached to every written object.
    pub user: HashMap<String, String>,
}

impl ObjectMetadata {
    pub fn new(role: ObjectRole, format_version: u16) -> Self {
        Self {
            role,
            format_version,
            user: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user: HashMap<String, String>) -> Self {
        self.user = user;
        self
    }
}

/// Description of a stored object, as returned by `head` and listing.
#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub last_modified_ms: i64,
    pub user_metadata: HashMap<String, String>,
}

/// One page of a marker-paginated listing.
#[derive(Debug)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    /// Marker to pass for the next page; `None` when the listing is done.
    pub next_marker: Option<String>,
}

/// Opaque handle to an in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadId(pub String);

/// Object storage operations the offload engine consumes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a whole object in one call.
    async fn put(&self, key: &str, data: Bytes, metadata: &ObjectMetadata) -> Result<()>;

    /// Fetch a whole object.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Fetch a byte range of an object.
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes>;

    /// Describe an object without fetching its content.
    async fn head(&self, key: &str) -> Result<ObjectDescriptor>;

    /// Delete an object. Deleting a missing object is an error here; the
    /// maintenance layer maps that case to success.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Begin a multipart upload.
    async fn create_multipart(&self, key: &str, metadata: &ObjectMetadata) -> Result<UploadId>;

    /// Upload one part. Part numbers start at 1 and arrive in order.
    async fn upload_part(
        &self,
        key: &str,
        upload: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> Result<()>;

    /// Commit a multipart upload; the object becomes visible atomically.
    async fn complete_multipart(&self, key: &str, upload: &UploadId) -> Result<()>;

    /// Abandon a multipart upload; no object becomes visible.
    async fn abort_multipart(&self, key: &str, upload: &UploadId) -> Result<()>;

    /// List up to `page_size` keys after `marker`, in key order.
    async fn list_page(
        &self,
        prefix: Option<&str>,
        marker: Option<&str>,
        page_size: usize,
    ) -> Result<ListPage>;
}

/// Where a store lives. Registry cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreLocation {
    /// Driver name, e.g. `"aws-s3"` or `"memory"`.
    pub driver: String,
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl StoreLocation {
    pub fn memory(bucket: impl Into<String>) -> Self {
        Self {
            driver: "memory".to_string(),
            bucket: bucket.into(),
            region: None,
            endpoint: None,
        }
    }
}

type StoreFactory = Box<dyn Fn(&StoreLocation) -> Result<Arc<dyn BlobStore>> + Send + Sync>;

/// Caches one [`BlobStore`] handle per location.
///
/// Handles are created lazily on first use and shared by every component
/// targeting the same location. `shutdown` drops all cached handles.
pub struct StoreRegistry {
    factory: StoreFactory,
    stores: Mutex<HashMap<StoreLocation, Arc<dyn BlobStore>>>,
}

impl StoreRegistry {
    pub fn new(factory: StoreFactory) -> Self {
        Self {
            factory,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Registry whose every location resolves to a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Box::new(|_| Ok(Arc::new(memory::InMemoryBlobStore::new()))))
    }

    pub fn get_or_create(&self, location: &StoreLocation) -> Result<Arc<dyn BlobStore>> {
        let mut stores = self.stores.lock().expect("store registry lock poisoned");
        if let Some(store) = stores.get(location) {
            return Ok(store.clone());
        }
        let store = (self.factory)(location)?;
        stores.insert(location.clone(), store.clone());
        Ok(store)
    }

    /// Drop every cached handle.
    pub fn shutdown(&self) {
        self.stores
            .lock()
            .expect("store registry lock poisoned")
            .clear();
    }
}
