use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use md5::{Digest, Md5};
use std::sync::Arc;

pub mod writer;

// Objects are addressed by a 128-bit id, like the secondary indexes.
pub type ObjectId = u128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError(pub String);

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object write failed: {}", self.0)
    }
}

pub trait ObjectBackend: Send + Sync {
    fn write_at<'a>(
        &'a self,
        object: ObjectId,
        offset: u64,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<(), WriteError>>;
}

// All parts of one upload land in one backing object.
pub fn object_id_for_upload(bucket: &str, object: &str, upload_id: &str) -> ObjectId {
    let mut hasher = Md5::new();
    hasher.update(bucket.as_bytes());
    hasher.update(b"/");
    hasher.update(object.as_bytes());
    hasher.update(b"#");
    hasher.update(upload_id.as_bytes());
    let digest: [u8; 16] = hasher.finalize().into();
    ObjectId::from_be_bytes(digest)
}

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<DashMap<ObjectId, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_bytes(&self, object: ObjectId) -> Option<Vec<u8>> {
        self.objects.get(&object).map(|entry| entry.value().clone())
    }
}

impl ObjectBackend for MemoryObjectStore {
    fn write_at<'a>(
        &'a self,
        object: ObjectId,
        offset: u64,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<(), WriteError>> {
        async move {
            let offset = usize::try_from(offset)
                .map_err(|_| WriteError("offset exceeds addressable memory".to_string()))?;
            let mut entry = self.objects.entry(object).or_default();
            let end = offset + data.len();
            if entry.len() < end {
                entry.resize(end, 0);
            }
            entry[offset..end].copy_from_slice(data);
            Ok(())
        }
        .boxed()
    }
}
