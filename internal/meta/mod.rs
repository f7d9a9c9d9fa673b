use crate::kvs::{IndexId, IndexKvs, SlotStatus};
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod models;

use models::{BucketInfo, MultipartUploadInfo, PartDescriptor};

pub const BUCKET_INDEX: IndexId = 0x0000_0000_0000_0001_0000_0000_0000_0001;
pub const UPLOAD_INDEX: IndexId = 0x0000_0000_0000_0001_0000_0000_0000_0002;

// Every upload gets its own part index.
pub fn part_index_id(upload_id: &str) -> IndexId {
    let mut hasher = Md5::new();
    hasher.update(b"parts#");
    hasher.update(upload_id.as_bytes());
    let digest: [u8; 16] = hasher.finalize().into();
    IndexId::from_be_bytes(digest)
}

// Zero-padded so lexicographic order matches numeric part order.
pub fn part_key(part_number: u32) -> Vec<u8> {
    format!("{:05}", part_number).into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataState {
    Empty,
    Loading,
    Present,
    Saved,
    Missing,
    Failed,
}

#[derive(Clone)]
pub struct MetadataStore {
    kvs: IndexKvs,
}

impl MetadataStore {
    pub fn new(kvs: IndexKvs) -> Self {
        Self { kvs }
    }

    pub async fn put_bucket(&self, info: &BucketInfo) -> MetadataState {
        self.put_json(BUCKET_INDEX, info.name.as_bytes(), info).await
    }

    pub async fn put_upload(&self, info: &MultipartUploadInfo) -> MetadataState {
        self.put_json(UPLOAD_INDEX, info.upload_id.as_bytes(), info)
            .await
    }

    pub async fn put_part(&self, descriptor: &PartDescriptor) -> MetadataState {
        let index = part_index_id(&descriptor.upload_id);
        let key = part_key(descriptor.part_number);
        self.put_json(index, &key, descriptor).await
    }

    pub async fn get_bucket(&self, name: &str) -> (MetadataState, Option<BucketInfo>) {
        self.get_json(BUCKET_INDEX, name.as_bytes()).await
    }

    pub async fn get_upload(&self, upload_id: &str) -> (MetadataState, Option<MultipartUploadInfo>) {
        self.get_json(UPLOAD_INDEX, upload_id.as_bytes()).await
    }

    pub async fn get_part(
        &self,
        upload_id: &str,
        part_number: u32,
    ) -> (MetadataState, Option<PartDescriptor>) {
        let index = part_index_id(upload_id);
        self.get_json(index, &part_key(part_number)).await
    }

    async fn put_json<T: Serialize>(&self, index: IndexId, key: &[u8], value: &T) -> MetadataState {
        let encoded = match serde_json::to_vec(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::error!(error = %err, "metadata record failed to encode");
                return MetadataState::Failed;
            }
        };
        let batch = self.kvs.write(index, &[(key.to_vec(), encoded)]).await;
        if !batch.is_stable() {
            return MetadataState::Failed;
        }
        match batch.slots.first() {
            Some(SlotStatus::Found) => MetadataState::Saved,
            _ => MetadataState::Failed,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        index: IndexId,
        key: &[u8],
    ) -> (MetadataState, Option<T>) {
        let batch = self.kvs.read(index, &[key.to_vec()]).await;
        if !batch.is_stable() {
            return (MetadataState::Failed, None);
        }
        let Some(slot) = batch.slots.first() else {
            return (MetadataState::Failed, None);
        };
        match slot.status {
            SlotStatus::NotFound => (MetadataState::Missing, None),
            SlotStatus::Failed => (MetadataState::Failed, None),
            SlotStatus::Found => {
                let raw = slot.value.as_deref().unwrap_or_default();
                match serde_json::from_slice(raw) {
                    Ok(value) => (MetadataState::Present, Some(value)),
                    Err(err) => {
                        tracing::error!(error = %err, "metadata record failed to decode");
                        (MetadataState::Failed, None)
                    }
                }
            }
        }
    }
}

pub struct BucketMetadata {
    store: MetadataStore,
    name: String,
    state: MetadataState,
    info: Option<BucketInfo>,
}

impl BucketMetadata {
    pub fn new(store: MetadataStore, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
            state: MetadataState::Empty,
            info: None,
        }
    }

    pub async fn load(&mut self) -> MetadataState {
        self.state = MetadataState::Loading;
        let (state, info) = self.store.get_bucket(&self.name).await;
        self.state = state;
        self.info = info;
        state
    }

    pub fn state(&self) -> MetadataState {
        self.state
    }

    pub fn info(&self) -> Option<&BucketInfo> {
        self.info.as_ref()
    }
}

pub struct MultipartMetadata {
    store: MetadataStore,
    upload_id: String,
    state: MetadataState,
    info: Option<MultipartUploadInfo>,
}

impl MultipartMetadata {
    pub fn new(store: MetadataStore, upload_id: &str) -> Self {
        Self {
            store,
            upload_id: upload_id.to_string(),
            state: MetadataState::Empty,
            info: None,
        }
    }

    pub async fn load(&mut self) -> MetadataState {
        self.state = MetadataState::Loading;
        let (state, info) = self.store.get_upload(&self.upload_id).await;
        self.state = state;
        self.info = info;
        state
    }

    pub fn state(&self) -> MetadataState {
        self.state
    }

    pub fn info(&self) -> Option<&MultipartUploadInfo> {
        self.info.as_ref()
    }
}

pub struct PartMetadata {
    store: MetadataStore,
    upload_id: String,
    state: MetadataState,
    descriptor: Option<PartDescriptor>,
}

impl PartMetadata {
    pub fn new(store: MetadataStore, upload_id: &str) -> Self {
        Self {
            store,
            upload_id: upload_id.to_string(),
            state: MetadataState::Empty,
            descriptor: None,
        }
    }

    pub async fn load(&mut self, part_number: u32) -> MetadataState {
        self.state = MetadataState::Loading;
        let (state, descriptor) = self.store.get_part(&self.upload_id, part_number).await;
        self.state = state;
        self.descriptor = descriptor;
        state
    }

    pub async fn save(&mut self, descriptor: PartDescriptor) -> MetadataState {
        let state = self.store.put_part(&descriptor).await;
        self.descriptor = Some(descriptor);
        self.state = state;
        state
    }

    pub fn state(&self) -> MetadataState {
        self.state
    }

    pub fn content_length(&self) -> u64 {
        self.descriptor
            .as_ref()
            .map(|descriptor| descriptor.content_length)
            .unwrap_or(0)
    }

    pub fn descriptor(&self) -> Option<&PartDescriptor> {
        self.descriptor.as_ref()
    }
}
