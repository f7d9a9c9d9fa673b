use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

impl BucketInfo {
    pub fn new(name: &str, owner: &str) -> Self {
        Self {
            name: name.to_string(),
            owner: owner.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultipartUploadInfo {
    pub upload_id: String,
    pub bucket: String,
    pub object: String,
    pub initiated_at: DateTime<Utc>,
}

impl MultipartUploadInfo {
    pub fn new(upload_id: &str, bucket: &str, object: &str) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
            initiated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartDescriptor {
    pub upload_id: String,
    pub part_number: u32,
    pub content_length: u64,
    pub content_md5: String,
    pub user_attributes: BTreeMap<String, String>,
}
