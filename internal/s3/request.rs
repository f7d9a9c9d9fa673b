use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// One signed unit of an aws-chunked body. A zero-size detail is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDetail {
    pub signature: String,
    pub payload_hash: String,
    pub size: usize,
}

#[derive(Clone)]
pub struct BufferedBody {
    inner: Arc<BodyShared>,
}

struct BodyShared {
    state: Mutex<BodyState>,
    data_ready: Notify,
    resumed: Notify,
}

struct BodyState {
    buf: BytesMut,
    frozen: bool,
    paused: bool,
    details: VecDeque<ChunkDetail>,
}

impl Default for BufferedBody {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedBody {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BodyShared {
                state: Mutex::new(BodyState {
                    buf: BytesMut::new(),
                    frozen: false,
                    paused: false,
                    details: VecDeque::new(),
                }),
                data_ready: Notify::new(),
                resumed: Notify::new(),
            }),
        }
    }

    // Producer side. Blocks while the body is paused; this is the explicit
    // backpressure the consumer exerts on the HTTP layer.
    pub async fn push(&self, data: &[u8]) {
        loop {
            {
                let mut state = self.lock();
                if !state.paused {
                    state.buf.extend_from_slice(data);
                    drop(state);
                    self.inner.data_ready.notify_one();
                    return;
                }
            }
            self.inner.resumed.notified().await;
        }
    }

    pub fn push_chunk_detail(&self, detail: ChunkDetail) {
        self.lock().details.push_back(detail);
        self.inner.data_ready.notify_one();
    }

    pub fn pop_chunk_detail(&self) -> Option<ChunkDetail> {
        self.lock().details.pop_front()
    }

    pub fn freeze(&self) {
        self.lock().frozen = true;
        self.inner.data_ready.notify_one();
    }

    pub fn pause(&self) {
        self.lock().paused = true;
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        self.inner.resumed.notify_one();
        self.inner.data_ready.notify_one();
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take_up_to(&self, limit: usize) -> Bytes {
        let mut state = self.lock();
        let take = state.buf.len().min(limit);
        state.buf.split_to(take).freeze()
    }

    // Resolves once at least `threshold` bytes are buffered or the stream is
    // frozen, whichever happens first.
    pub async fn await_data(&self, threshold: usize) {
        loop {
            {
                let state = self.lock();
                if state.frozen || state.buf.len() >= threshold {
                    return;
                }
            }
            self.inner.data_ready.notified().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BodyState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PartRequest {
    pub request_id: String,
    pub bucket: String,
    pub object: String,
    pub upload_id: String,
    pub part_number: u32,
    pub chunked: bool,
    pub content_length: u64,
    pub headers: HeaderMap,
    body: BufferedBody,
}

impl PartRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: String,
        bucket: String,
        object: String,
        upload_id: String,
        part_number: u32,
        headers: HeaderMap,
        content_length: u64,
        body: BufferedBody,
    ) -> Self {
        let chunked = detect_chunked(&headers);
        Self {
            request_id,
            bucket,
            object,
            upload_id,
            part_number,
            chunked,
            content_length,
            headers,
            body,
        }
    }

    pub fn body(&self) -> &BufferedBody {
        &self.body
    }

    pub fn object_uri(&self) -> String {
        format!("/{}/{}", self.bucket, self.object)
    }

    pub fn user_defined_attributes(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter(|(name, _)| name.as_str().contains("x-amz-meta-"))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect()
    }
}

pub fn detect_chunked(headers: &HeaderMap) -> bool {
    let encoded = headers
        .get("content-encoding")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("aws-chunked"))
        .unwrap_or(false);
    let streaming = headers
        .get("x-amz-content-sha256")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("STREAMING-AWS4-HMAC-SHA256-PAYLOAD"))
        .unwrap_or(false);
    encoded || streaming
}

pub fn declared_content_length(headers: &HeaderMap, chunked: bool) -> Option<u64> {
    let name = if chunked {
        "x-amz-decoded-content-length"
    } else {
        "content-length"
    };
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}
