use super::{ObjectBackend, ObjectId, WriteError};
use bytes::Bytes;
use md5::{Digest, Md5};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Writing,
    Saved,
    Failed,
}

// Streams one part's bytes into the backing object, payload-aligned, starting
// at the part's computed offset. The running MD5 covers every accepted byte
// and becomes the part's ETag.
pub struct ObjectWriter {
    backend: Arc<dyn ObjectBackend>,
    object: ObjectId,
    offset: u64,
    payload_size: usize,
    md5: Md5,
    state: WriterState,
}

impl ObjectWriter {
    pub fn new(
        backend: Arc<dyn ObjectBackend>,
        object: ObjectId,
        offset: u64,
        payload_size: usize,
    ) -> Self {
        Self {
            backend,
            object,
            offset,
            payload_size: payload_size.max(1),
            md5: Md5::new(),
            state: WriterState::Idle,
        }
    }

    pub async fn write_content(&mut self, buffer: Bytes) -> Result<usize, WriteError> {
        self.state = WriterState::Writing;
        let mut written = 0;
        for payload in buffer.chunks(self.payload_size) {
            if let Err(err) = self.backend.write_at(self.object, self.offset, payload).await {
                self.state = WriterState::Failed;
                return Err(err);
            }
            self.md5.update(payload);
            self.offset += payload.len() as u64;
            written += payload.len();
        }
        self.state = WriterState::Saved;
        Ok(written)
    }

    pub fn content_md5(&self) -> String {
        hex::encode(self.md5.clone().finalize())
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}
