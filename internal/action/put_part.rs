use super::{ActionPipeline, Step, TaskFuture};
use crate::meta::models::PartDescriptor;
use crate::meta::{BucketMetadata, MetadataState, MetadataStore, MultipartMetadata, PartMetadata};
use crate::s3::chunk_auth::{init_chunk_auth_cycle, AuthOutcome, ChunkAuthClient, ChunkValidator};
use crate::s3::errors::{s3_error, S3Error};
use crate::s3::request::PartRequest;
use crate::storage::writer::{ObjectWriter, WriterState};
use crate::storage::{object_id_for_upload, ObjectBackend};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use md5::{Digest, Md5};
use std::sync::Arc;

// Uploads one part of a multipart upload: loads bucket and upload metadata,
// computes the part's offset from the size of part one, streams the body into
// the backing object, and persists the part descriptor. Writes and chunk
// authentication are independent producers; whichever finishes last decides
// when the terminal response fires.
pub struct PutObjectPartAction {
    request: PartRequest,
    objects: Arc<dyn ObjectBackend>,
    write_payload_size: usize,

    bucket: BucketMetadata,
    multipart: MultipartMetadata,
    part: PartMetadata,
    writer: Option<ObjectWriter>,
    auth: Option<ChunkAuthClient>,
    pending_validator: Option<Box<dyn ChunkValidator>>,

    total_data_to_stream: u64,

    auth_in_progress: bool,
    auth_completed: bool,
    auth_failed: bool,
    write_failed: bool,
    store_write_in_progress: bool,
    store_write_completed: bool,
}

impl PutObjectPartAction {
    pub fn new(
        request: PartRequest,
        meta: MetadataStore,
        objects: Arc<dyn ObjectBackend>,
        write_payload_size: usize,
        validator: Option<Box<dyn ChunkValidator>>,
    ) -> Self {
        let bucket = BucketMetadata::new(meta.clone(), &request.bucket);
        let multipart = MultipartMetadata::new(meta.clone(), &request.upload_id);
        let part = PartMetadata::new(meta, &request.upload_id);
        Self {
            request,
            objects,
            write_payload_size: write_payload_size.max(1),
            bucket,
            multipart,
            part,
            writer: None,
            auth: None,
            pending_validator: validator,
            total_data_to_stream: 0,
            auth_in_progress: false,
            auth_completed: false,
            auth_failed: false,
            write_failed: false,
            store_write_in_progress: false,
            store_write_completed: false,
        }
    }

    pub async fn execute(self) -> Response {
        let pipeline = Self::build_pipeline(self.request.chunked, self.request.part_number);
        pipeline.run(self, Self::send_response).await
    }

    fn build_pipeline(chunked: bool, part_number: u32) -> ActionPipeline<Self> {
        let mut pipeline = ActionPipeline::new();
        if chunked {
            // The one-shot header check upstream cannot vouch for a signed
            // chunk stream; swap in the rolling per-chunk cycle instead.
            pipeline.clear_tasks();
            pipeline.add_task("start-chunk-authentication", Self::start_chunk_authentication);
        }
        pipeline.add_task("fetch-bucket-info", Self::fetch_bucket_info);
        pipeline.add_task("fetch-multipart-metadata", Self::fetch_multipart_metadata);
        if part_number != 1 {
            pipeline.add_task("fetch-firstpart-info", Self::fetch_firstpart_info);
        }
        pipeline.add_task("compute-part-offset", Self::compute_part_offset);
        pipeline.add_task("initiate-data-streaming", Self::initiate_data_streaming);
        pipeline.add_task("save-metadata", Self::save_metadata);
        pipeline
    }

    fn start_chunk_authentication(action: &mut Self) -> TaskFuture<'_> {
        Box::pin(async move {
            match action.pending_validator.take() {
                Some(validator) => {
                    action.auth = Some(init_chunk_auth_cycle(validator));
                    Step::Next
                }
                None => {
                    tracing::error!(
                        request_id = %action.request.request_id,
                        "chunked request arrived without chain credentials"
                    );
                    action.auth_failed = true;
                    Step::Respond
                }
            }
        })
    }

    fn fetch_bucket_info(action: &mut Self) -> TaskFuture<'_> {
        Box::pin(async move {
            if !action.request.body().is_frozen() {
                action.request.body().pause();
            }
            if action.bucket.load().await == MetadataState::Present {
                return Step::Next;
            }
            tracing::error!(
                bucket = %action.request.bucket,
                request_id = %action.request.request_id,
                "bucket lookup did not find the bucket"
            );
            action.request.body().resume();
            Step::Respond
        })
    }

    fn fetch_multipart_metadata(action: &mut Self) -> TaskFuture<'_> {
        Box::pin(async move {
            if action.multipart.load().await == MetadataState::Present {
                return Step::Next;
            }
            tracing::warn!(
                upload_id = %action.request.upload_id,
                request_id = %action.request.request_id,
                uri = %action.request.object_uri(),
                "multipart upload metadata is gone; the upload may have been aborted"
            );
            action.request.body().resume();
            Step::Respond
        })
    }

    fn fetch_firstpart_info(action: &mut Self) -> TaskFuture<'_> {
        Box::pin(async move {
            if !action.request.body().is_frozen() {
                action.request.body().pause();
            }
            if action.part.load(1).await == MetadataState::Present {
                return Step::Next;
            }
            tracing::warn!(
                upload_id = %action.request.upload_id,
                request_id = %action.request.request_id,
                "part one metadata not available yet; client should retry"
            );
            action.request.body().resume();
            Step::Respond
        })
    }

    fn compute_part_offset(action: &mut Self) -> TaskFuture<'_> {
        Box::pin(async move {
            let mut offset = 0u64;
            if action.request.part_number != 1 {
                let part_one_size = action.part.content_length();
                offset = u64::from(action.request.part_number - 1) * part_one_size;
                tracing::debug!(
                    part_number = action.request.part_number,
                    offset,
                    "computed part offset from part one size"
                );
            }
            let object = object_id_for_upload(
                &action.request.bucket,
                &action.request.object,
                &action.request.upload_id,
            );
            action.writer = Some(ObjectWriter::new(
                action.objects.clone(),
                object,
                offset,
                action.write_payload_size,
            ));
            Step::Next
        })
    }

    fn initiate_data_streaming(action: &mut Self) -> TaskFuture<'_> {
        Box::pin(async move {
            action.total_data_to_stream = action.request.content_length;
            action.request.body().resume();
            if action.request.chunked && action.auth.is_none() {
                debug_assert!(false, "chunk auth cycle must be armed before streaming");
                return Step::Respond;
            }
            if action.total_data_to_stream == 0 {
                // Zero-size part; nothing to stream.
                return Step::Next;
            }
            action.stream_object_data().await
        })
    }

    async fn stream_object_data(&mut self) -> Step {
        loop {
            self.request.body().await_data(self.write_payload_size).await;
            let frozen = self.request.body().is_frozen();
            if self.request.chunked {
                self.forward_ready_chunks();
                self.store_write_in_progress = true;
            }
            let buffer = self.request.body().take_up_to(usize::MAX);
            if !frozen {
                // Hold the producer until this write lands.
                self.request.body().pause();
            }
            let write_result = match self.writer.as_mut() {
                Some(writer) => writer.write_content(buffer).await,
                None => return Step::Respond,
            };
            match write_result {
                Ok(_) => {
                    if self.request.chunked {
                        self.store_write_in_progress = false;
                        self.poll_auth();
                        if self.auth_failed {
                            // Bytes already written stay put; cleanup belongs
                            // to the upload abort path.
                            return Step::Respond;
                        }
                    }
                    if !self.request.body().is_empty() {
                        continue;
                    }
                    if frozen {
                        break;
                    }
                    self.request.body().resume();
                }
                Err(err) => return self.write_object_failed(err.to_string()).await,
            }
        }
        self.store_write_completed = true;
        if self.request.chunked {
            return self.join_auth_outcome().await;
        }
        Step::Next
    }

    fn forward_ready_chunks(&mut self) {
        while let Some(detail) = self.request.body().pop_chunk_detail() {
            let Some(auth) = &self.auth else {
                return;
            };
            if detail.size == 0 {
                auth.add_last_checksum_for_chunk(detail.signature, detail.payload_hash);
            } else {
                auth.add_checksum_for_chunk(detail.signature, detail.payload_hash);
            }
            self.auth_in_progress = true;
        }
    }

    fn poll_auth(&mut self) {
        let Some(auth) = &self.auth else {
            return;
        };
        match auth.try_outcome() {
            Some(AuthOutcome::Success) => {
                self.auth_in_progress = false;
                self.auth_completed = true;
            }
            Some(AuthOutcome::Failure) => {
                self.auth_in_progress = false;
                self.auth_failed = true;
            }
            None => {}
        }
    }

    // The write finished first; hold the task until the verifier reports.
    async fn join_auth_outcome(&mut self) -> Step {
        debug_assert!(self.store_write_completed);
        self.poll_auth();
        if self.auth_failed {
            return Step::Respond;
        }
        if self.auth_completed {
            return Step::Next;
        }
        let outcome = match self.auth.as_mut() {
            Some(auth) => auth.outcome().await,
            None => AuthOutcome::Failure,
        };
        self.auth_in_progress = false;
        match outcome {
            AuthOutcome::Success => {
                self.auth_completed = true;
                Step::Next
            }
            AuthOutcome::Failure => {
                self.auth_failed = true;
                Step::Respond
            }
        }
    }

    async fn write_object_failed(&mut self, error: String) -> Step {
        tracing::error!(
            error = %error,
            request_id = %self.request.request_id,
            upload_id = %self.request.upload_id,
            write_in_progress = self.store_write_in_progress,
            "object store write failed"
        );
        self.write_failed = true;
        if self.request.chunked {
            self.store_write_in_progress = false;
            if self.auth_in_progress {
                // The verifier still owes a verdict; it decides the response.
                let outcome = match self.auth.as_mut() {
                    Some(auth) => auth.outcome().await,
                    None => AuthOutcome::Failure,
                };
                self.auth_in_progress = false;
                match outcome {
                    AuthOutcome::Success => self.auth_completed = true,
                    AuthOutcome::Failure => self.auth_failed = true,
                }
            }
        }
        Step::Respond
    }

    fn save_metadata(action: &mut Self) -> TaskFuture<'_> {
        Box::pin(async move {
            let content_md5 = action
                .writer
                .as_ref()
                .map(|writer| writer.content_md5())
                .unwrap_or_else(|| hex::encode(Md5::digest(b"")));
            let descriptor = PartDescriptor {
                upload_id: action.request.upload_id.clone(),
                part_number: action.request.part_number,
                content_length: action.request.content_length,
                content_md5,
                user_attributes: action.request.user_defined_attributes(),
            };
            // The terminal classifier reads the final state; a failed persist
            // is not fatal here.
            let _ = action.part.save(descriptor).await;
            Step::Next
        })
    }

    async fn send_response(self) -> Response {
        let response = self.classify();
        self.request.body().resume();
        response
    }

    // Strict priority order; exactly one branch emits.
    fn classify(&self) -> Response {
        let request_id = self.request.request_id.as_str();
        let resource = self.request.object_uri();
        if self.request.chunked && self.auth_failed {
            return s3_error(S3Error::SignatureDoesNotMatch, request_id, &resource);
        }
        if self.bucket.state() == MetadataState::Missing {
            tracing::error!(
                upload_id = %self.request.upload_id,
                request_id,
                uri = %resource,
                "missing bucket for multipart upload"
            );
            return s3_error(S3Error::NoSuchBucket, request_id, &resource);
        }
        if self.multipart.state() == MetadataState::Missing {
            return s3_error(S3Error::NoSuchUpload, request_id, &resource);
        }
        if self.part.state() == MetadataState::Missing {
            // Part one may simply not have landed yet; the client retries.
            return s3_error(S3Error::ServiceUnavailable, request_id, &resource);
        }
        let writer_failed = self
            .writer
            .as_ref()
            .map(|writer| writer.state() == WriterState::Failed)
            .unwrap_or(false);
        if self.write_failed || writer_failed {
            return s3_error(S3Error::InternalError, request_id, &resource);
        }
        if self.part.state() == MetadataState::Saved {
            return self.success_response();
        }
        tracing::error!(
            upload_id = %self.request.upload_id,
            request_id,
            uri = %resource,
            "part upload ended in an unexpected state"
        );
        s3_error(S3Error::InternalError, request_id, &resource)
    }

    fn success_response(&self) -> Response {
        let etag = self
            .writer
            .as_ref()
            .map(|writer| writer.content_md5())
            .unwrap_or_else(|| hex::encode(Md5::digest(b"")));
        let mut response = (StatusCode::OK, "").into_response();
        if let Ok(value) = etag.parse() {
            response.headers_mut().insert("ETag", value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::PutObjectPartAction;
    use crate::kvs::client::{LexClient, MemoryLexClient};
    use crate::kvs::IndexKvs;
    use crate::meta::models::{BucketInfo, MultipartUploadInfo, PartDescriptor};
    use crate::meta::MetadataStore;
    use crate::s3::chunk_auth::ChunkValidator;
    use crate::s3::request::{BufferedBody, ChunkDetail, PartRequest};
    use crate::storage::{
        object_id_for_upload, MemoryObjectStore, ObjectBackend, ObjectId, WriteError,
    };
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use md5::{Digest, Md5};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        meta: MetadataStore,
        objects: MemoryObjectStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                meta: MetadataStore::new(IndexKvs::new(LexClient::Memory(MemoryLexClient::new()))),
                objects: MemoryObjectStore::new(),
            }
        }

        async fn seed_bucket_and_upload(&self) {
            self.meta.put_bucket(&BucketInfo::new("photos", "admin")).await;
            self.meta
                .put_upload(&MultipartUploadInfo::new("upload-1", "photos", "pic.jpg"))
                .await;
        }

        async fn seed_part_one(&self, length: u64) {
            self.meta
                .put_part(&PartDescriptor {
                    upload_id: "upload-1".to_string(),
                    part_number: 1,
                    content_length: length,
                    content_md5: "feed".to_string(),
                    user_attributes: BTreeMap::new(),
                })
                .await;
        }

        fn action(&self, request: PartRequest) -> PutObjectPartAction {
            PutObjectPartAction::new(
                request,
                self.meta.clone(),
                Arc::new(self.objects.clone()),
                1024 * 1024,
                None,
            )
        }

        fn chunked_action(
            &self,
            request: PartRequest,
            validator: Box<dyn ChunkValidator>,
            payload_size: usize,
        ) -> PutObjectPartAction {
            PutObjectPartAction::new(
                request,
                self.meta.clone(),
                Arc::new(self.objects.clone()),
                payload_size,
                Some(validator),
            )
        }

        fn object_id(&self) -> ObjectId {
            object_id_for_upload("photos", "pic.jpg", "upload-1")
        }
    }

    fn request(part_number: u32, length: u64, body: BufferedBody) -> PartRequest {
        PartRequest::new(
            "req-1".to_string(),
            "photos".to_string(),
            "pic.jpg".to_string(),
            "upload-1".to_string(),
            part_number,
            HeaderMap::new(),
            length,
            body,
        )
    }

    fn chunked_request(part_number: u32, length: u64, body: BufferedBody) -> PartRequest {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-amz-content-sha256",
            HeaderValue::from_static("STREAMING-AWS4-HMAC-SHA256-PAYLOAD"),
        );
        PartRequest::new(
            "req-1".to_string(),
            "photos".to_string(),
            "pic.jpg".to_string(),
            "upload-1".to_string(),
            part_number,
            headers,
            length,
            body,
        )
    }

    struct AcceptAll;

    impl ChunkValidator for AcceptAll {
        fn verify(&mut self, _signature: &str, _payload_hash: &str) -> bool {
            true
        }
    }

    struct SlowAcceptAll {
        delay: Duration,
    }

    impl ChunkValidator for SlowAcceptAll {
        fn verify(&mut self, _signature: &str, _payload_hash: &str) -> bool {
            std::thread::sleep(self.delay);
            true
        }
    }

    // Rejects the terminal checksum only (its payload hash is the empty hash).
    struct RejectLast;

    impl ChunkValidator for RejectLast {
        fn verify(&mut self, _signature: &str, payload_hash: &str) -> bool {
            payload_hash != hex::encode(sha2::Sha256::digest(b""))
        }
    }

    struct FailingBackend;

    impl ObjectBackend for FailingBackend {
        fn write_at<'a>(
            &'a self,
            _object: ObjectId,
            _offset: u64,
            _data: &'a [u8],
        ) -> BoxFuture<'a, Result<(), WriteError>> {
            async { Err(WriteError("no space".to_string())) }.boxed()
        }
    }

    fn detail(signature: &str, payload: &[u8]) -> ChunkDetail {
        ChunkDetail {
            signature: signature.to_string(),
            payload_hash: hex::encode(sha2::Sha256::digest(payload)),
            size: payload.len(),
        }
    }

    #[tokio::test]
    async fn buffered_part_one_writes_at_offset_zero_and_returns_its_etag() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        body.push(b"ABCDEFGH").await;
        body.freeze();

        let response = fixture.action(request(1, 8, body)).execute().await;
        assert_eq!(response.status(), StatusCode::OK);
        let expected_md5 = hex::encode(Md5::digest(b"ABCDEFGH"));
        assert_eq!(
            response
                .headers()
                .get("ETag")
                .and_then(|value| value.to_str().ok()),
            Some(expected_md5.as_str())
        );

        assert_eq!(
            fixture.objects.object_bytes(fixture.object_id()).expect("object"),
            b"ABCDEFGH"
        );
        let (_, saved) = fixture.meta.get_part("upload-1", 1).await;
        let saved = saved.expect("saved descriptor");
        assert_eq!(saved.content_length, 8);
        assert_eq!(saved.content_md5, expected_md5);
    }

    #[tokio::test]
    async fn part_three_writes_at_twice_the_part_one_length() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;
        fixture.seed_part_one(1048576).await;

        let body = BufferedBody::new();
        body.push(b"TAIL").await;
        body.freeze();

        let response = fixture.action(request(3, 4, body)).execute().await;
        assert_eq!(response.status(), StatusCode::OK);

        let object = fixture.objects.object_bytes(fixture.object_id()).expect("object");
        assert_eq!(object.len(), 2097152 + 4);
        assert_eq!(&object[2097152..], b"TAIL");
    }

    #[tokio::test]
    async fn part_two_before_part_one_returns_retryable_unavailable() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        body.push(b"data").await;
        body.freeze();

        let response = fixture.action(request(2, 4, body)).execute().await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response
                .headers()
                .get("Retry-After")
                .and_then(|value| value.to_str().ok()),
            Some("1")
        );
    }

    #[tokio::test]
    async fn missing_bucket_returns_no_such_bucket() {
        let fixture = Fixture::new();

        let body = BufferedBody::new();
        body.freeze();

        let response = fixture.action(request(1, 0, body)).execute().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let text = response_text(response).await;
        assert!(text.contains("<Code>NoSuchBucket</Code>"));
        assert!(text.contains("<RequestId>req-1</RequestId>"));
    }

    #[tokio::test]
    async fn missing_upload_returns_no_such_upload() {
        let fixture = Fixture::new();
        fixture.meta.put_bucket(&BucketInfo::new("photos", "admin")).await;

        let body = BufferedBody::new();
        body.freeze();

        let response = fixture.action(request(1, 0, body)).execute().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let text = response_text(response).await;
        assert!(text.contains("<Code>NoSuchUpload</Code>"));
    }

    #[tokio::test]
    async fn zero_length_part_skips_streaming_and_saves_the_empty_etag() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        body.freeze();

        let response = fixture.action(request(1, 0, body)).execute().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("ETag")
                .and_then(|value| value.to_str().ok()),
            Some(hex::encode(Md5::digest(b"")).as_str())
        );
    }

    #[tokio::test]
    async fn streamed_body_applies_backpressure_and_still_succeeds() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        let feeder_body = body.clone();
        let feeder = tokio::spawn(async move {
            for piece in [b"AAAA".as_slice(), b"BBBB", b"CC"] {
                feeder_body.push(piece).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            feeder_body.freeze();
        });

        let mut action = fixture.action(request(1, 10, body));
        action.write_payload_size = 4;
        let response = action.execute().await;
        feeder.await.expect("feeder");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            fixture.objects.object_bytes(fixture.object_id()).expect("object"),
            b"AAAABBBBCC"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn chunked_upload_waits_for_auth_after_the_write_completes() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        body.push(b"ABCD").await;
        body.push_chunk_detail(detail("sig-1", b"ABCD"));
        body.push(b"EFGH").await;
        body.push_chunk_detail(detail("sig-2", b"EFGH"));
        body.push_chunk_detail(detail("sig-3", b""));
        body.freeze();

        let delay = Duration::from_millis(60);
        let started = std::time::Instant::now();
        let response = fixture
            .chunked_action(
                chunked_request(1, 8, body),
                Box::new(SlowAcceptAll { delay }),
                1024,
            )
            .execute()
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        // Three slow verifications gate the response even though the write
        // finished long before.
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(
            fixture.objects.object_bytes(fixture.object_id()).expect("object"),
            b"ABCDEFGH"
        );
    }

    #[tokio::test]
    async fn chunked_upload_with_bad_signature_returns_403_and_saves_nothing() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        body.push(b"ABCD").await;
        body.push_chunk_detail(detail("sig-1", b"ABCD"));
        body.push_chunk_detail(detail("sig-2", b""));
        body.freeze();

        let response = fixture
            .chunked_action(chunked_request(1, 4, body), Box::new(RejectLast), 1024)
            .execute()
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let text = response_text(response).await;
        assert!(text.contains("<Code>SignatureDoesNotMatch</Code>"));
        let (state, _) = fixture.meta.get_part("upload-1", 1).await;
        assert_eq!(state, crate::meta::MetadataState::Missing);
    }

    #[tokio::test]
    async fn chunked_auth_failure_outranks_a_missing_bucket() {
        let fixture = Fixture::new();

        struct RejectAll;
        impl ChunkValidator for RejectAll {
            fn verify(&mut self, _signature: &str, _payload_hash: &str) -> bool {
                false
            }
        }

        let body = BufferedBody::new();
        body.push(b"ABCD").await;
        body.push_chunk_detail(detail("sig-1", b"ABCD"));
        body.push_chunk_detail(detail("sig-2", b""));
        body.freeze();

        let mut action = fixture.chunked_action(chunked_request(1, 4, body), Box::new(RejectAll), 1024);
        action.auth_failed = true;
        let response = action.execute().await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let text = response_text(response).await;
        assert!(text.contains("<Code>SignatureDoesNotMatch</Code>"));
    }

    #[tokio::test]
    async fn write_failure_returns_internal_error() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        body.push(b"doomed").await;
        body.freeze();

        let action = PutObjectPartAction::new(
            request(1, 6, body),
            fixture.meta.clone(),
            Arc::new(FailingBackend),
            1024,
            None,
        );
        let response = action.execute().await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = response_text(response).await;
        assert!(text.contains("<Code>InternalError</Code>"));
    }

    #[tokio::test]
    async fn chunked_upload_with_valid_chunks_succeeds() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        body.push(b"ABCD").await;
        body.push_chunk_detail(detail("sig-1", b"ABCD"));
        body.push_chunk_detail(detail("sig-2", b""));
        body.freeze();

        let response = fixture
            .chunked_action(chunked_request(1, 4, body), Box::new(AcceptAll), 1024)
            .execute()
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let (state, saved) = fixture.meta.get_part("upload-1", 1).await;
        assert_eq!(state, crate::meta::MetadataState::Present);
        assert_eq!(saved.expect("descriptor").content_length, 4);
    }

    #[tokio::test]
    async fn user_metadata_headers_land_in_the_descriptor() {
        let fixture = Fixture::new();
        fixture.seed_bucket_and_upload().await;

        let body = BufferedBody::new();
        body.push(b"x").await;
        body.freeze();

        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-origin", HeaderValue::from_static("camera"));
        let request = PartRequest::new(
            "req-1".to_string(),
            "photos".to_string(),
            "pic.jpg".to_string(),
            "upload-1".to_string(),
            1,
            headers,
            1,
            body,
        );
        let response = fixture.action(request).execute().await;
        assert_eq!(response.status(), StatusCode::OK);

        let (_, saved) = fixture.meta.get_part("upload-1", 1).await;
        let saved = saved.expect("descriptor");
        assert_eq!(
            saved.user_attributes.get("x-amz-meta-origin").map(String::as_str),
            Some("camera")
        );
    }

    async fn response_text(response: axum::response::Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(body.to_vec()).expect("utf8")
    }
}
