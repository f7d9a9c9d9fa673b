use crate::action::put_part::PutObjectPartAction;
use crate::api::AppState;
use crate::s3::chunk_auth::{parse_streaming_auth, ChunkValidator, SignatureChain};
use crate::s3::chunked::ChunkedDecoder;
use crate::s3::errors::{s3_error, S3Error};
use crate::s3::request::{
    declared_content_length, detect_chunked, BufferedBody, ChunkDetail, PartRequest,
};
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use uuid::Uuid;

pub mod chunk_auth;
pub mod chunked;
pub mod errors;
pub mod request;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{bucket}/{*key}", any(object_handler))
        .with_state(state)
}

async fn object_handler(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    body: Body,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let object = percent_decode_str(&key).decode_utf8_lossy().to_string();
    let query: HashMap<String, String> =
        serde_urlencoded::from_str(raw_query.as_deref().unwrap_or("")).unwrap_or_default();

    let context = ObjectRequestContext {
        state: &state,
        request_id,
        bucket,
        object,
        headers,
    };
    let response = dispatch_object_request(context, &method, &query, body).await;
    record_s3_request(&state, "UploadPart", &response);
    response
}

struct ObjectRequestContext<'a> {
    state: &'a AppState,
    request_id: String,
    bucket: String,
    object: String,
    headers: HeaderMap,
}

impl ObjectRequestContext<'_> {
    fn resource(&self) -> String {
        format!("/{}/{}", self.bucket, self.object)
    }
}

async fn dispatch_object_request(
    context: ObjectRequestContext<'_>,
    method: &Method,
    query: &HashMap<String, String>,
    body: Body,
) -> Response {
    let resource = context.resource();
    let Some(upload_id) = query.get("uploadId") else {
        return s3_error(S3Error::NotImplemented, &context.request_id, &resource);
    };
    if *method != Method::PUT {
        return s3_error(S3Error::MethodNotAllowed, &context.request_id, &resource);
    }
    let Some(part_number) = query
        .get("partNumber")
        .and_then(|value| value.parse::<u32>().ok())
    else {
        return s3_error(S3Error::InvalidRequest, &context.request_id, &resource);
    };
    if !(1..=10000).contains(&part_number) {
        return s3_error(S3Error::InvalidRequest, &context.request_id, &resource);
    }
    upload_part(context, upload_id.clone(), part_number, body).await
}

async fn upload_part(
    context: ObjectRequestContext<'_>,
    upload_id: String,
    part_number: u32,
    body: Body,
) -> Response {
    let resource = context.resource();
    let chunked = detect_chunked(&context.headers);
    let Some(content_length) = declared_content_length(&context.headers, chunked) else {
        return s3_error(S3Error::InvalidRequest, &context.request_id, &resource);
    };

    let validator = match build_chunk_validator(context.state, &context.headers, chunked) {
        Ok(validator) => validator,
        Err(err) => return s3_error(err, &context.request_id, &resource),
    };

    let buffered = BufferedBody::new();
    let feeder = tokio::spawn(feed_body(body, buffered.clone(), chunked));

    record_s3_bytes_in(context.state, "UploadPart", content_length);
    let request = PartRequest::new(
        context.request_id,
        context.bucket,
        context.object,
        upload_id,
        part_number,
        context.headers,
        content_length,
        buffered,
    );
    let action = PutObjectPartAction::new(
        request,
        context.state.meta.clone(),
        context.state.objects.clone(),
        context.state.config.write_payload_bytes,
        validator,
    );
    let response = action.execute().await;
    feeder.abort();
    response
}

fn build_chunk_validator(
    state: &AppState,
    headers: &HeaderMap,
    chunked: bool,
) -> Result<Option<Box<dyn ChunkValidator>>, S3Error> {
    if !chunked {
        return Ok(None);
    }
    let auth_context = parse_streaming_auth(headers)?;
    if auth_context.access_key != state.config.access_key_id {
        return Err(S3Error::AccessDenied);
    }
    let chain = SignatureChain::new(&state.config.secret_access_key, &auth_context)?;
    Ok(Some(Box::new(chain)))
}

// Streams HTTP frames into the action's buffer, unwrapping aws-chunked
// framing on the way. Chunk details trail their payload bytes, so every
// detail the action sees covers bytes already buffered.
async fn feed_body(body: Body, buffered: BufferedBody, chunked: bool) {
    let mut stream = body.into_data_stream();
    let mut decoder = if chunked {
        Some(ChunkedDecoder::new())
    } else {
        None
    };
    while let Some(frame) = stream.next().await {
        let Ok(data) = frame else {
            tracing::warn!("request body stream broke mid-transfer");
            break;
        };
        match &mut decoder {
            Some(decoder) => {
                let out = match decoder.feed(&data) {
                    Ok(out) => out,
                    Err(err) => {
                        tracing::warn!(error = %err.0, "aws-chunked body failed to decode");
                        break;
                    }
                };
                if !out.payload.is_empty() {
                    buffered.push(&out.payload).await;
                }
                for detail in out.details {
                    buffered.push_chunk_detail(detail);
                }
                if out.finished {
                    break;
                }
            }
            None => buffered.push(&data).await,
        }
    }
    if let Some(decoder) = &decoder {
        if !decoder.is_finished() {
            // The stream never produced a verifiable terminal chunk; an empty
            // checksum can never match, so the chain fails instead of hanging.
            buffered.push_chunk_detail(ChunkDetail {
                signature: String::new(),
                payload_hash: String::new(),
                size: 0,
            });
        }
    }
    buffered.freeze();
}

fn record_s3_request(state: &AppState, op: &str, response: &Response) {
    let status = response.status().as_u16().to_string();
    state
        .metrics
        .s3_requests
        .with_label_values(&[op, &status])
        .inc();
}

fn record_s3_bytes_in(state: &AppState, op: &str, bytes: u64) {
    state
        .metrics
        .s3_bytes_in
        .with_label_values(&[op])
        .inc_by(bytes);
}
