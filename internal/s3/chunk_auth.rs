use super::errors::S3Error;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};

const STREAMING_ALGORITHM: &str = "AWS4-HMAC-SHA256-PAYLOAD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    Failure,
}

// One rolling verification step. Implementations must tolerate being driven
// from a dedicated task; chunks arrive in body order.
pub trait ChunkValidator: Send + 'static {
    fn verify(&mut self, signature: &str, payload_hash: &str) -> bool;
}

// Credential material the chunk chain needs, lifted from the request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingAuthContext {
    pub access_key: String,
    pub credential_scope: String,
    pub amz_date: String,
    pub seed_signature: String,
}

pub fn parse_streaming_auth(headers: &HeaderMap) -> Result<StreamingAuthContext, S3Error> {
    let auth_header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or(S3Error::AccessDenied)?;
    let mut parts = auth_header.splitn(2, ' ');
    let _algorithm = parts.next().unwrap_or("");
    let params = parse_auth_params(parts.next().unwrap_or(""));
    let credential = params.get("Credential").ok_or(S3Error::AccessDenied)?;
    let mut credential_parts = credential.split('/');
    let access_key = credential_parts.next().unwrap_or("");
    if access_key.is_empty() {
        return Err(S3Error::AccessDenied);
    }
    let credential_scope = credential_parts.collect::<Vec<&str>>().join("/");
    let seed_signature = params
        .get("Signature")
        .cloned()
        .ok_or(S3Error::AccessDenied)?;
    let amz_date = headers
        .get("x-amz-date")
        .and_then(|value| value.to_str().ok())
        .ok_or(S3Error::AccessDenied)?
        .to_string();
    if chrono::NaiveDateTime::parse_from_str(&amz_date, "%Y%m%dT%H%M%SZ").is_err() {
        return Err(S3Error::AccessDenied);
    }
    Ok(StreamingAuthContext {
        access_key: access_key.to_string(),
        credential_scope,
        amz_date,
        seed_signature,
    })
}

fn parse_auth_params(params_str: &str) -> std::collections::HashMap<String, String> {
    params_str
        .split(',')
        .filter_map(|kv| {
            let mut iter = kv.trim().splitn(2, '=');
            let key = iter.next().unwrap_or("").trim();
            let value = iter.next()?.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

// Rolling signature chain over the chunk stream: every chunk signs the
// previous signature, so chunks verify only in arrival order and the final
// zero-size chunk fixes the whole chain.
pub struct SignatureChain {
    signing_key: Vec<u8>,
    amz_date: String,
    credential_scope: String,
    previous_signature: String,
    empty_hash: String,
}

impl SignatureChain {
    pub fn new(secret: &str, context: &StreamingAuthContext) -> Result<Self, S3Error> {
        let signing_key = derive_signing_key(secret, &context.credential_scope)?;
        Ok(Self {
            signing_key,
            amz_date: context.amz_date.clone(),
            credential_scope: context.credential_scope.clone(),
            previous_signature: context.seed_signature.clone(),
            empty_hash: hex::encode(Sha256::digest(b"")),
        })
    }

    pub fn expected_signature(&self, payload_hash: &str) -> String {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            STREAMING_ALGORITHM,
            self.amz_date,
            self.credential_scope,
            self.previous_signature,
            self.empty_hash,
            payload_hash
        );
        hex::encode(sign(&self.signing_key, string_to_sign.as_bytes()))
    }
}

impl ChunkValidator for SignatureChain {
    fn verify(&mut self, signature: &str, payload_hash: &str) -> bool {
        let expected = self.expected_signature(payload_hash);
        if expected != signature {
            return false;
        }
        self.previous_signature = expected;
        true
    }
}

fn derive_signing_key(secret: &str, credential_scope: &str) -> Result<Vec<u8>, S3Error> {
    let scope_parts: Vec<&str> = credential_scope.split('/').collect();
    if scope_parts.len() < 4 {
        return Err(S3Error::AccessDenied);
    }
    let date = scope_parts[0];
    let region = scope_parts[1];
    let service = scope_parts[2];
    if date.is_empty() || region.is_empty() || service.is_empty() {
        return Err(S3Error::AccessDenied);
    }
    let mut key = sign(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    key = sign(&key, region.as_bytes());
    key = sign(&key, service.as_bytes());
    key = sign(&key, b"aws4_request");
    Ok(key)
}

fn sign(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

enum AuthEvent {
    Checksum {
        signature: String,
        payload_hash: String,
    },
    LastChecksum {
        signature: String,
        payload_hash: String,
    },
}

// Drives a validator on its own task so verification genuinely interleaves
// with object writes; the joined outcome is observed through a watch channel.
pub struct ChunkAuthClient {
    events: mpsc::UnboundedSender<AuthEvent>,
    outcome: watch::Receiver<Option<AuthOutcome>>,
}

pub fn init_chunk_auth_cycle(mut validator: Box<dyn ChunkValidator>) -> ChunkAuthClient {
    let (events, mut event_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome) = watch::channel(None);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                AuthEvent::Checksum {
                    signature,
                    payload_hash,
                } => {
                    if !validator.verify(&signature, &payload_hash) {
                        let _ = outcome_tx.send(Some(AuthOutcome::Failure));
                        return;
                    }
                }
                AuthEvent::LastChecksum {
                    signature,
                    payload_hash,
                } => {
                    let outcome = if validator.verify(&signature, &payload_hash) {
                        AuthOutcome::Success
                    } else {
                        AuthOutcome::Failure
                    };
                    let _ = outcome_tx.send(Some(outcome));
                    return;
                }
            }
        }
    });
    ChunkAuthClient { events, outcome }
}

impl ChunkAuthClient {
    pub fn add_checksum_for_chunk(&self, signature: String, payload_hash: String) {
        let _ = self.events.send(AuthEvent::Checksum {
            signature,
            payload_hash,
        });
    }

    pub fn add_last_checksum_for_chunk(&self, signature: String, payload_hash: String) {
        let _ = self.events.send(AuthEvent::LastChecksum {
            signature,
            payload_hash,
        });
    }

    pub fn try_outcome(&self) -> Option<AuthOutcome> {
        *self.outcome.borrow()
    }

    pub async fn outcome(&mut self) -> AuthOutcome {
        loop {
            if let Some(outcome) = *self.outcome.borrow() {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                // Verifier task went away without a verdict.
                return AuthOutcome::Failure;
            }
        }
    }
}
