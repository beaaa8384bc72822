//! Cache key derivation.
//! Key: `translate:{provider}:{from}:{to}:{hex(sha256(payload))}`.
//! Text segments are framed as `u64` big-endian length + bytes so that
//! segment boundaries are part of the hash; files hash their raw bytes.

use sha2::{Digest, Sha256};

use super::{RequestPayload, TranslationRequest};

/// Compute the cache key for a translation request. Pure and deterministic.
pub fn cache_key(request: &TranslationRequest) -> String {
    format!(
        "translate:{}:{}:{}:{}",
        request.provider,
        request.from_lang,
        request.to_lang,
        payload_digest(&request.payload)
    )
}

fn payload_digest(payload: &RequestPayload) -> String {
    let mut hasher = Sha256::new();
    match payload {
        RequestPayload::Text(segments) => {
            for segment in segments {
                hasher.update((segment.len() as u64).to_be_bytes());
                hasher.update(segment.as_bytes());
            }
        }
        RequestPayload::File { data, .. } => hasher.update(data),
    }
    hex::encode(hasher.finalize())
}
