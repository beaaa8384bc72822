//! Translation module: request/response model, provider adapter seam,
//! fingerprinting, result cache backends and the request pipeline.

pub mod cache;
pub mod deepl;
pub mod fingerprint;
pub mod redis_cache;
pub mod service;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Upstream translation vendors known to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    DeepL,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::DeepL => write!(f, "deepl"),
        }
    }
}

/// Input of a translation, either independent text segments or one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    Text(Vec<String>),
    File { filename: String, data: Vec<u8> },
}

impl RequestPayload {
    pub fn format_tag(&self) -> &'static str {
        match self {
            RequestPayload::Text(_) => "text",
            RequestPayload::File { .. } => "file",
        }
    }

    /// Number of payload bytes that would be hashed and cached.
    pub fn byte_len(&self) -> usize {
        match self {
            RequestPayload::Text(segments) => segments.iter().map(String::len).sum(),
            RequestPayload::File { data, .. } => data.len(),
        }
    }
}

/// The cacheable unit. `from_lang` empty means auto-detect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub provider: ProviderId,
    pub from_lang: String,
    pub to_lang: String,
    pub payload: RequestPayload,
}

impl TranslationRequest {
    pub fn text(
        provider: ProviderId,
        from_lang: &str,
        to_lang: &str,
        segments: Vec<String>,
    ) -> Self {
        Self {
            provider,
            from_lang: from_lang.to_string(),
            to_lang: to_lang.to_string(),
            payload: RequestPayload::Text(segments),
        }
    }

    pub fn file(
        provider: ProviderId,
        from_lang: &str,
        to_lang: &str,
        filename: String,
        data: Vec<u8>,
    ) -> Self {
        Self {
            provider,
            from_lang: from_lang.to_string(),
            to_lang: to_lang.to_string(),
            payload: RequestPayload::File { filename, data },
        }
    }
}

/// Translation result. Serialized with an explicit tag so cached values
/// round-trip to the right variant; file bytes are stored as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranslationResponse {
    Text { translations: Vec<String> },
    File {
        filename: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl TranslationResponse {
    pub fn byte_len(&self) -> usize {
        match self {
            TranslationResponse::Text { translations } => {
                translations.iter().map(String::len).sum()
            }
            TranslationResponse::File { data, .. } => data.len(),
        }
    }

    /// Whether this response has the shape a reply to `payload` must have:
    /// same variant, and for text the same number of segments.
    pub fn matches(&self, payload: &RequestPayload) -> bool {
        match (self, payload) {
            (TranslationResponse::Text { translations }, RequestPayload::Text(segments)) => {
                translations.len() == segments.len()
            }
            (TranslationResponse::File { .. }, RequestPayload::File { .. }) => true,
            _ => false,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Errors reported by a provider adapter. The pipeline maps the two
/// language variants to client errors and everything else to 500.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Invalid Source Language: {0}")]
    InvalidSource(String),
    #[error("Invalid Target Language: {0}")]
    InvalidTarget(String),
    #[error("{message}")]
    Other { message: String, retryable: bool },
}

impl ProviderError {
    pub fn other(message: impl Into<String>) -> Self {
        ProviderError::Other {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        ProviderError::Other {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn cancelled() -> Self {
        Self::retryable("translation cancelled")
    }
}

/// Adapter over one translation vendor.
#[async_trait]
pub trait Translator: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Translate `request`. Implementations stop and return an error once
    /// `cancel` fires; partial results are discarded.
    async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<TranslationResponse, ProviderError>;
}
