//! DeepL API translation client.
//! Text goes through `/v2/translate`; documents through the upload →
//! status poll → result download flow of `/v2/document`.
//! Connection pooling via reqwest, retry on 429/5xx/timeout, every wait
//! and read races the request's cancellation token.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    ProviderError, ProviderId, RequestPayload, TranslationRequest, TranslationResponse, Translator,
};

const PRO_BASE_URL: &str = "https://api.deepl.com";
const FREE_BASE_URL: &str = "https://api-free.deepl.com";

/// DeepL REST client.
pub struct DeepLClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    /// Delay between document status polls.
    poll_interval: Duration,
    /// First 5xx backoff step, doubled per attempt.
    backoff_base: Duration,
}

impl DeepLClient {
    /// Create a client. `base_url` overrides the endpoint picked from the
    /// key (free-tier keys end in `:fx`).
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::other("DeepL API key is not configured"));
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::other(e.to_string()))?;

        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| default_base_url(api_key).to_string());

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url,
            poll_interval: Duration::from_secs(1),
            backoff_base: Duration::from_millis(500),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_header(&self) -> String {
        format!("DeepL-Auth-Key {}", self.api_key)
    }

    async fn translate_text(
        &self,
        segments: &[String],
        from_lang: &str,
        to_lang: &str,
        cancel: &CancellationToken,
    ) -> Result<TranslationResponse, ProviderError> {
        if segments.is_empty() {
            return Ok(TranslationResponse::Text {
                translations: Vec::new(),
            });
        }

        let body = TextRequestBody {
            text: segments,
            target_lang: to_lang,
            source_lang: from_lang,
        };
        let url = format!("{}/v2/translate", self.base_url);
        let response = self
            .send_with_retry(
                || {
                    Ok(self
                        .http
                        .post(&url)
                        .header("Authorization", self.auth_header())
                        .json(&body))
                },
                cancel,
            )
            .await?;

        let parsed: TextResponseBody = read_json(response, cancel).await?;
        if parsed.translations.len() != segments.len() {
            return Err(ProviderError::other(format!(
                "expected {} translations, got {}",
                segments.len(),
                parsed.translations.len()
            )));
        }

        Ok(TranslationResponse::Text {
            translations: parsed.translations.into_iter().map(|t| t.text).collect(),
        })
    }

    async fn translate_document(
        &self,
        filename: &str,
        data: &[u8],
        from_lang: &str,
        to_lang: &str,
        cancel: &CancellationToken,
    ) -> Result<TranslationResponse, ProviderError> {
        // Upload
        let upload_url = format!("{}/v2/document", self.base_url);
        let response = self
            .send_with_retry(
                || {
                    let mut form = Form::new().text("target_lang", to_lang.to_string());
                    if !from_lang.is_empty() {
                        form = form.text("source_lang", from_lang.to_string());
                    }
                    let part = Part::bytes(data.to_vec()).file_name(filename.to_string());
                    form = form.part("file", part);
                    Ok(self
                        .http
                        .post(&upload_url)
                        .header("Authorization", self.auth_header())
                        .multipart(form))
                },
                cancel,
            )
            .await?;
        let handle: DocumentHandle = read_json(response, cancel).await?;
        debug!(document_id = %handle.document_id, bytes = data.len(), "document uploaded");

        // Poll until done
        let status_url = format!("{}/v2/document/{}", self.base_url, handle.document_id);
        let key_body = DocumentKeyBody {
            document_key: &handle.document_key,
        };
        loop {
            let response = self
                .send_with_retry(
                    || {
                        Ok(self
                            .http
                            .post(&status_url)
                            .header("Authorization", self.auth_header())
                            .json(&key_body))
                    },
                    cancel,
                )
                .await?;
            let status: DocumentStatus = read_json(response, cancel).await?;
            match status.status.as_str() {
                "done" => break,
                "error" => {
                    let message = status
                        .error_message
                        .unwrap_or_else(|| "document translation failed".to_string());
                    return Err(classify_message(&message));
                }
                other => {
                    debug!(
                        document_id = %handle.document_id,
                        status = other,
                        seconds_remaining = status.seconds_remaining,
                        "document not ready"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
                    }
                }
            }
        }

        // Download
        let result_url = format!("{status_url}/result");
        let response = self
            .send_with_retry(
                || {
                    Ok(self
                        .http
                        .post(&result_url)
                        .header("Authorization", self.auth_header())
                        .json(&key_body))
                },
                cancel,
            )
            .await?;
        let translated = read_bytes(response, cancel).await?;

        Ok(TranslationResponse::File {
            filename: filename.to_string(),
            data: translated,
        })
    }

    /// Send request with retry logic.
    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry<B>(
        &self,
        build: B,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProviderError>
    where
        B: Fn() -> Result<reqwest::RequestBuilder, ProviderError>,
    {
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 3;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::cancelled());
            }

            let request = build()?;
            let result = tokio::select! {
                result = request.send() => result,
                _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
            };

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp);
                }
                Ok(resp) if resp.status().as_u16() == 429 => {
                    if attempt >= max_429_retries {
                        return Err(ProviderError::retryable("rate limited by DeepL"));
                    }
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    self.wait(wait, cancel).await?;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(ProviderError::retryable(format!(
                            "DeepL server error: {}",
                            resp.status()
                        )));
                    }
                    let wait = self.backoff_base * (1 << attempt);
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    self.wait(wait, cancel).await?;
                    attempt += 1;
                }
                Ok(resp) => {
                    return Err(error_from_response(resp).await);
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(ProviderError::retryable("DeepL request timed out"));
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => {
                    return Err(ProviderError::retryable(format!("DeepL transport error: {e}")));
                }
            }
        }
    }

    async fn wait(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.cancelled() => Err(ProviderError::cancelled()),
        }
    }
}

#[async_trait]
impl Translator for DeepLClient {
    fn provider(&self) -> ProviderId {
        ProviderId::DeepL
    }

    async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<TranslationResponse, ProviderError> {
        match &request.payload {
            RequestPayload::Text(segments) => {
                self.translate_text(segments, &request.from_lang, &request.to_lang, cancel)
                    .await
            }
            RequestPayload::File { filename, data } => {
                self.translate_document(
                    filename,
                    data,
                    &request.from_lang,
                    &request.to_lang,
                    cancel,
                )
                .await
            }
        }
    }
}

/// Endpoint matching the key's plan.
pub fn default_base_url(api_key: &str) -> &'static str {
    if api_key.ends_with(":fx") {
        FREE_BASE_URL
    } else {
        PRO_BASE_URL
    }
}

/// Map a DeepL validation message to the typed error surface.
fn classify_message(message: &str) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("source_lang") || lower.contains("invalid source language") {
        ProviderError::InvalidSource(message.to_string())
    } else if lower.contains("target_lang") || lower.contains("invalid target language") {
        ProviderError::InvalidTarget(message.to_string())
    } else {
        ProviderError::other(message.to_string())
    }
}

async fn error_from_response(resp: reqwest::Response) -> ProviderError {
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body_text) {
        Ok(ErrorBody {
            message,
            detail: Some(detail),
        }) => format!("{message} {detail}"),
        Ok(ErrorBody { message, detail: None }) => message,
        Err(_) => body_text.chars().take(200).collect(),
    };

    match status.as_u16() {
        400 => classify_message(&message),
        403 => ProviderError::other(format!("DeepL authorization failed: {message}")),
        413 => ProviderError::other(format!("payload too large for DeepL: {message}")),
        456 => ProviderError::other(format!("DeepL quota exceeded: {message}")),
        _ => ProviderError::other(format!("unexpected status {status}: {message}")),
    }
}

async fn read_bytes(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, ProviderError> {
    let mut out = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = tokio::select! {
        chunk = stream.next() => chunk,
        _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
    } {
        let bytes = chunk.map_err(|e| ProviderError::retryable(format!("DeepL read error: {e}")))?;
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<T, ProviderError> {
    let bytes = read_bytes(response, cancel).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::other(format!("unexpected DeepL response: {e}")))
}

// --- Wire types ---

#[derive(Serialize)]
struct TextRequestBody<'a> {
    text: &'a [String],
    target_lang: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    source_lang: &'a str,
}

#[derive(Deserialize)]
struct TextResponseBody {
    translations: Vec<TextTranslation>,
}

#[derive(Deserialize)]
struct TextTranslation {
    text: String,
}

#[derive(Deserialize)]
struct DocumentHandle {
    document_id: String,
    document_key: String,
}

#[derive(Serialize)]
struct DocumentKeyBody<'a> {
    document_key: &'a str,
}

#[derive(Deserialize)]
struct DocumentStatus {
    status: String,
    #[serde(default)]
    seconds_remaining: Option<u64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    detail: Option<String>,
}
