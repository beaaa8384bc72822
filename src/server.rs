//! HTTP surface: `GET /api/health` and `POST /api/deepl/translate`.
//! Translate requests are dispatched on the base media type: JSON bodies
//! take the text path, multipart forms the document path.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cancellation::RequestScope;
use crate::state_machine::{PipelineState, RequestStateMachine};
use crate::translate::service::{CacheStatus, PipelineError, Translated};
use crate::translate::{ProviderError, TranslationRequest, TranslationResponse};
use crate::AppContext;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// How a translate request body is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Json,
    Multipart,
}

/// Classify a Content-Type header by its base media type, ignoring
/// parameters and case. `None` for anything unsupported.
pub fn classify_content_type(content_type: &str) -> Option<RequestKind> {
    let base = content_type.split(';').next().unwrap_or("").trim();
    if base.eq_ignore_ascii_case("application/json") {
        Some(RequestKind::Json)
    } else if base.eq_ignore_ascii_case("multipart/form-data") {
        Some(RequestKind::Multipart)
    } else {
        None
    }
}

/// Errors surfaced to clients, always as short plain-text bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Error translating: Invalid Source Language")]
    InvalidSourceLanguage,
    #[error("Error translating: Invalid Target Language")]
    InvalidTargetLanguage,
    #[error("Error translating")]
    Upstream,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::InvalidSourceLanguage
            | ApiError::InvalidTargetLanguage => StatusCode::BAD_REQUEST,
            ApiError::Upstream | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Malformed(msg) => {
                info!(reason = %msg, "rejected malformed request");
                ApiError::BadRequest(msg)
            }
            PipelineError::Upstream(ProviderError::InvalidSource(detail)) => {
                info!(detail = %detail, "upstream rejected source language");
                ApiError::InvalidSourceLanguage
            }
            PipelineError::Upstream(ProviderError::InvalidTarget(detail)) => {
                info!(detail = %detail, "upstream rejected target language");
                ApiError::InvalidTargetLanguage
            }
            PipelineError::Upstream(ProviderError::Other { message, retryable }) => {
                warn!(error = %message, retryable, "Error translating");
                ApiError::Upstream
            }
            PipelineError::Internal(msg) => {
                warn!(error = %msg, "internal pipeline error");
                ApiError::Internal("internal error".into())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), [(CONTENT_TYPE, TEXT_PLAIN)], self.to_string()).into_response()
    }
}

/// Build the router. The body limit layer caps document uploads.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let upload_limit = ctx.max_upload_bytes;
    Router::new()
        .route("/api/health", get(health))
        .route("/api/deepl/translate", post(translate))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(ctx)
}

/// Serve `router(ctx)` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    ctx: Arc<AppContext>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> impl IntoResponse {
    ([(CONTENT_TYPE, TEXT_PLAIN)], "OK")
}

async fn translate(State(ctx): State<Arc<AppContext>>, request: Request) -> Response {
    let request_id = Uuid::new_v4();
    let kind = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(classify_content_type);

    let Some(kind) = kind else {
        info!(%request_id, "unsupported content type");
        return ApiError::BadRequest("unsupported content type".into()).into_response();
    };

    let span = info_span!("translate", %request_id, kind = ?kind);
    async move {
        let mut state = RequestStateMachine::new();
        let scope = RequestScope::new(ctx.request_timeout);
        if let Err(msg) = state.transition(PipelineState::Classified) {
            return ApiError::Internal(msg).into_response();
        }

        let result = match kind {
            RequestKind::Json => text_translate(&ctx, request, &scope, &mut state).await,
            RequestKind::Multipart => file_translate(&ctx, request, &scope, &mut state).await,
        };
        match result {
            Ok(response) => response,
            Err(err) => {
                state.fail();
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

#[derive(Deserialize)]
struct TextParams {
    text: Vec<String>,
    #[serde(default)]
    source_lang: String,
    #[serde(default)]
    target_lang: String,
}

#[derive(Serialize)]
struct TextReply<'a> {
    translation: &'a [String],
}

async fn text_translate(
    ctx: &AppContext,
    request: Request,
    scope: &RequestScope,
    state: &mut RequestStateMachine,
) -> Result<Response, ApiError> {
    let limit = ctx.max_upload_bytes;
    let body = scope
        .run(axum::body::to_bytes(request.into_body(), limit))
        .await
        .map_err(|aborted| ApiError::BadRequest(aborted.to_string()))?
        .map_err(|e| {
            info!(error = %e, "failed to read request body");
            ApiError::BadRequest("Invalid JSON in the request body".into())
        })?;

    let params: TextParams = serde_json::from_slice(&body).map_err(|e| {
        info!(error = %e, "Error decoding parameters");
        ApiError::BadRequest("Invalid JSON in the request body".into())
    })?;

    let translation_request = TranslationRequest::text(
        ctx.service.provider_id(),
        &params.source_lang,
        &params.target_lang,
        params.text,
    );
    let translated = ctx
        .service
        .translate(translation_request, scope, state)
        .await?;
    text_reply(translated)
}

fn text_reply(translated: Translated) -> Result<Response, ApiError> {
    let TranslationResponse::Text { translations } = &translated.response else {
        return Err(ApiError::Internal("unexpected response kind".into()));
    };
    let body = serde_json::to_vec(&TextReply {
        translation: translations,
    })
    .map_err(|e| {
        warn!(error = %e, "Error marshalling JSON");
        ApiError::Internal("Error marshalling JSON".into())
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(X_CACHE, cache_header(translated.cache));
    Ok((StatusCode::OK, headers, body).into_response())
}

struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    source_lang: String,
    target_lang: String,
}

async fn file_translate(
    ctx: &AppContext,
    request: Request,
    scope: &RequestScope,
    state: &mut RequestStateMachine,
) -> Result<Response, ApiError> {
    let limit = ctx.max_upload_bytes;
    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        info!(declared, limit, "upload exceeds body limit");
        return Err(ApiError::BadRequest("file too large".into()));
    }

    let multipart = Multipart::from_request(request, &()).await.map_err(|e| {
        info!(error = %e, "invalid multipart request");
        ApiError::BadRequest("invalid multipart form".into())
    })?;
    let form = scope
        .run(read_upload_form(multipart))
        .await
        .map_err(|aborted| ApiError::BadRequest(aborted.to_string()))??;

    let Some((filename, data)) = form.file else {
        info!("multipart form without file");
        return Err(ApiError::BadRequest("file required".into()));
    };

    let translation_request = TranslationRequest::file(
        ctx.service.provider_id(),
        &form.source_lang,
        &form.target_lang,
        filename.clone(),
        data,
    );
    let translated = ctx
        .service
        .translate(translation_request, scope, state)
        .await?;
    file_reply(translated, &filename)
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm {
        file: None,
        source_lang: String::new(),
        target_lang: String::new(),
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") if form.file.is_none() => {
                let Some(filename) = field.file_name().map(base_name) else {
                    continue;
                };
                let data = field.bytes().await.map_err(multipart_error)?;
                form.file = Some((filename, data.to_vec()));
            }
            Some("source_lang") if form.source_lang.is_empty() => {
                form.source_lang = field.text().await.map_err(multipart_error)?;
            }
            Some("target_lang") if form.target_lang.is_empty() => {
                form.target_lang = field.text().await.map_err(multipart_error)?;
            }
            _ => {}
        }
    }
    Ok(form)
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    info!(error = %err, "failed to read multipart body");
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::BadRequest("file too large".into())
    } else {
        ApiError::BadRequest("invalid multipart form".into())
    }
}

fn file_reply(translated: Translated, original_name: &str) -> Result<Response, ApiError> {
    let TranslationResponse::File { data, .. } = translated.response else {
        return Err(ApiError::Internal("unexpected response kind".into()));
    };
    let disposition = format!(
        "attachment; filename=\"translated_{}\"",
        disposition_safe(original_name)
    );
    let disposition = HeaderValue::from_str(&disposition).map_err(|e| {
        warn!(error = %e, "unrepresentable filename");
        ApiError::Internal("failed to write response".into())
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_DISPOSITION, disposition);
    headers.insert(X_CACHE, cache_header(translated.cache));
    Ok((StatusCode::OK, headers, Body::from(data)).into_response())
}

fn cache_header(status: CacheStatus) -> HeaderValue {
    HeaderValue::from_static(status.as_str())
}

/// Last path component of a client-supplied filename.
fn base_name(name: &str) -> String {
    let last = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    Path::new(last)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(last)
        .to_string()
}

fn disposition_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_matches_base_type() {
        assert_eq!(classify_content_type("application/json"), Some(RequestKind::Json));
        assert_eq!(
            classify_content_type("application/json; charset=utf-8"),
            Some(RequestKind::Json)
        );
        assert_eq!(
            classify_content_type("multipart/form-data; boundary=xyz"),
            Some(RequestKind::Multipart)
        );
        assert_eq!(classify_content_type("Multipart/Form-Data"), Some(RequestKind::Multipart));
        assert_eq!(classify_content_type("text/plain"), None);
        assert_eq!(classify_content_type("application/jsonx"), None);
        assert_eq!(classify_content_type(""), None);
    }

    #[test]
    fn upload_names_are_reduced_to_base_name() {
        assert_eq!(base_name("doc.docx"), "doc.docx");
        assert_eq!(base_name("/tmp/x/doc.docx"), "doc.docx");
        assert_eq!(base_name("C:\\Users\\me\\notes.txt"), "notes.txt");
    }

    #[test]
    fn disposition_strips_quotes_and_controls() {
        assert_eq!(disposition_safe("a\"b\\c\n.txt"), "a_b_c_.txt");
        assert_eq!(disposition_safe("résumé.docx"), "résumé.docx");
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidSourceLanguage.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::InvalidSourceLanguage.to_string(),
            "Error translating: Invalid Source Language"
        );
        assert_eq!(ApiError::Upstream.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let mapped: ApiError =
            PipelineError::Upstream(ProviderError::InvalidTarget("t".into())).into();
        assert_eq!(mapped.to_string(), "Error translating: Invalid Target Language");
    }
}
