//! Translation pipeline: validate → fingerprint → cache lookup → provider
//! → cache write-back. The cache is an optimization only: lookup failures
//! count as misses and write failures are logged, never surfaced.
//!
//! The cache key carries no caller identity. Translations are treated as
//! pure functions of (languages, payload), so one entry serves every user.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::cache::{CacheError, CacheStore};
use super::fingerprint;
use super::{
    ProviderError, ProviderId, RequestPayload, TranslationRequest, TranslationResponse, Translator,
};
use crate::cancellation::RequestScope;
use crate::state_machine::{PipelineState, RequestStateMachine};

/// Default bound on a single cache `get` or `set`.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(500);

/// Document extensions the provider accepts.
pub const ALLOWED_DOCUMENT_EXTENSIONS: [&str; 3] = ["srt", "txt", "docx"];

/// Builds the provider adapter on first use.
pub type TranslatorFactory =
    Box<dyn Fn() -> Result<Arc<dyn Translator>, ProviderError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Translated {
    pub response: TranslationResponse,
    pub cache: CacheStatus,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Malformed(String),
    #[error("upstream: {0}")]
    Upstream(#[from] ProviderError),
    #[error("internal: {0}")]
    Internal(String),
}

pub struct TranslationService {
    provider_id: ProviderId,
    factory: TranslatorFactory,
    translator: OnceCell<Arc<dyn Translator>>,
    cache: Arc<dyn CacheStore>,
    max_cacheable_bytes: usize,
    cache_timeout: Duration,
}

impl TranslationService {
    pub fn new(
        provider_id: ProviderId,
        factory: TranslatorFactory,
        cache: Arc<dyn CacheStore>,
        max_cacheable_bytes: usize,
    ) -> Self {
        Self {
            provider_id,
            factory,
            translator: OnceCell::new(),
            cache,
            max_cacheable_bytes,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
        }
    }

    /// Bound on each cache operation, independent of the request deadline.
    /// An operation that runs over counts as a failed one.
    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    /// Provider handle, constructed once. A failed construction is not
    /// remembered; the next request tries again.
    async fn translator(&self) -> Result<Arc<dyn Translator>, ProviderError> {
        self.translator
            .get_or_try_init(|| async {
                let translator = (self.factory)()?;
                info!(provider = %translator.provider(), "translation provider initialized");
                Ok::<_, ProviderError>(translator)
            })
            .await
            .cloned()
    }

    /// Run one request through the pipeline. `state` must be `Classified`.
    pub async fn translate(
        &self,
        request: TranslationRequest,
        scope: &RequestScope,
        state: &mut RequestStateMachine,
    ) -> Result<Translated, PipelineError> {
        let result = self.run_pipeline(request, scope, state).await;
        if result.is_err() {
            state.fail();
        }
        result
    }

    async fn run_pipeline(
        &self,
        request: TranslationRequest,
        scope: &RequestScope,
        state: &mut RequestStateMachine,
    ) -> Result<Translated, PipelineError> {
        validate(&request)?;
        advance(state, PipelineState::Validated)?;

        let key = fingerprint::cache_key(&request);
        let payload_bytes = request.payload.byte_len();
        let cacheable = payload_bytes <= self.max_cacheable_bytes;

        advance(state, PipelineState::CacheConsult)?;
        if cacheable {
            let lookup = self.cache_stage(scope, self.cache.get(&key)).await;
            match lookup {
                Ok(Some(cached)) if cached.matches(&request.payload) => {
                    advance(state, PipelineState::HitTerminal)?;
                    info!(key = %key, "cache HIT");
                    return Ok(Translated {
                        response: cached,
                        cache: CacheStatus::Hit,
                    });
                }
                Ok(Some(_)) => {
                    warn!(key = %key, "cached value does not fit the request, ignoring");
                }
                Ok(None) => debug!(key = %key, "cache MISS"),
                Err(e) => warn!(error = %e, "cache get failed, treating as miss"),
            }
        } else {
            debug!(
                bytes = payload_bytes,
                limit = self.max_cacheable_bytes,
                "payload above cache limit, bypassing cache"
            );
        }

        advance(state, PipelineState::Forwarding)?;
        let translator = self.translator().await?;
        let response = match scope.run(translator.translate(&request, scope.token())).await {
            Ok(result) => result?,
            Err(aborted) => return Err(ProviderError::retryable(aborted.to_string()).into()),
        };
        if !response.matches(&request.payload) {
            let err = ProviderError::other("provider response does not match request shape");
            return Err(err.into());
        }

        if cacheable && response.byte_len() <= self.max_cacheable_bytes {
            let write = self.cache_stage(scope, self.cache.set(&key, &response)).await;
            if let Err(e) = write {
                warn!(error = %e, "cache set failed");
            }
        }

        advance(state, PipelineState::Responded)?;
        Ok(Translated {
            response,
            cache: CacheStatus::Miss,
        })
    }

    /// Run a cache operation under both the request scope and the cache timeout.
    async fn cache_stage<F, T>(&self, scope: &RequestScope, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match scope.run(tokio::time::timeout(self.cache_timeout, op)).await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(CacheError::Timeout(self.cache_timeout)),
            Err(aborted) => Err(CacheError::Aborted(aborted.to_string())),
        }
    }
}

fn advance(state: &mut RequestStateMachine, next: PipelineState) -> Result<(), PipelineError> {
    state.transition(next).map(|_| ()).map_err(PipelineError::Internal)
}

/// Reject requests that can never succeed before any cache or provider work.
pub fn validate(request: &TranslationRequest) -> Result<(), PipelineError> {
    match &request.payload {
        RequestPayload::Text(segments) => {
            if segments.is_empty() {
                return Err(PipelineError::Malformed("no text to translate".into()));
            }
        }
        RequestPayload::File { filename, .. } => {
            if !is_allowed_document(filename) {
                return Err(PipelineError::Malformed("invalid file type".into()));
            }
            if request.to_lang.is_empty() {
                return Err(PipelineError::Malformed("invalid form no target language".into()));
            }
        }
    }
    Ok(())
}

/// Whether `filename` ends in one of the accepted document extensions
/// (compared case-insensitively).
pub fn is_allowed_document(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_DOCUMENT_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}
