//! mass-translate-server: HTTP front-end brokering translation requests to
//! DeepL, with a shared content-addressed result cache.
//! Main library: shared state, tracing setup, process bootstrap.

pub mod cancellation;
pub mod config;
pub mod server;
pub mod state_machine;
pub mod translate;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use config::{Config, ConfigError, MAX_FILE_SIZE};
use translate::cache::{CacheError, CacheStore, MemoryCache, TRANSLATION_TTL};
use translate::deepl::DeepLClient;
use translate::redis_cache::RedisCache;
use translate::service::{TranslationService, TranslatorFactory};
use translate::{ProviderError, ProviderId, Translator};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared state handed to every request handler.
pub struct AppContext {
    pub service: TranslationService,
    /// Deadline attached to each translate request.
    pub request_timeout: Duration,
    /// Cap on request bodies, checked before reading.
    pub max_upload_bytes: usize,
}

impl AppContext {
    pub fn new(service: TranslationService) -> Self {
        Self {
            service,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_upload_bytes: MAX_FILE_SIZE,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("mass_translate_server=info")
            }),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Build the DeepL factory used for one-time lazy client construction.
pub fn deepl_factory(api_key: Option<String>, base_url: Option<String>) -> TranslatorFactory {
    let api_key = api_key.unwrap_or_default();
    Box::new(move || -> Result<Arc<dyn Translator>, ProviderError> {
        let client = DeepLClient::new(&api_key, base_url.as_deref())?;
        Ok(Arc::new(client) as Arc<dyn Translator>)
    })
}

async fn open_cache(config: &Config) -> Result<Arc<dyn CacheStore>, CacheError> {
    match &config.redis_url {
        Some(url) => {
            let cache = RedisCache::open(url)?;
            cache.ping().await?;
            Ok(Arc::new(cache))
        }
        None => {
            warn!(
                capacity = config.memory_cache_capacity.get(),
                "REDIS_URL not set, using in-process translation cache"
            );
            Ok(Arc::new(MemoryCache::new(config.memory_cache_capacity, TRANSLATION_TTL)))
        }
    }
}

/// Connect the cache, then serve until Ctrl-C / SIGTERM.
pub async fn run(config: Config) -> Result<(), ServerError> {
    info!("mass-translate-server starting");

    let cache = open_cache(&config).await?;

    if config.deepl_api_key.is_none() {
        warn!("DEEPL_API not set, translate requests will fail until it is configured");
    }
    let service = TranslationService::new(
        ProviderId::DeepL,
        deepl_factory(config.deepl_api_key.clone(), config.deepl_base_url.clone()),
        cache,
        config.max_cacheable_bytes,
    )
    .with_cache_timeout(config.cache_timeout);
    let ctx = Arc::new(AppContext::new(service).with_request_timeout(config.request_timeout));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
    info!(%addr, "listening");

    server::serve(listener, ctx, shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
