//! Pooled HTTP client implementation

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::PoolConfig,
    dispatch::Dispatcher,
    error::{HttpError, Result},
    evictor::IdleEvictor,
    lazy::LazyClient,
    middleware::{RetryConfig, RetryMiddleware},
    pool::{ConnectionPool, PoolStats},
    request::{Headers, Params, Request, RequestBuilder, RequestMethod},
    response::Response,
    route,
};

/// Mockable HTTP client trait
///
/// Implementors provide the three request primitives; the method-specific
/// helpers are expressed in terms of them.
#[async_trait]
pub trait HttpClientTrait: Send + Sync {
    /// Build and send a request whose body is encoded from `params`
    async fn request_with(
        &self,
        method: RequestMethod,
        url: &str,
        headers: Option<&Headers>,
        params: Option<&Params>,
    ) -> Result<Response>;

    /// Build and send a request carrying `body` verbatim as JSON
    async fn request_raw(
        &self,
        method: RequestMethod,
        url: &str,
        headers: Option<&Headers>,
        body: &str,
    ) -> Result<Response>;

    /// Send a pre-built request
    async fn execute(&self, request: Request) -> Result<Response>;

    /// Execute a request without headers or body
    async fn request(&self, method: RequestMethod, url: &str) -> Result<Response> {
        self.request_with(method, url, None, None).await
    }

    /// Execute a GET request
    async fn get(&self, url: &str) -> Result<Response> {
        self.get_with(url, None, None).await
    }

    async fn get_with_headers(&self, url: &str, headers: &Headers) -> Result<Response> {
        self.get_with(url, Some(headers), None).await
    }

    /// GET with `params` appended to the query string
    async fn get_with(
        &self,
        url: &str,
        headers: Option<&Headers>,
        params: Option<&Params>,
    ) -> Result<Response> {
        let url = match params {
            Some(params) => route::append_query(url, params),
            None => url.to_string(),
        };
        self.request_with(RequestMethod::Get, &url, headers, None)
            .await
    }

    /// POST `params` as JSON
    async fn post(&self, url: &str, params: &Params) -> Result<Response> {
        self.request_with(RequestMethod::Post, url, None, Some(params))
            .await
    }

    /// POST `params` encoded per the Content-Type in `headers`
    async fn post_with_headers(
        &self,
        url: &str,
        headers: &Headers,
        params: &Params,
    ) -> Result<Response> {
        self.request_with(RequestMethod::Post, url, Some(headers), Some(params))
            .await
    }

    /// POST a raw JSON string
    async fn post_raw(&self, url: &str, body: &str) -> Result<Response> {
        self.request_raw(RequestMethod::Post, url, None, body).await
    }

    async fn post_raw_with_headers(
        &self,
        url: &str,
        headers: &Headers,
        body: &str,
    ) -> Result<Response> {
        self.request_raw(RequestMethod::Post, url, Some(headers), body)
            .await
    }
}

/// Pool, dispatcher and evictor built on first use
struct ClientCore {
    dispatcher: Dispatcher,
    evictor: IdleEvictor,
}

impl ClientCore {
    fn build(component_id: &str, config: &PoolConfig, url: &str) -> Result<Self> {
        let seed = route::Destination::resolve(url)?;
        let pool = ConnectionPool::new(config, &seed)?;
        let evictor = IdleEvictor::start(
            component_id,
            pool.clone(),
            config.monitor_interval(),
            config.idle_timeout(),
        );
        let retry = RetryMiddleware::new(RetryConfig::from_pool_config(config));

        info!(
            component = component_id,
            seed = %seed,
            max_pool_size = config.max_pool_size,
            max_route_pool_size = config.max_route_pool_size,
            "HTTP client pool initialized"
        );
        Ok(Self {
            dispatcher: Dispatcher::new(pool, retry),
            evictor,
        })
    }
}

/// Connection-pooled HTTP client
///
/// Nothing is allocated until the first request; the URL of that request
/// seeds the pool. Clones of the `Arc` returned by [`shared_client`] share
/// one pool.
pub struct PooledHttpClient {
    id: String,
    config: PoolConfig,
    builder: RequestBuilder,
    core: LazyClient<ClientCore>,
    closed: AtomicBool,
}

impl PooledHttpClient {
    /// Create a new HTTP client with configuration
    pub fn new(config: PoolConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            builder: RequestBuilder::new(&config),
            config,
            core: LazyClient::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create HTTP client with default configuration
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    /// Client sized by total, default per-route and seeded per-route caps
    pub fn with_pool_sizes(max_pool: usize, default_route: usize, seeded_route: usize) -> Self {
        Self::new(PoolConfig::with_pool_sizes(max_pool, default_route, seeded_route))
    }

    /// Unique id of this pool owner
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Request builder bound to this client's timeouts
    pub fn request_builder(&self) -> &RequestBuilder {
        &self.builder
    }

    pub fn is_initialized(&self) -> bool {
        self.core.is_initialized()
    }

    /// Times the pool was constructed (0 before the first request, then 1)
    pub fn constructions(&self) -> usize {
        self.core.constructions()
    }

    /// Pool occupancy, `None` before the first request
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.core.get().map(|core| core.dispatcher.pool().stats())
    }

    /// Occupancy of the destination `url` resolves to
    pub fn route_stats(&self, url: &str) -> Result<Option<PoolStats>> {
        let destination = route::Destination::resolve(url)?;
        Ok(self
            .core
            .get()
            .map(|core| core.dispatcher.pool().route_stats(&destination)))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Build the pool on first use, keyed off `url`
    fn ensure_ready(&self, url: &str) -> Result<&ClientCore> {
        if self.is_closed() {
            return Err(HttpError::Closed);
        }
        // Re-checked under the init lock, which `close` also takes
        self.core.get_or_try_init(|| {
            if self.is_closed() {
                return Err(HttpError::Closed);
            }
            ClientCore::build(&self.id, &self.config, url)
        })
    }

    /// Shut down the pool and stop idle eviction
    ///
    /// In-flight requests finish; their connections are closed instead of
    /// pooled. Closing twice only logs a warning.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!(component = %self.id, "HTTP client pool already closed");
            return;
        }
        warn!(component = %self.id, "HTTP client pool will be closed now");

        self.core.with_settled(|core| {
            if let Some(core) = core {
                core.evictor.stop();
                core.dispatcher.pool().close();
            }
        });
        debug!(component = %self.id, "HTTP client pool closed");
    }
}

impl Default for PooledHttpClient {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl HttpClientTrait for PooledHttpClient {
    async fn request_with(
        &self,
        method: RequestMethod,
        url: &str,
        headers: Option<&Headers>,
        params: Option<&Params>,
    ) -> Result<Response> {
        debug!("HTTP {}: {}", method, url);
        let request = self.builder.build(method, url, headers, params)?;
        self.execute(request).await
    }

    async fn request_raw(
        &self,
        method: RequestMethod,
        url: &str,
        headers: Option<&Headers>,
        body: &str,
    ) -> Result<Response> {
        debug!("HTTP {} (raw body): {}", method, url);
        let request = self.builder.build_raw(method, url, headers, body)?;
        self.execute(request).await
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let core = self.ensure_ready(request.url().as_str())?;
        core.dispatcher.dispatch(&request).await
    }
}

/// Create a shared HTTP client (Arc-wrapped for cloning)
pub fn shared_client(config: PoolConfig) -> Arc<dyn HttpClientTrait> {
    Arc::new(PooledHttpClient::new(config))
}
