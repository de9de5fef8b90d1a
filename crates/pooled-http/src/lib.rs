//! Connection-pooled HTTP/1.1 client
//!
//! Provides a lazily initialized, per-instance pooled HTTP client with a
//! uniform request surface across methods and body encodings.
//!
//! ## Features
//!
//! - **Bounded pooling**: total and per-destination connection caps
//! - **Lazy initialization**: the pool is built once, on the first request
//! - **Idle eviction**: a background task closes expired and idle connections
//! - **Retries**: idempotent requests are retried on transient failures
//! - **Body encoding**: JSON, form-urlencoded or raw JSON strings
//! - **Trait-based design**: Mockable via `HttpClientTrait`

pub mod client;
pub mod config;
mod connector;
pub mod dispatch;
pub mod error;
pub mod evictor;
pub mod lazy;
pub mod middleware;
pub mod pool;
pub mod request;
pub mod response;
pub mod route;

pub use client::{shared_client, HttpClientTrait, PooledHttpClient};
pub use config::PoolConfig;
pub use error::{HttpError, Result};
pub use lazy::LazyClient;
pub use middleware::{RetryConfig, RetryMiddleware};
pub use pool::{ConnectionPool, Lease, PoolStats};
pub use request::{Headers, Params, Request, RequestBuilder, RequestMethod, Timeouts};
pub use response::Response;
pub use route::{Destination, Scheme};

/// Re-export commonly used types
pub use http::{header, StatusCode};
