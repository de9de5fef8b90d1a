//! Request execution over the pool
//!
//! One attempt leases a connection, sends the request, drains the body into
//! a [`Response`] and drops the lease. The lease goes back to the pool only
//! when the exchange completed cleanly, on every other path it is closed.

use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, CONNECTION, HOST};
use http_body_util::{BodyExt, Full};
use tracing::{debug, error};

use crate::{
    connector::bounded,
    error::{HttpError, Result},
    middleware::RetryMiddleware,
    pool::ConnectionPool,
    request::Request,
    response::Response,
};

pub struct Dispatcher {
    pool: ConnectionPool,
    retry: RetryMiddleware,
}

impl Dispatcher {
    pub fn new(pool: ConnectionPool, retry: RetryMiddleware) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Execute `request`, retrying idempotent methods on transient failure
    ///
    /// Failures are logged with the target URL before being returned.
    pub async fn dispatch(&self, request: &Request) -> Result<Response> {
        let result = if request.method().is_idempotent() {
            self.retry.execute(|| self.send_once(request)).await
        } else {
            self.send_once(request).await
        };

        if let Err(e) = &result {
            error!(url = %request.url(), method = %request.method(), "http request error: {}", e);
        }
        result
    }

    async fn send_once(&self, request: &Request) -> Result<Response> {
        let mut lease = self
            .pool
            .lease(request.destination(), request.timeouts())
            .await?;

        let socket_timeout = request.timeouts().socket;
        let response = bounded(socket_timeout, "response", async {
            lease.send(to_http(request)?).await.map_err(|e| match e {
                HttpError::Transport(e) if e.is_incomplete_message() => HttpError::NoResponse {
                    url: request.url().to_string(),
                },
                other => other,
            })
        })
        .await?;

        let status = response.status().as_u16();
        let keep_alive = reuse_policy(response.headers());

        let body = bounded(socket_timeout, "response body", async {
            Ok(response.into_body().collect().await?.to_bytes())
        })
        .await?;

        if let Some(keep_alive) = keep_alive {
            lease.mark_reusable(keep_alive);
        }
        debug!(
            url = %request.url(),
            status,
            bytes = body.len(),
            "HTTP {} completed",
            request.method()
        );

        Ok(Response::new(status, String::from_utf8_lossy(&body).into_owned()))
    }
}

/// `None` when the server asked to close; otherwise the advertised
/// keep-alive lifetime, if any
fn reuse_policy(headers: &http::HeaderMap) -> Option<Option<Duration>> {
    let closes = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"));
    if closes {
        return None;
    }

    let ttl = headers
        .get("keep-alive")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value.split(',').find_map(|param| {
                let (name, secs) = param.split_once('=')?;
                if name.trim().eq_ignore_ascii_case("timeout") {
                    secs.trim().parse::<u64>().ok()
                } else {
                    None
                }
            })
        })
        .map(Duration::from_secs);
    Some(ttl)
}

fn to_http(request: &Request) -> Result<http::Request<Full<Bytes>>> {
    let mut builder = http::Request::builder()
        .method(request.method().to_method())
        .uri(request.target());

    let authority = request.destination().authority();
    let host = HeaderValue::from_str(&authority)
        .map_err(|e| HttpError::InvalidRequest(format!("host {authority}: {e}")))?;

    if let Some(headers) = builder.headers_mut() {
        headers.insert(HOST, host);
        for (name, value) in request.headers().iter().filter(|(name, _)| *name != HOST) {
            headers.append(name, value.clone());
        }
    }

    let body = request
        .body()
        .map(|body| body.bytes.clone())
        .unwrap_or_default();
    builder
        .body(Full::new(body))
        .map_err(|e| HttpError::InvalidRequest(e.to_string()))
}
