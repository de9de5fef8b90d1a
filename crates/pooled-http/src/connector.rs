//! Plain and TLS transport factories
//!
//! Each new connection gets its own HTTP/1.1 handshake and a spawned driver
//! task. Dropping the returned sender shuts the connection down.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_native_tls::TlsConnector;
use tracing::debug;

use crate::{
    error::{HttpError, Result},
    route::{Destination, Scheme},
};

pub(crate) type Sender = SendRequest<Full<Bytes>>;

/// Connection factory registry for `http` and `https`
#[derive(Clone)]
pub(crate) struct Connector {
    tls: TlsConnector,
}

impl Connector {
    pub fn new() -> Result<Self> {
        let tls = native_tls::TlsConnector::new().map_err(|e| HttpError::Tls(e.to_string()))?;
        Ok(Self {
            tls: TlsConnector::from(tls),
        })
    }

    /// Open a connection to `destination` within `timeout` (zero = unbounded)
    pub async fn connect(&self, destination: &Destination, timeout: Duration) -> Result<Sender> {
        let connecting = async {
            let tcp = TcpStream::connect((destination.host(), destination.port()))
                .await
                .map_err(|source| HttpError::Connect {
                    destination: destination.to_string(),
                    source,
                })?;
            tcp.set_nodelay(true)?;

            match destination.scheme() {
                Scheme::Http => handshake(tcp, destination).await,
                Scheme::Https => {
                    let tls = self
                        .tls
                        .connect(destination.host(), tcp)
                        .await
                        .map_err(|e| HttpError::Tls(format!("{destination}: {e}")))?;
                    handshake(tls, destination).await
                }
            }
        };

        bounded(timeout, "connect", connecting).await
    }
}

async fn handshake<T>(io: T, destination: &Destination) -> Result<Sender>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(io)).await?;

    let destination = destination.to_string();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(destination = %destination, "HTTP/1.1 connection closed with error: {}", e);
        }
    });

    Ok(sender)
}

/// Run `fut` under `timeout`, a zero duration meaning no limit
pub(crate) async fn bounded<T, F>(timeout: Duration, phase: &'static str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| HttpError::Timeout {
            phase,
            after: timeout,
        })?
}
