//! Connection-level test server
//!
//! Counts accepted TCP connections and peak handler concurrency, and can
//! hang up on the first N connections after reading the request.

use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Request, Response,
};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
};

#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("pooled_http=debug")
        .try_init();
}

#[derive(Debug, Clone, Default)]
pub struct ServerMode {
    /// Delay before each response
    pub delay: Duration,
    /// Hang up on this many connections without answering
    pub drop_first: usize,
    /// Answer with `Connection: close`
    pub close_connections: bool,
    /// Advertise `Keep-Alive: timeout=N`
    pub keep_alive_secs: Option<u64>,
    /// Close each connection this long after accepting it, without notice
    pub hang_up_after: Option<Duration>,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicUsize,
    dropped: AtomicUsize,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

pub struct TestServer {
    addr: String,
    counters: Arc<Counters>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start(mode: ServerMode) -> Self {
        Self::bind("127.0.0.1:0", mode).await.unwrap()
    }

    pub async fn bind(addr: &str, mode: ServerMode) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?.to_string();
        let counters = Arc::new(Counters::default());
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let server_counters = counters.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { continue };
                        let counters = server_counters.clone();
                        let mode = mode.clone();
                        let index = counters.accepted.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(async move {
                            if index < mode.drop_first {
                                let mut stream = stream;
                                read_request(&mut stream).await;
                                counters.dropped.fetch_add(1, Ordering::SeqCst);
                                drop(stream);
                            } else {
                                serve(stream, mode, counters).await;
                            }
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            counters,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.counters.dropped.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Consume one request so the caller can hang up without a status line
async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let Ok(n) = stream.read(&mut chunk).await else { return };
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head_end) = find_head_end(&buf) {
            let body_len = content_length(&buf[..head_end]);
            if buf.len() >= head_end + body_len {
                return;
            }
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

async fn serve(stream: TcpStream, mode: ServerMode, counters: Arc<Counters>) {
    let io = TokioIo::new(stream);
    let hang_up_after = mode.hang_up_after;
    let service = service_fn(move |req| {
        let mode = mode.clone();
        let counters = counters.clone();
        async move { handle(req, mode, counters).await }
    });

    let connection = http1::Builder::new().serve_connection(io, service);
    match hang_up_after {
        Some(after) => {
            let _ = tokio::time::timeout(after, connection).await;
        }
        None => {
            let _ = connection.await;
        }
    }
}

/// Echo the request line, content type and body as JSON
async fn handle(
    req: Request<Incoming>,
    mode: ServerMode,
    counters: Arc<Counters>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    counters.requests.fetch_add(1, Ordering::SeqCst);
    let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);

    let method = req.method().to_string();
    let target = req.uri().to_string();
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = req
        .into_body()
        .collect()
        .await
        .map(|collected| String::from_utf8_lossy(&collected.to_bytes()).into_owned())
        .unwrap_or_default();

    if !mode.delay.is_zero() {
        tokio::time::sleep(mode.delay).await;
    }
    counters.in_flight.fetch_sub(1, Ordering::SeqCst);

    let payload = json!({
        "method": method,
        "target": target,
        "content_type": content_type,
        "body": body,
    });
    let mut response = Response::builder()
        .status(200)
        .header("content-type", "application/json");
    if mode.close_connections {
        response = response.header("connection", "close");
    }
    if let Some(secs) = mode.keep_alive_secs {
        response = response.header("keep-alive", format!("timeout={secs}"));
    }
    Ok(response
        .body(Full::new(Bytes::from(payload.to_string())))
        .unwrap())
}
