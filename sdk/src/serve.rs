//! Plugin-side serving loop
//!
//! A backend plugin binary implements [`BackendHandler`] and calls [`serve`] from
//! `main`. The loop refuses to start without the host's magic cookie, writes the
//! handshake line, then answers request frames from stdin on stdout until the host
//! sends `shutdown` or closes stdin.

use crate::handshake::{self, HandshakeMessage};
use crate::types::{
    CallResourceRequest, CallResourceResponse, Capability, CheckHealthRequest, CheckHealthResult,
    CollectMetricsRequest, CollectMetricsResult, QueryDataRequest, QueryDataResponse,
    RunStreamRequest, StreamPacket,
};
use crate::wire::{self, Method, RequestFrame, ResponseFrame};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

/// Capacity of the per-stream packet channel
const STREAM_BUFFER: usize = 16;

/// Implemented by plugin binaries; every method defaults to "not implemented"
#[async_trait]
pub trait BackendHandler: Send + Sync + 'static {
    /// Capabilities announced in a protocol version 2 handshake
    fn capabilities(&self) -> Vec<Capability>;

    async fn query_data(&self, _req: QueryDataRequest) -> Result<QueryDataResponse, String> {
        Err(not_implemented(Method::QueryData))
    }

    async fn check_health(&self, _req: CheckHealthRequest) -> Result<CheckHealthResult, String> {
        Err(not_implemented(Method::CheckHealth))
    }

    async fn call_resource(
        &self,
        _req: CallResourceRequest,
    ) -> Result<CallResourceResponse, String> {
        Err(not_implemented(Method::CallResource))
    }

    async fn collect_metrics(
        &self,
        _req: CollectMetricsRequest,
    ) -> Result<CollectMetricsResult, String> {
        Err(not_implemented(Method::CollectMetrics))
    }

    /// Push packets into `tx` until the stream ends
    async fn run_stream(
        &self,
        _req: RunStreamRequest,
        _tx: mpsc::Sender<StreamPacket>,
    ) -> Result<(), String> {
        Err(not_implemented(Method::RunStream))
    }

    /// Protocol version 1 combined query call
    async fn legacy_query(&self, _payload: serde_json::Value) -> Result<serde_json::Value, String> {
        Err(not_implemented(Method::LegacyQuery))
    }
}

fn not_implemented(method: Method) -> String {
    format!("{:?} is not implemented by this plugin", method)
}

/// Serve over stdin/stdout using the handshake environment set by the host
///
/// `supported_versions` lists the protocol versions this plugin can speak.
pub async fn serve<H: BackendHandler>(handler: H, supported_versions: &[u32]) -> io::Result<()> {
    match std::env::var(handshake::MAGIC_COOKIE_KEY) {
        Ok(value) if value == handshake::MAGIC_COOKIE_VALUE => {}
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                handshake::NOT_A_STANDALONE_BINARY,
            ))
        }
    }

    let offered = std::env::var(handshake::PROTOCOL_VERSIONS_ENV)
        .map(|v| handshake::parse_versions(&v))
        .unwrap_or_else(|_| vec![handshake::LEGACY_PROTOCOL_VERSION]);

    serve_io(
        handler,
        &offered,
        supported_versions,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
}

/// Serve over arbitrary pipes
///
/// Returns once the host requests shutdown or closes the reader.
pub async fn serve_io<H, R, W>(
    handler: H,
    offered: &[u32],
    supported: &[u32],
    reader: R,
    writer: W,
) -> io::Result<()>
where
    H: BackendHandler,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let version = handshake::negotiate(offered, supported).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "no common protocol version (host offered {})",
                handshake::format_versions(offered)
            ),
        )
    })?;

    let capabilities = if version == handshake::LEGACY_PROTOCOL_VERSION {
        Vec::new()
    } else {
        handler.capabilities()
    };

    let writer = Arc::new(Mutex::new(writer));
    let hello = HandshakeMessage::new(version, capabilities.clone())
        .to_line()
        .map_err(io::Error::other)?;
    write_line(&writer, &hello).await?;

    let handler = Arc::new(handler);
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        // Frames without a readable id cannot be answered
        let Ok(frame) = wire::decode_request(&line) else {
            continue;
        };

        if frame.method == Method::Shutdown {
            send(&writer, ResponseFrame::ok(frame.id, serde_json::Value::Null)).await?;
            break;
        }

        let allowed = match frame.method.capability() {
            Some(capability) => {
                version >= handshake::CURRENT_PROTOCOL_VERSION && capabilities.contains(&capability)
            }
            None => version == handshake::LEGACY_PROTOCOL_VERSION,
        };
        if !allowed {
            let msg = format!(
                "{:?} is not available at protocol version {}",
                frame.method, version
            );
            send(&writer, ResponseFrame::error(frame.id, msg)).await?;
            continue;
        }

        let handler = Arc::clone(&handler);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let _ = dispatch(handler, writer, frame).await;
        });
    }

    Ok(())
}

async fn dispatch<H, W>(handler: Arc<H>, writer: Arc<Mutex<W>>, frame: RequestFrame) -> io::Result<()>
where
    H: BackendHandler,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = frame.id;
    let result = match frame.method {
        Method::QueryData => unary(frame.payload, |req| handler.query_data(req)).await,
        Method::CheckHealth => unary(frame.payload, |req| handler.check_health(req)).await,
        Method::CallResource => unary(frame.payload, |req| handler.call_resource(req)).await,
        Method::CollectMetrics => unary(frame.payload, |req| handler.collect_metrics(req)).await,
        Method::LegacyQuery => handler.legacy_query(frame.payload).await,
        Method::RunStream => return stream(handler, writer, id, frame.payload).await,
        Method::Shutdown => Ok(serde_json::Value::Null),
    };

    let response = match result {
        Ok(payload) => ResponseFrame::ok(id, payload),
        Err(e) => ResponseFrame::error(id, e),
    };
    send(&writer, response).await
}

async fn stream<H, W>(
    handler: Arc<H>,
    writer: Arc<Mutex<W>>,
    id: u64,
    payload: serde_json::Value,
) -> io::Result<()>
where
    H: BackendHandler,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let req: RunStreamRequest = match decode(payload) {
        Ok(req) => req,
        Err(e) => return send(&writer, ResponseFrame::error(id, e)).await,
    };

    let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
    let task = tokio::spawn(async move { handler.run_stream(req, tx).await });

    while let Some(packet) = rx.recv().await {
        match serde_json::to_value(&packet) {
            Ok(value) => send(&writer, ResponseFrame::packet(id, value)).await?,
            Err(e) => return send(&writer, ResponseFrame::error(id, e.to_string())).await,
        }
    }

    let last = match task.await {
        Ok(Ok(())) => ResponseFrame::ok(id, serde_json::Value::Null),
        Ok(Err(e)) => ResponseFrame::error(id, e),
        Err(e) => ResponseFrame::error(id, format!("stream task failed: {}", e)),
    };
    send(&writer, last).await
}

async fn unary<Req, Resp, F, Fut>(payload: serde_json::Value, call: F) -> Result<serde_json::Value, String>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = Result<Resp, String>>,
{
    let req = decode(payload)?;
    let resp = call(req).await?;
    serde_json::to_value(resp).map_err(|e| e.to_string())
}

fn decode<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|e| format!("invalid request payload: {}", e))
}

async fn send<W>(writer: &Mutex<W>, frame: ResponseFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let line = wire::encode(&frame).map_err(io::Error::other)?;
    write_line(writer, &line).await
}

async fn write_line<W>(writer: &Mutex<W>, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
