//! Request multiplexing over a plugin's stdio pipes
//!
//! Requests are written under a writer lock; a single reader task routes response
//! frames to the caller waiting on the matching id. When the plugin closes its
//! stdout every pending call fails with `PluginExited`.
//!
//! The reader never waits on a caller. A stream whose receiver falls more than
//! [`STREAM_BUFFER`] frames behind is closed so other calls keep flowing.

use sdk::errors::EngineError;
use sdk::wire::{self, Method, RequestFrame, ResponseFrame};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Buffered frames per in-flight stream
const STREAM_BUFFER: usize = 32;

type Pending = Arc<Mutex<HashMap<u64, mpsc::Sender<ResponseFrame>>>>;

pub struct RpcChannel {
    plugin_id: String,
    writer: Mutex<Box<dyn AsyncWrite + Unpin + Send>>,
    pending: Pending,
    next_id: AtomicU64,
    exited: Arc<AtomicBool>,
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("plugin_id", &self.plugin_id)
            .field("exited", &self.is_exited())
            .finish_non_exhaustive()
    }
}

impl RpcChannel {
    /// Start routing responses read from `lines`
    ///
    /// `lines` continues right after the handshake line.
    pub fn start<R>(
        plugin_id: &str,
        writer: Box<dyn AsyncWrite + Unpin + Send>,
        lines: Lines<R>,
    ) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let exited = Arc::new(AtomicBool::new(false));

        tokio::spawn(read_loop(
            plugin_id.to_string(),
            lines,
            Arc::clone(&pending),
            Arc::clone(&exited),
        ));

        Self {
            plugin_id: plugin_id.to_string(),
            writer: Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            exited,
        }
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Flag set once the plugin's output closes
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exited)
    }

    /// Unary call; returns the payload of the single response frame
    pub async fn call(
        &self,
        method: Method,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let mut rx = self.send(method, payload).await?;
        let frame = rx.recv().await.ok_or_else(|| self.exited_error())?;
        match frame.error {
            Some(error) => Err(EngineError::Backend(error)),
            None => Ok(frame.payload),
        }
    }

    /// Streaming call; frames arrive until one with `done = true`
    pub async fn stream(
        &self,
        method: Method,
        payload: serde_json::Value,
    ) -> Result<mpsc::Receiver<ResponseFrame>, EngineError> {
        self.send(method, payload).await
    }

    async fn send(
        &self,
        method: Method,
        payload: serde_json::Value,
    ) -> Result<mpsc::Receiver<ResponseFrame>, EngineError> {
        if self.is_exited() {
            return Err(self.exited_error());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.pending.lock().await.insert(id, tx);
        // The reader may have cleared `pending` before the insert
        if self.is_exited() {
            self.pending.lock().await.remove(&id);
            return Err(self.exited_error());
        }

        let line = wire::encode(&RequestFrame {
            id,
            method,
            payload,
        })
        .map_err(|e| EngineError::Backend(format!("failed to encode request: {}", e)))?;

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };

        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            debug!(plugin_id = %self.plugin_id, error = %e, "Write to plugin failed");
            self.exited.store(true, Ordering::SeqCst);
            return Err(self.exited_error());
        }

        Ok(rx)
    }

    fn exited_error(&self) -> EngineError {
        EngineError::PluginExited(self.plugin_id.clone())
    }
}

async fn read_loop<R>(plugin_id: String, mut lines: Lines<R>, pending: Pending, exited: Arc<AtomicBool>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(plugin_id = %plugin_id, error = %e, "Plugin stdout read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame = match wire::decode_response(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(plugin_id = %plugin_id, error = %e, "Discarding malformed frame");
                continue;
            }
        };

        let id = frame.id;
        let tx = if frame.done {
            pending.lock().await.remove(&id)
        } else {
            pending.lock().await.get(&id).cloned()
        };
        match tx {
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(plugin_id = %plugin_id, id, "Stream receiver fell behind, closing stream");
                    pending.lock().await.remove(&id);
                }
                // A caller that stopped listening just drops the frame
                Err(TrySendError::Closed(_)) => {
                    pending.lock().await.remove(&id);
                }
            },
            None => debug!(plugin_id = %plugin_id, id, "Frame for unknown request"),
        }
    }

    exited.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiting caller
    pending.lock().await.clear();
    debug!(plugin_id = %plugin_id, "Plugin output closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Channel wired to a fake plugin that answers every request by echoing it
    fn echo_channel() -> RpcChannel {
        let (host, plugin) = tokio::io::duplex(4096);
        let (host_read, host_write) = tokio::io::split(host);
        let (plugin_read, mut plugin_write) = tokio::io::split(plugin);

        tokio::spawn(async move {
            let mut lines = BufReader::new(plugin_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req = wire::decode_request(&line).unwrap();
                if req.method == Method::Shutdown {
                    break;
                }
                let resp = if req.method == Method::RunStream {
                    let packets = req.payload.as_u64().unwrap_or(2);
                    let mut out = String::new();
                    for i in 0..packets {
                        out.push_str(&wire::encode(&ResponseFrame::packet(req.id, json!(i))).unwrap());
                    }
                    out.push_str(&wire::encode(&ResponseFrame::ok(req.id, json!(null))).unwrap());
                    out
                } else if req.payload == json!("fail") {
                    wire::encode(&ResponseFrame::error(req.id, "boom")).unwrap()
                } else {
                    wire::encode(&ResponseFrame::ok(req.id, req.payload)).unwrap()
                };
                plugin_write.write_all(resp.as_bytes()).await.unwrap();
            }
        });

        RpcChannel::start(
            "echo",
            Box::new(host_write),
            BufReader::new(host_read).lines(),
        )
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_routed_by_id() {
        let channel = Arc::new(echo_channel());
        let mut tasks = Vec::new();
        for i in 0..10 {
            let channel = Arc::clone(&channel);
            tasks.push(tokio::spawn(async move {
                channel.call(Method::CheckHealth, json!(i)).await.unwrap()
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), json!(i));
        }
    }

    #[tokio::test]
    async fn test_error_frame_becomes_backend_error() {
        let channel = echo_channel();
        let err = channel.call(Method::QueryData, json!("fail")).await.unwrap_err();
        assert!(matches!(err, EngineError::Backend(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_stream_frames_end_with_done() {
        let channel = echo_channel();
        let mut rx = channel.stream(Method::RunStream, json!({})).await.unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            let done = frame.done;
            frames.push(frame);
            if done {
                break;
            }
        }
        assert_eq!(frames.len(), 3);
        assert!(frames[2].done);
    }

    #[tokio::test]
    async fn test_plugin_exit_fails_pending_calls() {
        let channel = echo_channel();
        // The fake plugin stops reading on shutdown, closing its stdout
        let err = channel
            .call(Method::Shutdown, json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PluginExited(_)));
        assert!(channel.is_exited());
        assert!(channel.call(Method::CheckHealth, json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_undrained_stream_does_not_block_other_calls() {
        let channel = echo_channel();
        let mut stream = channel.stream(Method::RunStream, json!(500)).await.unwrap();

        let health = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            channel.call(Method::CheckHealth, json!("still here")),
        )
        .await
        .expect("reader blocked on the stream")
        .unwrap();
        assert_eq!(health, json!("still here"));

        // The stream was cut off without its final frame
        let mut received = 0;
        while let Some(frame) = stream.recv().await {
            assert!(!frame.done);
            received += 1;
        }
        assert!(received <= STREAM_BUFFER);
    }

    #[tokio::test]
    async fn test_call_after_output_closed_fails_fast() {
        // Input still accepts writes but the plugin's output is gone
        let channel = RpcChannel::start(
            "half-closed",
            Box::new(tokio::io::sink()),
            BufReader::new(tokio::io::empty()).lines(),
        );
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !channel.is_exited() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            channel.call(Method::CheckHealth, json!(1)),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(EngineError::PluginExited(_))));
    }
}
