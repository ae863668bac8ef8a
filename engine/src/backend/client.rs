//! Backend clients for both protocol generations
//!
//! Version 2 plugins get a [`MultiplexClient`] limited to the capabilities they
//! announced and the host allows for their kind. Version 1 plugins get a
//! [`LegacyClient`], a thin wrapper that maps `query_data` onto the single legacy
//! call and reports everything else as unsupported. Callers only see
//! [`BackendClient`].

use super::launcher::ProcessHandle;
use super::rpc::RpcChannel;
use super::{BackendClient, StreamReceiver};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::handshake::{CURRENT_PROTOCOL_VERSION, LEGACY_PROTOCOL_VERSION};
use sdk::types::{
    CallResourceRequest, CallResourceResponse, Capability, CheckHealthRequest, CheckHealthResult,
    CollectMetricsRequest, CollectMetricsResult, QueryDataRequest, QueryDataResponse,
    RunStreamRequest, StreamPacket,
};
use sdk::wire::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Pipes and process shared by both client kinds
#[derive(Debug)]
pub struct Connection {
    plugin_id: String,
    rpc: RpcChannel,
    process: Mutex<Option<ProcessHandle>>,
}

impl Connection {
    pub fn new(plugin_id: &str, rpc: RpcChannel, process: ProcessHandle) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            rpc,
            process: Mutex::new(Some(process)),
        }
    }

    async fn call<Req, Resp>(&self, method: Method, req: &Req) -> Result<Resp, EngineError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(req)
            .map_err(|e| EngineError::Backend(format!("failed to encode request: {}", e)))?;
        let response = self.rpc.call(method, payload).await?;
        serde_json::from_value(response)
            .map_err(|e| EngineError::Backend(format!("invalid response from plugin: {}", e)))
    }

    async fn stream(&self, req: &RunStreamRequest) -> Result<StreamReceiver, EngineError> {
        let payload = serde_json::to_value(req)
            .map_err(|e| EngineError::Backend(format!("failed to encode request: {}", e)))?;
        let mut frames = self.rpc.stream(Method::RunStream, payload).await?;
        let plugin_id = self.plugin_id.clone();
        let exited = self.rpc.exit_flag();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let item = match (frame.error, frame.done) {
                    (Some(error), _) => Err(EngineError::Backend(error)),
                    (None, true) => {
                        debug!(plugin_id = %plugin_id, "Stream finished");
                        return;
                    }
                    (None, false) => serde_json::from_value::<StreamPacket>(frame.payload)
                        .map_err(|e| EngineError::Backend(format!("invalid stream packet: {}", e))),
                };
                let stop = item.is_err();
                if tx.send(item).await.is_err() || stop {
                    return;
                }
            }
            // Channel closed without a final frame
            let error = if exited.load(Ordering::SeqCst) {
                EngineError::PluginExited(plugin_id)
            } else {
                EngineError::Backend("stream closed before completion: receiver fell behind".to_string())
            };
            let _ = tx.send(Err(error)).await;
        });

        Ok(rx)
    }

    /// Cooperative stop, then forced termination after `grace`
    pub async fn shutdown(&self, grace: Duration) -> Result<(), EngineError> {
        let Some(mut process) = self.process.lock().await.take() else {
            return Ok(());
        };

        if !self.rpc.is_exited() {
            // The plugin may exit before acknowledging, which surfaces as PluginExited
            let request = self.rpc.call(Method::Shutdown, serde_json::Value::Null);
            if tokio::time::timeout(grace, request).await.is_err() {
                debug!(plugin_id = %self.plugin_id, "Shutdown request not acknowledged");
            }
        }

        if process.wait(grace).await {
            info!(plugin_id = %self.plugin_id, "Backend stopped");
            return Ok(());
        }

        process.terminate();
        if process.wait(grace).await {
            info!(plugin_id = %self.plugin_id, "Backend stopped after SIGTERM");
            return Ok(());
        }

        warn!(plugin_id = %self.plugin_id, "Backend ignored shutdown, killing");
        process.kill().await;
        Ok(())
    }

    pub async fn kill(&self) -> Result<(), EngineError> {
        if let Some(mut process) = self.process.lock().await.take() {
            process.kill().await;
        }
        Ok(())
    }

    fn unsupported(&self, capability: Capability) -> EngineError {
        EngineError::CapabilityNotSupported {
            plugin_id: self.plugin_id.clone(),
            capability: capability.to_string(),
        }
    }
}

/// Protocol version 2 client
#[derive(Debug)]
pub struct MultiplexClient {
    conn: Connection,
    capabilities: Vec<Capability>,
}

impl MultiplexClient {
    /// `capabilities` must already be narrowed to what the host allows
    pub fn new(conn: Connection, capabilities: Vec<Capability>) -> Self {
        Self { conn, capabilities }
    }

    fn require(&self, capability: Capability) -> Result<(), EngineError> {
        if self.capabilities.contains(&capability) {
            Ok(())
        } else {
            Err(self.conn.unsupported(capability))
        }
    }
}

#[async_trait]
impl BackendClient for MultiplexClient {
    fn plugin_id(&self) -> &str {
        &self.conn.plugin_id
    }

    fn protocol_version(&self) -> u32 {
        CURRENT_PROTOCOL_VERSION
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn is_exited(&self) -> bool {
        self.conn.rpc.is_exited()
    }

    async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse, EngineError> {
        self.require(Capability::QueryData)?;
        self.conn.call(Method::QueryData, &req).await
    }

    async fn check_health(
        &self,
        req: CheckHealthRequest,
    ) -> Result<CheckHealthResult, EngineError> {
        self.require(Capability::CheckHealth)?;
        self.conn.call(Method::CheckHealth, &req).await
    }

    async fn call_resource(
        &self,
        req: CallResourceRequest,
    ) -> Result<CallResourceResponse, EngineError> {
        self.require(Capability::CallResource)?;
        self.conn.call(Method::CallResource, &req).await
    }

    async fn collect_metrics(
        &self,
        req: CollectMetricsRequest,
    ) -> Result<CollectMetricsResult, EngineError> {
        self.require(Capability::CollectMetrics)?;
        self.conn.call(Method::CollectMetrics, &req).await
    }

    async fn run_stream(&self, req: RunStreamRequest) -> Result<StreamReceiver, EngineError> {
        self.require(Capability::Stream)?;
        self.conn.stream(&req).await
    }

    async fn shutdown(&self, grace: Duration) -> Result<(), EngineError> {
        self.conn.shutdown(grace).await
    }

    async fn kill(&self) -> Result<(), EngineError> {
        self.conn.kill().await
    }
}

/// Protocol version 1 compatibility wrapper
#[derive(Debug)]
pub struct LegacyClient {
    conn: Connection,
    capabilities: Vec<Capability>,
}

impl LegacyClient {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            capabilities: vec![Capability::QueryData],
        }
    }
}

#[async_trait]
impl BackendClient for LegacyClient {
    fn plugin_id(&self) -> &str {
        &self.conn.plugin_id
    }

    fn protocol_version(&self) -> u32 {
        LEGACY_PROTOCOL_VERSION
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn is_exited(&self) -> bool {
        self.conn.rpc.is_exited()
    }

    async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse, EngineError> {
        self.conn.call(Method::LegacyQuery, &req).await
    }

    async fn check_health(
        &self,
        _req: CheckHealthRequest,
    ) -> Result<CheckHealthResult, EngineError> {
        Err(self.conn.unsupported(Capability::CheckHealth))
    }

    async fn call_resource(
        &self,
        _req: CallResourceRequest,
    ) -> Result<CallResourceResponse, EngineError> {
        Err(self.conn.unsupported(Capability::CallResource))
    }

    async fn collect_metrics(
        &self,
        _req: CollectMetricsRequest,
    ) -> Result<CollectMetricsResult, EngineError> {
        Err(self.conn.unsupported(Capability::CollectMetrics))
    }

    async fn run_stream(&self, _req: RunStreamRequest) -> Result<StreamReceiver, EngineError> {
        Err(self.conn.unsupported(Capability::Stream))
    }

    async fn shutdown(&self, grace: Duration) -> Result<(), EngineError> {
        self.conn.shutdown(grace).await
    }

    async fn kill(&self) -> Result<(), EngineError> {
        self.conn.kill().await
    }
}
