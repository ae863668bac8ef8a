//! Backend plugin runtime
//!
//! The host never calls plugin code directly. Each backend plugin runs as its own
//! process; after a handshake the host talks to it through a [`BackendClient`],
//! which is also the seam tests mock.
//!
//! - [`launcher`]: how a process (or an in-process stand-in) is started
//! - [`env`]: environment handed to the process
//! - [`handshake`]: startup negotiation producing a client
//! - [`rpc`]: request/response multiplexing over the process pipes
//! - [`client`]: protocol version 2 client and the version 1 compatibility wrapper

pub mod client;
pub mod env;
pub mod handshake;
pub mod launcher;
pub mod rpc;

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{
    CallResourceRequest, CallResourceResponse, Capability, CheckHealthRequest, CheckHealthResult,
    CollectMetricsRequest, CollectMetricsResult, QueryDataRequest, QueryDataResponse,
    RunStreamRequest, StreamPacket,
};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

pub use handshake::start_backend;
pub use launcher::{InProcessLauncher, LaunchSpec, Launcher, SubprocessLauncher};

/// Packets of a running stream; the channel closes when the stream ends
pub type StreamReceiver = mpsc::Receiver<Result<StreamPacket, EngineError>>;

/// Capability surface of a started backend plugin
#[async_trait]
pub trait BackendClient: Send + Sync + fmt::Debug {
    fn plugin_id(&self) -> &str;

    /// Negotiated protocol version
    fn protocol_version(&self) -> u32;

    /// Capabilities usable on this client
    fn capabilities(&self) -> &[Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Whether the process has gone away
    fn is_exited(&self) -> bool;

    async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse, EngineError>;

    async fn check_health(&self, req: CheckHealthRequest)
        -> Result<CheckHealthResult, EngineError>;

    async fn call_resource(
        &self,
        req: CallResourceRequest,
    ) -> Result<CallResourceResponse, EngineError>;

    async fn collect_metrics(
        &self,
        req: CollectMetricsRequest,
    ) -> Result<CollectMetricsResult, EngineError>;

    async fn run_stream(&self, req: RunStreamRequest) -> Result<StreamReceiver, EngineError>;

    /// Ask the process to stop, waiting up to `grace` before killing it
    async fn shutdown(&self, grace: Duration) -> Result<(), EngineError>;

    /// Kill the process immediately
    async fn kill(&self) -> Result<(), EngineError>;
}
