//! Host side of the startup handshake
//!
//! The launched process must print its handshake line within the startup timeout.
//! The line proves the process is a plugin (magic cookie) and selects one of the
//! offered protocol versions; the version picks the client implementation.

use super::client::{Connection, LegacyClient, MultiplexClient};
use super::launcher::{LaunchSpec, Launcher};
use super::rpc::RpcChannel;
use super::BackendClient;
use sdk::errors::EngineError;
use sdk::handshake::{HandshakeMessage, LEGACY_PROTOCOL_VERSION};
use sdk::types::{Capability, PluginType};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Launch a backend and complete the handshake
///
/// # Errors
///
/// - `EngineError::Cancelled` if `cancel` fires first
/// - `EngineError::StartupTimeout` if no handshake line arrives within `startup_timeout`
/// - `EngineError::Handshake` for a closed pipe, malformed line, wrong cookie or
///   unoffered protocol version
///
/// The process is killed on every error path.
pub async fn start_backend(
    launcher: &dyn Launcher,
    spec: &LaunchSpec,
    plugin_type: PluginType,
    startup_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Arc<dyn BackendClient>, EngineError> {
    let mut process = launcher.launch(spec).await?;
    let stdout: Box<dyn AsyncRead + Unpin + Send> = process.stdout;
    let mut lines = BufReader::new(stdout).lines();

    let handshake_err = |reason: String| EngineError::Handshake {
        plugin_id: spec.plugin_id.clone(),
        reason,
    };

    let first = tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        read = tokio::time::timeout(startup_timeout, lines.next_line()) => match read {
            Err(_) => Err(EngineError::StartupTimeout(spec.plugin_id.clone())),
            Ok(Err(e)) => Err(handshake_err(format!("failed to read handshake: {}", e))),
            Ok(Ok(None)) => Err(handshake_err("plugin exited before handshake".to_string())),
            Ok(Ok(Some(line))) => HandshakeMessage::parse(&line)
                .and_then(|msg| msg.verify(&spec.offered_versions).map(|v| (v, msg)))
                .map_err(handshake_err),
        },
    };

    let (version, message) = match first {
        Ok(ok) => ok,
        Err(e) => {
            process.handle.kill().await;
            return Err(e);
        }
    };

    let rpc = RpcChannel::start(&spec.plugin_id, process.stdin, lines);
    let conn = Connection::new(&spec.plugin_id, rpc, process.handle);

    let client: Arc<dyn BackendClient> = if version == LEGACY_PROTOCOL_VERSION {
        Arc::new(LegacyClient::new(conn))
    } else {
        let allowed = Capability::for_plugin_type(plugin_type);
        let capabilities: Vec<Capability> = message
            .capabilities
            .iter()
            .copied()
            .filter(|c| allowed.contains(c))
            .collect();
        debug!(
            plugin_id = %spec.plugin_id,
            announced = ?message.capabilities,
            usable = ?capabilities,
            "Capabilities negotiated"
        );
        Arc::new(MultiplexClient::new(conn, capabilities))
    };

    info!(plugin_id = %spec.plugin_id, protocol = version, "Backend started");
    Ok(client)
}
