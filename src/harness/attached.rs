// dumpharness/src/harness/attached.rs
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;
use uuid::Uuid;

use crate::config::HarnessOptions;
use crate::errors::{HarnessError, Result};
use crate::harness::{InstanceHandle, InstanceManager, Protocol, ServerAuth};
use crate::report::StageOutcome;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Converts an endpoint such as `tcp://127.0.0.1:8529` into `host:port`.
pub fn socket_address(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)?;
    let host = url
        .host_str()
        .ok_or_else(|| HarnessError::Config(format!("endpoint has no host: {}", endpoint)))?;
    let port = url
        .port()
        .ok_or_else(|| HarnessError::Config(format!("endpoint has no port: {}", endpoint)))?;
    Ok(format!("{}:{}", host, port))
}

/// Instance manager for a server whose lifecycle is managed elsewhere.
///
/// "Starting" verifies the endpoint accepts connections and allocates a
/// fresh working directory; "shutting down" detaches and removes it.
#[derive(Debug, Clone)]
pub struct AttachedInstanceManager {
    connect_timeout: Duration,
}

impl Default for AttachedInstanceManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl AttachedInstanceManager {
    pub fn new(connect_timeout: Duration) -> Self {
        AttachedInstanceManager { connect_timeout }
    }

    async fn probe(&self, endpoint: &str) -> Result<()> {
        let address = socket_address(endpoint)?;
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(stream) => {
                stream?;
                Ok(())
            }
            Err(_) => Err(HarnessError::Timeout {
                tool: format!("connect to {}", address),
                secs: self.connect_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl InstanceManager for AttachedInstanceManager {
    async fn start_instance(
        &self,
        protocol: Protocol,
        options: &HarnessOptions,
        auth: &ServerAuth,
        label: &str,
    ) -> Option<InstanceHandle> {
        if protocol != Protocol::Tcp {
            tracing::error!(?protocol, "attached instances only support tcp");
            return None;
        }
        if let Err(e) = self.probe(&options.endpoint).await {
            tracing::error!(endpoint = %options.endpoint, error = %e, "server is not reachable");
            return None;
        }

        let root_dir = options.work_dir.join(format!("{}-{}", label, Uuid::new_v4()));
        if let Err(e) = tokio::fs::create_dir_all(&root_dir).await {
            tracing::error!(path = %root_dir.display(), error = %e, "failed to create instance directory");
            return None;
        }

        tracing::info!(
            label,
            endpoint = %options.endpoint,
            root_dir = %root_dir.display(),
            expected_server_args = ?auth.server_args(),
            extra_args = ?options.extra_args,
            "attached to server"
        );
        Some(InstanceHandle {
            label: label.to_string(),
            endpoint: options.endpoint.clone(),
            root_dir,
            started_at: Utc::now(),
        })
    }

    async fn shutdown(&self, instance: &InstanceHandle, _options: &HarnessOptions) -> StageOutcome {
        match tokio::fs::remove_dir_all(&instance.root_dir).await {
            Ok(()) => StageOutcome::success().with_message("detached"),
            Err(e) => StageOutcome::failure(format!(
                "failed to remove instance directory {}: {}",
                instance.root_dir.display(),
                e
            )),
        }
    }

    async fn is_alive(&self, instance: &InstanceHandle, _options: &HarnessOptions) -> bool {
        match self.probe(&instance.endpoint).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(endpoint = %instance.endpoint, error = %e, "liveness probe failed");
                false
            }
        }
    }

    async fn uptime(
        &self,
        instance: &InstanceHandle,
        _options: &HarnessOptions,
    ) -> anyhow::Result<serde_json::Value> {
        self.probe(&instance.endpoint).await?;
        let attached_for = Utc::now() - instance.started_at;
        Ok(json!({ "uptime": attached_for.num_milliseconds() as f64 / 1000.0 }))
    }
}
