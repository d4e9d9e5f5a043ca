//! Collaborators the pipeline drives: the server instance manager, the
//! dump/restore/backup tools, the script runner and the backup catalog.
//!
//! The pipeline only sees these traits. `process` and `attached` hold the
//! implementations the binary wires up; tests supply in-memory fakes.

pub mod attached;
pub mod process;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backup::BackupCatalog;
use crate::config::HarnessOptions;
use crate::operation::config::OperationConfig;
use crate::report::{ScenarioReport, StageOutcome};

/// Extra `--key value` parameters passed to a script run.
pub type ClientParams = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Ssl,
}

/// Server-side authentication settings used when starting an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerAuth {
    pub authentication: bool,
    pub jwt_secret: Option<String>,
}

impl ServerAuth {
    pub fn server_args(&self) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        if self.authentication {
            args.insert("server.authentication".to_string(), "true".to_string());
        }
        if let Some(secret) = &self.jwt_secret {
            args.insert("server.jwt-secret".to_string(), secret.clone());
        }
        args
    }
}

/// A running server instance owned by one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceHandle {
    pub label: String,
    pub endpoint: String,
    /// Working directory of the instance; tool outputs and key files live here.
    pub root_dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupCommand {
    Create,
    Restore,
    List,
}

impl BackupCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupCommand::Create => "create",
            BackupCommand::Restore => "restore",
            BackupCommand::List => "list",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupArgs {
    pub label: Option<String>,
    pub identifier: Option<String>,
    /// Seconds the backup tool waits for the server to come back after a restore.
    pub max_wait_for_restart: Option<f64>,
}

impl BackupArgs {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(label) = &self.label {
            args.extend(["--label".to_string(), label.clone()]);
        }
        if let Some(identifier) = &self.identifier {
            args.extend(["--identifier".to_string(), identifier.clone()]);
        }
        if let Some(wait) = self.max_wait_for_restart {
            args.extend(["--max-wait-for-restart".to_string(), wait.to_string()]);
        }
        args
    }
}

#[async_trait]
pub trait InstanceManager: Send + Sync {
    /// Starts (or attaches to) a server instance; `None` if it could not be brought up.
    async fn start_instance(
        &self,
        protocol: Protocol,
        options: &HarnessOptions,
        auth: &ServerAuth,
        label: &str,
    ) -> Option<InstanceHandle>;

    async fn shutdown(&self, instance: &InstanceHandle, options: &HarnessOptions) -> StageOutcome;

    async fn is_alive(&self, instance: &InstanceHandle, options: &HarnessOptions) -> bool;

    async fn uptime(
        &self,
        instance: &InstanceHandle,
        options: &HarnessOptions,
    ) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run_dump_restore(
        &self,
        config: &OperationConfig,
        options: &HarnessOptions,
        root_dir: &Path,
        core_check: bool,
    ) -> StageOutcome;

    async fn run_backup(
        &self,
        options: &HarnessOptions,
        instance: &InstanceHandle,
        command: BackupCommand,
        args: &BackupArgs,
        root_dir: &Path,
        wait: bool,
    ) -> StageOutcome;
}

#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run_script(
        &self,
        options: &HarnessOptions,
        instance: &InstanceHandle,
        file: &Path,
        params: &ClientParams,
    ) -> StageOutcome;
}

#[async_trait]
pub trait BackupCatalogProvider: Send + Sync {
    async fn list_backups(&self) -> anyhow::Result<BackupCatalog>;
}

/// Notified at scenario and stage boundaries. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    fn scenario_started(&self, _scenario: &str) {}

    fn stage_started(&self, _scenario: &str, _stage: &str) {}

    fn stage_finished(&self, _scenario: &str, _stage: &str, _outcome: &StageOutcome, _valid: bool) {}

    fn scenario_finished(&self, _scenario: &str, _report: &ScenarioReport) {}
}

/// Reports pipeline progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn scenario_started(&self, scenario: &str) {
        tracing::info!(scenario, "{} tests...", scenario);
    }

    fn stage_started(&self, scenario: &str, stage: &str) {
        tracing::info!(scenario, stage, "{} and Restore - {}", scenario, stage);
    }

    fn stage_finished(&self, scenario: &str, stage: &str, outcome: &StageOutcome, valid: bool) {
        if valid {
            tracing::debug!(scenario, stage, "stage passed");
        } else {
            tracing::warn!(
                scenario,
                stage,
                status = outcome.status,
                message = outcome.message.as_deref().unwrap_or(""),
                "stage failed"
            );
        }
    }

    fn scenario_finished(&self, scenario: &str, report: &ScenarioReport) {
        tracing::info!(
            scenario,
            failed = report.failed,
            stages = report.len(),
            "scenario finished"
        );
    }
}

/// The collaborator set one pipeline run is wired to.
#[derive(Clone, Copy)]
pub struct Harness<'a> {
    pub instances: &'a dyn InstanceManager,
    pub tools: &'a dyn ToolRunner,
    pub scripts: &'a dyn ScriptRunner,
    pub backups: &'a dyn BackupCatalogProvider,
    pub observer: &'a dyn PipelineObserver,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_args_order() {
        let args = BackupArgs {
            identifier: Some("2024-01-01T00.00.00_testHotBackup".to_string()),
            max_wait_for_restart: Some(100.0),
            ..BackupArgs::default()
        };
        assert_eq!(
            args.to_args(),
            vec![
                "--identifier",
                "2024-01-01T00.00.00_testHotBackup",
                "--max-wait-for-restart",
                "100"
            ]
        );
    }

    #[test]
    fn test_server_auth_args() {
        let auth = ServerAuth {
            authentication: true,
            jwt_secret: Some("haxxmann".to_string()),
        };
        let args = auth.server_args();
        assert_eq!(args.get("server.authentication").map(String::as_str), Some("true"));
        assert_eq!(args.get("server.jwt-secret").map(String::as_str), Some("haxxmann"));
        assert!(ServerAuth::default().server_args().is_empty());
    }
}
