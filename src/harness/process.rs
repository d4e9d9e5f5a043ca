// dumpharness/src/harness/process.rs
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::backup::BackupCatalog;
use crate::config::HarnessOptions;
use crate::errors::{HarnessError, Result};
use crate::harness::{
    BackupArgs, BackupCatalogProvider, BackupCommand, ClientParams, InstanceHandle, ScriptRunner,
    ToolRunner,
};
use crate::operation::config::{OperationConfig, ToolKind};
use crate::report::StageOutcome;
use crate::utils::find_tool_executable;

/// Runs the client tools as child processes.
///
/// Each call blocks until the child exits or the configured timeout
/// elapses; a timed-out child is killed.
#[derive(Debug, Clone)]
pub struct ProcessToolRunner {
    options: HarnessOptions,
}

impl ProcessToolRunner {
    pub fn new(options: HarnessOptions) -> Self {
        ProcessToolRunner { options }
    }
}

async fn run_command(
    tool: &str,
    program: &Path,
    args: &[String],
    working_dir: &Path,
    timeout: Duration,
) -> Result<Output> {
    tracing::debug!(tool, program = %program.display(), ?args, "spawning");
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(output) => output.map_err(|source| HarnessError::Spawn {
            tool: tool.to_string(),
            source,
        }),
        Err(_) => Err(HarnessError::Timeout {
            tool: tool.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}

/// Folds a finished child into a stage outcome; output is passed through as captured.
fn outcome_from_output(tool: &str, output: &Output, core_check: bool) -> StageOutcome {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let mut outcome = StageOutcome {
        status: output.status.success(),
        exit_code: output.status.code(),
        output: Some(stdout),
        details: Some(json!({ "stderr": stderr })),
        ..StageOutcome::default()
    };
    if !outcome.status {
        outcome.message = Some(format!("{} exited with {}", tool, output.status));
    }

    #[cfg(unix)]
    if core_check {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = output.status.signal() {
            outcome.status = false;
            outcome.message = Some(format!(
                "{} was terminated by signal {}; check for a core dump",
                tool, signal
            ));
            outcome.details = Some(json!({
                "stderr": stderr,
                "signal": signal,
                "coreCheck": true,
            }));
        }
    }
    #[cfg(not(unix))]
    let _ = core_check;

    outcome
}

fn failure_from_error(error: HarnessError) -> StageOutcome {
    tracing::warn!(error = %error, "tool invocation failed");
    StageOutcome::failure(error.to_string())
}

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run_dump_restore(
        &self,
        config: &OperationConfig,
        options: &HarnessOptions,
        root_dir: &Path,
        core_check: bool,
    ) -> StageOutcome {
        let tool = match config.kind() {
            ToolKind::Dump => &options.tools.dump,
            ToolKind::Restore => &options.tools.restore,
        };
        let program = match find_tool_executable(&options.tools, tool) {
            Ok(program) => program,
            Err(e) => return failure_from_error(e),
        };
        let args = config.to_args(root_dir);
        let working_dir = config.effective_root(root_dir);

        match run_command(tool, &program, &args, &working_dir, options.tool_timeout()).await {
            Ok(output) => outcome_from_output(tool, &output, core_check),
            Err(e) => failure_from_error(e),
        }
    }

    async fn run_backup(
        &self,
        options: &HarnessOptions,
        instance: &InstanceHandle,
        command: BackupCommand,
        args: &BackupArgs,
        root_dir: &Path,
        wait: bool,
    ) -> StageOutcome {
        let tool = &options.tools.backup;
        let program = match find_tool_executable(&options.tools, tool) {
            Ok(program) => program,
            Err(e) => return failure_from_error(e),
        };
        let mut argv = vec![
            command.as_str().to_string(),
            "--server.endpoint".to_string(),
            instance.endpoint.clone(),
        ];
        argv.extend(args.to_args());

        if !wait {
            let mut child = match Command::new(&program)
                .args(&argv)
                .current_dir(root_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .spawn()
            {
                Ok(child) => child,
                Err(source) => {
                    return failure_from_error(HarnessError::Spawn {
                        tool: tool.clone(),
                        source,
                    });
                }
            };
            let pid = child.id();
            let reaped = tool.clone();
            // detached run: reap the child in the background and log how it ended
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => tracing::info!(tool = %reaped, ?pid, %status, "detached backup tool exited"),
                    Err(e) => tracing::warn!(tool = %reaped, ?pid, error = %e, "failed to wait on detached backup tool"),
                }
            });
            return StageOutcome::success().with_message(format!("{} started (pid {:?})", tool, pid));
        }

        let extra_wait = args
            .max_wait_for_restart
            .map(Duration::from_secs_f64)
            .unwrap_or_default();
        let timeout = options.tool_timeout() + extra_wait;
        match run_command(tool, &program, &argv, root_dir, timeout).await {
            Ok(output) => outcome_from_output(tool, &output, options.core_check),
            Err(e) => failure_from_error(e),
        }
    }
}

#[async_trait]
impl ScriptRunner for ProcessToolRunner {
    async fn run_script(
        &self,
        options: &HarnessOptions,
        instance: &InstanceHandle,
        file: &Path,
        params: &ClientParams,
    ) -> StageOutcome {
        let tool = &options.tools.shell;
        let program = match find_tool_executable(&options.tools, tool) {
            Ok(program) => program,
            Err(e) => return failure_from_error(e),
        };
        let mut args = vec![
            "--server.endpoint".to_string(),
            instance.endpoint.clone(),
        ];
        for (key, value) in params {
            args.extend([format!("--{}", key), value.clone()]);
        }
        args.extend([
            "--javascript.execute".to_string(),
            file.display().to_string(),
        ]);

        match run_command(tool, &program, &args, &instance.root_dir, options.tool_timeout()).await {
            Ok(output) => outcome_from_output(tool, &output, options.core_check),
            Err(e) => failure_from_error(e),
        }
    }
}

#[async_trait]
impl BackupCatalogProvider for ProcessToolRunner {
    async fn list_backups(&self) -> anyhow::Result<BackupCatalog> {
        let tools = &self.options.tools;
        let program = find_tool_executable(tools, &tools.backup)?;
        let args = vec![
            BackupCommand::List.as_str().to_string(),
            "--server.endpoint".to_string(),
            self.options.endpoint.clone(),
        ];
        let output = run_command(
            &tools.backup,
            &program,
            &args,
            &self.options.work_dir,
            self.options.tool_timeout(),
        )
        .await?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "{} list failed with status: {}\nStderr: {}",
                tools.backup,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        BackupCatalog::from_json(&text).context("Failed to parse backup list")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(raw_status: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(raw_status),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_successful_output_passes_through() {
        let outcome = outcome_from_output("arangodump", &output(0, "Processed 3 collections\n", ""), false);
        assert!(outcome.status);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.output.as_deref(), Some("Processed 3 collections\n"));
        assert_eq!(outcome.message, None);
    }

    #[test]
    fn test_failed_exit_keeps_stderr() {
        // exit code 1 is encoded as 1 << 8 in a raw wait status
        let outcome = outcome_from_output("arangorestore", &output(1 << 8, "", "cannot connect\n"), false);
        assert!(!outcome.status);
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(
            outcome.details,
            Some(json!({ "stderr": "cannot connect\n" }))
        );
        assert!(outcome.message.is_some());
    }

    #[test]
    fn test_core_check_reports_signal() {
        // raw status 6 = terminated by SIGABRT
        let outcome = outcome_from_output("arangodump", &output(6, "", ""), true);
        assert!(!outcome.status);
        assert_eq!(outcome.exit_code, None);
        assert_eq!(
            outcome.details.as_ref().and_then(|d| d.get("signal")),
            Some(&json!(6))
        );
    }

    #[tokio::test]
    async fn test_missing_tool_yields_failed_outcome() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut options = HarnessOptions::default();
        options.tools.shell = "no-such-shell-for-dumpharness".to_string();
        let instance = InstanceHandle {
            label: "dump".to_string(),
            endpoint: options.endpoint.clone(),
            root_dir: dir.path().to_path_buf(),
            started_at: chrono::Utc::now(),
        };
        let runner = ProcessToolRunner::new(options.clone());

        let outcome = runner
            .run_script(&options, &instance, Path::new("setup.js"), &ClientParams::new())
            .await;
        assert!(!outcome.status);
        assert!(outcome.message.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_without_wait_starts_and_returns() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let tool = dir.path().join("arangobackup");
        std::fs::write(&tool, "#!/bin/sh\nexit 0\n")?;
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755))?;

        let mut options = HarnessOptions::default();
        options.tools.bin_dir = Some(dir.path().to_path_buf());
        let instance = InstanceHandle {
            label: "hot_backup".to_string(),
            endpoint: options.endpoint.clone(),
            root_dir: dir.path().to_path_buf(),
            started_at: chrono::Utc::now(),
        };
        let runner = ProcessToolRunner::new(options.clone());

        let outcome = runner
            .run_backup(
                &options,
                &instance,
                BackupCommand::Create,
                &BackupArgs::default(),
                dir.path(),
                false,
            )
            .await;
        assert!(outcome.status);
        assert!(
            outcome
                .message
                .as_deref()
                .is_some_and(|message| message.starts_with("arangobackup started"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = run_command(
            "sleep",
            Path::new("sleep"),
            &["5".to_string()],
            dir.path(),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(HarnessError::Timeout { .. })));
        Ok(())
    }
}
