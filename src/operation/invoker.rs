// dumpharness/src/operation/invoker.rs
use std::path::{Path, PathBuf};

use crate::config::HarnessOptions;
use crate::harness::{BackupArgs, BackupCommand, InstanceHandle, ToolRunner};
use crate::operation::config::OperationConfig;
use crate::report::StageOutcome;

/// Seconds the backup tool may wait for the server to restart after a restore.
pub const RESTORE_MAX_WAIT_FOR_RESTART: f64 = 100.0;

/// Binds one dump or restore configuration to the tool runner.
///
/// The configuration stays owned here; stages adjust it through
/// [`OperationInvoker::config_mut`] and the next [`OperationInvoker::invoke`]
/// sees the adjusted state.
pub struct OperationInvoker<'a> {
    runner: &'a dyn ToolRunner,
    options: &'a HarnessOptions,
    config: OperationConfig,
    root_dir: PathBuf,
    core_check: bool,
}

impl<'a> OperationInvoker<'a> {
    pub fn new(
        runner: &'a dyn ToolRunner,
        options: &'a HarnessOptions,
        config: OperationConfig,
        root_dir: &Path,
    ) -> Self {
        OperationInvoker {
            runner,
            options,
            config,
            root_dir: root_dir.to_path_buf(),
            core_check: options.core_check,
        }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut OperationConfig {
        &mut self.config
    }

    pub async fn invoke(&self) -> StageOutcome {
        tracing::debug!(
            tool = self.config.kind().as_str(),
            database = self.config.database().unwrap_or(""),
            collection = self.config.collection().unwrap_or(""),
            all_databases = self.config.have_set_all_databases(),
            "invoking tool"
        );
        self.runner
            .run_dump_restore(&self.config, self.options, &self.root_dir, self.core_check)
            .await
    }
}

/// Runs backup-tool subcommands against one instance.
pub struct BackupInvoker<'a> {
    runner: &'a dyn ToolRunner,
    options: &'a HarnessOptions,
    instance: InstanceHandle,
}

impl<'a> BackupInvoker<'a> {
    pub fn new(runner: &'a dyn ToolRunner, options: &'a HarnessOptions, instance: InstanceHandle) -> Self {
        BackupInvoker {
            runner,
            options,
            instance,
        }
    }

    pub async fn create(&self, label: &str) -> StageOutcome {
        let args = BackupArgs {
            label: Some(label.to_string()),
            ..BackupArgs::default()
        };
        self.run(BackupCommand::Create, &args).await
    }

    /// Restores `identifier`. The server restarts during a restore, hence the extended wait.
    pub async fn restore(&self, identifier: &str) -> StageOutcome {
        let args = BackupArgs {
            identifier: Some(identifier.to_string()),
            max_wait_for_restart: Some(RESTORE_MAX_WAIT_FOR_RESTART),
            ..BackupArgs::default()
        };
        self.run(BackupCommand::Restore, &args).await
    }

    async fn run(&self, command: BackupCommand, args: &BackupArgs) -> StageOutcome {
        tracing::debug!(command = command.as_str(), "invoking backup tool");
        self.runner
            .run_backup(
                self.options,
                &self.instance,
                command,
                args,
                &self.instance.root_dir,
                true,
            )
            .await
    }
}
