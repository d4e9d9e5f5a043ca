//! Scenario pipeline: runs the stages of one scenario against a freshly
//! started instance, stops at the first invalid stage and always tears the
//! instance down before returning the report.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::backup::{self, HOT_BACKUP_LABEL};
use crate::config::HarnessOptions;
use crate::harness::{ClientParams, Harness, InstanceHandle, Protocol};
use crate::operation::config::{self as op_config, ENCRYPTION_KEY};
use crate::operation::{BackupInvoker, OperationInvoker};
use crate::report::{ScenarioReport, StageOutcome, StageRecorder};
use crate::scenarios::{Flow, ScenarioSpec};

pub const SOURCE_DATABASE: &str = "UnitTestsDumpSrc";
pub const TARGET_DATABASE: &str = "UnitTestsDumpDst";
pub const FOXX_COMPLETE_DATABASE: &str = "UnitTestsDumpFoxxComplete";
pub const FOXX_APPS_BUNDLE_DATABASE: &str = "UnitTestsDumpFoxxAppsBundle";
pub const FOXX_BUNDLE_APPS_DATABASE: &str = "UnitTestsDumpFoxxBundleApps";
pub const APPS_COLLECTION: &str = "_apps";
pub const APP_BUNDLES_COLLECTION: &str = "_appbundles";

const DATABASE_PARAM: &str = "server.database";

/// Runs `spec` end to end and returns its report.
///
/// A server that fails to start yields a synthetic failure report without
/// running any stage.
pub async fn run(harness: &Harness<'_>, spec: &ScenarioSpec) -> ScenarioReport {
    harness.observer.scenario_started(spec.name);

    let started = harness
        .instances
        .start_instance(Protocol::Tcp, &spec.options, &spec.server_auth, spec.name)
        .await;
    let Some(instance) = started else {
        tracing::error!(scenario = spec.name, "failed to start server");
        let report = ScenarioReport::start_failure(spec.name);
        harness.observer.scenario_finished(spec.name, &report);
        return report;
    };

    let mut pipeline = DumpRestorePipeline::new(*harness, spec, instance);
    let completed = pipeline.execute().await;
    let report = pipeline.extract_results(completed).await;

    harness.observer.scenario_finished(spec.name, &report);
    report
}

struct DumpRestorePipeline<'a> {
    harness: Harness<'a>,
    spec: &'a ScenarioSpec,
    options: &'a HarnessOptions,
    instance: InstanceHandle,
    dump: OperationInvoker<'a>,
    restore: OperationInvoker<'a>,
    restore_legacy: OperationInvoker<'a>,
    backups: BackupInvoker<'a>,
    key_file: Option<PathBuf>,
    recorder: StageRecorder,
}

impl<'a> DumpRestorePipeline<'a> {
    fn new(harness: Harness<'a>, spec: &'a ScenarioSpec, instance: InstanceHandle) -> Self {
        let options = &spec.options;
        let root_dir = instance.root_dir.clone();

        let dump_config = op_config::for_dump(options, &spec.dump, &instance);
        let restore_config = op_config::for_restore(&spec.restore, &instance);
        let legacy_config =
            op_config::for_legacy_restore(options, &spec.dump, &spec.restore, &instance);
        let key_file = op_config::encryption_key_path(options, &spec.dump, &instance);

        DumpRestorePipeline {
            harness,
            spec,
            options,
            dump: OperationInvoker::new(harness.tools, options, dump_config, &root_dir),
            restore: OperationInvoker::new(harness.tools, options, restore_config, &root_dir),
            restore_legacy: OperationInvoker::new(harness.tools, options, legacy_config, &root_dir),
            backups: BackupInvoker::new(harness.tools, options, instance.clone()),
            instance,
            key_file,
            recorder: StageRecorder::new(),
        }
    }

    /// Runs the mandatory stages, then each declared extension block.
    /// Returns true iff every stage validated.
    async fn execute(&mut self) -> bool {
        if !self.write_encryption_key().await {
            return false;
        }

        let spec = self.spec;
        let mandatory = match &spec.flow {
            Flow::DumpRestore { cleanup } => {
                self.run_setup_suite(&spec.setup).await
                    && self.dump_from(SOURCE_DATABASE).await
                    && self.run_cleanup_suite(cleanup).await
                    && self.restore_to(TARGET_DATABASE).await
                    && self.run_tests("test", &spec.test, TARGET_DATABASE).await
                    && self.tear_down(&spec.teardown).await
            }
            Flow::HotBackup { modify, recheck } => {
                self.run_setup_suite(&spec.setup).await
                    && self.dump_from(SOURCE_DATABASE).await
                    && self.restore_to(TARGET_DATABASE).await
                    && self.check_alive("restore").await
                    && self.create_hot_backup().await
                    && self.check_alive("createHotBackup").await
                    && self.run_tests("modify", modify, TARGET_DATABASE).await
                    && self.check_alive("modify").await
                    && self.run_re_tests(recheck, TARGET_DATABASE).await
                    && self.check_alive("recheck").await
                    && self.restore_hot_backup().await
                    && self.run_tests("test", &spec.test, TARGET_DATABASE).await
                    && self.tear_down(&spec.teardown).await
            }
        };
        if !mandatory {
            return false;
        }

        if let Some(legacy) = &spec.legacy_check {
            if !(self.restore_old(&legacy.directory).await
                && self.test_restore_old(&legacy.test).await)
            {
                return false;
            }
        }

        if let Some(foxx_test) = &spec.foxx_test {
            if !(self.restore_foxx_complete(FOXX_COMPLETE_DATABASE).await
                && self
                    .test_foxx("testFoxxComplete", foxx_test, FOXX_COMPLETE_DATABASE)
                    .await
                && self
                    .restore_foxx_ordered(
                        "restoreFoxxAppsBundle",
                        FOXX_APPS_BUNDLE_DATABASE,
                        APPS_COLLECTION,
                        APP_BUNDLES_COLLECTION,
                    )
                    .await
                && self
                    .test_foxx("testFoxxAppsBundle", foxx_test, FOXX_APPS_BUNDLE_DATABASE)
                    .await
                && self
                    .restore_foxx_ordered(
                        "restoreFoxxBundleApps",
                        FOXX_BUNDLE_APPS_DATABASE,
                        APP_BUNDLES_COLLECTION,
                        APPS_COLLECTION,
                    )
                    .await
                && self
                    .test_foxx("testFoxxBundleApps", foxx_test, FOXX_BUNDLE_APPS_DATABASE)
                    .await)
            {
                return false;
            }
        }

        true
    }

    /// Removes the key file, shuts the instance down and folds everything into the report.
    async fn extract_results(self, completed: bool) -> ScenarioReport {
        if let Some(key_file) = &self.key_file {
            if let Err(e) = tokio::fs::remove_file(key_file).await {
                tracing::warn!(path = %key_file.display(), error = %e, "could not remove key file");
            }
        }

        tracing::info!(scenario = self.spec.name, "Shutting down...");
        let shutdown = self
            .harness
            .instances
            .shutdown(&self.instance, self.options)
            .await;
        tracing::info!(scenario = self.spec.name, status = shutdown.status, "done.");

        self.recorder.finalize(completed, Some(shutdown))
    }

    async fn write_encryption_key(&mut self) -> bool {
        let Some(key_file) = &self.key_file else {
            return true;
        };
        match tokio::fs::write(key_file, ENCRYPTION_KEY).await {
            Ok(()) => true,
            Err(e) => {
                let outcome = StageOutcome::failure(format!(
                    "failed to write encryption key {}: {}",
                    key_file.display(),
                    e
                ));
                self.key_file = None;
                self.recorder.record("encryptionKey", outcome, true);
                false
            }
        }
    }

    fn begin(&self, stage: &str) {
        self.harness.observer.stage_started(self.spec.name, stage);
    }

    /// Records the stage and checks it: valid iff its status is true and
    /// the server still responds. Liveness is only probed for successful stages.
    async fn validate(&mut self, stage: &str, outcome: StageOutcome) -> bool {
        let alive = !outcome.status || self.is_alive().await;
        let valid = self.recorder.record(stage, outcome.clone(), alive);
        self.harness
            .observer
            .stage_finished(self.spec.name, stage, &outcome, valid);
        valid
    }

    async fn is_alive(&self) -> bool {
        self.harness
            .instances
            .is_alive(&self.instance, self.options)
            .await
    }

    /// Uptime of the instance; a failing probe is logged and yields an empty object.
    async fn probe_uptime(&self) -> Value {
        match self.harness.instances.uptime(&self.instance, self.options).await {
            Ok(uptime) => uptime,
            Err(e) => {
                tracing::warn!(error = %e, "uptime probe failed, continuing anyways");
                Value::Object(serde_json::Map::new())
            }
        }
    }

    /// Liveness gate between hot-backup stages.
    async fn check_alive(&mut self, after: &str) -> bool {
        let alive = self.is_alive().await;
        let uptime = self.probe_uptime().await;
        tracing::debug!(scenario = self.spec.name, after, alive, %uptime, "liveness check");
        if !alive {
            tracing::warn!(scenario = self.spec.name, after, "server not responding");
            self.recorder.mark_failed();
        }
        alive
    }

    async fn run_script(&self, file: &Path, params: &ClientParams) -> StageOutcome {
        self.harness
            .scripts
            .run_script(self.options, &self.instance, file, params)
            .await
    }

    fn database_params(database: &str) -> ClientParams {
        ClientParams::from([(DATABASE_PARAM.to_string(), database.to_string())])
    }

    async fn run_setup_suite(&mut self, file: &Path) -> bool {
        self.begin("setup");
        let outcome = self.run_script(file, &self.spec.client_auth).await;
        self.validate("setup", outcome).await
    }

    async fn run_cleanup_suite(&mut self, file: &Path) -> bool {
        self.begin("cleanup");
        let outcome = self.run_script(file, &self.spec.client_auth).await;
        self.validate("cleanup", outcome).await
    }

    async fn dump_from(&mut self, database: &str) -> bool {
        self.begin("dump");
        self.dump.config_mut().set_database(database);
        let outcome = self.dump.invoke().await;
        self.validate("dump", outcome).await
    }

    async fn restore_to(&mut self, database: &str) -> bool {
        self.begin("restore");
        self.restore.config_mut().set_database(database);
        let outcome = self.restore.invoke().await;
        self.validate("restore", outcome).await
    }

    /// Verification after a restore. In all-databases mode the data keeps
    /// its original database name, so the source name is checked instead.
    async fn run_tests(&mut self, stage: &str, file: &Path, database: &str) -> bool {
        self.begin(stage);
        let database = if self.restore.config().have_set_all_databases() {
            SOURCE_DATABASE
        } else {
            database
        };
        let outcome = self
            .run_script(file, &Self::database_params(database))
            .await;
        self.validate(stage, outcome).await
    }

    async fn run_re_tests(&mut self, file: &Path, database: &str) -> bool {
        self.begin("recheck");
        let outcome = self
            .run_script(file, &Self::database_params(database))
            .await;
        self.validate("recheck", outcome).await
    }

    async fn tear_down(&mut self, file: &Path) -> bool {
        self.begin("tearDown");
        let outcome = self.run_script(file, &ClientParams::new()).await;
        self.validate("tearDown", outcome).await
    }

    async fn restore_old(&mut self, directory: &Path) -> bool {
        self.begin("restoreOld");
        self.restore_legacy
            .config_mut()
            .set_input_directory(directory, false);
        let outcome = self.restore_legacy.invoke().await;
        self.validate("restoreOld", outcome).await
    }

    async fn test_restore_old(&mut self, file: &Path) -> bool {
        self.begin("testRestoreOld");
        let outcome = self.run_script(file, &ClientParams::new()).await;
        self.validate("testRestoreOld", outcome).await
    }

    async fn restore_foxx_complete(&mut self, database: &str) -> bool {
        self.begin("restoreFoxxComplete");
        self.restore.config_mut().set_database(database);
        let outcome = self.restore.invoke().await;
        self.validate("restoreFoxxComplete", outcome).await
    }

    /// Restores `first` alone, then `second` alone, into `database`.
    async fn restore_foxx_ordered(
        &mut self,
        stage: &str,
        database: &str,
        first: &str,
        second: &str,
    ) -> bool {
        let step1 = format!("{}Step1", stage);
        self.begin(&step1);
        self.restore.config_mut().set_database(database);
        self.restore.config_mut().restrict_to_collection(first);
        let outcome = self.restore.invoke().await;
        if !self.validate(&step1, outcome).await {
            return false;
        }

        let step2 = format!("{}Step2", stage);
        self.begin(&step2);
        self.restore.config_mut().restrict_to_collection(second);
        let outcome = self.restore.invoke().await;
        self.validate(&step2, outcome).await
    }

    async fn test_foxx(&mut self, stage: &str, file: &Path, database: &str) -> bool {
        self.begin(stage);
        let outcome = self
            .run_script(file, &Self::database_params(database))
            .await;
        self.validate(stage, outcome).await
    }

    async fn create_hot_backup(&mut self) -> bool {
        self.begin("createHotBackup");
        let outcome = self.backups.create(HOT_BACKUP_LABEL).await;
        self.validate("createHotBackup", outcome).await
    }

    /// Looks the backup up by label and restores it. No match is a stage
    /// failure and the backup tool is not called.
    async fn restore_hot_backup(&mut self) -> bool {
        self.begin("restoreHotBackup");
        let catalog = match self.harness.backups.list_backups().await {
            Ok(catalog) => catalog,
            Err(e) => {
                let outcome = StageOutcome::failure(format!("failed to list backups: {:#}", e));
                return self.validate("restoreHotBackup", outcome).await;
            }
        };

        let Some(identifier) = backup::resolve(&catalog, HOT_BACKUP_LABEL) else {
            tracing::warn!(
                scenario = self.spec.name,
                label = HOT_BACKUP_LABEL,
                backups = catalog.len(),
                "didn't find a backup matching our pattern!"
            );
            let outcome = StageOutcome::failure(format!(
                "no backup matching '{}' found",
                HOT_BACKUP_LABEL
            ));
            return self.validate("restoreHotBackup", outcome).await;
        };

        tracing::info!(scenario = self.spec.name, identifier, "restoring backup");
        let outcome = self.backups.restore(identifier).await;
        self.validate("restoreHotBackup", outcome).await
    }
}
