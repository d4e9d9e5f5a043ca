// dumpharness/src/operation/config.rs
use std::path::{Path, PathBuf};

use crate::config::{Credentials, HarnessOptions, ToolOptions};
use crate::harness::InstanceHandle;

/// Directory, relative to the instance root, the dump is written to and restored from.
pub const DUMP_DIRECTORY: &str = "dump";
/// Database the legacy-data restore targets unless all-databases mode is active.
pub const LEGACY_RESTORE_DATABASE: &str = "_system";
/// Name of the key file written under the instance root when encryption is active.
pub const ENCRYPTION_KEY_FILE: &str = "secret-key";
/// Symmetric key written to the key file; the tools require exactly 32 bytes.
pub const ENCRYPTION_KEY: &str = "DER-HUND-der-hund-der-hund-der-h";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Dump,
    Restore,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Dump => "dump",
            ToolKind::Restore => "restore",
        }
    }
}

/// Parameter set for one dump or restore tool family.
///
/// The pipeline mutates it between stages; each invocation sees the state
/// current at call time.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationConfig {
    kind: ToolKind,
    endpoint: String,
    directory: Option<PathBuf>,
    directory_relative: bool,
    database: Option<String>,
    all_databases: bool,
    collection: Option<String>,
    include_system: bool,
    masking_file: Option<PathBuf>,
    encryption_key_file: Option<PathBuf>,
    root_dir: Option<PathBuf>,
    credentials: Option<Credentials>,
}

impl OperationConfig {
    pub fn new(kind: ToolKind, endpoint: impl Into<String>) -> Self {
        OperationConfig {
            kind,
            endpoint: endpoint.into(),
            directory: None,
            directory_relative: false,
            database: None,
            all_databases: false,
            collection: None,
            include_system: false,
            masking_file: None,
            encryption_key_file: None,
            root_dir: None,
            credentials: None,
        }
    }

    pub fn set_output_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = Some(directory.into());
        self.directory_relative = true;
    }

    /// `relative` resolves the directory against the root directory at invocation time.
    pub fn set_input_directory(&mut self, directory: impl Into<PathBuf>, relative: bool) {
        self.directory = Some(directory.into());
        self.directory_relative = relative;
    }

    pub fn set_include_system(&mut self, include: bool) {
        self.include_system = include;
    }

    pub fn set_maskings(&mut self, masking_file: impl Into<PathBuf>) {
        self.masking_file = Some(masking_file.into());
    }

    /// Switches to all-databases mode and drops any explicit database selection.
    pub fn set_all_databases(&mut self) {
        self.all_databases = true;
        self.database = None;
    }

    pub fn have_set_all_databases(&self) -> bool {
        self.all_databases
    }

    /// Selects `name` as target database. Ignored in all-databases mode;
    /// returns whether the selection took effect.
    pub fn set_database(&mut self, name: &str) -> bool {
        if self.all_databases {
            return false;
        }
        self.database = Some(name.to_string());
        true
    }

    /// Narrows the invocation to exactly `name`, replacing any earlier restriction.
    pub fn restrict_to_collection(&mut self, name: &str) {
        self.collection = Some(name.to_string());
    }

    pub fn set_root_dir(&mut self, root_dir: impl Into<PathBuf>) {
        self.root_dir = Some(root_dir.into());
    }

    pub fn activate_encryption(&mut self, key_file: impl Into<PathBuf>) {
        self.encryption_key_file = Some(key_file.into());
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn include_system(&self) -> bool {
        self.include_system
    }

    pub fn masking_file(&self) -> Option<&Path> {
        self.masking_file.as_deref()
    }

    pub fn encryption_key_file(&self) -> Option<&Path> {
        self.encryption_key_file.as_deref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_key_file.is_some()
    }

    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The root directory override if set, otherwise `default_root`.
    pub fn effective_root(&self, default_root: &Path) -> PathBuf {
        self.root_dir
            .clone()
            .unwrap_or_else(|| default_root.to_path_buf())
    }

    pub fn resolved_directory(&self, default_root: &Path) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| {
            if self.directory_relative {
                self.effective_root(default_root).join(dir)
            } else {
                dir.clone()
            }
        })
    }

    /// Command-line arguments for the dump or restore tool.
    pub fn to_args(&self, default_root: &Path) -> Vec<String> {
        let mut args = vec!["--server.endpoint".to_string(), self.endpoint.clone()];

        if self.all_databases {
            args.extend(["--all-databases".to_string(), "true".to_string()]);
        } else if let Some(database) = &self.database {
            args.extend(["--server.database".to_string(), database.clone()]);
        }

        match &self.credentials {
            Some(credentials) => args.extend([
                "--server.username".to_string(),
                credentials.username.clone(),
                "--server.password".to_string(),
                credentials.password.clone(),
            ]),
            None => args.extend(["--server.password".to_string(), String::new()]),
        }

        if let Some(directory) = self.resolved_directory(default_root) {
            let flag = match self.kind {
                ToolKind::Dump => "--output-directory",
                ToolKind::Restore => "--input-directory",
            };
            args.extend([flag.to_string(), directory.display().to_string()]);
        }

        match self.kind {
            ToolKind::Dump => args.extend(["--overwrite".to_string(), "true".to_string()]),
            ToolKind::Restore => {
                args.extend(["--create-database".to_string(), "true".to_string()])
            }
        }

        if self.include_system {
            args.extend([
                "--include-system-collections".to_string(),
                "true".to_string(),
            ]);
        }
        if let Some(collection) = &self.collection {
            args.extend(["--collection".to_string(), collection.clone()]);
        }
        if let Some(masking_file) = &self.masking_file {
            args.extend(["--maskings".to_string(), masking_file.display().to_string()]);
        }
        if let Some(key_file) = &self.encryption_key_file {
            args.extend([
                "--encryption.keyfile".to_string(),
                key_file.display().to_string(),
            ]);
        }
        args
    }
}

/// Whether dump and legacy restore run encrypted for this scenario.
pub fn encryption_active(options: &HarnessOptions, dump: &ToolOptions) -> bool {
    options.encrypted || dump.encrypted
}

/// Path of the encryption key file under the instance root, if encryption is active.
pub fn encryption_key_path(
    options: &HarnessOptions,
    dump: &ToolOptions,
    instance: &InstanceHandle,
) -> Option<PathBuf> {
    encryption_active(options, dump).then(|| instance.root_dir.join(ENCRYPTION_KEY_FILE))
}

fn base_config(kind: ToolKind, tool: &ToolOptions, instance: &InstanceHandle) -> OperationConfig {
    let mut config = OperationConfig::new(kind, instance.endpoint.clone());
    if let Some(credentials) = &tool.credentials {
        config.set_credentials(credentials.clone());
    }
    config
}

pub fn for_dump(
    options: &HarnessOptions,
    dump: &ToolOptions,
    instance: &InstanceHandle,
) -> OperationConfig {
    let mut config = base_config(ToolKind::Dump, dump, instance);
    config.set_output_directory(DUMP_DIRECTORY);
    config.set_include_system(true);
    if let Some(masking_file) = &dump.masking_file {
        config.set_maskings(masking_file);
    }
    if dump.all_databases {
        config.set_all_databases();
    }
    if let Some(key_file) = encryption_key_path(options, dump, instance) {
        config.activate_encryption(key_file);
    }
    config
}

pub fn for_restore(restore: &ToolOptions, instance: &InstanceHandle) -> OperationConfig {
    let mut config = base_config(ToolKind::Restore, restore, instance);
    config.set_input_directory(DUMP_DIRECTORY, true);
    config.set_include_system(true);
    if restore.all_databases {
        config.set_all_databases();
    }
    config
}

/// Restore config for data produced by an older release, rooted at `top_dir`.
/// Mirrors the dump's encryption setting.
pub fn for_legacy_restore(
    options: &HarnessOptions,
    dump: &ToolOptions,
    restore: &ToolOptions,
    instance: &InstanceHandle,
) -> OperationConfig {
    let mut config = base_config(ToolKind::Restore, restore, instance);
    config.set_input_directory(DUMP_DIRECTORY, true);
    config.set_include_system(true);
    config.set_root_dir(&options.top_dir);
    if let Some(key_file) = encryption_key_path(options, dump, instance) {
        config.activate_encryption(key_file);
    }
    if restore.all_databases {
        config.set_all_databases();
    } else {
        config.set_database(LEGACY_RESTORE_DATABASE);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn instance() -> InstanceHandle {
        InstanceHandle {
            label: "dump".to_string(),
            endpoint: "tcp://127.0.0.1:8529".to_string(),
            root_dir: PathBuf::from("/tmp/instance"),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_encryption_key_is_32_bytes() {
        assert_eq!(ENCRYPTION_KEY.len(), 32);
    }

    #[test]
    fn test_all_databases_excludes_explicit_database() {
        let mut config = OperationConfig::new(ToolKind::Dump, "tcp://127.0.0.1:8529");
        assert!(config.set_database("UnitTestsDumpSrc"));
        config.set_all_databases();
        assert_eq!(config.database(), None);

        assert!(!config.set_database("UnitTestsDumpDst"));
        assert_eq!(config.database(), None);
        assert!(config.have_set_all_databases());

        let args = config.to_args(Path::new("/root"));
        assert!(args.contains(&"--all-databases".to_string()));
        assert!(!args.contains(&"--server.database".to_string()));
    }

    #[test]
    fn test_restrict_to_collection_replaces() {
        let mut config = OperationConfig::new(ToolKind::Restore, "tcp://127.0.0.1:8529");
        config.restrict_to_collection("_apps");
        config.restrict_to_collection("_appbundles");
        assert_eq!(config.collection(), Some("_appbundles"));

        let args = config.to_args(Path::new("/root"));
        let collections: Vec<_> = args
            .windows(2)
            .filter(|pair| pair[0] == "--collection")
            .map(|pair| pair[1].as_str())
            .collect();
        assert_eq!(collections, vec!["_appbundles"]);
    }

    #[test]
    fn test_for_dump_applies_deltas_in_order() {
        let options = HarnessOptions {
            encrypted: true,
            ..HarnessOptions::default()
        };
        let dump = ToolOptions {
            masking_file: Some(PathBuf::from("/fixtures/maskings1.json")),
            ..ToolOptions::default()
        };
        let config = for_dump(&options, &dump, &instance());

        assert_eq!(config.kind(), ToolKind::Dump);
        assert!(config.include_system());
        assert_eq!(
            config.masking_file(),
            Some(Path::new("/fixtures/maskings1.json"))
        );
        assert_eq!(
            config.encryption_key_file(),
            Some(Path::new("/tmp/instance/secret-key"))
        );
        assert_eq!(
            config.resolved_directory(Path::new("/tmp/instance")),
            Some(PathBuf::from("/tmp/instance/dump"))
        );
    }

    #[test]
    fn test_restore_is_never_encrypted() {
        let options = HarnessOptions {
            encrypted: true,
            ..HarnessOptions::default()
        };
        let config = for_restore(&ToolOptions::default(), &instance());
        assert!(!config.is_encrypted());

        let legacy =
            for_legacy_restore(&options, &ToolOptions::default(), &ToolOptions::default(), &instance());
        assert!(legacy.is_encrypted());
    }

    #[test]
    fn test_legacy_restore_targets_system_database_and_top_dir() {
        let options = HarnessOptions {
            top_dir: PathBuf::from("/src/top"),
            ..HarnessOptions::default()
        };
        let legacy =
            for_legacy_restore(&options, &ToolOptions::default(), &ToolOptions::default(), &instance());
        assert_eq!(legacy.database(), Some(LEGACY_RESTORE_DATABASE));
        assert_eq!(
            legacy.resolved_directory(Path::new("/tmp/instance")),
            Some(PathBuf::from("/src/top/dump"))
        );

        let all = ToolOptions {
            all_databases: true,
            ..ToolOptions::default()
        };
        let legacy = for_legacy_restore(&options, &ToolOptions::default(), &all, &instance());
        assert_eq!(legacy.database(), None);
        assert!(legacy.have_set_all_databases());
    }

    #[test]
    fn test_absolute_input_directory_ignores_root() {
        let mut config = for_restore(&ToolOptions::default(), &instance());
        config.set_input_directory("/fixtures/server/dump/dump-cluster", false);
        assert_eq!(
            config.resolved_directory(Path::new("/tmp/instance")),
            Some(PathBuf::from("/fixtures/server/dump/dump-cluster"))
        );
    }

    #[test]
    fn test_credentials_passed_to_tool() {
        let restore = ToolOptions {
            credentials: Some(Credentials {
                username: "foobaruser".to_string(),
                password: "foobarpasswd".to_string(),
            }),
            ..ToolOptions::default()
        };
        let args = for_restore(&restore, &instance()).to_args(Path::new("/tmp/instance"));
        let user = args.iter().position(|arg| arg == "--server.username");
        assert_eq!(user.and_then(|i| args.get(i + 1)).map(String::as_str), Some("foobaruser"));
    }
}
