//! Scenario catalog: the named variants, their fixture files and
//! configuration deltas, and their registration with the test runner.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::config::{Credentials, HarnessOptions, StorageEngine, ToolOptions};
use crate::harness::{ClientParams, Harness, ServerAuth};
use crate::pipeline;
use crate::report::ScenarioReport;
use crate::utils::make_path_unix;

const AUTH_USERNAME: &str = "foobaruser";
const AUTH_PASSWORD: &str = "foobarpasswd";
const AUTH_JWT_SECRET: &str = "haxxmann";
const MASKINGS_FILE: &str = "maskings1.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScenarioKind {
    Plain,
    Authenticated,
    Encrypted,
    Masked,
    Multiple,
    HotBackup,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 6] = [
        ScenarioKind::Plain,
        ScenarioKind::Authenticated,
        ScenarioKind::Encrypted,
        ScenarioKind::Masked,
        ScenarioKind::Multiple,
        ScenarioKind::HotBackup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::Plain => "dump",
            ScenarioKind::Authenticated => "dump_authentication",
            ScenarioKind::Encrypted => "dump_encrypted",
            ScenarioKind::Masked => "dump_maskings",
            ScenarioKind::Multiple => "dump_multiple",
            ScenarioKind::HotBackup => "hot_backup",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::Plain => "dump tests",
            ScenarioKind::Authenticated => "dump tests with authentication",
            ScenarioKind::Encrypted => "encrypted dump tests",
            ScenarioKind::Masked => "masked dump tests",
            ScenarioKind::Multiple => "restore multiple DBs at once",
            ScenarioKind::HotBackup => "hotbackup tests",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Builds the scenario for `options`, or the skip report if it does not apply.
    pub fn plan(&self, options: &HarnessOptions) -> Plan {
        match self {
            ScenarioKind::Plain => plain(options),
            ScenarioKind::Authenticated => authenticated(options),
            ScenarioKind::Encrypted => encrypted(options),
            ScenarioKind::Masked => masked(options),
            ScenarioKind::Multiple => multiple(options),
            ScenarioKind::HotBackup => hot_backup(options),
        }
    }

    pub async fn run(&self, harness: &Harness<'_>, options: &HarnessOptions) -> ScenarioReport {
        match self.plan(options) {
            Plan::Skip(report) => report,
            Plan::Run(spec) => pipeline::run(harness, &spec).await,
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum Plan {
    Run(Box<ScenarioSpec>),
    Skip(ScenarioReport),
}

/// Stage files specific to the mandatory part of a scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// setup, dump, cleanup, restore, verify, teardown
    DumpRestore { cleanup: PathBuf },
    /// setup, dump, restore, backup, modify, recheck, restore backup, verify, teardown
    HotBackup { modify: PathBuf, recheck: PathBuf },
}

/// Restore of data dumped by the other topology, and its check.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyCheck {
    pub directory: PathBuf,
    pub test: PathBuf,
}

/// One fully resolved scenario variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSpec {
    pub name: &'static str,
    /// Harness options with this scenario's server-side delta applied.
    pub options: HarnessOptions,
    pub server_auth: ServerAuth,
    pub client_auth: ClientParams,
    pub dump: ToolOptions,
    pub restore: ToolOptions,
    pub setup: PathBuf,
    pub test: PathBuf,
    pub teardown: PathBuf,
    pub flow: Flow,
    pub legacy_check: Option<LegacyCheck>,
    pub foxx_test: Option<PathBuf>,
}

/// Fixture name suffixes for the current topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterStrings {
    pub cluster: &'static str,
    pub not_cluster: &'static str,
}

pub fn cluster_strings(options: &HarnessOptions, all_databases: bool) -> ClusterStrings {
    if all_databases {
        ClusterStrings {
            cluster: "-multiple",
            not_cluster: "-multiple",
        }
    } else if options.cluster {
        ClusterStrings {
            cluster: "-cluster",
            not_cluster: "-singleserver",
        }
    } else {
        ClusterStrings {
            cluster: "",
            not_cluster: "-cluster",
        }
    }
}

fn fixture(options: &HarnessOptions, name: &str) -> PathBuf {
    make_path_unix(&options.dump_fixture_dir().join(name))
}

fn legacy_check(options: &HarnessOptions, all_databases: bool, test: &str) -> LegacyCheck {
    let not_cluster = cluster_strings(options, all_databases).not_cluster;
    LegacyCheck {
        directory: fixture(options, &format!("dump{}", not_cluster)),
        test: fixture(options, test),
    }
}

/// Setup, verification and teardown files named after the topology.
struct TopologyFiles {
    setup: PathBuf,
    test: PathBuf,
    teardown: PathBuf,
}

fn topology_files(options: &HarnessOptions) -> TopologyFiles {
    let c = cluster_strings(options, false).cluster;
    TopologyFiles {
        setup: fixture(options, &format!("dump-setup{}.js", c)),
        test: fixture(options, &format!("dump-{}{}.js", options.storage_engine, c)),
        teardown: fixture(options, &format!("dump-teardown{}.js", c)),
    }
}

fn plain(options: &HarnessOptions) -> Plan {
    let files = topology_files(options);
    Plan::Run(Box::new(ScenarioSpec {
        name: ScenarioKind::Plain.name(),
        options: options.clone(),
        server_auth: ServerAuth::default(),
        client_auth: ClientParams::new(),
        dump: ToolOptions::default(),
        restore: ToolOptions::default(),
        setup: files.setup,
        test: files.test,
        teardown: files.teardown,
        flow: Flow::DumpRestore {
            cleanup: fixture(options, "cleanup-nothing.js"),
        },
        legacy_check: Some(legacy_check(options, false, "check-graph.js")),
        foxx_test: Some(fixture(options, "check-foxx.js")),
    }))
}

fn multiple(options: &HarnessOptions) -> Plan {
    let files = topology_files(options);
    let all = ToolOptions {
        all_databases: true,
        ..ToolOptions::default()
    };
    Plan::Run(Box::new(ScenarioSpec {
        name: ScenarioKind::Multiple.name(),
        options: options.clone(),
        server_auth: ServerAuth::default(),
        client_auth: ClientParams::new(),
        dump: all.clone(),
        restore: all,
        setup: files.setup,
        test: files.test,
        teardown: files.teardown,
        flow: Flow::DumpRestore {
            cleanup: fixture(options, "cleanup-multiple.js"),
        },
        legacy_check: Some(legacy_check(options, true, "check-graph-multiple.js")),
        foxx_test: None,
    }))
}

fn authenticated(options: &HarnessOptions) -> Plan {
    let name = ScenarioKind::Authenticated.name();
    if options.cluster {
        if options.extreme_verbosity {
            tracing::info!(scenario = name, "Skipped because of cluster.");
        }
        return Plan::Skip(ScenarioReport::skipped(
            name,
            Some("skipped because of cluster".to_string()),
        ));
    }

    let credentials = ToolOptions {
        credentials: Some(Credentials {
            username: AUTH_USERNAME.to_string(),
            password: AUTH_PASSWORD.to_string(),
        }),
        ..ToolOptions::default()
    };
    Plan::Run(Box::new(ScenarioSpec {
        name,
        options: options.clone(),
        server_auth: ServerAuth {
            authentication: true,
            jwt_secret: Some(AUTH_JWT_SECRET.to_string()),
        },
        client_auth: ClientParams::from([(
            "server.authentication".to_string(),
            "true".to_string(),
        )]),
        dump: credentials.clone(),
        restore: credentials,
        setup: fixture(options, "dump-authentication-setup.js"),
        test: fixture(options, "dump-authentication.js"),
        teardown: fixture(options, "dump-teardown.js"),
        flow: Flow::DumpRestore {
            cleanup: fixture(options, "cleanup-nothing.js"),
        },
        legacy_check: None,
        foxx_test: Some(fixture(options, "check-foxx.js")),
    }))
}

fn encrypted(options: &HarnessOptions) -> Plan {
    let name = ScenarioKind::Encrypted.name();
    if !options.enterprise {
        tracing::info!(scenario = name, "skipping dump_encrypted test");
        return Plan::Skip(ScenarioReport::skipped(name, None));
    }
    if options.skip_encrypted {
        tracing::info!(scenario = name, "skipping dump_encrypted test by request");
        return Plan::Skip(ScenarioReport::skipped(
            name,
            Some("skipped by skip_encrypted".to_string()),
        ));
    }

    let files = topology_files(options);
    Plan::Run(Box::new(ScenarioSpec {
        name,
        options: options.clone(),
        server_auth: ServerAuth::default(),
        client_auth: ClientParams::new(),
        dump: ToolOptions {
            encrypted: true,
            ..ToolOptions::default()
        },
        restore: ToolOptions::default(),
        setup: files.setup,
        test: files.test,
        teardown: files.teardown,
        flow: Flow::DumpRestore {
            cleanup: fixture(options, "cleanup-nothing.js"),
        },
        legacy_check: None,
        foxx_test: Some(fixture(options, "check-foxx.js")),
    }))
}

fn masked(options: &HarnessOptions) -> Plan {
    let name = ScenarioKind::Masked.name();
    if !options.enterprise {
        tracing::info!(scenario = name, "skipping dump_maskings test");
        return Plan::Skip(ScenarioReport::skipped(name, None));
    }

    Plan::Run(Box::new(ScenarioSpec {
        name,
        options: options.clone(),
        server_auth: ServerAuth::default(),
        client_auth: ClientParams::new(),
        dump: ToolOptions {
            masking_file: Some(fixture(options, MASKINGS_FILE)),
            ..ToolOptions::default()
        },
        restore: ToolOptions::default(),
        setup: fixture(options, "dump-maskings-setup.js"),
        test: fixture(options, "dump-maskings.js"),
        teardown: fixture(options, "dump-teardown.js"),
        flow: Flow::DumpRestore {
            cleanup: fixture(options, "cleanup-nothing.js"),
        },
        legacy_check: None,
        foxx_test: None,
    }))
}

fn hot_backup(options: &HarnessOptions) -> Plan {
    let name = ScenarioKind::HotBackup.name();
    if options.storage_engine == StorageEngine::Mmfiles {
        return Plan::Skip(ScenarioReport::skipped(
            name,
            Some("hotbackup for mmfiles not yet implemented".to_string()),
        ));
    }
    if !options.enterprise {
        return Plan::Skip(ScenarioReport::skipped(
            name,
            Some("hotbackup is only enterprise".to_string()),
        ));
    }

    let mut options = options.clone();
    options
        .extra_args
        .insert("backup.api-enabled".to_string(), serde_json::Value::Bool(true));
    let files = topology_files(&options);
    let engine = options.storage_engine;
    Plan::Run(Box::new(ScenarioSpec {
        name,
        server_auth: ServerAuth::default(),
        client_auth: ClientParams::new(),
        dump: ToolOptions::default(),
        restore: ToolOptions::default(),
        setup: files.setup,
        test: files.test,
        teardown: files.teardown,
        flow: Flow::HotBackup {
            modify: fixture(&options, &format!("dump-{}-modify.js", engine)),
            recheck: fixture(&options, &format!("dump-{}-modified.js", engine)),
        },
        legacy_check: None,
        foxx_test: None,
        options,
    }))
}

/// What the test runner learns about the scenarios this module provides.
#[derive(Debug, Default)]
pub struct Registry {
    pub scenarios: BTreeMap<String, ScenarioKind>,
    pub defaults: Vec<String>,
    pub descriptions: BTreeMap<String, String>,
    pub options_doc: Vec<String>,
    pub test_paths: BTreeMap<String, Vec<PathBuf>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ScenarioKind> {
        self.scenarios.get(name).copied()
    }
}

/// Registers every scenario variant, its description and fixture search path.
pub fn setup(registry: &mut Registry, options: &HarnessOptions) {
    let fixture_dir = make_path_unix(&options.dump_fixture_dir());
    for kind in ScenarioKind::ALL {
        let name = kind.name().to_string();
        registry.scenarios.insert(name.clone(), kind);
        registry.defaults.push(name.clone());
        registry
            .descriptions
            .insert(name.clone(), kind.description().to_string());
        registry.test_paths.insert(name, vec![fixture_dir.clone()]);
    }
    registry.options_doc.push(
        "   - `skip_encrypted` : if set to true the encryption tests are skipped".to_string(),
    );
}
