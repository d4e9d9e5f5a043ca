// dumpharness/src/config/mod.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "DUMPHARNESS_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    #[default]
    Rocksdb,
    Mmfiles,
}

impl StorageEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEngine::Rocksdb => "rocksdb",
            StorageEngine::Mmfiles => "mmfiles",
        }
    }
}

impl fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names (or paths) of the client tools driven by the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub bin_dir: Option<PathBuf>,
    pub dump: String,
    pub restore: String,
    pub backup: String,
    pub shell: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        ToolPaths {
            bin_dir: None,
            dump: "arangodump".to_string(),
            restore: "arangorestore".to_string(),
            backup: "arangobackup".to_string(),
            shell: "arangosh".to_string(),
        }
    }
}

/// Harness-wide options shared by every scenario of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessOptions {
    pub cluster: bool,
    pub storage_engine: StorageEngine,
    /// Set when the server build carries the enterprise feature set.
    pub enterprise: bool,
    pub encrypted: bool,
    pub skip_encrypted: bool,
    pub core_check: bool,
    pub extreme_verbosity: bool,
    /// Additional server arguments handed to the instance manager.
    pub extra_args: BTreeMap<String, serde_json::Value>,
    pub fixture_root: PathBuf,
    pub top_dir: PathBuf,
    pub work_dir: PathBuf,
    pub endpoint: String,
    pub tools: ToolPaths,
    pub tool_timeout_secs: u64,
    pub log_level: String,
    pub log_format: String,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        HarnessOptions {
            cluster: false,
            storage_engine: StorageEngine::default(),
            enterprise: false,
            encrypted: false,
            skip_encrypted: false,
            core_check: false,
            extreme_verbosity: false,
            extra_args: BTreeMap::new(),
            fixture_root: PathBuf::from("tests/js"),
            top_dir: PathBuf::from("."),
            work_dir: std::env::temp_dir().join("dumpharness"),
            endpoint: "tcp://127.0.0.1:8529".to_string(),
            tools: ToolPaths::default(),
            tool_timeout_secs: 900,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl HarnessOptions {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let options: HarnessOptions = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Resolves the config path from `DUMPHARNESS_CONFIG`, falling back to `config.json`.
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn validate(&self) -> Result<()> {
        let endpoint = Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid endpoint format: {}", self.endpoint))?;
        if endpoint.host_str().is_none() || endpoint.port().is_none() {
            return Err(anyhow::anyhow!(
                "endpoint must name a host and a port: {}",
                self.endpoint
            ));
        }
        if self.tool_timeout_secs == 0 {
            return Err(anyhow::anyhow!("tool_timeout_secs must be greater than zero"));
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                self.log_format
            ));
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Directory holding the dump scenario fixtures.
    pub fn dump_fixture_dir(&self) -> PathBuf {
        self.fixture_root.join("server").join("dump")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Per-tool configuration delta a scenario applies on top of the harness options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOptions {
    pub all_databases: bool,
    pub encrypted: bool,
    pub masking_file: Option<PathBuf>,
    pub credentials: Option<Credentials>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_missing_fields() -> anyhow::Result<()> {
        let options: HarnessOptions = serde_json::from_value(json!({
            "cluster": true,
            "storage_engine": "mmfiles"
        }))?;

        assert!(options.cluster);
        assert_eq!(options.storage_engine, StorageEngine::Mmfiles);
        assert_eq!(options.tools.dump, "arangodump");
        assert_eq!(options.endpoint, "tcp://127.0.0.1:8529");
        options.validate()?;
        Ok(())
    }

    #[test]
    fn test_load_from_json_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            json!({
                "enterprise": true,
                "fixture_root": "/srv/fixtures",
                "extra_args": {"server.threads": 4},
                "tool_timeout_secs": 30
            })
            .to_string(),
        )?;

        let options = HarnessOptions::load_from_json(&path)?;
        assert!(options.enterprise);
        assert_eq!(options.tool_timeout(), Duration::from_secs(30));
        assert_eq!(
            options.dump_fixture_dir(),
            PathBuf::from("/srv/fixtures/server/dump")
        );
        assert_eq!(options.extra_args.get("server.threads"), Some(&json!(4)));
        Ok(())
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let options = HarnessOptions {
            endpoint: "not an endpoint".to_string(),
            ..HarnessOptions::default()
        };
        assert!(options.validate().is_err());

        let options = HarnessOptions {
            endpoint: "tcp://localhost".to_string(),
            ..HarnessOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_invalid_log_format_and_timeout_rejected() {
        let options = HarnessOptions {
            log_format: "xml".to_string(),
            ..HarnessOptions::default()
        };
        assert!(options.validate().is_err());

        let options = HarnessOptions {
            tool_timeout_secs: 0,
            ..HarnessOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = HarnessOptions::load_from_json(Path::new("/nonexistent/config.json"));
        assert!(result.is_err());
    }
}
