//! Hot-backup catalog and label lookup.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HarnessError, Result};

/// Label the hot-backup scenario creates its backup under.
pub const HOT_BACKUP_LABEL: &str = "testHotBackup";

/// Metadata the backup subsystem reports for one backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupMeta {
    pub id: Option<String>,
    pub version: Option<String>,
    pub datetime: Option<String>,
    pub size_in_bytes: Option<u64>,
    pub nr_files: Option<u64>,
    #[serde(rename = "nrDBServers")]
    pub nr_db_servers: Option<u64>,
    pub available: Option<bool>,
    pub potentially_inconsistent: Option<bool>,
}

impl BackupMeta {
    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let datetime = self.datetime.as_deref()?;
        chrono::DateTime::parse_from_rfc3339(datetime)
            .ok()
            .map(|parsed| parsed.with_timezone(&chrono::Utc))
    }
}

/// Backups keyed by identifier, in the order the backup subsystem enumerated them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupCatalog {
    entries: Vec<(String, BackupMeta)>,
}

impl BackupCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, BackupMeta)>) -> Self {
        BackupCatalog {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn push(&mut self, identifier: impl Into<String>, meta: BackupMeta) {
        self.entries.push((identifier.into(), meta));
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn get(&self, identifier: &str) -> Option<&BackupMeta> {
        self.entries
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, meta)| meta)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses a backup list document.
    ///
    /// Accepts `{"result": {"list": {...}}}`, `{"list": {...}}` or a bare
    /// identifier-to-metadata object. Key order is preserved.
    pub fn from_json(text: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(text)?;
        let list = document
            .pointer("/result/list")
            .or_else(|| document.get("list"))
            .unwrap_or(&document);
        let Value::Object(list) = list else {
            return Err(HarnessError::Catalog(
                "backup list is not an object".to_string(),
            ));
        };

        let mut catalog = BackupCatalog::new();
        for (identifier, meta) in list {
            let meta: BackupMeta = serde_json::from_value(meta.clone())?;
            catalog.push(identifier.clone(), meta);
        }
        Ok(catalog)
    }
}

/// Finds the backup whose identifier contains `label`.
///
/// Every entry is examined and a later match replaces an earlier one, so
/// with several matches the last one enumerated wins. Enumeration order is
/// whatever the backup subsystem provided, not necessarily chronological.
pub fn resolve<'a>(catalog: &'a BackupCatalog, label: &str) -> Option<&'a str> {
    let mut candidate = None;
    for identifier in catalog.identifiers() {
        if identifier.contains(label) {
            candidate = Some(identifier);
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(ids: &[&str]) -> BackupCatalog {
        BackupCatalog::from_entries(ids.iter().map(|id| (id.to_string(), BackupMeta::default())))
    }

    #[test]
    fn test_resolve_single_match() {
        let catalog = catalog(&["2024-05-01T10.00.00_other", "2024-05-01T10.05.00_testHotBackup"]);
        assert_eq!(
            resolve(&catalog, HOT_BACKUP_LABEL),
            Some("2024-05-01T10.05.00_testHotBackup")
        );
    }

    #[test]
    fn test_resolve_last_enumerated_match_wins() {
        let catalog = catalog(&[
            "2024-05-02T10.00.00_testHotBackup",
            "2024-05-01T10.00.00_unrelated",
            "2024-05-01T09.00.00_testHotBackup",
        ]);
        assert_eq!(
            resolve(&catalog, HOT_BACKUP_LABEL),
            Some("2024-05-01T09.00.00_testHotBackup")
        );
    }

    #[test]
    fn test_resolve_no_match() {
        assert_eq!(resolve(&catalog(&["a", "b"]), HOT_BACKUP_LABEL), None);
        assert_eq!(resolve(&BackupCatalog::new(), HOT_BACKUP_LABEL), None);
    }

    #[test]
    fn test_from_json_preserves_enumeration_order() -> anyhow::Result<()> {
        let text = r#"{
            "error": false,
            "result": {
                "list": {
                    "2024-05-02T10.00.00_testHotBackup": {
                        "id": "2024-05-02T10.00.00_testHotBackup",
                        "datetime": "2024-05-02T10:00:00Z",
                        "sizeInBytes": 1024,
                        "nrDBServers": 1
                    },
                    "2024-05-01T10.00.00_testHotBackup": {
                        "datetime": "2024-05-01T10:00:00Z"
                    }
                }
            }
        }"#;
        let catalog = BackupCatalog::from_json(text)?;

        assert_eq!(
            catalog.identifiers().collect::<Vec<_>>(),
            vec![
                "2024-05-02T10.00.00_testHotBackup",
                "2024-05-01T10.00.00_testHotBackup"
            ]
        );
        let first = catalog
            .get("2024-05-02T10.00.00_testHotBackup")
            .ok_or_else(|| anyhow::anyhow!("missing entry"))?;
        assert_eq!(first.size_in_bytes, Some(1024));
        assert_eq!(first.nr_db_servers, Some(1));
        assert!(first.created_at().is_some());
        assert_eq!(
            resolve(&catalog, HOT_BACKUP_LABEL),
            Some("2024-05-01T10.00.00_testHotBackup")
        );
        Ok(())
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(BackupCatalog::from_json(r#"{"list": []}"#).is_err());
        assert!(BackupCatalog::from_json("not json").is_err());
    }
}
