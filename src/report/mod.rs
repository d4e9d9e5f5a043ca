//! Stage outcomes and the per-scenario report they fold into.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Outcome of one stage: a tool call, a script run, or a backup operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    /// Set when the stage is recorded: 1 if the stage failed validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured tool output, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StageOutcome {
    pub fn success() -> Self {
        StageOutcome {
            status: true,
            ..StageOutcome::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        StageOutcome {
            status: false,
            message: Some(message.into()),
            ..StageOutcome::default()
        }
    }

    pub fn skipped(message: Option<String>) -> Self {
        StageOutcome {
            status: true,
            skipped: true,
            message,
            ..StageOutcome::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Ordered stage outcomes of one scenario run plus the aggregate flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub failed: u8,
    stages: Vec<(String, StageOutcome)>,
    pub shutdown: Option<StageOutcome>,
}

impl ScenarioReport {
    /// Report for a server that never came up; no stage ran.
    pub fn start_failure(scenario: &str) -> Self {
        ScenarioReport {
            failed: 1,
            stages: vec![(
                scenario.to_string(),
                StageOutcome::failure("failed to start server!"),
            )],
            shutdown: None,
        }
    }

    /// Report for a variant that is not applicable to this build or topology.
    pub fn skipped(scenario: &str, message: Option<String>) -> Self {
        ScenarioReport {
            failed: 0,
            stages: vec![(scenario.to_string(), StageOutcome::skipped(message))],
            shutdown: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed != 0
    }

    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|(stage, _)| stage == name)
            .map(|(_, outcome)| outcome)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn stages(&self) -> impl Iterator<Item = (&str, &StageOutcome)> {
        self.stages.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Serialize for ScenarioReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = 1 + usize::from(self.shutdown.is_some());
        let mut map = serializer.serialize_map(Some(self.stages.len() + extra))?;
        map.serialize_entry("failed", &self.failed)?;
        for (name, outcome) in &self.stages {
            map.serialize_entry(name, outcome)?;
        }
        if let Some(shutdown) = &self.shutdown {
            map.serialize_entry("shutdown", shutdown)?;
        }
        map.end()
    }
}

/// Accumulates stage outcomes for one pipeline run.
///
/// The aggregate flag starts pessimistic and only clears when the run
/// completes with every recorded stage valid and no gate tripped.
#[derive(Debug)]
pub struct StageRecorder {
    stages: Vec<(String, StageOutcome)>,
    gate_failed: bool,
}

impl Default for StageRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRecorder {
    pub fn new() -> Self {
        StageRecorder {
            stages: Vec::new(),
            gate_failed: false,
        }
    }

    /// Records `outcome` under `name` and returns whether the stage is valid.
    ///
    /// A stage is valid iff its status is true and the server was alive
    /// afterwards. Re-recording a name replaces the earlier outcome in place.
    pub fn record(&mut self, name: &str, mut outcome: StageOutcome, server_alive: bool) -> bool {
        let valid = outcome.status && server_alive;
        outcome.failed = Some(u8::from(!valid));

        match self.stages.iter_mut().find(|(stage, _)| stage == name) {
            Some((_, existing)) => *existing = outcome,
            None => self.stages.push((name.to_string(), outcome)),
        }
        valid
    }

    /// Flags the run as failed without recording a stage (e.g. a liveness gate).
    /// Sticky: later valid stages do not clear it.
    pub fn mark_failed(&mut self) {
        self.gate_failed = true;
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn finalize(self, completed: bool, shutdown: Option<StageOutcome>) -> ScenarioReport {
        let all_valid = self
            .stages
            .iter()
            .all(|(_, outcome)| outcome.failed == Some(0));
        let failed = if completed && all_valid && !self.gate_failed && !self.stages.is_empty() {
            0
        } else {
            1
        };
        ScenarioReport {
            failed,
            stages: self.stages,
            shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_preserves_insertion_order() {
        let mut recorder = StageRecorder::new();
        recorder.record("setup", StageOutcome::success(), true);
        recorder.record("dump", StageOutcome::success(), true);
        recorder.record("cleanup", StageOutcome::success(), true);

        let report = recorder.finalize(true, None);
        assert_eq!(report.stage_names(), vec!["setup", "dump", "cleanup"]);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_record_validates_status_and_liveness() {
        let mut recorder = StageRecorder::new();
        assert!(recorder.record("setup", StageOutcome::success(), true));
        assert!(!recorder.record("dump", StageOutcome::success(), false));
        assert!(!recorder.record("restore", StageOutcome::failure("boom"), true));

        let report = recorder.finalize(false, None);
        assert_eq!(report.stage("setup").and_then(|o| o.failed), Some(0));
        assert_eq!(report.stage("dump").and_then(|o| o.failed), Some(1));
        assert_eq!(report.stage("restore").and_then(|o| o.failed), Some(1));
        assert!(report.is_failed());
    }

    #[test]
    fn test_rerecording_replaces_in_place() {
        let mut recorder = StageRecorder::new();
        recorder.record("setup", StageOutcome::success(), true);
        recorder.record("test", StageOutcome::failure("first"), true);
        recorder.record("tearDown", StageOutcome::success(), true);
        recorder.record("test", StageOutcome::success(), true);

        let report = recorder.finalize(true, None);
        assert_eq!(report.stage_names(), vec!["setup", "test", "tearDown"]);
        assert_eq!(report.stage("test").map(|o| o.status), Some(true));
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_aborted_or_empty_run_stays_failed() {
        let mut recorder = StageRecorder::new();
        recorder.record("setup", StageOutcome::success(), true);
        assert_eq!(recorder.finalize(false, None).failed, 1);

        assert_eq!(StageRecorder::new().finalize(true, None).failed, 1);

        let mut recorder = StageRecorder::new();
        recorder.record("setup", StageOutcome::success(), true);
        recorder.mark_failed();
        assert_eq!(recorder.finalize(false, None).failed, 1);
    }

    #[test]
    fn test_tripped_gate_fails_completed_run() {
        let mut recorder = StageRecorder::new();
        recorder.record("setup", StageOutcome::success(), true);
        recorder.mark_failed();
        recorder.record("dump", StageOutcome::success(), true);

        let report = recorder.finalize(true, None);
        assert_eq!(report.failed, 1);
        assert!(report.stages().all(|(_, outcome)| outcome.failed == Some(0)));
    }

    #[test]
    fn test_report_serializes_as_ordered_map() -> anyhow::Result<()> {
        let mut recorder = StageRecorder::new();
        recorder.record("setup", StageOutcome::success(), true);
        let report = recorder.finalize(true, Some(StageOutcome::success()));

        let text = serde_json::to_string(&report)?;
        assert_eq!(
            text,
            r#"{"failed":0,"setup":{"status":true,"failed":0},"shutdown":{"status":true}}"#
        );
        Ok(())
    }

    #[test]
    fn test_skipped_and_start_failure_reports() -> anyhow::Result<()> {
        let skipped = ScenarioReport::skipped("dump_encrypted", None);
        assert_eq!(
            serde_json::to_value(&skipped)?,
            json!({"failed": 0, "dump_encrypted": {"status": true, "skipped": true}})
        );

        let failure = ScenarioReport::start_failure("dump");
        assert!(failure.is_failed());
        assert_eq!(
            failure.stage("dump").and_then(|o| o.message.as_deref()),
            Some("failed to start server!")
        );
        Ok(())
    }
}
