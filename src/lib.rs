//! Scenario pipeline executor for validating a database's backup/restore
//! tooling end to end: dump, restore, verify and hot-backup scenarios run
//! against a live server, stopping at the first failed stage.

pub mod backup;
pub mod config;
pub mod errors;
pub mod harness;
pub mod operation;
pub mod pipeline;
pub mod report;
pub mod scenarios;
pub mod utils;

pub use config::HarnessOptions;
pub use harness::Harness;
pub use report::{ScenarioReport, StageOutcome};
pub use scenarios::{Registry, ScenarioKind};
