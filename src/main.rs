//! Dump/Restore Scenario Harness
//!
//! Provides CLI interface for running the dump, restore and hot-backup scenarios

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dumpharness::harness::attached::AttachedInstanceManager;
use dumpharness::harness::process::ProcessToolRunner;
use dumpharness::harness::TracingObserver;
use dumpharness::scenarios::{self, Registry};
use dumpharness::{Harness, HarnessOptions, ScenarioKind};

/// Main entry point for the scenario harness
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(true) => {
            println!("✅ All scenarios passed.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("❌ At least one scenario failed.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(options: &HarnessOptions) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.log_level));

    match options.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)),
    }
}

/// Runs the selected scenarios; returns whether every report passed.
async fn run_app() -> Result<bool> {
    dotenv::dotenv().ok();

    let config_path = HarnessOptions::config_path();
    let options = HarnessOptions::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load harness configuration from {}",
            config_path.display()
        )
    })?;
    init_tracing(&options)?;

    let mut registry = Registry::new();
    scenarios::setup(&mut registry, &options);

    let args: Vec<String> = env::args().skip(1).collect();
    let requested = if args.is_empty() {
        vec![prompt_choice(&registry)?]
    } else {
        args
    };
    let selected = select_scenarios(&registry, &requested)?;

    let instances = AttachedInstanceManager::default();
    let runner = ProcessToolRunner::new(options.clone());
    let observer = TracingObserver;
    let harness = Harness {
        instances: &instances,
        tools: &runner,
        scripts: &runner,
        backups: &runner,
        observer: &observer,
    };

    let mut all_passed = true;
    for kind in selected {
        let report = kind.run(&harness, &options).await;
        all_passed &= !report.is_failed();
        let rendered = serde_json::to_string_pretty(&report)
            .context("Failed to render scenario report")?;
        println!("{}: {}", kind, rendered);
    }
    Ok(all_passed)
}

fn select_scenarios(registry: &Registry, requested: &[String]) -> Result<Vec<ScenarioKind>> {
    if requested.iter().any(|name| name == "all") {
        return registry
            .defaults
            .iter()
            .map(|name| {
                registry
                    .get(name)
                    .with_context(|| format!("Default scenario '{}' is not registered", name))
            })
            .collect();
    }
    requested
        .iter()
        .map(|name| {
            registry.get(name.trim()).with_context(|| {
                format!(
                    "Unknown scenario '{}'. Known scenarios: {}",
                    name,
                    registry.defaults.join(", ")
                )
            })
        })
        .collect()
}

/// Prompts user to select a scenario
///
/// Returns the user's choice as String
fn prompt_choice(registry: &Registry) -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select a scenario:");
    for name in &registry.defaults {
        let description = registry.descriptions.get(name).map_or("", String::as_str);
        println!("  {:<22} {}", name, description);
    }
    println!("  {:<22} run every scenario", "all");
    for line in &registry.options_doc {
        println!("{}", line);
    }
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
