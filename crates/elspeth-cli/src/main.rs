#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// elspeth-cli/src/main.rs
// ============================================================================
// Module: Elspeth CLI Entry Point
// Description: Command dispatcher for run, resume, and purge workflows.
// Purpose: Provide a safe CLI over the engine with strict exit codes.
// Dependencies: clap, elspeth-config, elspeth-core, elspeth-engine,
//               elspeth-plugins, elspeth-store-sqlite, tracing-subscriber
// ============================================================================

//! ## Overview
//! The Elspeth CLI executes pipelines (`run`), resumes failed runs from
//! their latest checkpoint (`resume`), and deletes expired payloads
//! (`purge`). Every failure exits with code 1; missing database files never
//! auto-create one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::BufRead;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use elspeth_config::PipelineSettings;
use elspeth_config::StepSettings;
use elspeth_config::load_settings;
use elspeth_core::RunId;
use elspeth_core::SinkName;
use elspeth_core::SystemClock;
use elspeth_engine::Orchestrator;
use elspeth_engine::PluginSet;
use elspeth_engine::TracingObserver;
use elspeth_plugins::build_gate;
use elspeth_plugins::build_sink;
use elspeth_plugins::build_source;
use elspeth_plugins::build_transform;
use elspeth_store_sqlite::FsPayloadStore;
use elspeth_store_sqlite::SqliteRecorder;
use elspeth_store_sqlite::purge_expired_payloads;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "elspeth", version, arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a pipeline and optionally execute it.
    Run(RunCommand),
    /// Resume a failed run from its latest checkpoint.
    Resume(ResumeCommand),
    /// Delete expired payloads for terminal runs.
    Purge(PurgeCommand),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
struct RunCommand {
    /// Path to the pipeline settings file.
    #[arg(long)]
    settings: PathBuf,
    /// Execute the pipeline; without this flag only validation runs.
    #[arg(long)]
    execute: bool,
    /// Path to the audit database.
    #[arg(long, default_value = "elspeth.db")]
    database: PathBuf,
    /// Payload store directory.
    #[arg(long, default_value = "payloads")]
    payload_dir: PathBuf,
}

/// Arguments for the `resume` subcommand.
#[derive(Args, Debug)]
struct ResumeCommand {
    /// Run identifier to resume.
    run_id: String,
    /// Path to the audit database. Must already exist.
    #[arg(long)]
    database: PathBuf,
    /// Path to the pipeline settings file.
    #[arg(long)]
    settings: PathBuf,
    /// Payload store directory.
    #[arg(long, default_value = "payloads")]
    payload_dir: PathBuf,
}

/// Arguments for the `purge` subcommand.
#[derive(Args, Debug)]
struct PurgeCommand {
    /// Retention window in days.
    #[arg(long)]
    retention_days: u32,
    /// Path to the audit database. Must already exist.
    #[arg(long)]
    database: PathBuf,
    /// Payload store directory.
    #[arg(long)]
    payload_dir: PathBuf,
    /// Report candidates without deleting anything.
    #[arg(long)]
    dry_run: bool,
    /// Skip the confirmation prompt.
    #[arg(long)]
    yes: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failure wrapper carrying the user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// User-facing failure description.
    message: String,
}

impl CliError {
    /// Creates a CLI error from any displayable failure.
    fn new(message: impl std::fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point: dispatches the parsed subcommand.
fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(command) => run_command(&command),
        Commands::Resume(command) => resume_command(&command),
        Commands::Purge(command) => purge_command(&command),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = write_stderr_line(&format!("error: {error}"));
            ExitCode::FAILURE
        }
    }
}

/// Initialises the tracing subscriber from `ELSPETH_LOG`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("ELSPETH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs (or validates) a pipeline.
fn run_command(command: &RunCommand) -> Result<(), CliError> {
    let settings = load_settings(&command.settings).map_err(CliError::new)?;
    let mut plugins = assemble_plugins(&settings)?;

    if !command.execute {
        // Validation-only: build the graph so route and schema defects
        // surface, but never open the audit store.
        elspeth_engine::ExecutionGraph::build(&settings, &plugins).map_err(CliError::new)?;
        write_stdout_line("validation passed")?;
        return Ok(());
    }

    let payload_store =
        Arc::new(FsPayloadStore::open(&command.payload_dir).map_err(CliError::new)?);
    let recorder = SqliteRecorder::open(&command.database, Some(payload_store.clone()))
        .map_err(CliError::new)?;
    let clock = SystemClock::new();
    let observer = TracingObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let result = orchestrator
        .run(&mut plugins, Some(payload_store.as_ref()), settings.checkpoint)
        .map_err(CliError::new)?;
    write_stdout_line(&format!(
        "run {} completed: {} rows processed, {} succeeded, {} failed, {} quarantined, {} routed",
        result.run_id,
        result.progress.rows_processed,
        result.progress.rows_succeeded,
        result.progress.rows_failed,
        result.progress.rows_quarantined,
        result.progress.rows_routed,
    ))?;
    Ok(())
}

/// Resumes a failed run from its latest checkpoint.
fn resume_command(command: &ResumeCommand) -> Result<(), CliError> {
    if !command.database.exists() {
        return Err(CliError::new(format!(
            "database file not found: {}",
            command.database.display()
        )));
    }
    let settings = load_settings(&command.settings).map_err(CliError::new)?;
    let mut plugins = assemble_plugins(&settings)?;
    let payload_store =
        Arc::new(FsPayloadStore::open(&command.payload_dir).map_err(CliError::new)?);
    let recorder = SqliteRecorder::open_existing(&command.database, Some(payload_store.clone()))
        .map_err(CliError::new)?;
    let clock = SystemClock::new();
    let observer = TracingObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let result = orchestrator
        .resume(
            &RunId::new(command.run_id.clone()),
            &mut plugins,
            Some(payload_store.as_ref()),
            settings.checkpoint,
        )
        .map_err(CliError::new)?;
    write_stdout_line(&format!(
        "resumed into run {}: {} rows processed",
        result.run_id, result.progress.rows_processed,
    ))?;
    Ok(())
}

/// Purges expired payloads for terminal runs.
fn purge_command(command: &PurgeCommand) -> Result<(), CliError> {
    if !command.database.exists() {
        return Err(CliError::new(format!(
            "database file not found: {}",
            command.database.display()
        )));
    }
    let payloads = FsPayloadStore::open(&command.payload_dir).map_err(CliError::new)?;
    let recorder =
        SqliteRecorder::open_existing(&command.database, None).map_err(CliError::new)?;

    if !command.dry_run && !command.yes && !confirm_purge(command.retention_days)? {
        write_stdout_line("purge cancelled")?;
        return Ok(());
    }

    let clock = SystemClock::new();
    let report = purge_expired_payloads(
        &recorder,
        &payloads,
        command.retention_days,
        elspeth_core::Clock::now(&clock),
        command.dry_run,
    )
    .map_err(CliError::new)?;

    let verb = if command.dry_run { "would delete" } else { "deleted" };
    write_stdout_line(&format!(
        "{} {} payloads ({} bytes) across {} runs; {} retained",
        verb,
        report.payloads_deleted,
        report.bytes_freed,
        report.eligible_runs.len(),
        report.payloads_retained,
    ))?;
    Ok(())
}

/// Prompts for purge confirmation on stdin.
fn confirm_purge(retention_days: u32) -> Result<bool, CliError> {
    write_stdout_line(&format!(
        "delete payloads older than {retention_days} days? [y/N]"
    ))?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| CliError::new(format!("failed to read confirmation: {err}")))?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

// ============================================================================
// SECTION: Plugin Assembly
// ============================================================================

/// Assembles the plugin set declared by the settings.
fn assemble_plugins(settings: &PipelineSettings) -> Result<PluginSet, CliError> {
    let source =
        build_source(&settings.source.plugin, &settings.source.config).map_err(CliError::new)?;

    let mut sinks: BTreeMap<SinkName, Box<dyn elspeth_core::SinkPlugin>> = BTreeMap::new();
    for (name, sink_settings) in &settings.sinks {
        let sink = build_sink(&sink_settings.plugin, name, &sink_settings.config)
            .map_err(CliError::new)?;
        sinks.insert(SinkName::new(name.clone()), sink);
    }

    let mut plugins = PluginSet::new(source, sinks);
    for step in &settings.steps {
        match step {
            StepSettings::Transform(transform) => {
                let instance = build_transform(&transform.plugin, &transform.config)
                    .map_err(CliError::new)?;
                plugins = plugins.with_transform(instance);
            }
            StepSettings::Gate(gate) => {
                if let Some(plugin_name) = &gate.plugin {
                    let instance =
                        build_gate(plugin_name, &gate.config).map_err(CliError::new)?;
                    plugins = plugins.with_gate(gate.name.clone(), instance);
                }
            }
            StepSettings::Aggregation(aggregation) => {
                let instance = build_transform(&aggregation.transform, &aggregation.config)
                    .map_err(CliError::new)?;
                plugins = plugins.with_batch_transform(aggregation.name.clone(), instance);
            }
            StepSettings::Coalesce(_) => {}
        }
    }
    Ok(plugins)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> Result<(), CliError> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> Result<(), CliError> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stderr: {err}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
