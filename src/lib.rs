//! tracegate: decision-trace validation and gate verdicts for governed automation.
//!
//! An automated agent that wants to merge, deploy or otherwise act must leave
//! an auditable decision trace. tracegate checks those traces, evaluates a
//! conservative gate verdict from the evidence on disk, and verifies that the
//! resilience documents (critical capabilities, capability graph, failover
//! rules) are consistent before a pipeline is allowed through.
//!
//! # Commands
//!
//! ```bash
//! # Validate the newest 50 entries of the project's decision trace
//! tracegate validate-trace ops/reports/decision_trace.jsonl
//!
//! # Check the resilience documents and simulate one failover
//! tracegate check-consistency governance/resilience
//!
//! # Evaluate the gate from local evidence (exit 0 allow, 10 hold, 20 block)
//! tracegate evaluate-gate
//!
//! # Check the regenerated status snapshot
//! tracegate validate-status
//! ```
//!
//! Failures print one line to stderr that starts with the surface prefix
//! (`VALIDATION FAILED:`, `RESILIENCE-GATE FAILED:`, ...) and exit non-zero.
//!
//! # Crate Structure
//!
//! - [`core`](crate::core): trace records, the trace log, validation, the gate evaluator,
//!   the consistency checker and shared plumbing (config, errors, output)
//! - [`plugins`]: status regeneration, health routing, the runtime policy gate

pub mod core;
pub mod plugins;

use crate::core::{
    config::{self, Config},
    consistency::{self, ResilienceDocs},
    error::{CommandFailure, GateError, Surface},
    gatekeeper::{self, VerdictVocabulary},
    output::{self, OutputFormat},
    record::PhaseMode,
    time,
    validate::{self, ValidateOptions},
};
use crate::plugins::{route, runtime_gate, status};

use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[clap(
    name = "tracegate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Decision trace validation and gate verdicts"
)]
struct Cli {
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    /// Configuration file (default: <root>/tracegate.toml if present).
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    /// Project root (default: current directory).
    #[clap(long, global = true)]
    root: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ValidateTraceCli {
    /// Trace file, or a directory searched for the configured trace candidates.
    path: Option<PathBuf>,
    /// Number of most recent entries to check.
    #[clap(long)]
    window: Option<usize>,
    /// Count unknown phases as invalid instead of failing.
    #[clap(long)]
    tolerant: bool,
}

#[derive(clap::Args, Debug)]
struct CheckConsistencyCli {
    /// Directory holding the resilience documents.
    dir: PathBuf,
    /// Check only; do not write the failover trace.
    #[clap(long)]
    no_write: bool,
}

#[derive(clap::Args, Debug)]
struct EvaluateGateCli {
    /// Vocabulary used to print the verdict.
    #[clap(long, value_enum, default_value = "canonical")]
    vocabulary: VerdictVocabulary,
}

#[derive(clap::Args, Debug)]
struct ChangesetCli {
    /// Changed file paths.
    files: Vec<String>,
    /// File with one changed path per line.
    #[clap(long)]
    files_from: Option<PathBuf>,
    /// Allowed decision-trace glob (repeatable; replaces the defaults).
    #[clap(long = "pattern")]
    patterns: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the most recent window of a decision trace.
    ValidateTrace(ValidateTraceCli),
    /// Check resilience documents and simulate one deterministic failover.
    CheckConsistency(CheckConsistencyCli),
    /// Evaluate the gate verdict from evidence in the project tree.
    EvaluateGate(EvaluateGateCli),
    /// Regenerate the system status snapshot from a supplied gate verdict.
    Status(status::StatusCli),
    /// Check the structure of a system status snapshot.
    ValidateStatus(status::ValidateStatusCli),
    /// Route a capability to its primary or secondary agent by health.
    Route(route::RouteCli),
    /// Check a decision document against a runtime policy.
    RuntimeGate(runtime_gate::RuntimeGateCli),
    /// Require a decision trace among the files of a change set.
    Changeset(ChangesetCli),
}

impl Command {
    fn surface(&self) -> Surface {
        match self {
            Command::ValidateTrace(_) | Command::ValidateStatus(_) | Command::Changeset(_) => {
                Surface::Validation
            }
            Command::CheckConsistency(_) => Surface::ResilienceGate,
            Command::EvaluateGate(_) => Surface::Gate,
            Command::Status(_) => Surface::Status,
            Command::Route(_) => Surface::Route,
            Command::RuntimeGate(_) => Surface::RuntimeGate,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Structured logs on stderr, off unless `TRACEGATE_LOG` sets a filter.
fn init_logging() {
    let filter = EnvFilter::try_from_env("TRACEGATE_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    if env_flag("TRACEGATE_LOG_JSON") {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

/// Parse arguments and run one command. `Ok` carries the exit status for
/// commands whose verdict maps to a status code.
pub fn run() -> Result<i32, CommandFailure> {
    init_logging();
    let cli = Cli::parse();
    let surface = cli.command.surface();
    let fail = |e: GateError| CommandFailure::new(surface, e);

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().map_err(|e| fail(e.into()))?,
    };
    let config = config::load_config(&root, cli.config.as_deref()).map_err(fail)?;
    let format = cli.format;

    match cli.command {
        Command::ValidateTrace(args) => run_validate_trace(&root, &config, format, args),
        Command::CheckConsistency(args) => run_check_consistency(&root, &config, format, args),
        Command::EvaluateGate(args) => run_evaluate_gate(&root, &config, format, args),
        Command::Status(args) => status::run_status_cli(&root, &config, format, args),
        Command::ValidateStatus(args) => status::run_validate_status_cli(&root, &config, format, args),
        Command::Route(args) => route::run_route_cli(&root, &config, format, args),
        Command::RuntimeGate(args) => runtime_gate::run_runtime_gate_cli(format, args),
        Command::Changeset(args) => run_changeset(format, args),
    }
    .map_err(fail)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, GateError> {
    serde_json::to_value(value).map_err(|e| GateError::InvalidInput(e.to_string()))
}

fn run_validate_trace(
    root: &Path,
    config: &Config,
    format: OutputFormat,
    args: ValidateTraceCli,
) -> Result<i32, GateError> {
    let mut opts = ValidateOptions::from(&config.trace);
    if let Some(window) = args.window {
        if window == 0 {
            return Err(GateError::InvalidInput("--window must be at least 1".to_string()));
        }
        opts.window = window;
    }
    if args.tolerant {
        opts.phase_mode = PhaseMode::Tolerant;
    }
    let target = match args.path {
        Some(path) => root.join(path),
        None => root.to_path_buf(),
    };

    let report = validate::validate_trace(&target, &opts)?;

    if format.is_json() {
        output::print_json(&time::command_envelope(
            "validate-trace",
            "ok",
            json!({ "report": to_json(&report)? }),
        ));
    } else {
        output::print_warnings("VALIDATION", &report.warnings);
        output::print_ok(
            "VALIDATION",
            &format!(
                "{} ({} of {} entries checked, {} valid, coverage {:.3}, latest decision {})",
                report.path.display(),
                report.checked,
                report.total_entries,
                report.valid,
                report.coverage,
                report.latest_decision_id.as_deref().unwrap_or("-")
            ),
        );
    }
    Ok(0)
}

fn run_check_consistency(
    root: &Path,
    config: &Config,
    format: OutputFormat,
    args: CheckConsistencyCli,
) -> Result<i32, GateError> {
    let dir = root.join(&args.dir);
    let docs = ResilienceDocs::load(&dir, &config.resilience)?;
    let trace = consistency::check_consistency(&docs, &time::iso_utc_now())?;
    let digest = consistency::decision_digest(&trace.decision);

    let evidence = dir.join(&config.resilience.output);
    if !args.no_write {
        consistency::write_failover_trace(&evidence, &trace)?;
        tracing::info!(path = %evidence.display(), "failover trace written");
    }

    if format.is_json() {
        output::print_json(&time::command_envelope(
            "check-consistency",
            "ok",
            json!({
                "trace": to_json(&trace)?,
                "decision_digest": digest,
                "written": (!args.no_write).then(|| evidence.display().to_string()),
            }),
        ));
    } else {
        output::print_ok(
            "RESILIENCE-GATE",
            &format!(
                "'{}' fails over from {} to {} (decision {})",
                trace.capability_required,
                trace.primary_agent,
                trace.decision.routed_to,
                &digest[..12]
            ),
        );
        if !args.no_write {
            println!("evidence={}", evidence.display());
        }
    }
    Ok(0)
}

fn run_evaluate_gate(
    root: &Path,
    config: &Config,
    format: OutputFormat,
    args: EvaluateGateCli,
) -> Result<i32, GateError> {
    let evidence = gatekeeper::collect_evidence(root, &config.gate, &ValidateOptions::from(&config.trace));
    let outcome = gatekeeper::evaluate_gate(&evidence.inputs);
    let verdict = args.vocabulary.render(outcome.verdict);

    if format.is_json() {
        output::print_json(&time::command_envelope(
            "evaluate-gate",
            verdict,
            json!({
                "verdict": verdict,
                "exit_code": outcome.verdict.exit_code(),
                "outcome": to_json(&outcome)?,
                "evidence": to_json(&evidence)?,
            }),
        ));
    } else {
        let flags: Vec<String> = evidence.flags.iter().map(ToString::to_string).collect();
        output::print_warnings("GATE", &flags);
        println!("verdict={}", verdict);
        println!("confidence={:.2}", outcome.confidence);
        println!("autonomy={:.3}", outcome.autonomy);
    }
    Ok(outcome.verdict.exit_code())
}

fn run_changeset(format: OutputFormat, args: ChangesetCli) -> Result<i32, GateError> {
    let mut files = args.files;
    if let Some(list) = &args.files_from {
        let content = fs::read_to_string(list).map_err(|e| {
            GateError::MissingArtifact(format!("change list {} could not be read: {}", list.display(), e))
        })?;
        files.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }

    let patterns: Vec<&str> = if args.patterns.is_empty() {
        validate::DEFAULT_TRACE_PATTERNS.to_vec()
    } else {
        args.patterns.iter().map(String::as_str).collect()
    };

    if !validate::changeset_has_decision_trace(&files, &patterns)? {
        return Err(GateError::MissingArtifact(format!(
            "change set of {} file(s) contains no decision trace; expected one of: {}",
            files.len(),
            patterns.join(", ")
        )));
    }

    if format.is_json() {
        output::print_json(&time::command_envelope(
            "changeset",
            "ok",
            json!({ "files": files.len() }),
        ));
    } else {
        output::print_ok("VALIDATION", &format!("decision trace present in {} changed file(s)", files.len()));
    }
    Ok(0)
}
