//! `tracegate.toml` project configuration.
//!
//! Every key is optional. A project without the file runs on the
//! conventional `ops/` layout.

use crate::core::error::GateError;
use crate::core::record::PhaseMode;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "tracegate.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub trace: TraceConfig,
    pub gate: GateConfig,
    pub resilience: ResilienceConfig,
    pub status: StatusConfig,
    pub route: RouteConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceConfig {
    /// Number of most recent entries checked by `validate-trace`.
    pub window: usize,
    pub phase_mode: PhaseMode,
    /// Trace locations tried in order when a directory is validated.
    pub candidates: Vec<PathBuf>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            window: 50,
            phase_mode: PhaseMode::Strict,
            candidates: vec![
                PathBuf::from("ops/reports/decision_trace.jsonl"),
                PathBuf::from("ops/decision_trace.jsonl"),
                PathBuf::from("ops/reports/decision_trace.json"),
                PathBuf::from("ops/decision_trace.json"),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub trace: PathBuf,
    pub emergency_lock: PathBuf,
    pub autonomy: PathBuf,
    /// Files that must parse as JSON for the +0.20 input credit.
    pub required_inputs: Vec<PathBuf>,
    /// Files that must exist for the +0.30 output credit.
    pub required_outputs: Vec<PathBuf>,
    /// Cap used when the autonomy document is absent or unreadable.
    pub default_autonomy_cap: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            trace: PathBuf::from("ops/reports/decision_trace.jsonl"),
            emergency_lock: PathBuf::from("ops/emergency_lock.json"),
            autonomy: PathBuf::from("ops/autonomy.json"),
            required_inputs: vec![
                PathBuf::from("ops/autonomy.json"),
                PathBuf::from("ops/decisions/latest.json"),
            ],
            required_outputs: vec![PathBuf::from("ops/reports/system_status.json")],
            default_autonomy_cap: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfig {
    pub backlog: String,
    pub graph: String,
    pub rules: String,
    pub chaos_scenario: String,
    pub expected_trace: String,
    /// Evidence written on success, relative to the checked directory.
    pub output: PathBuf,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            backlog: "critical_capabilities.json".to_string(),
            graph: "capability_graph.json".to_string(),
            rules: "failover_rules.json".to_string(),
            chaos_scenario: "chaos_scenario.json".to_string(),
            expected_trace: "expected_trace.json".to_string(),
            output: PathBuf::from("reports/resilience_gate_trace.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusConfig {
    pub output: PathBuf,
    /// Latest bundle, replaced on every run next to the append-only log.
    pub trace_snapshot: PathBuf,
    pub trace_log: PathBuf,
    pub activity_log: PathBuf,
    pub latest_decision: PathBuf,
    pub authority: Vec<PathBuf>,
    pub policies: PathBuf,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("ops/reports/system_status.json"),
            trace_snapshot: PathBuf::from("ops/reports/decision_trace.json"),
            trace_log: PathBuf::from("ops/reports/decision_trace.jsonl"),
            activity_log: PathBuf::from("ops/agent_activity.jsonl"),
            latest_decision: PathBuf::from("ops/decisions/latest.json"),
            authority: vec![
                PathBuf::from("ops/authority_matrix.json"),
                PathBuf::from("ops/authority_matrix.yaml"),
            ],
            policies: PathBuf::from("ops/george_rules.yaml"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteConfig {
    pub graph: PathBuf,
    pub status: PathBuf,
    pub trace_log: PathBuf,
    pub default_threshold: f64,
    /// Workflow the pipeline runs next when the primary agent is selected.
    pub primary_workflow: String,
    pub secondary_workflow: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            graph: PathBuf::from("governance/resilience/capability_graph.json"),
            status: PathBuf::from("ops/reports/system_status.json"),
            trace_log: PathBuf::from("ops/reports/failover_trace.jsonl"),
            default_threshold: 0.8,
            primary_workflow: "site-deploy.yml".to_string(),
            secondary_workflow: "site-deploy-backup.yml".to_string(),
        }
    }
}

/// Load `<root>/tracegate.toml`, or `explicit` when given.
///
/// A missing default file yields [`Config::default`]; a missing explicit file
/// or a malformed one is a [`GateError::ConfigError`].
pub fn load_config(root: &Path, explicit: Option<&Path>) -> Result<Config, GateError> {
    let path = match explicit {
        Some(p) => {
            if !p.is_file() {
                return Err(GateError::ConfigError(format!(
                    "config file {} not found",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let p = root.join(CONFIG_FILE_NAME);
            if !p.is_file() {
                return Ok(Config::default());
            }
            p
        }
    };

    let content = fs::read_to_string(&path)
        .map_err(|e| GateError::ConfigError(format!("{}: {}", path.display(), e)))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| GateError::ConfigError(format!("{}: {}", path.display(), e)))?;
    if config.trace.window == 0 {
        return Err(GateError::ConfigError(format!(
            "{}: trace.window must be at least 1",
            path.display()
        )));
    }
    Ok(config)
}
