//! System status snapshot.
//!
//! The snapshot is regenerated wholesale on every run from a gate verdict
//! supplied by the caller plus file-based evidence. `compute_status` is pure;
//! the writers below only persist what it returns.

use crate::core::config::{Config, GateConfig, StatusConfig};
use crate::core::error::GateError;
use crate::core::gatekeeper::{self, Verdict, VerdictVocabulary};
use crate::core::output::{self, OutputFormat};
use crate::core::record::DecisionBundle;
use crate::core::time;
use crate::core::trace::TraceLog;
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.1";
const AUTONOMY_MODE: &str = "SUPERVISED";
const ACTOR: &str = "status_agent";

/// Exit status when the supplied gate verdict is anything but PASS.
pub const EXIT_GATE_NOT_PASS: i32 = 2;
/// Exit status when the emergency lock is engaged.
pub const EXIT_LOCKED: i32 = 3;

/// Existence, size and mtime of a governance file. Content is not parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvidence {
    pub present: bool,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_utc: Option<String>,
}

impl FileEvidence {
    pub fn probe(root: &Path, rel: &Path) -> Self {
        let path = rel.display().to_string();
        match fs::metadata(root.join(rel)) {
            Ok(meta) if meta.is_file() => FileEvidence {
                present: true,
                path,
                bytes: Some(meta.len()),
                mtime_utc: meta
                    .modified()
                    .ok()
                    .and_then(|m| time::format_utc(m.into())),
            },
            _ => FileEvidence {
                present: false,
                path,
                bytes: None,
                mtime_utc: None,
            },
        }
    }

    /// First present candidate, or the absence record of the last one tried.
    pub fn probe_first(root: &Path, candidates: &[PathBuf]) -> Self {
        let mut last = FileEvidence {
            present: false,
            path: String::new(),
            bytes: None,
            mtime_utc: None,
        };
        for candidate in candidates {
            last = FileEvidence::probe(root, candidate);
            if last.present {
                break;
            }
        }
        last
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusInputs {
    pub gate_verdict: Verdict,
    pub gate_reasons: Vec<String>,
    pub emergency_locked: bool,
    /// `None` when the autonomy document is missing or malformed.
    pub autonomy_level: Option<f64>,
    pub authority: FileEvidence,
    pub policies: FileEvidence,
    pub environment: String,
    /// Agent roster carried over from the previous snapshot.
    pub agents: Value,
    pub latest_decision: Option<String>,
    /// Files consulted, recorded in the trace bundle.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemState {
    Active,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthSignal {
    Green,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceStatus {
    Ok,
    PartialEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSection {
    pub verdict: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomyScore {
    pub percent: f64,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSection {
    pub signal: HealthSignal,
    pub overall_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceEvidence {
    pub authority: FileEvidence,
    pub policies: FileEvidence,
    pub status: EvidenceStatus,
}

/// The regenerated status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub schema_version: String,
    pub generated_at: String,
    pub environment: String,
    pub system_state: SystemState,
    /// Autonomy mode; older readers require this top-level key.
    pub autonomy: String,
    pub gate: GateSection,
    pub autonomy_score: AutonomyScore,
    pub health: HealthSection,
    pub governance_evidence: GovernanceEvidence,
    pub agents: Value,
    #[serde(default)]
    pub latest_decision: Option<String>,
}

impl StatusInputs {
    fn gate_ok(&self) -> bool {
        self.gate_verdict == Verdict::Allow && !self.emergency_locked
    }

    fn evidence_status(&self) -> EvidenceStatus {
        if self.authority.present && self.policies.present {
            EvidenceStatus::Ok
        } else {
            EvidenceStatus::PartialEvidence
        }
    }

    fn gate_label(&self) -> &'static str {
        VerdictVocabulary::PassBlock.render(self.gate_verdict)
    }
}

/// Percent with one decimal; absent or out-of-range levels are clamped.
pub fn autonomy_percent(level: Option<f64>) -> f64 {
    let level = level.filter(|l| l.is_finite()).unwrap_or(0.0).clamp(0.0, 1.0);
    (level * 1000.0).round() / 10.0
}

/// Gate reasons arrive as a JSON array, a single JSON value, or plain text.
pub fn parse_gate_reasons(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Ok(Value::String(s)) => vec![s],
        Ok(other) => vec![other.to_string()],
        Err(_) => vec![raw.to_string()],
    }
}

pub fn compute_status(inputs: &StatusInputs, ts: &str) -> StatusSnapshot {
    let gate_ok = inputs.gate_ok();
    StatusSnapshot {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at: ts.to_string(),
        environment: inputs.environment.clone(),
        system_state: if gate_ok {
            SystemState::Active
        } else {
            SystemState::Blocked
        },
        autonomy: AUTONOMY_MODE.to_string(),
        gate: GateSection {
            verdict: inputs.gate_label().to_string(),
            reasons: inputs.gate_reasons.clone(),
        },
        autonomy_score: AutonomyScore {
            percent: autonomy_percent(inputs.autonomy_level),
            mode: AUTONOMY_MODE.to_string(),
        },
        health: HealthSection {
            signal: if gate_ok {
                HealthSignal::Green
            } else {
                HealthSignal::Red
            },
            overall_score: if gate_ok { 0.9 } else { 0.2 },
        },
        governance_evidence: GovernanceEvidence {
            authority: inputs.authority.clone(),
            policies: inputs.policies.clone(),
            status: inputs.evidence_status(),
        },
        agents: inputs.agents.clone(),
        latest_decision: inputs.latest_decision.clone(),
    }
}

/// Trace bundle explaining a status regeneration.
pub fn status_bundle(inputs: &StatusInputs, ts: &str, outputs: &[String]) -> DecisionBundle {
    let lock_rule = if inputs.emergency_locked {
        "EMERGENCY_LOCK_ACTIVE"
    } else {
        "NO_EMERGENCY_LOCK"
    };
    let authority_rule = if inputs.authority.present {
        "AUTHORITY_EVIDENCE_PRESENT"
    } else {
        "AUTHORITY_EVIDENCE_MISSING"
    };
    let policy_rule = if inputs.policies.present {
        "POLICY_EVIDENCE_PRESENT"
    } else {
        "POLICY_EVIDENCE_MISSING"
    };

    DecisionBundle {
        trace_id: format!("{}_status_truth", time::trace_id_stem(ts)),
        generated_at: ts.to_string(),
        inputs: inputs.sources.iter().map(|s| json!(s)).collect(),
        outputs: outputs.iter().map(|s| json!(s)).collect(),
        because: Some(json!([
            {"rule": "TRUTH_GENERATED", "evidence": "ev_status_run"},
            {"rule": lock_rule, "evidence": "ev_emergency_lock"},
            {"rule": authority_rule, "evidence": "ev_authority"},
            {"rule": policy_rule, "evidence": "ev_policies"},
            {"rule": "GATE_PASS_REQUIRED", "evidence": "ev_gate_input"},
        ])),
        evidence: Some(json!({
            "ev_status_run": {"type": "agent_run", "ts": ts, "actor": ACTOR},
            "ev_emergency_lock": {"type": "config", "ts": ts, "locked": inputs.emergency_locked},
            "ev_authority": {"type": "file_evidence", "ts": ts, "details": inputs.authority},
            "ev_policies": {"type": "file_evidence", "ts": ts, "details": inputs.policies},
            "ev_gate_input": {
                "type": "gate_input",
                "ts": ts,
                "verdict": inputs.gate_label(),
                "reasons": inputs.gate_reasons,
            },
        })),
    }
}

/// 0 when the gate passed and nothing is locked. A gate that did not pass
/// is reported before the lock.
pub fn status_exit_code(inputs: &StatusInputs) -> i32 {
    if inputs.gate_verdict != Verdict::Allow {
        EXIT_GATE_NOT_PASS
    } else if inputs.emergency_locked {
        EXIT_LOCKED
    } else {
        0
    }
}

/// Read everything `compute_status` needs from the project tree.
pub fn gather_inputs(
    root: &Path,
    status: &StatusConfig,
    gate: &GateConfig,
    gate_verdict: Verdict,
    gate_reasons: Vec<String>,
    environment: &str,
) -> StatusInputs {
    let emergency_locked = gatekeeper::read_json(&root.join(&gate.emergency_lock))
        .as_ref()
        .is_some_and(gatekeeper::lock_engaged);
    let autonomy_level = gatekeeper::read_json(&root.join(&gate.autonomy))
        .as_ref()
        .and_then(gatekeeper::declared_autonomy);
    let agents = gatekeeper::read_json(&root.join(&status.output))
        .and_then(|mut prev| prev.get_mut("agents").map(Value::take))
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));
    let latest_decision = root
        .join(&status.latest_decision)
        .is_file()
        .then(|| status.latest_decision.display().to_string());

    let mut sources = vec![
        gate.autonomy.display().to_string(),
        status.latest_decision.display().to_string(),
        gate.emergency_lock.display().to_string(),
    ];
    sources.extend(status.authority.iter().map(|p| p.display().to_string()));
    sources.push(status.policies.display().to_string());

    StatusInputs {
        gate_verdict,
        gate_reasons,
        emergency_locked,
        autonomy_level,
        authority: FileEvidence::probe_first(root, &status.authority),
        policies: FileEvidence::probe(root, &status.policies),
        environment: environment.to_string(),
        agents,
        latest_decision,
        sources,
    }
}

/// Replace a JSON document through a sibling temp file.
fn replace_json<T: Serialize>(path: &Path, value: &T) -> Result<(), GateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(value).map_err(|e| {
        GateError::InvalidInput(format!("unserializable document {}: {}", path.display(), e))
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body + "\n")?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Replace the snapshot file.
pub fn write_snapshot(path: &Path, snapshot: &StatusSnapshot) -> Result<(), GateError> {
    replace_json(path, snapshot)
}

/// Persist one status run: snapshot, latest bundle, trace log and activity line.
pub fn record_status_run(
    root: &Path,
    config: &StatusConfig,
    inputs: &StatusInputs,
    ts: &str,
) -> Result<StatusSnapshot, GateError> {
    let outputs = vec![
        config.output.display().to_string(),
        config.trace_snapshot.display().to_string(),
        config.trace_log.display().to_string(),
        config.activity_log.display().to_string(),
    ];
    let snapshot = compute_status(inputs, ts);
    let bundle = status_bundle(inputs, ts, &outputs);

    write_snapshot(&root.join(&config.output), &snapshot)?;
    replace_json(&root.join(&config.trace_snapshot), &bundle)?;
    TraceLog::open(root.join(&config.trace_log)).append(&bundle)?;
    TraceLog::open(root.join(&config.activity_log)).append(&json!({
        "ts": ts,
        "agent": ACTOR,
        "event": "truth_regenerated",
        "gate": {"verdict": inputs.gate_label(), "reasons": inputs.gate_reasons},
        "outputs": outputs,
        "governance_evidence": {
            "authority_present": inputs.authority.present,
            "policies_present": inputs.policies.present,
            "status": snapshot.governance_evidence.status,
        },
    }))?;

    tracing::info!(
        state = ?snapshot.system_state,
        verdict = inputs.gate_label(),
        "status snapshot regenerated"
    );
    Ok(snapshot)
}

/// Agent status labels folded onto `ok`, `warn` and `fail`.
const STATUS_SYNONYMS: [(&str, &str); 16] = [
    ("ok", "ok"),
    ("green", "ok"),
    ("healthy", "ok"),
    ("active", "ok"),
    ("running", "ok"),
    ("warn", "warn"),
    ("warning", "warn"),
    ("yellow", "warn"),
    ("degraded", "warn"),
    ("fail", "fail"),
    ("failed", "fail"),
    ("error", "fail"),
    ("red", "fail"),
    ("down", "fail"),
    ("inactive", "fail"),
    ("critical", "fail"),
];

/// Keys every snapshot must carry, including those of older layouts.
pub const REQUIRED_SNAPSHOT_KEYS: [&str; 2] = ["system_state", "autonomy"];

/// Canonical `ok | warn | fail` for an agent status label.
pub fn canonical_agent_status(raw: &str) -> Option<&'static str> {
    let key = raw.trim().to_ascii_lowercase();
    STATUS_SYNONYMS
        .iter()
        .find(|(label, _)| *label == key)
        .map(|(_, canonical)| *canonical)
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Result of checking a snapshot written by this or an older status agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotCheck {
    pub path: PathBuf,
    pub agents: usize,
    pub warnings: Vec<String>,
}

/// Structural check of a status snapshot.
///
/// Missing top-level keys and a non-object `agents` fail. Agent entries are
/// lenient: a missing, unreadable or unknown status is only a warning.
pub fn validate_snapshot(path: &Path) -> Result<SnapshotCheck, GateError> {
    let content = fs::read_to_string(path).map_err(|e| {
        GateError::MissingArtifact(format!("status snapshot {} could not be read: {}", path.display(), e))
    })?;
    let doc: Value = serde_json::from_str(&content)
        .map_err(|e| GateError::invalid_record(path, e.line(), format!("invalid JSON: {}", e)))?;
    let Some(obj) = doc.as_object() else {
        return Err(GateError::invalid_record(
            path,
            1,
            "status snapshot must be a JSON object".to_string(),
        ));
    };

    let missing: Vec<String> = REQUIRED_SNAPSHOT_KEYS
        .iter()
        .filter(|k| !obj.contains_key(**k))
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(GateError::IncompleteRecord {
            path: path.to_path_buf(),
            line: 1,
            missing,
        });
    }

    let Some(agents) = obj.get("agents").and_then(Value::as_object) else {
        return Err(GateError::invalid_record(
            path,
            1,
            "key 'agents' must be an object".to_string(),
        ));
    };

    let mut warnings = Vec::new();
    for (name, entry) in agents {
        let Some(entry) = entry.as_object() else {
            warnings.push(format!("agents['{}'] is not an object", name));
            continue;
        };
        let raw = ["status", "state", "health"]
            .into_iter()
            .find_map(|k| entry.get(k).filter(|v| truthy(v)));
        let Some(raw) = raw else {
            warnings.push(format!("agents['{}'] has no status (allowed, but recommended)", name));
            continue;
        };
        let Some(label) = raw.as_str() else {
            warnings.push(format!("agents['{}'] has unreadable status: {}", name, raw));
            continue;
        };
        if canonical_agent_status(label).is_none() {
            warnings.push(format!("agents['{}'] has unknown status '{}'", name, label));
        }
    }

    Ok(SnapshotCheck {
        path: path.to_path_buf(),
        agents: agents.len(),
        warnings,
    })
}

#[derive(Args, Debug)]
pub struct ValidateStatusCli {
    /// Snapshot to check (default: the configured status output).
    pub path: Option<PathBuf>,
}

pub fn run_validate_status_cli(
    root: &Path,
    config: &Config,
    format: OutputFormat,
    cli: ValidateStatusCli,
) -> Result<i32, GateError> {
    let path = root.join(cli.path.unwrap_or_else(|| config.status.output.clone()));
    let check = validate_snapshot(&path)?;

    if format.is_json() {
        let check_json = serde_json::to_value(&check).map_err(|e| GateError::InvalidInput(e.to_string()))?;
        output::print_json(&time::command_envelope(
            "validate-status",
            "ok",
            json!({ "check": check_json }),
        ));
    } else {
        output::print_warnings("VALIDATION", &check.warnings);
        output::print_ok(
            "VALIDATION",
            &format!(
                "{} structure is acceptable ({} agents)",
                check.path.display(),
                check.agents
            ),
        );
    }
    Ok(0)
}

#[derive(Args, Debug)]
pub struct StatusCli {
    /// Verdict of the governance gate that ran before this step (PASS, BLOCK, ...).
    #[clap(long, default_value = "UNKNOWN")]
    pub gate_verdict: String,
    /// Gate reasons: a JSON array or plain text.
    #[clap(long)]
    pub gate_reasons: Option<String>,
    /// Environment label recorded in the snapshot.
    #[clap(long = "env", default_value = "production")]
    pub environment: String,
}

pub fn run_status_cli(
    root: &Path,
    config: &Config,
    format: OutputFormat,
    cli: StatusCli,
) -> Result<i32, GateError> {
    let inputs = gather_inputs(
        root,
        &config.status,
        &config.gate,
        Verdict::from_external(&cli.gate_verdict),
        parse_gate_reasons(cli.gate_reasons.as_deref()),
        &cli.environment,
    );
    let ts = time::iso_utc_now();
    let snapshot = record_status_run(root, &config.status, &inputs, &ts)?;
    let code = status_exit_code(&inputs);

    if format.is_json() {
        let snapshot_json = serde_json::to_value(&snapshot)
            .map_err(|e| GateError::InvalidInput(e.to_string()))?;
        let status = if code == 0 { "ok" } else { "blocked" };
        output::print_json(&time::command_envelope(
            "status",
            status,
            json!({"exit_code": code, "snapshot": snapshot_json}),
        ));
    } else if code == 0 {
        output::print_ok(
            "STATUS",
            &format!(
                "system_state=ACTIVE autonomy={}% evidence={:?}",
                snapshot.autonomy_score.percent, snapshot.governance_evidence.status
            ),
        );
    } else if code == EXIT_LOCKED {
        eprintln!("STATUS BLOCKED: emergency lock engaged; snapshot written as BLOCKED");
    } else {
        eprintln!(
            "STATUS BLOCKED: gate verdict {} is not PASS; snapshot written as BLOCKED",
            inputs.gate_label()
        );
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn inputs() -> StatusInputs {
        StatusInputs {
            gate_verdict: Verdict::Allow,
            gate_reasons: vec![],
            emergency_locked: false,
            autonomy_level: Some(0.4567),
            authority: FileEvidence {
                present: true,
                path: "ops/authority_matrix.json".to_string(),
                bytes: Some(10),
                mtime_utc: None,
            },
            policies: FileEvidence {
                present: false,
                path: "ops/george_rules.yaml".to_string(),
                bytes: None,
                mtime_utc: None,
            },
            environment: "staging".to_string(),
            agents: json!({}),
            latest_decision: None,
            sources: vec!["ops/autonomy.json".to_string()],
        }
    }

    #[test]
    fn passing_gate_is_active_and_green() {
        let snap = compute_status(&inputs(), "2026-01-31T08:15:00Z");
        assert_eq!(snap.system_state, SystemState::Active);
        assert_eq!(snap.health.signal, HealthSignal::Green);
        assert_eq!(snap.gate.verdict, "PASS");
        assert_eq!(snap.autonomy_score.percent, 45.7);
        assert_eq!(snap.governance_evidence.status, EvidenceStatus::PartialEvidence);
        assert_eq!(status_exit_code(&inputs()), 0);
    }

    #[test]
    fn lock_blocks_even_with_pass() {
        let locked = StatusInputs {
            emergency_locked: true,
            ..inputs()
        };
        let snap = compute_status(&locked, "t");
        assert_eq!(snap.system_state, SystemState::Blocked);
        assert_eq!(snap.health.signal, HealthSignal::Red);
        assert_eq!(status_exit_code(&locked), EXIT_LOCKED);
    }

    #[test]
    fn failed_gate_is_reported_before_lock() {
        let blocked_and_locked = StatusInputs {
            gate_verdict: Verdict::from_external("BLOCK"),
            emergency_locked: true,
            ..inputs()
        };
        assert_eq!(status_exit_code(&blocked_and_locked), EXIT_GATE_NOT_PASS);
        assert_eq!(
            compute_status(&blocked_and_locked, "t").system_state,
            SystemState::Blocked
        );
    }

    #[test]
    fn unknown_verdict_is_not_pass() {
        let unknown = StatusInputs {
            gate_verdict: Verdict::from_external("UNKNOWN"),
            ..inputs()
        };
        assert_eq!(compute_status(&unknown, "t").gate.verdict, "UNKNOWN");
        assert_eq!(status_exit_code(&unknown), EXIT_GATE_NOT_PASS);
    }

    #[test]
    fn compute_status_is_pure() {
        let a = compute_status(&inputs(), "2026-01-31T08:15:00Z");
        let b = compute_status(&inputs(), "2026-01-31T08:15:00Z");
        assert_eq!(a, b);
    }

    #[test]
    fn autonomy_percent_clamps() {
        assert_eq!(autonomy_percent(None), 0.0);
        assert_eq!(autonomy_percent(Some(1.7)), 100.0);
        assert_eq!(autonomy_percent(Some(-0.2)), 0.0);
        assert_eq!(autonomy_percent(Some(f64::NAN)), 0.0);
    }

    #[test]
    fn gate_reasons_accept_json_or_text() {
        assert_eq!(parse_gate_reasons(None), Vec::<String>::new());
        assert_eq!(parse_gate_reasons(Some("  ")), Vec::<String>::new());
        assert_eq!(parse_gate_reasons(Some(r#"["a", 2]"#)), vec!["a", "2"]);
        assert_eq!(parse_gate_reasons(Some("plain reason")), vec!["plain reason"]);
    }

    #[test]
    fn bundle_passes_trace_validation() {
        let bundle = status_bundle(&inputs(), "2026-01-31T08:15:00Z", &["out.json".to_string()]);
        assert_eq!(bundle.trace_id, "trc_20260131_081500_status_truth");
        let value = serde_json::to_value(&bundle).unwrap();
        let checked = crate::core::record::check_entry(
            value.as_object().unwrap(),
            Path::new("t.jsonl"),
            1,
            crate::core::record::PhaseMode::Strict,
        )
        .unwrap();
        assert!(checked.counts_as_valid);
        assert!(checked.warnings.is_empty());
    }

    #[test]
    fn run_writes_snapshot_trace_and_activity() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("ops/reports")).unwrap();
        fs::write(
            root.join("ops/autonomy.json"),
            r#"{"overview": {"system_autonomy_level": 0.5}}"#,
        )
        .unwrap();
        fs::write(root.join("ops/george_rules.yaml"), "rules: []\n").unwrap();
        fs::write(
            root.join("ops/reports/system_status.json"),
            r#"{"agents": {"george": {"state": "ACTIVE"}}}"#,
        )
        .unwrap();

        let config = Config::default();
        let inputs = gather_inputs(
            root,
            &config.status,
            &config.gate,
            Verdict::Allow,
            vec![],
            "dev",
        );
        assert!(inputs.policies.present);
        assert!(!inputs.authority.present);
        assert_eq!(inputs.authority.path, "ops/authority_matrix.yaml");

        let snap = record_status_run(root, &config.status, &inputs, "2026-01-31T08:15:00Z").unwrap();
        assert_eq!(snap.autonomy_score.percent, 50.0);
        assert_eq!(snap.agents["george"]["state"], "ACTIVE");

        let written: StatusSnapshot = serde_json::from_str(
            &fs::read_to_string(root.join("ops/reports/system_status.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(written, snap);

        let trace = fs::read_to_string(root.join("ops/reports/decision_trace.jsonl")).unwrap();
        assert_eq!(trace.lines().count(), 1);
        let latest: DecisionBundle = serde_json::from_str(
            &fs::read_to_string(root.join("ops/reports/decision_trace.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(latest.trace_id, "trc_20260131_081500_status_truth");
        assert!(latest.inputs.contains(&json!("ops/decisions/latest.json")));
        assert!(latest.outputs.contains(&json!("ops/reports/decision_trace.json")));
        let activity = fs::read_to_string(root.join("ops/agent_activity.jsonl")).unwrap();
        assert!(activity.contains("truth_regenerated"));
    }

    fn write_snapshot_doc(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("system_status.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn generated_snapshot_passes_structure_check() {
        let tmp = TempDir::new().unwrap();
        let mut snap = compute_status(&inputs(), "2026-01-31T08:15:00Z");
        snap.agents = json!({"george": {"state": "ACTIVE"}, "guardian": {"status": "Degraded"}});
        let path = tmp.path().join("system_status.json");
        write_snapshot(&path, &snap).unwrap();

        let check = validate_snapshot(&path).unwrap();
        assert_eq!(check.agents, 2);
        assert!(check.warnings.is_empty(), "{:?}", check.warnings);
    }

    #[test]
    fn snapshot_without_autonomy_fails() {
        let tmp = TempDir::new().unwrap();
        let path = write_snapshot_doc(tmp.path(), r#"{"system_state": "ACTIVE", "agents": {}}"#);
        match validate_snapshot(&path).unwrap_err() {
            GateError::IncompleteRecord { missing, .. } => assert_eq!(missing, vec!["autonomy"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn agents_must_be_a_map() {
        let tmp = TempDir::new().unwrap();
        let path = write_snapshot_doc(
            tmp.path(),
            r#"{"system_state": "ACTIVE", "autonomy": "SUPERVISED", "agents": ["george"]}"#,
        );
        let err = validate_snapshot(&path).unwrap_err();
        assert!(err.to_string().contains("'agents' must be an object"));
    }

    #[test]
    fn odd_agent_statuses_only_warn() {
        let tmp = TempDir::new().unwrap();
        let path = write_snapshot_doc(
            tmp.path(),
            r#"{"system_state": "BLOCKED", "autonomy": "SUPERVISED", "agents": {
                "a": {"status": "sleeping"},
                "b": {"status": "", "state": "RUNNING"},
                "c": {"health": 0.4},
                "d": {},
                "e": "ok"
            }}"#,
        );
        let check = validate_snapshot(&path).unwrap();
        assert_eq!(check.agents, 5);
        assert_eq!(check.warnings.len(), 4, "{:?}", check.warnings);
        assert!(check.warnings.iter().any(|w| w.contains("unknown status 'sleeping'")));
        assert!(!check.warnings.iter().any(|w| w.contains("agents['b']")));
    }

    #[test]
    fn agent_status_synonyms() {
        assert_eq!(canonical_agent_status(" Healthy "), Some("ok"));
        assert_eq!(canonical_agent_status("YELLOW"), Some("warn"));
        assert_eq!(canonical_agent_status("down"), Some("fail"));
        assert_eq!(canonical_agent_status("PLANNED"), None);
    }
}
