//! Runtime authority gate: a decision document checked against a class policy.
//!
//! Exit codes follow the pipeline convention 0 allow, 10 escalate, 20 block.
//! A result document is produced for every run, including runs where the
//! inputs could not be read.

use crate::core::error::GateError;
use crate::core::gatekeeper::{Verdict, VerdictVocabulary};
use crate::core::output::{self, OutputFormat};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum EnforcementMode {
    /// Hard blocks are downgraded to escalations.
    #[default]
    Advisory,
    Enforced,
}

/// Case-insensitive; anything other than `advisory` enforces.
impl From<String> for EnforcementMode {
    fn from(raw: String) -> Self {
        if raw.trim().eq_ignore_ascii_case("advisory") {
            EnforcementMode::Advisory
        } else {
            EnforcementMode::Enforced
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Enforcement {
    pub mode: EnforcementMode,
    pub default_action: String,
    pub allow_human_override: bool,
}

impl Default for Enforcement {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Advisory,
            default_action: "BLOCK".to_string(),
            allow_human_override: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub min_health_score: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassRule {
    pub min_health_score: Option<f64>,
    pub require_guardian_ok: bool,
    pub require_trace: bool,
    pub require_status_endpoint: bool,
    pub on_fail: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimePolicy {
    pub enforcement: Enforcement,
    pub thresholds: Thresholds,
    pub decision_classes: BTreeMap<String, ClassRule>,
}

/// 1-based line holding byte `offset` of `content`.
fn line_at(content: &str, offset: usize) -> usize {
    let end = offset.min(content.len());
    content.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

/// The format follows the extension: `.yaml`/`.yml`, `.json`, otherwise TOML.
pub fn load_policy(path: &Path) -> Result<RuntimePolicy, GateError> {
    let content = fs::read_to_string(path).map_err(|e| {
        GateError::MissingArtifact(format!("policy {} could not be read: {}", path.display(), e))
    })?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(|e| {
            let line = e.location().map_or(0, |loc| loc.line());
            GateError::invalid_record(path, line, format!("invalid policy: {}", e))
        }),
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| GateError::invalid_record(path, e.line(), format!("invalid policy: {}", e))),
        _ => toml::from_str(&content).map_err(|e| {
            let line = e.span().map_or(0, |span| line_at(&content, span.start));
            GateError::invalid_record(path, line, format!("invalid policy: {}", e.message()))
        }),
    }
}

/// A signal value together with the dotted path it was read from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal<T> {
    pub value: Option<T>,
    pub source: Option<&'static str>,
}

impl<T> Signal<T> {
    fn absent() -> Self {
        Signal {
            value: None,
            source: None,
        }
    }

    fn found(value: T, source: &'static str) -> Self {
        Signal {
            value: Some(value),
            source: Some(source),
        }
    }
}

fn dotted<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |cur, key| cur.get(key))
        .filter(|v| !v.is_null())
}

fn as_float(v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "ok" => Some(true),
            "false" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

const HEALTH_PATHS: [&str; 5] = [
    "signals.system_health_score",
    "health_context.system_health_score",
    "health_context.system_health_percent",
    "health_context.system_health",
    "health_context.health_score",
];

const GUARDIAN_PATHS: [&str; 6] = [
    "signals.guardian_ok",
    "guardian.ok",
    "guardian.status",
    "guardian_status",
    "health_context.guardian_ok",
    "health_context.guardian_status",
];

const STATUS_ENDPOINT_PATHS: [&str; 3] = [
    "signals.status_endpoint_ok",
    "health_context.status_endpoint_ok",
    "signals.status_endpoint",
];

const TRACE_PATHS: [&str; 5] = [
    "signals.decision_trace_present",
    "decision_trace_present",
    "decision_trace.trace_id",
    "decision_trace",
    "trace",
];

/// Health score in `[0, 1]`; percentages above 1 are scaled down.
pub fn extract_health(decision: &Value) -> Signal<f64> {
    for path in HEALTH_PATHS {
        let Some(f) = dotted(decision, path).and_then(as_float) else {
            continue;
        };
        let score = if path.ends_with("system_health_percent") && f > 1.0 {
            f / 100.0
        } else {
            f
        };
        return Signal::found(score.clamp(0.0, 1.0), path);
    }
    Signal::absent()
}

pub fn extract_guardian_ok(decision: &Value) -> Signal<bool> {
    for path in GUARDIAN_PATHS {
        let Some(raw) = dotted(decision, path) else {
            continue;
        };
        if path.ends_with("status")
            && let Some(label) = raw.as_str()
        {
            match label.trim().to_ascii_uppercase().as_str() {
                "OK" => return Signal::found(true, path),
                "WARNING" | "FAIL" | "FAILED" | "ERROR" => return Signal::found(false, path),
                _ => {}
            }
        }
        if let Some(b) = as_bool(raw) {
            return Signal::found(b, path);
        }
    }
    Signal::absent()
}

pub fn extract_status_endpoint_ok(decision: &Value) -> Signal<bool> {
    STATUS_ENDPOINT_PATHS
        .into_iter()
        .find_map(|path| dotted(decision, path).and_then(as_bool).map(|b| Signal::found(b, path)))
        .unwrap_or_else(Signal::absent)
}

pub fn extract_trace_present(decision: &Value) -> Signal<bool> {
    for path in TRACE_PATHS {
        let Some(raw) = dotted(decision, path) else {
            continue;
        };
        if path.ends_with("trace_id") && raw.as_str().is_some_and(|s| !s.trim().is_empty()) {
            return Signal::found(true, path);
        }
        if let Some(map) = raw.as_object() {
            return Signal::found(!map.is_empty(), path);
        }
        if let Some(b) = as_bool(raw) {
            return Signal::found(b, path);
        }
    }
    Signal::absent()
}

fn first_text(decision: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match decision.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn decision_class(decision: &Value) -> Option<String> {
    first_text(decision, &["decision_class", "decisionClass", "class"])
}

/// Normalise an action name to `BLOCK` or `ESCALATE`.
fn fail_action(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "BLOCK" => Some("BLOCK"),
        "ESCALATE" => Some("ESCALATE"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub reasons: Vec<String>,
    pub todo: Vec<String>,
    pub applied_policy: Value,
}

pub fn evaluate(decision: &Value, policy: &RuntimePolicy) -> Evaluation {
    let Some(class) = decision_class(decision) else {
        return Evaluation {
            verdict: Verdict::Block,
            reasons: vec!["missing decision_class (expected decision.decision_class)".to_string()],
            todo: vec!["Fix decision JSON: add decision_class".to_string()],
            applied_policy: json!({"decision_class": null}),
        };
    };

    let enforcement = &policy.enforcement;
    let default_action = enforcement.default_action.trim().to_ascii_uppercase();
    let rule = policy.decision_classes.get(&class).cloned().unwrap_or_default();
    let min_health = rule.min_health_score.unwrap_or(policy.thresholds.min_health_score);
    let requested_on_fail = rule.on_fail.as_deref().unwrap_or(&default_action);

    let mut reasons = Vec::new();
    let mut todo = Vec::new();

    let health = extract_health(decision);
    let guardian = extract_guardian_ok(decision);
    let status_endpoint = extract_status_endpoint_ok(decision);
    let trace = extract_trace_present(decision);

    match health.value {
        None => {
            reasons.push(
                "missing system health score (signals.system_health_score or health_context.*)".to_string(),
            );
            todo.push("Ensure decision includes a reproducible health score (0..1) in signals.system_health_score.".to_string());
        }
        Some(h) if h < min_health => {
            reasons.push(format!("health below threshold: {:.2} < {:.2}", h, min_health));
            todo.push("Investigate why health is below threshold.".to_string());
        }
        Some(_) => {}
    }

    let requirements = [
        (rule.require_guardian_ok, guardian.value, "guardian_ok", "Emit guardian ok/status into the decision (signals.guardian_ok)."),
        (rule.require_status_endpoint, status_endpoint.value, "status_endpoint_ok", "Populate signals.status_endpoint_ok deterministically."),
        (rule.require_trace, trace.value, "decision_trace_present", "Write a decision trace for this decision and mark its presence in signals."),
    ];
    for (required, value, name, fix) in requirements {
        if !required {
            continue;
        }
        match value {
            None => {
                reasons.push(format!("{} required but missing", name));
                todo.push(fix.to_string());
            }
            Some(false) => {
                reasons.push(format!("{} required but false", name));
                todo.push(fix.to_string());
            }
            Some(true) => {}
        }
    }

    let on_fail = fail_action(requested_on_fail)
        .or_else(|| fail_action(&default_action))
        .unwrap_or("BLOCK");

    let mut verdict = if reasons.is_empty() {
        Verdict::Allow
    } else if on_fail == "ESCALATE" {
        if enforcement.allow_human_override {
            Verdict::Hold
        } else {
            reasons.push("human override disabled; ESCALATE downgraded to BLOCK".to_string());
            todo.push("Enable allow_human_override or set on_fail = \"BLOCK\" for this decision class.".to_string());
            Verdict::Block
        }
    } else {
        Verdict::Block
    };

    if enforcement.mode == EnforcementMode::Advisory && verdict == Verdict::Block {
        verdict = Verdict::Hold;
        reasons.push("advisory mode: BLOCK converted to ESCALATE".to_string());
        todo.push("Advisory mode: review required; no hard block is enforced.".to_string());
    }
    if verdict == Verdict::Hold {
        todo.push("ESCALATE: stop the pipeline, attach the gate result, decision and trace, and open a review.".to_string());
    }

    tracing::debug!(class = %class, verdict = %verdict, reasons = reasons.len(), "runtime gate evaluated");

    Evaluation {
        verdict,
        reasons,
        todo,
        applied_policy: json!({
            "mode": enforcement.mode,
            "decision_class": class,
            "min_health_score": min_health,
            "require_guardian_ok": rule.require_guardian_ok,
            "require_status_endpoint": rule.require_status_endpoint,
            "require_trace": rule.require_trace,
            "on_fail": on_fail,
            "default_action": default_action,
            "allow_human_override": enforcement.allow_human_override,
            "signal_sources": {
                "system_health_score": health.source,
                "guardian_ok": guardian.source,
                "status_endpoint_ok": status_endpoint.source,
                "decision_trace_present": trace.source,
            },
        }),
    }
}

/// The persisted gate result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateReport {
    pub schema_version: String,
    pub decision_id: Option<String>,
    pub decision_class: Option<String>,
    pub verdict: String,
    pub exit_code: i32,
    pub reasons: Vec<String>,
    pub todo: Vec<String>,
    pub applied_policy: Value,
}

impl GateReport {
    fn from_evaluation(decision: &Value, eval: Evaluation) -> Self {
        GateReport {
            schema_version: SCHEMA_VERSION.to_string(),
            decision_id: first_text(decision, &["decision_id", "id"]),
            decision_class: decision_class(decision),
            verdict: VerdictVocabulary::Escalation.render(eval.verdict).to_string(),
            exit_code: eval.verdict.exit_code(),
            reasons: eval.reasons,
            todo: eval.todo,
            applied_policy: eval.applied_policy,
        }
    }

    /// Result for a run whose inputs could not be evaluated at all.
    fn failed(err: &GateError) -> Self {
        GateReport {
            schema_version: SCHEMA_VERSION.to_string(),
            decision_id: None,
            decision_class: None,
            verdict: VerdictVocabulary::Escalation.render(Verdict::Block).to_string(),
            exit_code: Verdict::Block.exit_code(),
            reasons: vec![format!("runtime gate error: {}", err)],
            todo: vec!["Ensure the decision and policy files are readable and valid.".to_string()],
            applied_policy: json!({"mode": null}),
        }
    }
}

fn load_decision(path: &Path) -> Result<Value, GateError> {
    let content = fs::read_to_string(path).map_err(|e| {
        GateError::MissingArtifact(format!("decision {} could not be read: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| GateError::invalid_record(path, e.line(), format!("invalid decision JSON: {}", e)))
}

/// Evaluate a decision file against a policy file. Never fails: unreadable
/// inputs produce a BLOCK report.
pub fn run_runtime_gate(decision_path: &Path, policy_path: &Path) -> GateReport {
    let evaluated = load_decision(decision_path).and_then(|decision| {
        let policy = load_policy(policy_path)?;
        let eval = evaluate(&decision, &policy);
        Ok(GateReport::from_evaluation(&decision, eval))
    });
    evaluated.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "runtime gate inputs unusable");
        GateReport::failed(&e)
    })
}

pub fn write_report(path: &Path, report: &GateReport) -> Result<(), GateError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(report)
        .map_err(|e| GateError::InvalidInput(format!("unserializable gate report: {}", e)))?;
    fs::write(path, body + "\n")?;
    Ok(())
}

#[derive(Args, Debug)]
pub struct RuntimeGateCli {
    /// Decision JSON document.
    pub decision: PathBuf,
    /// Policy document: YAML, JSON or TOML, chosen by extension.
    pub policy: PathBuf,
    /// Where to write the gate result; printed to stdout when omitted.
    #[clap(long)]
    pub output: Option<PathBuf>,
}

pub fn run_runtime_gate_cli(format: OutputFormat, cli: RuntimeGateCli) -> Result<i32, GateError> {
    let report = run_runtime_gate(&cli.decision, &cli.policy);
    let body = serde_json::to_value(&report).map_err(|e| GateError::InvalidInput(e.to_string()))?;

    let written = match &cli.output {
        Some(path) => match write_report(path, &report) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("RUNTIME-GATE WARN: failed to write {}: {}", path.display(), e);
                false
            }
        },
        None => false,
    };

    if format.is_json() {
        output::print_json(&json_envelope(&report, body));
    } else if !written {
        output::print_json(&body);
    } else if report.exit_code == 0 {
        output::print_ok("RUNTIME-GATE", &format!("verdict={}", report.verdict));
    } else {
        println!(
            "RUNTIME-GATE {}: {}",
            report.verdict,
            output::preview_messages(&report.reasons, 3, 120)
        );
    }
    Ok(report.exit_code)
}

fn json_envelope(report: &GateReport, body: Value) -> Value {
    let status = if report.exit_code == 0 { "ok" } else { "gated" };
    crate::core::time::command_envelope("runtime-gate", status, json!({ "result": body }))
}
