//! Typed decision-trace entries.
//!
//! Raw JSON objects are checked exactly once here. Everything downstream of
//! [`check_entry`] works with [`TraceEntry`] values that already satisfy the
//! record or bundle invariants.

use crate::core::error::GateError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

/// Keys every record must carry, in reporting order.
pub const REQUIRED_RECORD_KEYS: [&str; 6] = [
    "ts",
    "trace_version",
    "decision_id",
    "actor",
    "phase",
    "result",
];

/// Keys that must be JSON strings.
const STRING_RECORD_KEYS: [&str; 5] = ["ts", "trace_version", "decision_id", "actor", "phase"];

/// Alias folding applied when the canonical key is absent. Order matters.
const RECORD_KEY_ALIASES: [(&str, &[&str]); 6] = [
    ("ts", &["timestamp", "time", "generated_at"]),
    ("decision_id", &["decisionId", "id", "trace_id"]),
    ("actor", &["agent", "who"]),
    ("phase", &["stage", "step"]),
    ("result", &["status", "outcome"]),
    ("trace_version", &["schema_version", "version"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Route,
    GuardianPrecheck,
    AuthorityEnforcement,
    Execute,
    GuardianPostcheck,
    Finalize,
    Blocked,
}

/// Outcome of matching a raw phase string against the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseMatch {
    Canonical(Phase),
    /// Deprecated synonym; accepted with a warning.
    Legacy { phase: Phase, alias: &'static str },
    Unknown,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Route,
        Phase::GuardianPrecheck,
        Phase::AuthorityEnforcement,
        Phase::Execute,
        Phase::GuardianPostcheck,
        Phase::Finalize,
        Phase::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Route => "route",
            Phase::GuardianPrecheck => "guardian_precheck",
            Phase::AuthorityEnforcement => "authority_enforcement",
            Phase::Execute => "execute",
            Phase::GuardianPostcheck => "guardian_postcheck",
            Phase::Finalize => "finalize",
            Phase::Blocked => "blocked",
        }
    }

    pub fn parse(raw: &str) -> PhaseMatch {
        if let Some(phase) = Phase::ALL.iter().copied().find(|p| p.as_str() == raw) {
            return PhaseMatch::Canonical(phase);
        }
        match raw {
            "guardrail" => PhaseMatch::Legacy {
                phase: Phase::GuardianPrecheck,
                alias: "guardrail",
            },
            "precheck" => PhaseMatch::Legacy {
                phase: Phase::GuardianPrecheck,
                alias: "precheck",
            },
            "postcheck" => PhaseMatch::Legacy {
                phase: Phase::GuardianPostcheck,
                alias: "postcheck",
            },
            _ => PhaseMatch::Unknown,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an out-of-vocabulary phase is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseMode {
    /// Unknown phase fails the check.
    #[default]
    Strict,
    /// Unknown phase is a warning; the record does not count towards coverage.
    Tolerant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub ts: String,
    pub trace_version: String,
    pub decision_id: String,
    pub actor: String,
    /// `None` only for unknown phases accepted in tolerant mode.
    pub phase: Option<Phase>,
    pub raw_phase: String,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionBundle {
    pub trace_id: String,
    pub generated_at: String,
    pub inputs: Vec<Value>,
    pub outputs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub because: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEntry {
    Record(DecisionRecord),
    Bundle(DecisionBundle),
}

impl TraceEntry {
    /// Identifier grouping the entry with its decision.
    pub fn decision_key(&self) -> &str {
        match self {
            TraceEntry::Record(r) => &r.decision_id,
            TraceEntry::Bundle(b) => &b.trace_id,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            TraceEntry::Record(r) => &r.ts,
            TraceEntry::Bundle(b) => &b.generated_at,
        }
    }
}

/// A validated entry plus the non-fatal findings raised while checking it.
#[derive(Debug, Clone)]
pub struct CheckedEntry {
    pub entry: TraceEntry,
    pub warnings: Vec<String>,
    /// False when the entry was accepted but must not count as valid evidence.
    pub counts_as_valid: bool,
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn present(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).is_some_and(|v| !is_empty_value(v))
}

/// Bundle heuristic: `trace_id` + `inputs` + `outputs`, or
/// `schema_version` + `generated_at` + `because`.
pub fn is_bundle(obj: &Map<String, Value>) -> bool {
    let has = |k: &str| obj.contains_key(k);
    (has("trace_id") && has("inputs") && has("outputs"))
        || (has("schema_version") && has("generated_at") && has("because"))
}

/// Fold legacy key spellings into canonical record keys.
pub fn normalize_record(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut out = obj.clone();
    for (canonical, aliases) in RECORD_KEY_ALIASES {
        if out.contains_key(canonical) {
            continue;
        }
        let found = aliases
            .iter()
            .find_map(|alias| obj.get(*alias).cloned());
        if let Some(value) = found {
            let value = match (canonical, value) {
                ("trace_version", Value::Number(n)) => Value::String(n.to_string()),
                (_, v) => v,
            };
            out.insert(canonical.to_string(), value);
        }
    }
    out
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn timestamp_warning(ts: &str, line: usize) -> Option<String> {
    if time::is_rfc3339(ts) {
        None
    } else {
        Some(format!("line {}: ts '{}' is not an RFC 3339 timestamp", line, ts))
    }
}

/// Check one raw JSON object and type it.
pub fn check_entry(
    obj: &Map<String, Value>,
    path: &Path,
    line: usize,
    mode: PhaseMode,
) -> Result<CheckedEntry, GateError> {
    if is_bundle(obj) {
        check_bundle(obj, path, line)
    } else {
        check_record(obj, path, line, mode)
    }
}

fn check_record(
    raw: &Map<String, Value>,
    path: &Path,
    line: usize,
    mode: PhaseMode,
) -> Result<CheckedEntry, GateError> {
    let obj = normalize_record(raw);

    let missing: Vec<String> = REQUIRED_RECORD_KEYS
        .iter()
        .filter(|k| !present(&obj, k))
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(GateError::IncompleteRecord {
            path: path.to_path_buf(),
            line,
            missing,
        });
    }

    for key in STRING_RECORD_KEYS {
        if !obj.get(key).is_some_and(Value::is_string) {
            return Err(GateError::invalid_record(
                path,
                line,
                format!("field '{}' must be a string", key),
            ));
        }
    }

    let mut warnings = Vec::new();
    let ts = string_field(&obj, "ts");
    warnings.extend(timestamp_warning(&ts, line));

    let raw_phase = string_field(&obj, "phase");
    let mut counts_as_valid = true;
    let phase = match Phase::parse(&raw_phase) {
        PhaseMatch::Canonical(p) => Some(p),
        PhaseMatch::Legacy { phase, alias } => {
            tracing::warn!(line, alias, canonical = phase.as_str(), "deprecated phase synonym");
            warnings.push(format!(
                "line {}: phase '{}' is deprecated, use '{}'",
                line, alias, phase
            ));
            Some(phase)
        }
        PhaseMatch::Unknown => match mode {
            PhaseMode::Strict => {
                return Err(GateError::invalid_record(
                    path,
                    line,
                    format!("phase '{}' is not in the accepted vocabulary", raw_phase),
                ));
            }
            PhaseMode::Tolerant => {
                warnings.push(format!(
                    "line {}: non-standard phase '{}' (not counted as valid)",
                    line, raw_phase
                ));
                counts_as_valid = false;
                None
            }
        },
    };

    let record = DecisionRecord {
        ts,
        trace_version: string_field(&obj, "trace_version"),
        decision_id: string_field(&obj, "decision_id"),
        actor: string_field(&obj, "actor"),
        phase,
        raw_phase,
        result: obj.get("result").cloned().unwrap_or(Value::Null),
    };

    Ok(CheckedEntry {
        entry: TraceEntry::Record(record),
        warnings,
        counts_as_valid,
    })
}

fn non_empty_array(
    obj: &Map<String, Value>,
    key: &str,
    path: &Path,
    line: usize,
) -> Result<Vec<Value>, GateError> {
    match obj.get(key) {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items.clone()),
        _ => Err(GateError::invalid_record(
            path,
            line,
            format!("bundle field '{}' must be a non-empty array", key),
        )),
    }
}

fn check_bundle(
    obj: &Map<String, Value>,
    path: &Path,
    line: usize,
) -> Result<CheckedEntry, GateError> {
    let mut missing = Vec::new();
    for key in ["trace_id", "inputs", "outputs"] {
        if !obj.contains_key(key) {
            missing.push(key.to_string());
        }
    }
    if !present(obj, "generated_at") && !present(obj, "ts") {
        missing.push("generated_at|ts".to_string());
    }
    if !missing.is_empty() {
        return Err(GateError::IncompleteRecord {
            path: path.to_path_buf(),
            line,
            missing,
        });
    }

    let trace_id = match obj.get("trace_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => {
            return Err(GateError::invalid_record(
                path,
                line,
                "bundle field 'trace_id' must be a non-empty string".to_string(),
            ));
        }
    };
    let stamp = ["generated_at", "ts"]
        .into_iter()
        .find_map(|key| obj.get(key).filter(|v| !is_empty_value(v)));
    let generated_at = match stamp {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(GateError::invalid_record(
                path,
                line,
                "bundle timestamp must be a string".to_string(),
            ));
        }
    };
    let inputs = non_empty_array(obj, "inputs", path, line)?;
    let outputs = non_empty_array(obj, "outputs", path, line)?;

    let mut warnings = Vec::new();
    warnings.extend(timestamp_warning(&generated_at, line));
    for recommended in ["because", "evidence"] {
        if !obj.contains_key(recommended) {
            warnings.push(format!(
                "line {}: bundle '{}' has no '{}' field (recommended)",
                line, trace_id, recommended
            ));
        }
    }

    Ok(CheckedEntry {
        entry: TraceEntry::Bundle(DecisionBundle {
            trace_id,
            generated_at,
            inputs,
            outputs,
            because: obj.get("because").cloned(),
            evidence: obj.get("evidence").cloned(),
        }),
        warnings,
        counts_as_valid: true,
    })
}
