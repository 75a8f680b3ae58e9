//! Gate verdicts and evidence-based confidence.
//!
//! Provides:
//! - One canonical verdict type with adapters for every external vocabulary
//! - Evidence collection that degrades to "absent" instead of failing
//! - A pure, conservative evaluator: missing evidence never raises confidence

use crate::core::config::GateConfig;
use crate::core::validate::{self, ValidateOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;

/// Trace coverage needed for the coverage credit.
pub const COVERAGE_THRESHOLD: f64 = 0.90;

// Confidence credits, in hundredths.
const INPUTS_CREDIT: u32 = 20;
const OUTPUTS_CREDIT: u32 = 30;
const COVERAGE_CREDIT: u32 = 30;
const ALLOW_CREDIT: u32 = 20;

/// Gate outcome, ordered from least to most permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Block,
    Hold,
    Allow,
}

impl Verdict {
    /// Read a verdict from any vocabulary in use at the boundaries
    /// (`PASS/BLOCK/UNKNOWN`, `ALLOW/DENY`, `ALLOW/ESCALATE/BLOCK`).
    /// Anything unrecognised is `Hold`, never `Allow`.
    pub fn from_external(raw: &str) -> Verdict {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ALLOW" | "PASS" => Verdict::Allow,
            "BLOCK" | "DENY" => Verdict::Block,
            _ => Verdict::Hold,
        }
    }

    /// Pipeline exit status: 0 allow, 10 hold, 20 block.
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Allow => 0,
            Verdict::Hold => 10,
            Verdict::Block => 20,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(VerdictVocabulary::Canonical.render(*self))
    }
}

/// Rendering of a [`Verdict`] for a particular consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum VerdictVocabulary {
    /// ALLOW / HOLD / BLOCK
    #[default]
    Canonical,
    /// PASS / UNKNOWN / BLOCK
    PassBlock,
    /// ALLOW / DENY (hold is denied)
    AllowDeny,
    /// ALLOW / ESCALATE / BLOCK
    Escalation,
}

impl VerdictVocabulary {
    pub fn render(self, verdict: Verdict) -> &'static str {
        match (self, verdict) {
            (VerdictVocabulary::Canonical, Verdict::Allow) => "ALLOW",
            (VerdictVocabulary::Canonical, Verdict::Hold) => "HOLD",
            (VerdictVocabulary::Canonical, Verdict::Block) => "BLOCK",
            (VerdictVocabulary::PassBlock, Verdict::Allow) => "PASS",
            (VerdictVocabulary::PassBlock, Verdict::Hold) => "UNKNOWN",
            (VerdictVocabulary::PassBlock, Verdict::Block) => "BLOCK",
            (VerdictVocabulary::AllowDeny, Verdict::Allow) => "ALLOW",
            (VerdictVocabulary::AllowDeny, _) => "DENY",
            (VerdictVocabulary::Escalation, Verdict::Allow) => "ALLOW",
            (VerdictVocabulary::Escalation, Verdict::Hold) => "ESCALATE",
            (VerdictVocabulary::Escalation, Verdict::Block) => "BLOCK",
        }
    }
}

/// Raw evidence fed to [`evaluate_gate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateInputs {
    pub emergency_locked: bool,
    pub inputs_parseable: bool,
    pub outputs_present: bool,
    /// `None` when no trace could be validated.
    pub trace_coverage: Option<f64>,
    pub declared_autonomy_cap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateOutcome {
    pub verdict: Verdict,
    pub confidence: f64,
    pub autonomy: f64,
    /// Credits that were not earned, by name.
    pub unearned: Vec<&'static str>,
}

/// Why a piece of evidence was treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum EvidenceFlag {
    EmergencyLockUnreadable { path: String },
    NothingDeclared { kind: &'static str },
    InputUnparseable { path: String },
    OutputMissing { path: String },
    TraceUnavailable { reason: String },
    AutonomyCapUnavailable { path: String },
}

impl fmt::Display for EvidenceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceFlag::EmergencyLockUnreadable { path } => {
                write!(f, "emergency lock {} unreadable, treated as absent", path)
            }
            EvidenceFlag::NothingDeclared { kind } => {
                write!(f, "no required {} declared, credit withheld", kind)
            }
            EvidenceFlag::InputUnparseable { path } => write!(f, "input {} is not valid JSON", path),
            EvidenceFlag::OutputMissing { path } => write!(f, "output {} is missing", path),
            EvidenceFlag::TraceUnavailable { reason } => write!(f, "trace unavailable: {}", reason),
            EvidenceFlag::AutonomyCapUnavailable { path } => {
                write!(f, "autonomy cap {} unavailable, using configured default", path)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Evidence {
    pub inputs: GateInputs,
    pub flags: Vec<EvidenceFlag>,
}

/// Clamp to `[0, 1]`; non-finite values count as absent.
fn unit_interval(x: f64) -> Option<f64> {
    if x.is_finite() {
        Some(x.clamp(0.0, 1.0))
    } else {
        None
    }
}

fn round3(x: f64) -> f64 {
    validate::round3(x)
}

/// Evaluate the gate. Order: emergency lock, verdict, confidence, autonomy.
pub fn evaluate_gate(inputs: &GateInputs) -> GateOutcome {
    if inputs.emergency_locked {
        return GateOutcome {
            verdict: Verdict::Block,
            confidence: 0.0,
            autonomy: 0.0,
            unearned: vec!["emergency_lock"],
        };
    }

    let verdict = Verdict::Allow;
    let coverage = inputs.trace_coverage.and_then(unit_interval);

    let mut points = 0u32;
    let mut unearned = Vec::new();
    if inputs.inputs_parseable {
        points += INPUTS_CREDIT;
    } else {
        unearned.push("inputs_parseable");
    }
    if inputs.outputs_present {
        points += OUTPUTS_CREDIT;
    } else {
        unearned.push("outputs_present");
    }
    if coverage.is_some_and(|c| c >= COVERAGE_THRESHOLD) {
        points += COVERAGE_CREDIT;
    } else {
        unearned.push("trace_coverage");
    }
    if verdict == Verdict::Allow {
        points += ALLOW_CREDIT;
    }
    let confidence = (f64::from(points.min(100))) / 100.0;

    let cap = unit_interval(inputs.declared_autonomy_cap).unwrap_or(0.0);
    let autonomy = round3(cap.min(coverage.unwrap_or(0.0)) * confidence).min(cap);

    GateOutcome {
        verdict,
        confidence,
        autonomy,
        unearned,
    }
}

/// Missing or malformed documents both read as `None`.
pub(crate) fn read_json(path: &Path) -> Option<Value> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// `overview.system_autonomy_level`, clamped to `[0, 1]`.
pub(crate) fn declared_autonomy(doc: &Value) -> Option<f64> {
    doc.get("overview")
        .and_then(|o| o.get("system_autonomy_level"))
        .and_then(Value::as_f64)
        .and_then(unit_interval)
}

/// `{locked: true}` engages the lock; anything else leaves it off.
pub(crate) fn lock_engaged(doc: &Value) -> bool {
    doc.get("locked").and_then(Value::as_bool).unwrap_or(false)
}

/// Gather gate inputs from the project tree. Never fails: anything missing
/// or malformed is recorded as a flag and counts as absent.
pub fn collect_evidence(root: &Path, config: &GateConfig, trace_opts: &ValidateOptions) -> Evidence {
    let mut flags = Vec::new();

    let lock_path = root.join(&config.emergency_lock);
    let emergency_locked = if lock_path.exists() {
        match read_json(&lock_path) {
            Some(doc) => lock_engaged(&doc),
            None => {
                flags.push(EvidenceFlag::EmergencyLockUnreadable {
                    path: config.emergency_lock.display().to_string(),
                });
                false
            }
        }
    } else {
        false
    };

    let inputs_parseable = if config.required_inputs.is_empty() {
        flags.push(EvidenceFlag::NothingDeclared { kind: "inputs" });
        false
    } else {
        let mut all = true;
        for input in &config.required_inputs {
            if read_json(&root.join(input)).is_none() {
                flags.push(EvidenceFlag::InputUnparseable {
                    path: input.display().to_string(),
                });
                all = false;
            }
        }
        all
    };

    let outputs_present = if config.required_outputs.is_empty() {
        flags.push(EvidenceFlag::NothingDeclared { kind: "outputs" });
        false
    } else {
        let mut all = true;
        for output in &config.required_outputs {
            if !root.join(output).is_file() {
                flags.push(EvidenceFlag::OutputMissing {
                    path: output.display().to_string(),
                });
                all = false;
            }
        }
        all
    };

    let trace_coverage = match validate::validate_trace(&root.join(&config.trace), trace_opts) {
        Ok(report) => Some(report.coverage),
        Err(e) => {
            flags.push(EvidenceFlag::TraceUnavailable {
                reason: e.to_string(),
            });
            None
        }
    };

    let declared_autonomy_cap = read_json(&root.join(&config.autonomy))
        .as_ref()
        .and_then(declared_autonomy)
        .unwrap_or_else(|| {
            flags.push(EvidenceFlag::AutonomyCapUnavailable {
                path: config.autonomy.display().to_string(),
            });
            unit_interval(config.default_autonomy_cap).unwrap_or(0.0)
        });

    for flag in &flags {
        tracing::info!(%flag, "gate evidence degraded");
    }

    Evidence {
        inputs: GateInputs {
            emergency_locked,
            inputs_parseable,
            outputs_present,
            trace_coverage,
            declared_autonomy_cap,
        },
        flags,
    }
}
