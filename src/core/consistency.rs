//! Resilience gate: referential integrity across the governance documents.
//!
//! Every critical capability in the backlog must exist in the capability
//! graph, name both a primary and a secondary agent, and have exactly one
//! failover rule. One deterministic failover is then simulated for the chaos
//! scenario and checked against the expected trace.

use crate::core::config::ResilienceConfig;
use crate::core::error::GateError;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const FAILOVER_REASON: &str = "deterministic_failover_rule";
const DEFAULT_SCENARIO: &str = "primary_agent_down";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Backlog {
    #[serde(default)]
    pub critical_capabilities: Vec<BacklogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacklogEntry {
    #[serde(default)]
    pub capability: Option<String>,
    /// Entries are critical unless they say otherwise.
    #[serde(default = "default_true")]
    pub critical: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityGraph {
    #[serde(default)]
    pub capabilities: Vec<GraphEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphEntry {
    pub capability: String,
    #[serde(default)]
    pub primary_agent: Option<String>,
    #[serde(default)]
    pub secondary_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FailoverRules {
    /// Kept as raw objects; the matched rule is copied into the trace as-is.
    #[serde(default)]
    pub rules: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChaosScenario {
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default, alias = "capability_required")]
    pub capability: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpectedTrace {
    #[serde(default)]
    pub capability_required: Option<String>,
    #[serde(default)]
    pub capability: Option<String>,
}

impl ExpectedTrace {
    fn expected_capability(&self) -> Option<&str> {
        non_empty(self.capability_required.as_deref()).or(non_empty(self.capability.as_deref()))
    }
}

/// The five governance documents, parsed once.
#[derive(Debug, Clone)]
pub struct ResilienceDocs {
    pub backlog_path: PathBuf,
    pub backlog: Backlog,
    pub graph: CapabilityGraph,
    pub rules: FailoverRules,
    pub chaos: ChaosScenario,
    /// Optional: absent means no expectation to compare against.
    pub expected: Option<ExpectedTrace>,
}

fn load_doc<T: DeserializeOwned>(path: &Path) -> Result<T, GateError> {
    let content = fs::read_to_string(path).map_err(|e| {
        GateError::MissingArtifact(format!("{} could not be read: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| GateError::invalid_record(path, e.line(), format!("invalid JSON document: {}", e)))
}

impl ResilienceDocs {
    pub fn load(dir: &Path, config: &ResilienceConfig) -> Result<Self, GateError> {
        let backlog_path = dir.join(&config.backlog);
        let expected_path = dir.join(&config.expected_trace);
        let expected = if expected_path.exists() {
            Some(load_doc(&expected_path)?)
        } else {
            None
        };
        Ok(Self {
            backlog: load_doc(&backlog_path)?,
            graph: load_doc(&dir.join(&config.graph))?,
            rules: load_doc(&dir.join(&config.rules))?,
            chaos: load_doc(&dir.join(&config.chaos_scenario))?,
            expected,
            backlog_path,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedHealth {
    pub primary: String,
    pub secondary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverDecision {
    pub routed_to: String,
    pub reason: String,
    pub rule: Value,
}

/// Evidence written when the resilience gate passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverTrace {
    pub scenario: String,
    pub timestamp_utc: String,
    pub capability_required: String,
    pub primary_agent: String,
    pub secondary_agent: String,
    pub observed_health: ObservedHealth,
    pub decision: FailoverDecision,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn rule_capability(rule: &Value) -> Option<&str> {
    non_empty(rule.get("capability").and_then(Value::as_str))
}

/// Critical capability names in backlog order, without repeats.
fn critical_capabilities(backlog: &Backlog) -> Vec<&str> {
    let mut seen = FxHashSet::default();
    backlog
        .critical_capabilities
        .iter()
        .filter(|e| e.critical)
        .filter_map(|e| non_empty(e.capability.as_deref()))
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Run the integrity checks and simulate one failover.
///
/// Checks run in a fixed order and the first failure is returned, so the
/// same documents always produce the same error.
pub fn check_consistency(docs: &ResilienceDocs, timestamp_utc: &str) -> Result<FailoverTrace, GateError> {
    let critical = critical_capabilities(&docs.backlog);
    if critical.is_empty() {
        return Err(GateError::NoCriticalCapabilities(docs.backlog_path.clone()));
    }

    let mut graph: FxHashMap<&str, &GraphEntry> = FxHashMap::default();
    for entry in &docs.graph.capabilities {
        if graph.insert(entry.capability.trim(), entry).is_some() {
            return Err(GateError::DuplicateCapability(entry.capability.trim().to_string()));
        }
    }

    let mut rules_by_capability: FxHashMap<&str, Vec<&Value>> = FxHashMap::default();
    for rule in &docs.rules.rules {
        if let Some(cap) = rule_capability(rule) {
            rules_by_capability.entry(cap).or_default().push(rule);
        }
    }

    for name in &critical {
        let entry = graph
            .get(name)
            .ok_or_else(|| GateError::UnknownCapability((*name).to_string()))?;
        if non_empty(entry.primary_agent.as_deref()).is_none()
            || non_empty(entry.secondary_agent.as_deref()).is_none()
        {
            return Err(GateError::MissingFailoverPair((*name).to_string()));
        }
    }

    for name in &critical {
        match rules_by_capability.get(name).map(Vec::len).unwrap_or(0) {
            0 => return Err(GateError::NoFailoverRule((*name).to_string())),
            1 => {}
            count => {
                return Err(GateError::AmbiguousFailoverRule {
                    capability: (*name).to_string(),
                    count,
                });
            }
        }
    }

    let simulated = match non_empty(docs.chaos.capability.as_deref()) {
        Some(name) if critical.contains(&name) => name,
        Some(name) => return Err(GateError::UnknownCapability(name.to_string())),
        None => critical[0],
    };

    if let Some(expected) = docs.expected.as_ref().and_then(ExpectedTrace::expected_capability)
        && expected != simulated
    {
        return Err(GateError::ExpectedCapabilityMismatch {
            expected: expected.to_string(),
            simulated: simulated.to_string(),
        });
    }

    // Presence of every lookup below was established by the checks above.
    let entry = graph
        .get(simulated)
        .ok_or_else(|| GateError::UnknownCapability(simulated.to_string()))?;
    let rule = rules_by_capability
        .get(simulated)
        .and_then(|rules| rules.first())
        .ok_or_else(|| GateError::NoFailoverRule(simulated.to_string()))?;
    let primary = non_empty(entry.primary_agent.as_deref()).unwrap_or_default();
    let secondary = non_empty(entry.secondary_agent.as_deref()).unwrap_or_default();

    tracing::info!(
        capability = simulated,
        primary,
        secondary,
        "simulated primary outage"
    );

    Ok(FailoverTrace {
        scenario: non_empty(docs.chaos.scenario.as_deref())
            .unwrap_or(DEFAULT_SCENARIO)
            .to_string(),
        timestamp_utc: timestamp_utc.to_string(),
        capability_required: simulated.to_string(),
        primary_agent: primary.to_string(),
        secondary_agent: secondary.to_string(),
        observed_health: ObservedHealth {
            primary: "down".to_string(),
            secondary: "ok".to_string(),
        },
        decision: FailoverDecision {
            routed_to: secondary.to_string(),
            reason: FAILOVER_REASON.to_string(),
            rule: (*rule).clone(),
        },
    })
}

/// Write the trace as pretty JSON, replacing any previous file atomically.
pub fn write_failover_trace(path: &Path, trace: &FailoverTrace) -> Result<(), GateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(trace)
        .map_err(|e| GateError::InvalidInput(format!("unserializable failover trace: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body + "\n")?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Stable fingerprint of a decision, independent of when it was made.
pub fn decision_digest(decision: &FailoverDecision) -> String {
    let bytes = serde_json::to_vec(decision).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}
