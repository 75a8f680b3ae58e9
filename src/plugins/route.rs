//! Health-threshold routing between a capability's primary and secondary agent.

use crate::core::config::{Config, RouteConfig};
use crate::core::error::GateError;
use crate::core::output::{self, OutputFormat};
use crate::core::time;
use crate::core::trace::TraceLog;
use clap::Args;
use serde::Serialize;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;

const HEALTHY_STATES: [&str; 4] = ["ACTIVE", "OK", "GREEN", "ONLINE"];
const FAILED_STATES: [&str; 6] = ["FAIL", "FAILED", "DOWN", "CRITICAL", "ISSUE", "RED"];
const UNKNOWN_HEALTH: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }
}

/// A capability's agent pair and its failover threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTarget {
    pub capability: String,
    pub primary: String,
    pub secondary: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub capability: String,
    pub selected_agent: String,
    pub role: Role,
    pub primary: String,
    pub secondary: String,
    pub primary_health: f64,
    pub threshold: f64,
    pub reason: &'static str,
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Health of `agent` in `[0, 1]` from a status snapshot.
///
/// An explicit `health_score`, `health` or `score` in range wins. Otherwise
/// the `state` (or `status`) label is mapped; unknown labels are 0.5.
pub fn agent_health(status: &Value, agent: &str) -> f64 {
    let Some(entry) = status.get("agents").and_then(|a| a.get(agent)) else {
        return UNKNOWN_HEALTH;
    };
    for key in ["health_score", "health", "score"] {
        if let Some(n) = entry.get(key).and_then(number)
            && (0.0..=1.0).contains(&n)
        {
            return n;
        }
    }
    let state = entry
        .get("state")
        .or_else(|| entry.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .trim()
        .to_ascii_uppercase();
    if HEALTHY_STATES.contains(&state.as_str()) {
        1.0
    } else if FAILED_STATES.contains(&state.as_str()) {
        0.0
    } else {
        UNKNOWN_HEALTH
    }
}

fn text(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Find `capability` in either graph shape:
/// `registry.<cap>.agents[{id, role}]` with `routing.health_threshold`, or
/// `capabilities[{capability, primary_agent, secondary_agent, health_threshold?}]`.
pub fn resolve_target(graph: &Value, capability: &str, default_threshold: f64) -> Result<RouteTarget, GateError> {
    let (primary, secondary, threshold) =
        if let Some(entry) = graph.get("registry").and_then(|r| r.get(capability)) {
            let agents = entry.get("agents").and_then(Value::as_array);
            let by_role = |role: &str| {
                agents.and_then(|list| {
                    list.iter()
                        .find(|a| a.get("role").and_then(Value::as_str) == Some(role))
                        .and_then(|a| text(a.get("id")))
                })
            };
            let threshold = entry
                .get("routing")
                .and_then(|r| r.get("health_threshold"))
                .and_then(number);
            (by_role("primary"), by_role("secondary"), threshold)
        } else if let Some(entry) = graph
            .get("capabilities")
            .and_then(Value::as_array)
            .and_then(|list| {
                list.iter()
                    .find(|c| c.get("capability").and_then(Value::as_str) == Some(capability))
            })
        {
            (
                text(entry.get("primary_agent")),
                text(entry.get("secondary_agent")),
                entry.get("health_threshold").and_then(number),
            )
        } else {
            return Err(GateError::UnknownCapability(capability.to_string()));
        };

    let (Some(primary), Some(secondary)) = (primary, secondary) else {
        return Err(GateError::MissingFailoverPair(capability.to_string()));
    };
    Ok(RouteTarget {
        capability: capability.to_string(),
        primary,
        secondary,
        threshold: threshold.unwrap_or(default_threshold),
    })
}

/// Route to the secondary when primary health is strictly below threshold.
pub fn route_capability(
    graph: &Value,
    status: &Value,
    capability: &str,
    default_threshold: f64,
) -> Result<RouteDecision, GateError> {
    let target = resolve_target(graph, capability, default_threshold)?;
    let primary_health = agent_health(status, &target.primary);
    let (selected_agent, role, reason) = if primary_health < target.threshold {
        (target.secondary.clone(), Role::Secondary, "primary_health_below_threshold")
    } else {
        (target.primary.clone(), Role::Primary, "primary_healthy")
    };
    Ok(RouteDecision {
        capability: target.capability,
        selected_agent,
        role,
        primary: target.primary,
        secondary: target.secondary,
        primary_health,
        threshold: target.threshold,
        reason,
    })
}

/// Failover log entry for a routing decision.
pub fn route_event(decision: &RouteDecision, ts: &str) -> Value {
    json!({
        "ts": ts,
        "capability": decision.capability,
        "event": "FAILOVER_ROUTE",
        "route": {
            "selected_agent": decision.selected_agent,
            "role": decision.role,
            "primary": decision.primary,
            "secondary": decision.secondary,
        },
        "reason": decision.reason,
        "inputs": {
            "primary_health": decision.primary_health,
            "threshold": decision.threshold,
        },
        "result": "OK",
    })
}

fn load(path: &Path) -> Result<Value, GateError> {
    let content = fs::read_to_string(path).map_err(|e| {
        GateError::MissingArtifact(format!("{} could not be read: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| GateError::invalid_record(path, e.line(), format!("invalid JSON document: {}", e)))
}

/// Route, then append the decision to the failover log.
pub fn route_and_record(root: &Path, config: &RouteConfig, capability: &str) -> Result<RouteDecision, GateError> {
    let graph = load(&root.join(&config.graph))?;
    let status = load(&root.join(&config.status))?;
    let decision = route_capability(&graph, &status, capability, config.default_threshold)?;
    TraceLog::open(root.join(&config.trace_log)).append(&route_event(&decision, &time::iso_utc_now()))?;
    tracing::info!(
        capability,
        selected = %decision.selected_agent,
        primary_health = decision.primary_health,
        "capability routed"
    );
    Ok(decision)
}

/// Deploy workflow to run for the selected role.
pub fn deploy_workflow(config: &RouteConfig, role: Role) -> &str {
    match role {
        Role::Primary => &config.primary_workflow,
        Role::Secondary => &config.secondary_workflow,
    }
}

#[derive(Args, Debug)]
pub struct RouteCli {
    /// Capability to route.
    #[clap(default_value = "deploy")]
    pub capability: String,
}

pub fn run_route_cli(root: &Path, config: &Config, format: OutputFormat, cli: RouteCli) -> Result<i32, GateError> {
    let decision = route_and_record(root, &config.route, cli.capability.trim())?;
    let workflow = deploy_workflow(&config.route, decision.role);
    if format.is_json() {
        let body = serde_json::to_value(&decision).map_err(|e| GateError::InvalidInput(e.to_string()))?;
        output::print_json(&time::command_envelope(
            "route",
            "ok",
            json!({ "decision": body, "deploy_workflow": workflow }),
        ));
    } else {
        println!("selected_agent={}", decision.selected_agent);
        println!("selected_role={}", decision.role.as_str());
        println!("deploy_workflow={}", workflow);
    }
    Ok(0)
}
