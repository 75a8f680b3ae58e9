use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const POLICY: &str = r#"
[enforcement]
mode = "enforced"
default_action = "block"
allow_human_override = true

[thresholds]
min_health_score = 0.5

[decision_classes.deploy]
min_health_score = 0.8
require_guardian_ok = true
require_trace = true
on_fail = "ESCALATE"

[decision_classes.content]
require_status_endpoint = true
"#;

fn run_tracegate(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tracegate"))
        .current_dir(dir)
        .env_remove("TRACEGATE_LOG")
        .args(args)
        .output()
        .expect("run tracegate")
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("json")
}

#[test]
fn healthy_deploy_is_allowed() {
    let tmp = TempDir::new().expect("tmpdir");
    write(tmp.path(), "policy.toml", POLICY);
    write(
        tmp.path(),
        "decision.json",
        r#"{"decision_id": "dec_9", "decision_class": "deploy",
            "signals": {"system_health_score": 0.93, "guardian_ok": true, "decision_trace_present": true}}"#,
    );

    let out = run_tracegate(
        tmp.path(),
        &["runtime-gate", "decision.json", "policy.toml", "--output", "out/gate_result.json"],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let result = read_json(&tmp.path().join("out/gate_result.json"));
    assert_eq!(result["verdict"], "ALLOW");
    assert_eq!(result["decision_id"], "dec_9");
    assert_eq!(result["applied_policy"]["min_health_score"], 0.8);
}

const YAML_POLICY: &str = "\
enforcement:
  mode: Enforced
  default_action: BLOCK
  allow_human_override: true
thresholds:
  min_health_score: 0.5
decision_classes:
  deploy:
    min_health_score: 0.8
    require_guardian_ok: true
    require_trace: true
    on_fail: ESCALATE
";

#[test]
fn yaml_policy_is_accepted() {
    let tmp = TempDir::new().expect("tmpdir");
    write(tmp.path(), "ops/rules/runtime_gate.yaml", YAML_POLICY);
    write(
        tmp.path(),
        "decision.json",
        r#"{"decision_id": "dec_10", "decision_class": "deploy",
            "signals": {"system_health_score": 0.95, "guardian_ok": true, "decision_trace_present": true}}"#,
    );

    let out = run_tracegate(tmp.path(), &["runtime-gate", "decision.json", "ops/rules/runtime_gate.yaml"]);
    assert_eq!(out.status.code(), Some(0), "stdout: {}", String::from_utf8_lossy(&out.stdout));
    let result: Value = serde_json::from_slice(&out.stdout).expect("json stdout");
    assert_eq!(result["verdict"], "ALLOW");
    assert_eq!(result["applied_policy"]["mode"], "enforced");
    assert_eq!(result["applied_policy"]["min_health_score"], 0.8);
}

#[test]
fn guardian_warning_escalates() {
    let tmp = TempDir::new().expect("tmpdir");
    write(tmp.path(), "policy.toml", POLICY);
    write(
        tmp.path(),
        "decision.json",
        r#"{"decision_class": "deploy", "guardian": {"status": "WARNING"},
            "health_context": {"system_health_percent": 91}, "decision_trace": {"trace_id": "trc_1"}}"#,
    );

    let out = run_tracegate(tmp.path(), &["runtime-gate", "decision.json", "policy.toml"]);
    assert_eq!(out.status.code(), Some(10));
    let result: Value = serde_json::from_slice(&out.stdout).expect("json stdout");
    assert_eq!(result["verdict"], "ESCALATE");
    assert_eq!(
        result["applied_policy"]["signal_sources"]["guardian_ok"],
        "guardian.status"
    );
    assert!(
        result["todo"]
            .as_array()
            .is_some_and(|todo| todo.iter().any(|t| t.as_str().is_some_and(|s| s.starts_with("ESCALATE"))))
    );
}

#[test]
fn missing_status_endpoint_blocks_when_enforced() {
    let tmp = TempDir::new().expect("tmpdir");
    write(tmp.path(), "policy.toml", POLICY);
    write(
        tmp.path(),
        "decision.json",
        r#"{"decisionClass": "content", "signals": {"system_health_score": "0.7"}}"#,
    );

    let out = run_tracegate(tmp.path(), &["runtime-gate", "decision.json", "policy.toml"]);
    assert_eq!(out.status.code(), Some(20));
    let result: Value = serde_json::from_slice(&out.stdout).expect("json stdout");
    assert_eq!(result["verdict"], "BLOCK");
    assert_eq!(result["decision_class"], "content");
}

#[test]
fn unreadable_policy_still_writes_block_result() {
    let tmp = TempDir::new().expect("tmpdir");
    write(tmp.path(), "decision.json", r#"{"decision_class": "deploy"}"#);
    write(tmp.path(), "policy.toml", "[enforcement\nmode = ");

    let out = run_tracegate(
        tmp.path(),
        &["runtime-gate", "decision.json", "policy.toml", "--output", "gate_result.json"],
    );
    assert_eq!(out.status.code(), Some(20));
    let result = read_json(&tmp.path().join("gate_result.json"));
    assert_eq!(result["verdict"], "BLOCK");
    assert_eq!(result["exit_code"], 20);
    assert!(result["decision_class"].is_null());
}

#[test]
fn status_then_route_uses_regenerated_snapshot() {
    let tmp = TempDir::new().expect("tmpdir");
    let root = tmp.path();
    write(root, "ops/autonomy.json", r#"{"overview": {"system_autonomy_level": 0.42}}"#);
    write(
        root,
        "ops/reports/system_status.json",
        r#"{"agents": {"george": {"state": "DOWN"}, "guardian": {"state": "ACTIVE"}}}"#,
    );
    write(
        root,
        "governance/resilience/capability_graph.json",
        r#"{"capabilities": [{"capability": "deploy", "primary_agent": "george", "secondary_agent": "guardian"}]}"#,
    );

    let status = run_tracegate(root, &["status", "--gate-verdict", "PASS", "--env", "staging"]);
    assert_eq!(status.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&status.stderr));
    let snapshot = read_json(&root.join("ops/reports/system_status.json"));
    assert_eq!(snapshot["system_state"], "ACTIVE");
    assert_eq!(snapshot["environment"], "staging");
    assert_eq!(snapshot["autonomy_score"]["percent"], 42.0);
    assert_eq!(snapshot["governance_evidence"]["status"], "PARTIAL_EVIDENCE");

    assert_eq!(snapshot["autonomy"], "SUPERVISED");
    let latest = read_json(&root.join("ops/reports/decision_trace.json"));
    assert!(latest["trace_id"].as_str().is_some_and(|id| id.ends_with("_status_truth")));

    let checked = run_tracegate(root, &["validate-status"]);
    assert!(checked.status.success(), "stderr: {}", String::from_utf8_lossy(&checked.stderr));
    let stdout = String::from_utf8_lossy(&checked.stdout);
    assert!(stdout.contains("structure is acceptable (2 agents)"));
    assert!(!stdout.contains("WARN"), "stdout: {stdout}");

    let validate = run_tracegate(root, &["validate-trace"]);
    assert!(validate.status.success(), "stderr: {}", String::from_utf8_lossy(&validate.stderr));

    let route = run_tracegate(root, &["route", "deploy"]);
    assert!(route.status.success(), "stderr: {}", String::from_utf8_lossy(&route.stderr));
    let stdout = String::from_utf8_lossy(&route.stdout);
    assert!(stdout.contains("selected_agent=guardian"));
    assert!(stdout.contains("selected_role=secondary"));
    assert!(stdout.contains("deploy_workflow=site-deploy-backup.yml"));
    let log = fs::read_to_string(root.join("ops/reports/failover_trace.jsonl")).expect("failover log");
    assert!(log.contains("primary_health_below_threshold"));
}

#[test]
fn status_exit_codes_follow_gate_and_lock() {
    let tmp = TempDir::new().expect("tmpdir");
    let root = tmp.path();

    let unknown = run_tracegate(root, &["status"]);
    assert_eq!(unknown.status.code(), Some(2));
    let snapshot = read_json(&root.join("ops/reports/system_status.json"));
    assert_eq!(snapshot["system_state"], "BLOCKED");
    assert_eq!(snapshot["gate"]["verdict"], "UNKNOWN");

    write(root, "ops/emergency_lock.json", r#"{"locked": true}"#);
    let locked = run_tracegate(
        root,
        &["status", "--gate-verdict", "PASS", "--gate-reasons", r#"["manual freeze"]"#],
    );
    assert_eq!(locked.status.code(), Some(3));
    let snapshot = read_json(&root.join("ops/reports/system_status.json"));
    assert_eq!(snapshot["health"]["signal"], "RED");
    assert_eq!(snapshot["gate"]["reasons"][0], "manual freeze");
}

#[test]
fn validate_status_rejects_snapshot_without_autonomy() {
    let tmp = TempDir::new().expect("tmpdir");
    let root = tmp.path();
    write(
        root,
        "ops/reports/system_status.json",
        r#"{"system_state": "ACTIVE", "agents": {"george": {"status": "sleeping"}}}"#,
    );

    let out = run_tracegate(root, &["validate-status"]);
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.starts_with("VALIDATION FAILED:"), "stderr: {err}");
    assert!(err.contains("[autonomy]"));

    write(
        root,
        "legacy_status.json",
        r#"{"system_state": "ACTIVE", "autonomy": "MANUAL", "agents": {"george": {"status": "sleeping"}}}"#,
    );
    let legacy = run_tracegate(root, &["validate-status", "legacy_status.json"]);
    assert!(legacy.status.success(), "stderr: {}", String::from_utf8_lossy(&legacy.stderr));
    assert!(String::from_utf8_lossy(&legacy.stdout).contains("VALIDATION WARN: agents['george'] has unknown status 'sleeping'"));
}
