use proptest::prelude::*;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;
use tracegate::core::gatekeeper::{GateInputs, Verdict, evaluate_gate};

fn any_coverage() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        Just(None),
        (0.0f64..=1.0).prop_map(Some),
        Just(Some(0.9)),
        Just(Some(f64::NAN)),
        Just(Some(-0.5)),
        Just(Some(3.0)),
    ]
}

fn any_inputs() -> impl Strategy<Value = GateInputs> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any_coverage(),
        prop_oneof![(0.0f64..=1.0), Just(f64::INFINITY), Just(-1.0)],
    )
        .prop_map(
            |(emergency_locked, inputs_parseable, outputs_present, trace_coverage, declared_autonomy_cap)| {
                GateInputs {
                    emergency_locked,
                    inputs_parseable,
                    outputs_present,
                    trace_coverage,
                    declared_autonomy_cap,
                }
            },
        )
}

/// Coverage that earns the coverage credit, as the evaluator sees it.
fn covered(c: Option<f64>) -> bool {
    c.is_some_and(|c| c.is_finite() && c.clamp(0.0, 1.0) >= 0.9)
}

/// `b` carries at least the evidence of `a`.
fn dominates(b: &GateInputs, a: &GateInputs) -> bool {
    (!a.inputs_parseable || b.inputs_parseable)
        && (!a.outputs_present || b.outputs_present)
        && (!covered(a.trace_coverage) || covered(b.trace_coverage))
        && (!b.emergency_locked || a.emergency_locked)
}

proptest! {
    #[test]
    fn emergency_lock_always_blocks(inputs in any_inputs()) {
        let outcome = evaluate_gate(&GateInputs { emergency_locked: true, ..inputs });
        prop_assert_eq!(outcome.verdict, Verdict::Block);
        prop_assert_eq!(outcome.confidence, 0.0);
        prop_assert_eq!(outcome.autonomy, 0.0);
    }

    #[test]
    fn confidence_is_monotonic_in_evidence(a in any_inputs(), b in any_inputs()) {
        prop_assume!(dominates(&b, &a));
        let ca = evaluate_gate(&a).confidence;
        let cb = evaluate_gate(&b).confidence;
        prop_assert!(ca <= cb, "confidence({:?}) = {} > confidence({:?}) = {}", a, ca, b, cb);
    }

    #[test]
    fn autonomy_never_exceeds_declared_cap(inputs in any_inputs()) {
        let outcome = evaluate_gate(&inputs);
        let cap = if inputs.declared_autonomy_cap.is_finite() {
            inputs.declared_autonomy_cap.clamp(0.0, 1.0)
        } else {
            0.0
        };
        prop_assert!(outcome.autonomy <= cap);
        prop_assert!(outcome.autonomy >= 0.0);
        prop_assert!((0.0..=1.0).contains(&outcome.confidence));
    }

    #[test]
    fn evaluation_is_deterministic(inputs in any_inputs()) {
        prop_assert_eq!(evaluate_gate(&inputs), evaluate_gate(&inputs));
    }
}

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

fn complete_project() -> TempDir {
    let tmp = TempDir::new().expect("tmpdir");
    let root = tmp.path();
    write(root, "ops/autonomy.json", r#"{"overview": {"system_autonomy_level": 0.6}}"#);
    write(root, "ops/decisions/latest.json", r#"{"decision_id": "dec_001"}"#);
    write(root, "ops/reports/system_status.json", r#"{"system_state": "ACTIVE"}"#);
    write(
        root,
        "ops/reports/decision_trace.jsonl",
        "{\"ts\":\"2026-01-31T08:15:00Z\",\"trace_version\":\"1.0\",\"decision_id\":\"dec_001\",\"actor\":\"george\",\"phase\":\"finalize\",\"result\":\"ok\"}\n",
    );
    tmp
}

#[test]
fn cli_allows_with_full_evidence() {
    let tmp = complete_project();
    let out = run_tracegate(tmp.path(), &["evaluate-gate"]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("verdict=ALLOW"));
    assert!(stdout.contains("confidence=1.00"));
    assert!(stdout.contains("autonomy=0.600"));
}

#[test]
fn cli_blocks_under_emergency_lock() {
    let tmp = complete_project();
    write(tmp.path(), "ops/emergency_lock.json", r#"{"locked": true}"#);
    let out = run_tracegate(tmp.path(), &["evaluate-gate", "--vocabulary", "allow-deny"]);
    assert_eq!(out.status.code(), Some(20));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("verdict=DENY"));
    assert!(stdout.contains("confidence=0.00"));
}

#[test]
fn cli_missing_evidence_lowers_confidence_without_failing() {
    let tmp = TempDir::new().expect("tmpdir");
    let out = run_tracegate(tmp.path(), &["--format", "json", "evaluate-gate"]);
    assert_eq!(out.status.code(), Some(0));
    let body: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json stdout");
    assert_eq!(body["verdict"], "ALLOW");
    assert_eq!(body["outcome"]["confidence"], 0.2);
    assert_eq!(body["outcome"]["autonomy"], 0.0);
    assert!(
        body["evidence"]["flags"]
            .as_array()
            .is_some_and(|flags| !flags.is_empty())
    );
}
