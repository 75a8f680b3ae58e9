//! Decision trace validation.
//!
//! A trace is usable as audit evidence when the most recent window of entries
//! parses, carries every required key, and stays inside the phase vocabulary.
//! The check is read-only and deterministic: the same file always yields the
//! same report.

use crate::core::config::TraceConfig;
use crate::core::error::GateError;
use crate::core::output;
use crate::core::record::{self, PhaseMode, TraceEntry};
use crate::core::trace::{self, TraceLog};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Changed-file patterns that count as a decision trace in a change set.
pub const DEFAULT_TRACE_PATTERNS: [&str; 6] = [
    "decision_trace.md",
    "decision_trace.jsonl",
    "decision_traces/*.decision_trace.md",
    "decision_traces/*.decision_trace.json",
    "decision_traces/**/*.decision_trace.md",
    "decision_traces/**/*.decision_trace.json",
];

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub window: usize,
    pub phase_mode: PhaseMode,
    /// Used when the target is a directory.
    pub candidates: Vec<PathBuf>,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        ValidateOptions::from(&TraceConfig::default())
    }
}

impl From<&TraceConfig> for ValidateOptions {
    fn from(config: &TraceConfig) -> Self {
        Self {
            window: config.window,
            phase_mode: config.phase_mode,
            candidates: config.candidates.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub path: PathBuf,
    pub total_entries: usize,
    pub checked: usize,
    pub valid: usize,
    pub records: usize,
    pub bundles: usize,
    /// `valid / checked`, rounded to three decimals.
    pub coverage: f64,
    pub latest_decision_id: Option<String>,
    pub warnings: Vec<String>,
}

pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn coverage_ratio(valid: usize, checked: usize) -> f64 {
    if checked == 0 {
        return 0.0;
    }
    round3(valid as f64 / checked as f64)
}

/// Validate the newest `opts.window` entries of the trace at `path`.
///
/// `path` may also be a directory, in which case the first existing
/// candidate below it is used.
pub fn validate_trace(path: &Path, opts: &ValidateOptions) -> Result<TraceReport, GateError> {
    let target = if path.is_dir() {
        trace::resolve_trace_path(path, &opts.candidates)?
    } else {
        path.to_path_buf()
    };

    let snapshot = TraceLog::open(&target).snapshot()?;
    if snapshot.is_empty() {
        return Err(GateError::MissingArtifact(format!(
            "{} is empty (must contain at least one trace record or bundle)",
            target.display()
        )));
    }

    let window = opts.window.max(1);
    tracing::debug!(path = %target.display(), total = snapshot.len(), window, "validating trace window");

    let mut checked = 0usize;
    let mut valid = 0usize;
    let mut records = 0usize;
    let mut bundles = 0usize;
    let mut warnings = Vec::new();
    let mut latest_decision_id = None;

    for line in snapshot.tail(window) {
        let value: Value = serde_json::from_str(&line.text).map_err(|e| {
            GateError::invalid_record(
                &target,
                line.line,
                format!(
                    "invalid JSON ({}): {}",
                    e,
                    output::compact_line(&line.text, PREVIEW_CHARS)
                ),
            )
        })?;
        let Some(obj) = value.as_object() else {
            return Err(GateError::invalid_record(
                &target,
                line.line,
                format!(
                    "entry must be a JSON object: {}",
                    output::compact_line(&line.text, PREVIEW_CHARS)
                ),
            ));
        };

        let entry = record::check_entry(obj, &target, line.line, opts.phase_mode)?;
        checked += 1;
        if entry.counts_as_valid {
            valid += 1;
        }
        match &entry.entry {
            TraceEntry::Record(_) => records += 1,
            TraceEntry::Bundle(_) => bundles += 1,
        }
        if latest_decision_id.is_none() {
            latest_decision_id = Some(entry.entry.decision_key().to_string());
        }
        warnings.extend(entry.warnings);
    }

    // Newest-first iteration; report warnings in file order.
    warnings.reverse();

    Ok(TraceReport {
        path: target,
        total_entries: snapshot.len(),
        checked,
        valid,
        records,
        bundles,
        coverage: coverage_ratio(valid, checked),
        latest_decision_id,
        warnings,
    })
}

/// Translate a path glob into an anchored regex that matches from the right,
/// so `decision_trace.md` also matches `docs/decision_trace.md`.
fn glob_to_regex(pattern: &str) -> Result<Regex, GateError> {
    let mut re = String::from("(?:^|/)");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    re.push_str("(?:.*/)?");
                } else {
                    re.push_str(".*");
                }
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| GateError::InvalidInput(format!("bad pattern '{}': {}", pattern, e)))
}

/// True when any changed file looks like a decision trace.
pub fn changeset_has_decision_trace(
    files: &[String],
    patterns: &[&str],
) -> Result<bool, GateError> {
    let compiled = patterns
        .iter()
        .map(|p| glob_to_regex(p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(files.iter().any(|f| {
        let normalized = f.replace('\\', "/");
        compiled.iter().any(|re| re.is_match(&normalized))
    }))
}
