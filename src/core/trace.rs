//! Append-only decision trace log.
//!
//! One owner writes (`append`), every checker reads through a
//! [`TraceSnapshot`] taken once at the start of the run.

use crate::core::error::GateError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TraceLog {
    path: PathBuf,
}

/// One non-blank line of the log, with its 1-based position in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceLine {
    pub line: usize,
    pub text: String,
}

/// Immutable view of the log contents at the moment it was read.
#[derive(Debug, Clone)]
pub struct TraceSnapshot {
    path: PathBuf,
    lines: Vec<TraceLine>,
}

impl TraceLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a compact JSON line, creating parent directories.
    pub fn append<T: Serialize>(&self, entry: &T) -> Result<(), GateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(entry)
            .map_err(|e| GateError::InvalidInput(format!("unserializable trace entry: {}", e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        tracing::debug!(path = %self.path.display(), "trace entry appended");
        Ok(())
    }

    /// Read the log once. Missing or unreadable files are `MissingArtifact`;
    /// bytes that are not UTF-8 are an `InvalidRecordFormat` on their line.
    ///
    /// `.json` files hold a single object or an array of objects and are
    /// re-rendered one element per line so callers see a uniform shape.
    pub fn snapshot(&self) -> Result<TraceSnapshot, GateError> {
        let bytes = fs::read(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => GateError::MissingArtifact(format!(
                "trace file {} does not exist",
                self.path.display()
            )),
            _ => GateError::MissingArtifact(format!(
                "trace file {} is unreadable: {}",
                self.path.display(),
                e
            )),
        })?;
        let content = String::from_utf8(bytes).map_err(|e| {
            let valid = e.utf8_error().valid_up_to();
            let line = e.as_bytes()[..valid].iter().filter(|b| **b == b'\n').count() + 1;
            GateError::invalid_record(&self.path, line, "invalid UTF-8 in trace".to_string())
        })?;

        let is_single_document = self.path.extension().is_some_and(|ext| ext == "json");
        let lines = if is_single_document {
            split_document(&self.path, &content)?
        } else {
            content
                .lines()
                .enumerate()
                .filter(|(_, l)| !l.trim().is_empty())
                .map(|(i, l)| TraceLine {
                    line: i + 1,
                    text: l.trim().to_string(),
                })
                .collect()
        };

        Ok(TraceSnapshot {
            path: self.path.clone(),
            lines,
        })
    }
}

fn split_document(path: &Path, content: &str) -> Result<Vec<TraceLine>, GateError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: Value = serde_json::from_str(content)
        .map_err(|e| GateError::invalid_record(path, e.line(), format!("invalid JSON: {}", e)))?;
    let items = match doc {
        Value::Array(items) => items,
        other => vec![other],
    };
    Ok(items
        .iter()
        .enumerate()
        .map(|(i, item)| TraceLine {
            line: i + 1,
            text: item.to_string(),
        })
        .collect())
}

impl TraceSnapshot {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The last `n` lines, newest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &TraceLine> {
        self.lines.iter().rev().take(n)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceLine> {
        self.lines.iter()
    }
}

/// Pick the trace file under `root`: the first candidate that exists, in
/// declared order. Later candidates are never consulted once one is found.
pub fn resolve_trace_path(root: &Path, candidates: &[PathBuf]) -> Result<PathBuf, GateError> {
    for candidate in candidates {
        let path = root.join(candidate);
        if path.is_file() {
            return Ok(path);
        }
    }
    let listed = candidates
        .iter()
        .map(|c| c.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(GateError::MissingArtifact(format!(
        "no decision trace file found under {}; expected one of: {}",
        root.display(),
        listed
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn append_then_snapshot_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let log = TraceLog::open(tmp.path().join("ops/reports/decision_trace.jsonl"));
        log.append(&json!({"n": 1})).unwrap();
        log.append(&json!({"n": 2})).unwrap();

        let snap = log.snapshot().unwrap();
        assert_eq!(snap.len(), 2);
        let newest: Vec<_> = snap.tail(1).collect();
        assert_eq!(newest[0].line, 2);
        assert!(newest[0].text.contains("\"n\":2"));
    }

    #[test]
    fn blank_lines_are_skipped_but_positions_kept() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.jsonl");
        fs::write(&path, "{\"a\":1}\n\n   \n{\"a\":2}\n").unwrap();
        let snap = TraceLog::open(&path).snapshot().unwrap();
        let lines: Vec<usize> = snap.iter().map(|l| l.line).collect();
        assert_eq!(lines, vec![1, 4]);
    }

    #[test]
    fn json_array_document_becomes_one_line_per_item() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.json");
        fs::write(&path, "[{\"a\":1},{\"a\":2},{\"a\":3}]").unwrap();
        let snap = TraceLog::open(&path).snapshot().unwrap();
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn missing_file_is_missing_artifact() {
        let tmp = TempDir::new().unwrap();
        let err = TraceLog::open(tmp.path().join("nope.jsonl"))
            .snapshot()
            .unwrap_err();
        assert!(matches!(err, GateError::MissingArtifact(_)));
    }

    #[test]
    fn canonical_candidate_wins_even_if_older() {
        let tmp = TempDir::new().unwrap();
        let canonical = tmp.path().join("ops/reports/decision_trace.jsonl");
        let legacy = tmp.path().join("ops/decision_trace.jsonl");
        fs::create_dir_all(canonical.parent().unwrap()).unwrap();
        fs::write(&canonical, "{}\n").unwrap();
        // written later, so newer
        fs::write(&legacy, "{}\n{}\n").unwrap();

        let candidates = vec![
            PathBuf::from("ops/reports/decision_trace.jsonl"),
            PathBuf::from("ops/decision_trace.jsonl"),
        ];
        assert_eq!(resolve_trace_path(tmp.path(), &candidates).unwrap(), canonical);
    }

    #[test]
    fn no_candidate_lists_all_expected_paths() {
        let tmp = TempDir::new().unwrap();
        let candidates = vec![PathBuf::from("a.jsonl"), PathBuf::from("b.jsonl")];
        let msg = resolve_trace_path(tmp.path(), &candidates)
            .unwrap_err()
            .to_string();
        assert!(msg.contains("a.jsonl, b.jsonl"));
    }

    #[test]
    fn invalid_utf8_names_path_and_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("decision_trace.jsonl");
        fs::write(&path, b"{\"a\":1}\n{\"a\":\"\xff\"}\n").unwrap();
        match TraceLog::open(&path).snapshot().unwrap_err() {
            GateError::InvalidRecordFormat { path: p, line, detail } => {
                assert_eq!(p, path);
                assert_eq!(line, 2);
                assert!(detail.contains("UTF-8"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
