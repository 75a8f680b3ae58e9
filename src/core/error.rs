use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("MissingArtifact: {0}")]
    MissingArtifact(String),
    #[error("InvalidRecordFormat: {path}:{line}: {detail}")]
    InvalidRecordFormat {
        path: PathBuf,
        line: usize,
        detail: String,
    },
    #[error("IncompleteRecord: {path}:{line}: missing required keys [{}]", .missing.join(", "))]
    IncompleteRecord {
        path: PathBuf,
        line: usize,
        missing: Vec<String>,
    },
    #[error("NoCriticalCapabilities: backlog {0} declares no critical capabilities")]
    NoCriticalCapabilities(PathBuf),
    #[error("UnknownCapability: '{0}' is not declared in the capability graph")]
    UnknownCapability(String),
    #[error("DuplicateCapability: '{0}' is declared more than once in the capability graph")]
    DuplicateCapability(String),
    #[error(
        "MissingFailoverPair: capability '{0}' must declare both primary_agent and secondary_agent"
    )]
    MissingFailoverPair(String),
    #[error("NoFailoverRule: no failover rule matches capability '{0}'")]
    NoFailoverRule(String),
    #[error("AmbiguousFailoverRule: {count} failover rules match capability '{capability}'")]
    AmbiguousFailoverRule { capability: String, count: usize },
    #[error(
        "ExpectedCapabilityMismatch: expected trace declares '{expected}' but the simulation ran '{simulated}'"
    )]
    ExpectedCapabilityMismatch { expected: String, simulated: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl GateError {
    /// Configuration problems are usage errors; everything else is a failed check.
    pub fn exit_code(&self) -> i32 {
        match self {
            GateError::ConfigError(_) => 2,
            _ => 1,
        }
    }

    pub(crate) fn invalid_record(path: &std::path::Path, line: usize, detail: String) -> Self {
        GateError::InvalidRecordFormat {
            path: path.to_path_buf(),
            line,
            detail,
        }
    }
}

/// The CLI surface a failure is reported on. Decides the diagnostic prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Validation,
    ResilienceGate,
    Gate,
    Status,
    Route,
    RuntimeGate,
}

impl Surface {
    pub fn prefix(self) -> &'static str {
        match self {
            Surface::Validation => "VALIDATION FAILED",
            Surface::ResilienceGate => "RESILIENCE-GATE FAILED",
            Surface::Gate => "GATE FAILED",
            Surface::Status => "STATUS FAILED",
            Surface::Route => "ROUTE FAILED",
            Surface::RuntimeGate => "RUNTIME-GATE FAILED",
        }
    }
}

#[derive(Debug)]
pub struct CommandFailure {
    pub surface: Surface,
    pub error: GateError,
}

impl CommandFailure {
    pub fn new(surface: Surface, error: GateError) -> Self {
        Self { surface, error }
    }

    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.surface.prefix(), self.error)
    }
}

impl std::error::Error for CommandFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
