// src/model.rs
//
// =============================================================================
// SANDRUNNER: DATA MODEL (The Schema Authority)
// =============================================================================
//
// This file defines the strict data contracts between the orchestrator and
// its two boundaries: the caller (the submission/result envelopes, §6) and
// the generated harnesses running inside the container (§3).
//
// Design Principles:
// 1. Wire envelopes deserialize exactly the external JSON shape.
// 2. The internal `Submission`/`RunResult` types are what the orchestrator
//    actually operates on; envelopes convert into/out of them at the edges.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// 1. WIRE ENVELOPES (§6)
// ============================================================================

/// One test case as received on the wire: positional `parameters`, an
/// ordered `results` list (only the first element is ever compared), and an
/// optional stable identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseEnvelope {
    pub parameters: Vec<Value>,
    pub results: Vec<Value>,
    #[serde(default)]
    pub id: Option<String>,
}

/// The submission envelope (§6). `language` must equal `"python"`; anything
/// else is rejected before a session is ever created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionEnvelope {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub libraries: Vec<String>,
    pub script_name: String,
    #[serde(default)]
    pub script_parameters: Vec<String>,
    pub tests: Vec<TestCaseEnvelope>,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    2000
}

/// The only supported `language` value (§6, §1 Non-goals: "not a
/// multi-language runner").
pub const SUPPORTED_LANGUAGE: &str = "python";

/// Pure envelope-shape checks the original's Flask handler performed before
/// ever constructing a runner (§9 supplement). Not an HTTP
/// concern: callers invoke this before handing the envelope to the
/// orchestrator.
pub fn envelope_sanity_check(envelope: &SubmissionEnvelope) -> Result<(), String> {
    if envelope.language != SUPPORTED_LANGUAGE {
        return Err(format!(
            "Only {} is supported, got {:?}",
            SUPPORTED_LANGUAGE, envelope.language
        ));
    }
    for (i, test) in envelope.tests.iter().enumerate() {
        if test.results.is_empty() {
            return Err(format!("Invalid test format at index {i}: empty results"));
        }
    }
    Ok(())
}

/// Verdict record as emitted by the driver harness and echoed on the wire
/// (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerdictError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestVerdict {
    pub id: String,
    pub name: String,
    pub status: VerdictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VerdictError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Success,
    Fail,
}

/// The twelve-variant error taxonomy (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    EmptyOutput,
    RuntimeError,
    InvalidTestStructure,
    TestFailure,
    ParseError,
    SecurityViolation,
    ImportError,
    Timeout,
    AssertionError,
    InvalidOutput,
    NonZeroExit,
    MainNotFound,
}

/// Result envelope (§6). On a driver-level failure the `test_statuses` list
/// is empty and `error` carries the top-level diagnosis; `raw_output` and
/// `stderr` are only populated on that path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: OverallStatus,
    pub install_output: String,
    #[serde(default)]
    pub test_output: String,
    #[serde(default)]
    pub test_statuses: Vec<TestVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VerdictError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Success,
    Fail,
}

// ============================================================================
// 2. INTERNAL MODEL (§3)
// ============================================================================

/// One test case, normalised from the wire `TestCaseEnvelope`: a stable id
/// (defaulting to `1`, `2`, … by position), the ordered argument vector, and
/// the expected result (only the first wire `results` entry is kept).
#[derive(Debug, Clone)]
pub struct TestCase {
    pub id: String,
    pub parameters: Vec<Value>,
    pub expected: Value,
}

impl TestCase {
    pub fn from_envelope(position: usize, envelope: TestCaseEnvelope) -> Self {
        let id = envelope
            .id
            .unwrap_or_else(|| (position + 1).to_string());
        let expected = envelope.results.into_iter().next().unwrap_or(Value::Null);
        Self {
            id,
            parameters: envelope.parameters,
            expected,
        }
    }
}

/// The immutable input to one orchestrator run (§3).
#[derive(Debug, Clone)]
pub struct Submission {
    pub source: String,
    pub function_name: String,
    pub required_params: Vec<String>,
    pub libraries: Vec<String>,
    pub tests: Vec<TestCase>,
    pub timeout_ms: u64,
    pub docker_image: Option<String>,
}

impl Submission {
    pub fn from_envelope(envelope: SubmissionEnvelope) -> Self {
        let tests = envelope
            .tests
            .into_iter()
            .enumerate()
            .map(|(i, t)| TestCase::from_envelope(i, t))
            .collect();
        Self {
            source: envelope.code,
            function_name: envelope.script_name,
            required_params: envelope.script_parameters,
            libraries: envelope.libraries,
            tests,
            timeout_ms: envelope.timeout_ms,
            docker_image: envelope.docker_image,
        }
    }
}

/// One of the two generated text artefacts (§3). Kept as an enum rather
/// than two free-standing types so the orchestrator can stage both through
/// one code path without trait-object dispatch (§9: "no
/// polymorphism is required beyond distinguishing the two harness artefact
/// variants").
#[derive(Debug, Clone)]
pub enum Artefact {
    SubjectHarness(String),
    DriverHarness(String),
}

impl Artefact {
    /// The filename this artefact must be written as inside the staging
    /// tree, matching the in-container contract (§6).
    pub fn filename(&self) -> &'static str {
        match self {
            Artefact::SubjectHarness(_) => "main.py",
            Artefact::DriverHarness(_) => "test_script.py",
        }
    }

    pub fn contents(&self) -> &str {
        match self {
            Artefact::SubjectHarness(s) | Artefact::DriverHarness(s) => s,
        }
    }
}

/// The set of importable module roots for a session (§3). Built once per
/// session and read-only thereafter.
#[derive(Debug, Clone, Default)]
pub struct WhitelistManifest {
    pub modules: std::collections::BTreeSet<String>,
}

impl WhitelistManifest {
    pub fn from_iter_owned(iter: impl IntoIterator<Item = String>) -> Self {
        Self {
            modules: iter.into_iter().collect(),
        }
    }

    pub fn union_libraries(&mut self, libraries: &[String]) {
        for lib in libraries {
            if let Some(root) = lib.split(['=', '<', '>', '[', ';']).next() {
                let root = root.trim();
                if !root.is_empty() {
                    self.modules.insert(root.to_string());
                }
            }
        }
    }

    pub fn as_sorted_vec(&self) -> Vec<String> {
        self.modules.iter().cloned().collect()
    }
}

/// The record produced by the Verdict Mapper (C6) and returned to the
/// orchestrator (§3). `install_output` is threaded through from C4.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: OverallStatus,
    pub install_output: String,
    pub test_output: String,
    pub test_statuses: Vec<TestVerdict>,
    pub error: Option<VerdictError>,
    pub raw_output: Option<String>,
    pub stderr: Option<String>,
}

impl RunResult {
    pub fn into_envelope(self) -> ResultEnvelope {
        ResultEnvelope {
            status: self.status,
            install_output: self.install_output,
            test_output: self.test_output,
            test_statuses: self.test_statuses,
            error: self.error,
            raw_output: self.raw_output,
            stderr: self.stderr,
        }
    }
}
