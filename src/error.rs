// src/error.rs
//
// =============================================================================
// SANDRUNNER: ERROR TAXONOMY
// =============================================================================
//
// Errors partition into submission / infrastructure / execution / per-test
// families (§7). Execution and per-test failures are carried as *data*
// inside a `RunResult`, never as a thrown Rust error — only submission
// failures (C1) and infrastructure failures (C3/C4/C7) are `Err` variants
// that end a submission early.

use thiserror::Error;

/// C1 failures. Never touches a session — a submission that fails here
/// never provisions a container.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("syntax error in submitted code: {0}")]
    Syntax(String),

    #[error("function '{0}' not found in submitted code")]
    FunctionMissing(String),

    #[error("function '{function}' is missing required parameters: {}", .missing.join(", "))]
    ParamMissing {
        function: String,
        missing: Vec<String>,
    },

    #[error("forbidden construct in submitted code: {0}")]
    ForbiddenConstruct(String),
}

/// C3/C4/C7 failures: session lifecycle, whitelist resolution, staging.
/// Surfaced as a 5xx-class error by the caller, with the session always
/// torn down first.
#[derive(Error, Debug)]
pub enum InfraError {
    #[error("failed to provision sandbox session: {0}")]
    Provision(#[source] anyhow::Error),

    #[error("operation attempted on a torn-down session")]
    SessionClosed,

    /// A non-zero `pip install` exit. Distinguished from the other variants
    /// because the orchestrator treats it as an execution error (§7):
    /// it is folded into a reported `RunResult`, not propagated as a failed
    /// submission the way every other `InfraError` variant is.
    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("failed to stage artefacts: {0}")]
    Staging(#[source] anyhow::Error),

    #[error("failed to upload working tree: {0}")]
    Upload(#[source] anyhow::Error),

    #[error("failed to exec inside sandbox: {0}")]
    Exec(#[source] anyhow::Error),

    #[error("failed to resolve module whitelist: {0}")]
    Whitelist(#[source] anyhow::Error),

    #[error("failed to tear down sandbox session: {0}")]
    Teardown(#[source] anyhow::Error),
}

/// A failed `pip install` (or equivalent). Per §9 open question #2, a
/// partial install failure (one library of many) is not retried or worked
/// around with the installed subset — it is reported as-is via the
/// `RunResult` the orchestrator returns for the submission.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("library installation failed:\n{output}")]
pub struct InstallError {
    pub output: String,
}
