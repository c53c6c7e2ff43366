// src/verdict.rs
//
// =============================================================================
// SANDRUNNER: VERDICT MAPPER (C6)
// =============================================================================
//
// Maps raw `(stdout, stderr, exit_code)` from the driver harness run into a
// `RunResult`. Ported line-for-line from the original's
// `_parse_test_results`: empty stdout is a driver crash (`EMPTY_OUTPUT` or
// `RUNTIME_ERROR` depending on whether stderr has anything), a JSON decode
// failure on stdout is classified by sniffing stderr for one of three
// sentinel markers, and a successfully decoded non-list payload is
// `INVALID_TEST_STRUCTURE`. Per-test entries missing a structured `error`
// still get `status: fail` fixed up with a generic `TEST_FAILURE`.

use crate::model::{ErrorKind, OverallStatus, RunResult, TestVerdict, VerdictError, VerdictStatus};
use serde_json::Value;

pub fn map(stdout: &str, stderr: &str, exit_code: i64, install_output: String) -> RunResult {
    let stdout = stdout.trim();
    let stderr = stderr.trim();

    if stdout.is_empty() {
        let (kind, message) = if stderr.is_empty() {
            (
                ErrorKind::EmptyOutput,
                "tests produced no output".to_string(),
            )
        } else {
            (ErrorKind::RuntimeError, stderr.to_string())
        };
        return RunResult {
            status: OverallStatus::Fail,
            install_output,
            test_output: String::new(),
            test_statuses: Vec::new(),
            error: Some(VerdictError {
                kind,
                message,
            }),
            raw_output: Some(stdout.to_string()),
            stderr: Some(stderr.to_string()),
        };
    }

    match serde_json::from_str::<Value>(stdout) {
        Ok(Value::Array(items)) => {
            let test_statuses: Vec<TestVerdict> = items
                .into_iter()
                .filter_map(|item| parse_test_verdict(item))
                .collect();
            // The driver process exits 0 even when individual cases failed
            // (it never calls sys.exit based on the suite outcome), so the
            // exit code alone cannot decide overall status — any per-test
            // failure must also fail the envelope (§8 invariant 4).
            let any_test_failed = test_statuses
                .iter()
                .any(|t| t.status == VerdictStatus::Fail);
            let status = if exit_code == 0 && !any_test_failed {
                OverallStatus::Success
            } else {
                OverallStatus::Fail
            };
            RunResult {
                status,
                install_output,
                test_output: stdout.to_string(),
                test_statuses,
                error: None,
                raw_output: None,
                stderr: None,
            }
        }
        Ok(other) => RunResult {
            status: OverallStatus::Fail,
            install_output,
            test_output: String::new(),
            test_statuses: Vec::new(),
            error: Some(VerdictError {
                kind: ErrorKind::InvalidTestStructure,
                message: format!("expected a list of test results, got {}", type_name(&other)),
            }),
            raw_output: Some(stdout.to_string()),
            stderr: Some(stderr.to_string()),
        },
        Err(e) => {
            let (kind, message) = classify_from_stderr(stderr, &e.to_string());
            RunResult {
                status: OverallStatus::Fail,
                install_output,
                test_output: String::new(),
                test_statuses: Vec::new(),
                error: Some(VerdictError { kind, message }),
                raw_output: Some(stdout.to_string()),
                stderr: Some(stderr.to_string()),
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn classify_from_stderr(stderr: &str, default_message: &str) -> (ErrorKind, String) {
    for (marker, kind) in [
        ("SECURITY_ERROR:", ErrorKind::SecurityViolation),
        ("IMPORT_ERROR:", ErrorKind::ImportError),
        ("RUNTIME_ERROR:", ErrorKind::RuntimeError),
    ] {
        if let Some(idx) = stderr.find(marker) {
            let message = stderr[idx + marker.len()..].trim().to_string();
            return (kind, message);
        }
    }
    (ErrorKind::ParseError, default_message.to_string())
}

fn parse_test_verdict(item: Value) -> Option<TestVerdict> {
    let obj = item.as_object()?;
    let id = obj.get("id")?.as_str()?.to_string();
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(&id)
        .to_string();
    let status_str = obj.get("status").and_then(Value::as_str).unwrap_or("fail");
    let status = if status_str == "success" {
        VerdictStatus::Success
    } else {
        VerdictStatus::Fail
    };

    let error = if status == VerdictStatus::Fail {
        Some(match obj.get("error") {
            Some(Value::Object(err_obj)) => VerdictError {
                kind: err_obj
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(parse_error_kind)
                    .unwrap_or(ErrorKind::TestFailure),
                message: err_obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("test failed")
                    .to_string(),
            },
            Some(Value::String(s)) => VerdictError {
                kind: ErrorKind::TestFailure,
                message: s.clone(),
            },
            _ => VerdictError {
                kind: ErrorKind::TestFailure,
                message: "test failed".to_string(),
            },
        })
    } else {
        None
    };

    let traceback = obj
        .get("traceback")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(TestVerdict {
        id,
        name,
        status,
        error,
        traceback,
    })
}

fn parse_error_kind(s: &str) -> Option<ErrorKind> {
    Some(match s {
        "EMPTY_OUTPUT" => ErrorKind::EmptyOutput,
        "RUNTIME_ERROR" => ErrorKind::RuntimeError,
        "INVALID_TEST_STRUCTURE" => ErrorKind::InvalidTestStructure,
        "TEST_FAILURE" => ErrorKind::TestFailure,
        "PARSE_ERROR" => ErrorKind::ParseError,
        "SECURITY_VIOLATION" => ErrorKind::SecurityViolation,
        "IMPORT_ERROR" => ErrorKind::ImportError,
        "TIMEOUT" => ErrorKind::Timeout,
        "ASSERTION_ERROR" => ErrorKind::AssertionError,
        "INVALID_OUTPUT" => ErrorKind::InvalidOutput,
        "NON_ZERO_EXIT" => ErrorKind::NonZeroExit,
        "MAIN_NOT_FOUND" => ErrorKind::MainNotFound,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stdout_and_stderr_is_empty_output() {
        let result = map("", "", 1, "ok".to_string());
        assert_eq!(result.status, OverallStatus::Fail);
        assert_eq!(result.error.unwrap().kind, ErrorKind::EmptyOutput);
    }

    #[test]
    fn empty_stdout_with_stderr_is_runtime_error() {
        let result = map("", "boom", 1, "ok".to_string());
        assert_eq!(result.error.unwrap().kind, ErrorKind::RuntimeError);
    }

    #[test]
    fn successful_list_with_zero_exit_is_success() {
        let stdout = r#"[{"id":"1","name":"test_case_1","status":"success"}]"#;
        let result = map(stdout, "", 0, "ok".to_string());
        assert_eq!(result.status, OverallStatus::Success);
        assert_eq!(result.test_statuses.len(), 1);
    }

    #[test]
    fn nonzero_exit_with_valid_list_is_fail_overall() {
        let stdout = r#"[{"id":"1","name":"test_case_1","status":"fail","error":{"type":"ASSERTION_ERROR","message":"nope"}}]"#;
        let result = map(stdout, "", 1, "ok".to_string());
        assert_eq!(result.status, OverallStatus::Fail);
        assert_eq!(
            result.test_statuses[0].error.as_ref().unwrap().kind,
            ErrorKind::AssertionError
        );
    }

    #[test]
    fn failing_test_with_zero_exit_still_fails_overall() {
        // The driver never calls sys.exit based on the suite outcome, so a
        // zero exit code must not paper over a recorded per-test failure.
        let stdout = r#"[{"id":"1","name":"test_case_1","status":"fail","error":{"type":"ASSERTION_ERROR","message":"nope"}}]"#;
        let result = map(stdout, "", 0, "ok".to_string());
        assert_eq!(result.status, OverallStatus::Fail);
    }

    #[test]
    fn non_array_json_is_invalid_test_structure() {
        let result = map(r#"{"oops": true}"#, "", 1, "ok".to_string());
        assert_eq!(
            result.error.unwrap().kind,
            ErrorKind::InvalidTestStructure
        );
    }

    #[test]
    fn malformed_json_sniffs_security_marker_from_stderr() {
        let result = map(
            "not json{{{",
            "SECURITY_ERROR: import of module 'os' is forbidden",
            42,
            "ok".to_string(),
        );
        let err = result.error.unwrap();
        assert_eq!(err.kind, ErrorKind::SecurityViolation);
        assert_eq!(err.message, "import of module 'os' is forbidden");
    }

    #[test]
    fn malformed_json_with_no_marker_is_parse_error() {
        let result = map("not json{{{", "", 1, "ok".to_string());
        assert_eq!(result.error.unwrap().kind, ErrorKind::ParseError);
    }
}
