// src/harness/driver.rs
//
// Generates `test_script.py`: one `unittest.TestCase` method per test case,
// each shelling out to `main.py` with JSON-encoded positional arguments and
// comparing the decoded stdout against the expected value. Exit codes from
// `main.py` (0/1/42) and a parallel `MAIN_NOT_FOUND` (2, reserved for a
// missing/unexecutable harness) are mapped to the twelve-variant error kind
// before any JSON parsing is attempted.
//
// Ported directly from the original project's `_generate_tests`, restructured
// as fragments built from a `DriverSpec` rather than one large f-string.

use crate::model::TestCase;
use serde_json::Value;

/// One test case reduced to the two JSON blobs the generated Python needs:
/// the argv (one JSON string per positional parameter) and the expected
/// value it will compare against.
struct DriverCase {
    test_id: String,
    argv_literals: Vec<String>,
    expected_literal: String,
}

fn to_driver_case(test: &TestCase) -> DriverCase {
    let argv_literals = test
        .parameters
        .iter()
        .map(|p| python_string_literal(&serde_json::to_string(p).unwrap_or_default()))
        .collect();
    let expected_literal = python_string_literal(
        &serde_json::to_string(&test.expected).unwrap_or_else(|_| Value::Null.to_string()),
    );
    DriverCase {
        test_id: test.id.clone(),
        argv_literals,
        expected_literal,
    }
}

/// Renders a Rust string as a single-quoted Python string literal. Python's
/// single-quote escaping rules for backslash and quote characters coincide
/// with Rust's `Debug` escaping for the characters JSON ever produces, so
/// this is safe for any `serde_json::to_string` output.
fn python_string_literal(s: &str) -> String {
    format!("{s:?}")
}

fn render_test_method(case: &DriverCase) -> String {
    let args = case.argv_literals.join(", ");
    format!(
        "    def test_case_{id}(self):\n        self._run_test_case({args}, expected_json={expected}, test_id={id_lit})\n",
        id = sanitize_method_suffix(&case.test_id),
        args = args,
        expected = case.expected_literal,
        id_lit = python_string_literal(&case.test_id),
    )
}

/// Python identifiers can't contain arbitrary characters; test ids come from
/// either a position counter or caller-supplied strings, so non-identifier
/// characters are folded to `_` for the method name while the original id
/// string is still carried separately for the emitted verdict.
fn sanitize_method_suffix(id: &str) -> String {
    let mut out: String = id
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.chars().next().unwrap().is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

pub fn generate_driver_harness(tests: &[TestCase], timeout_ms: u64) -> String {
    let timeout_sec = (timeout_ms as f64) / 1000.0;
    let cases: Vec<DriverCase> = tests.iter().map(to_driver_case).collect();

    let mut out = String::new();
    out.push_str("import unittest\n");
    out.push_str("import json\n");
    out.push_str("import subprocess\n");
    out.push_str("import traceback\n");
    out.push_str("import sys\n\n");

    out.push_str("class ScriptTestCase(unittest.TestCase):\n");
    out.push_str(&format!(
        "    def _run_test_case(self, *argv, expected_json, test_id, timeout={timeout_sec}):\n"
    ));
    out.push_str("        self._test_id = test_id\n");
    out.push_str("        self._test_error = None\n");
    out.push_str("        self._test_error_type = None\n");
    out.push_str("        self._test_traceback = None\n");
    out.push_str("        proc = None\n");
    out.push_str("        try:\n");
    out.push_str("            command = ['python3', '/mnt/app/main.py'] + list(argv)\n");
    out.push_str("            proc = subprocess.Popen(command, stdout=subprocess.PIPE, stderr=subprocess.PIPE)\n");
    out.push_str("            out, err = proc.communicate(timeout=timeout)\n");
    out.push_str("            exit_code = proc.returncode\n");
    out.push_str("            stdout = out.decode().strip()\n");
    out.push_str("            stderr = err.decode().strip()\n\n");

    out.push_str("            if exit_code == 42:\n");
    out.push_str("                self._test_error_type = 'SECURITY_VIOLATION'\n");
    out.push_str("                self._test_error, self._test_traceback = self._extract_error(stderr, 'security policy violation')\n");
    out.push_str("                raise RuntimeError(self._test_error)\n\n");

    out.push_str("            if exit_code == 2:\n");
    out.push_str("                self._test_error_type = 'MAIN_NOT_FOUND'\n");
    out.push_str("                self._test_error = 'main.py could not be found or executed'\n");
    out.push_str("                self._test_traceback = stderr\n");
    out.push_str("                raise RuntimeError(self._test_error)\n\n");

    out.push_str("            if exit_code != 0:\n");
    out.push_str("                self._test_error_type = 'NON_ZERO_EXIT'\n");
    out.push_str("                self._test_error = f'exit code {exit_code}. stderr: {stderr}'\n");
    out.push_str("                self._test_traceback = f'stdout: {stdout}\\nstderr: {stderr}'\n");
    out.push_str("                raise RuntimeError(self._test_error)\n\n");

    out.push_str("            extracted = self._extract_error(stderr, None)\n");
    out.push_str("            if extracted[0] is not None:\n");
    out.push_str("                self._test_error_type = extracted[2] or 'UNKNOWN_ERROR'\n");
    out.push_str("                self._test_error = extracted[0]\n");
    out.push_str("                self._test_traceback = extracted[1]\n");
    out.push_str("                raise RuntimeError(self._test_error)\n\n");

    out.push_str("            try:\n");
    out.push_str("                stdout_lines = stdout.splitlines()\n");
    out.push_str("                last_line = stdout_lines[-1] if stdout_lines else ''\n");
    out.push_str("                result = json.loads(last_line)\n");
    out.push_str("            except json.JSONDecodeError:\n");
    out.push_str("                self._test_error_type = 'INVALID_OUTPUT'\n");
    out.push_str("                self._test_error = f'invalid JSON output: {stdout}'\n");
    out.push_str("                raise\n\n");

    out.push_str("            expected = json.loads(expected_json)\n");
    out.push_str("            self.assertEqual(result, expected)\n\n");

    out.push_str("        except subprocess.TimeoutExpired:\n");
    out.push_str("            if proc is not None:\n");
    out.push_str("                proc.kill()\n");
    out.push_str("                proc.communicate()\n");
    out.push_str("            self._test_error_type = 'TIMEOUT'\n");
    out.push_str("            self._test_error = f'test exceeded its time limit ({timeout}s)'\n");
    out.push_str("        except AssertionError as ae:\n");
    out.push_str("            self._test_error_type = 'ASSERTION_ERROR'\n");
    out.push_str("            self._test_error = str(ae)\n");
    out.push_str("            self._test_traceback = traceback.format_exc()\n");
    out.push_str("        except Exception as e:\n");
    out.push_str("            if not self._test_error_type:\n");
    out.push_str("                self._test_error_type = 'RUNTIME_ERROR'\n");
    out.push_str("                self._test_error = str(e)\n");
    out.push_str("                self._test_traceback = traceback.format_exc()\n\n");

    out.push_str("        if self._test_error:\n");
    out.push_str("            self.fail(self._test_error)\n\n");

    out.push_str("    @staticmethod\n");
    out.push_str("    def _extract_error(stderr, default_message):\n");
    out.push_str("        first_json_line = next((line for line in stderr.splitlines() if line.strip().startswith('{')), None)\n");
    out.push_str("        if not first_json_line:\n");
    out.push_str("            return (default_message, '', None)\n");
    out.push_str("        try:\n");
    out.push_str("            payload = json.loads(first_json_line)\n");
    out.push_str("            return (payload.get('message', default_message), payload.get('traceback', ''), payload.get('type'))\n");
    out.push_str("        except Exception:\n");
    out.push_str("            return (default_message, '', None)\n\n");

    for case in &cases {
        out.push_str(&render_test_method(case));
    }
    out.push('\n');

    out.push_str("class CustomTestResult(unittest.TextTestResult):\n");
    out.push_str("    def __init__(self, *args, **kwargs):\n");
    out.push_str("        super().__init__(*args, **kwargs)\n");
    out.push_str("        self.successes = []\n\n");
    out.push_str("    def addSuccess(self, test):\n");
    out.push_str("        super().addSuccess(test)\n");
    out.push_str("        self.successes.append(test)\n\n");

    out.push_str("if __name__ == '__main__':\n");
    out.push_str("    suite = unittest.TestLoader().loadTestsFromTestCase(ScriptTestCase)\n");
    out.push_str("    runner = unittest.TextTestRunner(resultclass=CustomTestResult)\n");
    out.push_str("    result = runner.run(suite)\n\n");

    out.push_str("    output = []\n");
    out.push_str("    for test in result.successes:\n");
    out.push_str("        output.append({'id': test._test_id, 'name': test._testMethodName, 'status': 'success'})\n\n");

    out.push_str("    for test, err in result.failures + result.errors:\n");
    out.push_str("        short_error = getattr(test, '_test_error', 'unknown error') or 'unknown error'\n");
    out.push_str("        tb = getattr(test, '_test_traceback', err) or err\n");
    out.push_str("        error_type = getattr(test, '_test_error_type', None) or 'TEST_FAILURE'\n");
    out.push_str("        output.append({\n");
    out.push_str("            'id': test._test_id,\n");
    out.push_str("            'name': test._testMethodName,\n");
    out.push_str("            'status': 'fail',\n");
    out.push_str("            'error': {'type': error_type, 'message': short_error},\n");
    out.push_str("            'traceback': tb\n");
    out.push_str("        })\n\n");

    out.push_str("    print(json.dumps(output), file=sys.stdout, flush=True)\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(id: &str, params: Vec<Value>, expected: Value) -> TestCase {
        TestCase {
            id: id.to_string(),
            parameters: params,
            expected,
        }
    }

    #[test]
    fn emits_one_method_per_case() {
        let tests = vec![
            case("1", vec![json!(1), json!(2)], json!(3)),
            case("2", vec![json!("a")], json!("a")),
        ];
        let harness = generate_driver_harness(&tests, 2000);
        assert!(harness.contains("def test_case_1(self):"));
        assert!(harness.contains("def test_case_2(self):"));
    }

    #[test]
    fn sanitizes_non_identifier_ids() {
        let tests = vec![case("case-a", vec![], json!(1))];
        let harness = generate_driver_harness(&tests, 2000);
        assert!(harness.contains("def test_case_case_a(self):"));
        assert!(harness.contains("test_id='case-a'") || harness.contains("test_id=\"case-a\""));
    }

    #[test]
    fn embeds_timeout_in_seconds() {
        let harness = generate_driver_harness(&[], 1500);
        assert!(harness.contains("timeout=1.5"));
    }
}
