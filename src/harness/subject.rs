// src/harness/subject.rs
//
// Generates `main.py`: loads the resolved whitelist, installs the audit
// hook, appends the submitted source verbatim, then invokes the named
// function with argv-supplied JSON arguments and prints the JSON-encoded
// result. Exit codes: 0 success, 1 runtime error, 42 security violation.
//
// Ported behaviourally from the original project's `_generate_main`; the
// whitelist/blacklist sets and the audit-hook trust check are unchanged.

use crate::model::WhitelistManifest;
use serde_json::json;

/// Module roots trusted regardless of the resolved whitelist (§4.2).
const BASE_WHITELIST: &[&str] = &["sys", "json", "builtins", "org", "ctypes"];

/// Module roots that are never importable even if present in the resolved
/// whitelist (§4.2) — mirrors `validator::HARD_BLOCKED_MODULES` plus the
/// wider in-container set the original enforces at runtime.
const BLACKLIST: &[&str] = &[
    "os",
    "subprocess",
    "socket",
    "threading",
    "multiprocessing",
    "signal",
    "shutil",
    "sysconfig",
    "requests",
    "urllib",
    "inspect",
    "compileall",
];

/// `function_name` must already have passed `validator::validate`, so it is
/// a safe Python identifier — this module assembles it, never formats
/// user-controlled content into the template.
pub fn generate_subject_harness(
    user_code: &str,
    function_name: &str,
    whitelist: &WhitelistManifest,
) -> String {
    let extra_allowed = json!(whitelist.as_sorted_vec());
    let base_whitelist = json!(BASE_WHITELIST);
    let blacklist = json!(BLACKLIST);

    let mut out = String::new();
    out.push_str("import sys\n");
    out.push_str("import json\n");
    out.push_str("import traceback\n");
    out.push_str("import io\n\n");

    out.push_str("try:\n");
    out.push_str("    with open('/allowed_modules.json', 'r') as f:\n");
    out.push_str("        raw_modules = json.load(f)\n");
    out.push_str("except Exception as e:\n");
    out.push_str("    print(json.dumps({\n");
    out.push_str("        \"type\": \"SECURITY_VIOLATION\",\n");
    out.push_str("        \"message\": \"failed to load /allowed_modules.json\",\n");
    out.push_str("        \"traceback\": str(e)\n");
    out.push_str("    }), file=sys.stderr)\n");
    out.push_str("    sys.exit(42)\n\n");

    out.push_str("def extract_module_name(name):\n");
    out.push_str("    return name.split('>=')[0].split('==')[0].split('<=')[0].strip()\n\n");

    out.push_str("ALLOWED_MODULES = set(map(extract_module_name, raw_modules))\n");
    out.push_str(&format!("EXTRA_ALLOWED = set({extra_allowed})\n"));
    out.push_str(&format!(
        "WHITELIST = set({base_whitelist}) | ALLOWED_MODULES | EXTRA_ALLOWED\n"
    ));
    out.push_str(&format!("BLACKLIST = set({blacklist})\n\n"));

    out.push_str("def is_trusted_module(frame):\n");
    out.push_str("    module_name = frame.f_globals.get('__name__')\n");
    out.push_str("    if module_name:\n");
    out.push_str("        root = module_name.split('.')[0]\n");
    out.push_str("        if root in WHITELIST:\n");
    out.push_str("            return True\n");
    out.push_str("    file_path = frame.f_globals.get('__file__')\n");
    out.push_str("    if file_path and any(path in file_path for path in ('/site-packages/', '/usr/local/lib/python', '/lib/python')):\n");
    out.push_str("        return True\n");
    out.push_str("    return False\n\n");

    out.push_str("def audit_hook(event, args):\n");
    out.push_str("    if event in ('compile', 'exec'):\n");
    out.push_str("        trusted = False\n");
    out.push_str("        for i in range(10):\n");
    out.push_str("            try:\n");
    out.push_str("                frame = sys._getframe(i)\n");
    out.push_str("                if is_trusted_module(frame):\n");
    out.push_str("                    trusted = True\n");
    out.push_str("                    break\n");
    out.push_str("            except Exception:\n");
    out.push_str("                continue\n");
    out.push_str("        if not trusted:\n");
    out.push_str("            print(json.dumps({\n");
    out.push_str("                \"type\": \"SECURITY_VIOLATION\",\n");
    out.push_str("                \"message\": f\"dynamic code generation is forbidden ({event})\",\n");
    out.push_str("                \"traceback\": \"\"\n");
    out.push_str("            }), file=sys.stderr, flush=True)\n");
    out.push_str("            sys.exit(42)\n");
    out.push_str("    elif event == 'import':\n");
    out.push_str("        module = args[0].split('.')[0]\n");
    out.push_str("        if module not in WHITELIST or module in BLACKLIST:\n");
    out.push_str("            print(json.dumps({\n");
    out.push_str("                \"type\": \"SECURITY_VIOLATION\",\n");
    out.push_str("                \"message\": f\"import of module '{module}' is forbidden\",\n");
    out.push_str("                \"traceback\": \"\"\n");
    out.push_str("            }), file=sys.stderr, flush=True)\n");
    out.push_str("            sys.exit(42)\n\n");

    out.push_str("sys.addaudithook(audit_hook)\n\n");

    out.push_str("class SecurityViolation(Exception):\n");
    out.push_str("    pass\n\n");

    out.push_str("# --- submitted source begins ---\n");
    out.push_str(user_code.trim_end());
    out.push_str("\n# --- submitted source ends ---\n\n");

    out.push_str("if __name__ == \"__main__\":\n");
    out.push_str("    try:\n");
    out.push_str("        args = [json.loads(arg) for arg in sys.argv[1:]]\n");
    out.push_str("        stdout_backup = sys.stdout\n");
    out.push_str("        fake_stdout = io.StringIO()\n");
    out.push_str("        sys.stdout = fake_stdout\n");
    out.push_str("        try:\n");
    out.push_str(&format!(
        "            func = globals().get({function_name:?})\n"
    ));
    out.push_str("            if not callable(func):\n");
    out.push_str(&format!(
        "                raise ValueError(\"function {function_name:?} was not found\")\n"
    ));
    out.push_str("            result = func(*args)\n");
    out.push_str("        finally:\n");
    out.push_str("            sys.stdout = stdout_backup\n\n");
    out.push_str("        if result is None:\n");
    out.push_str("            raise ValueError(\"function returned None; it must use a return statement\")\n\n");
    out.push_str("        try:\n");
    out.push_str("            json_output = json.dumps(result)\n");
    out.push_str("            print(json_output)\n");
    out.push_str("        except Exception:\n");
    out.push_str("            raise ValueError(f\"result is not JSON-serialisable: {result!r}\")\n\n");
    out.push_str("    except SecurityViolation as sv:\n");
    out.push_str("        print(json.dumps({\n");
    out.push_str("            \"type\": \"SECURITY_VIOLATION\",\n");
    out.push_str("            \"message\": str(sv),\n");
    out.push_str("            \"traceback\": \"\"\n");
    out.push_str("        }), file=sys.stderr, flush=True)\n");
    out.push_str("        sys.exit(42)\n");
    out.push_str("    except Exception as e:\n");
    out.push_str("        print(json.dumps({\n");
    out.push_str("            \"type\": \"RUNTIME_ERROR\",\n");
    out.push_str("            \"message\": str(e),\n");
    out.push_str("            \"traceback\": traceback.format_exc()\n");
    out.push_str("        }), file=sys.stderr, flush=True)\n");
    out.push_str("        sys.exit(1)\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn embeds_user_code_verbatim() {
        let wl = WhitelistManifest {
            modules: BTreeSet::from(["json".to_string()]),
        };
        let harness = generate_subject_harness("def f(x):\n    return x\n", "f", &wl);
        assert!(harness.contains("def f(x):\n    return x"));
        assert!(harness.contains("sys.addaudithook(audit_hook)"));
    }

    #[test]
    fn whitelist_json_is_embedded() {
        let wl = WhitelistManifest {
            modules: BTreeSet::from(["numpy".to_string(), "pandas".to_string()]),
        };
        let harness = generate_subject_harness("def f():\n    return 1\n", "f", &wl);
        assert!(harness.contains("\"numpy\""));
        assert!(harness.contains("\"pandas\""));
    }

    #[test]
    fn does_not_break_on_braces_in_user_code() {
        let wl = WhitelistManifest::default();
        let code = "def f(x):\n    d = {1: 2}\n    return d[x]\n";
        let harness = generate_subject_harness(code, "f", &wl);
        assert!(harness.contains("d = {1: 2}"));
    }
}
