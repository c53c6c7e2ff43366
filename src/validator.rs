// src/validator.rs
//
// =============================================================================
// SANDRUNNER: SUBMISSION VALIDATOR (C1)
// =============================================================================
//
// Static, advisory gatekeeper. Parses the submission with tree-sitter,
// confirms the required function exists with a superset of the required
// parameters, and flags the four-module/five-builtin hard-blocked set as a
// first line of defence. The in-container audit hook (harness::subject) is
// the authoritative enforcement; this module may be stricter but must never
// be weaker.

use crate::error::ValidationError;
use std::collections::HashSet;
use tree_sitter::{Node, Parser};

/// Module roots that are never importable, regardless of whitelist (§4.1).
const HARD_BLOCKED_MODULES: &[&str] = &["os", "sys", "subprocess", "socket"];

/// Built-ins whose invocation is never allowed, regardless of whitelist
/// (§4.1).
const HARD_BLOCKED_BUILTINS: &[&str] = &["eval", "exec", "compile", "open", "__import__"];

fn python_parser() -> Parser {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .expect("tree-sitter-python grammar failed to load");
    parser
}

/// Validates one submission. See §4.1 for the exact contract.
pub fn validate(
    source: &str,
    function_name: &str,
    required_params: &[String],
) -> Result<(), ValidationError> {
    let mut parser = python_parser();
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ValidationError::Syntax("tree-sitter returned no tree".to_string()))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ValidationError::Syntax(describe_first_error(&root, source)));
    }

    find_and_check_function(&root, source, function_name, required_params)?;
    scan_forbidden_constructs(&root, source)?;
    Ok(())
}

fn describe_first_error(root: &Node, source: &str) -> String {
    let mut cursor = root.walk();
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let text = node.utf8_text(source.as_bytes()).unwrap_or("");
            return format!(
                "unexpected syntax near byte {}: {:?}",
                node.start_byte(),
                text
            );
        }
        stack.extend(node.children(&mut cursor));
    }
    "syntax error".to_string()
}

/// Unwraps one level of `decorated_definition`, mirroring the original's
/// `ast.FunctionDef` walk, which does not look inside nested scopes either.
fn as_function_definition<'a>(node: Node<'a>) -> Option<Node<'a>> {
    match node.kind() {
        "function_definition" => Some(node),
        "decorated_definition" => {
            let mut cursor = node.walk();
            node.children(&mut cursor)
                .find(|c| c.kind() == "function_definition")
        }
        _ => None,
    }
}

fn find_and_check_function(
    root: &Node,
    source: &str,
    function_name: &str,
    required_params: &[String],
) -> Result<(), ValidationError> {
    let bytes = source.as_bytes();
    let mut cursor = root.walk();
    for top_level in root.children(&mut cursor) {
        let Some(func) = as_function_definition(top_level) else {
            continue;
        };
        let name_node = func
            .child_by_field_name("name")
            .ok_or_else(|| ValidationError::Syntax("function with no name node".into()))?;
        let name = name_node.utf8_text(bytes).unwrap_or("");
        if name != function_name {
            continue;
        }

        let actual_params = positional_param_names(&func, bytes);
        let missing: Vec<String> = required_params
            .iter()
            .filter(|p| !actual_params.contains(p.as_str()))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(ValidationError::ParamMissing {
                function: function_name.to_string(),
                missing,
            });
        }
        return Ok(());
    }

    Err(ValidationError::FunctionMissing(function_name.to_string()))
}

fn positional_param_names<'a>(func: &Node, bytes: &'a [u8]) -> HashSet<&'a str> {
    let mut names = HashSet::new();
    let Some(params) = func.child_by_field_name("parameters") else {
        return names;
    };
    let mut cursor = params.walk();
    for child in params.children(&mut cursor) {
        let ident = match child.kind() {
            "identifier" => Some(child),
            "typed_parameter" | "default_parameter" | "typed_default_parameter" => {
                child.child_by_field_name("name")
            }
            _ => None,
        };
        if let Some(ident) = ident {
            if let Ok(text) = ident.utf8_text(bytes) {
                names.insert(text);
            }
        }
    }
    names
}

/// Scans *module-level* statements only — siblings of (or nested inside
/// non-scoping compound statements alongside) the submitted function, never
/// inside a `function_definition`/`class_definition` body. Code a submitted
/// function does at call time is the in-container audit hook's job (§4.2);
/// this pass exists to catch the cheaper case of a submission importing a
/// blocked module or invoking a blocked builtin directly at module scope.
fn scan_forbidden_constructs(root: &Node, source: &str) -> Result<(), ValidationError> {
    let bytes = source.as_bytes();
    let mut cursor = root.walk();
    let mut stack = vec![*root];

    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_statement" => {
                for root_name in import_statement_roots(&node, bytes) {
                    if HARD_BLOCKED_MODULES.contains(&root_name.as_str()) {
                        return Err(ValidationError::ForbiddenConstruct(format!(
                            "import of blocked module '{root_name}'"
                        )));
                    }
                }
            }
            "import_from_statement" => {
                if let Some(module) = node
                    .child_by_field_name("module_name")
                    .and_then(|n| n.utf8_text(bytes).ok())
                {
                    let root_name = module.split('.').next().unwrap_or(module);
                    if HARD_BLOCKED_MODULES.contains(&root_name) {
                        return Err(ValidationError::ForbiddenConstruct(format!(
                            "import of blocked module '{root_name}'"
                        )));
                    }
                }
            }
            "call" => {
                if let Some(function) = node.child_by_field_name("function") {
                    if function.kind() == "identifier" {
                        if let Ok(name) = function.utf8_text(bytes) {
                            if HARD_BLOCKED_BUILTINS.contains(&name) {
                                return Err(ValidationError::ForbiddenConstruct(format!(
                                    "call to blocked builtin '{name}'"
                                )));
                            }
                        }
                    }
                }
            }
            "function_definition" | "class_definition" => {
                // Do not descend: their bodies run under the submitted
                // function's own call frame, not at module load time.
                continue;
            }
            _ => {}
        }
        stack.extend(node.children(&mut cursor));
    }
    Ok(())
}

fn import_statement_roots(node: &Node, bytes: &[u8]) -> Vec<String> {
    // `import a, b.c as d` — each `dotted_name` / `aliased_import` child
    // names one imported module.
    let mut roots = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let dotted = match child.kind() {
            "dotted_name" => Some(child),
            "aliased_import" => child.child_by_field_name("name"),
            _ => None,
        };
        if let Some(dotted) = dotted {
            if let Ok(text) = dotted.utf8_text(bytes) {
                if let Some(root) = text.split('.').next() {
                    roots.push(root.to_string());
                }
            }
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_matching_function() {
        let code = "def f(x, y):\n    return x + y\n";
        assert!(validate(code, "f", &params(&["x", "y"])).is_ok());
    }

    #[test]
    fn accepts_superset_of_required_params() {
        let code = "def f(x, y, z=1):\n    return x + y + z\n";
        assert!(validate(code, "f", &params(&["x", "y"])).is_ok());
    }

    #[test]
    fn rejects_missing_function() {
        let code = "def g(x):\n    return x\n";
        let err = validate(code, "f", &params(&["x"])).unwrap_err();
        assert_eq!(err, ValidationError::FunctionMissing("f".into()));
    }

    #[test]
    fn rejects_missing_params() {
        let code = "def f(x):\n    return x\n";
        let err = validate(code, "f", &params(&["x", "y"])).unwrap_err();
        match err {
            ValidationError::ParamMissing { missing, .. } => {
                assert_eq!(missing, vec!["y".to_string()]);
            }
            other => panic!("expected ParamMissing, got {other:?}"),
        }
    }

    #[test]
    fn rejects_syntax_errors() {
        let code = "def f(x:\n    return x\n";
        assert!(matches!(
            validate(code, "f", &params(&["x"])),
            Err(ValidationError::Syntax(_))
        ));
    }

    #[test]
    fn rejects_module_level_blocked_import() {
        let code = "import os\n\ndef f():\n    return 1\n";
        let err = validate(code, "f", &[]).unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenConstruct(_)));
    }

    #[test]
    fn rejects_module_level_blocked_from_import() {
        let code = "from subprocess import run\n\ndef f():\n    return 1\n";
        let err = validate(code, "f", &[]).unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenConstruct(_)));
    }

    #[test]
    fn rejects_module_level_blocked_builtin_call() {
        let code = "eval('1')\n\ndef f():\n    return 1\n";
        let err = validate(code, "f", &[]).unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenConstruct(_)));
    }

    #[test]
    fn allows_non_blocked_import() {
        let code = "def f():\n    import json\n    return json.dumps({})\n";
        assert!(validate(code, "f", &[]).is_ok());
    }

    #[test]
    fn does_not_reject_blocked_import_inside_function_body() {
        // Module-level scan only; an `import os` inside the submitted
        // function's own body runs under its call frame and is instead
        // caught at runtime by the in-container audit hook (S4).
        let code = "def f():\n    import os\n    return 1\n";
        assert!(validate(code, "f", &[]).is_ok());
    }

    #[test]
    fn unwraps_decorated_definition() {
        let code = "import functools\n\n@functools.lru_cache\ndef f(x):\n    return x\n";
        assert!(validate(code, "f", &params(&["x"])).is_ok());
    }
}
