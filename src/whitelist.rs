// src/whitelist.rs
//
// =============================================================================
// SANDRUNNER: MODULE WHITELIST RESOLVER (C3)
// =============================================================================
//
// Two-strategy resolution, tried in order (§4.3): read a pre-baked
// `/allowed_modules.json` the image already ships, or failing that,
// materialise and run an in-container introspection script and read back
// what it wrote. Either way the requested `libraries` are unioned in
// afterwards — per the original source and §9's resolved open
// question, union rather than intersection.
//
// Grounded structurally on `src/resources.rs`'s `ResourceLedger::detect`
// two-strategy detect-or-fall-back pattern.

use crate::error::InfraError;
use crate::model::WhitelistManifest;
use crate::session::SandboxSession;
use anyhow::Context;

const MANIFEST_PATH: &str = "/allowed_modules.json";
const GENERATOR_FILENAME: &str = "generate_allowed_modules.py";

pub async fn resolve(
    session: &mut SandboxSession,
    libraries: &[String],
) -> Result<WhitelistManifest, InfraError> {
    let mut manifest = match read_prebaked(session).await {
        Ok(Some(modules)) => WhitelistManifest::from_iter_owned(modules),
        Ok(None) => generate_in_container(session, libraries).await?,
        Err(_) => generate_in_container(session, libraries).await?,
    };
    manifest.union_libraries(libraries);
    Ok(manifest)
}

async fn read_prebaked(session: &mut SandboxSession) -> anyhow::Result<Option<Vec<String>>> {
    let output = session
        .exec(&["cat", MANIFEST_PATH])
        .await
        .context("exec cat allowed_modules.json")?;
    if output.exit_code != 0 || output.stdout.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Vec<String>>(&output.stdout) {
        Ok(modules) => Ok(Some(modules)),
        Err(_) => Ok(None),
    }
}

async fn generate_in_container(
    session: &mut SandboxSession,
    libraries: &[String],
) -> Result<WhitelistManifest, InfraError> {
    let script = generate_allowed_modules_script(libraries);
    session
        .write_file(GENERATOR_FILENAME, &script)
        .await
        .map_err(InfraError::Whitelist)?;

    let output = session.exec(&["python3", GENERATOR_FILENAME]).await?;
    if output.exit_code != 0 {
        return Err(InfraError::Whitelist(anyhow::anyhow!(
            "allowed_modules generator exited {}: {}",
            output.exit_code,
            output.stderr
        )));
    }

    let readback = session.exec(&["cat", MANIFEST_PATH]).await?;
    if readback.stdout.trim().is_empty() {
        return Err(InfraError::Whitelist(anyhow::anyhow!(
            "allowed_modules.json is missing or empty after generation"
        )));
    }
    let modules: Vec<String> = serde_json::from_str(&readback.stdout)
        .map_err(|e| InfraError::Whitelist(anyhow::anyhow!(e)))?;
    Ok(WhitelistManifest::from_iter_owned(modules))
}

/// Ported from the original's `generate_allowed_modules_script`: enumerate
/// builtins, `pip list`, `top_level.txt` of every distribution,
/// `pkgutil.iter_modules()`, and identifier-shaped entries under every
/// `site.getsitepackages()` root, then union in the requested libraries'
/// root names.
fn generate_allowed_modules_script(libraries: &[String]) -> String {
    let requested = serde_json::to_string(libraries).unwrap_or_else(|_| "[]".to_string());

    let mut out = String::new();
    out.push_str("import json\n");
    out.push_str("import sys\n");
    out.push_str("import pkgutil\n");
    out.push_str("import importlib\n");
    out.push_str("import importlib.metadata\n");
    out.push_str("import subprocess\n");
    out.push_str("import site\n");
    out.push_str("import os\n\n");

    out.push_str("allowed = set()\n");
    out.push_str("allowed |= set(sys.builtin_module_names)\n\n");

    out.push_str("try:\n");
    out.push_str("    output = subprocess.check_output(['pip', 'list', '--format=json'], text=True)\n");
    out.push_str("    installed = json.loads(output)\n");
    out.push_str("    for pkg in [p['name'] for p in installed]:\n");
    out.push_str("        try:\n");
    out.push_str("            module = importlib.import_module(pkg)\n");
    out.push_str("            allowed.add(pkg.lower())\n");
    out.push_str("            if hasattr(module, '__path__'):\n");
    out.push_str("                for _, name, _ in pkgutil.walk_packages(module.__path__, module.__name__ + '.'):\n");
    out.push_str("                    allowed.add(name.split('.')[0])\n");
    out.push_str("        except Exception:\n");
    out.push_str("            continue\n");
    out.push_str("except Exception:\n");
    out.push_str("    pass\n\n");

    out.push_str("try:\n");
    out.push_str("    for dist in importlib.metadata.distributions():\n");
    out.push_str("        try:\n");
    out.push_str("            top_level = dist.read_text('top_level.txt')\n");
    out.push_str("            if top_level:\n");
    out.push_str("                for name in top_level.strip().splitlines():\n");
    out.push_str("                    allowed.add(name.strip())\n");
    out.push_str("        except Exception:\n");
    out.push_str("            continue\n");
    out.push_str("except Exception:\n");
    out.push_str("    pass\n\n");

    out.push_str("for finder, name, _ in pkgutil.iter_modules():\n");
    out.push_str("    allowed.add(name)\n\n");

    out.push_str("for sp in site.getsitepackages():\n");
    out.push_str("    try:\n");
    out.push_str("        for entry in os.listdir(sp):\n");
    out.push_str("            path = os.path.join(sp, entry)\n");
    out.push_str("            if os.path.isdir(path) and entry.isidentifier():\n");
    out.push_str("                allowed.add(entry)\n");
    out.push_str("            elif entry.endswith('.py') and entry[:-3].isidentifier():\n");
    out.push_str("                allowed.add(entry[:-3])\n");
    out.push_str("    except Exception:\n");
    out.push_str("        continue\n\n");

    out.push_str(&format!("requested_modules = {requested}\n"));
    out.push_str("for lib in requested_modules:\n");
    out.push_str("    root = lib.split('.')[0]\n");
    out.push_str("    try:\n");
    out.push_str("        importlib.import_module(root)\n");
    out.push_str("        allowed.add(root)\n");
    out.push_str("    except Exception:\n");
    out.push_str("        pass\n\n");

    out.push_str("allowed = {x for x in allowed if x}\n\n");

    out.push_str(&format!(
        "with open({MANIFEST_PATH:?}, 'w', encoding='utf-8') as f:\n"
    ));
    out.push_str("    json.dump(sorted(allowed), f, ensure_ascii=False)\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_script_embeds_requested_libraries() {
        let script = generate_allowed_modules_script(&["numpy".to_string(), "pandas".to_string()]);
        assert!(script.contains("\"numpy\""));
        assert!(script.contains("\"pandas\""));
        assert!(script.contains("allowed_modules.json"));
    }

    #[test]
    fn generator_script_is_valid_with_no_libraries() {
        let script = generate_allowed_modules_script(&[]);
        assert!(script.contains("requested_modules = []"));
    }
}
