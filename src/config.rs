// src/config.rs
//
// =============================================================================
// SANDRUNNER: CONFIGURATION (The Runtime Envelope)
// =============================================================================
//
// Layered configuration: defaults < TOML file < CLI flags (the CLI is the
// final authority, mirroring `main.rs`'s `--root`/`--force-local`-style
// flag overrides). This struct is what the orchestrator's worker pool and
// every session it provisions are parameterised by.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Base image used when a submission doesn't name one (§6).
    pub default_image: String,

    /// Docker Engine endpoint. `None` uses the platform default (unix
    /// socket on Linux/macOS, named pipe on Windows), via
    /// `bollard::Docker::connect_with_local_defaults`.
    pub docker_host: Option<String>,

    /// Fixed-size worker pool for the surrounding dispatcher (§5, default 8).
    pub worker_pool_size: usize,

    /// Per-test wall-clock timeout applied when a submission doesn't name
    /// one (§3, default 2000ms).
    pub default_timeout_ms: u64,

    /// Mount path for the staged working tree inside the container (§6,
    /// default `/mnt/app`).
    pub container_mount_dir: String,

    /// Path inside the container where the whitelist manifest lives (§6,
    /// default `/allowed_modules.json`).
    pub whitelist_path: String,

    /// Optional mandatory-access-control profile (seccomp/AppArmor) applied
    /// to provisioned containers (§4.4: "Optionally attach a
    /// mandatory-access-control profile when configured"). `None` by
    /// default — this crate does not ship a MAC policy.
    pub mac_profile_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_image: "python:3.11".to_string(),
            docker_host: None,
            worker_pool_size: 8,
            default_timeout_ms: 2000,
            container_mount_dir: "/mnt/app".to_string(),
            whitelist_path: "/allowed_modules.json".to_string(),
            mac_profile_path: None,
        }
    }
}

impl SandboxConfig {
    /// Loads configuration from a TOML file, falling back to defaults for
    /// any field the file doesn't specify.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path:?}"))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {path:?}"))?;
        Ok(config)
    }

    /// Loads from `path` if it exists, otherwise returns the default
    /// configuration (a missing config file is not an error, the same
    /// create-if-absent posture `CheckpointStore::open` follows), then
    /// applies environment overrides on top either way (CLI-adjacent layer,
    /// highest precedence: env > file > defaults).
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment overrides via plain `env::var(...).ok()` matching, the
    /// same idiom job schedulers use for `SLURM_*`/`PBS_*` detection, rather
    /// than a dedicated config-file-overlay crate.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SANDBOX_DOCKER_HOST") {
            self.docker_host = Some(host);
        }
        if let Ok(image) = std::env::var("SANDBOX_DEFAULT_IMAGE") {
            self.default_image = image;
        }
        if let Ok(size) = std::env::var("SANDBOX_WORKER_POOL_SIZE") {
            if let Ok(size) = size.parse::<usize>() {
                self.worker_pool_size = size;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.default_timeout_ms, 2000);
        assert_eq!(cfg.worker_pool_size, 8);
        assert_eq!(cfg.container_mount_dir, "/mnt/app");
        assert_eq!(cfg.whitelist_path, "/allowed_modules.json");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandrunner.toml");
        std::fs::write(&path, "worker_pool_size = 4\n").unwrap();
        let cfg = SandboxConfig::load(&path).unwrap();
        assert_eq!(cfg.worker_pool_size, 4);
        assert_eq!(cfg.default_image, "python:3.11");
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = SandboxConfig::load_or_default("/nonexistent/sandrunner.toml").unwrap();
        assert_eq!(cfg.default_image, "python:3.11");
    }

    // Environment variables are process-global, so this runs serially
    // against any other test that touches the same keys.
    #[test]
    #[serial_test::serial]
    fn env_overrides_take_precedence_over_file_and_defaults() {
        std::env::set_var("SANDBOX_DOCKER_HOST", "tcp://example:2375");
        std::env::set_var("SANDBOX_DEFAULT_IMAGE", "python:3.12-slim");
        std::env::set_var("SANDBOX_WORKER_POOL_SIZE", "16");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandrunner.toml");
        std::fs::write(&path, "default_image = \"python:3.9\"\n").unwrap();
        let cfg = SandboxConfig::load_or_default(&path).unwrap();

        std::env::remove_var("SANDBOX_DOCKER_HOST");
        std::env::remove_var("SANDBOX_DEFAULT_IMAGE");
        std::env::remove_var("SANDBOX_WORKER_POOL_SIZE");

        assert_eq!(cfg.docker_host.as_deref(), Some("tcp://example:2375"));
        assert_eq!(cfg.default_image, "python:3.12-slim");
        assert_eq!(cfg.worker_pool_size, 16);
    }

    #[test]
    #[serial_test::serial]
    fn invalid_pool_size_env_var_is_ignored() {
        std::env::set_var("SANDBOX_WORKER_POOL_SIZE", "not-a-number");
        let cfg = SandboxConfig::load_or_default("/nonexistent/sandrunner.toml").unwrap();
        std::env::remove_var("SANDBOX_WORKER_POOL_SIZE");
        assert_eq!(cfg.worker_pool_size, 8);
    }
}
