// src/main.rs
//
// =============================================================================
// SANDRUNNER: COMMAND-LINE ENTRY POINT
// =============================================================================
//
// The local operator surface for the orchestrator, standing in for the HTTP
// layer this crate deliberately does not ship (Non-goal: no network
// listener). Two subcommands:
//
// - `run`: reads one submission envelope from a JSON file, drives it through
//   the full orchestrator, and prints the resulting verdict envelope.
// - `validate`: runs only the static Submission Validator (C1) against a
//   submission file, useful for a fast pre-flight check without touching
//   Docker at all.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandrunner::{validator, SandboxConfig, SubmissionEnvelope};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sandrunner",
    version,
    about = "Sandboxed test orchestrator for untrusted Python submissions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one submission envelope end to end and print the result envelope.
    Run {
        /// Path to a JSON file holding a `SubmissionEnvelope`.
        #[arg(long)]
        envelope: PathBuf,

        /// Path to a TOML config file; falls back to defaults if absent.
        #[arg(long, default_value = "sandrunner.toml")]
        config: PathBuf,
    },

    /// Statically validate a submission without provisioning a sandbox.
    Validate {
        /// Path to a JSON file holding a `SubmissionEnvelope`.
        #[arg(long)]
        envelope: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { envelope, config } => run(envelope, config).await,
        Commands::Validate { envelope } => validate(envelope),
    }
}

fn load_envelope(path: &std::path::Path) -> Result<SubmissionEnvelope> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read envelope file: {path:?}"))?;
    let envelope: SubmissionEnvelope =
        serde_json::from_str(&text).with_context(|| format!("failed to parse envelope: {path:?}"))?;
    Ok(envelope)
}

async fn run(envelope_path: PathBuf, config_path: PathBuf) -> Result<()> {
    let envelope = load_envelope(&envelope_path)?;
    let config = SandboxConfig::load_or_default(&config_path)?;

    let orchestrator = sandrunner::Orchestrator::new(std::sync::Arc::new(config));
    let result = orchestrator.run(envelope).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn validate(envelope_path: PathBuf) -> Result<()> {
    let envelope = load_envelope(&envelope_path)?;
    sandrunner::model::envelope_sanity_check(&envelope)
        .map_err(|e| anyhow::anyhow!(e))
        .context("envelope failed sanity check")?;

    let submission = sandrunner::Submission::from_envelope(envelope);
    validator::validate(
        &submission.source,
        &submission.function_name,
        &submission.required_params,
    )?;

    println!("OK: submission is well-formed and passes static validation");
    Ok(())
}
