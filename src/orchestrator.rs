// src/orchestrator.rs
//
// =============================================================================
// SANDRUNNER: TEST ORCHESTRATOR (C5)
// =============================================================================
//
// The top-level state machine driving one submission through every other
// component: `Received -> Validated -> Provisioned -> Installed ->
// Whitelisted -> Staged -> Executed -> Reported -> (TornDown)`. Teardown
// always runs, success or failure, on whichever session got provisioned.
//
// `Dispatcher` is the surrounding worker pool: a fixed-size
// `tokio::sync::Semaphore` gates how many submissions run concurrently,
// generalising `NodeGuardian::task_limiter`'s pattern from a
// hardware-resource gate to a session-lifecycle gate. Crate: `tokio`.

use crate::config::SandboxConfig;
use crate::error::{InfraError, ValidationError};
use crate::harness;
use crate::model::{Artefact, ResultEnvelope, Submission, SubmissionEnvelope};
use crate::session::SandboxSession;
use crate::staging::StagedTree;
use crate::{validator, verdict, whitelist};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("{0}")]
    Sanity(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

/// One fully-resolved submission, ready to enter the state machine.
pub struct Orchestrator {
    config: Arc<SandboxConfig>,
}

impl Orchestrator {
    pub fn new(config: Arc<SandboxConfig>) -> Self {
        Self { config }
    }

    /// Runs one submission end to end. `Received` happens at the call site
    /// (the envelope already exists); every subsequent state below is one
    /// stage of this function.
    pub async fn run(&self, envelope: SubmissionEnvelope) -> Result<ResultEnvelope, RunError> {
        crate::model::envelope_sanity_check(&envelope).map_err(RunError::Sanity)?;
        let submission = Submission::from_envelope(envelope);

        // Validated
        validator::validate(
            &submission.source,
            &submission.function_name,
            &submission.required_params,
        )?;

        // Provisioned
        let image = submission
            .docker_image
            .clone()
            .unwrap_or_else(|| self.config.default_image.clone());
        let mut session = SandboxSession::provision(&self.config, &image)
            .await
            .map_err(RunError::Infra)?;

        let outcome = self.drive_provisioned_session(&mut session, &submission).await;

        if let Err(e) = session.teardown().await {
            log::warn!("session teardown failed: {e}");
        }

        Ok(outcome?.into_envelope())
    }

    async fn drive_provisioned_session(
        &self,
        session: &mut SandboxSession,
        submission: &Submission,
    ) -> Result<crate::model::RunResult, RunError> {
        // Installed. A failed install is an execution error (§7, §4.5:
        // "recoverable only as a reported outcome") — it proceeds straight
        // to a `RunResult` rather than aborting the submission, unlike every
        // other `InfraError` variant.
        let install_output = match session.install(&submission.libraries).await {
            Ok(output) => output,
            Err(InfraError::Install(err)) => {
                return Ok(crate::model::RunResult {
                    status: crate::model::OverallStatus::Fail,
                    install_output: err.output.clone(),
                    test_output: String::new(),
                    test_statuses: Vec::new(),
                    error: Some(crate::model::VerdictError {
                        kind: crate::model::ErrorKind::RuntimeError,
                        message: err.output,
                    }),
                    raw_output: None,
                    stderr: None,
                });
            }
            Err(other) => return Err(RunError::Infra(other)),
        };

        // Whitelisted
        let manifest = whitelist::resolve(session, &submission.libraries)
            .await
            .map_err(RunError::Infra)?;

        // Staged
        let subject = harness::generate_subject_harness(
            &submission.source,
            &submission.function_name,
            &manifest,
        );
        let driver = harness::generate_driver_harness(&submission.tests, submission.timeout_ms);
        let staged = StagedTree::new(&[
            Artefact::SubjectHarness(subject),
            Artefact::DriverHarness(driver),
        ])
        .map_err(InfraError::Staging)?;
        session.upload(&staged).await?;

        // Executed
        let output = session.exec(&["python3", "/mnt/app/test_script.py"]).await?;

        // Reported
        Ok(verdict::map(
            &output.stdout,
            &output.stderr,
            output.exit_code,
            install_output,
        ))
    }
}

/// Fixed-size worker pool around the orchestrator (§5, default pool size 8).
/// Each `submit` call blocks on a semaphore permit before provisioning a
/// session, bounding total concurrent containers rather than total
/// concurrent requests.
#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    limiter: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(config: SandboxConfig) -> Self {
        let pool_size = config.worker_pool_size.max(1);
        Self {
            orchestrator: Arc::new(Orchestrator::new(Arc::new(config))),
            limiter: Arc::new(Semaphore::new(pool_size)),
        }
    }

    pub async fn submit(&self, envelope: SubmissionEnvelope) -> Result<ResultEnvelope, RunError> {
        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .expect("dispatcher semaphore never closes");
        self.orchestrator.run(envelope).await
    }

    /// Runs many submissions concurrently, bounded by the same pool,
    /// preserving input order in the returned `Vec`.
    pub async fn submit_many(
        &self,
        envelopes: Vec<SubmissionEnvelope>,
    ) -> Vec<Result<ResultEnvelope, RunError>> {
        let mut set = JoinSet::new();
        for (index, envelope) in envelopes.into_iter().enumerate() {
            let dispatcher = self.clone();
            set.spawn(async move { (index, dispatcher.submit(envelope).await) });
        }

        let mut results: Vec<Option<Result<ResultEnvelope, RunError>>> =
            (0..set.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(join_err) => {
                    log::error!("submission task panicked: {join_err}");
                }
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(RunError::Sanity("task did not complete".into()))))
            .collect()
    }
}
