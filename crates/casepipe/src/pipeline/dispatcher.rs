//! Runs the registered stage function for a claimed job.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info_span, warn};

use super::context::StageContext;
use super::registry::{StageFunction, StageRegistry};
use super::stage::Stage;
use crate::db::document_repo;
use crate::error::StageError;
use crate::queue::Job;

pub struct Dispatcher {
    registry: StageRegistry,
    ctx: Arc<StageContext>,
    stage_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: StageRegistry, ctx: Arc<StageContext>, stage_timeout: Duration) -> Self {
        Self {
            registry,
            ctx,
            stage_timeout,
        }
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Runs the stage the job is at and returns the stage it moves to.
    ///
    /// The function runs on its own thread against a context fenced on the
    /// job's lease. If it does not return within the stage timeout the
    /// thread is abandoned and `Timeout` returned. The caller's `fail` then
    /// revokes the lease, after which the abandoned thread can neither move
    /// the job nor write the document or its artifacts.
    pub fn dispatch(&self, job: &Job) -> Result<Stage, StageError> {
        let function = self
            .registry
            .get(job.stage)
            .ok_or(StageError::Unregistered(job.stage))?;

        let span = info_span!("stage",
            job_id = %job.job_id,
            case = %job.case_identifier,
            stage = %job.stage,
            attempt = job.attempts + 1,
        );

        let (result_tx, result_rx) = bounded(1);
        let ctx = self.ctx.for_job(job);
        let owned_job = job.clone();
        let handle = thread::Builder::new()
            .name(format!("stage-{}", job.stage))
            .spawn(move || {
                let _entered = span.enter();
                let started = Instant::now();
                let result = execute(function.as_ref(), &ctx, &owned_job);
                match &result {
                    Ok(next) => debug!(
                        next = %next,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Stage finished"
                    ),
                    Err(e) => warn!(error = %e, "Stage failed"),
                }
                // The receiver is gone if the dispatcher already gave up.
                let _ = result_tx.send(result);
            })
            .map_err(|e| StageError::Spawn(e.to_string()))?;

        match result_rx.recv_timeout(self.stage_timeout) {
            Ok(result) => {
                let _ = handle.join();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Stage {} of job {} exceeded {}s, abandoning it",
                    job.stage,
                    job.job_id,
                    self.stage_timeout.as_secs()
                );
                Err(StageError::Timeout {
                    stage: job.stage,
                    seconds: self.stage_timeout.as_secs(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(StageError::Panicked { stage: job.stage })
            }
        }
    }
}

/// Loads the job's document, runs `function` and checks that the returned
/// stage moves forward.
pub fn execute(
    function: &dyn StageFunction,
    ctx: &StageContext,
    job: &Job,
) -> Result<Stage, StageError> {
    let document = document_repo::find(&ctx.db, &job.document_id)?.ok_or_else(|| {
        StageError::DocumentMissing {
            document_id: job.document_id.clone(),
        }
    })?;

    let next = function.run(ctx, job, &document)?;
    if next <= job.stage {
        return Err(StageError::InvalidTransition {
            from: job.stage,
            to: next,
        });
    }
    Ok(next)
}
