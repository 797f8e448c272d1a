//! The polling loop that claims jobs and drives them through their stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};

use crate::broadcast::{PipelineEvent, PipelineEventBroadcaster, PipelineEventKind};
use crate::error::{QueueError, WorkerError};
use crate::pipeline::Dispatcher;
use crate::queue::{Job, JobQueue};

/// Slice in which sleeps are cut so a stop request is noticed quickly.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Lease owner recorded on claimed jobs.
    pub worker_id: String,
    /// Sleep between polls when no job is eligible.
    pub poll_interval: Duration,
    /// Age after which a `processing` lease counts as abandoned.
    pub lease_timeout: Duration,
    /// Upper bound on how long `stop` waits for the loop to exit.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("casepipe-worker-{}", uuid::Uuid::new_v4()),
            poll_interval: Duration::from_secs(2),
            lease_timeout: Duration::from_secs(900),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one claim-and-run iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// No job was eligible.
    Idle,
    /// The stage succeeded; the job advanced or completed.
    Finished(Job),
    /// The stage failed; the job is in `retry` or `failed`.
    Failed(Job),
    /// The lease was revoked while the stage ran.
    LeaseLost(String),
}

struct Worker {
    queue: JobQueue,
    dispatcher: Dispatcher,
    events: PipelineEventBroadcaster,
    config: SchedulerConfig,
}

impl Worker {
    fn process_next(&self) -> Result<ProcessOutcome, QueueError> {
        let Some(job) = self.queue.claim_next(&self.config.worker_id)? else {
            return Ok(ProcessOutcome::Idle);
        };
        self.events.send(PipelineEvent::new(
            &job,
            PipelineEventKind::Claimed,
            "Job claimed",
        ));

        let from = job.stage;
        let transition = match self.dispatcher.dispatch(&job) {
            Ok(next) => self.queue.finish(&job, next).map(|updated| {
                self.events.send(PipelineEvent::finished(&updated, from));
                ProcessOutcome::Finished(updated)
            }),
            Err(e) => {
                let message = e.to_string();
                self.dispatcher.context().log_system("error", &message);
                self.queue.fail(&job, &message).map(|updated| {
                    self.events.send(PipelineEvent::failed(&updated, &message));
                    ProcessOutcome::Failed(updated)
                })
            }
        };

        match transition {
            Err(QueueError::LeaseLost { job_id }) => {
                warn!("Lease on job {} was revoked while stage {} ran", job_id, from);
                Ok(ProcessOutcome::LeaseLost(job_id))
            }
            other => other,
        }
    }

    fn recover_orphans(&self) {
        match self.queue.recover_orphans(self.config.lease_timeout) {
            Ok(recovered) => {
                for job in recovered {
                    let mut event = PipelineEvent::failed(&job, "lease expired");
                    event.kind = PipelineEventKind::Recovered;
                    self.events.send(event);
                }
            }
            Err(e) => error!("Orphan recovery failed: {}", e),
        }
    }

    fn run(&self, shutdown: &AtomicBool) {
        info!("Scheduler {} started", self.config.worker_id);
        self.recover_orphans();

        while !shutdown.load(Ordering::Acquire) {
            match self.process_next() {
                Ok(ProcessOutcome::Idle) => {
                    self.recover_orphans();
                    sleep_unless_stopped(shutdown, self.config.poll_interval);
                }
                Ok(outcome) => debug!("Iteration finished: {:?}", outcome),
                Err(e) => {
                    error!("Scheduler iteration failed: {}", e);
                    sleep_unless_stopped(shutdown, self.config.poll_interval);
                }
            }
        }

        info!("Scheduler {} stopped", self.config.worker_id);
    }
}

fn sleep_unless_stopped(shutdown: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && !shutdown.load(Ordering::Acquire) {
        let step = remaining.min(STOP_CHECK_INTERVAL);
        thread::sleep(step);
        remaining -= step;
    }
}

struct Running {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Claims jobs one at a time on a dedicated thread.
///
/// Any number of schedulers, in this process or others, may share one
/// database: the claim is a single atomic statement.
pub struct Scheduler {
    worker: Arc<Worker>,
    shutdown: Arc<AtomicBool>,
    running: Option<Running>,
}

impl Scheduler {
    pub fn new(
        queue: JobQueue,
        dispatcher: Dispatcher,
        events: PipelineEventBroadcaster,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                queue,
                dispatcher,
                events,
                config,
            }),
            shutdown: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.worker.config
    }

    pub fn queue(&self) -> &JobQueue {
        &self.worker.queue
    }

    pub fn events(&self) -> &PipelineEventBroadcaster {
        &self.worker.events
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Claims and runs at most one job on the calling thread.
    pub fn process_next(&self) -> Result<ProcessOutcome, QueueError> {
        self.worker.process_next()
    }

    /// Revokes expired leases, then processes jobs on the calling thread
    /// until none is eligible or `max_jobs` iterations have run. Returns
    /// the number of iterations that claimed a job.
    pub fn run_until_idle(&self, max_jobs: usize) -> Result<usize, QueueError> {
        self.worker.recover_orphans();
        let mut processed = 0;
        while processed < max_jobs {
            if self.worker.process_next()? == ProcessOutcome::Idle {
                break;
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Starts the polling loop on a background thread.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.running.is_some() {
            return Err(WorkerError::AlreadyRunning);
        }
        self.shutdown.store(false, Ordering::Release);

        let worker = Arc::clone(&self.worker);
        let shutdown = Arc::clone(&self.shutdown);
        let (done_tx, done_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(self.worker.config.worker_id.clone())
            .spawn(move || {
                worker.run(&shutdown);
                let _ = done_tx.send(());
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        self.running = Some(Running {
            handle,
            done: done_rx,
        });
        Ok(())
    }

    /// Stops claiming new jobs and waits up to the shutdown timeout for the
    /// in-flight iteration to finish.
    ///
    /// On timeout the loop thread is left to exit on its own; a job it still
    /// holds is recovered once its lease expires.
    pub fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        info!("Stopping scheduler {}...", self.worker.config.worker_id);
        self.shutdown.store(true, Ordering::Release);

        let timeout = self.worker.config.shutdown_timeout;
        match running.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                running.handle.join().map_err(|_| WorkerError::Panicked)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Scheduler {} did not stop within {}s",
                    self.worker.config.worker_id,
                    timeout.as_secs()
                );
                Err(WorkerError::JoinTimeout(timeout.as_secs()))
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
