//! `casepipe` worker binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use serde_json::json;

use casepipe::db::job_repo::JobFilter;
use casepipe::db::{document_repo, stats_repo};
use casepipe::error::{best_effort, IngestError, WorkerError};
use casepipe::logging::{init_tracing, LogFormat};
use casepipe::{
    ingest_document, load_config, CasepipeError, Collaborators, Config, Database, Dispatcher,
    JobQueue, JobStatus, NewJudgment, NoopMirror, RelationalMirror, Scheduler, SqliteMirror, Stage,
    StageContext, StageRegistry,
};

#[derive(Parser)]
#[command(name = "casepipe")]
#[command(version, about = "Resumable processing pipeline for legal judgments", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CASEPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process queued jobs until interrupted
    Run {
        /// Drain the queue once and exit
        #[arg(long)]
        once: bool,
    },

    /// Store a judgment text file and queue it for processing
    Ingest {
        /// UTF-8 text of the judgment
        file: PathBuf,

        /// Case number; generated when omitted
        #[arg(long)]
        case_number: Option<String>,

        /// Where the text came from
        #[arg(long, default_value = "upload")]
        source_type: String,

        #[arg(long)]
        title: Option<String>,
    },

    /// Queue a document again, e.g. after it failed
    Requeue {
        document_id: String,

        /// Stage to restart from; defaults to the job's current stage
        #[arg(long)]
        stage: Option<Stage>,
    },

    /// Print queue and coverage statistics as JSON
    Status {
        /// Show the pipeline status of a single case instead
        #[arg(long)]
        case: Option<String>,

        /// List the jobs in this status instead
        #[arg(long, value_name = "STATUS", conflicts_with = "case")]
        jobs: Option<JobStatus>,

        /// Number of recent stage outputs, or of listed jobs, to include
        #[arg(long, default_value_t = 10)]
        activity: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_format, &cli.log_level) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CasepipeError> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    let Some(db_path) = config.resolved_database_path() else {
        eprintln!("No database_path configured and no home directory found");
        return Ok(ExitCode::FAILURE);
    };
    let db = Database::open(&db_path)?;
    let queue = JobQueue::new(db.clone(), config.queue_policy());

    match cli.command {
        Commands::Run { once } => run_pipeline(&config, db, queue, once),
        Commands::Ingest {
            file,
            case_number,
            source_type,
            title,
        } => {
            let raw_text = std::fs::read_to_string(&file).map_err(|e| IngestError::ReadFile {
                path: file.clone(),
                source: e,
            })?;
            let judgment = NewJudgment {
                case_number,
                title,
                ..NewJudgment::new(source_type, raw_text)
            };
            let (document, job) = ingest_document(&queue, judgment)?;
            println!(
                "{}",
                json!({
                    "documentId": document.document_id,
                    "caseNumber": document.case_number,
                    "jobId": job.job_id,
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Requeue { document_id, stage } => {
            let existing = queue.find_by_document(&document_id)?;
            let case_identifier = match &existing {
                Some(job) => job.case_identifier.clone(),
                None => match document_repo::find(&db, &document_id)? {
                    Some(document) => document.case_number,
                    None => {
                        eprintln!("Unknown document {}", document_id);
                        return Ok(ExitCode::FAILURE);
                    }
                },
            };
            let stage = stage
                .or(existing.map(|job| job.stage))
                .unwrap_or(Stage::Extracted);
            let job = queue.enqueue(&document_id, &case_identifier, stage)?;
            log::info!("Requeued document {} at stage {}", document_id, job.stage);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status {
            case,
            jobs,
            activity,
        } => {
            if let Some(status) = jobs {
                let (rows, total) = queue.list(&JobFilter {
                    status: Some(status),
                    limit: Some(activity),
                    ..Default::default()
                })?;
                println!("{:#}", json!({ "total": total, "jobs": rows }));
                return Ok(ExitCode::SUCCESS);
            }
            let report = match case {
                Some(case) => match stats_repo::pipeline_status(&db, &case)? {
                    Some(status) => json!(status),
                    None => {
                        eprintln!("No job found for case {}", case);
                        return Ok(ExitCode::FAILURE);
                    }
                },
                None => json!({
                    "jobs": stats_repo::status_counts(&db)?,
                    "overview": stats_repo::overview(&db)?,
                    "coverage": stats_repo::coverage(&db)?,
                    "recentActivity": stats_repo::recent_activity(&db, activity)?,
                }),
            };
            println!("{:#}", report);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_pipeline(
    config: &Config,
    db: Database,
    queue: JobQueue,
    once: bool,
) -> Result<ExitCode, CasepipeError> {
    let mirror: Arc<dyn RelationalMirror> = match config.mirror_path() {
        Some(path) => Arc::new(SqliteMirror::open(&path)?),
        None => {
            log::info!("No mirror database configured, mirroring disabled");
            Arc::new(NoopMirror)
        }
    };

    let collaborators = Collaborators::fallback(config.embedding.dimension);
    if let Some(loaded) = best_effort(
        "reload vector index",
        collaborators.reload_vector_index(&db),
    ) {
        log::info!("Loaded {} vectors into the similarity index", loaded);
    }

    let ctx = StageContext::new(db, mirror, collaborators, config.stage_settings());
    let dispatcher = Dispatcher::new(
        StageRegistry::standard(),
        Arc::new(ctx),
        config.stage_timeout(),
    );
    let mut scheduler = Scheduler::new(
        queue,
        dispatcher,
        Default::default(),
        config.scheduler_config(),
    );

    if once {
        let processed = scheduler.run_until_idle(usize::MAX)?;
        log::info!("Processed {} job step(s)", processed);
        return Ok(ExitCode::SUCCESS);
    }

    let mut events = scheduler.events().subscribe();
    thread::Builder::new()
        .name("event-log".to_string())
        .spawn(move || {
            while let Ok(event) = events.blocking_recv() {
                tracing::debug!(
                    kind = %event.kind,
                    job_id = %event.job_id,
                    case = %event.case_identifier,
                    stage = %event.stage,
                    "{}",
                    event.message
                );
            }
        })
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .map_err(|e| WorkerError::Signal(e.to_string()))?;

    scheduler.start()?;
    log::info!(
        "Scheduler {} running, press Ctrl-C to stop",
        scheduler.config().worker_id
    );

    let _ = stop_rx.recv();
    scheduler.stop()?;
    Ok(ExitCode::SUCCESS)
}
