pub mod broadcast;
pub mod collab;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod mirror;
pub mod pipeline;
pub mod queue;
pub mod text;
pub mod worker;

pub use broadcast::{PipelineEvent, PipelineEventBroadcaster, PipelineEventKind};
pub use collab::Collaborators;
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use document::{Document, DocumentPatch, ProcessingStatus};
pub use error::{
    CasepipeError, ConfigError, IngestError, QueueError, Result, StageError, WorkerError,
};
pub use ingest::{ingest_document, NewJudgment};
pub use mirror::{NoopMirror, RelationalMirror, SqliteMirror};
pub use pipeline::{Dispatcher, Stage, StageContext, StageFunction, StageRegistry, StageSettings};
pub use queue::{Job, JobQueue, JobStatus, QueuePolicy};
pub use worker::{ProcessOutcome, Scheduler, SchedulerConfig};
