//! Test harness for isolated pipeline runs.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use casepipe::db::document_repo;
use casepipe::{
    ingest_document, Collaborators, Database, Dispatcher, Document, Job, JobQueue, NewJudgment,
    QueuePolicy, RelationalMirror, Scheduler, SchedulerConfig, SqliteMirror, StageContext,
    StageRegistry, StageSettings,
};

pub const JUDGMENT: &str = "IN THE HIGH COURT FOR THE STATE OF TELANGANA\n\n\
    Ravi Kumar vs State of Telangana. Criminal petition for grant of regular bail.\n\n\
    The prosecution case is that the petitioner was arrested on a complaint alleging that \
    he collected money from the complainant on the promise of a government job.\n\n\
    Learned counsel for the petitioner submitted that the petitioner has been in judicial \
    custody for ninety days and the investigation is complete.\n\n\
    Learned Public Prosecutor opposed the petition and contended that the petitioner may \
    tamper with the witnesses.\n\n\
    In view of the above, the criminal petition is allowed and the petitioner is granted \
    bail on furnishing two sureties for a sum of Rs. 20,000 each.";

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
    pub mirror: Arc<SqliteMirror>,
    pub policy: QueuePolicy,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_policy(QueuePolicy::default())
    }

    pub fn with_policy(policy: QueuePolicy) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("casepipe.db");
        let db = Database::open(&db_path).expect("Failed to open pipeline database");
        let mirror = Arc::new(SqliteMirror::open_in_memory().expect("Failed to open mirror"));
        Self {
            temp_dir,
            db_path,
            db,
            mirror,
            policy,
        }
    }

    /// A second, independent connection to the same database file, as a
    /// separate worker process would have.
    pub fn open_second_handle(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to reopen pipeline database")
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.db.clone(), self.policy)
    }

    pub fn ingest(&self, case_number: &str, text: &str) -> (Document, Job) {
        let judgment = NewJudgment::new("upload", text).with_case_number(case_number);
        ingest_document(&self.queue(), judgment).expect("Failed to ingest judgment")
    }

    pub fn document(&self, document_id: &str) -> Document {
        document_repo::find(&self.db, document_id)
            .expect("Failed to load document")
            .expect("Document not found")
    }

    pub fn job_for(&self, document_id: &str) -> Job {
        self.queue()
            .find_by_document(document_id)
            .expect("Failed to load job")
            .expect("Job not found")
    }

    pub fn scheduler(&self, registry: StageRegistry) -> Scheduler {
        self.scheduler_with_timeout(registry, Duration::from_secs(30))
    }

    pub fn scheduler_with_timeout(
        &self,
        registry: StageRegistry,
        stage_timeout: Duration,
    ) -> Scheduler {
        let ctx = StageContext::new(
            self.db.clone(),
            Arc::clone(&self.mirror) as Arc<dyn RelationalMirror>,
            Collaborators::fallback(32),
            StageSettings::default(),
        );
        let dispatcher = Dispatcher::new(registry, Arc::new(ctx), stage_timeout);
        Scheduler::new(
            self.queue(),
            dispatcher,
            Default::default(),
            SchedulerConfig {
                worker_id: "harness".to_string(),
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
        )
    }

    pub fn mirror_count(&self, sql: &str) -> i64 {
        self.mirror
            .database()
            .with_conn(|conn| Ok(conn.query_row(sql, [], |r| r.get::<_, i64>(0))?))
            .expect("Mirror query failed")
    }
}
