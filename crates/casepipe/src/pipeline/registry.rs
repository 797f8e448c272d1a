use std::collections::BTreeMap;
use std::sync::Arc;

use super::context::StageContext;
use super::stage::Stage;
use super::stages;
use crate::document::Document;
use crate::error::StageError;
use crate::queue::Job;

/// The work done for one stage.
///
/// Implementations must be idempotent: a stage may run again after a
/// crash, a timeout or a retry, and must leave the same state behind.
pub trait StageFunction: Send + Sync {
    /// Runs the stage for `document` and returns the stage the job moves to.
    fn run(
        &self,
        ctx: &StageContext,
        job: &Job,
        document: &Document,
    ) -> Result<Stage, StageError>;
}

impl<F> StageFunction for F
where
    F: Fn(&StageContext, &Job, &Document) -> Result<Stage, StageError> + Send + Sync,
{
    fn run(
        &self,
        ctx: &StageContext,
        job: &Job,
        document: &Document,
    ) -> Result<Stage, StageError> {
        self(ctx, job, document)
    }
}

/// Maps each non-terminal stage to its function.
#[derive(Clone, Default)]
pub struct StageRegistry {
    functions: BTreeMap<Stage, Arc<dyn StageFunction>>,
}

impl StageRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in function for every non-terminal stage.
    pub fn standard() -> Self {
        let functions = Stage::ALL
            .iter()
            .filter_map(|&stage| standard_function(stage).map(|f| (stage, f)))
            .collect();
        Self { functions }
    }

    /// Replaces the function registered for `stage`.
    pub fn with(mut self, stage: Stage, function: impl StageFunction + 'static) -> Self {
        self.functions.insert(stage, Arc::new(function));
        self
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageFunction>> {
        self.functions.get(&stage).cloned()
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.functions.keys().copied()
    }
}

fn standard_function(stage: Stage) -> Option<Arc<dyn StageFunction>> {
    let function: Arc<dyn StageFunction> = match stage {
        Stage::Uploaded => Arc::new(stages::passthrough),
        Stage::Extracted => Arc::new(stages::clean),
        Stage::Cleaned => Arc::new(stages::summarize),
        Stage::Summarized => Arc::new(stages::translate),
        Stage::Translated => Arc::new(stages::chunk),
        Stage::Chunked => Arc::new(stages::embed),
        Stage::Embedded => Arc::new(stages::predict),
        Stage::Predicted => Arc::new(stages::finalize),
        Stage::Completed => return None,
    };
    Some(function)
}
