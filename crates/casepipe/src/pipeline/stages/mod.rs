//! The built-in stage functions, one per non-terminal stage.
//!
//! Each reads what it needs from the document (re-deriving missing
//! intermediates), writes its own outputs, copies them to the mirror on a
//! best-effort basis, appends an audit entry and returns the next stage.

mod chunk;
mod clean;
mod embed;
mod predict;
mod summarize;
mod translate;

pub use chunk::chunk;
pub use clean::clean;
pub use embed::embed;
pub use predict::predict;
pub use summarize::summarize;
pub use translate::translate;

use serde_json::json;

use super::context::StageContext;
use super::stage::Stage;
use crate::document::{Document, DocumentPatch, ProcessingStatus};
use crate::error::StageError;
use crate::queue::Job;

/// `uploaded`: nothing to do until the text has been extracted.
pub fn passthrough(
    _ctx: &StageContext,
    _job: &Job,
    _document: &Document,
) -> Result<Stage, StageError> {
    Ok(Stage::Extracted)
}

/// `predicted`: marks the document completed.
pub fn finalize(ctx: &StageContext, job: &Job, document: &Document) -> Result<Stage, StageError> {
    let next = Stage::Completed;
    ctx.update_document(
        document,
        &DocumentPatch::new().status(ProcessingStatus::from(next)),
    )?;
    ctx.record_output(
        job,
        &json!({ "all_flags_set": document.nlp_flags.all_set() }),
    );
    ctx.log_system("completed", &job.case_identifier);
    Ok(next)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::artifact_repo;

    #[test]
    fn test_passthrough_moves_to_extracted() {
        let fx = Fixture::new();
        fx.add_document("d1", "WP 1/2024", "text");
        assert_eq!(fx.run(passthrough, "d1", Stage::Uploaded), Stage::Extracted);
    }

    #[test]
    fn test_finalize_completes_document() {
        let fx = Fixture::new();
        fx.add_document("d1", "WP 1/2024", "text");
        assert_eq!(fx.run(finalize, "d1", Stage::Predicted), Stage::Completed);

        let doc = fx.document("d1");
        assert_eq!(doc.processing_status, ProcessingStatus::Completed);
        let trail = artifact_repo::stage_outputs_for(&fx.ctx.db, "d1").unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].stage, Stage::Predicted);
    }
}
