use chrono::Utc;

use crate::db::artifact_repo::{self, ArtifactKind};
use crate::db::format_timestamp;
use crate::document::{Document, DocumentPatch, ProcessingStatus};
use crate::error::{best_effort, StageError};
use crate::mirror::MirrorPrediction;
use crate::pipeline::context::{to_json, StageContext};
use crate::pipeline::Stage;
use crate::queue::Job;

/// `embedded`: predicts the outcome, weighing in earlier predictions for
/// other documents.
pub fn predict(ctx: &StageContext, job: &Job, document: &Document) -> Result<Stage, StageError> {
    let next = Stage::Predicted;
    let text = ctx.clean_text(document);
    let history = artifact_repo::prediction_history(
        &ctx.db,
        &document.document_id,
        ctx.settings.prediction_history_limit,
    )?;
    let prediction = ctx.collaborators.predictor.predict(&text, &history)?;
    let payload = to_json(&prediction)?;

    let now = Utc::now();
    artifact_repo::upsert_artifact(
        &ctx.db,
        &document.document_id,
        &job.case_identifier,
        ArtifactKind::Prediction,
        &payload,
        now,
    )?;

    if let Some(case_id) = ctx.mirror_case_id(document) {
        let row = MirrorPrediction {
            outcome: prediction.outcome.clone(),
            win_probability: prediction.win_probability,
            confidence: prediction.confidence,
            key_factors: prediction.key_factors.join("; "),
            model_version: prediction.model_version.clone(),
        };
        best_effort(
            "mirror prediction",
            ctx.mirror.replace_prediction(case_id, &row),
        );
    }

    ctx.update_document(
        document,
        &DocumentPatch::new()
            .set("prediction.predicted_outcome", prediction.outcome.as_str())
            .set("prediction.win_probability", prediction.win_probability)
            .set("prediction.confidence_score", prediction.confidence)
            .set("prediction.model_version", prediction.model_version.as_str())
            .set("prediction.predicted_at", format_timestamp(now))
            .flag("prediction_done")
            .status(ProcessingStatus::from(next)),
    )?;

    ctx.record_output(job, &payload);
    ctx.log_system("predicted", &job.case_identifier);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::predictor::LIKELY_TO_WIN;
    use crate::pipeline::stages::clean;
    use crate::pipeline::stages::test_support::*;

    #[test]
    fn test_predict_writes_document_and_artifact() {
        let fx = Fixture::new();
        fx.add_document("d1", "CRLP 12/2024", JUDGMENT);
        fx.run(clean, "d1", Stage::Extracted);
        assert_eq!(fx.run(predict, "d1", Stage::Embedded), Stage::Predicted);

        let doc = fx.document("d1");
        assert!(doc.nlp_flags.prediction_done);
        assert_eq!(doc.prediction.predicted_outcome.as_deref(), Some(LIKELY_TO_WIN));
        assert_eq!(doc.prediction.model_version.as_deref(), Some("keyword-v1"));
        assert!(doc.prediction.predicted_at.is_some());

        let stored = artifact_repo::find_artifact(&fx.ctx.db, "d1", ArtifactKind::Prediction)
            .unwrap()
            .unwrap();
        assert_eq!(stored["outcome"], LIKELY_TO_WIN);
        assert_eq!(fx.mirror_count("SELECT COUNT(*) FROM case_predictions"), 1);
    }
}
