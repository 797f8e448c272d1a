use chrono::Utc;
use serde_json::json;

use crate::db::artifact_repo::{self, ArtifactKind};
use crate::document::{Document, DocumentPatch, ProcessingStatus};
use crate::error::{best_effort, StageError};
use crate::pipeline::context::{to_json, StageContext};
use crate::pipeline::Stage;
use crate::queue::Job;
use crate::text::extract_facts;

const FACT_SENTENCES: usize = 5;

/// `cleaned`: extracts leading facts and writes the structured and basic
/// summaries.
pub fn summarize(ctx: &StageContext, job: &Job, document: &Document) -> Result<Stage, StageError> {
    let next = Stage::Summarized;
    let text = ctx.clean_text(document);
    let summarizer = &ctx.collaborators.summarizer;

    let facts = extract_facts(&text, FACT_SENTENCES);
    let summary = summarizer.summarize(&text)?;
    let basic_summary = summarizer.basic_summary(&text)?;
    let bullet_points = summary.bullet_points();

    let now = Utc::now();
    artifact_repo::upsert_artifact(
        &ctx.db,
        &document.document_id,
        &job.case_identifier,
        ArtifactKind::Facts,
        &json!({ "facts": facts }),
        now,
    )?;
    artifact_repo::upsert_artifact(
        &ctx.db,
        &document.document_id,
        &job.case_identifier,
        ArtifactKind::Summary,
        &json!({
            "summary": bullet_points,
            "short_summary": summary.short_summary,
            "basic_summary": basic_summary,
            "detailed_summary": summary.detailed_summary,
            "key_points": to_json(&summary.key_points)?,
            "model": summarizer.model_name(),
        }),
        now,
    )?;

    let case_id = ctx.mirror_case_id(document);
    if let Some(case_id) = case_id {
        best_effort("mirror facts", ctx.mirror.replace_facts(case_id, &facts));
        best_effort(
            "mirror summary",
            ctx.mirror
                .replace_summary(case_id, &summary.detailed_summary, summarizer.model_name()),
        );
    }

    let mut patch = DocumentPatch::new()
        .flag("entities_extracted")
        .flag("summarized")
        .status(ProcessingStatus::from(next));
    if let Some(case_id) = case_id {
        patch = patch.set("case_id_mirror", case_id);
    }
    ctx.update_document(document, &patch)?;

    ctx.record_output(
        job,
        &json!({
            "facts": facts.len(),
            "short_summary": summary.short_summary,
            "key_points": summary.key_points.len(),
        }),
    );
    ctx.log_system("summarized", &job.case_identifier);
    Ok(next)
}
