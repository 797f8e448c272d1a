use serde_json::json;

use crate::document::{Document, DocumentPatch, ProcessingStatus};
use crate::error::{best_effort, StageError};
use crate::mirror::MirrorCase;
use crate::pipeline::context::{to_json, StageContext};
use crate::pipeline::Stage;
use crate::queue::Job;
use crate::text::{detect_language_code, first_line_title, normalize_text, split_paragraphs, word_count};

/// `extracted`: normalizes the raw text, detects its language, splits it
/// into paragraphs, picks a title and upserts the mirror case row.
pub fn clean(ctx: &StageContext, job: &Job, document: &Document) -> Result<Stage, StageError> {
    let next = Stage::Cleaned;
    let normalized = normalize_text(&document.judgment_text.raw_text);
    let language = detect_language_code(&normalized);
    let paragraphs = split_paragraphs(&normalized);
    let token_count = word_count(&normalized);
    let title = document
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| first_line_title(&normalized));

    ctx.ensure_lease()?;
    let case_id = best_effort(
        "mirror case upsert",
        ctx.mirror
            .upsert_case(&MirrorCase::from_document(document, &title)),
    )
    .flatten()
    .or(document.case_id_mirror);

    let mut patch = DocumentPatch::new()
        .set("title", title.as_str())
        .set("judgment_text.clean_text", normalized.as_str())
        .set("judgment_text.language", language)
        .set("judgment_text.token_count", token_count as u64)
        .set("judgment_text.paragraphs", to_json(&paragraphs)?)
        .flag("text_cleaned")
        .status(ProcessingStatus::from(next));
    if let Some(case_id) = case_id {
        patch = patch.set("case_id_mirror", case_id);
    }
    ctx.update_document(document, &patch)?;

    ctx.record_output(
        job,
        &json!({
            "token_count": token_count,
            "language": language,
            "paragraphs": paragraphs.len(),
        }),
    );
    ctx.log_system("cleaned", &job.case_identifier);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::test_support::*;

    #[test]
    fn test_clean_writes_text_sections() {
        let fx = Fixture::new();
        fx.add_document("d1", "CRLP 12/2024", "Ravi  vs State.\n\n\n\nBail   granted.");
        assert_eq!(fx.run(clean, "d1", Stage::Extracted), Stage::Cleaned);

        let doc = fx.document("d1");
        assert_eq!(
            doc.judgment_text.clean_text.as_deref(),
            Some("Ravi vs State.\n\nBail granted.")
        );
        assert_eq!(doc.judgment_text.language.as_deref(), Some("en"));
        assert_eq!(doc.judgment_text.token_count, Some(5));
        assert_eq!(doc.judgment_text.paragraphs.len(), 2);
        assert_eq!(doc.title.as_deref(), Some("Ravi vs State"));
        assert!(doc.nlp_flags.text_cleaned);
        assert_eq!(doc.processing_status, ProcessingStatus::Cleaned);
        assert!(doc.case_id_mirror.is_some());
    }

    #[test]
    fn test_clean_is_idempotent() {
        let fx = Fixture::new();
        fx.add_document("d1", "CRLP 12/2024", JUDGMENT);
        fx.run(clean, "d1", Stage::Extracted);
        let first = fx.document("d1");
        fx.run(clean, "d1", Stage::Extracted);
        let second = fx.document("d1");

        assert_eq!(first.judgment_text, second.judgment_text);
        assert_eq!(first.case_id_mirror, second.case_id_mirror);
    }

    #[test]
    fn test_placeholder_case_number_skips_mirror() {
        let fx = Fixture::new();
        fx.add_document("d1", "CASE-20240101-ABCD1234", JUDGMENT);
        fx.run(clean, "d1", Stage::Extracted);
        assert!(fx.document("d1").case_id_mirror.is_none());
    }
}
