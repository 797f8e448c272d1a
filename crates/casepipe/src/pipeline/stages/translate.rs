use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};

use crate::collab::Translation;
use crate::db::artifact_repo::{self, ArtifactKind};
use crate::document::{Document, DocumentPatch, ProcessingStatus};
use crate::error::{best_effort, StageError};
use crate::pipeline::context::{to_json, StageContext};
use crate::pipeline::Stage;
use crate::queue::Job;

/// Characters of cleaned text translated when no summary exists at all.
const FALLBACK_SOURCE_CHARS: usize = 3000;
const PRIMARY_LANGUAGE: &str = "hi";

/// Basic summary and key points from the stored summary artifact.
fn stored_summary(summary: &Value) -> Option<(String, Vec<String>)> {
    let basic = summary["basic_summary"]
        .as_str()
        .or_else(|| summary["short_summary"].as_str())?
        .to_string();
    let key_points = summary["key_points"]
        .as_array()
        .map(|points| {
            points
                .iter()
                .filter_map(|p| {
                    let label = p["label"].as_str()?;
                    let explanation = p["explanation"].as_str()?;
                    Some(format!("{}: {}", label, explanation))
                })
                .collect()
        })
        .unwrap_or_default();
    Some((basic, key_points))
}

/// The user-facing text to translate: basic summary plus key points.
fn translation_source(ctx: &StageContext, document: &Document) -> Result<String, StageError> {
    let stored = artifact_repo::find_artifact(&ctx.db, &document.document_id, ArtifactKind::Summary)?
        .as_ref()
        .and_then(stored_summary);

    let text = ctx.clean_text(document);
    let (basic, key_points) = match stored {
        Some(found) => found,
        None => {
            let summarizer = &ctx.collaborators.summarizer;
            let summary = summarizer.summarize(&text)?;
            let points = summary
                .key_points
                .iter()
                .map(|p| format!("{}: {}", p.label, p.explanation))
                .collect();
            (summarizer.basic_summary(&text)?, points)
        }
    };

    let numbered = key_points
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, p))
        .collect::<Vec<_>>()
        .join("\n");
    let source = format!("{}\n\nKey Points:\n{}", basic, numbered)
        .trim()
        .to_string();
    if basic.trim().is_empty() && key_points.is_empty() {
        return Ok(text.chars().take(FALLBACK_SOURCE_CHARS).collect());
    }
    Ok(source)
}

/// `summarized`: translates the summary into the configured languages,
/// falling back to the English text.
pub fn translate(ctx: &StageContext, job: &Job, document: &Document) -> Result<Stage, StageError> {
    let next = Stage::Translated;
    let source = translation_source(ctx, document)?;

    let mut translations: BTreeMap<String, Translation> = ctx
        .collaborators
        .translator
        .translate(&source, &ctx.settings.target_languages)?;
    if translations.is_empty() {
        translations.insert(
            "en".to_string(),
            Translation {
                language: "en".to_string(),
                translated_text: source.clone(),
                source_language: "en".to_string(),
                model_used: "fallback".to_string(),
                error: None,
            },
        );
    }

    artifact_repo::upsert_artifact(
        &ctx.db,
        &document.document_id,
        &job.case_identifier,
        ArtifactKind::Translation,
        &json!({
            "source_text": source,
            "translations": to_json(&translations)?,
        }),
        Utc::now(),
    )?;

    let primary = translations
        .get(PRIMARY_LANGUAGE)
        .or_else(|| translations.values().next());
    if let (Some(case_id), Some(primary)) = (ctx.mirror_case_id(document), primary) {
        best_effort(
            "mirror translation",
            ctx.mirror.replace_translation(
                case_id,
                &primary.language,
                &primary.translated_text,
                &primary.model_used,
            ),
        );
    }

    ctx.update_document(
        document,
        &DocumentPatch::new()
            .flag("translated")
            .status(ProcessingStatus::from(next)),
    )?;

    let models: BTreeMap<&str, &str> = translations
        .iter()
        .map(|(lang, t)| (lang.as_str(), t.model_used.as_str()))
        .collect();
    ctx.record_output(
        job,
        &json!({
            "languages": translations.keys().collect::<Vec<_>>(),
            "model_used": models,
        }),
    );
    ctx.log_system("translated", &job.case_identifier);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::test_support::*;
    use crate::pipeline::stages::{clean, summarize};

    #[test]
    fn test_translate_uses_stored_summary() {
        let fx = Fixture::new();
        fx.add_document("d1", "CRLP 12/2024", JUDGMENT);
        fx.run(clean, "d1", Stage::Extracted);
        fx.run(summarize, "d1", Stage::Cleaned);
        assert_eq!(fx.run(translate, "d1", Stage::Summarized), Stage::Translated);

        let stored = artifact_repo::find_artifact(&fx.ctx.db, "d1", ArtifactKind::Translation)
            .unwrap()
            .unwrap();
        let source = stored["source_text"].as_str().unwrap();
        assert!(source.contains("Key Points:\n1. Who filed the case: "));
        assert_eq!(stored["translations"]["hi"]["translated_text"], source);
        assert_eq!(stored["translations"]["te"]["model_used"], "english-fallback");

        let doc = fx.document("d1");
        assert!(doc.nlp_flags.translated);
        assert_eq!(
            fx.mirror_count("SELECT COUNT(*) FROM case_translations WHERE language_code = 'hi'"),
            1
        );
    }

    #[test]
    fn test_unsupported_languages_fall_back_to_english() {
        let mut fx = Fixture::new();
        fx.ctx.settings.target_languages = vec!["xx".to_string()];
        fx.add_document("d1", "CRLP 12/2024", JUDGMENT);
        fx.run(translate, "d1", Stage::Summarized);

        let stored = artifact_repo::find_artifact(&fx.ctx.db, "d1", ArtifactKind::Translation)
            .unwrap()
            .unwrap();
        assert_eq!(stored["translations"]["en"]["model_used"], "fallback");
        assert!(!stored["translations"]["en"]["translated_text"]
            .as_str()
            .unwrap()
            .is_empty());
    }
}
