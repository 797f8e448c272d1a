use chrono::Utc;
use serde_json::json;

use crate::db::{artifact_repo, format_timestamp};
use crate::document::{Document, DocumentPatch, ProcessingStatus};
use crate::error::{best_effort, StageError};
use crate::pipeline::context::StageContext;
use crate::pipeline::Stage;
use crate::queue::Job;

/// `chunked`: embeds every stored chunk, replaces the embedding metadata
/// and the case's vectors in the index, then links the nearest other
/// cases as similar.
pub fn embed(ctx: &StageContext, job: &Job, document: &Document) -> Result<Stage, StageError> {
    let next = Stage::Embedded;
    let embedder = &ctx.collaborators.embedder;
    let index = &ctx.collaborators.vector_index;
    let case = job.case_identifier.as_str();

    let chunks = artifact_repo::load_chunks(&ctx.db, &document.document_id)?;
    let mut chunk_indexes = Vec::with_capacity(chunks.len());
    let mut vectors = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        if let Some(vector) = embedder.embed(&chunk.text)? {
            chunk_indexes.push(chunk.chunk_index);
            vectors.push(vector);
        }
    }
    let embedded = vectors.len();

    let now = Utc::now();
    artifact_repo::replace_embeddings(
        &ctx.db,
        &document.document_id,
        case,
        &chunk_indexes,
        embedder.model_name(),
        embedder.dimension(),
        now,
    )?;
    ctx.ensure_lease()?;
    index.replace_case(case, vectors)?;

    let limit = ctx.settings.similar_cases_limit;
    let similar: Vec<String> = match embedder.embed(&ctx.clean_text(document))? {
        Some(query) => index
            .search(&query, limit + 1)?
            .into_iter()
            .filter(|other| other != case)
            .take(limit)
            .collect(),
        None => Vec::new(),
    };
    if let Some(case_id) = ctx.mirror_case_id(document) {
        best_effort(
            "mirror similar cases",
            ctx.mirror.replace_similar_cases(case_id, &similar),
        );
    }

    ctx.update_document(
        document,
        &DocumentPatch::new()
            .set("embedding.embedding_model", embedder.model_name())
            .set("embedding.vector_dimension", embedder.dimension() as u64)
            .set("embedding.stored_in_vector_db", embedded > 0)
            .set("embedding.embedded_at", format_timestamp(now))
            .flag("embedded")
            .status(ProcessingStatus::from(next)),
    )?;

    ctx.record_output(
        job,
        &json!({ "embedded_chunks": embedded, "similar_cases": similar }),
    );
    ctx.log_system("embedded", case);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::test_support::*;
    use crate::pipeline::stages::{chunk, clean};

    fn prepare(fx: &Fixture, id: &str, case_number: &str, text: &str) {
        fx.add_document(id, case_number, text);
        fx.run(clean, id, Stage::Extracted);
        fx.run(chunk, id, Stage::Translated);
    }

    #[test]
    fn test_embed_indexes_chunks() {
        let fx = Fixture::new();
        prepare(&fx, "d1", "CRLP 12/2024", JUDGMENT);
        assert_eq!(fx.run(embed, "d1", Stage::Chunked), Stage::Embedded);

        let doc = fx.document("d1");
        assert!(doc.nlp_flags.embedded);
        assert!(doc.embedding.stored_in_vector_db);
        assert_eq!(doc.embedding.vector_dimension, Some(16));
        assert_eq!(
            doc.embedding.embedding_model.as_deref(),
            Some("sha256-hash-fallback")
        );
        assert_eq!(artifact_repo::count_embeddings(&fx.ctx.db, "d1").unwrap(), 1);
        assert_eq!(fx.ctx.collaborators.vector_index.len(), 1);
    }

    #[test]
    fn test_embed_twice_replaces_vectors() {
        let fx = Fixture::new();
        prepare(&fx, "d1", "CRLP 12/2024", JUDGMENT);
        fx.run(embed, "d1", Stage::Chunked);
        fx.run(embed, "d1", Stage::Chunked);
        assert_eq!(artifact_repo::count_embeddings(&fx.ctx.db, "d1").unwrap(), 1);
        assert_eq!(fx.ctx.collaborators.vector_index.len(), 1);
    }

    #[test]
    fn test_similar_cases_link_other_cases() {
        let fx = Fixture::new();
        prepare(&fx, "d1", "CRLP 12/2024", JUDGMENT);
        prepare(&fx, "d2", "CRLP 13/2024", "Appeal dismissed for want of evidence.");
        fx.run(embed, "d1", Stage::Chunked);
        fx.run(embed, "d2", Stage::Chunked);

        let trail = artifact_repo::stage_outputs_for(&fx.ctx.db, "d2").unwrap();
        let output = &trail.last().unwrap().output;
        assert_eq!(output["similar_cases"][0], "CRLP 12/2024");
        assert_eq!(
            fx.mirror_count("SELECT COUNT(*) FROM similar_cases"),
            1
        );
    }
}
