use chrono::Utc;
use serde_json::json;

use crate::db::{artifact_repo, format_timestamp};
use crate::document::{Document, DocumentPatch, ProcessingStatus};
use crate::error::StageError;
use crate::pipeline::context::StageContext;
use crate::pipeline::Stage;
use crate::queue::Job;
use crate::text::chunk_words;

/// `translated`: splits the cleaned text into overlapping word windows and
/// replaces the document's chunk set.
pub fn chunk(ctx: &StageContext, job: &Job, document: &Document) -> Result<Stage, StageError> {
    let next = Stage::Chunked;
    let settings = &ctx.settings;
    let text = ctx.clean_text(document);
    let chunks = chunk_words(&text, settings.chunk_size, settings.chunk_overlap);

    let now = Utc::now();
    let stored = artifact_repo::replace_chunks(
        &ctx.db,
        &document.document_id,
        &job.case_identifier,
        &chunks,
        now,
    )?;

    ctx.update_document(
        document,
        &DocumentPatch::new()
            .set("chunking.chunk_count", stored as u64)
            .set("chunking.chunk_size", settings.chunk_size as u64)
            .set("chunking.overlap", settings.chunk_overlap as u64)
            .set("chunking.last_chunked_at", format_timestamp(now))
            .flag("chunks_created")
            .status(ProcessingStatus::from(next)),
    )?;

    ctx.record_output(job, &json!({ "chunk_count": stored }));
    ctx.log_system("chunked", &job.case_identifier);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::test_support::*;

    fn long_text(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_chunk_twice_yields_same_set() {
        let fx = Fixture::new();
        fx.add_document("d1", "CRLP 12/2024", &long_text(400));

        fx.run(chunk, "d1", Stage::Translated);
        let first = artifact_repo::load_chunks(&fx.ctx.db, "d1").unwrap();
        fx.run(chunk, "d1", Stage::Translated);
        let second = artifact_repo::load_chunks(&fx.ctx.db, "d1").unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);

        let doc = fx.document("d1");
        assert_eq!(doc.chunking.chunk_count, 3);
        assert_eq!(doc.chunking.chunk_size, Some(180));
        assert_eq!(doc.chunking.overlap, Some(40));
        assert!(doc.chunking.last_chunked_at.is_some());
        assert!(doc.nlp_flags.chunks_created);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let fx = Fixture::new();
        fx.add_document("d1", "CRLP 12/2024", "   ");
        fx.run(chunk, "d1", Stage::Translated);
        assert!(artifact_repo::load_chunks(&fx.ctx.db, "d1").unwrap().is_empty());
        assert_eq!(fx.document("d1").chunking.chunk_count, 0);
    }
}
