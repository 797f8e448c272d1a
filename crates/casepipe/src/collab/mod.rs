//! External collaborators the stages call into: summarization,
//! translation, embedding, vector search and outcome prediction.
//!
//! Each is a trait so a model-backed implementation can be swapped in. The
//! implementations shipped here are deterministic fallbacks that never
//! return empty output for non-empty input.

pub mod embedder;
pub mod predictor;
pub mod summarizer;
pub mod translator;
pub mod vector_index;

use std::sync::Arc;

use thiserror::Error;

pub use embedder::{Embedder, HashEmbedder};
pub use predictor::{KeywordPredictor, Prediction, Predictor};
pub use summarizer::{HeuristicSummarizer, KeyPoint, StructuredSummary, Summarizer};
pub use translator::{GlossaryTranslator, Translation, Translator};
pub use vector_index::{InMemoryVectorIndex, VectorIndex};

use crate::db::{artifact_repo, Database, DatabaseError};

#[derive(Error, Debug)]
pub enum CollabError {
    #[error("{name} unavailable: {message}")]
    Unavailable { name: String, message: String },
}

impl CollabError {
    pub fn unavailable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// The set of collaborators handed to every stage.
#[derive(Clone)]
pub struct Collaborators {
    pub summarizer: Arc<dyn Summarizer>,
    pub translator: Arc<dyn Translator>,
    pub embedder: Arc<dyn Embedder>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub predictor: Arc<dyn Predictor>,
}

impl Collaborators {
    /// Deterministic fallbacks for every collaborator.
    pub fn fallback(embedding_dimension: usize) -> Self {
        Self {
            summarizer: Arc::new(HeuristicSummarizer),
            translator: Arc::new(GlossaryTranslator),
            embedder: Arc::new(HashEmbedder::new(embedding_dimension)),
            vector_index: Arc::new(InMemoryVectorIndex::new()),
            predictor: Arc::new(KeywordPredictor),
        }
    }

    /// Re-embeds every stored chunk into the vector index so similarity
    /// search covers documents processed before this process started.
    /// Returns the number of vectors loaded.
    pub fn reload_vector_index(&self, db: &Database) -> Result<usize, DatabaseError> {
        let mut per_case: Vec<(String, Vec<Vec<f32>>)> = Vec::new();
        for chunk in artifact_repo::all_chunks(db)? {
            let vector = match self.embedder.embed(&chunk.text) {
                Ok(Some(vector)) => vector,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!(
                        "Skipping chunk {} of {}: {}",
                        chunk.chunk_index,
                        chunk.document_id,
                        e
                    );
                    continue;
                }
            };
            match per_case.last_mut() {
                Some((case, vectors)) if *case == chunk.case_identifier => vectors.push(vector),
                _ => per_case.push((chunk.case_identifier, vec![vector])),
            }
        }

        let mut loaded = 0;
        for (case, vectors) in per_case {
            loaded += vectors.len();
            if let Err(e) = self.vector_index.add_case(&case, vectors) {
                log::warn!("Failed to index case {}: {}", case, e);
            }
        }
        log::info!("Vector index loaded {} chunk vectors", loaded);
        Ok(loaded)
    }
}
