use sha2::{Digest, Sha256};

use super::CollabError;
use crate::text::truncate_words;

/// Words kept before embedding; a proxy for a transformer's token limit.
const MAX_WORDS: usize = 400;

/// Maps text to a fixed-size vector.
pub trait Embedder: Send + Sync {
    /// Returns `None` for blank input.
    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, CollabError>;

    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

/// Deterministic pseudo-embedding derived from the SHA-256 of the text.
///
/// Identical text always yields the identical vector, so re-running the
/// embedding stage reproduces the same index contents.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, CollabError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let truncated = truncate_words(trimmed, MAX_WORDS);
        let digest = Sha256::digest(truncated.as_bytes());
        let vector = (0..self.dimension)
            .map(|i| digest[i % digest.len()] as f32 / 255.0)
            .collect();
        Ok(Some(vector))
    }

    fn model_name(&self) -> &str {
        "sha256-hash-fallback"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_has_no_embedding() {
        let embedder = HashEmbedder::new(384);
        assert!(embedder.embed("   ").unwrap().is_none());
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let embedder = HashEmbedder::new(384);
        let a = embedder.embed("bail granted").unwrap().unwrap();
        let b = embedder.embed("  bail granted ").unwrap().unwrap();
        let c = embedder.embed("bail refused").unwrap().unwrap();
        assert_eq!(a.len(), 384);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_long_text_is_truncated() {
        let embedder = HashEmbedder::new(8);
        let base: Vec<String> = (0..400).map(|i| format!("w{}", i)).collect();
        let longer = format!("{} extra words", base.join(" "));
        assert_eq!(
            embedder.embed(&base.join(" ")).unwrap(),
            embedder.embed(&longer).unwrap()
        );
    }
}
