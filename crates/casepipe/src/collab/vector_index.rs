use std::sync::RwLock;

use super::CollabError;

/// Nearest-neighbour search over chunk vectors, keyed by case identifier.
pub trait VectorIndex: Send + Sync {
    /// Appends vectors for a case.
    fn add_case(&self, case_identifier: &str, vectors: Vec<Vec<f32>>) -> Result<(), CollabError>;

    /// Drops every vector of a case, then adds `vectors`.
    fn replace_case(
        &self,
        case_identifier: &str,
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), CollabError>;

    /// Up to `k` distinct case identifiers, nearest first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<String>, CollabError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Brute-force L2 index held in memory.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<Vec<(String, Vec<f32>)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CollabError {
    CollabError::unavailable("vector index", "lock poisoned")
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

impl VectorIndex for InMemoryVectorIndex {
    fn add_case(&self, case_identifier: &str, vectors: Vec<Vec<f32>>) -> Result<(), CollabError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.extend(
            vectors
                .into_iter()
                .map(|v| (case_identifier.to_string(), v)),
        );
        Ok(())
    }

    fn replace_case(
        &self,
        case_identifier: &str,
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), CollabError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.retain(|(case, _)| case != case_identifier);
        entries.extend(
            vectors
                .into_iter()
                .map(|v| (case_identifier.to_string(), v)),
        );
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<String>, CollabError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut scored: Vec<(f32, &str)> = entries
            .iter()
            .map(|(case, v)| (l2_distance(query, v), case.as_str()))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut found: Vec<String> = Vec::new();
        for (_, case) in scored {
            if found.len() >= k {
                break;
            }
            if !found.iter().any(|c| c == case) {
                found.push(case.to_string());
            }
        }
        Ok(found)
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_orders_by_distance() {
        let index = InMemoryVectorIndex::new();
        index.add_case("near", vec![vec![0.1, 0.1]]).unwrap();
        index.add_case("far", vec![vec![0.9, 0.9]]).unwrap();
        index.add_case("near", vec![vec![0.2, 0.2]]).unwrap();

        let found = index.search(&[0.0, 0.0], 5).unwrap();
        assert_eq!(found, vec!["near", "far"]);
        assert_eq!(index.search(&[1.0, 1.0], 1).unwrap(), vec!["far"]);
    }

    #[test]
    fn test_replace_case_is_idempotent() {
        let index = InMemoryVectorIndex::new();
        index.replace_case("a", vec![vec![0.0], vec![1.0]]).unwrap();
        index.replace_case("a", vec![vec![0.0], vec![1.0]]).unwrap();
        index.add_case("b", vec![vec![0.5]]).unwrap();
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_empty_index() {
        let index = InMemoryVectorIndex::new();
        assert!(index.is_empty());
        assert!(index.search(&[0.0], 3).unwrap().is_empty());
    }
}
