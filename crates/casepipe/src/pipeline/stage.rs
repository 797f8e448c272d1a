//! The fixed, forward-only sequence of processing stages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One step of the document-processing sequence.
///
/// A job's stage names the step that is about to run. Variants are
/// declared in pipeline order, so the derived `Ord` is the transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Uploaded,
    Extracted,
    Cleaned,
    Summarized,
    Translated,
    Chunked,
    Embedded,
    Predicted,
    Completed,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; 9] = [
        Stage::Uploaded,
        Stage::Extracted,
        Stage::Cleaned,
        Stage::Summarized,
        Stage::Translated,
        Stage::Chunked,
        Stage::Embedded,
        Stage::Predicted,
        Stage::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Uploaded => "uploaded",
            Stage::Extracted => "extracted",
            Stage::Cleaned => "cleaned",
            Stage::Summarized => "summarized",
            Stage::Translated => "translated",
            Stage::Chunked => "chunked",
            Stage::Embedded => "embedded",
            Stage::Predicted => "predicted",
            Stage::Completed => "completed",
        }
    }

    /// The stage that follows this one, or `None` for `Completed`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Uploaded => Some(Stage::Extracted),
            Stage::Extracted => Some(Stage::Cleaned),
            Stage::Cleaned => Some(Stage::Summarized),
            Stage::Summarized => Some(Stage::Translated),
            Stage::Translated => Some(Stage::Chunked),
            Stage::Chunked => Some(Stage::Embedded),
            Stage::Embedded => Some(Stage::Predicted),
            Stage::Predicted => Some(Stage::Completed),
            Stage::Completed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Completed
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage '{}'", self.0)
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_follows_pipeline() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(Stage::Completed.next(), None);
    }

    #[test]
    fn test_parse_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("failed".parse::<Stage>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Stage::Summarized).unwrap();
        assert_eq!(json, "\"summarized\"");
    }
}
