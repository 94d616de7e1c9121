//! Error types

use thiserror::Error;

/// A raw seat token that cannot be bound to a (row, col) pair.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeatParseError {
    /// The token does not follow the `N排M座` shape.
    #[error("座位格式错误: {0}")]
    Malformed(String),
    /// Rows and columns are numbered from 1.
    #[error("座位编号无效: {0}")]
    ZeroIndex(String),
}

/// Invalid matcher or cascade configuration.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A score threshold fell outside [0, 1].
    #[error("threshold `{name}` must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    /// The ranked-list cutoff is stricter than the acceptance threshold,
    /// so an accepted match could never appear in the ranked list.
    #[error("candidate_cutoff ({cutoff}) exceeds min_match_score ({min_score})")]
    CutoffAboveMinScore { cutoff: f64, min_score: f64 },
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("invalid configuration json: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
