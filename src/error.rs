//! Typed errors for the assertion core.

use thiserror::Error;

/// Errors raised by topology lookups and metric computation.
///
/// "Expectation not met" is never an error: assertions return `false`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedError {
    /// The task identity could not be resolved; the assertion object is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown topology level {level:?}")]
    UnknownLevel { level: String },

    #[error("node {node:?} not found in topology level {level:?}")]
    UnknownNode { level: String, node: Vec<u32> },

    #[error("index {index} out of range for topology level {level:?} (span {span})")]
    IndexOutOfRange {
        level: String,
        index: usize,
        span: usize,
    },

    /// A normalization or mean had nothing to divide by.
    #[error("degenerate metric: {0}")]
    DegenerateMetric(String),
}

pub type Result<T> = std::result::Result<T, SchedError>;
