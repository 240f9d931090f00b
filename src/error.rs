//! Error types shared by the HTTP layer, the parser and the pipeline.
//!
//! All errors are `Clone` because a failure observed by one worker has to be
//! re-queued for its siblings and forwarded to the next stage.

use thiserror::Error;

use crate::activity::ApiFault;

/// Normalized failure returned by the HTTP wrapper.
///
/// Transient statuses are retried inside the wrapper, so callers only ever see
/// them once the retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestFailure {
    /// A transient status (429/5xx) persisted for every attempt.
    #[error("HTTP {status} {reason} (gave up after {attempts} attempts)")]
    RetriesExhausted {
        status: u16,
        reason: String,
        attempts: u32,
    },
    /// A non-transient status; never retried.
    #[error("HTTP {status} {reason}")]
    Rejected { status: u16, reason: String },
    /// Connection, timeout or body download error.
    #[error("request error: {0}")]
    Transport(String),
    /// The body was not the JSON shape the caller expected.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RequestFailure {
    /// HTTP status carried by the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RetriesExhausted { status, .. } | Self::Rejected { status, .. } => Some(*status),
            Self::Transport(_) | Self::Malformed(_) => None,
        }
    }

    /// True when the failure came from exhausting retries on a transient condition.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. } | Self::Transport(_))
    }
}

/// Failure to turn one raw activity into a parsed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("activity {id:?} has no start timestamp")]
    MissingTimestamp { id: Option<u64> },
    #[error("activity {id:?} has an unreadable start timestamp {value:?}")]
    InvalidTimestamp { id: Option<u64>, value: String },
}

/// Run-level failure surfaced by [`crate::pipeline::Pipeline::ingest`].
///
/// Any of these aborts the run; batches parsed before the failure are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("activity request failed: {0}")]
    Request(#[from] RequestFailure),
    #[error("activity page could not be parsed: {0}")]
    Parse(#[from] ParseError),
    #[error("activities endpoint returned an error object: {0}")]
    Api(ApiFault),
    #[error("{stage} stage closed its queue without a terminal signal")]
    Disconnected { stage: &'static str },
    #[error("a {stage} worker panicked")]
    WorkerPanicked { stage: &'static str },
    #[error("failed to spawn {stage} worker: {reason}")]
    Spawn { stage: &'static str, reason: String },
}
