//! Request types and priority ordering for the pending queue

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio::time::Instant;

use crate::context::ContextMessage;
use crate::core::error::SuggestionError;

/// Two-level priority class. HIGH means the message is currently visible
/// on screen and the user may be waiting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    High,
    Normal,
}

impl Priority {
    /// Rank used for queue ordering; lower dispatches first
    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.rank()
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Priority::High),
            1 => Ok(Priority::Normal),
            other => Err(format!("invalid priority value {}", other)),
        }
    }
}

/// Single-shot completion callback, invoked exactly once with either an
/// ordered option list or a typed failure.
pub type CompletionCallback = Box<dyn FnOnce(Result<Vec<String>, SuggestionError>) + Send>;

/// What to do with a request's outcome.
///
/// Requests restored from a snapshot have no living submitter, so they carry
/// the `Recovered` tag instead of a callback; their result only lands in the
/// result cache.
pub enum Completion {
    Live(CompletionCallback),
    Recovered,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Live(_) => f.write_str("Live(..)"),
            Completion::Recovered => f.write_str("Recovered"),
        }
    }
}

/// One unit of scheduled work, as handed in by the host application
#[derive(Debug)]
pub struct SuggestionRequest {
    /// Message text to answer
    pub content: String,

    /// Opaque identifier; present for messages that can be cached/persisted
    pub identifier: Option<String>,

    pub priority: Priority,

    /// Context snapshot attached at submission time, immutable afterward
    pub context: Vec<ContextMessage>,

    pub completion: Completion,
}

/// A queued request plus the scheduler-internal ordering and retry state
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub request: SuggestionRequest,

    /// Monotonic submission instant; FIFO tie-breaker within a class
    pub submitted_at: Instant,

    /// Wall-clock submission time, only for the durable snapshot
    pub submitted_at_ms: i64,

    /// Total order tie-breaker for equal instants
    pub seq: u64,
}

impl PendingRequest {
    /// Short preview of the request for monitoring output
    pub fn describe(&self) -> String {
        let preview: String = self.request.content.chars().take(32).collect();
        format!("{:?} \"{}\"", self.request.priority, preview)
    }

    pub fn is_persistable(&self) -> bool {
        self.request.priority == Priority::High && self.request.identifier.is_some()
    }
}

impl PartialEq for PendingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PendingRequest {}

impl PartialOrd for PendingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRequest {
    /// Max-heap order: HIGH before NORMAL, then earliest submission first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .request
            .priority
            .rank()
            .cmp(&self.request.priority.rank())
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
