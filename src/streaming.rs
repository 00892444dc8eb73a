//! Streaming & progress contracts (§4.8, C8).
//!
//! Progress callbacks become typed events on async streams rather than
//! callback registration, per §9's "Callbacks and event emitters become
//! channels/streams" design note.

use serde::Serialize;

use crate::error::EngineError;

/// A named stage boundary the composer (C6) reports through, shared by
/// both the `onProgress` callback and the structured `tracing::info!`
/// events from §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Chunk,
    Embed,
    Store,
    Retrieve,
    Rerank,
    Generate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A single progress callback invocation (§4.6 `onProgress`).
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: Option<String>,
    pub completed: Option<usize>,
    pub total: Option<usize>,
}

/// §4.8 ingest streaming events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
    ChunkProcessed { processed: usize, total: usize },
    ChunkFailed { chunk_id: String, error: String },
    IngestComplete {
        total_chunks: usize,
        processed_chunks: usize,
        failed_chunks: usize,
    },
}

/// §4.8 query streaming events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    Token { token: String },
    Done,
}

/// A cooperative cancellation flag for streaming operations (§4.8,
/// §5 "Cancellation and timeouts"). Cloning shares the same underlying
/// flag, matching `tokio_util::sync::CancellationToken`'s shape but kept
/// minimal here since this crate only needs the "has cancellation fired"
/// query, not child-token trees.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl From<&EngineError> for IngestEvent {
    fn from(err: &EngineError) -> Self {
        IngestEvent::ChunkFailed {
            chunk_id: err.node_id.clone().unwrap_or_default(),
            error: err.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_token_reflects_latest_state() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn ingest_event_serializes_with_type_tag() {
        let event = IngestEvent::ChunkProcessed {
            processed: 1,
            total: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chunk_processed");
        assert_eq!(json["processed"], 1);
    }
}
