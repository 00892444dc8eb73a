//! Environment variable overrides (§6.3). This is the only module that
//! reads the process environment; everything else takes configuration as
//! explicit values so call sites stay testable without env mutation.

use std::time::Duration;

const DEFAULT_NODE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_EMBEDDER_BATCH_SIZE: usize = 32;
const DEFAULT_RETRIEVER_BATCH_SIZE: usize = 16;

fn read_usize(var: &str, default: usize) -> usize {
    match std::env::var(var) {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("ignoring malformed {var}={raw:?}, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

/// `RAG_MAX_CONCURRENCY` — the scheduler's semaphore width. Absent or
/// malformed both mean unbounded (`None`, read by `scheduler::execute` as
/// "no semaphore"), matching §4.4's `env[RAG_MAX_CONCURRENCY] as int or
/// unbounded` default.
pub fn max_concurrency() -> Option<usize> {
    match std::env::var("RAG_MAX_CONCURRENCY") {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("ignoring malformed RAG_MAX_CONCURRENCY={raw:?}, defaulting to unbounded");
                None
            }
        },
        Err(_) => None,
    }
}

/// `RAG_NODE_TIMEOUT`, in milliseconds.
pub fn node_timeout() -> Option<Duration> {
    Some(Duration::from_millis(
        read_usize("RAG_NODE_TIMEOUT", DEFAULT_NODE_TIMEOUT_MS as usize) as u64,
    ))
}

/// `RAG_EMBEDDER_BATCH_SIZE`, read by the pipeline composer (C6) when
/// batching chunks into embedder calls.
pub fn embedder_batch_size() -> usize {
    read_usize("RAG_EMBEDDER_BATCH_SIZE", DEFAULT_EMBEDDER_BATCH_SIZE)
}

/// `RAG_RETRIEVER_BATCH_SIZE`, read by the pipeline composer (C6) when
/// batching queries into retriever calls.
pub fn retriever_batch_size() -> usize {
    read_usize("RAG_RETRIEVER_BATCH_SIZE", DEFAULT_RETRIEVER_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_vars_are_absent() {
        std::env::remove_var("RAG_MAX_CONCURRENCY");
        std::env::remove_var("RAG_NODE_TIMEOUT");
        assert_eq!(max_concurrency(), None);
        assert_eq!(
            node_timeout(),
            Some(Duration::from_millis(DEFAULT_NODE_TIMEOUT_MS))
        );
    }

    #[test]
    fn max_concurrency_honors_a_valid_override() {
        std::env::set_var("RAG_MAX_CONCURRENCY", "9");
        assert_eq!(max_concurrency(), Some(9));
        std::env::remove_var("RAG_MAX_CONCURRENCY");
    }

    #[test]
    fn max_concurrency_falls_back_to_unbounded_on_malformed_value() {
        std::env::set_var("RAG_MAX_CONCURRENCY", "not-a-number");
        assert_eq!(max_concurrency(), None);
        std::env::remove_var("RAG_MAX_CONCURRENCY");
    }

    #[test]
    fn malformed_value_falls_back_to_default() {
        std::env::set_var("RAG_EMBEDDER_BATCH_SIZE", "not-a-number");
        assert_eq!(embedder_batch_size(), DEFAULT_EMBEDDER_BATCH_SIZE);
        std::env::remove_var("RAG_EMBEDDER_BATCH_SIZE");
    }

    #[test]
    fn valid_override_is_honored() {
        std::env::set_var("RAG_RETRIEVER_BATCH_SIZE", "7");
        assert_eq!(retriever_batch_size(), 7);
        std::env::remove_var("RAG_RETRIEVER_BATCH_SIZE");
    }
}
