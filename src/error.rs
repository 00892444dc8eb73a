//! Enriched error values shared by the topology, scheduler, and engine
//! facade.
//!
//! Rather than a hierarchy of exception types, every failure in this crate
//! is represented by a single [`EngineError`] value carrying optional
//! structured context (`node_id`, `timestamp`, `cause`, `cycle`, `errors`).
//! This mirrors how the failure is actually consumed downstream: callers
//! pattern-match on the fields they care about instead of catching a
//! specific subclass.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// A type-erased cause, wrapping whatever error a node's `run` function
/// returned. Cloneable via `Arc` sharing so [`EngineError`] itself stays
/// `Clone`, which checkpoint round-tripping (see [`crate::engine`]) depends
/// on.
#[derive(Debug, Clone)]
pub struct CauseError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl CauseError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self(Arc::new(MessageError(message.into())))
    }
}

impl fmt::Display for CauseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CauseError {}

impl PartialEq for CauseError {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_string() == other.0.to_string()
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MessageError {}

/// A uniformly-shaped enriched error. See module docs for why this is a
/// single struct rather than an enum of error kinds: the scheduler,
/// topology module, and engine facade all enrich/wrap/aggregate the same
/// shape rather than matching on a closed set of variants.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub node_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[source]
    pub cause: Option<CauseError>,
    pub cycle: Option<Vec<String>>,
    pub errors: Option<Vec<EngineError>>,
}

impl EngineError {
    fn bare(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: None,
            timestamp: None,
            cause: None,
            cycle: None,
            errors: None,
        }
    }

    /// §4.1 `create(nodeId, cause, { downstream, timestamp })`.
    pub fn node_failed(
        node_id: impl Into<String>,
        cause: CauseError,
        downstream: &[String],
    ) -> Self {
        let node_id = node_id.into();
        let mut message = format!("Node {node_id} execution failed: {cause}");
        if !downstream.is_empty() {
            message.push_str(&format!(
                ". This affects downstream nodes: {}",
                downstream.join(", ")
            ));
        }
        Self {
            message,
            node_id: Some(node_id),
            timestamp: Some(Utc::now()),
            cause: Some(cause),
            cycle: None,
            errors: None,
        }
    }

    /// §4.1 `aggregate(errorsById)`.
    ///
    /// `None` for an empty input, the sole error unchanged for a single
    /// entry, and a combined `"Multiple execution errors"` value for two or
    /// more.
    pub fn aggregate(errors: Vec<EngineError>) -> Option<EngineError> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            _ => {
                let sub_errors = errors
                    .into_iter()
                    .map(|e| e.cause_or_self())
                    .collect::<Vec<_>>();
                Some(Self {
                    message: "Multiple execution errors".to_string(),
                    node_id: None,
                    timestamp: Some(Utc::now()),
                    cause: None,
                    cycle: None,
                    errors: Some(sub_errors),
                })
            }
        }
    }

    /// Helper for [`Self::aggregate`]: an error's `cause` if present,
    /// otherwise the error itself, matching §4.1's "each error's cause (or
    /// the error itself if no cause)".
    fn cause_or_self(self) -> EngineError {
        if let Some(cause) = &self.cause {
            let mut e = EngineError::bare(cause.to_string());
            e.node_id = self.node_id;
            e.timestamp = self.timestamp;
            e
        } else {
            self
        }
    }

    /// §4.1 `preserveContext(src, extra?)`.
    pub fn preserve_context(src: &EngineError, extra: Option<ExtraContext>) -> Self {
        let mut out = Self {
            message: src.message.clone(),
            node_id: src.node_id.clone(),
            timestamp: src.timestamp,
            cause: src.cause.clone(),
            cycle: src.cycle.clone(),
            errors: src.errors.clone(),
        };
        if let Some(extra) = extra {
            if out.node_id.is_none() {
                out.node_id = extra.node_id;
            }
            if out.timestamp.is_none() {
                out.timestamp = extra.timestamp;
            }
        }
        out
    }

    /// §4.1 `createCycleError(path)`.
    pub fn cycle(path: Vec<String>) -> Self {
        Self {
            message: format!("Cycle detected involving node: {}", path.join(" -> ")),
            node_id: None,
            timestamp: Some(Utc::now()),
            cause: None,
            cycle: Some(path),
            errors: None,
        }
    }

    pub fn empty_dag() -> Self {
        Self::bare("DAG is empty - no nodes to execute")
    }

    pub fn no_sink() -> Self {
        Self::bare("DAG has no sink nodes - no final output available")
    }

    pub fn timeout() -> Self {
        Self::bare("Execution timeout")
    }

    pub fn already_exists(node_id: impl Into<String>) -> Self {
        let id = node_id.into();
        Self::bare(format!("Node {id} already exists"))
    }

    pub fn no_run_function(node_id: impl Into<String>) -> Self {
        let id = node_id.into();
        Self::bare(format!("Node {id} has no run function"))
    }

    pub fn unknown_node(node_id: impl Into<String>) -> Self {
        let id = node_id.into();
        Self::bare(format!("Unknown node: {id}"))
    }

    pub fn self_loop() -> Self {
        Self::bare("Self-loop detected")
    }

    pub fn self_loop_rejected(node_id: impl Into<String>) -> Self {
        let id = node_id.into();
        Self::bare(format!("Cannot connect node {id} to itself"))
    }

    pub fn cannot_be_empty() -> Self {
        Self::bare("DAG cannot be empty")
    }

    pub fn orphaned_node(node_id: impl Into<String>) -> Self {
        let id = node_id.into();
        Self::bare(format!("Orphaned node detected: {id}"))
    }

    pub fn plugin_not_found(stage: impl fmt::Display, name: impl fmt::Display) -> Self {
        Self::bare(format!("plugin not found: {stage}/{name}"))
    }

    /// `validateDAG`'s re-throw of a `topoSort` cycle failure: §4.2.
    pub fn dag_validation_failed(inner: EngineError) -> Self {
        Self {
            message: format!(
                "DAG validation failed: DAG topological sort failed: {}",
                inner.message
            ),
            node_id: None,
            timestamp: inner.timestamp,
            cause: None,
            cycle: inner.cycle,
            errors: None,
        }
    }

    /// The development-tooling `validateTopology`'s own cycle message,
    /// distinct from `validateDAG`'s: §4.2.
    pub fn topology_cycle(inner: &EngineError) -> Self {
        Self {
            message: "Cycle detected in DAG".to_string(),
            node_id: None,
            timestamp: inner.timestamp,
            cause: None,
            cycle: inner.cycle.clone(),
            errors: None,
        }
    }

    /// §4.1 `wrapExecution(err)` policy table.
    pub fn wrap_execution(err: EngineError) -> EngineError {
        let is_node_error = err.node_id.is_some() || err.message.starts_with("Node ");
        if is_node_error {
            return err;
        }

        let is_cycle_or_validation_or_aggregate = err.cycle.is_some()
            || err.message.starts_with("DAG validation failed")
            || err.errors.is_some();
        if is_cycle_or_validation_or_aggregate {
            return Self {
                message: format!("DAG execution failed: {}", err.message),
                node_id: err.node_id,
                timestamp: err.timestamp,
                cause: None,
                cycle: err.cycle,
                errors: err.errors,
            };
        }

        if err.message == "Execution timeout"
            || err.message == "DAG has no sink nodes - no final output available"
        {
            return err;
        }

        Self {
            message: format!("DAG execution failed: {}", err.message),
            node_id: err.node_id,
            timestamp: err.timestamp,
            cause: None,
            cycle: err.cycle,
            errors: err.errors,
        }
    }

    /// §4.1 `shouldHaltExecution`.
    pub fn should_halt_execution(
        err: &EngineError,
        continue_on_error: bool,
        is_non_critical: bool,
    ) -> bool {
        if err.cycle.is_some() || err.message.starts_with("DAG validation failed") {
            return true;
        }
        if err.message == "Execution timeout" {
            return true;
        }
        if err.node_id.is_some() && !is_non_critical && !continue_on_error {
            return true;
        }
        false
    }

    pub fn serialize(&self) -> SerializedError {
        SerializedError::from(self)
    }
}

/// Fields a caller may ask [`EngineError::preserve_context`] to backfill,
/// but only where the source error doesn't already have them set.
#[derive(Debug, Clone, Default)]
pub struct ExtraContext {
    pub node_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A flattened, `Serialize`-able view of an [`EngineError`] for log sinks
/// and RPC boundaries. §4.1 `serialize`: the cause chain is cut to depth 1.
#[derive(Debug, Clone, Serialize)]
pub struct SerializedError {
    pub message: String,
    pub node_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub cause: Option<SerializedCause>,
    pub cycle: Option<Vec<String>>,
    pub errors: Option<Vec<SerializedCause>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SerializedCause {
    pub message: String,
    pub stack: Option<String>,
}

impl From<&EngineError> for SerializedError {
    fn from(err: &EngineError) -> Self {
        Self {
            message: err.message.clone(),
            node_id: err.node_id.clone(),
            timestamp: err.timestamp,
            cause: err.cause.as_ref().map(|c| SerializedCause {
                message: c.to_string(),
                stack: None,
            }),
            cycle: err.cycle.clone(),
            errors: err.errors.as_ref().map(|errs| {
                errs.iter()
                    .map(|e| SerializedCause {
                        message: e.message.clone(),
                        stack: None,
                    })
                    .collect()
            }),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
