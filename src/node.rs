//! Node and graph data types (§3).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::error::Result;

pub type NodeId = String;
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What a node body receives, assembled by the scheduler from §4.3's input
/// rule: zero parents get the run seed, one parent gets its result
/// directly, N parents get an ordered list that preserves `inputs`
/// insertion order.
#[derive(Debug, Clone)]
pub enum NodeInput<T> {
    Seed(T),
    Single(T),
    Multi(Vec<Option<T>>),
}

impl<T> NodeInput<T> {
    /// Convenience for node bodies that only ever see a single predecessor
    /// or the seed and want to treat both uniformly.
    pub fn into_single(self) -> Option<T> {
        match self {
            NodeInput::Seed(v) | NodeInput::Single(v) => Some(v),
            NodeInput::Multi(_) => None,
        }
    }

    pub fn into_multi(self) -> Option<Vec<Option<T>>> {
        match self {
            NodeInput::Multi(v) => Some(v),
            _ => None,
        }
    }
}

pub type NodeFn<T> = Arc<dyn Fn(NodeInput<T>) -> BoxFuture<Result<T>> + Send + Sync>;

/// §3 `Node.options.retry`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay_ms: u64) -> Self {
        Self { retries, delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Options accepted by [`crate::engine::DagEngine::add_node`].
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub optional: bool,
    pub retry: RetryPolicy,
}

impl NodeOptions {
    pub fn optional() -> Self {
        Self {
            optional: true,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(retries: u32, delay_ms: u64) -> Self {
        Self {
            optional: false,
            retry: RetryPolicy::new(retries, delay_ms),
        }
    }
}

/// A unit of work in the DAG. `inputs`/`outputs` are mutated only through
/// [`crate::engine::DagEngine::connect`] so their insertion order, which
/// multi-parent input assembly depends on, stays under the engine's
/// control.
pub struct Node<T> {
    pub id: NodeId,
    pub(crate) run: NodeFn<T>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
    pub optional: bool,
    pub retry: RetryPolicy,
}

impl<T> Node<T> {
    pub fn new(id: impl Into<String>, run: NodeFn<T>, options: NodeOptions) -> Self {
        Self {
            id: id.into(),
            run,
            inputs: Vec::new(),
            outputs: Vec::new(),
            optional: options.optional,
            retry: options.retry,
        }
    }
}

/// A mapping from node id to [`Node`], insertion-ordered so that
/// "deterministic node-map iteration" (§8 property 2) is structural rather
/// than incidental.
pub type Graph<T> = IndexMap<NodeId, Node<T>>;
