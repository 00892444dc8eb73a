//! Dependency-respecting, bounded-concurrency execution (§4.3, §5).
//!
//! The scheduler builds one async task per runnable node and lets `tokio`
//! drive them concurrently up to a `Semaphore`-enforced cap — never the
//! poll-every-10ms busy-wait the source hints at (REDESIGN FLAG #1). A
//! node becomes runnable only once every parent it needs has produced a
//! result (or, in graceful-degradation mode, has failed and is tolerated),
//! so independent branches overlap while dependent chains serialize
//! naturally through the wavefront loop below.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::error::{CauseError, EngineError, Result};
use crate::node::{Graph, NodeId, NodeInput};
use crate::retry::try_retry_with_backoff;
use crate::topology;

/// Normalized execution options (§3 `execution context.options`, §4.4
/// `execute` defaults). Construct via [`Default`] — which reads the
/// `RAG_MAX_CONCURRENCY`/`RAG_NODE_TIMEOUT` environment variables per
/// §6.3 — then override individual fields.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub concurrency: Option<usize>,
    pub timeout: Option<Duration>,
    pub continue_on_error: bool,
    pub enable_checkpoints: bool,
    pub checkpoint_id: Option<String>,
    pub required_nodes: Option<Vec<NodeId>>,
    pub return_format: ReturnFormat,
    pub retry_failed_nodes: bool,
    pub max_retries: Option<u32>,
    pub graceful_degradation: bool,
}

/// A hint for how the engine should shape its result; see
/// [`crate::engine::ExecutionResult`]. `Auto` (the default) follows §4.4's
/// shaping rules unconditionally; the other variants exist for callers
/// that want to assert their expectation and fail loudly if the run
/// doesn't match it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnFormat {
    #[default]
    Auto,
    Single,
    Multi,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrency: crate::env::max_concurrency(),
            timeout: crate::env::node_timeout(),
            continue_on_error: false,
            enable_checkpoints: false,
            checkpoint_id: None,
            required_nodes: None,
            return_format: ReturnFormat::default(),
            retry_failed_nodes: false,
            max_retries: Some(3),
            graceful_degradation: false,
        }
    }
}

/// What a scheduled node execution resolved to.
enum NodeFinish<T> {
    Success(T),
    /// §4.3: a non-critical (or `continueOnError`-tolerated) failure — the
    /// error is recorded, but the key stays absent from `results`.
    FailedOptional(EngineError),
    /// A critical failure that must halt the run.
    Failed(EngineError),
}

/// Raw scheduler output before [`crate::engine::DagEngine`] applies
/// result-shaping (§4.4).
pub struct RunRecord<T> {
    pub results: IndexMap<NodeId, T>,
    pub errors: IndexMap<NodeId, EngineError>,
}

/// Execute `nodes` to completion (or to a halting failure), feeding every
/// source node `seed`.
pub async fn execute<T>(nodes: &Graph<T>, seed: T, opts: &ExecuteOptions) -> Result<RunRecord<T>>
where
    T: Clone + Send + Sync + 'static,
{
    topology::validate_dag(nodes)?;

    let graph_execution_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("execute", graph_execution_id = %graph_execution_id);

    let (fwd, rev) = topology::build_adjacency(nodes);
    let order = topology::topo_sort(nodes)?;
    let sinks = topology::sink_ids(nodes);
    let backbone = topology::ancestors(&sinks, &rev);

    let effective_required: HashSet<NodeId> = match &opts.required_nodes {
        Some(explicit) => explicit.iter().cloned().collect(),
        None => backbone,
    };

    let sink_count = sinks.len();
    let semaphore = opts.concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));

    let run_fut = run_wavefront(
        nodes,
        &order,
        &fwd,
        seed,
        opts,
        &effective_required,
        sink_count,
        semaphore,
    )
    .instrument(span);

    match opts.timeout {
        Some(duration) => match tokio::time::timeout(duration, run_fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("execution timed out after {duration:?}");
                Err(EngineError::timeout())
            }
        },
        None => run_fut.await,
    }
}

pub(crate) enum Readiness<T> {
    Ready(NodeInput<T>),
    Blocked,
}

pub(crate) fn assemble_input<T: Clone>(
    parent_ids: &[NodeId],
    results: &IndexMap<NodeId, T>,
    seed: &T,
    graceful_degradation: bool,
) -> Readiness<T> {
    match parent_ids.len() {
        0 => Readiness::Ready(NodeInput::Seed(seed.clone())),
        1 => match results.get(&parent_ids[0]) {
            Some(v) => Readiness::Ready(NodeInput::Single(v.clone())),
            None => Readiness::Blocked,
        },
        _ => {
            let mut values = Vec::with_capacity(parent_ids.len());
            for p in parent_ids {
                match results.get(p) {
                    Some(v) => values.push(Some(v.clone())),
                    None if graceful_degradation => values.push(None),
                    None => return Readiness::Blocked,
                }
            }
            Readiness::Ready(NodeInput::Multi(values))
        }
    }
}

pub(crate) fn clone_input<T: Clone>(input: &NodeInput<T>) -> NodeInput<T> {
    match input {
        NodeInput::Seed(v) => NodeInput::Seed(v.clone()),
        NodeInput::Single(v) => NodeInput::Single(v.clone()),
        NodeInput::Multi(v) => NodeInput::Multi(v.clone()),
    }
}

/// §4.3's criticality rule, consolidating the source's `optional`,
/// `isOptional`, and `critical==false` aliases into the single `optional`
/// field on [`crate::node::Node`] (see DESIGN.md).
fn is_non_critical(
    optional: bool,
    opts: &ExecuteOptions,
    id: &str,
    is_sink: bool,
    sink_count: usize,
) -> bool {
    optional
        || (opts.graceful_degradation
            && opts
                .required_nodes
                .as_ref()
                .map(|req| !req.iter().any(|r| r == id))
                .unwrap_or(false))
        || (sink_count >= 2 && is_sink)
}

#[allow(clippy::too_many_arguments)]
async fn run_wavefront<T>(
    nodes: &Graph<T>,
    order: &[NodeId],
    fwd: &IndexMap<NodeId, Vec<NodeId>>,
    seed: T,
    opts: &ExecuteOptions,
    required_ids: &HashSet<NodeId>,
    sink_count: usize,
    semaphore: Option<Arc<Semaphore>>,
) -> Result<RunRecord<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let mut results: IndexMap<NodeId, T> = IndexMap::new();
    let mut errors: IndexMap<NodeId, EngineError> = IndexMap::new();
    let mut pending: Vec<NodeId> = order.to_vec();
    let mut in_flight: FuturesUnordered<tokio::task::JoinHandle<(NodeId, NodeFinish<T>)>> =
        FuturesUnordered::new();

    loop {
        // Dispatch every currently-ready node; repeat until a full pass makes
        // no progress, since dispatching one node can't unblock another
        // pending one within the same pass (all deps come from `results`,
        // which only changes when an in-flight task completes).
        let mut still_pending = Vec::with_capacity(pending.len());
        for id in pending.drain(..) {
            let node = &nodes[&id];
            match assemble_input(&node.inputs, &results, &seed, opts.graceful_degradation) {
                Readiness::Ready(input) => {
                    let is_sink = fwd.get(&id).map(|c| c.is_empty()).unwrap_or(true);
                    let non_critical = is_non_critical(node.optional, opts, &id, is_sink, sink_count);
                    let tolerated =
                        non_critical || (opts.continue_on_error && !required_ids.contains(&id));
                    let downstream = fwd.get(&id).cloned().unwrap_or_default();

                    let run = node.run.clone();
                    let retries = if opts.retry_failed_nodes {
                        opts.max_retries.unwrap_or(3)
                    } else {
                        node.retry.retries
                    };
                    let delay = node.retry.delay();
                    let node_id = id.clone();
                    let permit_semaphore = semaphore.clone();

                    in_flight.push(tokio::spawn(async move {
                        let _permit = match &permit_semaphore {
                            Some(s) => Some(s.clone().acquire_owned().await),
                            None => None,
                        };

                        let span = tracing::info_span!("execute_node", node_id = %node_id);
                        let _enter = span.enter();

                        let (attempt_result, _attempts) =
                            try_retry_with_backoff(retries, delay, |_attempt| {
                                let run = run.clone();
                                let input = clone_input(&input);
                                async move { (run.as_ref())(input).await }
                            })
                            .await;

                        match attempt_result {
                            Ok(value) => (node_id, NodeFinish::Success(value)),
                            Err(cause) => {
                                let cause_msg = cause.message.clone();
                                let original_cause = cause
                                    .cause
                                    .clone()
                                    .unwrap_or_else(|| CauseError::from_message(cause_msg));
                                let enriched = EngineError::node_failed(
                                    node_id.clone(),
                                    original_cause,
                                    &downstream,
                                );
                                if tolerated {
                                    tracing::warn!(
                                        "Non-critical node failure: {}",
                                        enriched.message
                                    );
                                    (node_id, NodeFinish::FailedOptional(enriched))
                                } else {
                                    (node_id, NodeFinish::Failed(enriched))
                                }
                            }
                        }
                    }));
                }
                Readiness::Blocked => still_pending.push(id),
            }
        }
        pending = still_pending;

        if in_flight.is_empty() {
            if pending.is_empty() {
                break;
            }
            // Every remaining pending node is blocked on a dependency that
            // will never resolve (its producer failed and was dropped, or
            // never became ready itself). Drop them silently.
            pending.clear();
            continue;
        }

        let (id, outcome) = in_flight
            .next()
            .await
            .expect("in_flight non-empty")
            .expect("node task panicked");

        match outcome {
            NodeFinish::Success(value) => {
                results.insert(id, value);
            }
            NodeFinish::FailedOptional(err) => {
                errors.insert(id, err);
            }
            NodeFinish::Failed(err) => {
                errors.insert(id.clone(), err.clone());
                return Err(err);
            }
        }
    }

    Ok(RunRecord { results, errors })
}
