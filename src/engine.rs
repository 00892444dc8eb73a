//! The DAG engine facade (§4.4, C4): the public surface most callers touch
//! directly, on top of the topology (§4.2) and scheduler (§4.3) internals.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::node::{Node, NodeFn, NodeId, NodeOptions};
use crate::scheduler::{self, ExecuteOptions, ReturnFormat};
use crate::topology;

/// The result of a completed [`DagEngine::execute`] call — a typed
/// replacement for the source's dynamic "sometimes a value, sometimes a
/// record with hidden helper methods" return shape (§9 Design Notes,
/// "Result shape").
#[derive(Debug, Clone)]
pub enum ExecutionResult<T> {
    /// Exactly one sink succeeded and no shaping flag forced a multi-sink
    /// record: its value, unwrapped.
    Single(T),
    /// Two or more sinks succeeded, or a shaping flag
    /// (`graceful_degradation`/`retry_failed_nodes`) was set. Keyed by sink
    /// id, with lookups across *all* node results (not just sinks) via
    /// [`MultiSinkResult::get`]/[`MultiSinkResult::has`].
    Multi(MultiSinkResult<T>),
}

impl<T> ExecutionResult<T> {
    /// Unwraps [`Self::Single`], or the first sink value in
    /// [`Self::Multi`] if present — a convenience for callers that know
    /// their graph has exactly one sink but ran with a shaping flag set.
    pub fn into_single(self) -> Option<T> {
        match self {
            ExecutionResult::Single(v) => Some(v),
            ExecutionResult::Multi(m) => m.sinks.into_iter().next().map(|(_, v)| v),
        }
    }
}

/// The record shape for §8 property 5 ("multi-sink shape"): one entry per
/// successful sink, plus lookups across the full result set.
#[derive(Debug, Clone)]
pub struct MultiSinkResult<T> {
    pub sinks: IndexMap<NodeId, T>,
    all: IndexMap<NodeId, T>,
    pub errors: IndexMap<NodeId, EngineError>,
}

impl<T> MultiSinkResult<T> {
    pub fn get(&self, id: &str) -> Option<&T> {
        self.all.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.all.contains_key(id)
    }
}

/// An in-memory snapshot of a partial execution (§4.4 `saveCheckpoint`).
#[derive(Debug, Clone)]
pub struct CheckpointData<T> {
    pub completed: Vec<NodeId>,
    pub results: IndexMap<NodeId, T>,
    pub errors: IndexMap<NodeId, EngineError>,
    pub timestamp: DateTime<Utc>,
}

/// What `listCheckpoints` reports, without requiring callers to pull the
/// (potentially large) result/error payloads.
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub id: String,
    pub result_count: usize,
    pub error_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// The public DAG facade. Generic over the value type `T` flowing through
/// every node.
pub struct DagEngine<T> {
    nodes: crate::node::Graph<T>,
    checkpoints: Mutex<IndexMap<String, CheckpointData<T>>>,
}

impl<T> Default for DagEngine<T> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
            checkpoints: Mutex::new(IndexMap::new()),
        }
    }
}

impl<T> DagEngine<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.4 `addNode`.
    pub fn add_node(&mut self, id: impl Into<String>, run: NodeFn<T>, options: NodeOptions) -> Result<()> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(EngineError::already_exists(id));
        }
        self.nodes.insert(id.clone(), Node::new(id, run, options));
        Ok(())
    }

    /// §4.4 `connect`. Self-loops are rejected here, at connect time, per
    /// §9's "cyclic/back-edge protection" note — cycles through other
    /// nodes are still only caught at `validate`/`execute` time, which
    /// needs the full graph to detect.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(EngineError::self_loop_rejected(from));
        }
        if !self.nodes.contains_key(from) {
            return Err(EngineError::unknown_node(from));
        }
        if !self.nodes.contains_key(to) {
            return Err(EngineError::unknown_node(to));
        }
        self.nodes.get_mut(from).unwrap().outputs.push(to.to_string());
        self.nodes.get_mut(to).unwrap().inputs.push(from.to_string());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        topology::validate_dag(&self.nodes)
    }

    pub fn validate_topology(&self, strict: bool) -> Result<Vec<String>> {
        topology::validate_topology(&self.nodes, strict)
    }

    pub fn topo_sort(&self) -> Result<Vec<NodeId>> {
        topology::topo_sort(&self.nodes)
    }

    pub fn get_downstream_nodes(&self, id: &str) -> Vec<NodeId> {
        topology::downstream_nodes(&self.nodes, id)
    }

    /// §4.4 `execute`. Unlike the source, `seed` and `options` are always
    /// two explicit parameters — Rust has no ergonomic reason to sniff an
    /// options record out of the first argument's shape (§9 resolves this
    /// as an intentional Open Question deviation; see DESIGN.md).
    pub async fn execute(&self, seed: T, opts: ExecuteOptions) -> Result<ExecutionResult<T>> {
        let run_result = scheduler::execute(&self.nodes, seed, &opts).await;
        let record = match run_result {
            Ok(record) => record,
            Err(e) => return Err(EngineError::wrap_execution(e)),
        };

        self.shape_result(record, &opts)
    }

    fn shape_result(
        &self,
        record: scheduler::RunRecord<T>,
        opts: &ExecuteOptions,
    ) -> Result<ExecutionResult<T>> {
        let scheduler::RunRecord { results, errors } = record;

        if errors.len() >= 2 {
            let agg = EngineError::aggregate(errors.into_values().collect())
                .expect("len >= 2 implies Some");
            return Err(EngineError::wrap_execution(agg));
        }

        let sinks = topology::sink_ids(&self.nodes);
        if sinks.is_empty() {
            return Err(single_error_or_no_sink(errors));
        }

        let successful: IndexMap<NodeId, T> = sinks
            .iter()
            .filter_map(|id| results.get(id).map(|v| (id.clone(), v.clone())))
            .collect();
        if successful.is_empty() {
            return Err(single_error_or_no_sink(errors));
        }

        if opts.enable_checkpoints {
            if let Some(checkpoint_id) = &opts.checkpoint_id {
                self.save_checkpoint(
                    checkpoint_id,
                    CheckpointData {
                        completed: results.keys().cloned().collect(),
                        results: results.clone(),
                        errors: errors.clone(),
                        timestamp: Utc::now(),
                    },
                );
            }
        }

        let force_multi = opts.graceful_degradation || opts.retry_failed_nodes || successful.len() >= 2;
        let shape_multi = match opts.return_format {
            ReturnFormat::Single => false,
            ReturnFormat::Multi => true,
            ReturnFormat::Auto => force_multi,
        };

        if shape_multi {
            return Ok(ExecutionResult::Multi(MultiSinkResult {
                sinks: successful,
                all: results,
                errors,
            }));
        }

        Ok(ExecutionResult::Single(
            successful.into_iter().next().map(|(_, v)| v).unwrap(),
        ))
    }

    /// §4.4 `resume`. Best-effort: a node failing during resume is logged
    /// and skipped, never thrown — the checkpoint's caller already decided
    /// the run was worth continuing with partial results.
    pub async fn resume(&self, checkpoint: &CheckpointData<T>) -> Result<IndexMap<NodeId, T>>
    where
        T: Default,
    {
        topology::validate_dag(&self.nodes)?;
        let order = topology::topo_sort(&self.nodes)?;
        let completed: std::collections::HashSet<&NodeId> = checkpoint.completed.iter().collect();

        let mut results = checkpoint.results.clone();
        let seed = T::default();

        for id in &order {
            if completed.contains(id) {
                continue;
            }
            let node = &self.nodes[id];
            let readiness = scheduler::assemble_input(&node.inputs, &results, &seed, true);
            let input = match readiness {
                scheduler::Readiness::Ready(input) => input,
                scheduler::Readiness::Blocked => continue,
            };

            let (attempt, _attempts) = crate::retry::try_retry_with_backoff(
                node.retry.retries,
                node.retry.delay(),
                |_attempt| {
                    let run = node.run.clone();
                    let input = scheduler::clone_input(&input);
                    async move { (run.as_ref())(input).await }
                },
            )
            .await;

            match attempt {
                Ok(value) => {
                    results.insert(id.clone(), value);
                }
                Err(err) => {
                    tracing::warn!("Node {id} failed during resume: {}", err.message);
                }
            }
        }

        Ok(results)
    }

    pub fn save_checkpoint(&self, id: &str, data: CheckpointData<T>) {
        self.checkpoints.lock().insert(id.to_string(), data);
    }

    pub fn load_checkpoint(&self, id: &str) -> Option<CheckpointData<T>>
    where
        T: Clone,
    {
        self.checkpoints.lock().get(id).cloned()
    }

    pub fn list_checkpoints(&self) -> Vec<CheckpointSummary> {
        self.checkpoints
            .lock()
            .iter()
            .map(|(id, data)| CheckpointSummary {
                id: id.clone(),
                result_count: data.results.len(),
                error_count: data.errors.len(),
                timestamp: data.timestamp,
            })
            .collect()
    }

    pub fn clear_checkpoint(&self, id: &str) {
        self.checkpoints.lock().shift_remove(id);
    }
}

fn single_error_or_no_sink(errors: IndexMap<NodeId, EngineError>) -> EngineError {
    if errors.len() == 1 {
        errors.into_values().next().unwrap()
    } else {
        EngineError::no_sink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeInput;
    use std::sync::Arc;

    fn string_node(id: &str, suffix: &'static str) -> NodeFn<String> {
        Arc::new(move |input: NodeInput<String>| {
            Box::pin(async move { Ok(format!("{}{}", input.into_single().unwrap_or_default(), suffix)) })
        })
    }

    #[tokio::test]
    async fn linear_chain_returns_single_sink_value() {
        let mut engine: DagEngine<String> = DagEngine::new();
        engine.add_node("A", string_node("A", "-A"), NodeOptions::default()).unwrap();
        engine.add_node("B", string_node("B", "-B"), NodeOptions::default()).unwrap();
        engine.add_node("C", string_node("C", "-C"), NodeOptions::default()).unwrap();
        engine.connect("A", "B").unwrap();
        engine.connect("B", "C").unwrap();

        let result = engine
            .execute("seed".to_string(), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.into_single().unwrap(), "seed-A-B-C");
    }

    #[tokio::test]
    async fn diamond_preserves_input_order_in_fan_in() {
        let mut engine: DagEngine<String> = DagEngine::new();
        engine
            .add_node(
                "A",
                Arc::new(|_: NodeInput<String>| Box::pin(async { Ok("A".to_string()) })),
                NodeOptions::default(),
            )
            .unwrap();
        engine
            .add_node(
                "B",
                Arc::new(|_: NodeInput<String>| Box::pin(async { Ok("B".to_string()) })),
                NodeOptions::default(),
            )
            .unwrap();
        engine
            .add_node(
                "C",
                Arc::new(|_: NodeInput<String>| Box::pin(async { Ok("C".to_string()) })),
                NodeOptions::default(),
            )
            .unwrap();
        engine
            .add_node(
                "D",
                Arc::new(|input: NodeInput<String>| {
                    Box::pin(async move {
                        let values = input.into_multi().unwrap_or_default();
                        Ok(values
                            .into_iter()
                            .map(|v| v.unwrap_or_default())
                            .collect::<Vec<_>>()
                            .join(","))
                    })
                }),
                NodeOptions::default(),
            )
            .unwrap();
        engine.connect("A", "B").unwrap();
        engine.connect("A", "C").unwrap();
        engine.connect("B", "D").unwrap();
        engine.connect("C", "D").unwrap();

        let result = engine
            .execute("seed".to_string(), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.into_single().unwrap(), "B,C");
    }

    #[tokio::test]
    async fn cycle_rejects_with_wrapped_validation_message() {
        let mut engine: DagEngine<String> = DagEngine::new();
        engine
            .add_node(
                "A",
                Arc::new(|input: NodeInput<String>| {
                    Box::pin(async move { Ok(input.into_single().unwrap_or_default()) })
                }),
                NodeOptions::default(),
            )
            .unwrap();
        engine
            .add_node(
                "B",
                Arc::new(|input: NodeInput<String>| {
                    Box::pin(async move { Ok(input.into_single().unwrap_or_default()) })
                }),
                NodeOptions::default(),
            )
            .unwrap();
        engine.connect("A", "B").unwrap();
        engine.connect("B", "A").unwrap();

        let err = engine
            .execute("x".to_string(), ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(err
            .message
            .starts_with("DAG execution failed: DAG validation failed:"));
        assert_eq!(err.cycle.as_deref(), Some(["A".to_string(), "B".to_string(), "A".to_string()].as_slice()));
    }

    #[tokio::test]
    async fn connect_rejects_self_loop_immediately() {
        let mut engine: DagEngine<String> = DagEngine::new();
        engine
            .add_node(
                "A",
                Arc::new(|input: NodeInput<String>| {
                    Box::pin(async move { Ok(input.into_single().unwrap_or_default()) })
                }),
                NodeOptions::default(),
            )
            .unwrap();
        let err = engine.connect("A", "A").unwrap_err();
        assert_eq!(err.message, "Cannot connect node A to itself");
    }

    #[tokio::test]
    async fn checkpoint_round_trips_structurally() {
        let engine: DagEngine<String> = DagEngine::new();
        let mut results = IndexMap::new();
        results.insert("A".to_string(), "A-value".to_string());
        let data = CheckpointData {
            completed: vec!["A".to_string()],
            results,
            errors: IndexMap::new(),
            timestamp: Utc::now(),
        };
        engine.save_checkpoint("run-1", data.clone());
        let loaded = engine.load_checkpoint("run-1").unwrap();
        assert_eq!(loaded.completed, data.completed);
        assert_eq!(loaded.results, data.results);
    }
}
