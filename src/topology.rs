//! Topological validation and ordering (§4.2).
//!
//! Grounded on the teacher's use of `petgraph` for graph algorithms, but
//! implemented by hand here: the cycle-path reconstruction in §4.2/§8
//! property 3 needs exact control over traversal order and the emitted
//! path shape that a generic graph library's cycle detector doesn't give
//! us for free. See `DESIGN.md` for the dropped-dependency note.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::{EngineError, Result};
use crate::node::{Graph, NodeId};

/// Forward (`children`) and reverse (`parents`) adjacency, built in
/// O(V+E).
pub fn build_adjacency<T>(
    nodes: &Graph<T>,
) -> (IndexMap<NodeId, Vec<NodeId>>, IndexMap<NodeId, Vec<NodeId>>) {
    let mut fwd = IndexMap::new();
    let mut rev = IndexMap::new();
    for (id, node) in nodes {
        fwd.insert(id.clone(), node.outputs.clone());
        rev.insert(id.clone(), node.inputs.clone());
    }
    (fwd, rev)
}

/// Ids with an empty forward set, in map-iteration order.
pub fn sink_ids<T>(nodes: &Graph<T>) -> Vec<NodeId> {
    nodes
        .iter()
        .filter(|(_, node)| node.outputs.is_empty())
        .map(|(id, _)| id.clone())
        .collect()
}

#[derive(Debug, Default)]
struct DfsState {
    visited: HashSet<NodeId>,
    visiting: HashSet<NodeId>,
    stack: Vec<NodeId>,
}

/// Depth-first topological sort that recurses on a node's *inputs*
/// (parents). Pushing a node to the output only after its parents have
/// been fully visited yields sources-first, sinks-last order directly,
/// with no post-hoc reversal — see §4.2 and REDESIGN/open-question #2 in
/// `spec.md` §9.
pub fn topo_sort<T>(nodes: &Graph<T>) -> Result<Vec<NodeId>> {
    let mut state = DfsState::default();
    let mut order = Vec::with_capacity(nodes.len());

    for id in nodes.keys() {
        if !state.visited.contains(id) {
            visit(nodes, id, &mut state, &mut order)?;
        }
    }

    Ok(order)
}

fn visit<T>(
    nodes: &Graph<T>,
    id: &NodeId,
    state: &mut DfsState,
    order: &mut Vec<NodeId>,
) -> Result<()> {
    state.visiting.insert(id.clone());
    state.stack.push(id.clone());

    if let Some(node) = nodes.get(id) {
        for parent in &node.inputs {
            if state.visiting.contains(parent) {
                return Err(EngineError::cycle(build_cycle_path(&state.stack, parent)));
            }
            if !state.visited.contains(parent) {
                visit(nodes, parent, state, order)?;
            }
        }
    }

    state.stack.pop();
    state.visiting.remove(id);
    state.visited.insert(id.clone());
    order.push(id.clone());
    Ok(())
}

/// Build the emitted cycle path: the stack slice from the re-entered node
/// onward, plus the re-entered node again, with the interior reversed so
/// the sequence reads forward (`A -> B -> C -> A`) per §4.2.
fn build_cycle_path(stack: &[NodeId], reentered: &NodeId) -> Vec<NodeId> {
    let start = stack
        .iter()
        .position(|id| id == reentered)
        .unwrap_or(0);
    let mut raw: Vec<NodeId> = stack[start..].to_vec();
    raw.push(reentered.clone());

    if raw.len() <= 2 {
        return raw;
    }
    let first = raw[0].clone();
    let last = raw[raw.len() - 1].clone();
    let mut middle = raw[1..raw.len() - 1].to_vec();
    middle.reverse();

    let mut path = vec![first];
    path.extend(middle);
    path.push(last);
    path
}

/// §4.2 `validateDAG`.
pub fn validate_dag<T>(nodes: &Graph<T>) -> Result<()> {
    if nodes.is_empty() {
        return Err(EngineError::empty_dag());
    }
    match topo_sort(nodes) {
        Ok(_) => Ok(()),
        Err(e) => Err(EngineError::dag_validation_failed(e)),
    }
}

/// §4.2 `validateTopology`. Returns the list of orphan-node warnings in
/// non-strict mode (empty if none); throws in strict mode on the first
/// structural problem found.
pub fn validate_topology<T>(nodes: &Graph<T>, strict: bool) -> Result<Vec<String>> {
    if nodes.is_empty() {
        return Err(EngineError::cannot_be_empty());
    }

    for (id, node) in nodes {
        if node.outputs.contains(id) {
            return Err(EngineError::self_loop());
        }
    }

    if let Err(e) = topo_sort(nodes) {
        return Err(EngineError::topology_cycle(&e));
    }

    let orphans: Vec<NodeId> = nodes
        .iter()
        .filter(|(_, node)| node.inputs.is_empty() && node.outputs.is_empty())
        .map(|(id, _)| id.clone())
        .collect();

    if orphans.is_empty() {
        return Ok(Vec::new());
    }

    if strict {
        return Err(EngineError::orphaned_node(orphans[0].clone()));
    }

    Ok(orphans
        .into_iter()
        .map(|id| format!("Orphaned node detected: {id}"))
        .collect())
}

/// All ids transitively reachable from `roots` by following `rev`
/// (parents) — used to compute the "required backbone" (sinks ∪ their
/// ancestors) in §3/§4.3.
pub fn ancestors(roots: &[NodeId], rev: &IndexMap<NodeId, Vec<NodeId>>) -> HashSet<NodeId> {
    let mut seen: HashSet<NodeId> = roots.iter().cloned().collect();
    let mut stack: Vec<NodeId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        if let Some(parents) = rev.get(&id) {
            for p in parents {
                if seen.insert(p.clone()) {
                    stack.push(p.clone());
                }
            }
        }
    }
    seen
}

/// Transitive descendants of `id` via `outputs`, excluding `id` itself.
pub fn downstream_nodes<T>(nodes: &Graph<T>, id: &str) -> Vec<NodeId> {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = nodes
        .get(id)
        .map(|n| n.outputs.clone())
        .unwrap_or_default();
    let mut order = Vec::new();
    while let Some(cur) = stack.pop() {
        if seen.insert(cur.clone()) {
            order.push(cur.clone());
            if let Some(node) = nodes.get(&cur) {
                stack.extend(node.outputs.clone());
            }
        }
    }
    order
}
