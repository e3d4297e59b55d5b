//! Dependency graph ordering and cycle detection
//!
//! Graphs are arena-indexed: vertex `i` has a name and a list of the
//! vertices it depends on. Ordering is Kahn's algorithm with the lowest
//! ready index taken first, so declarations keep their authoring order
//! unless a dependency forces otherwise.

use crate::error::{ReconcileError, Result};
use crate::planner::{Publishers, RunPlan};
use std::collections::BTreeSet;

/// Topologically order vertices so every dependency precedes its dependents.
///
/// `deps[i]` lists the vertices `i` depends on. Returns the execution order,
/// `UnresolvedReference` for an out-of-range dependency, or `CycleDetected`
/// naming one cycle.
pub fn topological_order(names: &[String], deps: &[Vec<usize>]) -> Result<Vec<usize>> {
    let count = names.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut pending: Vec<usize> = vec![0; count];

    for (vertex, vertex_deps) in deps.iter().enumerate() {
        let unique: BTreeSet<usize> = vertex_deps.iter().copied().collect();
        for dep in unique {
            if dep >= count {
                return Err(ReconcileError::UnresolvedReference {
                    from: names[vertex].clone(),
                    reference: format!("declaration #{dep}"),
                });
            }
            dependents[dep].push(vertex);
            pending[vertex] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&v| pending[v] == 0).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(vertex) = ready.pop_first() {
        order.push(vertex);
        for &dependent in &dependents[vertex] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == count {
        return Ok(order);
    }

    let cycle = find_cycle(deps, &pending)
        .into_iter()
        .map(|v| names[v].clone())
        .collect();
    Err(ReconcileError::CycleDetected { cycle })
}

/// Walk dependency edges among unordered vertices until one repeats.
///
/// Every vertex Kahn left behind still waits on another vertex that was
/// left behind, so the walk cannot dead-end.
fn find_cycle(deps: &[Vec<usize>], pending: &[usize]) -> Vec<usize> {
    let stuck = |v: usize| pending[v] > 0;
    let Some(start) = (0..pending.len()).find(|&v| stuck(v)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&d| d < pending.len() && stuck(d)) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&v| v == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

/// Check that the fleet as a whole can make progress.
///
/// Builds one graph over every (node, declaration): the declared
/// dependencies, an edge from each barrier's publisher to its awaiters, and
/// the per-node sequential order (each node runs one declaration at a time).
/// A cycle here means two nodes would wait on each other forever.
pub(crate) fn check_fleet_order(plan: &RunPlan, publishers: &Publishers) -> Result<()> {
    let offsets: Vec<usize> = plan
        .nodes
        .iter()
        .scan(0, |acc, node| {
            let start = *acc;
            *acc += node.declarations.len();
            Some(start)
        })
        .collect();

    let mut names = Vec::new();
    let mut deps = Vec::new();

    for (node_index, node) in plan.nodes.iter().enumerate() {
        let base = offsets[node_index];
        for decl in &node.declarations {
            names.push(format!("{}/{}", node.node.name, decl.name));
            let mut edges: Vec<usize> = decl.depends_on.iter().map(|d| base + d.index()).collect();
            for barrier in &decl.awaits {
                if let Some(&(publisher_node, publisher)) = publishers.get(barrier) {
                    edges.push(offsets[publisher_node] + publisher);
                }
            }
            deps.push(edges);
        }
        for pair in node.order.windows(2) {
            deps[base + pair[1].index()].push(base + pair[0].index());
        }
    }

    topological_order(&names, &deps).map(|_| ())
}
