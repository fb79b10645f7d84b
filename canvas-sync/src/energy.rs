//! Energy propagation over the node/edge graph.
//!
//! Effective energy of a node is its base energy plus the rectified effective
//! energy of every upstream node feeding it over an enabled edge. The solver
//! lowers base energies until `base + incoming <= MAX_ENERGY` holds for every
//! node, or until the iteration cap is hit. Feedback loops may not settle
//! within the cap; the returned [`Solution`] says whether it did.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::model::{Edge, Node, MAX_ENERGY};

pub const DEFAULT_MAX_ITERATIONS: usize = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Input nodes with corrected base energy, in id order.
    pub nodes: Vec<Node>,
    pub effective: BTreeMap<String, f64>,
    /// Clamp passes performed.
    pub iterations: usize,
    /// False when the cap stopped the search while energies were still moving.
    pub converged: bool,
}

impl Solution {
    pub fn effective(&self, id: &str) -> Option<f64> {
        self.effective.get(id).copied()
    }

    /// Corrected base energy of `id`.
    pub fn base(&self, id: &str) -> Option<f64> {
        self.nodes
            .binary_search_by(|n| n.id.as_str().cmp(id))
            .ok()
            .map(|i| self.nodes[i].energy)
    }

    /// Sum of rectified upstream effective energy flowing into each node.
    pub fn incoming<'a>(&self, edges: impl IntoIterator<Item = &'a Edge>) -> BTreeMap<String, f64> {
        let mut incoming: BTreeMap<String, f64> =
            self.nodes.iter().map(|n| (n.id.clone(), 0.0)).collect();
        for edge in edges.into_iter().filter(|e| e.conducts_energy()) {
            let Some(upstream) = self.effective.get(&edge.source) else { continue };
            if let Some(sum) = incoming.get_mut(&edge.target) {
                *sum += relu(*upstream);
            }
        }
        incoming
    }
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Clamps to `[0, MAX_ENERGY]`; NaN becomes 0.
pub fn clamp_energy(energy: f64) -> f64 {
    if energy.is_nan() {
        0.0
    } else {
        energy.clamp(0.0, MAX_ENERGY)
    }
}

/// Index form of the graph: nodes by position, inbound sources per node.
struct Graph {
    inbound: Vec<Vec<usize>>,
}

impl Graph {
    fn build(nodes: &[Node], edges: &[&Edge]) -> Self {
        let index: HashMap<&str, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect();
        let mut inbound = vec![Vec::new(); nodes.len()];
        for edge in edges.iter().filter(|e| e.conducts_energy()) {
            let (Some(&src), Some(&dst)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str()))
            else {
                continue;
            };
            inbound[dst].push(src);
        }
        Self { inbound }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// One forward pass. Sources still on the walk stack (back edges of a cycle)
/// contribute nothing to this pass.
fn evaluate(graph: &Graph, base: &[f64]) -> Vec<f64> {
    let n = base.len();
    let mut mark = vec![Mark::Unvisited; n];
    let mut effective = vec![0.0; n];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if mark[root] != Mark::Unvisited {
            continue;
        }
        mark[root] = Mark::OnStack;
        stack.push((root, 0));

        while let Some(&(node, cursor)) = stack.last() {
            if let Some(&src) = graph.inbound[node].get(cursor) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if mark[src] == Mark::Unvisited {
                    mark[src] = Mark::OnStack;
                    stack.push((src, 0));
                }
                continue;
            }

            let upstream: f64 = graph.inbound[node]
                .iter()
                .filter(|&&src| mark[src] == Mark::Done)
                .map(|&src| relu(effective[src]))
                .sum();
            effective[node] = base[node] + upstream;
            mark[node] = Mark::Done;
            stack.pop();
        }
    }
    effective
}

/// Re-derives base and effective energies.
///
/// Edges naming unknown nodes are ignored. Pure: same input, same output.
pub fn solve<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    edges: impl IntoIterator<Item = &'a Edge>,
    max_iterations: usize,
) -> Solution {
    let mut nodes: Vec<Node> = nodes.into_iter().cloned().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    nodes.dedup_by(|a, b| a.id == b.id);
    let edges: Vec<&Edge> = edges.into_iter().collect();

    let graph = Graph::build(&nodes, &edges);
    let mut base: Vec<f64> = nodes.iter().map(|n| clamp_energy(n.energy)).collect();
    let mut effective = evaluate(&graph, &base);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;
        let mut changed = false;
        for (i, sources) in graph.inbound.iter().enumerate() {
            let incoming: f64 = sources.iter().map(|&s| relu(effective[s])).sum();
            let cap = (MAX_ENERGY - incoming).max(0.0);
            if base[i] > cap {
                base[i] = cap;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
        effective = evaluate(&graph, &base);
    }

    if !converged && max_iterations > 0 {
        warn!(iterations, nodes = nodes.len(), "energy solver hit iteration cap");
    }

    for (node, energy) in nodes.iter_mut().zip(&base) {
        node.energy = *energy;
    }
    let effective = nodes.iter().map(|n| n.id.clone()).zip(effective).collect();

    Solution { nodes, effective, iterations, converged }
}
