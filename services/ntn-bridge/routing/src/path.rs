//! Weighted shortest-path search over the active mesh.

use bridge_topology::{LinkQuality, TopologySnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::objective::OptimizationObjective;

/// A computed path through the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshRoute {
    /// Source node
    pub source: String,
    /// Destination node
    pub destination: String,
    /// Nodes visited, source first and destination last
    pub hops: Vec<String>,
    /// Sum of edge weights under `objective`
    pub cost: f64,
    /// Summed link latency
    pub total_latency_ms: f64,
    /// Narrowest link bandwidth; `None` for the single-node path
    pub bottleneck_bandwidth_mbps: Option<f64>,
    /// Links traversed
    pub hop_count: u32,
    /// Objective the route was computed under
    pub objective: OptimizationObjective,
    /// When the route was computed
    pub computed_at: DateTime<Utc>,
}

impl MeshRoute {
    /// First hop after the source, if the route leaves the source at all
    pub fn next_hop(&self) -> Option<&str> {
        self.hops.get(1).map(|s| s.as_str())
    }
}

/// Heap entry ordered by cost, then node index
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    node: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.node.cmp(&other.node))
    }
}

struct Edge {
    to: usize,
    weight: f64,
    quality: LinkQuality,
}

/// Active mesh weighted under one concrete objective
pub struct RoutingGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    adjacency: Vec<Vec<Edge>>,
    objective: OptimizationObjective,
}

impl RoutingGraph {
    /// Build the graph of active nodes and links between them
    ///
    /// `overloaded` lists nodes whose inbound links carry the load-balancing penalty.
    pub fn build(
        snapshot: &TopologySnapshot,
        objective: OptimizationObjective,
        overloaded: &HashSet<String>,
    ) -> Self {
        let ids: Vec<String> = snapshot.active_nodes().map(|n| n.id.clone()).collect();
        let index: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let adjacency = snapshot
            .active_nodes()
            .map(|node| {
                node.neighbors
                    .iter()
                    .filter_map(|neighbor| {
                        let to = *index.get(&neighbor.node_id)?;
                        let weight = objective.edge_weight(
                            &neighbor.quality,
                            overloaded.contains(&neighbor.node_id),
                        )?;
                        Some(Edge {
                            to,
                            weight,
                            quality: neighbor.quality,
                        })
                    })
                    .collect()
            })
            .collect();

        Self {
            ids,
            index,
            adjacency,
            objective,
        }
    }

    /// Active node ids in snapshot order
    pub fn node_ids(&self) -> &[String] {
        &self.ids
    }

    /// Objective the graph is weighted under
    pub fn objective(&self) -> OptimizationObjective {
        self.objective
    }

    fn edge(&self, from: usize, to: usize) -> Option<&Edge> {
        self.adjacency[from].iter().find(|e| e.to == to)
    }

    /// Dijkstra from `source`: (distance, predecessor) per node index
    fn search(&self, source: usize) -> (Vec<f64>, Vec<Option<usize>>) {
        let n = self.ids.len();
        let mut distances = vec![f64::INFINITY; n];
        let mut previous: Vec<Option<usize>> = vec![None; n];
        let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        distances[source] = 0.0;
        heap.push(Reverse(Candidate {
            cost: 0.0,
            node: source,
        }));

        while let Some(Reverse(Candidate { cost, node })) = heap.pop() {
            // Skip if we've already found a better path
            if cost > distances[node] {
                continue;
            }

            for edge in &self.adjacency[node] {
                let new_cost = cost + edge.weight;
                if new_cost < distances[edge.to] {
                    distances[edge.to] = new_cost;
                    previous[edge.to] = Some(node);
                    heap.push(Reverse(Candidate {
                        cost: new_cost,
                        node: edge.to,
                    }));
                }
            }
        }

        (distances, previous)
    }

    fn assemble(&self, indices: &[usize], cost: f64, now: DateTime<Utc>) -> MeshRoute {
        let mut total_latency_ms = 0.0;
        let mut bottleneck: Option<f64> = None;
        for pair in indices.windows(2) {
            if let Some(edge) = self.edge(pair[0], pair[1]) {
                total_latency_ms += edge.quality.latency_ms;
                let bw = edge.quality.bandwidth_mbps;
                bottleneck = Some(bottleneck.map_or(bw, |b| b.min(bw)));
            }
        }

        let hops: Vec<String> = indices.iter().map(|&i| self.ids[i].clone()).collect();
        MeshRoute {
            source: hops[0].clone(),
            destination: hops[hops.len() - 1].clone(),
            hop_count: (hops.len() - 1) as u32,
            hops,
            cost,
            total_latency_ms,
            bottleneck_bandwidth_mbps: bottleneck,
            objective: self.objective,
            computed_at: now,
        }
    }

    fn walk_back(previous: &[Option<usize>], source: usize, target: usize) -> Vec<usize> {
        let mut path = vec![target];
        let mut current = target;
        while current != source {
            match previous[current] {
                Some(prev) => {
                    path.push(prev);
                    current = prev;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Lowest-cost route between two active nodes, or `None` when unreachable
    pub fn shortest_path(&self, source: &str, destination: &str) -> Option<MeshRoute> {
        let now = Utc::now();
        let src = *self.index.get(source)?;
        let dst = *self.index.get(destination)?;
        if src == dst {
            return Some(self.assemble(&[src], 0.0, now));
        }

        let (distances, previous) = self.search(src);
        if !distances[dst].is_finite() {
            return None;
        }
        let path = Self::walk_back(&previous, src, dst);
        Some(self.assemble(&path, distances[dst], now))
    }

    /// Routes from `source` to every other reachable active node
    pub fn routes_from(&self, source: &str) -> Vec<MeshRoute> {
        let now = Utc::now();
        let Some(&src) = self.index.get(source) else {
            return Vec::new();
        };

        let (distances, previous) = self.search(src);
        (0..self.ids.len())
            .filter(|&dst| dst != src && distances[dst].is_finite())
            .map(|dst| {
                let path = Self::walk_back(&previous, src, dst);
                self.assemble(&path, distances[dst], now)
            })
            .collect()
    }

    /// Cost of following `hops` under this graph's weights; `None` if a link is gone
    pub fn path_cost(&self, hops: &[String]) -> Option<f64> {
        let indices: Vec<usize> = hops
            .iter()
            .map(|id| self.index.get(id).copied())
            .collect::<Option<_>>()?;

        indices.windows(2).try_fold(0.0, |acc, pair| {
            self.edge(pair[0], pair[1]).map(|e| acc + e.weight)
        })
    }
}
