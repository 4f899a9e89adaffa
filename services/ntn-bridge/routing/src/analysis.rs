//! Topology analysis and bottleneck detection.

use bridge_topology::{MeshNode, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// CPU percentage above which a node is overloaded
pub const CPU_OVERLOAD_PERCENT: f64 = 80.0;
/// Memory percentage above which a node is overloaded
pub const MEMORY_OVERLOAD_PERCENT: f64 = 85.0;
/// CPU or memory percentage above which an overload is high severity
pub const HIGH_LOAD_PERCENT: f64 = 90.0;
/// Link utilization above which a link is congested
pub const CONGESTED_UTILIZATION: f64 = 0.8;
/// Link utilization above which congestion is high severity
pub const HIGH_CONGESTION_UTILIZATION: f64 = 0.9;
/// Nodes with fewer neighbors than this are isolated
pub const MIN_NEIGHBORS: usize = 2;

/// Aggregate view of the mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyAnalysis {
    /// Nodes known to the store
    pub total_nodes: usize,
    /// Nodes in the active state
    pub active_nodes: usize,
    /// Directed links between active nodes
    pub active_links: usize,
    /// Mean link latency
    pub avg_latency_ms: f64,
    /// Mean link bandwidth
    pub avg_bandwidth_mbps: f64,
    /// Mean link utilization
    pub avg_utilization: f64,
    /// Directed active links over the n(n-1) possible
    pub connectivity_ratio: f64,
    /// Blend of node availability and link density in [0, 1]
    pub stability_score: f64,
}

/// What kind of resource is constrained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    /// CPU or memory over threshold
    OverloadedNode,
    /// Link utilization over threshold
    CongestedLink,
    /// Too few neighbors
    IsolatedNode,
}

/// Bottleneck severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth routing around
    Medium,
    /// Needs attention
    High,
}

/// A constrained node or link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    /// Kind of constraint
    pub kind: BottleneckKind,
    /// Severity
    pub severity: Severity,
    /// Node concerned (link source for congested links)
    pub node_id: String,
    /// Far end of a congested link
    pub neighbor_id: Option<String>,
    /// Measured value that tripped the threshold
    pub value: f64,
    /// Human readable summary
    pub description: String,
}

fn active_ids(snapshot: &TopologySnapshot) -> HashSet<&str> {
    snapshot.active_nodes().map(|n| n.id.as_str()).collect()
}

/// Summarize the active part of the mesh
pub fn analyze(snapshot: &TopologySnapshot) -> TopologyAnalysis {
    let active = active_ids(snapshot);
    let n = active.len();

    let mut links = 0usize;
    let mut latency = 0.0;
    let mut bandwidth = 0.0;
    let mut utilization = 0.0;

    for node in snapshot.active_nodes() {
        for neighbor in &node.neighbors {
            if !active.contains(neighbor.node_id.as_str()) {
                continue;
            }
            links += 1;
            latency += neighbor.quality.latency_ms;
            bandwidth += neighbor.quality.bandwidth_mbps;
            utilization += neighbor.quality.utilization;
        }
    }

    let mean = |sum: f64| if links > 0 { sum / links as f64 } else { 0.0 };
    let possible = n * n.saturating_sub(1);
    let connectivity_ratio = if possible > 0 {
        links as f64 / possible as f64
    } else {
        0.0
    };
    let active_ratio = if snapshot.nodes.is_empty() {
        0.0
    } else {
        n as f64 / snapshot.nodes.len() as f64
    };
    let stability_score =
        (0.6 * active_ratio + 0.4 * (connectivity_ratio * 2.0).min(1.0)).clamp(0.0, 1.0);

    TopologyAnalysis {
        total_nodes: snapshot.nodes.len(),
        active_nodes: n,
        active_links: links,
        avg_latency_ms: mean(latency),
        avg_bandwidth_mbps: mean(bandwidth),
        avg_utilization: mean(utilization),
        connectivity_ratio,
        stability_score,
    }
}

fn overload(node: &MeshNode) -> Option<Bottleneck> {
    let cpu = node.load.cpu_percent;
    let memory = node.load.memory_percent;
    if cpu <= CPU_OVERLOAD_PERCENT && memory <= MEMORY_OVERLOAD_PERCENT {
        return None;
    }

    let severity = if cpu > HIGH_LOAD_PERCENT || memory > HIGH_LOAD_PERCENT {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(Bottleneck {
        kind: BottleneckKind::OverloadedNode,
        severity,
        node_id: node.id.clone(),
        neighbor_id: None,
        value: cpu.max(memory),
        description: format!(
            "node {} overloaded: cpu {:.1}%, memory {:.1}%",
            node.id, cpu, memory
        ),
    })
}

/// Flag overloaded nodes, congested links and isolated nodes among active nodes
pub fn detect_bottlenecks(snapshot: &TopologySnapshot) -> Vec<Bottleneck> {
    let mut bottlenecks = Vec::new();

    for node in snapshot.active_nodes() {
        if let Some(b) = overload(node) {
            bottlenecks.push(b);
        }

        for neighbor in &node.neighbors {
            let utilization = neighbor.quality.utilization;
            if utilization > CONGESTED_UTILIZATION {
                let severity = if utilization > HIGH_CONGESTION_UTILIZATION {
                    Severity::High
                } else {
                    Severity::Medium
                };
                bottlenecks.push(Bottleneck {
                    kind: BottleneckKind::CongestedLink,
                    severity,
                    node_id: node.id.clone(),
                    neighbor_id: Some(neighbor.node_id.clone()),
                    value: utilization,
                    description: format!(
                        "link {} -> {} at {:.0}% utilization",
                        node.id,
                        neighbor.node_id,
                        utilization * 100.0
                    ),
                });
            }
        }

        let degree = node.neighbors.len();
        if degree < MIN_NEIGHBORS {
            let severity = if degree == 0 {
                Severity::High
            } else {
                Severity::Medium
            };
            bottlenecks.push(Bottleneck {
                kind: BottleneckKind::IsolatedNode,
                severity,
                node_id: node.id.clone(),
                neighbor_id: None,
                value: degree as f64,
                description: format!("node {} has {} neighbor(s)", node.id, degree),
            });
        }
    }

    bottlenecks
}

/// Ids of nodes flagged as overloaded
pub fn overloaded_nodes(bottlenecks: &[Bottleneck]) -> HashSet<String> {
    bottlenecks
        .iter()
        .filter(|b| b.kind == BottleneckKind::OverloadedNode)
        .map(|b| b.node_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_topology::{LinkQuality, NodeStatus, NodeType};
    use chrono::Utc;

    fn node(id: &str) -> MeshNode {
        MeshNode::new(id, id, NodeType::Relay)
    }

    fn link(node: &mut MeshNode, to: &str, latency_ms: f64, utilization: f64) {
        let quality = LinkQuality {
            latency_ms,
            utilization,
            ..LinkQuality::default()
        };
        node.upsert_neighbor(to, quality, Utc::now());
    }

    fn snapshot(nodes: Vec<MeshNode>) -> TopologySnapshot {
        let mut nodes = nodes;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        TopologySnapshot {
            nodes,
            gateways: Vec::new(),
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn test_analyze_full_mesh() {
        let ids = ["a", "b", "c"];
        let nodes = ids
            .iter()
            .map(|id| {
                let mut n = node(id);
                for other in ids.iter().filter(|o| *o != id) {
                    link(&mut n, other, 20.0, 0.5);
                }
                n
            })
            .collect();

        let analysis = analyze(&snapshot(nodes));
        assert_eq!(analysis.active_nodes, 3);
        assert_eq!(analysis.active_links, 6);
        assert_eq!(analysis.connectivity_ratio, 1.0);
        assert_eq!(analysis.avg_latency_ms, 20.0);
        assert_eq!(analysis.avg_utilization, 0.5);
        assert!((analysis.stability_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_ignores_inactive() {
        let mut a = node("a");
        link(&mut a, "b", 10.0, 0.1);
        let mut b = node("b");
        b.status = NodeStatus::Disconnected;
        link(&mut b, "a", 10.0, 0.1);

        let analysis = analyze(&snapshot(vec![a, b]));
        assert_eq!(analysis.total_nodes, 2);
        assert_eq!(analysis.active_nodes, 1);
        assert_eq!(analysis.active_links, 0);
        assert_eq!(analysis.connectivity_ratio, 0.0);
        assert!((analysis.stability_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_empty() {
        let analysis = analyze(&snapshot(Vec::new()));
        assert_eq!(analysis, TopologyAnalysis::default());
    }

    #[test]
    fn test_congested_only_link_is_high_severity() {
        let mut a = node("a");
        link(&mut a, "b", 10.0, 0.95);
        let mut b = node("b");
        link(&mut b, "a", 10.0, 0.2);

        let bottlenecks = detect_bottlenecks(&snapshot(vec![a, b]));
        let congested: Vec<&Bottleneck> = bottlenecks
            .iter()
            .filter(|b| b.kind == BottleneckKind::CongestedLink)
            .collect();

        assert_eq!(congested.len(), 1);
        assert_eq!(congested[0].severity, Severity::High);
        assert_eq!(congested[0].node_id, "a");
        assert_eq!(congested[0].neighbor_id.as_deref(), Some("b"));
        assert_eq!(
            serde_json::to_value(congested[0].kind).unwrap(),
            "congested_link"
        );
    }

    #[test]
    fn test_overload_thresholds() {
        let mut medium = node("m");
        medium.load.cpu_percent = 85.0;
        let mut high = node("h");
        high.load.memory_percent = 95.0;
        let mut fine = node("f");
        fine.load.memory_percent = 85.0;

        let bottlenecks = detect_bottlenecks(&snapshot(vec![medium, high, fine]));
        let overloaded: Vec<(&str, Severity)> = bottlenecks
            .iter()
            .filter(|b| b.kind == BottleneckKind::OverloadedNode)
            .map(|b| (b.node_id.as_str(), b.severity))
            .collect();

        assert_eq!(overloaded, vec![("h", Severity::High), ("m", Severity::Medium)]);
        assert_eq!(
            overloaded_nodes(&bottlenecks),
            ["h".to_string(), "m".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn test_isolated_severity() {
        let lonely = node("a");
        let mut single = node("b");
        link(&mut single, "a", 10.0, 0.1);

        let bottlenecks = detect_bottlenecks(&snapshot(vec![lonely, single]));
        let isolated: Vec<(&str, Severity)> = bottlenecks
            .iter()
            .filter(|b| b.kind == BottleneckKind::IsolatedNode)
            .map(|b| (b.node_id.as_str(), b.severity))
            .collect();
        assert_eq!(isolated, vec![("a", Severity::High), ("b", Severity::Medium)]);
    }
}
