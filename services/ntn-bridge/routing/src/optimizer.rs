//! Route optimizer: analysis, computation and installation of mesh routes.

use bridge_topology::{RouteEntry, TopologyStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::analysis::{analyze, detect_bottlenecks, overloaded_nodes, Bottleneck, TopologyAnalysis};
use crate::objective::OptimizationObjective;
use crate::path::{MeshRoute, RoutingGraph};
use crate::RoutingError;

/// Optimizer configuration
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// How long installed routes stay valid
    pub route_validity: Duration,
    /// Objective used by the periodic optimization pass
    pub default_objective: OptimizationObjective,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            route_validity: Duration::from_secs(300),
            default_objective: OptimizationObjective::Adaptive,
        }
    }
}

/// Outcome of one optimization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Objective that was asked for
    pub requested_objective: OptimizationObjective,
    /// Objective actually applied after adaptive resolution
    pub applied_objective: OptimizationObjective,
    /// Topology analysis the pass was based on
    pub analysis: TopologyAnalysis,
    /// Bottlenecks found
    pub bottlenecks: Vec<Bottleneck>,
    /// Routes computed
    pub routes_computed: usize,
    /// Routes installed
    pub routes_applied: usize,
    /// Installed routes cheaper than the route they replaced
    pub routes_improved: usize,
    /// Routes whose installation failed
    pub routes_failed: usize,
    /// Mean cost improvement over applied routes, in percent
    pub average_improvement_percent: f64,
    /// Wall-clock duration of the pass
    pub duration_ms: u64,
    /// Completion time
    pub completed_at: DateTime<Utc>,
}

/// Running optimizer statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerStats {
    /// Passes completed
    pub passes: u64,
    /// Routes installed over all passes
    pub routes_applied: u64,
    /// Routes improved over all passes
    pub routes_improved: u64,
    /// Failed installs over all passes
    pub routes_failed: u64,
    /// Last pass
    pub last_pass: Option<DateTime<Utc>>,
}

/// Multi-objective route optimizer over the topology store
pub struct RoutingOptimizer {
    topology: Arc<TopologyStore>,
    config: OptimizerConfig,
    /// Installed routes keyed by (source, destination)
    routes: DashMap<(String, String), MeshRoute>,
    stats: Arc<RwLock<OptimizerStats>>,
}

impl RoutingOptimizer {
    /// Create an optimizer reading from `topology`
    pub fn new(topology: Arc<TopologyStore>, config: OptimizerConfig) -> Self {
        Self {
            topology,
            config,
            routes: DashMap::new(),
            stats: Arc::new(RwLock::new(OptimizerStats::default())),
        }
    }

    /// Optimizer configuration
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Analyze the current topology
    pub fn analyze(&self) -> TopologyAnalysis {
        analyze(&self.topology.snapshot())
    }

    /// Detect bottlenecks in the current topology
    pub fn detect_bottlenecks(&self) -> Vec<Bottleneck> {
        detect_bottlenecks(&self.topology.snapshot())
    }

    /// Best route between two nodes under `objective`; `None` when there is no path
    pub fn find_route(
        &self,
        source: &str,
        destination: &str,
        objective: OptimizationObjective,
    ) -> Option<MeshRoute> {
        let snapshot = self.topology.snapshot();
        let bottlenecks = detect_bottlenecks(&snapshot);
        let objective = objective.resolve(&analyze(&snapshot));
        let graph = RoutingGraph::build(&snapshot, objective, &overloaded_nodes(&bottlenecks));

        let route = graph.shortest_path(source, destination);
        if route.is_none() {
            debug!(
                "No {} route from {} to {}",
                objective, source, destination
            );
        }
        route
    }

    /// Routes for every ordered pair of distinct active nodes
    pub fn compute_routes(&self, objective: OptimizationObjective) -> Vec<MeshRoute> {
        let snapshot = self.topology.snapshot();
        let bottlenecks = detect_bottlenecks(&snapshot);
        let objective = objective.resolve(&analyze(&snapshot));
        let graph = RoutingGraph::build(&snapshot, objective, &overloaded_nodes(&bottlenecks));

        graph
            .node_ids()
            .iter()
            .flat_map(|src| graph.routes_from(src))
            .collect()
    }

    /// Analyze, compute and install routes for the whole mesh
    pub async fn optimize(&self, objective: OptimizationObjective) -> OptimizationReport {
        let started = Instant::now();
        let snapshot = self.topology.snapshot();
        let analysis = analyze(&snapshot);
        let bottlenecks = detect_bottlenecks(&snapshot);
        let applied_objective = objective.resolve(&analysis);
        let graph = RoutingGraph::build(
            &snapshot,
            applied_objective,
            &overloaded_nodes(&bottlenecks),
        );

        let candidates: Vec<MeshRoute> = graph
            .node_ids()
            .iter()
            .flat_map(|src| graph.routes_from(src))
            .collect();

        let mut applied = 0usize;
        let mut improved = 0usize;
        let mut failed = 0usize;
        let mut improvement_sum = 0.0;

        for route in &candidates {
            let key = (route.source.clone(), route.destination.clone());
            let previous_cost = self
                .routes
                .get(&key)
                .and_then(|prior| graph.path_cost(&prior.hops));

            if let Err(e) = self.install(route) {
                warn!(
                    "Failed to install route {} -> {}: {}",
                    route.source, route.destination, e
                );
                failed += 1;
                continue;
            }
            applied += 1;

            if let Some(old) = previous_cost {
                if route.cost < old {
                    improved += 1;
                    if old > 0.0 {
                        improvement_sum += (old - route.cost) / old * 100.0;
                    }
                }
            }
        }

        let average_improvement_percent = if applied > 0 {
            improvement_sum / applied as f64
        } else {
            0.0
        };

        let report = OptimizationReport {
            requested_objective: objective,
            applied_objective,
            analysis,
            bottlenecks,
            routes_computed: candidates.len(),
            routes_applied: applied,
            routes_improved: improved,
            routes_failed: failed,
            average_improvement_percent,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };

        {
            let mut stats = self.stats.write().await;
            stats.passes += 1;
            stats.routes_applied += applied as u64;
            stats.routes_improved += improved as u64;
            stats.routes_failed += failed as u64;
            stats.last_pass = Some(report.completed_at);
        }

        info!(
            "Route optimization ({} -> {}): {} computed, {} applied, {} improved, {} failed, {} bottlenecks",
            objective,
            applied_objective,
            report.routes_computed,
            applied,
            improved,
            failed,
            report.bottlenecks.len()
        );
        report
    }

    fn install(&self, route: &MeshRoute) -> Result<(), RoutingError> {
        let next_hop = route.next_hop().ok_or_else(|| RoutingError::NoNextHop {
            source_id: route.source.clone(),
            destination: route.destination.clone(),
        })?;
        let validity = chrono::Duration::from_std(self.config.route_validity)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        self.topology.install_route(
            &route.source,
            RouteEntry {
                destination: route.destination.clone(),
                next_hop: next_hop.to_string(),
                hop_count: route.hop_count,
                metric: route.cost,
                valid_until: route.computed_at + validity,
            },
        )?;

        self.routes.insert(
            (route.source.clone(), route.destination.clone()),
            route.clone(),
        );
        Ok(())
    }

    /// Installed route for a pair, if still valid
    pub fn installed_route(&self, source: &str, destination: &str) -> Option<MeshRoute> {
        let now = Utc::now();
        self.routes
            .get(&(source.to_string(), destination.to_string()))
            .filter(|r| self.is_valid(r, now))
            .map(|r| r.clone())
    }

    fn is_valid(&self, route: &MeshRoute, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.config.route_validity) {
            Ok(validity) => route.computed_at + validity > now,
            Err(_) => true,
        }
    }

    /// Drop installed routes that expired before `now`; returns how many
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| self.is_valid(route, now));
        before - self.routes.len()
    }

    /// Number of installed routes
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Running statistics
    pub async fn stats(&self) -> OptimizerStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_storage::MemoryStore;
    use bridge_topology::{LinkQuality, MeshNode, NodeType, TopologyStoreConfig};

    fn quality(latency_ms: f64) -> LinkQuality {
        LinkQuality {
            latency_ms,
            ..LinkQuality::default()
        }
    }

    async fn line_topology() -> Arc<TopologyStore> {
        let topology = Arc::new(TopologyStore::new(
            Arc::new(MemoryStore::new()),
            TopologyStoreConfig::default(),
        ));
        for id in ["a", "b", "c"] {
            topology
                .register_node(MeshNode::new(id, id, NodeType::Relay))
                .await;
        }
        topology.link_nodes("a", "b", quality(10.0)).await.unwrap();
        topology.link_nodes("b", "c", quality(10.0)).await.unwrap();
        topology
    }

    #[tokio::test]
    async fn test_find_route_and_trivial() {
        let topology = line_topology().await;
        let optimizer = RoutingOptimizer::new(topology, OptimizerConfig::default());

        let route = optimizer
            .find_route("a", "c", OptimizationObjective::LowLatency)
            .unwrap();
        assert_eq!(route.hops, vec!["a", "b", "c"]);
        assert_eq!(route.hop_count, 2);

        let trivial = optimizer
            .find_route("b", "b", OptimizationObjective::LowLatency)
            .unwrap();
        assert_eq!(trivial.hops, vec!["b"]);

        assert!(optimizer
            .find_route("a", "nowhere", OptimizationObjective::LowLatency)
            .is_none());
    }

    #[tokio::test]
    async fn test_compute_routes_all_pairs() {
        let topology = line_topology().await;
        let optimizer = RoutingOptimizer::new(topology, OptimizerConfig::default());
        let routes = optimizer.compute_routes(OptimizationObjective::LowLatency);
        assert_eq!(routes.len(), 6);
    }

    #[tokio::test]
    async fn test_optimize_installs_and_counts_improvements() {
        let topology = line_topology().await;
        let optimizer = RoutingOptimizer::new(topology.clone(), OptimizerConfig::default());

        let first = optimizer.optimize(OptimizationObjective::LowLatency).await;
        assert_eq!(first.routes_computed, 6);
        assert_eq!(first.routes_applied, 6);
        assert_eq!(first.routes_improved, 0);
        assert_eq!(first.average_improvement_percent, 0.0);

        let entry = topology.get_node("a").unwrap().route_to("c").cloned().unwrap();
        assert_eq!(entry.next_hop, "b");
        assert_eq!(entry.hop_count, 2);
        assert_eq!(entry.metric, 20.0);

        // A new direct link makes a -> c and c -> a cheaper
        topology.link_nodes("a", "c", quality(5.0)).await.unwrap();
        let second = optimizer.optimize(OptimizationObjective::LowLatency).await;
        assert_eq!(second.routes_applied, 6);
        assert_eq!(second.routes_improved, 2);
        // Each improved route went from 20 to 5: 75%, averaged over 6 applied
        assert!((second.average_improvement_percent - 25.0).abs() < 1e-9);

        let installed = optimizer.installed_route("a", "c").unwrap();
        assert_eq!(installed.hops, vec!["a", "c"]);
        assert_eq!(optimizer.route_count(), 6);

        let stats = optimizer.stats().await;
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.routes_improved, 2);
    }

    #[tokio::test]
    async fn test_adaptive_resolves_in_report() {
        let topology = line_topology().await;
        let optimizer = RoutingOptimizer::new(topology, OptimizerConfig::default());
        let report = optimizer.optimize(OptimizationObjective::Adaptive).await;
        assert_eq!(report.requested_objective, OptimizationObjective::Adaptive);
        assert_eq!(
            report.applied_objective,
            OptimizationObjective::BalancedOptimal
        );
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let topology = line_topology().await;
        let optimizer = RoutingOptimizer::new(
            topology,
            OptimizerConfig {
                route_validity: Duration::from_secs(1),
                ..OptimizerConfig::default()
            },
        );
        optimizer.optimize(OptimizationObjective::LowLatency).await;
        assert_eq!(optimizer.route_count(), 6);

        let later = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(optimizer.prune_expired(later), 6);
        assert_eq!(optimizer.route_count(), 0);
    }
}
