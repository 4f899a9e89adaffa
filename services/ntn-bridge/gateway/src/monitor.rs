//! Background maintenance of topology freshness, gateway health and routes.

use bridge_routing::OptimizationObjective;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::{BridgeStats, GatewayManager};

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Tick interval
    pub interval: Duration,
    /// Minimum time between route optimization passes
    pub optimize_interval: Duration,
    /// Active nodes silent for this long are marked disconnected
    pub node_stale_after: Duration,
    /// Re-probe connected gateways every tick
    pub keepalive: bool,
    /// Objective used for periodic optimization
    pub objective: OptimizationObjective,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            optimize_interval: Duration::from_secs(60),
            node_stale_after: Duration::from_secs(120),
            keepalive: true,
            objective: OptimizationObjective::Adaptive,
        }
    }
}

/// What one maintenance pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorPass {
    /// Nodes moved to disconnected
    pub stale_nodes: Vec<String>,
    /// Gateways moved to failed
    pub failed_gateways: Vec<String>,
    /// Gateways whose heartbeat was refreshed
    pub keepalives: usize,
    /// Whether routes were re-optimized
    pub optimized: bool,
    /// Expired routes dropped
    pub routes_pruned: usize,
}

/// Periodic bridge maintenance task
pub struct BridgeMonitor {
    manager: Arc<GatewayManager>,
    config: MonitorConfig,
    last_optimization: Mutex<Option<DateTime<Utc>>>,
}

impl BridgeMonitor {
    /// Create a monitor over a gateway manager
    pub fn new(manager: Arc<GatewayManager>, config: MonitorConfig) -> Self {
        Self {
            manager,
            config,
            last_optimization: Mutex::new(None),
        }
    }

    /// Run one maintenance pass as of `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> MonitorPass {
        let topology = self.manager.topology();
        let mut pass = MonitorPass {
            stale_nodes: topology
                .mark_stale_nodes(self.config.node_stale_after, now)
                .await,
            ..MonitorPass::default()
        };

        if self.config.keepalive {
            pass.keepalives = self.manager.keepalive().await;
        }
        pass.failed_gateways = self.manager.check_gateway_health_at(now).await;

        let due = {
            let mut last = self.last_optimization.lock().await;
            let due = match *last {
                Some(at) => chrono::Duration::from_std(self.config.optimize_interval)
                    .map(|every| now - at >= every)
                    .unwrap_or(false),
                None => true,
            };
            if due {
                *last = Some(now);
            }
            due
        };
        if due {
            let report = self.manager.optimizer().optimize(self.config.objective).await;
            debug!(
                "Route optimization ({}): {} applied, {} improved, {} failed",
                report.applied_objective,
                report.routes_applied,
                report.routes_improved,
                report.routes_failed
            );
            pass.optimized = true;
        }
        pass.routes_pruned = self.manager.optimizer().prune_expired(now);

        let stats = self.manager.stats();
        self.log_stats(&stats);
        self.check_health(&stats, &pass);
        pass
    }

    fn log_stats(&self, stats: &BridgeStats) {
        info!(
            "Bridge status - Gateways: {} ({} connected, {} failed), Nodes: {} ({} active), Tunnels: {}, Routes: {}, Flows: {}",
            stats.gateways,
            stats.connected_gateways,
            stats.failed_gateways,
            stats.nodes,
            stats.active_nodes,
            stats.tunnels,
            stats.routes,
            stats.flows
        );

        let forwarded = stats.packets_to_mesh + stats.packets_to_core;
        if forwarded + stats.packets_dropped > 0 {
            let drop_rate =
                stats.packets_dropped as f64 / (forwarded + stats.packets_dropped) as f64 * 100.0;
            info!(
                "Forwarding - To mesh: {}, To core: {}, Dropped: {} ({:.1}%), Bytes: {}",
                stats.packets_to_mesh,
                stats.packets_to_core,
                stats.packets_dropped,
                drop_rate,
                stats.bytes_forwarded
            );
        }
    }

    fn check_health(&self, stats: &BridgeStats, pass: &MonitorPass) {
        if stats.gateways > 0 && stats.connected_gateways == 0 {
            warn!("No connected gateway: mesh traffic cannot reach the core");
        }
        if !pass.failed_gateways.is_empty() {
            warn!("Gateways failed this pass: {:?}", pass.failed_gateways);
        }
        if !pass.stale_nodes.is_empty() {
            warn!("Mesh nodes went stale: {:?}", pass.stale_nodes);
        }
    }

    /// Run the monitor until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(self.config.interval);
            info!(
                "Starting bridge monitor (interval: {:?}, optimize every {:?})",
                self.config.interval, self.config.optimize_interval
            );

            // first tick fires immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        self.run_once(Utc::now()).await;
                    }
                    _ = cancel.cancelled() => {
                        info!("Bridge monitor stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{GatewayConfig, GatewaySpec};
    use crate::probe::ReachabilityProbe;
    use crate::GatewayError;
    use async_trait::async_trait;
    use bridge_routing::{OptimizerConfig, RoutingOptimizer};
    use bridge_storage::MemoryStore;
    use bridge_topology::{
        GatewayStatus, LinkQuality, MeshNode, NodeStatus, NodeType, TopologyStore,
        TopologyStoreConfig,
    };

    struct SilentProbe;

    #[async_trait]
    impl ReachabilityProbe for SilentProbe {
        async fn probe(&self, _: &str, _: u16) -> Result<Duration, GatewayError> {
            Ok(Duration::from_millis(1))
        }
    }

    async fn manager() -> Arc<GatewayManager> {
        let topology = Arc::new(TopologyStore::new(
            Arc::new(MemoryStore::new()),
            TopologyStoreConfig::default(),
        ));
        for id in ["a", "b"] {
            topology
                .register_node(MeshNode::new(id, id, NodeType::Relay))
                .await;
        }
        topology
            .link_nodes("a", "b", LinkQuality::default())
            .await
            .unwrap();
        let optimizer = Arc::new(RoutingOptimizer::new(
            topology.clone(),
            OptimizerConfig::default(),
        ));
        Arc::new(
            GatewayManager::new(topology, optimizer, GatewayConfig::default())
                .with_probe(Arc::new(SilentProbe)),
        )
    }

    #[tokio::test]
    async fn test_run_once_marks_stale_and_fails_gateways() {
        let manager = manager().await;
        let mut spec = GatewaySpec::new("gw", "127.0.0.1", 2152, "a");
        spec.id = Some("gw1".to_string());
        manager.create_gateway(spec).await.unwrap();
        manager.connect("gw1").await.unwrap();

        let monitor = BridgeMonitor::new(
            manager.clone(),
            MonitorConfig {
                keepalive: false,
                ..MonitorConfig::default()
            },
        );

        let now = Utc::now();
        let first = monitor.run_once(now).await;
        assert!(first.stale_nodes.is_empty());
        assert!(first.failed_gateways.is_empty());
        assert!(first.optimized);
        assert_eq!(manager.optimizer().route_count(), 2);

        let later = now + chrono::Duration::seconds(130);
        let mut second = monitor.run_once(later).await;
        second.stale_nodes.sort();
        assert_eq!(second.stale_nodes, vec!["a", "b"]);
        assert_eq!(second.failed_gateways, vec!["gw1"]);
        assert!(second.optimized);
        assert_eq!(
            manager.topology().get_node("a").unwrap().status,
            NodeStatus::Disconnected
        );
        assert_eq!(
            manager.topology().get_gateway("gw1").unwrap().status,
            GatewayStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_keepalive_keeps_gateway_connected() {
        let manager = manager().await;
        let mut spec = GatewaySpec::new("gw", "127.0.0.1", 2152, "a");
        spec.id = Some("gw1".to_string());
        manager.create_gateway(spec).await.unwrap();
        manager.connect("gw1").await.unwrap();

        let monitor = BridgeMonitor::new(manager.clone(), MonitorConfig::default());
        let pass = monitor.run_once(Utc::now()).await;
        assert_eq!(pass.keepalives, 1);
        assert!(pass.failed_gateways.is_empty());

        let second = monitor.run_once(Utc::now()).await;
        assert!(!second.optimized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_stops_on_cancel() {
        let manager = manager().await;
        let monitor = BridgeMonitor::new(
            manager,
            MonitorConfig {
                interval: Duration::from_secs(1),
                ..MonitorConfig::default()
            },
        );

        let cancel = CancellationToken::new();
        let handle = monitor.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
