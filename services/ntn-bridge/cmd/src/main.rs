//! NTN bridge service binary.
//!
//! Runs the mesh bridge (gateways, tunnels, mesh routing) together with the
//! satellite/mesh failover controller for the testbed's UAV nodes.

use anyhow::Context;
use bridge_failover::{
    AttachmentSink, ConnectionQualityAssessor, FailoverController, FileAttachmentSink,
    FileQualitySource, MemoryAttachmentSink, StaticQualitySource,
};
use bridge_gateway::{BridgeMonitor, GatewayConfig, GatewayManager, MonitorConfig};
use bridge_routing::{OptimizerConfig, RoutingOptimizer};
use bridge_storage::open_store;
use bridge_topology::{GatewayStatus, LinkQuality, MeshNode, TopologyStore, TopologyStoreConfig};
use clap::Parser;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod logging;
mod config;

use config::BridgeConfig;
use logging::BridgeLogFormatter;

/// Mesh bridge and satellite/mesh failover service
#[derive(Parser, Debug)]
#[command(name = "ntn-bridge", version, about = "Mesh bridge and satellite/mesh failover service")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); NTN_BRIDGE_LOG_LEVEL when absent
    #[arg(long)]
    log_level: Option<String>,

    /// Storage mode: memory, file
    #[arg(long)]
    storage_mode: Option<String>,

    /// Data directory for file storage
    #[arg(long)]
    storage_data_dir: Option<PathBuf>,

    /// Gateway reachability probe timeout, e.g. 800ms
    #[arg(long)]
    probe_timeout: Option<humantime::Duration>,

    /// Bridge monitor interval, e.g. 10s
    #[arg(long)]
    monitor_interval: Option<humantime::Duration>,

    /// Ignore the config file and run one ground station gateway in front of the default upstream
    #[arg(long)]
    standalone: bool,
}

impl Args {
    /// Command-line flags win over the config file and environment
    fn apply_to(&self, config: &mut BridgeConfig) {
        if let Some(mode) = &self.storage_mode {
            config.storage_mode = mode.clone();
        }
        if let Some(dir) = &self.storage_data_dir {
            config.storage_data_dir = dir.clone();
        }
        if let Some(timeout) = self.probe_timeout {
            config.probe_timeout = timeout.into();
        }
        if let Some(period) = self.monitor_interval {
            config.monitor_interval = period.into();
        }
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::new("info")
        .add_directive(format!("ntn_bridge={}", level).parse()?)
        .add_directive(format!("bridge_gateway={}", level).parse()?)
        .add_directive(format!("bridge_failover={}", level).parse()?)
        .add_directive(format!("bridge_routing={}", level).parse()?)
        .add_directive(format!("bridge_topology={}", level).parse()?)
        .add_directive(format!("bridge_storage={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(BridgeLogFormatter::new("ntn-bridge"))
        .init();
    Ok(())
}

/// Create configured mesh nodes and their links
async fn seed_topology(topology: &TopologyStore, config: &BridgeConfig) -> anyhow::Result<()> {
    for seed in &config.mesh_nodes {
        let mut node = MeshNode::new(
            seed.id.clone(),
            seed.name.clone().unwrap_or_else(|| seed.id.clone()),
            seed.node_type,
        )
        .with_protocol(seed.routing_protocol);
        if let Some(ip) = &seed.ip_address {
            node = node.with_ip_address(ip.clone());
        }
        topology.register_node(node).await;
    }

    for seed in &config.mesh_nodes {
        for peer in &seed.links {
            topology
                .link_nodes(&seed.id, peer, LinkQuality::default())
                .await
                .with_context(|| format!("linking mesh node {} to {}", seed.id, peer))?;
        }
    }

    if !config.mesh_nodes.is_empty() {
        info!("Seeded {} mesh nodes", config.mesh_nodes.len());
    }
    Ok(())
}

/// Create configured gateways that did not come back from the durable store, then connect all
async fn bring_up_gateways(gateways: &GatewayManager, config: &BridgeConfig) {
    for spec in &config.gateways {
        let existing = spec
            .id
            .as_deref()
            .and_then(|id| gateways.topology().get_gateway(id));
        if existing.is_none() {
            if let Err(e) = gateways.create_gateway(spec.clone()).await {
                component_warn!("gateway", "Failed to create gateway {}: {}", spec.name, e);
            }
        }
    }

    for gateway in gateways.topology().list_gateways() {
        match gateways.connect(&gateway.id).await {
            Ok(g) => component_info!("gateway", "Gateway {} is {:?}", g.id, g.status),
            Err(e) => component_warn!("gateway", "Gateway {} did not connect: {}", gateway.id, e),
        }
    }
}

fn spawn_status_logger(
    gateways: Arc<GatewayManager>,
    failover: Arc<FailoverController>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let bridge = gateways.stats();
                    let status = failover.service_status().await;
                    info!(
                        "Status: gateways {}/{} connected, tunnels {}, routes {}, monitored nodes {}, active switches {}, failovers {} ({:.0}% ok, avg {:.1} ms)",
                        bridge.connected_gateways,
                        bridge.gateways,
                        bridge.tunnels,
                        bridge.routes,
                        status.monitored_nodes,
                        status.active_events,
                        status.statistics.total_failovers,
                        status.statistics.success_rate() * 100.0,
                        status.statistics.average_failover_time_ms
                    );
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("NTN_BRIDGE_LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    init_logging(&log_level)?;

    info!("Starting NTN bridge service v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if args.standalone {
        info!("Running standalone, config file ignored");
        BridgeConfig::standalone()
    } else {
        BridgeConfig::load_from_file(&args.config)?
    };
    args.apply_to(&mut config);

    let storage_mode = config.storage()?;
    info!("Opening durable store: {:?}", storage_mode);
    let durable = open_store(storage_mode)
        .await
        .context("opening durable store")?;

    let topology = Arc::new(TopologyStore::new(
        durable.clone(),
        TopologyStoreConfig::default(),
    ));
    match topology.load_from_store().await {
        Ok((nodes, gateways)) => info!(
            "Restored {} mesh nodes and {} gateways from the durable store",
            nodes, gateways
        ),
        Err(e) => warn!("Could not restore topology from the durable store: {}", e),
    }
    seed_topology(&topology, &config).await?;

    let optimizer = Arc::new(RoutingOptimizer::new(
        topology.clone(),
        OptimizerConfig::default(),
    ));
    let gateways = Arc::new(GatewayManager::new(
        topology.clone(),
        optimizer,
        GatewayConfig {
            probe_timeout: config.probe_timeout,
            default_upstream_address: config.upstream_address.clone(),
            default_upstream_port: config.upstream_port,
            ..GatewayConfig::default()
        },
    ));
    bring_up_gateways(&gateways, &config).await;

    let shutdown = CancellationToken::new();
    let monitor = BridgeMonitor::new(
        gateways.clone(),
        MonitorConfig {
            interval: config.monitor_interval,
            ..MonitorConfig::default()
        },
    )
    .spawn(shutdown.child_token());

    let quality: Arc<dyn ConnectionQualityAssessor> = match &config.quality_file {
        Some(path) => {
            info!("Reading link quality from {:?}", path);
            Arc::new(FileQualitySource::new(path.clone()))
        }
        None => {
            warn!("No quality file configured, failover only switches on manual triggers");
            Arc::new(StaticQualitySource::new())
        }
    };
    let sink: Arc<dyn AttachmentSink> = match &config.attachment_dir {
        Some(dir) => Arc::new(
            FileAttachmentSink::new(dir.clone())
                .await
                .with_context(|| format!("preparing attachment directory {:?}", dir))?,
        ),
        None => Arc::new(MemoryAttachmentSink::new()),
    };

    let failover = Arc::new(FailoverController::new(
        config.failover.to_failover_config(),
        gateways.clone(),
        quality,
        sink,
        durable,
    ));
    failover.start().await;
    for node_id in &config.monitored_nodes {
        if let Err(e) = failover.register_node(node_id).await {
            component_error!("failover", "Cannot monitor node {}: {}", node_id, e);
        }
    }

    let status = spawn_status_logger(
        gateways.clone(),
        failover.clone(),
        config.status_interval,
        shutdown.child_token(),
    );

    info!("NTN bridge {} started", config.node_id);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }

    failover.stop().await;
    shutdown.cancel();
    for (name, handle) in [("bridge monitor", monitor), ("status logger", status)] {
        if let Err(e) = handle.await {
            warn!("{} ended abnormally: {}", name, e);
        }
    }

    for gateway in gateways.topology().list_gateways() {
        if gateway.status == GatewayStatus::Connected {
            if let Err(e) = gateways.disconnect(&gateway.id).await {
                warn!("Failed to disconnect gateway {}: {}", gateway.id, e);
            }
        }
    }

    info!("NTN bridge shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_storage::MemoryStore;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "ntn-bridge",
            "--storage-mode",
            "file",
            "--probe-timeout",
            "250ms",
            "--monitor-interval",
            "3s",
        ]);
        let mut config = BridgeConfig::default();
        args.apply_to(&mut config);

        assert_eq!(config.storage_mode, "file");
        assert_eq!(config.probe_timeout, Duration::from_millis(250));
        assert_eq!(config.monitor_interval, Duration::from_secs(3));
        assert_eq!(config.storage_data_dir, PathBuf::from("./bridgedata"));
        assert!(!args.standalone);
    }

    #[tokio::test]
    async fn test_seed_topology_links_nodes() {
        let topology = TopologyStore::new(Arc::new(MemoryStore::new()), TopologyStoreConfig::default());
        let mut config = BridgeConfig::standalone();
        config.mesh_nodes.push(crate::config::NodeSeed {
            id: "relay1".to_string(),
            name: None,
            node_type: bridge_topology::NodeType::Relay,
            ip_address: None,
            routing_protocol: bridge_wire::MeshRoutingProtocol::Aodv,
            links: vec!["ground_station".to_string()],
        });

        seed_topology(&topology, &config).await.unwrap();
        let relay = topology.get_node("relay1").unwrap();
        assert_eq!(relay.name, "relay1");
        assert!(relay.neighbor("ground_station").is_some());
        assert!(topology
            .get_node("ground_station")
            .unwrap()
            .neighbor("relay1")
            .is_some());
    }

    #[tokio::test]
    async fn test_seed_topology_rejects_unknown_link() {
        let topology = TopologyStore::new(Arc::new(MemoryStore::new()), TopologyStoreConfig::default());
        let mut config = BridgeConfig::standalone();
        config.mesh_nodes[0].links.push("nowhere".to_string());
        assert!(seed_topology(&topology, &config).await.is_err());
    }
}
