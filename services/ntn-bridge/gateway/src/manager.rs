//! Gateway lifecycle and the forwarding paths between the core network and the mesh.

use bridge_routing::{MeshRoute, RoutingOptimizer};
use bridge_topology::{
    BridgeGateway, FlowDirection, GatewayStatus, LinkQuality, MeshNode, NodeStatus, NodeType,
    RadioParameters, TopologyStore,
};
use bridge_wire::{MeshRoutingProtocol, ProtocolAdapter, ProtocolEvent};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::probe::{ReachabilityProbe, UdpProbe};
use crate::qos::{AppliedPolicy, QosManager};
use crate::tunnel::TunnelManager;
use crate::GatewayError;

/// Logical endpoint name of the core network side
pub const CORE_ENDPOINT: &str = "5g_core";

/// Gateway manager configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bound on the upstream reachability probe
    pub probe_timeout: Duration,
    /// Connected gateways without a heartbeat for this long are failed
    pub heartbeat_timeout: Duration,
    /// Upstream used by tunnels created without an explicit endpoint
    pub default_upstream_address: String,
    /// Upstream port used by tunnels created without an explicit endpoint
    pub default_upstream_port: u16,
    /// Emit sequenced tunnel headers on uplink
    pub tunnel_sequencing: bool,
    /// Weight kept from the previous value when smoothing metrics
    pub metrics_smoothing: f64,
    /// Bound on a single uplink datagram send
    pub send_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(800),
            heartbeat_timeout: Duration::from_secs(60),
            default_upstream_address: "172.20.0.30".to_string(),
            default_upstream_port: 2152,
            tunnel_sequencing: false,
            metrics_smoothing: 0.9,
            send_timeout: Duration::from_secs(1),
        }
    }
}

fn default_forwarding() -> bool {
    true
}

/// Parameters for a new gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySpec {
    /// Fixed id; a random one is assigned when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Display name
    pub name: String,
    /// Upstream user-plane address
    pub upstream_address: String,
    /// Upstream user-plane port
    pub upstream_port: u16,
    /// Mesh node the gateway is attached to
    pub mesh_node_id: String,
    /// Mesh-side interface name
    #[serde(default)]
    pub mesh_interface: Option<String>,
    /// Whether forwarding starts enabled
    #[serde(default = "default_forwarding")]
    pub forwarding_enabled: bool,
}

impl GatewaySpec {
    /// Spec with a random id, default interface and forwarding enabled
    pub fn new(
        name: impl Into<String>,
        upstream_address: impl Into<String>,
        upstream_port: u16,
        mesh_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            upstream_address: upstream_address.into(),
            upstream_port,
            mesh_node_id: mesh_node_id.into(),
            mesh_interface: None,
            forwarding_enabled: true,
        }
    }
}

/// Result of a core-to-mesh forward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardOutcome {
    /// Gateway used
    pub gateway_id: String,
    /// Policy applied to the packet
    pub policy: AppliedPolicy,
    /// Mesh path taken
    pub route: MeshRoute,
}

/// Result of a mesh-to-core forward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkOutcome {
    /// Gateway used
    pub gateway_id: String,
    /// Tunnel used
    pub tunnel_id: String,
    /// Tunnel endpoint identifier in the header
    pub teid: u32,
    /// Policy applied to the packet
    pub policy: AppliedPolicy,
    /// Encapsulated frame size
    pub frame_len: usize,
    /// Upstream endpoint the frame was sent to
    pub upstream: String,
}

/// Request to attach a node to the mesh behind a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshAttachRequest {
    /// Node being attached (UE identity, not the mesh node id)
    pub node_id: String,
    /// Gateway to try first
    #[serde(default)]
    pub preferred_gateway: Option<String>,
}

/// Everything created by [`GatewayManager::attach_mesh_node`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshAttachment {
    /// Node that was attached
    pub node_id: String,
    /// Mesh node registered for it
    pub mesh_node_id: String,
    /// Gateway serving it
    pub gateway_id: String,
    /// Tunnel carrying its traffic
    pub tunnel_id: String,
    /// Tunnel endpoint identifier
    pub teid: u32,
    /// Address assigned to the node
    pub ue_address: String,
    /// Upstream address of the gateway
    pub upstream_address: String,
    /// Upstream port of the gateway
    pub upstream_port: u16,
    /// Mesh routing protocol in use
    pub routing_protocol: MeshRoutingProtocol,
    /// Radio parameters of the mesh node
    pub radio: RadioParameters,
}

/// Aggregate bridge counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Known gateways
    pub gateways: usize,
    /// Gateways in the connected state
    pub connected_gateways: usize,
    /// Gateways in the failed state
    pub failed_gateways: usize,
    /// Known mesh nodes
    pub nodes: usize,
    /// Active mesh nodes
    pub active_nodes: usize,
    /// Open tunnels
    pub tunnels: usize,
    /// Installed routes
    pub routes: usize,
    /// Tracked traffic flows
    pub flows: usize,
    /// Packets forwarded core to mesh
    pub packets_to_mesh: u64,
    /// Packets forwarded mesh to core
    pub packets_to_core: u64,
    /// Packets dropped
    pub packets_dropped: u64,
    /// Bytes forwarded in either direction
    pub bytes_forwarded: u64,
}

/// Owns gateway lifecycle and the two forwarding directions
pub struct GatewayManager {
    config: GatewayConfig,
    topology: Arc<TopologyStore>,
    optimizer: Arc<RoutingOptimizer>,
    tunnels: TunnelManager,
    qos: QosManager,
    adapter: ProtocolAdapter,
    probe: Arc<dyn ReachabilityProbe>,
    uplink: OnceCell<UdpSocket>,
    last_forward: DashMap<String, Instant>,
}

impl GatewayManager {
    /// Create a manager probing with [`UdpProbe`]
    pub fn new(
        topology: Arc<TopologyStore>,
        optimizer: Arc<RoutingOptimizer>,
        config: GatewayConfig,
    ) -> Self {
        let tunnels = TunnelManager::new(
            config.default_upstream_address.clone(),
            config.default_upstream_port,
        )
        .with_sequencing(config.tunnel_sequencing);

        Self {
            probe: Arc::new(UdpProbe::new(config.probe_timeout)),
            config,
            topology,
            optimizer,
            tunnels,
            qos: QosManager::new(),
            adapter: ProtocolAdapter::new(),
            uplink: OnceCell::new(),
            last_forward: DashMap::new(),
        }
    }

    /// Replace the reachability probe
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace the QoS manager
    pub fn with_qos(mut self, qos: QosManager) -> Self {
        self.qos = qos;
        self
    }

    /// Configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Shared topology store
    pub fn topology(&self) -> &Arc<TopologyStore> {
        &self.topology
    }

    /// Shared routing optimizer
    pub fn optimizer(&self) -> &Arc<RoutingOptimizer> {
        &self.optimizer
    }

    /// Tunnel manager
    pub fn tunnels(&self) -> &TunnelManager {
        &self.tunnels
    }

    /// QoS manager
    pub fn qos(&self) -> &QosManager {
        &self.qos
    }

    // ---- lifecycle ----

    /// Register a gateway attached to an existing mesh node
    pub async fn create_gateway(&self, spec: GatewaySpec) -> Result<BridgeGateway, GatewayError> {
        self.topology.load_node(&spec.mesh_node_id).await?;

        let id = spec.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut gateway = BridgeGateway::new(
            id,
            spec.name,
            spec.upstream_address,
            spec.upstream_port,
            spec.mesh_node_id,
        );
        if let Some(interface) = spec.mesh_interface {
            gateway.mesh_interface = interface;
        }
        gateway.forwarding_enabled = spec.forwarding_enabled;

        let gateway = self.topology.attach_gateway(gateway).await?;
        info!(
            "Created gateway {} ({}) upstream {} mesh node {}",
            gateway.id,
            gateway.name,
            gateway.upstream_endpoint(),
            gateway.mesh_node_id
        );
        Ok(gateway)
    }

    /// Probe the upstream endpoint and move the gateway to connected or failed
    pub async fn connect(&self, gateway_id: &str) -> Result<BridgeGateway, GatewayError> {
        let gateway = self
            .topology
            .get_gateway(gateway_id)
            .ok_or_else(|| GatewayError::GatewayNotFound(gateway_id.to_string()))?;
        if gateway.status == GatewayStatus::Connected {
            return Ok(gateway);
        }

        self.topology
            .update_gateway(gateway_id, |g| g.transition(GatewayStatus::Connecting))
            .await?;

        let endpoint = gateway.upstream_endpoint();
        let result = match tokio::time::timeout(
            self.config.probe_timeout,
            self.probe
                .probe(&gateway.upstream_address, gateway.upstream_port),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::ProbeFailure {
                endpoint: endpoint.clone(),
                reason: format!("timed out after {:?}", self.config.probe_timeout),
            }),
        };

        match result {
            Ok(rtt) => {
                let now = Utc::now();
                let connected = self
                    .topology
                    .update_gateway(gateway_id, |g| {
                        g.transition(GatewayStatus::Connected)?;
                        g.last_heartbeat = Some(now);
                        g.metrics.latency_ms = rtt.as_secs_f64() * 1000.0;
                        Ok(())
                    })
                    .await?;
                info!(
                    "Gateway {} connected to {} (probe {:?})",
                    gateway_id, endpoint, rtt
                );
                Ok(connected)
            }
            Err(e) => {
                self.topology
                    .update_gateway(gateway_id, |g| g.transition(GatewayStatus::Failed))
                    .await?;
                warn!("Gateway {} failed to connect: {}", gateway_id, e);
                Err(e)
            }
        }
    }

    /// Take a gateway out of service
    pub async fn disconnect(&self, gateway_id: &str) -> Result<BridgeGateway, GatewayError> {
        let gateway = self
            .topology
            .update_gateway(gateway_id, |g| {
                if g.status != GatewayStatus::Disconnected {
                    g.transition(GatewayStatus::Disconnected)?;
                }
                g.last_heartbeat = None;
                Ok(())
            })
            .await?;
        self.last_forward.remove(gateway_id);
        info!("Gateway {} disconnected", gateway_id);
        Ok(gateway)
    }

    /// Gateway that is allowed to forward right now
    fn forwarding_gateway(&self, gateway_id: &str) -> Result<BridgeGateway, GatewayError> {
        let gateway = self
            .topology
            .get_gateway(gateway_id)
            .ok_or_else(|| GatewayError::GatewayNotFound(gateway_id.to_string()))?;
        if !gateway.can_forward() {
            return Err(GatewayError::NotConnected {
                gateway_id: gateway_id.to_string(),
                status: gateway.status,
            });
        }
        Ok(gateway)
    }

    // ---- forwarding ----

    /// Forward a packet from the core network to a mesh node
    pub async fn forward_5g_to_mesh(
        &self,
        gateway_id: &str,
        payload: &[u8],
        destination: &str,
    ) -> Result<ForwardOutcome, GatewayError> {
        let gateway = self.forwarding_gateway(gateway_id)?;
        if !self.topology.contains_node(destination) {
            return Err(GatewayError::NodeNotFound(destination.to_string()));
        }

        let class = self.qos.classify(payload, CORE_ENDPOINT, destination);
        let policy = self
            .qos
            .apply_policy_with(class, gateway.policy_for(class), payload);
        let objective = QosManager::routing_objective(class);

        let route = match self
            .optimizer
            .find_route(&gateway.mesh_node_id, destination, objective)
        {
            Some(route) => route,
            None => {
                self.record_drop(gateway_id);
                return Err(GatewayError::NoRoute {
                    source_id: gateway.mesh_node_id,
                    destination: destination.to_string(),
                });
            }
        };

        debug!(
            "Core -> {} via gateway {}: {} bytes, {}, path {}",
            destination,
            gateway_id,
            payload.len(),
            class,
            route.hops.join(" -> ")
        );

        self.record_forward(
            gateway_id,
            FlowDirection::CoreToMesh,
            payload.len(),
            Some(route.total_latency_ms),
        );
        self.topology.record_flow(
            gateway_id,
            destination,
            FlowDirection::CoreToMesh,
            class,
            payload.len(),
        );

        Ok(ForwardOutcome {
            gateway_id: gateway_id.to_string(),
            policy,
            route,
        })
    }

    /// Forward a packet from a mesh node to the core network through its tunnel
    pub async fn forward_mesh_to_5g(
        &self,
        gateway_id: &str,
        payload: &[u8],
        source_node: &str,
        tunnel_id: &str,
    ) -> Result<UplinkOutcome, GatewayError> {
        let gateway = self.forwarding_gateway(gateway_id)?;
        let class = self.qos.classify(payload, source_node, CORE_ENDPOINT);
        let policy = self
            .qos
            .apply_policy_with(class, gateway.policy_for(class), payload);

        let tunnel = self
            .tunnels
            .get_tunnel(tunnel_id)
            .ok_or_else(|| GatewayError::TunnelNotFound(tunnel_id.to_string()))?;
        let frame = self.tunnels.forward_uplink(tunnel_id, payload)?;
        let upstream = tunnel.upstream_endpoint();

        if let Err(e) = self.send_uplink(&frame, &upstream).await {
            self.record_drop(gateway_id);
            warn!(
                "Uplink on tunnel {} to {} failed: {}",
                tunnel_id, upstream, e
            );
            return Err(e);
        }

        debug!(
            "{} -> core via gateway {}: {} bytes, {}, tunnel {}",
            source_node,
            gateway_id,
            payload.len(),
            class,
            tunnel_id
        );

        self.record_forward(gateway_id, FlowDirection::MeshToCore, payload.len(), None);
        self.topology.record_flow(
            gateway_id,
            source_node,
            FlowDirection::MeshToCore,
            class,
            payload.len(),
        );

        Ok(UplinkOutcome {
            gateway_id: gateway_id.to_string(),
            tunnel_id: tunnel_id.to_string(),
            teid: tunnel.teid,
            policy,
            frame_len: frame.len(),
            upstream,
        })
    }

    /// Strip the tunnel header from a frame received from the core network
    pub fn handle_downlink(&self, tunnel_id: &str, frame: Bytes) -> Result<Bytes, GatewayError> {
        self.tunnels.forward_downlink(tunnel_id, frame)
    }

    /// Decode a mesh control packet and mark the reporting node as seen
    pub async fn handle_control_packet(
        &self,
        reporting_node: &str,
        raw: &[u8],
    ) -> Result<ProtocolEvent, GatewayError> {
        let event = self.adapter.parse(raw)?;
        self.topology.touch_node(reporting_node, Utc::now()).await?;
        debug!(
            "Control packet from {}: {} ({} bytes)",
            reporting_node,
            event.protocol.name(),
            event.body_len
        );
        Ok(event)
    }

    async fn send_uplink(&self, frame: &[u8], upstream: &str) -> Result<(), GatewayError> {
        let socket = self
            .uplink
            .get_or_try_init(|| async { UdpSocket::bind("0.0.0.0:0").await })
            .await?;

        match tokio::time::timeout(self.config.send_timeout, socket.send_to(frame, upstream)).await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::Io(e)),
            Err(_) => Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("send to {} timed out", upstream),
            ))),
        }
    }

    fn smooth(&self, previous: f64, sample: f64) -> f64 {
        let keep = self.config.metrics_smoothing;
        keep * previous + (1.0 - keep) * sample
    }

    fn record_forward(
        &self,
        gateway_id: &str,
        direction: FlowDirection,
        bytes: usize,
        latency_ms: Option<f64>,
    ) {
        let now = Instant::now();
        let elapsed = self
            .last_forward
            .insert(gateway_id.to_string(), now)
            .map(|prev| now.duration_since(prev))
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(1));
        let throughput = (bytes as f64 * 8.0) / elapsed.as_secs_f64() / 1_000_000.0;

        let result = self.topology.update_gateway_volatile(gateway_id, |g| {
            let m = &mut g.metrics;
            m.throughput_mbps = self.smooth(m.throughput_mbps, throughput);
            if let Some(latency) = latency_ms {
                m.latency_ms = self.smooth(m.latency_ms, latency);
            }
            m.packet_loss_rate = self.smooth(m.packet_loss_rate, 0.0);
            m.bytes_forwarded += bytes as u64;
            match direction {
                FlowDirection::CoreToMesh => m.packets_to_mesh += 1,
                FlowDirection::MeshToCore => {
                    m.packets_to_core += 1;
                    g.last_heartbeat = Some(Utc::now());
                }
            }
        });
        if let Err(e) = result {
            debug!("Metrics update for gateway {} skipped: {}", gateway_id, e);
        }
    }

    fn record_drop(&self, gateway_id: &str) {
        let result = self.topology.update_gateway_volatile(gateway_id, |g| {
            g.metrics.packets_dropped += 1;
            g.metrics.packet_loss_rate = self.smooth(g.metrics.packet_loss_rate, 1.0);
        });
        if let Err(e) = result {
            debug!("Drop count for gateway {} skipped: {}", gateway_id, e);
        }
    }

    // ---- health ----

    /// Fail connected gateways whose heartbeat is older than the timeout at `now`
    pub async fn check_gateway_health_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut failed = Vec::new();

        for gateway in self.topology.list_gateways() {
            if gateway.status != GatewayStatus::Connected {
                continue;
            }
            let expired = match gateway.heartbeat_age(now) {
                Some(age) => age > timeout,
                None => true,
            };
            if !expired {
                continue;
            }

            match self
                .topology
                .update_gateway(&gateway.id, |g| g.transition(GatewayStatus::Failed))
                .await
            {
                Ok(_) => {
                    warn!(
                        "Gateway {} heartbeat expired (last {:?}), marking failed",
                        gateway.id, gateway.last_heartbeat
                    );
                    failed.push(gateway.id);
                }
                Err(e) => debug!("Gateway {} changed during health check: {}", gateway.id, e),
            }
        }
        failed
    }

    /// Health check against the current time
    pub async fn check_gateway_health(&self) -> Vec<String> {
        self.check_gateway_health_at(Utc::now()).await
    }

    /// Re-probe connected gateways and refresh the heartbeat of those that answer
    pub async fn keepalive(&self) -> usize {
        let mut refreshed = 0;
        for gateway in self.topology.list_gateways() {
            if gateway.status != GatewayStatus::Connected {
                continue;
            }
            match self
                .probe
                .probe(&gateway.upstream_address, gateway.upstream_port)
                .await
            {
                Ok(rtt) => {
                    let rtt_ms = rtt.as_secs_f64() * 1000.0;
                    let result = self.topology.update_gateway_volatile(&gateway.id, |g| {
                        g.last_heartbeat = Some(Utc::now());
                        g.metrics.latency_ms = self.smooth(g.metrics.latency_ms, rtt_ms);
                    });
                    if result.is_ok() {
                        refreshed += 1;
                    }
                }
                Err(e) => warn!("Keepalive for gateway {} failed: {}", gateway.id, e),
            }
        }
        refreshed
    }

    // ---- mesh attachment ----

    fn select_gateway(&self, preferred: Option<&str>) -> Result<BridgeGateway, GatewayError> {
        if let Some(id) = preferred {
            match self.topology.get_gateway(id) {
                Some(gateway) if gateway.can_forward() => return Ok(gateway),
                Some(gateway) => debug!(
                    "Preferred gateway {} is {}, looking for another",
                    id, gateway.status
                ),
                None => debug!("Preferred gateway {} unknown", id),
            }
        }

        self.topology
            .list_gateways()
            .into_iter()
            .find(|g| g.can_forward())
            .ok_or(GatewayError::NoConnectedGateway)
    }

    /// Attach a node to the mesh behind a connected gateway
    pub async fn attach_mesh_node(
        &self,
        request: MeshAttachRequest,
    ) -> Result<MeshAttachment, GatewayError> {
        let gateway = self.select_gateway(request.preferred_gateway.as_deref())?;
        let anchor = self.topology.load_node(&gateway.mesh_node_id).await?;

        let node_id = request.node_id;
        let mesh_node_id = format!("mesh_{}", node_id);
        let tunnel_id = format!("tunnel_{}", node_id);
        let ue_address = ue_address_for(&node_id);

        let node = self
            .topology
            .register_node(
                MeshNode::new(&mesh_node_id, format!("UAV {}", node_id), NodeType::MobileUnit)
                    .with_ip_address(&ue_address)
                    .with_protocol(anchor.routing_protocol),
            )
            .await;

        if let Err(e) = self
            .topology
            .link_nodes(&mesh_node_id, &gateway.mesh_node_id, LinkQuality::default())
            .await
        {
            self.rollback_node(&mesh_node_id).await;
            return Err(e.into());
        }

        if self.tunnels.remove_tunnel(&tunnel_id) {
            debug!("Replaced stale tunnel {}", tunnel_id);
        }
        let tunnel = match self.tunnels.create_tunnel_to(
            &tunnel_id,
            &ue_address,
            &mesh_node_id,
            &gateway.upstream_address,
            gateway.upstream_port,
        ) {
            Ok(tunnel) => tunnel,
            Err(e) => {
                self.rollback_node(&mesh_node_id).await;
                return Err(e);
            }
        };

        info!(
            "Attached {} to mesh as {} via gateway {} (tunnel {})",
            node_id, mesh_node_id, gateway.id, tunnel_id
        );

        Ok(MeshAttachment {
            node_id,
            mesh_node_id,
            gateway_id: gateway.id,
            tunnel_id,
            teid: tunnel.teid,
            ue_address,
            upstream_address: tunnel.upstream_address,
            upstream_port: tunnel.upstream_port,
            routing_protocol: node.routing_protocol,
            radio: node.radio,
        })
    }

    async fn rollback_node(&self, mesh_node_id: &str) {
        if let Err(e) = self.topology.remove_node(mesh_node_id).await {
            warn!("Rollback of mesh node {} failed: {}", mesh_node_id, e);
        }
    }

    /// Undo an attachment: drop the tunnel, flows and mesh node
    pub async fn release_mesh_attachment(
        &self,
        attachment: &MeshAttachment,
    ) -> Result<(), GatewayError> {
        self.tunnels.remove_tunnel(&attachment.tunnel_id);
        self.topology
            .remove_flows_for_node(&attachment.mesh_node_id);

        match self.topology.remove_node(&attachment.mesh_node_id).await {
            Ok(_) | Err(bridge_topology::TopologyError::NodeNotFound(_)) => {
                info!(
                    "Released mesh attachment of {} ({})",
                    attachment.node_id, attachment.mesh_node_id
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    // ---- stats ----

    /// Aggregate counters across gateways, nodes, tunnels and routes
    pub fn stats(&self) -> BridgeStats {
        let snapshot = self.topology.snapshot();
        let mut stats = BridgeStats {
            gateways: snapshot.gateways.len(),
            nodes: snapshot.nodes.len(),
            active_nodes: snapshot
                .nodes
                .iter()
                .filter(|n| n.status == NodeStatus::Active)
                .count(),
            tunnels: self.tunnels.tunnel_count(),
            routes: self.optimizer.route_count(),
            flows: self.topology.flows().len(),
            ..BridgeStats::default()
        };

        for gateway in &snapshot.gateways {
            match gateway.status {
                GatewayStatus::Connected => stats.connected_gateways += 1,
                GatewayStatus::Failed => stats.failed_gateways += 1,
                _ => {}
            }
            stats.packets_to_mesh += gateway.metrics.packets_to_mesh;
            stats.packets_to_core += gateway.metrics.packets_to_core;
            stats.packets_dropped += gateway.metrics.packets_dropped;
            stats.bytes_forwarded += gateway.metrics.bytes_forwarded;
        }
        stats
    }
}

/// Deterministic private address for an attached node
fn ue_address_for(node_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    node_id.hash(&mut hasher);
    let h = hasher.finish();
    format!("192.168.{}.{}", (h >> 8) % 254 + 1, h % 253 + 2)
}
