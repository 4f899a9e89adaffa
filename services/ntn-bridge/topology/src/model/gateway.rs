//! Bridge gateways between the core network user plane and the mesh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{QosClass, QosPolicy};
use crate::TopologyError;

/// Gateway lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    /// Not connected upstream
    Disconnected,
    /// Probing the upstream endpoint
    Connecting,
    /// Upstream reachable, forwarding allowed
    Connected,
    /// Handing traffic over to another path
    Switching,
    /// Probe or heartbeat failed
    Failed,
    /// Held in reserve
    Standby,
}

impl GatewayStatus {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: GatewayStatus) -> bool {
        use GatewayStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Switching)
                | (Connected, Failed)
                | (Connected, Disconnected)
                | (Switching, Connected)
                | (Switching, Failed)
                | (Failed, Connecting)
                | (Failed, Disconnected)
                | (Standby, Connecting)
        )
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatewayStatus::Disconnected => "disconnected",
            GatewayStatus::Connecting => "connecting",
            GatewayStatus::Connected => "connected",
            GatewayStatus::Switching => "switching",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Standby => "standby",
        };
        f.write_str(s)
    }
}

/// Rolling forwarding metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayMetrics {
    /// Smoothed throughput estimate in Mbps
    pub throughput_mbps: f64,
    /// Smoothed path latency in milliseconds
    pub latency_ms: f64,
    /// Smoothed loss fraction
    pub packet_loss_rate: f64,
    /// Packets forwarded core to mesh
    pub packets_to_mesh: u64,
    /// Packets forwarded mesh to core
    pub packets_to_core: u64,
    /// Bytes forwarded in either direction
    pub bytes_forwarded: u64,
    /// Packets dropped for lack of a route or tunnel
    pub packets_dropped: u64,
}

/// A bridge between the upstream user-plane gateway and a mesh node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeGateway {
    /// Unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Lifecycle status
    pub status: GatewayStatus,
    /// Upstream gateway address
    pub upstream_address: String,
    /// Upstream gateway port
    pub upstream_port: u16,
    /// Mesh node this gateway attaches to
    pub mesh_node_id: String,
    /// Mesh-side interface name
    pub mesh_interface: String,
    /// Per-class QoS policies
    pub qos_policies: BTreeMap<QosClass, QosPolicy>,
    /// Whether packet forwarding is enabled
    pub forwarding_enabled: bool,
    /// Rolling metrics
    #[serde(default)]
    pub metrics: GatewayMetrics,
    /// Last successful upstream contact
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl BridgeGateway {
    /// Create a disconnected gateway with the default QoS table
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        upstream_address: impl Into<String>,
        upstream_port: u16,
        mesh_node_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            status: GatewayStatus::Disconnected,
            upstream_address: upstream_address.into(),
            upstream_port,
            mesh_node_id: mesh_node_id.into(),
            mesh_interface: "mesh0".to_string(),
            qos_policies: QosClass::ALL.iter().map(|c| (*c, c.policy())).collect(),
            forwarding_enabled: true,
            metrics: GatewayMetrics::default(),
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Upstream endpoint as `address:port`
    pub fn upstream_endpoint(&self) -> String {
        format!("{}:{}", self.upstream_address, self.upstream_port)
    }

    /// Only a connected gateway with forwarding enabled may carry traffic
    pub fn can_forward(&self) -> bool {
        self.status == GatewayStatus::Connected && self.forwarding_enabled
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: GatewayStatus) -> Result<(), TopologyError> {
        if !self.status.can_transition_to(next) {
            return Err(TopologyError::InvalidTransition {
                gateway_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Heartbeat age at `now`, if a heartbeat was ever seen
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_heartbeat.map(|hb| now - hb)
    }

    /// Policy for a class, falling back to the fixed table
    pub fn policy_for(&self, class: QosClass) -> QosPolicy {
        self.qos_policies
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.policy())
    }
}
