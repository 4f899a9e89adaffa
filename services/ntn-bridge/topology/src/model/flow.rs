//! Traffic flows observed through bridge gateways.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QosClass;

/// Direction of a bridged flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    /// Core network towards the mesh
    CoreToMesh,
    /// Mesh towards the core network
    MeshToCore,
}

/// Per (gateway, peer node, direction) traffic counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficFlow {
    /// Flow id
    pub id: String,
    /// Gateway carrying the flow
    pub gateway_id: String,
    /// Mesh node at the far end
    pub peer_node_id: String,
    /// Direction
    pub direction: FlowDirection,
    /// Class of the most recent packet
    pub qos_class: QosClass,
    /// Packets seen
    pub packets: u64,
    /// Bytes seen
    pub bytes: u64,
    /// First packet
    pub first_seen: DateTime<Utc>,
    /// Most recent packet
    pub last_seen: DateTime<Utc>,
}
