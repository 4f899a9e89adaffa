//! Mesh nodes, their links and routing tables.

use bridge_wire::MeshRoutingProtocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a mesh node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Relay in the mesh
    Relay,
    /// Ground station with backhaul
    GroundStation,
    /// Mobile unit (UAV)
    MobileUnit,
    /// Fixed infrastructure unit
    FixedUnit,
}

/// Operational status of a mesh node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Participating in the mesh
    Active,
    /// Administratively idle
    Inactive,
    /// Joining the mesh
    Connecting,
    /// Not heard from recently
    Disconnected,
    /// Under maintenance
    Maintenance,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Active => "active",
            NodeStatus::Inactive => "inactive",
            NodeStatus::Connecting => "connecting",
            NodeStatus::Disconnected => "disconnected",
            NodeStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// Geodetic position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// When the fix was taken
    pub timestamp: DateTime<Utc>,
}

/// Radio configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadioParameters {
    /// Carrier frequency in MHz
    pub frequency_mhz: f64,
    /// Transmit power in dBm
    pub transmit_power_dbm: f64,
}

impl Default for RadioParameters {
    fn default() -> Self {
        Self {
            frequency_mhz: 900.0,
            transmit_power_dbm: 20.0,
        }
    }
}

/// Per-link quality metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkQuality {
    /// Received signal strength in dBm
    pub signal_strength_dbm: f64,
    /// Signal-to-noise ratio in dB
    pub snr_db: f64,
    /// Packet loss fraction (0-1)
    pub packet_loss_rate: f64,
    /// One-way latency in milliseconds
    pub latency_ms: f64,
    /// Available bandwidth in Mbps
    pub bandwidth_mbps: f64,
    /// Jitter in milliseconds
    pub jitter_ms: f64,
    /// Link utilization fraction (0-1)
    pub utilization: f64,
}

impl Default for LinkQuality {
    fn default() -> Self {
        Self {
            signal_strength_dbm: -70.0,
            snr_db: 20.0,
            packet_loss_rate: 0.0,
            latency_ms: 10.0,
            bandwidth_mbps: 10.0,
            jitter_ms: 1.0,
            utilization: 0.0,
        }
    }
}

/// A directed link to a neighboring node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Neighbor node id
    pub node_id: String,
    /// Link metrics as seen from the owning node
    pub quality: LinkQuality,
    /// Last metric refresh
    pub last_updated: DateTime<Utc>,
}

/// Installed route towards a destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination node id
    pub destination: String,
    /// First hop towards the destination
    pub next_hop: String,
    /// Number of links traversed
    pub hop_count: u32,
    /// Path cost under the objective that produced it
    pub metric: f64,
    /// Expiry
    pub valid_until: DateTime<Utc>,
}

impl RouteEntry {
    /// Whether the entry is still usable at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }
}

/// Synthetic host load telemetry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeLoad {
    /// CPU utilization percentage
    pub cpu_percent: f64,
    /// Memory utilization percentage
    pub memory_percent: f64,
}

impl Default for NodeLoad {
    fn default() -> Self {
        Self {
            cpu_percent: 30.0,
            memory_percent: 40.0,
        }
    }
}

/// A node participating in the ad-hoc mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshNode {
    /// Unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Node role
    pub node_type: NodeType,
    /// Operational status
    pub status: NodeStatus,
    /// Last known position
    #[serde(default)]
    pub position: Option<GeoPosition>,
    /// Radio configuration
    #[serde(default)]
    pub radio: RadioParameters,
    /// Mesh routing protocol spoken by the node
    pub routing_protocol: MeshRoutingProtocol,
    /// Mesh-side IPv4 address
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Outgoing links in discovery order
    #[serde(default)]
    pub neighbors: Vec<Neighbor>,
    /// Installed routes
    #[serde(default)]
    pub routing_table: Vec<RouteEntry>,
    /// Host load telemetry
    #[serde(default)]
    pub load: NodeLoad,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
    /// Last time the node was heard from
    pub last_seen: DateTime<Utc>,
}

impl MeshNode {
    /// Create an active node with default radio and load
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            status: NodeStatus::Active,
            position: None,
            radio: RadioParameters::default(),
            routing_protocol: MeshRoutingProtocol::Aodv,
            ip_address: None,
            neighbors: Vec::new(),
            routing_table: Vec::new(),
            load: NodeLoad::default(),
            created_at: now,
            updated_at: now,
            last_seen: now,
        }
    }

    /// Set the mesh-side address
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Set the routing protocol
    pub fn with_protocol(mut self, protocol: MeshRoutingProtocol) -> Self {
        self.routing_protocol = protocol;
        self
    }

    /// Add or replace the link to `neighbor_id`, keeping discovery order
    pub fn upsert_neighbor(&mut self, neighbor_id: &str, quality: LinkQuality, now: DateTime<Utc>) {
        if let Some(existing) = self.neighbors.iter_mut().find(|n| n.node_id == neighbor_id) {
            existing.quality = quality;
            existing.last_updated = now;
        } else {
            self.neighbors.push(Neighbor {
                node_id: neighbor_id.to_string(),
                quality,
                last_updated: now,
            });
        }
    }

    /// Drop the link to `neighbor_id`. Returns whether a link was removed.
    pub fn remove_neighbor(&mut self, neighbor_id: &str) -> bool {
        let before = self.neighbors.len();
        self.neighbors.retain(|n| n.node_id != neighbor_id);
        self.neighbors.len() != before
    }

    /// Link to a given neighbor
    pub fn neighbor(&self, neighbor_id: &str) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.node_id == neighbor_id)
    }

    /// Install a route, replacing any entry for the same destination
    pub fn install_route(&mut self, entry: RouteEntry) {
        match self
            .routing_table
            .iter_mut()
            .find(|r| r.destination == entry.destination)
        {
            Some(existing) => *existing = entry,
            None => self.routing_table.push(entry),
        }
    }

    /// Installed route towards `destination`
    pub fn route_to(&self, destination: &str) -> Option<&RouteEntry> {
        self.routing_table
            .iter()
            .find(|r| r.destination == destination)
    }

    /// Whether the node takes part in routing
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_neighbor_upsert_keeps_order() {
        let now = Utc::now();
        let mut node = MeshNode::new("a", "A", NodeType::Relay);
        node.upsert_neighbor("b", LinkQuality::default(), now);
        node.upsert_neighbor("c", LinkQuality::default(), now);

        let updated = LinkQuality {
            latency_ms: 42.0,
            ..LinkQuality::default()
        };
        node.upsert_neighbor("b", updated, now);

        let ids: Vec<&str> = node.neighbors.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(node.neighbor("b").unwrap().quality.latency_ms, 42.0);

        assert!(node.remove_neighbor("b"));
        assert!(!node.remove_neighbor("b"));
        assert_eq!(node.neighbors.len(), 1);
    }

    #[test]
    fn test_install_route_replaces_destination() {
        let now = Utc::now();
        let mut node = MeshNode::new("a", "A", NodeType::GroundStation);
        let entry = RouteEntry {
            destination: "c".into(),
            next_hop: "b".into(),
            hop_count: 2,
            metric: 20.0,
            valid_until: now + Duration::seconds(300),
        };
        node.install_route(entry.clone());
        node.install_route(RouteEntry {
            next_hop: "c".into(),
            hop_count: 1,
            metric: 5.0,
            ..entry
        });

        assert_eq!(node.routing_table.len(), 1);
        let route = node.route_to("c").unwrap();
        assert_eq!(route.next_hop, "c");
        assert!(route.is_valid_at(now));
        assert!(!route.is_valid_at(now + Duration::seconds(301)));
    }

    #[test]
    fn test_node_serde_defaults() {
        let node = MeshNode::new("n1", "Node 1", NodeType::MobileUnit).with_ip_address("10.0.0.1");
        let mut value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["node_type"], "mobile_unit");
        assert_eq!(value["routing_protocol"], "aodv");

        let obj = value.as_object_mut().unwrap();
        obj.remove("load");
        obj.remove("neighbors");
        let decoded: MeshNode = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.load, NodeLoad::default());
        assert!(decoded.neighbors.is_empty());
        assert_eq!(decoded.ip_address.as_deref(), Some("10.0.0.1"));
    }
}
