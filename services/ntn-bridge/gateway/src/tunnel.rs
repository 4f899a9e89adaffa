//! User-plane tunnels between the upstream gateway and mesh-attached nodes.

use bridge_wire::{derive_teid, TunnelHeader};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::GatewayError;

/// Per-direction packet and byte counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelCounters {
    /// Packets encapsulated towards the core
    pub packets_up: u64,
    /// Payload bytes towards the core
    pub bytes_up: u64,
    /// Packets decapsulated from the core
    pub packets_down: u64,
    /// Payload bytes from the core
    pub bytes_down: u64,
}

/// An active tunnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    /// Tunnel id
    pub id: String,
    /// Tunnel endpoint identifier derived from the id
    pub teid: u32,
    /// Address assigned to the attached UE
    pub ue_address: String,
    /// Mesh node the UE is attached through
    pub mesh_node_id: String,
    /// Upstream gateway address
    pub upstream_address: String,
    /// Upstream gateway port
    pub upstream_port: u16,
    /// Traffic counters
    pub counters: TunnelCounters,
    /// Next uplink sequence number
    next_sequence: u16,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last packet in either direction
    pub last_activity: DateTime<Utc>,
}

impl Tunnel {
    /// Upstream endpoint as `address:port`
    pub fn upstream_endpoint(&self) -> String {
        format!("{}:{}", self.upstream_address, self.upstream_port)
    }
}

/// Owner of all active tunnels; memory-only, non-blocking
pub struct TunnelManager {
    tunnels: DashMap<String, Tunnel>,
    default_upstream: (String, u16),
    sequencing: bool,
}

impl TunnelManager {
    /// Create a manager whose tunnels default to the given upstream endpoint
    pub fn new(upstream_address: impl Into<String>, upstream_port: u16) -> Self {
        Self {
            tunnels: DashMap::new(),
            default_upstream: (upstream_address.into(), upstream_port),
            sequencing: false,
        }
    }

    /// Emit the sequenced header form on uplink
    pub fn with_sequencing(mut self, enabled: bool) -> Self {
        self.sequencing = enabled;
        self
    }

    /// Register a tunnel towards the default upstream
    pub fn create_tunnel(
        &self,
        id: &str,
        ue_address: &str,
        mesh_node_id: &str,
    ) -> Result<Tunnel, GatewayError> {
        let (address, port) = self.default_upstream.clone();
        self.create_tunnel_to(id, ue_address, mesh_node_id, &address, port)
    }

    /// Register a tunnel towards an explicit upstream endpoint
    pub fn create_tunnel_to(
        &self,
        id: &str,
        ue_address: &str,
        mesh_node_id: &str,
        upstream_address: &str,
        upstream_port: u16,
    ) -> Result<Tunnel, GatewayError> {
        let now = Utc::now();
        let tunnel = Tunnel {
            id: id.to_string(),
            teid: derive_teid(id),
            ue_address: ue_address.to_string(),
            mesh_node_id: mesh_node_id.to_string(),
            upstream_address: upstream_address.to_string(),
            upstream_port,
            counters: TunnelCounters::default(),
            next_sequence: 0,
            created_at: now,
            last_activity: now,
        };

        match self.tunnels.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(GatewayError::DuplicateTunnel(id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tunnel.clone());
                info!(
                    "Created tunnel {} (teid {:#010x}) for {} via {}",
                    id, tunnel.teid, ue_address, mesh_node_id
                );
                Ok(tunnel)
            }
        }
    }

    /// Encapsulate a payload for the core network
    pub fn forward_uplink(&self, tunnel_id: &str, payload: &[u8]) -> Result<Bytes, GatewayError> {
        let mut tunnel = self
            .tunnels
            .get_mut(tunnel_id)
            .ok_or_else(|| GatewayError::TunnelNotFound(tunnel_id.to_string()))?;

        let sequence = if self.sequencing {
            let seq = tunnel.next_sequence;
            tunnel.next_sequence = seq.wrapping_add(1);
            Some(seq)
        } else {
            None
        };

        let frame = TunnelHeader::encapsulate(tunnel.teid, payload, sequence)?;
        tunnel.counters.packets_up += 1;
        tunnel.counters.bytes_up += payload.len() as u64;
        tunnel.last_activity = Utc::now();

        debug!(
            "Uplink tunnel={} payload={} frame={}",
            tunnel_id,
            payload.len(),
            frame.len()
        );
        Ok(frame)
    }

    /// Strip the tunnel header from a frame received from the core network
    pub fn forward_downlink(&self, tunnel_id: &str, frame: Bytes) -> Result<Bytes, GatewayError> {
        let mut tunnel = self
            .tunnels
            .get_mut(tunnel_id)
            .ok_or_else(|| GatewayError::TunnelNotFound(tunnel_id.to_string()))?;

        let (_, payload) = TunnelHeader::decapsulate(tunnel.teid, frame)?;
        tunnel.counters.packets_down += 1;
        tunnel.counters.bytes_down += payload.len() as u64;
        tunnel.last_activity = Utc::now();

        debug!("Downlink tunnel={} payload={}", tunnel_id, payload.len());
        Ok(payload)
    }

    /// Remove a tunnel. Returns whether it existed.
    pub fn remove_tunnel(&self, tunnel_id: &str) -> bool {
        let removed = self.tunnels.remove(tunnel_id).is_some();
        if removed {
            info!("Removed tunnel {}", tunnel_id);
        }
        removed
    }

    /// Tunnel by id
    pub fn get_tunnel(&self, tunnel_id: &str) -> Option<Tunnel> {
        self.tunnels.get(tunnel_id).map(|t| t.clone())
    }

    /// Counters for a tunnel
    pub fn tunnel_stats(&self, tunnel_id: &str) -> Option<TunnelCounters> {
        self.tunnels.get(tunnel_id).map(|t| t.counters)
    }

    /// All tunnels sorted by id
    pub fn list_tunnels(&self) -> Vec<Tunnel> {
        let mut tunnels: Vec<Tunnel> = self.tunnels.iter().map(|t| t.value().clone()).collect();
        tunnels.sort_by(|a, b| a.id.cmp(&b.id));
        tunnels
    }

    /// Number of active tunnels
    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_wire::{WireError, MANDATORY_HEADER_SIZE, OPTIONAL_HEADER_SIZE};

    fn manager() -> TunnelManager {
        TunnelManager::new("172.20.0.30", 2152)
    }

    #[test]
    fn test_create_and_duplicate() {
        let tunnels = manager();
        let tunnel = tunnels.create_tunnel("t1", "10.0.0.2", "mesh_uav1").unwrap();
        assert_eq!(tunnel.upstream_endpoint(), "172.20.0.30:2152");
        assert_eq!(tunnel.teid, derive_teid("t1"));

        assert!(matches!(
            tunnels.create_tunnel("t1", "10.0.0.3", "mesh_uav2"),
            Err(GatewayError::DuplicateTunnel(_))
        ));
        assert_eq!(tunnels.tunnel_count(), 1);
    }

    #[test]
    fn test_uplink_downlink_round_trip() {
        let tunnels = manager();
        tunnels.create_tunnel("t1", "10.0.0.2", "n1").unwrap();

        for payload in [Vec::new(), vec![0xAB; 200]] {
            let frame = tunnels.forward_uplink("t1", &payload).unwrap();
            assert_eq!(frame.len(), MANDATORY_HEADER_SIZE + payload.len());
            let recovered = tunnels.forward_downlink("t1", frame).unwrap();
            assert_eq!(&recovered[..], &payload[..]);
        }

        let counters = tunnels.tunnel_stats("t1").unwrap();
        assert_eq!(counters.packets_up, 2);
        assert_eq!(counters.packets_down, 2);
        assert_eq!(counters.bytes_up, 200);
        assert_eq!(counters.bytes_down, 200);
    }

    #[test]
    fn test_sequencing_increments() {
        let tunnels = manager().with_sequencing(true);
        tunnels.create_tunnel("t1", "10.0.0.2", "n1").unwrap();

        let first = tunnels.forward_uplink("t1", b"a").unwrap();
        let second = tunnels.forward_uplink("t1", b"b").unwrap();
        assert_eq!(first.len(), MANDATORY_HEADER_SIZE + OPTIONAL_HEADER_SIZE + 1);
        assert_eq!(&first[8..10], &[0, 0]);
        assert_eq!(&second[8..10], &[0, 1]);

        assert_eq!(&tunnels.forward_downlink("t1", second).unwrap()[..], b"b");
    }

    #[test]
    fn test_unknown_tunnel_and_malformed() {
        let tunnels = manager();
        assert!(matches!(
            tunnels.forward_uplink("nope", b"x"),
            Err(GatewayError::TunnelNotFound(_))
        ));

        tunnels.create_tunnel("t1", "10.0.0.2", "n1").unwrap();
        tunnels.create_tunnel("t2", "10.0.0.3", "n2").unwrap();

        let short = Bytes::from_static(&[0x30, 0xFF]);
        assert!(matches!(
            tunnels.forward_downlink("t1", short),
            Err(GatewayError::MalformedHeader(WireError::Truncated { .. }))
        ));

        let foreign = tunnels.forward_uplink("t2", b"payload").unwrap();
        assert!(matches!(
            tunnels.forward_downlink("t1", foreign),
            Err(GatewayError::MalformedHeader(WireError::Teid { .. }))
        ));
        assert_eq!(tunnels.tunnel_stats("t1").unwrap().packets_down, 0);
    }

    #[test]
    fn test_remove_and_list() {
        let tunnels = manager();
        tunnels.create_tunnel("b", "10.0.0.2", "n1").unwrap();
        tunnels
            .create_tunnel_to("a", "10.0.0.3", "n2", "127.0.0.1", 9000)
            .unwrap();

        let ids: Vec<String> = tunnels.list_tunnels().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(tunnels.get_tunnel("a").unwrap().upstream_port, 9000);

        assert!(tunnels.remove_tunnel("a"));
        assert!(!tunnels.remove_tunnel("a"));
        assert!(tunnels.tunnel_stats("a").is_none());
    }
}
