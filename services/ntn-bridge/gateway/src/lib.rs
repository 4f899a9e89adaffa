//! Bridge gateways, user-plane tunnels and QoS-aware forwarding for the NTN bridge.
//!
//! The [`GatewayManager`] owns gateway lifecycle (connect, health-check, disconnect)
//! and the packet-forwarding entry points between the core network and the mesh.
//! Forwarding combines the [`TunnelManager`] (GTP-like encapsulation), the
//! [`QosManager`] (traffic classes) and the routing optimizer (mesh paths). The
//! [`BridgeMonitor`] is the background task that keeps topology and gateway health
//! current.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod monitor;
pub mod probe;
pub mod qos;
pub mod tunnel;

pub use manager::{
    BridgeStats, ForwardOutcome, GatewayConfig, GatewayManager, GatewaySpec, MeshAttachRequest,
    MeshAttachment, UplinkOutcome,
};
pub use monitor::{BridgeMonitor, MonitorConfig, MonitorPass};
pub use probe::{ReachabilityProbe, UdpProbe};
pub use qos::{AppliedPolicy, QosManager, SizeHeuristicClassifier, TrafficClassifier};
pub use tunnel::{Tunnel, TunnelCounters, TunnelManager};

use bridge_topology::{GatewayStatus, TopologyError};
use bridge_wire::{ParseError, WireError};
use thiserror::Error;

/// Gateway and forwarding errors
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Unknown tunnel
    #[error("tunnel not found: {0}")]
    TunnelNotFound(String),
    /// Tunnel id already in use
    #[error("tunnel already exists: {0}")]
    DuplicateTunnel(String),
    /// Unknown gateway
    #[error("gateway not found: {0}")]
    GatewayNotFound(String),
    /// Unknown mesh node
    #[error("mesh node not found: {0}")]
    NodeNotFound(String),
    /// Gateway is not in a state that allows forwarding
    #[error("gateway {gateway_id} is {status}, not connected")]
    NotConnected {
        /// Gateway
        gateway_id: String,
        /// Current status
        status: GatewayStatus,
    },
    /// No connected gateway available
    #[error("no connected gateway available")]
    NoConnectedGateway,
    /// No mesh path to the destination
    #[error("no mesh route from {source_id} to {destination}")]
    NoRoute {
        /// Gateway mesh node
        source_id: String,
        /// Destination mesh node
        destination: String,
    },
    /// Upstream endpoint did not answer the reachability probe
    #[error("probe of {endpoint} failed: {reason}")]
    ProbeFailure {
        /// Probed endpoint
        endpoint: String,
        /// What went wrong
        reason: String,
    },
    /// Tunnel header could not be decoded
    #[error("malformed tunnel header: {0}")]
    MalformedHeader(#[from] WireError),
    /// Mesh control packet could not be decoded
    #[error("malformed control packet: {0}")]
    MalformedPacket(#[from] ParseError),
    /// Topology store rejected an operation
    #[error("topology error: {0}")]
    Topology(TopologyError),
    /// Socket error on the uplink path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TopologyError> for GatewayError {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::NodeNotFound(id) => GatewayError::NodeNotFound(id),
            TopologyError::GatewayNotFound(id) => GatewayError::GatewayNotFound(id),
            other => GatewayError::Topology(other),
        }
    }
}
