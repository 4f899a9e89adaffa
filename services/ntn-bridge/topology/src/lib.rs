//! Mesh node, link and bridge gateway registry for the NTN bridge.
//!
//! This crate holds the bridge's data model (mesh nodes and their links, bridge
//! gateways, traffic flows and the fixed QoS class table) and the [`TopologyStore`],
//! the single owned registry every other component reads through. The store keeps
//! its state in memory with per-entry locking and mirrors changes into a durable
//! document store on a best-effort basis.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod model;
pub mod store;

pub use model::*;
pub use store::{TopologySnapshot, TopologyStore, TopologyStoreConfig};

use thiserror::Error;

/// Topology errors
#[derive(Error, Debug)]
pub enum TopologyError {
    /// Unknown mesh node
    #[error("mesh node not found: {0}")]
    NodeNotFound(String),
    /// Unknown bridge gateway
    #[error("gateway not found: {0}")]
    GatewayNotFound(String),
    /// Node still referenced by a gateway
    #[error("mesh node {node_id} is referenced by gateway {gateway_id}")]
    NodeReferenced {
        /// Node that was to be removed
        node_id: String,
        /// Gateway holding the reference
        gateway_id: String,
    },
    /// Gateway status change not allowed
    #[error("gateway {gateway_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Gateway
        gateway_id: String,
        /// Current status
        from: GatewayStatus,
        /// Requested status
        to: GatewayStatus,
    },
    /// Stored document could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
