//! Topology analysis, bottleneck detection and route optimization for the bridge mesh.
//!
//! The optimizer reads point-in-time snapshots from the topology store, scores
//! every link under one of several objective functions and runs a weighted
//! Dijkstra search per active source. Resulting routes are installed into the
//! source nodes' routing tables and kept in an optimizer-owned route table so the
//! next optimization pass can measure how much it improved.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod objective;
pub mod optimizer;
pub mod path;

pub use analysis::*;
pub use objective::*;
pub use optimizer::*;
pub use path::*;

use thiserror::Error;

/// Routing errors
#[derive(Error, Debug)]
pub enum RoutingError {
    /// Topology store rejected an update
    #[error("topology error: {0}")]
    Topology(#[from] bridge_topology::TopologyError),
    /// Route is too short to install
    #[error("route {source_id} -> {destination} has no next hop")]
    NoNextHop {
        /// Source node
        source_id: String,
        /// Destination node
        destination: String,
    },
}
