//! Satellite to mesh failover for nodes attached through the NTN bridge.
//!
//! Each monitored node has a [`NetworkMode`]. The [`FailoverController`] polls the
//! connection-quality collaborator per node and moves nodes between the satellite
//! path and the mesh backup path through the gateway manager. Leaving the satellite
//! path is easy and returning is hard; see [`FailoverThresholds`].
//!
//! Every switch is recorded as a [`FailoverEvent`]. While an event is in flight the
//! node sits in [`NetworkMode::Switching`], which also serves as the per-node guard
//! against concurrent switches.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attachment;
pub mod controller;
pub mod event;
pub mod policy;
pub mod quality;
pub mod stats;

pub use attachment::{
    AttachmentDescriptor, AttachmentSink, FileAttachmentSink, MemoryAttachmentSink,
    MeshDescriptor, SatelliteDescriptor, SatelliteProfile,
};
pub use controller::{
    FailoverConfig, FailoverController, NodeStatusReport, ServiceStatus, SwitchOutcome,
};
pub use event::{FailoverEvent, NetworkMode, TriggerReason};
pub use policy::FailoverThresholds;
pub use quality::{
    ConnectionQualityAssessor, FileQualitySource, PredictedIssue, QualityAssessment,
    QualityTrend, StaticQualitySource,
};
pub use stats::FailoverStats;

use bridge_gateway::GatewayError;
use thiserror::Error;

/// Failover errors
#[derive(Error, Debug)]
pub enum FailoverError {
    /// Node is not registered for monitoring
    #[error("node {0} is not monitored")]
    NodeNotMonitored(String),
    /// Node id cannot be used
    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),
    /// A switch is already running for the node
    #[error("switch already in progress for node {0}")]
    SwitchInProgress(String),
    /// Requested mode cannot be switched to
    #[error("cannot switch node {node_id} to {mode}")]
    InvalidTarget {
        /// Node
        node_id: String,
        /// Rejected mode
        mode: NetworkMode,
    },
    /// Mode exists but no transition implements it
    #[error("mode {0} is reserved and not supported")]
    UnsupportedMode(NetworkMode),
    /// Switch side effect failed or timed out
    #[error("switch failed: {0}")]
    SwitchFailure(String),
    /// Quality collaborator has nothing for the node
    #[error("no quality assessment for node {0}")]
    NoAssessment(String),
    /// Gateway manager rejected an attach or release
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// YAML encoding error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Node ids end up in file names, so keep them to a safe alphabet
pub(crate) fn validate_node_id(node_id: &str) -> Result<(), FailoverError> {
    let valid = !node_id.is_empty()
        && node_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !node_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(FailoverError::InvalidNodeId(node_id.to_string()))
    }
}
