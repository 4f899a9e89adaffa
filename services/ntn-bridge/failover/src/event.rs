//! Network modes and failover event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Path a node's traffic takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Satellite access (initial)
    SatelliteNtn,
    /// Mesh backup behind a bridge gateway
    MeshBackup,
    /// Both paths at once; reserved, never entered by current triggers
    DualConnection,
    /// A switch is in flight
    Switching,
}

impl NetworkMode {
    /// Every mode
    pub const ALL: [NetworkMode; 4] = [
        NetworkMode::SatelliteNtn,
        NetworkMode::MeshBackup,
        NetworkMode::DualConnection,
        NetworkMode::Switching,
    ];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkMode::SatelliteNtn => "satellite_ntn",
            NetworkMode::MeshBackup => "mesh_backup",
            NetworkMode::DualConnection => "dual_connection",
            NetworkMode::Switching => "switching",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a switch was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Signal quality too low or trending down
    SignalDegradation,
    /// Link dropped
    ConnectionLost,
    /// Performance too low
    HighPacketLoss,
    /// Coverage gap predicted
    CoverageBlindZone,
    /// Interference detected
    Interference,
    /// Operator request
    ManualTrigger,
    /// Satellite path healthy again
    SignalRecovery,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerReason::SignalDegradation => "signal_degradation",
            TriggerReason::ConnectionLost => "connection_lost",
            TriggerReason::HighPacketLoss => "high_packet_loss",
            TriggerReason::CoverageBlindZone => "coverage_blind_zone",
            TriggerReason::Interference => "interference",
            TriggerReason::ManualTrigger => "manual_trigger",
            TriggerReason::SignalRecovery => "signal_recovery",
        };
        f.write_str(s)
    }
}

/// One mode switch attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event id
    pub event_id: String,
    /// Node being switched
    pub node_id: String,
    /// Why
    pub trigger_reason: TriggerReason,
    /// Mode before the switch
    pub from_mode: NetworkMode,
    /// Requested mode
    pub to_mode: NetworkMode,
    /// When the switch started
    pub trigger_timestamp: DateTime<Utc>,
    /// When it finished; `None` while in flight
    pub completion_timestamp: Option<DateTime<Utc>>,
    /// Whether the node reached `to_mode`
    pub success: bool,
    /// Wall-clock duration
    pub duration_ms: Option<f64>,
    /// Mesh node created for a mesh switch
    pub mesh_node_id: Option<String>,
    /// Failure cause
    pub error: Option<String>,
}

impl FailoverEvent {
    /// Start an event now
    pub fn new(
        node_id: impl Into<String>,
        trigger_reason: TriggerReason,
        from_mode: NetworkMode,
        to_mode: NetworkMode,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            trigger_reason,
            from_mode,
            to_mode,
            trigger_timestamp: Utc::now(),
            completion_timestamp: None,
            success: false,
            duration_ms: None,
            mesh_node_id: None,
            error: None,
        }
    }

    /// Stamp completion
    pub fn complete(&mut self, success: bool, duration_ms: f64) {
        self.success = success;
        self.duration_ms = Some(duration_ms);
        self.completion_timestamp = Some(Utc::now());
    }

    /// Whether the event has not completed yet
    pub fn is_in_flight(&self) -> bool {
        self.completion_timestamp.is_none()
    }
}
