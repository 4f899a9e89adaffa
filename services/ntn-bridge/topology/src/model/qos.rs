//! Fixed QoS class table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Traffic priority classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosClass {
    /// Safety-critical traffic
    Emergency,
    /// Command and control
    Command,
    /// Video streams
    Video,
    /// Bulk data
    Data,
    /// Best effort
    Background,
}

/// Policy bound to a QoS class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QosPolicy {
    /// Scheduling priority, 7 highest
    pub priority: u8,
    /// Maximum tolerated latency
    pub max_latency_ms: u32,
    /// Minimum bandwidth in Mbps
    pub min_bandwidth_mbps: f64,
    /// Maximum tolerated loss fraction
    pub packet_loss_threshold: f64,
}

impl QosClass {
    /// Every class, highest priority first
    pub const ALL: [QosClass; 5] = [
        QosClass::Emergency,
        QosClass::Command,
        QosClass::Video,
        QosClass::Data,
        QosClass::Background,
    ];

    /// The immutable policy for this class
    pub const fn policy(self) -> QosPolicy {
        match self {
            QosClass::Emergency => QosPolicy {
                priority: 7,
                max_latency_ms: 10,
                min_bandwidth_mbps: 1.0,
                packet_loss_threshold: 0.001,
            },
            QosClass::Command => QosPolicy {
                priority: 6,
                max_latency_ms: 50,
                min_bandwidth_mbps: 0.5,
                packet_loss_threshold: 0.01,
            },
            QosClass::Video => QosPolicy {
                priority: 4,
                max_latency_ms: 100,
                min_bandwidth_mbps: 2.0,
                packet_loss_threshold: 0.05,
            },
            QosClass::Data => QosPolicy {
                priority: 2,
                max_latency_ms: 500,
                min_bandwidth_mbps: 0.1,
                packet_loss_threshold: 0.1,
            },
            QosClass::Background => QosPolicy {
                priority: 1,
                max_latency_ms: 1000,
                min_bandwidth_mbps: 0.05,
                packet_loss_threshold: 0.2,
            },
        }
    }

    /// Name used in logs and descriptors
    pub fn as_str(self) -> &'static str {
        match self {
            QosClass::Emergency => "emergency",
            QosClass::Command => "command",
            QosClass::Video => "video",
            QosClass::Data => "data",
            QosClass::Background => "background",
        }
    }
}

impl fmt::Display for QosClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
