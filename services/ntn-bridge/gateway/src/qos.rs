//! Traffic classification and per-class policy lookup.

use bridge_routing::OptimizationObjective;
use bridge_topology::{QosClass, QosPolicy};
use serde::{Deserialize, Serialize};

/// Payloads shorter than this are treated as command traffic
pub const COMMAND_MAX_BYTES: usize = 100;
/// Payloads longer than this are treated as video
pub const VIDEO_MIN_BYTES: usize = 1000;

/// Strategy that assigns a QoS class to a packet
pub trait TrafficClassifier: Send + Sync {
    /// Class for `payload` travelling from `source` to `destination`
    fn classify(&self, payload: &[u8], source: &str, destination: &str) -> QosClass;
}

/// Placeholder classifier keyed on payload size only.
///
/// Small packets are command, large ones video, the rest data. It does not
/// inspect headers or ports; swap it out through [`QosManager::with_classifier`]
/// once a real classification policy exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeHeuristicClassifier;

impl TrafficClassifier for SizeHeuristicClassifier {
    fn classify(&self, payload: &[u8], _source: &str, _destination: &str) -> QosClass {
        match payload.len() {
            n if n < COMMAND_MAX_BYTES => QosClass::Command,
            n if n > VIDEO_MIN_BYTES => QosClass::Video,
            _ => QosClass::Data,
        }
    }
}

/// Policy resolved for one packet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppliedPolicy {
    /// Class the packet was put in
    pub class: QosClass,
    /// Scheduling priority
    pub priority: u8,
    /// Latency budget
    pub max_latency_ms: u32,
    /// Bandwidth floor
    pub min_bandwidth_mbps: f64,
    /// Tolerated loss
    pub packet_loss_threshold: f64,
    /// Payload size in bytes
    pub packet_size: usize,
}

impl AppliedPolicy {
    fn new(class: QosClass, policy: QosPolicy, packet_size: usize) -> Self {
        Self {
            class,
            priority: policy.priority,
            max_latency_ms: policy.max_latency_ms,
            min_bandwidth_mbps: policy.min_bandwidth_mbps,
            packet_loss_threshold: policy.packet_loss_threshold,
            packet_size,
        }
    }
}

/// Classifier plus the fixed class table
pub struct QosManager {
    classifier: Box<dyn TrafficClassifier>,
}

impl Default for QosManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QosManager {
    /// Manager using [`SizeHeuristicClassifier`]
    pub fn new() -> Self {
        Self::with_classifier(Box::new(SizeHeuristicClassifier))
    }

    /// Manager using a custom classifier
    pub fn with_classifier(classifier: Box<dyn TrafficClassifier>) -> Self {
        Self { classifier }
    }

    /// Classify a packet
    pub fn classify(&self, payload: &[u8], source: &str, destination: &str) -> QosClass {
        self.classifier.classify(payload, source, destination)
    }

    /// Policy from the fixed table for `class`
    pub fn apply_policy(&self, class: QosClass, payload: &[u8]) -> AppliedPolicy {
        AppliedPolicy::new(class, class.policy(), payload.len())
    }

    /// Policy using a gateway-specific override when present
    pub fn apply_policy_with(
        &self,
        class: QosClass,
        policy: QosPolicy,
        payload: &[u8],
    ) -> AppliedPolicy {
        AppliedPolicy::new(class, policy, payload.len())
    }

    /// Route objective used for traffic of `class`
    pub fn routing_objective(class: QosClass) -> OptimizationObjective {
        match class {
            QosClass::Emergency | QosClass::Command => OptimizationObjective::LowLatency,
            QosClass::Video => OptimizationObjective::HighBandwidth,
            QosClass::Data | QosClass::Background => OptimizationObjective::Adaptive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_heuristic() {
        let qos = QosManager::new();
        assert_eq!(qos.classify(&[0; 10], "a", "b"), QosClass::Command);
        assert_eq!(qos.classify(&[0; 99], "a", "b"), QosClass::Command);
        assert_eq!(qos.classify(&[0; 100], "a", "b"), QosClass::Data);
        assert_eq!(qos.classify(&[0; 1000], "a", "b"), QosClass::Data);
        assert_eq!(qos.classify(&[0; 1001], "a", "b"), QosClass::Video);
    }

    #[test]
    fn test_apply_policy_uses_table() {
        let qos = QosManager::new();
        let applied = qos.apply_policy(QosClass::Emergency, &[1, 2, 3]);
        assert_eq!(applied.class, QosClass::Emergency);
        assert_eq!(applied.priority, QosClass::Emergency.policy().priority);
        assert_eq!(applied.max_latency_ms, 10);
        assert_eq!(applied.packet_size, 3);
    }

    struct AlwaysEmergency;

    impl TrafficClassifier for AlwaysEmergency {
        fn classify(&self, _: &[u8], _: &str, _: &str) -> QosClass {
            QosClass::Emergency
        }
    }

    #[test]
    fn test_custom_classifier() {
        let qos = QosManager::with_classifier(Box::new(AlwaysEmergency));
        assert_eq!(qos.classify(&[0; 5000], "a", "b"), QosClass::Emergency);
    }

    #[test]
    fn test_routing_objective() {
        assert_eq!(
            QosManager::routing_objective(QosClass::Command),
            OptimizationObjective::LowLatency
        );
        assert_eq!(
            QosManager::routing_objective(QosClass::Video),
            OptimizationObjective::HighBandwidth
        );
        assert_eq!(
            QosManager::routing_objective(QosClass::Background),
            OptimizationObjective::Adaptive
        );
    }
}
