//! Objective functions used to weight mesh links.

use bridge_topology::LinkQuality;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::TopologyAnalysis;

/// Average utilization above which adaptive routing balances load
pub const ADAPTIVE_UTILIZATION_THRESHOLD: f64 = 0.8;

/// Average latency (ms) above which adaptive routing minimizes latency
pub const ADAPTIVE_LATENCY_THRESHOLD_MS: f64 = 100.0;

const OVERLOADED_HOP_PENALTY: f64 = 5.0;
const UTILIZATION_PENALTY: f64 = 3.0;

/// Route optimization objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationObjective {
    /// Route around overloaded nodes and busy links
    LoadBalanced,
    /// Minimize summed link latency
    LowLatency,
    /// Prefer high-bandwidth links
    HighBandwidth,
    /// Weighted blend of latency, bandwidth and utilization
    BalancedOptimal,
    /// Pick one of the above from current topology conditions
    Adaptive,
}

impl OptimizationObjective {
    /// Replace `Adaptive` with the concrete objective current conditions call for
    pub fn resolve(self, analysis: &TopologyAnalysis) -> OptimizationObjective {
        match self {
            OptimizationObjective::Adaptive => {
                if analysis.avg_utilization > ADAPTIVE_UTILIZATION_THRESHOLD {
                    OptimizationObjective::LoadBalanced
                } else if analysis.avg_latency_ms > ADAPTIVE_LATENCY_THRESHOLD_MS {
                    OptimizationObjective::LowLatency
                } else {
                    OptimizationObjective::BalancedOptimal
                }
            }
            concrete => concrete,
        }
    }

    /// Weight of a link towards `next_hop`; `None` when the link is unusable
    ///
    /// `Adaptive` must be resolved first and weighs like `BalancedOptimal` if not.
    pub fn edge_weight(self, link: &LinkQuality, next_hop_overloaded: bool) -> Option<f64> {
        let weight = match self {
            OptimizationObjective::LoadBalanced => {
                let penalty = if next_hop_overloaded {
                    OVERLOADED_HOP_PENALTY
                } else {
                    0.0
                };
                1.0 + penalty + UTILIZATION_PENALTY * link.utilization
            }
            OptimizationObjective::LowLatency => link.latency_ms.max(0.0),
            OptimizationObjective::HighBandwidth => {
                if link.bandwidth_mbps <= 0.0 {
                    return None;
                }
                1.0 / link.bandwidth_mbps
            }
            OptimizationObjective::BalancedOptimal | OptimizationObjective::Adaptive => {
                if link.bandwidth_mbps <= 0.0 {
                    return None;
                }
                0.4 * (link.latency_ms / 100.0)
                    + 0.3 * (100.0 / link.bandwidth_mbps)
                    + 0.3 * (2.0 * link.utilization)
            }
        };

        if weight.is_finite() {
            Some(weight)
        } else {
            None
        }
    }
}

impl fmt::Display for OptimizationObjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimizationObjective::LoadBalanced => "load_balanced",
            OptimizationObjective::LowLatency => "low_latency",
            OptimizationObjective::HighBandwidth => "high_bandwidth",
            OptimizationObjective::BalancedOptimal => "balanced_optimal",
            OptimizationObjective::Adaptive => "adaptive",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(latency_ms: f64, bandwidth_mbps: f64, utilization: f64) -> LinkQuality {
        LinkQuality {
            latency_ms,
            bandwidth_mbps,
            utilization,
            ..LinkQuality::default()
        }
    }

    fn analysis(avg_latency_ms: f64, avg_utilization: f64) -> TopologyAnalysis {
        TopologyAnalysis {
            avg_latency_ms,
            avg_utilization,
            ..TopologyAnalysis::default()
        }
    }

    #[test]
    fn test_edge_weights() {
        let l = link(50.0, 20.0, 0.5);

        assert_eq!(
            OptimizationObjective::LoadBalanced.edge_weight(&l, false),
            Some(2.5)
        );
        assert_eq!(
            OptimizationObjective::LoadBalanced.edge_weight(&l, true),
            Some(7.5)
        );
        assert_eq!(
            OptimizationObjective::LowLatency.edge_weight(&l, false),
            Some(50.0)
        );
        assert_eq!(
            OptimizationObjective::HighBandwidth.edge_weight(&l, false),
            Some(0.05)
        );

        let balanced = OptimizationObjective::BalancedOptimal
            .edge_weight(&l, false)
            .unwrap();
        let expected = 0.4 * 0.5 + 0.3 * 5.0 + 0.3 * 1.0;
        assert!((balanced - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_bandwidth_unusable() {
        let l = link(10.0, 0.0, 0.1);
        assert_eq!(OptimizationObjective::HighBandwidth.edge_weight(&l, false), None);
        assert_eq!(OptimizationObjective::BalancedOptimal.edge_weight(&l, false), None);
        assert!(OptimizationObjective::LowLatency.edge_weight(&l, false).is_some());
    }

    #[test]
    fn test_adaptive_resolution() {
        let adaptive = OptimizationObjective::Adaptive;
        assert_eq!(
            adaptive.resolve(&analysis(20.0, 0.85)),
            OptimizationObjective::LoadBalanced
        );
        assert_eq!(
            adaptive.resolve(&analysis(150.0, 0.85)),
            OptimizationObjective::LoadBalanced
        );
        assert_eq!(
            adaptive.resolve(&analysis(150.0, 0.2)),
            OptimizationObjective::LowLatency
        );
        assert_eq!(
            adaptive.resolve(&analysis(20.0, 0.2)),
            OptimizationObjective::BalancedOptimal
        );
        assert_eq!(
            OptimizationObjective::HighBandwidth.resolve(&analysis(500.0, 0.99)),
            OptimizationObjective::HighBandwidth
        );
    }
}
