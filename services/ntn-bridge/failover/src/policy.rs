//! Trigger and recovery rules.
//!
//! Leaving the satellite path needs a single bad signal; returning needs every
//! signal to be good. The gap between the two keeps nodes from flapping.

use serde::{Deserialize, Serialize};

use crate::event::TriggerReason;
use crate::quality::{PredictedIssue, QualityAssessment, QualityTrend};

/// Score thresholds for leaving and returning to the satellite path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverThresholds {
    /// Fail over when signal quality drops below this
    pub trigger_signal_below: f64,
    /// Fail over when performance drops below this
    pub trigger_performance_below: f64,
    /// Recovery needs signal quality above this
    pub recovery_signal_above: f64,
    /// Recovery needs performance above this
    pub recovery_performance_above: f64,
}

impl Default for FailoverThresholds {
    fn default() -> Self {
        Self {
            trigger_signal_below: 30.0,
            trigger_performance_below: 20.0,
            recovery_signal_above: 70.0,
            recovery_performance_above: 70.0,
        }
    }
}

impl FailoverThresholds {
    /// Reason to leave the satellite path, checked in priority order
    pub fn evaluate_trigger(&self, assessment: &QualityAssessment) -> Option<TriggerReason> {
        if assessment.signal_quality_score < self.trigger_signal_below {
            return Some(TriggerReason::SignalDegradation);
        }
        if assessment.performance_score < self.trigger_performance_below {
            return Some(TriggerReason::HighPacketLoss);
        }
        if assessment.quality_trend == QualityTrend::Degrading {
            return Some(TriggerReason::SignalDegradation);
        }
        if assessment
            .predicted_issues
            .contains(&PredictedIssue::SignalDeterioration)
        {
            return Some(TriggerReason::CoverageBlindZone);
        }
        None
    }

    /// Whether a node on the mesh path may return to satellite
    pub fn should_recover(&self, assessment: &QualityAssessment) -> bool {
        assessment.signal_quality_score > self.recovery_signal_above
            && assessment.performance_score > self.recovery_performance_above
            && matches!(
                assessment.quality_trend,
                QualityTrend::Stable | QualityTrend::Improving
            )
    }
}
