//! Rolling failover statistics.

use serde::{Deserialize, Serialize};

use crate::event::FailoverEvent;

/// Counts and durations across completed switches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverStats {
    /// Completed switches
    pub total_failovers: u64,
    /// Switches that reached their target mode
    pub successful_failovers: u64,
    /// Completed switches that reported a duration
    #[serde(default)]
    pub timed_failovers: u64,
    /// Running mean duration over timed switches
    pub average_failover_time_ms: f64,
    /// Shortest duration seen
    pub fastest_failover_ms: Option<f64>,
    /// Longest duration seen
    pub slowest_failover_ms: f64,
}

impl FailoverStats {
    /// Fold a completed event into the statistics
    pub fn record(&mut self, event: &FailoverEvent) {
        self.total_failovers += 1;
        if event.success {
            self.successful_failovers += 1;
        }

        let duration = match event.duration_ms {
            Some(d) if d > 0.0 => d,
            _ => return,
        };
        self.timed_failovers += 1;
        let n = self.timed_failovers as f64;
        self.average_failover_time_ms += (duration - self.average_failover_time_ms) / n;
        self.fastest_failover_ms = Some(match self.fastest_failover_ms {
            Some(fastest) => fastest.min(duration),
            None => duration,
        });
        self.slowest_failover_ms = self.slowest_failover_ms.max(duration);
    }

    /// Successful share of completed switches
    pub fn success_rate(&self) -> f64 {
        if self.total_failovers == 0 {
            0.0
        } else {
            self.successful_failovers as f64 / self.total_failovers as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{NetworkMode, TriggerReason};

    fn event(success: bool, duration_ms: f64) -> FailoverEvent {
        let mut e = FailoverEvent::new(
            "uav1",
            TriggerReason::ManualTrigger,
            NetworkMode::SatelliteNtn,
            NetworkMode::MeshBackup,
        );
        e.complete(success, duration_ms);
        e
    }

    #[test]
    fn test_record() {
        let mut stats = FailoverStats::default();
        assert_eq!(stats.fastest_failover_ms, None);

        stats.record(&event(true, 100.0));
        stats.record(&event(false, 300.0));
        stats.record(&event(true, 200.0));

        assert_eq!(stats.total_failovers, 3);
        assert_eq!(stats.successful_failovers, 2);
        assert!((stats.average_failover_time_ms - 200.0).abs() < 1e-9);
        assert_eq!(stats.fastest_failover_ms, Some(100.0));
        assert_eq!(stats.slowest_failover_ms, 300.0);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_counts_but_skips_timing() {
        let mut stats = FailoverStats::default();
        stats.record(&event(true, 0.0));
        assert_eq!(stats.total_failovers, 1);
        assert_eq!(stats.fastest_failover_ms, None);
        assert_eq!(stats.average_failover_time_ms, 0.0);
    }

    #[test]
    fn test_untimed_switch_leaves_average_alone() {
        let mut stats = FailoverStats::default();
        stats.record(&event(false, 0.0));
        stats.record(&event(true, 100.0));

        assert_eq!(stats.total_failovers, 2);
        assert_eq!(stats.timed_failovers, 1);
        assert!((stats.average_failover_time_ms - 100.0).abs() < 1e-9);
        assert_eq!(stats.fastest_failover_ms, Some(100.0));
    }
}
