// Simulation metrics: aggregates recomputed every tick.

use serde::{Deserialize, Serialize};

/// Snapshot of how the simulated network is doing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub tick: u64,
    /// Delivered over completed (delivered + failed), percent.
    pub delivery_rate: f64,
    /// Mean ticks from creation to first delivery.
    pub average_latency: f64,
    /// Online over total nodes, percent.
    pub network_reliability: f64,
    /// 100 / mean hop count of delivered messages.
    pub routing_efficiency: f64,
    /// Mean latency of delivered emergency-priority messages.
    pub emergency_response_time: f64,
    /// Edge density of the live graph, percent.
    pub coverage: f64,
    /// Failures per node per minute, percent.
    pub node_failure_rate: f64,
    /// Battery points drained per simulated minute, averaged over nodes.
    pub battery_consumption: f64,
    pub total_battery_consumed: f64,
    pub average_hops: f64,
    pub network_health: f64,
    pub online_nodes: usize,
    pub total_nodes: usize,
    pub components: usize,
    pub active_emergencies: usize,
    pub messages_generated: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    pub messages_in_flight: u64,
    pub node_failures: u64,
}

/// Running totals the harness feeds as messages complete.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeliveryTally {
    pub generated: u64,
    pub delivered: u64,
    pub failed: u64,
    latency_sum: u64,
    hop_sum: u64,
    emergency_delivered: u64,
    emergency_latency_sum: u64,
}

impl DeliveryTally {
    pub fn record_delivery(&mut self, latency: u64, hops: usize, emergency: bool) {
        self.delivered += 1;
        self.latency_sum += latency;
        self.hop_sum += hops as u64;
        if emergency {
            self.emergency_delivered += 1;
            self.emergency_latency_sum += latency;
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn delivery_rate(&self) -> f64 {
        let completed = self.delivered + self.failed;
        if completed == 0 {
            100.0
        } else {
            self.delivered as f64 / completed as f64 * 100.0
        }
    }

    pub fn average_latency(&self) -> f64 {
        mean(self.latency_sum, self.delivered)
    }

    pub fn average_hops(&self) -> f64 {
        mean(self.hop_sum, self.delivered)
    }

    pub fn emergency_response_time(&self) -> f64 {
        mean(self.emergency_latency_sum, self.emergency_delivered)
    }

    pub fn routing_efficiency(&self) -> f64 {
        let hops = self.average_hops();
        if hops > 0.0 {
            100.0 / hops
        } else {
            0.0
        }
    }
}

fn mean(sum: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Failures per node per minute, as a percentage.
pub(crate) fn failure_rate(failures: u64, nodes: usize, ticks: u64) -> f64 {
    if nodes == 0 || ticks == 0 {
        return 0.0;
    }
    failures as f64 / nodes as f64 * (60.0 / ticks as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tally_reports_full_delivery() {
        let tally = DeliveryTally::default();
        assert_eq!(tally.delivery_rate(), 100.0);
        assert_eq!(tally.average_latency(), 0.0);
        assert_eq!(tally.routing_efficiency(), 0.0);
    }

    #[test]
    fn test_tally_averages() {
        let mut tally = DeliveryTally::default();
        tally.record_delivery(2, 2, false);
        tally.record_delivery(4, 4, true);
        tally.record_failure();
        assert!((tally.delivery_rate() - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(tally.average_latency(), 3.0);
        assert_eq!(tally.average_hops(), 3.0);
        assert!((tally.routing_efficiency() - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(tally.emergency_response_time(), 4.0);
    }

    #[test]
    fn test_failure_rate_scales_per_minute() {
        assert_eq!(failure_rate(2, 10, 60), 20.0);
        assert_eq!(failure_rate(2, 10, 120), 10.0);
        assert_eq!(failure_rate(2, 0, 120), 0.0);
    }
}
