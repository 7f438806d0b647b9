// Health and metrics snapshots
//
// Transport-agnostic views the API surface serializes. The engine fills
// them; nothing here talks to the database directly.

use serde::Serialize;

use foreman_core::WorkflowState;
use foreman_storage::MetricsAggregate;

/// Health level of one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentHealth {
    fn rank(&self) -> u8 {
        match self {
            ComponentHealth::Healthy => 0,
            ComponentHealth::Degraded => 1,
            ComponentHealth::Unhealthy => 2,
        }
    }
}

/// Per-component health plus the derived overall level
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: ComponentHealth,
    pub events: ComponentHealth,
    pub registry: ComponentHealth,
}

impl HealthSnapshot {
    /// The worst component wins.
    pub fn overall(&self) -> ComponentHealth {
        [self.state, self.events, self.registry]
            .into_iter()
            .max_by_key(ComponentHealth::rank)
            .unwrap_or(ComponentHealth::Healthy)
    }
}

/// Duration percentiles over completed workflows, in seconds
#[derive(Debug, Clone, Default, Serialize)]
pub struct DurationPercentiles {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
}

impl DurationPercentiles {
    /// Nearest-rank percentiles over the sample set.
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let pick = |percentile: f64| {
            let rank = ((percentile / 100.0) * samples.len() as f64).ceil() as usize;
            Some(samples[rank.clamp(1, samples.len()) - 1])
        };
        Self {
            p50: pick(50.0),
            p90: pick(90.0),
            p99: pick(99.0),
        }
    }
}

/// Typed metrics snapshot for the operations surface
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Current workflow counts per state
    pub workflows_by_state: Vec<(WorkflowState, i64)>,
    /// Daily rollups per (date, kind)
    pub daily: Vec<MetricsAggregate>,
    /// Completed-workflow duration percentiles
    pub durations: DurationPercentiles,
    /// Workflows with a live supervising task in this process
    pub active_workflows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_nearest_rank() {
        let empty = DurationPercentiles::from_samples(vec![]);
        assert!(empty.p50.is_none());

        let samples: Vec<f64> = (1..=100).map(|n| n as f64).collect();
        let percentiles = DurationPercentiles::from_samples(samples);
        assert_eq!(percentiles.p50, Some(50.0));
        assert_eq!(percentiles.p90, Some(90.0));
        assert_eq!(percentiles.p99, Some(99.0));

        let single = DurationPercentiles::from_samples(vec![7.0]);
        assert_eq!(single.p50, Some(7.0));
        assert_eq!(single.p99, Some(7.0));
    }

    #[test]
    fn test_overall_is_worst_component() {
        let snapshot = HealthSnapshot {
            state: ComponentHealth::Healthy,
            events: ComponentHealth::Degraded,
            registry: ComponentHealth::Healthy,
        };
        assert_eq!(snapshot.overall(), ComponentHealth::Degraded);

        let snapshot = HealthSnapshot {
            state: ComponentHealth::Unhealthy,
            events: ComponentHealth::Healthy,
            registry: ComponentHealth::Degraded,
        };
        assert_eq!(snapshot.overall(), ComponentHealth::Unhealthy);
    }
}
