// Cost and budget tracking
//
// In-memory per-workflow running totals. The engine writes every delta
// through to the state store; the in-memory copy exists so budget checks
// never need a database read on the hot path.

use std::collections::HashMap;

use parking_lot::Mutex;

use foreman_core::{ForemanError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    pub cost_usd: f64,
    pub total_tokens: u64,
    pub requests: u64,
}

/// Tracks spend per workflow and enforces budgets
#[derive(Default)]
pub struct CostTracker {
    totals: Mutex<HashMap<String, UsageTotals>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the in-memory totals from a persisted workflow (on resume).
    pub fn seed(&self, workflow_id: &str, cost_usd: f64, total_tokens: u64) {
        let mut totals = self.totals.lock();
        let entry = totals.entry(workflow_id.to_string()).or_default();
        entry.cost_usd = cost_usd;
        entry.total_tokens = total_tokens;
    }

    /// Record a provider response's usage; returns the new totals.
    pub fn record(&self, workflow_id: &str, cost_usd: f64, tokens: u64) -> UsageTotals {
        let mut totals = self.totals.lock();
        let entry = totals.entry(workflow_id.to_string()).or_default();
        entry.cost_usd += cost_usd.max(0.0);
        entry.total_tokens += tokens;
        entry.requests += 1;
        *entry
    }

    pub fn totals(&self, workflow_id: &str) -> UsageTotals {
        self.totals
            .lock()
            .get(workflow_id)
            .copied()
            .unwrap_or_default()
    }

    /// Reject the next request when its projected cost would push the
    /// workflow over its budget. The failure is permanent.
    pub fn check_budget(
        &self,
        workflow_id: &str,
        budget_usd: Option<f64>,
        projected_cost: f64,
    ) -> Result<()> {
        let Some(budget) = budget_usd else {
            return Ok(());
        };
        let spent = self.totals(workflow_id).cost_usd;
        if spent + projected_cost > budget {
            return Err(ForemanError::permanent(format!(
                "budget exceeded: spent {:.4} of {:.4} USD, next call projected {:.4}",
                spent, budget, projected_cost
            )));
        }
        Ok(())
    }

    /// Drop the in-memory entry once a workflow reaches a terminal state.
    pub fn release(&self, workflow_id: &str) {
        self.totals.lock().remove(workflow_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let tracker = CostTracker::new();
        tracker.record("wf", 0.0003, 30);
        let totals = tracker.record("wf", 0.0009, 90);
        assert!((totals.cost_usd - 0.0012).abs() < 1e-9);
        assert_eq!(totals.total_tokens, 120);
        assert_eq!(totals.requests, 2);
    }

    #[test]
    fn test_budget_enforced() {
        let tracker = CostTracker::new();
        tracker.record("wf", 0.9, 1000);

        assert!(tracker.check_budget("wf", None, 10.0).is_ok());
        assert!(tracker.check_budget("wf", Some(1.0), 0.05).is_ok());

        let err = tracker.check_budget("wf", Some(1.0), 0.2).unwrap_err();
        assert!(matches!(err, ForemanError::Permanent(_)));
    }

    #[test]
    fn test_seed_and_release() {
        let tracker = CostTracker::new();
        tracker.seed("wf", 0.5, 400);
        assert!((tracker.totals("wf").cost_usd - 0.5).abs() < 1e-9);

        tracker.release("wf");
        assert_eq!(tracker.totals("wf").total_tokens, 0);
    }
}
