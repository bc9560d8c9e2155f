//! LLM cost tracking

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::llm::TokenUsage;

/// Accumulated spend across a session
#[derive(Debug, Clone, Default)]
pub struct CostTotals {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub calls: u64,
    pub calls_by_kind: BTreeMap<String, u64>,
}

/// Thread-safe accumulator shared by the scheduler, extractor, and
/// complexity assessor
#[derive(Debug, Default)]
pub struct CostTracker {
    totals: Mutex<CostTotals>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one LLM call under a kind label ("extraction", "complexity")
    pub fn record(&self, kind: &str, usage: &TokenUsage, model: &str) {
        let mut totals = self.totals.lock().expect("cost tracker lock");
        totals.calls += 1;
        *totals.calls_by_kind.entry(kind.to_string()).or_insert(0) += 1;
        totals.total_tokens += usage.total_tokens();
        totals.total_cost_usd += usage.cost_usd(model);
    }

    pub fn totals(&self) -> CostTotals {
        self.totals.lock().expect("cost tracker lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_accumulates_by_kind() {
        let tracker = CostTracker::new();
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
        };
        tracker.record("extraction", &usage, "gpt-4o");
        tracker.record("extraction", &usage, "gpt-4o");
        tracker.record("complexity", &usage, "gpt-4o-mini");

        let totals = tracker.totals();
        assert_eq!(totals.calls, 3);
        assert_eq!(totals.calls_by_kind["extraction"], 2);
        assert_eq!(totals.calls_by_kind["complexity"], 1);
        assert_eq!(totals.total_tokens, 4500);
        assert!(totals.total_cost_usd > 0.0);
    }
}
