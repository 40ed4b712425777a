//! Aggregated evaluation results

use serde::{Deserialize, Serialize};

use crate::proto::types::{AssertionResult, AssertionStatus, Trace};

/// Result of one agent execution together with its assertion verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub trace: Trace,
    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_duration_ms: u64,
}

impl AgentResult {
    pub fn new(trace: Trace) -> Self {
        Self {
            trace,
            assertion_results: Vec::new(),
            total_cost: 0.0,
            total_duration_ms: 0,
        }
    }

    /// True when every assertion passed.
    pub fn passed(&self) -> bool {
        self.assertion_results
            .iter()
            .all(|r| r.status == AssertionStatus::Pass)
    }

    pub fn pass_count(&self) -> usize {
        self.assertion_results
            .iter()
            .filter(|r| r.status == AssertionStatus::Pass)
            .count()
    }

    pub fn fail_count(&self) -> usize {
        self.assertion_results.len() - self.pass_count()
    }

    /// Failed assertions, both soft and hard.
    pub fn failed_assertions(&self) -> Vec<&AssertionResult> {
        self.assertion_results
            .iter()
            .filter(|r| r.status != AssertionStatus::Pass)
            .collect()
    }

    pub fn hard_failures(&self) -> Vec<&AssertionResult> {
        self.assertion_results
            .iter()
            .filter(|r| r.status == AssertionStatus::HardFail)
            .collect()
    }

    pub fn soft_failures(&self) -> Vec<&AssertionResult> {
        self.assertion_results
            .iter()
            .filter(|r| r.status == AssertionStatus::SoftFail)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TraceBuilder;
    use serde_json::json;

    fn result(id: &str, status: AssertionStatus) -> AssertionResult {
        AssertionResult {
            assertion_id: id.to_string(),
            status,
            score: if status == AssertionStatus::Pass { 1.0 } else { 0.2 },
            explanation: String::new(),
            cost: 0.0,
            duration_ms: 0,
            request_id: None,
        }
    }

    fn trace() -> Trace {
        TraceBuilder::new().output(json!({})).build().unwrap()
    }

    #[test]
    fn test_all_pass() {
        let mut agent_result = AgentResult::new(trace());
        agent_result.assertion_results = vec![
            result("a1", AssertionStatus::Pass),
            result("a2", AssertionStatus::Pass),
        ];
        assert!(agent_result.passed());
        assert_eq!(agent_result.pass_count(), 2);
        assert_eq!(agent_result.fail_count(), 0);
    }

    #[test]
    fn test_mixed_failures() {
        let mut agent_result = AgentResult::new(trace());
        agent_result.assertion_results = vec![
            result("a1", AssertionStatus::Pass),
            result("a2", AssertionStatus::SoftFail),
            result("a3", AssertionStatus::HardFail),
        ];
        assert!(!agent_result.passed());
        assert_eq!(agent_result.pass_count(), 1);
        assert_eq!(agent_result.fail_count(), 2);
        assert_eq!(agent_result.soft_failures().len(), 1);
        assert_eq!(agent_result.hard_failures().len(), 1);
        assert_eq!(agent_result.failed_assertions().len(), 2);
    }

    #[test]
    fn test_empty_results_pass() {
        let agent_result = AgentResult::new(trace());
        assert!(agent_result.passed());
        assert_eq!(agent_result.fail_count(), 0);
    }
}
