//! Protocol payload types
//!
//! Serde shapes here are wire contracts with the engine: optional fields are
//! omitted when absent (absence means "unknown", not zero), `steps` is always
//! present, and `parent_trace_id` is always emitted so the engine can tell
//! "root trace" from "field dropped".

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine-side error codes carried in JSON-RPC error objects.
pub mod error_code {
    pub const INVALID_TRACE: i64 = 1001;
    pub const ASSERTION_ERROR: i64 = 1002;
    pub const PROVIDER_ERROR: i64 = 2001;
    pub const ENGINE_ERROR: i64 = 3001;
    pub const TIMEOUT: i64 = 3002;
    pub const SESSION_ERROR: i64 = 3003;
}

/// Assertion type identifiers understood by the engine. The set is open
/// ended on the wire; these are the ones the engine ships with.
pub mod assertion_type {
    pub const SCHEMA: &str = "schema";
    pub const CONSTRAINT: &str = "constraint";
    pub const TRACE: &str = "trace";
    pub const CONTENT: &str = "content";
    pub const EMBEDDING: &str = "embedding";
    pub const LLM_JUDGE: &str = "llm_judge";
    pub const TRACE_TREE: &str = "trace_tree";
}

/// Kind of recorded action within a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    LlmCall,
    ToolCall,
    Retrieval,
    /// Delegated sub-agent call; may embed a child trace
    AgentCall,
}

/// Outcome of a single assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionStatus {
    Pass,
    SoftFail,
    HardFail,
}

/// Aggregate execution metadata attached to a trace. All fields optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// One recorded action within a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Child trace for `agent_call` steps; this is how delegation nests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_trace: Option<Box<Trace>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
}

impl Step {
    /// Create a step with the required fields only.
    pub fn new(step_type: StepType, name: impl Into<String>) -> Self {
        Self {
            step_type,
            name: name.into(),
            args: None,
            result: None,
            sub_trace: None,
            metadata: None,
            started_at_ms: None,
            ended_at_ms: None,
            agent_id: None,
            agent_role: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_sub_trace(mut self, sub_trace: Trace) -> Self {
        self.sub_trace = Some(Box::new(sub_trace));
        self
    }

    pub fn with_span(mut self, started_at_ms: i64, ended_at_ms: i64) -> Self {
        self.started_at_ms = Some(started_at_ms);
        self.ended_at_ms = Some(ended_at_ms);
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_agent_role(mut self, agent_role: impl Into<String>) -> Self {
        self.agent_role = Some(agent_role.into());
        self
    }
}

/// A structured record of one agent execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TraceMetadata>,
    /// Always serialized (null for root traces) so the engine can
    /// distinguish an absent link from a dropped field.
    #[serde(default)]
    pub parent_trace_id: Option<String>,
}

fn default_schema_version() -> u32 {
    1
}

/// A caller-declared check, interpreted entirely by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub assertion_id: String,
    #[serde(rename = "type")]
    pub assertion_type: String,
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Assertion {
    pub fn new(
        assertion_id: impl Into<String>,
        assertion_type: impl Into<String>,
        spec: Value,
    ) -> Self {
        Self {
            assertion_id: assertion_id.into(),
            assertion_type: assertion_type.into(),
            spec,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Engine verdict on a single assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub assertion_id: String,
    pub status: AssertionStatus,
    /// Confidence score in [0.0, 1.0]
    pub score: f64,
    pub explanation: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Capability negotiation sent with the `initialize` handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    pub sdk_name: String,
    pub sdk_version: String,
    pub protocol_version: u32,
    pub required_capabilities: Vec<String>,
    #[serde(default = "default_encoding")]
    pub preferred_encoding: String,
}

fn default_encoding() -> String {
    "json".to_string()
}

/// Engine's reply to `initialize`: version, capabilities, and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    pub engine_version: String,
    pub protocol_version: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Required capabilities the engine cannot serve; nonempty is fatal
    #[serde(default)]
    pub missing: Vec<String>,
    pub compatible: bool,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,
    #[serde(default = "default_max_trace_size_bytes")]
    pub max_trace_size_bytes: u64,
    #[serde(default = "default_max_steps_per_trace")]
    pub max_steps_per_trace: u32,
}

fn default_max_concurrent_requests() -> u32 {
    64
}

fn default_max_trace_size_bytes() -> u64 {
    10_485_760
}

fn default_max_steps_per_trace() -> u32 {
    10_000
}

/// Parameters for `evaluate_batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateBatchParams {
    pub trace: Trace,
    pub assertions: Vec<Assertion>,
}

/// Result of `evaluate_batch`: one result per assertion plus aggregates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluateBatchResult {
    #[serde(default)]
    pub results: Vec<AssertionResult>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_duration_ms: u64,
}

impl EvaluateBatchResult {
    /// Deterministic all-pass results for simulation mode: every assertion
    /// passes with score 1.0 and zero cost/duration, without touching the
    /// engine.
    pub fn simulated(assertions: &[Assertion]) -> Self {
        let results = assertions
            .iter()
            .map(|a| AssertionResult {
                assertion_id: a.assertion_id.clone(),
                status: AssertionStatus::Pass,
                score: 1.0,
                explanation: format!(
                    "[simulation] {} assertion passed (deterministic)",
                    a.assertion_type
                ),
                cost: 0.0,
                duration_ms: 0,
                request_id: a.request_id.clone(),
            })
            .collect();
        Self {
            results,
            total_cost: 0.0,
            total_duration_ms: 0,
        }
    }
}

/// Result of `shutdown`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResult {
    pub sessions_completed: u64,
    pub assertions_evaluated: u64,
}

/// Parameters for `submit_plugin_result`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPluginResultParams {
    pub trace_id: String,
    pub plugin_name: String,
    pub assertion_id: String,
    pub result: AssertionResult,
}

/// Structured payload inside a JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error_type: String,
    pub retryable: bool,
    pub detail: String,
}

/// JSON-RPC error member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_type_wire_names() {
        assert_eq!(
            serde_json::to_value(StepType::LlmCall).unwrap(),
            json!("llm_call")
        );
        assert_eq!(
            serde_json::to_value(StepType::AgentCall).unwrap(),
            json!("agent_call")
        );
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(AssertionStatus::SoftFail).unwrap(),
            json!("soft_fail")
        );
        assert_eq!(
            serde_json::to_value(AssertionStatus::HardFail).unwrap(),
            json!("hard_fail")
        );
    }

    #[test]
    fn test_trace_optional_fields_omitted() {
        let trace = Trace {
            schema_version: 1,
            trace_id: "trc_1".to_string(),
            agent_id: None,
            input: None,
            steps: vec![],
            output: json!({"answer": 42}),
            metadata: None,
            parent_trace_id: None,
        };
        let value = serde_json::to_value(&trace).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("agent_id"));
        assert!(!obj.contains_key("input"));
        assert!(!obj.contains_key("metadata"));
        // parent_trace_id is always emitted, null for roots
        assert!(obj.contains_key("parent_trace_id"));
        assert!(obj["parent_trace_id"].is_null());
        assert_eq!(obj["steps"], json!([]));
    }

    #[test]
    fn test_nested_sub_trace_round_trip() {
        let child = Trace {
            schema_version: 1,
            trace_id: "trc_child".to_string(),
            agent_id: Some("researcher".to_string()),
            input: None,
            steps: vec![],
            output: json!({"summary": "done"}),
            metadata: None,
            parent_trace_id: Some("trc_parent".to_string()),
        };
        let parent = Trace {
            schema_version: 1,
            trace_id: "trc_parent".to_string(),
            agent_id: None,
            input: None,
            steps: vec![Step::new(StepType::AgentCall, "delegate")
                .with_sub_trace(child.clone())],
            output: json!({}),
            metadata: None,
            parent_trace_id: None,
        };

        let encoded = serde_json::to_string(&parent).unwrap();
        let decoded: Trace = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, parent);
        assert_eq!(
            decoded.steps[0].sub_trace.as_deref().unwrap().trace_id,
            "trc_child"
        );
    }

    #[test]
    fn test_assertion_type_field_name() {
        let assertion = Assertion::new(
            "a1",
            assertion_type::CONSTRAINT,
            json!({"field": "metadata.cost_usd", "operator": "lte", "value": 0.01}),
        );
        let value = serde_json::to_value(&assertion).unwrap();
        assert_eq!(value["type"], "constraint");
        assert!(value.get("request_id").is_none());
    }

    #[test]
    fn test_initialize_result_defaults() {
        let raw = json!({
            "engine_version": "0.3.1",
            "protocol_version": 1,
            "compatible": true
        });
        let init: InitializeResult = serde_json::from_value(raw).unwrap();
        assert!(init.missing.is_empty());
        assert_eq!(init.encoding, "json");
        assert_eq!(init.max_concurrent_requests, 64);
        assert_eq!(init.max_trace_size_bytes, 10_485_760);
    }

    #[test]
    fn test_simulated_batch_result() {
        let assertions = vec![
            Assertion::new("a1", assertion_type::SCHEMA, json!({})),
            Assertion::new("a2", assertion_type::LLM_JUDGE, json!({})).with_request_id("r2"),
        ];
        let result = EvaluateBatchResult::simulated(&assertions);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.total_cost, 0.0);
        assert_eq!(result.total_duration_ms, 0);
        for r in &result.results {
            assert_eq!(r.status, AssertionStatus::Pass);
            assert_eq!(r.score, 1.0);
            assert_eq!(r.cost, 0.0);
        }
        assert_eq!(result.results[1].request_id.as_deref(), Some("r2"));
    }
}
