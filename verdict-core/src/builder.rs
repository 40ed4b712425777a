//! Fluent trace construction

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, VerdictError};
use crate::proto::types::{Step, StepType, Trace, TraceMetadata};

/// Milliseconds since the Unix epoch, for step spans.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Builder for [`Trace`] objects.
///
/// A trace is immutable once built; the builder enforces the one structural
/// invariant the engine relies on: `output` must be set before `build()`.
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    trace_id: String,
    agent_id: Option<String>,
    input: Option<Value>,
    steps: Vec<Step>,
    output: Option<Value>,
    metadata: Option<TraceMetadata>,
    parent_trace_id: Option<String>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self {
            trace_id: format!("trc_{}", &Uuid::new_v4().simple().to_string()[..12]),
            agent_id: None,
            input: None,
            steps: Vec::new(),
            output: None,
            metadata: None,
            parent_trace_id: None,
        }
    }

    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        let mut builder = Self::new();
        builder.agent_id = Some(agent_id.into());
        builder
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn llm_call(self, name: impl Into<String>, args: Value, result: Value) -> Self {
        self.step(
            Step::new(StepType::LlmCall, name)
                .with_args(args)
                .with_result(result),
        )
    }

    pub fn tool_call(self, name: impl Into<String>, args: Value, result: Value) -> Self {
        self.step(
            Step::new(StepType::ToolCall, name)
                .with_args(args)
                .with_result(result),
        )
    }

    pub fn retrieval(self, name: impl Into<String>, args: Value, result: Value) -> Self {
        self.step(
            Step::new(StepType::Retrieval, name)
                .with_args(args)
                .with_result(result),
        )
    }

    /// Record a delegated sub-agent call with its nested child trace.
    pub fn agent_call(self, name: impl Into<String>, sub_trace: Trace) -> Self {
        self.step(Step::new(StepType::AgentCall, name).with_sub_trace(sub_trace))
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn metadata(mut self, metadata: TraceMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn parent_trace_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_trace_id = Some(parent_id.into());
        self
    }

    /// Finalize the trace. Steps keep insertion order.
    pub fn build(self) -> Result<Trace> {
        let output = self.output.ok_or_else(|| {
            VerdictError::Configuration(
                "trace output is required; call output() before build()".to_string(),
            )
        })?;
        Ok(Trace {
            schema_version: 1,
            trace_id: self.trace_id,
            agent_id: self.agent_id,
            input: self.input,
            steps: self.steps,
            output,
            metadata: self.metadata,
            parent_trace_id: self.parent_trace_id,
        })
    }
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
