//! Verdict Core - data model and wire protocol for the Verdict agent-evaluation SDK
//!
//! Verdict delegates correctness checks on AI-agent execution traces to an
//! external `verdict-engine` process, reachable over newline-delimited
//! JSON-RPC on stdin/stdout. This crate holds everything that is pure data:
//! the trace/assertion model, the wire codec, the error taxonomy, and the
//! SDK configuration. Process supervision, the multiplexing client, and the
//! continuous evaluation pipeline live in `verdict-supervisor`.

pub mod builder;
pub mod config;
pub mod error;
pub mod proto;
pub mod result;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine release this SDK version is pinned to. The binary cache under
/// `~/.verdict/bin/` is only considered valid when its version marker
/// matches this exactly.
pub const ENGINE_VERSION: &str = "0.3.1";

/// Name of the engine executable (without the Windows `.exe` suffix).
pub const ENGINE_BINARY_NAME: &str = "verdict-engine";

/// JSON-RPC protocol version spoken by this SDK.
pub const PROTOCOL_VERSION: u32 = 1;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::builder::TraceBuilder;
    pub use crate::config::{ContinuousConfig, EngineConfig, VerdictConfig};
    pub use crate::error::{Result, VerdictError};
    pub use crate::proto::codec::{
        decode_response, encode_request, extract_id, extract_result, recover_request_id,
        RpcResponse,
    };
    pub use crate::proto::types::{
        Assertion, AssertionResult, AssertionStatus, ErrorData, EvaluateBatchParams,
        EvaluateBatchResult, InitializeParams, InitializeResult, RpcError, ShutdownResult,
        Step, StepType, SubmitPluginResultParams, Trace, TraceMetadata,
    };
    pub use crate::result::AgentResult;
}
