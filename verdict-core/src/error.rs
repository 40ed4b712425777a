//! Error types for Verdict operations

use crate::proto::types::ErrorData;

/// Result type for Verdict operations
pub type Result<T> = std::result::Result<T, VerdictError>;

/// Error types for the Verdict SDK.
///
/// The taxonomy follows the protocol boundaries: codec errors are fatal to
/// one message, session errors never touch the wire, timeout/disconnect
/// errors surface the engine's health, and acquisition errors carry the
/// remediation text a user needs because they cannot recover
/// programmatically.
#[derive(Debug, thiserror::Error)]
pub enum VerdictError {
    /// Wire line was empty, not valid JSON, or not JSON-RPC 2.0
    #[error("malformed engine message: {0}")]
    MalformedMessage(String),

    /// Engine answered with a JSON-RPC error object
    #[error("engine error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<ErrorData>,
    },

    /// Successfully decoded response lacked a required member
    #[error("engine response missing '{0}' field")]
    MissingField(&'static str),

    /// Engine binary could not be located anywhere in the discovery chain
    #[error("{0}")]
    BinaryNotFound(String),

    /// No release asset exists for this OS/architecture combination
    #[error("unsupported platform: {platform}. Supported: {supported}")]
    PlatformUnsupported { platform: String, supported: String },

    /// Downloaded bytes did not match the release checksum manifest
    #[error(
        "sha256 mismatch for {asset}:\n  expected: {expected}\n  actual:   {actual}\n\
         The download may be corrupted. Retry or download manually."
    )]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },

    /// Network failure while fetching a release asset
    #[error("download failed: {0}")]
    Download(String),

    /// Handshake succeeded at the transport level but the engine cannot
    /// serve the capabilities this SDK requires
    #[error("engine incompatible; missing capabilities: {missing:?}")]
    IncompatibleEngine { missing: Vec<String> },

    /// Engine did not answer within the request deadline
    #[error(
        "engine did not respond to '{method}' within {timeout_secs}s. Check that the \
         engine process is healthy or increase VERDICT_ENGINE_TIMEOUT."
    )]
    EngineTimeout { method: String, timeout_secs: f64 },

    /// Engine closed its output stream or the process exited
    #[error("engine disconnected (stdout closed)")]
    EngineDisconnected,

    /// Request issued before a successful initialize handshake
    #[error("engine not initialized; call start() first")]
    NotInitialized,

    /// Sampler constructed with a rate outside [0.0, 1.0]
    #[error("sample_rate must be in [0.0, 1.0], got {0}")]
    InvalidSampleRate(f64),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VerdictError {
    /// A fresh disconnect error. Handed out once per pending request when a
    /// channel-level failure fans out to every in-flight caller.
    pub fn disconnected() -> Self {
        VerdictError::EngineDisconnected
    }
}
