//! Wire protocol for the verdict-engine process
//!
//! The engine speaks newline-delimited JSON-RPC 2.0 over stdin/stdout: one
//! compact JSON object per line, UTF-8, no embedded newlines. `types` holds
//! the domain payloads, `codec` the framing and envelope handling.

pub mod codec;
pub mod types;
