//! Verdict Supervisor - engine process supervision and the evaluation pipeline
//!
//! Everything in this crate talks to (or acquires) the external
//! `verdict-engine` process:
//!
//! - **locate/install** - ordered discovery chain for the engine binary,
//!   including checksum-verified auto-download into a per-user cache
//! - **manager** - subprocess lifecycle: spawn, initialize handshake,
//!   timed request/response, graceful-then-forced shutdown
//! - **client** - request multiplexing over the single stdio pair, so many
//!   concurrent callers get correctly-correlated responses
//! - **continuous** - sampled background evaluation of live traces with
//!   best-effort drift alerting
//!
//! The engine itself is an opaque collaborator; assertion semantics live
//! entirely on its side of the pipe.

pub mod client;
pub mod continuous;
pub mod install;
pub mod locate;
pub mod manager;

pub use client::{EngineClient, Evaluator};
pub use continuous::{AlertDispatcher, ContinuousRunner, DriftAlert, Sampler};
pub use locate::locate_engine;
pub use manager::EngineManager;
