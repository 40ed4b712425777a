//! Multiplexing RPC client
//!
//! [`EngineClient`] layers concurrent request/response multiplexing over the
//! engine's single stdio pair. Writes are serialized under one lock (a
//! request line is written atomically), while a background reader task
//! correlates each response line back to its caller by request id through a
//! registry of oneshot channels. Callers therefore overlap freely up to the
//! engine's own concurrency limit, and out-of-order responses resolve
//! correctly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use verdict_core::config::VerdictConfig;
use verdict_core::error::{Result, VerdictError};
use verdict_core::proto::codec;
use verdict_core::proto::types::{
    Assertion, AssertionResult, EvaluateBatchParams, EvaluateBatchResult, ShutdownResult,
    SubmitPluginResultParams, Trace,
};
use verdict_core::result::AgentResult;

use crate::manager::EngineManager;

type Pending = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Deadline for the best-effort `shutdown` exchange during `close`.
const SHUTDOWN_WAIT: std::time::Duration = std::time::Duration::from_secs(5);

struct WriteState {
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    next_id: u64,
}

/// Concurrent client for the engine subprocess.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct EngineClient {
    manager: Arc<Mutex<EngineManager>>,
    simulation: bool,
    writer: Arc<Mutex<Option<WriteState>>>,
    pending: Pending,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl EngineClient {
    pub fn new(config: VerdictConfig) -> Self {
        Self {
            simulation: config.simulation,
            manager: Arc::new(Mutex::new(EngineManager::new(config.engine))),
            writer: Arc::new(Mutex::new(None)),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            reader_task: StdMutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the engine and switch to multiplexed transport.
    ///
    /// In simulation mode this is a no-op; no subprocess is ever spawned.
    pub async fn start(&self) -> Result<()> {
        if self.simulation {
            info!("simulation mode, engine not started");
            return Ok(());
        }

        let mut manager = self.manager.lock().await;
        manager.start().await?;
        // Continue the manager's id sequence so ids stay unique across the
        // whole engine session (the handshake already consumed some).
        let next_id = manager.last_request_id();
        if let Some((stdin, stdout)) = manager.split_io() {
            self.install_transport(Box::new(stdin), stdout, next_id).await;
        }
        Ok(())
    }

    /// Wire an arbitrary stdio pair into the client. Tests drive this with
    /// an in-memory duplex instead of a real subprocess.
    async fn install_transport<R>(
        &self,
        stdin: Box<dyn AsyncWrite + Send + Unpin>,
        stdout: R,
        next_id: u64,
    ) where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        *self.writer.lock().await = Some(WriteState { stdin, next_id });
        self.closed.store(false, Ordering::SeqCst);

        let pending = Arc::clone(&self.pending);
        let closed = Arc::clone(&self.closed);
        let task = tokio::spawn(read_loop(stdout, pending, closed));
        if let Some(old) = self.reader_task.lock().unwrap_or_else(|e| e.into_inner()).replace(task)
        {
            old.abort();
        }
    }

    /// Send one request over the multiplexed transport and await its
    /// response, without blocking other callers.
    pub async fn send_request(&self, method: &str, params: &Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VerdictError::EngineDisconnected);
        }

        let rx = {
            let mut writer = self.writer.lock().await;
            let state = match writer.as_mut() {
                Some(state) => state,
                // No transport installed: sequential path through the manager.
                None => {
                    drop(writer);
                    return self.manager.lock().await.send_request(method, params).await;
                }
            };

            state.next_id += 1;
            let id = state.next_id;
            let bytes = codec::encode_request(id, method, params)?;

            let (tx, rx) = oneshot::channel();
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(id, tx);

            // Hold the write lock across the full line so concurrent
            // requests never interleave bytes.
            let write = async {
                state.stdin.write_all(&bytes).await?;
                state.stdin.flush().await?;
                Ok::<_, std::io::Error>(())
            };
            if let Err(e) = write.await {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                return Err(VerdictError::Io(e));
            }
            rx
        };

        // No deadline here: engine-side evaluation time is unbounded, and a
        // caller that needs an upper bound wraps its own. The sequential
        // manager path keeps the configured per-request timeout.
        match rx.await {
            Ok(result) => result,
            // Reader dropped the sender: transport is gone.
            Err(_) => Err(VerdictError::EngineDisconnected),
        }
    }

    /// Evaluate a batch of assertions against a trace.
    ///
    /// In simulation mode returns deterministic all-pass results without
    /// touching the engine.
    pub async fn evaluate_batch(
        &self,
        trace: &Trace,
        assertions: &[Assertion],
    ) -> Result<EvaluateBatchResult> {
        if self.simulation {
            return Ok(EvaluateBatchResult::simulated(assertions));
        }

        let params = EvaluateBatchParams {
            trace: trace.clone(),
            assertions: assertions.to_vec(),
        };
        let value = self
            .send_request("evaluate_batch", &serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Evaluate and fold the verdicts into an [`AgentResult`].
    pub async fn evaluate(
        &self,
        trace: Trace,
        assertions: &[Assertion],
    ) -> Result<AgentResult> {
        let batch = self.evaluate_batch(&trace, assertions).await?;
        Ok(AgentResult {
            trace,
            assertion_results: batch.results,
            total_cost: batch.total_cost,
            total_duration_ms: batch.total_duration_ms,
        })
    }

    /// Feed an externally computed assertion result back to the engine.
    /// Returns whether the engine accepted it.
    pub async fn submit_plugin_result(
        &self,
        trace_id: &str,
        plugin_name: &str,
        assertion_id: &str,
        result: AssertionResult,
    ) -> Result<bool> {
        if self.simulation {
            return Ok(true);
        }

        let params = SubmitPluginResultParams {
            trace_id: trace_id.to_string(),
            plugin_name: plugin_name.to_string(),
            assertion_id: assertion_id.to_string(),
            result,
        };
        let value = self
            .send_request("submit_plugin_result", &serde_json::to_value(&params)?)
            .await?;
        Ok(value
            .get("accepted")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Shut down: best-effort `shutdown` request, then stop the subprocess.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.simulation {
            return Ok(());
        }

        if !self.closed.load(Ordering::SeqCst) && self.writer.lock().await.is_some() {
            // Best-effort, under a local deadline so a wedged engine cannot
            // stall teardown.
            let params = serde_json::json!({});
            let shutdown = self.send_request("shutdown", &params);
            match tokio::time::timeout(SHUTDOWN_WAIT, shutdown).await {
                Ok(Ok(value)) => {
                    if let Ok(stats) = serde_json::from_value::<ShutdownResult>(value) {
                        info!(
                            "engine shutdown: {} sessions, {} assertions evaluated",
                            stats.sessions_completed, stats.assertions_evaluated
                        );
                    }
                }
                Ok(Err(e)) => debug!("shutdown request failed: {}", e),
                Err(_) => debug!("engine did not answer shutdown in time"),
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        *self.writer.lock().await = None;
        if let Some(task) = self.reader_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        fail_all(&self.pending, || VerdictError::disconnected());

        self.manager.lock().await.stop().await
    }
}

/// Route response lines to their waiting callers until EOF or a read error.
async fn read_loop<R>(mut stdout: R, pending: Pending, closed: Arc<AtomicBool>)
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match stdout.read_line(&mut line).await {
            Ok(0) => {
                debug!("engine stdout closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("error reading from engine: {}", e);
                break;
            }
        }

        let outcome = match codec::decode_response(&line) {
            Ok(response) => {
                let id = codec::extract_id(&response);
                (id, codec::extract_result(response))
            }
            Err(err @ VerdictError::Protocol { .. }) => {
                // Protocol errors belong to a specific request; dig the id
                // out of the raw line to deliver them.
                match codec::recover_request_id(&line) {
                    Some(id) => (id, Err(err)),
                    None => {
                        warn!("engine error without request id: {}", err);
                        continue;
                    }
                }
            }
            Err(err) => {
                warn!("discarding undecodable line from engine: {}", err);
                continue;
            }
        };

        let (id, result) = outcome;
        let sender = pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!("response for unknown request id {}, discarding", id),
        }
    }

    // Mark closed before failing waiters so no new request can register
    // against a dead transport.
    closed.store(true, Ordering::SeqCst);
    fail_all(&pending, || VerdictError::disconnected());
}

fn fail_all(pending: &Pending, err: impl Fn() -> VerdictError) {
    let senders: Vec<_> = pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .drain()
        .map(|(_, tx)| tx)
        .collect();
    for tx in senders {
        let _ = tx.send(Err(err()));
    }
}

/// Anything that can evaluate assertions against a trace. The continuous
/// pipeline is generic over this so tests can count calls without an engine.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate_batch(
        &self,
        trace: &Trace,
        assertions: &[Assertion],
    ) -> Result<EvaluateBatchResult>;
}

#[async_trait]
impl Evaluator for EngineClient {
    async fn evaluate_batch(
        &self,
        trace: &Trace,
        assertions: &[Assertion],
    ) -> Result<EvaluateBatchResult> {
        EngineClient::evaluate_batch(self, trace, assertions).await
    }
}
