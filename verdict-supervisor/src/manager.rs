//! Engine subprocess lifecycle
//!
//! [`EngineManager`] owns exactly one `verdict-engine` child process: it
//! spawns the binary with piped stdio, performs the `initialize` handshake,
//! services sequential request/response exchanges with a per-request
//! deadline, and shuts the engine down gracefully before falling back to a
//! kill. Concurrent multiplexing over the same pipes lives in
//! [`crate::client`]; the manager alone is strictly one-request-at-a-time.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use verdict_core::config::EngineConfig;
use verdict_core::error::{Result, VerdictError};
use verdict_core::proto::codec;
use verdict_core::proto::types::{InitializeParams, InitializeResult, ShutdownResult};
use verdict_core::{PROTOCOL_VERSION, VERSION};

use crate::locate;

/// Grace period between the `shutdown` request / SIGTERM and a forced kill.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Capabilities this SDK cannot operate without.
const REQUIRED_CAPABILITIES: &[&str] = &["layers_1_4"];

/// Supervisor for a single engine subprocess.
pub struct EngineManager {
    config: EngineConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
    initialized: bool,
    request_id: u64,
    init_result: Option<InitializeResult>,
}

impl EngineManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            child: None,
            stdin: None,
            stdout: None,
            stderr_task: None,
            initialized: false,
            request_id: 0,
            init_result: None,
        }
    }

    /// True once `start` has completed the handshake and `stop` has not run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Engine capabilities and limits negotiated during the handshake.
    pub fn init_result(&self) -> Option<&InitializeResult> {
        self.init_result.as_ref()
    }

    /// Locate the engine, spawn it, and perform the `initialize` handshake.
    ///
    /// Idempotent: calling `start` on an initialized manager is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let binary = locate::locate_engine(&self.config).await?;
        info!("starting engine at {}", binary.display());

        let mut child = tokio::process::Command::new(&binary)
            .arg(format!("--log-level={}", self.config.log_level))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VerdictError::BinaryNotFound(format!(
                    "failed to spawn engine {}: {}",
                    binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("engine stdin pipe was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("engine stdout pipe was not captured"))?;

        // The engine logs to stderr; forward each line so its diagnostics
        // land in our subscriber instead of a detached pipe.
        if let Some(stderr) = child.stderr.take() {
            self.stderr_task = Some(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "verdict_engine", "{}", line);
                }
            }));
        }

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));

        match self.handshake().await {
            Ok(init) => {
                check_compatibility(&init)?;
                info!(
                    "engine v{} initialized (protocol {}, max_concurrent_requests {})",
                    init.engine_version, init.protocol_version, init.max_concurrent_requests
                );
                self.init_result = Some(init);
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                // Handshake failures leave a half-started child behind.
                self.kill_child().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<InitializeResult> {
        let params = InitializeParams {
            sdk_name: "verdict-rust".to_string(),
            sdk_version: VERSION.to_string(),
            protocol_version: PROTOCOL_VERSION,
            required_capabilities: REQUIRED_CAPABILITIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            preferred_encoding: "json".to_string(),
        };
        let value = self
            .send_request_inner("initialize", &serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send one request and wait for its response, sequentially.
    ///
    /// Fails with [`VerdictError::NotInitialized`] before `start` completes.
    pub async fn send_request(&mut self, method: &str, params: &Value) -> Result<Value> {
        if !self.initialized {
            return Err(VerdictError::NotInitialized);
        }
        self.send_request_inner(method, params).await
    }

    async fn send_request_inner(&mut self, method: &str, params: &Value) -> Result<Value> {
        let deadline = self.config.request_timeout;
        self.request_id += 1;
        let id = self.request_id;

        let stdin = self
            .stdin
            .as_mut()
            .ok_or(VerdictError::EngineDisconnected)?;
        let stdout = self
            .stdout
            .as_mut()
            .ok_or(VerdictError::EngineDisconnected)?;

        let bytes = codec::encode_request(id, method, params)?;

        let exchange = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await?;

            let mut line = String::new();
            let n = stdout.read_line(&mut line).await?;
            if n == 0 {
                return Err(VerdictError::EngineDisconnected);
            }
            let response = codec::decode_response(&line)?;
            if codec::extract_id(&response) != id {
                return Err(VerdictError::MalformedMessage(format!(
                    "response id {} does not match request id {}",
                    codec::extract_id(&response),
                    id
                )));
            }
            codec::extract_result(response)
        };

        timeout(deadline, exchange)
            .await
            .map_err(|_| VerdictError::EngineTimeout {
                method: method.to_string(),
                timeout_secs: deadline.as_secs_f64(),
            })?
    }

    /// Highest request id issued in this session so far.
    pub(crate) fn last_request_id(&self) -> u64 {
        self.request_id
    }

    /// Hand the stdio pair to a multiplexing client.
    ///
    /// After this the manager can no longer exchange requests itself; it
    /// keeps supervising the process and still handles `stop`.
    pub(crate) fn split_io(&mut self) -> Option<(ChildStdin, BufReader<ChildStdout>)> {
        match (self.stdin.take(), self.stdout.take()) {
            (Some(stdin), Some(stdout)) => Some((stdin, stdout)),
            (stdin, stdout) => {
                self.stdin = stdin;
                self.stdout = stdout;
                None
            }
        }
    }

    /// Stop the engine: best-effort `shutdown` request, SIGTERM, wait up to
    /// the grace period, then kill. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        if self.child.is_none() {
            self.initialized = false;
            return Ok(());
        }

        // Best-effort shutdown request, only while we still own the pipes.
        // When a client holds them it sends its own shutdown first.
        if self.initialized && self.stdin.is_some() {
            match self
                .send_request_inner("shutdown", &serde_json::json!({}))
                .await
                .and_then(|v| Ok(serde_json::from_value::<ShutdownResult>(v)?))
            {
                Ok(stats) => info!(
                    "engine shutdown: {} sessions, {} assertions evaluated",
                    stats.sessions_completed, stats.assertions_evaluated
                ),
                Err(e) => debug!("shutdown request failed, terminating anyway: {}", e),
            }
        }

        self.initialized = false;
        self.stdin = None;
        self.stdout = None;

        if let Some(mut child) = self.child.take() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                if let Err(e) = std::process::Command::new("kill")
                    .arg("-TERM")
                    .arg(pid.to_string())
                    .output()
                {
                    warn!("failed to send SIGTERM to engine (pid {}): {}", pid, e);
                }
            }
            #[cfg(not(unix))]
            let _ = child.start_kill();

            match timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("engine exited: {}", status),
                Ok(Err(e)) => warn!("error waiting for engine exit: {}", e),
                Err(_) => {
                    warn!("engine did not exit within grace period, killing");
                    if let Err(e) = child.start_kill() {
                        warn!("failed to kill engine: {}", e);
                    }
                    let _ = child.wait().await;
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.init_result = None;
        Ok(())
    }

    async fn kill_child(&mut self) {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Reject engines that declare themselves incompatible or cannot serve a
/// required capability.
pub fn check_compatibility(init: &InitializeResult) -> Result<()> {
    if !init.compatible || !init.missing.is_empty() {
        return Err(VerdictError::IncompatibleEngine {
            missing: init.missing.clone(),
        });
    }
    Ok(())
}
