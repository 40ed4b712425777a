//! Continuous evaluation pipeline
//!
//! Live traces are queued into a bounded channel at submission; the
//! background task consults the sampler for each dequeued trace and
//! evaluates the sampled ones against a fixed assertion set. Submission
//! never blocks the caller: when the queue is full the trace is dropped with
//! a warning. Hard failures raise drift alerts, delivered best-effort to
//! configured webhooks; alerting failures never affect evaluation.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use verdict_core::config::ContinuousConfig;
use verdict_core::error::{Result, VerdictError};
use verdict_core::proto::types::{Assertion, AssertionStatus, Trace};

use crate::client::Evaluator;

const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the worker waits on the queue before checking for shutdown.
const RECV_POLL: Duration = Duration::from_secs(1);

/// Probabilistic trace sampler.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    rate: f64,
}

impl Sampler {
    pub fn new(rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(VerdictError::InvalidSampleRate(rate));
        }
        Ok(Self { rate })
    }

    /// Decide whether one dequeued trace is evaluated. Rate 0.0 never
    /// samples, rate 1.0 always does.
    pub fn should_sample(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < self.rate
    }
}

/// One drift observation raised by the continuous pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct DriftAlert {
    pub drift_type: String,
    pub score: f64,
    pub trace_id: String,
}

impl DriftAlert {
    fn message(&self) -> String {
        format!(
            "[verdict] drift alert: type={} score={:.3} trace_id={}",
            self.drift_type, self.score, self.trace_id
        )
    }
}

/// Best-effort fan-out of drift alerts to the configured webhooks.
pub struct AlertDispatcher {
    webhook_url: Option<String>,
    slack_url: Option<String>,
    http: reqwest::Client,
}

impl AlertDispatcher {
    pub fn new(webhook_url: Option<String>, slack_url: Option<String>) -> Self {
        Self {
            webhook_url,
            slack_url,
            http: reqwest::Client::builder()
                .timeout(ALERT_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Deliver one alert to every configured sink. Failures are logged per
    /// sink and swallowed.
    pub async fn dispatch(&self, alert: &DriftAlert) {
        let webhook = async {
            if let Some(url) = &self.webhook_url {
                if let Err(e) = self.http.post(url).json(alert).send().await {
                    warn!("failed to deliver drift alert to webhook: {}", e);
                }
            }
        };
        let slack = async {
            if let Some(url) = &self.slack_url {
                let payload = serde_json::json!({"text": alert.message()});
                if let Err(e) = self.http.post(url).json(&payload).send().await {
                    warn!("failed to deliver drift alert to slack webhook: {}", e);
                }
            }
        };
        futures::join!(webhook, slack);
    }
}

/// Background evaluation of sampled live traces.
///
/// Generic over [`Evaluator`] so tests can count and record evaluations
/// without an engine.
pub struct ContinuousRunner<E: Evaluator + 'static> {
    evaluator: Arc<E>,
    assertions: Arc<Vec<Assertion>>,
    sampler: Sampler,
    dispatcher: Arc<AlertDispatcher>,
    queue_size: usize,
    tx: mpsc::Sender<Trace>,
    // Receiver survives stop/start cycles without losing queued traces.
    rx: Arc<Mutex<mpsc::Receiver<Trace>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Evaluator + 'static> ContinuousRunner<E> {
    pub fn new(
        evaluator: Arc<E>,
        assertions: Vec<Assertion>,
        config: &ContinuousConfig,
    ) -> Result<Self> {
        let sampler = Sampler::new(config.sample_rate)?;
        let (tx, rx) = mpsc::channel(config.queue_size);
        Ok(Self {
            evaluator,
            assertions: Arc::new(assertions),
            sampler,
            dispatcher: Arc::new(AlertDispatcher::new(
                config.alert_webhook_url.clone(),
                config.alert_slack_url.clone(),
            )),
            queue_size: config.queue_size,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            task: Mutex::new(None),
        })
    }

    /// Submit one trace for background evaluation.
    ///
    /// Never blocks. Returns `true` when the trace was enqueued, `false`
    /// when it was dropped because the queue is full. Sampling happens on
    /// the worker side, after dequeue.
    pub fn submit(&self, trace: Trace) -> bool {
        match self.tx.try_send(trace) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(trace)) => {
                warn!(
                    "continuous queue full (capacity {}), dropping trace {}",
                    self.queue_size, trace.trace_id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(trace)) => {
                warn!("continuous queue closed, dropping trace {}", trace.trace_id);
                false
            }
        }
    }

    /// Spawn the worker. Idempotent: a second start while running is a
    /// no-op.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let evaluator = Arc::clone(&self.evaluator);
        let assertions = Arc::clone(&self.assertions);
        let dispatcher = Arc::clone(&self.dispatcher);
        let rx = Arc::clone(&self.rx);
        let sampler = self.sampler;

        *task = Some(tokio::spawn(async move {
            info!("continuous evaluation worker started");
            let mut rx = rx.lock().await;
            loop {
                let trace = match timeout(RECV_POLL, rx.recv()).await {
                    Ok(Some(trace)) => trace,
                    Ok(None) => break,
                    Err(_) => continue,
                };
                if !sampler.should_sample() {
                    debug!("trace {} sampled out", trace.trace_id);
                    continue;
                }
                evaluate_one(&*evaluator, &assertions, &dispatcher, trace).await;
            }
        }));
    }

    /// Stop the worker without draining the queue; queued traces are picked
    /// up again by a later `start`.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        info!("continuous evaluation worker stopped");
    }
}

async fn evaluate_one<E: Evaluator>(
    evaluator: &E,
    assertions: &[Assertion],
    dispatcher: &AlertDispatcher,
    trace: Trace,
) {
    let trace_id = trace.trace_id.clone();
    match evaluator.evaluate_batch(&trace, assertions).await {
        Ok(batch) => {
            for result in &batch.results {
                if result.status == AssertionStatus::HardFail {
                    let alert = DriftAlert {
                        drift_type: "hard_fail".to_string(),
                        score: result.score,
                        trace_id: trace_id.clone(),
                    };
                    warn!("{}", alert.message());
                    dispatcher.dispatch(&alert).await;
                }
            }
        }
        Err(e) => warn!("continuous evaluation of trace {} failed: {}", trace_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use verdict_core::builder::TraceBuilder;
    use verdict_core::proto::types::{
        assertion_type, AssertionResult, EvaluateBatchResult,
    };

    struct RecordingEvaluator {
        calls: AtomicUsize,
        trace_ids: StdMutex<Vec<String>>,
        status: AssertionStatus,
    }

    impl RecordingEvaluator {
        fn new(status: AssertionStatus) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                trace_ids: StdMutex::new(Vec::new()),
                status,
            })
        }
    }

    #[async_trait::async_trait]
    impl Evaluator for RecordingEvaluator {
        async fn evaluate_batch(
            &self,
            trace: &Trace,
            assertions: &[Assertion],
        ) -> Result<EvaluateBatchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.trace_ids.lock().unwrap().push(trace.trace_id.clone());
            Ok(EvaluateBatchResult {
                results: assertions
                    .iter()
                    .map(|a| AssertionResult {
                        assertion_id: a.assertion_id.clone(),
                        status: self.status,
                        score: 0.1,
                        explanation: String::new(),
                        cost: 0.0,
                        duration_ms: 0,
                        request_id: None,
                    })
                    .collect(),
                total_cost: 0.0,
                total_duration_ms: 0,
            })
        }
    }

    fn trace(n: usize) -> Trace {
        TraceBuilder::new()
            .trace_id(format!("trc_{:04}", n))
            .output(json!({}))
            .build()
            .unwrap()
    }

    fn config(queue_size: usize, sample_rate: f64) -> ContinuousConfig {
        ContinuousConfig {
            queue_size,
            sample_rate,
            alert_webhook_url: None,
            alert_slack_url: None,
        }
    }

    /// Opt-in test logging: `RUST_LOG=verdict_supervisor=debug cargo test`.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn wait_for(predicate: impl Fn() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_sampler_bounds() {
        assert!(Sampler::new(-0.1).is_err());
        assert!(Sampler::new(1.1).is_err());

        let always = Sampler::new(1.0).unwrap();
        let never = Sampler::new(0.0).unwrap();
        for _ in 0..100 {
            assert!(always.should_sample());
            assert!(!never.should_sample());
        }
    }

    #[test]
    fn test_sampler_half_rate_is_probabilistic() {
        let sampler = Sampler::new(0.5).unwrap();
        let sampled = (0..10_000).filter(|_| sampler.should_sample()).count();
        // Loose bounds; far outside them means the rate is not applied.
        assert!(sampled > 4_000 && sampled < 6_000, "sampled {}", sampled);
    }

    #[tokio::test]
    async fn test_queue_bound_drops_excess() {
        init_tracing();
        let evaluator = RecordingEvaluator::new(AssertionStatus::Pass);
        let runner = ContinuousRunner::new(evaluator, vec![], &config(2, 1.0)).unwrap();

        // Worker not started: the queue fills and overflow is dropped.
        assert!(runner.submit(trace(1)));
        assert!(runner.submit(trace(2)));
        assert!(!runner.submit(trace(3)));
    }

    #[tokio::test]
    async fn test_traces_evaluated_in_submission_order() {
        let evaluator = RecordingEvaluator::new(AssertionStatus::Pass);
        let runner = ContinuousRunner::new(
            Arc::clone(&evaluator),
            vec![Assertion::new("a1", assertion_type::SCHEMA, json!({}))],
            &config(16, 1.0),
        )
        .unwrap();

        for n in 0..5 {
            assert!(runner.submit(trace(n)));
        }
        runner.start().await;
        let e = Arc::clone(&evaluator);
        wait_for(move || e.calls.load(Ordering::SeqCst) == 5).await;
        runner.stop().await;

        let ids = evaluator.trace_ids.lock().unwrap().clone();
        let expected: Vec<String> = (0..5).map(|n| format!("trc_{:04}", n)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_zero_sample_rate_never_evaluates() {
        let evaluator = RecordingEvaluator::new(AssertionStatus::Pass);
        let runner =
            ContinuousRunner::new(Arc::clone(&evaluator), vec![], &config(32, 0.0)).unwrap();
        runner.start().await;

        // Every trace is admitted; the worker samples them all out.
        for n in 0..20 {
            assert!(runner.submit(trace(n)));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.stop().await;
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_enqueues_regardless_of_sample_rate() {
        let evaluator = RecordingEvaluator::new(AssertionStatus::Pass);
        let runner =
            ContinuousRunner::new(evaluator, vec![], &config(2, 0.0)).unwrap();

        // Worker not started: admission is decided by queue capacity alone,
        // so unsampled traces still occupy slots until dequeued.
        assert!(runner.submit(trace(1)));
        assert!(runner.submit(trace(2)));
        assert!(!runner.submit(trace(3)));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let evaluator = RecordingEvaluator::new(AssertionStatus::Pass);
        let runner = ContinuousRunner::new(
            Arc::clone(&evaluator),
            vec![Assertion::new("a1", assertion_type::SCHEMA, json!({}))],
            &config(16, 1.0),
        )
        .unwrap();

        runner.start().await;
        runner.start().await;
        assert!(runner.submit(trace(1)));
        let e = Arc::clone(&evaluator);
        wait_for(move || e.calls.load(Ordering::SeqCst) == 1).await;
        runner.stop().await;
        // Exactly one worker consumed the trace.
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hard_fail_dispatches_webhook_alert() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        init_tracing();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let evaluator = RecordingEvaluator::new(AssertionStatus::HardFail);
        let runner = ContinuousRunner::new(
            Arc::clone(&evaluator),
            vec![Assertion::new("a1", assertion_type::CONSTRAINT, json!({}))],
            &ContinuousConfig {
                alert_webhook_url: Some(format!("{}/alerts", server.uri())),
                ..config(16, 1.0)
            },
        )
        .unwrap();

        runner.start().await;
        assert!(runner.submit(trace(1)));
        let e = Arc::clone(&evaluator);
        wait_for(move || e.calls.load(Ordering::SeqCst) == 1).await;

        // Received exactly one alert with the expected shape.
        let mut requests = Vec::new();
        for _ in 0..200 {
            requests = server.received_requests().await.unwrap_or_default();
            if !requests.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        runner.stop().await;
        assert!(!requests.is_empty(), "no alert delivered");
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["drift_type"], "hard_fail");
        assert_eq!(body["trace_id"], "trc_0001");
    }

    #[tokio::test]
    async fn test_alert_failure_does_not_stop_evaluation() {
        // Unroutable webhook; evaluation must keep going regardless.
        let evaluator = RecordingEvaluator::new(AssertionStatus::HardFail);
        let runner = ContinuousRunner::new(
            Arc::clone(&evaluator),
            vec![Assertion::new("a1", assertion_type::CONSTRAINT, json!({}))],
            &ContinuousConfig {
                alert_webhook_url: Some("http://localhost:1/alerts".to_string()),
                ..config(16, 1.0)
            },
        )
        .unwrap();

        runner.start().await;
        assert!(runner.submit(trace(1)));
        assert!(runner.submit(trace(2)));
        let e = Arc::clone(&evaluator);
        wait_for(move || e.calls.load(Ordering::SeqCst) == 2).await;
        runner.stop().await;
    }
}
