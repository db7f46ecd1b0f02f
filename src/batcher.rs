//! Cross-request batching for prediction calls.
//!
//! Concurrent requests are appended to one pending batch. The batch is
//! flushed to the engine when it holds `max_batch_size` queries or when
//! `max_latency` has passed since it was opened, whichever comes first. Each
//! caller then receives its own slice of the predictions together with the
//! shared timing report.
//!
//! [`RequestBatcher::shutdown`] stops the batching task. Requests still
//! waiting at that point, and any submitted afterwards, fail with
//! [`BatcherError::Closed`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use crate::config::BatcherConfig;
use crate::core::InferenceError;
use crate::pipelines::{InferenceEngine, InferenceResult};

const SUBMISSION_QUEUE: usize = 1024;

#[derive(Debug, Clone, Error)]
pub enum BatcherError {
    #[error("cannot submit an empty query list")]
    EmptyRequest,

    #[error("inference failed: {0}")]
    Inference(Arc<InferenceError>),

    #[error("inference returned {actual} predictions for {expected} queries")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("request timed out waiting for its batch")]
    Timeout,

    #[error("batcher is shut down")]
    Closed,
}

type Reply = oneshot::Sender<Result<InferenceResult, BatcherError>>;

struct Submission {
    queries: Vec<String>,
    reply: Reply,
}

/// One caller waiting on a range of the batch.
struct Subscriber {
    start: usize,
    end: usize,
    reply: Reply,
}

struct PendingBatch {
    queries: Vec<String>,
    subscribers: Vec<Subscriber>,
    deadline: Instant,
}

impl PendingBatch {
    fn new(deadline: Instant) -> Self {
        Self {
            queries: Vec::new(),
            subscribers: Vec::new(),
            deadline,
        }
    }

    fn push(&mut self, submission: Submission) {
        let start = self.queries.len();
        self.queries.extend(submission.queries);
        self.subscribers.push(Subscriber {
            start,
            end: self.queries.len(),
            reply: submission.reply,
        });
    }
}

/// Handle to the batching task. The task stops on [`shutdown`](Self::shutdown)
/// or once every handle is dropped.
#[derive(Clone)]
pub struct RequestBatcher {
    tx: mpsc::Sender<Submission>,
    shutdown: Arc<watch::Sender<bool>>,
    idle_timeout: Duration,
}

impl RequestBatcher {
    /// Spawn the batching task on the current tokio runtime.
    pub fn spawn(engine: Arc<dyn InferenceEngine>, config: &BatcherConfig) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(SUBMISSION_QUEUE);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = BatchWorker {
            engine,
            max_batch_size: config.max_batch_size,
            max_latency: config.max_latency(),
        };
        tokio::spawn(worker.run(rx, shutdown_rx));

        tracing::info!(
            max_batch_size = config.max_batch_size,
            max_latency_ms = config.max_latency_ms,
            idle_timeout_ms = config.idle_timeout_ms,
            "request batcher started"
        );

        Ok(Self {
            tx,
            shutdown: Arc::new(shutdown),
            idle_timeout: config.idle_timeout(),
        })
    }

    /// Stop accepting work and drop every request still waiting for a batch.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Queue `queries` and wait for their predictions.
    pub async fn submit(&self, queries: Vec<String>) -> Result<InferenceResult, BatcherError> {
        if queries.is_empty() {
            return Err(BatcherError::EmptyRequest);
        }

        let (reply, response) = oneshot::channel();
        self.tx
            .send(Submission { queries, reply })
            .await
            .map_err(|_| BatcherError::Closed)?;

        match tokio::time::timeout(self.idle_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BatcherError::Closed),
            Err(_) => {
                tracing::warn!("batched request timed out after {:?}", self.idle_timeout);
                Err(BatcherError::Timeout)
            }
        }
    }
}

struct BatchWorker {
    engine: Arc<dyn InferenceEngine>,
    max_batch_size: usize,
    max_latency: Duration,
}

impl BatchWorker {
    async fn run(self, mut rx: mpsc::Receiver<Submission>, mut shutdown: watch::Receiver<bool>) {
        let mut pending: Option<PendingBatch> = None;

        loop {
            let deadline = pending.as_ref().map(|batch| batch.deadline);
            let expired = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                submission = rx.recv() => match submission {
                    Some(submission) => {
                        let incoming = submission.queries.len();
                        if pending.as_ref().is_some_and(|batch| {
                            batch.queries.len() + incoming > self.max_batch_size
                        }) {
                            self.flush(pending.take());
                        }
                        if incoming > self.max_batch_size {
                            tracing::warn!(
                                queries = incoming,
                                max_batch_size = self.max_batch_size,
                                "request exceeds max batch size, flushing it on its own"
                            );
                        }

                        let batch = pending.get_or_insert_with(|| {
                            PendingBatch::new(Instant::now() + self.max_latency)
                        });
                        batch.push(submission);

                        if batch.queries.len() >= self.max_batch_size {
                            self.flush(pending.take());
                        }
                    }
                    None => break,
                },
                _ = expired => self.flush(pending.take()),
            }
        }

        if let Some(batch) = pending {
            tracing::info!(
                dropped = batch.subscribers.len(),
                "batcher stopping with requests still queued"
            );
        }
        tracing::info!("request batcher stopped");
    }

    fn flush(&self, batch: Option<PendingBatch>) {
        let Some(batch) = batch else { return };
        let engine = Arc::clone(&self.engine);

        tokio::spawn(async move {
            let PendingBatch {
                queries,
                subscribers,
                ..
            } = batch;
            let expected = queries.len();

            tracing::debug!(
                queries = expected,
                requests = subscribers.len(),
                "flushing batch"
            );

            let outcome = tokio::task::spawn_blocking(move || engine.infer(&queries)).await;
            let result = match outcome {
                Ok(Ok(result)) if result.predictions.len() == expected => Ok(result),
                Ok(Ok(result)) => Err(BatcherError::LengthMismatch {
                    expected,
                    actual: result.predictions.len(),
                }),
                Ok(Err(e)) => {
                    tracing::error!("batched inference failed: {e}");
                    Err(BatcherError::Inference(Arc::new(e)))
                }
                Err(e) => {
                    tracing::error!("batched inference task panicked: {e}");
                    Err(BatcherError::Closed)
                }
            };

            distribute(result, subscribers);
        });
    }
}

/// Hand every subscriber its own slice of the batch result.
fn distribute(result: Result<InferenceResult, BatcherError>, subscribers: Vec<Subscriber>) {
    for subscriber in subscribers {
        let reply = match &result {
            Ok(batch) => Ok(InferenceResult {
                predictions: batch.predictions[subscriber.start..subscriber.end].to_vec(),
                timings: batch.timings,
            }),
            Err(e) => Err(e.clone()),
        };
        // The caller may have timed out and gone away.
        let _ = subscriber.reply.send(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TimingReport;
    use crate::pipelines::SentimentLabel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Labels each query by its length and records the batch sizes it saw.
    #[derive(Default)]
    struct RecordingEngine {
        batches: Mutex<Vec<usize>>,
        calls: AtomicUsize,
    }

    impl InferenceEngine for RecordingEngine {
        fn infer(&self, queries: &[String]) -> Result<InferenceResult, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(queries.len());
            let predictions = queries
                .iter()
                .map(|q| SentimentLabel::ALL[q.len() % SentimentLabel::COUNT])
                .collect();
            Ok(InferenceResult {
                predictions,
                timings: TimingReport {
                    model_load_ms: 7,
                    ..Default::default()
                },
            })
        }

        fn model_load_ms(&self) -> u64 {
            7
        }
    }

    struct ShortEngine;

    impl InferenceEngine for ShortEngine {
        fn infer(&self, _queries: &[String]) -> Result<InferenceResult, InferenceError> {
            Ok(InferenceResult {
                predictions: vec![SentimentLabel::Neutral],
                timings: TimingReport::default(),
            })
        }

        fn model_load_ms(&self) -> u64 {
            0
        }
    }

    struct FailingEngine;

    impl InferenceEngine for FailingEngine {
        fn infer(&self, _queries: &[String]) -> Result<InferenceResult, InferenceError> {
            Err(InferenceError::Tokenization("boom".to_string()))
        }

        fn model_load_ms(&self) -> u64 {
            0
        }
    }

    fn config(max_batch_size: usize, max_latency_ms: u64) -> BatcherConfig {
        BatcherConfig {
            enabled: true,
            max_batch_size,
            max_latency_ms,
            idle_timeout_ms: 5_000,
        }
    }

    fn queries(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_batch() {
        let engine = Arc::new(RecordingEngine::default());
        let batcher = RequestBatcher::spawn(engine.clone(), &config(3, 5_000)).unwrap();

        let (a, b) = tokio::join!(
            batcher.submit(queries(&["a", "bb"])),
            batcher.submit(queries(&["ccc"])),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        assert_eq!(
            a.predictions,
            vec![SentimentLabel::ALL[1], SentimentLabel::ALL[2]]
        );
        assert_eq!(b.predictions, vec![SentimentLabel::ALL[3]]);
        assert_eq!(a.timings.model_load_ms, 7);
        assert_eq!(*engine.batches.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn partial_batch_flushes_after_max_latency() {
        let engine = Arc::new(RecordingEngine::default());
        let batcher = RequestBatcher::spawn(engine.clone(), &config(32, 20)).unwrap();

        let result = batcher.submit(queries(&["only"])).await.unwrap();
        assert_eq!(result.predictions.len(), 1);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_request_is_flushed_on_its_own() {
        let engine = Arc::new(RecordingEngine::default());
        let batcher = RequestBatcher::spawn(engine.clone(), &config(2, 5_000)).unwrap();

        let result = batcher
            .submit(queries(&["a", "b", "c", "d"]))
            .await
            .unwrap();
        assert_eq!(result.predictions.len(), 4);
        assert_eq!(*engine.batches.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn engine_failure_reaches_every_caller() {
        let batcher = RequestBatcher::spawn(Arc::new(FailingEngine), &config(2, 5_000)).unwrap();

        let (a, b) = tokio::join!(
            batcher.submit(queries(&["x"])),
            batcher.submit(queries(&["y"])),
        );
        assert!(matches!(a, Err(BatcherError::Inference(_))));
        assert!(matches!(b, Err(BatcherError::Inference(_))));
    }

    #[tokio::test]
    async fn short_prediction_list_is_a_length_mismatch() {
        let batcher = RequestBatcher::spawn(Arc::new(ShortEngine), &config(2, 5_000)).unwrap();

        let result = batcher.submit(queries(&["x", "y"])).await;
        assert!(matches!(
            result,
            Err(BatcherError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let batcher = RequestBatcher::spawn(Arc::new(ShortEngine), &config(2, 5_000)).unwrap();
        assert!(matches!(
            batcher.submit(Vec::new()).await,
            Err(BatcherError::EmptyRequest)
        ));
    }

    #[tokio::test]
    async fn waiting_past_idle_timeout_times_out() {
        let batcher = RequestBatcher::spawn(
            Arc::new(ShortEngine),
            &BatcherConfig {
                enabled: true,
                max_batch_size: 32,
                max_latency_ms: 5_000,
                idle_timeout_ms: 20,
            },
        )
        .unwrap();
        assert!(matches!(
            batcher.submit(queries(&["x"])).await,
            Err(BatcherError::Timeout)
        ));
    }

    #[tokio::test]
    async fn request_that_would_overflow_starts_a_new_batch() {
        let engine = Arc::new(RecordingEngine::default());
        let batcher = RequestBatcher::spawn(engine.clone(), &config(3, 50)).unwrap();

        let (a, b) = tokio::join!(
            batcher.submit(queries(&["a", "b"])),
            batcher.submit(queries(&["c", "d"])),
        );
        assert_eq!(a.unwrap().predictions.len(), 2);
        assert_eq!(b.unwrap().predictions.len(), 2);
        assert_eq!(*engine.batches.lock().unwrap(), vec![2, 2]);
    }

    #[test]
    fn invalid_config_is_rejected_at_spawn() {
        let result = RequestBatcher::spawn(Arc::new(ShortEngine), &config(0, 5_000));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_waiting_requests() {
        let engine = Arc::new(RecordingEngine::default());
        let batcher = RequestBatcher::spawn(engine.clone(), &config(32, 60_000)).unwrap();

        let waiting = {
            let batcher = batcher.clone();
            tokio::spawn(async move { batcher.submit(queries(&["x"])).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        batcher.shutdown();

        let result = tokio::time::timeout(Duration::from_millis(500), waiting)
            .await
            .expect("request still pending after shutdown")
            .unwrap();
        assert!(matches!(result, Err(BatcherError::Closed)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_closed() {
        let batcher = RequestBatcher::spawn(Arc::new(ShortEngine), &config(2, 5_000)).unwrap();
        batcher.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            batcher.submit(queries(&["x"])).await,
            Err(BatcherError::Closed)
        ));
    }
}
