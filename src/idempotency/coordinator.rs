use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::idempotency::fingerprint::Fingerprint;
use crate::idempotency::replay::StoredResponse;
use crate::idempotency::storage::{
    Claim, ClaimToken, IdempotencyRecord, IdempotencyStatus, RecordStore, Resolution, WaitOutcome,
    Waiter,
};
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};

/// Metrics for idempotency mediation.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub new_requests: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub waited_requests: AtomicU64,
    pub conflicts: AtomicU64,
    pub timeouts: AtomicU64,
    pub completed_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub capacity_rejections: AtomicU64,
    pub evicted_records: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_new(&self) {
        self.new_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_event("claimed");
    }

    pub fn record_duplicate(&self) {
        self.duplicate_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_event("replayed");
    }

    pub fn record_waited(&self, duration_ms: f64) {
        self.waited_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_wait_latency(duration_ms);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_event("conflict");
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_event("wait_timeout");
    }

    pub fn record_completed(&self, duration_ms: f64) {
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_execution(duration_ms, true);
    }

    pub fn record_failed(&self, duration_ms: f64) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_execution(duration_ms, false);
    }

    pub fn record_capacity_rejection(&self) {
        self.capacity_rejections.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_event("capacity_rejected");
    }

    pub fn record_evicted(&self, count: usize) {
        self.evicted_records.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn duplicate_rate(&self) -> f64 {
        self.snapshot().duplicate_rate()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
            duplicate_requests: self.duplicate_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            waited_requests: self.waited_requests.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            completed_requests: self.completed_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            evicted_records: self.evicted_records.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub new_requests: u64,
    pub duplicate_requests: u64,
    pub replayed_requests: u64,
    pub waited_requests: u64,
    pub conflicts: u64,
    pub timeouts: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub capacity_rejections: u64,
    pub evicted_records: u64,
}

impl MetricsSnapshot {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.duplicate_requests as f64 / self.total_requests as f64
        }
    }
}

/// How a mediated request was satisfied.
#[derive(Debug, Clone)]
pub enum Execution {
    /// This caller won the claim and ran the operation.
    Executed(StoredResponse),
    /// The outcome came from another caller's execution.
    Replayed(StoredResponse),
}

impl Execution {
    pub fn response(&self) -> &StoredResponse {
        match self {
            Execution::Executed(response) | Execution::Replayed(response) => response,
        }
    }

    pub fn was_replayed(&self) -> bool {
        matches!(self, Execution::Replayed(_))
    }
}

/// Runs an operation at most once per idempotency key.
///
/// The first caller to claim a key executes; every other caller presenting the
/// same key and fingerprint either replays the stored outcome or waits (bounded)
/// for the executing caller to publish it.
pub struct IdempotencyCoordinator {
    store: Arc<RecordStore>,
    metrics: Arc<IdempotencyMetrics>,
    wait_timeout: Duration,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<RecordStore>, wait_timeout: Duration) -> Self {
        Self {
            store,
            metrics: Arc::new(IdempotencyMetrics::new()),
            wait_timeout,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Gets the metrics for this coordinator.
    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Executes `operation` under `key`, or resolves the call from the key's
    /// existing record.
    ///
    /// The operation resolves to `Ok` for a completed outcome and `Err` for a
    /// failed one. It runs on its own task: dropping the returned future does
    /// not cancel it, and the record is resolved when the operation finishes.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        fingerprint: &Fingerprint,
        operation: F,
    ) -> Result<Execution>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<StoredResponse, StoredResponse>> + Send + 'static,
    {
        self.metrics.record_request();

        let claim = match self.store.insert_if_absent(key, fingerprint) {
            Ok(claim) => claim,
            Err(e) => {
                if matches!(e, AppError::StoreCapacity { .. }) {
                    self.metrics.record_capacity_rejection();
                    tracing::warn!(key = %mask_sensitive(key, 4), "Idempotency store full, rejecting claim");
                }
                return Err(e);
            }
        };

        match claim {
            Claim::Inserted(token) => self.run_claimed(key, token, operation()).await,
            Claim::Existing { record, waiter } => {
                self.resolve_duplicate(key, fingerprint, record, waiter).await
            }
        }
    }

    async fn run_claimed<Fut>(&self, key: &str, token: ClaimToken, operation: Fut) -> Result<Execution>
    where
        Fut: Future<Output = std::result::Result<StoredResponse, StoredResponse>> + Send + 'static,
    {
        self.metrics.record_new();
        tracing::debug!(key = %mask_sensitive(key, 4), "Claimed idempotency key");

        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let owned_key = key.to_string();

        let publisher = tokio::spawn(async move {
            let timer = LatencyTimer::new();

            let outcome = match tokio::spawn(operation).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        key = %mask_sensitive(&owned_key, 4),
                        error = %e,
                        "Idempotent operation aborted"
                    );
                    Err(StoredResponse::internal_error())
                }
            };

            match &outcome {
                Ok(response) => {
                    store.complete(&owned_key, token, response.clone());
                    metrics.record_completed(timer.elapsed_ms());
                }
                Err(response) => {
                    store.fail(&owned_key, token, response.clone());
                    metrics.record_failed(timer.elapsed_ms());
                    tracing::info!(
                        key = %mask_sensitive(&owned_key, 4),
                        status = response.status.as_u16(),
                        "Operation failed, idempotency claim released"
                    );
                }
            }

            outcome
        });

        match publisher.await {
            Ok(Ok(response)) => Ok(Execution::Executed(response)),
            Ok(Err(response)) => Err(AppError::UpstreamExecution(response)),
            Err(e) => Err(AppError::Internal(anyhow::anyhow!(
                "Failed to publish idempotent outcome: {}",
                e
            ))),
        }
    }

    async fn resolve_duplicate(
        &self,
        key: &str,
        fingerprint: &Fingerprint,
        record: IdempotencyRecord,
        waiter: Option<Waiter>,
    ) -> Result<Execution> {
        self.metrics.record_duplicate();

        if record.fingerprint != *fingerprint {
            self.metrics.record_conflict();
            tracing::warn!(
                key = %mask_sensitive(key, 4),
                "Idempotency key reused with a different request payload"
            );
            return Err(AppError::FingerprintConflict);
        }

        match (record.status, record.response, waiter) {
            (IdempotencyStatus::Completed, Some(response), _) => {
                self.metrics.record_replayed();
                tracing::debug!(key = %mask_sensitive(key, 4), "Replaying stored outcome");
                Ok(Execution::Replayed(response))
            }
            (IdempotencyStatus::Pending, _, Some(waiter)) => self.await_resolution(key, waiter).await,
            (status, _, _) => Err(AppError::Internal(anyhow::anyhow!(
                "Idempotency record in unexpected state {:?}",
                status
            ))),
        }
    }

    async fn await_resolution(&self, key: &str, waiter: Waiter) -> Result<Execution> {
        let timer = LatencyTimer::new();
        let outcome = waiter.wait(self.wait_timeout).await;
        self.metrics.record_waited(timer.elapsed_ms());

        match outcome {
            WaitOutcome::Resolved(Resolution::Completed(response)) => {
                self.metrics.record_replayed();
                Ok(Execution::Replayed(response))
            }
            WaitOutcome::Resolved(Resolution::Failed(response)) => {
                Err(AppError::UpstreamExecution(response))
            }
            WaitOutcome::TimedOut => {
                self.metrics.record_timeout();
                tracing::warn!(
                    key = %mask_sensitive(key, 4),
                    wait_timeout_ms = self.wait_timeout.as_millis() as u64,
                    "Timed out waiting for in-flight request"
                );
                Err(AppError::CoordinationTimeout {
                    waited: self.wait_timeout,
                })
            }
            WaitOutcome::Abandoned => {
                self.metrics.record_timeout();
                tracing::warn!(
                    key = %mask_sensitive(key, 4),
                    "In-flight request was abandoned before resolving"
                );
                Err(AppError::CoordinationTimeout {
                    waited: Duration::from_secs_f64(timer.elapsed_ms() / 1000.0),
                })
            }
        }
    }
}
