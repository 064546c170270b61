use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::idempotency::coordinator::IdempotencyMetrics;
use crate::idempotency::storage::{RecordStore, SweepReport};
use crate::observability::get_metrics;

/// Background job that evicts expired completed records and abandoned pending ones.
pub struct EvictionSweeper {
    store: Arc<RecordStore>,
    metrics: Arc<IdempotencyMetrics>,
    interval: Duration,
}

impl EvictionSweeper {
    pub fn new(store: Arc<RecordStore>, metrics: Arc<IdempotencyMetrics>, interval: Duration) -> Self {
        Self {
            store,
            metrics,
            interval,
        }
    }

    /// Runs one eviction pass.
    pub fn run_once(&self) -> SweepReport {
        let report = self.store.sweep_expired();

        self.metrics.record_evicted(report.total());
        let metrics = get_metrics();
        metrics.record_idempotency_evictions(report.completed_evicted, report.abandoned_released);
        metrics.set_idempotency_records(self.store.len());

        report
    }

    /// Starts the sweeper in a background task that exits once `shutdown`
    /// turns true or its sender is dropped.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Eviction sweeper stopped");
                            return;
                        }
                        continue;
                    }
                }

                let report = self.run_once();
                if report.total() > 0 {
                    tracing::info!(
                        completed_evicted = report.completed_evicted,
                        abandoned_released = report.abandoned_released,
                        remaining = self.store.len(),
                        "Swept expired idempotency records"
                    );
                }
            }
        })
    }
}
