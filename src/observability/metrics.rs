use metrics::{counter, gauge, histogram, describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

/// Guards recorder installation so concurrent first calls install it once.
static METRICS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the gateway.
#[derive(Debug, Clone, Copy)]
pub struct Metrics;

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    /// Counts a mediation outcome (`claimed`, `replayed`, `conflict`, ...).
    pub fn record_idempotency_event(&self, outcome: &str) {
        counter!("idempotency_requests_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_idempotency_wait_latency(&self, duration_ms: f64) {
        histogram!("idempotency_wait_duration_ms").record(duration_ms);
    }

    pub fn record_idempotency_execution(&self, duration_ms: f64, success: bool) {
        counter!("idempotency_executions_total", "success" => success.to_string()).increment(1);
        histogram!("idempotency_execution_duration_ms", "success" => success.to_string()).record(duration_ms);
    }

    pub fn record_idempotency_evictions(&self, completed: usize, abandoned: usize) {
        counter!("idempotency_evictions_total", "reason" => "expired").increment(completed as u64);
        counter!("idempotency_evictions_total", "reason" => "abandoned").increment(abandoned as u64);
    }

    pub fn set_idempotency_records(&self, count: usize) {
        gauge!("idempotency_records").set(count as f64);
    }

    pub fn record_ledger_operation(&self, operation: &str, success: bool) {
        counter!("ledger_operations_total", "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder and returns its handle.
///
/// Later calls return the handle installed by the first one.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let mut installed = METRICS_HANDLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = installed.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);
    *installed = Some(handle.clone());
    Ok(handle)
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Protected requests by mediation outcome");
    describe_histogram!("idempotency_wait_duration_ms", Unit::Milliseconds, "Time duplicate callers spent waiting for the original request");
    describe_counter!("idempotency_executions_total", Unit::Count, "Operations executed under an idempotency claim");
    describe_histogram!("idempotency_execution_duration_ms", Unit::Milliseconds, "Execution latency of claimed operations in milliseconds");
    describe_counter!("idempotency_evictions_total", Unit::Count, "Idempotency records removed by the sweeper");
    describe_gauge!("idempotency_records", Unit::Count, "Idempotency records currently held");

    describe_counter!("ledger_operations_total", Unit::Count, "Total deposit and withdraw operations");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
