pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat, mask_sensitive, mask_amount};
pub use metrics::{init_metrics, get_metrics, Metrics, LatencyTimer, METRICS};
