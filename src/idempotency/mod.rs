pub mod coordinator;
pub mod eligibility;
pub mod fingerprint;
pub mod middleware;
pub mod replay;
pub mod storage;
pub mod sweeper;

pub use coordinator::{Execution, IdempotencyCoordinator, IdempotencyMetrics, MetricsSnapshot};
pub use eligibility::{extract_key, EligibilityFilter, PathPattern, IDEMPOTENCY_KEY_HEADER};
pub use fingerprint::Fingerprint;
pub use middleware::{idempotency_layer, IdempotencyMediator};
pub use replay::{replay, ResponseReplayer, StoredResponse};
pub use storage::{
    Claim, ClaimToken, IdempotencyRecord, IdempotencyStatus, RecordStore, Resolution, StoreConfig,
    SweepReport, WaitOutcome, Waiter,
};
pub use sweeper::EvictionSweeper;
