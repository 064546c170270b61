use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};
use crate::idempotency::fingerprint::Fingerprint;
use crate::idempotency::replay::StoredResponse;
use crate::observability::mask_sensitive;

/// Identifies the claim that owns a record. Only the owner may resolve it.
pub type ClaimToken = Uuid;

/// Status of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    /// Only ever seen on the record handed back by [`RecordStore::fail`];
    /// failed records are removed from the store.
    Failed,
}

/// Stored idempotency record.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub id: ClaimToken,
    pub key: String,
    pub fingerprint: Fingerprint,
    pub status: IdempotencyStatus,
    pub response: Option<StoredResponse>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once, on completion.
    pub expires_at: Option<DateTime<Utc>>,
    pub lease_expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn pending(key: &str, fingerprint: &Fingerprint, now: DateTime<Utc>, lease: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.to_string(),
            fingerprint: fingerprint.clone(),
            status: IdempotencyStatus::Pending,
            response: None,
            created_at: now,
            completed_at: None,
            expires_at: None,
            lease_expires_at: now + lease,
        }
    }

    /// Completed records expire at `expires_at`, pending ones when their lease runs out.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            IdempotencyStatus::Completed => self.expires_at.map_or(false, |at| now >= at),
            IdempotencyStatus::Pending => now >= self.lease_expires_at,
            IdempotencyStatus::Failed => true,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == IdempotencyStatus::Completed
    }

    pub fn is_pending(&self) -> bool {
        self.status == IdempotencyStatus::Pending
    }
}

/// Final state of a claim, published to its waiters.
#[derive(Debug, Clone)]
pub enum Resolution {
    Completed(StoredResponse),
    Failed(StoredResponse),
}

/// What a suspended duplicate ends up with.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Resolved(Resolution),
    /// The claim was dropped without being resolved (lease reclaimed or swept).
    Abandoned,
    TimedOut,
}

/// Handle for a caller suspended on a pending record.
#[derive(Debug)]
pub struct Waiter {
    receiver: watch::Receiver<Option<Resolution>>,
}

impl Waiter {
    pub async fn wait(mut self, timeout: std::time::Duration) -> WaitOutcome {
        let waited = tokio::time::timeout(timeout, self.receiver.wait_for(Option::is_some)).await;

        match waited {
            Err(_) => WaitOutcome::TimedOut,
            Ok(Err(_)) => WaitOutcome::Abandoned,
            Ok(Ok(resolution)) => match (*resolution).clone() {
                Some(resolution) => WaitOutcome::Resolved(resolution),
                None => WaitOutcome::Abandoned,
            },
        }
    }
}

/// Result of an atomic claim attempt.
#[derive(Debug)]
pub enum Claim {
    /// The caller owns the key and must resolve it with the token.
    Inserted(ClaimToken),
    /// Someone else owns the key. `waiter` is set while the record is pending.
    Existing {
        record: IdempotencyRecord,
        waiter: Option<Waiter>,
    },
}

/// Counts from one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub completed_evicted: usize,
    pub abandoned_released: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.completed_evicted + self.abandoned_released
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub ttl: Duration,
    pub pending_lease: Duration,
    pub max_records: usize,
}

impl StoreConfig {
    /// Expects settings that passed [`IdempotencySettings::validate`].
    pub fn from_settings(settings: &IdempotencySettings) -> Self {
        Self {
            ttl: Duration::seconds(settings.ttl_seconds as i64),
            pending_lease: Duration::seconds(settings.pending_lease_seconds as i64),
            max_records: settings.max_records,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_settings(&IdempotencySettings::default())
    }
}

struct Slot {
    record: IdempotencyRecord,
    /// Present while pending; taken when the claim resolves.
    notifier: Option<watch::Sender<Option<Resolution>>>,
}

impl Slot {
    fn pending(record: IdempotencyRecord) -> Self {
        let (notifier, _) = watch::channel(None);
        Self {
            record,
            notifier: Some(notifier),
        }
    }
}

/// Process-wide key space of idempotency records.
///
/// Every mutation of a key runs inside that key's map entry lock, so the
/// check-and-set in [`RecordStore::insert_if_absent`] has no gap between the
/// absence check and the write, and unrelated keys only share a lock when they
/// hash to the same shard.
pub struct RecordStore {
    slots: DashMap<String, Slot>,
    live: AtomicUsize,
    config: StoreConfig,
}

impl RecordStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            slots: DashMap::new(),
            live: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert_if_absent(&self, key: &str, fingerprint: &Fingerprint) -> Result<Claim> {
        self.insert_if_absent_at(key, fingerprint, Utc::now())
    }

    /// Claims `key` for the caller unless a live record exists.
    ///
    /// Expired records are treated as absent and replaced in place. When the
    /// existing record is pending the caller is subscribed to it before the
    /// entry lock is released, so it cannot miss the resolution.
    ///
    /// A full store reclaims its expired records once before refusing a new key.
    pub fn insert_if_absent_at(
        &self,
        key: &str,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<Claim> {
        match self.claim_at(key, fingerprint, now) {
            Err(AppError::StoreCapacity { .. }) => {
                // No entry lock is held here; `retain` locks every shard.
                let report = self.sweep_expired_at(now);
                if report.total() == 0 {
                    return Err(AppError::StoreCapacity {
                        capacity: self.config.max_records,
                    });
                }
                tracing::debug!(
                    evicted = report.total(),
                    "Reclaimed expired idempotency records at capacity"
                );
                self.claim_at(key, fingerprint, now)
            }
            claim => claim,
        }
    }

    fn claim_at(&self, key: &str, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Result<Claim> {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().record.is_expired_at(now) {
                    let record =
                        IdempotencyRecord::pending(key, fingerprint, now, self.config.pending_lease);
                    let token = record.id;
                    let previous = occupied.insert(Slot::pending(record));
                    tracing::debug!(
                        key = %mask_sensitive(key, 4),
                        previous_status = ?previous.record.status,
                        "Reclaimed expired idempotency record"
                    );
                    return Ok(Claim::Inserted(token));
                }

                let slot = occupied.get();
                let waiter = slot.notifier.as_ref().map(|notifier| Waiter {
                    receiver: notifier.subscribe(),
                });

                Ok(Claim::Existing {
                    record: slot.record.clone(),
                    waiter,
                })
            }
            Entry::Vacant(vacant) => {
                self.reserve()?;
                let record =
                    IdempotencyRecord::pending(key, fingerprint, now, self.config.pending_lease);
                let token = record.id;
                vacant.insert(Slot::pending(record));
                Ok(Claim::Inserted(token))
            }
        }
    }

    pub fn complete(
        &self,
        key: &str,
        token: ClaimToken,
        response: StoredResponse,
    ) -> Option<IdempotencyRecord> {
        self.complete_at(key, token, response, Utc::now())
    }

    /// Moves the caller's pending claim to `Completed` and releases its waiters.
    ///
    /// Returns `None` without touching the store if the claim no longer owns the key.
    pub fn complete_at(
        &self,
        key: &str,
        token: ClaimToken,
        response: StoredResponse,
        now: DateTime<Utc>,
    ) -> Option<IdempotencyRecord> {
        let Some(mut slot) = self.slots.get_mut(key) else {
            tracing::warn!(key = %mask_sensitive(key, 4), "Completion for unknown idempotency key ignored");
            return None;
        };

        if slot.record.id != token || !slot.record.is_pending() {
            tracing::warn!(
                key = %mask_sensitive(key, 4),
                "Completion from a claim that no longer owns the key ignored"
            );
            return None;
        }

        slot.record.status = IdempotencyStatus::Completed;
        slot.record.response = Some(response.clone());
        slot.record.completed_at = Some(now);
        slot.record.expires_at = Some(now + self.config.ttl);

        if let Some(notifier) = slot.notifier.take() {
            notifier.send_replace(Some(Resolution::Completed(response)));
        }

        Some(slot.record.clone())
    }

    /// Deletes the caller's pending claim and hands its waiters the failure.
    ///
    /// Failures are never cached: once this returns the key can be claimed again.
    pub fn fail(
        &self,
        key: &str,
        token: ClaimToken,
        response: StoredResponse,
    ) -> Option<IdempotencyRecord> {
        let removed = self
            .slots
            .remove_if(key, |_, slot| slot.record.id == token && slot.record.is_pending());

        let Some((_, mut slot)) = removed else {
            tracing::warn!(
                key = %mask_sensitive(key, 4),
                "Failure from a claim that no longer owns the key ignored"
            );
            return None;
        };
        self.release(1);

        slot.record.status = IdempotencyStatus::Failed;
        slot.record.completed_at = Some(Utc::now());

        if let Some(notifier) = slot.notifier.take() {
            notifier.send_replace(Some(Resolution::Failed(response)));
        }

        Some(slot.record)
    }

    pub fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        self.get_at(key, Utc::now())
    }

    /// Looks up a live record. Expired records read as absent.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<IdempotencyRecord> {
        self.slots
            .get(key)
            .filter(|slot| !slot.record.is_expired_at(now))
            .map(|slot| slot.record.clone())
    }

    pub fn sweep_expired(&self) -> SweepReport {
        self.sweep_expired_at(Utc::now())
    }

    /// Drops completed records past expiry and pending records past their lease.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        self.slots.retain(|_, slot| {
            if !slot.record.is_expired_at(now) {
                return true;
            }
            match slot.record.status {
                IdempotencyStatus::Completed => report.completed_evicted += 1,
                _ => report.abandoned_released += 1,
            }
            false
        });

        self.release(report.total());
        report
    }

    fn reserve(&self) -> Result<()> {
        let previous = self.live.fetch_add(1, Ordering::AcqRel);
        if previous >= self.config.max_records {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(AppError::StoreCapacity {
                capacity: self.config.max_records,
            });
        }
        Ok(())
    }

    fn release(&self, count: usize) {
        if count > 0 {
            self.live.fetch_sub(count, Ordering::AcqRel);
        }
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
