//! In-process storage for single-node use and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Storage;
use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::validation::validate_group_id;

/// One successful execution held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub at: SystemTime,
    /// `None` when `at + expiration` does not fit in a `SystemTime`.
    pub expires_at: Option<SystemTime>,
}

impl ExecutionRecord {
    fn is_live(&self, now: SystemTime) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// Append-only per-group record log guarded by an async lock.
///
/// Expired records are dropped whenever their group is queried, and
/// [`MemoryStorage::spawn_sweeper`] can reclaim groups nobody queries anymore.
/// Clones share the same records.
#[derive(Clone)]
pub struct MemoryStorage {
    records: Arc<RwLock<HashMap<String, Vec<ExecutionRecord>>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Remove every expired record, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records.write().await;

        let mut removed = 0;
        records.retain(|_, group_records| {
            let before = group_records.len();
            group_records.retain(|record| record.is_live(now));
            removed += before - group_records.len();
            !group_records.is_empty()
        });

        removed
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until the
    /// returned handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let storage = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = storage.purge_expired().await;
                if removed > 0 {
                    debug!(removed, "swept expired execution records");
                }
            }
        })
    }

    /// Number of records currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn count_last_executed(
        &self,
        group: &str,
        after: SystemTime,
    ) -> Result<u64, StorageError> {
        validate_group_id(group)?;

        let now = self.clock.now();
        let count_live = |group_records: &[ExecutionRecord]| {
            group_records
                .iter()
                .filter(|record| record.is_live(now) && record.at >= after)
                .count() as u64
        };

        {
            let records = self.records.read().await;
            let Some(group_records) = records.get(group) else {
                return Ok(0);
            };
            if group_records.iter().all(|record| record.is_live(now)) {
                return Ok(count_live(group_records));
            }
        }

        // Only groups holding expired records pay for the write lock.
        let mut records = self.records.write().await;
        let Some(group_records) = records.get_mut(group) else {
            return Ok(0);
        };

        group_records.retain(|record| record.is_live(now));
        let count = count_live(group_records);

        if group_records.is_empty() {
            records.remove(group);
        }

        Ok(count)
    }

    async fn save_successful_execution(
        &self,
        group: &str,
        at: SystemTime,
        expiration: Duration,
    ) -> Result<(), StorageError> {
        validate_group_id(group)?;

        let record = ExecutionRecord {
            at,
            expires_at: at.checked_add(expiration),
        };

        self.records
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .push(record);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::UNIX_EPOCH;

    fn storage_at(start: SystemTime) -> (MemoryStorage, ManualClock) {
        let clock = ManualClock::new(start);
        let storage = MemoryStorage::with_clock(Arc::new(clock.clone()));
        (storage, clock)
    }

    #[tokio::test]
    async fn test_saved_record_is_counted_until_it_expires() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let period = Duration::from_secs(300);
        let (storage, clock) = storage_at(t);

        storage.save_successful_execution("report", t, period).await.unwrap();
        assert_eq!(storage.count_last_executed("report", t).await.unwrap(), 1);
        assert_eq!(
            storage
                .count_last_executed("report", t - Duration::from_secs(1))
                .await
                .unwrap(),
            1
        );

        clock.advance(period - Duration::from_secs(1));
        assert_eq!(storage.count_last_executed("report", t).await.unwrap(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(storage.count_last_executed("report", t).await.unwrap(), 0);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_records_before_after_are_not_counted() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let (storage, _clock) = storage_at(t);
        let hour = Duration::from_secs(3600);

        storage
            .save_successful_execution("sync", t - Duration::from_secs(120), hour)
            .await
            .unwrap();
        storage
            .save_successful_execution("sync", t - Duration::from_secs(30), hour)
            .await
            .unwrap();

        let after = t - Duration::from_secs(60);
        assert_eq!(storage.count_last_executed("sync", after).await.unwrap(), 1);
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_same_instant_saves_are_all_kept() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let (storage, _clock) = storage_at(t);
        let minute = Duration::from_secs(60);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.save_successful_execution("burst", t, minute).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(storage.count_last_executed("burst", t).await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let (storage, _clock) = storage_at(t);
        let minute = Duration::from_secs(60);

        storage.save_successful_execution("a", t, minute).await.unwrap();
        storage.save_successful_execution("a-b", t, minute).await.unwrap();

        assert_eq!(storage.count_last_executed("a", t).await.unwrap(), 1);
        assert_eq!(storage.count_last_executed("a-b", t).await.unwrap(), 1);
        assert_eq!(storage.count_last_executed("c", t).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_live_counts_do_not_wait_for_the_write_lock() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let (storage, _clock) = storage_at(t);

        storage
            .save_successful_execution("report", t, Duration::from_secs(60))
            .await
            .unwrap();

        let _reader = storage.records.read().await;
        let count = tokio::time::timeout(
            Duration::from_secs(1),
            storage.count_last_executed("report", t),
        )
        .await
        .expect("count blocked behind a held read lock")
        .unwrap();

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_expired_records_are_pruned_when_queried() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let (storage, clock) = storage_at(t);

        storage
            .save_successful_execution("report", t, Duration::from_secs(10))
            .await
            .unwrap();
        storage
            .save_successful_execution("report", t + Duration::from_secs(5), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(20));
        assert_eq!(storage.count_last_executed("report", t).await.unwrap(), 1);
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_idle_groups() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let (storage, clock) = storage_at(t);

        storage
            .save_successful_execution("short", t, Duration::from_secs(10))
            .await
            .unwrap();
        storage
            .save_successful_execution("long", t, Duration::from_secs(100))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(50));
        assert_eq!(storage.purge_expired().await, 1);
        assert_eq!(storage.len().await, 1);
        assert_eq!(storage.count_last_executed("long", t).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let (storage, clock) = storage_at(t);

        storage
            .save_successful_execution("idle", t, Duration::from_secs(1))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));

        let sweeper = storage.spawn_sweeper(Duration::from_millis(10));
        for _ in 0..100 {
            if storage.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();

        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_unbounded_expiration_never_expires() {
        let t = UNIX_EPOCH + Duration::from_secs(10_000);
        let (storage, clock) = storage_at(t);

        storage
            .save_successful_execution("forever", t, Duration::MAX)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));

        assert_eq!(storage.count_last_executed("forever", t).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_group_is_rejected() {
        let storage = MemoryStorage::new();
        let result = storage.count_last_executed("", SystemTime::now()).await;
        assert!(matches!(result, Err(StorageError::InvalidGroup(_))));

        let result = storage
            .save_successful_execution("", SystemTime::now(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidGroup(_))));
    }
}
