//! Persistent record of successful executions.
//!
//! The throttler only needs two things from a backend: how many executions of
//! a group happened since some instant, and a way to append a new one that
//! expires on its own. Anything that can answer both is a valid backend.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStorage;
pub use self::redis::{RedisCommands, RedisStorage};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::StorageError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Count live executions of `group` recorded at or after `after`.
    ///
    /// Records whose expiration has elapsed are never counted.
    async fn count_last_executed(&self, group: &str, after: SystemTime)
        -> Result<u64, StorageError>;

    /// Record one successful execution of `group` at `at`, uncountable once
    /// `expiration` has elapsed. Concurrent saves with the same `at` must all
    /// be kept.
    async fn save_successful_execution(
        &self,
        group: &str,
        at: SystemTime,
        expiration: Duration,
    ) -> Result<(), StorageError>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn count_last_executed(
        &self,
        group: &str,
        after: SystemTime,
    ) -> Result<u64, StorageError> {
        (**self).count_last_executed(group, after).await
    }

    async fn save_successful_execution(
        &self,
        group: &str,
        at: SystemTime,
        expiration: Duration,
    ) -> Result<(), StorageError> {
        (**self).save_successful_execution(group, at, expiration).await
    }
}
