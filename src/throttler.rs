use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::clock::{Clock, SystemClock};
use crate::config::ThrottlerConfig;
use crate::error::{ConfigError, ExecuteError, StorageError};
use crate::storage::Storage;

/// Runs actions only while their group stays under the configured number of
/// successful executions within the trailing period.
///
/// A `Throttler` holds no mutable state of its own, so one instance can be
/// shared between tasks (or several instances can share one storage). The
/// count check and the save are not atomic: concurrent callers may each see
/// room in the window and all run, overshooting the limit by at most the
/// number of callers racing.
pub struct Throttler<S> {
    clock: Arc<dyn Clock>,

    /// How many actions can be executed within the window
    max_allowed_actions: u32,
    /// The window, also used as the lifetime of saved executions
    period: Duration,

    storage: S,
    storage_timeout: Option<Duration>,
}

impl<S: Storage> Throttler<S> {
    pub fn new(max_allowed_actions: u32, period: Duration, storage: S) -> Result<Self, ConfigError> {
        let config = ThrottlerConfig::new(max_allowed_actions, period)?;
        Ok(Self::from_config(config, storage))
    }

    pub fn from_config(config: ThrottlerConfig, storage: S) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            max_allowed_actions: config.max_allowed_actions,
            period: config.period,
            storage,
            storage_timeout: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound every storage call. A call running past `timeout` fails with
    /// [`StorageError::Timeout`] and is cancelled.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = Some(timeout);
        self
    }

    pub fn max_allowed_actions(&self) -> u32 {
        self.max_allowed_actions
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Execute `action` if its group has not reached the limit.
    ///
    /// Only successful runs are recorded. On [`ExecuteError::Save`] the action
    /// did run; only its bookkeeping was lost. Dropping the returned future
    /// cancels any storage call in flight.
    pub async fn execute<A: Action>(&self, action: &A) -> Result<(), ExecuteError<A::Error>> {
        let group = action.group_id();
        // Falls back to the epoch only where the platform cannot represent
        // instants before it.
        let window_start = self
            .clock
            .now()
            .checked_sub(self.period)
            .unwrap_or(UNIX_EPOCH);

        let executed = self
            .bounded(self.storage.count_last_executed(group, window_start))
            .await
            .map_err(|e| {
                warn!(group, error = %e, "failed to count executions");
                ExecuteError::Query(e)
            })?;

        if executed >= u64::from(self.max_allowed_actions) {
            info!(
                group,
                executed,
                limit = self.max_allowed_actions,
                "action throttled"
            );
            return Err(ExecuteError::LimitExceeded);
        }

        debug!(group, executed, limit = self.max_allowed_actions, "running action");
        action.run().await.map_err(ExecuteError::Action)?;

        self.bounded(
            self.storage
                .save_successful_execution(group, self.clock.now(), self.period),
        )
        .await
        .map_err(|e| {
            warn!(group, error = %e, "action ran but its execution was not recorded");
            ExecuteError::Save(e)
        })?;

        debug!(group, "execution recorded");
        Ok(())
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match self.storage_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| StorageError::Timeout(limit))?,
            None => call.await,
        }
    }
}

impl<S> std::fmt::Debug for Throttler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("max_allowed_actions", &self.max_allowed_actions)
            .field("period", &self.period)
            .field("storage_timeout", &self.storage_timeout)
            .finish_non_exhaustive()
    }
}
