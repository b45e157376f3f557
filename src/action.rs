use async_trait::async_trait;

/// A unit of work that can be throttled.
///
/// Actions sharing a `group_id` share one window and one count. The throttler
/// calls `run` at most once per `execute` and never retries it.
#[async_trait]
pub trait Action: Send + Sync {
    /// Failure type of `run`, handed back to the caller untouched.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Key grouping executions of the same logical task. Must be non-empty.
    fn group_id(&self) -> &str;

    async fn run(&self) -> Result<(), Self::Error>;
}
