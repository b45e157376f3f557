pub mod action;
pub mod clock;
pub mod config;
pub mod error;
pub mod storage;
pub mod throttler;
pub mod validation;

pub use action::Action;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ThrottlerConfig;
pub use error::{ConfigError, ExecuteError, StorageError};
pub use storage::{MemoryStorage, RedisStorage, Storage};
pub use throttler::Throttler;
