use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::ConfigError;

/// Throttling policy: at most `max_allowed_actions` successful executions per
/// group within the trailing `period`.
///
/// `period` is both the lookback window and the lifetime of saved records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ThrottlerConfig {
    #[validate(range(min = 1, message = "max_allowed_actions must be greater than 0"))]
    pub max_allowed_actions: u32,

    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_period"))]
    pub period: Duration,
}

impl ThrottlerConfig {
    pub fn new(max_allowed_actions: u32, period: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            max_allowed_actions,
            period,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document such as
    /// `{"max_allowed_actions": 3, "period": "5m"}`.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_period(period: &Duration) -> Result<(), ValidationError> {
    if period.is_zero() {
        let mut err = ValidationError::new("period");
        err.message = Some("period must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}
