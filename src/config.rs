//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Env var overriding the maximum accepted document size, in bytes.
pub const ENV_MAX_FILE_BYTES: &str = "SELLER_ONBOARD_MAX_FILE_BYTES";
/// Env var overriding the upload stall timeout, in seconds.
pub const ENV_UPLOAD_STALL_SECS: &str = "SELLER_ONBOARD_UPLOAD_STALL_SECS";

/// Onboarding core configuration.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Largest document payload accepted for upload.
    pub max_file_size: usize,
    /// A transfer that reports no event for this long is aborted and failed.
    pub upload_stall_timeout: Duration,
    /// Capacity of each transfer's progress channel.
    pub progress_buffer: usize,
    /// Capacity of the onboarding event broadcast.
    pub event_buffer: usize,
    /// Document store collection holding seller records.
    pub sellers_collection: String,
    /// Blob path prefix for uploaded KYC documents.
    pub blob_prefix: String,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            max_file_size: 5 * 1024 * 1024,
            upload_stall_timeout: Duration::from_secs(60),
            progress_buffer: 32,
            event_buffer: 256,
            sellers_collection: "sellers".to_string(),
            blob_prefix: "seller-documents".to_string(),
        }
    }
}

impl OnboardingConfig {
    /// Build a config from defaults, overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_FILE_BYTES) {
            config.max_file_size = parse_positive(ENV_MAX_FILE_BYTES, &raw)? as usize;
        }
        if let Some(raw) = lookup(ENV_UPLOAD_STALL_SECS) {
            config.upload_stall_timeout =
                Duration::from_secs(parse_positive(ENV_UPLOAD_STALL_SECS, &raw)?);
        }

        Ok(config)
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        Ok(v) => Ok(v),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
