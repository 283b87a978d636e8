use std::time::Duration;

use crate::error::Result;
use rocket::figment::Figment;
use serde::Deserialize;

/// The `[reviews]` section of the Rocket configuration.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Reviewers assigned to a pull request right after it's created.
    pub default_reviewers: usize,
    pub request_timeout_secs: u64,
    pub pool_size: usize,
    /// Fixed seed for the reviewer picker. Entropy when unset.
    pub rng_seed: Option<u64>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            default_reviewers: 2,
            request_timeout_secs: 10,
            pool_size: 16,
            rng_seed: None,
        }
    }
}

impl ReviewConfig {
    pub fn from_figment(config: &Figment) -> Result<Self> {
        let Ok(section) = config.find_value("reviews") else {
            tracing::info!("No reviews section in config, using defaults");
            return Ok(Self::default());
        };

        let config: Self = section
            .deserialize()
            .map_err(|e| anyhow::anyhow!("Invalid reviews section: {}", e))?;
        if config.pool_size == 0 {
            return Err(anyhow::anyhow!("reviews.pool_size must be at least 1").into());
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
