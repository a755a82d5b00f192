//! Bounded Exponential Backoff
//!
//! Used by compaction when a generation-fenced write loses the race:
//! sleep, re-read at the new generation, try again; up to a bounded
//! number of attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Exponential backoff schedule: attempt `n` sleeps
/// `initial * scale^n`, and attempts past `max_attempts` fail with
/// [`Error::Exhausted`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backoff {
    /// Total attempts allowed before giving up (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep before the first retry (default: 15s).
    #[serde(with = "duration_serde", default = "default_initial")]
    pub initial: Duration,

    /// Multiplier applied per attempt (default: 5).
    #[serde(default = "default_scale")]
    pub scale: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial: default_initial(),
            scale: default_scale(),
        }
    }
}

impl Backoff {
    /// The sleep for a given zero-based attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_mul(self.scale.saturating_pow(attempt))
    }

    /// Sleep for `attempt`'s delay, or fail when attempts are exhausted.
    pub async fn sleep(&self, attempt: u32) -> Result<()> {
        if attempt >= self.max_attempts {
            return Err(Error::Exhausted {
                attempts: self.max_attempts,
            });
        }
        let delay = self.delay(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial() -> Duration {
    Duration::from_secs(15)
}

fn default_scale() -> u32 {
    5
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
